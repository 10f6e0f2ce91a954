//! Minimal scalar intermediate representation.
//!
//! Just enough IR for a loop pass to chew on: integer values, basic blocks
//! holding ordered instructions, phi nodes, array element addressing and
//! branches. Values live in a per-function arena and are referenced by id;
//! constants and arguments are materialized values that do not occupy a slot
//! in any block. Block layout order is meaningful — the nest recognizer
//! checks physical adjacency the same way the original pass walked
//! `getNextNode`.

use std::collections::{BTreeSet, HashMap};
use std::fmt;

/// Handle to a value in a [`Function`]'s arena.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct ValueId(pub u32);

/// Handle to a basic block.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct BlockId(pub u32);

/// Two-operand integer instruction kinds.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[allow(missing_docs)]
pub enum BinOp {
    Add,
    Sub,
    Mul,
    SDiv,
    SRem,
    Shl,
    Xor,
    And,
    Or,
}

/// Signed integer comparison predicates.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[allow(missing_docs)]
pub enum Predicate {
    Eq,
    Ne,
    Slt,
    Sle,
    Sgt,
    Sge,
}

/// A value: an argument, a constant, or an instruction.
#[derive(Debug, Clone, PartialEq)]
#[allow(missing_docs)]
pub enum ValueKind {
    /// Function argument; scalar or array base, told apart by use.
    Arg { name: String },
    /// Integer constant.
    Const(i64),
    Binary { op: BinOp, lhs: ValueId, rhs: ValueId },
    /// Integer cast, assumed non-truncating.
    Cast { value: ValueId },
    Phi { incoming: Vec<(BlockId, ValueId)> },
    Cmp { pred: Predicate, lhs: ValueId, rhs: ValueId },
    Call { callee: String, args: Vec<ValueId> },
    /// Address of one array element, one index per subscript dimension.
    ElementPtr { base: ValueId, indices: Vec<ValueId> },
    Load { addr: ValueId },
    Store { value: ValueId, addr: ValueId },
    Br { dest: BlockId },
    CondBr { cond: ValueId, then_dest: BlockId, else_dest: BlockId },
    Ret,
}

impl ValueKind {
    /// True for block-ending control flow.
    pub fn is_terminator(&self) -> bool {
        matches!(
            self,
            ValueKind::Br { .. } | ValueKind::CondBr { .. } | ValueKind::Ret
        )
    }

    /// True for phi nodes.
    pub fn is_phi(&self) -> bool {
        matches!(self, ValueKind::Phi { .. })
    }
}

#[derive(Debug, Clone)]
struct Block {
    name: String,
    insts: Vec<ValueId>,
    annotations: Vec<String>,
}

/// A function: an arena of values plus an ordered list of basic blocks.
#[derive(Debug, Clone)]
pub struct Function {
    /// Function name, used only for printing.
    pub name: String,
    values: Vec<ValueKind>,
    blocks: Vec<Block>,
    args: Vec<ValueId>,
    names: HashMap<ValueId, String>,
    intrinsics: BTreeSet<String>,
}

impl Function {
    /// Create an empty function.
    pub fn new(name: &str) -> Self {
        Function {
            name: name.to_string(),
            values: Vec::new(),
            blocks: Vec::new(),
            args: Vec::new(),
            names: HashMap::new(),
            intrinsics: BTreeSet::new(),
        }
    }

    fn push_value(&mut self, kind: ValueKind) -> ValueId {
        let id = ValueId(self.values.len() as u32);
        self.values.push(kind);
        id
    }

    /// Declare a function argument.
    pub fn add_arg(&mut self, name: &str) -> ValueId {
        let id = self.push_value(ValueKind::Arg {
            name: name.to_string(),
        });
        self.args.push(id);
        id
    }

    /// Materialize an integer constant. Constants are not block residents.
    pub fn iconst(&mut self, value: i64) -> ValueId {
        self.push_value(ValueKind::Const(value))
    }

    /// Append a new empty basic block.
    pub fn add_block(&mut self, name: &str) -> BlockId {
        let id = BlockId(self.blocks.len() as u32);
        self.blocks.push(Block {
            name: name.to_string(),
            insts: Vec::new(),
            annotations: Vec::new(),
        });
        id
    }

    /// Ids of all blocks in layout order.
    pub fn blocks(&self) -> impl Iterator<Item = BlockId> + use<> {
        (0..self.blocks.len() as u32).map(BlockId)
    }

    /// The declared arguments, in order.
    pub fn args(&self) -> &[ValueId] {
        &self.args
    }

    /// The kind of a value.
    pub fn value(&self, id: ValueId) -> &ValueKind {
        &self.values[id.0 as usize]
    }

    /// Instructions of a block in execution order.
    pub fn insts(&self, block: BlockId) -> &[ValueId] {
        &self.blocks[block.0 as usize].insts
    }

    /// Block name.
    pub fn block_name(&self, block: BlockId) -> &str {
        &self.blocks[block.0 as usize].name
    }

    /// The block physically following `block` in layout order.
    pub fn next_block(&self, block: BlockId) -> Option<BlockId> {
        let next = block.0 + 1;
        (next < self.blocks.len() as u32).then_some(BlockId(next))
    }

    /// The terminator of a block, if it ends in one.
    pub fn terminator(&self, block: BlockId) -> Option<ValueId> {
        let last = *self.insts(block).last()?;
        self.value(last).is_terminator().then_some(last)
    }

    /// Index of the first non-phi instruction of a block.
    pub fn first_non_phi_index(&self, block: BlockId) -> usize {
        self.insts(block)
            .iter()
            .position(|&v| !self.value(v).is_phi())
            .unwrap_or_else(|| self.insts(block).len())
    }

    /// The block an instruction resides in, if it is linked into one.
    pub fn value_block(&self, value: ValueId) -> Option<BlockId> {
        self.blocks()
            .find(|&b| self.insts(b).contains(&value))
    }

    /// The signed value of a constant, if `value` is one.
    pub fn const_value(&self, value: ValueId) -> Option<i64> {
        match self.value(value) {
            ValueKind::Const(c) => Some(*c),
            _ => None,
        }
    }

    /// Give a value a print name.
    pub fn set_name(&mut self, value: ValueId, name: &str) {
        self.names.insert(value, name.to_string());
    }

    /// Register an incoming (predecessor, value) pair on a phi node.
    pub fn add_phi_incoming(&mut self, phi: ValueId, block: BlockId, value: ValueId) {
        if let ValueKind::Phi { incoming } = &mut self.values[phi.0 as usize] {
            incoming.push((block, value));
        } else {
            debug_assert!(false, "add_phi_incoming on a non-phi value");
        }
    }

    /// Declare an external intrinsic by name; idempotent.
    pub fn declare_intrinsic(&mut self, name: &str) {
        self.intrinsics.insert(name.to_string());
    }

    /// Whether an intrinsic has been declared.
    pub fn has_intrinsic(&self, name: &str) -> bool {
        self.intrinsics.contains(name)
    }

    /// Attach an annotation string to a block (loop metadata stand-in).
    pub fn annotate_block(&mut self, block: BlockId, annotation: &str) {
        self.blocks[block.0 as usize]
            .annotations
            .push(annotation.to_string());
    }

    /// Annotations attached to a block.
    pub fn block_annotations(&self, block: BlockId) -> &[String] {
        &self.blocks[block.0 as usize].annotations
    }

    /// Rewrite every operand use of `old` to `new`.
    pub fn replace_all_uses(&mut self, old: ValueId, new: ValueId) {
        let subst = |v: &mut ValueId| {
            if *v == old {
                *v = new;
            }
        };
        for kind in &mut self.values {
            match kind {
                ValueKind::Binary { lhs, rhs, .. } | ValueKind::Cmp { lhs, rhs, .. } => {
                    subst(lhs);
                    subst(rhs);
                }
                ValueKind::Cast { value } => subst(value),
                ValueKind::Phi { incoming } => {
                    incoming.iter_mut().for_each(|(_, v)| subst(v));
                }
                ValueKind::Call { args, .. } => args.iter_mut().for_each(subst),
                ValueKind::ElementPtr { base, indices } => {
                    subst(base);
                    indices.iter_mut().for_each(subst);
                }
                ValueKind::Load { addr } => subst(addr),
                ValueKind::Store { value, addr } => {
                    subst(value);
                    subst(addr);
                }
                ValueKind::CondBr { cond, .. } => subst(cond),
                ValueKind::Arg { .. }
                | ValueKind::Const(_)
                | ValueKind::Br { .. }
                | ValueKind::Ret => {}
            }
        }
    }

    /// Unlink an instruction from its block. The arena slot survives but the
    /// instruction no longer executes or prints.
    pub fn erase(&mut self, inst: ValueId) {
        for block in &mut self.blocks {
            if let Some(pos) = block.insts.iter().position(|&v| v == inst) {
                block.insts.remove(pos);
                return;
            }
        }
    }

    fn fmt_operand(&self, value: ValueId) -> String {
        match self.value(value) {
            ValueKind::Const(c) => c.to_string(),
            ValueKind::Arg { name } => format!("%{name}"),
            _ => match self.names.get(&value) {
                Some(name) => format!("%{name}"),
                None => format!("%{}", value.0),
            },
        }
    }
}

impl fmt::Display for Function {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        writeln!(
            f,
            "fn @{}({}) {{",
            self.name,
            self.args
                .iter()
                .map(|&a| self.fmt_operand(a))
                .collect::<Vec<_>>()
                .join(", ")
        )?;
        for intrinsic in &self.intrinsics {
            writeln!(f, "  declare @{intrinsic}(i32, i32) -> i32")?;
        }
        for block in &self.blocks {
            writeln!(f, "{}:", block.name)?;
            for annotation in &block.annotations {
                writeln!(f, "  ; !{annotation}")?;
            }
            for &inst in &block.insts {
                let lhs = self.fmt_operand(inst);
                match self.value(inst) {
                    ValueKind::Binary { op, lhs: a, rhs: b } => {
                        let op = match op {
                            BinOp::Add => "add",
                            BinOp::Sub => "sub",
                            BinOp::Mul => "mul",
                            BinOp::SDiv => "sdiv",
                            BinOp::SRem => "srem",
                            BinOp::Shl => "shl",
                            BinOp::Xor => "xor",
                            BinOp::And => "and",
                            BinOp::Or => "or",
                        };
                        writeln!(
                            f,
                            "  {lhs} = {op} {}, {}",
                            self.fmt_operand(*a),
                            self.fmt_operand(*b)
                        )?;
                    }
                    ValueKind::Cast { value } => {
                        writeln!(f, "  {lhs} = cast {}", self.fmt_operand(*value))?;
                    }
                    ValueKind::Phi { incoming } => {
                        let pairs = incoming
                            .iter()
                            .map(|(b, v)| {
                                format!(
                                    "[{}, {}]",
                                    self.fmt_operand(*v),
                                    self.blocks[b.0 as usize].name
                                )
                            })
                            .collect::<Vec<_>>()
                            .join(", ");
                        writeln!(f, "  {lhs} = phi {pairs}")?;
                    }
                    ValueKind::Cmp { pred, lhs: a, rhs: b } => {
                        let pred = match pred {
                            Predicate::Eq => "eq",
                            Predicate::Ne => "ne",
                            Predicate::Slt => "slt",
                            Predicate::Sle => "sle",
                            Predicate::Sgt => "sgt",
                            Predicate::Sge => "sge",
                        };
                        writeln!(
                            f,
                            "  {lhs} = icmp {pred} {}, {}",
                            self.fmt_operand(*a),
                            self.fmt_operand(*b)
                        )?;
                    }
                    ValueKind::Call { callee, args } => {
                        let args = args
                            .iter()
                            .map(|&a| self.fmt_operand(a))
                            .collect::<Vec<_>>()
                            .join(", ");
                        writeln!(f, "  {lhs} = call @{callee}({args})")?;
                    }
                    ValueKind::ElementPtr { base, indices } => {
                        let idx = indices
                            .iter()
                            .map(|&i| self.fmt_operand(i))
                            .collect::<Vec<_>>()
                            .join(", ");
                        writeln!(f, "  {lhs} = elemptr {}[{idx}]", self.fmt_operand(*base))?;
                    }
                    ValueKind::Load { addr } => {
                        writeln!(f, "  {lhs} = load {}", self.fmt_operand(*addr))?;
                    }
                    ValueKind::Store { value, addr } => {
                        writeln!(
                            f,
                            "  store {}, {}",
                            self.fmt_operand(*value),
                            self.fmt_operand(*addr)
                        )?;
                    }
                    ValueKind::Br { dest } => {
                        writeln!(f, "  br {}", self.blocks[dest.0 as usize].name)?;
                    }
                    ValueKind::CondBr {
                        cond,
                        then_dest,
                        else_dest,
                    } => {
                        writeln!(
                            f,
                            "  br {}, {}, {}",
                            self.fmt_operand(*cond),
                            self.blocks[then_dest.0 as usize].name,
                            self.blocks[else_dest.0 as usize].name
                        )?;
                    }
                    ValueKind::Ret => writeln!(f, "  ret")?,
                    ValueKind::Arg { .. } | ValueKind::Const(_) => {}
                }
            }
        }
        writeln!(f, "}}")
    }
}

/// Instruction builder with an explicit insertion point.
pub struct Builder<'f> {
    func: &'f mut Function,
    block: BlockId,
    index: usize,
}

impl<'f> Builder<'f> {
    /// Insert at the end of `block`.
    pub fn at_end(func: &'f mut Function, block: BlockId) -> Self {
        let index = func.insts(block).len();
        Builder { func, block, index }
    }

    /// Insert just before the terminator of `block` (at the end when the
    /// block has none yet).
    pub fn before_terminator(func: &'f mut Function, block: BlockId) -> Self {
        let index = match func.terminator(block) {
            Some(_) => func.insts(block).len() - 1,
            None => func.insts(block).len(),
        };
        Builder { func, block, index }
    }

    /// Insert at the very start of `block` (phi territory).
    pub fn at_block_start(func: &'f mut Function, block: BlockId) -> Self {
        Builder {
            func,
            block,
            index: 0,
        }
    }

    /// Insert at the first non-phi position of `block`.
    pub fn at_first_non_phi(func: &'f mut Function, block: BlockId) -> Self {
        let index = func.first_non_phi_index(block);
        Builder { func, block, index }
    }

    /// The function being built.
    pub fn func(&mut self) -> &mut Function {
        self.func
    }

    fn insert(&mut self, kind: ValueKind) -> ValueId {
        let id = self.func.push_value(kind);
        self.func.blocks[self.block.0 as usize]
            .insts
            .insert(self.index, id);
        self.index += 1;
        id
    }

    /// Materialize a constant (not inserted into the block).
    pub fn iconst(&mut self, value: i64) -> ValueId {
        self.func.iconst(value)
    }

    /// Generic two-operand instruction.
    pub fn binary(&mut self, op: BinOp, lhs: ValueId, rhs: ValueId) -> ValueId {
        self.insert(ValueKind::Binary { op, lhs, rhs })
    }

    /// `lhs + rhs`
    pub fn add(&mut self, lhs: ValueId, rhs: ValueId) -> ValueId {
        self.binary(BinOp::Add, lhs, rhs)
    }

    /// `lhs - rhs`
    pub fn sub(&mut self, lhs: ValueId, rhs: ValueId) -> ValueId {
        self.binary(BinOp::Sub, lhs, rhs)
    }

    /// `lhs * rhs`
    pub fn mul(&mut self, lhs: ValueId, rhs: ValueId) -> ValueId {
        self.binary(BinOp::Mul, lhs, rhs)
    }

    /// `lhs / rhs`, truncating toward zero.
    pub fn sdiv(&mut self, lhs: ValueId, rhs: ValueId) -> ValueId {
        self.binary(BinOp::SDiv, lhs, rhs)
    }

    /// `lhs % rhs`, sign follows the dividend.
    pub fn srem(&mut self, lhs: ValueId, rhs: ValueId) -> ValueId {
        self.binary(BinOp::SRem, lhs, rhs)
    }

    /// Non-truncating integer cast.
    pub fn cast(&mut self, value: ValueId) -> ValueId {
        self.insert(ValueKind::Cast { value })
    }

    /// Empty phi node; register incomings with
    /// [`Function::add_phi_incoming`].
    pub fn phi(&mut self) -> ValueId {
        self.insert(ValueKind::Phi {
            incoming: Vec::new(),
        })
    }

    /// Signed integer comparison.
    pub fn cmp(&mut self, pred: Predicate, lhs: ValueId, rhs: ValueId) -> ValueId {
        self.insert(ValueKind::Cmp { pred, lhs, rhs })
    }

    /// Call a function or intrinsic by name.
    pub fn call(&mut self, callee: &str, args: Vec<ValueId>) -> ValueId {
        self.insert(ValueKind::Call {
            callee: callee.to_string(),
            args,
        })
    }

    /// Address of an array element.
    pub fn element_ptr(&mut self, base: ValueId, indices: Vec<ValueId>) -> ValueId {
        self.insert(ValueKind::ElementPtr { base, indices })
    }

    /// Load through an element address.
    pub fn load(&mut self, addr: ValueId) -> ValueId {
        self.insert(ValueKind::Load { addr })
    }

    /// Store through an element address.
    pub fn store(&mut self, value: ValueId, addr: ValueId) -> ValueId {
        self.insert(ValueKind::Store { value, addr })
    }

    /// Unconditional branch.
    pub fn br(&mut self, dest: BlockId) -> ValueId {
        self.insert(ValueKind::Br { dest })
    }

    /// Two-way conditional branch; `cond != 0` takes `then_dest`.
    pub fn cond_br(&mut self, cond: ValueId, then_dest: BlockId, else_dest: BlockId) -> ValueId {
        self.insert(ValueKind::CondBr {
            cond,
            then_dest,
            else_dest,
        })
    }

    /// Function return.
    pub fn ret(&mut self) -> ValueId {
        self.insert(ValueKind::Ret)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn tiny_func() -> (Function, ValueId, ValueId) {
        let mut func = Function::new("tiny");
        let n = func.add_arg("n");
        let entry = func.add_block("entry");
        let mut b = Builder::at_end(&mut func, entry);
        let two = b.iconst(2);
        let double = b.mul(n, two);
        b.ret();
        (func, n, double)
    }

    #[test]
    fn test_constants_are_not_block_residents() {
        let (func, _, _) = tiny_func();
        let entry = BlockId(0);
        // mul + ret only; the constant lives in the arena.
        assert_eq!(func.insts(entry).len(), 2);
    }

    #[test]
    fn test_terminator_and_first_non_phi() {
        let mut func = Function::new("phis");
        let header = func.add_block("header");
        let mut b = Builder::at_end(&mut func, header);
        let phi = b.phi();
        let one = b.iconst(1);
        let inc = b.add(phi, one);
        b.br(header);
        assert_eq!(func.first_non_phi_index(header), 1);
        assert!(matches!(
            func.value(func.terminator(header).unwrap()),
            ValueKind::Br { .. }
        ));
        assert_eq!(func.value_block(inc), Some(header));
    }

    #[test]
    fn test_replace_all_uses_and_erase() {
        let (mut func, n, double) = tiny_func();
        let entry = BlockId(0);
        let replacement = func.iconst(42);
        func.replace_all_uses(n, replacement);
        match func.value(double) {
            ValueKind::Binary { lhs, .. } => assert_eq!(*lhs, replacement),
            other => panic!("unexpected kind {other:?}"),
        }
        func.erase(double);
        assert_eq!(func.insts(entry).len(), 1);
    }

    #[test]
    fn test_before_terminator_insertion() {
        let (mut func, n, _) = tiny_func();
        let entry = BlockId(0);
        let mut b = Builder::before_terminator(&mut func, entry);
        let one = b.iconst(1);
        b.add(n, one);
        // New instruction sits before ret.
        let insts = func.insts(entry);
        assert!(matches!(func.value(insts[insts.len() - 1]), ValueKind::Ret));
        assert!(matches!(
            func.value(insts[insts.len() - 2]),
            ValueKind::Binary { op: BinOp::Add, .. }
        ));
    }

    #[test]
    fn test_display_smoke() {
        let (mut func, _, double) = tiny_func();
        func.set_name(double, "double");
        func.declare_intrinsic("smax.i32");
        let printed = func.to_string();
        assert!(printed.contains("fn @tiny(%n)"));
        assert!(printed.contains("%double = mul %n, 2"));
        assert!(printed.contains("declare @smax.i32"));
    }

    #[test]
    fn test_annotations() {
        let mut func = Function::new("ann");
        let block = func.add_block("loop");
        func.annotate_block(block, "parallel_accesses");
        assert_eq!(func.block_annotations(block), ["parallel_accesses"]);
    }
}
