//! Reference evaluator for the IR.
//!
//! A small machine that executes a [`Function`] directly: block at a time,
//! phis resolved simultaneously on edge entry, arrays held as sparse maps
//! keyed by (array argument, subscript tuple) with a zero default. It
//! exists so tests can run a loop nest before and after rewriting and
//! compare the array contents, which is the whole point of a semantics-
//! preserving transformation.

use crate::error::{PolytopeError, Result};
use crate::ir::{BinOp, BlockId, Function, Predicate, ValueId, ValueKind};
use std::collections::HashMap;

/// Sparse array storage: (array argument, subscripts) to cell value.
pub type ArrayMemory = HashMap<(ValueId, Vec<i64>), i64>;

#[derive(Debug, Clone, PartialEq)]
enum Slot {
    Int(i64),
    Addr(ValueId, Vec<i64>),
}

enum Flow {
    Jump(BlockId),
    Halt,
}

/// Execution state: scalar inputs, array memory and a step budget.
#[derive(Debug, Clone)]
pub struct Machine {
    /// Array contents, readable after a run.
    pub memory: ArrayMemory,
    scalars: HashMap<String, i64>,
    max_steps: usize,
}

impl Default for Machine {
    fn default() -> Self {
        Machine::new()
    }
}

impl Machine {
    /// A fresh machine with empty memory and a generous step budget.
    pub fn new() -> Self {
        Machine {
            memory: ArrayMemory::new(),
            scalars: HashMap::new(),
            max_steps: 1_000_000,
        }
    }

    /// Bind a scalar argument by name.
    pub fn with_input(mut self, name: &str, value: i64) -> Self {
        self.scalars.insert(name.to_string(), value);
        self
    }

    /// Override the step budget.
    pub fn with_step_budget(mut self, max_steps: usize) -> Self {
        self.max_steps = max_steps;
        self
    }

    /// Pre-seed one array cell.
    pub fn store(&mut self, base: ValueId, indices: &[i64], value: i64) {
        self.memory.insert((base, indices.to_vec()), value);
    }

    /// Read one array cell (zero when never written).
    pub fn load(&self, base: ValueId, indices: &[i64]) -> i64 {
        *self.memory.get(&(base, indices.to_vec())).unwrap_or(&0)
    }

    /// Execute `func` from its first block until `ret`.
    pub fn run(&mut self, func: &Function) -> Result<()> {
        let Some(mut current) = func.blocks().next() else {
            return Ok(());
        };
        let mut env: HashMap<ValueId, Slot> = HashMap::new();
        let mut steps = 0usize;
        loop {
            match self.run_block(func, current, &mut env, &mut steps)? {
                Flow::Jump(next) => {
                    self.resolve_phis(func, current, next, &mut env)?;
                    current = next;
                }
                Flow::Halt => return Ok(()),
            }
        }
    }

    fn run_block(
        &mut self,
        func: &Function,
        block: BlockId,
        env: &mut HashMap<ValueId, Slot>,
        steps: &mut usize,
    ) -> Result<Flow> {
        for &inst in func.insts(block) {
            *steps += 1;
            if *steps > self.max_steps {
                return Err(eval("step budget exceeded; runaway loop?"));
            }
            match func.value(inst) {
                // Assigned on edge entry.
                ValueKind::Phi { .. } => {}
                ValueKind::Binary { op, lhs, rhs } => {
                    let a = self.int(func, env, *lhs)?;
                    let b = self.int(func, env, *rhs)?;
                    let value = match op {
                        BinOp::Add => a + b,
                        BinOp::Sub => a - b,
                        BinOp::Mul => a * b,
                        BinOp::SDiv => {
                            if b == 0 {
                                return Err(eval("division by zero"));
                            }
                            a / b
                        }
                        BinOp::SRem => {
                            if b == 0 {
                                return Err(eval("remainder by zero"));
                            }
                            a % b
                        }
                        BinOp::Shl => {
                            if !(0..64).contains(&b) {
                                return Err(eval("shift amount out of range"));
                            }
                            a << b
                        }
                        BinOp::Xor => a ^ b,
                        BinOp::And => a & b,
                        BinOp::Or => a | b,
                    };
                    env.insert(inst, Slot::Int(value));
                }
                ValueKind::Cast { value } => {
                    let slot = self.slot(func, env, *value)?;
                    env.insert(inst, slot);
                }
                ValueKind::Cmp { pred, lhs, rhs } => {
                    let a = self.int(func, env, *lhs)?;
                    let b = self.int(func, env, *rhs)?;
                    let holds = match pred {
                        Predicate::Eq => a == b,
                        Predicate::Ne => a != b,
                        Predicate::Slt => a < b,
                        Predicate::Sle => a <= b,
                        Predicate::Sgt => a > b,
                        Predicate::Sge => a >= b,
                    };
                    env.insert(inst, Slot::Int(holds as i64));
                }
                ValueKind::Call { callee, args } => {
                    let value = match (callee.as_str(), args.as_slice()) {
                        ("smax.i32", [x, y]) => {
                            self.int(func, env, *x)?.max(self.int(func, env, *y)?)
                        }
                        ("smin.i32", [x, y]) => {
                            self.int(func, env, *x)?.min(self.int(func, env, *y)?)
                        }
                        _ => return Err(eval(format!("call to unknown function '{callee}'"))),
                    };
                    env.insert(inst, Slot::Int(value));
                }
                ValueKind::ElementPtr { base, indices } => {
                    let index_values: Vec<i64> = indices
                        .iter()
                        .map(|&i| self.int(func, env, i))
                        .collect::<Result<_>>()?;
                    let addr = match func.value(*base) {
                        ValueKind::Arg { .. } => Slot::Addr(*base, index_values),
                        _ => match self.slot(func, env, *base)? {
                            Slot::Addr(root, mut prefix) => {
                                prefix.extend(index_values);
                                Slot::Addr(root, prefix)
                            }
                            Slot::Int(_) => {
                                return Err(eval("element address with a non-array base"));
                            }
                        },
                    };
                    env.insert(inst, addr);
                }
                ValueKind::Load { addr } => {
                    let Slot::Addr(root, indices) = self.slot(func, env, *addr)? else {
                        return Err(eval("load through a non-address value"));
                    };
                    let value = *self.memory.get(&(root, indices)).unwrap_or(&0);
                    env.insert(inst, Slot::Int(value));
                }
                ValueKind::Store { value, addr } => {
                    let stored = self.int(func, env, *value)?;
                    let Slot::Addr(root, indices) = self.slot(func, env, *addr)? else {
                        return Err(eval("store through a non-address value"));
                    };
                    self.memory.insert((root, indices), stored);
                }
                ValueKind::Br { dest } => return Ok(Flow::Jump(*dest)),
                ValueKind::CondBr {
                    cond,
                    then_dest,
                    else_dest,
                } => {
                    let taken = if self.int(func, env, *cond)? != 0 {
                        *then_dest
                    } else {
                        *else_dest
                    };
                    return Ok(Flow::Jump(taken));
                }
                ValueKind::Ret => return Ok(Flow::Halt),
                ValueKind::Arg { .. } | ValueKind::Const(_) => {
                    return Err(eval("argument or constant linked into a block"));
                }
            }
        }
        Err(eval(format!(
            "block '{}' has no terminator",
            func.block_name(block)
        )))
    }

    // Simultaneous phi assignment along the (from -> to) edge.
    fn resolve_phis(
        &self,
        func: &Function,
        from: BlockId,
        to: BlockId,
        env: &mut HashMap<ValueId, Slot>,
    ) -> Result<()> {
        let mut updates = Vec::new();
        for &inst in func.insts(to) {
            let ValueKind::Phi { incoming } = func.value(inst) else {
                break;
            };
            let (_, value) = incoming.iter().find(|(b, _)| *b == from).ok_or_else(|| {
                eval(format!(
                    "phi in block '{}' has no incoming for '{}'",
                    func.block_name(to),
                    func.block_name(from)
                ))
            })?;
            updates.push((inst, self.slot(func, env, *value)?));
        }
        for (phi, slot) in updates {
            env.insert(phi, slot);
        }
        Ok(())
    }

    fn slot(
        &self,
        func: &Function,
        env: &HashMap<ValueId, Slot>,
        value: ValueId,
    ) -> Result<Slot> {
        match func.value(value) {
            ValueKind::Const(c) => Ok(Slot::Int(*c)),
            ValueKind::Arg { name } => match self.scalars.get(name) {
                Some(v) => Ok(Slot::Int(*v)),
                None => Ok(Slot::Addr(value, Vec::new())),
            },
            _ => env
                .get(&value)
                .cloned()
                .ok_or_else(|| eval("use of a value before its evaluation")),
        }
    }

    fn int(
        &self,
        func: &Function,
        env: &HashMap<ValueId, Slot>,
        value: ValueId,
    ) -> Result<i64> {
        match self.slot(func, env, value)? {
            Slot::Int(v) => Ok(v),
            Slot::Addr(..) => Err(eval("expected an integer, found an array address")),
        }
    }
}

fn eval(reason: impl Into<String>) -> PolytopeError {
    PolytopeError::Eval {
        reason: reason.into(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::ir::Builder;

    #[test]
    fn test_accumulating_loop() {
        // for (k = 1; ++k <= 5;) S[0] += k, do-while style.
        let mut func = Function::new("sum");
        let array = func.add_arg("S");
        let entry = func.add_block("entry");
        let header = func.add_block("header");
        let exit = func.add_block("exit");

        let mut b = Builder::at_end(&mut func, entry);
        b.br(header);

        let mut b = Builder::at_end(&mut func, header);
        let k = b.phi();
        let one = b.iconst(1);
        let five = b.iconst(5);
        let zero = b.iconst(0);
        let cell = b.element_ptr(array, vec![zero]);
        let acc = b.load(cell);
        let next = b.add(acc, k);
        b.store(next, cell);
        let inc = b.add(k, one);
        let cond = b.cmp(Predicate::Sle, inc, five);
        b.cond_br(cond, header, exit);
        func.add_phi_incoming(k, entry, one);
        func.add_phi_incoming(k, header, inc);

        let mut b = Builder::at_end(&mut func, exit);
        b.ret();

        let mut machine = Machine::new();
        machine.run(&func).unwrap();
        assert_eq!(machine.load(array, &[0]), 15);
    }

    #[test]
    fn test_parallel_phi_resolution() {
        // Two phis swap values every iteration; sequential assignment would
        // collapse them onto one value.
        let mut func = Function::new("swap");
        let array = func.add_arg("S");
        let entry = func.add_block("entry");
        let header = func.add_block("header");
        let exit = func.add_block("exit");

        let mut b = Builder::at_end(&mut func, entry);
        b.br(header);

        let mut b = Builder::at_end(&mut func, header);
        let a = b.phi();
        let c = b.phi();
        let k = b.phi();
        let one = b.iconst(1);
        let two = b.iconst(2);
        let ten = b.iconst(10);
        let addr_a = b.element_ptr(array, vec![k]);
        b.store(a, addr_a);
        let shifted = b.add(k, ten);
        let addr_c = b.element_ptr(array, vec![shifted]);
        b.store(c, addr_c);
        let inc = b.add(k, one);
        let cond = b.cmp(Predicate::Sle, inc, one);
        b.cond_br(cond, header, exit);
        let zero = func.iconst(0);
        func.add_phi_incoming(a, entry, one);
        func.add_phi_incoming(a, header, c);
        func.add_phi_incoming(c, entry, two);
        func.add_phi_incoming(c, header, a);
        func.add_phi_incoming(k, entry, zero);
        func.add_phi_incoming(k, header, inc);

        let mut b = Builder::at_end(&mut func, exit);
        b.ret();

        let mut machine = Machine::new();
        machine.run(&func).unwrap();
        assert_eq!(machine.load(array, &[0]), 1);
        assert_eq!(machine.load(array, &[10]), 2);
        assert_eq!(machine.load(array, &[1]), 2, "phi swap lost a value");
        assert_eq!(machine.load(array, &[11]), 1, "phi swap lost a value");
    }

    #[test]
    fn test_intrinsics_and_division() {
        let mut func = Function::new("ops");
        let array = func.add_arg("S");
        let entry = func.add_block("entry");
        let mut b = Builder::at_end(&mut func, entry);
        let three = b.iconst(3);
        let minus_seven = b.iconst(-7);
        let hi = b.call("smax.i32", vec![three, minus_seven]);
        let lo = b.call("smin.i32", vec![three, minus_seven]);
        let quot = b.sdiv(minus_seven, three);
        let rem = b.srem(minus_seven, three);
        let zero = b.iconst(0);
        let one = b.iconst(1);
        let two = b.iconst(2);
        for (slot, value) in [(zero, hi), (one, lo), (two, quot)] {
            let addr = b.element_ptr(array, vec![slot]);
            b.store(value, addr);
        }
        let slot3 = b.iconst(3);
        let addr = b.element_ptr(array, vec![slot3]);
        b.store(rem, addr);
        b.ret();

        let mut machine = Machine::new();
        machine.run(&func).unwrap();
        assert_eq!(machine.load(array, &[0]), 3);
        assert_eq!(machine.load(array, &[1]), -7);
        // Truncating division, remainder follows the dividend.
        assert_eq!(machine.load(array, &[2]), -2);
        assert_eq!(machine.load(array, &[3]), -1);
    }

    #[test]
    fn test_step_budget_stops_runaway_loops() {
        let mut func = Function::new("spin");
        let entry = func.add_block("entry");
        let mut b = Builder::at_end(&mut func, entry);
        b.br(entry);
        let mut machine = Machine::new().with_step_budget(100);
        assert!(machine.run(&func).is_err());
    }

    #[test]
    fn test_scalar_inputs() {
        let mut func = Function::new("scaled");
        let n = func.add_arg("n");
        let array = func.add_arg("S");
        let entry = func.add_block("entry");
        let mut b = Builder::at_end(&mut func, entry);
        let two = b.iconst(2);
        let doubled = b.mul(n, two);
        let zero = b.iconst(0);
        let addr = b.element_ptr(array, vec![zero]);
        b.store(doubled, addr);
        b.ret();

        let mut machine = Machine::new().with_input("n", 21);
        machine.run(&func).unwrap();
        assert_eq!(machine.load(array, &[0]), 42);
    }
}
