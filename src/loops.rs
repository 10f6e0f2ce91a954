//! Natural-loop analysis and the perfect-nest recognizer.
//!
//! Computes dominators and natural loops over the [`crate::ir`] control-flow
//! graph, answers the structural queries the pass needs (preheader, latch,
//! exit, loop invariance), and extracts induction-variable records for
//! analyzable two-deep perfect nests.
//!
//! Loops are expected in rotated (do-while) form: the induction phi sits in
//! the header, the unit-step increment in the latch, and the latch ends in
//! `icmp sle inc, last` feeding a conditional branch back to the header.
//! The recorded final value is therefore inclusive.

use crate::error::{PolytopeError, Result};
use crate::ir::{BinOp, BlockId, Function, Predicate, ValueId, ValueKind};
use std::collections::{HashMap, HashSet};

/// Handle to a loop in a [`LoopForest`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct LoopId(pub usize);

/// One natural loop: header, back-edge sources and member blocks.
#[derive(Debug, Clone)]
pub struct NaturalLoop {
    /// The unique entry block of the loop.
    pub header: BlockId,
    /// Sources of back edges to the header.
    pub latches: Vec<BlockId>,
    /// All blocks of the loop body, header included.
    pub blocks: HashSet<BlockId>,
    /// The innermost enclosing loop, if any.
    pub parent: Option<LoopId>,
    /// Loops nested immediately inside this one.
    pub subloops: Vec<LoopId>,
}

impl NaturalLoop {
    /// The single latch, when the loop has exactly one back edge.
    pub fn latch(&self) -> Option<BlockId> {
        match self.latches.as_slice() {
            [latch] => Some(*latch),
            _ => None,
        }
    }

    /// Whether a block belongs to the loop body.
    pub fn contains(&self, block: BlockId) -> bool {
        self.blocks.contains(&block)
    }
}

/// All natural loops of a function with their nesting relation.
#[derive(Debug, Clone)]
pub struct LoopForest {
    loops: Vec<NaturalLoop>,
}

impl LoopForest {
    /// Find every natural loop of `func`.
    ///
    /// Dominator sets are computed by straightforward fixpoint iteration;
    /// the graphs this pass sees are a handful of blocks, so the simple
    /// quadratic formulation is plenty.
    pub fn analyze(func: &Function) -> Self {
        let blocks: Vec<BlockId> = func.blocks().collect();
        if blocks.is_empty() {
            return LoopForest { loops: Vec::new() };
        }
        let preds = predecessor_map(func);

        // dom[b] = {b} ∪ intersection of dom over predecessors.
        let all: HashSet<BlockId> = blocks.iter().copied().collect();
        let entry = blocks[0];
        let mut dom: HashMap<BlockId, HashSet<BlockId>> = blocks
            .iter()
            .map(|&b| {
                if b == entry {
                    (b, HashSet::from([b]))
                } else {
                    (b, all.clone())
                }
            })
            .collect();
        let mut changed = true;
        while changed {
            changed = false;
            for &b in &blocks {
                if b == entry {
                    continue;
                }
                let mut next: Option<HashSet<BlockId>> = None;
                for &p in preds.get(&b).map(Vec::as_slice).unwrap_or(&[]) {
                    let pd = &dom[&p];
                    next = Some(match next {
                        None => pd.clone(),
                        Some(acc) => acc.intersection(pd).copied().collect(),
                    });
                }
                let mut next = next.unwrap_or_default();
                next.insert(b);
                if next != dom[&b] {
                    dom.insert(b, next);
                    changed = true;
                }
            }
        }

        // Natural loop of each back edge; back edges sharing a header merge.
        let mut by_header: HashMap<BlockId, NaturalLoop> = HashMap::new();
        for &b in &blocks {
            for succ in successors(func, b) {
                if dom[&b].contains(&succ) {
                    let lp = by_header.entry(succ).or_insert_with(|| NaturalLoop {
                        header: succ,
                        latches: Vec::new(),
                        blocks: HashSet::from([succ]),
                        parent: None,
                        subloops: Vec::new(),
                    });
                    lp.latches.push(b);
                    // Walk predecessors back from the latch, stopping at the
                    // header.
                    let mut stack = vec![b];
                    while let Some(node) = stack.pop() {
                        if lp.blocks.insert(node) {
                            for &p in preds.get(&node).map(Vec::as_slice).unwrap_or(&[]) {
                                stack.push(p);
                            }
                        }
                    }
                }
            }
        }

        let mut loops: Vec<NaturalLoop> = by_header.into_values().collect();
        // Deterministic ordering: by header block id.
        loops.sort_by_key(|lp| lp.header);

        // Nesting: the parent is the smallest strictly-containing loop.
        let parents: Vec<Option<LoopId>> = loops
            .iter()
            .enumerate()
            .map(|(i, lp)| {
                loops
                    .iter()
                    .enumerate()
                    .filter(|&(j, other)| j != i && other.contains(lp.header))
                    .min_by_key(|(_, other)| other.blocks.len())
                    .map(|(j, _)| LoopId(j))
            })
            .collect();
        for (i, parent) in parents.iter().enumerate() {
            loops[i].parent = *parent;
            if let Some(LoopId(p)) = parent {
                let child = LoopId(i);
                loops[*p].subloops.push(child);
            }
        }

        LoopForest { loops }
    }

    /// Number of loops found.
    pub fn len(&self) -> usize {
        self.loops.len()
    }

    /// True when the function is loop-free.
    pub fn is_empty(&self) -> bool {
        self.loops.is_empty()
    }

    /// Access a loop by id.
    pub fn get(&self, id: LoopId) -> &NaturalLoop {
        &self.loops[id.0]
    }

    /// Iterate over all loops.
    pub fn iter(&self) -> impl Iterator<Item = (LoopId, &NaturalLoop)> {
        self.loops.iter().enumerate().map(|(i, lp)| (LoopId(i), lp))
    }

    /// Ids of the outermost loops.
    pub fn top_level(&self) -> Vec<LoopId> {
        self.iter()
            .filter(|(_, lp)| lp.parent.is_none())
            .map(|(id, _)| id)
            .collect()
    }
}

/// Successor blocks of `block`, from its terminator.
pub fn successors(func: &Function, block: BlockId) -> Vec<BlockId> {
    match func.terminator(block).map(|t| func.value(t)) {
        Some(ValueKind::Br { dest }) => vec![*dest],
        Some(ValueKind::CondBr {
            then_dest,
            else_dest,
            ..
        }) => vec![*then_dest, *else_dest],
        _ => Vec::new(),
    }
}

fn predecessor_map(func: &Function) -> HashMap<BlockId, Vec<BlockId>> {
    let mut preds: HashMap<BlockId, Vec<BlockId>> = HashMap::new();
    for b in func.blocks() {
        for succ in successors(func, b) {
            preds.entry(succ).or_default().push(b);
        }
    }
    preds
}

/// The preheader: the unique out-of-loop predecessor of the header, provided
/// it branches unconditionally to the header.
pub fn preheader(func: &Function, lp: &NaturalLoop) -> Option<BlockId> {
    let preds = predecessor_map(func);
    let outside: Vec<BlockId> = preds
        .get(&lp.header)
        .map(Vec::as_slice)
        .unwrap_or(&[])
        .iter()
        .copied()
        .filter(|p| !lp.contains(*p))
        .collect();
    match outside.as_slice() {
        [pre] => match func.terminator(*pre).map(|t| func.value(t)) {
            Some(ValueKind::Br { dest }) if *dest == lp.header => Some(*pre),
            _ => None,
        },
        _ => None,
    }
}

/// The unique block control reaches when the loop exits, if there is one.
pub fn exit_block(func: &Function, lp: &NaturalLoop) -> Option<BlockId> {
    let mut exits: HashSet<BlockId> = HashSet::new();
    for &b in &lp.blocks {
        for succ in successors(func, b) {
            if !lp.contains(succ) {
                exits.insert(succ);
            }
        }
    }
    match exits.len() {
        1 => exits.into_iter().next(),
        _ => None,
    }
}

/// Whether `value` is invariant with respect to `lp`: constants, arguments
/// and instructions defined outside the loop body.
pub fn is_loop_invariant(func: &Function, lp: &NaturalLoop, value: ValueId) -> bool {
    match func.value(value) {
        ValueKind::Const(_) | ValueKind::Arg { .. } => true,
        _ => match func.value_block(value) {
            Some(block) => !lp.contains(block),
            None => false,
        },
    }
}

/// Induction-variable record for one loop level: the phi, the value it is
/// initialized with and the inclusive final value it is compared against.
#[derive(Debug, Clone)]
pub struct IvInfo {
    /// The induction phi in the loop header.
    pub phi: ValueId,
    /// Loop-invariant initial value.
    pub init: ValueId,
    /// Loop-invariant inclusive final value (the latch comparison bound).
    pub last: ValueId,
    /// The loop this record belongs to.
    pub loop_id: LoopId,
}

/// An accepted perfect two-deep nest with its induction records, outermost
/// first.
#[derive(Debug, Clone)]
pub struct Nest {
    /// The outer loop.
    pub outer: LoopId,
    /// The inner loop.
    pub inner: LoopId,
    /// Induction-variable records, outermost first.
    pub ivs: Vec<IvInfo>,
}

fn unsupported(reason: &str) -> PolytopeError {
    PolytopeError::UnsupportedNest {
        reason: reason.to_string(),
    }
}

/// Extract the canonical unit-step induction variable of a loop.
///
/// Accepts a header phi with exactly two incomings: the initial value from
/// the preheader and `phi + 1` from the latch, with the latch ending in
/// `icmp sle inc, last` that branches back to the header.
pub fn induction_variable(func: &Function, forest: &LoopForest, id: LoopId) -> Result<IvInfo> {
    let lp = forest.get(id);
    let latch = lp
        .latch()
        .ok_or_else(|| unsupported("loop has multiple latches"))?;
    let pre =
        preheader(func, lp).ok_or_else(|| unsupported("loop has no dedicated preheader"))?;

    let term = func
        .terminator(latch)
        .ok_or_else(|| unsupported("latch has no terminator"))?;
    let ValueKind::CondBr {
        cond, then_dest, ..
    } = func.value(term)
    else {
        return Err(unsupported("latch does not end in a conditional branch"));
    };
    if *then_dest != lp.header {
        return Err(unsupported("latch branch does not continue the loop"));
    }
    let ValueKind::Cmp {
        pred: Predicate::Sle,
        lhs: cmp_lhs,
        rhs: cmp_rhs,
    } = func.value(*cond)
    else {
        return Err(unsupported(
            "latch comparison is not an inclusive signed bound check",
        ));
    };

    for &inst in func.insts(lp.header) {
        let ValueKind::Phi { incoming } = func.value(inst) else {
            break;
        };
        if incoming.len() != 2 {
            continue;
        }
        let Some(&(_, init)) = incoming.iter().find(|(b, _)| *b == pre) else {
            continue;
        };
        let Some(&(_, step)) = incoming.iter().find(|(b, _)| *b == latch) else {
            continue;
        };
        // Unit stride only: the latch value must be phi + 1.
        let ValueKind::Binary {
            op: BinOp::Add,
            lhs,
            rhs,
        } = func.value(step)
        else {
            continue;
        };
        let unit_step = (*lhs == inst && func.const_value(*rhs) == Some(1))
            || (*rhs == inst && func.const_value(*lhs) == Some(1));
        if !unit_step {
            continue;
        }
        if *cmp_lhs != step {
            continue;
        }
        return Ok(IvInfo {
            phi: inst,
            init,
            last: *cmp_rhs,
            loop_id: id,
        });
    }
    Err(unsupported("no analyzable induction variable"))
}

/// Accept a loop as the outer level of a perfect two-deep nest and extract
/// its induction records.
///
/// Acceptance requires exactly one sub-loop with no sub-loops of its own, a
/// perfect block layout (the inner loop immediately follows the outer
/// header, and the inner exit is the outer latch, allowing one trivial block
/// in between), analyzable induction variables at both levels and bounds
/// that are invariant over the outer loop.
pub fn recognize_nest(func: &Function, forest: &LoopForest, outer_id: LoopId) -> Result<Nest> {
    let outer = forest.get(outer_id);
    let [inner_id] = outer.subloops.as_slice() else {
        return Err(unsupported("outer loop must contain exactly one sub-loop"));
    };
    let inner_id = *inner_id;
    let inner = forest.get(inner_id);
    if !inner.subloops.is_empty() {
        return Err(unsupported("nest is deeper than two loops"));
    }

    let outer_latch = outer
        .latch()
        .ok_or_else(|| unsupported("outer loop has multiple latches"))?;
    let inner_exit =
        exit_block(func, inner).ok_or_else(|| unsupported("inner loop has no unique exit"))?;
    if inner_exit != outer_latch && func.next_block(inner_exit) != Some(outer_latch) {
        return Err(unsupported("statements follow the inner loop"));
    }

    let after_header = func.next_block(outer.header);
    let inner_pre = preheader(func, inner);
    let adjacent = after_header == Some(inner.header)
        || (inner_pre.is_some() && after_header == inner_pre);
    if !adjacent {
        return Err(unsupported("statements precede the inner loop"));
    }

    let outer_iv = induction_variable(func, forest, outer_id)?;
    let inner_iv = induction_variable(func, forest, inner_id)?;

    // Both levels' bounds must be invariant over the whole nest.
    for iv in [&outer_iv, &inner_iv] {
        for bound in [iv.init, iv.last] {
            if !is_loop_invariant(func, outer, bound) {
                return Err(PolytopeError::NonAffine {
                    what: "loop bound varies within the nest".to_string(),
                });
            }
        }
    }

    Ok(Nest {
        outer: outer_id,
        inner: inner_id,
        ivs: vec![outer_iv, inner_iv],
    })
}
