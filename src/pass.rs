//! The polytope loop pass.
//!
//! Orchestrates the pipeline: recognize the nest, lift the array accesses,
//! test for an inner-dimension dependence, search for a unimodular
//! transform and rewrite the nest. Every failure along the way is a
//! decline: the IR is left untouched and the host is told all analyses are
//! preserved.

use crate::dependence::LoopDependences;
use crate::error::{PolytopeError, Result};
use crate::ir::{Function, ValueKind};
use crate::loops::{self, LoopForest, LoopId, Nest};
use crate::search;
use crate::solver::{self, IMatrix};
use crate::synthesis;
use crate::{affine, dependence};
use tracing::{debug, warn};

/// What the pass reports back to the host's pass manager.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PreservedAnalyses {
    /// Nothing changed; every analysis is still valid.
    All,
    /// The IR was mutated; analyses must be recomputed.
    None,
}

/// The loop-nest transformation pass.
#[derive(Debug, Clone)]
pub struct PolytopePass {
    search_depth: u32,
}

impl Default for PolytopePass {
    fn default() -> Self {
        PolytopePass::new()
    }
}

impl PolytopePass {
    /// Pipeline name the pass registers under.
    pub const NAME: &'static str = "polytope";

    /// A pass with the default generator-walk depth.
    pub fn new() -> Self {
        PolytopePass {
            search_depth: search::DEFAULT_SEARCH_DEPTH,
        }
    }

    /// Override the generator-walk depth budget.
    pub fn with_search_depth(depth: u32) -> Self {
        PolytopePass {
            search_depth: depth,
        }
    }

    /// Run on one loop. Mutates `func` only on success.
    pub fn run(&self, func: &mut Function, forest: &LoopForest, lp: LoopId) -> PreservedAnalyses {
        match self.try_rewrite(func, forest, lp) {
            Ok(t) => {
                debug!(transform = %t, "performed polytope optimisation");
                PreservedAnalyses::None
            }
            Err(err) if err.is_decline() => {
                debug!(%err, "leaving loop nest unchanged");
                PreservedAnalyses::All
            }
            Err(err) => {
                warn!(%err, "internal kernel failure; leaving loop nest unchanged");
                PreservedAnalyses::All
            }
        }
    }

    /// Convenience driver: analyze `func` and run on every outermost loop.
    pub fn run_on_function(&self, func: &mut Function) -> PreservedAnalyses {
        let forest = LoopForest::analyze(func);
        let mut preserved = PreservedAnalyses::All;
        for lp in forest.top_level() {
            if self.run(func, &forest, lp) == PreservedAnalyses::None {
                preserved = PreservedAnalyses::None;
            }
        }
        preserved
    }

    fn try_rewrite(&self, func: &mut Function, forest: &LoopForest, lp: LoopId) -> Result<IMatrix> {
        // All per-nest state lives below this frame; nothing survives into
        // the next invocation.
        let nest = loops::recognize_nest(func, forest, lp)?;
        let deps = collect_accesses(func, forest, &nest)?;
        if !deps.carries_dependence()? {
            return Err(PolytopeError::NoDependence);
        }
        let t = search::find_transformation(&deps, nest.ivs.len(), self.search_depth)?.ok_or(
            PolytopeError::NoTransformation {
                depth: self.search_depth,
            },
        )?;
        let h = solver::hermite_normal(&t)?;
        let det_t = solver::det(&t)?;
        synthesis::rewrite_nest(func, forest, &nest, &t, &h, det_t)?;
        Ok(t)
    }
}

/// Hook for the host's pass-pipeline parser.
pub fn parse_pass_name(name: &str) -> Option<PolytopePass> {
    (name == PolytopePass::NAME).then(PolytopePass::new)
}

/// Collect the affine array accesses of the nest's body.
///
/// Scans the inner header for loads and stores through element addresses
/// and lifts the last two subscripts of each. A subscript outside the
/// affine grammar declines the nest; a missing read or write side means
/// there is nothing the inner dimension could carry.
fn collect_accesses(func: &Function, forest: &LoopForest, nest: &Nest) -> Result<LoopDependences> {
    let inner_header = forest.get(nest.inner).header;
    let mut writes = Vec::new();
    let mut reads = Vec::new();
    for &inst in func.insts(inner_header) {
        let (addr, accesses) = match func.value(inst) {
            ValueKind::Store { addr, .. } => (*addr, &mut writes),
            ValueKind::Load { addr } => (*addr, &mut reads),
            _ => continue,
        };
        let ValueKind::ElementPtr { indices, .. } = func.value(addr) else {
            return Err(PolytopeError::NonAffine {
                what: "array access through a non-element address".to_string(),
            });
        };
        if indices.len() < 2 {
            return Err(PolytopeError::NonAffine {
                what: "array access with fewer than two subscripts".to_string(),
            });
        }
        let access = indices[indices.len() - 2..]
            .iter()
            .map(|&index| {
                affine::lift(func, index, &nest.ivs).ok_or_else(|| PolytopeError::NonAffine {
                    what: "array subscript outside the affine grammar".to_string(),
                })
            })
            .collect::<Result<Vec<_>>>()?;
        accesses.push(access);
    }
    if writes.is_empty() || reads.is_empty() {
        return Err(PolytopeError::NoDependence);
    }
    Ok(dependence::LoopDependences::new(writes, reads))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_pipeline_registration() {
        assert!(parse_pass_name("polytope").is_some());
        assert!(parse_pass_name("loop-rotate").is_none());
        assert_eq!(PolytopePass::NAME, "polytope");
    }

    #[test]
    fn test_loop_free_function_is_preserved() {
        let mut func = Function::new("empty");
        let entry = func.add_block("entry");
        let mut b = crate::ir::Builder::at_end(&mut func, entry);
        b.ret();
        let pass = PolytopePass::new();
        assert_eq!(pass.run_on_function(&mut func), PreservedAnalyses::All);
    }
}
