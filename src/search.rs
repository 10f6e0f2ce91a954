//! Transformation search over the unimodular group.
//!
//! Depth-first walk over left products of two unimodular generators,
//! starting from the identity. A candidate is admissible when the
//! transformed accesses no longer carry an inner dependence and no
//! dependence direction flips sign. The first admissible matrix wins; there
//! is deliberately no cost model.

use crate::dependence::LoopDependences;
use crate::error::Result;
use crate::solver::{self, IMatrix, IVector};
use tracing::trace;

/// Default bound on the generator-product depth.
pub const DEFAULT_SEARCH_DEPTH: u32 = 5;

/// Search for a unimodular transform that frees the inner dimension.
///
/// Returns the first admissible candidate in depth-first generator order,
/// or `None` when the walk exhausts `depth`.
pub fn find_transformation(
    deps: &LoopDependences,
    dim: usize,
    depth: u32,
) -> Result<Option<IMatrix>> {
    let (gen_a, gen_b) = solver::generators(dim);
    search(deps, &gen_a, &gen_b, solver::identity(dim), depth)
}

fn search(
    deps: &LoopDependences,
    gen_a: &IMatrix,
    gen_b: &IMatrix,
    t: IMatrix,
    depth: u32,
) -> Result<Option<IMatrix>> {
    if admissible(deps, &t)? {
        trace!(transform = %t, "admissible transformation");
        return Ok(Some(t));
    }
    if depth == 0 {
        return Ok(None);
    }
    if let Some(found) = search(deps, gen_a, gen_b, solver::multiply(gen_a, &t)?, depth - 1)? {
        return Ok(Some(found));
    }
    search(deps, gen_a, gen_b, solver::multiply(gen_b, &t)?, depth - 1)
}

fn admissible(deps: &LoopDependences, t: &IMatrix) -> Result<bool> {
    if deps.transformed(t)?.carries_dependence()? {
        return Ok(false);
    }
    preserves_directions(deps, t)
}

/// Direction check: for every (write, read) pair, take the per-subscript
/// difference of constant terms and apply `t`; a component that changes
/// which side of zero it is on reverses an existing dependence order.
fn preserves_directions(deps: &LoopDependences, t: &IMatrix) -> Result<bool> {
    for write in deps.writes() {
        for read in deps.reads() {
            let diff: Vec<i64> = write
                .iter()
                .zip(read)
                .map(|(w, r)| w[w.len() - 1] - r[r.len() - 1])
                .collect();
            let transformed = solver::linear_transform(t, &IVector::from_vec(diff.clone()))?;
            for (component, mapped) in diff.iter().zip(transformed.iter()) {
                if (*component < 0) != (*mapped < 0) {
                    return Ok(false);
                }
            }
        }
    }
    Ok(true)
}
