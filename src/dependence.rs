//! Loop-carried dependence analysis.
//!
//! Holds the affine array accesses of one nest and decides whether the
//! inner dimension carries a data dependence by posing one linear
//! Diophantine system per (write, other access) pair. The outermost
//! induction variable is held equal across the two iteration points, so an
//! integer solution is exactly a dependence the inner loop carries.

use crate::affine::AffineVec;
use crate::error::Result;
use crate::solver::{self, IMatrix, IVector};
use indexmap::IndexSet;
use itertools::Itertools;

/// One array access: one affine vector per subscript dimension.
pub type Access = Vec<AffineVec>;

/// The de-duplicated write and read accesses of a loop nest.
#[derive(Debug, Clone, PartialEq)]
pub struct LoopDependences {
    writes: Vec<Access>,
    reads: Vec<Access>,
}

impl LoopDependences {
    /// Build a dependence set, de-duplicating both sides on structural
    /// equality while keeping first-encounter order.
    pub fn new(writes: Vec<Access>, reads: Vec<Access>) -> Self {
        let writes: IndexSet<Access> = writes.into_iter().collect();
        let reads: IndexSet<Access> = reads.into_iter().collect();
        LoopDependences {
            writes: writes.into_iter().collect(),
            reads: reads.into_iter().collect(),
        }
    }

    /// The de-duplicated write accesses.
    pub fn writes(&self) -> &[Access] {
        &self.writes
    }

    /// The de-duplicated read accesses.
    pub fn reads(&self) -> &[Access] {
        &self.reads
    }

    /// Whether the nest carries a dependence along the inner dimension.
    ///
    /// Every write is paired against every structurally different access
    /// (reads and other writes alike); one solvable system suffices.
    pub fn carries_dependence(&self) -> Result<bool> {
        let pairs = self
            .writes
            .iter()
            .cartesian_product(self.reads.iter().chain(self.writes.iter()));
        for (write, access) in pairs {
            if access == write {
                continue;
            }
            let (lhs, rhs) = dependence_system(write, access);
            if solver::solve_system(&lhs, &rhs)?.is_some() {
                return Ok(true);
            }
        }
        Ok(false)
    }

    /// The same accesses under the iteration-space transform `t`: every
    /// affine vector is left-multiplied by the homogeneous extension of `t`.
    pub fn transformed(&self, t: &IMatrix) -> Result<Self> {
        let ext = solver::extend_affine(t);
        let apply = |accesses: &[Access]| -> Result<Vec<Access>> {
            accesses
                .iter()
                .map(|access| {
                    access
                        .iter()
                        .map(|coeffs| {
                            let v = IVector::from_vec(coeffs.clone());
                            Ok(solver::linear_transform(&ext, &v)?.iter().copied().collect())
                        })
                        .collect()
                })
                .collect()
        };
        Ok(LoopDependences::new(
            apply(&self.writes)?,
            apply(&self.reads)?,
        ))
    }
}

/// The system `A x = b` whose integer solutions are dependences between
/// `write` and `access` carried by the inner dimension.
///
/// For depth `d` the unknowns are `(i_0, i_1.., j_1..)`: the shared
/// outermost coordinate, then the remaining coordinates of the two
/// iteration points. One equation per subscript: the outermost column takes
/// the coefficient difference, the write's inner coefficients stay on the
/// left, the access's move over negated, and the constant terms form the
/// right-hand side.
fn dependence_system(write: &Access, access: &Access) -> (IMatrix, IVector) {
    debug_assert_eq!(write.len(), access.len());
    let depth = write[0].len() - 1;
    let unknowns = 2 * depth - 1;
    let mut rows = Vec::with_capacity(write.len() * unknowns);
    let mut rhs = Vec::with_capacity(write.len());
    for (write_vec, access_vec) in write.iter().zip(access) {
        rows.push(write_vec[0] - access_vec[0]);
        rows.extend(&write_vec[1..depth]);
        rows.extend(access_vec[1..depth].iter().map(|c| -c));
        rhs.push(access_vec[depth] - write_vec[depth]);
    }
    (
        IMatrix::from_row_slice(write.len(), unknowns, &rows),
        IVector::from_vec(rhs),
    )
}
