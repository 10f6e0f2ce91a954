//! Exact integer matrix kernel.
//!
//! Smith and Hermite normal forms, fraction-free determinants and a linear
//! Diophantine solver over `i64` matrices. Everything here is exact integer
//! arithmetic; nalgebra is used only as the container, never for its
//! floating-point decompositions. Entries are expected to stay within `i32`
//! magnitude; intermediate arithmetic is carried in 64 bits.

use crate::error::{PolytopeError, Result};
use nalgebra::{DMatrix, DVector};

/// Dense integer matrix, row-major indexing `m[(row, col)]`.
pub type IMatrix = DMatrix<i64>;
/// Dense integer column vector.
pub type IVector = DVector<i64>;

/// Smith normal form `L * A * R = D` with `L`, `R` unimodular and `D` diagonal.
#[derive(Debug, Clone)]
pub struct Smith {
    /// Unimodular row-operation accumulator.
    pub l: IMatrix,
    /// The diagonalized matrix.
    pub d: IMatrix,
    /// Unimodular column-operation accumulator.
    pub r: IMatrix,
}

/// Returns `k` such that `n - k * q` is the least residue modulo `q`,
/// i.e. `0 <= n - k * q < |q|`.
///
/// A truncating quotient here would make the normal-form reductions
/// non-terminating on negative inputs.
pub fn signed_div(n: i64, q: i64) -> i64 {
    debug_assert!(q != 0);
    (n - n.rem_euclid(q)) / q
}

/// The `n` by `n` identity matrix.
pub fn identity(n: usize) -> IMatrix {
    IMatrix::identity(n, n)
}

/// Matrix product `A * B`, checking that the inner dimensions agree.
pub fn multiply(a: &IMatrix, b: &IMatrix) -> Result<IMatrix> {
    if a.ncols() != b.nrows() {
        return Err(PolytopeError::ShapeMismatch {
            op: "multiply",
            details: format!(
                "{}x{} by {}x{}",
                a.nrows(),
                a.ncols(),
                b.nrows(),
                b.ncols()
            ),
        });
    }
    Ok(a * b)
}

/// The vector `A * x`, checking that `A` is as wide as `x` is long.
pub fn linear_transform(a: &IMatrix, x: &IVector) -> Result<IVector> {
    if a.ncols() != x.len() {
        return Err(PolytopeError::ShapeMismatch {
            op: "linear_transform",
            details: format!("{}x{} by vector of length {}", a.nrows(), a.ncols(), x.len()),
        });
    }
    Ok(a * x)
}

/// Exact determinant of a square integer matrix.
///
/// Fraction-free (Bareiss) elimination: every division is exact, so the
/// result is the true integer determinant with no rounding.
pub fn det(a: &IMatrix) -> Result<i64> {
    let n = a.nrows();
    if a.ncols() != n {
        return Err(PolytopeError::ShapeMismatch {
            op: "det",
            details: format!("{}x{} is not square", a.nrows(), a.ncols()),
        });
    }
    if n == 0 {
        return Ok(1);
    }
    let mut m = a.clone();
    let mut sign = 1i64;
    let mut prev = 1i64;
    for k in 0..n - 1 {
        if m[(k, k)] == 0 {
            let Some(swap) = (k + 1..n).find(|&row| m[(row, k)] != 0) else {
                return Ok(0);
            };
            m.swap_rows(k, swap);
            sign = -sign;
        }
        for i in k + 1..n {
            for j in k + 1..n {
                m[(i, j)] = (m[(i, j)] * m[(k, k)] - m[(i, k)] * m[(k, j)]) / prev;
            }
            m[(i, k)] = 0;
        }
        prev = m[(k, k)];
    }
    Ok(sign * m[(n - 1, n - 1)])
}

/// Smith normal form of an arbitrary rectangular integer matrix.
///
/// For each diagonal index `k`, column operations reduce row `k` until it
/// holds at most one non-zero, then row operations do the same for column
/// `k`, with the surviving entry swapped onto the diagonal. Row and column
/// phases alternate until both are clean: a row phase can re-dirty the
/// column and vice versa, but pivot magnitudes strictly decrease so the
/// alternation terminates. All operations are mirrored on `L` and `R`.
pub fn smith_normal(a: &IMatrix) -> Smith {
    let h = a.nrows();
    let w = a.ncols();
    let mut d = a.clone();
    let mut l = identity(h);
    let mut r = identity(w);

    for k in 0..h.min(w) {
        loop {
            while let Some(pivot_col) = row_pivot(&d, k) {
                let pivot = d[(k, pivot_col)];
                for col in 0..w {
                    if col != pivot_col {
                        let scale = signed_div(d[(k, col)], pivot);
                        if scale != 0 {
                            sub_col_multiple(&mut d, pivot_col, col, scale);
                            sub_col_multiple(&mut r, pivot_col, col, scale);
                        }
                    }
                }
            }
            // Move the surviving row entry (if any) onto the diagonal.
            if let Some(col) = (0..w).find(|&col| d[(k, col)] != 0) {
                if col != k {
                    d.swap_columns(col, k);
                    r.swap_columns(col, k);
                }
            }

            while let Some(pivot_row) = col_pivot(&d, k) {
                let pivot = d[(pivot_row, k)];
                for row in 0..h {
                    if row != pivot_row {
                        let scale = signed_div(d[(row, k)], pivot);
                        if scale != 0 {
                            sub_row_multiple(&mut d, pivot_row, row, scale);
                            sub_row_multiple(&mut l, pivot_row, row, scale);
                        }
                    }
                }
            }
            if let Some(row) = (0..h).find(|&row| d[(row, k)] != 0) {
                if row != k {
                    d.swap_rows(row, k);
                    l.swap_rows(row, k);
                }
            }

            let row_clean = (0..w).all(|col| col == k || d[(k, col)] == 0);
            let col_clean = (0..h).all(|row| row == k || d[(row, k)] == 0);
            if row_clean && col_clean {
                break;
            }
        }
    }

    Smith { l, d, r }
}

/// Column-style Hermite normal form of a square integer matrix.
///
/// Lower-triangular with a non-negative diagonal (strictly positive where
/// the input is non-singular); every sub-diagonal entry is the least
/// non-negative residue modulo its row's diagonal, so the form is canonical
/// and `hermite_normal` is idempotent. Only elementary column operations
/// are applied, so the result spans the same column lattice as the input.
pub fn hermite_normal(a: &IMatrix) -> Result<IMatrix> {
    let n = a.nrows();
    if a.ncols() != n {
        return Err(PolytopeError::ShapeMismatch {
            op: "hermite_normal",
            details: format!("{}x{} is not square", a.nrows(), a.ncols()),
        });
    }
    let mut d = a.clone();

    let mut i = 0;
    while i < n {
        if (i + 1..n).all(|j| d[(i, j)] == 0) {
            if d[(i, i)] < 0 {
                negate_col(&mut d, i);
            }
            i += 1;
            continue;
        }
        // Smallest non-zero entry in the unfinished part of the row acts as
        // pivot; restricting the hunt to columns i.. keeps finished rows
        // triangular.
        let pivot_col = (i..n)
            .filter(|&j| d[(i, j)] != 0)
            .min_by_key(|&j| d[(i, j)].abs())
            .unwrap_or(i);
        if pivot_col != i {
            d.swap_columns(pivot_col, i);
        }
        let pivot = d[(i, i)];
        for j in i + 1..n {
            let quot = d[(i, j)] / pivot;
            if quot != 0 {
                sub_col_multiple(&mut d, i, j, quot);
            }
        }
    }

    // Reduce sub-diagonal entries to least non-negative residues. Column i
    // is zero above row i, so rows already reduced are left untouched.
    for i in 0..n {
        if d[(i, i)] <= 0 {
            continue;
        }
        for j in 0..i {
            let scale = signed_div(d[(i, j)], d[(i, i)]);
            if scale != 0 {
                sub_col_multiple(&mut d, i, j, scale);
            }
        }
    }

    Ok(d)
}

/// Solves `A * x = b` over the integers.
///
/// Returns `Ok(None)` when no integer solution exists. Via the Smith form:
/// with `L*A*R = D` and `c = L*b`, each diagonal entry must divide the
/// matching component of `c` (zero entries demand a zero component); the
/// quotients, padded with zeros to the width of `A`, are mapped back
/// through `R`.
pub fn solve_system(a: &IMatrix, b: &IVector) -> Result<Option<IVector>> {
    let h = a.nrows();
    let w = a.ncols();
    if b.len() != h {
        return Err(PolytopeError::ShapeMismatch {
            op: "solve_system",
            details: format!("{}x{} with rhs of length {}", h, w, b.len()),
        });
    }
    let snf = smith_normal(a);
    let c = &snf.l * b;

    let mut y = IVector::zeros(w);
    for i in 0..h {
        let diag = if i < w { snf.d[(i, i)] } else { 0 };
        if diag == 0 {
            if c[i] != 0 {
                return Ok(None);
            }
        } else if c[i] % diag != 0 {
            return Ok(None);
        } else {
            y[i] = c[i] / diag;
        }
    }
    Ok(Some(&snf.r * &y))
}

/// A pair of `dim` by `dim` unimodular matrices whose left products cover
/// the transformation searcher's walk.
///
/// For `dim = 2` this is `A = [[0,-1],[-1,0]]`, `B = [[1,1],[0,1]]`: a
/// signed swap and an elementary shear.
pub fn generators(dim: usize) -> (IMatrix, IMatrix) {
    let mut a = IMatrix::zeros(dim, dim);
    a[(0, dim - 1)] = -1;
    for i in 0..dim - 1 {
        a[(i + 1, i)] = -1;
    }
    let mut b = identity(dim);
    if dim > 1 {
        b[(0, 1)] = 1;
    }
    (a, b)
}

/// Extends a `d` by `d` iteration-space transform to the `(d+1)` by `(d+1)`
/// homogeneous form that acts on affine coefficient vectors, leaving the
/// constant slot untouched.
pub fn extend_affine(t: &IMatrix) -> IMatrix {
    let n = t.nrows();
    let mut m = IMatrix::zeros(n + 1, n + 1);
    for i in 0..n {
        for j in 0..n {
            m[(i, j)] = t[(i, j)];
        }
    }
    m[(n, n)] = 1;
    m
}

// Least-magnitude non-zero entry of a row, provided the row still has at
// least two non-zeros to reduce.
fn row_pivot(m: &IMatrix, row: usize) -> Option<usize> {
    let mut least: Option<usize> = None;
    let mut nonzero = 0;
    for col in 0..m.ncols() {
        let entry = m[(row, col)];
        if entry != 0 {
            nonzero += 1;
            if least.is_none_or(|best| entry.abs() < m[(row, best)].abs()) {
                least = Some(col);
            }
        }
    }
    if nonzero < 2 { None } else { least }
}

fn col_pivot(m: &IMatrix, col: usize) -> Option<usize> {
    let mut least: Option<usize> = None;
    let mut nonzero = 0;
    for row in 0..m.nrows() {
        let entry = m[(row, col)];
        if entry != 0 {
            nonzero += 1;
            if least.is_none_or(|best| entry.abs() < m[(best, col)].abs()) {
                least = Some(row);
            }
        }
    }
    if nonzero < 2 { None } else { least }
}

// col_dst -= scale * col_src
fn sub_col_multiple(m: &mut IMatrix, src: usize, dst: usize, scale: i64) {
    for row in 0..m.nrows() {
        m[(row, dst)] -= scale * m[(row, src)];
    }
}

// row_dst -= scale * row_src
fn sub_row_multiple(m: &mut IMatrix, src: usize, dst: usize, scale: i64) {
    for col in 0..m.ncols() {
        m[(dst, col)] -= scale * m[(src, col)];
    }
}

fn negate_col(m: &mut IMatrix, col: usize) {
    for row in 0..m.nrows() {
        m[(row, col)] = -m[(row, col)];
    }
}
