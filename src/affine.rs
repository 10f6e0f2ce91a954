//! Affine-value recognition.
//!
//! Lifts IR scalar expressions into integer coefficient vectors over the
//! induction variables of a nest. For a nest of depth `d` the vector has
//! length `d + 1`: one coefficient per induction variable, outermost first,
//! with the constant term last. Anything outside the recognized grammar is
//! simply not affine.

use crate::ir::{BinOp, Function, ValueId, ValueKind};
use crate::loops::IvInfo;

/// Affine coefficient vector: induction-variable coefficients (outermost
/// first) followed by the constant term.
pub type AffineVec = Vec<i64>;

/// Evaluate an affine vector at a concrete iteration point.
pub fn evaluate(coeffs: &[i64], point: &[i64]) -> i64 {
    debug_assert_eq!(coeffs.len(), point.len() + 1);
    coeffs
        .iter()
        .zip(point.iter().chain(std::iter::once(&1)))
        .map(|(c, p)| c * p)
        .sum()
}

/// Lift `value` to an affine vector over `ivs`, or report it non-affine.
///
/// The grammar, mirroring what the recognizer needs for subscripts and
/// bounds: integer constants, the induction phis themselves, addition,
/// subtraction, multiplication by a constant, left shift by a small
/// constant, `xor x, -1` (bitwise not, i.e. `-x - 1`), the `smax.i32`
/// intrinsic folded element-wise, and transparent integer casts. Phi nodes
/// other than the induction phis are opaque: phis can be self-referential
/// and must not be recursed into.
pub fn lift(func: &Function, value: ValueId, ivs: &[IvInfo]) -> Option<AffineVec> {
    let width = ivs.len() + 1;
    if let ValueKind::Const(c) = func.value(value) {
        let mut coeffs = vec![0; width];
        coeffs[width - 1] = *c;
        return Some(coeffs);
    }
    if let Some(position) = ivs.iter().position(|iv| iv.phi == value) {
        let mut coeffs = vec![0; width];
        coeffs[position] = 1;
        return Some(coeffs);
    }
    match func.value(value) {
        ValueKind::Binary {
            op: BinOp::Add,
            lhs,
            rhs,
        } => {
            let fst = lift(func, *lhs, ivs)?;
            let snd = lift(func, *rhs, ivs)?;
            Some(fst.iter().zip(&snd).map(|(a, b)| a + b).collect())
        }
        ValueKind::Binary {
            op: BinOp::Sub,
            lhs,
            rhs,
        } => {
            let fst = lift(func, *lhs, ivs)?;
            let snd = lift(func, *rhs, ivs)?;
            Some(fst.iter().zip(&snd).map(|(a, b)| a - b).collect())
        }
        ValueKind::Binary {
            op: BinOp::Mul,
            lhs,
            rhs,
        } => {
            // At least one factor must be a literal constant.
            if let Some(scale) = func.const_value(*lhs) {
                Some(lift(func, *rhs, ivs)?.iter().map(|c| c * scale).collect())
            } else if let Some(scale) = func.const_value(*rhs) {
                Some(lift(func, *lhs, ivs)?.iter().map(|c| c * scale).collect())
            } else {
                None
            }
        }
        ValueKind::Binary {
            op: BinOp::Shl,
            lhs,
            rhs,
        } => {
            let shift = func.const_value(*rhs)?;
            if !(0..=31).contains(&shift) {
                return None;
            }
            let scale = 1i64 << shift;
            Some(lift(func, *lhs, ivs)?.iter().map(|c| c * scale).collect())
        }
        ValueKind::Binary {
            op: BinOp::Xor,
            lhs,
            rhs,
        } => {
            // xor x, -1 simplifies to -x - 1.
            if func.const_value(*rhs) != Some(-1) {
                return None;
            }
            let mut coeffs: AffineVec = lift(func, *lhs, ivs)?.iter().map(|c| -c).collect();
            *coeffs.last_mut()? -= 1;
            Some(coeffs)
        }
        ValueKind::Call { callee, args } if callee == "smax.i32" && args.len() == 2 => {
            // Element-wise fold; sound only in the bound-expression contexts
            // the recognizer feeds here.
            let fst = lift(func, args[0], ivs)?;
            let snd = lift(func, args[1], ivs)?;
            Some(fst.iter().zip(&snd).map(|(a, b)| *a.max(b)).collect())
        }
        ValueKind::Cast { value } => lift(func, *value, ivs),
        _ => None,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::ir::{Builder, Function};
    use crate::loops::LoopId;

    // A function with two loose phis standing in for the induction
    // variables; the lifter only compares value identities.
    fn setup() -> (Function, Vec<IvInfo>, ValueId, ValueId) {
        let mut func = Function::new("exprs");
        let block = func.add_block("body");
        let mut b = Builder::at_end(&mut func, block);
        let i = b.phi();
        let j = b.phi();
        let zero = b.iconst(0);
        let ivs = vec![
            IvInfo {
                phi: i,
                init: zero,
                last: zero,
                loop_id: LoopId(0),
            },
            IvInfo {
                phi: j,
                init: zero,
                last: zero,
                loop_id: LoopId(1),
            },
        ];
        (func, ivs, i, j)
    }

    #[test]
    fn test_constant_and_induction_variables() {
        let (mut func, ivs, i, j) = setup();
        let seven = func.iconst(7);
        assert_eq!(lift(&func, seven, &ivs), Some(vec![0, 0, 7]));
        assert_eq!(lift(&func, i, &ivs), Some(vec![1, 0, 0]));
        assert_eq!(lift(&func, j, &ivs), Some(vec![0, 1, 0]));
    }

    #[test]
    fn test_linear_combination() {
        let (mut func, ivs, i, j) = setup();
        let block = func.blocks().next().unwrap();
        let mut b = Builder::at_end(&mut func, block);
        // 3*i + (j - 4)
        let three = b.iconst(3);
        let four = b.iconst(4);
        let scaled = b.mul(three, i);
        let shifted = b.sub(j, four);
        let expr = b.add(scaled, shifted);
        let coeffs = lift(&func, expr, &ivs).unwrap();
        assert_eq!(coeffs, vec![3, 1, -4]);
        // Property: the vector evaluates to the expression at sample points.
        for (iv, jv) in [(0, 0), (2, 5), (-3, 7)] {
            assert_eq!(evaluate(&coeffs, &[iv, jv]), 3 * iv + jv - 4);
        }
    }

    #[test]
    fn test_shift_and_not() {
        let (mut func, ivs, i, _) = setup();
        let block = func.blocks().next().unwrap();
        let mut b = Builder::at_end(&mut func, block);
        let two = b.iconst(2);
        let shifted = b.binary(BinOp::Shl, i, two);
        assert_eq!(lift(&func, shifted, &ivs), Some(vec![4, 0, 0]));

        let mut b = Builder::at_end(&mut func, block);
        let minus_one = b.iconst(-1);
        let negated = b.binary(BinOp::Xor, shifted, minus_one);
        assert_eq!(lift(&func, negated, &ivs), Some(vec![-4, 0, -1]));
    }

    #[test]
    fn test_smax_fold_and_cast() {
        let (mut func, ivs, i, j) = setup();
        let block = func.blocks().next().unwrap();
        let mut b = Builder::at_end(&mut func, block);
        let folded = b.call("smax.i32", vec![i, j]);
        assert_eq!(lift(&func, folded, &ivs), Some(vec![1, 1, 0]));

        let mut b = Builder::at_end(&mut func, block);
        let cast = b.cast(i);
        assert_eq!(lift(&func, cast, &ivs), Some(vec![1, 0, 0]));
    }

    #[test]
    fn test_rejections() {
        let (mut func, ivs, i, j) = setup();
        let block = func.blocks().next().unwrap();
        let mut b = Builder::at_end(&mut func, block);
        // i * i is quadratic.
        let square = b.mul(i, i);
        assert_eq!(lift(&func, square, &ivs), None);
        // A phi that is not an induction variable is opaque.
        let mut b = Builder::at_end(&mut func, block);
        let foreign = b.phi();
        assert_eq!(lift(&func, foreign, &ivs), None);
        // Division is outside the grammar.
        let mut b = Builder::at_end(&mut func, block);
        let quotient = b.sdiv(i, j);
        assert_eq!(lift(&func, quotient, &ivs), None);
        // Unknown calls are opaque.
        let mut b = Builder::at_end(&mut func, block);
        let unknown = b.call("smin.i32", vec![i, j]);
        assert_eq!(lift(&func, unknown, &ivs), None);
    }

    #[test]
    fn test_determinism() {
        let (mut func, ivs, i, j) = setup();
        let block = func.blocks().next().unwrap();
        let mut b = Builder::at_end(&mut func, block);
        let five = b.iconst(5);
        let expr0 = b.mul(five, j);
        let expr = b.add(expr0, i);
        let once = lift(&func, expr, &ivs);
        let twice = lift(&func, expr, &ivs);
        assert_eq!(once, twice);
        assert_eq!(once, Some(vec![1, 5, 0]));
    }
}
