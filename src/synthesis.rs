//! Loop-nest rewriting.
//!
//! Given an accepted nest, a unimodular transform `T`, its Hermite form `H`
//! and its determinant, rewrites the nest in place to iterate over the
//! transformed polytope: new induction phis `p` and `q`, bounds picked from
//! the iteration-rectangle corners by the sign pattern of `T`'s first row,
//! piece-wise floor/ceil expressions for the skewed inner bounds, and
//! recovery expressions `i.new`/`j.new` so the body keeps observing the
//! original induction values.
//!
//! Every IR handle the rewrite needs is collected before the first
//! mutation; a missing handle aborts while the nest is still intact.

use crate::error::{PolytopeError, Result};
use crate::ir::{BlockId, Builder, Function, Predicate, ValueId, ValueKind};
use crate::loops::{self, IvInfo, LoopForest, Nest};
use crate::solver::IMatrix;
use tracing::debug;

struct LoopHandles {
    preheader: BlockId,
    header: BlockId,
    latch: BlockId,
    exit: BlockId,
    phi: ValueId,
    increment: ValueId,
    compare: ValueId,
    branch: ValueId,
}

fn missing(what: &str) -> PolytopeError {
    PolytopeError::MissingIr {
        what: what.to_string(),
    }
}

fn gather_loop(func: &Function, forest: &LoopForest, iv: &IvInfo, level: &str) -> Result<LoopHandles> {
    let lp = forest.get(iv.loop_id);
    let latch = lp
        .latch()
        .ok_or_else(|| missing(&format!("{level} loop latch")))?;
    let preheader = loops::preheader(func, lp)
        .ok_or_else(|| missing(&format!("{level} loop preheader")))?;
    let exit = loops::exit_block(func, lp)
        .ok_or_else(|| missing(&format!("{level} loop exit block")))?;
    let branch = func
        .terminator(latch)
        .ok_or_else(|| missing(&format!("{level} latch terminator")))?;
    let ValueKind::CondBr { cond, .. } = func.value(branch) else {
        return Err(missing(&format!("{level} latch conditional branch")));
    };
    let compare = *cond;
    if !matches!(func.value(compare), ValueKind::Cmp { .. }) {
        return Err(missing(&format!("{level} latch comparison")));
    }
    let ValueKind::Phi { incoming } = func.value(iv.phi) else {
        return Err(missing(&format!("{level} induction phi")));
    };
    let increment = incoming
        .iter()
        .find(|(b, _)| *b == latch)
        .map(|(_, v)| *v)
        .ok_or_else(|| missing(&format!("{level} induction increment")))?;
    Ok(LoopHandles {
        preheader,
        header: lp.header,
        latch,
        exit,
        phi: iv.phi,
        increment,
        compare,
        branch,
    })
}

/// Rewrite the nest in place to iterate `(p, q) = T * (i, j)`.
pub fn rewrite_nest(
    func: &mut Function,
    forest: &LoopForest,
    nest: &Nest,
    t: &IMatrix,
    h: &IMatrix,
    det_t: i64,
) -> Result<()> {
    if t.nrows() != 2 || t.ncols() != 2 || h.nrows() != 2 || h.ncols() != 2 {
        return Err(PolytopeError::ShapeMismatch {
            op: "rewrite_nest",
            details: format!("transform {}x{}, hermite {}x{}", t.nrows(), t.ncols(), h.nrows(), h.ncols()),
        });
    }
    let [outer_iv, inner_iv] = nest.ivs.as_slice() else {
        return Err(missing("two induction-variable records"));
    };
    let outer = gather_loop(func, forest, outer_iv, "outer")?;
    let inner = gather_loop(func, forest, inner_iv, "inner")?;

    let (t00, t01, t10, t11) = (t[(0, 0)], t[(0, 1)], t[(1, 0)], t[(1, 1)]);
    let (h00, h10, h11) = (h[(0, 0)], h[(1, 0)], h[(1, 1)]);

    // Corners of the original iteration rectangle as (outer, inner) values.
    let ll = (outer_iv.init, inner_iv.init);
    let lr = (outer_iv.last, inner_iv.init);
    let ul = (outer_iv.init, inner_iv.last);
    let ur = (outer_iv.last, inner_iv.last);

    // Bound-defining corners, selected by the signs of T's first row and of
    // the determinant.
    let (outer_lo, outer_hi, inner_lo, inner_hi) = match (t00 > 0, t01 > 0) {
        (true, true) if det_t > 0 => (ll, ur, lr, ul),
        (true, true) => (ll, ur, ul, lr),
        (false, true) if det_t > 0 => (lr, ul, ur, ll),
        (false, true) => (lr, ul, ll, ur),
        (true, false) if det_t > 0 => (ul, lr, ll, ur),
        (true, false) => (ul, lr, ur, ll),
        (false, false) if det_t > 0 => (ur, ll, ul, lr),
        (false, false) => (ur, ll, lr, ul),
    };

    func.declare_intrinsic("smin.i32");
    func.declare_intrinsic("smax.i32");

    // New outer bound: p starts at the projection of its corner. Emitted in
    // the preheader so the phi's preheader incoming is available there.
    let mut b = Builder::before_terminator(func, outer.preheader);
    let p_lower = emit_corner_dot(&mut b, t00, t01, outer_lo);
    func.set_name(p_lower, "p.lower");

    let mut b = Builder::at_block_start(func, outer.header);
    let p = b.phi();
    func.set_name(p, "p");

    // Outer latch: step by the Hermite diagonal and compare inclusively.
    let mut b = Builder::before_terminator(func, outer.latch);
    let step = b.iconst(h00);
    let p_inc = b.add(p, step);
    let p_upper = emit_corner_dot(&mut b, t00, t01, outer_hi);
    let outer_cmp = b.cmp(Predicate::Sle, p_inc, p_upper);
    b.cond_br(outer_cmp, outer.header, outer.exit);
    func.set_name(p_inc, "p.inc");
    func.set_name(p_upper, "p.upper");

    // Inner bounds, recomputed per outer iteration in the inner preheader.
    let mut b = Builder::before_terminator(func, inner.preheader);
    let l1 = emit_corner_offset(&mut b, p, t00, t01, inner_lo);
    let lo_piece_0 = emit_piece(&mut b, l1, t00, t10, i64::from(i32::MIN));
    let lo_piece_1 = emit_piece(&mut b, l1, t01, t11, i64::from(i32::MIN));
    let lo_best = b.call("smax.i32", vec![lo_piece_0, lo_piece_1]);
    let lo_base = emit_corner_dot(&mut b, t10, t11, inner_lo);
    let l1_ceil = b.add(lo_best, lo_base);

    let l3 = emit_corner_offset(&mut b, p, t00, t01, inner_hi);
    let hi_piece_0 = emit_piece(&mut b, l3, t00, t10, i64::from(i32::MAX));
    let hi_piece_1 = emit_piece(&mut b, l3, t01, t11, i64::from(i32::MAX));
    let hi_best = b.call("smin.i32", vec![hi_piece_0, hi_piece_1]);
    let hi_base = emit_corner_dot(&mut b, t10, t11, inner_hi);
    let q_upper = b.add(hi_best, hi_base);

    // Align q's start with the lattice the Hermite form describes.
    let h10_c = b.iconst(h10);
    let h00_c = b.iconst(h00);
    let h11_c = b.iconst(h11);
    let p_strides = b.sdiv(p, h00_c);
    let lattice = b.mul(h10_c, p_strides);
    let misalign = b.sub(lattice, l1_ceil);
    let offset = b.srem(misalign, h11_c);
    let q_lower = b.add(l1_ceil, offset);
    func.set_name(l1, "l1");
    func.set_name(l1_ceil, "l1.ceil");
    func.set_name(l3, "l3");
    func.set_name(q_upper, "q.upper");
    func.set_name(offset, "offset");
    func.set_name(q_lower, "q.lower");

    // Inner header: q phi, then the original induction values recovered by
    // inverting T.
    let mut b = Builder::at_block_start(func, inner.header);
    let q = b.phi();
    func.set_name(q, "q");
    let mut b = Builder::at_first_non_phi(func, inner.header);
    let det_c = b.iconst(det_t);
    let t11_c = b.iconst(t11);
    let t01_c = b.iconst(t01);
    let i_hi = b.mul(t11_c, p);
    let i_lo = b.mul(t01_c, q);
    let i_num = b.sub(i_hi, i_lo);
    let i_new = b.sdiv(i_num, det_c);
    let t00_c = b.iconst(t00);
    let t10_c = b.iconst(t10);
    let j_hi = b.mul(t00_c, q);
    let j_lo = b.mul(t10_c, p);
    let j_num = b.sub(j_hi, j_lo);
    let j_new = b.sdiv(j_num, det_c);
    func.set_name(i_new, "i.new");
    func.set_name(j_new, "j.new");

    // Inner latch.
    let mut b = Builder::before_terminator(func, inner.latch);
    let q_step = b.iconst(h11);
    let q_inc = b.add(q, q_step);
    let inner_cmp = b.cmp(Predicate::Sle, q_inc, q_upper);
    b.cond_br(inner_cmp, inner.header, inner.exit);
    func.set_name(q_inc, "q.inc");

    func.add_phi_incoming(p, outer.preheader, p_lower);
    func.add_phi_incoming(p, outer.latch, p_inc);
    func.add_phi_incoming(q, inner.preheader, q_lower);
    func.add_phi_incoming(q, inner.latch, q_inc);

    // Swap the body over to the recovered induction values and drop the old
    // plumbing.
    func.replace_all_uses(outer.phi, i_new);
    func.replace_all_uses(inner.phi, j_new);
    for inst in [
        outer.branch,
        outer.compare,
        outer.increment,
        outer.phi,
        inner.branch,
        inner.compare,
        inner.increment,
        inner.phi,
    ] {
        func.erase(inst);
    }

    func.annotate_block(inner.header, "parallel_accesses");
    func.annotate_block(inner.header, "vectorize_enable");

    debug!(transform = %t, "rewrote loop nest");
    Ok(())
}

// c0 * corner.0 + c1 * corner.1
fn emit_corner_dot(b: &mut Builder<'_>, c0: i64, c1: i64, corner: (ValueId, ValueId)) -> ValueId {
    let c0_v = b.iconst(c0);
    let lhs = b.mul(c0_v, corner.0);
    let c1_v = b.iconst(c1);
    let rhs = b.mul(c1_v, corner.1);
    b.add(lhs, rhs)
}

// p - c0 * corner.0 - c1 * corner.1
fn emit_corner_offset(
    b: &mut Builder<'_>,
    p: ValueId,
    c0: i64,
    c1: i64,
    corner: (ValueId, ValueId),
) -> ValueId {
    let c0_v = b.iconst(c0);
    let lhs = b.mul(c0_v, corner.0);
    let partial = b.sub(p, lhs);
    let c1_v = b.iconst(c1);
    let rhs = b.mul(c1_v, corner.1);
    b.sub(partial, rhs)
}

// row1 * (l / row0) + min(l % row0, 1), or the sentinel when row0 is zero
// and this piece must not constrain the bound.
fn emit_piece(b: &mut Builder<'_>, l: ValueId, row0: i64, row1: i64, sentinel: i64) -> ValueId {
    if row0 == 0 {
        return b.iconst(sentinel);
    }
    let divisor = b.iconst(row0);
    let quot = b.sdiv(l, divisor);
    let scale = b.iconst(row1);
    let scaled = b.mul(scale, quot);
    let rem = b.srem(l, divisor);
    let one = b.iconst(1);
    let capped = b.call("smin.i32", vec![rem, one]);
    b.add(scaled, capped)
}
