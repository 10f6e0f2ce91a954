//! Shared test utilities: canonical rotated loop nests over the crate IR.
//!
//! The nests mirror what a rotated C loop looks like after lowering:
//! do-while bodies, the induction phi in the header, the unit-step
//! increment and an inclusive `sle` bound check in the latch.

#![allow(dead_code)]

use polytope::interp::Machine;
use polytope::ir::{BlockId, Builder, Function, Predicate, ValueId};

/// A built two-deep nest plus the handles tests care about.
pub struct NestIr {
    pub func: Function,
    pub array: ValueId,
    pub inner_header: BlockId,
}

/// Build `for (i = i0; i <= i_last; i++) for (j = j0; j <= j_last; j++)
/// body(i, j)` in rotated form. The body closure receives a builder
/// positioned inside the inner header plus the `i`/`j` phis and the array
/// argument.
pub fn build_nest(
    name: &str,
    (i0, i_last): (i64, i64),
    (j0, j_last): (i64, i64),
    body: impl FnOnce(&mut Builder<'_>, ValueId, ValueId, ValueId),
) -> NestIr {
    let mut func = Function::new(name);
    let array = func.add_arg("A");
    let entry = func.add_block("entry");
    let outer_header = func.add_block("outer.header");
    let inner_ph = func.add_block("inner.ph");
    let inner_header = func.add_block("inner.header");
    let outer_latch = func.add_block("outer.latch");
    let exit = func.add_block("exit");

    let mut b = Builder::at_end(&mut func, entry);
    b.br(outer_header);

    let mut b = Builder::at_end(&mut func, outer_header);
    let i = b.phi();
    b.br(inner_ph);

    let mut b = Builder::at_end(&mut func, inner_ph);
    b.br(inner_header);

    let mut b = Builder::at_end(&mut func, inner_header);
    let j = b.phi();
    body(&mut b, i, j, array);
    let one = b.iconst(1);
    let j_bound = b.iconst(j_last);
    let j_inc = b.add(j, one);
    let j_cmp = b.cmp(Predicate::Sle, j_inc, j_bound);
    b.cond_br(j_cmp, inner_header, outer_latch);

    let mut b = Builder::at_end(&mut func, outer_latch);
    let one = b.iconst(1);
    let i_bound = b.iconst(i_last);
    let i_inc = b.add(i, one);
    let i_cmp = b.cmp(Predicate::Sle, i_inc, i_bound);
    b.cond_br(i_cmp, outer_header, exit);

    let mut b = Builder::at_end(&mut func, exit);
    b.ret();

    let i_init = func.iconst(i0);
    let j_init = func.iconst(j0);
    func.add_phi_incoming(i, entry, i_init);
    func.add_phi_incoming(i, outer_latch, i_inc);
    func.add_phi_incoming(j, inner_ph, j_init);
    func.add_phi_incoming(j, inner_header, j_inc);
    func.set_name(i, "i");
    func.set_name(j, "j");

    NestIr {
        func,
        array,
        inner_header,
    }
}

/// Build a rotated three-deep nest (i, j, k); only the innermost level has
/// a body. Used to check that deeper nests are declined.
pub fn build_triple_nest(
    name: &str,
    last: i64,
    body: impl FnOnce(&mut Builder<'_>, ValueId, ValueId, ValueId, ValueId),
) -> NestIr {
    let mut func = Function::new(name);
    let array = func.add_arg("A");
    let entry = func.add_block("entry");
    let h1 = func.add_block("loop1.header");
    let ph2 = func.add_block("loop2.ph");
    let h2 = func.add_block("loop2.header");
    let ph3 = func.add_block("loop3.ph");
    let h3 = func.add_block("loop3.header");
    let latch2 = func.add_block("loop2.latch");
    let latch1 = func.add_block("loop1.latch");
    let exit = func.add_block("exit");

    let mut b = Builder::at_end(&mut func, entry);
    b.br(h1);
    let mut b = Builder::at_end(&mut func, h1);
    let i = b.phi();
    b.br(ph2);
    let mut b = Builder::at_end(&mut func, ph2);
    b.br(h2);
    let mut b = Builder::at_end(&mut func, h2);
    let j = b.phi();
    b.br(ph3);
    let mut b = Builder::at_end(&mut func, ph3);
    b.br(h3);

    let mut b = Builder::at_end(&mut func, h3);
    let k = b.phi();
    body(&mut b, i, j, k, array);
    let one = b.iconst(1);
    let bound = b.iconst(last);
    let k_inc = b.add(k, one);
    let k_cmp = b.cmp(Predicate::Sle, k_inc, bound);
    b.cond_br(k_cmp, h3, latch2);

    let mut b = Builder::at_end(&mut func, latch2);
    let one = b.iconst(1);
    let bound = b.iconst(last);
    let j_inc = b.add(j, one);
    let j_cmp = b.cmp(Predicate::Sle, j_inc, bound);
    b.cond_br(j_cmp, h2, latch1);

    let mut b = Builder::at_end(&mut func, latch1);
    let one = b.iconst(1);
    let bound = b.iconst(last);
    let i_inc = b.add(i, one);
    let i_cmp = b.cmp(Predicate::Sle, i_inc, bound);
    b.cond_br(i_cmp, h1, exit);

    let mut b = Builder::at_end(&mut func, exit);
    b.ret();

    let init = func.iconst(1);
    func.add_phi_incoming(i, entry, init);
    func.add_phi_incoming(i, latch1, i_inc);
    func.add_phi_incoming(j, ph2, init);
    func.add_phi_incoming(j, latch2, j_inc);
    func.add_phi_incoming(k, ph3, init);
    func.add_phi_incoming(k, h3, k_inc);

    NestIr {
        func,
        array,
        inner_header: h3,
    }
}

/// Seed the boundary row and column a stencil body reads but never writes,
/// with values irregular enough to expose any reordering of dependent
/// stores.
pub fn seed_boundary(machine: &mut Machine, array: ValueId, i_last: i64, j_last: i64) {
    for i in 0..=i_last {
        machine.store(array, &[i, 0], (i * 7 + 3) % 11);
    }
    for j in 0..=j_last {
        machine.store(array, &[0, j], (j * 5 + 2) % 13);
    }
}
