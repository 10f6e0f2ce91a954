//! Demonstration driver: builds the classic forward recurrence
//! `A[i][j] = A[i-1][j] + A[i][j-1]`, runs the polytope pass on it and
//! shows the nest before and after, checking with the reference evaluator
//! that the rewrite preserved the array contents.
//!
//! Run with: `cargo run --bin polyopt`

use polytope::interp::Machine;
use polytope::ir::{Builder, Function, Predicate, ValueId};
use polytope::loops::LoopForest;
use polytope::{PolytopePass, PreservedAnalyses};

const I_LAST: i64 = 8;
const J_LAST: i64 = 8;

fn build_recurrence() -> (Function, ValueId) {
    let mut func = Function::new("wiki");
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
    let one = b.iconst(1);
    let i_up = b.sub(i, one);
    let up_addr = b.element_ptr(array, vec![i_up, j]);
    let up = b.load(up_addr);
    let j_left = b.sub(j, one);
    let left_addr = b.element_ptr(array, vec![i, j_left]);
    let left = b.load(left_addr);
    let sum = b.add(up, left);
    let out = b.element_ptr(array, vec![i, j]);
    b.store(sum, out);
    let j_bound = b.iconst(J_LAST);
    let j_inc = b.add(j, one);
    let j_cmp = b.cmp(Predicate::Sle, j_inc, j_bound);
    b.cond_br(j_cmp, inner_header, outer_latch);

    let mut b = Builder::at_end(&mut func, outer_latch);
    let one = b.iconst(1);
    let i_bound = b.iconst(I_LAST);
    let i_inc = b.add(i, one);
    let i_cmp = b.cmp(Predicate::Sle, i_inc, i_bound);
    b.cond_br(i_cmp, outer_header, exit);

    let mut b = Builder::at_end(&mut func, exit);
    b.ret();

    let i_init = func.iconst(1);
    let j_init = func.iconst(1);
    func.add_phi_incoming(i, entry, i_init);
    func.add_phi_incoming(i, outer_latch, i_inc);
    func.add_phi_incoming(j, inner_ph, j_init);
    func.add_phi_incoming(j, inner_header, j_inc);
    func.set_name(i, "i");
    func.set_name(j, "j");

    (func, array)
}

fn seeded_machine(array: ValueId) -> Machine {
    let mut machine = Machine::new();
    for i in 0..=I_LAST {
        machine.store(array, &[i, 0], (i + 3) % 4);
    }
    for j in 0..=J_LAST {
        machine.store(array, &[0, j], (j * 7) % 4);
    }
    machine
}

fn main() {
    let (mut func, array) = build_recurrence();
    println!("==== before ====\n{func}");

    let mut reference = seeded_machine(array);
    reference.run(&func).expect("reference run");

    let pass = PolytopePass::new();
    let forest = LoopForest::analyze(&func);
    let preserved = forest
        .top_level()
        .into_iter()
        .fold(PreservedAnalyses::All, |acc, lp| {
            match pass.run(&mut func, &forest, lp) {
                PreservedAnalyses::None => PreservedAnalyses::None,
                PreservedAnalyses::All => acc,
            }
        });

    println!("==== after ====\n{func}");
    match preserved {
        PreservedAnalyses::None => {
            let mut transformed = seeded_machine(array);
            transformed.run(&func).expect("transformed run");
            if transformed.memory == reference.memory {
                println!("rewritten nest reproduces the original array contents");
            } else {
                println!("MISMATCH between original and rewritten nest");
                std::process::exit(1);
            }
        }
        PreservedAnalyses::All => println!("pass declined; nest unchanged"),
    }
}
