//! # polytope
//!
//! A loop-nest optimization pass over a small scalar IR.
//!
//! Given a perfectly nested, two-deep loop whose bounds and array
//! subscripts are affine in the induction variables, the pass computes a
//! unimodular change of iteration coordinates that eliminates loop-carried
//! dependences along the inner dimension and rewrites the nest to walk the
//! transformed polytope, marking the inner loop parallel and vectorizable.
//! When no admissible transformation exists the IR is left untouched.
//!
//! ## Pieces
//!
//! - **Integer kernel**: Smith/Hermite normal forms, exact determinants and
//!   a linear Diophantine solver ([`solver`])
//! - **Affine lifter**: IR expressions to coefficient vectors ([`affine`])
//! - **Dependence analyzer**: Diophantine solvability of access pairs
//!   ([`dependence`])
//! - **Transformation search**: bounded walk over unimodular generator
//!   products ([`search`])
//! - **Recognizer and synthesizer**: nest acceptance and in-place rewriting
//!   ([`loops`], [`synthesis`])
//! - **Host substrate**: the IR itself, its loop analysis and a reference
//!   evaluator ([`ir`], [`loops`], [`interp`])
//!
//! ## Example
//!
//! ```rust,ignore
//! use polytope::{PolytopePass, PreservedAnalyses};
//!
//! let pass = PolytopePass::new();
//! if pass.run_on_function(&mut func) == PreservedAnalyses::None {
//!     println!("{func}");
//! }
//! ```

#![warn(missing_docs)]
#![warn(clippy::all)]

pub mod error;

// Host substrate
pub mod interp;
pub mod ir;
pub mod loops;

// Analysis
pub mod affine;
pub mod dependence;

// Algorithms
pub mod search;
pub mod solver;
pub mod synthesis;

// Driver
pub mod pass;

// Re-exports for convenience
pub use error::{PolytopeError, Result};
pub use pass::{PolytopePass, PreservedAnalyses, parse_pass_name};
