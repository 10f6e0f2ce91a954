//! Error types for the polytope crate.

use thiserror::Error;

/// Main error type for polytope operations.
///
/// Every variant except `ShapeMismatch` and `Eval` is a decline: the pass
/// catches it, leaves the IR untouched and reports all analyses preserved.
#[derive(Debug, Error)]
#[allow(missing_docs)] // Error variant fields are self-documenting via #[error] attribute
pub enum PolytopeError {
    /// The loop is not an analyzable perfect two-deep nest.
    #[error("Unsupported nest: {reason}")]
    UnsupportedNest { reason: String },

    /// A bound or subscript expression falls outside the affine grammar.
    #[error("Non-affine expression: {what}")]
    NonAffine { what: String },

    /// The nest carries no inner-dimension dependence; nothing to break.
    #[error("No loop-carried dependence in the inner dimension")]
    NoDependence,

    /// The generator walk exhausted its depth budget without a candidate.
    #[error("No admissible transformation found within depth {depth}")]
    NoTransformation { depth: u32 },

    /// An IR handle the synthesizer relies on is absent.
    #[error("Missing IR structure: {what}")]
    MissingIr { what: String },

    /// Matrix/vector dimensions do not line up for a kernel operation.
    #[error("Shape mismatch in {op}: {details}")]
    ShapeMismatch { op: &'static str, details: String },

    /// The reference evaluator hit an unevaluable state.
    #[error("Evaluation error: {reason}")]
    Eval { reason: String },
}

impl PolytopeError {
    /// True for the error kinds that merely decline the current loop.
    pub fn is_decline(&self) -> bool {
        !matches!(
            self,
            PolytopeError::ShapeMismatch { .. } | PolytopeError::Eval { .. }
        )
    }
}

/// Result type alias for polytope operations.
pub type Result<T> = std::result::Result<T, PolytopeError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_error_variants_display() {
        let test_cases: Vec<(PolytopeError, &[&str])> = vec![
            (
                PolytopeError::UnsupportedNest {
                    reason: "nest depth 3".to_string(),
                },
                &["Unsupported nest", "depth 3"],
            ),
            (
                PolytopeError::NonAffine {
                    what: "mul of two induction variables".to_string(),
                },
                &["Non-affine", "induction variables"],
            ),
            (PolytopeError::NoDependence, &["No loop-carried dependence"]),
            (
                PolytopeError::NoTransformation { depth: 5 },
                &["No admissible transformation", "depth 5"],
            ),
            (
                PolytopeError::MissingIr {
                    what: "outer latch terminator".to_string(),
                },
                &["Missing IR", "outer latch terminator"],
            ),
            (
                PolytopeError::ShapeMismatch {
                    op: "multiply",
                    details: "2x3 by 2x2".to_string(),
                },
                &["Shape mismatch", "multiply", "2x3 by 2x2"],
            ),
        ];

        for (err, expected_substrings) in test_cases {
            let msg = err.to_string();
            for substring in expected_substrings {
                assert!(
                    msg.contains(substring),
                    "Error message '{msg}' should contain '{substring}'"
                );
            }
        }
    }

    #[test]
    fn test_decline_classification() {
        assert!(PolytopeError::NoDependence.is_decline());
        assert!(
            PolytopeError::UnsupportedNest {
                reason: String::new()
            }
            .is_decline()
        );
        assert!(
            !PolytopeError::ShapeMismatch {
                op: "det",
                details: String::new()
            }
            .is_decline()
        );
    }
}
