//! Error type shared by the geometry and optimizer layers

use thiserror::Error;

use crate::cma::Termination;

/// Convenience alias used throughout the crate
pub type Result<T> = std::result::Result<T, MofError>;

#[derive(Debug, Clone, PartialEq, Error)]
pub enum MofError {
    /// A frame row had (numerically) zero norm, so neither scale nor phase is defined
    #[error("frame vector {index} has zero norm")]
    ZeroVector { index: usize },

    #[error("non-finite value encountered in {what}")]
    NonFinite { what: &'static str },

    #[error("shape mismatch: expected {expected:?}, got {found:?}")]
    ShapeMismatch {
        expected: (usize, usize),
        found: (usize, usize),
    },

    #[error("dimension mismatch: expected {expected}, got {found}")]
    DimensionMismatch { expected: usize, found: usize },

    /// Two factors are orthogonal in C^d, i.e. antipodal in CP^{d-1}
    #[error("factor {factor} is antipodal to its target (|<p,q>| = {overlap:.3e})")]
    Antipodal { factor: usize, overlap: f64 },

    /// Retraction landed on the origin; only possible for non-tangent input
    #[error("retraction of factor {factor} collapsed to the zero vector")]
    DegenerateRetraction { factor: usize },

    #[error("matrix must be square, got {rows}x{cols}")]
    NotSquare { rows: usize, cols: usize },

    #[error("Jacobi eigensolver did not converge after {sweeps} sweeps")]
    EigenNoConvergence { sweeps: usize },

    #[error("basis is rank deficient: found {found} independent vectors, expected {expected}")]
    RankDeficient { found: usize, expected: usize },

    #[error("invalid configuration: {0}")]
    InvalidConfig(String),

    /// Every candidate of a generation failed to evaluate
    #[error("energy evaluation failed for the whole population: {0}")]
    Energy(String),

    #[error("optimizer already terminated ({0})")]
    Terminated(Termination),
}

impl MofError {
    /// Tags a single-factor geometry error with the factor it came from
    pub(crate) fn at_factor(self, index: usize) -> Self {
        match self {
            MofError::Antipodal { overlap, .. } => MofError::Antipodal {
                factor: index,
                overlap,
            },
            MofError::DegenerateRetraction { .. } => {
                MofError::DegenerateRetraction { factor: index }
            }
            other => other,
        }
    }

    /// Geometry failures that signal an unstable step rather than bad input
    pub fn is_degenerate_geometry(&self) -> bool {
        matches!(
            self,
            MofError::Antipodal { .. } | MofError::DegenerateRetraction { .. }
        )
    }
}
