// src/error.rs

use thiserror::Error;

/// Errors surfaced by the PCA engine.
///
/// Every failure is reported to the caller immediately; no operation returns
/// partial results.
#[derive(Error, Debug, Clone, PartialEq)]
pub enum PcaError {
    /// Malformed or undersized matrix, out-of-range component count,
    /// non-finite values, or an argument outside its documented domain.
    #[error("invalid input: {0}")]
    InvalidInput(String),

    /// Shape incompatibility between a matrix and a component set or mean vector.
    #[error("dimension mismatch in {context}: expected {expected}, found {found}")]
    DimensionMismatch {
        context: &'static str,
        expected: usize,
        found: usize,
    },

    /// The linear-algebra backend failed (e.g. the eigensolver did not converge).
    #[error("decomposition failed: {0}")]
    Decomposition(String),
}

impl PcaError {
    pub(crate) fn invalid(msg: impl Into<String>) -> Self {
        PcaError::InvalidInput(msg.into())
    }

    pub(crate) fn mismatch(context: &'static str, expected: usize, found: usize) -> Self {
        PcaError::DimensionMismatch {
            context,
            expected,
            found,
        }
    }
}

pub type Result<T> = std::result::Result<T, PcaError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_error_messages() {
        let err = PcaError::mismatch("transform columns", 3, 4);
        assert_eq!(
            err.to_string(),
            "dimension mismatch in transform columns: expected 3, found 4"
        );
        let err = PcaError::invalid("k must be at least 1");
        assert_eq!(err.to_string(), "invalid input: k must be at least 1");
    }
}
