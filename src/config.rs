// src/config.rs

use serde::{Deserialize, Serialize};

use crate::error::{PcaError, Result};

/// Default number of power iterations for the randomized solver.
pub const DEFAULT_POWER_ITERATIONS: usize = 2;

/// Strategy used to obtain the spectrum of the centered data.
///
/// All exact solvers produce the same eigenvalues and the same component
/// subspaces; they differ only in cost and numerical behavior.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub enum Solver {
    /// `Covariance` when `n_features <= n_samples`, `Gram` otherwise.
    #[default]
    Auto,
    /// Eigendecomposition of the D×D covariance matrix `(XᵗX)/(N−1)`.
    Covariance,
    /// Eigendecomposition of the N×N Gram matrix `(XXᵗ)/(N−1)`, with the
    /// eigenvectors mapped back into feature space.
    Gram,
    /// Singular value decomposition of the centered data matrix.
    Svd,
    /// Randomized SVD (Halko, Martinsson & Tropp, 2011).
    ///
    /// `oversamples == 0` selects an adaptive oversampling of roughly 10% of
    /// the requested components, clamped to `[5, 20]`. Any other value is
    /// raised to at least 4. The sketch never exceeds `min(N, D)` columns.
    Randomized {
        oversamples: usize,
        power_iterations: usize,
        seed: u64,
    },
}

impl Solver {
    /// Randomized solver with adaptive oversampling and the default number of
    /// power iterations.
    pub fn randomized(seed: u64) -> Self {
        Solver::Randomized {
            oversamples: 0,
            power_iterations: DEFAULT_POWER_ITERATIONS,
            seed,
        }
    }

    /// Replaces `Auto` with the concrete exact solver for the given shape.
    pub fn resolve(self, n_samples: usize, n_features: usize) -> Self {
        match self {
            Solver::Auto if n_features <= n_samples => Solver::Covariance,
            Solver::Auto => Solver::Gram,
            other => other,
        }
    }

    /// Whether the solver produces the exact spectrum (up to round-off).
    pub fn is_exact(&self) -> bool {
        !matches!(self, Solver::Randomized { .. })
    }
}

/// Parameters for [`crate::pca::fit_with_config`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct PcaConfig {
    /// Number of components to keep. `None` keeps `min(n_samples, n_features)`.
    pub n_components: Option<usize>,
    /// Decomposition strategy.
    pub solver: Solver,
}

impl PcaConfig {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_components(mut self, n_components: usize) -> Self {
        self.n_components = Some(n_components);
        self
    }

    pub fn with_solver(mut self, solver: Solver) -> Self {
        self.solver = solver;
        self
    }

    /// Checks the configuration against a data shape and returns the number of
    /// components to compute.
    ///
    /// # Errors
    /// `InvalidInput` if there are fewer than 2 samples or if the requested
    /// component count lies outside `[1, min(n_samples, n_features)]`.
    pub fn resolve_components(&self, n_samples: usize, n_features: usize) -> Result<usize> {
        if n_samples < 2 {
            return Err(PcaError::invalid(format!(
                "PCA needs at least 2 samples, got {}",
                n_samples
            )));
        }
        let max_rank = n_samples.min(n_features);
        match self.n_components {
            None => Ok(max_rank),
            Some(k) if k >= 1 && k <= max_rank => Ok(k),
            Some(k) => Err(PcaError::invalid(format!(
                "number of components must lie in [1, {}] for a {}x{} matrix, got {}",
                max_rank, n_samples, n_features, k
            ))),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_auto_resolution() {
        assert_eq!(Solver::Auto.resolve(10, 3), Solver::Covariance);
        assert_eq!(Solver::Auto.resolve(3, 3), Solver::Covariance);
        assert_eq!(Solver::Auto.resolve(3, 10), Solver::Gram);
        assert_eq!(Solver::Svd.resolve(3, 10), Solver::Svd);
        assert!(!Solver::randomized(7).is_exact());
    }

    #[test]
    fn test_resolve_components() {
        let config = PcaConfig::default();
        assert_eq!(config.resolve_components(5, 3).unwrap(), 3);
        assert_eq!(config.resolve_components(2, 7).unwrap(), 2);
        assert!(config.resolve_components(1, 3).is_err());

        assert_eq!(config.with_components(2).resolve_components(5, 3).unwrap(), 2);
        assert!(matches!(
            config.with_components(0).resolve_components(5, 3),
            Err(PcaError::InvalidInput(_))
        ));
        assert!(matches!(
            config.with_components(4).resolve_components(5, 3),
            Err(PcaError::InvalidInput(_))
        ));
    }
}
