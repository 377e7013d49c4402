// src/diagnostics.rs

use ndarray::{Array2, ArrayView2};
use serde::{Deserialize, Serialize};

use crate::error::{PcaError, Result};
use crate::matrix::DataMatrix;
use crate::pca::{ComponentSet, PcaModel, Reconstruction};

/// Frobenius norm `sqrt(sum of squared entries)`.
pub fn frobenius_norm(matrix: ArrayView2<'_, f64>) -> f64 {
    matrix.fold(0.0, |acc, v| acc + v * v).sqrt()
}

/// `||I - VᵗV||_F` for a component set; zero for a perfectly orthonormal set.
pub fn orthogonality_error(components: &ComponentSet) -> f64 {
    let loadings = components.loadings();
    let gram = loadings.t().dot(loadings);
    let identity = Array2::<f64>::eye(gram.nrows());
    frobenius_norm((&identity - &gram).view())
}

/// Sum of squared differences between the original data and a reconstruction.
///
/// # Errors
/// `DimensionMismatch` if the shapes differ.
pub fn reconstruction_error(original: &DataMatrix, reconstruction: &Reconstruction) -> Result<f64> {
    let approximation = reconstruction.values();
    if approximation.nrows() != original.nrows() {
        return Err(PcaError::mismatch(
            "reconstruction error: rows",
            original.nrows(),
            approximation.nrows(),
        ));
    }
    if approximation.ncols() != original.ncols() {
        return Err(PcaError::mismatch(
            "reconstruction error: columns",
            original.ncols(),
            approximation.ncols(),
        ));
    }
    let residual = original.as_array() - approximation;
    Ok(residual.fold(0.0, |acc, v| acc + v * v))
}

/// Summary of a fitted model's numerical quality on a given data set.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FitDiagnostics {
    pub n_samples: usize,
    pub n_features: usize,
    pub n_components: usize,
    /// `||I - VᵗV||_F`.
    pub orthogonality_error: f64,
    /// Sum of squared reconstruction errors using all retained components.
    pub reconstruction_sse: f64,
    /// `||X - X̂||_F / ||X - mean||_F`; zero for constant data.
    pub relative_reconstruction_error: f64,
    /// Cumulative explained-variance ratio of the retained components.
    pub retained_variance_ratio: f64,
}

impl FitDiagnostics {
    /// Projects and reconstructs `data` with `model` and measures the result.
    pub fn compute(data: &DataMatrix, model: &PcaModel) -> Result<Self> {
        let scores = model.transform(data)?;
        let reconstruction = model.reconstruct(&scores)?;
        let reconstruction_sse = reconstruction_error(data, &reconstruction)?;

        let centered = data.centered(model.column_means())?;
        let centered_norm = frobenius_norm(centered.view());
        let relative_reconstruction_error = if centered_norm > 0.0 {
            reconstruction_sse.sqrt() / centered_norm
        } else {
            0.0
        };

        Ok(Self {
            n_samples: data.nrows(),
            n_features: data.ncols(),
            n_components: model.n_components(),
            orthogonality_error: orthogonality_error(model.components()),
            reconstruction_sse,
            relative_reconstruction_error,
            retained_variance_ratio: model
                .explained_variance_ratio()
                .last()
                .copied()
                .unwrap_or(0.0),
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::pca::fit;
    use approx::assert_abs_diff_eq;
    use ndarray::array;

    #[test]
    fn test_frobenius_norm() {
        assert_abs_diff_eq!(
            frobenius_norm(array![[3.0, 0.0], [0.0, 4.0]].view()),
            5.0,
            epsilon = 1e-12
        );
    }

    #[test]
    fn test_full_rank_diagnostics() {
        let data = DataMatrix::new(array![
            [2.5, 2.4, 0.5],
            [0.5, 0.7, 1.5],
            [2.2, 2.9, 0.1],
            [1.9, 2.2, 0.9],
            [3.1, 3.0, 0.3]
        ])
        .unwrap();
        let model = fit(&data, None).unwrap();
        let report = FitDiagnostics::compute(&data, &model).unwrap();

        assert_eq!(report.n_samples, 5);
        assert_eq!(report.n_features, 3);
        assert_eq!(report.n_components, 3);
        assert!(report.orthogonality_error < 1e-10);
        assert!(report.reconstruction_sse < 1e-12);
        assert_abs_diff_eq!(report.retained_variance_ratio, 1.0, epsilon = 1e-10);

        let json = serde_json::to_string(&report).unwrap();
        let parsed: FitDiagnostics = serde_json::from_str(&json).unwrap();
        assert_eq!(parsed.n_components, 3);
    }

    #[test]
    fn test_reconstruction_error_shape_mismatch() {
        let data = DataMatrix::new(array![[1.0, 2.0], [3.0, 4.0]]).unwrap();
        let model = fit(&data, None).unwrap();
        let other = DataMatrix::new(array![[1.0, 2.0], [3.0, 4.0], [5.0, 6.0]]).unwrap();
        let scores = model.transform(&other).unwrap();
        let reconstruction = model.reconstruct(&scores).unwrap();
        assert!(matches!(
            reconstruction_error(&data, &reconstruction),
            Err(PcaError::DimensionMismatch { .. })
        ));
    }
}
