// src/matrix.rs

use ndarray::{Array1, Array2, ArrayView1, ArrayView2, Axis};
use rayon::prelude::*;
use serde::Serialize;

use crate::error::{PcaError, Result};
use crate::pca::{ColumnMeans, Reconstruction};

/// Standard deviations at or below this value are treated as a constant column.
const SCALE_SANITIZATION_THRESHOLD: f64 = 1e-9;

/// An immutable, validated N×D matrix of observations (rows) by features (columns).
///
/// Construction checks that both dimensions are non-zero and that every entry is
/// finite, so downstream code never has to re-validate. No mutable access to the
/// underlying array is exposed.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct DataMatrix {
    values: Array2<f64>,
}

impl DataMatrix {
    /// Wraps `values`, rejecting empty shapes and non-finite entries.
    pub fn new(values: Array2<f64>) -> Result<Self> {
        let (n_rows, n_cols) = values.dim();
        if n_rows == 0 || n_cols == 0 {
            return Err(PcaError::invalid(format!(
                "data matrix must have at least one row and one column, got {}x{}",
                n_rows, n_cols
            )));
        }

        let has_non_finite = values
            .axis_iter(Axis(1))
            .into_par_iter()
            .any(|column| column.iter().any(|v| !v.is_finite()));
        if has_non_finite {
            // Locate the first offending entry for the message; only reached on failure.
            let position = values
                .indexed_iter()
                .find(|(_, v)| !v.is_finite())
                .map(|((r, c), v)| format!("({}, {}) = {}", r, c, v))
                .unwrap_or_default();
            return Err(PcaError::invalid(format!(
                "data matrix contains a non-finite value at {}",
                position
            )));
        }

        Ok(Self { values })
    }

    /// Builds a matrix from row-major values.
    pub fn from_shape_vec(n_rows: usize, n_cols: usize, values: Vec<f64>) -> Result<Self> {
        let array = Array2::from_shape_vec((n_rows, n_cols), values).map_err(|e| {
            PcaError::invalid(format!(
                "cannot build a {}x{} matrix from the supplied values: {}",
                n_rows, n_cols, e
            ))
        })?;
        Self::new(array)
    }

    /// Copies a borrowed view into a validated matrix.
    pub fn from_view(view: ArrayView2<'_, f64>) -> Result<Self> {
        Self::new(view.to_owned())
    }

    pub fn nrows(&self) -> usize {
        self.values.nrows()
    }

    pub fn ncols(&self) -> usize {
        self.values.ncols()
    }

    /// `(n_rows, n_cols)`.
    pub fn dim(&self) -> (usize, usize) {
        self.values.dim()
    }

    pub fn view(&self) -> ArrayView2<'_, f64> {
        self.values.view()
    }

    pub fn as_array(&self) -> &Array2<f64> {
        &self.values
    }

    pub fn into_inner(self) -> Array2<f64> {
        self.values
    }

    pub fn row(&self, index: usize) -> ArrayView1<'_, f64> {
        self.values.row(index)
    }

    /// Per-column means.
    pub fn column_means(&self) -> ColumnMeans {
        // Non-empty by construction, so the mean always exists.
        let means = self
            .values
            .mean_axis(Axis(0))
            .unwrap_or_else(|| Array1::zeros(self.ncols()));
        ColumnMeans::from_validated(means)
    }

    /// Returns `self - means`, broadcast per column, as a fresh array.
    pub fn centered(&self, means: &ColumnMeans) -> Result<Array2<f64>> {
        if means.len() != self.ncols() {
            return Err(PcaError::mismatch(
                "centering: column means length vs data columns",
                self.ncols(),
                means.len(),
            ));
        }
        let mut centered = self.values.clone();
        centered -= means.values();
        Ok(centered)
    }

    /// Centers every column and scales it to unit sample variance (ddof = 1).
    ///
    /// This is the explicit, opt-in preprocessing step; `fit` never scales
    /// implicitly. Columns whose standard deviation is effectively zero keep a
    /// scale of `1.0`, so they come out as all zeros.
    pub fn standardize(&self) -> Result<Standardized> {
        if self.nrows() < 2 {
            return Err(PcaError::invalid(format!(
                "standardization needs at least 2 rows to estimate variance, got {}",
                self.nrows()
            )));
        }

        let mut scaled = self.values.clone();
        let column_stats: Vec<(f64, f64)> = scaled
            .axis_iter_mut(Axis(1))
            .into_par_iter()
            .map(|mut column| {
                let mean = column.mean().unwrap_or(0.0);
                column.mapv_inplace(|v| v - mean);
                let sd = column.std(1.0);
                let scale = if sd.is_finite() && sd > SCALE_SANITIZATION_THRESHOLD {
                    sd
                } else {
                    1.0
                };
                column.mapv_inplace(|v| v / scale);
                (mean, scale)
            })
            .collect();

        let means: Array1<f64> = column_stats.iter().map(|(m, _)| *m).collect();
        let scales: Array1<f64> = column_stats.iter().map(|(_, s)| *s).collect();

        Ok(Standardized {
            matrix: DataMatrix::new(scaled)?,
            means: ColumnMeans::from_validated(means),
            scales,
        })
    }
}

impl TryFrom<Array2<f64>> for DataMatrix {
    type Error = PcaError;

    fn try_from(values: Array2<f64>) -> Result<Self> {
        Self::new(values)
    }
}

/// Output of [`DataMatrix::standardize`]: the scaled matrix plus the
/// per-column statistics needed to map results back to original units.
#[derive(Debug, Clone)]
pub struct Standardized {
    matrix: DataMatrix,
    means: ColumnMeans,
    scales: Array1<f64>,
}

impl Standardized {
    pub fn matrix(&self) -> &DataMatrix {
        &self.matrix
    }

    pub fn means(&self) -> &ColumnMeans {
        &self.means
    }

    /// Per-column scale factors; always strictly positive.
    pub fn scales(&self) -> &Array1<f64> {
        &self.scales
    }

    pub fn into_matrix(self) -> DataMatrix {
        self.matrix
    }

    /// Maps a reconstruction computed in standardized units back to the
    /// original units: `values * scales + means`.
    pub fn destandardize(&self, reconstruction: &Reconstruction) -> Result<Reconstruction> {
        let values = reconstruction.values();
        if values.ncols() != self.scales.len() {
            return Err(PcaError::mismatch(
                "destandardize: reconstruction columns vs scale factors",
                self.scales.len(),
                values.ncols(),
            ));
        }
        let mut restored = values * &self.scales;
        restored += self.means.values();
        Ok(Reconstruction::from_array(restored))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use approx::assert_abs_diff_eq;
    use ndarray::array;

    #[test]
    fn test_rejects_non_finite_values() {
        let err = DataMatrix::new(array![[1.0, f64::NAN], [2.0, 3.0]]).unwrap_err();
        assert!(matches!(err, PcaError::InvalidInput(ref msg) if msg.contains("(0, 1)")));

        let err = DataMatrix::new(array![[1.0, 2.0], [f64::INFINITY, 3.0]]).unwrap_err();
        assert!(matches!(err, PcaError::InvalidInput(_)));
    }

    #[test]
    fn test_rejects_empty_shapes() {
        assert!(DataMatrix::new(Array2::zeros((0, 3))).is_err());
        assert!(DataMatrix::new(Array2::zeros((3, 0))).is_err());
        assert!(DataMatrix::from_shape_vec(2, 2, vec![1.0, 2.0, 3.0]).is_err());
    }

    #[test]
    fn test_column_means_and_centering() {
        let data = DataMatrix::new(array![[1.0, 10.0], [3.0, 20.0], [5.0, 30.0]]).unwrap();
        let means = data.column_means();
        assert_abs_diff_eq!(means.values(), &array![3.0, 20.0], epsilon = 1e-12);

        let centered = data.centered(&means).unwrap();
        assert_abs_diff_eq!(
            centered,
            array![[-2.0, -10.0], [0.0, 0.0], [2.0, 10.0]],
            epsilon = 1e-12
        );
        for column in centered.columns() {
            assert_abs_diff_eq!(column.sum(), 0.0, epsilon = 1e-12);
        }
    }

    #[test]
    fn test_standardize_unit_variance_and_constant_column() {
        let data = DataMatrix::new(array![
            [1.0, 4.0, 7.0],
            [2.0, 4.0, 1.0],
            [3.0, 4.0, 5.0],
            [6.0, 4.0, 3.0]
        ])
        .unwrap();
        let standardized = data.standardize().unwrap();

        assert_abs_diff_eq!(standardized.scales()[1], 1.0, epsilon = 1e-12);
        let scaled = standardized.matrix().as_array();
        for (j, column) in scaled.columns().into_iter().enumerate() {
            assert_abs_diff_eq!(column.mean().unwrap(), 0.0, epsilon = 1e-12);
            if j == 1 {
                assert!(column.iter().all(|v| v.abs() < 1e-12));
            } else {
                assert_abs_diff_eq!(column.std(1.0), 1.0, epsilon = 1e-12);
            }
        }

        let round_trip = standardized
            .destandardize(&Reconstruction::from_array(scaled.clone()))
            .unwrap();
        assert_abs_diff_eq!(round_trip.values(), data.as_array(), epsilon = 1e-12);
    }

    #[test]
    fn test_standardize_needs_two_rows() {
        let data = DataMatrix::new(array![[1.0, 2.0]]).unwrap();
        assert!(matches!(
            data.standardize(),
            Err(PcaError::InvalidInput(_))
        ));
    }
}
