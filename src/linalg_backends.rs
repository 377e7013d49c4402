// src/linalg_backends.rs

use ndarray::{Array1, Array2};
use ndarray_linalg::{Eigh as NdLinalgEigh, JobSvd, SVDDCInto as NdLinalgSVDDCInto, QR as NdLinalgQR, UPLO};
use std::error::Error;

/// Errors crossing the backend seam.
pub type BackendError = Box<dyn Error + Send + Sync>;

/// Output of a symmetric eigendecomposition.
#[derive(Debug)]
pub struct EighOutput<F: 'static> {
    /// Eigenvalues, typically sorted in ascending order.
    pub eigenvalues: Array1<F>,
    /// Eigenvectors as columns of the matrix.
    /// eigenvectors.column(i) corresponds to eigenvalues[i].
    pub eigenvectors: Array2<F>,
}

/// Symmetric eigendecomposition (LAPACK `?syevd`-style).
/// Implementers may assume `matrix` is symmetric and read only its upper triangle.
pub trait BackendEigh<F: 'static + Copy + Send + Sync> {
    fn eigh_upper(&self, matrix: &Array2<F>) -> Result<EighOutput<F>, BackendError>;
}

/// QR decomposition, returning only the thin Q factor.
pub trait BackendQR<F: 'static + Copy + Send + Sync> {
    fn qr_q_factor(&self, matrix: &Array2<F>) -> Result<Array2<F>, BackendError>;
}

/// Output of a Singular Value Decomposition.
#[derive(Debug)]
pub struct SVDOutput<F: 'static> {
    pub u: Option<Array2<F>>,
    /// Singular values in descending order.
    pub s: Array1<F>,
    pub vt: Option<Array2<F>>,
}

/// Thin Singular Value Decomposition consuming its input: for an m×n matrix,
/// `u` is m×min(m,n) and `vt` is min(m,n)×n.
pub trait BackendSVD<F: 'static + Copy + Send + Sync> {
    fn svd_into(
        &self,
        matrix: Array2<F>,
        compute_u: bool,
        compute_v: bool,
    ) -> Result<SVDOutput<F>, BackendError>;
}

/// Everything the PCA solvers need from a backend.
pub trait LinAlgBackend: BackendEigh<f64> + BackendQR<f64> + BackendSVD<f64> {}

impl<T> LinAlgBackend for T where T: BackendEigh<f64> + BackendQR<f64> + BackendSVD<f64> {}

/// LAPACK-backed implementation through `ndarray-linalg`. The LAPACK provider
/// (OpenBLAS or MKL, static or system) is picked with Cargo features.
#[derive(Debug, Default, Copy, Clone)]
pub struct NdarrayLinAlgBackend;

fn to_dyn_error<E: Error + Send + Sync + 'static>(e: E) -> BackendError {
    Box::new(e)
}

impl BackendEigh<f64> for NdarrayLinAlgBackend {
    fn eigh_upper(&self, matrix: &Array2<f64>) -> Result<EighOutput<f64>, BackendError> {
        if matrix.nrows() != matrix.ncols() {
            return Err(format!(
                "matrix must be square for eigendecomposition, got {}x{}",
                matrix.nrows(),
                matrix.ncols()
            )
            .into());
        }
        let (eigenvalues, eigenvectors) = matrix.eigh(UPLO::Upper).map_err(to_dyn_error)?;
        Ok(EighOutput {
            eigenvalues,
            eigenvectors,
        })
    }
}

impl BackendQR<f64> for NdarrayLinAlgBackend {
    fn qr_q_factor(&self, matrix: &Array2<f64>) -> Result<Array2<f64>, BackendError> {
        let (q_factor, _r) = matrix.qr().map_err(to_dyn_error)?;
        Ok(q_factor)
    }
}

impl BackendSVD<f64> for NdarrayLinAlgBackend {
    fn svd_into(
        &self,
        matrix: Array2<f64>,
        compute_u: bool,
        compute_v: bool,
    ) -> Result<SVDOutput<f64>, BackendError> {
        let job = if compute_u || compute_v {
            JobSvd::Some
        } else {
            JobSvd::None
        };
        let (u, s, vt) = matrix.svddc_into(job).map_err(to_dyn_error)?;
        Ok(SVDOutput {
            u: u.filter(|_| compute_u),
            s,
            vt: vt.filter(|_| compute_v),
        })
    }
}
