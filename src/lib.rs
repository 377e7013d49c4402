// Principal component analysis (PCA)

#![doc = include_str!("../README.md")]

pub mod config;
pub mod diagnostics;
pub mod error;
pub mod labels;
pub mod linalg_backends;
pub mod matrix;
pub mod pca;

pub use config::{PcaConfig, Solver};
pub use diagnostics::{frobenius_norm, orthogonality_error, reconstruction_error, FitDiagnostics};
pub use error::{PcaError, Result};
pub use labels::{LabeledMatrix, SampleLabels, SampleMetadata};
pub use matrix::{DataMatrix, Standardized};
pub use pca::{
    components_for_variance, explained_variance_ratio, fit, fit_array, fit_transform,
    fit_with_backend, fit_with_config, reconstruct, transform, ColumnMeans, ComponentSet,
    ExplainedVariance, PcaModel, ProjectedScores, Reconstruction,
};
