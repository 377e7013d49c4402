// Principal component analysis (PCA)

use log::{debug, info, trace, warn};
use ndarray::{s, Array1, Array2, ArrayView1, ArrayView2, Axis};
use rand::{Rng, SeedableRng};
use rand_chacha::ChaCha8Rng;
use rand_distr::Normal;
use serde::{Deserialize, Serialize};
use std::cmp::Ordering;
use std::time::Instant;

use crate::config::{PcaConfig, Solver};
use crate::error::{PcaError, Result};
use crate::linalg_backends::{BackendError, EighOutput, LinAlgBackend, NdarrayLinAlgBackend, SVDOutput};
use crate::matrix::DataMatrix;

/// Largest tolerated deviation of `VᵗV` from the identity when a component set
/// is supplied from outside the crate.
const ORTHONORMALITY_TOLERANCE: f64 = 1e-6;
/// Threshold for a vector norm to be considered non-zero.
const NORMALIZATION_THRESHOLD: f64 = 1e-9;
/// A column keeping less than this fraction of its norm after being
/// orthogonalized against the preceding columns is treated as dependent.
const DEPENDENT_COLUMN_RESIDUAL: f64 = 1e-6;
/// Relative slack for round-off when comparing eigenvalue sums with a total.
const VARIANCE_SUM_TOLERANCE: f64 = 1e-9;

// Adaptive oversampling bounds for the randomized solver (Halko et al.).
const RANDOMIZED_ADAPTIVE_P_LOWER_BOUND: usize = 5;
const RANDOMIZED_ADAPTIVE_P_UPPER_BOUND: usize = 20;
const RANDOMIZED_MINIMUM_P_FLOOR: usize = 4;

// --- Value types ---

/// Ordered set of K orthonormal loading vectors, stored as the columns of a
/// D×K matrix and ranked by descending explained variance.
///
/// The sign of each column is not uniquely determined by the decomposition.
/// Components produced by `fit` are oriented so that the entry with the
/// largest magnitude in each column is positive.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(try_from = "Array2<f64>", into = "Array2<f64>")]
pub struct ComponentSet {
    loadings: Array2<f64>,
}

impl ComponentSet {
    /// Wraps an externally computed D×K loading matrix.
    ///
    /// # Errors
    /// `InvalidInput` if the matrix is empty, has more columns than rows,
    /// contains non-finite values, or its columns are not orthonormal.
    pub fn new(loadings: Array2<f64>) -> Result<Self> {
        let (n_features, n_components) = loadings.dim();
        if n_features == 0 || n_components == 0 {
            return Err(PcaError::invalid(format!(
                "component set must be non-empty, got {}x{}",
                n_features, n_components
            )));
        }
        if n_components > n_features {
            return Err(PcaError::invalid(format!(
                "cannot have {} orthonormal components in {} dimensions",
                n_components, n_features
            )));
        }
        if loadings.iter().any(|v| !v.is_finite()) {
            return Err(PcaError::invalid("component set contains non-finite values"));
        }
        let deviation = max_identity_deviation(loadings.view());
        if deviation > ORTHONORMALITY_TOLERANCE {
            return Err(PcaError::invalid(format!(
                "components are not orthonormal (max |VᵗV - I| = {:e})",
                deviation
            )));
        }
        Ok(Self { loadings })
    }

    pub(crate) fn from_validated(loadings: Array2<f64>) -> Self {
        Self { loadings }
    }

    /// Feature dimension D (rows of the loading matrix).
    pub fn n_features(&self) -> usize {
        self.loadings.nrows()
    }

    /// Number of components K.
    pub fn n_components(&self) -> usize {
        self.loadings.ncols()
    }

    /// The D×K loading matrix.
    pub fn loadings(&self) -> &Array2<f64> {
        &self.loadings
    }

    /// Loading vector of component `index`, or `None` if out of range.
    pub fn component(&self, index: usize) -> Option<ArrayView1<'_, f64>> {
        (index < self.n_components()).then(|| self.loadings.column(index))
    }

    pub fn into_inner(self) -> Array2<f64> {
        self.loadings
    }

    fn truncated(&self, k: usize) -> Self {
        Self::from_validated(self.loadings.slice(s![.., ..k]).to_owned())
    }
}

impl TryFrom<Array2<f64>> for ComponentSet {
    type Error = PcaError;

    fn try_from(loadings: Array2<f64>) -> Result<Self> {
        Self::new(loadings)
    }
}

impl From<ComponentSet> for Array2<f64> {
    fn from(components: ComponentSet) -> Self {
        components.loadings
    }
}

/// Per-component variances (eigenvalues of the covariance matrix),
/// non-negative and non-increasing.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(try_from = "Array1<f64>", into = "Array1<f64>")]
pub struct ExplainedVariance {
    values: Array1<f64>,
}

impl ExplainedVariance {
    /// # Errors
    /// `InvalidInput` if empty, non-finite, negative, or increasing anywhere.
    pub fn new(values: Array1<f64>) -> Result<Self> {
        if values.is_empty() {
            return Err(PcaError::invalid("explained variance must not be empty"));
        }
        if values.iter().any(|v| !v.is_finite() || *v < 0.0) {
            return Err(PcaError::invalid(
                "explained variance values must be finite and non-negative",
            ));
        }
        if let Some(i) = (1..values.len()).find(|&i| values[i] > values[i - 1]) {
            return Err(PcaError::invalid(format!(
                "explained variance must be non-increasing, but value {} ({}) exceeds value {} ({})",
                i,
                values[i],
                i - 1,
                values[i - 1]
            )));
        }
        Ok(Self { values })
    }

    pub(crate) fn from_validated(values: Array1<f64>) -> Self {
        Self { values }
    }

    pub fn values(&self) -> &Array1<f64> {
        &self.values
    }

    pub fn len(&self) -> usize {
        self.values.len()
    }

    pub fn is_empty(&self) -> bool {
        self.values.is_empty()
    }

    /// Sum of the retained eigenvalues.
    pub fn sum(&self) -> f64 {
        self.values.sum()
    }

    pub fn into_inner(self) -> Array1<f64> {
        self.values
    }
}

impl TryFrom<Array1<f64>> for ExplainedVariance {
    type Error = PcaError;

    fn try_from(values: Array1<f64>) -> Result<Self> {
        Self::new(values)
    }
}

impl From<ExplainedVariance> for Array1<f64> {
    fn from(variance: ExplainedVariance) -> Self {
        variance.values
    }
}

/// Per-column means of the data a model was fitted on.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(try_from = "Array1<f64>", into = "Array1<f64>")]
pub struct ColumnMeans {
    values: Array1<f64>,
}

impl ColumnMeans {
    pub fn new(values: Array1<f64>) -> Result<Self> {
        if values.is_empty() {
            return Err(PcaError::invalid("column means must not be empty"));
        }
        if values.iter().any(|v| !v.is_finite()) {
            return Err(PcaError::invalid("column means contain non-finite values"));
        }
        Ok(Self { values })
    }

    pub(crate) fn from_validated(values: Array1<f64>) -> Self {
        Self { values }
    }

    pub fn values(&self) -> &Array1<f64> {
        &self.values
    }

    pub fn len(&self) -> usize {
        self.values.len()
    }

    pub fn is_empty(&self) -> bool {
        self.values.is_empty()
    }

    pub fn into_inner(self) -> Array1<f64> {
        self.values
    }
}

impl TryFrom<Array1<f64>> for ColumnMeans {
    type Error = PcaError;

    fn try_from(values: Array1<f64>) -> Result<Self> {
        Self::new(values)
    }
}

impl From<ColumnMeans> for Array1<f64> {
    fn from(means: ColumnMeans) -> Self {
        means.values
    }
}

/// N×K coordinates of observations along the principal axes.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ProjectedScores {
    scores: Array2<f64>,
}

impl ProjectedScores {
    /// Wraps externally supplied scores (e.g. edited or subset scores).
    pub fn new(scores: Array2<f64>) -> Result<Self> {
        if scores.iter().any(|v| !v.is_finite()) {
            return Err(PcaError::invalid("projected scores contain non-finite values"));
        }
        Ok(Self { scores })
    }

    pub fn scores(&self) -> &Array2<f64> {
        &self.scores
    }

    pub fn nrows(&self) -> usize {
        self.scores.nrows()
    }

    pub fn ncols(&self) -> usize {
        self.scores.ncols()
    }

    pub fn into_inner(self) -> Array2<f64> {
        self.scores
    }
}

/// N×D approximation of the original data.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Reconstruction {
    values: Array2<f64>,
}

impl Reconstruction {
    pub(crate) fn from_array(values: Array2<f64>) -> Self {
        Self { values }
    }

    pub fn values(&self) -> &Array2<f64> {
        &self.values
    }

    pub fn into_inner(self) -> Array2<f64> {
        self.values
    }
}

// --- Fitted model ---

/// Result of fitting PCA: components, their variances, the fit-time column
/// means and the total variance of the centered data.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(try_from = "PcaModelRepr")]
pub struct PcaModel {
    components: ComponentSet,
    explained_variance: ExplainedVariance,
    column_means: ColumnMeans,
    total_variance: f64,
    solver: Solver,
    n_samples: usize,
}

#[derive(Deserialize)]
struct PcaModelRepr {
    components: ComponentSet,
    explained_variance: ExplainedVariance,
    column_means: ColumnMeans,
    total_variance: f64,
    solver: Solver,
    n_samples: usize,
}

impl TryFrom<PcaModelRepr> for PcaModel {
    type Error = PcaError;

    fn try_from(repr: PcaModelRepr) -> Result<Self> {
        if repr.explained_variance.len() != repr.components.n_components() {
            return Err(PcaError::mismatch(
                "model: explained variance length vs components",
                repr.components.n_components(),
                repr.explained_variance.len(),
            ));
        }
        if repr.column_means.len() != repr.components.n_features() {
            return Err(PcaError::mismatch(
                "model: column means length vs component features",
                repr.components.n_features(),
                repr.column_means.len(),
            ));
        }
        if repr.n_samples < 2 {
            return Err(PcaError::invalid(format!(
                "model must be fitted on at least 2 samples, got {}",
                repr.n_samples
            )));
        }
        validate_total(repr.explained_variance.sum(), repr.total_variance)?;
        Ok(PcaModel {
            components: repr.components,
            explained_variance: repr.explained_variance,
            column_means: repr.column_means,
            total_variance: repr.total_variance,
            solver: repr.solver,
            n_samples: repr.n_samples,
        })
    }
}

impl PcaModel {
    pub fn components(&self) -> &ComponentSet {
        &self.components
    }

    pub fn explained_variance(&self) -> &ExplainedVariance {
        &self.explained_variance
    }

    pub fn column_means(&self) -> &ColumnMeans {
        &self.column_means
    }

    /// Total variance of the centered training data (trace of the covariance
    /// matrix), i.e. the sum of the full eigenvalue spectrum.
    pub fn total_variance(&self) -> f64 {
        self.total_variance
    }

    /// The concrete solver that produced this model (never `Auto`).
    pub fn solver(&self) -> Solver {
        self.solver
    }

    pub fn n_samples(&self) -> usize {
        self.n_samples
    }

    pub fn n_features(&self) -> usize {
        self.components.n_features()
    }

    pub fn n_components(&self) -> usize {
        self.components.n_components()
    }

    /// Splits the model into `(components, explained variance, column means)`.
    pub fn into_parts(self) -> (ComponentSet, ExplainedVariance, ColumnMeans) {
        (self.components, self.explained_variance, self.column_means)
    }

    /// Projects `data` with this model's components and means.
    pub fn transform(&self, data: &DataMatrix) -> Result<ProjectedScores> {
        transform(data, &self.components, &self.column_means)
    }

    /// Maps scores back to the original feature space.
    pub fn reconstruct(&self, scores: &ProjectedScores) -> Result<Reconstruction> {
        reconstruct(scores, &self.components, &self.column_means)
    }

    /// Cumulative fraction of the total variance explained by the first
    /// 1..=K components.
    pub fn explained_variance_ratio(&self) -> Array1<f64> {
        cumulative_ratio(self.explained_variance.values(), self.total_variance)
    }

    /// Fraction of the total variance explained by each component on its own.
    pub fn component_variance_ratio(&self) -> Array1<f64> {
        if self.total_variance <= 0.0 {
            return Array1::zeros(self.n_components());
        }
        self.explained_variance
            .values()
            .mapv(|v| (v / self.total_variance).clamp(0.0, 1.0))
    }

    /// Smallest number of retained components whose cumulative ratio reaches
    /// `fraction`.
    pub fn components_for_variance(&self, fraction: f64) -> Result<usize> {
        components_for_variance(&self.explained_variance, Some(self.total_variance), fraction)
    }

    /// Returns a copy keeping only the first `k` components.
    pub fn truncate(&self, k: usize) -> Result<PcaModel> {
        if k == 0 || k > self.n_components() {
            return Err(PcaError::invalid(format!(
                "cannot truncate a {}-component model to {} components",
                self.n_components(),
                k
            )));
        }
        debug!("Truncating model from {} to {} components", self.n_components(), k);
        Ok(PcaModel {
            components: self.components.truncated(k),
            explained_variance: ExplainedVariance::from_validated(
                self.explained_variance.values().slice(s![..k]).to_owned(),
            ),
            column_means: self.column_means.clone(),
            total_variance: self.total_variance,
            solver: self.solver,
            n_samples: self.n_samples,
        })
    }
}

// --- Fitting ---

/// Fits PCA with the default solver and returns the fitted model.
///
/// * `data` - N×D observations.
/// * `n_components` - number of components `k` to keep, `1 <= k <= min(N, D)`.
///   `None` keeps all `min(N, D)` components.
///
/// # Errors
/// `InvalidInput` if `data` has fewer than 2 rows or `k` is out of range;
/// `Decomposition` if the eigensolver fails.
///
/// # Examples
///
/// ```
/// use ndarray::array;
/// use pca_engine::{fit, DataMatrix};
///
/// let data = DataMatrix::new(array![[2.0, 0.0], [0.0, 2.0], [-2.0, 0.0], [0.0, -2.0]]).unwrap();
/// let model = fit(&data, Some(2)).unwrap();
/// assert_eq!(model.n_components(), 2);
/// ```
pub fn fit(data: &DataMatrix, n_components: Option<usize>) -> Result<PcaModel> {
    let config = PcaConfig {
        n_components,
        ..PcaConfig::default()
    };
    fit_with_config(data, &config)
}

/// Validates a raw array and fits it; non-finite entries are rejected.
pub fn fit_array(data: ArrayView2<'_, f64>, n_components: Option<usize>) -> Result<PcaModel> {
    let data = DataMatrix::from_view(data)?;
    fit(&data, n_components)
}

/// Fits PCA as described by `config` using the LAPACK backend.
pub fn fit_with_config(data: &DataMatrix, config: &PcaConfig) -> Result<PcaModel> {
    fit_with_backend(data, config, &NdarrayLinAlgBackend)
}

/// Fits and projects the training data in one call.
pub fn fit_transform(data: &DataMatrix, config: &PcaConfig) -> Result<(PcaModel, ProjectedScores)> {
    let model = fit_with_config(data, config)?;
    let scores = model.transform(data)?;
    Ok((model, scores))
}

/// Fits PCA with an explicit linear-algebra backend.
pub fn fit_with_backend<B: LinAlgBackend>(
    data: &DataMatrix,
    config: &PcaConfig,
    backend: &B,
) -> Result<PcaModel> {
    let (n_samples, n_features) = data.dim();
    let k = config.resolve_components(n_samples, n_features)?;
    let solver = config.solver.resolve(n_samples, n_features);

    info!(
        "Fitting PCA: {} samples x {} features, {} components, solver {:?}",
        n_samples, n_features, k, solver
    );
    let start_time = Instant::now();

    let column_means = data.column_means();
    let centered = data.centered(&column_means)?;
    let denominator = (n_samples - 1) as f64;
    let total_variance = centered.fold(0.0, |acc, v| acc + v * v) / denominator;

    let spectrum = match solver {
        Solver::Auto | Solver::Covariance => covariance_spectrum(&centered, k, backend)?,
        Solver::Gram => gram_spectrum(&centered, k, backend)?,
        Solver::Svd => svd_spectrum(&centered, k, backend)?,
        Solver::Randomized {
            oversamples,
            power_iterations,
            seed,
        } => randomized_spectrum(&centered, k, oversamples, power_iterations, seed, backend)?,
    };

    let Spectrum {
        eigenvalues,
        mut components,
    } = spectrum;
    let eigenvalues = clamp_eigenvalues(eigenvalues);
    orient_signs(&mut components);

    for (i, lambda) in eigenvalues.iter().enumerate() {
        trace!("Component {}: eigenvalue {:.6e}", i, lambda);
    }
    info!(
        "Fitted {} principal components in {:?}",
        eigenvalues.len(),
        start_time.elapsed()
    );

    Ok(PcaModel {
        components: ComponentSet::from_validated(components),
        explained_variance: ExplainedVariance::from_validated(Array1::from(eigenvalues)),
        column_means,
        total_variance,
        solver,
        n_samples,
    })
}

// --- Projection and reconstruction ---

/// Projects `data` onto `components` after subtracting the fit-time means:
/// `(X - means) · V`.
///
/// # Errors
/// `DimensionMismatch` if the column count of `data` or the length of
/// `column_means` differs from the components' feature dimension.
pub fn transform(
    data: &DataMatrix,
    components: &ComponentSet,
    column_means: &ColumnMeans,
) -> Result<ProjectedScores> {
    let n_features = components.n_features();
    if data.ncols() != n_features {
        return Err(PcaError::mismatch(
            "transform: data columns vs component features",
            n_features,
            data.ncols(),
        ));
    }
    if column_means.len() != n_features {
        return Err(PcaError::mismatch(
            "transform: column means length vs component features",
            n_features,
            column_means.len(),
        ));
    }
    let centered = data.centered(column_means)?;
    Ok(ProjectedScores {
        scores: centered.dot(components.loadings()),
    })
}

/// Maps scores back to feature space: `scores · Vᵗ + means`.
///
/// With all `min(N, D)` components this reproduces the original data up to
/// round-off; with fewer it is the best rank-k approximation in the
/// Frobenius norm.
///
/// # Errors
/// `DimensionMismatch` if the scores' column count differs from the number of
/// components, or the means' length from the feature dimension.
pub fn reconstruct(
    scores: &ProjectedScores,
    components: &ComponentSet,
    column_means: &ColumnMeans,
) -> Result<Reconstruction> {
    if scores.ncols() != components.n_components() {
        return Err(PcaError::mismatch(
            "reconstruct: score columns vs number of components",
            components.n_components(),
            scores.ncols(),
        ));
    }
    if column_means.len() != components.n_features() {
        return Err(PcaError::mismatch(
            "reconstruct: column means length vs component features",
            components.n_features(),
            column_means.len(),
        ));
    }
    let mut values = scores.scores().dot(&components.loadings().t());
    values += column_means.values();
    Ok(Reconstruction { values })
}

// --- Explained variance ---

/// Cumulative explained-variance ratios.
///
/// `total_variance` is the sum of the full spectrum. When `None`, the supplied
/// eigenvalues are taken to be the full spectrum and the last ratio is 1.0.
/// If the total is zero (constant data) every ratio is zero.
///
/// # Errors
/// `InvalidInput` if `total_variance` is negative, non-finite, or smaller than
/// the sum of the supplied eigenvalues.
pub fn explained_variance_ratio(
    eigenvalues: &ExplainedVariance,
    total_variance: Option<f64>,
) -> Result<Array1<f64>> {
    let retained = eigenvalues.sum();
    let total = match total_variance {
        Some(total) => {
            validate_total(retained, total)?;
            total
        }
        None => retained,
    };
    Ok(cumulative_ratio(eigenvalues.values(), total))
}

/// Smallest `k` whose cumulative explained-variance ratio reaches `fraction`.
///
/// # Errors
/// `InvalidInput` if `fraction` is outside `(0, 1]`, the total is invalid, or
/// the supplied eigenvalues never reach `fraction`.
pub fn components_for_variance(
    eigenvalues: &ExplainedVariance,
    total_variance: Option<f64>,
    fraction: f64,
) -> Result<usize> {
    if !(fraction > 0.0 && fraction <= 1.0) {
        return Err(PcaError::invalid(format!(
            "variance fraction must lie in (0, 1], got {}",
            fraction
        )));
    }
    let ratios = explained_variance_ratio(eigenvalues, total_variance)?;
    ratios
        .iter()
        .position(|&r| r >= fraction - VARIANCE_SUM_TOLERANCE)
        .map(|index| index + 1)
        .ok_or_else(|| {
            PcaError::invalid(format!(
                "the {} supplied components explain only {:.4} of the variance, below {}",
                ratios.len(),
                ratios.last().copied().unwrap_or(0.0),
                fraction
            ))
        })
}

fn validate_total(retained: f64, total: f64) -> Result<()> {
    if !total.is_finite() || total < 0.0 {
        return Err(PcaError::invalid(format!(
            "total variance must be finite and non-negative, got {}",
            total
        )));
    }
    if retained > total + VARIANCE_SUM_TOLERANCE * total.max(1.0) {
        return Err(PcaError::invalid(format!(
            "total variance {} is smaller than the sum of the supplied eigenvalues {}",
            total, retained
        )));
    }
    Ok(())
}

fn cumulative_ratio(values: &Array1<f64>, total: f64) -> Array1<f64> {
    if total <= 0.0 {
        return Array1::zeros(values.len());
    }
    let mut running = 0.0;
    values.mapv(|v| {
        running += v;
        (running / total).clamp(0.0, 1.0)
    })
}

// --- Solvers ---

struct Spectrum {
    /// Descending, possibly with small negative round-off.
    eigenvalues: Vec<f64>,
    /// D×k, columns unit norm and mutually orthogonal.
    components: Array2<f64>,
}

fn decomposition_error(stage: &str, e: BackendError) -> PcaError {
    PcaError::Decomposition(format!("{}: {}", stage, e))
}

/// Eigendecomposition of the D×D covariance matrix.
fn covariance_spectrum<B: LinAlgBackend>(
    centered: &Array2<f64>,
    k: usize,
    backend: &B,
) -> Result<Spectrum> {
    let n_samples = centered.nrows();
    let mut cov_matrix = centered.t().dot(centered);
    cov_matrix /= (n_samples - 1) as f64;

    let EighOutput {
        eigenvalues,
        eigenvectors,
    } = backend
        .eigh_upper(&cov_matrix)
        .map_err(|e| decomposition_error("eigendecomposition of covariance matrix", e))?;

    let (values, mut components) = top_eigenpairs(&eigenvalues, &eigenvectors, k);
    let valid = normalize_columns(&mut components);
    complete_orthonormal_basis(&mut components, &valid);
    Ok(Spectrum {
        eigenvalues: values,
        components,
    })
}

/// Eigendecomposition of the N×N Gram matrix, cheaper when D > N.
///
/// Each feature-space axis is `X'ᵗu / sqrt(λ(N−1))`; since that is unit norm
/// only in exact arithmetic, the axis is re-normalized and re-orthogonalized
/// against the stronger axes. Only directions whose variance is at round-off
/// level are treated as null and filled in with an orthonormal completion, so
/// weak but real directions survive and the full-rank round trip stays exact.
fn gram_spectrum<B: LinAlgBackend>(
    centered: &Array2<f64>,
    k: usize,
    backend: &B,
) -> Result<Spectrum> {
    let n_samples = centered.nrows();
    let mut gram_matrix = centered.dot(&centered.t());
    gram_matrix /= (n_samples - 1) as f64;

    let EighOutput {
        eigenvalues,
        eigenvectors,
    } = backend
        .eigh_upper(&gram_matrix)
        .map_err(|e| decomposition_error("eigendecomposition of Gram matrix", e))?;

    let (values, sample_vectors) = top_eigenpairs(&eigenvalues, &eigenvectors, k);
    let largest = values.first().copied().unwrap_or(0.0).max(0.0);
    // Eigenvalues this small are indistinguishable from round-off in the Gram matrix.
    let null_threshold = largest * n_samples as f64 * f64::EPSILON;

    let mut components = centered.t().dot(&sample_vectors);
    let mut valid = Vec::with_capacity(k);
    for (j, lambda) in values.iter().enumerate() {
        let mut column = components.column_mut(j);
        let norm = column.dot(&column).sqrt();
        if *lambda > null_threshold && norm > 0.0 && norm.is_finite() {
            column.mapv_inplace(|x| x / norm);
            valid.push(true);
        } else {
            column.fill(0.0);
            valid.push(false);
        }
    }
    // Small-variance axes pick up leakage from the dominant ones through the
    // eigenvector error; strip it so the kept axes stay exactly orthogonal.
    reorthonormalize_columns(&mut components, &mut valid);
    let n_null = valid.iter().filter(|v| !**v).count();
    if n_null > 0 {
        debug!(
            "Gram path: {} of {} components lie in the null space; completing the basis.",
            n_null, k
        );
    }
    complete_orthonormal_basis(&mut components, &valid);
    Ok(Spectrum {
        eigenvalues: values,
        components,
    })
}

/// Thin SVD of the centered data: `X' = U S Vᵗ`, eigenvalues `s² / (N−1)`.
fn svd_spectrum<B: LinAlgBackend>(
    centered: &Array2<f64>,
    k: usize,
    backend: &B,
) -> Result<Spectrum> {
    let n_samples = centered.nrows();
    let SVDOutput { s, vt, .. } = backend
        .svd_into(centered.to_owned(), false, true)
        .map_err(|e| decomposition_error("SVD of centered data", e))?;
    let vt = vt.ok_or_else(|| {
        PcaError::Decomposition("SVD of centered data returned no right singular vectors".into())
    })?;
    if s.len() < k || vt.nrows() < k {
        return Err(PcaError::Decomposition(format!(
            "SVD returned {} singular values, {} requested",
            s.len(),
            k
        )));
    }

    let denominator = (n_samples - 1) as f64;
    let eigenvalues = s.iter().take(k).map(|sv| sv * sv / denominator).collect();
    let mut components = vt.slice(s![..k, ..]).t().to_owned();
    let valid = normalize_columns(&mut components);
    complete_orthonormal_basis(&mut components, &valid);
    Ok(Spectrum {
        eigenvalues,
        components,
    })
}

/// Randomized SVD of the centered data (Halko, Martinsson & Tropp, 2011).
///
/// Tall or square data (D <= N) is sketched directly, `Y = X'Ω`; wide data
/// sketches the transpose, `Y = X'ᵗΩ`. Power iterations with QR
/// re-orthonormalization sharpen the range estimate before an exact SVD of the
/// small projected matrix.
fn randomized_spectrum<B: LinAlgBackend>(
    centered: &Array2<f64>,
    k: usize,
    n_oversamples: usize,
    n_power_iterations: usize,
    seed: u64,
    backend: &B,
) -> Result<Spectrum> {
    let (n_samples, n_features) = centered.dim();
    let max_rank = n_samples.min(n_features);

    let p_to_use = if n_oversamples == 0 {
        let p_adaptive = (k as f64 * 0.1).ceil() as usize;
        p_adaptive.clamp(RANDOMIZED_ADAPTIVE_P_LOWER_BOUND, RANDOMIZED_ADAPTIVE_P_UPPER_BOUND)
    } else {
        n_oversamples.max(RANDOMIZED_MINIMUM_P_FLOOR)
    };
    let l_sketch = (k + p_to_use).min(max_rank).max(k);
    debug!(
        "Randomized SVD: k={}, oversampling p={}, sketch size l={}, power iterations={}",
        k, p_to_use, l_sketch, n_power_iterations
    );

    let mut rng = ChaCha8Rng::seed_from_u64(seed);
    let normal = Normal::new(0.0, 1.0)
        .map_err(|e| PcaError::Decomposition(format!("cannot build sketch distribution: {}", e)))?;
    let qr = |m: &Array2<f64>, stage: &str| {
        backend
            .qr_q_factor(m)
            .map_err(|e| decomposition_error(stage, e))
    };

    let singular_values: Array1<f64>;
    let mut components: Array2<f64>;

    if n_features <= n_samples {
        let omega = Array2::from_shape_fn((n_features, l_sketch), |_| rng.sample(normal));
        let mut q_basis = qr(&centered.dot(&omega), "QR of initial sketch")?;
        for _ in 0..n_power_iterations {
            let w_basis = qr(&centered.t().dot(&q_basis), "QR during power iteration")?;
            q_basis = qr(&centered.dot(&w_basis), "QR during power iteration")?;
        }

        // B = Qᵗ X' (l × D); its right singular vectors are the principal axes.
        let b_projected = q_basis.t().dot(centered);
        let SVDOutput { s, vt, .. } = backend
            .svd_into(b_projected, false, true)
            .map_err(|e| decomposition_error("SVD of projected sketch", e))?;
        let vt = vt.ok_or_else(|| {
            PcaError::Decomposition("SVD of projected sketch returned no right singular vectors".into())
        })?;
        if s.len() < k {
            return Err(PcaError::Decomposition(format!(
                "projected sketch has rank {}, {} components requested",
                s.len(),
                k
            )));
        }
        singular_values = s;
        components = vt.slice(s![..k, ..]).t().to_owned();
    } else {
        let omega = Array2::from_shape_fn((n_samples, l_sketch), |_| rng.sample(normal));
        let mut q_basis = qr(&centered.t().dot(&omega), "QR of initial sketch")?;
        for _ in 0..n_power_iterations {
            let w_basis = qr(&centered.dot(&q_basis), "QR during power iteration")?;
            q_basis = qr(&centered.t().dot(&w_basis), "QR during power iteration")?;
        }

        // B = (X' Q)ᵗ (l × N); axes are Q · U_B.
        let b_projected = centered.dot(&q_basis).t().to_owned();
        let SVDOutput { u, s, .. } = backend
            .svd_into(b_projected, true, false)
            .map_err(|e| decomposition_error("SVD of projected sketch", e))?;
        let u = u.ok_or_else(|| {
            PcaError::Decomposition("SVD of projected sketch returned no left singular vectors".into())
        })?;
        if s.len() < k || u.ncols() < k {
            return Err(PcaError::Decomposition(format!(
                "projected sketch has rank {}, {} components requested",
                s.len(),
                k
            )));
        }
        singular_values = s;
        components = q_basis.dot(&u.slice(s![.., ..k]));
    }

    let valid = normalize_columns(&mut components);
    complete_orthonormal_basis(&mut components, &valid);
    let denominator = (n_samples - 1) as f64;
    let eigenvalues = singular_values
        .iter()
        .take(k)
        .map(|sv| sv * sv / denominator)
        .collect();
    Ok(Spectrum {
        eigenvalues,
        components,
    })
}

// --- Helpers ---

/// Selects the `k` largest eigenpairs, in descending order of eigenvalue.
/// The sort is stable, so tied eigenvalues keep the backend's order.
fn top_eigenpairs(
    eigenvalues: &Array1<f64>,
    eigenvectors: &Array2<f64>,
    k: usize,
) -> (Vec<f64>, Array2<f64>) {
    let mut order: Vec<usize> = (0..eigenvalues.len()).collect();
    order.sort_by(|&a, &b| {
        eigenvalues[b]
            .partial_cmp(&eigenvalues[a])
            .unwrap_or(Ordering::Equal)
    });
    order.truncate(k);
    let values = order.iter().map(|&i| eigenvalues[i]).collect();
    let vectors = eigenvectors.select(Axis(1), &order);
    (values, vectors)
}

/// Normalizes each column to unit length. Columns with a negligible norm are
/// zeroed and reported as invalid.
fn normalize_columns(matrix: &mut Array2<f64>) -> Vec<bool> {
    matrix
        .columns_mut()
        .into_iter()
        .map(|mut column| {
            let norm = column.dot(&column).sqrt();
            if norm > NORMALIZATION_THRESHOLD {
                column.mapv_inplace(|x| x / norm);
                true
            } else {
                column.fill(0.0);
                false
            }
        })
        .collect()
}

/// Two-pass modified Gram-Schmidt over the valid columns, in column order.
/// Columns that are (numerically) dependent on earlier ones become invalid.
fn reorthonormalize_columns(matrix: &mut Array2<f64>, valid: &mut [bool]) {
    for j in 0..matrix.ncols() {
        if !valid[j] {
            continue;
        }
        let mut candidate = matrix.column(j).to_owned();
        let initial = candidate.dot(&candidate).sqrt();
        for _ in 0..2 {
            for c in 0..j {
                if valid[c] {
                    let column = matrix.column(c);
                    let projection = candidate.dot(&column);
                    candidate.scaled_add(-projection, &column);
                }
            }
        }
        let norm = candidate.dot(&candidate).sqrt();
        if norm > DEPENDENT_COLUMN_RESIDUAL * initial {
            candidate.mapv_inplace(|x| x / norm);
            matrix.column_mut(j).assign(&candidate);
        } else {
            valid[j] = false;
            matrix.column_mut(j).fill(0.0);
        }
    }
}

/// Replaces every invalid column with a unit vector orthogonal to all other
/// columns, using Gram-Schmidt over the standard basis.
fn complete_orthonormal_basis(matrix: &mut Array2<f64>, valid: &[bool]) {
    let n_features = matrix.nrows();
    let mut accepted: Vec<bool> = valid.to_vec();

    for j in 0..matrix.ncols() {
        if accepted[j] {
            continue;
        }
        let mut filled = false;
        for basis_index in 0..n_features {
            let mut candidate = Array1::<f64>::zeros(n_features);
            candidate[basis_index] = 1.0;
            // Two passes of modified Gram-Schmidt for numerical orthogonality.
            for _ in 0..2 {
                for (c, &is_accepted) in accepted.iter().enumerate() {
                    if is_accepted && c != j {
                        let column = matrix.column(c);
                        let projection = candidate.dot(&column);
                        candidate.scaled_add(-projection, &column);
                    }
                }
            }
            let norm = candidate.dot(&candidate).sqrt();
            if norm > 1e-6 {
                candidate.mapv_inplace(|x| x / norm);
                matrix.column_mut(j).assign(&candidate);
                accepted[j] = true;
                filled = true;
                break;
            }
        }
        if !filled {
            // Unreachable while k <= D; kept as a zero column so the caller can still proceed.
            warn!("Could not complete orthonormal basis for component {}.", j);
        }
    }
}

/// Flips each column so that its largest-magnitude entry is positive.
fn orient_signs(components: &mut Array2<f64>) {
    for mut column in components.columns_mut() {
        let pivot = column
            .iter()
            .copied()
            .fold(0.0_f64, |best, v| if v.abs() > best.abs() { v } else { best });
        if pivot < 0.0 {
            column.mapv_inplace(|x| -x);
        }
    }
}

/// Clamps small negative eigenvalues (round-off) to zero.
fn clamp_eigenvalues(eigenvalues: Vec<f64>) -> Vec<f64> {
    let largest = eigenvalues.first().copied().unwrap_or(0.0).abs().max(1.0);
    eigenvalues
        .into_iter()
        .enumerate()
        .map(|(i, v)| {
            if v < 0.0 {
                if v < -1e-8 * largest {
                    warn!(
                        "Eigenvalue {} is {:.3e}; clamping to zero (matrix may be ill-conditioned).",
                        i, v
                    );
                }
                0.0
            } else {
                v
            }
        })
        .collect()
}

/// `max |VᵗV - I|` over all entries.
pub(crate) fn max_identity_deviation(loadings: ArrayView2<'_, f64>) -> f64 {
    let gram = loadings.t().dot(&loadings);
    gram.indexed_iter()
        .map(|((i, j), v)| {
            let target = if i == j { 1.0 } else { 0.0 };
            (v - target).abs()
        })
        .fold(0.0, f64::max)
}
