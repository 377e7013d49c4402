// src/labels.rs

//! Sample and feature labels kept beside a [`DataMatrix`] and joined by key.
//!
//! Metadata (groups, clinical covariates, image classes) is never matched to
//! rows by position: it is stored by sample id and aligned to the matrix's row
//! order explicitly, failing loudly when an id is missing.

use std::collections::HashMap;

use crate::error::{PcaError, Result};
use crate::matrix::DataMatrix;
use crate::pca::ComponentSet;

/// Ordered, unique sample identifiers; entry `i` names row `i`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SampleLabels {
    ids: Vec<String>,
    index: HashMap<String, usize>,
}

impl SampleLabels {
    /// # Errors
    /// `InvalidInput` if an id occurs more than once.
    pub fn new<I, S>(ids: I) -> Result<Self>
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        let ids: Vec<String> = ids.into_iter().map(Into::into).collect();
        let mut index = HashMap::with_capacity(ids.len());
        for (row, id) in ids.iter().enumerate() {
            if let Some(previous) = index.insert(id.clone(), row) {
                return Err(PcaError::invalid(format!(
                    "duplicate sample id '{}' at rows {} and {}",
                    id, previous, row
                )));
            }
        }
        Ok(Self { ids, index })
    }

    pub fn len(&self) -> usize {
        self.ids.len()
    }

    pub fn is_empty(&self) -> bool {
        self.ids.is_empty()
    }

    pub fn ids(&self) -> &[String] {
        &self.ids
    }

    /// Row index of `id`.
    pub fn position(&self, id: &str) -> Option<usize> {
        self.index.get(id).copied()
    }
}

/// Per-sample values keyed by sample id.
#[derive(Debug, Clone, PartialEq)]
pub struct SampleMetadata<T> {
    values: HashMap<String, T>,
}

impl<T> Default for SampleMetadata<T> {
    fn default() -> Self {
        Self {
            values: HashMap::new(),
        }
    }
}

impl<T: Clone> SampleMetadata<T> {
    pub fn new() -> Self {
        Self::default()
    }

    /// Inserts a value, returning the previous one for that id.
    pub fn insert(&mut self, id: impl Into<String>, value: T) -> Option<T> {
        self.values.insert(id.into(), value)
    }

    pub fn get(&self, id: &str) -> Option<&T> {
        self.values.get(id)
    }

    pub fn len(&self) -> usize {
        self.values.len()
    }

    pub fn is_empty(&self) -> bool {
        self.values.is_empty()
    }

    /// Values in the row order of `labels`.
    ///
    /// # Errors
    /// `InvalidInput` naming the first sample with no metadata entry.
    pub fn align(&self, labels: &SampleLabels) -> Result<Vec<T>> {
        labels
            .ids()
            .iter()
            .map(|id| {
                self.values.get(id).cloned().ok_or_else(|| {
                    PcaError::invalid(format!("no metadata entry for sample '{}'", id))
                })
            })
            .collect()
    }
}

impl<T: Clone, S: Into<String>> FromIterator<(S, T)> for SampleMetadata<T> {
    fn from_iter<I: IntoIterator<Item = (S, T)>>(iter: I) -> Self {
        Self {
            values: iter.into_iter().map(|(id, v)| (id.into(), v)).collect(),
        }
    }
}

/// A data matrix with named rows (samples) and columns (features).
#[derive(Debug, Clone)]
pub struct LabeledMatrix {
    matrix: DataMatrix,
    samples: SampleLabels,
    features: Vec<String>,
}

impl LabeledMatrix {
    /// # Errors
    /// `DimensionMismatch` if the label counts differ from the matrix shape.
    pub fn new(matrix: DataMatrix, samples: SampleLabels, features: Vec<String>) -> Result<Self> {
        if samples.len() != matrix.nrows() {
            return Err(PcaError::mismatch(
                "labeled matrix: sample labels vs rows",
                matrix.nrows(),
                samples.len(),
            ));
        }
        if features.len() != matrix.ncols() {
            return Err(PcaError::mismatch(
                "labeled matrix: feature names vs columns",
                matrix.ncols(),
                features.len(),
            ));
        }
        Ok(Self {
            matrix,
            samples,
            features,
        })
    }

    pub fn matrix(&self) -> &DataMatrix {
        &self.matrix
    }

    pub fn samples(&self) -> &SampleLabels {
        &self.samples
    }

    pub fn features(&self) -> &[String] {
        &self.features
    }

    /// The `n` features with the largest absolute loading on component
    /// `component`, as `(feature name, loading)` sorted by decreasing magnitude.
    ///
    /// # Errors
    /// `DimensionMismatch` if the components were fitted on a different number
    /// of features; `InvalidInput` if `component` is out of range.
    pub fn top_loadings(
        &self,
        components: &ComponentSet,
        component: usize,
        n: usize,
    ) -> Result<Vec<(String, f64)>> {
        if components.n_features() != self.features.len() {
            return Err(PcaError::mismatch(
                "top loadings: component features vs feature names",
                self.features.len(),
                components.n_features(),
            ));
        }
        let loadings = components.component(component).ok_or_else(|| {
            PcaError::invalid(format!(
                "component {} requested but only {} are available",
                component,
                components.n_components()
            ))
        })?;

        let mut ranked: Vec<(usize, f64)> = loadings.iter().copied().enumerate().collect();
        ranked.sort_by(|a, b| b.1.abs().total_cmp(&a.1.abs()));
        Ok(ranked
            .into_iter()
            .take(n)
            .map(|(j, w)| (self.features[j].clone(), w))
            .collect())
    }
}
