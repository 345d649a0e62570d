use crate::matrix::{DesignMatrix, MatrixError};
use ndarray::{Array1, ArrayView1};
use serde::{Deserialize, Serialize};
use std::fs;
use std::io::{BufWriter, Write};
use thiserror::Error;

/// Custom error type for model loading, saving, and prediction.
#[derive(Error, Debug)]
pub enum ModelError {
    #[error("Failed to read or write model file: {0}")]
    IoError(#[from] std::io::Error),
    #[error("Failed to parse TOML model file: {0}")]
    TomlParseError(#[from] toml::de::Error),
    #[error("Failed to serialize model to TOML format: {0}")]
    TomlSerializeError(#[from] toml::ser::Error),
    #[error("Prediction data has {found} feature columns, but the model was trained on {expected}.")]
    MismatchedFeatureCount { found: usize, expected: usize },
    #[error(transparent)]
    Matrix(#[from] MatrixError),
}

/// The trained linear ranking function `f(x) = x·w + b`.
///
/// This is the only artifact that outlives a training run. The bias is kept
/// for completeness; the conjugate gradient learner always emits zero and
/// expects a constant feature to be appended upstream when one is wanted.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct LinearModel {
    bias: f64,
    weights: Array1<f64>,
}

impl LinearModel {
    pub fn new(weights: Array1<f64>, bias: f64) -> Self {
        Self { bias, weights }
    }

    pub fn weights(&self) -> ArrayView1<'_, f64> {
        self.weights.view()
    }

    pub fn bias(&self) -> f64 {
        self.bias
    }

    pub fn n_features(&self) -> usize {
        self.weights.len()
    }

    /// Scores every row of `features`.
    pub fn predict(&self, features: &DesignMatrix) -> Result<Array1<f64>, ModelError> {
        if features.ncols() != self.weights.len() {
            return Err(ModelError::MismatchedFeatureCount {
                found: features.ncols(),
                expected: self.weights.len(),
            });
        }
        let mut scores = features.matrix_vector_multiply(self.weights.view())?;
        if self.bias != 0.0 {
            scores += self.bias;
        }
        Ok(scores)
    }

    /// Saves the trained model to a file in a human-readable TOML format.
    pub fn save(&self, path: &str) -> Result<(), ModelError> {
        let toml_string = toml::to_string_pretty(self)?;
        let mut file = BufWriter::new(fs::File::create(path)?);
        file.write_all(toml_string.as_bytes())?;
        Ok(())
    }

    /// Loads a trained model from a TOML file.
    pub fn load(path: &str) -> Result<Self, ModelError> {
        let toml_string = fs::read_to_string(path)?;
        let model = toml::from_str(&toml_string)?;
        Ok(model)
    }
}
