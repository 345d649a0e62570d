//! Training configuration and the configuration errors raised before any
//! solving begins.
//!
//! Configuration is plain serde data so that it can live in a TOML file next
//! to the trained model. Every section has defaults; only the regularization
//! parameter is worth setting explicitly for real problems.

use crate::cg::CgOptions;
use crate::early_stop::DEFAULT_PATIENCE;
use crate::measure::MeasureKind;
use serde::{Deserialize, Serialize};
use thiserror::Error;

/// Errors in the caller-supplied training setup. These are fatal for the
/// current training call and are always reported before the first solver
/// iteration.
#[derive(Error, Debug)]
pub enum ConfigError {
    #[error("Neither labels nor pairwise preferences were supplied; one of them is required.")]
    MissingTargets,

    #[error("Both labels and pairwise preferences were supplied; exactly one of them is allowed.")]
    AmbiguousTargets,

    #[error("Labels must have a single column, but {found} columns were supplied.")]
    MultiColumnLabels { found: usize },

    #[error("Query grouping was supplied together with pairwise preferences; queries require labels.")]
    QueriesWithoutLabels,

    #[error("Got {found} labels for a feature matrix with {expected} samples.")]
    LabelLengthMismatch { found: usize, expected: usize },

    #[error("Index {index} in query {query} is out of bounds for {n_samples} samples.")]
    QueryIndexOutOfBounds {
        index: i64,
        query: usize,
        n_samples: usize,
    },

    #[error("Negative index {index} in query {query}; query indices must be non-negative.")]
    NegativeQueryIndex { index: i64, query: usize },

    #[error("Sample {index} is assigned to query {first_query} and again to query {second_query}.")]
    DuplicateQueryIndex {
        index: usize,
        first_query: usize,
        second_query: usize,
    },

    #[error("{count} samples were not assigned to any query (first unassigned index: {first}).")]
    UnassignedSamples { count: usize, first: usize },

    #[error("Query {0} is empty.")]
    EmptyQuery(usize),

    #[error("Preference pair {pair} references sample {index}, but only {n_samples} samples exist.")]
    PairIndexOutOfBounds {
        pair: usize,
        index: i64,
        n_samples: usize,
    },

    #[error("Preference pair {pair} contains the negative index {index}.")]
    NegativePairIndex { pair: usize, index: i64 },

    #[error("The regularization parameter must be positive and finite, got {0}.")]
    NonPositiveRegularization(f64),

    #[error("Solver tolerances must be finite and non-negative (relative {relative}, absolute {absolute}).")]
    InvalidTolerance { relative: f64, absolute: f64 },

    #[error("Early stopping patience must be at least one iteration.")]
    ZeroPatience,

    #[error("Early stopping is only supported when training from labels.")]
    EarlyStoppingWithPairs,

    #[error("Validation set has {features} feature rows but {labels} labels.")]
    ValidationShapeMismatch { features: usize, labels: usize },

    #[error("Validation features have {found} columns, but the training features have {expected}.")]
    FeatureCountMismatch { found: usize, expected: usize },

    #[error("Failed to parse TOML configuration: {0}")]
    TomlParse(#[from] toml::de::Error),
}

/// Settings for the conjugate gradient solve.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct SolverConfig {
    /// Tikhonov regularization weight, λ > 0.
    pub regularization: f64,
    /// Convergence threshold on the residual norm, relative to the norm of
    /// the right-hand side.
    pub tolerance: f64,
    pub absolute_tolerance: f64,
    /// Iteration cap. `None` means ten times the number of features.
    pub max_iterations: Option<usize>,
}

impl Default for SolverConfig {
    fn default() -> Self {
        Self {
            regularization: 1.0,
            tolerance: 1e-5,
            absolute_tolerance: 0.0,
            max_iterations: None,
        }
    }
}

impl SolverConfig {
    pub fn validate(&self) -> Result<(), ConfigError> {
        validate_regularization(self.regularization)?;
        let tolerances_ok = self.tolerance.is_finite()
            && self.tolerance >= 0.0
            && self.absolute_tolerance.is_finite()
            && self.absolute_tolerance >= 0.0;
        if !tolerances_ok {
            return Err(ConfigError::InvalidTolerance {
                relative: self.tolerance,
                absolute: self.absolute_tolerance,
            });
        }
        Ok(())
    }

    pub fn cg_options(&self) -> CgOptions {
        CgOptions {
            tolerance: self.tolerance,
            absolute_tolerance: self.absolute_tolerance,
            max_iterations: self.max_iterations,
        }
    }
}

/// Settings for the validation-driven early stopping controller. They only
/// take effect when a validation set is attached to the learner.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct EarlyStoppingConfig {
    pub measure: MeasureKind,
    /// Number of consecutive non-improving iterations tolerated before the
    /// solver is stopped and rolled back to the best iterate.
    pub patience: usize,
}

impl Default for EarlyStoppingConfig {
    fn default() -> Self {
        Self {
            measure: MeasureKind::default(),
            patience: DEFAULT_PATIENCE,
        }
    }
}

impl EarlyStoppingConfig {
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.patience == 0 {
            return Err(ConfigError::ZeroPatience);
        }
        Ok(())
    }
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct TrainingConfig {
    pub solver: SolverConfig,
    pub early_stopping: EarlyStoppingConfig,
}

impl TrainingConfig {
    /// Convenience constructor for the common case of only choosing λ.
    pub fn with_regularization(regularization: f64) -> Self {
        Self {
            solver: SolverConfig {
                regularization,
                ..SolverConfig::default()
            },
            ..Self::default()
        }
    }

    pub fn from_toml_str(text: &str) -> Result<Self, ConfigError> {
        let config: Self = toml::from_str(text)?;
        config.validate()?;
        Ok(config)
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        self.solver.validate()?;
        self.early_stopping.validate()
    }
}

pub(crate) fn validate_regularization(regularization: f64) -> Result<(), ConfigError> {
    if regularization.is_finite() && regularization > 0.0 {
        Ok(())
    } else {
        Err(ConfigError::NonPositiveRegularization(regularization))
    }
}
