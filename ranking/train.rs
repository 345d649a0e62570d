// ranking/train.rs

//! # Conjugate Gradient RankRLS
//!
//! Trains a linear ranking function by minimising the regularized pairwise
//! squared ranking loss
//!
//! `Σ_edges (y_i − y_j − f(x_i) + f(x_j))² + λ‖w‖²`
//!
//! without ever forming the pairwise comparison matrix. The pipeline is:
//!
//! 1.  **Preference structure:** the caller's labels, labels with queries, or
//!     explicit pairs are validated and turned into a [`PreferenceStructure`].
//! 2.  **Operator:** a [`RankingOperator`] exposes `(XᵗLX + λI)·v` and the
//!     right-hand side `XᵗLy` (or `XᵗSᵗ1`).
//! 3.  **Solver:** [`conjugate_gradient`] drives the operator to convergence,
//!     optionally reporting every iterate to an [`EarlyStopping`] controller
//!     which can halt the solve and roll back to the best validation score.
//! 4.  **Model:** the final weights are packaged as a [`LinearModel`] with a
//!     zero bias.
//!
//! All configuration problems are reported before the first iteration.

use crate::cg::{CgStatus, SolverError, conjugate_gradient};
use crate::config::{ConfigError, TrainingConfig, validate_regularization};
use crate::early_stop::{EarlyStopping, EarlyStoppingSummary, ValidationSet};
use crate::matrix::DesignMatrix;
use crate::measure::PerformanceMeasure;
use crate::model::LinearModel;
use crate::operator::{LinearOperator, RankingOperator};
use crate::preference::PreferenceStructure;
use ndarray::{Array1, Array2, Axis};
use thiserror::Error;

#[derive(Error, Debug)]
pub enum TrainingError {
    #[error("Invalid training configuration: {0}")]
    Config(#[from] ConfigError),

    #[error("The conjugate gradient solve failed: {0}")]
    Solver(#[from] SolverError),
}

/// Raw training inputs. Exactly one of `labels` and `preferences` must be
/// present; `queries` may only accompany `labels`.
#[derive(Debug, Clone)]
pub struct TrainingData {
    /// Shape: [n_samples, n_features].
    pub features: DesignMatrix,
    /// Utility labels. Shape: [n_samples, 1].
    pub labels: Option<Array2<f64>>,
    /// Disjoint index lists covering every sample exactly once.
    pub queries: Option<Vec<Vec<usize>>>,
    /// `(preferred, other)` sample index pairs.
    pub preferences: Option<Vec<(usize, usize)>>,
}

impl TrainingData {
    pub fn from_labels(features: DesignMatrix, labels: Array1<f64>) -> Self {
        Self {
            features,
            labels: Some(labels.insert_axis(Axis(1))),
            queries: None,
            preferences: None,
        }
    }

    pub fn from_grouped_labels(
        features: DesignMatrix,
        labels: Array1<f64>,
        queries: Vec<Vec<usize>>,
    ) -> Self {
        Self {
            queries: Some(queries),
            ..Self::from_labels(features, labels)
        }
    }

    pub fn from_preferences(features: DesignMatrix, preferences: Vec<(usize, usize)>) -> Self {
        Self {
            features,
            labels: None,
            queries: None,
            preferences: Some(preferences),
        }
    }

    /// Validates the inputs and selects the preference mode.
    fn into_parts(self) -> Result<(DesignMatrix, PreferenceStructure), ConfigError> {
        let n_samples = self.features.nrows();
        let structure = match (self.labels, self.preferences) {
            (None, None) => return Err(ConfigError::MissingTargets),
            (Some(_), Some(_)) => return Err(ConfigError::AmbiguousTargets),
            (Some(labels), None) => {
                if labels.ncols() != 1 {
                    return Err(ConfigError::MultiColumnLabels {
                        found: labels.ncols(),
                    });
                }
                if labels.nrows() != n_samples {
                    return Err(ConfigError::LabelLengthMismatch {
                        found: labels.nrows(),
                        expected: n_samples,
                    });
                }
                let labels = labels.column(0).to_owned();
                match self.queries {
                    Some(queries) => PreferenceStructure::query_grouped(labels, &queries)?,
                    None => PreferenceStructure::all_pairs(labels),
                }
            }
            (None, Some(pairs)) => {
                if self.queries.is_some() {
                    return Err(ConfigError::QueriesWithoutLabels);
                }
                PreferenceStructure::explicit_pairs(&pairs, n_samples)?
            }
        };
        Ok((self.features, structure))
    }
}

/// Result of one training run.
#[derive(Debug, Clone)]
pub struct RankerFit {
    pub model: LinearModel,
    pub status: CgStatus,
    pub iterations: usize,
    pub residual_norm: f64,
    pub regularization: f64,
    /// Present when a validation set was attached.
    pub early_stopping: Option<EarlyStoppingSummary>,
}

impl RankerFit {
    /// `false` when the iteration cap was hit before the tolerance was met.
    pub fn converged(&self) -> bool {
        self.status != CgStatus::MaxIterationsReached
    }
}

/// Linear RankRLS trained with conjugate gradient.
///
/// The preference structure is built and validated once; [`CgRankRls::solve`]
/// can then retrain for several regularization parameters.
pub struct CgRankRls {
    features: DesignMatrix,
    preferences: PreferenceStructure,
    validation: Option<ValidationSet>,
    measure: Box<dyn PerformanceMeasure>,
    config: TrainingConfig,
}

impl CgRankRls {
    pub fn new(data: TrainingData, config: TrainingConfig) -> Result<Self, ConfigError> {
        config.validate()?;
        let (features, preferences) = data.into_parts()?;
        let measure = config.early_stopping.measure.build();
        Ok(Self {
            features,
            preferences,
            validation: None,
            measure,
            config,
        })
    }

    /// Enables early stopping on `validation`. Only supported when learning
    /// from labels.
    pub fn with_validation(mut self, validation: ValidationSet) -> Result<Self, ConfigError> {
        if !self.preferences.learns_from_labels() {
            return Err(ConfigError::EarlyStoppingWithPairs);
        }
        if validation.features().ncols() != self.features.ncols() {
            return Err(ConfigError::FeatureCountMismatch {
                found: validation.features().ncols(),
                expected: self.features.ncols(),
            });
        }
        self.validation = Some(validation);
        Ok(self)
    }

    /// Replaces the configured validation measure with a custom one.
    pub fn with_measure(mut self, measure: Box<dyn PerformanceMeasure>) -> Self {
        self.measure = measure;
        self
    }

    pub fn preferences(&self) -> &PreferenceStructure {
        &self.preferences
    }

    pub fn config(&self) -> &TrainingConfig {
        &self.config
    }

    /// Retrains with a different regularization parameter.
    pub fn solve(&mut self, regularization: f64) -> Result<RankerFit, TrainingError> {
        validate_regularization(regularization)?;
        self.config.solver.regularization = regularization;
        self.train()
    }

    pub fn train(&self) -> Result<RankerFit, TrainingError> {
        let regularization = self.config.solver.regularization;
        let operator = RankingOperator::new(&self.features, &self.preferences, regularization)?;
        let rhs = operator.rhs()?;
        let options = self.config.solver.cg_options();

        log::info!(
            "Training {} RankRLS: {} samples, {} features, lambda = {regularization}, early stopping {}.",
            self.preferences.mode_name(),
            self.features.nrows(),
            operator.dim(),
            if self.validation.is_some() { "on" } else { "off" }
        );

        let (outcome, early_stopping) = match &self.validation {
            Some(validation) => {
                let mut controller = EarlyStopping::new(
                    validation,
                    self.measure.as_ref(),
                    self.config.early_stopping.patience,
                );
                let mut outcome =
                    conjugate_gradient(&operator, rhs.view(), &options, Some(&mut controller))?;
                // At the cap the best validation snapshot replaces the last iterate.
                if outcome.status == CgStatus::MaxIterationsReached {
                    if let Some(best) = controller.best_weights() {
                        outcome.solution = best.to_owned();
                    }
                }
                (outcome, Some(controller.summary()))
            }
            None => (
                conjugate_gradient(&operator, rhs.view(), &options, None)?,
                None,
            ),
        };

        match outcome.status {
            CgStatus::MaxIterationsReached => log::warn!(
                "RankRLS did not converge within {} iterations (residual norm {:.6e}); returning the {}.",
                outcome.iterations,
                outcome.residual_norm,
                if early_stopping
                    .as_ref()
                    .is_some_and(|summary| summary.best_iteration.is_some())
                {
                    "best validation iterate"
                } else {
                    "last iterate"
                }
            ),
            status => log::info!(
                "RankRLS finished after {} iterations ({status:?}, residual norm {:.6e}).",
                outcome.iterations,
                outcome.residual_norm
            ),
        }

        Ok(RankerFit {
            model: LinearModel::new(outcome.solution, 0.0),
            status: outcome.status,
            iterations: outcome.iterations,
            residual_norm: outcome.residual_norm,
            regularization,
            early_stopping,
        })
    }
}

/// The main entry point for model training.
pub fn train_ranker(
    data: TrainingData,
    validation: Option<ValidationSet>,
    config: TrainingConfig,
) -> Result<RankerFit, TrainingError> {
    let mut learner = CgRankRls::new(data, config)?;
    if let Some(validation) = validation {
        learner = learner.with_validation(validation)?;
    }
    learner.train()
}
