//! # Validation-Driven Early Stopping
//!
//! The controller is registered with the conjugate gradient solver as an
//! [`IterationObserver`]. After every iteration it scores the current weight
//! vector on a held-out validation set and tracks the best iterate seen so
//! far. Once `patience` consecutive iterations fail to strictly improve on
//! the best score, it moves to [`ControllerState::Stopped`] and hands the best
//! snapshot back to the solver, which returns it instead of the current
//! iterate.

use crate::cg::{IterationControl, IterationObserver};
use crate::config::ConfigError;
use crate::matrix::DesignMatrix;
use crate::measure::PerformanceMeasure;
use crate::model::LinearModel;
use crate::preference::QueryGrouping;
use ndarray::{Array1, ArrayView1, Axis};

pub const DEFAULT_PATIENCE: usize = 10;

/// Held-out data used only for scoring. Read-only for the whole run.
#[derive(Debug, Clone)]
pub struct ValidationSet {
    features: DesignMatrix,
    labels: Array1<f64>,
    queries: Option<QueryGrouping>,
}

impl ValidationSet {
    pub fn new(
        features: DesignMatrix,
        labels: Array1<f64>,
        queries: Option<&[Vec<usize>]>,
    ) -> Result<Self, ConfigError> {
        if features.nrows() != labels.len() {
            return Err(ConfigError::ValidationShapeMismatch {
                features: features.nrows(),
                labels: labels.len(),
            });
        }
        let queries = queries
            .map(|queries| QueryGrouping::new(queries, labels.len()))
            .transpose()?;
        Ok(Self {
            features,
            labels,
            queries,
        })
    }

    pub fn features(&self) -> &DesignMatrix {
        &self.features
    }

    pub fn queries(&self) -> Option<&QueryGrouping> {
        self.queries.as_ref()
    }
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum ControllerState {
    Accumulating,
    Stopped,
}

/// What the controller observed over one training run.
#[derive(Clone, Debug, PartialEq)]
pub struct EarlyStoppingSummary {
    /// Iteration whose weights were kept, if any iteration scored finitely.
    pub best_iteration: Option<usize>,
    pub best_score: Option<f64>,
    /// Iteration at which the controller halted the solver.
    pub stopped_at: Option<usize>,
    pub evaluations: usize,
}

pub struct EarlyStopping<'a> {
    validation: &'a ValidationSet,
    measure: &'a dyn PerformanceMeasure,
    patience: usize,
    state: ControllerState,
    best_score: Option<f64>,
    best_weights: Option<Array1<f64>>,
    best_iteration: Option<usize>,
    since_improvement: usize,
    evaluations: usize,
    stopped_at: Option<usize>,
}

impl<'a> EarlyStopping<'a> {
    pub fn new(
        validation: &'a ValidationSet,
        measure: &'a dyn PerformanceMeasure,
        patience: usize,
    ) -> Self {
        Self {
            validation,
            measure,
            patience,
            state: ControllerState::Accumulating,
            best_score: None,
            best_weights: None,
            best_iteration: None,
            since_improvement: 0,
            evaluations: 0,
            stopped_at: None,
        }
    }

    pub fn state(&self) -> ControllerState {
        self.state
    }

    pub fn best_weights(&self) -> Option<ArrayView1<'_, f64>> {
        self.best_weights.as_ref().map(|weights| weights.view())
    }

    pub fn summary(&self) -> EarlyStoppingSummary {
        EarlyStoppingSummary {
            best_iteration: self.best_iteration,
            best_score: self.best_score,
            stopped_at: self.stopped_at,
            evaluations: self.evaluations,
        }
    }

    /// Scores a weight vector on the validation set. Per-query scores that
    /// are undefined are left out of the average; if every query is
    /// undefined the result is NaN.
    pub fn evaluate(&self, weights: ArrayView1<f64>) -> f64 {
        let model = LinearModel::new(weights.to_owned(), 0.0);
        let predictions = match model.predict(&self.validation.features) {
            Ok(predictions) => predictions,
            Err(e) => {
                log::warn!("Could not predict on the validation set: {e}");
                return f64::NAN;
            }
        };
        let labels = self.validation.labels.view();

        match &self.validation.queries {
            Some(grouping) => {
                let mut total = 0.0;
                let mut defined = 0usize;
                for members in grouping.queries() {
                    let query_labels = labels.select(Axis(0), members);
                    let query_predictions = predictions.select(Axis(0), members);
                    match self
                        .measure
                        .score(query_labels.view(), query_predictions.view())
                    {
                        Ok(score) => {
                            total += score;
                            defined += 1;
                        }
                        Err(undefined) => log::trace!("Skipping validation query: {undefined}"),
                    }
                }
                if defined == 0 {
                    log::warn!(
                        "{} is undefined for every validation query; treating this iteration as non-improving.",
                        self.measure.name()
                    );
                    return f64::NAN;
                }
                total / defined as f64
            }
            None => match self.measure.score(labels, predictions.view()) {
                Ok(score) => score,
                Err(undefined) => {
                    log::warn!("Validation score undefined: {undefined}");
                    f64::NAN
                }
            },
        }
    }

    /// Strict improvement in the measure's own direction. NaN never improves.
    fn improves_on_best(&self, score: f64) -> bool {
        if score.is_nan() {
            return false;
        }
        match self.best_score {
            None => true,
            Some(best) if self.measure.is_error() => score < best,
            Some(best) => score > best,
        }
    }

    fn stop_with_best(&self, current: ArrayView1<f64>) -> IterationControl {
        let chosen = self
            .best_weights
            .clone()
            .unwrap_or_else(|| current.to_owned());
        IterationControl::Stop(chosen)
    }
}

impl IterationObserver for EarlyStopping<'_> {
    fn observe(&mut self, iteration: usize, iterate: ArrayView1<f64>) -> IterationControl {
        if self.state == ControllerState::Stopped {
            return self.stop_with_best(iterate);
        }

        let score = self.evaluate(iterate);
        self.evaluations += 1;

        if self.improves_on_best(score) {
            self.best_score = Some(score);
            self.best_weights = Some(iterate.to_owned());
            self.best_iteration = Some(iteration);
            self.since_improvement = 0;
        } else {
            self.since_improvement += 1;
        }
        log::debug!(
            "Validation {} at iteration {iteration}: {score:.6e} (best {:?}, {} without improvement)",
            self.measure.name(),
            self.best_score,
            self.since_improvement
        );

        if self.since_improvement >= self.patience {
            self.state = ControllerState::Stopped;
            self.stopped_at = Some(iteration);
            log::info!(
                "Early stopping at iteration {iteration}; rolling back to iteration {:?} with {} {:?}.",
                self.best_iteration,
                self.measure.name(),
                self.best_score
            );
            return self.stop_with_best(iterate);
        }
        IterationControl::Continue
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::measure::{SqMpRank, UndefinedPerformance};
    use ndarray::{Array2, array};
    use std::cell::RefCell;

    /// Replays a fixed sequence of scores regardless of the predictions.
    struct ScriptedMeasure {
        scores: RefCell<std::vec::IntoIter<f64>>,
        is_error: bool,
    }

    impl ScriptedMeasure {
        fn new(scores: Vec<f64>, is_error: bool) -> Self {
            Self {
                scores: RefCell::new(scores.into_iter()),
                is_error,
            }
        }
    }

    impl PerformanceMeasure for ScriptedMeasure {
        fn name(&self) -> &'static str {
            "scripted"
        }

        fn is_error(&self) -> bool {
            self.is_error
        }

        fn score(
            &self,
            labels: ArrayView1<f64>,
            predictions: ArrayView1<f64>,
        ) -> Result<f64, UndefinedPerformance> {
            assert_eq!(labels.len(), predictions.len());
            self.scores
                .borrow_mut()
                .next()
                .ok_or_else(|| UndefinedPerformance("script exhausted".to_string()))
        }
    }

    fn tiny_validation() -> ValidationSet {
        ValidationSet::new(
            DesignMatrix::Dense(Array2::eye(2)),
            array![1.0, 2.0],
            None,
        )
        .unwrap()
    }

    #[test]
    fn halts_after_patience_and_returns_the_best_snapshot() {
        let validation = tiny_validation();
        // Improves until iteration 3, then worsens monotonically.
        let measure = ScriptedMeasure::new(vec![5.0, 4.0, 3.0, 3.5, 4.0, 4.5, 5.0], true);
        let mut controller = EarlyStopping::new(&validation, &measure, 4);

        let mut control = IterationControl::Continue;
        let mut iteration = 0;
        while control == IterationControl::Continue {
            iteration += 1;
            let iterate = array![iteration as f64, 0.0];
            control = controller.observe(iteration, iterate.view());
        }

        assert_eq!(iteration, 3 + 4);
        assert_eq!(control, IterationControl::Stop(array![3.0, 0.0]));
        assert_eq!(controller.state(), ControllerState::Stopped);
        let summary = controller.summary();
        assert_eq!(summary.best_iteration, Some(3));
        assert_eq!(summary.best_score, Some(3.0));
        assert_eq!(summary.stopped_at, Some(7));
        assert_eq!(summary.evaluations, 7);

        // Terminal: further observations keep returning the snapshot.
        assert_eq!(
            controller.observe(8, array![8.0, 8.0].view()),
            IterationControl::Stop(array![3.0, 0.0])
        );
    }

    #[test]
    fn ties_do_not_count_as_improvement() {
        let validation = tiny_validation();
        let measure = ScriptedMeasure::new(vec![0.5, 0.5, 0.5], false);
        let mut controller = EarlyStopping::new(&validation, &measure, 2);
        assert_eq!(
            controller.observe(1, array![1.0, 1.0].view()),
            IterationControl::Continue
        );
        assert_eq!(
            controller.observe(2, array![2.0, 2.0].view()),
            IterationControl::Continue
        );
        assert_eq!(
            controller.observe(3, array![3.0, 3.0].view()),
            IterationControl::Stop(array![1.0, 1.0])
        );
    }

    #[test]
    fn higher_is_better_measures_track_maxima() {
        let validation = tiny_validation();
        let measure = ScriptedMeasure::new(vec![0.6, 0.7, 0.65, 0.9, 0.1], false);
        let mut controller = EarlyStopping::new(&validation, &measure, 1);
        for iteration in 1..=2 {
            let iterate = array![iteration as f64, 0.0];
            assert_eq!(
                controller.observe(iteration, iterate.view()),
                IterationControl::Continue
            );
        }
        assert_eq!(
            controller.observe(3, array![3.0, 0.0].view()),
            IterationControl::Stop(array![2.0, 0.0])
        );
        assert_eq!(controller.best_weights(), Some(array![2.0, 0.0].view()));
    }

    #[test]
    fn undefined_queries_are_excluded_from_the_average() {
        // Query 0 holds a single sample, so the ranking error comes from query 1 alone.
        let features = DesignMatrix::Dense(array![[1.0], [2.0], [3.0], [4.0], [5.0]]);
        let labels = array![1.0, 7.0, 2.0, 3.0, 1.0];
        let queries = vec![vec![0], vec![1, 2, 3, 4]];
        let validation = ValidationSet::new(features, labels, Some(&queries)).unwrap();
        let controller = EarlyStopping::new(&validation, &SqMpRank, 10);

        let weights = array![1.0];
        let expected = SqMpRank
            .score(array![7.0, 2.0, 3.0, 1.0].view(), array![2.0, 3.0, 4.0, 5.0].view())
            .unwrap();
        assert!((controller.evaluate(weights.view()) - expected).abs() < 1e-12);
    }

    #[test]
    fn all_undefined_scores_count_as_stalls() {
        let features = DesignMatrix::Dense(array![[1.0], [2.0]]);
        let validation =
            ValidationSet::new(features, array![0.0, 1.0], Some(&[vec![0], vec![1]])).unwrap();
        let mut controller = EarlyStopping::new(&validation, &SqMpRank, 2);
        assert!(controller.evaluate(array![1.0].view()).is_nan());
        assert_eq!(
            controller.observe(1, array![1.0].view()),
            IterationControl::Continue
        );
        // Nothing was ever finite, so the current iterate is returned.
        assert_eq!(
            controller.observe(2, array![2.0].view()),
            IterationControl::Stop(array![2.0])
        );
        assert_eq!(controller.summary().best_iteration, None);
    }

    #[test]
    fn validation_shapes_are_checked() {
        assert!(matches!(
            ValidationSet::new(DesignMatrix::Dense(Array2::zeros((3, 2))), array![1.0], None),
            Err(ConfigError::ValidationShapeMismatch { features: 3, labels: 1 })
        ));
        assert!(matches!(
            ValidationSet::new(
                DesignMatrix::Dense(Array2::zeros((3, 2))),
                array![1.0, 2.0, 3.0],
                Some(&[vec![0, 1]])
            ),
            Err(ConfigError::UnassignedSamples { count: 1, first: 2 })
        ));
    }
}
