//! Performance measures used to score validation predictions.
//!
//! Every measure carries its own polarity: error measures improve downwards,
//! the rest improve upwards. A measure that cannot be computed for a given
//! input (for instance a query where all labels are tied) reports
//! [`UndefinedPerformance`] instead of a made-up number.

use ndarray::{Array1, ArrayView1};
use serde::{Deserialize, Serialize};
use std::cmp::Ordering;
use thiserror::Error;

#[derive(Error, Debug, Clone, PartialEq, Eq)]
#[error("Performance is undefined: {0}")]
pub struct UndefinedPerformance(pub String);

pub trait PerformanceMeasure {
    fn name(&self) -> &'static str;

    /// `true` when lower scores are better.
    fn is_error(&self) -> bool;

    /// Scores `predictions` against `labels`. Both must have the same length.
    fn score(
        &self,
        labels: ArrayView1<f64>,
        predictions: ArrayView1<f64>,
    ) -> Result<f64, UndefinedPerformance>;
}

/// Selects one of the built-in measures from configuration.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub enum MeasureKind {
    #[default]
    #[serde(rename = "sqmprank")]
    SqMpRank,
    #[serde(rename = "cindex")]
    CIndex,
    #[serde(rename = "auc")]
    Auc,
    #[serde(rename = "fscore")]
    FScore,
}

impl MeasureKind {
    pub fn build(self) -> Box<dyn PerformanceMeasure> {
        match self {
            Self::SqMpRank => Box::new(SqMpRank),
            Self::CIndex => Box::new(ConcordanceIndex),
            Self::Auc => Box::new(Auc),
            Self::FScore => Box::new(FScore),
        }
    }
}

/// Squared magnitude preserving ranking error:
/// `Σ_{i<j} (y_i − y_j − p_i + p_j)²` divided by the number of pairs.
#[derive(Debug, Clone, Copy, Default)]
pub struct SqMpRank;

impl PerformanceMeasure for SqMpRank {
    fn name(&self) -> &'static str {
        "sqmprank"
    }

    fn is_error(&self) -> bool {
        true
    }

    fn score(
        &self,
        labels: ArrayView1<f64>,
        predictions: ArrayView1<f64>,
    ) -> Result<f64, UndefinedPerformance> {
        assert_eq!(labels.len(), predictions.len());
        let n = labels.len();
        if n < 2 {
            return Err(UndefinedPerformance(format!(
                "squared ranking error needs at least two samples, got {n}"
            )));
        }
        let diff: Array1<f64> = &labels - &predictions;
        let total = diff.sum();
        // n·Σd² − (Σd)² equals the sum of squared pairwise differences.
        let centered = diff.mapv(|d| n as f64 * d - total);
        let pairs = (n * (n - 1) / 2) as f64;
        Ok(centered.dot(&diff) / pairs)
    }
}

/// Concordance index: the fraction of pairs with distinct labels that the
/// predictions order correctly, counting tied predictions as half correct.
#[derive(Debug, Clone, Copy, Default)]
pub struct ConcordanceIndex;

impl PerformanceMeasure for ConcordanceIndex {
    fn name(&self) -> &'static str {
        "cindex"
    }

    fn is_error(&self) -> bool {
        false
    }

    fn score(
        &self,
        labels: ArrayView1<f64>,
        predictions: ArrayView1<f64>,
    ) -> Result<f64, UndefinedPerformance> {
        assert_eq!(labels.len(), predictions.len());
        let n = labels.len();
        let mut pairs = 0usize;
        let mut discordant = 0.0;
        for i in 0..n {
            for j in (i + 1)..n {
                let label_order = labels[i].partial_cmp(&labels[j]);
                if matches!(label_order, Some(Ordering::Equal) | None) {
                    continue;
                }
                pairs += 1;
                match predictions[i].partial_cmp(&predictions[j]) {
                    Some(Ordering::Equal) | None => discordant += 0.5,
                    prediction_order if prediction_order != label_order => discordant += 1.0,
                    _ => {}
                }
            }
        }
        if pairs == 0 {
            return Err(UndefinedPerformance(
                "no pairs, all the instances have the same label".to_string(),
            ));
        }
        Ok(1.0 - discordant / pairs as f64)
    }
}

/// Area under the ROC curve for labels in {-1, 1} (anything positive counts
/// as the positive class). Tied predictions contribute one half.
#[derive(Debug, Clone, Copy, Default)]
pub struct Auc;

impl PerformanceMeasure for Auc {
    fn name(&self) -> &'static str {
        "auc"
    }

    fn is_error(&self) -> bool {
        false
    }

    fn score(
        &self,
        labels: ArrayView1<f64>,
        predictions: ArrayView1<f64>,
    ) -> Result<f64, UndefinedPerformance> {
        assert_eq!(labels.len(), predictions.len());
        let n = labels.len();
        let n_pos = labels.iter().filter(|&&y| y > 0.0).count() as f64;
        let n_neg = n as f64 - n_pos;
        if n_pos == 0.0 || n_neg == 0.0 {
            return Err(UndefinedPerformance(
                "AUC undefined if both classes not present".to_string(),
            ));
        }

        // Sort indices by prediction score ascending
        let mut idx: Vec<usize> = (0..n).collect();
        idx.sort_by(|&i, &j| {
            predictions[i]
                .partial_cmp(&predictions[j])
                .unwrap_or(Ordering::Equal)
        });

        // Average ranks over tied predictions
        let mut ranks = vec![0.0; n];
        let mut i = 0;
        while i < n {
            let mut j = i + 1;
            while j < n && predictions[idx[j]] == predictions[idx[i]] {
                j += 1;
            }
            let avg_rank = (i + j - 1) as f64 / 2.0 + 1.0;
            for &k in &idx[i..j] {
                ranks[k] = avg_rank;
            }
            i = j;
        }

        let sum_ranks_pos: f64 = labels
            .iter()
            .zip(&ranks)
            .filter(|&(&y, _)| y > 0.0)
            .map(|(_, &rank)| rank)
            .sum();

        // Mann-Whitney U statistic converted to AUC
        let u = sum_ranks_pos - n_pos * (n_pos + 1.0) / 2.0;
        Ok(u / (n_pos * n_neg))
    }
}

/// F1 score for labels in {-1, 1}; a prediction above zero is a positive call.
#[derive(Debug, Clone, Copy, Default)]
pub struct FScore;

impl PerformanceMeasure for FScore {
    fn name(&self) -> &'static str {
        "fscore"
    }

    fn is_error(&self) -> bool {
        false
    }

    fn score(
        &self,
        labels: ArrayView1<f64>,
        predictions: ArrayView1<f64>,
    ) -> Result<f64, UndefinedPerformance> {
        assert_eq!(labels.len(), predictions.len());
        let mut true_pos = 0usize;
        let mut false_pos = 0usize;
        let mut false_neg = 0usize;
        for (&y, &p) in labels.iter().zip(predictions.iter()) {
            match (y > 0.0, p > 0.0) {
                (true, true) => true_pos += 1,
                (true, false) => false_neg += 1,
                (false, true) => false_pos += 1,
                (false, false) => {}
            }
        }
        if true_pos == 0 {
            return Err(UndefinedPerformance(
                "F-score undefined without true positives".to_string(),
            ));
        }
        let precision = true_pos as f64 / (true_pos + false_pos) as f64;
        let recall = true_pos as f64 / (true_pos + false_neg) as f64;
        Ok(2.0 * precision * recall / (precision + recall))
    }
}
