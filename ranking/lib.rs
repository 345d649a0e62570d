#![deny(unused_variables)]
#![deny(dead_code)]
#![deny(unused_imports)]
//! Linear RankRLS trained with a matrix-free conjugate gradient solver.
//!
//! The crate learns a linear scoring function from utility labels, labels
//! grouped into queries, or explicit preference pairs, optionally halting the
//! solve early based on performance on a validation set.

pub mod cg;
pub mod config;
pub mod early_stop;
pub mod matrix;
pub mod measure;
pub mod model;
pub mod operator;
pub mod preference;
pub mod train;

pub use config::{ConfigError, TrainingConfig};
pub use early_stop::ValidationSet;
pub use matrix::DesignMatrix;
pub use measure::MeasureKind;
pub use model::LinearModel;
pub use train::{CgRankRls, RankerFit, TrainingData, TrainingError, train_ranker};
