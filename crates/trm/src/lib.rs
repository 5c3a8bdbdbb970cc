//! # ironquill trm
//!
//! The tool-selection recommender: a deterministic keyword/history
//! ranker behind a status machine ([`TrmModel`]), a bounded episode
//! reservoir for training data ([`EpisodeBuffer`]), and a background
//! trainer with four self-supervised objectives ([`TrmTrainer`]).

pub mod buffer;
pub mod model;
pub mod trainer;

pub use buffer::{ContrastivePair, EpisodeBuffer, TrainingBatch};
pub use model::{TrmModel, TrmPrediction, TrmStatus};
pub use trainer::{TrainingCallback, TrainingProgress, TrmTrainer};
