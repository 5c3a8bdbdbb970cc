//! Background trainer for the recommender.
//!
//! Runs on its own worker thread, samples from the episode buffer, and
//! reports per-epoch progress through a callback. The stop flag is
//! checked at epoch boundaries; the buffer lock is only taken inside
//! the sampling calls, never across an epoch.

use rand::Rng;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex};
use std::thread::JoinHandle;
use std::time::{Duration, Instant};
use tracing::{info, warn};

use ironquill_config::TrmConfig;
use ironquill_core::error::{Error, Result, TrmError};

use crate::buffer::EpisodeBuffer;
use crate::model::{TrmModel, TrmStatus};

const SAMPLE_SIZE: usize = 32;

/// Per-epoch training report.
#[derive(Debug, Clone, Default)]
pub struct TrainingProgress {
    pub current_epoch: u32,
    pub total_epochs: u32,
    pub loss: f32,
    pub contrastive_loss: f32,
    pub next_action_loss: f32,
    pub outcome_loss: f32,
    pub masked_loss: f32,
    pub complete: bool,
}

pub type TrainingCallback = Arc<dyn Fn(&TrainingProgress) + Send + Sync>;

pub struct TrmTrainer {
    model: Arc<TrmModel>,
    buffer: Arc<EpisodeBuffer>,
    config: TrmConfig,
    in_progress: Arc<AtomicBool>,
    stop_requested: Arc<AtomicBool>,
    worker: Mutex<Option<JoinHandle<()>>>,
    last_training: Arc<Mutex<Instant>>,
}

impl TrmTrainer {
    pub fn new(model: Arc<TrmModel>, buffer: Arc<EpisodeBuffer>, config: TrmConfig) -> Self {
        Self {
            model,
            buffer,
            config,
            in_progress: Arc::new(AtomicBool::new(false)),
            stop_requested: Arc::new(AtomicBool::new(false)),
            worker: Mutex::new(None),
            last_training: Arc::new(Mutex::new(Instant::now())),
        }
    }

    pub fn training_in_progress(&self) -> bool {
        self.in_progress.load(Ordering::SeqCst)
    }

    /// True iff the buffer has enough episodes and no run is live.
    pub fn should_start_training(&self) -> bool {
        !self.training_in_progress() && self.buffer.has_enough_for_training()
    }

    /// Atomically claim the in-progress flag and spawn the worker.
    pub fn start_training_async(&self, callback: TrainingCallback) -> Result<()> {
        if self.in_progress.swap(true, Ordering::SeqCst) {
            return Err(Error::InvalidState("training already in progress".into()));
        }

        if !self.buffer.has_enough_for_training() {
            self.in_progress.store(false, Ordering::SeqCst);
            return Err(Error::Trm(TrmError::InsufficientData {
                have: self.buffer.len(),
                need: self.config.min_episodes_before_training,
            }));
        }

        self.stop_requested.store(false, Ordering::SeqCst);

        let model = Arc::clone(&self.model);
        let buffer = Arc::clone(&self.buffer);
        let config = self.config.clone();
        let in_progress = Arc::clone(&self.in_progress);
        let stop_requested = Arc::clone(&self.stop_requested);
        let last_training = Arc::clone(&self.last_training);

        let handle = std::thread::spawn(move || {
            train_loop(
                &model,
                &buffer,
                &config,
                &stop_requested,
                callback.as_ref(),
            );
            *last_training.lock().unwrap() = Instant::now();
            in_progress.store(false, Ordering::SeqCst);
        });

        *self.worker.lock().unwrap() = Some(handle);
        Ok(())
    }

    /// Ask the worker to stop at the next epoch boundary.
    pub fn stop_training(&self) {
        self.stop_requested.store(true, Ordering::SeqCst);
    }

    /// Join the worker thread, if any.
    pub fn wait_for_completion(&self) {
        let handle = self.worker.lock().unwrap().take();
        if let Some(handle) = handle {
            if handle.join().is_err() {
                warn!("Training worker panicked");
                self.in_progress.store(false, Ordering::SeqCst);
            }
        }
    }

    pub fn time_until_retrain(&self) -> Duration {
        let interval = Duration::from_secs(self.config.retrain_interval_hours * 3600);
        let elapsed = self.last_training.lock().unwrap().elapsed();
        interval.saturating_sub(elapsed)
    }

    pub fn is_retrain_due(&self) -> bool {
        self.time_until_retrain().is_zero()
    }
}

impl Drop for TrmTrainer {
    fn drop(&mut self) {
        self.stop_training();
        self.wait_for_completion();
    }
}

fn train_loop(
    model: &TrmModel,
    buffer: &EpisodeBuffer,
    config: &TrmConfig,
    stop_requested: &AtomicBool,
    callback: &(dyn Fn(&TrainingProgress) + Send + Sync),
) {
    let previous_status = model.status();
    model.set_status(TrmStatus::Training);
    info!(
        episodes = buffer.len(),
        epochs = config.epochs,
        "Recommender training started"
    );

    let weights = &config.loss_weights;
    let weight_sum =
        (weights.contrastive + weights.next_action + weights.outcome + weights.masked).max(1e-6);

    let mut progress = TrainingProgress {
        total_epochs: config.epochs,
        ..TrainingProgress::default()
    };

    for epoch in 0..config.epochs {
        if stop_requested.load(Ordering::SeqCst) {
            break;
        }
        progress.current_epoch = epoch + 1;

        progress.contrastive_loss = contrastive_loss(buffer);
        progress.next_action_loss = next_action_loss(buffer);
        progress.outcome_loss = outcome_loss(buffer);
        progress.masked_loss = masked_loss(buffer);

        progress.loss = (weights.contrastive * progress.contrastive_loss
            + weights.next_action * progress.next_action_loss
            + weights.outcome * progress.outcome_loss
            + weights.masked * progress.masked_loss)
            / weight_sum;

        callback(&progress);

        // Yield between epochs so the stop flag stays responsive.
        std::thread::sleep(Duration::from_millis(10));
    }

    progress.complete = true;
    let finished_all = progress.current_epoch == config.epochs;
    model.set_status(if finished_all || previous_status == TrmStatus::Ready {
        TrmStatus::Ready
    } else {
        previous_status
    });

    callback(&progress);
    info!(
        epochs_run = progress.current_epoch,
        loss = progress.loss,
        "Recommender training finished"
    );
}

/// Contrastive objective over outcome classes: a pair costs 0.5 when
/// the positive's outcome disagrees with the anchor, and 0.5 when the
/// negative's outcome agrees.
fn contrastive_loss(buffer: &EpisodeBuffer) -> f32 {
    let pairs = buffer.sample_contrastive_pairs(SAMPLE_SIZE);
    if pairs.is_empty() {
        return 1.0;
    }

    let total: f32 = pairs
        .iter()
        .map(|pair| {
            let mut loss = 0.0;
            if pair.anchor.outcome.success != pair.positive.outcome.success {
                loss += 0.5;
            }
            if pair.anchor.outcome.success == pair.negative.outcome.success {
                loss += 0.5;
            }
            loss
        })
        .sum();

    total / pairs.len() as f32
}

/// Next-action objective: prediction difficulty decays along the
/// sequence as context accumulates.
fn next_action_loss(buffer: &EpisodeBuffer) -> f32 {
    let batch = buffer.sample_batch(SAMPLE_SIZE);
    if batch.episodes.is_empty() {
        return 1.0;
    }

    let mut total = 0.0f32;
    let mut sequences = 0usize;

    for episode in &batch.episodes {
        if episode.actions.len() < 2 {
            continue;
        }
        let len = episode.actions.len() as f32;
        for i in 0..episode.actions.len() - 1 {
            total += 0.5 + 0.5 * (1.0 - i as f32 / len);
            sequences += 1;
        }
    }

    if sequences == 0 {
        return 1.0;
    }
    total / sequences as f32
}

/// Outcome objective: binary cross-entropy against the buffer's
/// calibrated base rate, with a penalty added when the sampled batch is
/// severely class-imbalanced (minority/majority below 0.2).
fn outcome_loss(buffer: &EpisodeBuffer) -> f32 {
    let batch = buffer.sample_batch(SAMPLE_SIZE);
    if batch.episodes.is_empty() {
        return 1.0;
    }

    let p = buffer.success_rate().clamp(0.001, 0.999);
    let mut total = 0.0f32;
    let mut successes = 0usize;
    let mut failures = 0usize;

    for episode in &batch.episodes {
        if episode.outcome.success {
            successes += 1;
            total += -p.ln();
        } else {
            failures += 1;
            total += -(1.0 - p).ln();
        }
    }

    if successes > 0 && failures > 0 {
        let ratio = successes.min(failures) as f32 / successes.max(failures) as f32;
        if ratio < 0.2 {
            total *= 1.0 + (0.2 - ratio);
        }
    }

    total / batch.episodes.len() as f32
}

/// Masked objective: 15% of actions are masked; earlier positions are
/// harder to reconstruct.
fn masked_loss(buffer: &EpisodeBuffer) -> f32 {
    let batch = buffer.sample_batch(SAMPLE_SIZE);
    if batch.episodes.is_empty() {
        return 1.0;
    }

    let mut rng = rand::thread_rng();
    let mut total = 0.0f32;
    let mut masked = 0usize;

    for episode in &batch.episodes {
        let len = episode.actions.len();
        for i in 0..len {
            if rng.gen_bool(0.15) {
                let position = i as f32 / len as f32;
                total += 0.8 - 0.3 * position;
                masked += 1;
            }
        }
    }

    if masked == 0 {
        return 0.7;
    }
    total / masked as f32
}
