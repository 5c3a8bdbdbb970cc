//! Episode buffer — bounded training reservoir over completed tasks.
//!
//! FIFO-evicting deque capped at 10 × the training threshold. A single
//! mutex serializes all access; samplers hold it only long enough to
//! copy episodes out, never across training work.

use rand::seq::SliceRandom;
use rand::Rng;
use std::collections::VecDeque;
use std::sync::Mutex;
use tracing::info;

use ironquill_config::TrmConfig;
use ironquill_memory::{Episode, EpisodicMemory};

/// A uniform, without-replacement sample of episodes.
#[derive(Debug, Default)]
pub struct TrainingBatch {
    pub indices: Vec<usize>,
    pub episodes: Vec<Episode>,
}

/// `(anchor, positive, negative)` where the positive shares the
/// anchor's outcome class and the negative is the other class.
#[derive(Debug)]
pub struct ContrastivePair {
    pub anchor: Episode,
    pub positive: Episode,
    pub negative: Episode,
}

struct BufferInner {
    episodes: VecDeque<Episode>,
    successful: usize,
    failed: usize,
}

pub struct EpisodeBuffer {
    inner: Mutex<BufferInner>,
    capacity: usize,
    min_for_training: usize,
}

impl EpisodeBuffer {
    pub fn new(config: &TrmConfig) -> Self {
        let min_for_training = config.min_episodes_before_training.max(1);
        Self {
            inner: Mutex::new(BufferInner {
                episodes: VecDeque::new(),
                successful: 0,
                failed: 0,
            }),
            capacity: min_for_training * 10,
            min_for_training,
        }
    }

    pub fn add(&self, episode: Episode) {
        let mut inner = self.inner.lock().unwrap();
        if episode.outcome.success {
            inner.successful += 1;
        } else {
            inner.failed += 1;
        }
        inner.episodes.push_back(episode);

        while inner.episodes.len() > self.capacity {
            if let Some(evicted) = inner.episodes.pop_front() {
                if evicted.outcome.success {
                    inner.successful -= 1;
                } else {
                    inner.failed -= 1;
                }
            }
        }
    }

    pub fn len(&self) -> usize {
        self.inner.lock().unwrap().episodes.len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    pub fn successful_count(&self) -> usize {
        self.inner.lock().unwrap().successful
    }

    pub fn failed_count(&self) -> usize {
        self.inner.lock().unwrap().failed
    }

    pub fn success_rate(&self) -> f32 {
        let inner = self.inner.lock().unwrap();
        let total = inner.successful + inner.failed;
        if total == 0 {
            return 0.0;
        }
        inner.successful as f32 / total as f32
    }

    pub fn successful(&self) -> Vec<Episode> {
        let inner = self.inner.lock().unwrap();
        inner
            .episodes
            .iter()
            .filter(|e| e.outcome.success)
            .cloned()
            .collect()
    }

    pub fn failed(&self) -> Vec<Episode> {
        let inner = self.inner.lock().unwrap();
        inner
            .episodes
            .iter()
            .filter(|e| !e.outcome.success)
            .cloned()
            .collect()
    }

    pub fn has_enough_for_training(&self) -> bool {
        self.len() >= self.min_for_training
    }

    pub fn clear(&self) {
        let mut inner = self.inner.lock().unwrap();
        inner.episodes.clear();
        inner.successful = 0;
        inner.failed = 0;
    }

    /// Uniform sample of `min(batch_size, len)` episodes without
    /// replacement.
    pub fn sample_batch(&self, batch_size: usize) -> TrainingBatch {
        let inner = self.inner.lock().unwrap();
        if inner.episodes.is_empty() {
            return TrainingBatch::default();
        }

        let mut rng = rand::thread_rng();
        let mut indices: Vec<usize> = (0..inner.episodes.len()).collect();
        indices.shuffle(&mut rng);
        indices.truncate(batch_size.min(inner.episodes.len()));

        let episodes = indices.iter().map(|&i| inner.episodes[i].clone()).collect();
        TrainingBatch { indices, episodes }
    }

    /// Sample contrastive triples split by outcome class. When only one
    /// class is present, falls back to random distinct triples.
    pub fn sample_contrastive_pairs(&self, num_pairs: usize) -> Vec<ContrastivePair> {
        let inner = self.inner.lock().unwrap();
        let episodes = &inner.episodes;
        if episodes.len() < 3 {
            return Vec::new();
        }

        let mut rng = rand::thread_rng();
        let success_idx: Vec<usize> = (0..episodes.len())
            .filter(|&i| episodes[i].outcome.success)
            .collect();
        let failure_idx: Vec<usize> = (0..episodes.len())
            .filter(|&i| !episodes[i].outcome.success)
            .collect();

        let mut pairs = Vec::new();

        if success_idx.is_empty() || failure_idx.is_empty() {
            // Single-class buffer: random distinct triples.
            let limit = num_pairs.min(episodes.len() / 3);
            for _ in 0..limit {
                let mut picks: Vec<usize> = (0..episodes.len()).collect();
                picks.shuffle(&mut rng);
                pairs.push(ContrastivePair {
                    anchor: episodes[picks[0]].clone(),
                    positive: episodes[picks[1]].clone(),
                    negative: episodes[picks[2]].clone(),
                });
            }
            return pairs;
        }

        for _ in 0..num_pairs {
            let anchor_success = rng.gen_bool(0.5);
            let (same_pool, other_pool) = if anchor_success {
                (&success_idx, &failure_idx)
            } else {
                (&failure_idx, &success_idx)
            };

            let anchor = same_pool[rng.gen_range(0..same_pool.len())];
            let mut positive = same_pool[rng.gen_range(0..same_pool.len())];
            if same_pool.len() > 1 {
                while positive == anchor {
                    positive = same_pool[rng.gen_range(0..same_pool.len())];
                }
            }
            let negative = other_pool[rng.gen_range(0..other_pool.len())];

            pairs.push(ContrastivePair {
                anchor: episodes[anchor].clone(),
                positive: episodes[positive].clone(),
                negative: episodes[negative].clone(),
            });
        }

        pairs
    }

    /// Bulk-ingest previously stored episodes (startup path). Returns
    /// how many were loaded.
    pub fn load_from_memory(&self, episodic: &EpisodicMemory) -> usize {
        let all = episodic.all_episodes();
        let loaded = all.len();
        for episode in all {
            self.add(episode);
        }
        info!(count = loaded, "Seeded episode buffer from episodic memory");
        loaded
    }
}
