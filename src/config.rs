//! Configuration for meta-training.
//!
//! All hyperparameters live in one struct with builder-style setters and an
//! explicit [`MbmrlConfig::validate`] that rejects inconsistent settings
//! before any training starts.

use std::fmt;

use serde::{Deserialize, Serialize};

use crate::loss::{LossKind, Objective};

/// Configuration validation error.
///
/// Returned when configuration parameters are invalid or inconsistent.
#[derive(Debug, Clone, PartialEq)]
pub enum ConfigError {
    /// A count parameter (iterations, rollouts, workers, ...) must be positive.
    InvalidCount { field: &'static str, value: usize },
    /// A parameter is outside its valid range.
    OutOfRange {
        field: &'static str,
        value: f32,
        min: f32,
        max: f32,
    },
    /// The sampling window does not fit into a rollout.
    WindowTooLong {
        history: usize,
        lookahead: usize,
        rollout_len: usize,
    },
    /// Unrecognized loss kind string.
    UnknownLossKind { name: String },
}

impl fmt::Display for ConfigError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ConfigError::InvalidCount { field, value } => {
                write!(f, "{} must be > 0, got {}", field, value)
            }
            ConfigError::OutOfRange {
                field,
                value,
                min,
                max,
            } => {
                write!(f, "{} must be in [{}, {}], got {}", field, min, max, value)
            }
            ConfigError::WindowTooLong {
                history,
                lookahead,
                rollout_len,
            } => write!(
                f,
                "history_len + lookahead_len ({} + {}) must not exceed rollout_len ({})",
                history, lookahead, rollout_len
            ),
            ConfigError::UnknownLossKind { name } => {
                write!(f, "unknown loss kind '{}', expected 'mse' or 'nll'", name)
            }
        }
    }
}

impl std::error::Error for ConfigError {}

/// Hyperparameters for model-based meta-RL training.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct MbmrlConfig {
    /// Base random seed; workers derive their own from it.
    pub seed: u64,
    /// Total number of training iterations.
    pub iteration_num: usize,
    /// Windows sampled per meta-update (N).
    pub task_sample_num: usize,
    /// Iterations between task sampling / collection phases (n_s).
    pub task_sample_frequency: usize,
    /// Iterations between reward evaluations.
    pub eval_frequency: usize,
    /// Parallel evaluation workers.
    pub eval_sample_num: usize,
    /// Episodes per task in serial evaluation.
    pub eval_episode_num: usize,
    /// Transitions per rollout.
    pub rollout_len: usize,
    /// Rollouts per collection phase.
    pub rollout_num: usize,
    /// Additional traced gradient steps per adaptation (after the first).
    pub adaptation_update_num: usize,
    /// Trailing transitions used to adapt (M).
    pub history_len: usize,
    /// Held-out transitions per sampled window (K).
    pub lookahead_len: usize,
    /// Meta learning rate for theta (beta).
    pub meta_lr: f32,
    /// Learning rate for the adaptation rate phi (eta).
    pub adaptation_rate_lr: f32,
    /// Initial adaptation rate phi.
    pub phi_init: f32,
    /// Maximum rollouts retained in the dataset.
    pub dataset_size: usize,
    /// Fixed std for the Gaussian NLL loss.
    pub pred_std: f32,
    /// Loss kind between predicted and actual next-state.
    pub loss_kind: LossKind,
    /// Scaling factor of the loss.
    pub loss_scale: f32,
    /// Worker threads for parallel collection/evaluation (1 = serial).
    pub num_workers: usize,
    /// Perturbation radius for Hessian-vector products in the meta
    /// backward pass.
    pub hvp_epsilon: f32,
}

impl Default for MbmrlConfig {
    fn default() -> Self {
        Self {
            seed: 0,
            iteration_num: 100,
            task_sample_num: 8,
            task_sample_frequency: 1,
            eval_frequency: 10,
            eval_sample_num: 1,
            eval_episode_num: 5,
            rollout_len: 64,
            rollout_num: 8,
            adaptation_update_num: 1,
            history_len: 16,
            lookahead_len: 16,
            meta_lr: 1e-3,
            adaptation_rate_lr: 1e-4,
            phi_init: 1e-2,
            dataset_size: 64,
            pred_std: 1.0,
            loss_kind: LossKind::MeanSquaredError,
            loss_scale: 1.0,
            num_workers: 1,
            hvp_epsilon: 1e-3,
        }
    }
}

impl MbmrlConfig {
    /// Default configuration.
    pub fn new() -> Self {
        Self::default()
    }

    /// Set the base random seed.
    pub fn with_seed(mut self, seed: u64) -> Self {
        self.seed = seed;
        self
    }

    /// Set the total iteration count.
    pub fn with_iteration_num(mut self, n: usize) -> Self {
        self.iteration_num = n;
        self
    }

    /// Set windows sampled per meta-update.
    pub fn with_task_sample_num(mut self, n: usize) -> Self {
        self.task_sample_num = n;
        self
    }

    /// Set the collection frequency.
    pub fn with_task_sample_frequency(mut self, n: usize) -> Self {
        self.task_sample_frequency = n;
        self
    }

    /// Set the evaluation frequency.
    pub fn with_eval_frequency(mut self, n: usize) -> Self {
        self.eval_frequency = n;
        self
    }

    /// Set the number of parallel evaluation workers.
    pub fn with_eval_sample_num(mut self, n: usize) -> Self {
        self.eval_sample_num = n;
        self
    }

    /// Set episodes per task in serial evaluation.
    pub fn with_eval_episode_num(mut self, n: usize) -> Self {
        self.eval_episode_num = n;
        self
    }

    /// Set transitions per rollout.
    pub fn with_rollout_len(mut self, n: usize) -> Self {
        self.rollout_len = n;
        self
    }

    /// Set rollouts per collection phase.
    pub fn with_rollout_num(mut self, n: usize) -> Self {
        self.rollout_num = n;
        self
    }

    /// Set the number of traced adaptation steps after the first.
    pub fn with_adaptation_update_num(mut self, n: usize) -> Self {
        self.adaptation_update_num = n;
        self
    }

    /// Set the adaptation window length M.
    pub fn with_history_len(mut self, m: usize) -> Self {
        self.history_len = m;
        self
    }

    /// Set the query window length K.
    pub fn with_lookahead_len(mut self, k: usize) -> Self {
        self.lookahead_len = k;
        self
    }

    /// Set the meta learning rate beta.
    pub fn with_meta_lr(mut self, lr: f32) -> Self {
        self.meta_lr = lr;
        self
    }

    /// Set the adaptation-rate learning rate eta.
    pub fn with_adaptation_rate_lr(mut self, lr: f32) -> Self {
        self.adaptation_rate_lr = lr;
        self
    }

    /// Set the initial adaptation rate phi.
    pub fn with_phi_init(mut self, phi: f32) -> Self {
        self.phi_init = phi;
        self
    }

    /// Set the dataset capacity in rollouts.
    pub fn with_dataset_size(mut self, n: usize) -> Self {
        self.dataset_size = n;
        self
    }

    /// Set the NLL prediction std.
    pub fn with_pred_std(mut self, std: f32) -> Self {
        self.pred_std = std;
        self
    }

    /// Set the loss kind.
    pub fn with_loss_kind(mut self, kind: LossKind) -> Self {
        self.loss_kind = kind;
        self
    }

    /// Set the loss scale.
    pub fn with_loss_scale(mut self, scale: f32) -> Self {
        self.loss_scale = scale;
        self
    }

    /// Set the worker thread count.
    pub fn with_num_workers(mut self, n: usize) -> Self {
        self.num_workers = n;
        self
    }

    /// Set the Hessian-vector-product probe radius.
    pub fn with_hvp_epsilon(mut self, epsilon: f32) -> Self {
        self.hvp_epsilon = epsilon;
        self
    }

    /// Check all parameters for consistency. Call before training; every
    /// violation is fatal at startup.
    pub fn validate(&self) -> Result<(), ConfigError> {
        let counts: [(&'static str, usize); 10] = [
            ("iteration_num", self.iteration_num),
            ("task_sample_num", self.task_sample_num),
            ("task_sample_frequency", self.task_sample_frequency),
            ("eval_frequency", self.eval_frequency),
            ("eval_episode_num", self.eval_episode_num),
            ("rollout_len", self.rollout_len),
            ("rollout_num", self.rollout_num),
            ("history_len", self.history_len),
            ("dataset_size", self.dataset_size),
            ("num_workers", self.num_workers),
        ];
        for (field, value) in counts {
            if value == 0 {
                return Err(ConfigError::InvalidCount { field, value });
            }
        }
        if self.history_len + self.lookahead_len > self.rollout_len {
            return Err(ConfigError::WindowTooLong {
                history: self.history_len,
                lookahead: self.lookahead_len,
                rollout_len: self.rollout_len,
            });
        }
        for (field, value) in [
            ("meta_lr", self.meta_lr),
            ("adaptation_rate_lr", self.adaptation_rate_lr),
            ("loss_scale", self.loss_scale),
            ("hvp_epsilon", self.hvp_epsilon),
        ] {
            if !value.is_finite() || value <= 0.0 {
                return Err(ConfigError::OutOfRange {
                    field,
                    value,
                    min: f32::MIN_POSITIVE,
                    max: f32::MAX,
                });
            }
        }
        if self.loss_kind == LossKind::GaussianNll
            && (!self.pred_std.is_finite() || self.pred_std <= 0.0)
        {
            return Err(ConfigError::OutOfRange {
                field: "pred_std",
                value: self.pred_std,
                min: f32::MIN_POSITIVE,
                max: f32::MAX,
            });
        }
        if !self.phi_init.is_finite() {
            return Err(ConfigError::OutOfRange {
                field: "phi_init",
                value: self.phi_init,
                min: f32::MIN,
                max: f32::MAX,
            });
        }
        Ok(())
    }

    /// Build the loss evaluator described by this configuration.
    pub fn objective(&self) -> Objective {
        Objective::new(self.loss_kind, self.pred_std, self.loss_scale)
    }
}
