//! Training, resumption, and online-test orchestration.
//!
//! The trainer owns the single mutable copy of the base parameters and
//! the adaptation rate. Per iteration it: samples a task and collects
//! rollouts (every `task_sample_frequency` iterations), runs the
//! meta-update, periodically evaluates, then logs and checkpoints.
//! Workers only ever see read-only snapshots; the optimizer steps here
//! are the only place the base parameters change during training.
//!
//! Test mode is the one exception: it commits each step's adapted
//! parameters into the live model before acting again, so the model
//! keeps specializing online for as long as an episode runs.

use std::fmt;
use std::path::Path;
use std::time::Instant;

use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};

use crate::adaptation::AdaptationEngine;
use crate::checkpoint::{Checkpointer, CheckpointError, TrainerCheckpoint};
use crate::collector::{TrajectoryCollector, WorkerError};
use crate::config::{ConfigError, MbmrlConfig};
use crate::control::Controller;
use crate::core::dataset::Dataset;
use crate::core::rollout::Rollout;
use crate::core::run_stats::RunStats;
use crate::environment::Task;
use crate::evaluator::Evaluator;
use crate::loss::Objective;
use crate::meta::MetaUpdate;
use crate::metrics::{IterationSnapshot, MetricsLogger};
use crate::model::{DynamicsModel, ModelError};
use crate::optim::{Adam, AdamConfig, ScalarAdam};

/// Top-level failure of a training or test run.
#[derive(Debug)]
pub enum TrainError {
    /// Invalid configuration, rejected before any work.
    Config(ConfigError),
    /// Checkpoint save or restore failed.
    Checkpoint(CheckpointError),
    /// A parallel worker failed.
    Worker(WorkerError),
    /// The model rejected a parameter commit.
    Model(ModelError),
}

impl fmt::Display for TrainError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            TrainError::Config(e) => write!(f, "configuration error: {}", e),
            TrainError::Checkpoint(e) => write!(f, "checkpoint error: {}", e),
            TrainError::Worker(e) => write!(f, "worker error: {}", e),
            TrainError::Model(e) => write!(f, "model error: {}", e),
        }
    }
}

impl std::error::Error for TrainError {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        match self {
            TrainError::Config(e) => Some(e),
            TrainError::Checkpoint(e) => Some(e),
            TrainError::Worker(e) => Some(e),
            TrainError::Model(e) => Some(e),
        }
    }
}

impl From<ConfigError> for TrainError {
    fn from(e: ConfigError) -> Self {
        TrainError::Config(e)
    }
}

impl From<CheckpointError> for TrainError {
    fn from(e: CheckpointError) -> Self {
        TrainError::Checkpoint(e)
    }
}

impl From<WorkerError> for TrainError {
    fn from(e: WorkerError) -> Self {
        TrainError::Worker(e)
    }
}

impl From<ModelError> for TrainError {
    fn from(e: ModelError) -> Self {
        TrainError::Model(e)
    }
}

/// Owns the training loop and all mutable learning state.
pub struct Trainer<M, C, T> {
    config: MbmrlConfig,
    model: M,
    controller: C,
    tasks: Vec<T>,
    phi: f32,
    dataset: Dataset,
    meta_optimizer: Adam,
    lr_optimizer: ScalarAdam,
    engine: AdaptationEngine,
    objective: Objective,
    collector: TrajectoryCollector,
    evaluator: Evaluator,
    meta: MetaUpdate,
    checkpointer: Checkpointer,
    logger: Box<dyn MetricsLogger>,
    rng: StdRng,
    stats: RunStats,
    model_loss: f32,
}

impl<M, C, T> Trainer<M, C, T>
where
    M: DynamicsModel + Clone + 'static,
    C: Controller<M, T> + Clone + 'static,
    T: Task + Clone + 'static,
{
    /// Build a trainer after validating `config`. Fails fast on an
    /// invalid configuration or an unwritable checkpoint directory.
    pub fn new(
        config: MbmrlConfig,
        model: M,
        controller: C,
        tasks: Vec<T>,
        checkpoint_dir: impl AsRef<Path>,
        logger: Box<dyn MetricsLogger>,
    ) -> Result<Self, TrainError> {
        config.validate()?;
        if tasks.is_empty() {
            return Err(ConfigError::InvalidCount {
                field: "tasks",
                value: 0,
            }
            .into());
        }

        let objective = config.objective();
        let engine = AdaptationEngine::new(config.adaptation_update_num);
        let collector = TrajectoryCollector::new(
            config.rollout_num,
            config.rollout_len,
            config.history_len,
            config.num_workers,
            engine,
            objective,
        );
        let evaluator = Evaluator::new(
            config.eval_episode_num,
            config.eval_sample_num,
            config.num_workers,
            config.history_len,
            engine,
            objective,
        );
        let meta = MetaUpdate::new(
            config.task_sample_num,
            config.history_len,
            config.lookahead_len,
            config.hvp_epsilon,
        );
        let meta_optimizer = Adam::new(model.base_params(), AdamConfig::with_lr(config.meta_lr));
        let lr_optimizer = ScalarAdam::new(AdamConfig::with_lr(config.adaptation_rate_lr));
        let checkpointer = Checkpointer::new(checkpoint_dir.as_ref(), 0)?;

        Ok(Self {
            phi: config.phi_init,
            dataset: Dataset::new(config.dataset_size),
            rng: StdRng::seed_from_u64(config.seed),
            config,
            model,
            controller,
            tasks,
            meta_optimizer,
            lr_optimizer,
            engine,
            objective,
            collector,
            evaluator,
            meta,
            checkpointer,
            logger,
            stats: RunStats::new(),
            model_loss: 0.0,
        })
    }

    /// Current adaptation rate.
    pub fn phi(&self) -> f32 {
        self.phi
    }

    /// Cumulative run counters.
    pub fn stats(&self) -> &RunStats {
        &self.stats
    }

    /// Read access to the model.
    pub fn model(&self) -> &M {
        &self.model
    }

    /// Rollouts currently stored.
    pub fn dataset_len(&self) -> usize {
        self.dataset.len()
    }

    /// Run the training loop, optionally resuming.
    ///
    /// With `resume`, restores the checkpoint at `load_iter` (or the
    /// latest when `None`) and continues from the following iteration.
    pub fn train(&mut self, resume: bool, load_iter: Option<usize>) -> Result<(), TrainError> {
        let start_iter = if resume { self.restore(load_iter)? } else { 0 };
        let time_prev = self.stats.time_total;
        let run_start = Instant::now();

        for iteration in start_iter..self.config.iteration_num {
            let sample_start = Instant::now();
            if iteration % self.config.task_sample_frequency == 0 {
                let task_idx = self.rng.gen_range(0..self.tasks.len());
                let mut task = self.tasks[task_idx].clone();
                let rollouts = self.collector.collect(
                    &self.model,
                    &mut self.controller,
                    &mut task,
                    self.phi,
                    &mut self.stats,
                )?;
                self.stats.add_rollouts(rollouts.len() as u64);
                self.dataset.extend(rollouts);
                self.dataset.shuffle(&mut self.rng);
            }
            let sample_secs = sample_start.elapsed().as_secs_f64();

            let meta_start = Instant::now();
            let outcome = self.meta.compute(
                &self.model,
                &self.engine,
                &self.dataset,
                self.phi,
                &self.objective,
                &mut self.rng,
                &mut self.stats,
            );
            let new_theta = self
                .meta_optimizer
                .step(self.model.base_params(), &outcome.theta_grad);
            self.model.commit_params(new_theta)?;
            self.phi = self.lr_optimizer.step(self.phi, outcome.phi_grad);
            self.model_loss = outcome.loss;
            let meta_secs = meta_start.elapsed().as_secs_f64();

            let eval_start = Instant::now();
            let mut task_rewards = Vec::new();
            if iteration % self.config.eval_frequency == 0 {
                let rewards = self.evaluator.evaluate(
                    &self.model,
                    &mut self.controller,
                    &mut self.tasks,
                    self.phi,
                )?;
                task_rewards = self
                    .tasks
                    .iter_mut()
                    .zip(rewards)
                    .map(|(task, reward)| (task.name().to_string(), reward))
                    .collect();
            }
            let eval_secs = eval_start.elapsed().as_secs_f64();

            self.stats.time_total = time_prev + run_start.elapsed().as_secs_f64();
            let snapshot = IterationSnapshot::new(
                iteration,
                self.model_loss,
                self.phi,
                self.dataset.len(),
                self.stats,
            )
            .with_task_rewards(task_rewards)
            .with_timings(sample_secs, meta_secs, eval_secs);
            self.logger.log(&snapshot);

            self.save_checkpoint(iteration)?;
        }

        self.logger.flush();
        Ok(())
    }

    /// Online-adaptation test: load a checkpoint and run `episode_num`
    /// episodes on `task`, committing each step's adapted parameters into
    /// the live model before acting again. The rollout history resets at
    /// every episode boundary. Returns the per-episode rewards.
    pub fn test(
        &mut self,
        task: &mut T,
        episode_num: usize,
        render: bool,
        load_iter: Option<usize>,
    ) -> Result<Vec<f32>, TrainError> {
        self.restore(load_iter)?;
        self.controller.set_task(task);

        let mut rewards = Vec::with_capacity(episode_num);
        for _ in 0..episode_num {
            let mut rollout = Rollout::new();
            let mut state = task.reset();
            let mut total = 0.0f32;
            loop {
                let history = rollout.tail(self.config.history_len);
                let adapted = self.engine.adapt(
                    &self.model,
                    &history,
                    self.model.base_params(),
                    self.phi,
                    &self.objective,
                    &mut self.stats,
                );
                let action = self
                    .controller
                    .plan(&self.model, &state, adapted.as_ref());
                let outcome = task.step(&action);
                total += outcome.reward;
                if let Some(params) = adapted {
                    self.model.commit_params(params)?;
                }
                if render {
                    task.render();
                }
                rollout.push(state, &action, outcome.next_state.clone());
                self.stats.add_task_steps(1);
                state = outcome.next_state;
                if outcome.done {
                    break;
                }
            }
            rewards.push(total);
        }
        Ok(rewards)
    }

    fn restore(&mut self, load_iter: Option<usize>) -> Result<usize, TrainError> {
        let checkpoint = match load_iter {
            Some(iteration) => self.checkpointer.load(iteration)?,
            None => self.checkpointer.load_latest()?,
        };
        self.model
            .commit_params(checkpoint.theta)
            .map_err(CheckpointError::Model)?;
        self.phi = checkpoint.phi;
        self.meta_optimizer = checkpoint.meta_optimizer;
        debug_assert!(self.meta_optimizer.matches(self.model.base_params()));
        self.lr_optimizer = checkpoint.lr_optimizer;
        self.model_loss = checkpoint.model_loss;
        self.stats = checkpoint.stats;
        self.dataset = self.checkpointer.load_dataset()?;
        Ok(checkpoint.iteration + 1)
    }

    fn save_checkpoint(&self, iteration: usize) -> Result<(), TrainError> {
        let checkpoint = TrainerCheckpoint {
            iteration,
            theta: self.model.base_params().clone(),
            phi: self.phi,
            meta_optimizer: self.meta_optimizer.clone(),
            lr_optimizer: self.lr_optimizer,
            model_loss: self.model_loss,
            stats: self.stats,
        };
        self.checkpointer.save(&checkpoint, &self.dataset)?;
        Ok(())
    }
}
