//! # mbmrl: Model-Based Meta-Reinforcement Learning
//!
//! Gradient-based meta-learning (MAML-style) for dynamics models: learns a
//! base parameter set that specializes to the recent behavior of a control
//! task within a handful of gradient steps, then plans through the adapted
//! model.
//!
//! ## Architecture Overview
//!
//! ```text
//! ┌────────────────────────────────────────────────────────────────┐
//! │                          Trainer                               │
//! ├────────────────────────────────────────────────────────────────┤
//! │  sample task                                                   │
//! │      │                                                         │
//! │      ▼                                                         │
//! │  ┌────────────────────┐     collector workers (threads)        │
//! │  │ TrajectoryCollector│──►  adapt(tail M) → plan → step        │
//! │  └─────────┬──────────┘                                        │
//! │            ▼                                                   │
//! │       ┌─────────┐   sample M+K windows   ┌────────────┐        │
//! │       │ Dataset │ ─────────────────────► │ MetaUpdate │        │
//! │       └─────────┘                        └─────┬──────┘        │
//! │                                                ▼               │
//! │   AdaptationEngine (traced inner steps) → reverse sweep        │
//! │   theta ← Adam(theta_grad)    phi ← Adam(phi_grad)             │
//! │                                                                │
//! │   every eval_frequency: Evaluator (per-step adaptation)        │
//! │   every iteration: MetricsLogger + Checkpointer                │
//! └────────────────────────────────────────────────────────────────┘
//! ```
//!
//! ## Second-Order Gradients
//!
//! The inner adaptation loop records every gradient step in an
//! [`adaptation::AdaptationTrace`]. The meta-update walks that tape in
//! reverse, turning Hessian-vector products (formed by central differences
//! of the window gradient) into exact-to-first-order meta-gradients for
//! both the base parameters and the learned adaptation rate, without an
//! autodiff framework.
//!
//! ## Usage
//!
//! ```rust,ignore
//! use mbmrl::{MbmrlConfig, Trainer, MlpDynamics, RandomShooting, ConsoleLogger};
//!
//! let config = MbmrlConfig::new()
//!     .with_iteration_num(500)
//!     .with_history_len(16)
//!     .with_lookahead_len(8)
//!     .with_num_workers(4);
//!
//! let mut trainer = Trainer::new(
//!     config, model, controller, tasks, "./checkpoints",
//!     Box::new(ConsoleLogger::new(1)),
//! )?;
//! trainer.train(false, None)?;
//! ```

pub mod adaptation;
pub mod checkpoint;
pub mod collector;
pub mod config;
pub mod control;
pub mod core;
pub mod environment;
pub mod evaluator;
pub mod loss;
pub mod meta;
pub mod metrics;
pub mod model;
pub mod nn;
pub mod optim;
pub mod trainer;

// Re-export commonly used types
pub use adaptation::{AdaptationEngine, AdaptationTrace};
pub use checkpoint::{Checkpointer, CheckpointError, TrainerCheckpoint};
pub use collector::{TrajectoryCollector, WorkerError};
pub use config::{ConfigError, MbmrlConfig};
pub use control::{Controller, RandomController, RandomShooting, RewardModel};
pub use crate::core::dataset::Dataset;
pub use crate::core::params::{ParamSet, ParamTensor};
pub use crate::core::rollout::{Rollout, TrajWindow, WindowView};
pub use crate::core::run_stats::RunStats;
pub use environment::{Action, StepOutcome, Task};
pub use evaluator::Evaluator;
pub use loss::{LossKind, Objective};
pub use meta::{MetaOutcome, MetaUpdate};
pub use metrics::{ConsoleLogger, CsvLogger, IterationSnapshot, MetricsLogger, MultiLogger};
pub use model::{DynamicsModel, ModelError};
pub use nn::MlpDynamics;
pub use optim::{Adam, AdamConfig, ScalarAdam};
pub use trainer::{TrainError, Trainer};
