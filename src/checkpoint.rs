//! Training-state checkpointing.
//!
//! Persists everything resume needs in one bundle per iteration: base
//! parameters, adaptation rate, both optimizer states, the loss, and the
//! run counters. The dataset snapshot is written separately so the large
//! rollout history is saved once per checkpoint call rather than embedded
//! in every bundle read.
//!
//! Checkpoints are plain JSON files named `checkpoint_{iteration:08}.json`
//! with automatic cleanup of all but the most recent N.

use std::fs;
use std::io;
use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};

use crate::core::dataset::Dataset;
use crate::core::params::ParamSet;
use crate::core::run_stats::RunStats;
use crate::model::ModelError;
use crate::optim::{Adam, ScalarAdam};

const DATASET_FILE: &str = "dataset.json";

/// Everything needed to resume training from an iteration boundary.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TrainerCheckpoint {
    /// Iteration this state was saved after.
    pub iteration: usize,
    /// Base model parameters.
    pub theta: ParamSet,
    /// Learnable adaptation rate.
    pub phi: f32,
    /// Optimizer state for the base parameters.
    pub meta_optimizer: Adam,
    /// Optimizer state for the adaptation rate.
    pub lr_optimizer: ScalarAdam,
    /// Meta-loss at save time.
    pub model_loss: f32,
    /// Cumulative run counters.
    pub stats: RunStats,
}

/// Error type for checkpointing operations.
#[derive(Debug)]
pub enum CheckpointError {
    /// IO error during save/load.
    Io(io::Error),
    /// Serialization error.
    Serde(serde_json::Error),
    /// No checkpoints found.
    NoCheckpoints,
    /// Restored parameters do not fit the live model.
    Model(ModelError),
}

impl std::fmt::Display for CheckpointError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            CheckpointError::Io(e) => write!(f, "IO error: {}", e),
            CheckpointError::Serde(e) => write!(f, "serialization error: {}", e),
            CheckpointError::NoCheckpoints => write!(f, "no checkpoints found"),
            CheckpointError::Model(e) => write!(f, "restored parameters rejected: {}", e),
        }
    }
}

impl std::error::Error for CheckpointError {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        match self {
            CheckpointError::Io(e) => Some(e),
            CheckpointError::Serde(e) => Some(e),
            CheckpointError::Model(e) => Some(e),
            CheckpointError::NoCheckpoints => None,
        }
    }
}

impl From<io::Error> for CheckpointError {
    fn from(e: io::Error) -> Self {
        CheckpointError::Io(e)
    }
}

impl From<serde_json::Error> for CheckpointError {
    fn from(e: serde_json::Error) -> Self {
        CheckpointError::Serde(e)
    }
}

impl From<ModelError> for CheckpointError {
    fn from(e: ModelError) -> Self {
        CheckpointError::Model(e)
    }
}

/// Saves and restores [`TrainerCheckpoint`] bundles plus the dataset.
pub struct Checkpointer {
    checkpoint_dir: PathBuf,
    keep_last_n: usize,
}

impl Checkpointer {
    /// Checkpointer rooted at `checkpoint_dir`, creating it if missing.
    /// `keep_last_n == 0` keeps every checkpoint.
    pub fn new(
        checkpoint_dir: impl Into<PathBuf>,
        keep_last_n: usize,
    ) -> Result<Self, CheckpointError> {
        let checkpoint_dir = checkpoint_dir.into();
        fs::create_dir_all(&checkpoint_dir)?;
        Ok(Self {
            checkpoint_dir,
            keep_last_n,
        })
    }

    /// Checkpoint directory.
    pub fn dir(&self) -> &Path {
        &self.checkpoint_dir
    }

    /// Save one bundle and the current dataset snapshot.
    pub fn save(
        &self,
        checkpoint: &TrainerCheckpoint,
        dataset: &Dataset,
    ) -> Result<PathBuf, CheckpointError> {
        let path = self.checkpoint_path(checkpoint.iteration);
        fs::write(&path, serde_json::to_vec(checkpoint)?)?;
        fs::write(
            self.checkpoint_dir.join(DATASET_FILE),
            serde_json::to_vec(dataset)?,
        )?;
        self.cleanup_old_checkpoints()?;
        Ok(path)
    }

    /// Load the bundle saved at a specific iteration.
    pub fn load(&self, iteration: usize) -> Result<TrainerCheckpoint, CheckpointError> {
        let path = self.checkpoint_path(iteration);
        if !path.exists() {
            return Err(CheckpointError::NoCheckpoints);
        }
        let bytes = fs::read(&path)?;
        Ok(serde_json::from_slice(&bytes)?)
    }

    /// Load the most recent bundle.
    pub fn load_latest(&self) -> Result<TrainerCheckpoint, CheckpointError> {
        let iteration = self
            .list_iterations()?
            .pop()
            .ok_or(CheckpointError::NoCheckpoints)?;
        self.load(iteration)
    }

    /// Load the dataset snapshot.
    pub fn load_dataset(&self) -> Result<Dataset, CheckpointError> {
        let path = self.checkpoint_dir.join(DATASET_FILE);
        if !path.exists() {
            return Err(CheckpointError::NoCheckpoints);
        }
        let bytes = fs::read(&path)?;
        Ok(serde_json::from_slice(&bytes)?)
    }

    /// Saved iterations in ascending order.
    pub fn list_iterations(&self) -> Result<Vec<usize>, CheckpointError> {
        let mut iterations: Vec<usize> = fs::read_dir(&self.checkpoint_dir)?
            .filter_map(|e| e.ok())
            .filter_map(|e| {
                let path = e.path();
                let filename = path.file_name()?.to_str()?;
                filename
                    .strip_prefix("checkpoint_")?
                    .strip_suffix(".json")?
                    .parse()
                    .ok()
            })
            .collect();
        iterations.sort_unstable();
        Ok(iterations)
    }

    fn checkpoint_path(&self, iteration: usize) -> PathBuf {
        self.checkpoint_dir
            .join(format!("checkpoint_{:08}.json", iteration))
    }

    fn cleanup_old_checkpoints(&self) -> Result<(), CheckpointError> {
        if self.keep_last_n == 0 {
            return Ok(());
        }
        let iterations = self.list_iterations()?;
        if iterations.len() <= self.keep_last_n {
            return Ok(());
        }
        for &old in &iterations[..iterations.len() - self.keep_last_n] {
            let _ = fs::remove_file(self.checkpoint_path(old));
        }
        Ok(())
    }
}
