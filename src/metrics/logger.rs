//! Logging backends for the training loop.
//!
//! Provides different logging backends for per-iteration metrics.

use std::fs::File;
use std::io::{BufWriter, Write};
use std::path::Path;

use crate::core::run_stats::RunStats;

/// Per-iteration scalars emitted by the training loop.
#[derive(Debug, Clone)]
pub struct IterationSnapshot {
    /// Current iteration index.
    pub iteration: usize,
    /// Mean post-adaptation model loss.
    pub model_loss: f32,
    /// Current adaptation rate.
    pub phi: f32,
    /// Rollouts currently stored in the dataset.
    pub dataset_size: usize,
    /// Cumulative run counters.
    pub stats: RunStats,
    /// Mean reward per evaluated task, empty on non-eval iterations.
    pub task_rewards: Vec<(String, f32)>,
    /// Seconds spent collecting this iteration.
    pub sample_secs: f64,
    /// Seconds spent on adaptation plus meta-update this iteration.
    pub meta_secs: f64,
    /// Seconds spent evaluating this iteration.
    pub eval_secs: f64,
}

impl IterationSnapshot {
    /// Snapshot with no timings or rewards yet.
    pub fn new(
        iteration: usize,
        model_loss: f32,
        phi: f32,
        dataset_size: usize,
        stats: RunStats,
    ) -> Self {
        Self {
            iteration,
            model_loss,
            phi,
            dataset_size,
            stats,
            task_rewards: Vec::new(),
            sample_secs: 0.0,
            meta_secs: 0.0,
            eval_secs: 0.0,
        }
    }

    /// Attach per-task evaluation rewards.
    pub fn with_task_rewards(mut self, rewards: Vec<(String, f32)>) -> Self {
        self.task_rewards = rewards;
        self
    }

    /// Attach stage timings.
    pub fn with_timings(mut self, sample_secs: f64, meta_secs: f64, eval_secs: f64) -> Self {
        self.sample_secs = sample_secs;
        self.meta_secs = meta_secs;
        self.eval_secs = eval_secs;
        self
    }

    /// Mean reward across all evaluated tasks, if any were evaluated.
    pub fn mean_reward(&self) -> Option<f32> {
        if self.task_rewards.is_empty() {
            return None;
        }
        let sum: f32 = self.task_rewards.iter().map(|(_, r)| r).sum();
        Some(sum / self.task_rewards.len() as f32)
    }
}

/// Logger trait for different logging backends.
pub trait MetricsLogger: Send {
    /// Log one iteration's snapshot.
    fn log(&mut self, snapshot: &IterationSnapshot);

    /// Flush any buffered output.
    fn flush(&mut self);
}

/// Console logger with pretty formatting.
pub struct ConsoleLogger {
    log_interval: usize,
    show_header: bool,
}

impl ConsoleLogger {
    /// Console logger emitting every `log_interval` iterations.
    pub fn new(log_interval: usize) -> Self {
        Self {
            log_interval: log_interval.max(1),
            show_header: true,
        }
    }

    fn print_header(&self) {
        println!(
            "{:>8} {:>12} {:>10} {:>8} {:>12} {:>12} {:>10} {:>10}",
            "Iter", "MetaLoss", "Phi", "Dataset", "TaskSteps", "ModelSteps", "Reward", "Secs"
        );
        println!("{}", "-".repeat(90));
    }
}

impl MetricsLogger for ConsoleLogger {
    fn log(&mut self, snapshot: &IterationSnapshot) {
        if snapshot.iteration % self.log_interval != 0 {
            return;
        }

        if self.show_header {
            self.print_header();
            self.show_header = false;
        }

        let reward = snapshot
            .mean_reward()
            .map(|r| format!("{:>10.3}", r))
            .unwrap_or_else(|| format!("{:>10}", "-"));
        let iter_secs = snapshot.sample_secs + snapshot.meta_secs + snapshot.eval_secs;

        println!(
            "{:>8} {:>12.6} {:>10.6} {:>8} {:>12} {:>12} {} {:>10.2}",
            snapshot.iteration,
            snapshot.model_loss,
            snapshot.phi,
            snapshot.dataset_size,
            snapshot.stats.n_task_steps,
            snapshot.stats.n_model_steps,
            reward,
            iter_secs
        );

        for (task, reward) in &snapshot.task_rewards {
            println!("{:>8} {} reward: {:.3}", "", task, reward);
        }
    }

    fn flush(&mut self) {
        // stdout is line-buffered, nothing to do
    }
}

/// CSV file logger for analysis.
pub struct CsvLogger {
    writer: BufWriter<File>,
}

impl CsvLogger {
    /// Create the CSV file and write the header row.
    pub fn new(path: impl AsRef<Path>) -> std::io::Result<Self> {
        let file = File::create(path)?;
        let mut writer = BufWriter::new(file);
        writeln!(
            writer,
            "iteration,model_loss,phi,dataset_size,n_task_steps,n_model_steps,n_rollouts,mean_reward,sample_secs,meta_secs,eval_secs,time_total"
        )?;
        Ok(Self { writer })
    }
}

impl MetricsLogger for CsvLogger {
    fn log(&mut self, snapshot: &IterationSnapshot) {
        let reward = snapshot
            .mean_reward()
            .map(|r| r.to_string())
            .unwrap_or_default();
        let _ = writeln!(
            self.writer,
            "{},{:.6},{:.8},{},{},{},{},{},{:.3},{:.3},{:.3},{:.3}",
            snapshot.iteration,
            snapshot.model_loss,
            snapshot.phi,
            snapshot.dataset_size,
            snapshot.stats.n_task_steps,
            snapshot.stats.n_model_steps,
            snapshot.stats.n_rollouts,
            reward,
            snapshot.sample_secs,
            snapshot.meta_secs,
            snapshot.eval_secs,
            snapshot.stats.time_total
        );
    }

    fn flush(&mut self) {
        let _ = self.writer.flush();
    }
}

impl Drop for CsvLogger {
    fn drop(&mut self) {
        self.flush();
    }
}

/// Multi-logger that writes to multiple backends.
pub struct MultiLogger {
    loggers: Vec<Box<dyn MetricsLogger>>,
}

impl MultiLogger {
    /// Empty multi-logger.
    pub fn new() -> Self {
        Self {
            loggers: Vec::new(),
        }
    }

    /// Add a backend.
    pub fn add<L: MetricsLogger + 'static>(mut self, logger: L) -> Self {
        self.loggers.push(Box::new(logger));
        self
    }
}

impl Default for MultiLogger {
    fn default() -> Self {
        Self::new()
    }
}

impl MetricsLogger for MultiLogger {
    fn log(&mut self, snapshot: &IterationSnapshot) {
        for logger in &mut self.loggers {
            logger.log(snapshot);
        }
    }

    fn flush(&mut self) {
        for logger in &mut self.loggers {
            logger.flush();
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn snapshot(iteration: usize) -> IterationSnapshot {
        IterationSnapshot::new(iteration, 0.5, 0.01, 3, RunStats::default())
    }

    #[test]
    fn test_mean_reward_empty_is_none() {
        assert_eq!(snapshot(0).mean_reward(), None);
    }

    #[test]
    fn test_mean_reward_averages_tasks() {
        let s = snapshot(0).with_task_rewards(vec![
            ("a".to_string(), 2.0),
            ("b".to_string(), 4.0),
        ]);
        assert_eq!(s.mean_reward(), Some(3.0));
    }

    #[test]
    fn test_csv_logger_writes_rows() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("metrics.csv");
        {
            let mut logger = CsvLogger::new(&path).unwrap();
            logger.log(&snapshot(0));
            logger.log(
                &snapshot(1).with_task_rewards(vec![("t".to_string(), 1.5)]),
            );
        }
        let contents = std::fs::read_to_string(&path).unwrap();
        let lines: Vec<&str> = contents.lines().collect();
        assert_eq!(lines.len(), 3);
        assert!(lines[0].starts_with("iteration,model_loss"));
        assert!(lines[2].contains("1.5"));
    }
}
