//! Trajectory collection.
//!
//! Rolls the controller out on a sampled task while continually adapting
//! the model to the most recent transitions: every step re-adapts on the
//! trailing history window and plans through the adapted parameters. A
//! rollout spans a fixed number of task steps regardless of episode
//! boundaries; episode termination only resets the task state, never the
//! transition buffer.
//!
//! With more than one worker, the configured rollout count is split across
//! named threads that each run an independent clone of the model,
//! controller, and task. Serial and parallel collection produce the same
//! total number of rollouts and the same step counters.

use std::error::Error;
use std::fmt;
use std::io;

use crossbeam_channel as channel;

use crate::adaptation::AdaptationEngine;
use crate::control::Controller;
use crate::core::rollout::Rollout;
use crate::core::run_stats::RunStats;
use crate::environment::Task;
use crate::loss::Objective;
use crate::model::DynamicsModel;

/// Failure while fanning collection or evaluation out to worker threads.
#[derive(Debug)]
pub enum WorkerError {
    /// The OS refused to spawn a worker thread.
    Spawn {
        /// Thread name that failed to spawn.
        name: String,
        /// Underlying io error.
        source: io::Error,
    },
    /// A worker dropped its result channel without reporting, which means
    /// it panicked mid-run.
    Disconnected {
        /// Which worker pool lost a member.
        role: &'static str,
    },
}

impl fmt::Display for WorkerError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            WorkerError::Spawn { name, source } => {
                write!(f, "failed to spawn worker thread '{}': {}", name, source)
            }
            WorkerError::Disconnected { role } => {
                write!(f, "{} worker exited without reporting a result", role)
            }
        }
    }
}

impl Error for WorkerError {
    fn source(&self) -> Option<&(dyn Error + 'static)> {
        match self {
            WorkerError::Spawn { source, .. } => Some(source),
            WorkerError::Disconnected { .. } => None,
        }
    }
}

/// Split `total` rollouts across `workers`, remainder to the first ones.
pub(crate) fn partition(total: usize, workers: usize) -> Vec<usize> {
    debug_assert!(workers > 0);
    let base = total / workers;
    let extra = total % workers;
    (0..workers)
        .map(|i| if i < extra { base + 1 } else { base })
        .collect()
}

/// Collects rollouts on one task, serially or across worker threads.
#[derive(Debug, Clone, Copy)]
pub struct TrajectoryCollector {
    rollout_num: usize,
    rollout_len: usize,
    history_len: usize,
    num_workers: usize,
    engine: AdaptationEngine,
    objective: Objective,
}

impl TrajectoryCollector {
    /// New collector; `num_workers <= 1` selects the serial path.
    pub fn new(
        rollout_num: usize,
        rollout_len: usize,
        history_len: usize,
        num_workers: usize,
        engine: AdaptationEngine,
        objective: Objective,
    ) -> Self {
        Self {
            rollout_num,
            rollout_len,
            history_len,
            num_workers: num_workers.max(1),
            engine,
            objective,
        }
    }

    /// Collect the configured number of rollouts on `task`.
    ///
    /// The adapted parameters used for planning are ephemeral: the model's
    /// base parameters are never modified here.
    pub fn collect<M, C, T>(
        &self,
        model: &M,
        controller: &mut C,
        task: &mut T,
        phi: f32,
        stats: &mut RunStats,
    ) -> Result<Vec<Rollout>, WorkerError>
    where
        M: DynamicsModel + Clone + 'static,
        C: Controller<M, T> + Clone + 'static,
        T: Task + Clone + 'static,
    {
        if self.num_workers > 1 && self.rollout_num > 1 {
            self.collect_parallel(model, controller, task, phi, stats)
        } else {
            controller.set_task(task);
            Ok(run_rollouts(
                model,
                controller,
                task,
                &self.engine,
                &self.objective,
                phi,
                self.rollout_num,
                self.rollout_len,
                self.history_len,
                stats,
            ))
        }
    }

    fn collect_parallel<M, C, T>(
        &self,
        model: &M,
        controller: &C,
        task: &T,
        phi: f32,
        stats: &mut RunStats,
    ) -> Result<Vec<Rollout>, WorkerError>
    where
        M: DynamicsModel + Clone + 'static,
        C: Controller<M, T> + Clone + 'static,
        T: Task + Clone + 'static,
    {
        let counts = partition(self.rollout_num, self.num_workers);
        let (tx, rx) = channel::unbounded::<(usize, Vec<Rollout>, RunStats)>();
        let mut launched = 0usize;

        for (worker_id, &count) in counts.iter().enumerate() {
            if count == 0 {
                continue;
            }
            let name = format!("Collector-{}", worker_id);
            let tx = tx.clone();
            let model = model.clone();
            let mut controller = controller.clone();
            let mut task = task.clone();
            let engine = self.engine;
            let objective = self.objective;
            let rollout_len = self.rollout_len;
            let history_len = self.history_len;
            std::thread::Builder::new()
                .name(name.clone())
                .spawn(move || {
                    let mut local = RunStats::default();
                    controller.reseed(worker_id as u64);
                    controller.set_task(&task);
                    let rollouts = run_rollouts(
                        &model,
                        &mut controller,
                        &mut task,
                        &engine,
                        &objective,
                        phi,
                        count,
                        rollout_len,
                        history_len,
                        &mut local,
                    );
                    // A closed channel means the parent already bailed.
                    let _ = tx.send((worker_id, rollouts, local));
                })
                .map_err(|source| WorkerError::Spawn { name, source })?;
            launched += 1;
        }
        drop(tx);

        let mut results = Vec::with_capacity(launched);
        for _ in 0..launched {
            let msg = rx
                .recv()
                .map_err(|_| WorkerError::Disconnected { role: "collector" })?;
            results.push(msg);
        }
        results.sort_by_key(|(worker_id, _, _)| *worker_id);

        let mut rollouts = Vec::with_capacity(self.rollout_num);
        for (_, mut worker_rollouts, worker_stats) in results {
            rollouts.append(&mut worker_rollouts);
            stats.merge(&worker_stats);
        }
        Ok(rollouts)
    }
}

/// Roll the controller out `rollout_num` times with per-step adaptation.
fn run_rollouts<M, C, T>(
    model: &M,
    controller: &mut C,
    task: &mut T,
    engine: &AdaptationEngine,
    objective: &Objective,
    phi: f32,
    rollout_num: usize,
    rollout_len: usize,
    history_len: usize,
    stats: &mut RunStats,
) -> Vec<Rollout>
where
    M: DynamicsModel,
    C: Controller<M, T>,
    T: Task,
{
    let mut rollouts = Vec::with_capacity(rollout_num);
    for _ in 0..rollout_num {
        let mut rollout = Rollout::with_capacity(rollout_len);
        let mut state = task.reset();
        while rollout.len() < rollout_len {
            let history = rollout.tail(history_len);
            let overlay = engine.adapt(
                model,
                &history,
                model.base_params(),
                phi,
                objective,
                stats,
            );
            let action = controller.plan(model, &state, overlay.as_ref());
            let outcome = task.step(&action);
            rollout.push(state, &action, outcome.next_state.clone());
            stats.add_task_steps(1);
            if outcome.done {
                state = task.reset();
            } else {
                state = outcome.next_state;
            }
        }
        rollouts.push(rollout);
    }
    rollouts
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::control::RandomController;
    use crate::environment::{Action, StepOutcome};
    use crate::loss::LossKind;
    use crate::nn::MlpDynamics;
    use rand::rngs::StdRng;
    use rand::SeedableRng;

    /// Deterministic 1-d task that terminates every `episode_len` steps.
    #[derive(Clone)]
    struct CountingTask {
        t: usize,
        episode_len: usize,
    }

    impl CountingTask {
        fn new(episode_len: usize) -> Self {
            Self { t: 0, episode_len }
        }
    }

    impl Task for CountingTask {
        fn reset(&mut self) -> Vec<f32> {
            self.t = 0;
            vec![0.0]
        }

        fn step(&mut self, action: &Action) -> StepOutcome {
            self.t += 1;
            let a = action.as_continuous()[0];
            StepOutcome {
                next_state: vec![self.t as f32 + 0.1 * a],
                reward: -1.0,
                done: self.t % self.episode_len == 0,
            }
        }

        fn name(&self) -> &str {
            "counting"
        }
    }

    fn model() -> MlpDynamics {
        let mut rng = StdRng::seed_from_u64(0);
        MlpDynamics::new(1, 1, &[4], &mut rng)
    }

    fn collector(rollout_num: usize, rollout_len: usize, workers: usize) -> TrajectoryCollector {
        TrajectoryCollector::new(
            rollout_num,
            rollout_len,
            2,
            workers,
            AdaptationEngine::new(1),
            Objective::new(LossKind::MeanSquaredError, 1.0, 1.0),
        )
    }

    #[test]
    fn test_partition_even_and_remainder() {
        assert_eq!(partition(8, 4), vec![2, 2, 2, 2]);
        assert_eq!(partition(7, 3), vec![3, 2, 2]);
        assert_eq!(partition(2, 4), vec![1, 1, 0, 0]);
    }

    #[test]
    fn test_serial_rollout_shapes_and_counters() {
        let model = model();
        let mut controller = RandomController::new(vec![-1.0], vec![1.0], 3);
        let mut task = CountingTask::new(3);
        let mut stats = RunStats::default();
        let rollouts = collector(2, 7, 1)
            .collect(&model, &mut controller, &mut task, 0.01, &mut stats)
            .unwrap();
        assert_eq!(rollouts.len(), 2);
        // Rollouts keep their fixed length across episode boundaries.
        assert!(rollouts.iter().all(|r| r.len() == 7));
        assert_eq!(stats.n_task_steps, 14);
        assert!(stats.n_model_steps > 0);
    }

    #[test]
    fn test_parallel_matches_serial_counts() {
        let model = model();
        let mut controller = RandomController::new(vec![-1.0], vec![1.0], 3);

        let mut serial_task = CountingTask::new(4);
        let mut serial_stats = RunStats::default();
        let serial = collector(5, 6, 1)
            .collect(
                &model,
                &mut controller,
                &mut serial_task,
                0.01,
                &mut serial_stats,
            )
            .unwrap();

        let mut parallel_task = CountingTask::new(4);
        let mut parallel_stats = RunStats::default();
        let parallel = collector(5, 6, 3)
            .collect(
                &model,
                &mut controller,
                &mut parallel_task,
                0.01,
                &mut parallel_stats,
            )
            .unwrap();

        assert_eq!(serial.len(), parallel.len());
        assert!(parallel.iter().all(|r| r.len() == 6));
        assert_eq!(serial_stats.n_task_steps, parallel_stats.n_task_steps);
        assert_eq!(serial_stats.n_model_steps, parallel_stats.n_model_steps);
    }

    #[test]
    fn test_more_workers_than_rollouts() {
        let model = model();
        let mut controller = RandomController::new(vec![-1.0], vec![1.0], 1);
        let mut task = CountingTask::new(5);
        let mut stats = RunStats::default();
        let rollouts = collector(2, 4, 8)
            .collect(&model, &mut controller, &mut task, 0.01, &mut stats)
            .unwrap();
        assert_eq!(rollouts.len(), 2);
        assert_eq!(stats.n_task_steps, 8);
    }
}
