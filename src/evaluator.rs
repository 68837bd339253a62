//! Reward evaluation on held-out tasks.
//!
//! Episodes run with the same adapt-then-plan step as trajectory
//! collection: the model is re-adapted every step from the trailing
//! history of the current episode, and planning uses the adapted
//! parameters. Serial mode averages a fixed number of episodes per task;
//! parallel mode instead replicates the whole per-task sweep across
//! independent workers and averages each task's reward across workers.
//! Either way the result is one mean reward per task, in task order.

use crossbeam_channel as channel;

use crate::adaptation::AdaptationEngine;
use crate::collector::WorkerError;
use crate::control::Controller;
use crate::core::rollout::Rollout;
use crate::core::run_stats::RunStats;
use crate::environment::Task;
use crate::loss::Objective;
use crate::model::DynamicsModel;

/// Evaluates mean episode reward per task.
#[derive(Debug, Clone, Copy)]
pub struct Evaluator {
    eval_episode_num: usize,
    eval_sample_num: usize,
    num_workers: usize,
    history_len: usize,
    engine: AdaptationEngine,
    objective: Objective,
}

impl Evaluator {
    /// New evaluator. Parallel fan-out is used when both `num_workers`
    /// and `eval_sample_num` exceed one.
    pub fn new(
        eval_episode_num: usize,
        eval_sample_num: usize,
        num_workers: usize,
        history_len: usize,
        engine: AdaptationEngine,
        objective: Objective,
    ) -> Self {
        Self {
            eval_episode_num: eval_episode_num.max(1),
            eval_sample_num: eval_sample_num.max(1),
            num_workers: num_workers.max(1),
            history_len,
            engine,
            objective,
        }
    }

    /// Mean reward for each task, in the order given.
    ///
    /// Adaptation during evaluation is ephemeral in two senses: the base
    /// parameters are untouched, and the model-step counters it generates
    /// are discarded rather than folded into the training statistics.
    pub fn evaluate<M, C, T>(
        &self,
        model: &M,
        controller: &mut C,
        tasks: &mut [T],
        phi: f32,
    ) -> Result<Vec<f32>, WorkerError>
    where
        M: DynamicsModel + Clone + 'static,
        C: Controller<M, T> + Clone + 'static,
        T: Task + Clone + 'static,
    {
        if self.num_workers > 1 && self.eval_sample_num > 1 {
            self.evaluate_parallel(model, controller, tasks, phi)
        } else {
            Ok(self.evaluate_serial(model, controller, tasks, phi))
        }
    }

    fn evaluate_serial<M, C, T>(
        &self,
        model: &M,
        controller: &mut C,
        tasks: &mut [T],
        phi: f32,
    ) -> Vec<f32>
    where
        M: DynamicsModel,
        C: Controller<M, T>,
        T: Task,
    {
        let mut scratch = RunStats::default();
        let mut mean_rewards = Vec::with_capacity(tasks.len());
        for task in tasks.iter_mut() {
            controller.set_task(task);
            let mut total = 0.0f32;
            for _ in 0..self.eval_episode_num {
                total += self.run_episode(model, controller, task, phi, &mut scratch);
            }
            mean_rewards.push(total / self.eval_episode_num as f32);
        }
        mean_rewards
    }

    fn evaluate_parallel<M, C, T>(
        &self,
        model: &M,
        controller: &C,
        tasks: &[T],
        phi: f32,
    ) -> Result<Vec<f32>, WorkerError>
    where
        M: DynamicsModel + Clone + 'static,
        C: Controller<M, T> + Clone + 'static,
        T: Task + Clone + 'static,
    {
        let (tx, rx) = channel::unbounded::<Vec<f32>>();
        let mut launched = 0usize;

        for worker_id in 0..self.eval_sample_num {
            let name = format!("Evaluator-{}", worker_id);
            let tx = tx.clone();
            let evaluator = *self;
            let model = model.clone();
            let mut controller = controller.clone();
            let mut tasks: Vec<T> = tasks.to_vec();
            std::thread::Builder::new()
                .name(name.clone())
                .spawn(move || {
                    let mut scratch = RunStats::default();
                    controller.reseed(worker_id as u64);
                    let mut rewards = Vec::with_capacity(tasks.len());
                    for task in tasks.iter_mut() {
                        controller.set_task(task);
                        rewards.push(evaluator.run_episode(
                            &model,
                            &mut controller,
                            task,
                            phi,
                            &mut scratch,
                        ));
                    }
                    let _ = tx.send(rewards);
                })
                .map_err(|source| WorkerError::Spawn { name, source })?;
            launched += 1;
        }
        drop(tx);

        let mut sums = vec![0.0f32; tasks.len()];
        for _ in 0..launched {
            let rewards = rx
                .recv()
                .map_err(|_| WorkerError::Disconnected { role: "evaluator" })?;
            for (sum, reward) in sums.iter_mut().zip(rewards.iter()) {
                *sum += reward;
            }
        }
        let inv = 1.0 / launched as f32;
        Ok(sums.into_iter().map(|s| s * inv).collect())
    }

    /// One episode to task-signaled termination, adapting every step.
    fn run_episode<M, C, T>(
        &self,
        model: &M,
        controller: &mut C,
        task: &mut T,
        phi: f32,
        stats: &mut RunStats,
    ) -> f32
    where
        M: DynamicsModel,
        C: Controller<M, T>,
        T: Task,
    {
        let mut rollout = Rollout::new();
        let mut state = task.reset();
        let mut total = 0.0f32;
        loop {
            let history = rollout.tail(self.history_len);
            let overlay = self.engine.adapt(
                model,
                &history,
                model.base_params(),
                phi,
                &self.objective,
                stats,
            );
            let action = controller.plan(model, &state, overlay.as_ref());
            let outcome = task.step(&action);
            total += outcome.reward;
            rollout.push(state, &action, outcome.next_state.clone());
            state = outcome.next_state;
            if outcome.done {
                return total;
            }
        }
    }
}
