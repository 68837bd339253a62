//! Run counters accumulated across workers and resume boundaries.

use serde::{Deserialize, Serialize};

/// Monotonic counters plus cumulative wall-clock time.
///
/// Parallel workers accumulate their own local `RunStats` and report them
/// back as part of their result message; the parent reduces with
/// [`RunStats::merge`]. Counters are never shared mutably across threads.
#[derive(Debug, Clone, Copy, Default, PartialEq, Serialize, Deserialize)]
pub struct RunStats {
    /// Task environment steps taken.
    pub n_task_steps: u64,
    /// Dynamics-model loss evaluations (forward plus gradient).
    pub n_model_steps: u64,
    /// Rollouts collected into the dataset.
    pub n_rollouts: u64,
    /// Cumulative wall-clock seconds, summed across resumed runs.
    pub time_total: f64,
}

impl RunStats {
    /// Fresh zeroed counters.
    pub fn new() -> Self {
        Self::default()
    }

    /// Count task steps. Saturating to guard long runs.
    pub fn add_task_steps(&mut self, n: u64) {
        self.n_task_steps = self.n_task_steps.saturating_add(n);
    }

    /// Count model loss evaluations.
    pub fn add_model_steps(&mut self, n: u64) {
        self.n_model_steps = self.n_model_steps.saturating_add(n);
    }

    /// Count collected rollouts.
    pub fn add_rollouts(&mut self, n: u64) {
        self.n_rollouts = self.n_rollouts.saturating_add(n);
    }

    /// Sum another worker's counters into this one.
    ///
    /// Wall-clock time is owned by the orchestrator and deliberately not
    /// merged: worker runtimes overlap.
    pub fn merge(&mut self, other: &RunStats) {
        self.add_task_steps(other.n_task_steps);
        self.add_model_steps(other.n_model_steps);
        self.add_rollouts(other.n_rollouts);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_merge_sums_counters() {
        let mut a = RunStats::new();
        a.add_task_steps(10);
        a.add_model_steps(3);
        let mut b = RunStats::new();
        b.add_task_steps(5);
        b.add_rollouts(2);
        b.time_total = 42.0;
        a.merge(&b);
        assert_eq!(a.n_task_steps, 15);
        assert_eq!(a.n_model_steps, 3);
        assert_eq!(a.n_rollouts, 2);
        assert_eq!(a.time_total, 0.0);
    }

    #[test]
    fn test_saturating_counters() {
        let mut s = RunStats::new();
        s.n_task_steps = u64::MAX - 1;
        s.add_task_steps(10);
        assert_eq!(s.n_task_steps, u64::MAX);
    }
}
