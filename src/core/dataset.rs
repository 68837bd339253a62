//! Bounded FIFO dataset of rollouts.
//!
//! The training loop bulk-appends freshly collected rollouts after each
//! collection phase (evicting the oldest past capacity), reshuffles in
//! place, and otherwise only reads the dataset through window sampling.

use std::collections::VecDeque;

use rand::seq::SliceRandom;
use rand::Rng;
use serde::{Deserialize, Serialize};

use crate::core::rollout::{Rollout, TrajWindow};

/// Bounded-capacity FIFO collection of rollouts.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Dataset {
    rollouts: VecDeque<Rollout>,
    capacity: usize,
}

impl Dataset {
    /// Create an empty dataset. Capacity must be positive (validated by
    /// configuration before construction).
    pub fn new(capacity: usize) -> Self {
        debug_assert!(capacity > 0, "dataset capacity must be positive");
        Self {
            rollouts: VecDeque::with_capacity(capacity),
            capacity,
        }
    }

    /// Number of stored rollouts.
    pub fn len(&self) -> usize {
        self.rollouts.len()
    }

    /// True when no rollouts are stored.
    pub fn is_empty(&self) -> bool {
        self.rollouts.is_empty()
    }

    /// Maximum number of rollouts retained.
    pub fn capacity(&self) -> usize {
        self.capacity
    }

    /// Iterate over stored rollouts, oldest first.
    pub fn iter(&self) -> impl Iterator<Item = &Rollout> {
        self.rollouts.iter()
    }

    /// Bulk-append rollouts, evicting the oldest past capacity.
    pub fn extend(&mut self, rollouts: Vec<Rollout>) {
        for rollout in rollouts {
            self.rollouts.push_back(rollout);
        }
        while self.rollouts.len() > self.capacity {
            self.rollouts.pop_front();
        }
    }

    /// Reshuffle stored rollouts in place.
    pub fn shuffle<R: Rng>(&mut self, rng: &mut R) {
        self.rollouts.make_contiguous().shuffle(rng);
    }

    /// True when at least one rollout can yield an `m + k` window.
    pub fn has_window(&self, m: usize, k: usize) -> bool {
        self.rollouts.iter().any(|r| r.len() >= m + k)
    }

    /// Sample a contiguous `m + k` window, split at `m`.
    ///
    /// The source rollout is drawn uniformly among eligible rollouts
    /// (those with at least `m + k` transitions) and the start index is
    /// uniform over all valid offsets, so `start + m + k` never exceeds
    /// the rollout length.
    ///
    /// # Panics
    ///
    /// Panics when no eligible rollout exists. The orchestrator gates
    /// sampling behind collection, so hitting this is a scheduling bug
    /// that must fail loudly rather than degrade silently.
    pub fn sample_window<R: Rng>(&self, m: usize, k: usize, rng: &mut R) -> TrajWindow {
        let window = m + k;
        let eligible: Vec<&Rollout> = self
            .rollouts
            .iter()
            .filter(|r| r.len() >= window)
            .collect();
        assert!(
            !eligible.is_empty(),
            "no stored rollout has the {} transitions required for an M+K window; \
             sampling must not run before enough history has been collected",
            window
        );
        let rollout = eligible[rng.gen_range(0..eligible.len())];
        let start = rng.gen_range(0..=rollout.len() - window);
        TrajWindow::from_rollout(rollout, start, window, m)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::environment::Action;
    use rand::rngs::StdRng;
    use rand::SeedableRng;

    fn rollout_of(len: usize, tag: f32) -> Rollout {
        let mut r = Rollout::new();
        for i in 0..len {
            r.push(
                vec![tag, i as f32],
                &Action::Continuous(vec![0.0]),
                vec![tag, i as f32 + 1.0],
            );
        }
        r
    }

    #[test]
    fn test_capacity_evicts_oldest() {
        let mut d = Dataset::new(2);
        d.extend(vec![rollout_of(5, 1.0), rollout_of(5, 2.0), rollout_of(5, 3.0)]);
        assert_eq!(d.len(), 2);
        let tags: Vec<f32> = d.iter().map(|r| r.states()[0][0]).collect();
        assert_eq!(tags, vec![2.0, 3.0]);
    }

    #[test]
    fn test_shuffle_preserves_len() {
        let mut d = Dataset::new(8);
        d.extend((0..8).map(|i| rollout_of(4, i as f32)).collect());
        let mut rng = StdRng::seed_from_u64(7);
        d.shuffle(&mut rng);
        assert_eq!(d.len(), 8);
    }

    #[test]
    fn test_sample_window_start_bounds() {
        let mut d = Dataset::new(1);
        d.extend(vec![rollout_of(5, 0.0)]);
        let mut rng = StdRng::seed_from_u64(3);
        // M=2, K=1 over a length-5 rollout: start index must stay in {0,1,2}.
        for _ in 0..200 {
            let w = d.sample_window(2, 1, &mut rng);
            assert_eq!(w.len(), 3);
            let start = w.adaptation().states[0][1] as usize;
            assert!(start <= 2, "start index {} out of range", start);
        }
    }

    #[test]
    fn test_sample_window_skips_short_rollouts() {
        let mut d = Dataset::new(4);
        d.extend(vec![rollout_of(2, 1.0), rollout_of(6, 2.0)]);
        let mut rng = StdRng::seed_from_u64(11);
        for _ in 0..50 {
            let w = d.sample_window(3, 2, &mut rng);
            assert_eq!(w.adaptation().states[0][0], 2.0);
        }
    }

    #[test]
    #[should_panic(expected = "sampling must not run")]
    fn test_sample_without_history_fails_loudly() {
        let d = Dataset::new(2);
        let mut rng = StdRng::seed_from_u64(0);
        let _ = d.sample_window(2, 1, &mut rng);
    }

    #[test]
    fn test_has_window() {
        let mut d = Dataset::new(4);
        assert!(!d.has_window(2, 1));
        d.extend(vec![rollout_of(2, 0.0)]);
        assert!(!d.has_window(2, 1));
        d.extend(vec![rollout_of(3, 0.0)]);
        assert!(d.has_window(2, 1));
    }
}
