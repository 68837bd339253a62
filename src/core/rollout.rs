//! Rollouts: fixed-length sequences of (state, action, next-state) samples.
//!
//! A rollout is append-only while a collector drives a task and immutable
//! once it lands in the dataset. Episode boundaries inside a rollout only
//! reset the task, never the buffer, so a finished rollout always holds
//! exactly `rollout_len` transitions.

use serde::{Deserialize, Serialize};

use crate::environment::Action;

/// One rollout: three equal-length sequences of fixed-dimension vectors.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct Rollout {
    states: Vec<Vec<f32>>,
    actions: Vec<Vec<f32>>,
    next_states: Vec<Vec<f32>>,
}

impl Rollout {
    /// Empty rollout.
    pub fn new() -> Self {
        Self::default()
    }

    /// Empty rollout with reserved capacity.
    pub fn with_capacity(capacity: usize) -> Self {
        Self {
            states: Vec::with_capacity(capacity),
            actions: Vec::with_capacity(capacity),
            next_states: Vec::with_capacity(capacity),
        }
    }

    /// Append one transition, preserving temporal order.
    ///
    /// Discrete (scalar) actions are wrapped into a one-element vector so
    /// every stored action has vector shape.
    pub fn push(&mut self, state: Vec<f32>, action: &Action, next_state: Vec<f32>) {
        self.states.push(state);
        self.actions.push(action.to_vector());
        self.next_states.push(next_state);
        debug_assert!(self.states.len() == self.actions.len());
        debug_assert!(self.states.len() == self.next_states.len());
    }

    /// Number of transitions recorded.
    pub fn len(&self) -> usize {
        self.states.len()
    }

    /// True before the first transition is recorded.
    pub fn is_empty(&self) -> bool {
        self.states.is_empty()
    }

    /// Recorded states, oldest first.
    pub fn states(&self) -> &[Vec<f32>] {
        &self.states
    }

    /// Recorded actions (vector form), oldest first.
    pub fn actions(&self) -> &[Vec<f32>] {
        &self.actions
    }

    /// Recorded next-states, oldest first.
    pub fn next_states(&self) -> &[Vec<f32>] {
        &self.next_states
    }

    /// Borrowed view of the trailing `m` transitions (fewer while the
    /// rollout is shorter than `m`).
    pub fn tail(&self, m: usize) -> WindowView<'_> {
        let start = self.len().saturating_sub(m);
        self.window(start, self.len() - start)
    }

    /// Borrowed view of `len` contiguous transitions starting at `start`.
    pub fn window(&self, start: usize, len: usize) -> WindowView<'_> {
        let end = start + len;
        WindowView {
            states: &self.states[start..end],
            actions: &self.actions[start..end],
            next_states: &self.next_states[start..end],
        }
    }

    /// View of the whole rollout.
    pub fn full(&self) -> WindowView<'_> {
        self.window(0, self.len())
    }
}

/// Borrowed contiguous slice of a rollout.
#[derive(Debug, Clone, Copy)]
pub struct WindowView<'a> {
    /// States, oldest first.
    pub states: &'a [Vec<f32>],
    /// Actions (vector form), oldest first.
    pub actions: &'a [Vec<f32>],
    /// Next-states, oldest first.
    pub next_states: &'a [Vec<f32>],
}

impl WindowView<'_> {
    /// Number of transitions in the view.
    pub fn len(&self) -> usize {
        self.states.len()
    }

    /// True when the view holds no transitions.
    pub fn is_empty(&self) -> bool {
        self.states.is_empty()
    }
}

/// Owned contiguous window of `m + k` transitions sampled from a stored
/// rollout, split at `m` into the adaptation window and the query window.
#[derive(Debug, Clone)]
pub struct TrajWindow {
    states: Vec<Vec<f32>>,
    actions: Vec<Vec<f32>>,
    next_states: Vec<Vec<f32>>,
    split: usize,
}

impl TrajWindow {
    /// Copy a window out of a rollout. `split` must not exceed `len`.
    pub fn from_rollout(rollout: &Rollout, start: usize, len: usize, split: usize) -> Self {
        assert!(split <= len, "window split {} exceeds length {}", split, len);
        let view = rollout.window(start, len);
        Self {
            states: view.states.to_vec(),
            actions: view.actions.to_vec(),
            next_states: view.next_states.to_vec(),
            split,
        }
    }

    /// Total number of transitions (`m + k`).
    pub fn len(&self) -> usize {
        self.states.len()
    }

    /// True when the window holds no transitions.
    pub fn is_empty(&self) -> bool {
        self.states.is_empty()
    }

    /// The first `m` transitions, used to compute the adapting gradient.
    pub fn adaptation(&self) -> WindowView<'_> {
        WindowView {
            states: &self.states[..self.split],
            actions: &self.actions[..self.split],
            next_states: &self.next_states[..self.split],
        }
    }

    /// The trailing `k` transitions, held out for post-adaptation loss.
    pub fn query(&self) -> WindowView<'_> {
        WindowView {
            states: &self.states[self.split..],
            actions: &self.actions[self.split..],
            next_states: &self.next_states[self.split..],
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn rollout_of(n: usize) -> Rollout {
        let mut r = Rollout::new();
        for i in 0..n {
            let v = i as f32;
            r.push(
                vec![v, v],
                &Action::Continuous(vec![v * 10.0]),
                vec![v + 1.0, v + 1.0],
            );
        }
        r
    }

    #[test]
    fn test_push_keeps_sequences_equal_length() {
        let r = rollout_of(7);
        assert_eq!(r.len(), 7);
        assert_eq!(r.states().len(), r.actions().len());
        assert_eq!(r.states().len(), r.next_states().len());
    }

    #[test]
    fn test_discrete_action_wrapped() {
        let mut r = Rollout::new();
        r.push(vec![0.0], &Action::Discrete(2), vec![1.0]);
        assert_eq!(r.actions()[0], vec![2.0]);
    }

    #[test]
    fn test_tail_shorter_than_m() {
        let r = rollout_of(3);
        let tail = r.tail(5);
        assert_eq!(tail.len(), 3);
        let empty = Rollout::new();
        assert!(empty.tail(5).is_empty());
    }

    #[test]
    fn test_tail_takes_most_recent() {
        let r = rollout_of(10);
        let tail = r.tail(4);
        assert_eq!(tail.len(), 4);
        assert_eq!(tail.states[0], vec![6.0, 6.0]);
        assert_eq!(tail.states[3], vec![9.0, 9.0]);
    }

    #[test]
    fn test_window_split() {
        let r = rollout_of(10);
        let w = TrajWindow::from_rollout(&r, 2, 5, 3);
        assert_eq!(w.len(), 5);
        assert_eq!(w.adaptation().len(), 3);
        assert_eq!(w.query().len(), 2);
        assert_eq!(w.adaptation().states[0], vec![2.0, 2.0]);
        assert_eq!(w.query().states[0], vec![5.0, 5.0]);
    }
}
