//! Task abstraction consumed by collection, evaluation, and testing.
//!
//! A [`Task`] is a single control environment with the minimal
//! reset/step/render contract the meta-learning core needs. Tasks are
//! cloned into parallel workers, so implementations should keep their
//! state cheap to copy.

/// Action representation (discrete or continuous).
#[derive(Debug, Clone, PartialEq)]
pub enum Action {
    /// Discrete action index
    Discrete(u32),
    /// Continuous action vector
    Continuous(Vec<f32>),
}

impl Action {
    /// Get discrete action index, panics if continuous.
    pub fn as_discrete(&self) -> u32 {
        match self {
            Action::Discrete(a) => *a,
            Action::Continuous(_) => panic!("Expected discrete action"),
        }
    }

    /// Get continuous action vector, panics if discrete.
    pub fn as_continuous(&self) -> &[f32] {
        match self {
            Action::Discrete(_) => panic!("Expected continuous action"),
            Action::Continuous(a) => a,
        }
    }

    /// Flatten to a numeric vector for storage and model input.
    ///
    /// Discrete actions degenerate to a one-element vector so that every
    /// stored action has vector shape.
    pub fn to_vector(&self) -> Vec<f32> {
        match self {
            Action::Discrete(a) => vec![*a as f32],
            Action::Continuous(a) => a.clone(),
        }
    }

    /// Number of elements in the vector form.
    pub fn dim(&self) -> usize {
        match self {
            Action::Discrete(_) => 1,
            Action::Continuous(a) => a.len(),
        }
    }
}

/// Result of stepping a task once.
#[derive(Debug, Clone)]
pub struct StepOutcome {
    /// Observation after the step.
    pub next_state: Vec<f32>,
    /// Reward received.
    pub reward: f32,
    /// Episode ended (terminal or time limit).
    pub done: bool,
}

impl StepOutcome {
    /// Create a new step outcome.
    pub fn new(next_state: Vec<f32>, reward: f32, done: bool) -> Self {
        Self {
            next_state,
            reward,
            done,
        }
    }
}

/// A single control task.
///
/// The core never inspects task internals: it resets, steps, and
/// occasionally renders. The stable `name` identifies the task in
/// metrics output.
pub trait Task: Send {
    /// Reset the task and return the initial observation.
    fn reset(&mut self) -> Vec<f32>;

    /// Apply an action, returning the next observation, reward, and done flag.
    fn step(&mut self, action: &Action) -> StepOutcome;

    /// Render the current state. Default: no-op.
    fn render(&mut self) {}

    /// Stable task name for reporting.
    fn name(&self) -> &str;
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_discrete_action_to_vector() {
        let a = Action::Discrete(3);
        assert_eq!(a.to_vector(), vec![3.0]);
        assert_eq!(a.dim(), 1);
        assert_eq!(a.as_discrete(), 3);
    }

    #[test]
    fn test_continuous_action_to_vector() {
        let a = Action::Continuous(vec![0.5, -1.0]);
        assert_eq!(a.to_vector(), vec![0.5, -1.0]);
        assert_eq!(a.dim(), 2);
        assert_eq!(a.as_continuous(), &[0.5, -1.0]);
    }
}
