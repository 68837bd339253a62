//! Dynamics-model collaborator contract.
//!
//! The core treats the model as a parameterized function: it predicts the
//! state delta for a (state, action) pair, optionally under a substituted
//! parameter set, and it can evaluate the window loss together with its
//! exact gradient with respect to a given parameter set. Everything the
//! adaptation engine and meta-update do is built from those two
//! operations; the model's internal architecture stays opaque.

use std::fmt;

use crate::core::params::ParamSet;
use crate::core::rollout::WindowView;
use crate::loss::Objective;

/// Errors raised when a parameter set does not match the model.
#[derive(Debug, Clone, PartialEq)]
pub enum ModelError {
    /// A parameter has the wrong shape.
    ShapeMismatch {
        name: String,
        expected: Vec<usize>,
        found: Vec<usize>,
    },
    /// The incoming set is missing a parameter the model owns.
    MissingParam { name: String },
    /// The incoming set carries a parameter the model does not own.
    UnexpectedParam { name: String },
}

impl fmt::Display for ModelError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ModelError::ShapeMismatch {
                name,
                expected,
                found,
            } => write!(
                f,
                "parameter '{}' has shape {:?}, expected {:?}",
                name, found, expected
            ),
            ModelError::MissingParam { name } => {
                write!(f, "parameter '{}' missing from incoming set", name)
            }
            ModelError::UnexpectedParam { name } => {
                write!(f, "unexpected parameter '{}' in incoming set", name)
            }
        }
    }
}

impl std::error::Error for ModelError {}

/// Check that `incoming` has exactly the names and shapes of `own`.
pub fn check_layout(own: &ParamSet, incoming: &ParamSet) -> Result<(), ModelError> {
    for (name, tensor) in own.iter() {
        match incoming.get(name) {
            None => {
                return Err(ModelError::MissingParam {
                    name: name.to_string(),
                })
            }
            Some(found) if found.shape != tensor.shape => {
                return Err(ModelError::ShapeMismatch {
                    name: name.to_string(),
                    expected: tensor.shape.clone(),
                    found: found.shape.clone(),
                })
            }
            Some(_) => {}
        }
    }
    for (name, _) in incoming.iter() {
        if own.get(name).is_none() {
            return Err(ModelError::UnexpectedParam {
                name: name.to_string(),
            });
        }
    }
    Ok(())
}

/// A differentiable dynamics model.
///
/// Implementations predict the *delta* between the current and next state;
/// callers form `pred_next = state + delta`. Both entry points accept a
/// parameter overlay: tensors present in the overlay take precedence over
/// the model's own persistent parameters, which is how ephemeral adapted
/// parameter sets are evaluated without touching the base set.
pub trait DynamicsModel: Send {
    /// The persistent base parameters (theta).
    fn base_params(&self) -> &ParamSet;

    /// Replace the base parameters, rejecting layout mismatches.
    ///
    /// Used when restoring a checkpoint and when test-time adaptation
    /// commits specialized parameters into the live model.
    fn commit_params(&mut self, params: ParamSet) -> Result<(), ModelError>;

    /// Predict the state delta for one (state, action) pair, consulting
    /// `overlay` in preference to the base parameters when present.
    fn forward(&self, state: &[f32], action: &[f32], overlay: Option<&ParamSet>) -> Vec<f32>;

    /// Window loss under `params` plus its gradient with respect to
    /// `params`, in the same layout.
    ///
    /// The loss is `objective.window_factor(n) * sum_i sample_loss_i` with
    /// `pred_next_i = state_i + forward(state_i, action_i)`. Gradients are
    /// exact (analytic backward pass), computed fresh on every call.
    fn loss_and_grad(
        &self,
        window: &WindowView<'_>,
        params: &ParamSet,
        objective: &Objective,
    ) -> (f32, ParamSet);
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::params::ParamTensor;

    fn set(values: &[(&str, &[usize])]) -> ParamSet {
        let mut s = ParamSet::new();
        for (name, shape) in values {
            s.push(*name, ParamTensor::zeros(shape));
        }
        s
    }

    #[test]
    fn test_check_layout_ok() {
        let own = set(&[("w", &[2, 3]), ("b", &[2])]);
        let incoming = set(&[("w", &[2, 3]), ("b", &[2])]);
        assert!(check_layout(&own, &incoming).is_ok());
    }

    #[test]
    fn test_check_layout_shape_mismatch() {
        let own = set(&[("w", &[2, 3])]);
        let incoming = set(&[("w", &[3, 2])]);
        assert!(matches!(
            check_layout(&own, &incoming),
            Err(ModelError::ShapeMismatch { .. })
        ));
    }

    #[test]
    fn test_check_layout_missing_and_unexpected() {
        let own = set(&[("w", &[2])]);
        assert!(matches!(
            check_layout(&own, &set(&[])),
            Err(ModelError::MissingParam { .. })
        ));
        assert!(matches!(
            check_layout(&own, &set(&[("w", &[2]), ("extra", &[1])])),
            Err(ModelError::UnexpectedParam { .. })
        ));
    }
}
