//! Prediction loss between predicted and actual next-states.
//!
//! The objective is the one scalar the whole bi-level optimization is built
//! on: the adaptation engine descends its gradient, and the meta-update
//! minimizes it post-adaptation. Both the value and the exact gradient with
//! respect to the prediction are provided so models can backpropagate
//! through it analytically.

use serde::{Deserialize, Serialize};

use crate::config::ConfigError;

const LN_2PI: f32 = 1.837_877_1;

/// Distributional form of the prediction loss.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum LossKind {
    /// Mean squared error over state dimensions.
    MeanSquaredError,
    /// Negative log-likelihood of an isotropic Gaussian with fixed std.
    GaussianNll,
}

impl LossKind {
    /// Parse a configuration string. Unknown kinds are a configuration
    /// error, fatal at startup validation rather than deferred to call
    /// time.
    pub fn parse(name: &str) -> Result<Self, ConfigError> {
        match name {
            "mse" => Ok(LossKind::MeanSquaredError),
            "nll" => Ok(LossKind::GaussianNll),
            other => Err(ConfigError::UnknownLossKind {
                name: other.to_string(),
            }),
        }
    }
}

/// Loss evaluator: kind, noise scale for the NLL form, and the loss scale
/// applied per window.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Objective {
    /// Which loss to compute.
    pub kind: LossKind,
    /// Fixed standard deviation for [`LossKind::GaussianNll`].
    pub std: f32,
    /// Scaling factor applied as `scale / window_len` to the summed
    /// per-sample losses.
    pub scale: f32,
}

impl Objective {
    /// Create a new objective.
    pub fn new(kind: LossKind, std: f32, scale: f32) -> Self {
        Self { kind, std, scale }
    }

    /// Loss for a single (predicted, actual) next-state pair.
    pub fn sample_loss(&self, predicted: &[f32], actual: &[f32]) -> f32 {
        debug_assert_eq!(predicted.len(), actual.len());
        match self.kind {
            LossKind::MeanSquaredError => {
                let sum: f32 = predicted
                    .iter()
                    .zip(actual.iter())
                    .map(|(&p, &a)| (p - a) * (p - a))
                    .sum();
                sum / predicted.len() as f32
            }
            LossKind::GaussianNll => predicted
                .iter()
                .zip(actual.iter())
                .map(|(&p, &a)| {
                    let z = (p - a) / self.std;
                    0.5 * z * z + self.std.ln() + 0.5 * LN_2PI
                })
                .sum(),
        }
    }

    /// Gradient of [`Objective::sample_loss`] with respect to the
    /// prediction, written into `out`.
    pub fn sample_grad(&self, predicted: &[f32], actual: &[f32], out: &mut [f32]) {
        debug_assert_eq!(predicted.len(), out.len());
        match self.kind {
            LossKind::MeanSquaredError => {
                let inv = 2.0 / predicted.len() as f32;
                for ((o, &p), &a) in out.iter_mut().zip(predicted).zip(actual) {
                    *o = inv * (p - a);
                }
            }
            LossKind::GaussianNll => {
                let inv_var = 1.0 / (self.std * self.std);
                for ((o, &p), &a) in out.iter_mut().zip(predicted).zip(actual) {
                    *o = inv_var * (p - a);
                }
            }
        }
    }

    /// Factor converting a summed per-sample loss into the window loss:
    /// `scale / window_len`.
    pub fn window_factor(&self, window_len: usize) -> f32 {
        debug_assert!(window_len > 0);
        self.scale / window_len as f32
    }
}
