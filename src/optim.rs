//! Adam optimizers for the outer (meta) loop.
//!
//! Two flavors: [`Adam`] over a whole [`ParamSet`] for the base model
//! parameters, and [`ScalarAdam`] for the single learnable adaptation
//! rate. Both carry their moment buffers in serializable form so resumed
//! runs continue with intact optimizer state.

use serde::{Deserialize, Serialize};

use crate::core::params::{ParamSet, ParamTensor};

/// Adam hyperparameters.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct AdamConfig {
    /// Learning rate.
    pub lr: f32,
    /// First-moment decay.
    pub beta1: f32,
    /// Second-moment decay.
    pub beta2: f32,
    /// Denominator fuzz.
    pub eps: f32,
}

impl Default for AdamConfig {
    fn default() -> Self {
        Self {
            lr: 1e-3,
            beta1: 0.9,
            beta2: 0.999,
            eps: 1e-8,
        }
    }
}

impl AdamConfig {
    /// Default moments with the given learning rate.
    pub fn with_lr(lr: f32) -> Self {
        Self {
            lr,
            ..Default::default()
        }
    }
}

/// Adam over a named parameter set.
///
/// `step` is pure with respect to the parameters: it returns the updated
/// set and leaves the caller to commit it, so the base parameters are only
/// ever mutated at one place in the training loop.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Adam {
    config: AdamConfig,
    m: ParamSet,
    v: ParamSet,
    step_count: u64,
}

impl Adam {
    /// Create optimizer state shaped like `template`.
    pub fn new(template: &ParamSet, config: AdamConfig) -> Self {
        Self {
            config,
            m: template.zeros_like(),
            v: template.zeros_like(),
            step_count: 0,
        }
    }

    /// Hyperparameters.
    pub fn config(&self) -> &AdamConfig {
        &self.config
    }

    /// Number of optimizer steps taken.
    pub fn step_count(&self) -> u64 {
        self.step_count
    }

    /// True when the moment buffers match `params` layout.
    pub fn matches(&self, params: &ParamSet) -> bool {
        self.m.same_layout(params)
    }

    /// One Adam update, returning the new parameter set.
    pub fn step(&mut self, params: &ParamSet, grads: &ParamSet) -> ParamSet {
        assert!(
            params.same_layout(grads),
            "gradient layout does not match parameters"
        );
        self.step_count += 1;
        let b1 = self.config.beta1;
        let b2 = self.config.beta2;
        let bc1_inv = 1.0 / (1.0 - b1.powi(self.step_count as i32));
        let bc2_inv = 1.0 / (1.0 - b2.powi(self.step_count as i32));

        self.m = self.m.scale(b1).add_scaled(grads, 1.0 - b1);
        let g_sq = grads
            .iter()
            .fold(ParamSet::new(), |mut acc, (name, t)| {
                let data = t.data.iter().map(|&g| g * g).collect();
                acc.push(name, ParamTensor::from_vec(data, &t.shape));
                acc
            });
        self.v = self.v.scale(b2).add_scaled(&g_sq, 1.0 - b2);

        let mut out = ParamSet::new();
        for (((name, p), (_, m)), (_, v)) in params.iter().zip(self.m.iter()).zip(self.v.iter()) {
            let data = p
                .data
                .iter()
                .zip(m.data.iter())
                .zip(v.data.iter())
                .map(|((&pv, &mv), &vv)| {
                    let m_hat = mv * bc1_inv;
                    let v_hat = vv * bc2_inv;
                    pv - self.config.lr * m_hat / (v_hat.sqrt() + self.config.eps)
                })
                .collect();
            out.push(name, ParamTensor::from_vec(data, &p.shape));
        }
        out
    }
}

/// Adam for a single scalar (the adaptation rate phi).
#[derive(Debug, Clone, Copy, Serialize, Deserialize)]
pub struct ScalarAdam {
    config: AdamConfig,
    m: f32,
    v: f32,
    step_count: u64,
}

impl ScalarAdam {
    /// Fresh scalar optimizer.
    pub fn new(config: AdamConfig) -> Self {
        Self {
            config,
            m: 0.0,
            v: 0.0,
            step_count: 0,
        }
    }

    /// Hyperparameters.
    pub fn config(&self) -> &AdamConfig {
        &self.config
    }

    /// One Adam update on a scalar value.
    pub fn step(&mut self, value: f32, grad: f32) -> f32 {
        self.step_count += 1;
        let b1 = self.config.beta1;
        let b2 = self.config.beta2;
        self.m = b1 * self.m + (1.0 - b1) * grad;
        self.v = b2 * self.v + (1.0 - b2) * grad * grad;
        let m_hat = self.m / (1.0 - b1.powi(self.step_count as i32));
        let v_hat = self.v / (1.0 - b2.powi(self.step_count as i32));
        value - self.config.lr * m_hat / (v_hat.sqrt() + self.config.eps)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn set(data: &[f32]) -> ParamSet {
        let mut s = ParamSet::new();
        s.push("w", ParamTensor::from_vec(data.to_vec(), &[data.len()]));
        s
    }

    #[test]
    fn test_adam_moves_against_gradient() {
        let params = set(&[1.0, -1.0]);
        let grads = set(&[1.0, -1.0]);
        let mut opt = Adam::new(&params, AdamConfig::with_lr(0.1));
        let updated = opt.step(&params, &grads);
        let w = &updated.get("w").unwrap().data;
        assert!(w[0] < 1.0);
        assert!(w[1] > -1.0);
    }

    #[test]
    fn test_adam_zero_grad_is_noop() {
        let params = set(&[0.5]);
        let grads = set(&[0.0]);
        let mut opt = Adam::new(&params, AdamConfig::with_lr(0.1));
        let updated = opt.step(&params, &grads);
        assert!((updated.get("w").unwrap().data[0] - 0.5).abs() < 1e-6);
    }

    #[test]
    fn test_adam_first_step_magnitude() {
        // With bias correction the first step is close to lr in magnitude.
        let params = set(&[0.0]);
        let grads = set(&[3.0]);
        let mut opt = Adam::new(&params, AdamConfig::with_lr(0.01));
        let updated = opt.step(&params, &grads);
        let moved = updated.get("w").unwrap().data[0].abs();
        assert!((moved - 0.01).abs() < 1e-3, "moved {}", moved);
    }

    #[test]
    fn test_scalar_adam_descends() {
        let mut opt = ScalarAdam::new(AdamConfig::with_lr(0.05));
        let mut x = 1.0f32;
        for _ in 0..200 {
            // grad of (x - 0.25)^2
            let g = 2.0 * (x - 0.25);
            x = opt.step(x, g);
        }
        assert!((x - 0.25).abs() < 0.05, "converged to {}", x);
    }

    #[test]
    fn test_adam_serde_roundtrip() {
        let params = set(&[1.0]);
        let mut opt = Adam::new(&params, AdamConfig::default());
        let _ = opt.step(&params, &set(&[0.3]));
        let json = serde_json::to_string(&opt).unwrap();
        let restored: Adam = serde_json::from_str(&json).unwrap();
        assert_eq!(restored.step_count(), 1);
        assert!(restored.matches(&params));
    }
}
