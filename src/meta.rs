//! Outer-loop meta-gradient computation.
//!
//! For each sampled window the engine adapts the base parameters on the
//! history segment, evaluates the post-adaptation loss on the same
//! segment, and backpropagates that loss through the recorded descent.
//! The sweep runs the adaptation trace in reverse. Every inner step is
//! anchored at the base parameters, `theta_{j+1} = theta - phi * g_j`, so
//! each step adds its incoming cotangent `v` straight to the parameter
//! gradient and `-g_j . v` to the adaptation-rate gradient; the only path
//! into the previous step runs through the gradient term, carrying
//! `v <- -phi * H(theta_j) v`. Hessian-vector products are formed by
//! central differences of the window gradient, so no step requires more
//! than first-order model evaluations.

use rand::Rng;

use crate::adaptation::{AdaptationEngine, AdaptationTrace};
use crate::core::dataset::Dataset;
use crate::core::params::ParamSet;
use crate::core::rollout::WindowView;
use crate::core::run_stats::RunStats;
use crate::loss::Objective;
use crate::model::DynamicsModel;

/// Result of one meta-gradient computation.
#[derive(Debug, Clone)]
pub struct MetaOutcome {
    /// Mean post-adaptation loss over the sampled windows.
    pub loss: f32,
    /// Gradient of that loss with respect to the base parameters.
    pub theta_grad: ParamSet,
    /// Gradient with respect to the adaptation rate.
    pub phi_grad: f32,
}

/// Computes meta-gradients over freshly sampled dataset windows.
#[derive(Debug, Clone, Copy)]
pub struct MetaUpdate {
    task_sample_num: usize,
    history_len: usize,
    lookahead_len: usize,
    hvp_epsilon: f32,
}

impl MetaUpdate {
    /// New meta-update over `task_sample_num` windows of
    /// `history_len + lookahead_len` transitions.
    pub fn new(
        task_sample_num: usize,
        history_len: usize,
        lookahead_len: usize,
        hvp_epsilon: f32,
    ) -> Self {
        debug_assert!(task_sample_num > 0);
        debug_assert!(hvp_epsilon > 0.0);
        Self {
            task_sample_num,
            history_len,
            lookahead_len,
            hvp_epsilon,
        }
    }

    /// Sample windows, adapt on each, and average the resulting loss and
    /// gradients. The caller owns applying the gradients.
    pub fn compute<R: Rng>(
        &self,
        model: &dyn DynamicsModel,
        engine: &AdaptationEngine,
        dataset: &Dataset,
        phi: f32,
        objective: &Objective,
        rng: &mut R,
        stats: &mut RunStats,
    ) -> MetaOutcome {
        let base = model.base_params();
        let mut loss_sum = 0.0f32;
        let mut theta_grad_sum = base.zeros_like();
        let mut phi_grad_sum = 0.0f32;

        for _ in 0..self.task_sample_num {
            let window = dataset.sample_window(self.history_len, self.lookahead_len, rng);
            let history = window.adaptation();
            let trace = match engine.adapt_traced(model, &history, base, phi, objective, stats) {
                Some(trace) => trace,
                None => continue,
            };

            let (loss, post_grad) = model.loss_and_grad(&history, &trace.adapted, objective);
            stats.add_model_steps(1);
            let (theta_grad, phi_grad) =
                self.backpropagate(model, &history, &trace, post_grad, objective);

            loss_sum += loss;
            theta_grad_sum = theta_grad_sum.add(&theta_grad);
            phi_grad_sum += phi_grad;
        }

        let inv = 1.0 / self.task_sample_num as f32;
        MetaOutcome {
            loss: loss_sum * inv,
            theta_grad: theta_grad_sum.scale(inv),
            phi_grad: phi_grad_sum * inv,
        }
    }

    /// Walk the trace backwards, carrying `v = dL/d theta_{j+1}` into
    /// `dL/d theta_j` and accumulating both outer gradients. The base
    /// parameters appear directly in every step's update, so each step
    /// deposits its cotangent into the parameter gradient before the
    /// sweep moves on.
    fn backpropagate(
        &self,
        model: &dyn DynamicsModel,
        window: &WindowView<'_>,
        trace: &AdaptationTrace,
        post_grad: ParamSet,
        objective: &Objective,
    ) -> (ParamSet, f32) {
        let mut v = post_grad;
        let mut theta_grad = v.zeros_like();
        let mut phi_grad = 0.0f32;
        for step in trace.steps.iter().rev() {
            theta_grad = theta_grad.add(&v);
            phi_grad -= step.grad.dot(&v);
            if step.traced {
                let hv = hessian_vector_product(
                    model,
                    window,
                    &step.params,
                    &v,
                    objective,
                    self.hvp_epsilon,
                );
                v = hv.scale(-trace.phi);
            }
        }
        (theta_grad, phi_grad)
    }
}

/// `H(params) . v` for the window loss, by central finite difference of
/// the gradient along `v`. The probe radius is normalized so the
/// perturbation magnitude matches `epsilon` regardless of `||v||`.
fn hessian_vector_product(
    model: &dyn DynamicsModel,
    window: &WindowView<'_>,
    params: &ParamSet,
    v: &ParamSet,
    objective: &Objective,
    epsilon: f32,
) -> ParamSet {
    let norm = v.l2_norm();
    if norm == 0.0 || !norm.is_finite() {
        return v.zeros_like();
    }
    let r = epsilon / norm;
    let (_, grad_plus) = model.loss_and_grad(window, &params.add_scaled(v, r), objective);
    let (_, grad_minus) = model.loss_and_grad(window, &params.sub_scaled(v, r), objective);
    grad_plus.sub(&grad_minus).scale(1.0 / (2.0 * r))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::rollout::Rollout;
    use crate::environment::Action;
    use crate::loss::LossKind;
    use crate::nn::MlpDynamics;
    use rand::rngs::StdRng;
    use rand::SeedableRng;

    const M: usize = 3;
    const K: usize = 1;

    fn objective() -> Objective {
        Objective::new(LossKind::MeanSquaredError, 1.0, 1.0)
    }

    /// Dataset with a single eligible rollout of exactly M + K
    /// transitions, so sampling is deterministic.
    fn fixed_dataset() -> Dataset {
        let mut rollout = Rollout::new();
        for i in 0..(M + K) {
            let s = vec![0.2 * i as f32, 0.3 - 0.1 * i as f32];
            let ns = vec![0.2 * (i + 1) as f32, 0.3 - 0.1 * (i + 1) as f32];
            rollout.push(s, &Action::Continuous(vec![0.4]), ns);
        }
        let mut dataset = Dataset::new(4);
        dataset.extend(vec![rollout]);
        dataset
    }

    /// The exact quantity `compute` differentiates: adapt on the history
    /// segment and return the post-adaptation loss on it.
    fn numeric_meta_loss(
        model: &MlpDynamics,
        engine: &AdaptationEngine,
        dataset: &Dataset,
        theta: &ParamSet,
        phi: f32,
        obj: &Objective,
    ) -> f32 {
        let mut rng = StdRng::seed_from_u64(0);
        let window = dataset.sample_window(M, K, &mut rng);
        let history = window.adaptation();
        let mut stats = RunStats::default();
        let adapted = engine
            .adapt_traced(model, &history, theta, phi, obj, &mut stats)
            .map(|t| t.adapted)
            .unwrap_or_else(|| theta.clone());
        model.loss_and_grad(&history, &adapted, obj).0
    }

    #[test]
    fn test_untraced_only_theta_grad_is_post_gradient() {
        // With zero traced steps the inner update is detached, so the
        // parameter gradient is exactly the post-adaptation gradient.
        let mut rng = StdRng::seed_from_u64(7);
        let model = MlpDynamics::new(2, 1, &[], &mut rng);
        let engine = AdaptationEngine::new(0);
        let dataset = fixed_dataset();
        let obj = objective();
        let phi = 0.01;
        let mut stats = RunStats::default();

        let meta = MetaUpdate::new(1, M, K, 1e-3);
        let outcome = meta.compute(&model, &engine, &dataset, phi, &obj, &mut rng, &mut stats);

        let mut sample_rng = StdRng::seed_from_u64(0);
        let window = dataset.sample_window(M, K, &mut sample_rng);
        let history = window.adaptation();
        let mut scratch = RunStats::default();
        let adapted = engine
            .adapt(
                &model,
                &history,
                model.base_params(),
                phi,
                &obj,
                &mut scratch,
            )
            .unwrap();
        let (_, expected) = model.loss_and_grad(&history, &adapted, &obj);
        assert_eq!(outcome.theta_grad, expected);
    }

    #[test]
    fn test_theta_grad_matches_finite_difference() {
        let mut rng = StdRng::seed_from_u64(11);
        let model = MlpDynamics::new(2, 1, &[4], &mut rng);
        let engine = AdaptationEngine::new(2);
        let dataset = fixed_dataset();
        let obj = objective();
        let phi = 0.05;
        let mut stats = RunStats::default();

        let meta = MetaUpdate::new(1, M, K, 1e-3);
        let outcome = meta.compute(&model, &engine, &dataset, phi, &obj, &mut rng, &mut stats);

        let theta = model.base_params();
        let eps = 1e-3;
        for (name, tensor) in theta.iter() {
            for idx in 0..tensor.numel().min(4) {
                let mut hi = theta.clone();
                let mut lo = theta.clone();
                perturb(&mut hi, name, idx, eps);
                perturb(&mut lo, name, idx, -eps);
                let fd = (numeric_meta_loss(&model, &engine, &dataset, &hi, phi, &obj)
                    - numeric_meta_loss(&model, &engine, &dataset, &lo, phi, &obj))
                    / (2.0 * eps);
                let analytic = outcome.theta_grad.get(name).unwrap().data[idx];
                let tol = 5e-2_f32.max(0.1 * fd.abs());
                assert!(
                    (fd - analytic).abs() < tol,
                    "{}[{}]: fd {} vs analytic {}",
                    name,
                    idx,
                    fd,
                    analytic
                );
            }
        }
    }

    #[test]
    fn test_phi_grad_matches_finite_difference() {
        let mut rng = StdRng::seed_from_u64(13);
        let model = MlpDynamics::new(2, 1, &[4], &mut rng);
        let engine = AdaptationEngine::new(2);
        let dataset = fixed_dataset();
        let obj = objective();
        let phi = 0.05;
        let mut stats = RunStats::default();

        let meta = MetaUpdate::new(1, M, K, 1e-3);
        let outcome = meta.compute(&model, &engine, &dataset, phi, &obj, &mut rng, &mut stats);

        let theta = model.base_params().clone();
        let eps = 1e-3;
        let fd = (numeric_meta_loss(&model, &engine, &dataset, &theta, phi + eps, &obj)
            - numeric_meta_loss(&model, &engine, &dataset, &theta, phi - eps, &obj))
            / (2.0 * eps);
        let tol = 5e-2_f32.max(0.1 * fd.abs());
        assert!(
            (fd - outcome.phi_grad).abs() < tol,
            "fd {} vs analytic {}",
            fd,
            outcome.phi_grad
        );
    }

    #[test]
    fn test_loss_is_mean_over_samples() {
        // With a single possible window, every sample sees the same loss,
        // so the mean equals one sample's loss.
        let mut rng = StdRng::seed_from_u64(17);
        let model = MlpDynamics::new(2, 1, &[4], &mut rng);
        let engine = AdaptationEngine::new(1);
        let dataset = fixed_dataset();
        let obj = objective();
        let phi = 0.02;

        let mut stats_one = RunStats::default();
        let one = MetaUpdate::new(1, M, K, 1e-3).compute(
            &model,
            &engine,
            &dataset,
            phi,
            &obj,
            &mut rng,
            &mut stats_one,
        );
        let mut stats_many = RunStats::default();
        let many = MetaUpdate::new(5, M, K, 1e-3).compute(
            &model,
            &engine,
            &dataset,
            phi,
            &obj,
            &mut rng,
            &mut stats_many,
        );
        assert!((one.loss - many.loss).abs() < 1e-5);
        assert_eq!(stats_many.n_model_steps, 5 * stats_one.n_model_steps);
    }

    fn perturb(params: &mut ParamSet, name: &str, idx: usize, delta: f32) {
        let mut rebuilt = ParamSet::new();
        for (n, t) in params.iter() {
            let mut data = t.data.clone();
            if n == name {
                data[idx] += delta;
            }
            rebuilt.push(
                n,
                crate::core::params::ParamTensor::from_vec(data, &t.shape),
            );
        }
        *params = rebuilt;
    }
}
