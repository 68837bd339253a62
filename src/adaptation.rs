//! Inner-loop adaptation.
//!
//! Given the base parameters theta and a short window of recent
//! transitions, the engine runs a fixed number of gradient steps with the
//! learnable adaptation rate phi, producing task-adapted parameters.
//! Every step subtracts the freshly evaluated gradient from the *base*
//! parameters, not from the previous specialized set: step j evaluates
//! `g_j = grad(loss, theta_j)` and forms `theta_{j+1} = theta - phi g_j`.
//! The traced variant additionally records every step so the meta-update
//! can differentiate through the whole descent; the untraced variant is
//! what controllers use at plan time, where only the adapted parameters
//! matter.

use crate::core::params::ParamSet;
use crate::core::rollout::WindowView;
use crate::core::run_stats::RunStats;
use crate::loss::Objective;
use crate::model::DynamicsModel;

/// One recorded inner gradient step: the parameters the gradient was
/// taken at, and the gradient itself.
#[derive(Debug, Clone)]
pub struct AdaptStep {
    /// Parameters at the start of the step (theta_j).
    pub params: ParamSet,
    /// Window-loss gradient at those parameters (g_j).
    pub grad: ParamSet,
    /// Whether the step participates in second-order backpropagation.
    /// The opening step updates with a detached gradient: it still
    /// contributes direct terms to both outer gradients, but no curvature
    /// flows through it.
    pub traced: bool,
}

/// Full record of an adaptation run, oldest step first.
#[derive(Debug, Clone)]
pub struct AdaptationTrace {
    /// The gradient steps in the order they were taken.
    pub steps: Vec<AdaptStep>,
    /// The adaptation rate every step was taken with.
    pub phi: f32,
    /// Final adapted parameters.
    pub adapted: ParamSet,
}

/// Runs the inner gradient-descent loop.
#[derive(Debug, Clone, Copy)]
pub struct AdaptationEngine {
    update_num: usize,
}

impl AdaptationEngine {
    /// Engine taking one detached step plus `update_num` traced steps.
    pub fn new(update_num: usize) -> Self {
        Self { update_num }
    }

    /// Number of traced steps after the opening one.
    pub fn update_num(&self) -> usize {
        self.update_num
    }

    /// Adapt `base` to `window`, returning only the final parameters.
    ///
    /// Returns `None` for an empty window: with no recent transitions
    /// there is nothing to adapt to, and callers fall back to the base
    /// parameters.
    pub fn adapt(
        &self,
        model: &dyn DynamicsModel,
        window: &WindowView<'_>,
        base: &ParamSet,
        phi: f32,
        objective: &Objective,
        stats: &mut RunStats,
    ) -> Option<ParamSet> {
        self.adapt_traced(model, window, base, phi, objective, stats)
            .map(|trace| trace.adapted)
    }

    /// Adapt `base` to `window`, recording every step for second-order
    /// meta-gradients. Returns `None` for an empty window.
    pub fn adapt_traced(
        &self,
        model: &dyn DynamicsModel,
        window: &WindowView<'_>,
        base: &ParamSet,
        phi: f32,
        objective: &Objective,
        stats: &mut RunStats,
    ) -> Option<AdaptationTrace> {
        if window.is_empty() {
            return None;
        }

        let mut steps = Vec::with_capacity(1 + self.update_num);

        let (_, grad) = model.loss_and_grad(window, base, objective);
        stats.add_model_steps(1);
        let mut current = base.sub_scaled(&grad, phi);
        steps.push(AdaptStep {
            params: base.clone(),
            grad,
            traced: false,
        });

        for _ in 0..self.update_num {
            let (_, grad) = model.loss_and_grad(window, &current, objective);
            stats.add_model_steps(1);
            // Anchored at the base parameters: only the gradient comes
            // from the current specialized set.
            let next = base.sub_scaled(&grad, phi);
            steps.push(AdaptStep {
                params: current,
                grad,
                traced: true,
            });
            current = next;
        }

        Some(AdaptationTrace {
            steps,
            phi,
            adapted: current,
        })
    }
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

    fn sample_window() -> Rollout {
        let mut rollout = Rollout::new();
        for i in 0..4 {
            let s = vec![0.1 * i as f32, -0.2 * i as f32];
            let ns = vec![0.1 * (i + 1) as f32, -0.2 * (i + 1) as f32];
            rollout.push(s, &Action::Continuous(vec![0.5]), ns);
        }
        rollout
    }

    fn objective() -> Objective {
        Objective::new(LossKind::MeanSquaredError, 1.0, 1.0)
    }

    #[test]
    fn test_empty_window_yields_none() {
        let mut rng = StdRng::seed_from_u64(0);
        let model = MlpDynamics::new(2, 1, &[8], &mut rng);
        let engine = AdaptationEngine::new(2);
        let rollout = Rollout::new();
        let mut stats = RunStats::default();
        let adapted = engine.adapt(
            &model,
            &rollout.full(),
            model.base_params(),
            0.01,
            &objective(),
            &mut stats,
        );
        assert!(adapted.is_none());
        assert_eq!(stats.n_model_steps, 0);
    }

    #[test]
    fn test_trace_shape_and_step_count() {
        let mut rng = StdRng::seed_from_u64(1);
        let model = MlpDynamics::new(2, 1, &[8], &mut rng);
        let engine = AdaptationEngine::new(3);
        let rollout = sample_window();
        let mut stats = RunStats::default();
        let trace = engine
            .adapt_traced(
                &model,
                &rollout.full(),
                model.base_params(),
                0.01,
                &objective(),
                &mut stats,
            )
            .unwrap();
        assert_eq!(trace.steps.len(), 4);
        assert!(!trace.steps[0].traced);
        assert!(trace.steps[1..].iter().all(|s| s.traced));
        assert!(trace.adapted.same_layout(model.base_params()));
        assert_eq!(stats.n_model_steps, 4);
    }

    #[test]
    fn test_adaptation_reduces_window_loss() {
        let mut rng = StdRng::seed_from_u64(2);
        let model = MlpDynamics::new(2, 1, &[16], &mut rng);
        let engine = AdaptationEngine::new(5);
        let rollout = sample_window();
        let obj = objective();
        let mut stats = RunStats::default();
        let window = rollout.full();
        let (before, _) = model.loss_and_grad(&window, model.base_params(), &obj);
        let adapted = engine
            .adapt(&model, &window, model.base_params(), 0.05, &obj, &mut stats)
            .unwrap();
        let (after, _) = model.loss_and_grad(&window, &adapted, &obj);
        assert!(after < before, "loss went {} -> {}", before, after);
    }

    #[test]
    fn test_step_params_chain() {
        // Each recorded step's params must equal the previous step's
        // update, so the reverse sweep walks a consistent chain.
        let mut rng = StdRng::seed_from_u64(3);
        let model = MlpDynamics::new(2, 1, &[8], &mut rng);
        let engine = AdaptationEngine::new(2);
        let rollout = sample_window();
        let mut stats = RunStats::default();
        let phi = 0.02;
        let trace = engine
            .adapt_traced(
                &model,
                &rollout.full(),
                model.base_params(),
                phi,
                &objective(),
                &mut stats,
            )
            .unwrap();
        let base = &trace.steps[0].params;
        for pair in trace.steps.windows(2) {
            let expected = base.sub_scaled(&pair[0].grad, phi);
            assert_eq!(pair[1].params, expected);
        }
        let last = trace.steps.last().unwrap();
        assert_eq!(trace.adapted, base.sub_scaled(&last.grad, phi));
    }

    #[test]
    fn test_traced_step_subtracts_from_base() {
        // A traced step re-applies its update from the base parameters
        // rather than descending from the intermediate set, so the two
        // rules must give visibly different results after one traced step.
        let mut rng = StdRng::seed_from_u64(4);
        let model = MlpDynamics::new(2, 1, &[8], &mut rng);
        let engine = AdaptationEngine::new(1);
        let rollout = sample_window();
        let window = rollout.full();
        let obj = objective();
        let phi = 0.05;
        let base = model.base_params().clone();
        let mut stats = RunStats::default();

        let adapted = engine
            .adapt(&model, &window, &base, phi, &obj, &mut stats)
            .unwrap();

        let (_, g0) = model.loss_and_grad(&window, &base, &obj);
        let theta1 = base.sub_scaled(&g0, phi);
        let (_, g1) = model.loss_and_grad(&window, &theta1, &obj);
        assert_eq!(adapted, base.sub_scaled(&g1, phi));

        let chained = theta1.sub_scaled(&g1, phi);
        let diff = adapted.sub(&chained).l2_norm();
        assert!(diff > 1e-6, "update rules should not coincide, diff {}", diff);
    }
}
