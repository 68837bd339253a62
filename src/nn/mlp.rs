//! MLP dynamics model with an analytic backward pass.
//!
//! Fully-connected layers with tanh activations on the hidden layers and a
//! linear output head predicting the state delta. The backward pass is
//! written out by hand against flat row-major weight buffers so gradients
//! can be evaluated under any substituted parameter set, which is what the
//! finite-difference Hessian-vector products in the meta-update require.

use rand::Rng;

use crate::core::params::{ParamSet, ParamTensor};
use crate::core::rollout::WindowView;
use crate::loss::Objective;
use crate::model::{check_layout, DynamicsModel, ModelError};

/// Fully-connected dynamics model predicting state deltas.
#[derive(Debug, Clone)]
pub struct MlpDynamics {
    state_dim: usize,
    action_dim: usize,
    layer_dims: Vec<usize>,
    params: ParamSet,
}

fn weight_name(layer: usize) -> String {
    format!("l{}.weight", layer)
}

fn bias_name(layer: usize) -> String {
    format!("l{}.bias", layer)
}

/// `z = W x + b` for a row-major `[out, in]` weight matrix.
fn affine(w: &ParamTensor, b: &ParamTensor, x: &[f32]) -> Vec<f32> {
    let inp = w.shape[1];
    debug_assert_eq!(x.len(), inp);
    debug_assert_eq!(b.data.len(), w.shape[0]);
    let mut z = b.data.clone();
    for (o, zo) in z.iter_mut().enumerate() {
        let row = &w.data[o * inp..(o + 1) * inp];
        *zo += row.iter().zip(x.iter()).map(|(&wv, &xv)| wv * xv).sum::<f32>();
    }
    z
}

impl MlpDynamics {
    /// Build a model for `state_dim`-dimensional states and
    /// `action_dim`-dimensional actions with the given hidden layer sizes.
    /// Weights are initialized uniformly in `±1/sqrt(fan_in)`, biases to
    /// zero.
    pub fn new<R: Rng>(
        state_dim: usize,
        action_dim: usize,
        hidden_dims: &[usize],
        rng: &mut R,
    ) -> Self {
        assert!(state_dim > 0, "state_dim must be positive");
        let mut layer_dims = Vec::with_capacity(hidden_dims.len() + 2);
        layer_dims.push(state_dim + action_dim);
        layer_dims.extend_from_slice(hidden_dims);
        layer_dims.push(state_dim);

        let mut params = ParamSet::new();
        for layer in 0..layer_dims.len() - 1 {
            let fan_in = layer_dims[layer];
            let fan_out = layer_dims[layer + 1];
            let bound = 1.0 / (fan_in as f32).sqrt();
            let data: Vec<f32> = (0..fan_in * fan_out)
                .map(|_| rng.gen_range(-bound..bound))
                .collect();
            params.push(weight_name(layer), ParamTensor::from_vec(data, &[fan_out, fan_in]));
            params.push(bias_name(layer), ParamTensor::zeros(&[fan_out]));
        }

        Self {
            state_dim,
            action_dim,
            layer_dims,
            params,
        }
    }

    /// State dimensionality.
    pub fn state_dim(&self) -> usize {
        self.state_dim
    }

    /// Action dimensionality.
    pub fn action_dim(&self) -> usize {
        self.action_dim
    }

    fn layer_count(&self) -> usize {
        self.layer_dims.len() - 1
    }

    /// Resolve one tensor, preferring `overlay` over the persistent set.
    fn tensor<'a>(&'a self, overlay: Option<&'a ParamSet>, name: &str) -> &'a ParamTensor {
        overlay
            .and_then(|o| o.get(name))
            .or_else(|| self.params.get(name))
            .unwrap_or_else(|| panic!("model has no parameter named '{}'", name))
    }

    /// Forward pass caching every activation (input included).
    fn forward_cached(&self, overlay: Option<&ParamSet>, input: Vec<f32>) -> Vec<Vec<f32>> {
        let layers = self.layer_count();
        let mut acts = Vec::with_capacity(layers + 1);
        acts.push(input);
        for layer in 0..layers {
            let w = self.tensor(overlay, &weight_name(layer));
            let b = self.tensor(overlay, &bias_name(layer));
            let mut z = affine(w, b, acts.last().map(|a| a.as_slice()).unwrap_or(&[]));
            if layer + 1 < layers {
                for v in z.iter_mut() {
                    *v = v.tanh();
                }
            }
            acts.push(z);
        }
        acts
    }

    fn concat_input(&self, state: &[f32], action: &[f32]) -> Vec<f32> {
        debug_assert_eq!(state.len(), self.state_dim);
        debug_assert_eq!(action.len(), self.action_dim);
        let mut input = Vec::with_capacity(state.len() + action.len());
        input.extend_from_slice(state);
        input.extend_from_slice(action);
        input
    }
}

impl DynamicsModel for MlpDynamics {
    fn base_params(&self) -> &ParamSet {
        &self.params
    }

    fn commit_params(&mut self, params: ParamSet) -> Result<(), ModelError> {
        check_layout(&self.params, &params)?;
        self.params = params;
        Ok(())
    }

    fn forward(&self, state: &[f32], action: &[f32], overlay: Option<&ParamSet>) -> Vec<f32> {
        let acts = self.forward_cached(overlay, self.concat_input(state, action));
        acts.into_iter().next_back().unwrap_or_default()
    }

    fn loss_and_grad(
        &self,
        window: &WindowView<'_>,
        params: &ParamSet,
        objective: &Objective,
    ) -> (f32, ParamSet) {
        let n = window.len();
        debug_assert!(n > 0, "loss_and_grad called on an empty window");
        let layers = self.layer_count();
        let factor = objective.window_factor(n);

        let mut dw: Vec<Vec<f32>> = (0..layers)
            .map(|l| vec![0.0; self.layer_dims[l] * self.layer_dims[l + 1]])
            .collect();
        let mut db: Vec<Vec<f32>> = (0..layers)
            .map(|l| vec![0.0; self.layer_dims[l + 1]])
            .collect();
        let mut total = 0.0;

        for i in 0..n {
            let state = &window.states[i];
            let action = &window.actions[i];
            let actual = &window.next_states[i];

            let acts = self.forward_cached(Some(params), self.concat_input(state, action));
            let delta = &acts[layers];
            let pred: Vec<f32> = state.iter().zip(delta.iter()).map(|(&s, &d)| s + d).collect();
            total += objective.sample_loss(&pred, actual);

            // dL/d(delta) == dL/d(pred) since pred = state + delta.
            let mut grad = vec![0.0; self.state_dim];
            objective.sample_grad(&pred, actual, &mut grad);

            for layer in (0..layers).rev() {
                let inp = self.layer_dims[layer];
                let out = self.layer_dims[layer + 1];
                let a_in = &acts[layer];
                // Hidden activations are tanh outputs; the last layer is linear.
                let dz: Vec<f32> = if layer + 1 == layers {
                    grad.clone()
                } else {
                    grad.iter()
                        .zip(acts[layer + 1].iter())
                        .map(|(&g, &a)| g * (1.0 - a * a))
                        .collect()
                };
                for o in 0..out {
                    db[layer][o] += dz[o];
                    let row = &mut dw[layer][o * inp..(o + 1) * inp];
                    for (r, &x) in row.iter_mut().zip(a_in.iter()) {
                        *r += dz[o] * x;
                    }
                }
                if layer > 0 {
                    let w = self.tensor(Some(params), &weight_name(layer));
                    let mut upstream = vec![0.0; inp];
                    for o in 0..out {
                        let row = &w.data[o * inp..(o + 1) * inp];
                        for (u, &wv) in upstream.iter_mut().zip(row.iter()) {
                            *u += wv * dz[o];
                        }
                    }
                    grad = upstream;
                }
            }
        }

        let mut grads = ParamSet::new();
        for layer in 0..layers {
            let inp = self.layer_dims[layer];
            let out = self.layer_dims[layer + 1];
            let w: Vec<f32> = dw[layer].iter().map(|&g| g * factor).collect();
            let b: Vec<f32> = db[layer].iter().map(|&g| g * factor).collect();
            grads.push(weight_name(layer), ParamTensor::from_vec(w, &[out, inp]));
            grads.push(bias_name(layer), ParamTensor::from_vec(b, &[out]));
        }
        (factor * total, grads)
    }
}
