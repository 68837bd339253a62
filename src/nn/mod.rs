//! Reference dynamics-model implementations.

pub mod mlp;

pub use mlp::MlpDynamics;
