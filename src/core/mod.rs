//! Core data model: parameter sets, rollouts, the rollout dataset, and
//! run counters.

pub mod dataset;
pub mod params;
pub mod rollout;
pub mod run_stats;

pub use dataset::Dataset;
pub use params::{ParamSet, ParamTensor};
pub use rollout::{Rollout, TrajWindow, WindowView};
pub use run_stats::RunStats;
