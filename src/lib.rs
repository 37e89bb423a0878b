/// Custom resources read and written by the operator
pub mod api;

/// Application generation, drift detection and the reconcile loop
pub mod controllers;
pub use controllers::pattern_controller::{run, State};

/// Errors, config, metrics and telemetry
pub mod util;

#[cfg(test)]
pub mod fixtures;
