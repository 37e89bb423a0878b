pub mod argo;
pub mod cluster_info;
pub mod conditions;
pub mod pattern_controller;
