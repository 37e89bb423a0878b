pub mod argo;
pub mod v1alpha1;
