use core::fmt;

use chrono::{DateTime, Utc};
use kube::CustomResource;
use schemars::JsonSchema;
use serde::{Deserialize, Serialize};

pub static PATTERN_FINALIZER: &str = "pattern.gitops.hybrid-cloud-patterns.io";

/// Generate the Kubernetes wrapper struct `Pattern` from our Spec and Status struct
///
/// This provides a hook for generating the CRD yaml (in crdgen.rs)
#[derive(CustomResource, Deserialize, Serialize, Clone, Debug, JsonSchema)]
#[cfg_attr(test, derive(Default))]
#[kube(
    kind = "Pattern",
    group = "gitops.hybrid-cloud-patterns.io",
    version = "v1alpha1",
    namespaced
)]
#[kube(status = "PatternStatus", shortname = "patt")]
#[kube(printcolumn = r#"{"name":"Step", "type":"string", "jsonPath":".status.lastStep", "priority":1}"#)]
#[kube(printcolumn = r#"{"name":"Error", "type":"string", "jsonPath":".status.lastError", "priority":2}"#)]
#[serde(rename_all = "camelCase")]
pub struct PatternSpec {
    pub cluster_group_name: String,

    #[serde(rename = "gitSpec")]
    pub git_config: GitConfig,

    #[serde(default)]
    pub multi_source_config: MultiSourceConfig,

    #[serde(rename = "gitOpsSpec", default, skip_serializing_if = "Option::is_none")]
    pub git_ops_config: Option<GitOpsConfig>,

    /// Names are dot separated per the helm --set syntax, such as global.something.field
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub extra_parameters: Vec<PatternParameter>,

    /// Additional value files, relative to the root of the target repo
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub extra_value_files: Vec<String>,

    #[serde(rename = "analyticsUUID", default, skip_serializing_if = "String::is_empty")]
    pub analytics_uuid: String,
}

#[derive(Deserialize, Serialize, Clone, Default, Debug, PartialEq, Eq, JsonSchema)]
pub struct PatternParameter {
    pub name: String,
    pub value: String,
}

#[derive(Deserialize, Serialize, Clone, Debug, JsonSchema)]
#[serde(rename_all = "camelCase")]
pub struct GitConfig {
    /// Git repo containing the pattern to deploy. Must use https/http
    pub target_repo: String,

    /// Branch, tag, or commit to deploy. Does not support short-sha's
    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub target_revision: String,

    /// Upstream repo, used when the target repo is an in-cluster fork
    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub origin_repo: String,

    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub origin_revision: String,

    /// Seconds between drift checks of origin and target repositories
    #[serde(default = "default_poll_interval")]
    pub poll_interval: u32,

    /// FQDN of the git server if automatic parsing from target_repo is broken
    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub hostname: String,
}

impl Default for GitConfig {
    fn default() -> Self {
        Self {
            target_repo: String::new(),
            target_revision: String::new(),
            origin_repo: String::new(),
            origin_revision: String::new(),
            poll_interval: default_poll_interval(),
            hostname: String::new(),
        }
    }
}

fn default_poll_interval() -> u32 {
    180
}

#[derive(Deserialize, Serialize, Clone, Debug, PartialEq, Eq, JsonSchema)]
#[serde(rename_all = "camelCase")]
pub struct MultiSourceConfig {
    /// Deploy the clustergroup chart from a helm repo instead of the pattern repo
    #[serde(default)]
    pub enabled: bool,

    #[serde(default = "default_helm_repo_url")]
    pub helm_repo_url: String,

    #[serde(default = "default_cluster_group_chart_version")]
    pub cluster_group_chart_version: String,

    /// Only used when developing the clustergroup chart
    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub cluster_group_git_repo_url: String,

    #[serde(default = "default_cluster_group_chart_git_revision")]
    pub cluster_group_chart_git_revision: String,
}

impl Default for MultiSourceConfig {
    fn default() -> Self {
        Self {
            enabled: false,
            helm_repo_url: default_helm_repo_url(),
            cluster_group_chart_version: default_cluster_group_chart_version(),
            cluster_group_git_repo_url: String::new(),
            cluster_group_chart_git_revision: default_cluster_group_chart_git_revision(),
        }
    }
}

fn default_helm_repo_url() -> String {
    "https://charts.validatedpatterns.io/".to_string()
}
fn default_cluster_group_chart_version() -> String {
    "0.0.*".to_string()
}
fn default_cluster_group_chart_git_revision() -> String {
    "main".to_string()
}

#[derive(Deserialize, Serialize, Clone, Default, Debug, JsonSchema)]
#[serde(rename_all = "camelCase")]
pub struct GitOpsConfig {
    /// Channel to deploy openshift-gitops from
    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub operator_channel: String,

    /// Catalog source to deploy openshift-gitops from
    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub operator_source: String,

    /// Require manual intervention before Argo will sync new content
    #[serde(default)]
    pub manual_sync: bool,

    /// Require manual confirmation before installing and upgrading operators
    #[serde(default)]
    pub manual_approval: bool,

    /// Specific version of openshift-gitops to deploy, only honoured with `useCSV`
    #[serde(rename = "operatorCSV", default, skip_serializing_if = "String::is_empty")]
    pub operator_csv: String,

    #[serde(rename = "useCSV", default)]
    pub use_csv: bool,
}

/// The status object of `Pattern`
#[derive(Deserialize, Serialize, Clone, Default, Debug, PartialEq, JsonSchema)]
#[serde(rename_all = "camelCase")]
pub struct PatternStatus {
    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub last_step: String,
    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub last_error: String,
    /// Number of updates written to the generated application
    #[serde(default)]
    pub version: u32,

    #[serde(default)]
    pub cluster_name: String,
    #[serde(default)]
    pub app_cluster_domain: String,
    #[serde(default)]
    pub cluster_domain: String,
    #[serde(default, rename = "clusterID")]
    pub cluster_id: String,
    #[serde(default)]
    pub cluster_platform: String,
    #[serde(default)]
    pub cluster_version: String,

    #[serde(default)]
    pub conditions: Vec<PatternCondition>,
}

#[derive(Deserialize, Serialize, Clone, Copy, Debug, PartialEq, Eq, JsonSchema)]
pub enum PatternConditionType {
    GitInSync,
    GitOutOfSync,
}

impl fmt::Display for PatternConditionType {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        match self {
            PatternConditionType::GitInSync => write!(f, "GitInSync"),
            PatternConditionType::GitOutOfSync => write!(f, "GitOutOfSync"),
        }
    }
}

#[derive(Deserialize, Serialize, Clone, Debug, PartialEq, JsonSchema)]
#[serde(rename_all = "camelCase")]
pub struct PatternCondition {
    #[serde(rename = "type")]
    pub type_: PatternConditionType,
    /// One of True, False, Unknown
    pub status: String,
    pub last_update_time: DateTime<Utc>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub last_transition_time: Option<DateTime<Utc>>,
    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub message: String,
}

impl Pattern {
    pub fn conditions(&self) -> &[PatternCondition] {
        self.status
            .as_ref()
            .map(|s| s.conditions.as_slice())
            .unwrap_or_default()
    }

    /// Observed cluster facts, empty when the driver has not written any yet
    pub fn observed(&self) -> PatternStatus {
        self.status.clone().unwrap_or_default()
    }

    pub fn manual_sync(&self) -> bool {
        self.spec.git_ops_config.as_ref().is_some_and(|c| c.manual_sync)
    }
}
