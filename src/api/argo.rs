//! The subset of the Argo CD `Application` resource this operator reads and writes.
//!
//! Top level spec fields the operator does not manage are dropped on
//! deserialization, so writes must go through merge patches rather than full
//! replacements. Sources are written back as whole arrays, so unknown fields
//! inside them and inside the sync policy are carried along in `extra`.
use std::collections::BTreeMap;

use kube::CustomResource;
use schemars::JsonSchema;
use serde::{Deserialize, Serialize};
use serde_json::Value;

#[derive(CustomResource, Deserialize, Serialize, Clone, Debug, Default, PartialEq, JsonSchema)]
#[kube(kind = "Application", group = "argoproj.io", version = "v1alpha1", namespaced)]
#[serde(rename_all = "camelCase")]
pub struct ApplicationSpec {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub source: Option<ApplicationSource>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub sources: Vec<ApplicationSource>,
    pub destination: ApplicationDestination,
    pub project: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub sync_policy: Option<SyncPolicy>,
}

#[derive(Deserialize, Serialize, Clone, Debug, Default, PartialEq, JsonSchema)]
#[serde(rename_all = "camelCase")]
pub struct ApplicationSource {
    #[serde(rename = "repoURL")]
    pub repo_url: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub path: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub target_revision: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub chart: Option<String>,
    #[serde(rename = "ref", default, skip_serializing_if = "Option::is_none")]
    pub ref_: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub helm: Option<ApplicationSourceHelm>,
    /// kustomize, directory, plugin and anything else set on the live source
    #[serde(flatten)]
    pub extra: BTreeMap<String, Value>,
}

impl ApplicationSource {
    /// True when both sources point at the same content, ignoring helm settings
    pub fn same_origin(&self, other: &ApplicationSource) -> bool {
        self.repo_url == other.repo_url
            && self.path == other.path
            && self.target_revision == other.target_revision
            && self.chart == other.chart
            && self.ref_ == other.ref_
    }
}

/// Value files and parameters handed to helm
#[derive(Deserialize, Serialize, Clone, Debug, Default, PartialEq, JsonSchema)]
#[serde(rename_all = "camelCase")]
pub struct ApplicationSourceHelm {
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub value_files: Vec<String>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub parameters: Vec<HelmParameter>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub ignore_missing_value_files: Option<bool>,
    /// releaseName, values, valuesObject and other settings the operator leaves alone
    #[serde(flatten)]
    pub extra: BTreeMap<String, Value>,
}

#[derive(Deserialize, Serialize, Clone, Debug, Default, PartialEq, Eq, JsonSchema)]
#[serde(rename_all = "camelCase")]
pub struct HelmParameter {
    pub name: String,
    #[serde(default)]
    pub value: String,
    #[serde(default, skip_serializing_if = "is_false")]
    pub force_string: bool,
}

fn is_false(b: &bool) -> bool {
    !*b
}

#[derive(Deserialize, Serialize, Clone, Debug, Default, PartialEq, JsonSchema)]
#[serde(rename_all = "camelCase")]
pub struct ApplicationDestination {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub server: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub namespace: Option<String>,
}

#[derive(Deserialize, Serialize, Clone, Debug, Default, PartialEq, JsonSchema)]
#[serde(rename_all = "camelCase")]
pub struct SyncPolicy {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub automated: Option<SyncPolicyAutomated>,
    #[serde(flatten)]
    pub extra: BTreeMap<String, Value>,
}

#[derive(Deserialize, Serialize, Clone, Debug, Default, PartialEq, JsonSchema)]
#[serde(rename_all = "camelCase")]
pub struct SyncPolicyAutomated {
    #[serde(default)]
    pub prune: bool,
    #[serde(default)]
    pub self_heal: bool,
    #[serde(flatten)]
    pub extra: BTreeMap<String, Value>,
}

impl Application {
    /// The helm block of the single source, or of the last source carrying one
    pub fn helm_source(&self) -> Option<&ApplicationSourceHelm> {
        match &self.spec.source {
            Some(source) => source.helm.as_ref(),
            None => self.spec.sources.iter().rev().find_map(|s| s.helm.as_ref()),
        }
    }

    pub fn helm_source_mut(&mut self) -> Option<&mut ApplicationSourceHelm> {
        match &mut self.spec.source {
            Some(source) => source.helm.as_mut(),
            None => self
                .spec
                .sources
                .iter_mut()
                .rev()
                .find_map(|s| s.helm.as_mut()),
        }
    }

    /// Sources in declaration order regardless of single or multi source layout
    pub fn all_sources(&self) -> Vec<&ApplicationSource> {
        match &self.spec.source {
            Some(source) => vec![source],
            None => self.spec.sources.iter().collect(),
        }
    }
}
