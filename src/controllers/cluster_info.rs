use kube::{
    api::{Api, ApiResource, DynamicObject, GroupVersionKind},
    Client,
};
use serde_json::Value;

use crate::api::v1alpha1::PatternStatus;
use crate::util::errors::Result;

const CONFIG_GROUP: &str = "config.openshift.io";
const CONFIG_VERSION: &str = "v1";

/// Facts about the cluster the operator runs on, as recorded on the Pattern status
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct ClusterFacts {
    pub cluster_id: String,
    pub cluster_version: String,
    pub cluster_platform: String,
    pub app_cluster_domain: String,
    pub cluster_domain: String,
    pub cluster_name: String,
}

impl ClusterFacts {
    /// Derive facts from the data of the `version` ClusterVersion, the `cluster`
    /// Infrastructure and the `cluster` Ingress config objects.
    pub fn from_config(cluster_version: &Value, infrastructure: &Value, ingress: &Value) -> Self {
        let app_cluster_domain = string_at(ingress, "/spec/domain");
        let cluster_domain = app_cluster_domain
            .split_once('.')
            .map(|(_, rest)| rest.to_string())
            .unwrap_or_default();
        let cluster_name = cluster_domain
            .split('.')
            .next()
            .unwrap_or_default()
            .to_string();

        Self {
            cluster_id: string_at(cluster_version, "/spec/clusterID"),
            cluster_version: current_version(cluster_version),
            cluster_platform: string_at(infrastructure, "/spec/platformSpec/type"),
            app_cluster_domain,
            cluster_domain,
            cluster_name,
        }
    }

    pub fn apply_to(&self, status: &mut PatternStatus) {
        status.cluster_id = self.cluster_id.clone();
        status.cluster_version = self.cluster_version.clone();
        status.cluster_platform = self.cluster_platform.clone();
        status.app_cluster_domain = self.app_cluster_domain.clone();
        status.cluster_domain = self.cluster_domain.clone();
        status.cluster_name = self.cluster_name.clone();
    }
}

fn string_at(value: &Value, pointer: &str) -> String {
    value
        .pointer(pointer)
        .and_then(Value::as_str)
        .unwrap_or_default()
        .to_string()
}

// The first completed entry of the update history is the running version; during
// the very first install there is none yet and the desired version is used.
fn current_version(cluster_version: &Value) -> String {
    let completed = cluster_version
        .pointer("/status/history")
        .and_then(Value::as_array)
        .and_then(|history| {
            history
                .iter()
                .find(|entry| entry.get("state").and_then(Value::as_str) == Some("Completed"))
        })
        .map(|entry| string_at(entry, "/version"));

    let version = match completed {
        Some(version) if !version.is_empty() => version,
        _ => string_at(cluster_version, "/status/desired/version"),
    };
    major_minor(&version)
}

fn major_minor(version: &str) -> String {
    let mut segments = version.split('.');
    match (segments.next(), segments.next()) {
        (Some(major), Some(minor)) if !major.is_empty() && !minor.is_empty() => {
            format!("{major}.{minor}")
        }
        _ => version.to_string(),
    }
}

async fn get_config_object(client: &Client, kind: &str, plural: &str, name: &str) -> Result<Value> {
    let gvk = GroupVersionKind::gvk(CONFIG_GROUP, CONFIG_VERSION, kind);
    let resource = ApiResource::from_gvk_with_plural(&gvk, plural);
    let api: Api<DynamicObject> = Api::all_with(client.clone(), &resource);
    Ok(api.get(name).await?.data)
}

/// Read the OpenShift config objects and derive the cluster facts from them
pub async fn discover(client: &Client) -> Result<ClusterFacts> {
    let cluster_version = get_config_object(client, "ClusterVersion", "clusterversions", "version").await?;
    let infrastructure = get_config_object(client, "Infrastructure", "infrastructures", "cluster").await?;
    let ingress = get_config_object(client, "Ingress", "ingresses", "cluster").await?;
    Ok(ClusterFacts::from_config(&cluster_version, &infrastructure, &ingress))
}
