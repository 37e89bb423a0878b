use std::collections::BTreeMap;

use k8s_openapi::api::core::v1::ConfigMap;
use kube::{Api, Client};
use tracing::debug;

use crate::util::errors::{Error, Result, StdError};

/// Namespace the operator runs in unless OPERATOR_NAMESPACE says otherwise
pub const DEFAULT_OPERATOR_NAMESPACE: &str = "openshift-operators";
pub const OPERATOR_CONFIG_MAP: &str = "patterns-operator-config";
/// Namespace of the cluster wide argo instance that owns the generated applications
pub const DEFAULT_APPLICATION_NAMESPACE: &str = "openshift-gitops";

pub const APPLICATION_NAMESPACE_KEY: &str = "applicationNamespace";
pub const MANUAL_SYNC_KEY: &str = "gitops.ManualSync";

/// Settings the resolvers need from the environment, passed in explicitly on every call.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct OperatorConfig {
    pub application_namespace: String,
    pub manual_sync: bool,
}

impl Default for OperatorConfig {
    fn default() -> Self {
        Self {
            application_namespace: DEFAULT_APPLICATION_NAMESPACE.to_string(),
            manual_sync: false,
        }
    }
}

impl OperatorConfig {
    /// Overlay the data of the operator ConfigMap on top of the defaults.
    pub fn from_data(data: &BTreeMap<String, String>) -> Result<Self> {
        let mut config = Self::default();

        if let Some(ns) = data.get(APPLICATION_NAMESPACE_KEY).filter(|ns| !ns.is_empty()) {
            config.application_namespace = ns.clone();
        }
        if let Some(raw) = data.get(MANUAL_SYNC_KEY) {
            config.manual_sync = raw.trim().parse::<bool>().map_err(|_| {
                Error::StdError(StdError::InvalidConfig(format!(
                    "{MANUAL_SYNC_KEY} must be true or false, got {raw:?}"
                )))
            })?;
        }

        Ok(config)
    }

    /// Read the operator ConfigMap, falling back to defaults when it does not exist.
    pub async fn load(client: &Client, namespace: &str) -> Result<Self> {
        let configmaps: Api<ConfigMap> = Api::namespaced(client.clone(), namespace);
        match configmaps.get_opt(OPERATOR_CONFIG_MAP).await? {
            Some(cm) => Self::from_data(&cm.data.unwrap_or_default()),
            None => {
                debug!("ConfigMap {namespace}/{OPERATOR_CONFIG_MAP} not found, using defaults");
                Ok(Self::default())
            }
        }
    }
}

pub fn operator_namespace() -> String {
    std::env::var("OPERATOR_NAMESPACE").unwrap_or_else(|_| DEFAULT_OPERATOR_NAMESPACE.to_string())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn empty_config_map_yields_defaults() {
        let config = OperatorConfig::from_data(&BTreeMap::new()).unwrap();
        assert_eq!(config, OperatorConfig::default());
        assert_eq!(config.application_namespace, "openshift-gitops");
        assert!(!config.manual_sync);
    }

    #[test]
    fn config_map_overrides_defaults() {
        let data = BTreeMap::from([
            (APPLICATION_NAMESPACE_KEY.to_string(), "argocd".to_string()),
            (MANUAL_SYNC_KEY.to_string(), "true".to_string()),
        ]);
        let config = OperatorConfig::from_data(&data).unwrap();
        assert_eq!(config.application_namespace, "argocd");
        assert!(config.manual_sync);
    }

    #[test]
    fn malformed_manual_sync_is_rejected() {
        let data = BTreeMap::from([(MANUAL_SYNC_KEY.to_string(), "yes".to_string())]);
        let err = OperatorConfig::from_data(&data).unwrap_err();
        assert!(matches!(err, Error::StdError(StdError::InvalidConfig(_))));
    }
}
