//! Desired state of the Argo application generated for a `Pattern`.
//!
//! Everything here is a pure function of the Pattern (spec plus observed cluster
//! facts) and the operator config, so the driver can call it on every tick and
//! compare the result against the live object.
use std::collections::BTreeMap;

use kube::ResourceExt;
use serde_json::json;

use crate::api::argo::{
    Application, ApplicationDestination, ApplicationSource, ApplicationSourceHelm, ApplicationSpec,
    HelmParameter, SyncPolicy, SyncPolicyAutomated,
};
use crate::api::v1alpha1::Pattern;
use crate::util::config::OperatorConfig;

pub const PATTERN_LABEL: &str = "validatedpatterns.io/pattern";
pub const CLUSTER_GROUP_CHART: &str = "clustergroup";
pub const CLUSTER_GROUP_CHART_PATH: &str = "common/clustergroup";
pub const PATTERN_REF: &str = "patternref";
/// Value files of a multi source application are resolved against the pattern repo source
pub const PATTERN_REF_PREFIX: &str = "$patternref";
pub const IN_CLUSTER_SERVER: &str = "https://kubernetes.default.svc";
pub const DEFAULT_PROJECT: &str = "default";

pub fn application_name(pattern: &Pattern) -> String {
    format!("{}-{}", pattern.name_any(), pattern.spec.cluster_group_name)
}

/// Layered value files, least specific first, followed by the pattern's extra files.
///
/// `prefix` is prepended verbatim to every entry.
pub fn new_application_value_files(pattern: &Pattern, prefix: &str) -> Vec<String> {
    let observed = pattern.observed();
    let group = pattern.spec.cluster_group_name.as_str();
    let platform = observed.cluster_platform.as_str();
    let version = observed.cluster_version.as_str();
    let cluster = observed.cluster_name.as_str();

    let layers = [
        layer_key(&["global"]),
        layer_key(&[group]),
        layer_key(&[platform]),
        layer_key(&[platform, version]),
        layer_key(&[platform, group]),
        layer_key(&[version, group]),
        layer_key(&[cluster]),
    ];

    layers
        .into_iter()
        .flatten()
        .map(|key| format!("/values-{key}.yaml"))
        .chain(pattern.spec.extra_value_files.iter().map(|file| {
            if file.starts_with('/') {
                file.clone()
            } else {
                format!("/{file}")
            }
        }))
        .map(|file| format!("{prefix}{file}"))
        .collect()
}

// A layer is dropped when any fact it is built from is unknown
fn layer_key(facts: &[&str]) -> Option<String> {
    if facts.iter().any(|fact| fact.is_empty()) {
        None
    } else {
        Some(facts.join("-"))
    }
}

/// The fixed `global.*` parameters followed by the pattern's extra parameters.
///
/// An extra parameter whose name is already present overwrites that entry
/// instead of being appended, so names stay unique.
pub fn new_application_parameters(pattern: &Pattern, config: &OperatorConfig) -> Vec<HelmParameter> {
    let observed = pattern.observed();
    let git = &pattern.spec.git_config;

    let mut parameters: Vec<HelmParameter> = [
        ("global.pattern", pattern.name_any()),
        ("global.namespace", config.application_namespace.clone()),
        ("global.repoURL", git.target_repo.clone()),
        ("global.targetRevision", git.target_revision.clone()),
        ("global.hubClusterDomain", observed.app_cluster_domain.clone()),
        ("global.localClusterDomain", observed.app_cluster_domain.clone()),
        ("global.clusterDomain", observed.cluster_domain.clone()),
        ("global.clusterVersion", observed.cluster_version.clone()),
        ("global.clusterPlatform", observed.cluster_platform.clone()),
        ("global.localClusterName", observed.cluster_name.clone()),
    ]
    .into_iter()
    .map(|(name, value)| HelmParameter {
        name: name.to_string(),
        value,
        force_string: false,
    })
    .collect();

    for extra in &pattern.spec.extra_parameters {
        let extra = HelmParameter {
            name: extra.name.clone(),
            value: extra.value.clone(),
            force_string: false,
        };
        if !update_helm_parameter(&extra, &mut parameters) {
            parameters.push(extra);
        }
    }

    parameters
}

/// Order sensitive equality of two value file lists
pub fn compare_helm_value_files(goal: &[String], actual: &[String]) -> bool {
    goal.len() == actual.len() && goal.iter().zip(actual).all(|(g, a)| g == a)
}

/// Order sensitive equality of two parameter lists
pub fn compare_helm_parameters(goal: &[HelmParameter], actual: &[HelmParameter]) -> bool {
    goal.len() == actual.len()
        && goal.iter().zip(actual).all(|(g, a)| {
            g.name == a.name && g.value == a.value && g.force_string == a.force_string
        })
}

pub fn compare_helm_source(goal: &ApplicationSourceHelm, actual: &ApplicationSourceHelm) -> bool {
    compare_helm_value_files(&goal.value_files, &actual.value_files)
        && compare_helm_parameters(&goal.parameters, &actual.parameters)
}

/// Overwrite the value of the parameter named like `desired` in place.
///
/// Returns false, leaving `actual` untouched, when no such parameter exists.
/// Appending is up to the caller.
pub fn update_helm_parameter(desired: &HelmParameter, actual: &mut [HelmParameter]) -> bool {
    match actual.iter_mut().find(|p| p.name == desired.name) {
        Some(param) => {
            param.value = desired.value.clone();
            param.force_string = desired.force_string;
            true
        }
        None => false,
    }
}

/// Apply the desired helm source onto the live one.
///
/// Value files are replaced wholesale. Parameters are merged one by one, so
/// parameters only present on the live object survive.
pub fn merge_helm_source(goal: &ApplicationSourceHelm, actual: &ApplicationSourceHelm) -> ApplicationSourceHelm {
    let mut parameters = actual.parameters.clone();
    for desired in &goal.parameters {
        if !update_helm_parameter(desired, &mut parameters) {
            parameters.push(desired.clone());
        }
    }

    ApplicationSourceHelm {
        value_files: goal.value_files.clone(),
        parameters,
        ignore_missing_value_files: goal
            .ignore_missing_value_files
            .or(actual.ignore_missing_value_files),
        extra: actual.extra.clone(),
    }
}

/// Human readable summary of how the live helm source differs from the desired one
pub fn describe_drift(goal: &ApplicationSourceHelm, actual: &ApplicationSourceHelm) -> String {
    if compare_helm_source(goal, actual) {
        return "Helm source is in sync".to_string();
    }

    let mut drift = Vec::new();
    if !compare_helm_value_files(&goal.value_files, &actual.value_files) {
        drift.push(format!(
            "value files differ ({} desired, {} live)",
            goal.value_files.len(),
            actual.value_files.len()
        ));
    }

    if !compare_helm_parameters(&goal.parameters, &actual.parameters) {
        let live: BTreeMap<&str, &HelmParameter> =
            actual.parameters.iter().map(|p| (p.name.as_str(), p)).collect();
        let mut missing = Vec::new();
        let mut changed = Vec::new();
        for desired in &goal.parameters {
            match live.get(desired.name.as_str()) {
                None => missing.push(desired.name.as_str()),
                Some(p) if *p != desired => changed.push(desired.name.as_str()),
                Some(_) => {}
            }
        }
        let unexpected: Vec<&str> = actual
            .parameters
            .iter()
            .map(|p| p.name.as_str())
            .filter(|name| !goal.parameters.iter().any(|g| g.name == *name))
            .collect();

        let mut details = Vec::new();
        if !missing.is_empty() {
            details.push(format!("missing [{}]", missing.join(", ")));
        }
        if !changed.is_empty() {
            details.push(format!("changed [{}]", changed.join(", ")));
        }
        if !unexpected.is_empty() {
            details.push(format!("unexpected [{}]", unexpected.join(", ")));
        }
        if details.is_empty() {
            drift.push("parameters differ in order".to_string());
        } else {
            drift.push(format!("parameters differ: {}", details.join(", ")));
        }
    }

    format!("Helm source drifted: {}", drift.join("; "))
}

/// The application the operator wants to exist for this pattern
pub fn new_application(pattern: &Pattern, config: &OperatorConfig) -> Application {
    let git = &pattern.spec.git_config;
    let multi = &pattern.spec.multi_source_config;
    let target_revision = Some(git.target_revision.clone()).filter(|r| !r.is_empty());

    let helm = |prefix: &str| ApplicationSourceHelm {
        value_files: new_application_value_files(pattern, prefix),
        parameters: new_application_parameters(pattern, config),
        ignore_missing_value_files: Some(true),
        ..Default::default()
    };

    let (source, sources) = if multi.enabled {
        let pattern_source = ApplicationSource {
            repo_url: git.target_repo.clone(),
            target_revision,
            ref_: Some(PATTERN_REF.to_string()),
            ..Default::default()
        };
        let chart_source = if multi.cluster_group_git_repo_url.is_empty() {
            ApplicationSource {
                repo_url: multi.helm_repo_url.clone(),
                chart: Some(CLUSTER_GROUP_CHART.to_string()),
                target_revision: Some(multi.cluster_group_chart_version.clone()),
                helm: Some(helm(PATTERN_REF_PREFIX)),
                ..Default::default()
            }
        } else {
            ApplicationSource {
                repo_url: multi.cluster_group_git_repo_url.clone(),
                path: Some(".".to_string()),
                target_revision: Some(multi.cluster_group_chart_git_revision.clone()),
                helm: Some(helm(PATTERN_REF_PREFIX)),
                ..Default::default()
            }
        };
        (None, vec![pattern_source, chart_source])
    } else {
        let source = ApplicationSource {
            repo_url: git.target_repo.clone(),
            path: Some(CLUSTER_GROUP_CHART_PATH.to_string()),
            target_revision,
            helm: Some(helm("")),
            ..Default::default()
        };
        (Some(source), Vec::new())
    };

    let sync_policy = if pattern.manual_sync() || config.manual_sync {
        None
    } else {
        Some(SyncPolicy {
            automated: Some(SyncPolicyAutomated::default()),
            ..Default::default()
        })
    };

    let mut app = Application::new(
        &application_name(pattern),
        ApplicationSpec {
            source,
            sources,
            destination: ApplicationDestination {
                server: Some(IN_CLUSTER_SERVER.to_string()),
                namespace: Some(config.application_namespace.clone()),
            },
            project: DEFAULT_PROJECT.to_string(),
            sync_policy,
        },
    );
    app.metadata.namespace = Some(config.application_namespace.clone());
    app.metadata.labels = Some(BTreeMap::from([(
        PATTERN_LABEL.to_string(),
        pattern.name_any(),
    )]));
    app
}

/// Converge `actual` towards `goal`, returning whether anything changed.
///
/// When the sources still point at the same repos and revisions only the helm
/// block is merged; otherwise the goal's sources replace the live ones. Of the
/// sync policy only the presence of automated sync is managed.
pub fn update_application(goal: &Application, actual: &mut Application) -> bool {
    let mut changed = false;

    let goal_sources = goal.all_sources();
    let actual_sources = actual.all_sources();
    let same_layout = goal.spec.source.is_some() == actual.spec.source.is_some()
        && goal_sources.len() == actual_sources.len()
        && goal_sources
            .iter()
            .zip(&actual_sources)
            .all(|(g, a)| g.same_origin(a))
        && goal.helm_source().is_some() == actual.helm_source().is_some();

    if !same_layout {
        actual.spec.source = goal.spec.source.clone();
        actual.spec.sources = goal.spec.sources.clone();
        changed = true;
    } else if let (Some(goal_helm), Some(actual_helm)) = (goal.helm_source(), actual.helm_source_mut()) {
        let merged = merge_helm_source(goal_helm, actual_helm);
        if merged != *actual_helm {
            *actual_helm = merged;
            changed = true;
        }
    }

    let goal_automated = goal.spec.sync_policy.as_ref().and_then(|p| p.automated.as_ref());
    let actual_automated = actual.spec.sync_policy.as_ref().and_then(|p| p.automated.as_ref());
    if goal_automated.is_some() != actual_automated.is_some() {
        match goal_automated {
            Some(automated) => {
                actual.spec.sync_policy.get_or_insert_with(Default::default).automated =
                    Some(automated.clone());
            }
            None => {
                if let Some(policy) = actual.spec.sync_policy.as_mut() {
                    policy.automated = None;
                }
            }
        }
        changed = true;
    }

    changed
}

/// JSON merge patch writing the managed parts of `app` back.
///
/// Carries the resourceVersion the patch was computed from so a concurrent
/// writer makes the API server reject it.
pub fn application_patch(app: &Application) -> serde_json::Value {
    let sources = (!app.spec.sources.is_empty()).then_some(&app.spec.sources);
    // an absent key would leave automated sync in place
    let sync_policy = app.spec.sync_policy.as_ref().map(|policy| {
        let mut value = json!(policy);
        value["automated"] = json!(policy.automated);
        value
    });
    json!({
        "metadata": {
            "resourceVersion": app.metadata.resource_version,
        },
        "spec": {
            "source": app.spec.source,
            "sources": sources,
            "syncPolicy": sync_policy,
        }
    })
}
