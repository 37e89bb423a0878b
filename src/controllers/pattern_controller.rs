use std::fmt;
use std::sync::Arc;

use chrono::{DateTime, Utc};
use futures::StreamExt;
use kube::{
    api::{Api, DeleteParams, ListParams, Patch, PatchParams, PostParams, ResourceExt},
    client::Client,
    runtime::{
        controller::{Action, Controller},
        events::{Event, EventType, Recorder, Reporter},
        finalizer::{finalizer, Error as FinalizerError, Event as Finalizer},
        watcher::Config,
    },
    Resource,
};
use serde::Serialize;
use serde_json::json;
use tokio::{sync::RwLock, time::Duration};
use tracing::*;

use crate::api::argo::Application;
use crate::api::v1alpha1::{Pattern, PatternCondition, PatternStatus, PATTERN_FINALIZER};
use crate::controllers::argo::{
    application_name, application_patch, compare_helm_source, describe_drift, new_application,
    update_application,
};
use crate::controllers::{cluster_info, conditions};
use crate::util::config::{self, OperatorConfig};
use crate::util::errors::{self, Error, ErrorWithRequeue, Result, StdError};
use crate::util::{metrics, telemetry};

pub const FIELD_MANAGER: &str = "patterns-operator";

/// Reconcile loop requeue time
pub const RECONCILE_LOOP_REQUEUE_TIME: Duration = Duration::from_secs(180);

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum ApplicationAction {
    Created,
    Updated,
    Unchanged,
}

impl fmt::Display for ApplicationAction {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        match self {
            ApplicationAction::Created => write!(f, "Created application"),
            ApplicationAction::Updated => write!(f, "Updated application"),
            ApplicationAction::Unchanged => write!(f, "Application unchanged"),
        }
    }
}

/// What one pass over the generated application found and did
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct SyncOutcome {
    pub in_sync: bool,
    pub message: String,
    pub action: ApplicationAction,
}

/// Bring the live application in line with the one computed from `pattern`.
///
/// Any conflict while writing is surfaced as an error with a short requeue so the
/// next attempt starts again from a fresh read.
pub async fn reconcile_application(
    pattern: &Pattern,
    config: &OperatorConfig,
    ctx: &Context,
) -> Result<SyncOutcome> {
    let goal = new_application(pattern, config);
    let name = goal.name_any();
    let apps: Api<Application> = Api::namespaced(ctx.client.clone(), &config.application_namespace);

    let Some(mut actual) = apps.get_opt(&name).await? else {
        info!("Creating application {}/{}", config.application_namespace, name);
        apps.create(&PostParams::default(), &goal).await?;
        ctx.metrics.application_write(pattern, "create");
        return Ok(SyncOutcome {
            in_sync: true,
            message: format!("Created application {name}"),
            action: ApplicationAction::Created,
        });
    };

    let goal_helm = goal.helm_source().cloned().unwrap_or_default();
    let actual_helm = actual.helm_source().cloned().unwrap_or_default();
    let in_sync = compare_helm_source(&goal_helm, &actual_helm);
    let message = describe_drift(&goal_helm, &actual_helm);

    if !update_application(&goal, &mut actual) {
        debug!("Application {name} needs no update");
        return Ok(SyncOutcome {
            in_sync,
            message,
            action: ApplicationAction::Unchanged,
        });
    }

    info!("Updating application {}/{}: {}", config.application_namespace, name, message);
    let patch = application_patch(&actual);
    match apps
        .patch(&name, &PatchParams::default(), &Patch::Merge(&patch))
        .await
    {
        Ok(_) => {}
        Err(kube::Error::Api(e)) if e.code == 409 => {
            warn!("Application {name} changed while it was being updated, retrying");
            return Err(Error::ErrorWithRequeue(ErrorWithRequeue::new(
                StdError::KubeError(kube::Error::Api(e)),
                Duration::from_secs(1),
            )));
        }
        Err(e) => return Err(e.into()),
    }
    ctx.metrics.application_write(pattern, "update");

    Ok(SyncOutcome {
        in_sync,
        message,
        action: ApplicationAction::Updated,
    })
}

impl Pattern {
    // Reconcile (for non-finalizer related changes)
    async fn reconcile(&self, ctx: Arc<Context>) -> Result<Action> {
        let ns = self.namespace().ok_or_else(|| {
            Error::StdError(StdError::MetadataMissing("Pattern has no namespace".to_string()))
        })?;
        let name = self.name_any();
        let patterns: Api<Pattern> = Api::namespaced(ctx.client.clone(), &ns);

        let status = match self.sync(&ctx).await {
            Ok(status) => status,
            Err(e) => {
                self.record_error(&patterns, &e).await;
                return Err(e);
            }
        };

        // Only write when something besides condition timestamps changed
        if status_changed(&self.observed(), &status) {
            patch_status(&patterns, &name, &status).await?;
        } else {
            debug!("Pattern {ns}/{name} status unchanged");
        }

        // If no events were received, check back after the requeue time
        Ok(Action::requeue(RECONCILE_LOOP_REQUEUE_TIME))
    }

    /// Converge the generated application and compute the status to record
    async fn sync(&self, ctx: &Context) -> Result<PatternStatus> {
        let config = OperatorConfig::load(&ctx.client, &ctx.operator_namespace).await?;

        let mut status = self.observed();
        match cluster_info::discover(&ctx.client).await {
            Ok(facts) => facts.apply_to(&mut status),
            Err(e) => warn!("Unable to discover cluster facts, keeping previous ones: {e}"),
        }
        let mut pattern = self.clone();
        pattern.status = Some(status.clone());

        let outcome = reconcile_application(&pattern, &config, ctx).await?;

        let (new_conditions, changed) =
            conditions::set_sync_condition(self.conditions(), outcome.in_sync, &outcome.message, Utc::now());
        if changed {
            info!("Pattern {}: {}", self.name_any(), outcome.message);
        }
        status.conditions = new_conditions;
        status.last_step = outcome.action.to_string();
        status.last_error = String::new();
        if outcome.action != ApplicationAction::Unchanged {
            status.version += 1;
        }
        Ok(status)
    }

    // Surface the failure on the Error printcolumn, the error itself still goes to the error policy
    async fn record_error(&self, patterns: &Api<Pattern>, error: &Error) {
        let mut status = self.observed();
        status.last_error = error.to_string();
        if !status_changed(&self.observed(), &status) {
            return;
        }
        if let Err(e) = patch_status(patterns, &self.name_any(), &status).await {
            warn!("Unable to record error on Pattern {}: {e}", self.name_any());
        }
    }

    // Finalizer cleanup (the object was deleted, ensure nothing is orphaned)
    async fn cleanup(&self, ctx: Arc<Context>) -> Result<Action> {
        let config = OperatorConfig::load(&ctx.client, &ctx.operator_namespace).await?;
        let apps: Api<Application> = Api::namespaced(ctx.client.clone(), &config.application_namespace);
        let app_name = application_name(self);

        match apps.delete(&app_name, &DeleteParams::default()).await {
            Ok(_) => info!("Deleted application {}/{}", config.application_namespace, app_name),
            Err(kube::Error::Api(e)) if e.code == 404 => {
                debug!("Application {app_name} already gone")
            }
            Err(e) => return Err(e.into()),
        }

        let recorder = ctx.diagnostics.read().await.recorder(ctx.client.clone(), self);
        recorder
            .publish(Event {
                type_: EventType::Normal,
                reason: "DeleteRequested".into(),
                note: Some(format!("Delete `{}`", self.name_any())),
                action: "Deleting".into(),
                secondary: None,
            })
            .await?;
        Ok(Action::await_change())
    }
}

/// Whether `next` differs from `prev` in anything but condition timestamps
fn status_changed(prev: &PatternStatus, next: &PatternStatus) -> bool {
    let without_conditions = |s: &PatternStatus| PatternStatus {
        conditions: Vec::new(),
        ..s.clone()
    };
    let condition_key = |c: &PatternCondition| (c.type_, c.status.clone(), c.message.clone());

    without_conditions(prev) != without_conditions(next)
        || prev
            .conditions
            .iter()
            .map(condition_key)
            .ne(next.conditions.iter().map(condition_key))
}

async fn patch_status(patterns: &Api<Pattern>, name: &str, status: &PatternStatus) -> Result<()> {
    let status = serde_json::to_value(status)
        .map_err(|e| Error::StdError(StdError::JsonSerializationError(e)))?;
    let new_status = Patch::Apply(json!({
        "apiVersion": "gitops.hybrid-cloud-patterns.io/v1alpha1",
        "kind": "Pattern",
        "status": status,
    }));
    let ps = PatchParams::apply(FIELD_MANAGER).force();
    patterns.patch_status(name, &ps, &new_status).await?;
    Ok(())
}

/// State shared between the controller and the web server
#[derive(Clone, Default)]
pub struct State {
    /// Diagnostics populated by the reconciler
    diagnostics: Arc<RwLock<Diagnostics>>,
    /// Metrics registry
    registry: prometheus::Registry,
}

/// State wrapper around the controller outputs for the web server
impl State {
    /// Metrics getter
    pub fn metrics(&self) -> Vec<prometheus::proto::MetricFamily> {
        self.registry.gather()
    }

    /// State getter
    pub async fn diagnostics(&self) -> Diagnostics {
        self.diagnostics.read().await.clone()
    }

    // Create a Controller Context that can update State
    pub fn to_context(&self, client: Client) -> Arc<Context> {
        Arc::new(Context {
            client,
            metrics: metrics::Metrics::default().register(&self.registry).unwrap(),
            diagnostics: self.diagnostics.clone(),
            operator_namespace: config::operator_namespace(),
        })
    }
}

// Context for our reconciler
#[derive(Clone)]
pub struct Context {
    /// Kubernetes client
    pub client: Client,
    /// Diagnostics read by the web server
    pub diagnostics: Arc<RwLock<Diagnostics>>,
    /// Prometheus metrics
    pub metrics: metrics::Metrics,
    /// Namespace holding the operator ConfigMap
    pub operator_namespace: String,
}

#[instrument(skip(ctx, pattern), fields(trace_id))]
pub async fn reconcile(pattern: Arc<Pattern>, ctx: Arc<Context>) -> Result<Action> {
    let trace_id = telemetry::get_trace_id();
    Span::current().record("trace_id", field::display(&trace_id));
    let _timer = ctx.metrics.count_and_measure("pattern");
    ctx.diagnostics.write().await.last_event = Utc::now();

    let ns = pattern.namespace().ok_or_else(|| {
        Error::StdError(StdError::MetadataMissing("Pattern has no namespace".to_string()))
    })?;
    let patterns: Api<Pattern> = Api::namespaced(ctx.client.clone(), &ns);

    info!("Reconciling Pattern \"{}\" in {}", pattern.name_any(), ns);
    finalizer(&patterns, PATTERN_FINALIZER, pattern.clone(), |event| async {
        match event {
            Finalizer::Apply(pattern) => pattern.reconcile(ctx.clone()).await,
            Finalizer::Cleanup(pattern) => pattern.cleanup(ctx.clone()).await,
        }
    })
    .await
    .map_err(|e| match e {
        // keep our own errors visible to the error policy
        FinalizerError::ApplyFailed(err) | FinalizerError::CleanupFailed(err) => err,
        other => errors::Error::StdError(errors::StdError::FinalizerError(Box::new(other))),
    })
}

/// Diagnostics to be exposed by the web server
#[derive(Clone, Serialize)]
pub struct Diagnostics {
    pub last_event: DateTime<Utc>,
    #[serde(skip)]
    pub reporter: Reporter,
}
impl Default for Diagnostics {
    fn default() -> Self {
        Self {
            last_event: Utc::now(),
            reporter: "patterns-operator".into(),
        }
    }
}
impl Diagnostics {
    fn recorder(&self, client: Client, pattern: &Pattern) -> Recorder {
        Recorder::new(client, self.reporter.clone(), pattern.object_ref(&()))
    }
}

fn error_policy(pattern: Arc<Pattern>, error: &Error, ctx: Arc<Context>) -> Action {
    warn!("reconcile failed: {:?}", error);
    ctx.metrics.reconcile_failure(&pattern, error);
    match error {
        Error::ErrorWithRequeue(e) => Action::requeue(e.duration),
        Error::StdError(_) => Action::requeue(Duration::from_secs(5 * 60)),
    }
}

/// Initialize the controller and shared state (given the crd is installed)
pub async fn run(state: State) {
    let client = Client::try_default().await.expect("failed to create kube Client");

    let patterns = Api::<Pattern>::all(client.clone());
    if let Err(e) = patterns.list(&ListParams::default().limit(1)).await {
        error!("CRD is not queryable; {e:?}. Is the CRD installed?");
        info!("Installation: cargo run --bin crdgen | kubectl apply -f -");
        std::process::exit(1);
    }

    Controller::new(patterns, Config::default().any_semantic())
        .shutdown_on_signal()
        .run(reconcile, error_policy, state.to_context(client))
        .filter_map(|x| async move { std::result::Result::ok(x) })
        .for_each(|_| futures::future::ready(()))
        .await;
}
