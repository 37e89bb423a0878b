//! Helper methods only available for tests
use std::sync::Arc;

use assert_json_diff::assert_json_include;
use http::{Request, Response};
use hyper::{body::to_bytes, Body};
use kube::{Client, Resource, ResourceExt};
use serde_json::json;

use crate::api::argo::Application;
use crate::api::v1alpha1::{GitConfig, Pattern, PatternSpec, PatternStatus};
use crate::controllers::argo::{application_name, new_application};
use crate::controllers::pattern_controller::Context;
use crate::util::config::{OperatorConfig, DEFAULT_APPLICATION_NAMESPACE};
use crate::util::metrics::Metrics;

impl Pattern {
    /// A pattern with the cluster facts of a 4.12 hub cluster on AWS already observed
    pub fn test() -> Self {
        let mut pattern = Pattern::new(
            "multicloud-gitops-test",
            PatternSpec {
                cluster_group_name: "foogroup".into(),
                git_config: GitConfig {
                    target_repo: "https://github.com/validatedpatterns/multicloud-gitops".into(),
                    target_revision: "main".into(),
                    ..Default::default()
                },
                ..Default::default()
            },
        );
        pattern.meta_mut().namespace = Some("default".into());
        pattern.status = Some(PatternStatus {
            cluster_platform: "AWS".into(),
            cluster_version: "4.12".into(),
            cluster_name: "barcluster".into(),
            app_cluster_domain: "apps.hub-cluster.validatedpatterns.io".into(),
            cluster_domain: "hub-cluster.validatedpatterns.io".into(),
            ..Default::default()
        });
        pattern
    }
}

// We wrap tower_test::mock::Handle
type ApiServerHandle = tower_test::mock::Handle<Request<Body>, Response<Body>>;
pub struct ApiServerVerifier(ApiServerHandle);

/// Scenarios we test for in ApiServerVerifier
pub enum Scenario {
    /// No application yet, so the operator creates one
    ApplicationMissing,
    /// The live application already matches
    ApplicationInSync(Application),
    /// The live application drifted and gets patched
    ApplicationDrifted(Application),
    /// The live application changed between read and write
    ApplicationConflict(Application),
    /// A full pass on a cluster without OpenShift config that ends in a status write
    StatusWritten {
        live: Application,
        patched: bool,
        expected: serde_json::Value,
    },
    /// A full pass with nothing new to record
    StatusUnchanged(Application),
    /// A full pass whose application write conflicts, landing in lastError
    ConflictRecorded(Application),
    /// Finalizer cleanup of the generated application
    Cleanup { application_exists: bool },
}

pub async fn timeout_after_1s(handle: tokio::task::JoinHandle<()>) {
    tokio::time::timeout(std::time::Duration::from_secs(1), handle)
        .await
        .expect("timeout on mock apiserver")
        .expect("scenario succeeded")
}

fn application_path() -> String {
    format!(
        "/apis/argoproj.io/v1alpha1/namespaces/{}/applications/{}",
        DEFAULT_APPLICATION_NAMESPACE,
        application_name(&Pattern::test())
    )
}

fn status_response(code: u16, reason: &str) -> Response<Body> {
    let status = json!({
        "kind": "Status",
        "apiVersion": "v1",
        "metadata": {},
        "status": "Failure",
        "message": reason,
        "reason": reason,
        "code": code,
    });
    Response::builder()
        .status(code)
        .body(Body::from(serde_json::to_vec(&status).unwrap()))
        .unwrap()
}

impl ApiServerVerifier {
    /// Tests only get to run specific scenarios that has matching handlers
    ///
    /// NB: If the controller is making more calls than we are handling in the scenario,
    /// you then typically see a `KubeError(Service(Closed(())))` from the reconciler.
    pub fn run(self, scenario: Scenario) -> tokio::task::JoinHandle<()> {
        tokio::spawn(async move {
            match scenario {
                Scenario::ApplicationMissing => {
                    self.handle_application_get(None).await.handle_application_create().await
                }
                Scenario::ApplicationInSync(app) => self.handle_application_get(Some(&app)).await,
                Scenario::ApplicationDrifted(app) => self
                    .handle_application_get(Some(&app))
                    .await
                    .handle_application_patch(&app, 200)
                    .await,
                Scenario::ApplicationConflict(app) => self
                    .handle_application_get(Some(&app))
                    .await
                    .handle_application_patch(&app, 409)
                    .await,
                Scenario::StatusWritten { live, patched, expected } => {
                    let mut verifier = self
                        .handle_operator_config_missing()
                        .await
                        .handle_cluster_info_missing()
                        .await
                        .handle_application_get(Some(&live))
                        .await;
                    if patched {
                        verifier = verifier.handle_application_patch(&live, 200).await;
                    }
                    verifier
                        .handle_status_patch(|status| assert_json_include!(actual: status, expected: expected))
                        .await
                }
                Scenario::StatusUnchanged(live) => self
                    .handle_operator_config_missing()
                    .await
                    .handle_cluster_info_missing()
                    .await
                    .handle_application_get(Some(&live))
                    .await,
                Scenario::ConflictRecorded(live) => self
                    .handle_operator_config_missing()
                    .await
                    .handle_cluster_info_missing()
                    .await
                    .handle_application_get(Some(&live))
                    .await
                    .handle_application_patch(&live, 409)
                    .await
                    .handle_status_patch(|status| {
                        let last_error = status["status"]["lastError"].as_str().unwrap_or_default();
                        assert!(last_error.contains("Conflict"), "lastError was {last_error:?}");
                        assert_eq!(status["status"]["clusterName"], "barcluster");
                    })
                    .await,
                Scenario::Cleanup { application_exists } => self
                    .handle_operator_config_missing()
                    .await
                    .handle_application_delete(application_exists)
                    .await
                    .handle_event_create("DeleteRequested")
                    .await,
            };
        })
    }

    async fn handle_operator_config_missing(mut self) -> Self {
        let (request, send) = self.0.next_request().await.expect("service not called");
        assert_eq!(request.method(), http::Method::GET);
        assert_eq!(
            request.uri().path(),
            "/api/v1/namespaces/openshift-operators/configmaps/patterns-operator-config"
        );
        send.send_response(status_response(404, "NotFound"));
        self
    }

    // Discovery gives up on the first missing config object
    async fn handle_cluster_info_missing(mut self) -> Self {
        let (request, send) = self.0.next_request().await.expect("service not called");
        assert_eq!(request.method(), http::Method::GET);
        assert_eq!(
            request.uri().path(),
            "/apis/config.openshift.io/v1/clusterversions/version"
        );
        send.send_response(status_response(404, "NotFound"));
        self
    }

    async fn handle_application_get(mut self, live: Option<&Application>) -> Self {
        let (request, send) = self.0.next_request().await.expect("service not called");
        assert_eq!(request.method(), http::Method::GET);
        assert_eq!(request.uri().path(), application_path());

        let response = match live {
            Some(app) => Response::builder()
                .body(Body::from(serde_json::to_vec(app).unwrap()))
                .unwrap(),
            None => status_response(404, "NotFound"),
        };
        send.send_response(response);
        self
    }

    async fn handle_application_create(mut self) -> Self {
        let (request, send) = self.0.next_request().await.expect("service not called");
        assert_eq!(request.method(), http::Method::POST);
        assert_eq!(
            request.uri().path(),
            format!("/apis/argoproj.io/v1alpha1/namespaces/{DEFAULT_APPLICATION_NAMESPACE}/applications")
        );

        let req_body = to_bytes(request.into_body()).await.unwrap();
        let created: serde_json::Value = serde_json::from_slice(&req_body).expect("valid application");
        assert_json_include!(
            actual: created,
            expected: json!({
                "metadata": {
                    "name": "multicloud-gitops-test-foogroup",
                    "labels": { "validatedpatterns.io/pattern": "multicloud-gitops-test" },
                },
                "spec": {
                    "project": "default",
                    "source": {
                        "path": "common/clustergroup",
                        "helm": { "ignoreMissingValueFiles": true },
                    },
                },
            })
        );
        send.send_response(Response::builder().body(Body::from(req_body)).unwrap());
        self
    }

    async fn handle_application_patch(mut self, live: &Application, code: u16) -> Self {
        let (request, send) = self.0.next_request().await.expect("service not called");
        assert_eq!(request.method(), http::Method::PATCH);
        assert_eq!(request.uri().path(), application_path());
        assert_eq!(
            request.headers().get(http::header::CONTENT_TYPE).unwrap(),
            "application/merge-patch+json"
        );

        let req_body = to_bytes(request.into_body()).await.unwrap();
        let patch: serde_json::Value = serde_json::from_slice(&req_body).expect("valid patch");
        assert_json_include!(
            actual: patch,
            expected: json!({
                "metadata": { "resourceVersion": live.resource_version() },
                "spec": { "syncPolicy": { "automated": {} } },
            })
        );

        let response = if code == 200 {
            Response::builder()
                .body(Body::from(serde_json::to_vec(live).unwrap()))
                .unwrap()
        } else {
            status_response(code, "Conflict")
        };
        send.send_response(response);
        self
    }

    async fn handle_status_patch(mut self, check: impl FnOnce(serde_json::Value)) -> Self {
        let (request, send) = self.0.next_request().await.expect("service not called");
        assert_eq!(request.method(), http::Method::PATCH);
        assert_eq!(
            request.uri().path(),
            "/apis/gitops.hybrid-cloud-patterns.io/v1alpha1/namespaces/default/patterns/multicloud-gitops-test/status"
        );
        assert_eq!(
            request.headers().get(http::header::CONTENT_TYPE).unwrap(),
            "application/apply-patch+yaml"
        );

        let req_body = to_bytes(request.into_body()).await.unwrap();
        let patch: serde_json::Value = serde_json::from_slice(&req_body).expect("valid status patch");
        check(patch);

        let response = serde_json::to_vec(&Pattern::test()).unwrap();
        send.send_response(Response::builder().body(Body::from(response)).unwrap());
        self
    }

    async fn handle_application_delete(mut self, exists: bool) -> Self {
        let (request, send) = self.0.next_request().await.expect("service not called");
        assert_eq!(request.method(), http::Method::DELETE);
        assert_eq!(request.uri().path(), application_path());

        let response = if exists {
            let app = new_application(&Pattern::test(), &OperatorConfig::default());
            Response::builder()
                .body(Body::from(serde_json::to_vec(&app).unwrap()))
                .unwrap()
        } else {
            status_response(404, "NotFound")
        };
        send.send_response(response);
        self
    }

    async fn handle_event_create(mut self, reason: &str) -> Self {
        let (request, send) = self.0.next_request().await.expect("service not called");
        assert_eq!(request.method(), http::Method::POST);
        assert_eq!(
            request.uri().path(),
            "/apis/events.k8s.io/v1/namespaces/default/events"
        );

        let req_body = to_bytes(request.into_body()).await.unwrap();
        let event: serde_json::Value = serde_json::from_slice(&req_body).expect("valid event");
        assert_json_include!(
            actual: event,
            expected: json!({
                "reason": reason,
                "regarding": { "kind": "Pattern", "name": "multicloud-gitops-test" },
            })
        );
        send.send_response(Response::builder().body(Body::from(req_body)).unwrap());
        self
    }
}

impl Context {
    // Create a test context with a mocked kube client, locally registered metrics and default diagnostics
    pub fn test() -> (Arc<Self>, ApiServerVerifier) {
        let (mock_service, handle) = tower_test::mock::pair::<Request<Body>, Response<Body>>();
        let mock_client = Client::new(mock_service, "default");
        let ctx = Self {
            client: mock_client,
            metrics: Metrics::default(),
            diagnostics: Arc::default(),
            operator_namespace: "openshift-operators".into(),
        };
        (Arc::new(ctx), ApiServerVerifier(handle))
    }
}
