use std::collections::hash_map::DefaultHasher;
use std::fmt::Debug;
use std::hash::{Hash, Hasher};
use std::sync::Arc;

use chrono::Utc;
use futures::StreamExt;
use k8s_openapi::api::apps::v1::{Deployment, DeploymentStatus};
use k8s_openapi::api::core::v1::{PersistentVolumeClaim, Secret, Service};
use k8s_openapi::api::networking::v1::Ingress;
use k8s_openapi::apimachinery::pkg::apis::meta::v1::Time;
use kube::runtime::events::Recorder;
use kube::runtime::{metadata_watcher, watcher, Predicate, WatchStreamExt};
use k8s_openapi::NamespaceResourceScope;
use kube::{
    api::{Api, ListParams, Patch, PatchParams, ResourceExt},
    client::Client,
    runtime::{
        controller::{Action, Controller},
        events::{Event, EventType},
        finalizer::{finalizer, Event as Finalizer},
        watcher::Config,
    },
    Resource,
};
use serde::de::DeserializeOwned;
use serde::Serialize;
use serde_json::{json, Value};
use tokio::{sync::RwLock, time::Duration};
use tracing::*;

use crate::controllers::{Capabilities, Diagnostics, Images, State};
use crate::resources::certmanager::{Certificate, CertificateStatus};
use crate::resources::containerjfrs::{ContainerJFR, ContainerJFRStatus, CONTAINER_JFR_FINALIZER};
use crate::resources::cryostats::{
    Cryostat, CryostatCondition, CryostatSpec, CryostatStatus, CRYOSTAT_FINALIZER,
};
use crate::resources::openshift::{Route, RouteStatus};
use crate::{telemetry, Error, Metrics, Result};

use super::reconcilers::certificates::reconcile_certificates;
use super::reconcilers::console_link::{delete_console_link, reconcile_console_link};
use super::reconcilers::deployment::reconcile_deployment;
use super::reconcilers::networking::reconcile_networking;
use super::reconcilers::secrets::reconcile_secrets;
use super::reconcilers::services::reconcile_services;
use super::reconcilers::storage::reconcile_storage;
use super::reconcilers::Instance;

// Context for our reconciler
#[derive(Clone)]
pub struct Context {
    /// Kubernetes client
    pub client: Client,
    /// Kubernetes event recorder
    pub recorder: Recorder,
    /// Optional APIs found at startup
    pub capabilities: Capabilities,
    /// Images for the containers of the Deployment
    pub images: Images,
    /// Diagnostics read by the web server
    pub diagnostics: Arc<RwLock<Diagnostics>>,
    /// Prometheus metrics
    pub metrics: Metrics,
}

impl Context {
    pub fn new(
        client: Client,
        metrics: Metrics,
        state: State,
        capabilities: Capabilities,
    ) -> Arc<Context> {
        Arc::new(Context {
            client: client.clone(),
            recorder: Recorder::new(client, "cryostat-operator".into()),
            capabilities,
            images: state.images.clone(),
            diagnostics: state.diagnostics.clone(),
            metrics,
        })
    }
}

/// What a converged instance reports in its status
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct Provisioned {
    pub application_url: String,
    pub grafana_secret: Option<String>,
}

/// A kind of object that requests a Cryostat deployment
pub trait CryostatKind:
    Resource<DynamicType = (), Scope = NamespaceResourceScope> + Clone + Debug + Serialize + DeserializeOwned + Send + Sync + 'static
{
    const FINALIZER: &'static str;

    fn cryostat_spec(&self) -> CryostatSpec;

    fn ready_condition(&self) -> Option<&CryostatCondition>;

    /// The status to write, given the outcome of this pass
    fn next_status(&self, provisioned: Option<&Provisioned>, ready: CryostatCondition) -> Value;
}

impl CryostatKind for Cryostat {
    const FINALIZER: &'static str = CRYOSTAT_FINALIZER;

    fn cryostat_spec(&self) -> CryostatSpec {
        self.spec.clone()
    }

    fn ready_condition(&self) -> Option<&CryostatCondition> {
        self.status
            .as_ref()?
            .conditions
            .as_ref()?
            .iter()
            .find(|cond| cond.r#type == "Ready")
    }

    fn next_status(&self, provisioned: Option<&Provisioned>, ready: CryostatCondition) -> Value {
        let existing = self.status.as_ref();
        // keep what was last observed while the instance is not ready
        let status = match provisioned {
            Some(p) => CryostatStatus {
                application_url: Some(p.application_url.clone()),
                grafana_secret: p.grafana_secret.clone(),
                conditions: Some(vec![ready]),
            },
            None => CryostatStatus {
                application_url: existing.and_then(|s| s.application_url.clone()),
                grafana_secret: existing.and_then(|s| s.grafana_secret.clone()),
                conditions: Some(vec![ready]),
            },
        };
        json!(status)
    }
}

impl CryostatKind for ContainerJFR {
    const FINALIZER: &'static str = CONTAINER_JFR_FINALIZER;

    fn cryostat_spec(&self) -> CryostatSpec {
        CryostatSpec::from(&self.spec)
    }

    fn ready_condition(&self) -> Option<&CryostatCondition> {
        None
    }

    fn next_status(&self, provisioned: Option<&Provisioned>, _ready: CryostatCondition) -> Value {
        let application_url = match provisioned {
            Some(p) => Some(p.application_url.clone()),
            None => self.status.as_ref().and_then(|s| s.application_url.clone()),
        };
        json!(ContainerJFRStatus { application_url })
    }
}

fn instance<K: CryostatKind>(obj: &K, namespace: &str, ctx: &Context) -> Result<Instance> {
    let name = obj.name_any();
    let oref = obj
        .controller_owner_ref(&())
        .ok_or_else(|| Error::MissingObjectKey(name.clone(), "metadata.uid".into()))?;
    let spec = obj.cryostat_spec();
    let tls = spec.tls_enabled(ctx.capabilities.cert_manager);

    Ok(Instance {
        name,
        namespace: namespace.into(),
        oref,
        spec,
        tls,
    })
}

/// Brings every resource of the instance to its desired state, in dependency order
async fn provision(ctx: &Context, instance: &Instance) -> Result<Provisioned> {
    let ca = if instance.tls {
        Some(reconcile_certificates(ctx, instance).await?)
    } else {
        None
    };

    reconcile_storage(ctx, instance).await?;
    let grafana_secret = reconcile_secrets(ctx, instance).await?;
    reconcile_services(ctx, instance).await?;
    let urls = reconcile_networking(ctx, instance, ca.as_deref()).await?;
    reconcile_deployment(ctx, instance, &urls, grafana_secret.as_deref()).await?;

    if ctx.capabilities.console && ctx.capabilities.routes {
        if let Some(href) = urls.core.as_deref() {
            reconcile_console_link(ctx, instance, href).await?;
        }
    }

    let application_url = urls.core.unwrap_or_else(|| {
        let scheme = if instance.tls { "https" } else { "http" };
        format!(
            "{scheme}://{}:{}",
            instance.service_host(&instance.name),
            instance.spec.web_port()
        )
    });

    Ok(Provisioned {
        application_url,
        grafana_secret,
    })
}

fn ready_condition(
    existing: Option<&CryostatCondition>,
    status: &str,
    reason: String,
    message: String,
) -> CryostatCondition {
    let now = Time(Utc::now());

    let mut ready = CryostatCondition {
        last_transition_time: Some(
            existing
                .and_then(|r| r.last_transition_time.clone())
                .unwrap_or_else(|| now.clone()),
        ),
        message: Some(message),
        reason: Some(reason),
        status: status.into(),
        r#type: "Ready".into(),
    };

    if existing.map(|r| r.status.as_str()) != Some(status) {
        // update transition time if the status has at all changed
        ready.last_transition_time = Some(now)
    }

    ready
}

async fn reconcile_status<K: CryostatKind>(obj: &K, ctx: &Context, namespace: &str) -> Result<Action> {
    let api: Api<K> = Api::namespaced(ctx.client.clone(), namespace);
    let name = obj.name_any();

    let outcome = match instance(obj, namespace, ctx) {
        Ok(instance) => provision(ctx, &instance).await,
        Err(err) => Err(err),
    };

    let (result, provisioned, message, reason, status) = match outcome {
        Ok(provisioned) => (
            Ok(Action::await_change()),
            Some(provisioned),
            format!("{} is deployed", K::kind(&())),
            "Provisioned".to_string(),
            "True",
        ),
        Err(Error::NotReady {
            message,
            reason,
            requeue_after,
        }) => {
            let requeue_after = requeue_after.unwrap_or(Duration::from_secs(5));

            info!("{} {name} is not yet ready: {message}", K::kind(&()));

            (Ok(Action::requeue(requeue_after)), None, message, reason, "False")
        }
        Err(err) => {
            let message = err.to_string();
            (Err(err), None, message, "FailedReconcile".to_string(), "Unknown")
        }
    };

    let ready = ready_condition(obj.ready_condition(), status, reason, message);

    // always overwrite status object with what we saw
    let new_status = Patch::Apply(json!({
        "apiVersion": K::api_version(&()),
        "kind": K::kind(&()),
        "status": obj.next_status(provisioned.as_ref(), ready),
    }));
    let ps = PatchParams::apply("cryostat-operator").force();
    let _o = api.patch_status(&name, &ps, &new_status).await?;

    result
}

// Finalizer cleanup (the object was deleted, ensure nothing is orphaned)
async fn cleanup<K: CryostatKind>(obj: &K, ctx: &Context, namespace: &str) -> Result<Action> {
    // everything but the cluster scoped ConsoleLink is garbage collected through owner references
    if ctx.capabilities.console {
        delete_console_link(ctx, namespace, &obj.name_any()).await?;
    }

    ctx.recorder
        .publish(
            &Event {
                type_: EventType::Normal,
                reason: "DeleteRequested".into(),
                note: Some(format!("Delete `{}`", obj.name_any())),
                action: "Deleting".into(),
                secondary: None,
            },
            &obj.object_ref(&()),
        )
        .await?;
    Ok(Action::await_change())
}

#[instrument(skip(ctx, obj), fields(trace_id))]
async fn reconcile<K: CryostatKind>(obj: Arc<K>, ctx: Arc<Context>) -> Result<Action> {
    if let Some(trace_id) = telemetry::get_trace_id() {
        Span::current().record("trace_id", field::display(&trace_id));
    }
    let _timer = ctx.metrics.count_and_measure::<K>();
    ctx.diagnostics.write().await.last_event = Utc::now();

    let namespace = obj.namespace().unwrap_or_else(|| "default".into());
    let api: Api<K> = Api::namespaced(ctx.client.clone(), &namespace);

    info!(
        "Reconciling {} {} in namespace {namespace}",
        K::kind(&()),
        obj.name_any()
    );
    match finalizer(&api, K::FINALIZER, obj.clone(), |event| async {
        match event {
            Finalizer::Apply(obj) => reconcile_status(obj.as_ref(), &ctx, &namespace).await,
            Finalizer::Cleanup(obj) => cleanup(obj.as_ref(), &ctx, &namespace).await,
        }
    })
    .await
    {
        Ok(action) => Ok(action),
        Err(err) => {
            warn!("reconcile failed: {:?}", err);

            ctx.recorder
                .publish(
                    &Event {
                        type_: EventType::Warning,
                        reason: "FailedReconcile".into(),
                        note: Some(err.to_string()),
                        action: "Reconcile".into(),
                        secondary: None,
                    },
                    &obj.object_ref(&()),
                )
                .await?;

            let err = Error::FinalizerError(Box::new(err));
            ctx.metrics.reconcile_failure(obj.as_ref(), &err);
            Err(err)
        }
    }
}

fn error_policy<K, C>(_obj: Arc<K>, _error: &Error, _ctx: C) -> Action {
    Action::requeue(Duration::from_secs(30))
}

/// Initialize the Cryostat controller
pub async fn run(client: Client, metrics: Metrics, state: State, capabilities: Capabilities) {
    run_kind::<Cryostat>(client, metrics, state, capabilities).await
}

/// Initialize the controller for the deprecated ContainerJFR kind
pub async fn run_container_jfr(
    client: Client,
    metrics: Metrics,
    state: State,
    capabilities: Capabilities,
) {
    run_kind::<ContainerJFR>(client, metrics, state, capabilities).await
}

async fn run_kind<K: CryostatKind>(
    client: Client,
    metrics: Metrics,
    state: State,
    capabilities: Capabilities,
) {
    let api = Api::<K>::all(client.clone());
    if let Err(e) = api.list(&ListParams::default().limit(1)).await {
        error!(
            "{} is not queryable; {e:?}. Is the CRD installed?",
            K::kind(&())
        );
        std::process::exit(1);
    }

    // all resources we create have this label
    let cfg = Config::default().labels("app.kubernetes.io/name=cryostat");

    let deployment_watcher = watcher(Api::<Deployment>::all(client.clone()), cfg.clone())
        .map(|event| ensure_deletion_change(event))
        .touched_objects()
        .predicate_filter(changed_predicate.combine(status_predicate));

    let svc_watcher = metadata_watcher(Api::<Service>::all(client.clone()), cfg.clone())
        .map(|event| ensure_deletion_change(event))
        .touched_objects()
        .predicate_filter(changed_predicate);

    let secret_watcher = metadata_watcher(Api::<Secret>::all(client.clone()), cfg.clone())
        .map(|event| ensure_deletion_change(event))
        .touched_objects()
        .predicate_filter(changed_predicate);

    let pvc_watcher =
        metadata_watcher(Api::<PersistentVolumeClaim>::all(client.clone()), cfg.clone())
            .map(|event| ensure_deletion_change(event))
            .touched_objects()
            .predicate_filter(changed_predicate);

    let ingress_watcher = metadata_watcher(Api::<Ingress>::all(client.clone()), cfg.clone())
        .map(|event| ensure_deletion_change(event))
        .touched_objects()
        .predicate_filter(changed_predicate);

    let controller = Controller::new(api, Config::default())
        .shutdown_on_signal()
        .owns_stream(deployment_watcher)
        .owns_stream(svc_watcher)
        .owns_stream(secret_watcher)
        .owns_stream(pvc_watcher)
        .owns_stream(ingress_watcher);

    let controller = if capabilities.routes {
        let route_watcher = watcher(Api::<Route>::all(client.clone()), cfg.clone())
            .map(|event| ensure_deletion_change(event))
            .touched_objects()
            // hosts are admitted through the status
            .predicate_filter(changed_predicate.combine(status_predicate));

        controller.owns_stream(route_watcher)
    } else {
        controller
    };
    let controller = if capabilities.cert_manager {
        let certificate_watcher = watcher(Api::<Certificate>::all(client.clone()), cfg.clone())
            .map(|event| ensure_deletion_change(event))
            .touched_objects()
            .predicate_filter(changed_predicate.combine(status_predicate));

        controller.owns_stream(certificate_watcher)
    } else {
        controller
    };

    controller
        .run(
            reconcile::<K>,
            error_policy,
            Context::new(client, metrics, state, capabilities),
        )
        .filter_map(|x| async move { Result::ok(x) })
        .for_each(|_| futures::future::ready(()))
        .await;
}

// deletion apparently doesn't lead to any change in metadata otherwise, which means the changed_predicate
// would drop them.
fn ensure_deletion_change<K: Resource, E>(
    mut event: Result<kube::runtime::watcher::Event<K>, E>,
) -> Result<kube::runtime::watcher::Event<K>, E> {
    if let Ok(kube::runtime::watcher::Event::Delete(ref mut object)) = event {
        let meta = object.meta_mut();
        meta.generation = match meta.generation {
            Some(val) => Some(val + 1),
            None => Some(0),
        }
    }
    event
}

fn changed_predicate<K: Resource>(obj: &K) -> Option<u64> {
    let mut hasher = DefaultHasher::new();
    if let Some(g) = obj.meta().generation {
        // covers spec but not metadata or status
        g.hash(&mut hasher)
    }
    obj.labels().hash(&mut hasher);
    obj.annotations().hash(&mut hasher);
    // ignore status
    Some(hasher.finish())
}

trait ObservedStatus {
    type Status: Serialize;

    fn observed_status(&self) -> Option<&Self::Status>;
}

impl ObservedStatus for Deployment {
    type Status = DeploymentStatus;

    fn observed_status(&self) -> Option<&Self::Status> {
        self.status.as_ref()
    }
}

impl ObservedStatus for Route {
    type Status = RouteStatus;

    fn observed_status(&self) -> Option<&Self::Status> {
        self.status.as_ref()
    }
}

impl ObservedStatus for Certificate {
    type Status = CertificateStatus;

    fn observed_status(&self) -> Option<&Self::Status> {
        self.status.as_ref()
    }
}

fn status_predicate<K: Resource + ObservedStatus>(obj: &K) -> Option<u64> {
    let mut hasher = DefaultHasher::new();
    if let Some(s) = obj.observed_status() {
        // struct fields serialize in a fixed order
        serde_json::to_string(s).ok()?.hash(&mut hasher);
    }
    Some(hasher.finish())
}

#[cfg(test)]
pub(crate) mod tests {
    use super::*;
    use crate::test_utils::{mock_client, ApiServerVerifier};
    use http::Method;
    use std::path::PathBuf;

    pub fn context(client: Client, capabilities: Capabilities) -> Arc<Context> {
        Context::new(
            client,
            Metrics::default(),
            State::new(Images::default(), PathBuf::from("/dev/null")),
            capabilities,
        )
    }

    fn cryostat(minimal: bool) -> Cryostat {
        let mut cryostat = Cryostat::new(
            "cryostat-sample",
            CryostatSpec {
                minimal,
                ..Default::default()
            },
        );
        cryostat.metadata.namespace = Some("default".into());
        cryostat.metadata.uid = Some("8cbd7a3e-0b5a-4a4b-9f3c-0c2cf2f5f1d4".into());
        cryostat.metadata.finalizers = Some(vec![CRYOSTAT_FINALIZER.into()]);
        cryostat
    }

    /// Answers the calls made for a minimal instance without TLS, Routes or Ingresses
    async fn serve_minimal_instance(server: &mut ApiServerVerifier, available: bool) {
        server
            .expect_get("/api/v1/namespaces/default/persistentvolumeclaims/cryostat-sample")
            .await
            .json(json!({
                "apiVersion": "meta.k8s.io/v1",
                "kind": "PartialObjectMetadata",
                "metadata": { "name": "cryostat-sample", "namespace": "default" }
            }));
        server
            .expect_get("/api/v1/namespaces/default/secrets/cryostat-sample-jmx-auth")
            .await
            .json(json!({
                "apiVersion": "meta.k8s.io/v1",
                "kind": "PartialObjectMetadata",
                "metadata": { "name": "cryostat-sample-jmx-auth", "namespace": "default" }
            }));
        server
            .expect(
                Method::DELETE,
                "/api/v1/namespaces/default/secrets/cryostat-sample-grafana-basic",
            )
            .await
            .not_found();

        server
            .expect(
                Method::PATCH,
                "/api/v1/namespaces/default/services/cryostat-sample",
            )
            .await
            .echo();
        for service in ["cryostat-sample-grafana", "cryostat-sample-command"] {
            server
                .expect(
                    Method::DELETE,
                    &format!("/api/v1/namespaces/default/services/{service}"),
                )
                .await
                .not_found();
        }

        for ingress in [
            "cryostat-sample",
            "cryostat-sample-grafana",
            "cryostat-sample-command",
        ] {
            server
                .expect(
                    Method::DELETE,
                    &format!("/apis/networking.k8s.io/v1/namespaces/default/ingresses/{ingress}"),
                )
                .await
                .not_found();
        }

        let deployment = server
            .expect(
                Method::PATCH,
                "/apis/apps/v1/namespaces/default/deployments/cryostat-sample",
            )
            .await;
        let mut body = deployment.body_json();
        if available {
            body["status"] = json!({ "availableReplicas": 1, "replicas": 1 });
        }
        deployment.json(body);
    }

    #[test]
    fn ready_condition_keeps_transition_time_while_unchanged() {
        let first = ready_condition(None, "False", "NotReady".into(), "waiting".into());
        assert_eq!(first.status, "False");
        assert!(first.last_transition_time.is_some());

        let mut old = first.clone();
        old.last_transition_time = Some(Time(Utc::now() - chrono::Duration::hours(1)));

        let same = ready_condition(Some(&old), "False", "NotReady".into(), "still".into());
        assert_eq!(same.last_transition_time, old.last_transition_time);
        assert_eq!(same.message.as_deref(), Some("still"));

        let flipped = ready_condition(Some(&old), "True", "Provisioned".into(), "ok".into());
        assert_ne!(flipped.last_transition_time, old.last_transition_time);
    }

    #[test]
    fn unready_status_keeps_the_last_application_url() {
        let mut cryostat = cryostat(true);
        cryostat.status = Some(CryostatStatus {
            application_url: Some("https://cryostat.example.com".into()),
            grafana_secret: None,
            conditions: None,
        });
        let ready = ready_condition(None, "False", "NotReady".into(), "waiting".into());

        let status = cryostat.next_status(None, ready.clone());
        assert_eq!(status["applicationUrl"], "https://cryostat.example.com");
        assert_eq!(status["conditions"][0]["status"], "False");

        let provisioned = Provisioned {
            application_url: "http://cryostat-sample.default.svc:8181".into(),
            grafana_secret: Some("cryostat-sample-grafana-basic".into()),
        };
        let status = cryostat.next_status(Some(&provisioned), ready);
        assert_eq!(status["applicationUrl"], "http://cryostat-sample.default.svc:8181");
        assert_eq!(status["grafanaSecret"], "cryostat-sample-grafana-basic");
    }

    #[tokio::test]
    async fn container_jfr_is_deployed_like_a_cryostat() {
        use crate::resources::containerjfrs::ContainerJFRSpec;

        let mut cjfr = ContainerJFR::new("containerjfr", ContainerJFRSpec { minimal: true });
        cjfr.metadata.uid = Some("1b7c1a52-6e1f-4fb8-a6f0-3b1c5e3c3d1e".into());
        let (client, _server) = mock_client();
        let ctx = context(client, Capabilities::default());

        let instance = instance(&cjfr, "default", &ctx).unwrap();
        assert!(instance.spec.minimal);
        assert!(!instance.tls);
        assert_eq!(instance.oref.kind, "ContainerJFR");

        let status = cjfr.next_status(
            Some(&Provisioned {
                application_url: "http://containerjfr.default.svc:8181".into(),
                grafana_secret: None,
            }),
            ready_condition(None, "True", "Provisioned".into(), "ok".into()),
        );
        assert_eq!(status, json!({ "applicationUrl": "http://containerjfr.default.svc:8181" }));
    }

    #[tokio::test]
    async fn converged_instance_reports_its_url() {
        let (client, mut server) = mock_client();
        let ctx = context(client, Capabilities::default());
        let cryostat = cryostat(true);
        let object = serde_json::to_value(&cryostat).unwrap();

        let verifier = tokio::spawn(async move {
            serve_minimal_instance(&mut server, true).await;

            let status = server
                .expect(
                    Method::PATCH,
                    "/apis/operator.cryostat.io/v1beta1/namespaces/default/cryostats/cryostat-sample/status",
                )
                .await;
            let body = status.body_json();
            assert_eq!(
                body["status"]["applicationUrl"],
                "http://cryostat-sample.default.svc:8181"
            );
            assert_eq!(body["status"]["grafanaSecret"], Value::Null);
            assert_eq!(body["status"]["conditions"][0]["type"], "Ready");
            assert_eq!(body["status"]["conditions"][0]["status"], "True");

            let mut object = object;
            object["status"] = body["status"].clone();
            status.json(object);
            server.expect_no_more().await;
        });

        let action = reconcile_status(&cryostat, &ctx, "default").await.unwrap();
        assert_eq!(action, Action::await_change());
        verifier.await.unwrap();
    }

    #[tokio::test]
    async fn unissued_certificates_requeue() {
        let (client, mut server) = mock_client();
        let ctx = context(
            client,
            Capabilities {
                cert_manager: true,
                ..Default::default()
            },
        );
        let cryostat = cryostat(true);
        let object = serde_json::to_value(&cryostat).unwrap();

        let verifier = tokio::spawn(async move {
            server
                .expect_get("/api/v1/namespaces/default/secrets/cryostat-sample-keystore")
                .await
                .json(json!({
                    "apiVersion": "meta.k8s.io/v1",
                    "kind": "PartialObjectMetadata",
                    "metadata": { "name": "cryostat-sample-keystore", "namespace": "default" }
                }));

            for (kind, name) in [
                ("issuers", "cryostat-sample-self-signed"),
                ("certificates", "cryostat-sample-ca"),
                ("issuers", "cryostat-sample-ca"),
                ("certificates", "cryostat-sample"),
            ] {
                // echoed without status, so nothing is issued yet
                server
                    .expect(
                        Method::PATCH,
                        &format!("/apis/cert-manager.io/v1/namespaces/default/{kind}/{name}"),
                    )
                    .await
                    .echo();
            }
            server
                .expect(
                    Method::DELETE,
                    "/apis/cert-manager.io/v1/namespaces/default/certificates/cryostat-sample-grafana",
                )
                .await
                .not_found();

            let status = server
                .expect(
                    Method::PATCH,
                    "/apis/operator.cryostat.io/v1beta1/namespaces/default/cryostats/cryostat-sample/status",
                )
                .await;
            let body = status.body_json();
            assert_eq!(body["status"]["conditions"][0]["status"], "False");
            assert_eq!(body["status"]["conditions"][0]["reason"], "CertificatesNotReady");

            let mut object = object;
            object["status"] = body["status"].clone();
            status.json(object);
            server.expect_no_more().await;
        });

        let action = reconcile_status(&cryostat, &ctx, "default").await.unwrap();
        assert_eq!(action, Action::requeue(Duration::from_secs(5)));
        verifier.await.unwrap();
    }

    #[tokio::test]
    async fn unavailable_deployment_requeues() {
        let (client, mut server) = mock_client();
        let ctx = context(client, Capabilities::default());
        let cryostat = cryostat(true);
        let object = serde_json::to_value(&cryostat).unwrap();

        let verifier = tokio::spawn(async move {
            serve_minimal_instance(&mut server, false).await;

            let status = server
                .expect(
                    Method::PATCH,
                    "/apis/operator.cryostat.io/v1beta1/namespaces/default/cryostats/cryostat-sample/status",
                )
                .await;
            let body = status.body_json();
            assert_eq!(body["status"]["conditions"][0]["status"], "False");
            assert_eq!(body["status"]["conditions"][0]["reason"], "DeploymentNoStatus");
            assert_eq!(body["status"]["applicationUrl"], Value::Null);

            let mut object = object;
            object["status"] = body["status"].clone();
            status.json(object);
        });

        let action = reconcile_status(&cryostat, &ctx, "default").await.unwrap();
        assert_eq!(action, Action::requeue(Duration::from_secs(5)));
        verifier.await.unwrap();
    }
}
