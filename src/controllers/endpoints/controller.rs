use std::collections::{BTreeMap, HashSet};
use std::sync::Arc;

use chrono::Utc;
use futures::StreamExt;
use k8s_openapi::api::core::v1::{EndpointSubset, Endpoints, ObjectReference, Service};
use k8s_openapi::apimachinery::pkg::apis::meta::v1::{LabelSelector, OwnerReference};
use kube::api::{Api, ListParams, ObjectMeta, Patch, PatchParams, PostParams, ResourceExt};
use kube::client::Client;
use kube::core::ErrorResponse;
use kube::runtime::controller::{Action, Controller};
use kube::runtime::events::{Event, EventType, Recorder};
use kube::runtime::reflector::Store;
use kube::runtime::watcher::Config;
use kube::runtime::{reflector, watcher, WatchStreamExt};
use kube::Resource;
use serde_json::json;
use tokio::sync::RwLock;
use tokio::time::Duration;
use tracing::*;

use crate::controllers::{namespace_cryostat, Diagnostics, State};
use crate::resources::cryostats::{
    jmx_auth_secret_name, Cryostat, DEFAULT_JMX_PORT, JMX_AUTH_PASS_KEY, JMX_AUTH_USER_KEY,
};
use crate::resources::flightrecorders::{FlightRecorder, FlightRecorderSpec, JMXAuthSecret};
use crate::resources::recordings::FLIGHT_RECORDER_LABEL;
use crate::{telemetry, Error, Metrics, Result};

/// Name of the Service port that marks a JVM as a recording target
pub const JMX_PORT_NAME: &str = "jfr-jmx";

// Context for our reconciler
#[derive(Clone)]
pub(super) struct Context {
    /// Kubernetes client
    pub client: Client,
    /// Kubernetes event recorder
    pub recorder: Recorder,
    /// Store for Cryostat instances, used to find who owns a Service
    pub cryostat_store: Store<Cryostat>,
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
        cryostat_store: Store<Cryostat>,
    ) -> Arc<Context> {
        Arc::new(Context {
            client: client.clone(),
            recorder: Recorder::new(client, "cryostat-operator".into()),
            cryostat_store,
            diagnostics: state.diagnostics.clone(),
            metrics,
        })
    }
}

/// The port on which the JVMs of a subset accept JMX connections, if any.
/// A port named `jfr-jmx` wins over one numbered like the default JMX port.
pub fn jmx_port(subset: &EndpointSubset) -> Option<i32> {
    let ports = subset.ports.as_deref().unwrap_or_default();
    ports
        .iter()
        .find(|p| p.name.as_deref() == Some(JMX_PORT_NAME))
        .or_else(|| ports.iter().find(|p| p.port == DEFAULT_JMX_PORT))
        .map(|p| p.port)
}

#[instrument(skip(ctx, endpoints), fields(trace_id))]
async fn reconcile(endpoints: Arc<Endpoints>, ctx: Arc<Context>) -> Result<Action> {
    if let Some(trace_id) = telemetry::get_trace_id() {
        Span::current().record("trace_id", field::display(&trace_id));
    }
    let _timer = ctx.metrics.count_and_measure::<Endpoints>();
    ctx.diagnostics.write().await.last_event = Utc::now();

    let namespace = match endpoints.metadata.namespace.as_deref() {
        Some("") | None => "default",
        Some(ns) => ns,
    };

    debug!(
        "Reconciling Endpoints {} in namespace {namespace}",
        endpoints.name_any()
    );

    match reconcile_targets(&endpoints, &ctx, namespace).await {
        Ok(()) => Ok(Action::await_change()),
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
                    &endpoints.object_ref(&()),
                )
                .await?;

            ctx.metrics.reconcile_failure(endpoints.as_ref(), &err);
            Err(err)
        }
    }
}

fn error_policy<K, C>(_endpoints: Arc<K>, _: &Error, _ctx: C) -> Action {
    Action::requeue(Duration::from_secs(30))
}

/// Ensures a FlightRecorder exists for every pod behind a JMX-compatible subset
async fn reconcile_targets(endpoints: &Endpoints, ctx: &Context, namespace: &str) -> Result<()> {
    let service_name = endpoints.name_any();
    let mut seen = HashSet::new();

    for subset in endpoints.subsets.iter().flatten() {
        let Some(port) = jmx_port(subset) else {
            continue;
        };

        for address in subset.addresses.iter().flatten() {
            let Some(target_ref) = address
                .target_ref
                .as_ref()
                .filter(|r| r.kind.as_deref() == Some("Pod"))
            else {
                continue;
            };
            let Some(pod_name) = target_ref.name.as_deref() else {
                continue;
            };
            if !seen.insert(pod_name.to_string()) {
                continue;
            }

            ensure_flight_recorder(ctx, namespace, &service_name, target_ref, port).await?;
        }
    }

    Ok(())
}

async fn ensure_flight_recorder(
    ctx: &Context,
    namespace: &str,
    service_name: &str,
    target_ref: &ObjectReference,
    port: i32,
) -> Result<()> {
    let fr_api: Api<FlightRecorder> = Api::namespaced(ctx.client.clone(), namespace);
    let pod_name = target_ref.name.as_deref().unwrap_or_default();

    match fr_api.get_opt(pod_name).await? {
        Some(existing) => {
            let status = existing.status.unwrap_or_default();
            if status.target.as_ref() == Some(target_ref) && status.port == port {
                return Ok(());
            }
            debug!("Refreshing target of FlightRecorder {pod_name} in namespace {namespace}");
        }
        None => {
            if !create_flight_recorder(ctx, &fr_api, namespace, service_name, target_ref).await? {
                return Ok(());
            }
        }
    }

    let status = json!({
        "status": {
            "target": target_ref,
            "port": port,
        }
    });
    fr_api
        .patch_status(pod_name, &PatchParams::default(), &Patch::Merge(status))
        .await?;

    Ok(())
}

/// Returns false when the pod cannot own a FlightRecorder
async fn create_flight_recorder(
    ctx: &Context,
    fr_api: &Api<FlightRecorder>,
    namespace: &str,
    service_name: &str,
    target_ref: &ObjectReference,
) -> Result<bool> {
    let pod_name = target_ref.name.as_deref().unwrap_or_default();

    let Some(pod_uid) = target_ref.uid.clone() else {
        warn!("Endpoints {service_name} refer to Pod {pod_name} without a uid; skipping");
        return Ok(false);
    };

    let jmx_credentials = jmx_credentials(ctx, namespace, service_name).await?;

    let flight_recorder = FlightRecorder {
        metadata: ObjectMeta {
            name: Some(pod_name.into()),
            namespace: Some(namespace.into()),
            labels: Some(BTreeMap::from([("app".into(), pod_name.into())])),
            owner_references: Some(vec![OwnerReference {
                api_version: "v1".into(),
                kind: "Pod".into(),
                name: pod_name.into(),
                uid: pod_uid,
                controller: Some(true),
                block_owner_deletion: Some(true),
            }]),
            ..Default::default()
        },
        spec: FlightRecorderSpec {
            recording_selector: Some(LabelSelector {
                match_labels: Some(BTreeMap::from([(
                    FLIGHT_RECORDER_LABEL.into(),
                    pod_name.into(),
                )])),
                match_expressions: None,
            }),
            jmx_credentials,
        },
        status: None,
    };

    match fr_api.create(&PostParams::default(), &flight_recorder).await {
        Ok(_) => info!("Created FlightRecorder {pod_name} in namespace {namespace}"),
        Err(kube::Error::Api(ErrorResponse { reason, .. })) if reason == "AlreadyExists" => {
            debug!("FlightRecorder {pod_name} in namespace {namespace} already exists")
        }
        Err(err) => return Err(err.into()),
    }

    Ok(true)
}

/// Credentials for Cryostat's own JMX port, when the Service belongs to the namespace's Cryostat
async fn jmx_credentials(
    ctx: &Context,
    namespace: &str,
    service_name: &str,
) -> Result<Option<JMXAuthSecret>> {
    let Some(cryostat) = namespace_cryostat(&ctx.cryostat_store, namespace) else {
        return Ok(None);
    };
    let Some(cryostat_uid) = cryostat.uid() else {
        return Ok(None);
    };

    let svc_api: Api<Service> = Api::namespaced(ctx.client.clone(), namespace);
    let Some(service) = svc_api.get_opt(service_name).await? else {
        return Ok(None);
    };

    let owned_by_cryostat = service
        .owner_references()
        .iter()
        .any(|o| o.kind == "Cryostat" && o.uid == cryostat_uid);

    Ok(owned_by_cryostat.then(|| JMXAuthSecret {
        secret_name: jmx_auth_secret_name(&cryostat.name_any()),
        username_key: Some(JMX_AUTH_USER_KEY.into()),
        password_key: Some(JMX_AUTH_PASS_KEY.into()),
    }))
}

/// Run the Endpoints controller
pub async fn run(client: Client, metrics: Metrics, state: State) {
    let endpoints = Api::<Endpoints>::all(client.clone());
    let fr_api = Api::<FlightRecorder>::all(client.clone());
    let cryostats = Api::<Cryostat>::all(client.clone());

    if let Err(e) = fr_api.list(&ListParams::default().limit(1)).await {
        error!("FlightRecorder is not queryable; {e:?}. Is the CRD installed?");
        std::process::exit(1);
    }

    let (cryostat_store, cryostat_writer) = reflector::store();
    let cryostat_reflector = reflector(cryostat_writer, watcher(cryostats, Config::default()))
        .touched_objects()
        .default_backoff();

    Controller::new(endpoints, Config::default())
        .shutdown_on_signal()
        // just so that the store gets polled
        .watches_stream(cryostat_reflector, |_| std::iter::empty())
        .run(
            reconcile,
            error_policy,
            Context::new(client, metrics, state, cryostat_store),
        )
        .filter_map(|x| async move { Result::ok(x) })
        .for_each(|_| futures::future::ready(()))
        .await;
}
