use std::sync::Arc;

use chrono::Utc;
use futures::StreamExt;
use k8s_openapi::api::core::v1::Pod;
use kube::api::{Api, ListParams, Patch, PatchParams, ResourceExt};
use kube::client::Client;
use kube::runtime::controller::{Action, Controller};
use kube::runtime::events::{Event, EventType, Recorder};
use kube::runtime::reflector::{ObjectRef, Store};
use kube::runtime::watcher::Config;
use kube::runtime::{reflector, watcher, WatchStreamExt};
use kube::Resource;
use serde_json::json;
use tokio::sync::RwLock;
use tokio::time::Duration;
use tracing::*;

use crate::controllers::{namespace_cryostat, Diagnostics, State};
use crate::reconcilers::targets::pod_target;
use crate::recordings::RecordingClientFactory;
use crate::resources::cryostats::Cryostat;
use crate::resources::flightrecorders::{FlightRecorder, FlightRecorderStatus};
use crate::{telemetry, Error, Metrics, Result};

// Context for our reconciler
#[derive(Clone)]
pub(super) struct Context {
    /// Kubernetes client
    pub client: Client,
    /// Kubernetes event recorder
    pub recorder: Recorder,
    /// Store for Cryostat instances
    pub cryostat_store: Store<Cryostat>,
    /// Connects to Cryostat
    pub factory: Arc<dyn RecordingClientFactory>,
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
        factory: Arc<dyn RecordingClientFactory>,
    ) -> Arc<Context> {
        Arc::new(Context {
            client: client.clone(),
            recorder: Recorder::new(client, "cryostat-operator".into()),
            cryostat_store,
            factory,
            diagnostics: state.diagnostics.clone(),
            metrics,
        })
    }
}

#[instrument(skip(ctx, fr), fields(trace_id))]
async fn reconcile(fr: Arc<FlightRecorder>, ctx: Arc<Context>) -> Result<Action> {
    if let Some(trace_id) = telemetry::get_trace_id() {
        Span::current().record("trace_id", field::display(&trace_id));
    }
    let _timer = ctx.metrics.count_and_measure::<FlightRecorder>();
    ctx.diagnostics.write().await.last_event = Utc::now();

    let namespace = match fr.metadata.namespace.as_deref() {
        Some("") | None => "default",
        Some(ns) => ns,
    };

    info!(
        "Reconciling FlightRecorder {} in namespace {namespace}",
        fr.name_any()
    );

    match fr.sync_status(&ctx, namespace).await {
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
                    &fr.object_ref(&()),
                )
                .await?;

            ctx.metrics.reconcile_failure(fr.as_ref(), &err);
            Err(err)
        }
    }
}

fn error_policy<K, C>(_fr: Arc<K>, _: &Error, _ctx: C) -> Action {
    Action::requeue(Duration::from_secs(30))
}

impl FlightRecorder {
    /// Refreshes the events and templates the target JVM offers
    async fn sync_status(&self, ctx: &Context, namespace: &str) -> Result<Action> {
        let name = self.name_any();
        let status = self.status.clone().unwrap_or_default();

        let Some(target) = status.target.clone() else {
            // created by the Endpoints controller, which fills in the status right after
            debug!("FlightRecorder {name} in namespace {namespace} has no target yet");
            return Ok(Action::requeue(Duration::from_secs(1)));
        };

        let Some(cryostat) = namespace_cryostat(&ctx.cryostat_store, namespace) else {
            // a Cryostat appearing in the namespace triggers a new pass
            info!("No Cryostat in namespace {namespace} to inspect FlightRecorder {name} with");
            return Ok(Action::await_change());
        };

        let client = match ctx
            .factory
            .client_for(&cryostat, self.spec.jmx_credentials.as_ref())
            .await
        {
            Ok(client) => client,
            Err(Error::CertNotReady(certificate)) => {
                info!("Waiting for Certificate {certificate} in namespace {namespace} to become ready");
                return Ok(Action::requeue(Duration::from_secs(5)));
            }
            Err(err) => return Err(err),
        };

        let pod_name = target
            .name
            .clone()
            .ok_or_else(|| Error::TargetUnavailable(name.clone()))?;
        let pod_api: Api<Pod> = Api::namespaced(ctx.client.clone(), namespace);
        let pod = pod_api.get(&pod_name).await?;
        let address = pod_target(&pod, status.port)?;

        let events = client.list_event_types(&address).await?;
        let templates = client.list_templates(&address).await?;

        let new_status = json!({
            "apiVersion": FlightRecorder::api_version(&()),
            "kind": FlightRecorder::kind(&()),
            "status": FlightRecorderStatus {
                target: Some(target),
                port: status.port,
                events,
                templates,
            },
        });

        debug!("Updating status of FlightRecorder {name} in namespace {namespace}");

        let fr_api: Api<FlightRecorder> = Api::namespaced(ctx.client.clone(), namespace);
        let ps = PatchParams::apply("cryostat-operator").force();
        let _o = fr_api
            .patch_status(&name, &ps, &Patch::Apply(new_status))
            .await?;

        Ok(Action::await_change())
    }
}

/// Run the FlightRecorder controller
pub async fn run(
    client: Client,
    metrics: Metrics,
    state: State,
    factory: Arc<dyn RecordingClientFactory>,
) {
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

    let (fr_store, fr_writer) = reflector::store();
    let fr_reflector = reflector(fr_writer, watcher(fr_api, Config::default()))
        .touched_objects()
        .default_backoff();

    let index = fr_store.clone();
    Controller::for_stream(fr_reflector, fr_store)
        .shutdown_on_signal()
        .watches_stream(cryostat_reflector, move |cryostat| {
            flight_recorders_in(&index, &cryostat)
        })
        .run(
            reconcile,
            error_policy,
            Context::new(client, metrics, state, cryostat_store, factory),
        )
        .filter_map(|x| async move { Result::ok(x) })
        .for_each(|_| futures::future::ready(()))
        .await;
}

/// FlightRecorders waiting for a Cryostat in the same namespace
fn flight_recorders_in(
    store: &Store<FlightRecorder>,
    cryostat: &Cryostat,
) -> Vec<ObjectRef<FlightRecorder>> {
    let namespace = cryostat.namespace();
    store
        .state()
        .into_iter()
        .filter(|fr| fr.namespace() == namespace)
        .map(|fr| ObjectRef::from_obj(fr.as_ref()))
        .collect()
}
