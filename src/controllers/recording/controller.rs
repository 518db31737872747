use std::collections::BTreeMap;
use std::sync::Arc;

use chrono::{DateTime, Utc};
use futures::StreamExt;
use k8s_openapi::api::core::v1::Pod;
use k8s_openapi::apimachinery::pkg::apis::meta::v1::Time;
use kube::api::{Api, ListParams, Patch, PatchParams, ResourceExt};
use kube::client::Client;
use kube::runtime::controller::{Action, Controller};
use kube::runtime::events::{Event, EventType, Recorder};
use kube::runtime::finalizer::{finalizer, Event as Finalizer};
use kube::runtime::reflector::{ObjectRef, Store};
use kube::runtime::watcher::Config;
use kube::runtime::{reflector, watcher, WatchStreamExt};
use kube::Resource;
use serde_json::json;
use tokio::sync::RwLock;
use tokio::time::Duration;
use tracing::*;
use url::Url;

use crate::controllers::{namespace_cryostat, Diagnostics, State};
use crate::reconcilers::duration_parser;
use crate::reconcilers::targets::{pod_target, TargetAddress};
use crate::recordings::{RecordingClient, RecordingClientFactory, RecordingDescriptor};
use crate::resources::cryostats::Cryostat;
use crate::resources::flightrecorders::FlightRecorder;
use crate::resources::recordings::{
    Recording, RecordingState, RecordingStatus, FLIGHT_RECORDER_LABEL, RECORDING_FINALIZER,
};
use crate::{telemetry, Error, Metrics, Result};

/// How often in-progress recordings are polled
const POLL_INTERVAL: Duration = Duration::from_secs(10);

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

/// A Cryostat client, plus the JVM it reaches while the FlightRecorder exists
pub(super) struct Connection {
    client: Arc<dyn RecordingClient>,
    target: Option<TargetAddress>,
}

enum Connect {
    /// `None` when nothing remote is left to talk to
    Ready(Option<Connection>),
    Wait(Action),
}

#[instrument(skip(ctx, rec), fields(trace_id))]
async fn reconcile(rec: Arc<Recording>, ctx: Arc<Context>) -> Result<Action> {
    if let Some(trace_id) = telemetry::get_trace_id() {
        Span::current().record("trace_id", field::display(&trace_id));
    }
    let _timer = ctx.metrics.count_and_measure::<Recording>();
    ctx.diagnostics.write().await.last_event = Utc::now();

    let namespace = match rec.metadata.namespace.as_deref() {
        Some("") | None => "default",
        Some(ns) => ns,
    };
    let recordings: Api<Recording> = Api::namespaced(ctx.client.clone(), namespace);

    info!(
        "Reconciling Recording {} in namespace {namespace}",
        rec.name_any()
    );

    let result = match rec.connect(&ctx, &recordings, namespace).await {
        Ok(Connect::Ready(connection)) => finalizer(
            &recordings,
            RECORDING_FINALIZER,
            rec.clone(),
            |event| async {
                match event {
                    Finalizer::Apply(rec) => rec.sync(&recordings, connection.as_ref()).await,
                    Finalizer::Cleanup(rec) => rec.cleanup(connection.as_ref()).await,
                }
            },
        )
        .await
        .map_err(|err| Error::FinalizerError(Box::new(err))),
        Ok(Connect::Wait(action)) => Ok(action),
        Err(err) => Err(err),
    };

    match result {
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
                    &rec.object_ref(&()),
                )
                .await?;

            ctx.metrics.reconcile_failure(rec.as_ref(), &err);
            Err(err)
        }
    }
}

fn error_policy<K, C>(_rec: Arc<K>, _: &Error, _ctx: C) -> Action {
    Action::requeue(Duration::from_secs(30))
}

impl Recording {
    fn is_deleting(&self) -> bool {
        self.meta().deletion_timestamp.is_some()
    }

    /// Looks up the referenced FlightRecorder, keeping the label that indexes Recordings by it up to date
    async fn flight_recorder(
        &self,
        ctx: &Context,
        recordings: &Api<Recording>,
        namespace: &str,
    ) -> Result<Option<FlightRecorder>> {
        let Some(fr_name) = self.spec.flight_recorder_name() else {
            warn!(
                "Recording {} in namespace {namespace} does not reference a FlightRecorder",
                self.name_any()
            );
            return Ok(None);
        };

        if self.labels().get(FLIGHT_RECORDER_LABEL).map(String::as_str) != Some(fr_name) {
            debug!("Labelling Recording {} with FlightRecorder {fr_name}", self.name_any());
            let patch = json!({
                "metadata": {
                    "labels": BTreeMap::from([(FLIGHT_RECORDER_LABEL, fr_name)]),
                }
            });
            recordings
                .patch(&self.name_any(), &PatchParams::default(), &Patch::Merge(&patch))
                .await?;
        }

        let flight_recorders: Api<FlightRecorder> = Api::namespaced(ctx.client.clone(), namespace);
        Ok(flight_recorders.get_opt(fr_name).await?)
    }

    async fn connect(
        &self,
        ctx: &Context,
        recordings: &Api<Recording>,
        namespace: &str,
    ) -> Result<Connect> {
        if self.is_deleting() && !self.finalizers().iter().any(|f| f == RECORDING_FINALIZER) {
            return Ok(Connect::Wait(Action::await_change()));
        }

        let flight_recorder = self.flight_recorder(ctx, recordings, namespace).await?;
        if flight_recorder.is_none() && !self.is_deleting() {
            debug!(
                "No FlightRecorder found for Recording {} in namespace {namespace}",
                self.name_any()
            );
            return Ok(Connect::Wait(Action::await_change()));
        }

        let Some(cryostat) = namespace_cryostat(&ctx.cryostat_store, namespace) else {
            if self.is_deleting() {
                warn!("No Cryostat in namespace {namespace}, skipping cleanup of Recording {}", self.name_any());
                return Ok(Connect::Ready(None));
            }
            return Err(Error::CryostatNotFound(namespace.into()));
        };

        let jmx_credentials = flight_recorder
            .as_ref()
            .and_then(|fr| fr.spec.jmx_credentials.as_ref());
        let client = match ctx.factory.client_for(&cryostat, jmx_credentials).await {
            Ok(client) => client,
            Err(Error::CertNotReady(certificate)) => {
                info!("Waiting for Certificate {certificate} in namespace {namespace} to become ready");
                return Ok(Connect::Wait(Action::requeue(Duration::from_secs(5))));
            }
            Err(err) => return Err(err),
        };

        let Some(flight_recorder) = flight_recorder else {
            return Ok(Connect::Ready(Some(Connection {
                client,
                target: None,
            })));
        };

        let Some(status) = flight_recorder.status.as_ref().filter(|s| s.target.is_some()) else {
            debug!(
                "FlightRecorder {} in namespace {namespace} has no target yet",
                flight_recorder.name_any()
            );
            return Ok(Connect::Wait(Action::requeue(Duration::from_secs(1))));
        };

        let pod_name = status
            .target
            .as_ref()
            .and_then(|t| t.name.clone())
            .ok_or_else(|| Error::TargetUnavailable(flight_recorder.name_any()))?;
        let pods: Api<Pod> = Api::namespaced(ctx.client.clone(), namespace);
        let pod = pods.get(&pod_name).await?;
        let target = pod_target(&pod, status.port)?;

        Ok(Connect::Ready(Some(Connection {
            client,
            target: Some(target),
        })))
    }

    async fn sync(&self, recordings: &Api<Recording>, connection: Option<&Connection>) -> Result<Action> {
        let Some(Connection {
            client,
            target: Some(target),
        }) = connection
        else {
            return Ok(Action::await_change());
        };

        let (status, action) = converge(self, client.as_ref(), target).await?;

        if self.status.as_ref() != Some(&status) {
            debug!("Updating status of Recording {}", self.name_any());
            let patch = json!({ "status": status });
            recordings
                .patch_status(&self.name_any(), &PatchParams::default(), &Patch::Merge(&patch))
                .await?;
        }

        Ok(action)
    }

    /// Removes the archived copy, then the recording held by the JVM if it is still running
    async fn cleanup(&self, connection: Option<&Connection>) -> Result<Action> {
        let Some(Connection { client, target }) = connection else {
            return Ok(Action::await_change());
        };

        if let Some(filename) = self
            .status
            .as_ref()
            .and_then(|s| s.download_url.as_deref())
            .and_then(recording_filename)
        {
            let saved = client.list_saved_recordings().await?;
            if saved.iter().any(|s| s.name == filename) {
                info!("Deleting archived recording {filename}");
                client.delete_saved_recording(&filename).await?;
            }
        }

        match target {
            Some(target) => {
                let listed = client.list_recordings(target).await?;
                if listed.iter().any(|r| r.name == self.spec.name) {
                    info!("Deleting recording {} on {target}", self.spec.name);
                    client.delete_recording(target, &self.spec.name).await?;
                }
            }
            None => debug!(
                "FlightRecorder of Recording {} is gone, nothing held in memory to delete",
                self.name_any()
            ),
        }

        Ok(Action::await_change())
    }
}

/// The last path segment of a download URL, which names the file of an archived recording
fn recording_filename(download_url: &str) -> Option<String> {
    Url::parse(download_url)
        .ok()?
        .path_segments()?
        .last()
        .filter(|segment| !segment.is_empty())
        .map(String::from)
}

fn status_from(descriptor: RecordingDescriptor) -> Result<RecordingStatus> {
    let duration = std::time::Duration::from_millis(u64::try_from(descriptor.duration).unwrap_or_default());
    Ok(RecordingStatus {
        state: Some(descriptor.state.parse()?),
        // Time only keeps whole seconds once stored
        start_time: DateTime::from_timestamp(descriptor.start_time.div_euclid(1000), 0).map(Time),
        duration: Some(duration_parser::format(duration)),
        download_url: Some(descriptor.download_url).filter(|u| !u.is_empty()),
        report_url: Some(descriptor.report_url).filter(|u| !u.is_empty()),
    })
}

/// Drives the recording on `target` one step towards the Recording's spec, returning the
/// status Cryostat now reports for it and when to look again
pub(super) async fn converge(
    recording: &Recording,
    client: &dyn RecordingClient,
    target: &TargetAddress,
) -> Result<(RecordingStatus, Action)> {
    let spec = &recording.spec;
    let mut status = recording.status.clone().unwrap_or_default();
    let archived_file = status.download_url.as_deref().and_then(recording_filename);

    match status.state {
        None => {
            let duration = spec.requested_duration()?;
            if duration.is_zero() {
                info!("Starting continuous recording {} on {target}", spec.name);
                client
                    .start_recording(target, &spec.name, &spec.event_options)
                    .await?;
            } else {
                info!("Starting {:?} recording {} on {target}", duration, spec.name);
                client
                    .dump_recording(
                        target,
                        &spec.name,
                        duration.as_secs().max(1),
                        &spec.event_options,
                    )
                    .await?;
            }
        }
        Some(RecordingState::Stopped | RecordingState::Stopping) => {}
        Some(_) if spec.state == Some(RecordingState::Stopped) => {
            info!("Stopping recording {} on {target}", spec.name);
            client.stop_recording(target, &spec.name).await?;
        }
        Some(_) => {}
    }

    // a recording missing from the list keeps its last known status
    if let Some(descriptor) = client
        .list_recordings(target)
        .await?
        .into_iter()
        .find(|r| r.name == spec.name)
    {
        status = status_from(descriptor)?;
    }

    if spec.archive && status.state == Some(RecordingState::Stopped) {
        let existing = match archived_file {
            Some(filename) => client
                .list_saved_recordings()
                .await?
                .into_iter()
                .find(|s| s.name == filename),
            None => None,
        };

        let archived = match existing {
            Some(saved) => Some(saved),
            None => {
                let filename = client.save_recording(target, &spec.name).await?;
                info!("Archived recording {} as {filename}", spec.name);
                let saved = client
                    .list_saved_recordings()
                    .await?
                    .into_iter()
                    .find(|s| s.name == filename);
                if saved.is_none() {
                    warn!("Archived recording {filename} is not listed by Cryostat");
                }
                saved
            }
        };

        if let Some(saved) = archived {
            status.download_url = Some(saved.download_url);
            status.report_url = Some(saved.report_url);
        }
    }

    let action = if status.state == Some(RecordingState::Stopped) {
        Action::await_change()
    } else {
        Action::requeue(POLL_INTERVAL)
    };
    Ok((status, action))
}

/// Run the Recording controller
pub async fn run(
    client: Client,
    metrics: Metrics,
    state: State,
    factory: Arc<dyn RecordingClientFactory>,
) {
    let recordings = Api::<Recording>::all(client.clone());
    let flight_recorders = Api::<FlightRecorder>::all(client.clone());
    let cryostats = Api::<Cryostat>::all(client.clone());

    if let Err(e) = recordings.list(&ListParams::default().limit(1)).await {
        error!("Recording is not queryable; {e:?}. Is the CRD installed?");
        std::process::exit(1);
    }

    let (cryostat_store, cryostat_writer) = reflector::store();
    let cryostat_reflector = reflector(cryostat_writer, watcher(cryostats, Config::default()))
        .touched_objects()
        .default_backoff();

    let (recording_store, recording_writer) = reflector::store();
    let recording_reflector = reflector(recording_writer, watcher(recordings, Config::default()))
        .touched_objects()
        .default_backoff();

    let index = recording_store.clone();
    Controller::for_stream(recording_reflector, recording_store)
        .shutdown_on_signal()
        // recordings are not owned by their FlightRecorder, so find them by label
        .watches(flight_recorders, Config::default(), move |fr| {
            recordings_of(&index, &fr)
        })
        // just so that the store gets polled
        .watches_stream(cryostat_reflector, |_| std::iter::empty())
        .run(
            reconcile,
            error_policy,
            Context::new(client, metrics, state, cryostat_store, factory),
        )
        .filter_map(|x| async move { Result::ok(x) })
        .for_each(|_| futures::future::ready(()))
        .await;
}

fn recordings_of(store: &Store<Recording>, fr: &FlightRecorder) -> Vec<ObjectRef<Recording>> {
    let name = fr.name_any();
    let namespace = fr.namespace();
    store
        .state()
        .into_iter()
        .filter(|rec| rec.namespace() == namespace)
        .filter(|rec| rec.labels().get(FLIGHT_RECORDER_LABEL) == Some(&name))
        .map(|rec| ObjectRef::from_obj(rec.as_ref()))
        .collect()
}
