use std::path::PathBuf;
use std::sync::Arc;

use chrono::{DateTime, Utc};
use k8s_openapi::apimachinery::pkg::apis::meta::v1::APIGroup;
use kube::runtime::reflector::Store;
use kube::{Client, Resource, ResourceExt};
use serde::Serialize;
use tokio::sync::RwLock;
use tracing::*;

use crate::recordings::{DefaultClientFactory, RecordingClientFactory};
use crate::resources::certmanager::Certificate;
use crate::resources::cryostats::Cryostat;
use crate::resources::openshift::{ConsoleLink, Route};
use crate::Metrics;

pub mod cryostat;
pub mod endpoints;
pub mod flightrecorder;
pub mod recording;

/// Diagnostics to be exposed by the web server
#[derive(Clone, Serialize)]
pub struct Diagnostics {
    #[serde(deserialize_with = "from_ts")]
    pub last_event: DateTime<Utc>,
}

impl Default for Diagnostics {
    fn default() -> Self {
        Self {
            last_event: Utc::now(),
        }
    }
}

/// Images used for the containers of a Cryostat Deployment
#[derive(Clone, Debug)]
pub struct Images {
    pub core: String,
    pub datasource: String,
    pub grafana: String,
}

pub const DEFAULT_CORE_IMAGE: &str = "quay.io/cryostat/cryostat:2.0.0";
pub const DEFAULT_DATASOURCE_IMAGE: &str = "quay.io/cryostat/jfr-datasource:2.0.0";
pub const DEFAULT_GRAFANA_IMAGE: &str = "quay.io/cryostat/cryostat-grafana-dashboard:2.0.0";

impl Default for Images {
    fn default() -> Self {
        Self {
            core: DEFAULT_CORE_IMAGE.into(),
            datasource: DEFAULT_DATASOURCE_IMAGE.into(),
            grafana: DEFAULT_GRAFANA_IMAGE.into(),
        }
    }
}

/// State shared between the controller and the web server
#[derive(Clone)]
pub struct State {
    /// Diagnostics populated by the reconciler
    pub diagnostics: Arc<RwLock<Diagnostics>>,
    /// Metrics registry
    pub registry: prometheus::Registry,
    /// Container images for Cryostat deployments
    images: Images,
    /// Token presented to Cryostat's web API
    service_account_token_path: PathBuf,
}

/// State wrapper around the controller outputs for the web server
impl State {
    pub fn new(images: Images, service_account_token_path: PathBuf) -> Self {
        Self {
            diagnostics: Arc::new(RwLock::new(Diagnostics::default())),
            registry: prometheus::Registry::default(),
            images,
            service_account_token_path,
        }
    }

    /// Metrics getter
    pub fn metrics(&self) -> Vec<prometheus::proto::MetricFamily> {
        self.registry.gather()
    }

    /// State getter
    pub async fn diagnostics(&self) -> Diagnostics {
        self.diagnostics.read().await.clone()
    }
}

/// The Cryostat instance serving a namespace.
/// Only one instance per namespace is supported; if there are several, the first by name is used.
pub(crate) fn namespace_cryostat(store: &Store<Cryostat>, namespace: &str) -> Option<Arc<Cryostat>> {
    let mut cryostats: Vec<Arc<Cryostat>> = store
        .state()
        .into_iter()
        .filter(|c| c.namespace().as_deref() == Some(namespace))
        .collect();
    cryostats.sort_by_key(|c| c.name_any());

    if cryostats.len() > 1 {
        warn!(
            "Found {} Cryostat instances in namespace {namespace}, using {}",
            cryostats.len(),
            cryostats[0].name_any()
        );
    }

    cryostats.into_iter().next()
}

/// Optional APIs present in the cluster
#[derive(Clone, Copy, Debug, Default)]
pub struct Capabilities {
    pub cert_manager: bool,
    pub routes: bool,
    pub console: bool,
}

async fn detect_capabilities(client: &Client) -> Capabilities {
    let api_groups = match client.list_api_groups().await {
        Ok(list) => list,
        Err(e) => {
            error!("Could not list api groups: {e:?}");
            std::process::exit(1);
        }
    };

    api_groups
        .groups
        .iter()
        .fold(Capabilities::default(), |caps, group| {
            fn group_matches<R: Resource<DynamicType = ()>>(group: &APIGroup) -> bool {
                group.name == R::group(&())
                    && group.versions.iter().any(|v| v.version == R::version(&()))
            }
            Capabilities {
                cert_manager: caps.cert_manager || group_matches::<Certificate>(group),
                routes: caps.routes || group_matches::<Route>(group),
                console: caps.console || group_matches::<ConsoleLink>(group),
            }
        })
}

/// Initialize the controllers and shared state (given the crds are installed)
pub async fn run(state: State) {
    let client = Client::try_default()
        .await
        .expect("failed to create kube Client");

    let metrics = Metrics::default().register(&state.registry).unwrap();

    let capabilities = detect_capabilities(&client).await;
    info!(
        cert_manager = capabilities.cert_manager,
        routes = capabilities.routes,
        console = capabilities.console,
        "Detected optional APIs"
    );

    let factory: Arc<dyn RecordingClientFactory> = Arc::new(DefaultClientFactory::new(
        client.clone(),
        state.service_account_token_path.clone(),
        capabilities.cert_manager,
        metrics.clone(),
    ));

    tokio::join!(
        cryostat::run(client.clone(), metrics.clone(), state.clone(), capabilities),
        cryostat::run_container_jfr(client.clone(), metrics.clone(), state.clone(), capabilities),
        endpoints::run(client.clone(), metrics.clone(), state.clone()),
        flightrecorder::run(client.clone(), metrics.clone(), state.clone(), factory.clone()),
        recording::run(client, metrics, state, factory),
    );
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::resources::cryostats::CryostatSpec;
    use kube::runtime::{reflector, watcher};

    fn cryostat(name: &str, namespace: &str) -> Cryostat {
        let mut cryostat = Cryostat::new(name, CryostatSpec::default());
        cryostat.metadata.namespace = Some(namespace.into());
        cryostat
    }

    #[test]
    fn first_cryostat_by_name_serves_the_namespace() {
        let (store, mut writer) = reflector::store();
        for c in [
            cryostat("zeta", "apps"),
            cryostat("alpha", "apps"),
            cryostat("other", "elsewhere"),
        ] {
            writer.apply_watcher_event(&watcher::Event::Apply(c));
        }

        let found = namespace_cryostat(&store, "apps").unwrap();
        assert_eq!(found.name_any(), "alpha");
        assert!(namespace_cryostat(&store, "empty").is_none());
    }
}
