use k8s_openapi::api::networking::v1::{
    Ingress, IngressBackend, IngressServiceBackend, IngressSpec, ServiceBackendPort,
};
use kube::Api;
use tokio::time::Duration;

use crate::controllers::cryostat::controller::Context;
use crate::reconcilers::object_meta;
use crate::resources::cryostats::{NetworkConfiguration, DEFAULT_COMMAND_PORT};
use crate::resources::openshift::{Route, RoutePort, RouteSpec, RouteTargetReference, TLSConfig};
use crate::Error;

use super::services::{command_service_name, grafana_service_name};
use super::{apply, delete_if_exists, Instance};

/// Where the instance's web applications are reachable from outside the cluster
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct ExternalUrls {
    pub core: Option<String>,
    pub grafana: Option<String>,
}

fn route(
    instance: &Instance,
    service: &str,
    port_name: &str,
    ca: Option<&str>,
    config: Option<&NetworkConfiguration>,
) -> Route {
    let mut metadata = object_meta(&instance.oref, service);
    metadata.annotations = config.and_then(|c| c.annotations.clone());

    let mut route = Route::new(
        service,
        RouteSpec {
            host: None,
            to: RouteTargetReference {
                kind: "Service".into(),
                name: service.into(),
            },
            port: Some(RoutePort {
                target_port: port_name.into(),
            }),
            tls: Some(TLSConfig {
                termination: if ca.is_some() { "reencrypt" } else { "edge" }.into(),
                insecure_edge_termination_policy: Some("Redirect".into()),
                destination_ca_certificate: ca.map(String::from),
            }),
        },
    );
    route.metadata = metadata;
    route
}

async fn admitted_route(
    api: &Api<Route>,
    namespace: &str,
    route: Route,
) -> Result<String, Error> {
    let route = apply(api, namespace, route).await?;
    match route.admitted_host() {
        Some(host) => Ok(format!("https://{host}")),
        None => Err(Error::NotReady {
            reason: "RouteNotReady".into(),
            message: format!(
                "Waiting for a host to be admitted for Route {}",
                route.metadata.name.unwrap_or_default()
            ),
            requeue_after: Some(Duration::from_secs(5)),
        }),
    }
}

async fn reconcile_routes(
    ctx: &Context,
    instance: &Instance,
    ca: Option<&str>,
) -> Result<ExternalUrls, Error> {
    let api: Api<Route> = Api::namespaced(ctx.client.clone(), &instance.namespace);
    let namespace = &instance.namespace;
    let options = instance.spec.network_options.as_ref();

    let core = route(
        instance,
        &instance.name,
        "http",
        ca,
        options.and_then(|o| o.core_config.as_ref()),
    );
    let core = admitted_route(&api, namespace, core).await?;

    let grafana_name = grafana_service_name(&instance.name);
    let command_name = command_service_name(&instance.name);
    if instance.spec.minimal {
        delete_if_exists(&api, namespace, &grafana_name).await?;
        delete_if_exists(&api, namespace, &command_name).await?;
        return Ok(ExternalUrls {
            core: Some(core),
            grafana: None,
        });
    }

    let command = route(
        instance,
        &command_name,
        "cmdchan",
        ca,
        options.and_then(|o| o.command_config.as_ref()),
    );
    admitted_route(&api, namespace, command).await?;

    let grafana = route(
        instance,
        &grafana_name,
        "http",
        ca,
        options.and_then(|o| o.grafana_config.as_ref()),
    );
    let grafana = admitted_route(&api, namespace, grafana).await?;

    Ok(ExternalUrls {
        core: Some(core),
        grafana: Some(grafana),
    })
}

fn ingress(
    instance: &Instance,
    service: &str,
    port: i32,
    config: &NetworkConfiguration,
    spec: &IngressSpec,
) -> Ingress {
    let mut metadata = object_meta(&instance.oref, service);
    metadata.annotations = config.annotations.clone();

    let mut spec = spec.clone();
    if spec.default_backend.is_none() {
        spec.default_backend = Some(IngressBackend {
            service: Some(IngressServiceBackend {
                name: service.into(),
                port: Some(ServiceBackendPort {
                    number: Some(port),
                    name: None,
                }),
            }),
            resource: None,
        });
    }

    Ingress {
        metadata,
        spec: Some(spec),
        status: None,
    }
}

/// The URL an Ingress makes its backend reachable at
pub fn ingress_url(spec: &IngressSpec) -> Option<String> {
    let tls = spec.tls.as_deref().unwrap_or_default();
    let host = spec
        .rules
        .iter()
        .flatten()
        .find_map(|r| r.host.as_ref())
        .or_else(|| tls.iter().find_map(|t| t.hosts.as_ref()?.first()))?;

    let scheme = if tls.is_empty() { "http" } else { "https" };
    Some(format!("{scheme}://{host}"))
}

async fn reconcile_ingresses(ctx: &Context, instance: &Instance) -> Result<ExternalUrls, Error> {
    let api: Api<Ingress> = Api::namespaced(ctx.client.clone(), &instance.namespace);
    let namespace = &instance.namespace;
    let options = instance.spec.network_options.as_ref();

    let desired: [(String, i32, Option<&NetworkConfiguration>, bool); 3] = [
        (
            instance.name.clone(),
            instance.spec.web_port(),
            options.and_then(|o| o.core_config.as_ref()),
            true,
        ),
        (
            grafana_service_name(&instance.name),
            instance.spec.grafana_port(),
            options.and_then(|o| o.grafana_config.as_ref()),
            !instance.spec.minimal,
        ),
        (
            command_service_name(&instance.name),
            DEFAULT_COMMAND_PORT,
            options.and_then(|o| o.command_config.as_ref()),
            !instance.spec.minimal,
        ),
    ];

    let mut urls = Vec::with_capacity(desired.len());
    for (service, port, config, wanted) in desired {
        match config.and_then(|c| c.ingress_spec.as_ref().map(|s| (c, s))) {
            Some((config, spec)) if wanted => {
                apply(&api, namespace, ingress(instance, &service, port, config, spec)).await?;
                urls.push(ingress_url(spec));
            }
            _ => {
                delete_if_exists(&api, namespace, &service).await?;
                urls.push(None);
            }
        }
    }

    Ok(ExternalUrls {
        core: urls[0].clone(),
        grafana: urls[1].clone(),
    })
}

/// Exposes the instance outside the cluster: through Routes on OpenShift, otherwise through
/// whichever Ingresses are configured
pub async fn reconcile_networking(
    ctx: &Context,
    instance: &Instance,
    ca: Option<&[u8]>,
) -> Result<ExternalUrls, Error> {
    if ctx.capabilities.routes {
        let ca = ca.map(|ca| String::from_utf8_lossy(ca).into_owned());
        reconcile_routes(ctx, instance, ca.as_deref()).await
    } else {
        reconcile_ingresses(ctx, instance).await
    }
}
