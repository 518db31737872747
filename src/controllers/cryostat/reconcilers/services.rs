use std::collections::BTreeMap;

use k8s_openapi::api::core::v1::{Service, ServicePort, ServiceSpec};
use k8s_openapi::apimachinery::pkg::util::intstr::IntOrString;
use kube::Api;

use crate::controllers::cryostat::controller::Context;
use crate::controllers::endpoints::controller::JMX_PORT_NAME;
use crate::reconcilers::{component_labels, label_selector, object_meta};
use crate::resources::cryostats::{
    DEFAULT_COMMAND_PORT, DEFAULT_GRAFANA_PORT, DEFAULT_JMX_PORT, DEFAULT_WEB_PORT,
};
use crate::Error;

use super::{apply, delete_if_exists, Instance};

pub fn grafana_service_name(instance: &str) -> String {
    format!("{instance}-grafana")
}

pub fn command_service_name(instance: &str) -> String {
    format!("{instance}-command")
}

fn port(name: &str, port: i32, target_port: i32) -> ServicePort {
    ServicePort {
        name: Some(name.into()),
        port,
        target_port: Some(IntOrString::Int(target_port)),
        ..Default::default()
    }
}

fn service(
    instance: &Instance,
    name: String,
    labels: Option<&BTreeMap<String, String>>,
    annotations: Option<&BTreeMap<String, String>>,
    ports: Vec<ServicePort>,
) -> Service {
    let mut metadata = object_meta(&instance.oref, &name);
    let ours = metadata.labels.get_or_insert_with(Default::default);
    if let Some(labels) = labels {
        ours.extend(labels.iter().map(|(k, v)| (k.clone(), v.clone())));
    }
    // reserved
    ours.extend(component_labels(&instance.name, "cryostat"));
    metadata.annotations = annotations.cloned();

    Service {
        metadata,
        spec: Some(ServiceSpec {
            type_: Some("ClusterIP".into()),
            selector: label_selector(&instance.name, "cryostat").match_labels,
            ports: Some(ports),
            ..Default::default()
        }),
        status: None,
    }
}

fn core_service(instance: &Instance) -> Service {
    let config = instance.spec.core_service_config();
    service(
        instance,
        instance.name.clone(),
        config.and_then(|c| c.labels.as_ref()),
        config.and_then(|c| c.annotations.as_ref()),
        vec![
            port("http", instance.spec.web_port(), DEFAULT_WEB_PORT),
            port(JMX_PORT_NAME, instance.spec.jmx_port(), DEFAULT_JMX_PORT),
        ],
    )
}

fn grafana_service(instance: &Instance) -> Service {
    let config = instance.spec.grafana_service_config();
    service(
        instance,
        grafana_service_name(&instance.name),
        config.and_then(|c| c.labels.as_ref()),
        config.and_then(|c| c.annotations.as_ref()),
        vec![port("http", instance.spec.grafana_port(), DEFAULT_GRAFANA_PORT)],
    )
}

fn command_service(instance: &Instance) -> Service {
    service(
        instance,
        command_service_name(&instance.name),
        None,
        None,
        vec![port("cmdchan", DEFAULT_COMMAND_PORT, DEFAULT_COMMAND_PORT)],
    )
}

pub async fn reconcile_services(ctx: &Context, instance: &Instance) -> Result<(), Error> {
    let api: Api<Service> = Api::namespaced(ctx.client.clone(), &instance.namespace);

    apply(&api, &instance.namespace, core_service(instance)).await?;

    if instance.spec.minimal {
        delete_if_exists(&api, &instance.namespace, &grafana_service_name(&instance.name)).await?;
        delete_if_exists(&api, &instance.namespace, &command_service_name(&instance.name)).await?;
    } else {
        apply(&api, &instance.namespace, grafana_service(instance)).await?;
        apply(&api, &instance.namespace, command_service(instance)).await?;
    }

    Ok(())
}
