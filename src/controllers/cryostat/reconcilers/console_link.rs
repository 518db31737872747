use k8s_openapi::apimachinery::pkg::apis::meta::v1::ObjectMeta;
use kube::Api;
use sha2::Digest;

use crate::controllers::cryostat::controller::Context;
use crate::reconcilers::resource_labels;
use crate::resources::openshift::{ConsoleLink, ConsoleLinkSpec, NamespaceDashboardSpec};
use crate::Error;

use super::{apply, delete_if_exists, Instance};

/// ConsoleLinks are cluster scoped, so the name is derived from the namespaced name of the instance
pub fn console_link_name(namespace: &str, name: &str) -> String {
    let mut hasher = sha2::Sha256::new();
    hasher.update(format!("{namespace}/{name}").as_bytes());
    let digest = hasher.finalize();
    let result = u32::from_le_bytes([digest[0], digest[1], digest[2], digest[3]]);
    format!("cryostat-{result:x}")
}

fn console_link(instance: &Instance, href: &str) -> ConsoleLink {
    let name = console_link_name(&instance.namespace, &instance.name);
    let mut link = ConsoleLink::new(
        &name,
        ConsoleLinkSpec {
            text: "Cryostat".into(),
            href: href.into(),
            location: "NamespaceDashboard".into(),
            namespace_dashboard: Some(NamespaceDashboardSpec {
                namespaces: vec![instance.namespace.clone()],
            }),
        },
    );
    // cluster scoped, so no owner reference; removed by the finalizer
    link.metadata = ObjectMeta {
        name: Some(name),
        labels: Some(resource_labels(&instance.name)),
        ..Default::default()
    };
    link
}

/// Links the application from the namespace dashboard of the OpenShift console
pub async fn reconcile_console_link(
    ctx: &Context,
    instance: &Instance,
    href: &str,
) -> Result<(), Error> {
    let api: Api<ConsoleLink> = Api::all(ctx.client.clone());
    apply(&api, &instance.namespace, console_link(instance, href)).await?;
    Ok(())
}

pub async fn delete_console_link(ctx: &Context, namespace: &str, name: &str) -> Result<(), Error> {
    let api: Api<ConsoleLink> = Api::all(ctx.client.clone());
    delete_if_exists(&api, namespace, &console_link_name(namespace, name)).await
}
