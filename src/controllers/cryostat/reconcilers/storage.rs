use std::collections::BTreeMap;

use k8s_openapi::api::core::v1::{
    PersistentVolumeClaim, PersistentVolumeClaimSpec, VolumeResourceRequirements,
};
use k8s_openapi::apimachinery::pkg::api::resource::Quantity;
use kube::api::PostParams;
use kube::Api;
use tracing::debug;

use crate::controllers::cryostat::controller::Context;
use crate::reconcilers::object_meta;
use crate::resources::cryostats::PersistentVolumeClaimConfig;
use crate::Error;

use super::Instance;

const DEFAULT_STORAGE_REQUEST: &str = "500Mi";

fn cryostat_pvc(instance: &Instance) -> PersistentVolumeClaim {
    let config = instance
        .spec
        .storage_options
        .as_ref()
        .and_then(|s| s.pvc.clone())
        .unwrap_or_default();
    let PersistentVolumeClaimConfig {
        annotations,
        labels,
        spec,
    } = config;

    let mut metadata = object_meta(&instance.oref, &instance.name);
    if let Some(labels) = labels {
        let ours = metadata.labels.get_or_insert_with(Default::default);
        for (k, v) in labels {
            // ours win
            ours.entry(k).or_insert(v);
        }
    }
    metadata.annotations = annotations;

    let mut spec = spec.unwrap_or_default();
    if spec.access_modes.as_ref().map_or(true, Vec::is_empty) {
        spec.access_modes = Some(vec!["ReadWriteOnce".into()]);
    }
    let requests = spec
        .resources
        .get_or_insert_with(VolumeResourceRequirements::default)
        .requests
        .get_or_insert_with(BTreeMap::new);
    requests
        .entry("storage".into())
        .or_insert_with(|| Quantity(DEFAULT_STORAGE_REQUEST.into()));

    PersistentVolumeClaim {
        metadata,
        spec: Some(spec),
        status: None,
    }
}

/// Creates the claim backing recordings and templates. Claims are mostly immutable, so an
/// existing one is never updated.
pub async fn reconcile_storage(ctx: &Context, instance: &Instance) -> Result<(), Error> {
    let api: Api<PersistentVolumeClaim> = Api::namespaced(ctx.client.clone(), &instance.namespace);
    if api.get_metadata_opt(&instance.name).await?.is_some() {
        return Ok(());
    }

    debug!(
        "Creating PersistentVolumeClaim {} in namespace {}",
        instance.name, instance.namespace
    );
    match api.create(&PostParams::default(), &cryostat_pvc(instance)).await {
        Ok(_) => Ok(()),
        Err(kube::Error::Api(e)) if e.code == 409 => Ok(()),
        Err(err) => Err(err.into()),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::controllers::cryostat::reconcilers::tests::instance;
    use crate::resources::cryostats::StorageConfiguration;
    use assert_json_diff::assert_json_include;
    use serde_json::json;

    #[test]
    fn default_claim() {
        let pvc = cryostat_pvc(&instance(false, true));
        assert_json_include!(
            actual: serde_json::to_value(&pvc).unwrap(),
            expected: json!({
                "metadata": {
                    "name": "cryostat-sample",
                    "labels": { "app.kubernetes.io/instance": "cryostat-sample" }
                },
                "spec": {
                    "accessModes": ["ReadWriteOnce"],
                    "resources": { "requests": { "storage": "500Mi" } }
                }
            })
        );
    }

    #[test]
    fn claim_overrides() {
        let mut instance = instance(false, true);
        instance.spec.storage_options = Some(StorageConfiguration {
            pvc: Some(PersistentVolumeClaimConfig {
                annotations: Some(BTreeMap::from([("backup".into(), "daily".into())])),
                labels: Some(BTreeMap::from([
                    ("team".into(), "perf".into()),
                    ("app.kubernetes.io/instance".into(), "hijacked".into()),
                ])),
                spec: Some(PersistentVolumeClaimSpec {
                    storage_class_name: Some("fast".into()),
                    resources: Some(VolumeResourceRequirements {
                        requests: Some(BTreeMap::from([(
                            "storage".into(),
                            Quantity("10Gi".into()),
                        )])),
                        limits: None,
                    }),
                    ..Default::default()
                }),
            }),
        });

        let pvc = cryostat_pvc(&instance);
        assert_json_include!(
            actual: serde_json::to_value(&pvc).unwrap(),
            expected: json!({
                "metadata": {
                    "annotations": { "backup": "daily" },
                    "labels": {
                        "team": "perf",
                        "app.kubernetes.io/instance": "cryostat-sample"
                    }
                },
                "spec": {
                    "storageClassName": "fast",
                    "accessModes": ["ReadWriteOnce"],
                    "resources": { "requests": { "storage": "10Gi" } }
                }
            })
        );
    }
}
