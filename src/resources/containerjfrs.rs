use kube::CustomResource;
use schemars::JsonSchema;
use serde::{Deserialize, Serialize};

use super::cryostats::CryostatSpec;

pub static CONTAINER_JFR_FINALIZER: &str = "rhjmc.redhat.com/containerjfr.finalizer";

/// ContainerJFR is the deprecated predecessor of Cryostat. Existing objects keep being
/// reconciled into the same set of resources as an equivalent Cryostat.
#[derive(CustomResource, Deserialize, Serialize, Clone, Debug, Default, JsonSchema)]
#[kube(
    kind = "ContainerJFR",
    group = "rhjmc.redhat.com",
    version = "v1beta1",
    namespaced,
    printcolumn = r#"{"name":"Application URL", "type":"string", "jsonPath":".status.applicationUrl"}"#,
    printcolumn = r#"{"name":"Age", "type":"date", "jsonPath":".metadata.creationTimestamp"}"#
)]
#[kube(status = "ContainerJFRStatus")]
#[serde(rename_all = "camelCase")]
pub struct ContainerJFRSpec {
    /// Deploy a pared-down ContainerJFR instance with no Grafana dashboard or jfr-datasource.
    #[serde(default)]
    pub minimal: bool,
}

#[derive(Deserialize, Serialize, Clone, Default, Debug, JsonSchema, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub struct ContainerJFRStatus {
    pub application_url: Option<String>,
}

impl From<&ContainerJFRSpec> for CryostatSpec {
    fn from(value: &ContainerJFRSpec) -> Self {
        CryostatSpec {
            minimal: value.minimal,
            ..Default::default()
        }
    }
}
