use std::collections::BTreeMap;

use k8s_openapi::api::core::v1::ObjectReference;
use k8s_openapi::apimachinery::pkg::apis::meta::v1::LabelSelector;
use kube::CustomResource;
use schemars::JsonSchema;
use serde::{Deserialize, Serialize};

/// FlightRecorder represents a JVM that is capable of hosting flight recordings.
/// One is created by the operator for every Pod exposing a JMX port.
#[derive(CustomResource, Deserialize, Serialize, Clone, Debug, Default, JsonSchema)]
#[kube(
    kind = "FlightRecorder",
    group = "operator.cryostat.io",
    version = "v1beta1",
    namespaced,
    printcolumn = r#"{"name":"Target", "type":"string", "jsonPath":".status.target.name"}"#,
    printcolumn = r#"{"name":"Port", "type":"integer", "jsonPath":".status.port"}"#,
    printcolumn = r#"{"name":"Age", "type":"date", "jsonPath":".metadata.creationTimestamp"}"#
)]
#[kube(status = "FlightRecorderStatus", shortname = "fr")]
#[serde(rename_all = "camelCase")]
pub struct FlightRecorderSpec {
    /// Recordings that match this selector belong to this FlightRecorder
    pub recording_selector: Option<LabelSelector>,
    /// If JMX authentication is enabled for this FlightRecorder's JVM, specify the credentials in a secret
    /// and reference it here
    pub jmx_credentials: Option<JMXAuthSecret>,
}

/// Reference to a Secret holding JMX credentials
#[derive(Deserialize, Serialize, Clone, Default, Debug, JsonSchema, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub struct JMXAuthSecret {
    /// Name of secret in the local namespace
    pub secret_name: String,
    /// Key within secret containing the username, defaults to "username"
    pub username_key: Option<String>,
    /// Key within secret containing the password, defaults to "password"
    pub password_key: Option<String>,
}

impl JMXAuthSecret {
    pub fn username_key(&self) -> &str {
        self.username_key.as_deref().unwrap_or("username")
    }

    pub fn password_key(&self) -> &str {
        self.password_key.as_deref().unwrap_or("password")
    }
}

/// Status of the FlightRecorder.
/// This is set and managed automatically.
/// Read-only.
#[derive(Deserialize, Serialize, Clone, Default, Debug, JsonSchema, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct FlightRecorderStatus {
    /// Reference to the pod/service that this object controls JFR for
    pub target: Option<ObjectReference>,
    /// Remote JMX port for the JVM
    #[serde(default)]
    pub port: i32,
    /// Listing of events available in the target JVM
    #[serde(default)]
    pub events: Vec<EventInfo>,
    /// Listing of templates available in the target JVM
    #[serde(default)]
    pub templates: Vec<TemplateInfo>,
}

/// Metadata for a particular JFR event type
#[derive(Deserialize, Serialize, Clone, Default, Debug, JsonSchema, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub struct EventInfo {
    /// The ID used by JFR to uniquely identify this event type
    pub type_id: String,
    /// Human-readable name for this type of event
    pub name: String,
    /// A description detailing what this event does
    #[serde(default)]
    pub description: String,
    /// A hierarchical category used to organize related event types
    #[serde(default)]
    pub category: Vec<String>,
    /// Options that may be used to tune this event
    #[serde(default)]
    pub options: BTreeMap<String, OptionDescriptor>,
}

/// Describes how to configure a particular event option
#[derive(Deserialize, Serialize, Clone, Default, Debug, JsonSchema, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub struct OptionDescriptor {
    /// Human-readable name for this option
    pub name: String,
    /// A description of what this option does
    #[serde(default)]
    pub description: String,
    /// The value implicitly used when this option isn't specified
    #[serde(default)]
    pub default_value: String,
}

/// Metadata for a JFR template
#[derive(Deserialize, Serialize, Clone, Default, Debug, JsonSchema, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub struct TemplateInfo {
    /// The name of the template
    pub name: String,
    /// A description of the template and its performance impact
    #[serde(default)]
    pub description: String,
    /// The organization which has provided the template
    #[serde(default)]
    pub provider: String,
    /// Whether the template is provided by the target JVM or Cryostat itself
    #[serde(default)]
    pub r#type: String,
}
