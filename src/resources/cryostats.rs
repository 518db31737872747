use std::borrow::Cow;
use std::collections::BTreeMap;

use k8s_openapi::api::core::v1::{PersistentVolumeClaimSpec, ResourceRequirements};
use k8s_openapi::api::networking::v1::IngressSpec;
use kube::CustomResource;
use schemars::schema::{Schema, SchemaObject};
use schemars::JsonSchema;
use serde::{Deserialize, Serialize};
use serde_json::json;

pub static CRYOSTAT_FINALIZER: &str = "operator.cryostat.io/cryostat.finalizer";

/// Represents the configuration of a Cryostat deployment
#[derive(CustomResource, Deserialize, Serialize, Clone, Debug, Default, JsonSchema)]
#[kube(
    kind = "Cryostat",
    group = "operator.cryostat.io",
    version = "v1beta1",
    namespaced,
    schema = "manual",
    printcolumn = r#"{"name":"Application URL", "type":"string", "jsonPath":".status.applicationUrl"}"#,
    printcolumn = r#"{"name":"Ready", "type":"string", "jsonPath":".status.conditions[?(@.type==\"Ready\")].status"}"#,
    printcolumn = r#"{"name":"Status", "priority": 1, "type":"string", "jsonPath":".status.conditions[?(@.type==\"Ready\")].message"}"#,
    printcolumn = r#"{"name":"Age", "type":"date", "jsonPath":".metadata.creationTimestamp"}"#
)]
#[kube(status = "CryostatStatus", shortname = "cryo")]
#[serde(rename_all = "camelCase")]
pub struct CryostatSpec {
    /// Deploy a pared-down Cryostat instance with no Grafana dashboard or jfr-datasource.
    #[serde(default)]
    pub minimal: bool,
    /// Use cert-manager to secure in-cluster communication between Cryostat components.
    /// Defaults to true when cert-manager is installed.
    pub enable_cert_manager: Option<bool>,
    /// List of TLS certificates to trust when connecting to targets
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub trusted_cert_secrets: Vec<CertificateSecret>,
    /// List of Flight Recorder Event Templates to preconfigure in Cryostat
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub event_templates: Vec<TemplateConfigMap>,
    /// Options to customize the storage for Flight Recordings and Templates
    pub storage_options: Option<StorageConfiguration>,
    /// Options to customize the services created for the Cryostat application and Grafana dashboard
    pub service_options: Option<ServiceConfigList>,
    /// Options to control how the operator exposes the application outside of the cluster using an Ingress.
    /// Ignored when Routes are available.
    pub network_options: Option<NetworkConfigurationList>,
    /// Options to configure Cryostat automated report generation.
    /// Currently stored only; reports are generated by the core container.
    pub report_options: Option<ReportConfiguration>,
}

// Hoisted from the derived implementation so that we can restrict names to be valid Service names
impl schemars::JsonSchema for Cryostat {
    fn schema_name() -> String {
        "Cryostat".to_owned()
    }
    fn schema_id() -> Cow<'static, str> {
        "cryostat_operator::resources::cryostats::Cryostat".into()
    }
    fn json_schema(gen: &mut schemars::gen::SchemaGenerator) -> Schema {
        let mut schema_object = SchemaObject {
            instance_type: Some(schemars::schema::InstanceType::Object.into()),
            metadata: Some(Box::new(schemars::schema::Metadata {
                description: Some(
                    "Cryostat allows you to install Cryostat for a single namespace.".to_owned(),
                ),
                ..Default::default()
            })),
            ..Default::default()
        };
        let object_validation = schema_object.object();

        object_validation.properties.insert(
            "metadata".to_owned(),
            serde_json::from_value(json!({
                "type": "object",
                "properties": {
                    "name": {
                        "type": "string",
                        "minLength": 1,
                        // leaves room for the -grafana-basic suffix
                        "maxLength": 49,
                        "pattern": "^[a-z]([-a-z0-9]*[a-z0-9])?$",
                    }
                }
            }))
            .unwrap(),
        );
        object_validation.required.insert("metadata".to_owned());

        object_validation
            .properties
            .insert("spec".to_owned(), gen.subschema_for::<CryostatSpec>());
        object_validation.required.insert("spec".to_owned());

        object_validation.properties.insert(
            "status".to_owned(),
            gen.subschema_for::<Option<CryostatStatus>>(),
        );
        Schema::Object(schema_object)
    }
}

impl CryostatSpec {
    /// Whether TLS should be used, given whether cert-manager is present in the cluster
    pub fn tls_enabled(&self, cert_manager_installed: bool) -> bool {
        cert_manager_installed && self.enable_cert_manager.unwrap_or(true)
    }

    pub fn core_service_config(&self) -> Option<&CoreServiceConfig> {
        self.service_options
            .as_ref()
            .and_then(|s| s.core_config.as_ref())
    }

    pub fn grafana_service_config(&self) -> Option<&GrafanaServiceConfig> {
        self.service_options
            .as_ref()
            .and_then(|s| s.grafana_config.as_ref())
    }

    /// The HTTP port of the Cryostat web server
    pub fn web_port(&self) -> i32 {
        self.core_service_config()
            .and_then(|c| c.http_port)
            .unwrap_or(DEFAULT_WEB_PORT)
    }

    /// The JMX port Cryostat itself listens on
    pub fn jmx_port(&self) -> i32 {
        self.core_service_config()
            .and_then(|c| c.jmx_port)
            .unwrap_or(DEFAULT_JMX_PORT)
    }

    pub fn grafana_port(&self) -> i32 {
        self.grafana_service_config()
            .and_then(|c| c.http_port)
            .unwrap_or(DEFAULT_GRAFANA_PORT)
    }
}

pub const DEFAULT_WEB_PORT: i32 = 8181;
pub const DEFAULT_JMX_PORT: i32 = 9091;
pub const DEFAULT_GRAFANA_PORT: i32 = 3000;
pub const DEFAULT_COMMAND_PORT: i32 = 9090;

/// Keys of the generated Secret holding the credentials for Cryostat's own JMX port
pub const JMX_AUTH_USER_KEY: &str = "CRYOSTAT_RJMX_USER";
pub const JMX_AUTH_PASS_KEY: &str = "CRYOSTAT_RJMX_PASS";

pub fn jmx_auth_secret_name(cryostat_name: &str) -> String {
    format!("{cryostat_name}-jmx-auth")
}

/// A Secret containing a TLS certificate to trust
#[derive(Deserialize, Serialize, Clone, Default, Debug, JsonSchema, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub struct CertificateSecret {
    /// Name of secret in the local namespace
    pub secret_name: String,
    /// Key within secret containing the certificate. Defaults to tls.crt.
    pub certificate_key: Option<String>,
}

/// A ConfigMap containing a JFR event template
#[derive(Deserialize, Serialize, Clone, Default, Debug, JsonSchema, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub struct TemplateConfigMap {
    /// Name of config map in the local namespace
    pub config_map_name: String,
    /// Filename within config map containing the template file
    pub filename: String,
}

#[derive(Deserialize, Serialize, Clone, Default, Debug, JsonSchema)]
#[serde(rename_all = "camelCase")]
pub struct StorageConfiguration {
    /// Configuration for the Persistent Volume Claim to be created by the operator
    pub pvc: Option<PersistentVolumeClaimConfig>,
}

#[derive(Deserialize, Serialize, Clone, Default, Debug, JsonSchema)]
#[serde(rename_all = "camelCase")]
pub struct PersistentVolumeClaimConfig {
    /// Annotations to add to the Persistent Volume Claim during its creation
    pub annotations: Option<BTreeMap<String, String>>,
    /// Labels to add to the Persistent Volume Claim during its creation.
    /// The label with key "app" is reserved for use by the operator.
    pub labels: Option<BTreeMap<String, String>>,
    /// Spec for a Persistent Volume Claim, whose options will override the defaults used by the operator.
    /// Unless overriden, the PVC will be created with the default Storage Class and 500MiB of storage.
    /// Once the operator has created the PVC, changes to this field have no effect.
    pub spec: Option<PersistentVolumeClaimSpec>,
}

#[derive(Deserialize, Serialize, Clone, Default, Debug, JsonSchema)]
#[serde(rename_all = "camelCase")]
pub struct ServiceConfigList {
    /// Specification for the service responsible for the Cryostat application
    pub core_config: Option<CoreServiceConfig>,
    /// Specification for the service responsible for the Cryostat Grafana dashboard
    pub grafana_config: Option<GrafanaServiceConfig>,
}

#[derive(Deserialize, Serialize, Clone, Default, Debug, JsonSchema)]
#[serde(rename_all = "camelCase")]
pub struct CoreServiceConfig {
    /// HTTP port number for the Cryostat application service. Defaults to 8181.
    #[schemars(range(min = 1, max = 65535))]
    pub http_port: Option<i32>,
    /// Remote JMX port number for the Cryostat application service. Defaults to 9091.
    #[schemars(range(min = 1, max = 65535))]
    pub jmx_port: Option<i32>,
    /// Annotations to add to the service during its creation
    pub annotations: Option<BTreeMap<String, String>>,
    /// Labels to add to the service during its creation.
    /// The labels with keys "app" and "component" are reserved for use by the operator.
    pub labels: Option<BTreeMap<String, String>>,
}

#[derive(Deserialize, Serialize, Clone, Default, Debug, JsonSchema)]
#[serde(rename_all = "camelCase")]
pub struct GrafanaServiceConfig {
    /// HTTP port number for the Grafana dashboard service. Defaults to 3000.
    #[schemars(range(min = 1, max = 65535))]
    pub http_port: Option<i32>,
    pub annotations: Option<BTreeMap<String, String>>,
    pub labels: Option<BTreeMap<String, String>>,
}

#[derive(Deserialize, Serialize, Clone, Default, Debug, JsonSchema)]
#[serde(rename_all = "camelCase")]
pub struct NetworkConfigurationList {
    /// Specifications for how to expose the Cryostat service
    pub core_config: Option<NetworkConfiguration>,
    /// Specifications for how to expose the Cryostat command service
    pub command_config: Option<NetworkConfiguration>,
    /// Specifications for how to expose Cryostat's Grafana service
    pub grafana_config: Option<NetworkConfiguration>,
}

#[derive(Deserialize, Serialize, Clone, Default, Debug, JsonSchema)]
#[serde(rename_all = "camelCase")]
pub struct NetworkConfiguration {
    /// Annotations to add to the Ingress or Route during its creation
    pub annotations: Option<BTreeMap<String, String>>,
    /// Configuration for an Ingress object.
    /// Currently subpaths are not supported, so unique hosts must be specified
    /// (if a single external IP is being used) to differentiate between ingresses/services.
    pub ingress_spec: Option<IngressSpec>,
}

#[derive(Deserialize, Serialize, Clone, Default, Debug, JsonSchema)]
#[serde(rename_all = "camelCase")]
pub struct ReportConfiguration {
    /// The number of report sidecar replica containers to deploy.
    #[schemars(range(min = 0))]
    pub replicas: Option<i32>,
    /// The resources allocated to each sidecar replica.
    pub resources: Option<ResourceRequirements>,
}

/// Status of the Cryostat.
/// This is set and managed automatically.
/// Read-only.
#[derive(Deserialize, Serialize, Clone, Default, Debug, JsonSchema, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct CryostatStatus {
    /// Address of the deployed Cryostat web application
    pub application_url: Option<String>,
    /// Name of the Secret containing the generated Grafana credentials
    pub grafana_secret: Option<String>,
    pub conditions: Option<Vec<CryostatCondition>>,
}

#[derive(Deserialize, Serialize, Clone, Default, Debug, JsonSchema, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub struct CryostatCondition {
    /// Last time the condition transitioned from one status to another.
    pub last_transition_time: Option<k8s_openapi::apimachinery::pkg::apis::meta::v1::Time>,

    /// Human-readable message indicating details about last transition.
    pub message: Option<String>,

    /// Unique, one-word, CamelCase reason for the condition's last transition.
    pub reason: Option<String>,

    /// Status is the status of the condition. Can be True, False, Unknown.
    pub status: String,

    /// Type of the condition, known values are (`Ready`).
    pub r#type: String,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn ports_default_when_unset() {
        let spec = CryostatSpec::default();
        assert_eq!(spec.web_port(), 8181);
        assert_eq!(spec.jmx_port(), 9091);
        assert_eq!(spec.grafana_port(), 3000);
    }

    #[test]
    fn ports_follow_service_options() {
        let spec = CryostatSpec {
            service_options: Some(ServiceConfigList {
                core_config: Some(CoreServiceConfig {
                    http_port: Some(8443),
                    jmx_port: Some(9999),
                    ..Default::default()
                }),
                grafana_config: Some(GrafanaServiceConfig {
                    http_port: Some(3443),
                    ..Default::default()
                }),
            }),
            ..Default::default()
        };
        assert_eq!(spec.web_port(), 8443);
        assert_eq!(spec.jmx_port(), 9999);
        assert_eq!(spec.grafana_port(), 3443);
    }

    #[test]
    fn tls_requires_cert_manager() {
        let spec = CryostatSpec::default();
        assert!(spec.tls_enabled(true));
        assert!(!spec.tls_enabled(false));

        let spec = CryostatSpec {
            enable_cert_manager: Some(false),
            ..Default::default()
        };
        assert!(!spec.tls_enabled(true));
    }

    #[test]
    fn minimal_defaults_to_false() {
        let spec: CryostatSpec = serde_json::from_value(json!({})).unwrap();
        assert!(!spec.minimal);
        assert!(spec.trusted_cert_secrets.is_empty());
    }
}
