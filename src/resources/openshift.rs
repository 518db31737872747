use kube::CustomResource;
use schemars::JsonSchema;
use serde::{Deserialize, Serialize};

/// OpenShift Route exposing a Service outside the cluster
/// API: route.openshift.io/v1
#[derive(CustomResource, Serialize, Deserialize, Clone, Debug, Default, JsonSchema)]
#[kube(
    group = "route.openshift.io",
    version = "v1",
    kind = "Route",
    namespaced
)]
#[kube(status = "RouteStatus")]
pub struct RouteSpec {
    /// Left empty so that the router assigns a host
    #[serde(skip_serializing_if = "Option::is_none")]
    pub host: Option<String>,

    pub to: RouteTargetReference,

    #[serde(skip_serializing_if = "Option::is_none")]
    pub port: Option<RoutePort>,

    #[serde(skip_serializing_if = "Option::is_none")]
    pub tls: Option<TLSConfig>,
}

#[derive(Serialize, Deserialize, Clone, Debug, Default, JsonSchema)]
pub struct RouteTargetReference {
    pub kind: String,
    pub name: String,
}

#[derive(Serialize, Deserialize, Clone, Debug, Default, JsonSchema)]
#[serde(rename_all = "camelCase")]
pub struct RoutePort {
    pub target_port: String,
}

#[derive(Serialize, Deserialize, Clone, Debug, Default, JsonSchema)]
#[serde(rename_all = "camelCase")]
pub struct TLSConfig {
    /// edge, passthrough or reencrypt
    pub termination: String,

    #[serde(skip_serializing_if = "Option::is_none")]
    pub insecure_edge_termination_policy: Option<String>,

    #[serde(skip_serializing_if = "Option::is_none")]
    pub destination_ca_certificate: Option<String>,
}

#[derive(Serialize, Deserialize, Clone, Debug, Default, JsonSchema)]
pub struct RouteStatus {
    #[serde(default)]
    pub ingress: Vec<RouteIngress>,
}

#[derive(Serialize, Deserialize, Clone, Debug, Default, JsonSchema)]
#[serde(rename_all = "camelCase")]
pub struct RouteIngress {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub host: Option<String>,

    #[serde(skip_serializing_if = "Option::is_none")]
    pub router_name: Option<String>,
}

impl Route {
    /// The host the router admitted, once there is one
    pub fn admitted_host(&self) -> Option<&str> {
        self.status
            .as_ref()?
            .ingress
            .iter()
            .find_map(|i| i.host.as_deref())
            .filter(|h| !h.is_empty())
    }
}

/// Link shown in the OpenShift web console
/// API: console.openshift.io/v1
#[derive(CustomResource, Serialize, Deserialize, Clone, Debug, Default, JsonSchema)]
#[kube(
    group = "console.openshift.io",
    version = "v1",
    kind = "ConsoleLink"
)]
#[serde(rename_all = "camelCase")]
pub struct ConsoleLinkSpec {
    pub text: String,
    pub href: String,
    pub location: String,

    #[serde(skip_serializing_if = "Option::is_none")]
    pub namespace_dashboard: Option<NamespaceDashboardSpec>,
}

#[derive(Serialize, Deserialize, Clone, Debug, Default, JsonSchema)]
pub struct NamespaceDashboardSpec {
    #[serde(default)]
    pub namespaces: Vec<String>,
}
