use std::fmt;
use std::net::IpAddr;

use k8s_openapi::api::core::v1::Pod;
use kube::ResourceExt;

use crate::{Error, Result};

/// A JMX service URL that Cryostat can connect to
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct TargetAddress(String);

impl TargetAddress {
    pub fn new(host: &str, port: i32) -> Self {
        let host = match host.parse::<IpAddr>() {
            Ok(IpAddr::V6(_)) => format!("[{host}]"),
            _ => host.to_string(),
        };
        Self(format!("service:jmx:rmi:///jndi/rmi://{host}:{port}/jmxrmi"))
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for TargetAddress {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

/// Resolves the address of the JVM in `pod` listening for JMX on `jmx_port`.
/// Fails with [`Error::TargetUnavailable`] until the pod has been assigned an IP.
pub fn pod_target(pod: &Pod, jmx_port: i32) -> Result<TargetAddress> {
    pod.status
        .as_ref()
        .and_then(|s| s.pod_ip.as_deref())
        .filter(|ip| !ip.is_empty())
        .map(|ip| TargetAddress::new(ip, jmx_port))
        .ok_or_else(|| Error::TargetUnavailable(pod.name_any()))
}

#[cfg(test)]
mod tests {
    use super::*;
    use k8s_openapi::api::core::v1::PodStatus;
    use kube::api::ObjectMeta;

    fn pod(ip: Option<&str>) -> Pod {
        Pod {
            metadata: ObjectMeta {
                name: Some("app-7d4b9".into()),
                ..Default::default()
            },
            status: Some(PodStatus {
                pod_ip: ip.map(String::from),
                ..Default::default()
            }),
            ..Default::default()
        }
    }

    #[test]
    fn pod_with_ip_resolves() {
        let target = pod_target(&pod(Some("10.0.0.12")), 9091).unwrap();
        assert_eq!(
            target.as_str(),
            "service:jmx:rmi:///jndi/rmi://10.0.0.12:9091/jmxrmi"
        );
    }

    #[test]
    fn ipv6_hosts_are_bracketed() {
        let target = pod_target(&pod(Some("fd00::12")), 9091).unwrap();
        assert_eq!(
            target.as_str(),
            "service:jmx:rmi:///jndi/rmi://[fd00::12]:9091/jmxrmi"
        );
    }

    #[test]
    fn pod_without_ip_is_unavailable() {
        for pod in [pod(None), pod(Some("")), Pod::default()] {
            assert!(matches!(
                pod_target(&pod, 9091),
                Err(Error::TargetUnavailable(_))
            ));
        }
    }
}
