use std::path::PathBuf;
use std::sync::Arc;

use async_trait::async_trait;
use k8s_openapi::api::core::v1::Secret;
use kube::{Api, Client, ResourceExt};
use tracing::debug;
use url::Url;

use super::{CryostatClient, RecordingClient, RecordingClientFactory};
use crate::reconcilers::certificates;
use crate::resources::cryostats::Cryostat;
use crate::resources::flightrecorders::JMXAuthSecret;
use crate::{Error, Metrics, Result};

/// Connects to Cryostat through its in-cluster Service, authenticating with the
/// operator's service account token
pub struct DefaultClientFactory {
    client: Client,
    token_path: PathBuf,
    cert_manager_installed: bool,
    metrics: Metrics,
}

impl DefaultClientFactory {
    pub fn new(
        client: Client,
        token_path: PathBuf,
        cert_manager_installed: bool,
        metrics: Metrics,
    ) -> Self {
        Self {
            client,
            token_path,
            cert_manager_installed,
            metrics,
        }
    }

    async fn jmx_credentials(
        &self,
        namespace: &str,
        credentials: &JMXAuthSecret,
    ) -> Result<(String, String)> {
        let secrets: Api<Secret> = Api::namespaced(self.client.clone(), namespace);
        let secret = secrets.get(&credentials.secret_name).await?;
        let value = |key: &str| {
            secret
                .data
                .as_ref()
                .and_then(|data| data.get(key))
                .map(|bytes| String::from_utf8_lossy(&bytes.0).into_owned())
                .ok_or_else(|| Error::MissingObjectKey(credentials.secret_name.clone(), key.into()))
        };
        Ok((
            value(credentials.username_key())?,
            value(credentials.password_key())?,
        ))
    }
}

pub fn service_url(cryostat: &Cryostat, namespace: &str, tls: bool) -> Result<Url> {
    let scheme = if tls { "https" } else { "http" };
    Ok(Url::parse(&format!(
        "{scheme}://{}.{namespace}.svc:{}/",
        cryostat.name_any(),
        cryostat.spec.web_port()
    ))?)
}

#[async_trait]
impl RecordingClientFactory for DefaultClientFactory {
    async fn client_for(
        &self,
        cryostat: &Cryostat,
        jmx_credentials: Option<&JMXAuthSecret>,
    ) -> Result<Arc<dyn RecordingClient>> {
        let name = cryostat.name_any();
        let namespace = cryostat
            .namespace()
            .ok_or_else(|| Error::CryostatNotFound(name.clone()))?;
        let tls = cryostat.spec.tls_enabled(self.cert_manager_installed);

        let mut http_client = reqwest::Client::builder();
        if tls {
            let ca = certificates::ca_bytes(&self.client, &namespace, &name).await?;
            let ca = reqwest::Certificate::from_pem(&ca)
                .map_err(|e| Error::InvalidTlsMaterial(e.to_string()))?;
            http_client = http_client.add_root_certificate(ca);
        }
        let http_client = http_client
            .build()
            .map_err(|e| Error::InvalidTlsMaterial(e.to_string()))?;

        let token = tokio::fs::read_to_string(&self.token_path)
            .await
            .map_err(Error::TokenUnavailable)?;

        let base_url = service_url(cryostat, &namespace, tls)?;
        debug!("Connecting to Cryostat at {base_url}");
        let mut client = CryostatClient::new(
            base_url,
            http_client,
            token.trim().to_string(),
            self.metrics.clone(),
        );

        if let Some(credentials) = jmx_credentials {
            let (username, password) = self.jmx_credentials(&namespace, credentials).await?;
            client = client.with_jmx_credentials(&username, &password);
        }

        Ok(Arc::new(client))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::resources::cryostats::{CoreServiceConfig, CryostatSpec, ServiceConfigList};

    #[test]
    fn service_url_follows_tls_and_port() {
        let mut cryostat = Cryostat::new("cryostat-sample", CryostatSpec::default());
        assert_eq!(
            service_url(&cryostat, "default", true).unwrap().as_str(),
            "https://cryostat-sample.default.svc:8181/"
        );

        cryostat.spec.service_options = Some(ServiceConfigList {
            core_config: Some(CoreServiceConfig {
                http_port: Some(8080),
                ..Default::default()
            }),
            ..Default::default()
        });
        assert_eq!(
            service_url(&cryostat, "default", false).unwrap().as_str(),
            "http://cryostat-sample.default.svc:8080/"
        );
    }
}
