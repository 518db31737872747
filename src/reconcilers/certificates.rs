use k8s_openapi::api::core::v1::Secret;
use kube::{Api, Client};
use tracing::debug;

use crate::resources::certmanager::Certificate;
use crate::{Error, Result};

pub const CA_CERT_KEY: &str = "ca.crt";

pub fn ca_certificate_name(cryostat_name: &str) -> String {
    format!("{cryostat_name}-ca")
}

/// Returns the PEM bytes of the CA that signs the certificates of a Cryostat instance.
///
/// A missing or not yet Ready CA Certificate, or a missing Secret, is reported as
/// [`Error::CertNotReady`] so that callers can requeue rather than fail.
pub async fn ca_bytes(client: &Client, namespace: &str, cryostat_name: &str) -> Result<Vec<u8>> {
    let name = ca_certificate_name(cryostat_name);

    let certificates: Api<Certificate> = Api::namespaced(client.clone(), namespace);
    let certificate = match certificates.get_opt(&name).await? {
        Some(certificate) if certificate.is_ready() => certificate,
        Some(_) | None => {
            debug!("Certificate {name} in namespace {namespace} is not ready");
            return Err(Error::CertNotReady(name));
        }
    };

    let secret_name = certificate.spec.secret_name;
    let secrets: Api<Secret> = Api::namespaced(client.clone(), namespace);
    let Some(secret) = secrets.get_opt(&secret_name).await? else {
        debug!("Secret {secret_name} of Certificate {name} does not exist yet");
        return Err(Error::CertNotReady(name));
    };

    secret
        .data
        .and_then(|mut data| data.remove(CA_CERT_KEY))
        .map(|bytes| bytes.0)
        .ok_or_else(|| Error::MissingObjectKey(secret_name, CA_CERT_KEY.into()))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::test_utils::mock_client;
    use serde_json::json;

    fn certificate(ready: &str) -> serde_json::Value {
        json!({
            "apiVersion": "cert-manager.io/v1",
            "kind": "Certificate",
            "metadata": { "name": "cryostat-sample-ca", "namespace": "default" },
            "spec": {
                "secretName": "cryostat-sample-ca",
                "issuerRef": { "name": "cryostat-sample-self-signed" },
                "isCA": true
            },
            "status": { "conditions": [{ "type": "Ready", "status": ready }] }
        })
    }

    #[tokio::test]
    async fn missing_certificate_is_not_ready() {
        let (client, mut server) = mock_client();
        let verifier = tokio::spawn(async move {
            server
                .expect_get("/apis/cert-manager.io/v1/namespaces/default/certificates/cryostat-sample-ca")
                .await
                .not_found();
        });

        let err = ca_bytes(&client, "default", "cryostat-sample")
            .await
            .unwrap_err();
        assert!(matches!(err, Error::CertNotReady(name) if name == "cryostat-sample-ca"));
        verifier.await.unwrap();
    }

    #[tokio::test]
    async fn unready_certificate_is_not_ready() {
        let (client, mut server) = mock_client();
        let verifier = tokio::spawn(async move {
            server
                .expect_get("/apis/cert-manager.io/v1/namespaces/default/certificates/cryostat-sample-ca")
                .await
                .json(certificate("False"));
        });

        let err = ca_bytes(&client, "default", "cryostat-sample")
            .await
            .unwrap_err();
        assert!(matches!(err, Error::CertNotReady(_)));
        verifier.await.unwrap();
    }

    #[tokio::test]
    async fn missing_secret_is_not_ready() {
        let (client, mut server) = mock_client();
        let verifier = tokio::spawn(async move {
            server
                .expect_get("/apis/cert-manager.io/v1/namespaces/default/certificates/cryostat-sample-ca")
                .await
                .json(certificate("True"));
            server
                .expect_get("/api/v1/namespaces/default/secrets/cryostat-sample-ca")
                .await
                .not_found();
        });

        let err = ca_bytes(&client, "default", "cryostat-sample")
            .await
            .unwrap_err();
        assert!(matches!(err, Error::CertNotReady(_)));
        verifier.await.unwrap();
    }

    #[tokio::test]
    async fn ready_certificate_returns_ca() {
        let (client, mut server) = mock_client();
        let verifier = tokio::spawn(async move {
            server
                .expect_get("/apis/cert-manager.io/v1/namespaces/default/certificates/cryostat-sample-ca")
                .await
                .json(certificate("True"));
            server
                .expect_get("/api/v1/namespaces/default/secrets/cryostat-sample-ca")
                .await
                .json(json!({
                    "apiVersion": "v1",
                    "kind": "Secret",
                    "metadata": { "name": "cryostat-sample-ca", "namespace": "default" },
                    // "-----BEGIN CERTIFICATE-----"
                    "data": { "ca.crt": "LS0tLS1CRUdJTiBDRVJUSUZJQ0FURS0tLS0t" }
                }));
        });

        let ca = ca_bytes(&client, "default", "cryostat-sample").await.unwrap();
        assert_eq!(ca, b"-----BEGIN CERTIFICATE-----".to_vec());
        verifier.await.unwrap();
    }

    #[tokio::test]
    async fn api_errors_propagate() {
        let (client, mut server) = mock_client();
        let verifier = tokio::spawn(async move {
            server
                .expect_get("/apis/cert-manager.io/v1/namespaces/default/certificates/cryostat-sample-ca")
                .await
                .status(403, "Forbidden");
        });

        let err = ca_bytes(&client, "default", "cryostat-sample")
            .await
            .unwrap_err();
        assert!(matches!(err, Error::KubeError(_)));
        verifier.await.unwrap();
    }
}

