use kube::Api;
use tokio::time::Duration;

use crate::controllers::cryostat::controller::Context;
use crate::reconcilers::certificates::{ca_bytes, ca_certificate_name};
use crate::reconcilers::object_meta;
use crate::resources::certmanager::{
    CAIssuer, Certificate, CertificateKeystores, CertificateSpec, Issuer, IssuerReference,
    IssuerSpec, PKCS12Keystore, SecretKeySelector, SelfSignedIssuer,
};
use crate::Error;

use super::secrets::{keystore_secret_name, reconcile_keystore_secret, KEYSTORE_PASS_KEY};
use super::services::grafana_service_name;
use super::{apply, delete_if_exists, Instance};

/// Directory certificate secrets are mounted under
pub const CERT_MOUNT_ROOT: &str = "/var/run/secrets/operator.cryostat.io";

pub fn tls_secret_name(certificate: &str) -> String {
    format!("{certificate}-tls")
}

fn self_signed_issuer_name(instance: &str) -> String {
    format!("{instance}-self-signed")
}

fn self_signed_issuer(instance: &Instance) -> Issuer {
    let name = self_signed_issuer_name(&instance.name);
    let mut issuer = Issuer::new(
        &name,
        IssuerSpec {
            self_signed: Some(SelfSignedIssuer {}),
            ca: None,
        },
    );
    issuer.metadata = object_meta(&instance.oref, &name);
    issuer
}

fn ca_issuer(instance: &Instance) -> Issuer {
    let name = ca_certificate_name(&instance.name);
    let mut issuer = Issuer::new(
        &name,
        IssuerSpec {
            self_signed: None,
            ca: Some(CAIssuer {
                secret_name: name.clone(),
            }),
        },
    );
    issuer.metadata = object_meta(&instance.oref, &name);
    issuer
}

fn issuer_ref(name: String) -> IssuerReference {
    IssuerReference {
        name,
        kind: Some("Issuer".into()),
        group: Some("cert-manager.io".into()),
    }
}

fn ca_certificate(instance: &Instance) -> Certificate {
    let name = ca_certificate_name(&instance.name);
    let mut certificate = Certificate::new(
        &name,
        CertificateSpec {
            common_name: Some(format!("ca.{}.cert-manager", instance.name)),
            secret_name: name.clone(),
            issuer_ref: issuer_ref(self_signed_issuer_name(&instance.name)),
            is_ca: true,
            ..Default::default()
        },
    );
    certificate.metadata = object_meta(&instance.oref, &name);
    certificate
}

fn service_certificate(instance: &Instance, service: &str, keystore: bool) -> Certificate {
    let host = instance.service_host(service);
    let mut certificate = Certificate::new(
        service,
        CertificateSpec {
            common_name: Some(host.clone()),
            dns_names: vec![
                service.to_string(),
                host.clone(),
                format!("{host}.cluster.local"),
            ],
            secret_name: tls_secret_name(service),
            issuer_ref: issuer_ref(ca_certificate_name(&instance.name)),
            keystores: keystore.then(|| CertificateKeystores {
                pkcs12: Some(PKCS12Keystore {
                    create: true,
                    password_secret_ref: SecretKeySelector {
                        name: keystore_secret_name(&instance.name),
                        key: KEYSTORE_PASS_KEY.into(),
                    },
                }),
            }),
            usages: vec![
                "digital signature".into(),
                "key encipherment".into(),
                "server auth".into(),
                "client auth".into(),
            ],
            ..Default::default()
        },
    );
    certificate.metadata = object_meta(&instance.oref, service);
    certificate
}

/// Sets up a private CA and the certificates securing the instance's components.
/// Fails with [`Error::NotReady`] until cert-manager has issued all of them.
/// Returns the CA in PEM form.
pub async fn reconcile_certificates(ctx: &Context, instance: &Instance) -> Result<Vec<u8>, Error> {
    let namespace = &instance.namespace;
    let issuers: Api<Issuer> = Api::namespaced(ctx.client.clone(), namespace);
    let certificates: Api<Certificate> = Api::namespaced(ctx.client.clone(), namespace);

    reconcile_keystore_secret(ctx, instance).await?;

    apply(&issuers, namespace, self_signed_issuer(instance)).await?;
    let mut issued = vec![apply(&certificates, namespace, ca_certificate(instance)).await?];
    apply(&issuers, namespace, ca_issuer(instance)).await?;

    let core = service_certificate(instance, &instance.name, true);
    issued.push(apply(&certificates, namespace, core).await?);

    let grafana = grafana_service_name(&instance.name);
    if instance.spec.minimal {
        delete_if_exists(&certificates, namespace, &grafana).await?;
    } else {
        let grafana = service_certificate(instance, &grafana, false);
        issued.push(apply(&certificates, namespace, grafana).await?);
    }

    let pending: Vec<String> = issued
        .iter()
        .filter(|c| !c.is_ready())
        .filter_map(|c| c.metadata.name.clone())
        .collect();
    if !pending.is_empty() {
        return Err(Error::NotReady {
            reason: "CertificatesNotReady".into(),
            message: format!("Waiting for cert-manager to issue {}", pending.join(", ")),
            requeue_after: Some(Duration::from_secs(5)),
        });
    }

    match ca_bytes(&ctx.client, namespace, &instance.name).await {
        Ok(ca) => Ok(ca),
        Err(Error::CertNotReady(certificate)) => Err(Error::NotReady {
            reason: "CertificatesNotReady".into(),
            message: format!("Waiting for the keypair of {certificate}"),
            requeue_after: Some(Duration::from_secs(5)),
        }),
        Err(err) => Err(err),
    }
}
