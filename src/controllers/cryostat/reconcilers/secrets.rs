use std::collections::BTreeMap;

use k8s_openapi::api::core::v1::Secret;
use kube::api::PostParams;
use kube::Api;
use rand::distributions::Alphanumeric;
use rand::Rng;
use tracing::debug;

use crate::controllers::cryostat::controller::Context;
use crate::reconcilers::object_meta;
use crate::resources::cryostats::{jmx_auth_secret_name, JMX_AUTH_PASS_KEY, JMX_AUTH_USER_KEY};
use crate::Error;

use super::{delete_if_exists, Instance};

pub const GRAFANA_USER_KEY: &str = "GF_SECURITY_ADMIN_USER";
pub const GRAFANA_PASS_KEY: &str = "GF_SECURITY_ADMIN_PASSWORD";
pub const KEYSTORE_PASS_KEY: &str = "KEYSTORE_PASS";

pub fn grafana_secret_name(instance: &str) -> String {
    format!("{instance}-grafana-basic")
}

pub fn keystore_secret_name(instance: &str) -> String {
    format!("{instance}-keystore")
}

fn random_password() -> String {
    rand::thread_rng()
        .sample_iter(&Alphanumeric)
        .take(20)
        .map(char::from)
        .collect()
}

fn generated_secret(instance: &Instance, name: String, data: &[(&str, String)]) -> Secret {
    Secret {
        metadata: object_meta(&instance.oref, &name),
        string_data: Some(
            data.iter()
                .map(|(k, v)| (k.to_string(), v.clone()))
                .collect::<BTreeMap<_, _>>(),
        ),
        ..Default::default()
    }
}

/// Creates the Secret unless it already exists; generated credentials are never rotated
async fn ensure_secret(api: &Api<Secret>, namespace: &str, secret: Secret) -> Result<(), Error> {
    let name = secret.metadata.name.clone().unwrap_or_default();
    if api.get_metadata_opt(&name).await?.is_some() {
        return Ok(());
    }

    debug!("Creating Secret {name} in namespace {namespace}");
    match api.create(&PostParams::default(), &secret).await {
        Ok(_) => Ok(()),
        Err(kube::Error::Api(e)) if e.code == 409 => Ok(()),
        Err(err) => Err(err.into()),
    }
}

/// Password protecting the PKCS12 keystore cert-manager writes for the core container
pub async fn reconcile_keystore_secret(ctx: &Context, instance: &Instance) -> Result<(), Error> {
    let api: Api<Secret> = Api::namespaced(ctx.client.clone(), &instance.namespace);
    ensure_secret(
        &api,
        &instance.namespace,
        generated_secret(
            instance,
            keystore_secret_name(&instance.name),
            &[(KEYSTORE_PASS_KEY, random_password())],
        ),
    )
    .await
}

/// Returns the name of the Secret with the Grafana credentials, if Grafana is deployed
pub async fn reconcile_secrets(ctx: &Context, instance: &Instance) -> Result<Option<String>, Error> {
    let api: Api<Secret> = Api::namespaced(ctx.client.clone(), &instance.namespace);

    ensure_secret(
        &api,
        &instance.namespace,
        generated_secret(
            instance,
            jmx_auth_secret_name(&instance.name),
            &[
                (JMX_AUTH_USER_KEY, "cryostat".into()),
                (JMX_AUTH_PASS_KEY, random_password()),
            ],
        ),
    )
    .await?;

    let grafana = grafana_secret_name(&instance.name);
    if instance.spec.minimal {
        delete_if_exists(&api, &instance.namespace, &grafana).await?;
        return Ok(None);
    }

    ensure_secret(
        &api,
        &instance.namespace,
        generated_secret(
            instance,
            grafana.clone(),
            &[
                (GRAFANA_USER_KEY, "admin".into()),
                (GRAFANA_PASS_KEY, random_password()),
            ],
        ),
    )
    .await?;

    Ok(Some(grafana))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::controllers::cryostat::reconcilers::tests::instance;
    use crate::test_utils::mock_client;
    use http::Method;
    use serde_json::json;

    #[test]
    fn passwords_are_random_and_alphanumeric() {
        let a = random_password();
        let b = random_password();
        assert_eq!(a.len(), 20);
        assert!(a.chars().all(|c| c.is_ascii_alphanumeric()));
        assert_ne!(a, b);
    }

    #[tokio::test]
    async fn existing_secrets_are_left_alone() {
        let (client, mut server) = mock_client();
        let verifier = tokio::spawn(async move {
            server
                .expect_get("/api/v1/namespaces/default/secrets/cryostat-sample-jmx-auth")
                .await
                .json(json!({
                    "apiVersion": "meta.k8s.io/v1",
                    "kind": "PartialObjectMetadata",
                    "metadata": { "name": "cryostat-sample-jmx-auth", "namespace": "default" }
                }));
            server.expect_no_more().await;
        });

        let api: Api<Secret> = Api::namespaced(client, "default");
        let instance = instance(true, false);
        let secret = generated_secret(
            &instance,
            jmx_auth_secret_name(&instance.name),
            &[(JMX_AUTH_PASS_KEY, random_password())],
        );
        ensure_secret(&api, "default", secret).await.unwrap();
        verifier.await.unwrap();
    }

    #[tokio::test]
    async fn missing_secrets_are_created_with_generated_credentials() {
        let (client, mut server) = mock_client();
        let verifier = tokio::spawn(async move {
            server
                .expect_get("/api/v1/namespaces/default/secrets/cryostat-sample-jmx-auth")
                .await
                .not_found();

            let create = server
                .expect(Method::POST, "/api/v1/namespaces/default/secrets")
                .await;
            let body = create.body_json();
            assert_eq!(body["metadata"]["name"], "cryostat-sample-jmx-auth");
            assert_eq!(body["metadata"]["ownerReferences"][0]["kind"], "Cryostat");
            assert_eq!(body["stringData"][JMX_AUTH_USER_KEY], "cryostat");
            assert_eq!(
                body["stringData"][JMX_AUTH_PASS_KEY].as_str().map(str::len),
                Some(20)
            );
            create.created(body);
        });

        let api: Api<Secret> = Api::namespaced(client, "default");
        let instance = instance(true, false);
        let secret = generated_secret(
            &instance,
            jmx_auth_secret_name(&instance.name),
            &[
                (JMX_AUTH_USER_KEY, "cryostat".into()),
                (JMX_AUTH_PASS_KEY, random_password()),
            ],
        );
        ensure_secret(&api, "default", secret).await.unwrap();
        verifier.await.unwrap();
    }
}
