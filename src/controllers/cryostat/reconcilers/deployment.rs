use k8s_openapi::api::apps::v1::{Deployment, DeploymentSpec, DeploymentStatus, DeploymentStrategy};
use k8s_openapi::api::core::v1::{
    Capabilities, ConfigMapProjection, Container, ContainerPort, EnvFromSource, EnvVar,
    EnvVarSource, HTTPGetAction, KeyToPath, PersistentVolumeClaimVolumeSource, PodSecurityContext,
    PodSpec, PodTemplateSpec, Probe, ProjectedVolumeSource, SeccompProfile, SecretEnvSource,
    SecretKeySelector, SecretProjection, SecretVolumeSource, SecurityContext, Volume,
    VolumeMount, VolumeProjection,
};
use k8s_openapi::apimachinery::pkg::apis::meta::v1::ObjectMeta;
use k8s_openapi::apimachinery::pkg::util::intstr::IntOrString;
use kube::Api;
use url::Url;

use crate::controllers::cryostat::controller::Context;
use crate::controllers::Images;
use crate::reconcilers::certificates::ca_certificate_name;
use crate::reconcilers::{component_labels, label_selector, object_meta};
use crate::resources::cryostats::{
    jmx_auth_secret_name, DEFAULT_COMMAND_PORT, DEFAULT_GRAFANA_PORT, DEFAULT_JMX_PORT,
    DEFAULT_WEB_PORT, JMX_AUTH_PASS_KEY, JMX_AUTH_USER_KEY,
};
use crate::Error;

use super::certificates::{tls_secret_name, CERT_MOUNT_ROOT};
use super::networking::ExternalUrls;
use super::secrets::{keystore_secret_name, KEYSTORE_PASS_KEY};
use super::services::grafana_service_name;
use super::{apply, Instance};

const DATA_ROOT: &str = "/opt/cryostat.d";
const TRUSTSTORE_DIR: &str = "/truststore/operator";
const DATASOURCE_PORT: i32 = 8080;
const HEALTH_PATH: &str = "/api/v1/notifications_url";

fn data_dir(name: &str) -> String {
    format!("{DATA_ROOT}/{name}.d")
}

fn env(name: &str, value: impl Into<String>) -> EnvVar {
    EnvVar {
        name: name.into(),
        value: Some(value.into()),
        value_from: None,
    }
}

fn secret_env(name: &str, secret: String, key: &str) -> EnvVar {
    EnvVar {
        name: name.into(),
        value: None,
        value_from: Some(EnvVarSource {
            secret_key_ref: Some(SecretKeySelector {
                name: secret,
                key: key.into(),
                optional: Some(false),
            }),
            ..Default::default()
        }),
    }
}

fn port(name: &str, container_port: i32) -> ContainerPort {
    ContainerPort {
        name: Some(name.into()),
        container_port,
        ..Default::default()
    }
}

fn http_probe(port: i32, path: &str, tls: bool) -> Probe {
    Probe {
        http_get: Some(HTTPGetAction {
            port: IntOrString::Int(port),
            path: Some(path.into()),
            scheme: Some(if tls { "HTTPS" } else { "HTTP" }.into()),
            ..Default::default()
        }),
        ..Default::default()
    }
}

fn restricted() -> SecurityContext {
    SecurityContext {
        allow_privilege_escalation: Some(false),
        capabilities: Some(Capabilities {
            drop: Some(vec!["ALL".into()]),
            add: None,
        }),
        ..Default::default()
    }
}

fn url_host(url: Option<&str>) -> Option<String> {
    Url::parse(url?).ok()?.host_str().map(String::from)
}

fn tls_mount(secret: &str) -> VolumeMount {
    VolumeMount {
        name: format!("{secret}-volume"),
        mount_path: format!("{CERT_MOUNT_ROOT}/{secret}"),
        read_only: Some(true),
        ..Default::default()
    }
}

fn tls_volume(secret: String) -> Volume {
    Volume {
        name: format!("{secret}-volume"),
        secret: Some(SecretVolumeSource {
            secret_name: Some(secret),
            ..Default::default()
        }),
        ..Default::default()
    }
}

/// Where a configured event template lands inside the core container
pub fn template_file_name(config_map: &str, filename: &str) -> String {
    format!("{config_map}_{filename}")
}

fn core_container(
    instance: &Instance,
    image: &str,
    urls: &ExternalUrls,
    mounts: Vec<VolumeMount>,
) -> Container {
    let service_host = instance.service_host(&instance.name);
    let web_host = url_host(urls.core.as_deref()).unwrap_or_else(|| service_host.clone());
    let exposed_with_tls = urls.core.as_deref().is_some_and(|u| u.starts_with("https://"));

    let mut env_vars = vec![
        env("CRYOSTAT_WEB_HOST", web_host),
        env("CRYOSTAT_WEB_PORT", DEFAULT_WEB_PORT.to_string()),
        env(
            "CRYOSTAT_EXT_WEB_PORT",
            match (&urls.core, exposed_with_tls) {
                (Some(_), true) => "443".to_string(),
                (Some(_), false) => "80".to_string(),
                (None, _) => instance.spec.web_port().to_string(),
            },
        ),
        env("CRYOSTAT_LISTEN_PORT", DEFAULT_COMMAND_PORT.to_string()),
        env("CRYOSTAT_RJMX_PORT", DEFAULT_JMX_PORT.to_string()),
        env("CRYOSTAT_CONFIG_PATH", data_dir("conf")),
        env("CRYOSTAT_ARCHIVE_PATH", data_dir("recordings")),
        env("CRYOSTAT_TEMPLATE_PATH", data_dir("templates")),
        env("CRYOSTAT_CLIENTLIB_PATH", data_dir("clientlib")),
        env("SSL_TRUSTSTORE_DIR", TRUSTSTORE_DIR),
        secret_env(
            JMX_AUTH_USER_KEY,
            jmx_auth_secret_name(&instance.name),
            JMX_AUTH_USER_KEY,
        ),
        secret_env(
            JMX_AUTH_PASS_KEY,
            jmx_auth_secret_name(&instance.name),
            JMX_AUTH_PASS_KEY,
        ),
    ];

    if exposed_with_tls {
        env_vars.push(env("CRYOSTAT_SSL_PROXIED", "true"));
    }

    if instance.tls {
        let secret = tls_secret_name(&instance.name);
        env_vars.push(env(
            "KEYSTORE_PATH",
            format!("{CERT_MOUNT_ROOT}/{secret}/keystore.p12"),
        ));
        env_vars.push(secret_env(
            "KEYSTORE_PASS",
            keystore_secret_name(&instance.name),
            KEYSTORE_PASS_KEY,
        ));
    } else {
        env_vars.push(env("CRYOSTAT_DISABLE_SSL", "true"));
    }

    if !instance.spec.minimal {
        env_vars.push(env(
            "GRAFANA_DATASOURCE_URL",
            format!("http://127.0.0.1:{DATASOURCE_PORT}"),
        ));
        let dashboard = urls.grafana.clone().unwrap_or_else(|| {
            let scheme = if instance.tls { "https" } else { "http" };
            let host = instance.service_host(&grafana_service_name(&instance.name));
            format!("{scheme}://{host}:{}", instance.spec.grafana_port())
        });
        env_vars.push(env("GRAFANA_DASHBOARD_URL", dashboard));
    }

    Container {
        name: instance.name.clone(),
        image: Some(image.into()),
        image_pull_policy: Some("IfNotPresent".into()),
        env: Some(env_vars),
        ports: Some(vec![
            port("http", DEFAULT_WEB_PORT),
            port("cmdchan", DEFAULT_COMMAND_PORT),
            port("jfr-jmx", DEFAULT_JMX_PORT),
        ]),
        liveness_probe: Some(http_probe(DEFAULT_WEB_PORT, HEALTH_PATH, instance.tls)),
        startup_probe: Some(Probe {
            failure_threshold: Some(18),
            ..http_probe(DEFAULT_WEB_PORT, HEALTH_PATH, instance.tls)
        }),
        security_context: Some(restricted()),
        volume_mounts: Some(mounts),
        ..Default::default()
    }
}

fn grafana_container(instance: &Instance, image: &str, grafana_secret: Option<&str>) -> Container {
    let mut env_vars = vec![
        env(
            "JFR_DATASOURCE_URL",
            format!("http://127.0.0.1:{DATASOURCE_PORT}"),
        ),
        env("GF_AUTH_ANONYMOUS_ENABLED", "true"),
    ];
    let mut mounts = Vec::new();

    if instance.tls {
        let secret = tls_secret_name(&grafana_service_name(&instance.name));
        env_vars.push(env("GF_SERVER_PROTOCOL", "https"));
        env_vars.push(env(
            "GF_SERVER_CERT_FILE",
            format!("{CERT_MOUNT_ROOT}/{secret}/tls.crt"),
        ));
        env_vars.push(env(
            "GF_SERVER_CERT_KEY",
            format!("{CERT_MOUNT_ROOT}/{secret}/tls.key"),
        ));
        mounts.push(tls_mount(&secret));
    }

    Container {
        name: format!("{}-grafana", instance.name),
        image: Some(image.into()),
        image_pull_policy: Some("IfNotPresent".into()),
        env: Some(env_vars),
        env_from: grafana_secret.map(|name| {
            vec![EnvFromSource {
                secret_ref: Some(SecretEnvSource {
                    name: name.into(),
                    optional: Some(false),
                }),
                ..Default::default()
            }]
        }),
        ports: Some(vec![port("http", DEFAULT_GRAFANA_PORT)]),
        liveness_probe: Some(http_probe(DEFAULT_GRAFANA_PORT, "/api/health", instance.tls)),
        security_context: Some(restricted()),
        volume_mounts: (!mounts.is_empty()).then_some(mounts),
        ..Default::default()
    }
}

fn datasource_container(instance: &Instance, image: &str) -> Container {
    Container {
        name: format!("{}-jfr-datasource", instance.name),
        image: Some(image.into()),
        image_pull_policy: Some("IfNotPresent".into()),
        env: Some(vec![env("LISTEN_HOST", "127.0.0.1")]),
        ports: Some(vec![port("http", DATASOURCE_PORT)]),
        security_context: Some(restricted()),
        ..Default::default()
    }
}

fn cryostat_deployment(
    instance: &Instance,
    images: &Images,
    urls: &ExternalUrls,
    grafana_secret: Option<&str>,
) -> Deployment {
    let metadata = object_meta(&instance.oref, &instance.name);

    let mut volumes = vec![Volume {
        name: instance.name.clone(),
        persistent_volume_claim: Some(PersistentVolumeClaimVolumeSource {
            claim_name: instance.name.clone(),
            read_only: None,
        }),
        ..Default::default()
    }];
    let mut mounts: Vec<VolumeMount> = ["recordings", "templates", "clientlib", "conf"]
        .into_iter()
        .map(|dir| VolumeMount {
            name: instance.name.clone(),
            mount_path: data_dir(dir),
            sub_path: Some(if dir == "recordings" { "flightrecordings" } else { dir }.into()),
            ..Default::default()
        })
        .collect();

    let mut trusted: Vec<VolumeProjection> = instance
        .spec
        .trusted_cert_secrets
        .iter()
        .map(|cert| {
            let key = cert.certificate_key.as_deref().unwrap_or("tls.crt");
            VolumeProjection {
                secret: Some(SecretProjection {
                    name: cert.secret_name.clone(),
                    items: Some(vec![KeyToPath {
                        key: key.into(),
                        path: format!("{}_{key}", cert.secret_name),
                        mode: None,
                    }]),
                    optional: None,
                }),
                ..Default::default()
            }
        })
        .collect();

    if instance.tls {
        let secret = tls_secret_name(&instance.name);
        mounts.push(tls_mount(&secret));
        volumes.push(tls_volume(secret));

        let ca = ca_certificate_name(&instance.name);
        trusted.push(VolumeProjection {
            secret: Some(SecretProjection {
                name: ca.clone(),
                items: Some(vec![KeyToPath {
                    key: "ca.crt".into(),
                    path: format!("{ca}_ca.crt"),
                    mode: None,
                }]),
                optional: None,
            }),
            ..Default::default()
        });

        if !instance.spec.minimal {
            volumes.push(tls_volume(tls_secret_name(&grafana_service_name(&instance.name))));
        }
    }

    if !trusted.is_empty() {
        volumes.push(Volume {
            name: "cert-secrets".into(),
            projected: Some(ProjectedVolumeSource {
                sources: Some(trusted),
                default_mode: None,
            }),
            ..Default::default()
        });
        mounts.push(VolumeMount {
            name: "cert-secrets".into(),
            mount_path: TRUSTSTORE_DIR.into(),
            read_only: Some(true),
            ..Default::default()
        });
    }

    let templates = &instance.spec.event_templates;
    if !templates.is_empty() {
        volumes.push(Volume {
            name: "template-files".into(),
            projected: Some(ProjectedVolumeSource {
                sources: Some(
                    templates
                        .iter()
                        .map(|t| VolumeProjection {
                            config_map: Some(ConfigMapProjection {
                                name: t.config_map_name.clone(),
                                items: Some(vec![KeyToPath {
                                    key: t.filename.clone(),
                                    path: template_file_name(&t.config_map_name, &t.filename),
                                    mode: None,
                                }]),
                                optional: None,
                            }),
                            ..Default::default()
                        })
                        .collect(),
                ),
                default_mode: None,
            }),
            ..Default::default()
        });
        // mounted file by file so the templates on the claim stay visible
        mounts.extend(templates.iter().map(|t| {
            let file = template_file_name(&t.config_map_name, &t.filename);
            VolumeMount {
                name: "template-files".into(),
                mount_path: format!("{}/{file}", data_dir("templates")),
                sub_path: Some(file),
                read_only: Some(true),
                ..Default::default()
            }
        }));
    }

    let mut containers = vec![core_container(instance, &images.core, urls, mounts)];
    if !instance.spec.minimal {
        containers.push(grafana_container(instance, &images.grafana, grafana_secret));
        containers.push(datasource_container(instance, &images.datasource));
    }

    Deployment {
        metadata,
        spec: Some(DeploymentSpec {
            replicas: Some(1),
            selector: label_selector(&instance.name, "cryostat"),
            // the claim is ReadWriteOnce
            strategy: Some(DeploymentStrategy {
                type_: Some("Recreate".into()),
                rolling_update: None,
            }),
            template: PodTemplateSpec {
                metadata: Some(ObjectMeta {
                    labels: Some(component_labels(&instance.name, "cryostat")),
                    ..Default::default()
                }),
                spec: Some(PodSpec {
                    containers,
                    volumes: Some(volumes),
                    security_context: Some(PodSecurityContext {
                        run_as_non_root: Some(true),
                        seccomp_profile: Some(SeccompProfile {
                            type_: "RuntimeDefault".into(),
                            localhost_profile: None,
                        }),
                        ..Default::default()
                    }),
                    ..Default::default()
                }),
            },
            ..Default::default()
        }),
        status: None,
    }
}

fn validate_deployment_status(status: Option<&DeploymentStatus>) -> Result<(), Error> {
    let Some(status) = status else {
        return Err(Error::NotReady {
            reason: "DeploymentNoStatus".into(),
            message: "Deployment has no status set; it may have just been created".into(),
            requeue_after: None,
        });
    };

    let available = status.available_replicas.unwrap_or(0);
    if available < 1 {
        return Err(Error::NotReady {
            reason: "DeploymentNotAvailable".into(),
            message: "Deployment has no available replicas yet".into(),
            requeue_after: None,
        });
    }

    Ok(())
}

/// Applies the Deployment running Cryostat and, in full mode, Grafana and jfr-datasource.
/// Fails with [`Error::NotReady`] until a replica is available.
pub async fn reconcile_deployment(
    ctx: &Context,
    instance: &Instance,
    urls: &ExternalUrls,
    grafana_secret: Option<&str>,
) -> Result<(), Error> {
    let api: Api<Deployment> = Api::namespaced(ctx.client.clone(), &instance.namespace);
    let deployment = cryostat_deployment(instance, &ctx.images, urls, grafana_secret);
    let deployment = apply(&api, &instance.namespace, deployment).await?;
    validate_deployment_status(deployment.status.as_ref())
}
