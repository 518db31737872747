use std::fmt::Debug;

use k8s_openapi::apimachinery::pkg::apis::meta::v1::OwnerReference;
use kube::api::{DeleteParams, Patch, PatchParams};
use kube::{Api, Resource, ResourceExt};
use serde::de::DeserializeOwned;
use serde::Serialize;
use tracing::debug;

use crate::resources::cryostats::CryostatSpec;
use crate::Error;

pub mod certificates;
pub mod console_link;
pub mod deployment;
pub mod networking;
pub mod secrets;
pub mod services;
pub mod storage;

/// One Cryostat deployment, whichever kind of object requested it
pub struct Instance {
    pub name: String,
    pub namespace: String,
    pub oref: OwnerReference,
    pub spec: CryostatSpec,
    /// Whether in-cluster traffic is secured with cert-manager issued certificates
    pub tls: bool,
}

impl Instance {
    /// In-cluster address of one of the instance's Services
    pub fn service_host(&self, service_name: &str) -> String {
        format!("{service_name}.{}.svc", self.namespace)
    }
}

pub async fn apply<K>(api: &Api<K>, namespace: &str, object: K) -> Result<K, Error>
where
    K: Resource<DynamicType = ()> + Clone + Debug + Serialize + DeserializeOwned,
{
    let name = object.name_any();
    let params = PatchParams::apply("cryostat-operator").force();
    debug!("Applying {} {name} in namespace {namespace}", K::kind(&()));
    Ok(api.patch(&name, &params, &Patch::Apply(&object)).await?)
}

pub async fn delete_if_exists<K>(api: &Api<K>, namespace: &str, name: &str) -> Result<(), Error>
where
    K: Resource<DynamicType = ()> + Clone + Debug + DeserializeOwned,
{
    match api.delete(name, &DeleteParams::background()).await {
        Ok(_) => {
            debug!("Deleted {} {name} in namespace {namespace}", K::kind(&()));
            Ok(())
        }
        Err(kube::Error::Api(e)) if e.code == 404 => Ok(()),
        Err(err) => Err(err.into()),
    }
}
