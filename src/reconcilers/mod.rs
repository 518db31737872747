use std::collections::BTreeMap;

use k8s_openapi::apimachinery::pkg::apis::meta::v1::{LabelSelector, ObjectMeta, OwnerReference};

pub mod certificates;
pub mod duration_parser;
pub mod targets;

pub fn resource_labels(instance: &str) -> BTreeMap<String, String> {
    BTreeMap::from([
        ("app.kubernetes.io/name".into(), "cryostat".into()),
        ("app.kubernetes.io/instance".into(), instance.into()),
        ("app.kubernetes.io/managed-by".into(), "cryostat-operator".into()),
    ])
}

/// Labels identifying one component of a Cryostat instance
pub fn component_labels(instance: &str, component: &str) -> BTreeMap<String, String> {
    let mut labels = resource_labels(instance);
    labels.insert("component".into(), component.into());
    labels
}

pub fn label_selector(instance: &str, component: &str) -> LabelSelector {
    LabelSelector {
        match_labels: Some(BTreeMap::from([
            ("app.kubernetes.io/name".into(), "cryostat".into()),
            ("app.kubernetes.io/instance".into(), instance.into()),
            ("component".into(), component.into()),
        ])),
        match_expressions: None,
    }
}

pub fn object_meta(oref: &OwnerReference, name: &str) -> ObjectMeta {
    ObjectMeta {
        name: Some(name.into()),
        labels: Some(resource_labels(&oref.name)),
        owner_references: Some(vec![oref.clone()]),
        ..Default::default()
    }
}
