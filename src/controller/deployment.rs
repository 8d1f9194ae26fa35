use std::collections::BTreeMap;

use kubernetes::{
    Container, Deployment, DeploymentSpec, LabelSelector, ObjectMeta, PodSpec, PodTemplateSpec,
};

use crate::crd::Programmer;
use crate::registry::{self, Registry};

const CONTAINER_NAME: &str = "nginx";
const CONTAINER_IMAGE: &str = "nginx:latest";

/// Labels of the Deployment and its pods.
pub fn labels(programmer: &Programmer) -> BTreeMap<String, String> {
    BTreeMap::from([
        ("app".to_string(), "nginx".to_string()),
        ("controller".to_string(), programmer.metadata.name.clone()),
    ])
}

/// The Deployment `programmer` asks for, owned by it.
///
/// The result carries no resourceVersion, so an update with it replaces
/// whatever is stored.
pub fn new_deployment(programmer: &Programmer, registry: &Registry) -> Result<Deployment, registry::Error> {
    let owner = registry.controller_ref(programmer)?;
    let labels = labels(programmer);

    Ok(Deployment {
        metadata: ObjectMeta {
            name: programmer.spec.deployment_name.clone(),
            namespace: programmer.metadata.namespace.clone(),
            owner_references: vec![owner],
            ..Default::default()
        },
        spec: DeploymentSpec {
            replicas: programmer.spec.replicas,
            selector: LabelSelector {
                match_labels: labels.clone(),
            },
            template: PodTemplateSpec {
                metadata: ObjectMeta {
                    labels,
                    ..Default::default()
                },
                spec: Some(PodSpec {
                    containers: vec![Container {
                        name: CONTAINER_NAME.to_string(),
                        image: Some(CONTAINER_IMAGE.to_string()),
                    }],
                }),
            },
        },
        status: None,
    })
}

/// True if the controller owner reference of `deployment` names `programmer`.
pub fn is_owned_by(deployment: &Deployment, programmer: &Programmer) -> bool {
    deployment
        .metadata
        .is_controlled_by(&programmer.metadata.uid)
}
