use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};

use super::{ObjectMeta, Resource};

/// A label selector is a label query over a set of resources.
#[derive(Clone, Debug, Default, Deserialize, PartialEq, Serialize)]
pub struct LabelSelector {
    #[serde(
        default,
        rename = "matchLabels",
        skip_serializing_if = "BTreeMap::is_empty"
    )]
    pub match_labels: BTreeMap<String, String>,
}

/// A single application container that you want to run within a pod.
#[derive(Clone, Debug, Default, Deserialize, PartialEq, Serialize)]
pub struct Container {
    pub name: String,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub image: Option<String>,
}

/// PodSpec is a description of a pod.
///
/// NOTE: Only necessary fields are present here.
#[derive(Clone, Debug, Default, Deserialize, PartialEq, Serialize)]
pub struct PodSpec {
    #[serde(default)]
    pub containers: Vec<Container>,
}

/// PodTemplateSpec describes the data a pod should have when created from a template
#[derive(Clone, Debug, Default, Deserialize, PartialEq, Serialize)]
pub struct PodTemplateSpec {
    #[serde(default)]
    pub metadata: ObjectMeta,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub spec: Option<PodSpec>,
}

/// DeploymentSpec is the specification of the desired behavior of the Deployment.
///
/// See https://kubernetes.io/docs/reference/kubernetes-api/workload-resources/deployment-v1/#DeploymentSpec
#[derive(Clone, Debug, Default, Deserialize, PartialEq, Serialize)]
pub struct DeploymentSpec {
    /// Number of desired pods. Defaults to 1 on the server side.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub replicas: Option<i32>,

    #[serde(default)]
    pub selector: LabelSelector,

    #[serde(default)]
    pub template: PodTemplateSpec,
}

/// DeploymentStatus is the most recently observed status of the Deployment.
#[derive(Clone, Debug, Default, Deserialize, PartialEq, Serialize)]
pub struct DeploymentStatus {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub replicas: Option<i32>,

    #[serde(
        default,
        rename = "readyReplicas",
        skip_serializing_if = "Option::is_none"
    )]
    pub ready_replicas: Option<i32>,

    /// Total number of available pods (ready for at least minReadySeconds)
    /// targeted by this deployment.
    #[serde(
        default,
        rename = "availableReplicas",
        skip_serializing_if = "Option::is_none"
    )]
    pub available_replicas: Option<i32>,

    #[serde(
        default,
        rename = "observedGeneration",
        skip_serializing_if = "Option::is_none"
    )]
    pub observed_generation: Option<i64>,
}

/// Deployment enables declarative updates for Pods and ReplicaSets.
///
/// See https://kubernetes.io/docs/reference/kubernetes-api/workload-resources/deployment-v1/
#[derive(Clone, Debug, Default, Deserialize, PartialEq, Serialize)]
pub struct Deployment {
    /// Standard object's metadata.
    ///
    /// More info: https://git.k8s.io/community/contributors/devel/sig-architecture/api-conventions.md#metadata
    pub metadata: ObjectMeta,

    #[serde(default)]
    pub spec: DeploymentSpec,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub status: Option<DeploymentStatus>,
}

impl Deployment {
    /// The number of available replicas reported by the server, zero if the
    /// status is not populated yet.
    pub fn available_replicas(&self) -> i32 {
        self.status
            .as_ref()
            .and_then(|status| status.available_replicas)
            .unwrap_or_default()
    }
}

impl Resource for Deployment {
    const GROUP: &'static str = "apps";
    const VERSION: &'static str = "v1";
    const KIND: &'static str = "Deployment";
    const PLURAL: &'static str = "deployments";

    fn metadata(&self) -> &ObjectMeta {
        &self.metadata
    }

    fn metadata_mut(&mut self) -> &mut ObjectMeta {
        &mut self.metadata
    }
}
