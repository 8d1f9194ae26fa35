use kubernetes::{ObjectMeta, Resource};
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

/// ProgrammerSpec is the desired state, it names the Deployment to manage.
#[derive(Clone, Debug, Default, Deserialize, PartialEq, Serialize)]
pub struct ProgrammerSpec {
    #[serde(default, rename = "deploymentName")]
    pub deployment_name: String,

    /// Desired replicas of the Deployment, `None` leaves the replicas
    /// to whoever else manages them.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub replicas: Option<i32>,

    /// Fields this controller doesn't read, written back as they are.
    #[serde(flatten)]
    pub extra: Map<String, Value>,
}

#[derive(Clone, Debug, Default, Deserialize, PartialEq, Serialize)]
pub struct ProgrammerStatus {
    #[serde(default, rename = "availableReplicas")]
    pub available_replicas: i32,
}

/// Programmer is the custom resource `programmers.bolingcavalry.k8s.io`
#[derive(Clone, Debug, Default, Deserialize, PartialEq, Serialize)]
pub struct Programmer {
    #[serde(default)]
    pub metadata: ObjectMeta,

    #[serde(default)]
    pub spec: ProgrammerSpec,

    /// Written by the controller only, `None` until the first reconcile.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub status: Option<ProgrammerStatus>,

    #[serde(flatten)]
    pub extra: Map<String, Value>,
}

impl Programmer {
    pub fn available_replicas(&self) -> Option<i32> {
        self.status.as_ref().map(|status| status.available_replicas)
    }
}

impl Resource for Programmer {
    const GROUP: &'static str = "bolingcavalry.k8s.io";
    const VERSION: &'static str = "v1";
    const KIND: &'static str = "Programmer";
    const PLURAL: &'static str = "programmers";

    fn metadata(&self) -> &ObjectMeta {
        &self.metadata
    }

    fn metadata_mut(&mut self) -> &mut ObjectMeta {
        &mut self.metadata
    }
}

#[cfg(test)]
mod tests {
    use kubernetes::ObjectList;

    use super::*;

    #[test]
    fn deserialize() {
        let input = r#"
{
  "apiVersion": "bolingcavalry.k8s.io/v1",
  "kind": "ProgrammerList",
  "metadata": {
    "resourceVersion": "2050"
  },
  "items": [
    {
      "apiVersion": "bolingcavalry.k8s.io/v1",
      "kind": "Programmer",
      "metadata": {
        "name": "alice",
        "namespace": "ns",
        "uid": "8f1e9a62-0d5c-4d3a-9b9e-0c7c2b1f3a10",
        "resourceVersion": "2049"
      },
      "spec": {
        "deploymentName": "web",
        "replicas": 3
      }
    },
    {
      "metadata": {
        "name": "bob",
        "namespace": "ns",
        "resourceVersion": "2040"
      },
      "spec": {
        "deploymentName": "api"
      },
      "status": {
        "availableReplicas": 2
      }
    }
  ]
}"#;

        let list = serde_json::from_str::<ObjectList<Programmer>>(input).unwrap();
        assert_eq!(list.items.len(), 2);

        let alice = &list.items[0];
        assert_eq!(alice.spec.deployment_name, "web");
        assert_eq!(alice.spec.replicas, Some(3));
        assert_eq!(alice.available_replicas(), None);

        let bob = &list.items[1];
        assert_eq!(bob.spec.replicas, None);
        assert_eq!(bob.available_replicas(), Some(2));
    }

    #[test]
    fn url() {
        assert_eq!(
            Programmer::url_path(Some("ns")),
            "/apis/bolingcavalry.k8s.io/v1/namespaces/ns/programmers"
        );
        assert_eq!(Programmer::api_version(), "bolingcavalry.k8s.io/v1");
    }
}
