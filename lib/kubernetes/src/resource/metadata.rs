use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

/// OwnerReference contains enough information to let you identify an owning
/// object. An owning object must be in the same namespace as the dependent,
/// or be cluster-scoped, so there is no namespace field.
///
/// See https://kubernetes.io/docs/reference/kubernetes-api/common-definitions/object-meta/#ObjectMeta
#[derive(Clone, Debug, Default, Deserialize, PartialEq, Serialize)]
pub struct OwnerReference {
    #[serde(rename = "apiVersion")]
    pub api_version: String,

    pub kind: String,

    pub name: String,

    pub uid: String,

    /// If true, this reference points to the managing controller.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub controller: Option<bool>,

    /// If true, AND if the owner has the "foregroundDeletion" finalizer, then
    /// the owner cannot be deleted from the key-value store until this
    /// reference is removed.
    #[serde(
        default,
        rename = "blockOwnerDeletion",
        skip_serializing_if = "Option::is_none"
    )]
    pub block_owner_deletion: Option<bool>,
}

/// ObjectReference contains enough information to let you inspect or modify
/// the referred object.
#[derive(Clone, Debug, Default, Deserialize, PartialEq, Serialize)]
pub struct ObjectReference {
    #[serde(default, rename = "apiVersion", skip_serializing_if = "String::is_empty")]
    pub api_version: String,

    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub kind: String,

    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub namespace: String,

    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub name: String,

    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub uid: String,

    #[serde(
        default,
        rename = "resourceVersion",
        skip_serializing_if = "Option::is_none"
    )]
    pub resource_version: Option<String>,
}

/// ObjectMeta is metadata that all persisted resources must have, which
/// includes all objects users must create.
///
/// Fields without a typed counterpart are kept in `extra`, so an object
/// read from the server can be written back without losing them.
#[derive(Clone, Debug, Default, Deserialize, PartialEq, Serialize)]
pub struct ObjectMeta {
    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub name: String,

    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub namespace: String,

    /// UID is the unique in time and space value for this object. It is
    /// generated by the server on successful creation of a resource.
    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub uid: String,

    /// An opaque value that represents the internal version of this object that
    /// can be used by clients to determine when objects have changed. May be
    /// used for optimistic concurrency, change detection, and the watch
    /// operation on a resource or set of resources.
    #[serde(
        default,
        rename = "resourceVersion",
        skip_serializing_if = "Option::is_none"
    )]
    pub resource_version: Option<String>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub generation: Option<i64>,

    #[serde(
        default,
        rename = "creationTimestamp",
        skip_serializing_if = "Option::is_none"
    )]
    pub creation_timestamp: Option<String>,

    #[serde(default, skip_serializing_if = "BTreeMap::is_empty")]
    pub labels: BTreeMap<String, String>,

    #[serde(default, skip_serializing_if = "BTreeMap::is_empty")]
    pub annotations: BTreeMap<String, String>,

    #[serde(
        default,
        rename = "ownerReferences",
        skip_serializing_if = "Vec::is_empty"
    )]
    pub owner_references: Vec<OwnerReference>,

    /// Must be empty before the object is deleted from the registry.
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub finalizers: Vec<String>,

    /// Set by the server when a graceful deletion is requested.
    #[serde(
        default,
        rename = "deletionTimestamp",
        skip_serializing_if = "Option::is_none"
    )]
    pub deletion_timestamp: Option<String>,

    #[serde(flatten)]
    pub extra: Map<String, Value>,
}

impl ObjectMeta {
    /// Returns the owner reference flagged as the managing controller, if any.
    pub fn controller_ref(&self) -> Option<&OwnerReference> {
        self.owner_references
            .iter()
            .find(|owner| owner.controller == Some(true))
    }

    /// Returns true if the object is controlled by the owner with given uid.
    pub fn is_controlled_by(&self, owner_uid: &str) -> bool {
        match self.controller_ref() {
            Some(owner) => !owner_uid.is_empty() && owner.uid == owner_uid,
            None => false,
        }
    }
}

/// ListMeta describes metadata that synthetic resources must have, including
/// lists and various status objects.
#[derive(Clone, Debug, Default, Deserialize)]
pub struct ListMeta {
    /// continue may be set if the user set a limit on the number of items
    /// returned, and indicates that the server has more data available.
    #[serde(default)]
    pub r#continue: Option<String>,

    #[serde(default, rename = "resourceVersion")]
    pub resource_version: Option<String>,
}
