pub mod deployment;
pub mod event;
pub mod metadata;

use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};

use metadata::{ListMeta, ObjectMeta};

/// An accessor trait for a kubernetes Resource.
pub trait Resource: Serialize + DeserializeOwned + Send + Sync + 'static {
    /// The group of the resource, or the empty string if the resource doesn't have a
    /// group.
    const GROUP: &'static str;

    /// The version of the resource.
    const VERSION: &'static str;

    /// The kind of the resource, it is used in `kind` field of every object.
    const KIND: &'static str;

    /// The plural of this resource, which is used to construct URLS
    const PLURAL: &'static str;

    /// The `apiVersion` of this resource, e.g. `apps/v1` or `v1`
    fn api_version() -> String {
        if Self::GROUP.is_empty() {
            Self::VERSION.to_string()
        } else {
            format!("{}/{}", Self::GROUP, Self::VERSION)
        }
    }

    /// Creates a url path for http requests for this resource
    fn url_path(namespace: Option<&str>) -> String {
        let group = if Self::GROUP.is_empty() {
            "api"
        } else {
            "apis"
        };
        let api_version = Self::api_version();
        let namespace = match namespace {
            Some(namespace) if !namespace.is_empty() => format!("namespaces/{namespace}/"),
            _ => String::new(),
        };
        let plural = Self::PLURAL;

        format!("/{group}/{api_version}/{namespace}{plural}")
    }

    /// Url path of a single named object.
    fn object_url_path(namespace: &str, name: &str) -> String {
        format!("{}/{}", Self::url_path(Some(namespace)), name)
    }

    fn metadata(&self) -> &ObjectMeta;

    fn metadata_mut(&mut self) -> &mut ObjectMeta;
}

/// A generic Kubernetes object list
///
/// This is used instead of a full struct for `DeploymentList`, `PodList`, etc.
///
/// Note that this is only used internally within reflectors and informers.
/// and is generally produced from list/watch/delete collection queries on
/// an [`Resource`].
#[derive(Deserialize)]
pub struct ObjectList<T> {
    /// ListMeta - only really used for its `resourceVersion`
    pub metadata: ListMeta,

    /// These items we are actually interested in.
    pub items: Vec<T>,
}
