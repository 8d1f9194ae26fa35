use serde::{Deserialize, Serialize};

use super::metadata::ObjectReference;
use super::{ObjectMeta, Resource};

/// EventSource contains information for an event.
#[derive(Clone, Debug, Default, Deserialize, PartialEq, Serialize)]
pub struct EventSource {
    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub component: String,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub host: Option<String>,
}

/// Event is a report of an event somewhere in the cluster.
///
/// See https://kubernetes.io/docs/reference/kubernetes-api/cluster-resources/event-v1/
#[derive(Clone, Debug, Default, Deserialize, PartialEq, Serialize)]
pub struct Event {
    pub metadata: ObjectMeta,

    /// The object that this event is about.
    #[serde(rename = "involvedObject")]
    pub involved_object: ObjectReference,

    /// This should be a short, machine understandable string that gives the
    /// reason for the transition into the object's current status.
    #[serde(default)]
    pub reason: String,

    /// A human-readable description of the status of this operation.
    #[serde(default)]
    pub message: String,

    /// Type of this event (Normal, Warning), new types could be added in the future
    #[serde(default, rename = "type")]
    pub typ: String,

    #[serde(default)]
    pub source: EventSource,

    #[serde(
        default,
        rename = "firstTimestamp",
        skip_serializing_if = "Option::is_none"
    )]
    pub first_timestamp: Option<String>,

    #[serde(
        default,
        rename = "lastTimestamp",
        skip_serializing_if = "Option::is_none"
    )]
    pub last_timestamp: Option<String>,

    /// The number of times this event has occurred.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub count: Option<i32>,

    #[serde(
        default,
        rename = "reportingComponent",
        skip_serializing_if = "Option::is_none"
    )]
    pub reporting_component: Option<String>,
}

impl Resource for Event {
    const GROUP: &'static str = "";
    const VERSION: &'static str = "v1";
    const KIND: &'static str = "Event";
    const PLURAL: &'static str = "events";

    fn metadata(&self) -> &ObjectMeta {
        &self.metadata
    }

    fn metadata_mut(&mut self) -> &mut ObjectMeta {
        &mut self.metadata
    }
}
