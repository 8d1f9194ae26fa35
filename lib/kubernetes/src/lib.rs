mod api;
mod client;
mod config;
mod resource;
mod version;
mod watch;

pub use api::Api;
pub use client::{Client, Error, ErrorResponse, ListParams, WatchEvent, WatchParams};
pub use config::{Auth, Config, Error as ConfigError};
pub use resource::deployment::{
    Container, Deployment, DeploymentSpec, DeploymentStatus, LabelSelector, PodSpec,
    PodTemplateSpec,
};
pub use resource::event::{Event as ObjectEvent, EventSource};
pub use resource::metadata::{ListMeta, ObjectMeta, ObjectReference, OwnerReference};
pub use resource::{ObjectList, Resource};
pub use version::Version;
pub use watch::{Config as WatchConfig, Event, InitialListStrategy, watcher};
