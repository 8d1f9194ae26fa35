//! The set of object kinds the controller knows about.
//!
//! The registry is built once at startup and shared read-only afterwards,
//! anything that needs the `apiVersion` and `kind` of a Rust type (owner
//! references, event subjects) asks it.

use std::any::{TypeId, type_name};
use std::collections::HashMap;

use kubernetes::{ObjectReference, OwnerReference, Resource};

#[derive(Debug, thiserror::Error)]
pub enum Error {
    #[error("type {0} is not registered")]
    NotRegistered(&'static str),

    #[error("{kind} {name:?} has no uid yet")]
    MissingUid { kind: &'static str, name: String },
}

/// `apiVersion` and `kind` of a registered type.
#[derive(Clone, Debug, PartialEq)]
pub struct TypeMeta {
    pub api_version: String,
    pub kind: &'static str,
}

#[derive(Default)]
pub struct Builder {
    types: HashMap<TypeId, TypeMeta>,
}

impl Builder {
    pub fn register<R: Resource>(mut self) -> Self {
        self.types.insert(
            TypeId::of::<R>(),
            TypeMeta {
                api_version: R::api_version(),
                kind: R::KIND,
            },
        );

        self
    }

    pub fn build(self) -> Registry {
        Registry { types: self.types }
    }
}

#[derive(Debug)]
pub struct Registry {
    types: HashMap<TypeId, TypeMeta>,
}

impl Registry {
    pub fn builder() -> Builder {
        Builder::default()
    }

    pub fn type_meta<R: Resource>(&self) -> Result<&TypeMeta, Error> {
        self.types
            .get(&TypeId::of::<R>())
            .ok_or(Error::NotRegistered(type_name::<R>()))
    }

    /// Reference to `obj`, used as the subject of events.
    pub fn object_reference<R: Resource>(&self, obj: &R) -> Result<ObjectReference, Error> {
        let type_meta = self.type_meta::<R>()?;
        let metadata = obj.metadata();

        Ok(ObjectReference {
            api_version: type_meta.api_version.clone(),
            kind: type_meta.kind.to_string(),
            namespace: metadata.namespace.clone(),
            name: metadata.name.clone(),
            uid: metadata.uid.clone(),
            resource_version: metadata.resource_version.clone(),
        })
    }

    /// A controller owner reference pointing at `owner`.
    pub fn controller_ref<R: Resource>(&self, owner: &R) -> Result<OwnerReference, Error> {
        let type_meta = self.type_meta::<R>()?;
        let metadata = owner.metadata();
        if metadata.uid.is_empty() {
            return Err(Error::MissingUid {
                kind: type_meta.kind,
                name: metadata.name.clone(),
            });
        }

        Ok(OwnerReference {
            api_version: type_meta.api_version.clone(),
            kind: type_meta.kind.to_string(),
            name: metadata.name.clone(),
            uid: metadata.uid.clone(),
            controller: Some(true),
            block_owner_deletion: Some(true),
        })
    }
}
