use async_trait::async_trait;

use super::client::{Client, Error};
use super::resource::Resource;

/// Typed object operations of one resource kind.
///
/// Controllers talk to the cluster through this trait, so the reconcile
/// logic can be driven by an in-memory implementation in tests.
#[async_trait]
pub trait Api<R: Resource>: Send + Sync {
    /// Fetch the object `namespace/name`.
    async fn get(&self, namespace: &str, name: &str) -> Result<R, Error>;

    /// Create `obj` in `namespace` and return the stored object.
    async fn create(&self, namespace: &str, obj: &R) -> Result<R, Error>;

    /// Replace the object named by `obj.metadata().name`.
    async fn update(&self, namespace: &str, obj: &R) -> Result<R, Error>;
}

#[async_trait]
impl<R: Resource> Api<R> for Client {
    async fn get(&self, namespace: &str, name: &str) -> Result<R, Error> {
        self.get_object(namespace, name).await
    }

    async fn create(&self, namespace: &str, obj: &R) -> Result<R, Error> {
        self.create_object(namespace, obj).await
    }

    async fn update(&self, namespace: &str, obj: &R) -> Result<R, Error> {
        self.update_object(namespace, obj).await
    }
}
