//! Local mirror of cluster objects.
//!
//! An [`Informer`] keeps a [`Store`] in line with the api server through
//! list+watch and tells registered handlers about every change.

mod informer;
mod notification;
mod store;

use std::time::Duration;

use kubernetes::ObjectMeta;
use tripwire::Tripwire;

pub use informer::{Handler, Informer, Reflector};
pub use notification::{DeletedState, Notification};
pub use store::Store;

/// How often the stores are checked while waiting for them to sync
const SYNC_POLL_INTERVAL: Duration = Duration::from_millis(100);

#[derive(Debug, PartialEq, thiserror::Error)]
pub enum KeyError {
    #[error("unexpected key format: {0:?}")]
    Format(String),

    #[error("key {0:?} has an empty name")]
    EmptyName(String),
}

#[derive(Debug, PartialEq, thiserror::Error)]
pub enum SyncError {
    #[error("caches not synced after {0:?}")]
    Timeout(Duration),

    #[error("shutdown before caches synced")]
    Shutdown,
}

/// The key of an object, `namespace/name`, or just `name` for cluster
/// scoped objects.
pub fn key_of(metadata: &ObjectMeta) -> String {
    if metadata.namespace.is_empty() {
        metadata.name.clone()
    } else {
        format!("{}/{}", metadata.namespace, metadata.name)
    }
}

/// Split a key made by [`key_of`] into namespace and name.
pub fn split_key(key: &str) -> Result<(&str, &str), KeyError> {
    let mut parts = key.split('/');
    let (namespace, name) = match (parts.next(), parts.next(), parts.next()) {
        (Some(name), None, None) => ("", name),
        (Some(namespace), Some(name), None) => (namespace, name),
        _ => return Err(KeyError::Format(key.to_string())),
    };

    if name.is_empty() {
        return Err(KeyError::EmptyName(key.to_string()));
    }

    Ok((namespace, name))
}

/// Something that knows whether its initial list is complete.
pub trait HasSynced: Send + Sync {
    fn has_synced(&self) -> bool;
}

/// Wait until every store has synced. Fails if that takes longer than
/// `timeout`, or shutdown is requested first.
pub async fn wait_for_cache_sync(
    stores: &[&dyn HasSynced],
    timeout: Duration,
    mut shutdown: Tripwire,
) -> Result<(), SyncError> {
    let deadline = tokio::time::Instant::now() + timeout;
    let mut ticker = tokio::time::interval(SYNC_POLL_INTERVAL);

    loop {
        tokio::select! {
            biased;

            _ = &mut shutdown => return Err(SyncError::Shutdown),
            _ = tokio::time::sleep_until(deadline) => return Err(SyncError::Timeout(timeout)),
            _ = ticker.tick() => {
                if stores.iter().all(|store| store.has_synced()) {
                    return Ok(());
                }
            }
        }
    }
}
