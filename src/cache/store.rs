use std::collections::HashMap;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};

use dashmap::DashMap;
use kubernetes::Resource;

use super::{HasSynced, key_of};

struct Inner<R> {
    objects: DashMap<String, Arc<R>>,
    synced: AtomicBool,
}

/// Objects of one kind, keyed by `namespace/name`.
///
/// Cloning is cheap, clones share the same objects. Only the informer
/// writes, everyone else reads.
pub struct Store<R> {
    inner: Arc<Inner<R>>,
}

impl<R> Clone for Store<R> {
    fn clone(&self) -> Self {
        Self {
            inner: Arc::clone(&self.inner),
        }
    }
}

impl<R> Default for Store<R> {
    fn default() -> Self {
        Self {
            inner: Arc::new(Inner {
                objects: DashMap::new(),
                synced: AtomicBool::new(false),
            }),
        }
    }
}

impl<R: Resource> Store<R> {
    pub fn get(&self, namespace: &str, name: &str) -> Option<Arc<R>> {
        if namespace.is_empty() {
            self.get_by_key(name)
        } else {
            self.get_by_key(&format!("{namespace}/{name}"))
        }
    }

    pub fn get_by_key(&self, key: &str) -> Option<Arc<R>> {
        self.inner
            .objects
            .get(key)
            .map(|entry| Arc::clone(entry.value()))
    }

    pub fn list(&self) -> Vec<Arc<R>> {
        self.inner
            .objects
            .iter()
            .map(|entry| Arc::clone(entry.value()))
            .collect()
    }

    pub fn len(&self) -> usize {
        self.inner.objects.len()
    }

    pub fn is_empty(&self) -> bool {
        self.inner.objects.is_empty()
    }

    /// Insert or replace an object, returns the previous one.
    pub(crate) fn insert(&self, obj: Arc<R>) -> Option<Arc<R>> {
        let key = key_of(obj.metadata());
        self.inner.objects.insert(key, obj)
    }

    pub(crate) fn remove(&self, key: &str) -> Option<Arc<R>> {
        self.inner.objects.remove(key).map(|(_key, obj)| obj)
    }

    /// Drop every object not in `objects`, returns the dropped ones.
    pub(crate) fn retain_keys(&self, objects: &HashMap<String, Arc<R>>) -> Vec<(String, Arc<R>)> {
        let stale = self
            .inner
            .objects
            .iter()
            .filter(|entry| !objects.contains_key(entry.key()))
            .map(|entry| entry.key().clone())
            .collect::<Vec<_>>();

        stale
            .into_iter()
            .filter_map(|key| self.inner.objects.remove(&key))
            .collect()
    }

    pub(crate) fn mark_synced(&self) {
        self.inner.synced.store(true, Ordering::Release);
    }
}

impl<R: Resource> HasSynced for Store<R> {
    fn has_synced(&self) -> bool {
        self.inner.synced.load(Ordering::Acquire)
    }
}
