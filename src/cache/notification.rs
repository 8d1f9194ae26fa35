use std::sync::Arc;

use kubernetes::Resource;

use super::key_of;

/// A change observed by an informer.
#[derive(Debug)]
pub enum Notification<R> {
    Added(Arc<R>),

    /// `old` and `new` are the same object on periodic resync.
    Updated { old: Arc<R>, new: Arc<R> },

    Deleted(DeletedState<R>),
}

/// What is known about a deleted object.
#[derive(Debug)]
pub enum DeletedState<R> {
    /// The delete was observed, this is the final state of the object.
    Known(Arc<R>),

    /// The object went missing while the informer was not watching, it was
    /// noticed on relist. `last_known` is what the store held at the time.
    Tombstone {
        key: String,
        last_known: Option<Arc<R>>,
    },
}

impl<R: Resource> DeletedState<R> {
    /// The key of the deleted object.
    pub fn key(&self) -> String {
        match self {
            DeletedState::Known(obj) => key_of(obj.metadata()),
            DeletedState::Tombstone { key, .. } => key.clone(),
        }
    }
}

#[cfg(test)]
mod tests {
    use kubernetes::ObjectMeta;

    use super::*;
    use crate::crd::Programmer;

    #[test]
    fn deleted_key() {
        let alice = Arc::new(Programmer {
            metadata: ObjectMeta {
                name: "alice".into(),
                namespace: "ns".into(),
                ..Default::default()
            },
            ..Default::default()
        });

        assert_eq!(DeletedState::Known(Arc::clone(&alice)).key(), "ns/alice");

        let tombstone = DeletedState::<Programmer>::Tombstone {
            key: "ns/bob".into(),
            last_known: None,
        };
        assert_eq!(tombstone.key(), "ns/bob");
    }
}
