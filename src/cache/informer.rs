use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

use backoff::ExponentialBackoff;
use futures::StreamExt;
use kubernetes::{Client, Event, Resource, WatchConfig, watcher};
use tokio::time::MissedTickBehavior;
use tracing::{debug, info, warn};
use tripwire::Tripwire;

use super::{DeletedState, HasSynced, Notification, Store, key_of};

const WATCH_RETRY_INITIAL: Duration = Duration::from_millis(800);
const WATCH_RETRY_MAX: Duration = Duration::from_secs(30);

/// Receives every notification of an informer, in order. Handlers run on
/// the informer task and must not block.
pub type Handler<R> = Box<dyn Fn(&Notification<R>) + Send + Sync>;

/// Applies watch events to a [`Store`] and turns them into notifications.
pub struct Reflector<R> {
    store: Store<R>,
    handlers: Vec<Handler<R>>,
    /// Objects of an in progress (re)list
    buffer: Option<HashMap<String, Arc<R>>>,
}

impl<R: Resource> Reflector<R> {
    pub fn new(store: Store<R>) -> Self {
        Self {
            store,
            handlers: Vec::new(),
            buffer: None,
        }
    }

    pub fn add_handler(&mut self, handler: Handler<R>) {
        self.handlers.push(handler);
    }

    fn notify(&self, notification: Notification<R>) {
        for handler in &self.handlers {
            handler(&notification);
        }
    }

    fn upsert(&self, obj: Arc<R>) {
        let notification = match self.store.insert(Arc::clone(&obj)) {
            Some(old) => Notification::Updated { old, new: obj },
            None => Notification::Added(obj),
        };

        self.notify(notification);
    }

    pub fn apply(&mut self, event: Event<R>) {
        match event {
            Event::Init => {
                self.buffer = Some(HashMap::new());
            }
            Event::InitApply(obj) => {
                let key = key_of(obj.metadata());
                self.buffer
                    .get_or_insert_with(HashMap::new)
                    .insert(key, Arc::new(obj));
            }
            Event::InitDone => {
                let listed = self.buffer.take().unwrap_or_default();

                // anything the list did not return was deleted while we
                // were not watching
                for (key, last_known) in self.store.retain_keys(&listed) {
                    debug!(message = "object missing from relist", kind = R::KIND, key);

                    self.notify(Notification::Deleted(DeletedState::Tombstone {
                        key,
                        last_known: Some(last_known),
                    }));
                }

                for obj in listed.into_values() {
                    self.upsert(obj);
                }

                if !self.store.has_synced() {
                    info!(
                        message = "cache synced",
                        kind = R::KIND,
                        objects = self.store.len()
                    );
                }
                self.store.mark_synced();
            }
            Event::Apply(obj) => self.upsert(Arc::new(obj)),
            Event::Deleted(obj) => {
                let key = key_of(obj.metadata());
                self.store.remove(&key);

                self.notify(Notification::Deleted(DeletedState::Known(Arc::new(obj))));
            }
        }
    }

    /// Replay every cached object as an update with `old == new`.
    pub fn resync(&self) {
        let objects = self.store.list();
        debug!(message = "resync", kind = R::KIND, objects = objects.len());

        for obj in objects {
            self.notify(Notification::Updated {
                old: Arc::clone(&obj),
                new: obj,
            });
        }
    }
}

/// Keeps a [`Store`] of one resource kind in line with the api server and
/// delivers notifications to the registered handlers.
pub struct Informer<R> {
    client: Client,
    config: WatchConfig,
    resync: Duration,
    reflector: Reflector<R>,
}

impl<R: Resource> Informer<R> {
    pub fn new(client: Client, config: WatchConfig, resync: Duration) -> Self {
        Self {
            client,
            config,
            resync,
            reflector: Reflector::new(Store::default()),
        }
    }

    pub fn store(&self) -> Store<R> {
        self.reflector.store.clone()
    }

    pub fn add_handler<F>(&mut self, handler: F)
    where
        F: Fn(&Notification<R>) + Send + Sync + 'static,
    {
        self.reflector.add_handler(Box::new(handler));
    }

    /// Watch until `shutdown` trips. Watch errors are logged and retried
    /// with backoff, they never end the informer.
    pub async fn run(mut self, mut shutdown: Tripwire) {
        let stream = watcher::<R>(self.client.clone(), self.config.clone());
        tokio::pin!(stream);

        let mut backoff = ExponentialBackoff::new(WATCH_RETRY_INITIAL, WATCH_RETRY_MAX);

        let start = tokio::time::Instant::now() + self.resync;
        let mut resync = tokio::time::interval_at(start, self.resync);
        resync.set_missed_tick_behavior(MissedTickBehavior::Delay);

        info!(message = "informer started", kind = R::KIND);

        loop {
            tokio::select! {
                biased;

                _ = &mut shutdown => break,
                _ = resync.tick() => {
                    if self.reflector.store.has_synced() {
                        self.reflector.resync();
                    }
                }
                result = stream.next() => match result {
                    Some(Ok(event)) => {
                        backoff.reset();
                        self.reflector.apply(event);
                    }
                    Some(Err(err)) => {
                        let delay = backoff.next_delay();
                        warn!(
                            message = "watch failed",
                            kind = R::KIND,
                            %err,
                            retry_after = ?delay,
                        );

                        tokio::select! {
                            _ = &mut shutdown => break,
                            _ = tokio::time::sleep(delay) => {}
                        }
                    }
                    None => break,
                }
            }
        }

        info!(message = "informer stopped", kind = R::KIND);
    }
}

#[cfg(test)]
mod tests {
    use kubernetes::ObjectMeta;
    use parking_lot::Mutex;

    use super::*;
    use crate::crd::Programmer;

    fn programmer(name: &str, rv: &str) -> Programmer {
        Programmer {
            metadata: ObjectMeta {
                name: name.into(),
                namespace: "ns".into(),
                resource_version: Some(rv.into()),
                ..Default::default()
            },
            ..Default::default()
        }
    }

    fn describe(notification: &Notification<Programmer>) -> String {
        match notification {
            Notification::Added(obj) => format!("added {}", key_of(&obj.metadata)),
            Notification::Updated { old, new } => format!(
                "updated {} {}->{}",
                key_of(&new.metadata),
                old.metadata.resource_version.as_deref().unwrap_or_default(),
                new.metadata.resource_version.as_deref().unwrap_or_default(),
            ),
            Notification::Deleted(DeletedState::Known(obj)) => {
                format!("deleted {}", key_of(&obj.metadata))
            }
            Notification::Deleted(DeletedState::Tombstone { key, .. }) => {
                format!("tombstone {key}")
            }
        }
    }

    fn recording_reflector() -> (Reflector<Programmer>, Arc<Mutex<Vec<String>>>) {
        let seen = Arc::new(Mutex::new(Vec::new()));
        let mut reflector = Reflector::new(Store::default());
        let sink = Arc::clone(&seen);
        reflector.add_handler(Box::new(move |notification| {
            sink.lock().push(describe(notification))
        }));

        (reflector, seen)
    }

    #[test]
    fn initial_list() {
        let (mut reflector, seen) = recording_reflector();

        reflector.apply(Event::Init);
        reflector.apply(Event::InitApply(programmer("alice", "1")));
        assert!(seen.lock().is_empty());
        assert!(!reflector.store.has_synced());

        reflector.apply(Event::InitDone);
        assert_eq!(*seen.lock(), vec!["added ns/alice".to_string()]);
        assert!(reflector.store.has_synced());
        assert!(reflector.store.get("ns", "alice").is_some());
    }

    #[test]
    fn watch_events() {
        let (mut reflector, seen) = recording_reflector();
        reflector.apply(Event::Init);
        reflector.apply(Event::InitDone);

        reflector.apply(Event::Apply(programmer("alice", "1")));
        reflector.apply(Event::Apply(programmer("alice", "2")));
        reflector.apply(Event::Deleted(programmer("alice", "3")));

        assert_eq!(
            *seen.lock(),
            vec![
                "added ns/alice".to_string(),
                "updated ns/alice 1->2".to_string(),
                "deleted ns/alice".to_string(),
            ]
        );
        assert!(reflector.store.is_empty());
    }

    #[test]
    fn relist_finds_deleted_objects() {
        let (mut reflector, seen) = recording_reflector();
        reflector.apply(Event::Init);
        reflector.apply(Event::InitApply(programmer("alice", "1")));
        reflector.apply(Event::InitApply(programmer("bob", "1")));
        reflector.apply(Event::InitDone);
        seen.lock().clear();

        // bob was deleted while the watch was down
        reflector.apply(Event::Init);
        reflector.apply(Event::InitApply(programmer("alice", "5")));
        reflector.apply(Event::InitDone);

        assert_eq!(
            *seen.lock(),
            vec![
                "tombstone ns/bob".to_string(),
                "updated ns/alice 1->5".to_string(),
            ]
        );
        assert!(reflector.store.get("ns", "bob").is_none());
    }

    #[test]
    fn resync_replays_cache() {
        let (mut reflector, seen) = recording_reflector();
        reflector.apply(Event::Init);
        reflector.apply(Event::InitApply(programmer("alice", "4")));
        reflector.apply(Event::InitDone);
        seen.lock().clear();

        reflector.resync();
        assert_eq!(*seen.lock(), vec!["updated ns/alice 4->4".to_string()]);
    }
}
