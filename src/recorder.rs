//! Audit events on cluster objects.
//!
//! A [`Recorder`] builds core/v1 Events and hands them to the
//! [`Broadcaster`], which logs every event and writes it to the api server
//! in the background. Recording never blocks, when the buffer is full the
//! event is dropped.

use std::sync::Arc;

use chrono::{SecondsFormat, Utc};
use kubernetes::{Api, EventSource, ObjectEvent, ObjectMeta, Resource};
use tokio::sync::mpsc;
use tracing::{debug, info, warn};
use tripwire::Tripwire;

use crate::registry::Registry;

/// The component name events are reported by.
pub const COMPONENT: &str = "programmer-controller";

/// How many events may wait for the broadcaster.
const EVENT_BUFFER: usize = 1000;

#[derive(Clone, Copy, Debug, PartialEq)]
pub enum EventType {
    Normal,
    Warning,
}

impl EventType {
    pub fn as_str(&self) -> &'static str {
        match self {
            EventType::Normal => "Normal",
            EventType::Warning => "Warning",
        }
    }
}

#[derive(Clone)]
pub struct Recorder {
    registry: Arc<Registry>,
    tx: mpsc::Sender<ObjectEvent>,
}

impl Recorder {
    pub fn new(registry: Arc<Registry>, tx: mpsc::Sender<ObjectEvent>) -> Self {
        Self { registry, tx }
    }

    /// Record an event about `obj`.
    pub fn event<R: Resource>(
        &self,
        obj: &R,
        typ: EventType,
        reason: &str,
        message: impl Into<String>,
    ) {
        let involved_object = match self.registry.object_reference(obj) {
            Ok(reference) => reference,
            Err(err) => {
                warn!(message = "cannot reference event subject", %err, reason);
                return;
            }
        };

        let now = Utc::now();
        let timestamp = now.to_rfc3339_opts(SecondsFormat::Secs, true);
        let suffix = now.timestamp_nanos_opt().unwrap_or_default();
        let metadata = obj.metadata();

        let event = ObjectEvent {
            metadata: ObjectMeta {
                name: format!("{}.{:x}", metadata.name, suffix),
                namespace: metadata.namespace.clone(),
                ..Default::default()
            },
            involved_object,
            reason: reason.to_string(),
            message: message.into(),
            typ: typ.as_str().to_string(),
            source: EventSource {
                component: COMPONENT.to_string(),
                host: None,
            },
            first_timestamp: Some(timestamp.clone()),
            last_timestamp: Some(timestamp),
            count: Some(1),
            reporting_component: Some(COMPONENT.to_string()),
        };

        if let Err(err) = self.tx.try_send(event) {
            match err {
                mpsc::error::TrySendError::Full(event) => {
                    warn!(message = "event buffer is full, drop event", reason = event.reason);
                }
                mpsc::error::TrySendError::Closed(event) => {
                    debug!(message = "broadcaster stopped, drop event", reason = event.reason);
                }
            }
        }
    }
}

/// Writes recorded events to the api server.
pub struct Broadcaster {
    rx: mpsc::Receiver<ObjectEvent>,
    sink: Arc<dyn Api<ObjectEvent>>,
}

impl Broadcaster {
    pub fn new(registry: Arc<Registry>, sink: Arc<dyn Api<ObjectEvent>>) -> (Recorder, Broadcaster) {
        let (tx, rx) = mpsc::channel(EVENT_BUFFER);

        (Recorder::new(registry, tx), Broadcaster { rx, sink })
    }

    /// Runs until `shutdown` trips or every [`Recorder`] is gone.
    pub async fn run(mut self, mut shutdown: Tripwire) {
        loop {
            let event = tokio::select! {
                biased;

                _ = &mut shutdown => break,
                event = self.rx.recv() => match event {
                    Some(event) => event,
                    None => break,
                },
            };

            self.publish(event).await;
        }

        debug!(message = "event broadcaster stopped");
    }

    async fn publish(&self, event: ObjectEvent) {
        let object = &event.involved_object;
        info!(
            message = "event",
            kind = object.kind,
            namespace = object.namespace,
            name = object.name,
            event_type = event.typ,
            reason = event.reason,
            note = event.message,
        );

        if let Err(err) = self.sink.create(&event.metadata.namespace, &event).await {
            warn!(
                message = "write event failed",
                namespace = event.metadata.namespace,
                reason = event.reason,
                %err,
            );
        }
    }
}

#[cfg(test)]
mod tests {
    use std::time::Duration;

    use kubernetes::ObjectMeta;

    use super::*;
    use crate::crd::Programmer;
    use crate::testing::{FakeClient, wait_until};

    fn alice() -> Programmer {
        Programmer {
            metadata: ObjectMeta {
                name: "alice".into(),
                namespace: "ns".into(),
                uid: "uid-alice".into(),
                ..Default::default()
            },
            ..Default::default()
        }
    }

    fn registry() -> Arc<Registry> {
        Arc::new(Registry::builder().register::<Programmer>().build())
    }

    #[test]
    fn build_event() {
        let (tx, mut rx) = mpsc::channel(4);
        let recorder = Recorder::new(registry(), tx);

        recorder.event(&alice(), EventType::Warning, "ErrResourceExists", "taken");

        let event = rx.try_recv().unwrap();
        assert!(event.metadata.name.starts_with("alice."));
        assert_eq!(event.metadata.namespace, "ns");
        assert_eq!(event.involved_object.kind, "Programmer");
        assert_eq!(event.involved_object.uid, "uid-alice");
        assert_eq!(event.typ, "Warning");
        assert_eq!(event.reason, "ErrResourceExists");
        assert_eq!(event.message, "taken");
        assert_eq!(event.source.component, COMPONENT);
        assert_eq!(event.count, Some(1));
        assert_eq!(event.first_timestamp, event.last_timestamp);
    }

    #[test]
    fn full_buffer_drops() {
        let (tx, mut rx) = mpsc::channel(1);
        let recorder = Recorder::new(registry(), tx);

        recorder.event(&alice(), EventType::Normal, "Synced", "first");
        recorder.event(&alice(), EventType::Normal, "Synced", "second");

        assert_eq!(rx.try_recv().unwrap().message, "first");
        assert!(rx.try_recv().is_err());
    }

    #[test]
    fn unregistered_subject_is_skipped() {
        let (tx, mut rx) = mpsc::channel(1);
        let recorder = Recorder::new(Arc::new(Registry::builder().build()), tx);

        recorder.event(&alice(), EventType::Normal, "Synced", "first");
        assert!(rx.try_recv().is_err());
    }

    #[tokio::test]
    async fn broadcast_writes_events() {
        let client = FakeClient::default();
        let (recorder, broadcaster) = Broadcaster::new(registry(), Arc::new(client.clone()));
        let (trigger, tripwire) = Tripwire::new("test");
        let handle = tokio::spawn(broadcaster.run(tripwire));

        recorder.event(&alice(), EventType::Normal, "Synced", "Programmer synced successfully");

        wait_until(Duration::from_secs(5), || !client.events().is_empty()).await;

        let events = client.events();
        assert_eq!(events.len(), 1);
        assert_eq!(events[0].reason, "Synced");

        trigger.cancel();
        handle.await.unwrap();
    }
}
