use std::future::Future;
use std::pin::Pin;
use std::task::{Context, Poll};

use tokio::sync::watch;
use tracing::debug;

/// The cancelling half, owned by whoever decides to shut down.
pub struct Trigger {
    name: String,
    tx: watch::Sender<bool>,
}

impl Trigger {
    /// Cancel all associated tripwire, make them immediately resolved.
    pub fn cancel(self) {
        debug!(message = "cancel trigger", name = self.name);

        self.tx.send_replace(true);
    }
}

impl Drop for Trigger {
    fn drop(&mut self) {
        debug!(message = "trigger dropped", name = self.name);
    }
}

type Waiting = Pin<Box<dyn Future<Output = ()> + Send>>;

/// A future that resolves once the paired [`Trigger`] is cancelled or
/// dropped. Cloning is cheap, every clone resolves at the same time.
pub struct Tripwire {
    rx: watch::Receiver<bool>,
    waiting: Option<Waiting>,
}

impl Clone for Tripwire {
    fn clone(&self) -> Self {
        Self {
            rx: self.rx.clone(),
            waiting: None,
        }
    }
}

impl Future for Tripwire {
    type Output = ();

    fn poll(mut self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Self::Output> {
        let this = &mut *self;
        let waiting = this.waiting.get_or_insert_with(|| {
            let mut rx = this.rx.clone();
            Box::pin(async move {
                // an error means the trigger is gone, which trips as well
                let _ = rx.wait_for(|cancelled| *cancelled).await;
            })
        });

        waiting.as_mut().poll(cx)
    }
}

impl Tripwire {
    pub fn new(name: impl Into<String>) -> (Trigger, Tripwire) {
        let (tx, rx) = watch::channel(false);

        (
            Trigger {
                name: name.into(),
                tx,
            },
            Tripwire { rx, waiting: None },
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use futures::StreamExt;
    use std::time::{Duration, Instant};
    use tokio_stream::wrappers::ReceiverStream;

    macro_rules! assert_pending {
        ($var:expr) => {
            assert!(futures::poll!(&mut $var).is_pending());
        };
    }

    macro_rules! assert_ready {
        ($var:expr) => {
            assert!(futures::poll!(&mut $var).is_ready());
        };
    }

    #[tokio::test]
    async fn drop_trigger() {
        let (tr, mut tw) = Tripwire::new("");
        assert_pending!(tw);
        drop(tr);
        assert_ready!(tw);
    }

    #[tokio::test]
    async fn drop_trigger_before_poll() {
        let (tr, mut tw) = Tripwire::new("");
        drop(tr);
        assert_ready!(tw);
    }

    #[tokio::test]
    async fn cancel() {
        let (tr, mut tw) = Tripwire::new("");
        assert_pending!(tw);
        tr.cancel();
        assert_ready!(tw);
    }

    #[tokio::test]
    async fn cloned_tripwire() {
        let (tr, mut tw1) = Tripwire::new("");
        assert_pending!(tw1);
        let mut tw2 = tw1.clone();

        assert_pending!(tw1);
        assert_pending!(tw2);

        tr.cancel();

        assert_ready!(tw1);
        assert_ready!(tw2);

        // clones made after the cancel are tripped too
        let mut tw3 = tw2.clone();
        assert_ready!(tw3);
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 2)]
    async fn take_until_cancel() {
        let (tr, mut tw1) = Tripwire::new("");
        assert_pending!(tw1);

        let (tx, rx) = tokio::sync::mpsc::channel::<i32>(1);
        let mut stream = ReceiverStream::new(rx).take_until(tw1);

        assert_pending!(stream.next());
        tx.send(1).await.expect("send success");
        assert_eq!(stream.next().await, Some(1));
        assert_pending!(stream.next());

        tr.cancel();
        assert!(tx.send(2).await.is_ok());
        assert_eq!(stream.next().await, None);
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 2)]
    async fn with_timeout() {
        let (tr, tw) = Tripwire::new("");

        tokio::spawn(async move {
            tokio::time::sleep(Duration::from_millis(100)).await;
            tr.cancel();
        });

        let triggered = tokio::spawn(async move {
            let deadline = Instant::now() + Duration::from_secs(2);

            match tokio::time::timeout_at(deadline.into(), tw).await {
                Ok(()) => true,
                Err(_) => panic!("timeout"),
            }
        })
        .await
        .unwrap();

        assert!(triggered);
    }
}
