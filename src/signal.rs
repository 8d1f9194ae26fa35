use std::io;
use std::pin::{Pin, pin};
use std::task::{Context, Poll};

use futures::{Stream, StreamExt};
use pin_project_lite::pin_project;
use tokio::signal::unix::{Signal, SignalKind, signal};
use tokio::sync::mpsc;
use tracing::{error, info};

pub type SignalTx = mpsc::Sender<SignalTo>;
pub type SignalRx = mpsc::Receiver<SignalTo>;

/// Control messages that drive the shutdown of the process.
#[derive(Clone, Copy, Debug, PartialEq)]
pub enum SignalTo {
    /// Stop the workers and wait for the reconciles in flight
    Shutdown,
    /// Exit immediately
    Quit,
}

/// Forwards signal streams to a single receiver.
pub struct SignalHandler {
    tx: SignalTx,
}

impl SignalHandler {
    /// There is room for 2 messages, so a second Ctrl-C is never lost
    /// while the first one is handled.
    pub fn new() -> (Self, SignalRx) {
        let (tx, rx) = mpsc::channel(2);

        (Self { tx }, rx)
    }

    /// Spawn a task which forwards every element of `stream`.
    pub fn forever<T, S>(&mut self, stream: S)
    where
        T: Into<SignalTo> + Send + Sync,
        S: Stream<Item = T> + 'static + Send,
    {
        let tx = self.tx.clone();

        tokio::spawn(async move {
            let mut stream = pin!(stream);

            while let Some(value) = stream.next().await {
                if tx.send(value.into()).await.is_err() {
                    error!(message = "couldn't send signal");
                    break;
                }
            }
        });
    }
}

pin_project! {
    pub struct Signals {
        #[pin]
        sigint: Signal,
        #[pin]
        sigterm: Signal,
        #[pin]
        sigquit: Signal,
    }
}

impl Stream for Signals {
    type Item = SignalTo;

    fn poll_next(self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Option<Self::Item>> {
        let mut this = self.project();

        if this.sigint.poll_recv(cx).is_ready() {
            info!(message = "Signal received", signal = "SIGINT");
            return Poll::Ready(Some(SignalTo::Shutdown));
        }

        if this.sigterm.poll_recv(cx).is_ready() {
            info!(message = "Signal received", signal = "SIGTERM");
            return Poll::Ready(Some(SignalTo::Shutdown));
        }

        if this.sigquit.poll_recv(cx).is_ready() {
            info!(message = "Signal received", signal = "SIGQUIT");
            return Poll::Ready(Some(SignalTo::Quit));
        }

        Poll::Pending
    }
}

/// Signals from OS/user, must be called inside a runtime.
pub fn os_signals() -> io::Result<Signals> {
    Ok(Signals {
        sigint: signal(SignalKind::interrupt())?,
        sigterm: signal(SignalKind::terminate())?,
        sigquit: signal(SignalKind::quit())?,
    })
}

#[cfg(test)]
mod tests {
    use futures::stream;

    use super::*;

    #[tokio::test]
    async fn forward_stream() {
        let (mut handler, mut rx) = SignalHandler::new();
        handler.forever(stream::iter([SignalTo::Shutdown, SignalTo::Quit]));

        assert_eq!(rx.recv().await, Some(SignalTo::Shutdown));
        assert_eq!(rx.recv().await, Some(SignalTo::Quit));
    }
}
