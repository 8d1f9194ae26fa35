//! The Programmer controller.
//!
//! Notifications of the Programmer informer are turned into keys on a
//! rate limited work queue, a fixed number of workers take keys from the
//! queue and reconcile them one at a time.

mod deployment;
mod error;
mod handler;
mod reconcile;

use std::any::Any;
use std::panic::AssertUnwindSafe;
use std::sync::Arc;
use std::time::Duration;

use backoff::default_controller_rate_limiter;
use futures::FutureExt;
use kubernetes::{Api, Deployment};
use tracing::{debug, error, info};
use tripwire::Tripwire;

pub use deployment::{is_owned_by, labels, new_deployment};
pub use error::Error;
pub use reconcile::{REASON_RESOURCE_EXISTS, REASON_SYNCED};

use crate::cache::{HasSynced, Notification, Store, SyncError, wait_for_cache_sync};
use crate::crd::Programmer;
use crate::queue::RateLimitingQueue;
use crate::recorder::Recorder;
use crate::registry::Registry;

/// How long to wait for the informers' initial lists
const CACHE_SYNC_TIMEOUT: Duration = Duration::from_secs(5 * 60);

/// Delay before looking again at a Deployment the cache hasn't seen
const NOT_CACHED_RETRY: Duration = Duration::from_secs(1);

pub struct Controller {
    programmers: Store<Programmer>,
    deployments: Store<Deployment>,
    programmer_api: Arc<dyn Api<Programmer>>,
    deployment_api: Arc<dyn Api<Deployment>>,
    registry: Arc<Registry>,
    recorder: Recorder,
    queue: RateLimitingQueue<String>,
}

impl Controller {
    /// Must be called inside a tokio runtime.
    pub fn new(
        programmers: Store<Programmer>,
        deployments: Store<Deployment>,
        programmer_api: Arc<dyn Api<Programmer>>,
        deployment_api: Arc<dyn Api<Deployment>>,
        registry: Arc<Registry>,
        recorder: Recorder,
    ) -> Arc<Self> {
        Arc::new(Self {
            programmers,
            deployments,
            programmer_api,
            deployment_api,
            registry,
            recorder,
            queue: RateLimitingQueue::new(default_controller_rate_limiter()),
        })
    }

    /// The notification handler to register on the Programmer informer.
    pub fn handler(self: &Arc<Self>) -> impl Fn(&Notification<Programmer>) + Send + Sync + 'static {
        let controller = Arc::downgrade(self);

        move |notification| {
            if let Some(controller) = controller.upgrade() {
                handler::enqueue(&controller.queue, notification);
            }
        }
    }

    /// Wait for the caches, then process keys with `workers` workers until
    /// `shutdown` trips. Keys in flight are finished first.
    pub async fn run(self: Arc<Self>, workers: usize, shutdown: Tripwire) -> Result<(), Error> {
        info!(message = "waiting for caches to sync");

        let stores: [&dyn HasSynced; 2] = [&self.programmers, &self.deployments];
        match wait_for_cache_sync(&stores, CACHE_SYNC_TIMEOUT, shutdown.clone()).await {
            Ok(()) => {}
            Err(SyncError::Shutdown) => {
                self.queue.shutdown();
                return Ok(());
            }
            Err(err) => {
                self.queue.shutdown();
                return Err(err.into());
            }
        }

        info!(message = "starting workers", workers);

        let handles = (0..workers)
            .map(|id| {
                let controller = Arc::clone(&self);
                tokio::spawn(async move { controller.worker(id).await })
            })
            .collect::<Vec<_>>();

        shutdown.await;

        info!(message = "shutting down workers");
        self.queue.shutdown();

        for handle in handles {
            if let Err(err) = handle.await {
                error!(message = "worker exited abnormally", %err);
            }
        }

        info!(message = "workers stopped");

        Ok(())
    }

    async fn worker(&self, id: usize) {
        debug!(message = "worker started", worker = id);

        while self.process_next_item().await {}

        debug!(message = "worker stopped", worker = id);
    }

    /// Reconcile one key. Returns false once the queue is shut down.
    async fn process_next_item(&self) -> bool {
        let Some(key) = self.queue.get().await else {
            return false;
        };

        let result = AssertUnwindSafe(self.reconcile(&key))
            .catch_unwind()
            .await
            .unwrap_or_else(|panic| Err(Error::Panicked(panic_message(panic))));

        match result {
            Ok(()) => {
                self.queue.forget(&key);
                debug!(message = "synced", key);
            }
            Err(Error::NotCached { name }) => {
                // not a failure, the retry count stays as it is
                debug!(message = "deployment not cached yet", key, deployment = name);
                self.queue.add_after(key.clone(), NOT_CACHED_RETRY);
            }
            Err(err) => {
                crate::error::handle_error(&key, &err);

                if err.is_retryable() {
                    self.queue.add_rate_limited(key.clone());
                } else {
                    self.queue.forget(&key);
                }
            }
        }

        self.queue.done(&key);

        true
    }
}

fn panic_message(panic: Box<dyn Any + Send>) -> String {
    if let Some(msg) = panic.downcast_ref::<&str>() {
        msg.to_string()
    } else if let Some(msg) = panic.downcast_ref::<String>() {
        msg.clone()
    } else {
        "unknown panic".to_string()
    }
}
