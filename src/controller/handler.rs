use tracing::trace;

use crate::cache::{Notification, key_of};
use crate::crd::Programmer;
use crate::queue::RateLimitingQueue;

/// Turn a notification into a queued key.
///
/// Fresh notifications skip the rate limiter, backoff is for failures only.
pub(super) fn enqueue(queue: &RateLimitingQueue<String>, notification: &Notification<Programmer>) {
    let key = match notification {
        Notification::Added(obj) => key_of(&obj.metadata),
        Notification::Updated { old, new } => {
            // periodic resync, or an update we have seen already
            if old.metadata.resource_version == new.metadata.resource_version {
                return;
            }

            key_of(&new.metadata)
        }
        Notification::Deleted(state) => state.key(),
    };

    trace!(message = "enqueue", key);

    queue.add(key);
}
