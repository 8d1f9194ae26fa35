//! Process wide error reporting.

use tracing::error;

use crate::controller::Error;

/// Report a failed reconcile of `key`. Whether the key is retried is up to
/// the caller.
pub fn handle_error(key: &str, err: &Error) {
    match err {
        Error::Panicked(reason) => {
            error!(message = "reconcile panicked", key, reason, retry = true);
        }
        _ => {
            error!(
                message = "error syncing",
                key,
                %err,
                retry = err.is_retryable(),
            );
        }
    }
}
