use crate::cache::{KeyError, SyncError};
use crate::registry;

#[derive(Debug, thiserror::Error)]
pub enum Error {
    #[error("invalid resource key {key:?}, {source}")]
    InvalidKey { key: String, source: KeyError },

    #[error("{key}: deployment name must be specified")]
    InvalidSpec { key: String },

    #[error("Resource {name:?} already exists and is not managed by Programmer")]
    Conflict { name: String },

    #[error("Deployment {name:?} exists but isn't in the cache yet")]
    NotCached { name: String },

    #[error(transparent)]
    Api(#[from] kubernetes::Error),

    #[error(transparent)]
    Registry(#[from] registry::Error),

    #[error("reconcile panicked, {0}")]
    Panicked(String),

    #[error(transparent)]
    CacheSync(#[from] SyncError),
}

impl Error {
    /// Whether another attempt could succeed. Permanent errors need a
    /// change of the object, or of the program.
    pub fn is_retryable(&self) -> bool {
        !matches!(
            self,
            Error::InvalidKey { .. } | Error::InvalidSpec { .. } | Error::Registry(_)
        )
    }
}

#[cfg(test)]
mod tests {
    use kubernetes::ErrorResponse;

    use super::*;

    #[test]
    fn retryable() {
        let conflict = Error::Conflict { name: "web".into() };
        assert!(conflict.is_retryable());
        assert_eq!(
            conflict.to_string(),
            r#"Resource "web" already exists and is not managed by Programmer"#
        );

        let api = Error::Api(kubernetes::Error::Api(ErrorResponse {
            status: "Failure".into(),
            message: "the object has been modified".into(),
            reason: "Conflict".into(),
            code: 409,
        }));
        assert!(api.is_retryable());
        assert!(Error::Panicked("boom".into()).is_retryable());
        assert!(Error::NotCached { name: "web".into() }.is_retryable());

        assert!(!Error::InvalidSpec { key: "ns/alice".into() }.is_retryable());
        assert!(
            !Error::InvalidKey {
                key: "a/b/c".into(),
                source: KeyError::Format("a/b/c".into()),
            }
            .is_retryable()
        );
    }
}
