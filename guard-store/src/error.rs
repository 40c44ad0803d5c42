use std::time::Duration;

use crate::BackendError;
use crate::RecordKey;

pub type BoxError = Box<dyn std::error::Error + Send + Sync>;

/// Errors produced by a [`RecordStore`](crate::RecordStore).
///
/// Version conflicts never appear here: they are retried inside
/// [`optimistic_update`](crate::RecordStore::optimistic_update) and reported as a plain `false`
/// by the lease operations.
#[derive(Debug, thiserror::Error)]
pub enum StoreError {
    /// An optimistic update ran out of time. Nothing was written.
    #[error("update of {key} timed out after {elapsed:?} ({attempts} conflicting attempts)")]
    Timeout {
        key: RecordKey,
        attempts: u32,
        elapsed: Duration,
    },

    /// The updater itself failed. This is never retried.
    #[error("updater failed: {0}")]
    Updater(BoxError),

    #[error(transparent)]
    Backend(#[from] BackendError),

    /// A stored record could not be decoded, or a value could not be encoded.
    #[error("record codec error: {0}")]
    Codec(#[from] serde_json::Error),
}

impl StoreError {
    pub fn is_timeout(&self) -> bool {
        matches!(self, StoreError::Timeout { .. })
    }
}
