use std::sync::Arc;

use async_trait::async_trait;

use crate::BoxError;
use crate::HolderId;
use crate::RecordKey;

/// Opaque token identifying one version of a record.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub enum VersionToken {
    /// There is no record. As a write precondition: "only if nothing exists yet".
    Absent,
    /// An entity tag issued by the backend.
    Tag(String),
}

/// Raw record bytes together with their metadata and version.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Versioned {
    pub bytes: Vec<u8>,
    /// Holder of the advisory lease, kept as metadata beside the bytes.
    pub lease: Option<HolderId>,
    pub version: VersionToken,
}

/// Result of a conditional write.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum WriteOutcome {
    /// The write was applied. Carries the new version (`Absent` after a delete).
    Committed(VersionToken),
    /// The expected version was stale; nothing was written.
    Conflict,
}

impl WriteOutcome {
    pub fn is_committed(&self) -> bool {
        matches!(self, WriteOutcome::Committed(_))
    }
}

/// Failures raised by a backend.
#[derive(Debug, thiserror::Error)]
pub enum BackendError {
    #[error("backend unavailable: {0}")]
    Unavailable(String),

    #[error(transparent)]
    Other(BoxError),
}

/// The capability a [`RecordStore`](crate::RecordStore) needs from its storage.
///
/// Implementations must honour version tokens atomically: a conditional write or delete commits
/// only if the record's current version equals `expected`. The lease is metadata: it is stored
/// and versioned together with the bytes but never mixed into them.
#[async_trait]
pub trait Backend: Send + Sync {
    /// Fetch a record and its current version.
    async fn get(&self, key: &RecordKey) -> Result<Option<Versioned>, BackendError>;

    /// Write `bytes` and `lease` if the record's current version is `expected`.
    async fn put_if(
        &self,
        key: &RecordKey,
        bytes: Vec<u8>,
        lease: Option<HolderId>,
        expected: &VersionToken,
    ) -> Result<WriteOutcome, BackendError>;

    /// Delete the record if its current version is `expected`.
    async fn delete_if(
        &self,
        key: &RecordKey,
        expected: &VersionToken,
    ) -> Result<WriteOutcome, BackendError>;
}

#[async_trait]
impl<T: Backend + ?Sized> Backend for Arc<T> {
    async fn get(&self, key: &RecordKey) -> Result<Option<Versioned>, BackendError> {
        (**self).get(key).await
    }

    async fn put_if(
        &self,
        key: &RecordKey,
        bytes: Vec<u8>,
        lease: Option<HolderId>,
        expected: &VersionToken,
    ) -> Result<WriteOutcome, BackendError> {
        (**self).put_if(key, bytes, lease, expected).await
    }

    async fn delete_if(
        &self,
        key: &RecordKey,
        expected: &VersionToken,
    ) -> Result<WriteOutcome, BackendError> {
        (**self).delete_if(key, expected).await
    }
}
