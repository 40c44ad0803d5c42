use std::future::Future;
use std::sync::Arc;
use std::time::Duration;

use opentelemetry::KeyValue;
use opentelemetry::global;
use opentelemetry::metrics::Counter;
use serde::Serialize;
use serde::de::DeserializeOwned;
use serde_json::Map;
use serde_json::Value;
use tokio::time::Instant;
use tokio::time::timeout_at;
use tracing::debug;
use tracing::trace;

use crate::Backend;
use crate::BoxError;
use crate::HolderId;
use crate::RecordKey;
use crate::StoreError;
use crate::VersionToken;
use crate::Versioned;
use crate::WriteOutcome;

#[derive(Clone, Debug)]
struct RecordStoreMetrics {
    conflicts: Counter<u64>,
    timeouts: Counter<u64>,
}

/// Optimistic, lock-free access to records held by a [`Backend`].
///
/// Records are stored as plain JSON, exactly as the caller's value serializes, so they can be
/// seeded or read by anything else sharing the backend. A lease lives next to the bytes as record
/// metadata.
///
/// A store is also a lease holder, identified by its [`HolderId`]. Two stores over the same
/// backend are two different holders; clones of one store share its identity.
#[derive(Debug)]
pub struct RecordStore<B>
where
    B: ?Sized,
{
    backend: Arc<B>,
    holder: HolderId,
    instruments: RecordStoreMetrics,
}

impl<B> Clone for RecordStore<B>
where
    B: ?Sized,
{
    fn clone(&self) -> Self {
        Self {
            backend: Arc::clone(&self.backend),
            holder: self.holder.clone(),
            instruments: self.instruments.clone(),
        }
    }
}

impl<B> RecordStore<B>
where
    B: Backend + ?Sized,
{
    /// Create a store over `backend` with a freshly generated holder id.
    pub fn new(backend: Arc<B>) -> Self {
        let meter = global::meter("record_store");
        let instruments = RecordStoreMetrics {
            conflicts: meter.u64_counter("record_store.conflicts").build(),
            timeouts: meter.u64_counter("record_store.timeouts").build(),
        };

        Self {
            backend,
            holder: HolderId::generate(),
            instruments,
        }
    }

    /// Act as lease holder `holder`.
    pub fn with_holder(mut self, holder: impl Into<HolderId>) -> Self {
        self.holder = holder.into();
        self
    }

    pub fn holder(&self) -> &HolderId {
        &self.holder
    }

    pub fn backend(&self) -> &Arc<B> {
        &self.backend
    }

    async fn fetch<T>(&self, key: &RecordKey) -> Result<Option<(T, Versioned)>, StoreError>
    where
        T: DeserializeOwned,
    {
        match self.backend.get(key).await? {
            Some(versioned) => Ok(Some((serde_json::from_slice(&versioned.bytes)?, versioned))),
            None => Ok(None),
        }
    }

    /// Whether a record currently exists at `key`.
    pub async fn exists(&self, key: &RecordKey) -> Result<bool, StoreError> {
        Ok(self.backend.get(key).await?.is_some())
    }

    /// Read the value stored at `key`, regardless of any lease.
    ///
    /// A missing record reads as `Value::Null`, or as an empty object if `ignore_missing` is set.
    pub async fn read(&self, key: &RecordKey, ignore_missing: bool) -> Result<Value, StoreError> {
        match self.fetch::<Value>(key).await? {
            Some((value, _)) => Ok(value),
            None if ignore_missing => Ok(Value::Object(Map::new())),
            None => Ok(Value::Null),
        }
    }

    /// Read and decode the value stored at `key`.
    pub async fn read_as<T>(&self, key: &RecordKey) -> Result<Option<T>, StoreError>
    where
        T: DeserializeOwned,
    {
        Ok(self.fetch::<T>(key).await?.map(|(value, _)| value))
    }

    /// Delete the record at `key`.
    ///
    /// Returns `false` without touching anything if there is no record, or if another holder has
    /// it leased. Deleting a record this store holds the lease on also ends that lease.
    pub async fn delete(&self, key: &RecordKey) -> Result<bool, StoreError> {
        loop {
            let Some(current) = self.backend.get(key).await? else {
                return Ok(false);
            };
            if current.lease.as_ref().is_some_and(|h| *h != self.holder) {
                debug!(%key, holder = %self.holder, "delete refused, leased by another holder");
                return Ok(false);
            }
            match self.backend.delete_if(key, &current.version).await? {
                WriteOutcome::Committed(_) => return Ok(true),
                // Changed underneath us; decide again on fresh state
                WriteOutcome::Conflict => self.conflicted(key, "delete"),
            }
        }
    }

    /// Take the advisory lease on `key`.
    ///
    /// Succeeds only if the record exists and nobody, including this store, holds its lease. The
    /// record's bytes are left untouched.
    pub async fn lock(&self, key: &RecordKey) -> Result<bool, StoreError> {
        loop {
            let Some(current) = self.backend.get(key).await? else {
                return Ok(false);
            };
            if current.lease.is_some() {
                return Ok(false);
            }
            let lease = Some(self.holder.clone());
            match self
                .backend
                .put_if(key, current.bytes, lease, &current.version)
                .await?
            {
                WriteOutcome::Committed(_) => {
                    debug!(%key, holder = %self.holder, "lease acquired");
                    return Ok(true);
                }
                WriteOutcome::Conflict => self.conflicted(key, "lock"),
            }
        }
    }

    /// Release the advisory lease on `key`.
    ///
    /// Fails if this store does not hold the lease (never took it, already released it, or lost
    /// it to a delete) or if the record no longer exists.
    pub async fn unlock(&self, key: &RecordKey) -> Result<bool, StoreError> {
        loop {
            let Some(current) = self.backend.get(key).await? else {
                return Ok(false);
            };
            if current.lease.as_ref() != Some(&self.holder) {
                return Ok(false);
            }
            match self
                .backend
                .put_if(key, current.bytes, None, &current.version)
                .await?
            {
                WriteOutcome::Committed(_) => {
                    debug!(%key, holder = %self.holder, "lease released");
                    return Ok(true);
                }
                WriteOutcome::Conflict => self.conflicted(key, "unlock"),
            }
        }
    }

    /// Read-modify-write `key` with compare-and-swap, retrying on conflict.
    ///
    /// `updater` receives the current value (`T::default()` if there is no record) and the
    /// number of conflicts seen so far. It may run several times for one update, so it must be a
    /// pure function of its inputs. Exactly one candidate is ever committed.
    ///
    /// The whole update, including any time spent suspended inside `updater`, must finish within
    /// `timeout`; otherwise it fails with [`StoreError::Timeout`] and nothing is written. An
    /// updater error is returned as [`StoreError::Updater`] and is not retried. A lease on the
    /// record is carried over unchanged.
    pub async fn optimistic_update<T, F, Fut, E>(
        &self,
        key: &RecordKey,
        mut updater: F,
        timeout: Duration,
    ) -> Result<T, StoreError>
    where
        T: Serialize + DeserializeOwned + Default,
        F: FnMut(T, u32) -> Fut,
        Fut: Future<Output = Result<T, E>>,
        E: Into<BoxError>,
    {
        let start = Instant::now();
        let deadline = start
            .checked_add(timeout)
            .unwrap_or_else(|| start + Duration::from_secs(3600 * 24 * 365));
        let mut attempts: u32 = 0;

        loop {
            let (current, lease, version) = match self.fetch::<T>(key).await? {
                Some((value, versioned)) => (value, versioned.lease, versioned.version),
                None => (T::default(), None, VersionToken::Absent),
            };

            let candidate = match timeout_at(deadline, updater(current, attempts)).await {
                Ok(Ok(candidate)) => candidate,
                Ok(Err(err)) => return Err(StoreError::Updater(err.into())),
                Err(_) => return Err(self.timed_out(key, attempts, start)),
            };
            if start.elapsed() > timeout {
                return Err(self.timed_out(key, attempts, start));
            }

            let bytes = serde_json::to_vec(&candidate)?;
            match self.backend.put_if(key, bytes, lease, &version).await? {
                WriteOutcome::Committed(_) => {
                    trace!(%key, attempts, "update committed");
                    return Ok(candidate);
                }
                WriteOutcome::Conflict => {
                    attempts = attempts.saturating_add(1);
                    self.conflicted(key, "optimistic_update");
                    if start.elapsed() > timeout {
                        return Err(self.timed_out(key, attempts, start));
                    }
                }
            }
        }
    }

    fn conflicted(&self, key: &RecordKey, operation: &'static str) {
        self.instruments
            .conflicts
            .add(1, &[KeyValue::new("operation", operation)]);
        trace!(%key, operation, "version conflict, retrying");
    }

    fn timed_out(&self, key: &RecordKey, attempts: u32, start: Instant) -> StoreError {
        let elapsed = start.elapsed();
        self.instruments.timeouts.add(1, &[]);
        debug!(%key, attempts, ?elapsed, "update timed out");
        StoreError::Timeout {
            key: key.clone(),
            attempts,
            elapsed,
        }
    }
}
