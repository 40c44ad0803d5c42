use std::collections::HashMap;
use std::sync::atomic::AtomicBool;
use std::sync::atomic::AtomicU64;
use std::sync::atomic::Ordering;
use std::time::Duration;

use async_trait::async_trait;
use parking_lot::Mutex;
use rand::Rng;

use crate::Backend;
use crate::BackendError;
use crate::HolderId;
use crate::RecordKey;
use crate::VersionToken;
use crate::Versioned;
use crate::WriteOutcome;

#[derive(Debug)]
struct Stored {
    bytes: Vec<u8>,
    lease: Option<HolderId>,
    tag: String,
}

/// An in-process [`Backend`] with entity-tag versioning.
///
/// Every operation yields to the scheduler before touching state, the way a network round trip
/// would, so concurrent tasks genuinely interleave even on a single-threaded runtime. A random
/// per-operation latency can be added with [`MemoryBackend::with_latency`].
#[derive(Debug, Default)]
pub struct MemoryBackend {
    records: Mutex<HashMap<RecordKey, Stored>>,
    next_tag: AtomicU64,
    latency: Option<Duration>,
    offline: AtomicBool,
}

impl MemoryBackend {
    pub fn new() -> Self {
        Self::default()
    }

    /// Delay every operation by a random duration up to `max`.
    pub fn with_latency(mut self, max: Duration) -> Self {
        self.latency = Some(max);
        self
    }

    /// While offline, every operation fails with [`BackendError::Unavailable`].
    pub fn set_offline(&self, offline: bool) {
        self.offline.store(offline, Ordering::SeqCst);
    }

    /// Store raw bytes unconditionally, with no lease.
    pub fn insert(&self, key: impl Into<RecordKey>, bytes: impl Into<Vec<u8>>) {
        let tag = self.tag();
        self.records.lock().insert(
            key.into(),
            Stored {
                bytes: bytes.into(),
                lease: None,
                tag,
            },
        );
    }

    /// The raw bytes currently stored at `key`.
    pub fn raw(&self, key: &RecordKey) -> Option<Vec<u8>> {
        self.records.lock().get(key).map(|s| s.bytes.clone())
    }

    /// The lease holder currently recorded for `key`.
    pub fn lease(&self, key: &RecordKey) -> Option<HolderId> {
        self.records.lock().get(key).and_then(|s| s.lease.clone())
    }

    pub fn contains(&self, key: &RecordKey) -> bool {
        self.records.lock().contains_key(key)
    }

    pub fn len(&self) -> usize {
        self.records.lock().len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    fn tag(&self) -> String {
        format!("0x{:x}", self.next_tag.fetch_add(1, Ordering::Relaxed))
    }

    async fn round_trip(&self) -> Result<(), BackendError> {
        match self.latency {
            Some(max) => {
                let nanos = rand::rng().random_range(0..=max.as_nanos() as u64);
                tokio::time::sleep(Duration::from_nanos(nanos)).await;
            }
            None => tokio::task::yield_now().await,
        }
        if self.offline.load(Ordering::SeqCst) {
            return Err(BackendError::Unavailable("memory backend is offline".to_string()));
        }
        Ok(())
    }
}

fn version_matches(current: Option<&Stored>, expected: &VersionToken) -> bool {
    match (current, expected) {
        (None, VersionToken::Absent) => true,
        (Some(stored), VersionToken::Tag(tag)) => stored.tag == *tag,
        _ => false,
    }
}

#[async_trait]
impl Backend for MemoryBackend {
    async fn get(&self, key: &RecordKey) -> Result<Option<Versioned>, BackendError> {
        self.round_trip().await?;
        Ok(self.records.lock().get(key).map(|stored| Versioned {
            bytes: stored.bytes.clone(),
            lease: stored.lease.clone(),
            version: VersionToken::Tag(stored.tag.clone()),
        }))
    }

    async fn put_if(
        &self,
        key: &RecordKey,
        bytes: Vec<u8>,
        lease: Option<HolderId>,
        expected: &VersionToken,
    ) -> Result<WriteOutcome, BackendError> {
        self.round_trip().await?;
        let mut records = self.records.lock();
        if !version_matches(records.get(key), expected) {
            return Ok(WriteOutcome::Conflict);
        }
        let tag = self.tag();
        records.insert(
            key.clone(),
            Stored {
                bytes,
                lease,
                tag: tag.clone(),
            },
        );
        Ok(WriteOutcome::Committed(VersionToken::Tag(tag)))
    }

    async fn delete_if(
        &self,
        key: &RecordKey,
        expected: &VersionToken,
    ) -> Result<WriteOutcome, BackendError> {
        self.round_trip().await?;
        let mut records = self.records.lock();
        // Deleting nothing is never a match, even against `Absent`
        if records.get(key).is_none() || !version_matches(records.get(key), expected) {
            return Ok(WriteOutcome::Conflict);
        }
        records.remove(key);
        Ok(WriteOutcome::Committed(VersionToken::Absent))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn it_honours_version_tokens() {
        let backend = MemoryBackend::new();
        let key = RecordKey::from("k");

        assert_eq!(backend.get(&key).await.unwrap(), None);

        let WriteOutcome::Committed(v1) = backend
            .put_if(&key, b"one".to_vec(), None, &VersionToken::Absent)
            .await
            .unwrap()
        else {
            panic!("first write should commit");
        };

        // Creating again must fail, the record exists now
        assert_eq!(
            backend
                .put_if(&key, b"two".to_vec(), None, &VersionToken::Absent)
                .await
                .unwrap(),
            WriteOutcome::Conflict
        );

        let v2 = backend.put_if(&key, b"two".to_vec(), None, &v1).await.unwrap();
        assert!(v2.is_committed());

        // v1 is stale now
        assert_eq!(
            backend.put_if(&key, b"three".to_vec(), None, &v1).await.unwrap(),
            WriteOutcome::Conflict
        );
        assert_eq!(backend.delete_if(&key, &v1).await.unwrap(), WriteOutcome::Conflict);

        let current = backend.get(&key).await.unwrap().unwrap();
        assert_eq!(current.bytes, b"two");
        assert_eq!(
            backend.delete_if(&key, &current.version).await.unwrap(),
            WriteOutcome::Committed(VersionToken::Absent)
        );
        assert!(backend.is_empty());
        assert_eq!(
            backend.delete_if(&key, &VersionToken::Absent).await.unwrap(),
            WriteOutcome::Conflict
        );
    }

    #[tokio::test]
    async fn leases_live_beside_the_bytes() {
        let backend = MemoryBackend::new();
        let key = RecordKey::from("k");
        backend.insert(key.clone(), "{}");
        let current = backend.get(&key).await.unwrap().unwrap();
        assert_eq!(current.lease, None);

        let holder = HolderId::from("worker-1");
        let outcome = backend
            .put_if(&key, current.bytes, Some(holder.clone()), &current.version)
            .await
            .unwrap();
        assert!(outcome.is_committed());

        assert_eq!(backend.raw(&key).unwrap(), b"{}");
        assert_eq!(backend.lease(&key), Some(holder.clone()));
        assert_eq!(backend.get(&key).await.unwrap().unwrap().lease, Some(holder));
    }

    #[tokio::test]
    async fn containers_are_distinct_namespaces() {
        let backend = MemoryBackend::new();
        let plain = RecordKey::from("k");
        let boxed = RecordKey::new("k").in_container("c");

        backend.insert(plain.clone(), "plain");
        assert!(backend.get(&boxed).await.unwrap().is_none());
        assert_eq!(backend.raw(&plain).unwrap(), b"plain");
    }

    #[tokio::test]
    async fn it_fails_while_offline() {
        let backend = MemoryBackend::new();
        backend.set_offline(true);
        assert!(matches!(
            backend.get(&"k".into()).await,
            Err(BackendError::Unavailable(_))
        ));
        backend.set_offline(false);
        assert!(backend.get(&"k".into()).await.is_ok());
    }

    #[tokio::test]
    async fn test_latency_is_bounded() {
        tokio::time::pause();
        let backend = MemoryBackend::new().with_latency(Duration::from_millis(5));
        let start = tokio::time::Instant::now();
        backend.get(&"k".into()).await.unwrap();
        assert!(start.elapsed() <= Duration::from_millis(5));
    }
}
