//! # guard-store
//!
//! `guard-store` layers optimistic concurrency control and advisory leases on top of a plain
//! key/value blob backend that offers nothing stronger than a conditional write.
//!
//! ## Core Philosophy
//!
//! The store never serializes writers with a mutex and never caches anything between calls.
//! Every operation re-reads the authoritative record and its version token, and every mutation is
//! a conditional write against that token. Whoever writes against the freshest token wins, and a
//! writer that read stale data can never win. This is what lets independent processes share one
//! backend safely.
//!
//! ## Key Concepts
//!
//! * **Backend**: The injected [`Backend`] capability (`get`, `put_if`, `delete_if`).
//! * **Optimistic update**: Read, transform, conditionally write, retry on conflict, all bounded
//!   by a wall-clock budget. Running out of budget yields [`StoreError::Timeout`].
//! * **Leases**: A holder marker stored inside the record itself, so taking or releasing a lease
//!   is just another conditional write.
//!
//! ## Example
//!
//! ```rust
//! use guard_store::MemoryBackend;
//! use guard_store::RecordStore;
//! use std::sync::Arc;
//! use std::time::Duration;
//!
//! # tokio::runtime::Runtime::new().unwrap().block_on(async {
//! let store = RecordStore::new(Arc::new(MemoryBackend::new()));
//! let key = "counters/visits".into();
//!
//! let visits: u64 = store
//!     .optimistic_update(
//!         &key,
//!         |n: u64, _attempt| async move { Ok::<_, std::io::Error>(n + 1) },
//!         Duration::from_secs(1),
//!     )
//!     .await
//!     .unwrap();
//! assert_eq!(visits, 1);
//! # });
//! ```

mod backend;
mod error;
mod key;
mod memory;
mod store;

pub use backend::Backend;
pub use backend::BackendError;
pub use backend::VersionToken;
pub use backend::Versioned;
pub use backend::WriteOutcome;
pub use error::BoxError;
pub use error::StoreError;
pub use key::HolderId;
pub use key::RecordKey;
pub use memory::MemoryBackend;
pub use store::RecordStore;
