//! # guard-limit
//!
//! `guard-limit` provides per-caller admission control over several sliding windows at once,
//! escalating repeat offenders to a temporary ban.
//!
//! ## Core Philosophy
//!
//! Every caller owns a small, independent history: the instants of its recent requests and the
//! instants at which it broke a window. Admission is decided lazily at the moment of the call by
//! pruning that history to the retention horizon and counting what is left. There are no
//! background sweepers or timers.
//!
//! ## Key Concepts
//!
//! * **Windows**: A set of `(duration, max)` thresholds, evaluated shortest first.
//! * **Violations**: At most one is recorded per call, for the first window that is full.
//! * **Bans**: Once a caller accumulates enough violations, its history is wiped and every call
//!   is rejected until the ban expires.
//! * **Per-identity linearization**: All bookkeeping for one identity happens under that
//!   identity's own lock, so distinct callers never contend with each other.
//!
//! ## Example
//!
//! ```rust
//! use guard_limit::AdmissionConfig;
//! use guard_limit::AdmissionController;
//! use std::num::NonZeroUsize;
//! use std::time::Duration;
//!
//! let config = AdmissionConfig::builder()
//!     .window(Duration::from_secs(1), NonZeroUsize::new(10).unwrap())
//!     .build()
//!     .unwrap();
//! let controller = AdmissionController::new(config);
//!
//! if controller.accept("10.0.0.1", "orders", "GET", None) {
//!     // Request allowed
//! }
//! ```

use std::error::Error;
use std::fmt;
use std::time::Duration;

mod caller;
mod config;
mod controller;

pub use caller::UNKNOWN_IDENTITY;
pub use caller::endpoint_from_url;
pub use caller::identity_from_forwarded;
pub use config::AdmissionConfig;
pub use config::AdmissionConfigBuilder;
pub use config::ConfigError;
pub use config::Window;
pub use controller::AdmissionController;
pub use controller::notify;

/// Boxed error type returned by rejection callbacks.
pub type BoxError = Box<dyn Error + Send + Sync>;

/// Why a call was turned away.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RejectionKind {
    /// A window was full. One violation was recorded against the caller.
    Throttled { window: Duration, count: usize },
    /// This call's violation pushed the caller over the threshold and started a ban.
    Escalated { ban: Duration },
    /// The caller is serving a ban. Nothing was recorded.
    Banned { remaining: Duration },
}

/// A rejected call, as reported to callbacks and middleware.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Rejection {
    pub identity: String,
    pub endpoint: String,
    pub method: String,
    /// Human readable reason, e.g. `"10 calls in 1000 milliseconds"`.
    pub reason: String,
    pub kind: RejectionKind,
}

impl Rejection {
    /// Calls rejected because of an ongoing ban are not reported to callbacks.
    pub fn is_reportable(&self) -> bool {
        !matches!(self.kind, RejectionKind::Banned { .. })
    }
}

impl fmt::Display for Rejection {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "{} {} from {} rejected: {}",
            self.method, self.endpoint, self.identity, self.reason
        )
    }
}

/// Receives every reportable rejection.
///
/// Callbacks run synchronously on the rejecting thread, after the caller's lock has been
/// released. An error (or a panic) raised by a callback is logged and otherwise ignored; it
/// never changes the admission decision.
pub trait RejectionCallback: Send + Sync {
    fn on_rejection(&self, rejection: &Rejection) -> Result<(), BoxError>;
}

impl<F> RejectionCallback for F
where
    F: Fn(&Rejection) -> Result<(), BoxError> + Send + Sync,
{
    fn on_rejection(&self, rejection: &Rejection) -> Result<(), BoxError> {
        self(rejection)
    }
}
