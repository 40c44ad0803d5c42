use std::collections::HashMap;
use std::collections::VecDeque;
use std::ops::ControlFlow;
use std::panic::AssertUnwindSafe;
use std::sync::Arc;
use std::time::Duration;

use parking_lot::Mutex;
use parking_lot::RwLock;
use quanta::Clock;
use quanta::Instant;
use tracing::debug;
use tracing::info;
use tracing::warn;

use crate::AdmissionConfig;
use crate::Rejection;
use crate::RejectionCallback;
use crate::RejectionKind;

/// Admission state for a single identity.
///
/// Timestamps are nanoseconds from the controller's anchor, oldest first.
#[derive(Debug, Default)]
struct CallerWindow {
    requests: VecDeque<u64>,
    violations: VecDeque<u64>,
    banned_until: Option<u64>,
}

impl CallerWindow {
    fn prune(&mut self, now: u64, retention_ns: u64) {
        for history in [&mut self.requests, &mut self.violations] {
            while history
                .front()
                .is_some_and(|&ts| now.saturating_sub(ts) >= retention_ns)
            {
                history.pop_front();
            }
        }
    }

    fn requests_within(&self, now: u64, window_ns: u64) -> usize {
        self.requests
            .iter()
            .rev()
            .take_while(|&&ts| now.saturating_sub(ts) < window_ns)
            .count()
    }
}

/// Sliding multi-window admission controller with escalating bans.
///
/// Every identity gets its own lock, so calls from one caller are linearized while distinct
/// callers proceed in parallel. State is created on first sight of an identity and is kept for
/// the lifetime of the controller.
#[derive(Debug)]
pub struct AdmissionController {
    config: AdmissionConfig,
    callers: RwLock<HashMap<String, Arc<Mutex<CallerWindow>>>>,
    clock: Clock,
    anchor: Instant,
}

impl AdmissionController {
    pub fn new(config: AdmissionConfig) -> Self {
        Self::with_clock(config, Clock::new())
    }

    /// Create a controller driven by `clock`, e.g. a `quanta::Clock::mock()`.
    pub fn with_clock(config: AdmissionConfig, clock: Clock) -> Self {
        let anchor = clock.now();
        Self {
            config,
            callers: RwLock::new(HashMap::new()),
            clock,
            anchor,
        }
    }

    pub fn config(&self) -> &AdmissionConfig {
        &self.config
    }

    /// Number of identities the controller has state for.
    pub fn tracked_identities(&self) -> usize {
        self.callers.read().len()
    }

    /// Decide whether to admit a call, notifying `on_reject` if it is turned away.
    ///
    /// Returns `true` if the call is admitted. Callback failures are logged and never change the
    /// returned decision.
    pub fn accept(
        &self,
        identity: &str,
        endpoint: &str,
        method: &str,
        on_reject: Option<&dyn RejectionCallback>,
    ) -> bool {
        match self.evaluate(identity, endpoint, method) {
            ControlFlow::Continue(()) => true,
            ControlFlow::Break(rejection) => {
                if let Some(callback) = on_reject {
                    notify(callback, &rejection);
                }
                false
            }
        }
    }

    /// Decide whether to admit a call and record it.
    ///
    /// A rejected call still counts toward future windows, unless the caller is banned, in which
    /// case nothing is recorded at all.
    pub fn evaluate(
        &self,
        identity: &str,
        endpoint: &str,
        method: &str,
    ) -> ControlFlow<Rejection> {
        let caller = self.caller(identity);
        let mut state = caller.lock();
        // Read the clock under the caller's lock so its histories stay ordered
        let now = self.now();

        let rejection = |reason: String, kind: RejectionKind| Rejection {
            identity: identity.to_string(),
            endpoint: endpoint.to_string(),
            method: method.to_string(),
            reason,
            kind,
        };

        if let Some(until) = state.banned_until
            && now < until
        {
            let remaining = Duration::from_nanos(until - now);
            debug!(identity, ?remaining, "rejecting banned caller");
            return ControlFlow::Break(rejection(
                format!("banned for {} more milliseconds", remaining.as_millis()),
                RejectionKind::Banned { remaining },
            ));
        }

        state.prune(now, nanos(self.config.retention()));

        let breach = self.config.windows().iter().find_map(|window| {
            let count = state.requests_within(now, nanos(window.duration));
            (count >= window.max.get()).then_some((window.duration, count))
        });

        state.requests.push_back(now);

        let Some((window, count)) = breach else {
            return ControlFlow::Continue(());
        };

        state.violations.push_back(now);
        let mut reason = format!("{count} calls in {} milliseconds", window.as_millis());
        debug!(identity, endpoint, method, %reason, "rejecting call");

        let kind = if state.violations.len() >= self.config.max_violations().get() {
            let ban = self.config.ban_duration();
            state.requests.clear();
            state.violations.clear();
            state.banned_until = Some(now.saturating_add(nanos(ban)));
            reason.push_str(&format!(". Banned for {} milliseconds", ban.as_millis()));
            info!(identity, ?ban, "banning caller");
            RejectionKind::Escalated { ban }
        } else {
            RejectionKind::Throttled { window, count }
        };

        ControlFlow::Break(rejection(reason, kind))
    }

    fn caller(&self, identity: &str) -> Arc<Mutex<CallerWindow>> {
        if let Some(caller) = self.callers.read().get(identity) {
            return Arc::clone(caller);
        }
        Arc::clone(self.callers.write().entry(identity.to_string()).or_default())
    }

    fn now(&self) -> u64 {
        self.clock.now().duration_since(self.anchor).as_nanos() as u64
    }
}

fn nanos(duration: Duration) -> u64 {
    u64::try_from(duration.as_nanos()).unwrap_or(u64::MAX)
}

/// Deliver a rejection to `callback`, swallowing any error or panic it raises.
///
/// Rejections caused by an ongoing ban are not delivered.
pub fn notify(callback: &dyn RejectionCallback, rejection: &Rejection) {
    if !rejection.is_reportable() {
        return;
    }
    match std::panic::catch_unwind(AssertUnwindSafe(|| callback.on_rejection(rejection))) {
        Ok(Ok(())) => {}
        Ok(Err(err)) => warn!(%rejection, error = %err, "rejection callback failed"),
        Err(_) => warn!(%rejection, "rejection callback panicked"),
    }
}
