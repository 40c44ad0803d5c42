use guard_store::StoreError;
use tower::BoxError;

/// Errors produced by the Tower Guard middleware stack.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum GuardError {
    /// The caller was turned away by admission control.
    ///
    /// The inner service was never called.
    #[error("Too many requests: {reason}")]
    Rejected {
        /// Why, e.g. `"10 calls in 1000 milliseconds"`.
        reason: String,
    },

    /// A record update, or the request as a whole, ran out of time.
    #[error("Request has timed out")]
    Timeout,

    /// An unexpected error occurred in the inner service.
    ///
    /// The string contains the `Display` representation of the inner error.
    #[error("Internal service error: {0}")]
    Inner(String),
}

impl GuardError {
    /// Fold an arbitrary service error into the guard domain.
    ///
    /// Store timeouts and tower timeouts become [`GuardError::Timeout`]; every other store error,
    /// like any foreign error, becomes [`GuardError::Inner`].
    pub fn classify(err: BoxError) -> GuardError {
        if let Some(guard_err) = err.downcast_ref::<GuardError>() {
            return guard_err.clone();
        }
        if let Some(store_err) = err.downcast_ref::<StoreError>()
            && store_err.is_timeout()
        {
            return GuardError::Timeout;
        }
        if err.is::<tower::timeout::error::Elapsed>() {
            return GuardError::Timeout;
        }
        GuardError::Inner(err.to_string())
    }
}

#[cfg(test)]
mod tests {
    use std::time::Duration;

    use guard_store::BackendError;

    use super::*;

    #[test]
    fn it_classifies_store_errors_by_variant() {
        let timeout = StoreError::Timeout {
            key: "test.json".into(),
            attempts: 3,
            elapsed: Duration::from_millis(5),
        };
        assert_eq!(GuardError::classify(timeout.into()), GuardError::Timeout);

        let offline = StoreError::Backend(BackendError::Unavailable("down".to_string()));
        assert_eq!(
            GuardError::classify(offline.into()),
            GuardError::Inner("backend unavailable: down".to_string())
        );
    }

    #[test]
    fn it_keeps_guard_errors_and_wraps_the_rest() {
        let rejected = GuardError::Rejected {
            reason: "1 calls in 1000 milliseconds".to_string(),
        };
        assert_eq!(GuardError::classify(rejected.clone().into()), rejected);
        assert_eq!(
            GuardError::classify(tower::timeout::error::Elapsed::new().into()),
            GuardError::Timeout
        );
        assert_eq!(
            GuardError::classify("boom".into()),
            GuardError::Inner("boom".to_string())
        );
    }

    #[test]
    fn a_timeout_is_not_recognised_by_message() {
        let lookalike: BoxError = "update of test.json timed out".into();
        assert!(matches!(
            GuardError::classify(lookalike),
            GuardError::Inner(_)
        ));
    }
}
