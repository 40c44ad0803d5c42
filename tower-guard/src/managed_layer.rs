use std::marker::PhantomData;
use std::sync::Arc;
use std::time::Duration;

use guard_limit::AdmissionController;
use guard_limit::RejectionCallback;
use tower::BoxError;
use tower::Layer;
use tower::Service;
use tower::util::BoxCloneSyncService;

use crate::AdmissionLayer;
use crate::GuardError;
use crate::identify::Identify;

/// Admission control plus a unified error domain.
///
/// Every error leaving this stack is a [`GuardError`]:
/// - **Rejected**: admission control turned the caller away; the inner service never ran.
/// - **Timeout**: a record update inside the handler ran out of budget
///   (`StoreError::Timeout`), or the optional overall deadline passed.
/// - **Inner**: anything else the inner service failed with.
pub struct ManagedGuardLayer<I, Req> {
    admission: AdmissionLayer<I>,
    timeout: Option<Duration>,
    _phantom: PhantomData<fn(Req)>,
}

// Deriving Clone would needlessly require `Req: Clone`.
impl<I: Clone, Req> Clone for ManagedGuardLayer<I, Req> {
    fn clone(&self) -> Self {
        Self {
            admission: self.admission.clone(),
            timeout: self.timeout,
            _phantom: PhantomData,
        }
    }
}

impl<S, I, Req> Layer<S> for ManagedGuardLayer<I, Req>
where
    I: Identify<Req> + Clone + Send + Sync + 'static,
    S: Service<Req, Error = BoxError> + Clone + Send + Sync + 'static,
    S::Future: Send + 'static,
    S::Response: 'static,
    Req: Send + 'static,
{
    type Service = BoxCloneSyncService<Req, S::Response, BoxError>;

    fn layer(&self, inner: S) -> Self::Service {
        // Timeout is outer so the deadline covers admission and the handler alike.
        let svc = tower::ServiceBuilder::new()
            .option_layer(self.timeout.map(tower::timeout::TimeoutLayer::new))
            .layer(self.admission.clone())
            .service(inner);

        let mapped_svc = tower::util::MapErr::new(svc, |err: BoxError| {
            BoxError::from(GuardError::classify(err))
        });

        BoxCloneSyncService::new(mapped_svc)
    }
}

impl<I, Req> ManagedGuardLayer<I, Req> {
    pub fn new(controller: Arc<AdmissionController>, identify: I) -> Self {
        Self {
            admission: AdmissionLayer::new(controller, identify),
            timeout: None,
            _phantom: PhantomData,
        }
    }

    /// Fail any call that takes longer than `timeout` with [`GuardError::Timeout`].
    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = Some(timeout);
        self
    }

    pub fn with_rejection_callback<C>(mut self, callback: C) -> Self
    where
        C: RejectionCallback + 'static,
    {
        self.admission = self.admission.with_rejection_callback(callback);
        self
    }

    pub fn disabled(mut self) -> Self {
        self.admission = self.admission.disabled();
        self
    }
}
