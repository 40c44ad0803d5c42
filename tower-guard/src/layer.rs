use std::fmt;
use std::sync::Arc;

use guard_limit::AdmissionController;
use guard_limit::RejectionCallback;
use tower::Layer;

use crate::service::AdmissionService;

/// Applies admission control to requests.
pub struct AdmissionLayer<I> {
    controller: Arc<AdmissionController>,
    identify: I,
    on_reject: Option<Arc<dyn RejectionCallback>>,
    enabled: bool,
}

impl<I> Clone for AdmissionLayer<I>
where
    I: Clone,
{
    fn clone(&self) -> Self {
        Self {
            controller: Arc::clone(&self.controller),
            identify: self.identify.clone(),
            on_reject: self.on_reject.clone(),
            enabled: self.enabled,
        }
    }
}

impl<I> fmt::Debug for AdmissionLayer<I> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("AdmissionLayer")
            .field("controller", &self.controller)
            .field("enabled", &self.enabled)
            .finish_non_exhaustive()
    }
}

impl<I> AdmissionLayer<I> {
    /// Create an AdmissionLayer
    ///
    /// `identify` extracts the caller from each request.
    pub fn new(controller: Arc<AdmissionController>, identify: I) -> Self {
        AdmissionLayer {
            controller,
            identify,
            on_reject: None,
            enabled: true,
        }
    }

    /// Report every reportable rejection to `callback`.
    ///
    /// Callback failures never change the outcome of a call.
    pub fn with_rejection_callback<C>(mut self, callback: C) -> Self
    where
        C: RejectionCallback + 'static,
    {
        self.on_reject = Some(Arc::new(callback));
        self
    }

    /// Turn admission control off; calls go straight to the inner service.
    pub fn disabled(mut self) -> Self {
        self.enabled = false;
        self
    }
}

impl<I, S> Layer<S> for AdmissionLayer<I>
where
    I: Clone,
{
    type Service = AdmissionService<S, I>;

    fn layer(&self, service: S) -> Self::Service {
        let svc = AdmissionService::new(service, Arc::clone(&self.controller), self.identify.clone())
            .with_enabled(self.enabled);
        match &self.on_reject {
            Some(callback) => svc.with_rejection_callback(Arc::clone(callback)),
            None => svc,
        }
    }
}
