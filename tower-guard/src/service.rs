use std::fmt;
use std::future::Future;
use std::ops::ControlFlow;
use std::pin::Pin;
use std::sync::Arc;
use std::task::Context;
use std::task::Poll;

use guard_limit::AdmissionController;
use guard_limit::RejectionCallback;
use guard_limit::RejectionKind;
use guard_limit::notify;
use opentelemetry::KeyValue;
use opentelemetry::global;
use opentelemetry::metrics::Counter;
use pin_project_lite::pin_project;
use tower::BoxError;
use tower::Service;
use tracing::debug;

use crate::error::GuardError;
use crate::identify::Identify;

#[derive(Clone, Debug)]
struct AdmissionServiceMetrics {
    rejected: Counter<u64>,
}

/// Runs admission control on every call before handing it to the inner service.
pub struct AdmissionService<S, I> {
    inner: S,
    controller: Arc<AdmissionController>,
    identify: I,
    on_reject: Option<Arc<dyn RejectionCallback>>,
    enabled: bool,
    instruments: AdmissionServiceMetrics,
}

pin_project! {
    /// Either the inner service's future, or an immediate rejection.
    #[project = ResponseFutureProj]
    pub enum ResponseFuture<F> {
        Admitted {
            #[pin]
            inner: F,
        },
        Rejected {
            error: GuardError,
        },
    }
}

impl<F, T> Future for ResponseFuture<F>
where
    F: Future<Output = Result<T, BoxError>>,
{
    type Output = Result<T, BoxError>;

    fn poll(self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Self::Output> {
        match self.project() {
            ResponseFutureProj::Admitted { inner } => inner.poll(cx),
            ResponseFutureProj::Rejected { error } => Poll::Ready(Err(Box::new(error.clone()))),
        }
    }
}

impl<S, I> Clone for AdmissionService<S, I>
where
    S: Clone,
    I: Clone,
{
    fn clone(&self) -> Self {
        Self {
            inner: self.inner.clone(),
            controller: Arc::clone(&self.controller),
            identify: self.identify.clone(),
            on_reject: self.on_reject.clone(),
            enabled: self.enabled,
            instruments: self.instruments.clone(),
        }
    }
}

impl<S, I> fmt::Debug for AdmissionService<S, I>
where
    S: fmt::Debug,
{
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("AdmissionService")
            .field("inner", &self.inner)
            .field("controller", &self.controller)
            .field("enabled", &self.enabled)
            .field("has_rejection_callback", &self.on_reject.is_some())
            .finish_non_exhaustive()
    }
}

impl<S, I, Req> Service<Req> for AdmissionService<S, I>
where
    S: Service<Req, Error = BoxError>,
    I: Identify<Req>,
{
    type Response = S::Response;
    type Error = BoxError;
    type Future = ResponseFuture<S::Future>;

    fn poll_ready(&mut self, cx: &mut Context<'_>) -> Poll<Result<(), Self::Error>> {
        self.inner.poll_ready(cx)
    }

    fn call(&mut self, req: Req) -> Self::Future {
        if !self.enabled {
            return ResponseFuture::Admitted {
                inner: self.inner.call(req),
            };
        }

        let caller = self.identify.identify(&req);
        match self
            .controller
            .evaluate(&caller.identity, &caller.endpoint, &caller.method)
        {
            ControlFlow::Continue(()) => ResponseFuture::Admitted {
                inner: self.inner.call(req),
            },
            ControlFlow::Break(rejection) => {
                let kind = match rejection.kind {
                    RejectionKind::Throttled { .. } => "throttled",
                    RejectionKind::Escalated { .. } => "escalated",
                    RejectionKind::Banned { .. } => "banned",
                };
                self.instruments
                    .rejected
                    .add(1, &[KeyValue::new("kind", kind)]);
                debug!(%rejection, "call rejected by admission control");

                if let Some(callback) = &self.on_reject {
                    notify(callback.as_ref(), &rejection);
                }
                ResponseFuture::Rejected {
                    error: GuardError::Rejected {
                        reason: rejection.reason,
                    },
                }
            }
        }
    }
}

impl<S, I> AdmissionService<S, I> {
    pub fn new(inner: S, controller: Arc<AdmissionController>, identify: I) -> Self {
        let meter = global::meter("admission_service");
        let instruments = AdmissionServiceMetrics {
            rejected: meter.u64_counter("admission.rejected").build(),
        };

        Self {
            inner,
            controller,
            identify,
            on_reject: None,
            enabled: true,
            instruments,
        }
    }

    pub fn with_rejection_callback(mut self, callback: Arc<dyn RejectionCallback>) -> Self {
        self.on_reject = Some(callback);
        self
    }

    /// Pass every call straight through without consulting the controller.
    pub fn with_enabled(mut self, enabled: bool) -> Self {
        self.enabled = enabled;
        self
    }
}
