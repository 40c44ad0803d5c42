//! # Tower Guard
//!
//! `tower-guard` puts per-caller admission control from [`guard_limit`] in front of any
//! [Tower](https://github.com/tower-rs/tower) service, and lets handlers pull records out of a
//! [`guard_store::RecordStore`] by path template.
//!
//! ## The Managed Stack
//! [`AdmissionLayer`] on its own turns rejected callers away with [`GuardError::Rejected`] and
//! leaves every other error untouched. The [`ManagedGuardLayer`] is a pre-composed stack for
//! handlers that also update records:
//!
//! 1. **Admission**: Each call is identified with an [`Identify`] extractor and evaluated by a
//!    shared [`guard_limit::AdmissionController`]. Rejected calls never reach the inner service.
//! 2. **Timeouts**: An optional overall deadline, plus recognition of
//!    `guard_store::StoreError::Timeout` raised by an optimistic update inside the handler.
//! 3. **Error Mapping**: Every error is folded into the cloneable [`GuardError`] domain.
//!
//! ## Record Binding
//! [`RecordBinder`] declares which records a handler needs (`"apps/{appId}.json"` -> `"app"`)
//! and resolves them per request.

mod binder;
mod error;
mod identify;
mod layer;
mod managed_layer;
mod service;


pub use binder::BindError;
pub use binder::PropertyBinder;
pub use binder::RecordBinder;
pub use error::GuardError;
pub use identify::CallerInfo;
pub use identify::Identify;
pub use layer::AdmissionLayer;
pub use managed_layer::ManagedGuardLayer;
pub use service::AdmissionService;
pub use service::ResponseFuture;
