//! Desired-state reconciliation for Stratus compute instances.
//!
//! Given a desired [`Instance`] record and the last observed one, this crate
//! computes and applies the ordered sequence of control-plane operations
//! that converges the two:
//!
//! - **[`Reconciler`]**: facade over [`validate`](Reconciler::validate),
//!   [`plan`](Reconciler::plan), [`reconcile`](Reconciler::reconcile),
//!   [`refresh`](Reconciler::refresh) and [`destroy`](Reconciler::destroy).
//!   Holds the injected [`CloudApi`] client and [`ReconcileSettings`].
//!
//! - **[`Planner`]**: pure function from (desired, observed) to an
//!   [`OperationPlan`]. Immutable fields (flavor, image) force replacement;
//!   everything else is updated in place, floating-IP releases first and
//!   bindings last.
//!
//! - **[`Executor`]** / **[`Waiter`]**: sequential execution with
//!   completion polling, per-operation timeouts, and cancellation through a
//!   `tokio_util` [`CancellationToken`](tokio_util::sync::CancellationToken).
//!
//! - **Domain model** ([`model`]): canonical records shared by desired and
//!   observed state; [`convert`] materializes them from `stratus_api` wire
//!   types.

pub mod cloud;
pub mod config;
pub mod convert;
pub mod diff;
pub mod error;
pub mod executor;
pub mod model;
pub mod plan;
pub mod reconciler;
pub mod validate;
pub mod wait;

// ── Primary re-exports ──────────────────────────────────────────────
pub use cloud::CloudApi;
pub use config::{ReconcileSettings, Timeouts};
pub use error::CoreError;
pub use executor::{ExecutionReport, Executor, OperationResult};
pub use plan::{
    InstanceChange, Operation, OperationKind, OperationPlan, PlannedOperation, Planner,
};
pub use reconciler::{ReconcileReport, Reconciler};
pub use validate::{ValidationPolicy, Validator, Violation};
pub use wait::{Progress, Waiter};

pub use model::{
    AttachmentRef, Capacity, FlavorId, FloatingIp, FloatingIpBinding, FloatingIpId,
    FloatingIpStatus, ImageId, Instance, InstanceId, InstanceStatus, NetworkAttachment,
    NetworkRef, SecurityGroupId,
};
