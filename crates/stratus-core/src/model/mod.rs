// ── Canonical domain model ──
//
// Every type in this module is the canonical representation of a compute
// entity. Desired records from the front end and observed records from the
// materializer share these shapes, which is what makes them diffable.

pub mod floating_ip;
pub mod ids;
pub mod instance;

// ── Re-exports ──────────────────────────────────────────────────────

pub use floating_ip::{AttachmentRef, FloatingIp, FloatingIpStatus};
pub use ids::{FlavorId, FloatingIpId, ImageId, InstanceId, NetworkRef, SecurityGroupId};
pub use instance::{Capacity, FloatingIpBinding, Instance, InstanceStatus, NetworkAttachment};
