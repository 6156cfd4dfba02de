// ── Floating IP domain types ──

use std::net::IpAddr;

use serde::{Deserialize, Serialize};
use strum::{Display, EnumString};

use super::ids::{FloatingIpId, InstanceId, NetworkRef};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Display, EnumString)]
#[strum(serialize_all = "UPPERCASE", ascii_case_insensitive)]
pub enum FloatingIpStatus {
    Down,
    Active,
    Error,
    Unknown,
}

impl FloatingIpStatus {
    pub fn is_error(self) -> bool {
        matches!(self, Self::Error)
    }
}

/// The attachment a floating IP is bound to.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct AttachmentRef {
    pub instance_id: InstanceId,
    pub network: NetworkRef,
}

/// The canonical FloatingIp type (observed only).
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct FloatingIp {
    pub id: FloatingIpId,
    pub address: Option<IpAddr>,
    pub status: FloatingIpStatus,
    pub bound_to: Option<AttachmentRef>,
}

impl FloatingIp {
    pub fn is_bound(&self) -> bool {
        self.bound_to.is_some()
    }

    /// `true` when bound to some attachment of the given instance.
    pub fn is_bound_to_instance(&self, instance: &InstanceId) -> bool {
        self.bound_to
            .as_ref()
            .is_some_and(|b| &b.instance_id == instance)
    }
}
