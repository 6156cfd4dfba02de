// ── Instance domain types ──

use std::collections::BTreeSet;
use std::net::IpAddr;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use strum::{Display, EnumString};

use super::ids::{FlavorId, FloatingIpId, ImageId, InstanceId, NetworkRef, SecurityGroupId};

/// Instance lifecycle status, as observed on the control plane.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Display, EnumString)]
#[strum(serialize_all = "UPPERCASE", ascii_case_insensitive)]
#[non_exhaustive]
pub enum InstanceStatus {
    Build,
    Active,
    Shutoff,
    Error,
    Deleting,
    Unknown,
}

impl InstanceStatus {
    /// Terminal failure; waiting any longer will not help.
    pub fn is_error(self) -> bool {
        matches!(self, Self::Error)
    }
}

/// Resources granted by the flavor, as reported by the control plane.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct Capacity {
    pub vcpus: Option<u32>,
    pub memory_bytes: Option<u64>,
}

/// The canonical Instance type.
///
/// The same shape is used for desired and observed records. Fields marked
/// computed are filled by the materializer and ignored by the planner.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Instance {
    /// Assigned by the control plane; `None` in desired records.
    #[serde(default)]
    pub id: Option<InstanceId>,
    pub name: String,
    #[serde(default)]
    pub description: Option<String>,

    // Immutable: a change here replaces the instance.
    pub flavor: FlavorId,
    pub image: ImageId,

    /// Order is irrelevant; attachments are matched by network reference.
    #[serde(default)]
    pub attachments: Vec<NetworkAttachment>,

    // Computed
    #[serde(default)]
    pub status: Option<InstanceStatus>,
    #[serde(default)]
    pub created_at: Option<DateTime<Utc>>,
    #[serde(default)]
    pub capacity: Option<Capacity>,
}

impl Instance {
    /// Start a desired-state record with no attachments.
    pub fn new(name: impl Into<String>, flavor: impl Into<FlavorId>, image: impl Into<ImageId>) -> Self {
        Self {
            id: None,
            name: name.into(),
            description: None,
            flavor: flavor.into(),
            image: image.into(),
            attachments: Vec::new(),
            status: None,
            created_at: None,
            capacity: None,
        }
    }

    #[must_use]
    pub fn with_description(mut self, description: impl Into<String>) -> Self {
        self.description = Some(description.into());
        self
    }

    #[must_use]
    pub fn with_attachment(mut self, attachment: NetworkAttachment) -> Self {
        self.attachments.push(attachment);
        self
    }

    pub fn attachment(&self, network: &NetworkRef) -> Option<&NetworkAttachment> {
        self.attachments.iter().find(|a| &a.network == network)
    }

    pub fn attachment_mut(&mut self, network: &NetworkRef) -> Option<&mut NetworkAttachment> {
        self.attachments.iter_mut().find(|a| &a.network == network)
    }

    pub fn primary_attachment(&self) -> Option<&NetworkAttachment> {
        self.attachments.iter().find(|a| a.primary)
    }

    /// Description with blank text treated as unset.
    pub fn normalized_description(&self) -> Option<&str> {
        self.description
            .as_deref()
            .map(str::trim)
            .filter(|d| !d.is_empty())
    }
}

/// A network interface binding on an instance.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct NetworkAttachment {
    pub network: NetworkRef,
    #[serde(default)]
    pub fixed_ip: Option<String>,
    #[serde(default)]
    pub primary: bool,
    #[serde(default)]
    pub security_groups: BTreeSet<SecurityGroupId>,
    #[serde(default)]
    pub floating_ip: Option<FloatingIpBinding>,
}

impl NetworkAttachment {
    pub fn new(network: impl Into<NetworkRef>) -> Self {
        Self {
            network: network.into(),
            fixed_ip: None,
            primary: false,
            security_groups: BTreeSet::new(),
            floating_ip: None,
        }
    }

    #[must_use]
    pub fn primary(mut self) -> Self {
        self.primary = true;
        self
    }

    #[must_use]
    pub fn with_fixed_ip(mut self, address: impl Into<String>) -> Self {
        self.fixed_ip = Some(address.into());
        self
    }

    #[must_use]
    pub fn with_security_group(mut self, group: impl Into<SecurityGroupId>) -> Self {
        self.security_groups.insert(group.into());
        self
    }

    #[must_use]
    pub fn with_floating_ip(mut self, id: impl Into<FloatingIpId>) -> Self {
        self.floating_ip = Some(FloatingIpBinding::new(id));
        self
    }

    pub fn floating_ip_id(&self) -> Option<&FloatingIpId> {
        self.floating_ip.as_ref().map(|b| &b.id)
    }

    /// Fixed address parsed as an IP literal.
    pub fn parsed_fixed_ip(&self) -> Option<IpAddr> {
        self.fixed_ip.as_deref().and_then(|s| s.trim().parse().ok())
    }
}

/// One-to-one binding of an attachment to a floating IP.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct FloatingIpBinding {
    pub id: FloatingIpId,
    /// Computed: the public address once bound.
    #[serde(default)]
    pub address: Option<IpAddr>,
}

impl FloatingIpBinding {
    pub fn new(id: impl Into<FloatingIpId>) -> Self {
        Self {
            id: id.into(),
            address: None,
        }
    }
}
