// ── API-to-domain type conversions ──
//
// Bridges raw `stratus_api` wire types into canonical `stratus_core::model`
// records and back. Inbound conversions normalize everything the planner
// compares: blank strings become `None`, addresses are re-rendered in
// canonical form, and security-group lists collapse into sets. Converting
// the same response twice always yields equal records.

use std::collections::BTreeSet;
use std::net::IpAddr;

use chrono::{DateTime, Utc};

use stratus_api::types::{
    CreateInstanceRequest, FloatingIpResponse, InstanceResponse, InterfaceFloatingIp,
    InterfaceRequest, InterfaceResponse, InterfaceUpdate, UpdateInstanceRequest,
};

use crate::model::{
    AttachmentRef, Capacity, FloatingIp, FloatingIpBinding, FloatingIpStatus, Instance,
    InstanceStatus, NetworkAttachment, SecurityGroupId,
};
use crate::plan::InstanceChange;

const MIB: u64 = 1024 * 1024;

// ── Helpers ────────────────────────────────────────────────────────

/// Trim, and treat empty text as absent.
fn non_blank(raw: Option<String>) -> Option<String> {
    raw.map(|s| s.trim().to_owned()).filter(|s| !s.is_empty())
}

fn parse_ip(raw: Option<&str>) -> Option<IpAddr> {
    raw.and_then(|s| s.trim().parse().ok())
}

/// Re-render an address canonically (`2001:DB8::1` → `2001:db8::1`).
/// Unparseable input is dropped.
fn canonical_ip(raw: Option<&str>) -> Option<String> {
    parse_ip(raw).map(|ip| ip.to_string())
}

fn parse_datetime(raw: Option<&str>) -> Option<DateTime<Utc>> {
    raw.and_then(|s| DateTime::parse_from_rfc3339(s.trim()).ok())
        .map(|dt| dt.with_timezone(&Utc))
}

fn parse_instance_status(raw: Option<String>) -> Option<InstanceStatus> {
    non_blank(raw).map(|s| s.parse().unwrap_or(InstanceStatus::Unknown))
}

// ── Instance ───────────────────────────────────────────────────────

/// A binding without an id means "not bound".
fn binding(raw: InterfaceFloatingIp) -> Option<FloatingIpBinding> {
    let id = non_blank(raw.id)?;
    Some(FloatingIpBinding {
        id: id.into(),
        address: parse_ip(raw.address.as_deref()),
    })
}

impl From<InterfaceResponse> for NetworkAttachment {
    fn from(raw: InterfaceResponse) -> Self {
        Self {
            network: raw.network_id.trim().into(),
            fixed_ip: canonical_ip(raw.fixed_ip.as_deref()),
            primary: raw.primary.unwrap_or(false),
            security_groups: raw
                .security_groups
                .into_iter()
                .filter_map(|g| non_blank(Some(g)))
                .map(SecurityGroupId::from)
                .collect(),
            floating_ip: raw.floating_ip.and_then(binding),
        }
    }
}

impl From<InstanceResponse> for Instance {
    fn from(raw: InstanceResponse) -> Self {
        let capacity = (raw.flavor.vcpus.is_some() || raw.flavor.ram.is_some()).then(|| Capacity {
            vcpus: raw.flavor.vcpus,
            memory_bytes: raw.flavor.ram.map(|mib| mib.saturating_mul(MIB)),
        });

        Self {
            id: Some(raw.id.trim().into()),
            name: non_blank(raw.name).unwrap_or_default(),
            description: non_blank(raw.description),
            flavor: raw.flavor.id.trim().into(),
            image: raw.image_id.trim().into(),
            attachments: raw
                .interfaces
                .into_iter()
                .map(NetworkAttachment::from)
                .collect(),
            status: parse_instance_status(raw.status),
            created_at: parse_datetime(raw.created.as_deref()),
            capacity,
        }
    }
}

// ── Floating IP ────────────────────────────────────────────────────

impl From<FloatingIpResponse> for FloatingIp {
    fn from(raw: FloatingIpResponse) -> Self {
        let bound_to = match (non_blank(raw.instance_id), non_blank(raw.network_id)) {
            (Some(instance_id), Some(network)) => Some(AttachmentRef {
                instance_id: instance_id.into(),
                network: network.into(),
            }),
            _ => None,
        };

        Self {
            id: raw.id.trim().into(),
            address: parse_ip(raw.address.as_deref()),
            status: non_blank(raw.status)
                .and_then(|s| s.parse().ok())
                .unwrap_or(FloatingIpStatus::Unknown),
            bound_to,
        }
    }
}

// ── Outbound requests ──────────────────────────────────────────────

fn group_ids(groups: &BTreeSet<SecurityGroupId>) -> Vec<String> {
    groups.iter().map(ToString::to_string).collect()
}

impl From<&NetworkAttachment> for InterfaceRequest {
    fn from(attachment: &NetworkAttachment) -> Self {
        Self {
            network_id: attachment.network.to_string(),
            fixed_ip: non_blank(attachment.fixed_ip.clone()),
            primary: attachment.primary,
            security_groups: group_ids(&attachment.security_groups),
        }
    }
}

/// Floating IPs are not part of the create body; they are associated once
/// the instance is active.
impl From<&Instance> for CreateInstanceRequest {
    fn from(desired: &Instance) -> Self {
        Self {
            name: desired.name.clone(),
            description: desired.normalized_description().map(str::to_owned),
            flavor_id: desired.flavor.to_string(),
            image_id: desired.image.to_string(),
            interfaces: desired
                .attachments
                .iter()
                .map(InterfaceRequest::from)
                .collect(),
        }
    }
}

impl From<&InstanceChange> for UpdateInstanceRequest {
    fn from(change: &InstanceChange) -> Self {
        match change {
            InstanceChange::SetDescriptive { name, description } => Self {
                name: name.clone(),
                description: description.clone(),
                ..Self::default()
            },
            InstanceChange::AddAttachment(attachment) => Self {
                add_interfaces: vec![InterfaceRequest::from(attachment)],
                ..Self::default()
            },
            InstanceChange::RemoveAttachment { network } => Self {
                remove_interfaces: vec![network.to_string()],
                ..Self::default()
            },
            InstanceChange::ModifyAttachment {
                network,
                fixed_ip,
                primary,
            } => Self {
                update_interfaces: vec![InterfaceUpdate {
                    network_id: network.to_string(),
                    fixed_ip: fixed_ip.clone().map(Some),
                    primary: *primary,
                    ..InterfaceUpdate::default()
                }],
                ..Self::default()
            },
            InstanceChange::AddSecurityGroup { network, group } => Self {
                update_interfaces: vec![InterfaceUpdate {
                    network_id: network.to_string(),
                    add_security_groups: vec![group.to_string()],
                    ..InterfaceUpdate::default()
                }],
                ..Self::default()
            },
            InstanceChange::RemoveSecurityGroup { network, group } => Self {
                update_interfaces: vec![InterfaceUpdate {
                    network_id: network.to_string(),
                    remove_security_groups: vec![group.to_string()],
                    ..InterfaceUpdate::default()
                }],
                ..Self::default()
            },
        }
    }
}
