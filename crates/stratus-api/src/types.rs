//! Wire types for the Stratus compute API (`/v1/`).
//!
//! Responses are modeled loosely: every field the control plane may omit or
//! send as `null` is an `Option`, and unknown fields are kept in `extra`.
//! Normalization into canonical records happens in `stratus-core`.

use std::collections::HashMap;

use serde::{Deserialize, Serialize};
use serde_json::Value;

// ── Instances ────────────────────────────────────────────────────────

/// Instance details, from `GET /v1/instances/{id}` and the bodies of
/// `POST` / `PATCH` on the same collection.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct InstanceResponse {
    pub id: String,
    #[serde(default)]
    pub name: Option<String>,
    #[serde(default)]
    pub description: Option<String>,
    pub flavor: FlavorResponse,
    pub image_id: String,
    /// One of: `BUILD`, `ACTIVE`, `SHUTOFF`, `ERROR`, `DELETING`.
    #[serde(default)]
    pub status: Option<String>,
    /// RFC 3339 creation timestamp.
    #[serde(default)]
    pub created: Option<String>,
    #[serde(default)]
    pub interfaces: Vec<InterfaceResponse>,
    /// Catch-all for additional fields not modeled above.
    #[serde(flatten)]
    pub extra: HashMap<String, Value>,
}

/// Compute-capacity class as embedded in an instance.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct FlavorResponse {
    pub id: String,
    #[serde(default)]
    pub vcpus: Option<u32>,
    /// Memory in MiB.
    #[serde(default)]
    pub ram: Option<u64>,
}

/// One network interface of an instance.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct InterfaceResponse {
    pub network_id: String,
    #[serde(default)]
    pub fixed_ip: Option<String>,
    #[serde(default)]
    pub primary: Option<bool>,
    #[serde(default)]
    pub security_groups: Vec<String>,
    #[serde(default)]
    pub floating_ip: Option<InterfaceFloatingIp>,
}

/// Floating IP binding as embedded in an interface.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct InterfaceFloatingIp {
    #[serde(default)]
    pub id: Option<String>,
    #[serde(default)]
    pub address: Option<String>,
}

/// Body of `POST /v1/instances`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CreateInstanceRequest {
    pub name: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub description: Option<String>,
    pub flavor_id: String,
    pub image_id: String,
    pub interfaces: Vec<InterfaceRequest>,
}

/// Interface specification used by create and add-interface requests.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct InterfaceRequest {
    pub network_id: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub fixed_ip: Option<String>,
    pub primary: bool,
    pub security_groups: Vec<String>,
}

/// Body of `PATCH /v1/instances/{id}`. Absent fields are left untouched.
///
/// `description` and `fixed_ip` use a nested option: `Some(None)` is sent as
/// `null` and clears the value.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct UpdateInstanceRequest {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub name: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub description: Option<Option<String>>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub add_interfaces: Vec<InterfaceRequest>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub remove_interfaces: Vec<String>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub update_interfaces: Vec<InterfaceUpdate>,
}

/// In-place change to one existing interface.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct InterfaceUpdate {
    pub network_id: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub fixed_ip: Option<Option<String>>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub primary: Option<bool>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub add_security_groups: Vec<String>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub remove_security_groups: Vec<String>,
}

// ── Floating IPs ─────────────────────────────────────────────────────

/// Floating IP details, from `GET /v1/floating-ips/{id}`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FloatingIpResponse {
    pub id: String,
    #[serde(default)]
    pub address: Option<String>,
    /// One of: `DOWN`, `ACTIVE`, `ERROR`.
    #[serde(default)]
    pub status: Option<String>,
    #[serde(default)]
    pub instance_id: Option<String>,
    #[serde(default)]
    pub network_id: Option<String>,
    #[serde(flatten)]
    pub extra: HashMap<String, Value>,
}

/// Body of `POST /v1/floating-ips/{id}/associate`: the interface to bind to.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct AttachmentTarget {
    pub instance_id: String,
    pub network_id: String,
}
