// ── Desired-state validation ──
//
// Shape checks only: nothing here calls the control plane, and nothing
// here looks at observed state. Whether a change is *legal* (immutable
// fields) is the planner's business.

use std::collections::{HashMap, HashSet};
use std::fmt;
use std::net::IpAddr;

use serde::{Deserialize, Serialize};

use crate::error::CoreError;
use crate::model::{FloatingIpId, Instance, NetworkRef};

// The control plane strips surrounding whitespace, so a padded value never
// reads back equal to what was sent.
const PADDED: &str = "must not have leading or trailing whitespace";

/// One structural problem in a desired-state record.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Violation {
    /// Field path, e.g. `attachments[1].fixed_ip`.
    pub path: String,
    pub reason: String,
}

impl Violation {
    pub fn new(path: impl Into<String>, reason: impl Into<String>) -> Self {
        Self {
            path: path.into(),
            reason: reason.into(),
        }
    }
}

impl fmt::Display for Violation {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}: {}", self.path, self.reason)
    }
}

/// Platform-dependent validation knobs.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ValidationPolicy {
    /// Every attachment must carry at least one security group.
    pub require_security_group: bool,
}

#[derive(Debug, Clone, Copy, Default)]
pub struct Validator {
    policy: ValidationPolicy,
}

impl Validator {
    pub fn new(policy: ValidationPolicy) -> Self {
        Self { policy }
    }

    /// Check a desired record. An empty list means the record is valid.
    pub fn validate(&self, desired: &Instance) -> Vec<Violation> {
        let mut violations = Vec::new();

        if desired.name.trim().is_empty() {
            violations.push(Violation::new("name", "must not be empty"));
        } else if desired.name.trim() != desired.name {
            violations.push(Violation::new("name", PADDED));
        }
        if desired.flavor.is_blank() {
            violations.push(Violation::new("flavor", "must reference a flavor"));
        } else if desired.flavor.is_padded() {
            violations.push(Violation::new("flavor", PADDED));
        }
        if desired.image.is_blank() {
            violations.push(Violation::new("image", "must reference an image"));
        } else if desired.image.is_padded() {
            violations.push(Violation::new("image", PADDED));
        }

        let primaries = desired.attachments.iter().filter(|a| a.primary).count();
        if primaries > 1 {
            violations.push(Violation::new(
                "attachments",
                format!("at most one attachment may be primary, found {primaries}"),
            ));
        }

        let mut seen_networks: HashSet<&NetworkRef> = HashSet::new();
        let mut floating_ips: HashMap<&FloatingIpId, usize> = HashMap::new();

        for (idx, attachment) in desired.attachments.iter().enumerate() {
            let at = |field: &str| format!("attachments[{idx}].{field}");

            if attachment.network.is_blank() {
                violations.push(Violation::new(at("network"), "must reference a network"));
            } else if attachment.network.is_padded() {
                violations.push(Violation::new(at("network"), PADDED));
            } else if !seen_networks.insert(&attachment.network) {
                violations.push(Violation::new(
                    at("network"),
                    format!("network {} is attached more than once", attachment.network),
                ));
            }

            if let Some(raw) = attachment.fixed_ip.as_deref() {
                if raw.trim().parse::<IpAddr>().is_err() {
                    violations.push(Violation::new(
                        at("fixed_ip"),
                        format!("{raw:?} is not an IPv4 or IPv6 address"),
                    ));
                }
            }

            if self.policy.require_security_group && attachment.security_groups.is_empty() {
                violations.push(Violation::new(
                    at("security_groups"),
                    "at least one security group is required on this platform",
                ));
            }
            if attachment.security_groups.iter().any(|g| g.is_blank()) {
                violations.push(Violation::new(
                    at("security_groups"),
                    "security group ids must not be empty",
                ));
            } else if attachment.security_groups.iter().any(|g| g.is_padded()) {
                violations.push(Violation::new(at("security_groups"), PADDED));
            }

            if let Some(binding) = &attachment.floating_ip {
                if binding.id.as_uuid().is_none() {
                    violations.push(Violation::new(
                        at("floating_ip"),
                        format!("{} is not a UUID", binding.id),
                    ));
                } else if let Some(first) = floating_ips.insert(&binding.id, idx) {
                    violations.push(Violation::new(
                        at("floating_ip"),
                        format!("{} is already bound by attachments[{first}]", binding.id),
                    ));
                }
            }
        }

        violations
    }

    /// Validate and turn any violation into [`CoreError::Validation`].
    pub fn ensure_valid(&self, desired: &Instance) -> Result<(), CoreError> {
        let violations = self.validate(desired);
        if violations.is_empty() {
            Ok(())
        } else {
            Err(CoreError::Validation { violations })
        }
    }
}

/// Validate with the default policy (security groups optional).
pub fn validate(desired: &Instance) -> Vec<Violation> {
    Validator::default().validate(desired)
}
