// ── Runtime settings ──
//
// Plain data handed to the `Reconciler`. This crate never reads files or
// the environment; `stratus-config` builds these from user configuration.

use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::validate::ValidationPolicy;

/// Per-operation wait budgets.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct Timeouts {
    pub create: Duration,
    pub update: Duration,
    pub delete: Duration,
    pub associate: Duration,
    pub disassociate: Duration,
}

impl Default for Timeouts {
    fn default() -> Self {
        Self {
            create: Duration::from_secs(10 * 60),
            update: Duration::from_secs(5 * 60),
            delete: Duration::from_secs(10 * 60),
            associate: Duration::from_secs(2 * 60),
            disassociate: Duration::from_secs(2 * 60),
        }
    }
}

/// Everything the reconciler needs besides the client.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct ReconcileSettings {
    pub timeouts: Timeouts,
    pub poll_interval: Duration,
    pub validation: ValidationPolicy,
}

impl Default for ReconcileSettings {
    fn default() -> Self {
        Self {
            timeouts: Timeouts::default(),
            poll_interval: Duration::from_secs(5),
            validation: ValidationPolicy::default(),
        }
    }
}
