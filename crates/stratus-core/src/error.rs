// ── Core error types ──
//
// Every failure the reconciliation core can report. Remote failures keep
// the underlying `stratus_api::Error` as their source so nothing the
// control plane said is lost; `from_remote` routes the two statuses the
// core reasons about (not found, conflict) into their own variants.

use std::time::Duration;

use thiserror::Error;

use crate::validate::Violation;

/// Unified error type for the core crate.
#[derive(Debug, Error)]
pub enum CoreError {
    // ── Pre-flight errors (no remote mutation happened) ──────────────
    #[error("Validation failed: {}", summarize(.violations))]
    Validation { violations: Vec<Violation> },

    #[error("Cannot plan: {reason}")]
    Plan { reason: String },

    // ── Remote errors ────────────────────────────────────────────────
    #[error("{operation} failed: {source}")]
    Remote {
        operation: String,
        #[source]
        source: stratus_api::Error,
    },

    #[error("Conflict: {message}")]
    Conflict { message: String },

    #[error("{entity_type} not found: {identifier}")]
    NotFound {
        entity_type: String,
        identifier: String,
    },

    // ── Wait errors ──────────────────────────────────────────────────
    #[error("Timed out after {}s waiting for {target}", .after.as_secs())]
    Timeout { target: String, after: Duration },

    #[error("Gave up waiting for {target}: {reason}")]
    WaitFailed { target: String, reason: String },

    #[error("Cancelled while {target}")]
    Cancelled { target: String },
}

impl CoreError {
    /// Classify a failed Cloud API call.
    ///
    /// `entity` names the resource the call addressed (`"instance"`,
    /// `"floating IP"`) and `identifier` its id; both are only used when the
    /// control plane answers "not found".
    pub fn from_remote(
        operation: impl Into<String>,
        entity: &str,
        identifier: &str,
        err: stratus_api::Error,
    ) -> Self {
        if err.is_not_found() {
            Self::NotFound {
                entity_type: entity.to_owned(),
                identifier: identifier.to_owned(),
            }
        } else if err.is_conflict() {
            Self::Conflict {
                message: err.to_string(),
            }
        } else {
            Self::Remote {
                operation: operation.into(),
                source: err,
            }
        }
    }

    /// `true` for errors raised before anything was sent to the control plane.
    pub fn is_preflight(&self) -> bool {
        matches!(self, Self::Validation { .. } | Self::Plan { .. })
    }

    /// `true` when re-running reconciliation later may succeed without any
    /// change to the desired record.
    pub fn is_retryable(&self) -> bool {
        match self {
            Self::Remote { source, .. } => source.is_transient(),
            Self::Timeout { .. } | Self::Cancelled { .. } | Self::Conflict { .. } => true,
            _ => false,
        }
    }
}

fn summarize(violations: &[Violation]) -> String {
    violations
        .iter()
        .map(ToString::to_string)
        .collect::<Vec<_>>()
        .join("; ")
}
