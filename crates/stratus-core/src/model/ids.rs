// ── Identity types ──
//
// Every reference in the canonical record is a distinct newtype over a
// string, so a network reference can never be passed where a security
// group id is expected.

use serde::{Deserialize, Serialize};
use std::fmt;
use uuid::Uuid;

macro_rules! string_id {
    ($(#[$meta:meta])* $name:ident) => {
        $(#[$meta])*
        #[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
        #[serde(transparent)]
        pub struct $name(String);

        impl $name {
            pub fn new(raw: impl Into<String>) -> Self {
                Self(raw.into())
            }

            pub fn as_str(&self) -> &str {
                &self.0
            }

            /// `true` when the reference is empty or whitespace only.
            pub fn is_blank(&self) -> bool {
                self.0.trim().is_empty()
            }

            /// `true` when the reference carries leading or trailing
            /// whitespace, which the control plane strips.
            pub fn is_padded(&self) -> bool {
                self.0.trim().len() != self.0.len()
            }
        }

        impl fmt::Display for $name {
            fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
                f.write_str(&self.0)
            }
        }

        impl From<String> for $name {
            fn from(s: String) -> Self {
                Self(s)
            }
        }

        impl From<&str> for $name {
            fn from(s: &str) -> Self {
                Self(s.to_owned())
            }
        }
    };
}

string_id!(
    /// Opaque instance id assigned by the control plane.
    InstanceId
);
string_id!(
    /// Network reference; the stable key of an attachment.
    NetworkRef
);
string_id!(
    /// Reference to an externally managed security group.
    SecurityGroupId
);
string_id!(
    /// Compute-capacity class.
    FlavorId
);
string_id!(
    /// Boot-image class.
    ImageId
);
string_id!(
    /// Floating IP identity. Must be in UUID lexical form to be valid.
    FloatingIpId
);

impl FloatingIpId {
    /// Parse the id as a UUID. `None` when it is not in UUID lexical form.
    pub fn as_uuid(&self) -> Option<Uuid> {
        Uuid::parse_str(&self.0).ok()
    }
}
