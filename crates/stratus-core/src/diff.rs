// ── Key-based diffing of unordered collections ──
//
// Items are matched by a stable key, never by position. A changed key is
// always one removal plus one addition: remote identity is tied to the key,
// so renames are not inferred.

use std::collections::BTreeMap;
use std::collections::btree_map::Entry;
use std::fmt;
use std::net::IpAddr;

use thiserror::Error;

use crate::model::{NetworkAttachment, SecurityGroupId};

/// Which input held the duplicate key.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Side {
    Desired,
    Observed,
}

impl fmt::Display for Side {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Desired => f.write_str("desired"),
            Self::Observed => f.write_str("observed"),
        }
    }
}

/// Two items in one collection share a key; the collection cannot be diffed.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
#[error("duplicate key {key:?} in {side} collection")]
pub struct DuplicateKey {
    pub key: String,
    pub side: Side,
}

/// A key present on both sides whose payload differs.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Modified<'a, T> {
    pub observed: &'a T,
    pub desired: &'a T,
}

/// Result of [`diff_keyed`]. Every list is ordered by key.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CollectionDiff<'a, T> {
    /// Keys only in desired.
    pub to_add: Vec<&'a T>,
    /// Keys only in observed.
    pub to_remove: Vec<&'a T>,
    pub to_modify: Vec<Modified<'a, T>>,
}

impl<T> Default for CollectionDiff<'_, T> {
    fn default() -> Self {
        Self {
            to_add: Vec::new(),
            to_remove: Vec::new(),
            to_modify: Vec::new(),
        }
    }
}

impl<T> CollectionDiff<'_, T> {
    pub fn is_empty(&self) -> bool {
        self.to_add.is_empty() && self.to_remove.is_empty() && self.to_modify.is_empty()
    }
}

fn index_by_key<'a, T, K, KF>(
    items: impl IntoIterator<Item = &'a T>,
    key: &KF,
    side: Side,
) -> Result<BTreeMap<K, &'a T>, DuplicateKey>
where
    T: 'a,
    K: Ord + fmt::Display,
    KF: Fn(&T) -> K,
{
    let mut index = BTreeMap::new();
    for item in items {
        match index.entry(key(item)) {
            Entry::Vacant(slot) => {
                slot.insert(item);
            }
            Entry::Occupied(slot) => {
                return Err(DuplicateKey {
                    key: slot.key().to_string(),
                    side,
                });
            }
        }
    }
    Ok(index)
}

/// Diff two unordered collections by key.
///
/// `same_payload(desired, observed)` decides whether two items sharing a key
/// are equivalent; it receives the desired item first so it may treat unset
/// desired fields as "no constraint".
pub fn diff_keyed<'a, T, K, KF, EF>(
    desired: impl IntoIterator<Item = &'a T>,
    observed: impl IntoIterator<Item = &'a T>,
    key: KF,
    same_payload: EF,
) -> Result<CollectionDiff<'a, T>, DuplicateKey>
where
    T: 'a,
    K: Ord + fmt::Display,
    KF: Fn(&T) -> K,
    EF: Fn(&T, &T) -> bool,
{
    let desired = index_by_key(desired, &key, Side::Desired)?;
    let mut observed = index_by_key(observed, &key, Side::Observed)?;

    let mut diff = CollectionDiff::default();

    for (k, want) in desired {
        match observed.remove(&k) {
            None => diff.to_add.push(want),
            Some(have) if !same_payload(want, have) => diff.to_modify.push(Modified {
                observed: have,
                desired: want,
            }),
            Some(_) => {}
        }
    }
    diff.to_remove.extend(observed.into_values());

    Ok(diff)
}

// ── Attachment and security-group diffs ─────────────────────────────

/// Compare fixed addresses by value. An unset desired address accepts
/// whatever the control plane assigned.
pub fn fixed_ip_satisfied(desired: Option<&str>, observed: Option<&str>) -> bool {
    let Some(want) = desired.map(str::trim) else {
        return true;
    };
    let Some(have) = observed.map(str::trim) else {
        return false;
    };
    match (want.parse::<IpAddr>(), have.parse::<IpAddr>()) {
        (Ok(a), Ok(b)) => a == b,
        _ => want == have,
    }
}

/// Payload equivalence for attachments. Computed fields (the bound
/// floating address) are ignored.
pub fn attachment_satisfied(desired: &NetworkAttachment, observed: &NetworkAttachment) -> bool {
    desired.primary == observed.primary
        && fixed_ip_satisfied(desired.fixed_ip.as_deref(), observed.fixed_ip.as_deref())
        && desired.security_groups == observed.security_groups
        && desired.floating_ip_id() == observed.floating_ip_id()
}

pub fn diff_attachments<'a>(
    desired: &'a [NetworkAttachment],
    observed: &'a [NetworkAttachment],
) -> Result<CollectionDiff<'a, NetworkAttachment>, DuplicateKey> {
    diff_keyed(desired, observed, |a| a.network.clone(), attachment_satisfied)
}

pub fn diff_security_groups<'a>(
    desired: &'a NetworkAttachment,
    observed: &'a NetworkAttachment,
) -> CollectionDiff<'a, SecurityGroupId> {
    // Sets cannot hold duplicate keys, so the error arm is unreachable.
    diff_keyed(
        &desired.security_groups,
        &observed.security_groups,
        SecurityGroupId::clone,
        |_, _| true,
    )
    .unwrap_or_default()
}
