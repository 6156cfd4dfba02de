// ── Operation planning ──
//
// Turns (desired, observed) into an ordered `OperationPlan`. Ordering rules:
// every floating-IP disassociation comes before any instance update, and
// every association comes after all updates. A swap therefore always
// releases the old address before the new one is bound, and an attachment
// is never detached while it still holds a floating IP.

use std::fmt;

use serde::{Deserialize, Serialize};
use strum::Display;
use tracing::debug;

use crate::diff::{self, DuplicateKey};
use crate::error::CoreError;
use crate::model::{
    FloatingIpId, Instance, InstanceId, InstanceStatus, NetworkAttachment, NetworkRef,
    SecurityGroupId,
};

// ── Operations ───────────────────────────────────────────────────────

/// Operation kind, used in results and logs.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, Display)]
#[strum(serialize_all = "snake_case")]
pub enum OperationKind {
    Create,
    Update,
    Replace,
    Delete,
    AssociateFloatingIp,
    DisassociateFloatingIp,
}

/// In-place change carried by an `Update` operation.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum InstanceChange {
    /// `description: Some(None)` clears the description.
    SetDescriptive {
        name: Option<String>,
        description: Option<Option<String>>,
    },
    /// The attachment is created without its floating IP; binding is a
    /// separate `AssociateFloatingIp` step.
    AddAttachment(NetworkAttachment),
    RemoveAttachment {
        network: NetworkRef,
    },
    ModifyAttachment {
        network: NetworkRef,
        fixed_ip: Option<String>,
        primary: Option<bool>,
    },
    AddSecurityGroup {
        network: NetworkRef,
        group: SecurityGroupId,
    },
    RemoveSecurityGroup {
        network: NetworkRef,
        group: SecurityGroupId,
    },
}

impl InstanceChange {
    /// Attachment additions and removals settle asynchronously.
    pub fn is_async(&self) -> bool {
        matches!(self, Self::AddAttachment(_) | Self::RemoveAttachment { .. })
    }
}

impl fmt::Display for InstanceChange {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::SetDescriptive { name, description } => {
                let mut parts = Vec::new();
                if let Some(name) = name {
                    parts.push(format!("set name to {name:?}"));
                }
                match description {
                    Some(Some(text)) => parts.push(format!("set description to {text:?}")),
                    Some(None) => parts.push("clear description".to_owned()),
                    None => {}
                }
                f.write_str(&parts.join(", "))
            }
            Self::AddAttachment(attachment) => write!(f, "attach network {}", attachment.network),
            Self::RemoveAttachment { network } => write!(f, "detach network {network}"),
            Self::ModifyAttachment {
                network,
                fixed_ip,
                primary,
            } => {
                write!(f, "modify attachment {network}")?;
                if let Some(primary) = primary {
                    write!(f, " primary={primary}")?;
                }
                if let Some(address) = fixed_ip {
                    write!(f, " fixed_ip={address}")?;
                }
                Ok(())
            }
            Self::AddSecurityGroup { network, group } => {
                write!(f, "add security group {group} to {network}")
            }
            Self::RemoveSecurityGroup { network, group } => {
                write!(f, "remove security group {group} from {network}")
            }
        }
    }
}

/// One remote operation with the minimal payload it needs.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum Operation {
    Create {
        desired: Box<Instance>,
    },
    Update {
        instance_id: InstanceId,
        change: InstanceChange,
    },
    /// Delete then create as a single step. The planner emits the expanded
    /// `Delete` + `Create` pair; this variant exists for hand-built plans.
    Replace {
        instance_id: InstanceId,
        desired: Box<Instance>,
    },
    Delete {
        instance_id: InstanceId,
    },
    AssociateFloatingIp {
        instance_id: InstanceId,
        network: NetworkRef,
        floating_ip: FloatingIpId,
    },
    DisassociateFloatingIp {
        instance_id: InstanceId,
        network: NetworkRef,
        floating_ip: FloatingIpId,
    },
}

impl Operation {
    pub fn kind(&self) -> OperationKind {
        match self {
            Self::Create { .. } => OperationKind::Create,
            Self::Update { .. } => OperationKind::Update,
            Self::Replace { .. } => OperationKind::Replace,
            Self::Delete { .. } => OperationKind::Delete,
            Self::AssociateFloatingIp { .. } => OperationKind::AssociateFloatingIp,
            Self::DisassociateFloatingIp { .. } => OperationKind::DisassociateFloatingIp,
        }
    }

    /// Whether completion is observed by polling.
    pub fn is_async(&self) -> bool {
        match self {
            Self::Update { change, .. } => change.is_async(),
            _ => true,
        }
    }

    /// Wrap into a plan step with the default await flag.
    pub fn planned(self) -> PlannedOperation {
        let await_completion = self.is_async();
        PlannedOperation {
            operation: self,
            await_completion,
        }
    }
}

impl fmt::Display for Operation {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Create { desired } => write!(
                f,
                "create instance {} (flavor {}, image {})",
                desired.name, desired.flavor, desired.image
            ),
            Self::Update {
                instance_id,
                change,
            } => write!(f, "update {instance_id}: {change}"),
            Self::Replace {
                instance_id,
                desired,
            } => write!(f, "replace {instance_id} with {}", desired.name),
            Self::Delete { instance_id } => write!(f, "delete {instance_id}"),
            Self::AssociateFloatingIp {
                instance_id,
                network,
                floating_ip,
            } => write!(
                f,
                "associate floating IP {floating_ip} with {network} on {instance_id}"
            ),
            Self::DisassociateFloatingIp {
                instance_id,
                network,
                floating_ip,
            } => write!(
                f,
                "disassociate floating IP {floating_ip} from {network} on {instance_id}"
            ),
        }
    }
}

/// A plan step: the operation plus whether the executor must wait for it.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PlannedOperation {
    pub operation: Operation,
    pub await_completion: bool,
}

/// Ordered list of operations converging observed state to desired state.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct OperationPlan {
    steps: Vec<PlannedOperation>,
}

impl OperationPlan {
    pub fn new(steps: Vec<PlannedOperation>) -> Self {
        Self { steps }
    }

    pub fn from_operations(operations: impl IntoIterator<Item = Operation>) -> Self {
        Self::new(operations.into_iter().map(Operation::planned).collect())
    }

    pub fn is_empty(&self) -> bool {
        self.steps.is_empty()
    }

    pub fn len(&self) -> usize {
        self.steps.len()
    }

    pub fn steps(&self) -> &[PlannedOperation] {
        &self.steps
    }

    pub fn operations(&self) -> impl Iterator<Item = &Operation> {
        self.steps.iter().map(|s| &s.operation)
    }

    pub fn kinds(&self) -> Vec<OperationKind> {
        self.operations().map(Operation::kind).collect()
    }

    /// `true` when the plan destroys the instance at some point.
    pub fn is_destructive(&self) -> bool {
        self.operations()
            .any(|op| matches!(op, Operation::Delete { .. } | Operation::Replace { .. }))
    }
}

impl fmt::Display for OperationPlan {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if self.steps.is_empty() {
            return f.write_str("no changes");
        }
        for (idx, step) in self.steps.iter().enumerate() {
            if idx > 0 {
                f.write_str("\n")?;
            }
            write!(f, "{}. {}", idx + 1, step.operation)?;
            if step.await_completion {
                f.write_str(" [await]")?;
            }
        }
        Ok(())
    }
}

// ── Planner ─────────────────────────────────────────────────────────

/// Buckets in final plan order.
#[derive(Default)]
struct Buckets {
    disassociate: Vec<Operation>,
    descriptive: Vec<Operation>,
    detach: Vec<Operation>,
    /// Demotions run before any attachment is added or promoted, so the
    /// instance never has two primaries.
    clear_primary: Vec<Operation>,
    attach: Vec<Operation>,
    modify: Vec<Operation>,
    remove_groups: Vec<Operation>,
    add_groups: Vec<Operation>,
    associate: Vec<Operation>,
}

impl Buckets {
    fn into_plan(self) -> OperationPlan {
        OperationPlan::from_operations(
            self.disassociate
                .into_iter()
                .chain(self.descriptive)
                .chain(self.detach)
                .chain(self.clear_primary)
                .chain(self.attach)
                .chain(self.modify)
                .chain(self.remove_groups)
                .chain(self.add_groups)
                .chain(self.associate),
        )
    }
}

/// Computes operation plans. Stateless; assumes `desired` already passed
/// validation and fails closed on anything structurally unsound.
#[derive(Debug, Clone, Copy, Default)]
pub struct Planner;

impl Planner {
    pub fn plan(
        &self,
        desired: &Instance,
        observed: Option<&Instance>,
    ) -> Result<OperationPlan, CoreError> {
        check_addressable(desired)?;

        let Some(observed) = observed else {
            return Ok(OperationPlan::from_operations([Operation::Create {
                desired: Box::new(desired.clone()),
            }]));
        };
        let instance_id = observed.id.clone().ok_or_else(|| CoreError::Plan {
            reason: "observed instance has no id".into(),
        })?;

        if let Some(reason) = replacement_reason(desired, observed) {
            debug!(instance_id = %instance_id, %reason, "instance requires replacement");
            return Ok(OperationPlan::from_operations([
                Operation::Delete { instance_id },
                Operation::Create {
                    desired: Box::new(desired.clone()),
                },
            ]));
        }

        let mut buckets = Buckets::default();
        plan_descriptive(&instance_id, desired, observed, &mut buckets);
        plan_attachments(&instance_id, desired, observed, &mut buckets)?;

        let plan = buckets.into_plan();
        debug!(instance_id = %instance_id, steps = plan.len(), "planned in-place update");
        Ok(plan)
    }

    /// Plan removal of the observed instance, if there is one.
    pub fn plan_destroy(&self, observed: Option<&Instance>) -> Result<OperationPlan, CoreError> {
        let Some(observed) = observed else {
            return Ok(OperationPlan::default());
        };
        let instance_id = observed.id.clone().ok_or_else(|| CoreError::Plan {
            reason: "observed instance has no id".into(),
        })?;
        Ok(OperationPlan::from_operations([Operation::Delete { instance_id }]))
    }
}

/// Why the observed instance cannot be updated in place, if it cannot.
pub fn replacement_reason(desired: &Instance, observed: &Instance) -> Option<String> {
    if desired.flavor != observed.flavor {
        return Some(format!(
            "flavor changes from {} to {}",
            observed.flavor, desired.flavor
        ));
    }
    if desired.image != observed.image {
        return Some(format!(
            "image changes from {} to {}",
            observed.image, desired.image
        ));
    }
    if observed.status == Some(InstanceStatus::Error) {
        return Some("observed instance is in ERROR status".into());
    }
    None
}

fn check_addressable(desired: &Instance) -> Result<(), CoreError> {
    if desired
        .attachments
        .iter()
        .any(|a| a.primary && a.network.is_blank())
    {
        return Err(CoreError::Plan {
            reason: "primary attachment has no network reference".into(),
        });
    }
    Ok(())
}

fn plan_descriptive(
    instance_id: &InstanceId,
    desired: &Instance,
    observed: &Instance,
    buckets: &mut Buckets,
) {
    let name = (desired.name != observed.name).then(|| desired.name.clone());
    let description = (desired.normalized_description() != observed.normalized_description())
        .then(|| desired.normalized_description().map(str::to_owned));

    if name.is_some() || description.is_some() {
        buckets.descriptive.push(Operation::Update {
            instance_id: instance_id.clone(),
            change: InstanceChange::SetDescriptive { name, description },
        });
    }
}

fn plan_attachments(
    instance_id: &InstanceId,
    desired: &Instance,
    observed: &Instance,
    buckets: &mut Buckets,
) -> Result<(), CoreError> {
    let diff = diff::diff_attachments(&desired.attachments, &observed.attachments)
        .map_err(|e: DuplicateKey| CoreError::Plan {
            reason: format!("attachments: {e}"),
        })?;

    for have in diff.to_remove {
        if let Some(fip) = have.floating_ip_id() {
            buckets.disassociate.push(Operation::DisassociateFloatingIp {
                instance_id: instance_id.clone(),
                network: have.network.clone(),
                floating_ip: fip.clone(),
            });
        }
        buckets.detach.push(Operation::Update {
            instance_id: instance_id.clone(),
            change: InstanceChange::RemoveAttachment {
                network: have.network.clone(),
            },
        });
    }

    for want in diff.to_add {
        let mut attachment = want.clone();
        attachment.floating_ip = None;
        buckets.attach.push(Operation::Update {
            instance_id: instance_id.clone(),
            change: InstanceChange::AddAttachment(attachment),
        });
        if let Some(fip) = want.floating_ip_id() {
            buckets.associate.push(Operation::AssociateFloatingIp {
                instance_id: instance_id.clone(),
                network: want.network.clone(),
                floating_ip: fip.clone(),
            });
        }
    }

    for pair in diff.to_modify {
        plan_modified_attachment(instance_id, pair.desired, pair.observed, buckets);
    }

    Ok(())
}

fn plan_modified_attachment(
    instance_id: &InstanceId,
    want: &NetworkAttachment,
    have: &NetworkAttachment,
    buckets: &mut Buckets,
) {
    let network = &want.network;

    let fixed_ip = (!diff::fixed_ip_satisfied(want.fixed_ip.as_deref(), have.fixed_ip.as_deref()))
        .then(|| want.fixed_ip.clone())
        .flatten();
    let primary = (want.primary != have.primary).then_some(want.primary);

    if fixed_ip.is_some() || primary.is_some() {
        let op = Operation::Update {
            instance_id: instance_id.clone(),
            change: InstanceChange::ModifyAttachment {
                network: network.clone(),
                fixed_ip,
                primary,
            },
        };
        if primary == Some(false) {
            buckets.clear_primary.push(op);
        } else {
            buckets.modify.push(op);
        }
    }

    let groups = diff::diff_security_groups(want, have);
    for group in groups.to_remove {
        buckets.remove_groups.push(Operation::Update {
            instance_id: instance_id.clone(),
            change: InstanceChange::RemoveSecurityGroup {
                network: network.clone(),
                group: group.clone(),
            },
        });
    }
    for group in groups.to_add {
        buckets.add_groups.push(Operation::Update {
            instance_id: instance_id.clone(),
            change: InstanceChange::AddSecurityGroup {
                network: network.clone(),
                group: group.clone(),
            },
        });
    }

    match (have.floating_ip_id(), want.floating_ip_id()) {
        (Some(old), new) if new != Some(old) => {
            buckets.disassociate.push(Operation::DisassociateFloatingIp {
                instance_id: instance_id.clone(),
                network: network.clone(),
                floating_ip: old.clone(),
            });
            if let Some(new) = new {
                buckets.associate.push(Operation::AssociateFloatingIp {
                    instance_id: instance_id.clone(),
                    network: network.clone(),
                    floating_ip: new.clone(),
                });
            }
        }
        (None, Some(new)) => {
            buckets.associate.push(Operation::AssociateFloatingIp {
                instance_id: instance_id.clone(),
                network: network.clone(),
                floating_ip: new.clone(),
            });
        }
        _ => {}
    }
}
