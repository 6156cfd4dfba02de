// ── Plan execution ──
//
// Applies an `OperationPlan` strictly in order. Each asynchronous step is
// confirmed by the `Waiter` before the next one starts. The first failure
// stops execution; nothing is rolled back, and the report carries the
// observed state as far as execution got.

use std::future::Future;

use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use stratus_api::Error as ApiError;
use stratus_api::types::{AttachmentTarget, CreateInstanceRequest, UpdateInstanceRequest};

use crate::cloud::CloudApi;
use crate::config::Timeouts;
use crate::error::CoreError;
use crate::model::{
    AttachmentRef, FloatingIpBinding, FloatingIpId, Instance, InstanceId, InstanceStatus,
    NetworkRef,
};
use crate::plan::{InstanceChange, Operation, OperationKind, OperationPlan, PlannedOperation};
use crate::wait::Waiter;

// ── Reports ──────────────────────────────────────────────────────────

/// Outcome of one executed plan step.
#[derive(Debug)]
pub struct OperationResult {
    /// Position in the plan.
    pub index: usize,
    pub kind: OperationKind,
    pub outcome: Result<(), CoreError>,
}

impl OperationResult {
    pub fn is_success(&self) -> bool {
        self.outcome.is_ok()
    }
}

/// What execution did and the observed state it left behind.
#[derive(Debug, Default)]
pub struct ExecutionReport {
    /// `None` when the instance no longer exists.
    pub observed: Option<Instance>,
    /// One entry per attempted step; only the last can be a failure.
    pub results: Vec<OperationResult>,
}

impl ExecutionReport {
    /// Index and error of the step that stopped execution.
    pub fn failure(&self) -> Option<(usize, &CoreError)> {
        first_failure(&self.results)
    }

    pub fn is_success(&self) -> bool {
        self.failure().is_none()
    }
}

pub(crate) fn first_failure(results: &[OperationResult]) -> Option<(usize, &CoreError)> {
    results
        .iter()
        .find_map(|r| r.outcome.as_ref().err().map(|e| (r.index, e)))
}

// ── Executor ─────────────────────────────────────────────────────────

/// Runs plans against a [`CloudApi`].
#[derive(Debug)]
pub struct Executor<'a, A> {
    api: &'a A,
    waiter: Waiter,
    timeouts: Timeouts,
}

impl<'a, A: CloudApi> Executor<'a, A> {
    pub fn new(api: &'a A, waiter: Waiter, timeouts: Timeouts) -> Self {
        Self {
            api,
            waiter,
            timeouts,
        }
    }

    /// Apply `plan` to `observed`, stopping at the first failure.
    pub async fn execute(
        &self,
        plan: &OperationPlan,
        observed: Option<Instance>,
        cancel: &CancellationToken,
    ) -> ExecutionReport {
        let mut report = ExecutionReport {
            observed,
            results: Vec::with_capacity(plan.len()),
        };

        for (index, step) in plan.steps().iter().enumerate() {
            let kind = step.operation.kind();
            info!(index, operation = %kind, "applying {}", step.operation);

            let outcome = self.apply(step, &mut report.observed, cancel).await;
            let failed = outcome.is_err();
            match &outcome {
                Ok(()) => info!(index, operation = %kind, "applied"),
                Err(e) => warn!(index, operation = %kind, error = %e, "operation failed"),
            }
            report.results.push(OperationResult {
                index,
                kind,
                outcome,
            });
            if failed {
                break;
            }
        }

        report
    }

    async fn apply(
        &self,
        step: &PlannedOperation,
        observed: &mut Option<Instance>,
        cancel: &CancellationToken,
    ) -> Result<(), CoreError> {
        let wait = step.await_completion;
        match &step.operation {
            Operation::Create { desired } => self.create(desired, wait, observed, cancel).await,
            Operation::Delete { instance_id } => {
                self.delete(instance_id, wait, observed, cancel).await
            }
            Operation::Replace {
                instance_id,
                desired,
            } => {
                self.delete(instance_id, true, observed, cancel).await?;
                self.create(desired, wait, observed, cancel).await
            }
            Operation::Update {
                instance_id,
                change,
            } => self.update(instance_id, change, wait, observed, cancel).await,
            Operation::AssociateFloatingIp {
                instance_id,
                network,
                floating_ip,
            } => {
                self.associate(instance_id, network, floating_ip, wait, observed, cancel)
                    .await
            }
            Operation::DisassociateFloatingIp {
                instance_id,
                network,
                floating_ip,
            } => {
                self.disassociate(instance_id, network, floating_ip, wait, observed, cancel)
                    .await
            }
        }
    }

    // ── Steps ────────────────────────────────────────────────────────

    async fn create(
        &self,
        desired: &Instance,
        wait: bool,
        observed: &mut Option<Instance>,
        cancel: &CancellationToken,
    ) -> Result<(), CoreError> {
        let body = CreateInstanceRequest::from(desired);
        let raw = guarded(cancel, "creating instance", self.api.create_instance(&body))
            .await?
            .map_err(|e| CoreError::from_remote("create instance", "instance", &desired.name, e))?;

        let id = InstanceId::from(raw.id.trim());
        debug!(instance_id = %id, "instance created");
        // Recorded before waiting so a later failure still reports the new id.
        *observed = Some(Instance::from(raw));

        if wait {
            let active = self
                .waiter
                .instance_status(
                    self.api,
                    &id,
                    InstanceStatus::Active,
                    self.timeouts.create,
                    cancel,
                )
                .await?;
            *observed = Some(active);
        }

        for attachment in &desired.attachments {
            if let Some(fip) = attachment.floating_ip_id() {
                self.associate(&id, &attachment.network, fip, wait, observed, cancel)
                    .await?;
            }
        }
        Ok(())
    }

    async fn delete(
        &self,
        id: &InstanceId,
        wait: bool,
        observed: &mut Option<Instance>,
        cancel: &CancellationToken,
    ) -> Result<(), CoreError> {
        guarded(cancel, "deleting instance", self.api.delete_instance(id.as_str()))
            .await?
            .map_err(|e| CoreError::from_remote("delete instance", "instance", id.as_str(), e))?;

        if wait {
            self.waiter
                .instance_absent(self.api, id, self.timeouts.delete, cancel)
                .await?;
        }
        *observed = None;
        Ok(())
    }

    async fn update(
        &self,
        id: &InstanceId,
        change: &InstanceChange,
        wait: bool,
        observed: &mut Option<Instance>,
        cancel: &CancellationToken,
    ) -> Result<(), CoreError> {
        let body = UpdateInstanceRequest::from(change);
        let raw = guarded(cancel, "updating instance", self.api.update_instance(id.as_str(), &body))
            .await?
            .map_err(|e| CoreError::from_remote("update instance", "instance", id.as_str(), e))?;
        *observed = Some(Instance::from(raw));

        if wait {
            let settled = match change {
                InstanceChange::AddAttachment(attachment) => Some(
                    self.waiter
                        .attachment_present(
                            self.api,
                            id,
                            &attachment.network,
                            self.timeouts.update,
                            cancel,
                        )
                        .await?,
                ),
                InstanceChange::RemoveAttachment { network } => Some(
                    self.waiter
                        .attachment_absent(self.api, id, network, self.timeouts.update, cancel)
                        .await?,
                ),
                _ => None,
            };
            if settled.is_some() {
                *observed = settled;
            }
        }
        Ok(())
    }

    async fn associate(
        &self,
        id: &InstanceId,
        network: &NetworkRef,
        floating_ip: &FloatingIpId,
        wait: bool,
        observed: &mut Option<Instance>,
        cancel: &CancellationToken,
    ) -> Result<(), CoreError> {
        let target = AttachmentTarget {
            instance_id: id.to_string(),
            network_id: network.to_string(),
        };
        guarded(
            cancel,
            "associating floating IP",
            self.api.associate_floating_ip(floating_ip.as_str(), &target),
        )
        .await?
        .map_err(|e| {
            CoreError::from_remote("associate floating IP", "floating IP", floating_ip.as_str(), e)
        })?;

        let address = if wait {
            let bound_to = AttachmentRef {
                instance_id: id.clone(),
                network: network.clone(),
            };
            self.waiter
                .floating_ip_bound(
                    self.api,
                    floating_ip.as_str(),
                    &bound_to,
                    self.timeouts.associate,
                    cancel,
                )
                .await?
                .address
        } else {
            None
        };

        if let Some(attachment) = observed.as_mut().and_then(|i| i.attachment_mut(network)) {
            attachment.floating_ip = Some(FloatingIpBinding {
                id: floating_ip.clone(),
                address,
            });
        }
        Ok(())
    }

    async fn disassociate(
        &self,
        id: &InstanceId,
        network: &NetworkRef,
        floating_ip: &FloatingIpId,
        wait: bool,
        observed: &mut Option<Instance>,
        cancel: &CancellationToken,
    ) -> Result<(), CoreError> {
        debug!(instance_id = %id, network = %network, floating_ip = %floating_ip, "releasing floating IP");
        guarded(
            cancel,
            "disassociating floating IP",
            self.api.disassociate_floating_ip(floating_ip.as_str()),
        )
        .await?
        .map_err(|e| {
            CoreError::from_remote(
                "disassociate floating IP",
                "floating IP",
                floating_ip.as_str(),
                e,
            )
        })?;

        if wait {
            self.waiter
                .floating_ip_unbound(
                    self.api,
                    floating_ip.as_str(),
                    self.timeouts.disassociate,
                    cancel,
                )
                .await?;
        }

        if let Some(attachment) = observed.as_mut().and_then(|i| i.attachment_mut(network)) {
            if attachment.floating_ip_id() == Some(floating_ip) {
                attachment.floating_ip = None;
            }
        }
        Ok(())
    }
}

/// Race a Cloud API call against cancellation. Cancelling drops the call.
pub(crate) async fn guarded<T, F>(
    cancel: &CancellationToken,
    activity: &str,
    call: F,
) -> Result<Result<T, ApiError>, CoreError>
where
    F: Future<Output = Result<T, ApiError>>,
{
    tokio::select! {
        biased;
        () = cancel.cancelled() => Err(CoreError::Cancelled {
            target: activity.to_owned(),
        }),
        result = call => Ok(result),
    }
}
