// ── Reconciler facade ──
//
// Entry point for callers: validate → plan → pre-flight → execute. The
// client and settings are injected; nothing here is global.

use std::collections::HashSet;

use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use crate::cloud::CloudApi;
use crate::config::ReconcileSettings;
use crate::error::CoreError;
use crate::executor::{ExecutionReport, Executor, OperationResult, first_failure, guarded};
use crate::model::{FloatingIp, FloatingIpId, Instance, InstanceId};
use crate::plan::{Operation, OperationPlan, Planner};
use crate::validate::{Validator, Violation};
use crate::wait::Waiter;

/// Result of a reconcile or destroy call that got as far as execution.
#[derive(Debug)]
pub struct ReconcileReport {
    /// The plan that was executed.
    pub plan: OperationPlan,
    /// Observed state after execution; `None` when the instance is gone.
    pub observed: Option<Instance>,
    pub results: Vec<OperationResult>,
}

impl ReconcileReport {
    fn new(plan: OperationPlan, execution: ExecutionReport) -> Self {
        Self {
            plan,
            observed: execution.observed,
            results: execution.results,
        }
    }

    /// Index and error of the step that stopped execution.
    pub fn failure(&self) -> Option<(usize, &CoreError)> {
        first_failure(&self.results)
    }

    pub fn is_success(&self) -> bool {
        self.failure().is_none()
    }

    /// `true` when at least one operation was attempted.
    pub fn changed(&self) -> bool {
        !self.results.is_empty()
    }
}

/// Converges compute instances toward desired records.
#[derive(Debug, Clone)]
pub struct Reconciler<C> {
    api: C,
    settings: ReconcileSettings,
    planner: Planner,
    validator: Validator,
}

impl<C: CloudApi> Reconciler<C> {
    pub fn new(api: C, settings: ReconcileSettings) -> Self {
        Self {
            validator: Validator::new(settings.validation),
            api,
            settings,
            planner: Planner,
        }
    }

    pub fn api(&self) -> &C {
        &self.api
    }

    pub fn settings(&self) -> &ReconcileSettings {
        &self.settings
    }

    /// Structural problems in `desired`; empty when valid.
    pub fn validate(&self, desired: &Instance) -> Vec<Violation> {
        self.validator.validate(desired)
    }

    /// Validate `desired`, then compute the plan without touching the
    /// control plane.
    pub fn plan(
        &self,
        desired: &Instance,
        observed: Option<&Instance>,
    ) -> Result<OperationPlan, CoreError> {
        self.validator.ensure_valid(desired)?;
        self.planner.plan(desired, observed)
    }

    /// Converge `observed` toward `desired`.
    ///
    /// Returns `Err` only when nothing was mutated: validation, planning,
    /// reference pre-flight, or cancellation before the first step.
    /// Failures during execution are reported in the returned report.
    pub async fn reconcile(
        &self,
        desired: &Instance,
        observed: Option<Instance>,
        cancel: &CancellationToken,
    ) -> Result<ReconcileReport, CoreError> {
        let plan = self.plan(desired, observed.as_ref())?;
        let instance_id = observed.as_ref().and_then(|o| o.id.clone());

        if plan.is_empty() {
            debug!(name = %desired.name, "already converged");
            return Ok(ReconcileReport::new(
                plan,
                ExecutionReport {
                    observed,
                    results: Vec::new(),
                },
            ));
        }
        info!(name = %desired.name, steps = plan.len(), "reconciling");

        self.preflight(&plan, observed.as_ref(), cancel).await?;
        if cancel.is_cancelled() {
            return Err(CoreError::Cancelled {
                target: "starting reconciliation".into(),
            });
        }

        let execution = self.executor().execute(&plan, observed, cancel).await;
        if let Some((index, error)) = execution.failure() {
            warn!(
                instance_id = ?instance_id,
                index,
                error = %error,
                "reconciliation stopped"
            );
        }
        Ok(ReconcileReport::new(plan, execution))
    }

    /// Read and materialize the current state of instance `id`. `None`
    /// when the control plane reports it as not found.
    pub async fn refresh(
        &self,
        id: &InstanceId,
        cancel: &CancellationToken,
    ) -> Result<Option<Instance>, CoreError> {
        match guarded(cancel, "reading instance", self.api.get_instance(id.as_str())).await? {
            Ok(raw) => Ok(Some(Instance::from(raw))),
            Err(e) if e.is_not_found() => Ok(None),
            Err(e) => Err(CoreError::Remote {
                operation: "get instance".into(),
                source: e,
            }),
        }
    }

    /// Delete the observed instance, if any, and wait for it to disappear.
    pub async fn destroy(
        &self,
        observed: Option<Instance>,
        cancel: &CancellationToken,
    ) -> Result<ReconcileReport, CoreError> {
        let plan = self.planner.plan_destroy(observed.as_ref())?;
        let execution = self.executor().execute(&plan, observed, cancel).await;
        Ok(ReconcileReport::new(plan, execution))
    }

    fn executor(&self) -> Executor<'_, C> {
        Executor::new(
            &self.api,
            Waiter::new(self.settings.poll_interval),
            self.settings.timeouts,
        )
    }

    // ── Reference pre-flight ─────────────────────────────────────────

    /// Every floating IP the plan binds must exist, and must be free,
    /// already on this instance, or released by an earlier step.
    async fn preflight(
        &self,
        plan: &OperationPlan,
        observed: Option<&Instance>,
        cancel: &CancellationToken,
    ) -> Result<(), CoreError> {
        let mut released: HashSet<&FloatingIpId> = HashSet::new();

        for operation in plan.operations() {
            match operation {
                Operation::DisassociateFloatingIp { floating_ip, .. } => {
                    released.insert(floating_ip);
                }
                Operation::Delete { .. } => released.extend(bindings(observed)),
                Operation::AssociateFloatingIp {
                    instance_id,
                    floating_ip,
                    ..
                } => {
                    self.check_floating_ip(floating_ip, Some(instance_id), &released, cancel)
                        .await?;
                }
                Operation::Replace { desired, .. } => {
                    released.extend(bindings(observed));
                    for fip in bindings(Some(&**desired)) {
                        self.check_floating_ip(fip, None, &released, cancel).await?;
                    }
                }
                Operation::Create { desired } => {
                    for fip in bindings(Some(&**desired)) {
                        self.check_floating_ip(fip, None, &released, cancel).await?;
                    }
                }
                Operation::Update { .. } => {}
            }
        }
        Ok(())
    }

    async fn check_floating_ip(
        &self,
        id: &FloatingIpId,
        owner: Option<&InstanceId>,
        released: &HashSet<&FloatingIpId>,
        cancel: &CancellationToken,
    ) -> Result<(), CoreError> {
        let raw = guarded(cancel, "checking floating IP", self.api.get_floating_ip(id.as_str()))
            .await?
            .map_err(|e| CoreError::from_remote("get floating IP", "floating IP", id.as_str(), e))?;
        let fip = FloatingIp::from(raw);

        let Some(bound) = &fip.bound_to else {
            return Ok(());
        };
        if released.contains(id) || owner.is_some_and(|o| fip.is_bound_to_instance(o)) {
            return Ok(());
        }
        Err(CoreError::Conflict {
            message: format!(
                "floating IP {id} is bound to {} on instance {}",
                bound.network, bound.instance_id
            ),
        })
    }
}

/// Floating IPs bound (or to be bound) on any attachment of `instance`.
fn bindings(instance: Option<&Instance>) -> impl Iterator<Item = &FloatingIpId> {
    instance
        .into_iter()
        .flat_map(|i| &i.attachments)
        .filter_map(|a| a.floating_ip_id())
}
