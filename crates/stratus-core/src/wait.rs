// ── Completion polling ──
//
// Asynchronous control-plane operations are confirmed by polling. A wait
// polls once immediately, then every `interval`, and once more exactly at
// the deadline, so a wait bounded by `timeout` issues at most
// `⌈timeout / interval⌉ + 1` probes. Every probe and every sleep is raced
// against the caller's cancellation token.

use std::future::Future;
use std::time::Duration;

use tokio::time::{Instant, sleep_until};
use tokio_util::sync::CancellationToken;
use tracing::{debug, warn};

use stratus_api::Error as ApiError;

use crate::cloud::CloudApi;
use crate::error::CoreError;
use crate::model::{AttachmentRef, FloatingIp, Instance, InstanceId, InstanceStatus, NetworkRef};

/// Lower bound on the poll interval; a zero interval would spin.
const MIN_INTERVAL: Duration = Duration::from_millis(10);

/// Verdict of a single poll.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Progress<T> {
    Done(T),
    Pending,
    /// Terminal failure; further polling cannot help.
    Failed(String),
}

/// Poll loop with interval, timeout and cancellation.
#[derive(Debug, Clone, Copy)]
pub struct Waiter {
    interval: Duration,
}

impl Default for Waiter {
    fn default() -> Self {
        Self::new(Duration::from_secs(5))
    }
}

impl Waiter {
    pub fn new(interval: Duration) -> Self {
        Self {
            interval: interval.max(MIN_INTERVAL),
        }
    }

    pub fn interval(&self) -> Duration {
        self.interval
    }

    /// Poll until `check` reports done or failed, the timeout elapses, or
    /// `cancel` fires.
    ///
    /// `probe` reads the current remote state; `Ok(None)` means the
    /// resource was not found. `check` decides what that state means for
    /// `target`.
    pub async fn wait_for<R, T, P, Fut, C>(
        &self,
        target: &str,
        timeout: Duration,
        cancel: &CancellationToken,
        mut probe: P,
        mut check: C,
    ) -> Result<T, CoreError>
    where
        P: FnMut() -> Fut,
        Fut: Future<Output = Result<Option<R>, CoreError>>,
        C: FnMut(Option<R>) -> Progress<T>,
    {
        let deadline = Instant::now() + timeout;
        let mut polls: u32 = 0;

        loop {
            let observed = tokio::select! {
                biased;
                () = cancel.cancelled() => return Err(cancelled(target)),
                result = probe() => result?,
            };
            polls += 1;

            match check(observed) {
                Progress::Done(value) => {
                    debug!(waiting_for = target, polls, "wait complete");
                    return Ok(value);
                }
                Progress::Failed(reason) => {
                    warn!(waiting_for = target, polls, %reason, "wait failed");
                    return Err(CoreError::WaitFailed {
                        target: target.to_owned(),
                        reason,
                    });
                }
                Progress::Pending => {}
            }

            let now = Instant::now();
            if now >= deadline {
                warn!(waiting_for = target, polls, timeout_secs = timeout.as_secs(), "wait timed out");
                return Err(CoreError::Timeout {
                    target: target.to_owned(),
                    after: timeout,
                });
            }

            debug!(waiting_for = target, polls, "still pending");
            let next = (now + self.interval).min(deadline);
            tokio::select! {
                biased;
                () = cancel.cancelled() => return Err(cancelled(target)),
                () = sleep_until(next) => {}
            }
        }
    }

    // ── Typed targets ────────────────────────────────────────────────

    /// Wait for the instance to reach `status`. Not found counts as pending,
    /// since a freshly created instance may not be readable yet.
    pub async fn instance_status<A: CloudApi>(
        &self,
        api: &A,
        id: &InstanceId,
        status: InstanceStatus,
        timeout: Duration,
        cancel: &CancellationToken,
    ) -> Result<Instance, CoreError> {
        let target = format!("instance {id} to become {status}");
        self.wait_for(
            &target,
            timeout,
            cancel,
            || read_instance(api, id),
            |observed| match observed {
                Some(instance) if instance.status == Some(status) => Progress::Done(instance),
                Some(instance) if instance.status.is_some_and(InstanceStatus::is_error) => {
                    Progress::Failed("instance entered ERROR status".into())
                }
                _ => Progress::Pending,
            },
        )
        .await
    }

    /// Wait until reading the instance reports not found.
    pub async fn instance_absent<A: CloudApi>(
        &self,
        api: &A,
        id: &InstanceId,
        timeout: Duration,
        cancel: &CancellationToken,
    ) -> Result<(), CoreError> {
        let target = format!("instance {id} to be deleted");
        self.wait_for(
            &target,
            timeout,
            cancel,
            || read_instance(api, id),
            |observed| match observed {
                None => Progress::Done(()),
                Some(instance) if instance.status.is_some_and(InstanceStatus::is_error) => {
                    Progress::Failed("instance entered ERROR status while deleting".into())
                }
                Some(_) => Progress::Pending,
            },
        )
        .await
    }

    /// Wait until the instance reports an attachment on `network`.
    pub async fn attachment_present<A: CloudApi>(
        &self,
        api: &A,
        id: &InstanceId,
        network: &NetworkRef,
        timeout: Duration,
        cancel: &CancellationToken,
    ) -> Result<Instance, CoreError> {
        let target = format!("network {network} to attach to instance {id}");
        self.wait_for(
            &target,
            timeout,
            cancel,
            || read_instance(api, id),
            |observed| match observed {
                None => Progress::Failed("instance no longer exists".into()),
                Some(instance) if instance.status.is_some_and(InstanceStatus::is_error) => {
                    Progress::Failed("instance entered ERROR status".into())
                }
                Some(instance) if instance.attachment(network).is_some() => {
                    Progress::Done(instance)
                }
                Some(_) => Progress::Pending,
            },
        )
        .await
    }

    /// Wait until the instance no longer reports an attachment on `network`.
    pub async fn attachment_absent<A: CloudApi>(
        &self,
        api: &A,
        id: &InstanceId,
        network: &NetworkRef,
        timeout: Duration,
        cancel: &CancellationToken,
    ) -> Result<Instance, CoreError> {
        let target = format!("network {network} to detach from instance {id}");
        self.wait_for(
            &target,
            timeout,
            cancel,
            || read_instance(api, id),
            |observed| match observed {
                None => Progress::Failed("instance no longer exists".into()),
                Some(instance) if instance.status.is_some_and(InstanceStatus::is_error) => {
                    Progress::Failed("instance entered ERROR status".into())
                }
                Some(instance) if instance.attachment(network).is_none() => {
                    Progress::Done(instance)
                }
                Some(_) => Progress::Pending,
            },
        )
        .await
    }

    /// Wait until the floating IP reports itself bound to `attachment`.
    pub async fn floating_ip_bound<A: CloudApi>(
        &self,
        api: &A,
        floating_ip: &str,
        attachment: &AttachmentRef,
        timeout: Duration,
        cancel: &CancellationToken,
    ) -> Result<FloatingIp, CoreError> {
        let target = format!(
            "floating IP {floating_ip} to bind to {} on instance {}",
            attachment.network, attachment.instance_id
        );
        self.wait_for(
            &target,
            timeout,
            cancel,
            || read_floating_ip(api, floating_ip),
            |observed| match observed {
                None => Progress::Failed("floating IP no longer exists".into()),
                Some(fip) if fip.status.is_error() => {
                    Progress::Failed("floating IP entered ERROR status".into())
                }
                Some(fip) if fip.bound_to.as_ref() == Some(attachment) => Progress::Done(fip),
                Some(_) => Progress::Pending,
            },
        )
        .await
    }

    /// Wait until the floating IP reports no binding. A floating IP that no
    /// longer exists is not bound.
    pub async fn floating_ip_unbound<A: CloudApi>(
        &self,
        api: &A,
        floating_ip: &str,
        timeout: Duration,
        cancel: &CancellationToken,
    ) -> Result<Option<FloatingIp>, CoreError> {
        let target = format!("floating IP {floating_ip} to be released");
        self.wait_for(
            &target,
            timeout,
            cancel,
            || read_floating_ip(api, floating_ip),
            |observed| match observed {
                None => Progress::Done(None),
                Some(fip) if fip.status.is_error() => {
                    Progress::Failed("floating IP entered ERROR status".into())
                }
                Some(fip) if !fip.is_bound() => Progress::Done(Some(fip)),
                Some(_) => Progress::Pending,
            },
        )
        .await
    }
}

fn cancelled(target: &str) -> CoreError {
    CoreError::Cancelled {
        target: format!("waiting for {target}"),
    }
}

/// Split a read result into found / not found / failed.
fn found<T>(result: Result<T, ApiError>, operation: &str) -> Result<Option<T>, CoreError> {
    match result {
        Ok(value) => Ok(Some(value)),
        Err(e) if e.is_not_found() => Ok(None),
        Err(e) => Err(CoreError::Remote {
            operation: operation.to_owned(),
            source: e,
        }),
    }
}

async fn read_instance<A: CloudApi>(
    api: &A,
    id: &InstanceId,
) -> Result<Option<Instance>, CoreError> {
    found(api.get_instance(id.as_str()).await, "get instance").map(|r| r.map(Instance::from))
}

async fn read_floating_ip<A: CloudApi>(
    api: &A,
    id: &str,
) -> Result<Option<FloatingIp>, CoreError> {
    found(api.get_floating_ip(id).await, "get floating IP").map(|r| r.map(FloatingIp::from))
}
