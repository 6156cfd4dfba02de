#![allow(clippy::unwrap_used)]

mod common;

use std::time::Duration;

use pretty_assertions::assert_eq;
use tokio::time::Instant;
use tokio_util::sync::CancellationToken;

use common::{Boot, FIP_1, FIP_2, FakeCloud, active_instance, interface, settings};
use stratus_core::{
    CoreError, Instance, InstanceChange, InstanceId, InstanceStatus, NetworkAttachment, Operation,
    OperationKind, Reconciler,
};

fn desired() -> Instance {
    Instance::new("web-1", "m1.small", "debian-12").with_attachment(
        NetworkAttachment::new("net-1")
            .primary()
            .with_security_group("sg-a"),
    )
}

fn with_fip(mut instance: Instance, fip: &str) -> Instance {
    instance.attachments[0].floating_ip = Some(stratus_core::FloatingIpBinding::new(fip));
    instance
}

/// Seed `i-7` on `net-1` with the given groups and optional floating IP.
fn seeded(cloud: &FakeCloud, groups: &[&str], fip: Option<&str>) {
    let mut iface = interface("net-1", true, groups);
    iface.floating_ip = fip.map(|id| stratus_api::types::InterfaceFloatingIp {
        id: Some(id.to_owned()),
        address: Some("203.0.113.10".into()),
    });
    cloud.seed_instance(active_instance("i-7", vec![iface]));
}

async fn observe(reconciler: &Reconciler<FakeCloud>, id: &str) -> Option<Instance> {
    let observed = reconciler
        .refresh(&InstanceId::from(id), &CancellationToken::new())
        .await
        .unwrap();
    reconciler.api().reset_counters();
    observed
}

// ── Creation ─────────────────────────────────────────────────────────

#[tokio::test(start_paused = true)]
async fn creates_missing_instance_and_binds_floating_ip() {
    let cloud = FakeCloud::new();
    cloud.add_floating_ip(FIP_1, "203.0.113.10");
    let reconciler = Reconciler::new(cloud, settings());
    let desired = with_fip(desired(), FIP_1);

    let report = reconciler
        .reconcile(&desired, None, &CancellationToken::new())
        .await
        .unwrap();

    assert!(report.is_success(), "{:?}", report.failure());
    assert_eq!(report.plan.kinds(), vec![OperationKind::Create]);
    assert_eq!(
        reconciler.api().calls(),
        vec!["create web-1".to_owned(), format!("associate {FIP_1} net-1")]
    );

    let observed = report.observed.unwrap();
    assert_eq!(observed.id, Some(InstanceId::from("i-1")));
    assert_eq!(observed.status, Some(InstanceStatus::Active));
    let binding = observed.attachments[0].floating_ip.as_ref().unwrap();
    assert_eq!(binding.address, Some("203.0.113.10".parse().unwrap()));
}

#[tokio::test(start_paused = true)]
async fn successful_reconcile_is_idempotent() {
    let cloud = FakeCloud::new();
    cloud.add_floating_ip(FIP_1, "203.0.113.10");
    let reconciler = Reconciler::new(cloud, settings());
    let desired = with_fip(desired(), FIP_1).with_description("frontend");

    let report = reconciler
        .reconcile(&desired, None, &CancellationToken::new())
        .await
        .unwrap();
    assert!(report.is_success());

    // Both the executor's view and a fresh read converge.
    assert!(reconciler.plan(&desired, report.observed.as_ref()).unwrap().is_empty());
    let refreshed = observe(&reconciler, "i-1").await;
    assert!(reconciler.plan(&desired, refreshed.as_ref()).unwrap().is_empty());

    let again = reconciler
        .reconcile(&desired, refreshed, &CancellationToken::new())
        .await
        .unwrap();
    assert!(!again.changed());
    assert!(reconciler.api().calls().is_empty());
}

// ── In-place updates ─────────────────────────────────────────────────

#[tokio::test(start_paused = true)]
async fn releases_floating_ip_and_drops_security_group() {
    let cloud = FakeCloud::new();
    cloud.add_floating_ip(FIP_1, "203.0.113.10");
    seeded(&cloud, &["sg-a", "sg-b"], Some(FIP_1));
    let reconciler = Reconciler::new(cloud, settings());
    let observed = observe(&reconciler, "i-7").await;

    let plan = reconciler.plan(&desired(), observed.as_ref()).unwrap();
    assert_eq!(
        plan.operations().cloned().collect::<Vec<_>>(),
        vec![
            Operation::DisassociateFloatingIp {
                instance_id: "i-7".into(),
                network: "net-1".into(),
                floating_ip: FIP_1.into(),
            },
            Operation::Update {
                instance_id: "i-7".into(),
                change: InstanceChange::RemoveSecurityGroup {
                    network: "net-1".into(),
                    group: "sg-b".into(),
                },
            },
        ]
    );
    insta::assert_snapshot!(plan.to_string(), @r"
    1. disassociate floating IP 0d7c5c57-1b3e-4c8b-9f0e-6a1d2b3c4d5e from net-1 on i-7 [await]
    2. update i-7: remove security group sg-b from net-1
    ");

    let report = reconciler
        .reconcile(&desired(), observed, &CancellationToken::new())
        .await
        .unwrap();
    assert!(report.is_success());
    assert_eq!(report.results.len(), 2);

    let remote = reconciler.api().instance("i-7").unwrap();
    assert_eq!(remote.interfaces[0].security_groups, vec!["sg-a".to_owned()]);
    assert!(remote.interfaces[0].floating_ip.is_none());
    assert!(reconciler.api().floating_ip(FIP_1).unwrap().instance_id.is_none());
    assert!(reconciler.plan(&desired(), report.observed.as_ref()).unwrap().is_empty());
}

#[tokio::test(start_paused = true)]
async fn swaps_floating_ip_release_first() {
    let cloud = FakeCloud::new();
    cloud.add_floating_ip(FIP_1, "203.0.113.10");
    cloud.add_floating_ip(FIP_2, "203.0.113.20");
    seeded(&cloud, &["sg-a"], Some(FIP_1));
    let reconciler = Reconciler::new(cloud, settings());
    let observed = observe(&reconciler, "i-7").await;

    let desired = with_fip(desired(), FIP_2);
    let report = reconciler
        .reconcile(&desired, observed, &CancellationToken::new())
        .await
        .unwrap();

    assert!(report.is_success(), "{:?}", report.failure());
    assert_eq!(
        reconciler.api().calls(),
        vec![format!("disassociate {FIP_1}"), format!("associate {FIP_2} net-1")]
    );
    let binding = report.observed.unwrap().attachments[0].floating_ip.clone().unwrap();
    assert_eq!(binding.id.as_str(), FIP_2);
    assert_eq!(binding.address, Some("203.0.113.20".parse().unwrap()));
}

#[tokio::test(start_paused = true)]
async fn descriptive_change_is_a_single_update() {
    let cloud = FakeCloud::new();
    seeded(&cloud, &["sg-a"], None);
    let reconciler = Reconciler::new(cloud, settings());
    let observed = observe(&reconciler, "i-7").await;

    let mut desired = desired().with_description("frontend");
    desired.name = "web-renamed".into();
    let report = reconciler
        .reconcile(&desired, observed, &CancellationToken::new())
        .await
        .unwrap();

    assert_eq!(report.plan.kinds(), vec![OperationKind::Update]);
    assert_eq!(
        reconciler.api().calls(),
        vec![r#"update {"name":"web-renamed","description":"frontend"}"#.to_owned()]
    );
    assert_eq!(report.observed.unwrap().name, "web-renamed");
}

#[tokio::test(start_paused = true)]
async fn adds_attachment_then_binds_it() {
    let cloud = FakeCloud::new();
    cloud.add_floating_ip(FIP_2, "203.0.113.20");
    seeded(&cloud, &["sg-a"], None);
    let reconciler = Reconciler::new(cloud, settings());
    let observed = observe(&reconciler, "i-7").await;

    let desired = desired().with_attachment(NetworkAttachment::new("net-2").with_floating_ip(FIP_2));
    let report = reconciler
        .reconcile(&desired, observed, &CancellationToken::new())
        .await
        .unwrap();

    assert!(report.is_success(), "{:?}", report.failure());
    assert_eq!(
        report.plan.kinds(),
        vec![OperationKind::Update, OperationKind::AssociateFloatingIp]
    );
    let observed = report.observed.unwrap();
    let net2 = observed.attachment(&"net-2".into()).unwrap();
    assert_eq!(net2.floating_ip_id().map(|f| f.as_str()), Some(FIP_2));
    assert!(reconciler.plan(&desired, Some(&observed)).unwrap().is_empty());
}

// ── Replacement ──────────────────────────────────────────────────────

#[tokio::test(start_paused = true)]
async fn flavor_change_replaces_and_keeps_floating_ip() {
    let cloud = FakeCloud::new();
    cloud.add_floating_ip(FIP_1, "203.0.113.10");
    seeded(&cloud, &["sg-a"], Some(FIP_1));
    let reconciler = Reconciler::new(cloud, settings());
    let observed = observe(&reconciler, "i-7").await;

    let mut desired = with_fip(desired(), FIP_1);
    desired.flavor = "m1.large".into();
    let report = reconciler
        .reconcile(&desired, observed, &CancellationToken::new())
        .await
        .unwrap();

    assert_eq!(report.plan.kinds(), vec![OperationKind::Delete, OperationKind::Create]);
    assert!(report.is_success(), "{:?}", report.failure());
    assert_eq!(
        reconciler.api().calls(),
        vec![
            "delete i-7".to_owned(),
            "create web-1".to_owned(),
            format!("associate {FIP_1} net-1"),
        ]
    );
    assert!(reconciler.api().instance("i-7").is_none());
    let observed = report.observed.unwrap();
    assert_eq!(observed.id, Some(InstanceId::from("i-1")));
    assert_eq!(observed.flavor.as_str(), "m1.large");
}

#[tokio::test(start_paused = true)]
async fn errored_instance_is_replaced() {
    let cloud = FakeCloud::new();
    let mut broken = active_instance("i-7", vec![interface("net-1", true, &["sg-a"])]);
    broken.status = Some("ERROR".into());
    cloud.seed_instance(broken);
    let reconciler = Reconciler::new(cloud, settings());
    let observed = observe(&reconciler, "i-7").await;

    let report = reconciler
        .reconcile(&desired(), observed, &CancellationToken::new())
        .await
        .unwrap();
    assert_eq!(report.plan.kinds(), vec![OperationKind::Delete, OperationKind::Create]);
    assert!(report.is_success());
}

// ── Pre-flight ───────────────────────────────────────────────────────

#[tokio::test(start_paused = true)]
async fn invalid_record_touches_nothing() {
    let reconciler = Reconciler::new(FakeCloud::new(), settings());
    let desired = desired().with_attachment(NetworkAttachment::new("net-2").primary());

    let violations = reconciler.validate(&desired);
    assert_eq!(violations.len(), 1);

    let err = reconciler
        .reconcile(&desired, None, &CancellationToken::new())
        .await
        .unwrap_err();
    assert!(matches!(err, CoreError::Validation { .. }));
    assert!(err.is_preflight());
    assert!(reconciler.api().calls().is_empty());
    assert_eq!(reconciler.api().reads(), 0);
}

#[tokio::test(start_paused = true)]
async fn padded_record_is_rejected_rather_than_replanned_forever() {
    let cloud = FakeCloud::new();
    seeded(&cloud, &["sg-a"], None);
    let reconciler = Reconciler::new(cloud, settings());
    let observed = observe(&reconciler, "i-7").await;

    let mut padded = Instance::new("web-1 ", "m1.small", "debian-12").with_attachment(
        NetworkAttachment::new("net-1")
            .primary()
            .with_security_group(" sg-a"),
    );
    let paths: Vec<_> = reconciler.validate(&padded).into_iter().map(|v| v.path).collect();
    assert_eq!(paths, vec!["name", "attachments[0].security_groups"]);

    let err = reconciler
        .reconcile(&padded, observed.clone(), &CancellationToken::new())
        .await
        .unwrap_err();
    assert!(matches!(err, CoreError::Validation { .. }), "{err}");
    assert!(reconciler.api().calls().is_empty());
    assert_eq!(reconciler.api().reads(), 0);

    // The same record without padding is already converged.
    padded.name = "web-1".into();
    padded.attachments[0] = NetworkAttachment::new("net-1")
        .primary()
        .with_security_group("sg-a");
    assert!(reconciler.plan(&padded, observed.as_ref()).unwrap().is_empty());
}

#[tokio::test(start_paused = true)]
async fn unknown_floating_ip_fails_before_mutation() {
    let reconciler = Reconciler::new(FakeCloud::new(), settings());
    let err = reconciler
        .reconcile(&with_fip(desired(), FIP_2), None, &CancellationToken::new())
        .await
        .unwrap_err();

    assert!(
        matches!(err, CoreError::NotFound { ref identifier, .. } if identifier == FIP_2),
        "{err}"
    );
    assert!(reconciler.api().calls().is_empty());
}

#[tokio::test(start_paused = true)]
async fn floating_ip_bound_elsewhere_is_a_conflict() {
    let cloud = FakeCloud::new();
    cloud.add_floating_ip(FIP_2, "203.0.113.20");
    cloud.bind_elsewhere(FIP_2, "i-other", "net-9");
    seeded(&cloud, &["sg-a"], None);
    let reconciler = Reconciler::new(cloud, settings());
    let observed = observe(&reconciler, "i-7").await;

    let err = reconciler
        .reconcile(&with_fip(desired(), FIP_2), observed, &CancellationToken::new())
        .await
        .unwrap_err();

    assert_eq!(
        err.to_string(),
        format!("Conflict: floating IP {FIP_2} is bound to net-9 on instance i-other")
    );
    assert!(reconciler.api().calls().is_empty());
}

// ── Failure handling ─────────────────────────────────────────────────

#[tokio::test(start_paused = true)]
async fn failure_stops_execution_without_rollback() {
    let cloud = FakeCloud::new();
    cloud.add_floating_ip(FIP_1, "203.0.113.10");
    seeded(&cloud, &["sg-a", "sg-b"], Some(FIP_1));
    cloud.fail_on("update", 500);
    let reconciler = Reconciler::new(cloud, settings());
    let observed = observe(&reconciler, "i-7").await;

    let report = reconciler
        .reconcile(&desired(), observed, &CancellationToken::new())
        .await
        .unwrap();

    let (index, error) = report.failure().unwrap();
    assert_eq!(index, 1);
    assert!(matches!(error, CoreError::Remote { .. }), "{error}");
    assert_eq!(report.results.len(), 2);
    assert!(report.results[0].is_success());
    assert_eq!(report.results[1].kind, OperationKind::Update);

    // The release already happened and stays visible in the returned state.
    let observed = report.observed.unwrap();
    assert!(observed.attachments[0].floating_ip.is_none());
    assert_eq!(observed.attachments[0].security_groups.len(), 2);
}

#[tokio::test(start_paused = true)]
async fn create_wait_times_out_with_bounded_polls() {
    let reconciler = Reconciler::new(FakeCloud::new().with_boot(Boot::Never), settings());
    let started = Instant::now();

    let report = reconciler
        .reconcile(&desired(), None, &CancellationToken::new())
        .await
        .unwrap();

    let (index, error) = report.failure().unwrap();
    assert_eq!(index, 0);
    assert!(matches!(error, CoreError::Timeout { .. }), "{error}");
    assert_eq!(started.elapsed(), Duration::from_secs(60));
    // 60s budget polled every 2s.
    assert!(reconciler.api().reads() <= 60 / 2 + 1);

    // The new id is still reported.
    assert_eq!(
        report.observed.and_then(|o| o.id),
        Some(InstanceId::from("i-1"))
    );
}

#[tokio::test(start_paused = true)]
async fn error_status_fails_the_wait_immediately() {
    let reconciler = Reconciler::new(FakeCloud::new().with_boot(Boot::ErrorAfter(2)), settings());

    let report = reconciler
        .reconcile(&desired(), None, &CancellationToken::new())
        .await
        .unwrap();

    let (_, error) = report.failure().unwrap();
    assert!(matches!(error, CoreError::WaitFailed { .. }), "{error}");
    assert_eq!(reconciler.api().reads(), 2);
}

#[tokio::test(start_paused = true)]
async fn floating_ip_error_fails_the_association_wait() {
    let cloud = FakeCloud::new();
    cloud.add_floating_ip(FIP_1, "203.0.113.10");
    seeded(&cloud, &["sg-a"], None);
    cloud.fault_floating_ip(FIP_1);
    let reconciler = Reconciler::new(cloud, settings());
    let observed = observe(&reconciler, "i-7").await;
    let started = Instant::now();

    let report = reconciler
        .reconcile(&with_fip(desired(), FIP_1), observed, &CancellationToken::new())
        .await
        .unwrap();

    assert_eq!(report.plan.kinds(), vec![OperationKind::AssociateFloatingIp]);
    let (index, error) = report.failure().unwrap();
    assert_eq!(index, 0);
    assert!(matches!(error, CoreError::WaitFailed { .. }), "{error}");
    // One pre-flight read, then a single poll.
    assert_eq!(reconciler.api().reads(), 2);
    assert_eq!(started.elapsed(), Duration::ZERO);
    assert!(report.observed.unwrap().attachments[0].floating_ip.is_none());
}

#[tokio::test(start_paused = true)]
async fn floating_ip_error_fails_the_release_wait() {
    let cloud = FakeCloud::new();
    cloud.add_floating_ip(FIP_1, "203.0.113.10");
    seeded(&cloud, &["sg-a"], Some(FIP_1));
    cloud.fault_floating_ip(FIP_1);
    let reconciler = Reconciler::new(cloud, settings());
    let observed = observe(&reconciler, "i-7").await;

    let report = reconciler
        .reconcile(&desired(), observed, &CancellationToken::new())
        .await
        .unwrap();

    assert_eq!(report.plan.kinds(), vec![OperationKind::DisassociateFloatingIp]);
    let (_, error) = report.failure().unwrap();
    assert!(matches!(error, CoreError::WaitFailed { .. }), "{error}");
    assert_eq!(reconciler.api().reads(), 1);
    // The binding was never confirmed released.
    assert!(report.observed.unwrap().attachments[0].floating_ip.is_some());
}

#[tokio::test(start_paused = true)]
async fn cancellation_is_reported_as_cancelled() {
    let reconciler = Reconciler::new(FakeCloud::new().with_boot(Boot::Never), settings());
    let cancel = CancellationToken::new();
    let trigger = cancel.clone();
    tokio::spawn(async move {
        tokio::time::sleep(Duration::from_secs(5)).await;
        trigger.cancel();
    });

    let started = Instant::now();
    let report = reconciler.reconcile(&desired(), None, &cancel).await.unwrap();

    let (_, error) = report.failure().unwrap();
    assert!(matches!(error, CoreError::Cancelled { .. }), "{error}");
    assert!(!matches!(error, CoreError::Timeout { .. }));
    assert_eq!(started.elapsed(), Duration::from_secs(5));
}

#[tokio::test(start_paused = true)]
async fn already_cancelled_token_mutates_nothing() {
    let reconciler = Reconciler::new(FakeCloud::new(), settings());
    let cancel = CancellationToken::new();
    cancel.cancel();

    let err = reconciler.reconcile(&desired(), None, &cancel).await.unwrap_err();
    assert!(matches!(err, CoreError::Cancelled { .. }));
    assert!(reconciler.api().calls().is_empty());
}

// ── Refresh / destroy ────────────────────────────────────────────────

#[tokio::test(start_paused = true)]
async fn refresh_reports_missing_instance_as_none() {
    let reconciler = Reconciler::new(FakeCloud::new(), settings());
    assert!(observe(&reconciler, "i-404").await.is_none());
}

#[tokio::test(start_paused = true)]
async fn destroy_deletes_and_waits() {
    let cloud = FakeCloud::new();
    seeded(&cloud, &["sg-a"], None);
    let reconciler = Reconciler::new(cloud, settings());
    let observed = observe(&reconciler, "i-7").await;

    let report = reconciler
        .destroy(observed, &CancellationToken::new())
        .await
        .unwrap();
    assert!(report.is_success());
    assert!(report.observed.is_none());
    assert_eq!(reconciler.api().calls(), vec!["delete i-7".to_owned()]);

    let nothing = reconciler
        .destroy(None, &CancellationToken::new())
        .await
        .unwrap();
    assert!(!nothing.changed());
}
