#![forbid(unsafe_code)]

mod support;

use std::sync::atomic::Ordering;
use std::time::Duration;

use netop_core::names::IGNORE_OBJECT_ERROR_ANNOTATION;
use netop_core::spec::MigrationFeatures;
use netop_core::{ApplyError, MigrationFeature, MigrationSpec, ReconcileKey, StatusKey};
use netop_reconcile::{Outcome, ReconcileError};
use serde_json::json;

use support::{configmap, FakeCluster, PROBED_MTU};

fn key() -> ReconcileKey {
    ReconcileKey::new("cluster")
}

fn degraded_reason(engine: &netop_reconcile::Engine) -> Option<String> {
    let status = engine.status().snapshot();
    status.conditions.get(&StatusKey::OperatorConfig).and_then(|c| c.degraded.clone()).filter(|d| d.active).map(|d| d.reason)
}

#[tokio::test]
async fn second_cycle_without_changes_is_a_no_op() {
    let fake = FakeCluster::new();
    let engine = fake.engine();

    let outcome = engine.reconcile(&key()).await.unwrap();
    assert_eq!(outcome, Outcome::ResyncAfter(Duration::from_secs(180)));
    assert!(fake.reset_diffs() > 0);
    assert_eq!(fake.desired_updates.load(Ordering::SeqCst), 1);

    engine.reconcile(&key()).await.unwrap();
    assert_eq!(fake.reset_diffs(), 0);
    assert_eq!(fake.desired_updates.load(Ordering::SeqCst), 1);

    let status = engine.status().snapshot();
    assert!(!status.is_degraded());
    assert!(!status.is_progressing());
}

#[tokio::test]
async fn snapshot_record_is_applied_first() {
    let fake = FakeCluster::new();
    let engine = fake.engine();
    engine.reconcile(&key()).await.unwrap();

    let attempts = fake.take_attempts();
    assert_eq!(attempts[0], "openshift-network-operator/applied-cluster");
    assert_eq!(attempts.len(), 4);

    let applied = fake.applied_spec().unwrap();
    assert_eq!(applied.network_type().as_str(), "OVNKubernetes");
    assert_eq!(applied.mtu(), Some(PROBED_MTU - 100));
}

#[tokio::test]
async fn foreign_names_are_ignored() {
    let fake = FakeCluster::new();
    let engine = fake.engine();

    let outcome = engine.reconcile(&ReconcileKey::new("not-cluster")).await.unwrap();
    assert_eq!(outcome, Outcome::NoRequeue);
    assert!(fake.take_attempts().is_empty());
    assert!(fake.status_writes.lock().unwrap().is_empty());
    assert_eq!(fake.desired_updates.load(Ordering::SeqCst), 0);
}

#[tokio::test]
async fn immutable_change_is_rejected_and_nothing_is_applied() {
    let fake = FakeCluster::new();
    let engine = fake.engine();
    engine.reconcile(&key()).await.unwrap();
    fake.take_attempts();

    fake.edit_spec(|s| s.default_network.network_type = "OpenShiftSDN".into());
    let err = engine.reconcile(&key()).await.unwrap_err();
    assert!(matches!(err, ReconcileError::UnsafeChange(_)), "{err}");
    assert!(fake.take_attempts().is_empty());
    assert_eq!(degraded_reason(&engine).as_deref(), Some("InvalidOperatorConfig"));

    let status = fake.status_writes.lock().unwrap().last().cloned().unwrap();
    assert!(status.degraded_messages()[0].contains("defaultNetwork.type"));
}

#[tokio::test]
async fn migration_unlocks_network_type_change() {
    let fake = FakeCluster::new();
    let engine = fake.engine();
    engine.reconcile(&key()).await.unwrap();

    fake.edit_spec(|s| {
        s.default_network.network_type = "OpenShiftSDN".into();
        s.migration = Some(MigrationSpec { network_type: Some("OpenShiftSDN".into()), ..Default::default() });
    });
    engine.reconcile(&key()).await.unwrap();
    assert_eq!(fake.applied_spec().unwrap().network_type().as_str(), "OpenShiftSDN");
    // The type changed, so the MTU is measured again.
    assert_eq!(fake.probes.load(Ordering::SeqCst), 2);
}

#[tokio::test]
async fn free_field_change_applies() {
    let fake = FakeCluster::new();
    let engine = fake.engine();
    engine.reconcile(&key()).await.unwrap();
    fake.reset_diffs();

    fake.edit_spec(|s| s.use_multi_network_policy = Some(true));
    engine.reconcile(&key()).await.unwrap();
    assert_eq!(fake.reset_diffs(), 1, "only the snapshot record changes");
    assert_eq!(fake.applied_spec().unwrap().use_multi_network_policy, Some(true));
    assert_eq!(degraded_reason(&engine), None);
}

#[tokio::test]
async fn conflicts_retry_without_degrading() {
    let fake = FakeCluster::new();
    fake.conflict_once.lock().unwrap().insert("ovnkube-config".into());
    let engine = fake.engine();

    let err = engine.reconcile(&key()).await.unwrap_err();
    assert!(err.is_conflict() && err.requeue_immediately(), "{err}");
    assert_eq!(degraded_reason(&engine), None);
    // The loop still reached the objects after the conflicting one.
    assert_eq!(fake.take_attempts().last().map(String::as_str), Some("openshift-ovn-kubernetes/ovnkube-node"));

    engine.reconcile(&key()).await.unwrap();
    assert!(!engine.status().snapshot().is_degraded());
}

#[tokio::test]
async fn apply_is_best_effort_and_reports_the_last_failure() {
    let fake = FakeCluster::new();
    *fake.rendered.lock().unwrap() = vec![configmap("a"), configmap("b"), configmap("c"), configmap("d")];
    {
        let mut failing = fake.failing.lock().unwrap();
        failing.insert("b".into(), ApplyError::Other("admission webhook denied b".into()));
        failing.insert("c".into(), ApplyError::Other("admission webhook denied c".into()));
    }
    let engine = fake.engine();

    let err = engine.reconcile(&key()).await.unwrap_err();
    let ReconcileError::Apply(message) = &err else { panic!("unexpected error {err}") };
    assert!(message.contains("openshift-ovn-kubernetes/c") && message.contains("denied c"), "{message}");
    assert!(message.starts_with("could not apply"));
    assert_eq!(fake.take_attempts().last().map(String::as_str), Some("openshift-ovn-kubernetes/d"));
    assert_eq!(degraded_reason(&engine).as_deref(), Some("ApplyOperatorConfig"));
}

#[tokio::test]
async fn ignore_errors_objects_do_not_degrade() {
    let fake = FakeCluster::new();
    let mut optional = configmap("optional");
    optional["metadata"]["annotations"] = json!({ IGNORE_OBJECT_ERROR_ANNOTATION: "" });
    *fake.rendered.lock().unwrap() = vec![optional, configmap("after")];
    fake.failing.lock().unwrap().insert("optional".into(), ApplyError::Other("no matches for kind".into()));
    let engine = fake.engine();

    engine.reconcile(&key()).await.unwrap();
    assert_eq!(fake.take_attempts().len(), 3);
}

#[tokio::test]
async fn network_attachment_namespace_failures_get_a_hint() {
    let fake = FakeCluster::new();
    *fake.rendered.lock().unwrap() = vec![json!({
        "apiVersion": "k8s.cni.cncf.io/v1", "kind": "NetworkAttachmentDefinition",
        "metadata": { "name": "macvlan", "namespace": "tenant-a" }, "spec": { "config": "{}" }
    })];
    fake.failing.lock().unwrap().insert("macvlan".into(), ApplyError::Other("namespaces \"tenant-a\" not found".into()));
    let engine = fake.engine();

    let err = engine.reconcile(&key()).await.unwrap_err();
    assert!(err.to_string().contains("make sure it exists"), "{err}");
    assert_eq!(err.reason(), Some("ApplyOperatorConfig"));
}

#[tokio::test]
async fn migration_runs_only_enabled_features() {
    let fake = FakeCluster::new();
    fake.edit_spec(|s| {
        s.migration = Some(MigrationSpec {
            network_type: Some("OVNKubernetes".into()),
            mtu: None,
            features: Some(MigrationFeatures { egress_firewall: Some(false), ..Default::default() }),
        })
    });
    let engine = fake.engine();

    engine.reconcile(&key()).await.unwrap();
    assert_eq!(*fake.migrations.lock().unwrap(), vec![MigrationFeature::Multicast, MigrationFeature::EgressIp]);
}

#[tokio::test]
async fn failed_migration_degrades_and_stops() {
    let fake = std::sync::Arc::new(FakeCluster { fail_migration: Some(MigrationFeature::EgressFirewall), ..FakeCluster::default() });
    fake.edit_spec(|s| s.migration = Some(MigrationSpec { network_type: Some("OVNKubernetes".into()), ..Default::default() }));
    let engine = fake.engine();

    let err = engine.reconcile(&key()).await.unwrap_err();
    assert_eq!(err.reason(), Some("MigrationError"));
    assert_eq!(*fake.migrations.lock().unwrap(), vec![MigrationFeature::EgressFirewall]);
    assert!(fake.cluster_status.lock().unwrap().is_none());
}

#[tokio::test]
async fn mtu_is_probed_once() {
    let fake = FakeCluster::new();
    let engine = fake.engine();
    engine.reconcile(&key()).await.unwrap();
    engine.reconcile(&key()).await.unwrap();
    assert_eq!(fake.probes.load(Ordering::SeqCst), 1);

    let status = fake.cluster_status.lock().unwrap().clone().unwrap();
    assert_eq!(status.cluster_network_mtu, Some(PROBED_MTU - 100));
}

#[tokio::test]
async fn hosted_control_planes_are_not_probed() {
    let fake = FakeCluster::hosted();
    let engine = fake.engine();
    engine.reconcile(&key()).await.unwrap();
    assert_eq!(fake.probes.load(Ordering::SeqCst), 0);
    assert_eq!(fake.applied_spec().unwrap().mtu(), Some(1400));
}

#[tokio::test]
async fn missing_config_degrades_without_requeue() {
    let fake = FakeCluster::new();
    *fake.desired.lock().unwrap() = None;
    let engine = fake.engine();

    assert_eq!(engine.reconcile(&key()).await.unwrap(), Outcome::NoRequeue);
    assert_eq!(degraded_reason(&engine).as_deref(), Some("NoOperatorConfig"));
    assert!(fake.take_attempts().is_empty());
}

#[tokio::test]
async fn unmanaged_config_is_left_alone() {
    let fake = FakeCluster::new();
    fake.edit_spec(|s| s.management_state = netop_core::spec::ManagementState::Unmanaged);
    let engine = fake.engine();

    assert_eq!(engine.reconcile(&key()).await.unwrap(), Outcome::NoRequeue);
    assert!(fake.take_attempts().is_empty());
    assert!(fake.status_writes.lock().unwrap().is_empty());
}

#[tokio::test]
async fn invalid_config_is_actionable() {
    let fake = FakeCluster::new();
    fake.cluster.lock().unwrap().service_network = vec!["10.128.0.0/16".into()];
    let engine = fake.engine();

    let err = engine.reconcile(&key()).await.unwrap_err();
    assert!(matches!(err, ReconcileError::InvalidConfig(_)));
    let status = engine.status().snapshot();
    let degraded = status.conditions[&StatusKey::OperatorConfig].degraded.clone().unwrap();
    assert!(degraded.message.contains("Edit network.operator.openshift.io/cluster"), "{}", degraded.message);
}

#[tokio::test]
async fn render_progress_is_reported() {
    let fake = std::sync::Arc::new(FakeCluster { progressing: true, ..FakeCluster::default() });
    let engine = fake.engine();
    engine.reconcile(&key()).await.unwrap();
    let status = engine.status().snapshot();
    assert!(status.conditions[&StatusKey::OperatorRender].is_progressing());
    assert!(!status.is_degraded());
}
