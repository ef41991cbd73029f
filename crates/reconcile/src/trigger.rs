//! Trigger fan-in: every watch event reduces to at most one reconcile key.

use netop_core::names::{APPLIED_NAMESPACE, OPERATOR_LOCK};
use netop_core::snapshot::record_name;
use netop_core::{NodeChange, ReconcileKey, TriggerEvent};

/// Map an event to the key it should reconcile, or `None` when it is irrelevant.
///
/// Desired-config events keep their own name; everything else collapses onto `singleton`.
/// The scheduler only runs the singleton key and the engine rejects any other name.
pub fn reconcile_key(event: &TriggerEvent, singleton: &str) -> Option<ReconcileKey> {
    match event {
        TriggerEvent::DesiredConfig { name, spec_changed } => spec_changed.then(|| ReconcileKey::new(name.as_str())),
        TriggerEvent::ClusterConfig { .. } => Some(ReconcileKey::new(singleton)),
        TriggerEvent::Node { change, .. } => match change {
            NodeChange::Created | NodeChange::Deleted | NodeChange::LabelsChanged => Some(ReconcileKey::new(singleton)),
            NodeChange::Updated => None,
        },
        TriggerEvent::ConfigMap { namespace, name } => {
            let ours = namespace == APPLIED_NAMESPACE && name != OPERATOR_LOCK && *name != record_name(singleton);
            ours.then(|| ReconcileKey::new(singleton))
        }
    }
}
