//! Watch-side change notifications, before they are reduced to a reconcile key.

use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum NodeChange {
    Created,
    Deleted,
    LabelsChanged,
    /// Any other update (conditions, heartbeats).
    Updated,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum TriggerEvent {
    /// The desired-config object changed; `spec_changed` is false for status-only updates.
    DesiredConfig { name: String, spec_changed: bool },
    ClusterConfig { name: String },
    Node { name: String, change: NodeChange },
    ConfigMap { namespace: String, name: String },
}

/// The unit of reconciliation: a desired-config name.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct ReconcileKey(pub String);

impl ReconcileKey {
    pub fn new(name: impl Into<String>) -> Self {
        Self(name.into())
    }

    pub fn name(&self) -> &str {
        &self.0
    }
}

impl std::fmt::Display for ReconcileKey {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(&self.0)
    }
}
