//! Per-component condition state as persisted on the status object.

use std::collections::BTreeMap;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::object::{ObjectReference, RelatedClusterObject};

/// Component whose health is tracked independently.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub enum StatusKey {
    /// The operator configuration pipeline (fetch through apply).
    OperatorConfig,
    /// Manifest rendering.
    OperatorRender,
    /// Machine config rollout.
    MachineConfig,
    /// Rollout of rendered workloads.
    PodDeployment,
}

impl StatusKey {
    pub fn as_str(&self) -> &'static str {
        match self {
            StatusKey::OperatorConfig => "OperatorConfig",
            StatusKey::OperatorRender => "OperatorRender",
            StatusKey::MachineConfig => "MachineConfig",
            StatusKey::PodDeployment => "PodDeployment",
        }
    }
}

impl std::fmt::Display for StatusKey {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Condition {
    pub active: bool,
    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub reason: String,
    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub message: String,
    pub last_transition_time: DateTime<Utc>,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ComponentConditions {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub degraded: Option<Condition>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub progressing: Option<Condition>,
}

impl ComponentConditions {
    pub fn is_degraded(&self) -> bool {
        self.degraded.as_ref().is_some_and(|c| c.active)
    }

    pub fn is_progressing(&self) -> bool {
        self.progressing.as_ref().is_some_and(|c| c.active)
    }
}

/// Full status document: conditions per component plus owned-object references.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct OperatorStatus {
    #[serde(default)]
    pub conditions: BTreeMap<StatusKey, ComponentConditions>,
    #[serde(default)]
    pub related_objects: Vec<ObjectReference>,
    #[serde(default)]
    pub related_cluster_objects: Vec<RelatedClusterObject>,
    #[serde(default)]
    pub machine_configs: Vec<String>,
}

impl OperatorStatus {
    pub fn is_degraded(&self) -> bool {
        self.conditions.values().any(ComponentConditions::is_degraded)
    }

    pub fn is_progressing(&self) -> bool {
        self.conditions.values().any(ComponentConditions::is_progressing)
    }

    /// `"Key: message"` for each degraded component, in key order.
    pub fn degraded_messages(&self) -> Vec<String> {
        self.conditions
            .iter()
            .filter_map(|(k, c)| c.degraded.as_ref().filter(|d| d.active).map(|d| format!("{}: {}", k, d.message)))
            .collect()
    }
}
