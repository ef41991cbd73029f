//! Per-cycle infrastructure facts. Never persisted.

use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct InfraStatus {
    pub platform_type: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub platform_region: Option<String>,
    /// Infrastructure name; keys status scoping of workloads in hosted mode.
    pub infra_name: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub hosted_control_plane: Option<HostedControlPlane>,
    #[serde(default)]
    pub nodes: NodeInventory,
}

impl InfraStatus {
    /// Hosted/managed control planes have no schedulable nodes of their own to probe from.
    pub fn is_hosted(&self) -> bool {
        self.hosted_control_plane.is_some()
    }
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct HostedControlPlane {
    pub namespace: String,
    pub cluster_name: String,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct NodeInventory {
    #[serde(default)]
    pub masters: Vec<String>,
    #[serde(default)]
    pub workers: Vec<String>,
}

impl NodeInventory {
    pub fn is_empty(&self) -> bool {
        self.masters.is_empty() && self.workers.is_empty()
    }
}
