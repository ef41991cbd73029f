//! Administrator-facing desired configuration and the cluster-wide inputs merged into it.

use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};

use crate::names::{NETWORK_TYPE_OVN, NETWORK_TYPE_SDN};

/// Desired network configuration (`Network.operator.openshift.io` spec).
///
/// Every optional field is skipped when unset so the JSON form only carries what
/// was declared or defaulted; the safety gate diffs that form leaf by leaf.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct DesiredSpec {
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub cluster_network: Vec<ClusterNetworkEntry>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub service_network: Vec<String>,
    #[serde(default)]
    pub default_network: DefaultNetwork,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub additional_networks: Vec<AdditionalNetwork>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub disable_multi_network: Option<bool>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub use_multi_network_policy: Option<bool>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub deploy_kube_proxy: Option<bool>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub kube_proxy_config: Option<KubeProxyConfig>,
    #[serde(default, skip_serializing_if = "std::ops::Not::not")]
    pub disable_network_diagnostics: bool,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub log_level: Option<LogLevel>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub operator_log_level: Option<LogLevel>,
    #[serde(default, skip_serializing_if = "ManagementState::is_managed")]
    pub management_state: ManagementState,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub migration: Option<MigrationSpec>,

    /// Deprecated single-range spellings, rewritten into the list form before defaulting.
    #[serde(rename = "clusterNetworkCIDR", default, skip_serializing_if = "Option::is_none")]
    pub deprecated_cluster_network_cidr: Option<String>,
    #[serde(rename = "hostPrefix", default, skip_serializing_if = "Option::is_none")]
    pub deprecated_host_prefix: Option<u32>,
    #[serde(rename = "serviceNetworkCIDR", default, skip_serializing_if = "Option::is_none")]
    pub deprecated_service_network_cidr: Option<String>,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ClusterNetworkEntry {
    pub cidr: String,
    #[serde(default)]
    pub host_prefix: u32,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct DefaultNetwork {
    #[serde(rename = "type", default, skip_serializing_if = "String::is_empty")]
    pub network_type: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub ovn_kubernetes_config: Option<OvnKubernetesConfig>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub openshift_sdn_config: Option<OpenShiftSdnConfig>,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct OvnKubernetesConfig {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub mtu: Option<u32>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub geneve_port: Option<u32>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub v4_internal_subnet: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub ipsec_config: Option<IpsecConfig>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub gateway_config: Option<serde_json::Value>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub policy_audit_config: Option<serde_json::Value>,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct IpsecConfig {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub mode: Option<String>,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct OpenShiftSdnConfig {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub mode: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub vxlan_port: Option<u32>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub mtu: Option<u32>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub enable_unidling: Option<bool>,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct AdditionalNetwork {
    pub name: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub namespace: Option<String>,
    #[serde(rename = "type", default)]
    pub network_type: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub raw_cni_config: Option<String>,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct KubeProxyConfig {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub iptables_sync_period: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub bind_address: Option<String>,
    #[serde(default, skip_serializing_if = "BTreeMap::is_empty")]
    pub proxy_arguments: BTreeMap<String, Vec<String>>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum LogLevel {
    Normal,
    Debug,
    Trace,
    TraceAll,
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub enum ManagementState {
    #[default]
    Managed,
    Unmanaged,
}

impl ManagementState {
    pub fn is_managed(&self) -> bool {
        matches!(self, ManagementState::Managed)
    }
}

/// Declared migration between network implementations.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct MigrationSpec {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub network_type: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub mtu: Option<MtuMigration>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub features: Option<MigrationFeatures>,
}

impl MigrationSpec {
    /// Target implementation when a network-type migration is active.
    pub fn target(&self) -> Option<&str> {
        self.network_type.as_deref().filter(|t| !t.is_empty())
    }
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct MtuMigration {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub network: Option<MtuRange>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub machine: Option<MtuRange>,
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct MtuRange {
    pub from: u32,
    pub to: u32,
}

/// Per-feature migration switches. `None` means migrate.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct MigrationFeatures {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub egress_firewall: Option<bool>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub multicast: Option<bool>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub egress_ip: Option<bool>,
}

/// Classified default network implementation.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub enum NetworkType {
    OvnKubernetes,
    OpenShiftSdn,
    Other(String),
}

impl NetworkType {
    pub fn parse(s: &str) -> Self {
        match s {
            NETWORK_TYPE_OVN => NetworkType::OvnKubernetes,
            NETWORK_TYPE_SDN => NetworkType::OpenShiftSdn,
            other => NetworkType::Other(other.to_string()),
        }
    }

    pub fn as_str(&self) -> &str {
        match self {
            NetworkType::OvnKubernetes => NETWORK_TYPE_OVN,
            NetworkType::OpenShiftSdn => NETWORK_TYPE_SDN,
            NetworkType::Other(s) => s.as_str(),
        }
    }

    /// True for the two implementations migrations can target.
    pub fn is_builtin(&self) -> bool {
        !matches!(self, NetworkType::Other(_))
    }
}

impl std::fmt::Display for NetworkType {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

impl DesiredSpec {
    pub fn network_type(&self) -> NetworkType {
        NetworkType::parse(&self.default_network.network_type)
    }

    /// MTU configured for the active implementation, if any.
    pub fn mtu(&self) -> Option<u32> {
        match self.network_type() {
            NetworkType::OvnKubernetes => self.default_network.ovn_kubernetes_config.as_ref().and_then(|c| c.mtu),
            NetworkType::OpenShiftSdn => self.default_network.openshift_sdn_config.as_ref().and_then(|c| c.mtu),
            NetworkType::Other(_) => None,
        }
    }

    pub fn is_unmanaged(&self) -> bool {
        !self.management_state.is_managed()
    }

    /// IPsec mode of an OVN-Kubernetes config; `None` for other implementations.
    pub fn ipsec_mode(&self) -> Option<&str> {
        if self.network_type() != NetworkType::OvnKubernetes {
            return None;
        }
        Some(
            self.default_network
                .ovn_kubernetes_config
                .as_ref()
                .and_then(|c| c.ipsec_config.as_ref())
                .and_then(|i| i.mode.as_deref())
                .unwrap_or("Disabled"),
        )
    }
}

/// Desired-config object as read from the API, with the identity needed to write it back.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct DesiredConfig {
    pub name: String,
    pub uid: Option<String>,
    pub resource_version: Option<String>,
    pub spec: DesiredSpec,
}

/// Authoritative cluster-wide network facts (`Network.config.openshift.io` spec).
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ClusterNetworkConfig {
    #[serde(default)]
    pub cluster_network: Vec<ClusterNetworkEntry>,
    #[serde(default)]
    pub service_network: Vec<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub network_type: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub network_diagnostics: Option<serde_json::Value>,
}

/// Effective network facts published back on the cluster config object.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ClusterNetworkStatus {
    pub cluster_network: Vec<ClusterNetworkEntry>,
    pub service_network: Vec<String>,
    pub network_type: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub cluster_network_mtu: Option<u32>,
}

impl ClusterNetworkStatus {
    pub fn from_spec(spec: &DesiredSpec) -> Self {
        Self {
            cluster_network: spec.cluster_network.clone(),
            service_network: spec.service_network.clone(),
            network_type: spec.default_network.network_type.clone(),
            cluster_network_mtu: spec.mtu(),
        }
    }
}

/// Last spec known to be fully applied, with the version of the record it came from.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct AppliedSnapshot {
    pub spec: DesiredSpec,
    pub resource_version: Option<String>,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn unset_fields_are_omitted_from_json() {
        let spec = DesiredSpec {
            default_network: DefaultNetwork { network_type: NETWORK_TYPE_OVN.into(), ..Default::default() },
            ..Default::default()
        };
        let v = serde_json::to_value(&spec).unwrap();
        assert_eq!(v, serde_json::json!({ "defaultNetwork": { "type": "OVNKubernetes" } }));
    }

    #[test]
    fn mtu_follows_active_implementation() {
        let mut spec = DesiredSpec::default();
        spec.default_network.network_type = NETWORK_TYPE_SDN.into();
        spec.default_network.ovn_kubernetes_config = Some(OvnKubernetesConfig { mtu: Some(1400), ..Default::default() });
        assert_eq!(spec.mtu(), None);
        spec.default_network.openshift_sdn_config = Some(OpenShiftSdnConfig { mtu: Some(1450), ..Default::default() });
        assert_eq!(spec.mtu(), Some(1450));
    }

    #[test]
    fn parses_operator_json() {
        let v = serde_json::json!({
            "clusterNetwork": [{ "cidr": "10.128.0.0/14", "hostPrefix": 23 }],
            "serviceNetwork": ["172.30.0.0/16"],
            "defaultNetwork": { "type": "OVNKubernetes", "ovnKubernetesConfig": { "genevePort": 6081 } },
            "managementState": "Unmanaged",
            "migration": { "networkType": "OpenShiftSDN", "features": { "egressFirewall": false } }
        });
        let spec: DesiredSpec = serde_json::from_value(v).unwrap();
        assert!(spec.is_unmanaged());
        assert_eq!(spec.cluster_network[0].host_prefix, 23);
        let mig = spec.migration.unwrap();
        assert_eq!(mig.target(), Some("OpenShiftSDN"));
        assert_eq!(mig.features.unwrap().egress_firewall, Some(false));
    }
}
