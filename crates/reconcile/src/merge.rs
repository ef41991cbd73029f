//! Config merger: a pure function of the live spec, the cluster config and the applied snapshot.
//!
//! Precedence, highest first:
//! 1. mirrored cluster-config fields (`clusterNetwork`, `serviceNetwork`) always win,
//! 2. fields set on the live spec,
//! 3. values carried over from the applied snapshot,
//! 4. computed defaults (including the probed or recorded host MTU).

use serde_json::{Map, Value as Json};
use tracing::warn;

use netop_core::names::{NETWORK_TYPE_OVN, NETWORK_TYPE_SDN};
use netop_core::spec::{LogLevel, OpenShiftSdnConfig, OvnKubernetesConfig};
use netop_core::{ClusterNetworkConfig, ClusterNetworkEntry, DesiredSpec, NetworkType};

pub const DEFAULT_HOST_MTU: u32 = 1500;
pub const OVN_MTU_OVERHEAD: u32 = 100;
pub const IPSEC_MTU_OVERHEAD: u32 = 46;
pub const SDN_MTU_OVERHEAD: u32 = 50;
pub const DEFAULT_GENEVE_PORT: u32 = 6081;
pub const DEFAULT_VXLAN_PORT: u32 = 4789;
pub const DEFAULT_V4_INTERNAL_SUBNET: &str = "100.64.0.0/16";
pub const DEFAULT_SDN_MODE: &str = "NetworkPolicy";

/// Top-level keys never carried over from the snapshot: removing them must stick.
const NOT_CARRIED_OVER: &[&str] = &["migration", "managementState"];

#[derive(Debug, Clone, Copy)]
pub struct MergeInputs<'a> {
    pub live: &'a DesiredSpec,
    pub cluster: &'a ClusterNetworkConfig,
    pub applied: Option<&'a DesiredSpec>,
    /// Probed MTU, or the MTU record left by an earlier probe.
    pub host_mtu: Option<u32>,
}

/// Produce the fully defaulted desired spec.
pub fn merge(inputs: &MergeInputs<'_>) -> DesiredSpec {
    let mut spec = inputs.live.clone();
    canonicalize(&mut spec);
    mirror_cluster_config(&mut spec, inputs.cluster);
    if let Some(applied) = inputs.applied {
        carry_over(&mut spec, applied);
    }
    fill_defaults(&mut spec, inputs.host_mtu);
    spec
}

/// Bring a previously applied spec up to the current defaulting rules so it compares
/// like-for-like with a freshly merged candidate.
pub fn upconvert(applied: &DesiredSpec, host_mtu: Option<u32>) -> DesiredSpec {
    let mut spec = applied.clone();
    canonicalize(&mut spec);
    fill_defaults(&mut spec, host_mtu);
    spec
}

/// Rewrite deprecated spellings to their canonical form.
pub fn canonicalize(spec: &mut DesiredSpec) {
    spec.default_network.network_type = canonical_network_type(&spec.default_network.network_type);
    if let Some(sdn) = spec.default_network.openshift_sdn_config.as_mut() {
        if let Some(mode) = sdn.mode.as_mut() {
            *mode = canonical_sdn_mode(mode);
        }
    }
    if let Some(target) = spec.migration.as_mut().and_then(|m| m.network_type.as_mut()) {
        *target = canonical_network_type(target);
    }

    let cluster_cidr = spec.deprecated_cluster_network_cidr.take();
    let host_prefix = spec.deprecated_host_prefix.take();
    if let Some(cidr) = cluster_cidr.filter(|c| !c.is_empty()) {
        if spec.cluster_network.is_empty() {
            spec.cluster_network.push(ClusterNetworkEntry { cidr, host_prefix: host_prefix.unwrap_or(0) });
        }
    }
    if let Some(cidr) = spec.deprecated_service_network_cidr.take().filter(|c| !c.is_empty()) {
        if spec.service_network.is_empty() {
            spec.service_network.push(cidr);
        }
    }
}

pub fn canonical_network_type(t: &str) -> String {
    match t.to_ascii_lowercase().as_str() {
        "ovnkubernetes" | "ovn-kubernetes" | "ovn" => NETWORK_TYPE_OVN.to_string(),
        "openshiftsdn" | "openshift-sdn" | "sdn" => NETWORK_TYPE_SDN.to_string(),
        _ => t.to_string(),
    }
}

fn canonical_sdn_mode(mode: &str) -> String {
    match mode.to_ascii_lowercase().replace('-', "").as_str() {
        "multitenant" => "Multitenant".to_string(),
        "networkpolicy" => "NetworkPolicy".to_string(),
        "subnet" => "Subnet".to_string(),
        _ => mode.to_string(),
    }
}

/// Copy the fields the cluster config governs. They override whatever the spec says.
pub fn mirror_cluster_config(spec: &mut DesiredSpec, cluster: &ClusterNetworkConfig) {
    if !cluster.cluster_network.is_empty() {
        spec.cluster_network = cluster.cluster_network.clone();
    }
    if !cluster.service_network.is_empty() {
        spec.service_network = cluster.service_network.clone();
    }
    if spec.default_network.network_type.is_empty() {
        if let Some(t) = cluster.network_type.as_deref().filter(|t| !t.is_empty()) {
            spec.default_network.network_type = canonical_network_type(t);
        }
    }
}

/// Fill every key absent from `spec` with the snapshot's value, recursing into maps.
fn carry_over(spec: &mut DesiredSpec, applied: &DesiredSpec) {
    let merged = carried(serde_json::to_value(&*spec), serde_json::to_value(applied)).and_then(serde_json::from_value);
    match merged {
        Ok(merged) => *spec = merged,
        Err(e) => warn!(error = %e, "could not carry over applied values; merging without them"),
    }
}

fn carried(live: serde_json::Result<Json>, prev: serde_json::Result<Json>) -> serde_json::Result<Json> {
    match (live?, prev?) {
        (Json::Object(mut live), Json::Object(prev)) => {
            for (key, value) in prev {
                if NOT_CARRIED_OVER.contains(&key.as_str()) {
                    continue;
                }
                fill_missing(&mut live, key, value);
            }
            Ok(Json::Object(live))
        }
        (live, _) => Ok(live),
    }
}

fn fill_missing(target: &mut Map<String, Json>, key: String, value: Json) {
    match target.get_mut(&key) {
        None => {
            target.insert(key, value);
        }
        Some(Json::Object(inner)) => {
            if let Json::Object(prev) = value {
                for (k, v) in prev {
                    fill_missing(inner, k, v);
                }
            }
        }
        Some(_) => {}
    }
}

/// Set every unset field to its computed default.
pub fn fill_defaults(spec: &mut DesiredSpec, host_mtu: Option<u32>) {
    let host_mtu = host_mtu.unwrap_or(DEFAULT_HOST_MTU);
    let network_type = spec.network_type();
    match network_type {
        NetworkType::OvnKubernetes => {
            let ovn = spec.default_network.ovn_kubernetes_config.get_or_insert_with(OvnKubernetesConfig::default);
            let ipsec = ovn
                .ipsec_config
                .as_ref()
                .and_then(|i| i.mode.as_deref())
                .is_some_and(|m| m != "Disabled");
            let overhead = if ipsec { OVN_MTU_OVERHEAD + IPSEC_MTU_OVERHEAD } else { OVN_MTU_OVERHEAD };
            ovn.mtu.get_or_insert(host_mtu.saturating_sub(overhead));
            ovn.geneve_port.get_or_insert(DEFAULT_GENEVE_PORT);
            ovn.v4_internal_subnet.get_or_insert_with(|| DEFAULT_V4_INTERNAL_SUBNET.to_string());
        }
        NetworkType::OpenShiftSdn => {
            let sdn = spec.default_network.openshift_sdn_config.get_or_insert_with(OpenShiftSdnConfig::default);
            sdn.mode.get_or_insert_with(|| DEFAULT_SDN_MODE.to_string());
            sdn.vxlan_port.get_or_insert(DEFAULT_VXLAN_PORT);
            sdn.mtu.get_or_insert(host_mtu.saturating_sub(SDN_MTU_OVERHEAD));
        }
        NetworkType::Other(_) => {}
    }
    // Third-party plugins rely on kube-proxy; the built-in ones replace it.
    spec.deploy_kube_proxy.get_or_insert(!network_type.is_builtin());
    spec.disable_multi_network.get_or_insert(false);
    spec.log_level.get_or_insert(LogLevel::Normal);
    spec.operator_log_level.get_or_insert(LogLevel::Normal);
}
