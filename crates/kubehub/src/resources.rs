//! API resources we address by name, and kube error classification.

use kube::core::{ApiResource, GroupVersionKind};
use once_cell::sync::Lazy;

use netop_core::SourceError;

fn resource(group: &str, version: &str, kind: &str, plural: &str) -> ApiResource {
    ApiResource::from_gvk_with_plural(&GroupVersionKind::gvk(group, version, kind), plural)
}

/// `networks.operator.openshift.io`: the desired config.
pub static OPERATOR_NETWORK: Lazy<ApiResource> = Lazy::new(|| resource("operator.openshift.io", "v1", "Network", "networks"));
/// `networks.config.openshift.io`: the cluster-wide network config.
pub static CONFIG_NETWORK: Lazy<ApiResource> = Lazy::new(|| resource("config.openshift.io", "v1", "Network", "networks"));
pub static INFRASTRUCTURE: Lazy<ApiResource> = Lazy::new(|| resource("config.openshift.io", "v1", "Infrastructure", "infrastructures"));
pub static FEATURE_GATE: Lazy<ApiResource> = Lazy::new(|| resource("config.openshift.io", "v1", "FeatureGate", "featuregates"));
pub static CLUSTER_OPERATOR: Lazy<ApiResource> = Lazy::new(|| resource("config.openshift.io", "v1", "ClusterOperator", "clusteroperators"));

pub static EGRESS_NETWORK_POLICY: Lazy<ApiResource> =
    Lazy::new(|| resource("network.openshift.io", "v1", "EgressNetworkPolicy", "egressnetworkpolicies"));
pub static NET_NAMESPACE: Lazy<ApiResource> = Lazy::new(|| resource("network.openshift.io", "v1", "NetNamespace", "netnamespaces"));
pub static HOST_SUBNET: Lazy<ApiResource> = Lazy::new(|| resource("network.openshift.io", "v1", "HostSubnet", "hostsubnets"));
pub static EGRESS_FIREWALL: Lazy<ApiResource> = Lazy::new(|| resource("k8s.ovn.org", "v1", "EgressFirewall", "egressfirewalls"));
pub static EGRESS_IP: Lazy<ApiResource> = Lazy::new(|| resource("k8s.ovn.org", "v1", "EgressIP", "egressips"));

pub fn is_not_found(e: &kube::Error) -> bool {
    matches!(e, kube::Error::Api(resp) if resp.code == 404)
}

pub fn is_conflict(e: &kube::Error) -> bool {
    matches!(e, kube::Error::Api(resp) if resp.code == 409)
}

/// 404 is `NotFound`, 409 is `Conflict`, anything else is `Other`.
pub fn source_error(what: &str, e: kube::Error) -> SourceError {
    if is_not_found(&e) {
        SourceError::NotFound(what.to_string())
    } else if is_conflict(&e) {
        SourceError::Conflict(format!("{what}: {e}"))
    } else {
        SourceError::Other(format!("{what}: {e}"))
    }
}
