//! Feature conversion between the OpenShift SDN and OVN-Kubernetes custom resources.
//!
//! Every conversion writes with server-side apply or merge patches, so re-running one after a
//! partial failure converges to the same result.

use std::collections::BTreeMap;

use anyhow::{anyhow, bail, Context, Result};
use k8s_openapi::api::core::v1::{Namespace, Node};
use kube::{
    api::{Api, ListParams, Patch, PatchParams},
    core::{ApiResource, DynamicObject},
    Client,
};
use serde_json::{json, Value as Json};
use tracing::{debug, info, warn};

use netop_core::{MigrationFeature, Migrator, NetworkType};

use crate::resources::{EGRESS_FIREWALL, EGRESS_IP, EGRESS_NETWORK_POLICY, HOST_SUBNET, NET_NAMESPACE};

pub const MIGRATION_FIELD_MANAGER: &str = "cluster-network-operator/migration";
pub const SDN_MULTICAST_ANNOTATION: &str = "netnamespace.network.openshift.io/multicast-enabled";
pub const OVN_MULTICAST_ANNOTATION: &str = "k8s.ovn.org/multicast-enabled";
pub const EGRESS_ASSIGNABLE_LABEL: &str = "k8s.ovn.org/egress-assignable";
const NAMESPACE_NAME_LABEL: &str = "kubernetes.io/metadata.name";

pub struct KubeMigrator {
    client: Client,
}

impl KubeMigrator {
    pub fn new(client: Client) -> Self {
        Self { client }
    }

    async fn list(&self, ar: &ApiResource) -> Result<Vec<Json>> {
        let api: Api<DynamicObject> = Api::all_with(self.client.clone(), ar);
        let list = api.list(&ListParams::default()).await.with_context(|| format!("listing {}", ar.plural))?;
        list.items.iter().map(|o| serde_json::to_value(o).map_err(Into::into)).collect()
    }

    async fn apply(&self, ar: &ApiResource, obj: &Json) -> Result<()> {
        let name = obj["metadata"]["name"].as_str().ok_or_else(|| anyhow!("converted {} has no name", ar.kind))?;
        let api: Api<DynamicObject> = match obj["metadata"]["namespace"].as_str() {
            Some(ns) => Api::namespaced_with(self.client.clone(), ns, ar),
            None => Api::all_with(self.client.clone(), ar),
        };
        api.patch(name, &PatchParams::apply(MIGRATION_FIELD_MANAGER).force(), &Patch::Apply(obj))
            .await
            .with_context(|| format!("applying {} {name}", ar.kind))?;
        Ok(())
    }

    async fn merge_patch(&self, ar: &ApiResource, name: &str, patch: &Json) -> Result<()> {
        let api: Api<DynamicObject> = Api::all_with(self.client.clone(), ar);
        api.patch(name, &PatchParams::default(), &Patch::Merge(patch)).await.with_context(|| format!("patching {} {name}", ar.kind))?;
        Ok(())
    }

    async fn convert(&self, from: &ApiResource, to: &ApiResource, f: fn(&Json) -> Option<Json>) -> Result<()> {
        let mut converted = 0usize;
        for obj in self.list(from).await? {
            if let Some(out) = f(&obj) {
                self.apply(to, &out).await?;
                converted += 1;
            }
        }
        metrics::counter!("migration_objects_converted_total", converted as u64, "kind" => to.kind.clone());
        info!(from = %from.kind, to = %to.kind, converted, "converted objects");
        Ok(())
    }

    async fn multicast_to_ovn(&self) -> Result<()> {
        let namespaces: Api<Namespace> = Api::all(self.client.clone());
        let patch = annotation_patch(OVN_MULTICAST_ANNOTATION, "true");
        for ns in multicast_enabled(&self.list(&NET_NAMESPACE).await?, SDN_MULTICAST_ANNOTATION) {
            namespaces.patch(&ns, &PatchParams::default(), &Patch::Merge(&patch)).await.with_context(|| format!("patching namespace {ns}"))?;
            debug!(namespace = %ns, "multicast enabled");
        }
        Ok(())
    }

    async fn multicast_to_sdn(&self) -> Result<()> {
        let namespaces: Api<Namespace> = Api::all(self.client.clone());
        let list = namespaces.list(&ListParams::default()).await.context("listing namespaces")?;
        let objs = list.items.iter().map(serde_json::to_value).collect::<Result<Vec<_>, _>>()?;
        let patch = annotation_patch(SDN_MULTICAST_ANNOTATION, "true");
        for ns in multicast_enabled(&objs, OVN_MULTICAST_ANNOTATION) {
            self.merge_patch(&NET_NAMESPACE, &ns, &patch).await?;
        }
        Ok(())
    }

    async fn egress_ip_to_ovn(&self) -> Result<()> {
        for eip in self.list(&NET_NAMESPACE).await?.iter().filter_map(egress_ip_from_net_namespace) {
            self.apply(&EGRESS_IP, &eip).await?;
        }
        let nodes: Api<Node> = Api::all(self.client.clone());
        let label = json!({ "metadata": { "labels": { EGRESS_ASSIGNABLE_LABEL: "" } } });
        for host in egress_hosts(&self.list(&HOST_SUBNET).await?) {
            nodes.patch(&host, &PatchParams::default(), &Patch::Merge(&label)).await.with_context(|| format!("labelling node {host}"))?;
        }
        Ok(())
    }

    async fn egress_ip_to_sdn(&self) -> Result<()> {
        let eips = self.list(&EGRESS_IP).await?;
        for (ns, ips) in net_namespace_egress(&eips) {
            self.merge_patch(&NET_NAMESPACE, &ns, &json!({ "egressIPs": ips })).await?;
        }
        for (node, ips) in host_subnet_assignments(&eips) {
            self.merge_patch(&HOST_SUBNET, &node, &json!({ "egressIPs": ips })).await?;
        }
        Ok(())
    }
}

#[async_trait::async_trait]
impl Migrator for KubeMigrator {
    async fn migrate(&self, feature: MigrationFeature, target: &NetworkType) -> Result<()> {
        let to_ovn = match target {
            NetworkType::OvnKubernetes => true,
            NetworkType::OpenShiftSdn => false,
            NetworkType::Other(t) => bail!("no {feature} conversion toward {t}"),
        };
        match (feature, to_ovn) {
            (MigrationFeature::EgressFirewall, true) => self.convert(&EGRESS_NETWORK_POLICY, &EGRESS_FIREWALL, egress_firewall_from_policy).await,
            (MigrationFeature::EgressFirewall, false) => self.convert(&EGRESS_FIREWALL, &EGRESS_NETWORK_POLICY, policy_from_egress_firewall).await,
            (MigrationFeature::Multicast, true) => self.multicast_to_ovn().await,
            (MigrationFeature::Multicast, false) => self.multicast_to_sdn().await,
            (MigrationFeature::EgressIp, true) => self.egress_ip_to_ovn().await,
            (MigrationFeature::EgressIp, false) => self.egress_ip_to_sdn().await,
        }
    }
}

fn annotation_patch(key: &str, value: &str) -> Json {
    json!({ "metadata": { "annotations": { key: value } } })
}

/// `EgressNetworkPolicy` -> `EgressFirewall`. OVN only honours the object named `default`.
pub fn egress_firewall_from_policy(policy: &Json) -> Option<Json> {
    let ns = policy["metadata"]["namespace"].as_str()?;
    let egress: Vec<Json> = policy["spec"]["egress"]
        .as_array()
        .into_iter()
        .flatten()
        .filter_map(|rule| Some(json!({ "type": rule.get("type")?, "to": rule.get("to")? })))
        .collect();
    Some(json!({
        "apiVersion": "k8s.ovn.org/v1",
        "kind": "EgressFirewall",
        "metadata": { "name": "default", "namespace": ns },
        "spec": { "egress": egress },
    }))
}

/// `EgressFirewall` -> `EgressNetworkPolicy`. Port restrictions and node selectors have no
/// SDN equivalent and are dropped.
pub fn policy_from_egress_firewall(firewall: &Json) -> Option<Json> {
    let ns = firewall["metadata"]["namespace"].as_str()?;
    let mut egress = Vec::new();
    for rule in firewall["spec"]["egress"].as_array().into_iter().flatten() {
        let to = &rule["to"];
        let to = match (to.get("cidrSelector"), to.get("dnsName")) {
            (Some(cidr), _) => json!({ "cidrSelector": cidr }),
            (None, Some(dns)) => json!({ "dnsName": dns }),
            (None, None) => {
                warn!(namespace = ns, "dropping egress firewall rule without a CIDR or DNS target");
                continue;
            }
        };
        if rule.get("ports").is_some() {
            warn!(namespace = ns, "egress firewall port restrictions are dropped");
        }
        egress.push(json!({ "type": rule["type"], "to": to }));
    }
    Some(json!({
        "apiVersion": "network.openshift.io/v1",
        "kind": "EgressNetworkPolicy",
        "metadata": { "name": "default", "namespace": ns },
        "spec": { "egress": egress },
    }))
}

/// Namespace names whose objects carry `annotation: "true"`. NetNamespaces name theirs in `netname`.
pub fn multicast_enabled(objs: &[Json], annotation: &str) -> Vec<String> {
    objs.iter()
        .filter(|o| o["metadata"]["annotations"][annotation].as_str() == Some("true"))
        .filter_map(|o| o["netname"].as_str().or_else(|| o["metadata"]["name"].as_str()))
        .map(str::to_string)
        .collect()
}

pub fn egress_ip_from_net_namespace(netns: &Json) -> Option<Json> {
    let ns = netns["netname"].as_str()?;
    let ips = netns["egressIPs"].as_array().filter(|ips| !ips.is_empty())?;
    Some(json!({
        "apiVersion": "k8s.ovn.org/v1",
        "kind": "EgressIP",
        "metadata": { "name": format!("egressip-{ns}") },
        "spec": {
            "egressIPs": ips,
            "namespaceSelector": { "matchLabels": { NAMESPACE_NAME_LABEL: ns } },
        },
    }))
}

/// Nodes whose HostSubnet hosts egress IPs or egress CIDRs.
pub fn egress_hosts(subnets: &[Json]) -> Vec<String> {
    let non_empty = |v: &Json| v.as_array().is_some_and(|a| !a.is_empty());
    subnets
        .iter()
        .filter(|s| non_empty(&s["egressIPs"]) || non_empty(&s["egressCIDRs"]))
        .filter_map(|s| s["host"].as_str().or_else(|| s["metadata"]["name"].as_str()))
        .map(str::to_string)
        .collect()
}

/// Namespace -> egress IPs, for EgressIPs selecting a single namespace by name.
pub fn net_namespace_egress(eips: &[Json]) -> BTreeMap<String, Vec<String>> {
    let mut out: BTreeMap<String, Vec<String>> = BTreeMap::new();
    for eip in eips {
        let Some(ns) = eip["spec"]["namespaceSelector"]["matchLabels"][NAMESPACE_NAME_LABEL].as_str() else {
            warn!(name = eip["metadata"]["name"].as_str().unwrap_or_default(), "EgressIP without a single-namespace selector is not converted");
            continue;
        };
        let ips = eip["spec"]["egressIPs"].as_array().into_iter().flatten().filter_map(Json::as_str).map(str::to_string);
        out.entry(ns.to_string()).or_default().extend(ips);
    }
    out
}

/// Node -> egress IPs currently assigned to it.
pub fn host_subnet_assignments(eips: &[Json]) -> BTreeMap<String, Vec<String>> {
    let mut out: BTreeMap<String, Vec<String>> = BTreeMap::new();
    for item in eips.iter().flat_map(|e| e["status"]["items"].as_array().into_iter().flatten()) {
        if let (Some(node), Some(ip)) = (item["node"].as_str(), item["egressIP"].as_str()) {
            out.entry(node.to_string()).or_default().push(ip.to_string());
        }
    }
    out
}
