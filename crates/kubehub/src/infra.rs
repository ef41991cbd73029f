//! Infrastructure facts, feature gates and the one-shot MTU prober.

use std::time::Duration;

use anyhow::{anyhow, Context, Result};
use k8s_openapi::api::batch::v1::Job;
use k8s_openapi::api::core::v1::{ConfigMap, Node};
use kube::{
    api::{Api, DeleteParams, ListParams, PostParams},
    core::DynamicObject,
    Client,
};
use serde_json::{json, Value as Json};
use tracing::{debug, info, warn};

use netop_core::names::{APPLIED_NAMESPACE, MTU_CM_KEY, MTU_CM_NAME};
use netop_core::{Bootstrapper, DesiredSpec, FeatureGates, HostedControlPlane, InfraStatus, NodeInventory};

use crate::resources::{is_conflict, FEATURE_GATE, INFRASTRUCTURE};
use crate::source::parse_mtu_record;

const MASTER_ROLE_LABELS: [&str; 2] = ["node-role.kubernetes.io/master", "node-role.kubernetes.io/control-plane"];
pub const PROBE_JOB_NAME: &str = "mtu-prober";

#[derive(Debug, Clone)]
pub struct BootstrapOptions {
    /// Namespace of the hosted control plane, when we manage one.
    pub hosted_namespace: Option<String>,
    pub probe_image: String,
    pub probe_timeout: Duration,
    pub probe_poll: Duration,
}

impl Default for BootstrapOptions {
    fn default() -> Self {
        Self {
            hosted_namespace: None,
            probe_image: "quay.io/openshift/origin-cluster-network-operator:latest".into(),
            probe_timeout: Duration::from_secs(120),
            probe_poll: Duration::from_secs(2),
        }
    }
}

pub struct KubeBootstrapper {
    client: Client,
    options: BootstrapOptions,
    prober: MtuProber,
}

impl KubeBootstrapper {
    pub fn new(client: Client, options: BootstrapOptions) -> Self {
        let prober = MtuProber::new(client.clone(), &options);
        Self { client, options, prober }
    }
}

/// Read the `Infrastructure` status into infra facts (nodes excluded).
pub fn infra_from(obj: &Json, hosted_namespace: Option<&str>) -> InfraStatus {
    let status = &obj["status"];
    let platform_status = &status["platformStatus"];
    let platform_type = platform_status["type"].as_str().or_else(|| status["platform"].as_str()).unwrap_or("None").to_string();
    let platform_region = platform_status
        .as_object()
        .into_iter()
        .flat_map(|m| m.values())
        .find_map(|v| v.get("region").and_then(Json::as_str))
        .map(str::to_string);
    let infra_name = status["infrastructureName"].as_str().unwrap_or_default().to_string();
    let hosted_control_plane = (status["controlPlaneTopology"].as_str() == Some("External")).then(|| HostedControlPlane {
        namespace: hosted_namespace.unwrap_or_default().to_string(),
        cluster_name: infra_name.clone(),
    });
    InfraStatus { platform_type, platform_region, infra_name, hosted_control_plane, nodes: NodeInventory::default() }
}

pub fn node_inventory(nodes: &[Node]) -> NodeInventory {
    let mut inv = NodeInventory::default();
    for node in nodes {
        let Some(name) = node.metadata.name.clone() else { continue };
        let labels = node.metadata.labels.as_ref();
        if MASTER_ROLE_LABELS.iter().any(|l| labels.is_some_and(|m| m.contains_key(*l))) {
            inv.masters.push(name);
        } else {
            inv.workers.push(name);
        }
    }
    inv.masters.sort();
    inv.workers.sort();
    inv
}

/// Enabled gates from the `FeatureGate` status: the first listed version wins.
pub fn feature_gates_from(obj: &Json) -> FeatureGates {
    let enabled = obj["status"]["featureGates"]
        .get(0)
        .and_then(|v| v["enabled"].as_array())
        .into_iter()
        .flatten()
        .filter_map(|g| g["name"].as_str())
        .map(str::to_string);
    FeatureGates::new(enabled)
}

pub async fn load_feature_gates(client: Client) -> Result<FeatureGates> {
    let api: Api<DynamicObject> = Api::all_with(client, &*FEATURE_GATE);
    match api.get_opt("cluster").await.context("reading featuregates/cluster")? {
        Some(obj) => Ok(feature_gates_from(&serde_json::to_value(&obj)?)),
        None => Ok(FeatureGates::default()),
    }
}

#[async_trait::async_trait]
impl Bootstrapper for KubeBootstrapper {
    async fn infra_status(&self) -> Result<InfraStatus> {
        let infra: Api<DynamicObject> = Api::all_with(self.client.clone(), &*INFRASTRUCTURE);
        let obj = infra.get("cluster").await.context("reading infrastructures/cluster")?;
        let mut status = infra_from(&serde_json::to_value(&obj)?, self.options.hosted_namespace.as_deref());

        let nodes: Api<Node> = Api::all(self.client.clone());
        let list = nodes.list(&ListParams::default()).await.context("listing nodes")?;
        status.nodes = node_inventory(&list.items);
        debug!(platform = %status.platform_type, masters = status.nodes.masters.len(), workers = status.nodes.workers.len(), "infra status");
        Ok(status)
    }

    async fn probe_mtu(&self, infra: &InfraStatus) -> Result<u32> {
        self.prober.probe(infra).await
    }

    async fn bootstrap(&self, spec: &DesiredSpec, infra: &InfraStatus) -> Result<InfraStatus> {
        if infra.is_hosted() && self.options.hosted_namespace.is_none() {
            warn!("hosted control plane without a hosted namespace; hosted objects are not scoped");
        }
        debug!(network_type = %spec.network_type(), platform = %infra.platform_type, "bootstrap");
        Ok(infra.clone())
    }
}

/// Runs a host-network Job that measures the node MTU and reports it into the `mtu` ConfigMap.
pub struct MtuProber {
    client: Client,
    image: String,
    timeout: Duration,
    poll: Duration,
}

impl MtuProber {
    pub fn new(client: Client, options: &BootstrapOptions) -> Self {
        Self { client, image: options.probe_image.clone(), timeout: options.probe_timeout, poll: options.probe_poll }
    }

    pub async fn probe(&self, infra: &InfraStatus) -> Result<u32> {
        if infra.is_hosted() {
            return Err(anyhow!("cannot probe MTU on a hosted control plane"));
        }
        let jobs: Api<Job> = Api::namespaced(self.client.clone(), APPLIED_NAMESPACE);
        let job: Job = serde_json::from_value(probe_job(&self.image))?;
        match jobs.create(&PostParams::default(), &job).await {
            Ok(_) => info!("started MTU probe"),
            Err(e) if is_conflict(&e) => debug!("MTU probe already running"),
            Err(e) => return Err(e).context("creating MTU probe job"),
        }

        let configmaps: Api<ConfigMap> = Api::namespaced(self.client.clone(), APPLIED_NAMESPACE);
        let waited = tokio::time::timeout(self.timeout, async {
            loop {
                if let Some(cm) = configmaps.get_opt(MTU_CM_NAME).await? {
                    if let Some(mtu) = parse_mtu_record(&cm)? {
                        return Ok::<u32, anyhow::Error>(mtu);
                    }
                }
                tokio::time::sleep(self.poll).await;
            }
        })
        .await;

        if let Err(e) = jobs.delete(PROBE_JOB_NAME, &DeleteParams::background()).await {
            warn!(error = %e, "failed to delete MTU probe job");
        }
        let mtu = waited.map_err(|_| anyhow!("MTU probe did not report within {:?}", self.timeout))??;
        info!(mtu, "probed host MTU");
        Ok(mtu)
    }
}

fn probe_job(image: &str) -> Json {
    json!({
        "apiVersion": "batch/v1",
        "kind": "Job",
        "metadata": { "name": PROBE_JOB_NAME, "namespace": APPLIED_NAMESPACE },
        "spec": {
            "backoffLimit": 3,
            "ttlSecondsAfterFinished": 600,
            "template": {
                "spec": {
                    "restartPolicy": "Never",
                    "hostNetwork": true,
                    "nodeSelector": { "node-role.kubernetes.io/master": "" },
                    "tolerations": [{ "operator": "Exists" }],
                    "containers": [{
                        "name": "prober",
                        "image": image,
                        "command": ["/usr/bin/cluster-network-operator", "mtu-prober", "--namespace", APPLIED_NAMESPACE, "--configmap", MTU_CM_NAME, "--key", MTU_CM_KEY]
                    }]
                }
            }
        }
    })
}
