//! In-memory cluster implementing every collaborator trait, for engine tests.

#![allow(dead_code)]

use std::collections::{BTreeMap, BTreeSet};
use std::sync::atomic::{AtomicU64, AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};

use serde_json::{json, Value as Json};

use netop_core::snapshot::{decode_record_json, record_name};
use netop_core::{
    AppliedSnapshot, ApplyError, Applier, Bootstrapper, ClusterNetworkConfig, ClusterNetworkEntry, ClusterNetworkStatus, ConfigSource,
    DesiredConfig, DesiredSpec, FeatureGates, Gvk, HostedControlPlane, InfraStatus, MigrationFeature, Migrator, NetworkType, NodeInventory,
    OperatorStatus, RenderOutput, RenderRequest, RenderedObject, Renderer, RestMapper, SourceError, StatusWriter,
};
use netop_reconcile::{Collaborators, Engine, EngineConfig, StatusManager};

pub const PROBED_MTU: u32 = 9000;

pub struct FakeCluster {
    pub desired: Mutex<Option<DesiredConfig>>,
    pub cluster: Mutex<ClusterNetworkConfig>,
    pub objects: Mutex<BTreeMap<String, Json>>,
    pub mtu_record: Mutex<Option<u32>>,
    pub hosted: bool,
    pub rendered: Mutex<Vec<Json>>,
    pub progressing: bool,
    /// `namespace/name` of every apply attempt, in order.
    pub attempts: Mutex<Vec<String>>,
    /// Object name -> error returned on every apply.
    pub failing: Mutex<BTreeMap<String, ApplyError>>,
    /// Object names that conflict once, then succeed.
    pub conflict_once: Mutex<BTreeSet<String>>,
    pub diffs: AtomicUsize,
    pub probes: AtomicUsize,
    pub desired_updates: AtomicUsize,
    pub migrations: Mutex<Vec<MigrationFeature>>,
    pub fail_migration: Option<MigrationFeature>,
    pub status_writes: Mutex<Vec<OperatorStatus>>,
    pub cluster_status: Mutex<Option<ClusterNetworkStatus>>,
    pub rv: AtomicU64,
}

impl Default for FakeCluster {
    fn default() -> Self {
        Self {
            desired: Mutex::new(Some(DesiredConfig {
                name: "cluster".into(),
                uid: Some("8d1f6a0e-0000-4000-8000-000000000001".into()),
                resource_version: Some("1".into()),
                spec: DesiredSpec::default(),
            })),
            cluster: Mutex::new(ClusterNetworkConfig {
                cluster_network: vec![ClusterNetworkEntry { cidr: "10.128.0.0/14".into(), host_prefix: 23 }],
                service_network: vec!["172.30.0.0/16".into()],
                network_type: Some("OVNKubernetes".into()),
                network_diagnostics: None,
            }),
            objects: Mutex::new(BTreeMap::new()),
            mtu_record: Mutex::new(None),
            hosted: false,
            rendered: Mutex::new(default_manifests()),
            progressing: false,
            attempts: Mutex::new(Vec::new()),
            failing: Mutex::new(BTreeMap::new()),
            conflict_once: Mutex::new(BTreeSet::new()),
            diffs: AtomicUsize::new(0),
            probes: AtomicUsize::new(0),
            desired_updates: AtomicUsize::new(0),
            migrations: Mutex::new(Vec::new()),
            fail_migration: None,
            status_writes: Mutex::new(Vec::new()),
            cluster_status: Mutex::new(None),
            rv: AtomicU64::new(100),
        }
    }
}

pub fn default_manifests() -> Vec<Json> {
    vec![
        json!({ "apiVersion": "v1", "kind": "Namespace", "metadata": { "name": "openshift-ovn-kubernetes" } }),
        json!({ "apiVersion": "v1", "kind": "ConfigMap",
                "metadata": { "name": "ovnkube-config", "namespace": "openshift-ovn-kubernetes" },
                "data": { "ovnkube.conf": "[default]\nmtu=8900\n" } }),
        json!({ "apiVersion": "apps/v1", "kind": "DaemonSet",
                "metadata": { "name": "ovnkube-node", "namespace": "openshift-ovn-kubernetes" },
                "spec": { "template": { "spec": { "hostNetwork": true } } } }),
    ]
}

pub fn configmap(name: &str) -> Json {
    json!({ "apiVersion": "v1", "kind": "ConfigMap", "metadata": { "name": name, "namespace": "openshift-ovn-kubernetes" }, "data": {} })
}

impl FakeCluster {
    pub fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }

    pub fn hosted() -> Arc<Self> {
        Arc::new(Self { hosted: true, ..Self::default() })
    }

    pub fn engine(self: &Arc<Self>) -> Engine {
        let deps = Collaborators {
            source: self.clone(),
            mapper: self.clone(),
            bootstrapper: self.clone(),
            renderer: self.clone(),
            applier: self.clone(),
            migrator: self.clone(),
        };
        Engine::new(EngineConfig::default(), deps, Arc::new(StatusManager::new(self.clone())), FeatureGates::default())
    }

    /// Edit the live desired spec the way an administrator would.
    pub fn edit_spec(&self, f: impl FnOnce(&mut DesiredSpec)) {
        let mut guard = self.desired.lock().unwrap();
        let cfg = guard.as_mut().expect("desired config exists");
        f(&mut cfg.spec);
        cfg.resource_version = Some(self.next_rv());
    }

    pub fn applied_spec(&self) -> Option<DesiredSpec> {
        let objects = self.objects.lock().unwrap();
        let record = objects.get(&object_key("v1", "ConfigMap", "openshift-network-operator", &record_name("cluster")))?;
        decode_record_json(record).unwrap().map(|s| s.spec)
    }

    pub fn take_attempts(&self) -> Vec<String> {
        std::mem::take(&mut *self.attempts.lock().unwrap())
    }

    pub fn reset_diffs(&self) -> usize {
        self.diffs.swap(0, Ordering::SeqCst)
    }

    fn next_rv(&self) -> String {
        self.rv.fetch_add(1, Ordering::SeqCst).to_string()
    }
}

fn object_key(api_version: &str, kind: &str, ns: &str, name: &str) -> String {
    format!("{api_version}/{kind}/{ns}/{name}")
}

#[async_trait::async_trait]
impl ConfigSource for FakeCluster {
    async fn desired_config(&self, name: &str) -> Result<DesiredConfig, SourceError> {
        match &*self.desired.lock().unwrap() {
            Some(cfg) if cfg.name == name => Ok(cfg.clone()),
            _ => Err(SourceError::NotFound(format!("networks.operator.openshift.io {name}"))),
        }
    }

    async fn cluster_config(&self) -> Result<ClusterNetworkConfig, SourceError> {
        Ok(self.cluster.lock().unwrap().clone())
    }

    async fn applied_snapshot(&self, name: &str) -> Result<Option<AppliedSnapshot>, SourceError> {
        let objects = self.objects.lock().unwrap();
        match objects.get(&object_key("v1", "ConfigMap", "openshift-network-operator", &record_name(name))) {
            Some(record) => decode_record_json(record).map_err(|e| SourceError::Other(e.to_string())),
            None => Ok(None),
        }
    }

    async fn mtu_record(&self) -> Result<Option<u32>, SourceError> {
        Ok(*self.mtu_record.lock().unwrap())
    }

    async fn update_desired_config(&self, config: &DesiredConfig) -> Result<DesiredConfig, SourceError> {
        let mut guard = self.desired.lock().unwrap();
        let current = guard.as_mut().ok_or_else(|| SourceError::NotFound(config.name.clone()))?;
        if current.resource_version != config.resource_version {
            return Err(SourceError::Conflict("the object has been modified".into()));
        }
        *current = DesiredConfig { resource_version: Some(self.next_rv()), ..config.clone() };
        self.desired_updates.fetch_add(1, Ordering::SeqCst);
        Ok(current.clone())
    }

    async fn publish_cluster_status(&self, status: &ClusterNetworkStatus) -> Result<(), SourceError> {
        *self.cluster_status.lock().unwrap() = Some(status.clone());
        Ok(())
    }
}

#[async_trait::async_trait]
impl RestMapper for FakeCluster {
    async fn resource_for(&self, gvk: &Gvk) -> anyhow::Result<String> {
        Ok(format!("{}s", gvk.kind.to_lowercase()))
    }
}

#[async_trait::async_trait]
impl Bootstrapper for FakeCluster {
    async fn infra_status(&self) -> anyhow::Result<InfraStatus> {
        Ok(InfraStatus {
            platform_type: "None".into(),
            platform_region: None,
            infra_name: "test-x7k2p".into(),
            hosted_control_plane: self
                .hosted
                .then(|| HostedControlPlane { namespace: "clusters-test".into(), cluster_name: "test".into() }),
            nodes: NodeInventory { masters: vec!["master-0".into()], workers: vec!["worker-0".into()] },
        })
    }

    async fn probe_mtu(&self, _infra: &InfraStatus) -> anyhow::Result<u32> {
        self.probes.fetch_add(1, Ordering::SeqCst);
        *self.mtu_record.lock().unwrap() = Some(PROBED_MTU);
        Ok(PROBED_MTU)
    }

    async fn bootstrap(&self, _spec: &DesiredSpec, infra: &InfraStatus) -> anyhow::Result<InfraStatus> {
        Ok(infra.clone())
    }
}

#[async_trait::async_trait]
impl Renderer for FakeCluster {
    async fn render(&self, _request: RenderRequest<'_>) -> anyhow::Result<RenderOutput> {
        let objects = self.rendered.lock().unwrap().iter().cloned().map(RenderedObject::from_json).collect::<Result<Vec<_>, _>>()?;
        Ok(RenderOutput { objects, progressing: self.progressing })
    }
}

#[async_trait::async_trait]
impl Applier for FakeCluster {
    async fn apply(&self, object: &RenderedObject, _field_manager: &str) -> Result<(), ApplyError> {
        let ns = object.namespace().unwrap_or_default().to_string();
        let name = object.name().to_string();
        self.attempts.lock().unwrap().push(format!("{ns}/{name}"));

        if self.conflict_once.lock().unwrap().remove(&name) {
            return Err(ApplyError::Conflict("the object has been modified; please apply your changes to the latest version".into()));
        }
        if let Some(err) = self.failing.lock().unwrap().get(&name) {
            return Err(err.clone());
        }

        let gvk = object.gvk();
        let mut incoming = object.to_json().map_err(|e| ApplyError::Other(e.to_string()))?;
        let expected_rv = incoming["metadata"].as_object_mut().and_then(|m| m.remove("resourceVersion"));
        let key = object_key(&gvk.api_version(), &gvk.kind, &ns, &name);

        let mut objects = self.objects.lock().unwrap();
        if let Some(stored) = objects.get(&key) {
            let mut current = stored.clone();
            let stored_rv = current["metadata"].as_object_mut().and_then(|m| m.remove("resourceVersion"));
            if expected_rv.is_some() && expected_rv != stored_rv {
                return Err(ApplyError::Conflict(format!("{key}: resourceVersion mismatch")));
            }
            if current == incoming {
                return Ok(());
            }
        }
        incoming["metadata"]["resourceVersion"] = Json::String(self.next_rv());
        objects.insert(key, incoming);
        self.diffs.fetch_add(1, Ordering::SeqCst);
        Ok(())
    }
}

#[async_trait::async_trait]
impl Migrator for FakeCluster {
    async fn migrate(&self, feature: MigrationFeature, _target: &NetworkType) -> anyhow::Result<()> {
        self.migrations.lock().unwrap().push(feature);
        if self.fail_migration == Some(feature) {
            anyhow::bail!("failed converting {feature} resources");
        }
        Ok(())
    }
}

#[async_trait::async_trait]
impl StatusWriter for FakeCluster {
    async fn write_status(&self, status: &OperatorStatus) -> anyhow::Result<()> {
        self.status_writes.lock().unwrap().push(status.clone());
        Ok(())
    }
}
