//! Seams between the reconciliation engine and the cluster.
//!
//! The engine only sees these traits; `netop-kubehub` and `netop-apply` implement them
//! against a live API server and tests implement them in memory.

use std::collections::BTreeSet;
use std::path::Path;

use anyhow::Result;

use crate::error::{ApplyError, SourceError};
use crate::infra::InfraStatus;
use crate::object::{Gvk, RenderedObject};
use crate::spec::{AppliedSnapshot, ClusterNetworkConfig, ClusterNetworkStatus, DesiredConfig, DesiredSpec, NetworkType};
use crate::status::OperatorStatus;

/// Reads and writes the configuration objects.
#[async_trait::async_trait]
pub trait ConfigSource: Send + Sync {
    async fn desired_config(&self, name: &str) -> Result<DesiredConfig, SourceError>;

    async fn cluster_config(&self) -> Result<ClusterNetworkConfig, SourceError>;

    /// Last applied spec for `name`; `None` before the first successful cycle.
    async fn applied_snapshot(&self, name: &str) -> Result<Option<AppliedSnapshot>, SourceError>;

    /// MTU reported by a previous probe, if any.
    async fn mtu_record(&self) -> Result<Option<u32>, SourceError>;

    /// Write back a changed spec under optimistic concurrency (`resource_version` must match).
    async fn update_desired_config(&self, config: &DesiredConfig) -> Result<DesiredConfig, SourceError>;

    async fn publish_cluster_status(&self, status: &ClusterNetworkStatus) -> Result<(), SourceError>;
}

/// Maps a kind to its REST resource name (e.g. `Deployment` -> `deployments`).
#[async_trait::async_trait]
pub trait RestMapper: Send + Sync {
    async fn resource_for(&self, gvk: &Gvk) -> Result<String>;
}

/// Gathers infrastructure facts and provisions platform prerequisites.
#[async_trait::async_trait]
pub trait Bootstrapper: Send + Sync {
    async fn infra_status(&self) -> Result<InfraStatus>;

    /// Run a one-shot probe measuring the host MTU. The probe leaves an MTU record behind.
    async fn probe_mtu(&self, infra: &InfraStatus) -> Result<u32>;

    /// Reconcile platform networking prerequisites; returns the infra facts render should use.
    async fn bootstrap(&self, spec: &DesiredSpec, infra: &InfraStatus) -> Result<InfraStatus>;
}

/// Feature gates enabled on the cluster.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct FeatureGates {
    enabled: BTreeSet<String>,
}

impl FeatureGates {
    pub fn new<I, S>(enabled: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        Self { enabled: enabled.into_iter().map(Into::into).collect() }
    }

    pub fn is_enabled(&self, gate: &str) -> bool {
        self.enabled.contains(gate)
    }

    pub fn iter(&self) -> impl Iterator<Item = &str> {
        self.enabled.iter().map(String::as_str)
    }
}

pub struct RenderRequest<'a> {
    pub spec: &'a DesiredSpec,
    pub cluster_config: &'a ClusterNetworkConfig,
    pub manifest_root: &'a Path,
    pub feature_gates: &'a FeatureGates,
    pub infra: &'a InfraStatus,
}

#[derive(Debug, Clone, Default)]
pub struct RenderOutput {
    /// Objects in apply order: dependencies before dependents.
    pub objects: Vec<RenderedObject>,
    /// Render could not produce everything yet and wants to be re-run.
    pub progressing: bool,
}

#[async_trait::async_trait]
pub trait Renderer: Send + Sync {
    async fn render(&self, request: RenderRequest<'_>) -> Result<RenderOutput>;
}

/// Creates or updates one object in the cluster.
#[async_trait::async_trait]
pub trait Applier: Send + Sync {
    async fn apply(&self, object: &RenderedObject, field_manager: &str) -> Result<(), ApplyError>;
}

/// Persists the operator status document.
#[async_trait::async_trait]
pub trait StatusWriter: Send + Sync {
    async fn write_status(&self, status: &OperatorStatus) -> Result<()>;
}

/// Feature whose custom resources are converted during a network-type migration.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum MigrationFeature {
    EgressFirewall,
    Multicast,
    EgressIp,
}

impl MigrationFeature {
    pub const ALL: [MigrationFeature; 3] = [MigrationFeature::EgressFirewall, MigrationFeature::Multicast, MigrationFeature::EgressIp];

    pub fn as_str(&self) -> &'static str {
        match self {
            MigrationFeature::EgressFirewall => "EgressFirewall",
            MigrationFeature::Multicast => "Multicast",
            MigrationFeature::EgressIp => "EgressIP",
        }
    }
}

impl std::fmt::Display for MigrationFeature {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Runs one feature's one-shot conversion toward `target`. Must be idempotent.
#[async_trait::async_trait]
pub trait Migrator: Send + Sync {
    async fn migrate(&self, feature: MigrationFeature, target: &NetworkType) -> Result<()>;
}
