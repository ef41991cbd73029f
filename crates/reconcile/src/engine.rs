//! The reconciliation engine: one cycle from fetch to publish for the singleton config.

use std::sync::Arc;
use std::time::{Duration, Instant};

use k8s_openapi::apimachinery::pkg::apis::meta::v1::OwnerReference;
use tracing::{debug, info, info_span, warn, Instrument};
use uuid::Uuid;

use netop_core::names::OPERATOR_GROUP;
use netop_core::snapshot::record_object;
use netop_core::{
    ApplyError, Applier, Bootstrapper, ClusterNetworkConfig, ClusterNetworkStatus, ConfigSource, DesiredConfig, DesiredSpec, FeatureGates,
    Migrator, ReconcileKey, RenderRequest, RenderedObject, Renderer, RestMapper, SourceError, StatusKey,
};

use crate::config::EngineConfig;
use crate::error::ReconcileError;
use crate::merge::{merge, upconvert, MergeInputs};
use crate::migrate::MigrationTask;
use crate::postprocess::post_process;
use crate::probe::needs_mtu_probe;
use crate::safety::check_change;
use crate::status::StatusManager;
use crate::validate::validate;

/// Everything the engine talks to.
#[derive(Clone)]
pub struct Collaborators {
    pub source: Arc<dyn ConfigSource>,
    pub mapper: Arc<dyn RestMapper>,
    pub bootstrapper: Arc<dyn Bootstrapper>,
    pub renderer: Arc<dyn Renderer>,
    pub applier: Arc<dyn Applier>,
    pub migrator: Arc<dyn Migrator>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Outcome {
    ResyncAfter(Duration),
    NoRequeue,
}

enum CycleEnd {
    Converged,
    Unmanaged,
    Missing,
}

pub struct Engine {
    config: EngineConfig,
    deps: Collaborators,
    status: Arc<StatusManager>,
    feature_gates: FeatureGates,
}

impl Engine {
    pub fn new(config: EngineConfig, deps: Collaborators, status: Arc<StatusManager>, feature_gates: FeatureGates) -> Self {
        Self { config, deps, status, feature_gates }
    }

    pub fn config(&self) -> &EngineConfig {
        &self.config
    }

    pub fn status(&self) -> &Arc<StatusManager> {
        &self.status
    }

    /// Run one cycle for `key`. Keys other than the singleton are accepted and ignored.
    pub async fn reconcile(&self, key: &ReconcileKey) -> Result<Outcome, ReconcileError> {
        if key.name() != self.config.operator_config_name {
            debug!(key = %key, "ignoring operator config with unexpected name");
            return Ok(Outcome::NoRequeue);
        }
        let span = info_span!("reconcile", key = %key, cycle = %Uuid::new_v4());
        self.reconcile_traced().instrument(span).await
    }

    async fn reconcile_traced(&self) -> Result<Outcome, ReconcileError> {
        let started = Instant::now();
        metrics::counter!("reconcile_cycles_total", 1u64);
        info!("reconciling operator configuration");

        let result = match self.run_cycle().await {
            Ok(CycleEnd::Unmanaged) => Ok(Outcome::NoRequeue),
            Ok(end) => match self.status.publish().await {
                Ok(()) if matches!(end, CycleEnd::Missing) => Ok(Outcome::NoRequeue),
                Ok(()) => Ok(Outcome::ResyncAfter(self.config.resync_period)),
                Err(e) => Err(ReconcileError::Status(format!("{e:#}"))),
            },
            Err(e) => Err(e),
        };
        metrics::histogram!("reconcile_cycle_ms", started.elapsed().as_secs_f64() * 1000.0);

        match result {
            Ok(outcome) => {
                info!(?outcome, "reconcile cycle complete");
                Ok(outcome)
            }
            Err(e) => {
                metrics::counter!("reconcile_errors_total", 1u64, "reason" => e.reason().unwrap_or("Conflict"));
                match e.reason() {
                    Some(reason) => {
                        warn!(reason, error = %e, "reconcile cycle failed");
                        self.status.set_degraded(StatusKey::OperatorConfig, reason, e.degraded_message());
                    }
                    None => info!(error = %e, "transient conflict; retrying"),
                }
                if let Err(pe) = self.status.publish().await {
                    warn!(error = %pe, "failed to publish status");
                }
                Err(e)
            }
        }
    }

    async fn run_cycle(&self) -> Result<CycleEnd, ReconcileError> {
        let name = self.config.operator_config_name.as_str();
        let source = &self.deps.source;

        let desired = match source.desired_config(name).await {
            Ok(d) => d,
            Err(e) if e.is_not_found() => {
                info!("operator configuration not found; nothing to reconcile");
                self.status.set_degraded(StatusKey::OperatorConfig, "NoOperatorConfig", format!("Operator configuration {name} was deleted"));
                return Ok(CycleEnd::Missing);
            }
            Err(e) => return Err(from_source("reading operator config", ReconcileError::Fetch)(e)),
        };
        if desired.spec.is_unmanaged() {
            info!("operator configuration is unmanaged; leaving cluster untouched");
            return Ok(CycleEnd::Unmanaged);
        }

        let cluster = source.cluster_config().await.map_err(from_source("reading cluster config", ReconcileError::Merge))?;
        let snapshot = source.applied_snapshot(name).await.map_err(from_source("reading applied config", ReconcileError::Fetch))?;
        let mtu_record = source.mtu_record().await.map_err(from_source("reading MTU record", ReconcileError::Fetch))?;
        let prev = snapshot.as_ref().map(|s| &s.spec);

        let mut merged = self.merge_and_check(&desired.spec, &cluster, prev, mtu_record)?;

        let infra = self.deps.bootstrapper.infra_status().await.map_err(|e| ReconcileError::Bootstrap(format!("{e:#}")))?;
        if needs_mtu_probe(prev, &merged, mtu_record, &infra) {
            let probed = self.deps.bootstrapper.probe_mtu(&infra).await.map_err(|e| ReconcileError::Probe(format!("{e:#}")))?;
            metrics::counter!("mtu_probe_total", 1u64);
            info!(mtu = probed, "probed host MTU");
            merged = self.merge_and_check(&desired.spec, &cluster, prev, Some(probed))?;
        }

        let infra = self
            .deps
            .bootstrapper
            .bootstrap(&merged, &infra)
            .await
            .map_err(|e| ReconcileError::Bootstrap(format!("{e:#}")))?;

        let desired = self.write_back(desired, &merged).await?;
        if let Some(mode) = merged.ipsec_mode() {
            metrics::gauge!("ipsec_mode", 1.0, "mode" => mode.to_string());
        }

        let rendered = self
            .deps
            .renderer
            .render(RenderRequest {
                spec: &merged,
                cluster_config: &cluster,
                manifest_root: &self.config.manifest_root,
                feature_gates: &self.feature_gates,
                infra: &infra,
            })
            .await
            .map_err(|e| ReconcileError::Render(format!("{e:#}")))?;
        if rendered.progressing {
            self.status.set_progressing(StatusKey::OperatorRender, "RenderProgressing", "Waiting to render manifests");
        } else {
            self.status.unset_progressing(StatusKey::OperatorRender);
        }

        let record = record_object(name, &merged, snapshot.as_ref().and_then(|s| s.resource_version.as_deref()))
            .map_err(|e| ReconcileError::Internal(format!("failed to build applied config record: {e}")))?;
        let mut objects = Vec::with_capacity(rendered.objects.len() + 1);
        objects.push(record);
        objects.extend(rendered.objects);

        let processed = post_process(objects, &owner_reference(&desired), &infra, self.deps.mapper.as_ref()).await?;
        self.status.set_related_objects(processed.related);
        self.status.set_related_cluster_objects(processed.related_cluster);
        self.status
            .set_machine_configs(processed.machine_configs.iter().map(|mc| mc.name.clone()).collect())
            .await
            .map_err(|e| ReconcileError::MachineConfig(format!("{e:#}")))?;

        self.apply_all(&processed.objects).await?;

        if let Some(task) = MigrationTask::from_spec(&merged) {
            task.run(self.deps.migrator.as_ref()).await?;
        }

        source
            .publish_cluster_status(&ClusterNetworkStatus::from_spec(&merged))
            .await
            .map_err(from_source("publishing cluster network status", ReconcileError::Status))?;

        self.status.set_not_degraded(StatusKey::OperatorConfig);
        Ok(CycleEnd::Converged)
    }

    /// Merge, validate and gate. The gate compares against the applied spec brought up to
    /// the same defaulting rules.
    fn merge_and_check(
        &self,
        live: &DesiredSpec,
        cluster: &ClusterNetworkConfig,
        prev: Option<&DesiredSpec>,
        host_mtu: Option<u32>,
    ) -> Result<DesiredSpec, ReconcileError> {
        let merged = merge(&MergeInputs { live, cluster, applied: prev, host_mtu });
        validate(&merged).map_err(|e| ReconcileError::InvalidConfig(e.to_string()))?;
        let prev = prev.map(|p| upconvert(p, host_mtu));
        check_change(prev.as_ref(), &merged).map_err(|e| ReconcileError::UnsafeChange(e.to_string()))?;
        Ok(merged)
    }

    async fn write_back(&self, desired: DesiredConfig, merged: &DesiredSpec) -> Result<DesiredConfig, ReconcileError> {
        if desired.spec == *merged {
            return Ok(desired);
        }
        info!("updating operator configuration with defaulted values");
        let updated = DesiredConfig { spec: merged.clone(), ..desired };
        self.deps
            .source
            .update_desired_config(&updated)
            .await
            .map_err(from_source("updating operator config", ReconcileError::UpdateConfig))
    }

    /// Apply every object in order, continuing past failures.
    async fn apply_all(&self, objects: &[RenderedObject]) -> Result<(), ReconcileError> {
        let mut last_failure = None;
        let mut conflict = None;
        for obj in objects {
            let gvk = obj.gvk();
            let (ns, name) = (obj.namespace().unwrap_or_default(), obj.name());
            match self.deps.applier.apply(obj, &self.config.field_manager).await {
                Ok(()) => {
                    metrics::counter!("apply_ok", 1u64);
                    debug!(gvk = %gvk, ns, name, "applied");
                }
                Err(ApplyError::Conflict(msg)) => {
                    metrics::counter!("apply_conflict", 1u64);
                    info!(gvk = %gvk, ns, name, error = %msg, "conflict applying object");
                    conflict = Some(format!("({gvk}) {ns}/{name}: {msg}"));
                }
                Err(ApplyError::Other(msg)) => {
                    metrics::counter!("apply_err", 1u64);
                    let mut message = format!("could not apply ({gvk}) {ns}/{name}: {msg}");
                    if gvk.kind == "NetworkAttachmentDefinition" && msg.contains("namespaces") {
                        message.push_str(": could not find the namespace of the additional network, make sure it exists");
                    }
                    warn!(gvk = %gvk, ns, name, error = %message, "failed to apply object");
                    if obj.ignores_errors() {
                        info!(gvk = %gvk, ns, name, "object is marked ignore-errors; continuing");
                        continue;
                    }
                    last_failure = Some(message);
                }
            }
        }
        if let Some(message) = last_failure {
            return Err(ReconcileError::Apply(message));
        }
        match conflict {
            Some(message) => Err(ReconcileError::Conflict { stage: "applying objects", message }),
            None => Ok(()),
        }
    }
}

fn owner_reference(desired: &DesiredConfig) -> OwnerReference {
    OwnerReference {
        api_version: format!("{OPERATOR_GROUP}/v1"),
        kind: "Network".into(),
        name: desired.name.clone(),
        uid: desired.uid.clone().unwrap_or_default(),
        ..Default::default()
    }
}

/// Map a source error: conflicts stay transient, everything else gets `wrap`ped.
fn from_source(stage: &'static str, wrap: fn(String) -> ReconcileError) -> impl Fn(SourceError) -> ReconcileError {
    move |e| {
        if e.is_conflict() {
            ReconcileError::Conflict { stage, message: e.to_string() }
        } else {
            wrap(format!("{stage}: {e}"))
        }
    }
}
