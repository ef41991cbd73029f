//! Server-side apply of rendered objects, conflict classification and diff summaries.

#![forbid(unsafe_code)]

pub mod discovery;

use std::sync::Arc;
use std::time::Instant;

use kube::{
    api::{Api, Patch, PatchParams},
    core::DynamicObject,
    Client,
};
use metrics::histogram;
use serde::{Deserialize, Serialize};
use serde_json::Value as Json;
use tracing::{debug, Level};

use netop_core::{ApplyError, Applier, RenderedObject};

pub use discovery::{Resolved, ResourceCache};

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct DiffSummary {
    pub adds: usize,
    pub updates: usize,
    pub removes: usize,
}

impl DiffSummary {
    pub fn is_empty(&self) -> bool {
        self.adds == 0 && self.updates == 0 && self.removes == 0
    }
}

/// Applies objects with server-side apply, forcing ownership of the fields we set.
pub struct KubeApplier {
    client: Client,
    resources: Arc<ResourceCache>,
}

impl KubeApplier {
    pub fn new(client: Client, resources: Arc<ResourceCache>) -> Self {
        Self { client, resources }
    }

    async fn api_for(&self, object: &RenderedObject) -> Result<Api<DynamicObject>, ApplyError> {
        let gvk = object.gvk();
        let resolved = self.resources.resolve(&gvk).await.map_err(|e| ApplyError::Other(format!("{e:#}")))?;
        if !resolved.namespaced {
            return Ok(Api::all_with(self.client.clone(), &resolved.resource));
        }
        match object.namespace() {
            Some(ns) => Ok(Api::namespaced_with(self.client.clone(), ns, &resolved.resource)),
            None => Err(ApplyError::Other(format!("namespace required for namespaced kind {gvk}"))),
        }
    }
}

#[async_trait::async_trait]
impl Applier for KubeApplier {
    async fn apply(&self, object: &RenderedObject, field_manager: &str) -> Result<(), ApplyError> {
        let t0 = Instant::now();
        let api = self.api_for(object).await?;
        let name = object.name();
        let target = object.to_json().map_err(|e| ApplyError::Other(e.to_string()))?;

        if tracing::enabled!(Level::DEBUG) {
            if let Ok(Some(live)) = api.get_opt(name).await {
                let live = serde_json::to_value(&live).map(strip_noisy).unwrap_or(Json::Null);
                let summary = diff_summary(&strip_noisy(target.clone()), &live);
                debug!(gvk = %object.gvk(), name, adds = summary.adds, updates = summary.updates, removes = summary.removes, "diff vs live");
            }
        }

        let pp = PatchParams::apply(field_manager).force();
        let res = api.patch(name, &pp, &Patch::Apply(&target)).await;
        histogram!("apply_latency_ms", t0.elapsed().as_secs_f64() * 1000.0);
        res.map(|_| ()).map_err(classify)
    }
}

/// A 409 from the API server is an optimistic-concurrency conflict; anything else is a failure.
pub fn classify(e: kube::Error) -> ApplyError {
    match e {
        kube::Error::Api(resp) if resp.code == 409 => ApplyError::Conflict(resp.message),
        other => ApplyError::Other(other.to_string()),
    }
}

/// Drop server-populated fields that never take part in a comparison.
pub fn strip_noisy(mut v: Json) -> Json {
    if let Some(meta) = v.get_mut("metadata").and_then(Json::as_object_mut) {
        for k in ["managedFields", "resourceVersion", "generation", "creationTimestamp", "uid"] {
            meta.remove(k);
        }
    }
    if let Some(obj) = v.as_object_mut() {
        obj.remove("status");
    }
    v
}

/// Count added, updated and removed leaves of `target` relative to `base`.
pub fn diff_summary(target: &Json, base: &Json) -> DiffSummary {
    fn walk(a: &Json, b: &Json, out: &mut DiffSummary) {
        match (a, b) {
            (Json::Object(ao), Json::Object(bo)) => {
                for (k, av) in ao {
                    match bo.get(k) {
                        Some(bv) if av == bv => {}
                        Some(bv) => walk(av, bv, out),
                        None => out.adds += 1,
                    }
                }
                out.removes += bo.keys().filter(|k| !ao.contains_key(*k)).count();
            }
            (Json::Array(aa), Json::Array(bb)) => {
                out.updates += aa.iter().zip(bb).filter(|(x, y)| x != y).count();
                out.adds += aa.len().saturating_sub(bb.len());
                out.removes += bb.len().saturating_sub(aa.len());
            }
            (av, bv) => {
                if av != bv {
                    out.updates += 1;
                }
            }
        }
    }
    let mut out = DiffSummary::default();
    walk(target, base, &mut out);
    out
}
