//! Status writer for the `network` ClusterOperator.
//!
//! The aggregate Degraded/Progressing/Available conditions are derived from the per-component
//! conditions; the full component document rides along in `status.extension` so a restarted
//! operator resumes with its prior transition times.

use anyhow::{Context, Result};
use chrono::{DateTime, Utc};
use kube::{
    api::{Api, Patch, PatchParams, PostParams},
    core::DynamicObject,
    Client,
};
use serde_json::{json, Value as Json};
use tracing::debug;

use netop_core::{ComponentConditions, Condition, OperatorStatus, StatusWriter};

use crate::resources::CLUSTER_OPERATOR;

pub const CLUSTER_OPERATOR_NAME: &str = "network";

pub struct ClusterOperatorWriter {
    client: Client,
    name: String,
}

impl ClusterOperatorWriter {
    pub fn new(client: Client) -> Self {
        Self { client, name: CLUSTER_OPERATOR_NAME.to_string() }
    }

    fn api(&self) -> Api<DynamicObject> {
        Api::all_with(self.client.clone(), &*CLUSTER_OPERATOR)
    }

    /// Component conditions persisted by a previous run, if any.
    pub async fn load(&self) -> Result<Option<OperatorStatus>> {
        let Some(obj) = self.api().get_opt(&self.name).await.context("reading clusteroperator")? else {
            return Ok(None);
        };
        Ok(prior_status(&obj.data))
    }

    async fn ensure_exists(&self) -> Result<()> {
        if self.api().get_opt(&self.name).await?.is_some() {
            return Ok(());
        }
        let obj = DynamicObject::new(&self.name, &CLUSTER_OPERATOR).data(json!({ "spec": {} }));
        match self.api().create(&PostParams::default(), &obj).await {
            Ok(_) => Ok(()),
            Err(kube::Error::Api(resp)) if resp.code == 409 => Ok(()),
            Err(e) => Err(e).context("creating clusteroperator"),
        }
    }
}

fn prior_status(data: &Json) -> Option<OperatorStatus> {
    let ext = data.get("status")?.get("extension")?;
    serde_json::from_value(ext.clone()).ok()
}

/// One aggregate condition over every component's `pick`ed condition.
fn aggregate(kind: &str, status: &OperatorStatus, pick: fn(&ComponentConditions) -> Option<&Condition>, now: DateTime<Utc>) -> Json {
    let active: Vec<(&str, &Condition)> =
        status.conditions.iter().filter_map(|(k, c)| pick(c).filter(|c| c.active).map(|c| (k.as_str(), c))).collect();
    let latest = status.conditions.values().filter_map(pick).map(|c| c.last_transition_time).max().unwrap_or(now);
    match active.first() {
        Some((_, first)) => json!({
            "type": kind,
            "status": "True",
            "reason": first.reason,
            "message": active.iter().map(|(k, c)| format!("{k}: {}", c.message)).collect::<Vec<_>>().join("\n"),
            "lastTransitionTime": latest.to_rfc3339(),
        }),
        None => json!({ "type": kind, "status": "False", "lastTransitionTime": latest.to_rfc3339() }),
    }
}

/// ClusterOperator status body for `status`.
pub fn cluster_operator_status(status: &OperatorStatus, now: DateTime<Utc>) -> Result<Json> {
    let degraded = aggregate("Degraded", status, |c| c.degraded.as_ref(), now);
    let progressing = aggregate("Progressing", status, |c| c.progressing.as_ref(), now);
    let available = json!({ "type": "Available", "status": "True", "lastTransitionTime": now.to_rfc3339() });
    let related: Vec<Json> = status
        .related_objects
        .iter()
        .chain(status.related_cluster_objects.iter().map(|r| &r.reference))
        .map(|r| json!({ "group": r.group, "resource": r.resource, "name": r.name, "namespace": r.namespace }))
        .collect();
    Ok(json!({
        "status": {
            "conditions": [degraded, progressing, available],
            "relatedObjects": related,
            "extension": serde_json::to_value(status)?,
        }
    }))
}

#[async_trait::async_trait]
impl StatusWriter for ClusterOperatorWriter {
    async fn write_status(&self, status: &OperatorStatus) -> Result<()> {
        self.ensure_exists().await?;
        let body = cluster_operator_status(status, Utc::now())?;
        self.api()
            .patch_status(&self.name, &PatchParams::default(), &Patch::Merge(&body))
            .await
            .context("patching clusteroperator status")?;
        debug!(degraded = status.is_degraded(), progressing = status.is_progressing(), "status written");
        Ok(())
    }
}
