//! List+watch streams turned into [`TriggerEvent`]s.
//!
//! Watches carry no filtering policy beyond what needs memory of earlier events (spec
//! generation, node labels); reducing events to a reconcile key happens downstream.

use std::collections::BTreeMap;
use std::fmt::Debug;

use anyhow::Result;
use futures::StreamExt;
use k8s_openapi::api::core::v1::{ConfigMap, Node};
use kube::{
    api::Api,
    core::DynamicObject,
    runtime::watcher::{self, Event},
    runtime::WatchStreamExt,
    Client, Resource, ResourceExt,
};
use rustc_hash::FxHashMap;
use serde::de::DeserializeOwned;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};

use netop_core::names::APPLIED_NAMESPACE;
use netop_core::{NodeChange, TriggerEvent};

use crate::resources::{CONFIG_NETWORK, OPERATOR_NETWORK};

/// Remembers the last seen `metadata.generation` per object; status-only writes leave it unchanged.
#[derive(Debug, Default)]
pub struct GenerationCache {
    seen: FxHashMap<String, Option<i64>>,
}

impl GenerationCache {
    /// True when `name` is new or its generation moved.
    pub fn observe(&mut self, name: &str, generation: Option<i64>) -> bool {
        match self.seen.insert(name.to_string(), generation) {
            Some(prev) => prev != generation || generation.is_none(),
            None => true,
        }
    }

    pub fn forget(&mut self, name: &str) {
        self.seen.remove(name);
    }
}

#[derive(Debug, Default)]
pub struct NodeLabelCache {
    labels: FxHashMap<String, BTreeMap<String, String>>,
}

impl NodeLabelCache {
    pub fn observe(&mut self, name: &str, labels: &BTreeMap<String, String>) -> NodeChange {
        match self.labels.insert(name.to_string(), labels.clone()) {
            None => NodeChange::Created,
            Some(prev) if &prev != labels => NodeChange::LabelsChanged,
            Some(_) => NodeChange::Updated,
        }
    }

    pub fn forget(&mut self, name: &str) -> NodeChange {
        self.labels.remove(name);
        NodeChange::Deleted
    }
}

/// Drive one watch, mapping each object through `handle(obj, deleted)`. Stream errors are
/// logged and retried with backoff; returns once the receiver is gone.
async fn drive<K, F>(api: Api<K>, what: &'static str, tx: mpsc::Sender<TriggerEvent>, mut handle: F) -> Result<()>
where
    K: Resource + Clone + DeserializeOwned + Debug + Send + 'static,
    F: FnMut(&K, bool) -> Option<TriggerEvent> + Send,
{
    let stream = watcher::watcher(api, watcher::Config::default()).default_backoff();
    futures::pin_mut!(stream);
    info!(what, "watcher started");
    while let Some(ev) = stream.next().await {
        let (objs, deleted) = match ev {
            Ok(Event::Applied(o)) => (vec![o], false),
            Ok(Event::Deleted(o)) => (vec![o], true),
            Ok(Event::Restarted(list)) => {
                debug!(what, count = list.len(), "watch restart");
                (list, false)
            }
            Err(e) => {
                warn!(what, error = %e, "watch error");
                continue;
            }
        };
        for obj in &objs {
            let Some(event) = handle(obj, deleted) else { continue };
            metrics::counter!("trigger_events_total", 1u64, "source" => what);
            if tx.send(event).await.is_err() {
                debug!(what, "trigger receiver closed");
                return Ok(());
            }
        }
    }
    warn!(what, "watcher stream ended");
    Ok(())
}

/// Start every trigger watch. Each handle finishes when the receiver side is dropped.
pub fn spawn_watchers(client: Client, tx: mpsc::Sender<TriggerEvent>) -> Vec<JoinHandle<Result<()>>> {
    let desired: Api<DynamicObject> = Api::all_with(client.clone(), &*OPERATOR_NETWORK);
    let mut generations = GenerationCache::default();
    let desired_task = drive(desired, "networks.operator", tx.clone(), move |obj, deleted| {
        let name = obj.name_any();
        let spec_changed = if deleted {
            generations.forget(&name);
            true
        } else {
            generations.observe(&name, obj.metadata.generation)
        };
        Some(TriggerEvent::DesiredConfig { name, spec_changed })
    });

    let cluster: Api<DynamicObject> = Api::all_with(client.clone(), &*CONFIG_NETWORK);
    let cluster_task = drive(cluster, "networks.config", tx.clone(), |obj, _| Some(TriggerEvent::ClusterConfig { name: obj.name_any() }));

    let nodes: Api<Node> = Api::all(client.clone());
    let mut node_labels = NodeLabelCache::default();
    let nodes_task = drive(nodes, "nodes", tx.clone(), move |node, deleted| {
        let name = node.name_any();
        let change = if deleted { node_labels.forget(&name) } else { node_labels.observe(&name, node.labels()) };
        Some(TriggerEvent::Node { name, change })
    });

    let configmaps: Api<ConfigMap> = Api::namespaced(client, APPLIED_NAMESPACE);
    let configmaps_task = drive(configmaps, "configmaps", tx, |cm, _| {
        Some(TriggerEvent::ConfigMap { namespace: cm.namespace().unwrap_or_default(), name: cm.name_any() })
    });

    vec![tokio::spawn(desired_task), tokio::spawn(cluster_task), tokio::spawn(nodes_task), tokio::spawn(configmaps_task)]
}
