//! Cached API discovery: GVK -> served resource.

use anyhow::{anyhow, Result};
use kube::{
    core::ApiResource,
    discovery::{Discovery, Scope},
    Client,
};
use rustc_hash::FxHashMap;
use tokio::sync::RwLock;
use tracing::debug;

use netop_core::{Gvk, RestMapper};

#[derive(Debug, Clone)]
pub struct Resolved {
    pub resource: ApiResource,
    pub namespaced: bool,
}

/// Discovery results, refreshed on a miss so newly installed CRDs are picked up.
pub struct ResourceCache {
    client: Client,
    entries: RwLock<FxHashMap<Gvk, Resolved>>,
}

impl ResourceCache {
    pub fn new(client: Client) -> Self {
        Self { client, entries: RwLock::new(FxHashMap::default()) }
    }

    pub async fn resolve(&self, gvk: &Gvk) -> Result<Resolved> {
        if let Some(hit) = self.entries.read().await.get(gvk) {
            return Ok(hit.clone());
        }
        self.refresh().await?;
        self.entries.read().await.get(gvk).cloned().ok_or_else(|| anyhow!("no matches for kind {gvk}"))
    }

    async fn refresh(&self) -> Result<()> {
        let discovery = Discovery::new(self.client.clone()).run().await?;
        let mut fresh = FxHashMap::default();
        for group in discovery.groups() {
            for version in group.versions() {
                for (ar, caps) in group.versioned_resources(version) {
                    let gvk = Gvk::new(&ar.group, &ar.version, &ar.kind);
                    fresh.insert(gvk, Resolved { resource: ar, namespaced: matches!(caps.scope, Scope::Namespaced) });
                }
            }
        }
        debug!(count = fresh.len(), "discovery refreshed");
        *self.entries.write().await = fresh;
        Ok(())
    }
}

#[async_trait::async_trait]
impl RestMapper for ResourceCache {
    async fn resource_for(&self, gvk: &Gvk) -> Result<String> {
        Ok(self.resolve(gvk).await?.resource.plural)
    }
}
