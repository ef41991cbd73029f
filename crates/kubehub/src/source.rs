//! Config source backed by the operator and cluster `Network` objects and the operator-namespace ConfigMaps.

use k8s_openapi::api::core::v1::ConfigMap;
use kube::{
    api::{Api, Patch, PatchParams, PostParams},
    core::DynamicObject,
    Client,
};
use serde_json::{json, Value as Json};
use tracing::debug;

use netop_core::names::{APPLIED_NAMESPACE, CLUSTER_CONFIG, MTU_CM_KEY, MTU_CM_NAME};
use netop_core::snapshot::{decode_record, record_name};
use netop_core::{AppliedSnapshot, ClusterNetworkConfig, ClusterNetworkStatus, ConfigSource, DesiredConfig, SourceError};

use crate::resources::{source_error, CONFIG_NETWORK, OPERATOR_NETWORK};

pub struct KubeConfigSource {
    client: Client,
}

impl KubeConfigSource {
    pub fn new(client: Client) -> Self {
        Self { client }
    }

    fn operator_api(&self) -> Api<DynamicObject> {
        Api::all_with(self.client.clone(), &*OPERATOR_NETWORK)
    }

    fn cluster_api(&self) -> Api<DynamicObject> {
        Api::all_with(self.client.clone(), &*CONFIG_NETWORK)
    }

    fn configmaps(&self) -> Api<ConfigMap> {
        Api::namespaced(self.client.clone(), APPLIED_NAMESPACE)
    }
}

/// Decode an operator `Network` object. A missing spec reads as the empty spec.
pub fn desired_from(obj: &DynamicObject) -> Result<DesiredConfig, SourceError> {
    let name = obj.metadata.name.clone().unwrap_or_default();
    let spec = match obj.data.get("spec") {
        Some(Json::Null) | None => Default::default(),
        Some(raw) => serde_json::from_value(raw.clone()).map_err(|e| SourceError::Other(format!("decoding networks/{name} spec: {e}")))?,
    };
    Ok(DesiredConfig { name, uid: obj.metadata.uid.clone(), resource_version: obj.metadata.resource_version.clone(), spec })
}

pub fn parse_mtu_record(cm: &ConfigMap) -> Result<Option<u32>, SourceError> {
    let Some(raw) = cm.data.as_ref().and_then(|d| d.get(MTU_CM_KEY)) else {
        return Ok(None);
    };
    raw.trim().parse::<u32>().map(Some).map_err(|e| SourceError::Other(format!("mtu record {raw:?}: {e}")))
}

/// Status body for the cluster `Network` object.
pub fn cluster_status_patch(status: &ClusterNetworkStatus) -> Json {
    let mut body = json!({
        "clusterNetwork": status.cluster_network,
        "serviceNetwork": status.service_network,
        "networkType": status.network_type,
    });
    if let Some(mtu) = status.cluster_network_mtu {
        body["clusterNetworkMTU"] = json!(mtu);
    }
    json!({ "status": body })
}

#[async_trait::async_trait]
impl ConfigSource for KubeConfigSource {
    async fn desired_config(&self, name: &str) -> Result<DesiredConfig, SourceError> {
        let obj = self.operator_api().get(name).await.map_err(|e| source_error(&format!("networks.operator/{name}"), e))?;
        desired_from(&obj)
    }

    async fn cluster_config(&self) -> Result<ClusterNetworkConfig, SourceError> {
        let obj = self.cluster_api().get(CLUSTER_CONFIG).await.map_err(|e| source_error("networks.config/cluster", e))?;
        match obj.data.get("spec") {
            Some(Json::Null) | None => Ok(ClusterNetworkConfig::default()),
            Some(raw) => serde_json::from_value(raw.clone()).map_err(|e| SourceError::Other(format!("decoding networks.config/cluster: {e}"))),
        }
    }

    async fn applied_snapshot(&self, name: &str) -> Result<Option<AppliedSnapshot>, SourceError> {
        let record = record_name(name);
        let Some(cm) = self.configmaps().get_opt(&record).await.map_err(|e| source_error(&record, e))? else {
            debug!(record, "no applied snapshot yet");
            return Ok(None);
        };
        let data = cm.data.unwrap_or_default();
        decode_record(&data, cm.metadata.resource_version).map_err(|e| SourceError::Other(format!("decoding {record}: {e}")))
    }

    async fn mtu_record(&self) -> Result<Option<u32>, SourceError> {
        match self.configmaps().get_opt(MTU_CM_NAME).await.map_err(|e| source_error(MTU_CM_NAME, e))? {
            Some(cm) => parse_mtu_record(&cm),
            None => Ok(None),
        }
    }

    async fn update_desired_config(&self, config: &DesiredConfig) -> Result<DesiredConfig, SourceError> {
        let what = format!("networks.operator/{}", config.name);
        let spec = serde_json::to_value(&config.spec).map_err(|e| SourceError::Other(format!("encoding {what}: {e}")))?;
        let mut obj = DynamicObject::new(&config.name, &OPERATOR_NETWORK).data(json!({ "spec": spec }));
        obj.metadata.uid = config.uid.clone();
        obj.metadata.resource_version = config.resource_version.clone();
        let updated = self.operator_api().replace(&config.name, &PostParams::default(), &obj).await.map_err(|e| source_error(&what, e))?;
        desired_from(&updated)
    }

    async fn publish_cluster_status(&self, status: &ClusterNetworkStatus) -> Result<(), SourceError> {
        let patch = cluster_status_patch(status);
        self.cluster_api()
            .patch_status(CLUSTER_CONFIG, &PatchParams::default(), &Patch::Merge(&patch))
            .await
            .map_err(|e| source_error("networks.config/cluster status", e))?;
        Ok(())
    }
}
