//! Render post-processing: status labels, ownership and the related-object indexes.

use k8s_openapi::apimachinery::pkg::apis::meta::v1::OwnerReference;
use tracing::warn;

use netop_core::names::{APPLIED_NAMESPACE, CLOUD_NETWORK_CONFIG_NAMESPACE, GENERATE_STATUS_LABEL, OPERATOR_GROUP, STANDALONE_CLUSTER_NAME};
use netop_core::object::{MachineConfig, ObjectReference, RelatedClusterObject};
use netop_core::{InfraStatus, RenderedObject, RestMapper};

use crate::error::ReconcileError;

#[derive(Debug, Default)]
pub struct PostProcessed {
    pub objects: Vec<RenderedObject>,
    pub related: Vec<ObjectReference>,
    pub related_cluster: Vec<RelatedClusterObject>,
    pub machine_configs: Vec<MachineConfig>,
}

/// Stamp, own and index every rendered object, keeping render order.
pub async fn post_process(
    objects: Vec<RenderedObject>,
    owner: &OwnerReference,
    infra: &InfraStatus,
    mapper: &dyn RestMapper,
) -> Result<PostProcessed, ReconcileError> {
    let scope = if infra.is_hosted() { infra.infra_name.as_str() } else { STANDALONE_CLUSTER_NAME };
    let mut out = PostProcessed::default();

    for mut obj in objects {
        // An existing label, even an empty one, is the manifest's choice.
        if obj.is_workload() && obj.label(GENERATE_STATUS_LABEL).is_none() {
            obj.set_label(GENERATE_STATUS_LABEL, scope);
        }

        let foreign = obj.cluster_name().map(str::to_string);
        if foreign.is_none() {
            obj.set_controller_reference(owner).map_err(|e| {
                ReconcileError::Internal(format!("could not set reference for ({}) {}/{}: {e}", obj.gvk(), obj.namespace().unwrap_or_default(), obj.name()))
            })?;
        }
        if let Some(mc) = obj.as_machine_config() {
            out.machine_configs.push(mc);
        }

        let gvk = obj.gvk();
        match mapper.resource_for(&gvk).await {
            Ok(resource) => {
                let reference = ObjectReference {
                    group: gvk.group.clone(),
                    resource,
                    name: obj.name().to_string(),
                    namespace: obj.namespace().unwrap_or_default().to_string(),
                };
                match foreign {
                    Some(cluster_name) => out.related_cluster.push(RelatedClusterObject { reference, cluster_name }),
                    None => out.related.push(reference),
                }
            }
            Err(e) => warn!(gvk = %gvk, name = obj.name(), error = %e, "failed to resolve REST mapping; not tracking object"),
        }
        out.objects.push(obj);
    }

    out.related.extend(static_related(&owner.name));
    Ok(out)
}

/// References owned by this operator that render never produces.
fn static_related(config_name: &str) -> [ObjectReference; 3] {
    let namespace = |name: &str| ObjectReference { group: String::new(), resource: "namespaces".into(), name: name.into(), namespace: String::new() };
    [
        namespace(APPLIED_NAMESPACE),
        ObjectReference { group: OPERATOR_GROUP.into(), resource: "networks".into(), name: config_name.into(), namespace: String::new() },
        namespace(CLOUD_NETWORK_CONFIG_NAMESPACE),
    ]
}
