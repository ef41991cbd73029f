//! Rendered target objects.
//!
//! Arbitrary kinds travel as a generic attribute map keyed by group/version/kind; the few
//! kinds the engine inspects directly (replicated workloads, machine configs) get their
//! own variants so callers match on them instead of comparing strings.

use k8s_openapi::apimachinery::pkg::apis::meta::v1::{ObjectMeta, OwnerReference};
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value as Json};

use crate::error::ObjectError;
use crate::names::{CLUSTER_NAME_ANNOTATION, IGNORE_OBJECT_ERROR_ANNOTATION, MACHINE_CONFIG_GROUP, MACHINE_CONFIG_ROLE_LABEL};

#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct Gvk {
    pub group: String,
    pub version: String,
    pub kind: String,
}

impl Gvk {
    pub fn new(group: &str, version: &str, kind: &str) -> Self {
        Self { group: group.to_string(), version: version.to_string(), kind: kind.to_string() }
    }

    pub fn from_api_version(api_version: &str, kind: &str) -> Self {
        match api_version.split_once('/') {
            Some((g, v)) => Self::new(g, v, kind),
            None => Self::new("", api_version, kind),
        }
    }

    pub fn api_version(&self) -> String {
        if self.group.is_empty() { self.version.clone() } else { format!("{}/{}", self.group, self.version) }
    }
}

impl std::fmt::Display for Gvk {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}, Kind={}", self.api_version(), self.kind)
    }
}

/// The three replicated-workload kinds whose rollout is tracked in status.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum WorkloadKind {
    DaemonSet,
    Deployment,
    StatefulSet,
}

impl WorkloadKind {
    fn from_kind(kind: &str) -> Option<Self> {
        match kind {
            "DaemonSet" => Some(WorkloadKind::DaemonSet),
            "Deployment" => Some(WorkloadKind::Deployment),
            "StatefulSet" => Some(WorkloadKind::StatefulSet),
            _ => None,
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            WorkloadKind::DaemonSet => "DaemonSet",
            WorkloadKind::Deployment => "Deployment",
            WorkloadKind::StatefulSet => "StatefulSet",
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub enum ObjectBody {
    Workload { kind: WorkloadKind, fields: Map<String, Json> },
    MachineConfig { fields: Map<String, Json> },
    Generic { gvk: Gvk, fields: Map<String, Json> },
}

/// One object produced by render, in apply order.
#[derive(Debug, Clone, PartialEq)]
pub struct RenderedObject {
    pub metadata: ObjectMeta,
    pub body: ObjectBody,
}

/// Machine config handed to the status aggregator to follow its rollout.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct MachineConfig {
    pub name: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub role: Option<String>,
    #[serde(default)]
    pub spec: Json,
}

impl RenderedObject {
    pub fn from_json(v: Json) -> Result<Self, ObjectError> {
        let Json::Object(mut map) = v else {
            return Err(ObjectError::NotAnObject);
        };
        let api_version = match map.remove("apiVersion") {
            Some(Json::String(s)) => s,
            _ => return Err(ObjectError::Missing("apiVersion")),
        };
        let kind = match map.remove("kind") {
            Some(Json::String(s)) => s,
            _ => return Err(ObjectError::Missing("kind")),
        };
        let metadata: ObjectMeta = match map.remove("metadata") {
            Some(m) => serde_json::from_value(m)?,
            None => return Err(ObjectError::Missing("metadata")),
        };
        if metadata.name.as_deref().map_or(true, str::is_empty) {
            return Err(ObjectError::Missing("metadata.name"));
        }
        let gvk = Gvk::from_api_version(&api_version, &kind);
        let body = match (gvk.group.as_str(), gvk.version.as_str()) {
            ("apps", "v1") => match WorkloadKind::from_kind(&kind) {
                Some(kind) => ObjectBody::Workload { kind, fields: map },
                None => ObjectBody::Generic { gvk, fields: map },
            },
            (MACHINE_CONFIG_GROUP, "v1") if kind == "MachineConfig" => ObjectBody::MachineConfig { fields: map },
            _ => ObjectBody::Generic { gvk, fields: map },
        };
        Ok(Self { metadata, body })
    }

    pub fn to_json(&self) -> Result<Json, ObjectError> {
        let gvk = self.gvk();
        let mut out = Map::new();
        out.insert("apiVersion".into(), Json::String(gvk.api_version()));
        out.insert("kind".into(), Json::String(gvk.kind));
        out.insert("metadata".into(), serde_json::to_value(&self.metadata)?);
        for (k, v) in self.fields() {
            out.insert(k.clone(), v.clone());
        }
        Ok(Json::Object(out))
    }

    pub fn gvk(&self) -> Gvk {
        match &self.body {
            ObjectBody::Workload { kind, .. } => Gvk::new("apps", "v1", kind.as_str()),
            ObjectBody::MachineConfig { .. } => Gvk::new(MACHINE_CONFIG_GROUP, "v1", "MachineConfig"),
            ObjectBody::Generic { gvk, .. } => gvk.clone(),
        }
    }

    pub fn fields(&self) -> &Map<String, Json> {
        match &self.body {
            ObjectBody::Workload { fields, .. }
            | ObjectBody::MachineConfig { fields }
            | ObjectBody::Generic { fields, .. } => fields,
        }
    }

    pub fn name(&self) -> &str {
        self.metadata.name.as_deref().unwrap_or_default()
    }

    pub fn namespace(&self) -> Option<&str> {
        self.metadata.namespace.as_deref().filter(|ns| !ns.is_empty())
    }

    pub fn is_workload(&self) -> bool {
        matches!(self.body, ObjectBody::Workload { .. })
    }

    pub fn label(&self, key: &str) -> Option<&str> {
        self.metadata.labels.as_ref().and_then(|l| l.get(key)).map(String::as_str)
    }

    pub fn set_label(&mut self, key: &str, value: &str) {
        self.metadata.labels.get_or_insert_with(Default::default).insert(key.to_string(), value.to_string());
    }

    pub fn annotation(&self, key: &str) -> Option<&str> {
        self.metadata.annotations.as_ref().and_then(|a| a.get(key)).map(String::as_str)
    }

    pub fn ignores_errors(&self) -> bool {
        self.annotation(IGNORE_OBJECT_ERROR_ANNOTATION).is_some()
    }

    /// Name of the remote cluster owning this object, if it is foreign.
    pub fn cluster_name(&self) -> Option<&str> {
        self.annotation(CLUSTER_NAME_ANNOTATION).filter(|c| !c.is_empty())
    }

    /// Mark `owner` as the managing controller so the object is garbage-collected with it.
    pub fn set_controller_reference(&mut self, owner: &OwnerReference) -> Result<(), ObjectError> {
        let refs = self.metadata.owner_references.get_or_insert_with(Vec::new);
        if let Some(existing) = refs.iter().find(|r| r.controller == Some(true) && r.uid != owner.uid) {
            return Err(ObjectError::AlreadyOwned { kind: existing.kind.clone(), name: existing.name.clone() });
        }
        refs.retain(|r| r.uid != owner.uid);
        refs.push(OwnerReference { controller: Some(true), block_owner_deletion: Some(true), ..owner.clone() });
        Ok(())
    }

    pub fn as_machine_config(&self) -> Option<MachineConfig> {
        match &self.body {
            ObjectBody::MachineConfig { fields } => Some(MachineConfig {
                name: self.name().to_string(),
                role: self.label(MACHINE_CONFIG_ROLE_LABEL).map(str::to_string),
                spec: fields.get("spec").cloned().unwrap_or(Json::Null),
            }),
            _ => None,
        }
    }
}

/// Reference to an object owned by this configuration.
#[derive(Debug, Clone, Default, PartialEq, Eq, PartialOrd, Ord, Serialize, Deserialize)]
pub struct ObjectReference {
    pub group: String,
    pub resource: String,
    pub name: String,
    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub namespace: String,
}

/// Reference to an object whose lifecycle belongs to another cluster.
#[derive(Debug, Clone, Default, PartialEq, Eq, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RelatedClusterObject {
    #[serde(flatten)]
    pub reference: ObjectReference,
    pub cluster_name: String,
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn owner(uid: &str) -> OwnerReference {
        OwnerReference {
            api_version: "operator.openshift.io/v1".into(),
            kind: "Network".into(),
            name: "cluster".into(),
            uid: uid.into(),
            ..Default::default()
        }
    }

    #[test]
    fn classifies_workloads_and_machine_configs() {
        let ds = RenderedObject::from_json(json!({
            "apiVersion": "apps/v1", "kind": "DaemonSet",
            "metadata": { "name": "ovnkube-node", "namespace": "openshift-ovn-kubernetes" },
            "spec": {}
        }))
        .unwrap();
        assert!(ds.is_workload());
        assert_eq!(ds.namespace(), Some("openshift-ovn-kubernetes"));

        let mc = RenderedObject::from_json(json!({
            "apiVersion": "machineconfiguration.openshift.io/v1", "kind": "MachineConfig",
            "metadata": { "name": "80-ipsec-worker", "labels": { "machineconfiguration.openshift.io/role": "worker" } },
            "spec": { "extensions": ["ipsec"] }
        }))
        .unwrap();
        let typed = mc.as_machine_config().unwrap();
        assert_eq!(typed.role.as_deref(), Some("worker"));
        assert_eq!(typed.spec, json!({ "extensions": ["ipsec"] }));

        let cm = RenderedObject::from_json(json!({ "apiVersion": "v1", "kind": "ConfigMap", "metadata": { "name": "x" } })).unwrap();
        assert_eq!(cm.gvk(), Gvk::new("", "v1", "ConfigMap"));
        assert!(!cm.is_workload());
    }

    #[test]
    fn json_form_is_preserved() {
        let v = json!({
            "apiVersion": "v1", "kind": "Namespace",
            "metadata": { "name": "openshift-multus", "labels": { "a": "b" } },
            "spec": { "finalizers": ["kubernetes"] }
        });
        let obj = RenderedObject::from_json(v.clone()).unwrap();
        assert_eq!(obj.to_json().unwrap(), v);
    }

    #[test]
    fn rejects_nameless_objects() {
        let err = RenderedObject::from_json(json!({ "apiVersion": "v1", "kind": "ConfigMap", "metadata": {} })).unwrap_err();
        assert!(err.to_string().contains("metadata.name"), "{err}");
    }

    #[test]
    fn controller_reference_is_exclusive() {
        let mut obj = RenderedObject::from_json(json!({ "apiVersion": "v1", "kind": "ConfigMap", "metadata": { "name": "x" } })).unwrap();
        obj.set_controller_reference(&owner("a")).unwrap();
        obj.set_controller_reference(&owner("a")).unwrap();
        assert_eq!(obj.metadata.owner_references.as_ref().unwrap().len(), 1);
        assert!(obj.set_controller_reference(&owner("b")).is_err());
    }
}
