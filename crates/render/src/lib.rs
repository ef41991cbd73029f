//! Manifest renderer: expands the YAML templates under the manifest root into objects.
//!
//! Layout under the root:
//!
//! ```text
//! common/                     always rendered, first
//! network/<implementation>/   ovn-kubernetes or openshift-sdn
//! network/multus/             unless disableMultiNetwork
//! network/kube-proxy/         when deployKubeProxy
//! ```
//!
//! Files are read in name order and may hold several documents. `{{ NAME }}` placeholders are
//! replaced from [`render_data`]; an unknown placeholder fails the render.

#![forbid(unsafe_code)]

use std::collections::{BTreeMap, BTreeSet};
use std::path::{Path, PathBuf};

use anyhow::{bail, Context, Result};
use regex::{Captures, Regex};
use serde::Deserialize;
use serde_json::{json, Value as Json};
use tracing::{debug, warn};

use netop_core::names::APPLIED_NAMESPACE;
use netop_core::spec::LogLevel;
use netop_core::{DesiredSpec, NetworkType, RenderOutput, RenderRequest, RenderedObject, Renderer};

const PLACEHOLDER: &str = r"\{\{\s*([A-Z0-9_]+)\s*\}\}";

#[derive(Debug, Clone, Copy, Default)]
pub struct ManifestRenderer;

impl ManifestRenderer {
    pub fn new() -> Self {
        Self
    }
}

#[async_trait::async_trait]
impl Renderer for ManifestRenderer {
    async fn render(&self, request: RenderRequest<'_>) -> Result<RenderOutput> {
        let data = render_data(&request);
        let placeholder = Regex::new(PLACEHOLDER).context("compiling placeholder pattern")?;

        let mut objects = Vec::new();
        for dir in manifest_dirs(request.spec) {
            objects.extend(render_dir(&request.manifest_root.join(&dir), &data, &placeholder)?);
        }
        if request.spec.disable_multi_network != Some(true) {
            objects.extend(additional_network_objects(request.spec)?);
        }
        debug!(count = objects.len(), "rendered manifests");

        let progressing = request.infra.nodes.is_empty() && !request.infra.is_hosted();
        Ok(RenderOutput { objects, progressing })
    }
}

/// Sub-directories to render for `spec`, in apply order.
pub fn manifest_dirs(spec: &DesiredSpec) -> Vec<PathBuf> {
    let mut dirs = vec![PathBuf::from("common")];
    match spec.network_type() {
        NetworkType::OvnKubernetes => dirs.push(PathBuf::from("network/ovn-kubernetes")),
        NetworkType::OpenShiftSdn => dirs.push(PathBuf::from("network/openshift-sdn")),
        NetworkType::Other(_) => {}
    }
    if spec.disable_multi_network != Some(true) {
        dirs.push(PathBuf::from("network/multus"));
    }
    if spec.deploy_kube_proxy == Some(true) {
        dirs.push(PathBuf::from("network/kube-proxy"));
    }
    dirs
}

/// Template variables derived from the merged spec and infra facts. Every key is always
/// present, empty when it does not apply to the active implementation.
pub fn render_data(req: &RenderRequest<'_>) -> BTreeMap<String, String> {
    fn opt<T: ToString>(v: Option<T>) -> String {
        v.map(|v| v.to_string()).unwrap_or_default()
    }
    let spec = req.spec;
    let ovn = spec.default_network.ovn_kubernetes_config.as_ref();
    let sdn = spec.default_network.openshift_sdn_config.as_ref();
    let first = spec.cluster_network.first();
    let log_level = match spec.log_level.unwrap_or(LogLevel::Normal) {
        LogLevel::Normal => 2,
        LogLevel::Debug => 4,
        LogLevel::Trace => 6,
        LogLevel::TraceAll => 8,
    };

    let pairs = [
        ("NETWORK_TYPE", spec.network_type().to_string()),
        ("MTU", opt(spec.mtu())),
        ("CLUSTER_NETWORK_CIDR", opt(first.map(|c| c.cidr.clone()))),
        ("HOST_PREFIX", opt(first.map(|c| c.host_prefix))),
        ("CLUSTER_NETWORK_CIDRS", spec.cluster_network.iter().map(|c| c.cidr.as_str()).collect::<Vec<_>>().join(",")),
        ("SERVICE_NETWORK", spec.service_network.join(",")),
        ("GENEVE_PORT", opt(ovn.and_then(|c| c.geneve_port))),
        ("V4_INTERNAL_SUBNET", opt(ovn.and_then(|c| c.v4_internal_subnet.clone()))),
        ("IPSEC_MODE", spec.ipsec_mode().unwrap_or("Disabled").to_string()),
        ("VXLAN_PORT", opt(sdn.and_then(|c| c.vxlan_port))),
        ("SDN_MODE", opt(sdn.and_then(|c| c.mode.clone()))),
        ("PLATFORM_TYPE", req.infra.platform_type.clone()),
        ("PLATFORM_REGION", opt(req.infra.platform_region.clone())),
        ("INFRA_NAME", req.infra.infra_name.clone()),
        ("HOSTED", req.infra.is_hosted().to_string()),
        ("OPERATOR_NAMESPACE", APPLIED_NAMESPACE.to_string()),
        ("LOG_LEVEL", log_level.to_string()),
        ("FEATURE_GATES", req.feature_gates.iter().collect::<Vec<_>>().join(",")),
    ];
    pairs.into_iter().map(|(k, v)| (k.to_string(), v)).collect()
}

fn render_dir(dir: &Path, data: &BTreeMap<String, String>, placeholder: &Regex) -> Result<Vec<RenderedObject>> {
    if !dir.is_dir() {
        debug!(dir = %dir.display(), "manifest directory absent; skipping");
        return Ok(Vec::new());
    }
    let mut files: Vec<PathBuf> = std::fs::read_dir(dir)
        .with_context(|| format!("listing {}", dir.display()))?
        .filter_map(|e| e.ok().map(|e| e.path()))
        .filter(|p| matches!(p.extension().and_then(|e| e.to_str()), Some("yaml" | "yml" | "json")))
        .collect();
    files.sort();

    let mut out = Vec::new();
    for file in files {
        let raw = std::fs::read_to_string(&file).with_context(|| format!("reading {}", file.display()))?;
        let text = substitute(&raw, data, placeholder).with_context(|| format!("rendering {}", file.display()))?;
        out.extend(parse_documents(&text).with_context(|| format!("parsing {}", file.display()))?);
    }
    Ok(out)
}

pub fn substitute(text: &str, data: &BTreeMap<String, String>, placeholder: &Regex) -> Result<String> {
    let mut unknown = BTreeSet::new();
    let rendered = placeholder.replace_all(text, |caps: &Captures<'_>| match data.get(&caps[1]) {
        Some(v) => v.clone(),
        None => {
            unknown.insert(caps[1].to_string());
            String::new()
        }
    });
    if !unknown.is_empty() {
        bail!("unknown template variables: {}", unknown.into_iter().collect::<Vec<_>>().join(", "));
    }
    Ok(rendered.into_owned())
}

/// Split a multi-document YAML stream into objects, skipping empty documents.
pub fn parse_documents(text: &str) -> Result<Vec<RenderedObject>> {
    let mut out = Vec::new();
    for doc in serde_yaml::Deserializer::from_str(text) {
        let value = serde_yaml::Value::deserialize(doc)?;
        if value.is_null() {
            continue;
        }
        let json: Json = serde_json::to_value(value)?;
        out.push(RenderedObject::from_json(json)?);
    }
    Ok(out)
}

/// NetworkAttachmentDefinitions for `Raw` additional networks.
fn additional_network_objects(spec: &DesiredSpec) -> Result<Vec<RenderedObject>> {
    let mut out = Vec::new();
    for net in &spec.additional_networks {
        let Some(config) = net.raw_cni_config.as_deref().filter(|_| net.network_type == "Raw") else {
            warn!(name = %net.name, kind = %net.network_type, "unsupported additional network; skipping");
            continue;
        };
        out.push(RenderedObject::from_json(json!({
            "apiVersion": "k8s.cni.cncf.io/v1",
            "kind": "NetworkAttachmentDefinition",
            "metadata": { "name": net.name, "namespace": net.namespace.as_deref().unwrap_or("default") },
            "spec": { "config": config },
        }))?);
    }
    Ok(out)
}
