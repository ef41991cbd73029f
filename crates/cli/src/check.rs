//! Offline merge, validation and safety check of a desired spec.

use anyhow::{Context, Result};
use serde::de::DeserializeOwned;
use serde::Serialize;
use serde_json::Value as Json;

use netop_core::{ClusterNetworkConfig, DesiredSpec};
use netop_reconcile::merge::{merge, upconvert, MergeInputs};
use netop_reconcile::safety::check_change;
use netop_reconcile::validate::validate;

#[derive(Debug, Serialize)]
pub struct CheckReport {
    pub merged: DesiredSpec,
    pub errors: Vec<String>,
    pub violations: Vec<String>,
}

impl CheckReport {
    pub fn ok(&self) -> bool {
        self.errors.is_empty() && self.violations.is_empty()
    }
}

/// Parse YAML holding either a whole object (its `spec` is used) or a bare spec.
pub fn parse_spec_doc<T: DeserializeOwned>(text: &str) -> Result<T> {
    let value: serde_yaml::Value = serde_yaml::from_str(text).context("parsing YAML")?;
    let json: Json = serde_json::to_value(value)?;
    let body = match json.get("spec") {
        Some(spec) if json.get("kind").is_some() => spec.clone(),
        _ => json,
    };
    Ok(serde_json::from_value(body)?)
}

pub fn read_spec_doc<T: DeserializeOwned>(path: &std::path::Path) -> Result<T> {
    let text = std::fs::read_to_string(path).with_context(|| format!("reading {}", path.display()))?;
    parse_spec_doc(&text).with_context(|| format!("decoding {}", path.display()))
}

pub fn check(live: &DesiredSpec, cluster: &ClusterNetworkConfig, applied: Option<&DesiredSpec>, host_mtu: Option<u32>) -> CheckReport {
    let merged = merge(&MergeInputs { live, cluster, applied, host_mtu });
    let errors = validate(&merged).err().map(|e| e.0).unwrap_or_default();
    let prev = applied.map(|p| upconvert(p, host_mtu));
    let violations = check_change(prev.as_ref(), &merged).err().map(|e| e.0.iter().map(ToString::to_string).collect()).unwrap_or_default();
    CheckReport { merged, errors, violations }
}
