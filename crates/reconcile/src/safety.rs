//! Change-safety gate.
//!
//! The previous applied spec and the candidate are flattened to their JSON leaf paths and
//! every differing path is looked up in [`FIELD_POLICIES`] by longest dotted prefix. Arrays
//! are compared as single leaves. Paths missing from the table are rejected.

use std::collections::{BTreeMap, BTreeSet};

use serde_json::Value as Json;
use thiserror::Error;

use netop_core::DesiredSpec;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Mutability {
    /// Fixed after the first apply unless an active migration covers it.
    Immutable,
    /// Mirrored from the cluster config; existing entries are fixed, new ones may be appended.
    Mirrored,
    Free,
}

/// What an active migration can unlock.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub enum Cover {
    /// Migration whose target is the candidate's network type.
    NetworkType,
    /// MTU migration from the previous MTU to the candidate MTU.
    Mtu,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct FieldPolicy {
    pub path: &'static str,
    pub class: Mutability,
    pub covers: &'static [Cover],
}

const fn policy(path: &'static str, class: Mutability, covers: &'static [Cover]) -> FieldPolicy {
    FieldPolicy { path, class, covers }
}

use Mutability::{Free, Immutable, Mirrored};

pub const FIELD_POLICIES: &[FieldPolicy] = &[
    policy("clusterNetwork", Mirrored, &[]),
    policy("serviceNetwork", Mirrored, &[]),
    policy("defaultNetwork.type", Immutable, &[Cover::NetworkType]),
    policy("defaultNetwork.ovnKubernetesConfig", Immutable, &[Cover::NetworkType]),
    policy("defaultNetwork.ovnKubernetesConfig.mtu", Immutable, &[Cover::NetworkType, Cover::Mtu]),
    policy("defaultNetwork.ovnKubernetesConfig.ipsecConfig", Free, &[]),
    policy("defaultNetwork.ovnKubernetesConfig.gatewayConfig", Free, &[]),
    policy("defaultNetwork.ovnKubernetesConfig.policyAuditConfig", Free, &[]),
    policy("defaultNetwork.openshiftSdnConfig", Immutable, &[Cover::NetworkType]),
    policy("defaultNetwork.openshiftSdnConfig.mtu", Immutable, &[Cover::NetworkType, Cover::Mtu]),
    policy("defaultNetwork.openshiftSdnConfig.enableUnidling", Free, &[]),
    policy("disableMultiNetwork", Immutable, &[]),
    policy("additionalNetworks", Free, &[]),
    policy("useMultiNetworkPolicy", Free, &[]),
    policy("deployKubeProxy", Free, &[]),
    policy("kubeProxyConfig", Free, &[]),
    policy("disableNetworkDiagnostics", Free, &[]),
    policy("logLevel", Free, &[]),
    policy("operatorLogLevel", Free, &[]),
    policy("managementState", Free, &[]),
    policy("migration", Free, &[]),
];

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Violation {
    Immutable(String),
    MirroredShrunk(String),
    Unclassified(String),
    Unencodable { which: &'static str, message: String },
}

impl std::fmt::Display for Violation {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Violation::Immutable(p) => write!(f, "cannot change {p}"),
            Violation::MirroredShrunk(p) => write!(f, "cannot remove or reorder existing {p} entries"),
            Violation::Unclassified(p) => write!(f, "{p} is not a recognized field"),
            Violation::Unencodable { which, message } => write!(f, "{which} spec cannot be compared: {message}"),
        }
    }
}

#[derive(Debug, Clone, Error, PartialEq, Eq)]
#[error("{}", .0.iter().map(ToString::to_string).collect::<Vec<_>>().join(", "))]
pub struct UnsafeChange(pub Vec<Violation>);

/// Longest-prefix lookup of the policy governing `path`.
pub fn classify(path: &str) -> Option<&'static FieldPolicy> {
    FIELD_POLICIES
        .iter()
        .filter(|p| path == p.path || path.strip_prefix(p.path).is_some_and(|rest| rest.starts_with('.')))
        .max_by_key(|p| p.path.len())
}

/// Accept or reject moving from `prev` to `next`. `prev = None` is the first apply.
pub fn check_change(prev: Option<&DesiredSpec>, next: &DesiredSpec) -> Result<(), UnsafeChange> {
    let Some(prev) = prev else {
        return Ok(());
    };
    let active = active_covers(prev, next);
    let prev = encoded("previous", serde_json::to_value(prev))?;
    let next_json = encoded("candidate", serde_json::to_value(next))?;
    check_json(&prev, &next_json, &active)
}

/// A spec that cannot be flattened is rejected rather than compared as `null`.
fn encoded(which: &'static str, value: serde_json::Result<Json>) -> Result<Json, UnsafeChange> {
    value.map_err(|e| UnsafeChange(vec![Violation::Unencodable { which, message: e.to_string() }]))
}

/// Migrations in `next` that unlock otherwise immutable deltas.
pub fn active_covers(prev: &DesiredSpec, next: &DesiredSpec) -> BTreeSet<Cover> {
    let mut active = BTreeSet::new();
    let Some(migration) = next.migration.as_ref() else {
        return active;
    };
    if migration.target() == Some(next.default_network.network_type.as_str()) {
        active.insert(Cover::NetworkType);
    }
    if let Some(range) = migration.mtu.as_ref().and_then(|m| m.network) {
        if prev.mtu() == Some(range.from) && next.mtu() == Some(range.to) {
            active.insert(Cover::Mtu);
        }
    }
    active
}

pub fn check_json(prev: &Json, next: &Json, active: &BTreeSet<Cover>) -> Result<(), UnsafeChange> {
    let mut violations = Vec::new();
    for (path, before, after) in field_deltas(prev, next) {
        let Some(policy) = classify(&path) else {
            violations.push(Violation::Unclassified(path));
            continue;
        };
        match policy.class {
            Free => {}
            Mirrored => {
                if !is_growth(before, after) {
                    violations.push(Violation::MirroredShrunk(path));
                }
            }
            Immutable => {
                if !policy.covers.iter().any(|c| active.contains(c)) {
                    violations.push(Violation::Immutable(path));
                }
            }
        }
    }
    if violations.is_empty() { Ok(()) } else { Err(UnsafeChange(violations)) }
}

/// Leaf paths whose values differ. A missing leaf and a `null` leaf are the same.
pub fn field_deltas<'a>(prev: &'a Json, next: &'a Json) -> Vec<(String, Option<&'a Json>, Option<&'a Json>)> {
    let mut before = BTreeMap::new();
    let mut after = BTreeMap::new();
    flatten("", prev, &mut before);
    flatten("", next, &mut after);
    let paths: BTreeSet<&String> = before.keys().chain(after.keys()).collect();
    paths
        .into_iter()
        .filter_map(|p| {
            let (b, a) = (before.get(p).copied(), after.get(p).copied());
            (b != a).then(|| (p.clone(), b, a))
        })
        .collect()
}

fn flatten<'a>(prefix: &str, v: &'a Json, out: &mut BTreeMap<String, &'a Json>) {
    match v {
        Json::Null => {}
        Json::Object(map) => {
            for (k, child) in map {
                let path = if prefix.is_empty() { k.clone() } else { format!("{prefix}.{k}") };
                flatten(&path, child, out);
            }
        }
        leaf => {
            out.insert(prefix.to_string(), leaf);
        }
    }
}

fn is_growth(before: Option<&Json>, after: Option<&Json>) -> bool {
    match (before, after) {
        (None, _) => true,
        (Some(Json::Array(b)), Some(Json::Array(a))) => a.len() >= b.len() && a.iter().zip(b).all(|(x, y)| x == y),
        _ => false,
    }
}
