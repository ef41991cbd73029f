//! Static validation of a merged spec. Every problem is reported, not just the first.

use std::collections::BTreeSet;
use ipnet::IpNet;
use thiserror::Error;

use netop_core::{DesiredSpec, NetworkType};

pub const MIN_MTU: u32 = 576;
pub const MAX_MTU: u32 = 65536;

#[derive(Debug, Clone, Error, PartialEq, Eq)]
#[error("{}", .0.join("; "))]
pub struct ValidationError(pub Vec<String>);

pub fn validate(spec: &DesiredSpec) -> Result<(), ValidationError> {
    let mut errs = Vec::new();
    let network_type = spec.network_type();

    if spec.default_network.network_type.is_empty() {
        errs.push("defaultNetwork.type must be set".to_string());
    }

    let cluster = validate_cluster_network(spec, &network_type, &mut errs);
    let service = validate_service_network(spec, &mut errs);
    for c in &cluster {
        for s in &service {
            if overlaps(c, s) {
                errs.push(format!("clusterNetwork {c} overlaps serviceNetwork {s}"));
            }
        }
    }

    if let Some(mtu) = spec.mtu() {
        if !(MIN_MTU..=MAX_MTU).contains(&mtu) {
            errs.push(format!("mtu {mtu} is outside {MIN_MTU}..={MAX_MTU}"));
        }
    }
    let ports = [
        ("genevePort", spec.default_network.ovn_kubernetes_config.as_ref().and_then(|c| c.geneve_port)),
        ("vxlanPort", spec.default_network.openshift_sdn_config.as_ref().and_then(|c| c.vxlan_port)),
    ];
    for (field, port) in ports {
        if let Some(port) = port.filter(|p| !(1..=65535).contains(p)) {
            errs.push(format!("{field} {port} is not a valid port"));
        }
    }

    let mut names = BTreeSet::new();
    for net in &spec.additional_networks {
        if net.name.is_empty() {
            errs.push("additionalNetworks entries must have a name".to_string());
        } else if !names.insert(net.name.as_str()) {
            errs.push(format!("additionalNetworks name {:?} is not unique", net.name));
        }
    }

    if let Some(target) = spec.migration.as_ref().and_then(|m| m.target()) {
        if !NetworkType::parse(target).is_builtin() {
            errs.push(format!("migration.networkType {target:?} is not a supported migration target"));
        }
    }

    if errs.is_empty() { Ok(()) } else { Err(ValidationError(errs)) }
}

fn validate_cluster_network(spec: &DesiredSpec, network_type: &NetworkType, errs: &mut Vec<String>) -> Vec<IpNet> {
    if spec.cluster_network.is_empty() {
        errs.push("clusterNetwork cannot be empty".to_string());
    }
    let mut out = Vec::new();
    for entry in &spec.cluster_network {
        let cidr = match parse_cidr(&entry.cidr) {
            Ok(c) => c,
            Err(e) => {
                errs.push(format!("clusterNetwork {e}"));
                continue;
            }
        };
        // Third-party plugins may leave host prefixes unset.
        let checked = network_type.is_builtin() || entry.host_prefix != 0;
        if checked && !(u32::from(cidr.prefix_len())..=u32::from(cidr.max_prefix_len())).contains(&entry.host_prefix) {
            errs.push(format!("clusterNetwork {cidr} hostPrefix {} is out of range", entry.host_prefix));
        }
        out.push(cidr);
    }
    out
}

fn validate_service_network(spec: &DesiredSpec, errs: &mut Vec<String>) -> Vec<IpNet> {
    if !(1..=2).contains(&spec.service_network.len()) {
        errs.push(format!("serviceNetwork must have one or two entries, got {}", spec.service_network.len()));
    }
    let mut out: Vec<IpNet> = Vec::new();
    for raw in &spec.service_network {
        match parse_cidr(raw) {
            Ok(c) if out.iter().any(|o| matches!(o, IpNet::V4(_)) == matches!(c, IpNet::V4(_))) => {
                errs.push(format!("serviceNetwork has more than one {} range", if matches!(c, IpNet::V4(_)) { "IPv4" } else { "IPv6" }));
            }
            Ok(c) => out.push(c),
            Err(e) => errs.push(format!("serviceNetwork {e}")),
        }
    }
    out
}

fn parse_cidr(s: &str) -> Result<IpNet, String> {
    s.parse().map_err(|_| format!("{s:?} is not a valid CIDR"))
}

fn overlaps(a: &IpNet, b: &IpNet) -> bool {
    a.contains(&b.network()) || b.contains(&a.network())
}

#[cfg(test)]
mod tests {
    use super::*;
    use netop_core::spec::{AdditionalNetwork, MigrationSpec, OvnKubernetesConfig};
    use netop_core::ClusterNetworkEntry;

    fn valid() -> DesiredSpec {
        let mut spec = DesiredSpec::default();
        spec.cluster_network = vec![ClusterNetworkEntry { cidr: "10.128.0.0/14".into(), host_prefix: 23 }];
        spec.service_network = vec!["172.30.0.0/16".into()];
        spec.default_network.network_type = "OVNKubernetes".into();
        spec.default_network.ovn_kubernetes_config = Some(OvnKubernetesConfig { mtu: Some(1400), geneve_port: Some(6081), ..Default::default() });
        spec
    }

    #[test]
    fn accepts_a_typical_spec() {
        validate(&valid()).unwrap();
        let mut dual = valid();
        dual.service_network.push("fd02::/112".into());
        dual.cluster_network.push(ClusterNetworkEntry { cidr: "fd01::/48".into(), host_prefix: 64 });
        validate(&dual).unwrap();
    }

    #[test]
    fn reports_every_problem() {
        let mut spec = valid();
        spec.cluster_network[0].host_prefix = 8;
        spec.service_network = vec!["10.128.0.0/16".into()];
        spec.default_network.ovn_kubernetes_config.as_mut().unwrap().mtu = Some(100);
        let err = validate(&spec).unwrap_err();
        assert_eq!(err.0.len(), 3, "{err}");
        assert!(err.to_string().contains("overlaps"));
    }

    #[test]
    fn service_network_one_per_family() {
        let mut spec = valid();
        spec.service_network.push("172.31.0.0/16".into());
        assert!(validate(&spec).unwrap_err().to_string().contains("more than one IPv4"));
        spec.service_network = vec!["not-a-cidr".into()];
        assert!(validate(&spec).is_err());
    }

    #[test]
    fn cidr_parsing_and_overlap() {
        assert!(parse_cidr("10.0.0.0/33").is_err());
        assert!(parse_cidr("10.0.0.0").is_err());
        let wide = parse_cidr("10.128.0.0/14").unwrap();
        let inner = parse_cidr("10.130.0.0/16").unwrap();
        assert!(overlaps(&wide, &inner));
        assert!(overlaps(&inner, &wide));
        assert!(!overlaps(&wide, &parse_cidr("172.30.0.0/16").unwrap()));
        assert!(!overlaps(&wide, &parse_cidr("fd01::/48").unwrap()), "families never overlap");
        assert!(overlaps(&parse_cidr("fd01::/48").unwrap(), &parse_cidr("fd01:0:0:1::/64").unwrap()));
    }

    #[test]
    fn host_prefix_bounds_follow_the_family() {
        let mut spec = valid();
        spec.cluster_network[0].host_prefix = 33;
        assert!(validate(&spec).unwrap_err().to_string().contains("hostPrefix 33"));
        spec.cluster_network = vec![ClusterNetworkEntry { cidr: "fd01::/48".into(), host_prefix: 64 }];
        spec.service_network = vec!["fd02::/112".into()];
        validate(&spec).unwrap();
    }

    #[test]
    fn additional_network_names_are_unique() {
        let mut spec = valid();
        let net = AdditionalNetwork { name: "a".into(), network_type: "Raw".into(), ..Default::default() };
        spec.additional_networks = vec![net.clone(), net];
        assert!(validate(&spec).unwrap_err().to_string().contains("not unique"));
    }

    #[test]
    fn migration_target_must_be_builtin() {
        let mut spec = valid();
        spec.migration = Some(MigrationSpec { network_type: Some("Calico".into()), ..Default::default() });
        assert!(validate(&spec).unwrap_err().to_string().contains("migration target"));
        spec.migration = Some(MigrationSpec { network_type: Some("OpenShiftSDN".into()), ..Default::default() });
        validate(&spec).unwrap();
    }
}
