//! Bootstrap probe decision.

use netop_core::{DesiredSpec, InfraStatus};

/// Whether this cycle has to measure the host MTU before defaulting.
///
/// True when the network type moved away from the applied one (the new implementation's
/// MTU default depends on the host), or when no probe has ever reported and the cluster
/// has nodes of its own to run the probe on.
pub fn needs_mtu_probe(prev: Option<&DesiredSpec>, candidate: &DesiredSpec, mtu_record: Option<u32>, infra: &InfraStatus) -> bool {
    let type_changed = prev.is_some_and(|p| p.network_type() != candidate.network_type());
    let never_probed = mtu_record.is_none() && !infra.is_hosted();
    type_changed || never_probed
}
