//! Migration executor: gating and ordering of the per-feature conversions.

use smallvec::SmallVec;
use tracing::info;

use netop_core::{DesiredSpec, MigrationFeature, Migrator, NetworkType};

use crate::error::ReconcileError;

/// View over the spec's declared migration.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MigrationTask {
    pub target: NetworkType,
    /// Enabled features in execution order.
    pub features: SmallVec<[MigrationFeature; 3]>,
}

impl MigrationTask {
    /// `None` unless a migration to one of the built-in implementations is declared.
    pub fn from_spec(spec: &DesiredSpec) -> Option<Self> {
        let migration = spec.migration.as_ref()?;
        let target = NetworkType::parse(migration.target()?);
        if !target.is_builtin() {
            return None;
        }
        let flags = migration.features.clone().unwrap_or_default();
        let features = MigrationFeature::ALL
            .into_iter()
            .filter(|f| {
                let flag = match f {
                    MigrationFeature::EgressFirewall => flags.egress_firewall,
                    MigrationFeature::Multicast => flags.multicast,
                    MigrationFeature::EgressIp => flags.egress_ip,
                };
                flag.unwrap_or(true)
            })
            .collect();
        Some(Self { target, features })
    }

    /// Run each enabled conversion in order. The first failure stops the rest; finished
    /// conversions stay done.
    pub async fn run(&self, migrator: &dyn Migrator) -> Result<(), ReconcileError> {
        for feature in &self.features {
            info!(feature = %feature, target = %self.target, "migrating feature");
            migrator
                .migrate(*feature, &self.target)
                .await
                .map_err(|e| ReconcileError::Migration { feature: *feature, message: format!("{e:#}") })?;
            metrics::counter!("migration_feature_total", 1u64, "feature" => feature.as_str());
        }
        Ok(())
    }
}
