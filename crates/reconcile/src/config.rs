use std::path::PathBuf;
use std::time::Duration;

use netop_core::names::OPERATOR_CONFIG;

pub const DEFAULT_RESYNC: Duration = Duration::from_secs(180);
pub const DEFAULT_CYCLE_DEADLINE: Duration = Duration::from_secs(600);
pub const DEFAULT_FIELD_MANAGER: &str = "cluster-network-operator/operconfig";
pub const DEFAULT_MANIFEST_DIR: &str = "./bindata";

/// Engine parameters. Passed in explicitly; nothing is read from the environment here.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct EngineConfig {
    /// The singleton desired-config name; every other key is a no-op.
    pub operator_config_name: String,
    pub resync_period: Duration,
    pub manifest_root: PathBuf,
    pub field_manager: String,
    pub cycle_deadline: Duration,
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            operator_config_name: OPERATOR_CONFIG.to_string(),
            resync_period: DEFAULT_RESYNC,
            manifest_root: PathBuf::from(DEFAULT_MANIFEST_DIR),
            field_manager: DEFAULT_FIELD_MANAGER.to_string(),
            cycle_deadline: DEFAULT_CYCLE_DEADLINE,
        }
    }
}
