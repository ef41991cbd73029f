use thiserror::Error;

use netop_core::MigrationFeature;

/// Why a cycle stopped early. Each variant maps to one stable reason code.
#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum ReconcileError {
    /// Someone else wrote first. Retried straight away and never reported as degraded.
    #[error("conflict while {stage}: {message}")]
    Conflict { stage: &'static str, message: String },

    #[error("failed to read configuration: {0}")]
    Fetch(String),

    #[error("failed to merge cluster configuration: {0}")]
    Merge(String),

    #[error("invalid configuration: {0}")]
    InvalidConfig(String),

    #[error("unsafe configuration change: {0}")]
    UnsafeChange(String),

    #[error("could not probe MTU -- maybe no available nodes: {0}")]
    Probe(String),

    #[error("failed to bootstrap platform networking: {0}")]
    Bootstrap(String),

    #[error("failed to update operator configuration: {0}")]
    UpdateConfig(String),

    #[error("failed to render: {0}")]
    Render(String),

    #[error("internal error: {0}")]
    Internal(String),

    #[error("failed to process machine configs: {0}")]
    MachineConfig(String),

    /// Last non-ignorable per-object failure of the apply loop.
    #[error("{0}")]
    Apply(String),

    #[error("could not migrate {feature}: {message}")]
    Migration { feature: MigrationFeature, message: String },

    #[error("could not update cluster network status: {0}")]
    Status(String),
}

impl ReconcileError {
    /// Degraded reason code, `None` for transient failures that must not flap status.
    pub fn reason(&self) -> Option<&'static str> {
        Some(match self {
            ReconcileError::Conflict { .. } => return None,
            ReconcileError::Fetch(_) => "FetchOperatorConfig",
            ReconcileError::Merge(_) => "MergeClusterConfig",
            ReconcileError::InvalidConfig(_) | ReconcileError::UnsafeChange(_) => "InvalidOperatorConfig",
            ReconcileError::Probe(_) => "MTUProbeFailed",
            ReconcileError::Bootstrap(_) => "BootstrapError",
            ReconcileError::UpdateConfig(_) => "UpdateOperatorConfig",
            ReconcileError::Render(_) => "RenderError",
            ReconcileError::Internal(_) => "InternalError",
            ReconcileError::MachineConfig(_) => "MachineConfigError",
            ReconcileError::Apply(_) => "ApplyOperatorConfig",
            ReconcileError::Migration { .. } => "MigrationError",
            ReconcileError::Status(_) => "StatusError",
        })
    }

    /// Message shown on the degraded condition. Admin-actionable for config problems.
    pub fn degraded_message(&self) -> String {
        match self {
            ReconcileError::InvalidConfig(e) => format!(
                "The operator configuration is invalid ({e}). Edit network.operator.openshift.io/cluster to fix it."
            ),
            ReconcileError::UnsafeChange(e) => format!(
                "Not applying unsafe configuration change: {e}. Edit network.operator.openshift.io/cluster to undo the change."
            ),
            ReconcileError::Apply(e) => format!("Error while updating operator configuration: {e}"),
            other => format!("Internal error: {other}"),
        }
    }

    pub fn is_conflict(&self) -> bool {
        matches!(self, ReconcileError::Conflict { .. })
    }

    /// Conflicts are retried without backoff; everything else backs off.
    pub fn requeue_immediately(&self) -> bool {
        self.is_conflict()
    }
}
