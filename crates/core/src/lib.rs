//! Network operator core types: desired spec, rendered objects, status and collaborator traits.

#![forbid(unsafe_code)]

pub mod error;
pub mod infra;
pub mod names;
pub mod object;
pub mod snapshot;
pub mod spec;
pub mod status;
pub mod traits;
pub mod trigger;

pub use error::{ApplyError, ObjectError, SourceError};
pub use infra::{HostedControlPlane, InfraStatus, NodeInventory};
pub use object::{Gvk, MachineConfig, ObjectBody, ObjectReference, RelatedClusterObject, RenderedObject, WorkloadKind};
pub use spec::{
    AppliedSnapshot, ClusterNetworkConfig, ClusterNetworkEntry, ClusterNetworkStatus, DesiredConfig, DesiredSpec, MigrationFeatures,
    MigrationSpec, NetworkType,
};
pub use status::{ComponentConditions, Condition, OperatorStatus, StatusKey};
pub use traits::{
    Applier, Bootstrapper, ConfigSource, FeatureGates, MigrationFeature, Migrator, RenderOutput, RenderRequest, Renderer, RestMapper,
    StatusWriter,
};
pub use trigger::{NodeChange, ReconcileKey, TriggerEvent};

pub mod prelude {
    pub use super::{
        Applier, Bootstrapper, ConfigSource, DesiredSpec, Gvk, InfraStatus, Migrator, ReconcileKey, RenderedObject, Renderer, RestMapper,
        StatusKey, StatusWriter, TriggerEvent,
    };
}
