//! Live-cluster collaborators for the reconciliation engine and the watch streams that feed it.

#![forbid(unsafe_code)]

pub mod infra;
pub mod migrate;
pub mod resources;
pub mod source;
pub mod status;
pub mod watch;

pub use infra::{load_feature_gates, BootstrapOptions, KubeBootstrapper, MtuProber};
pub use migrate::KubeMigrator;
pub use source::KubeConfigSource;
pub use status::ClusterOperatorWriter;
pub use watch::{spawn_watchers, GenerationCache, NodeLabelCache};
