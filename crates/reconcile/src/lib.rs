//! Reconciliation engine for the cluster network configuration.
//!
//! Pure policy lives in [`merge`], [`validate`], [`safety`], [`probe`] and [`trigger`]; the
//! [`Engine`] sequences them with the collaborator traits from `netop-core`.

#![forbid(unsafe_code)]

pub mod config;
pub mod engine;
pub mod error;
pub mod merge;
pub mod migrate;
pub mod postprocess;
pub mod probe;
pub mod safety;
pub mod status;
pub mod trigger;
pub mod validate;

pub use config::EngineConfig;
pub use engine::{Collaborators, Engine, Outcome};
pub use error::ReconcileError;
pub use migrate::MigrationTask;
pub use status::StatusManager;
pub use trigger::reconcile_key;
