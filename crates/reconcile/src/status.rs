//! Status aggregator: per-component conditions and owned-object references, published as one
//! document. Keys not written during a cycle keep their prior value.

use std::sync::{Arc, Mutex, MutexGuard, PoisonError};

use anyhow::Result;
use chrono::Utc;
use tracing::debug;

use netop_core::object::{ObjectReference, RelatedClusterObject};
use netop_core::{Condition, OperatorStatus, StatusKey, StatusWriter};

pub struct StatusManager {
    state: Mutex<OperatorStatus>,
    last_published: Mutex<Option<OperatorStatus>>,
    writer: Arc<dyn StatusWriter>,
}

impl StatusManager {
    pub fn new(writer: Arc<dyn StatusWriter>) -> Self {
        Self::with_prior(writer, OperatorStatus::default())
    }

    /// Start from a previously persisted document so untouched keys survive restarts.
    pub fn with_prior(writer: Arc<dyn StatusWriter>, prior: OperatorStatus) -> Self {
        Self { state: Mutex::new(prior.clone()), last_published: Mutex::new(Some(prior)), writer }
    }

    fn state(&self) -> MutexGuard<'_, OperatorStatus> {
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }

    pub fn set_degraded(&self, key: StatusKey, reason: &str, message: impl Into<String>) {
        let mut st = self.state();
        let slot = &mut st.conditions.entry(key).or_default().degraded;
        transition(slot, true, reason, message.into());
    }

    pub fn set_not_degraded(&self, key: StatusKey) {
        let mut st = self.state();
        let slot = &mut st.conditions.entry(key).or_default().degraded;
        transition(slot, false, "", String::new());
    }

    pub fn set_progressing(&self, key: StatusKey, reason: &str, message: impl Into<String>) {
        let mut st = self.state();
        let slot = &mut st.conditions.entry(key).or_default().progressing;
        transition(slot, true, reason, message.into());
    }

    pub fn unset_progressing(&self, key: StatusKey) {
        let mut st = self.state();
        let slot = &mut st.conditions.entry(key).or_default().progressing;
        transition(slot, false, "", String::new());
    }

    /// Replaces the whole list.
    pub fn set_related_objects(&self, objects: Vec<ObjectReference>) {
        self.state().related_objects = objects;
    }

    pub fn set_related_cluster_objects(&self, objects: Vec<RelatedClusterObject>) {
        self.state().related_cluster_objects = objects;
    }

    /// Record the machine configs to follow and persist straight away.
    pub async fn set_machine_configs(&self, names: Vec<String>) -> Result<()> {
        let snapshot = {
            let mut st = self.state();
            if st.machine_configs == names {
                return Ok(());
            }
            st.machine_configs = names;
            st.clone()
        };
        self.write(snapshot).await
    }

    /// Write the merged document. A document identical to the last write is skipped.
    pub async fn publish(&self) -> Result<()> {
        let snapshot = self.snapshot();
        let unchanged = self.last_published.lock().unwrap_or_else(PoisonError::into_inner).as_ref() == Some(&snapshot);
        if unchanged {
            debug!("status unchanged; skipping write");
            return Ok(());
        }
        self.write(snapshot).await
    }

    async fn write(&self, snapshot: OperatorStatus) -> Result<()> {
        self.writer.write_status(&snapshot).await?;
        *self.last_published.lock().unwrap_or_else(PoisonError::into_inner) = Some(snapshot);
        Ok(())
    }

    pub fn snapshot(&self) -> OperatorStatus {
        self.state().clone()
    }
}

/// Update a condition in place; the transition time moves only when `active` flips.
fn transition(slot: &mut Option<Condition>, active: bool, reason: &str, message: String) {
    match slot {
        Some(c) if c.active == active => {
            c.reason = reason.to_string();
            c.message = message;
        }
        _ => {
            *slot = Some(Condition { active, reason: reason.to_string(), message, last_transition_time: Utc::now() });
        }
    }
}
