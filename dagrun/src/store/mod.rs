//! Abstract run state store.
//!
//! The core appends one entry per task transition and saves the run record
//! on every outcome change; anything beyond point lookup and listing is
//! delegated to whatever backend implements [`RunStore`]. Only the
//! in-memory backend ships with the crate.

use crate::core::TaskTransition;
use crate::errors::DagrunError;
use crate::run::RunRecord;
use async_trait::async_trait;
use dashmap::DashMap;
use uuid::Uuid;

/// Persistence seam for run history.
#[async_trait]
pub trait RunStore: Send + Sync {
    /// Appends one task transition to the run's history.
    async fn append_transition(&self, transition: &TaskTransition) -> Result<(), DagrunError>;

    /// Saves (or overwrites) the run record.
    async fn save_record(&self, record: &RunRecord) -> Result<(), DagrunError>;

    /// Point lookup by run ID.
    async fn load_record(&self, run_id: Uuid) -> Result<Option<RunRecord>, DagrunError>;

    /// Lists all stored run records.
    async fn list_records(&self) -> Result<Vec<RunRecord>, DagrunError>;
}

/// In-memory run store backed by concurrent maps.
#[derive(Debug, Default)]
pub struct InMemoryRunStore {
    records: DashMap<Uuid, RunRecord>,
    transitions: DashMap<Uuid, Vec<TaskTransition>>,
}

impl InMemoryRunStore {
    /// Creates an empty store.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Returns the recorded transitions for a run, in append order.
    #[must_use]
    pub fn transitions_for(&self, run_id: Uuid) -> Vec<TaskTransition> {
        self.transitions
            .get(&run_id)
            .map(|entry| entry.clone())
            .unwrap_or_default()
    }
}

#[async_trait]
impl RunStore for InMemoryRunStore {
    async fn append_transition(&self, transition: &TaskTransition) -> Result<(), DagrunError> {
        self.transitions
            .entry(transition.run_id)
            .or_default()
            .push(transition.clone());
        Ok(())
    }

    async fn save_record(&self, record: &RunRecord) -> Result<(), DagrunError> {
        self.records.insert(record.run_id, record.clone());
        Ok(())
    }

    async fn load_record(&self, run_id: Uuid) -> Result<Option<RunRecord>, DagrunError> {
        Ok(self.records.get(&run_id).map(|entry| entry.clone()))
    }

    async fn list_records(&self) -> Result<Vec<RunRecord>, DagrunError> {
        Ok(self
            .records
            .iter()
            .map(|entry| entry.value().clone())
            .collect())
    }
}
