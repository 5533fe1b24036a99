//! Append-only participation ledger

use std::collections::{BTreeMap, HashMap};
use std::sync::RwLock;

use crate::domain::{DomainError, ExperimentId, ParticipationAssignment};

/// Participation records per experiment, guarded independently of the
/// experiment table
#[derive(Debug, Default)]
pub struct ParticipationLedger {
    entries: RwLock<HashMap<ExperimentId, Vec<ParticipationAssignment>>>,
}

impl ParticipationLedger {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn record(&self, assignment: ParticipationAssignment) -> Result<(), DomainError> {
        let mut entries = self
            .entries
            .write()
            .map_err(|e| DomainError::internal(format!("Ledger lock poisoned: {}", e)))?;

        entries
            .entry(assignment.experiment_id.clone())
            .or_default()
            .push(assignment);

        Ok(())
    }

    /// All participations of an experiment in recording order
    pub fn participations(
        &self,
        experiment_id: &ExperimentId,
    ) -> Result<Vec<ParticipationAssignment>, DomainError> {
        let entries = self
            .entries
            .read()
            .map_err(|e| DomainError::internal(format!("Ledger lock poisoned: {}", e)))?;

        Ok(entries.get(experiment_id).cloned().unwrap_or_default())
    }

    pub fn participant_count(
        &self,
        experiment_id: &ExperimentId,
        variant: &str,
    ) -> Result<u64, DomainError> {
        let entries = self
            .entries
            .read()
            .map_err(|e| DomainError::internal(format!("Ledger lock poisoned: {}", e)))?;

        Ok(entries
            .get(experiment_id)
            .map(|list| list.iter().filter(|p| p.variant_name == variant).count() as u64)
            .unwrap_or(0))
    }

    /// Participant totals keyed by variant name
    pub fn counts_by_variant(
        &self,
        experiment_id: &ExperimentId,
    ) -> Result<BTreeMap<String, u64>, DomainError> {
        let entries = self
            .entries
            .read()
            .map_err(|e| DomainError::internal(format!("Ledger lock poisoned: {}", e)))?;

        let mut counts = BTreeMap::new();

        for participation in entries.get(experiment_id).into_iter().flatten() {
            *counts.entry(participation.variant_name.clone()).or_insert(0) += 1;
        }

        Ok(counts)
    }

    /// Drop every record of an experiment, returning how many were removed
    pub fn remove(&self, experiment_id: &ExperimentId) -> Result<usize, DomainError> {
        let mut entries = self
            .entries
            .write()
            .map_err(|e| DomainError::internal(format!("Ledger lock poisoned: {}", e)))?;

        Ok(entries.remove(experiment_id).map(|list| list.len()).unwrap_or(0))
    }
}
