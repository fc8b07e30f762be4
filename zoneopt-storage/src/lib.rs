//! ZoneOpt Storage - Run Persistence Gateway
//!
//! One optimization run per project, keyed by project id. Every backend
//! implements the same upsert contract: writing a run for a project that
//! already has one replaces it in place, keeping the original run id and
//! creation time.
//!
//! Concurrent writes for the same project are not coordinated; the last
//! upsert wins.

pub mod lmdb;

pub use lmdb::{LmdbRunStore, LmdbStoreError};

use async_trait::async_trait;
use std::collections::HashMap;
use std::sync::{Arc, RwLock};
use zoneopt_core::{OptimizationRun, ProjectId, StorageError, UserId, ZoneOptResult};

// ============================================================================
// STORE TRAIT
// ============================================================================

/// Persistence gateway for optimization runs.
#[async_trait]
pub trait RunStore: Send + Sync {
    /// Insert or replace the run for `run.project_id`; returns the stored record.
    async fn upsert_run(&self, run: &OptimizationRun) -> ZoneOptResult<OptimizationRun>;

    /// Current run for a project, if any.
    async fn get_run(&self, project_id: &ProjectId) -> ZoneOptResult<Option<OptimizationRun>>;

    /// All runs owned by a user, most recently updated first.
    async fn list_runs_for_user(&self, user_id: &UserId) -> ZoneOptResult<Vec<OptimizationRun>>;

    /// Remove a project's run. Returns whether one existed.
    async fn delete_run(&self, project_id: &ProjectId) -> ZoneOptResult<bool>;

    /// Number of stored runs.
    async fn count(&self) -> ZoneOptResult<usize>;
}

/// Apply upsert semantics: identity and creation time come from the existing
/// record, everything else from the incoming one.
pub fn merge_for_upsert(
    existing: Option<&OptimizationRun>,
    incoming: &OptimizationRun,
) -> OptimizationRun {
    let mut merged = incoming.clone();
    if let Some(prior) = existing {
        merged.run_id = prior.run_id;
        merged.created_at = prior.created_at;
    }
    merged.updated_at = chrono::Utc::now();
    merged
}

fn sort_most_recent_first(runs: &mut [OptimizationRun]) {
    runs.sort_by(|a, b| b.updated_at.cmp(&a.updated_at));
}

// ============================================================================
// IN-MEMORY STORE
// ============================================================================

/// In-memory store, used for tests and single-process deployments.
#[derive(Debug, Default, Clone)]
pub struct InMemoryRunStore {
    runs: Arc<RwLock<HashMap<ProjectId, OptimizationRun>>>,
}

impl InMemoryRunStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Clear all stored data.
    pub fn clear(&self) -> ZoneOptResult<()> {
        self.runs
            .write()
            .map_err(|_| StorageError::LockPoisoned)?
            .clear();
        Ok(())
    }
}

#[async_trait]
impl RunStore for InMemoryRunStore {
    async fn upsert_run(&self, run: &OptimizationRun) -> ZoneOptResult<OptimizationRun> {
        let mut runs = self.runs.write().map_err(|_| StorageError::LockPoisoned)?;
        let stored = merge_for_upsert(runs.get(&run.project_id), run);
        runs.insert(stored.project_id.clone(), stored.clone());
        tracing::debug!(project_id = %stored.project_id, run_id = %stored.run_id, "Run upserted (memory)");
        Ok(stored)
    }

    async fn get_run(&self, project_id: &ProjectId) -> ZoneOptResult<Option<OptimizationRun>> {
        let runs = self.runs.read().map_err(|_| StorageError::LockPoisoned)?;
        Ok(runs.get(project_id).cloned())
    }

    async fn list_runs_for_user(&self, user_id: &UserId) -> ZoneOptResult<Vec<OptimizationRun>> {
        let runs = self.runs.read().map_err(|_| StorageError::LockPoisoned)?;
        let mut owned: Vec<OptimizationRun> = runs
            .values()
            .filter(|r| &r.user_id == user_id)
            .cloned()
            .collect();
        sort_most_recent_first(&mut owned);
        Ok(owned)
    }

    async fn delete_run(&self, project_id: &ProjectId) -> ZoneOptResult<bool> {
        let mut runs = self.runs.write().map_err(|_| StorageError::LockPoisoned)?;
        Ok(runs.remove(project_id).is_some())
    }

    async fn count(&self) -> ZoneOptResult<usize> {
        let runs = self.runs.read().map_err(|_| StorageError::LockPoisoned)?;
        Ok(runs.len())
    }
}

// ============================================================================
// TEST FIXTURES
// ============================================================================
