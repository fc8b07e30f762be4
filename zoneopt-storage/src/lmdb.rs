//! LMDB-backed run store.
//!
//! Uses the heed crate (Rust bindings for LMDB). Keys are the UTF-8 bytes of
//! the project id, values are the JSON-encoded run. An upsert reads the prior
//! record and writes the merged one inside a single write transaction, so a
//! reader never observes a half-applied replacement.

use std::path::Path;

use async_trait::async_trait;
use heed::types::Bytes;
use heed::{Database, Env, EnvOpenOptions};
use zoneopt_core::{OptimizationRun, ProjectId, StorageError, UserId, ZoneOptError, ZoneOptResult};

use crate::{merge_for_upsert, sort_most_recent_first, RunStore};

/// Error type for LMDB store operations.
#[derive(Debug, thiserror::Error)]
pub enum LmdbStoreError {
    /// Failed to open or create the LMDB environment.
    #[error("Failed to open LMDB environment: {0}")]
    EnvOpen(String),

    /// Failed to open the database within the environment.
    #[error("Failed to open database: {0}")]
    DbOpen(String),

    /// Transaction error.
    #[error("Transaction error: {0}")]
    Transaction(String),

    /// I/O error.
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
}

impl From<LmdbStoreError> for ZoneOptError {
    fn from(e: LmdbStoreError) -> Self {
        ZoneOptError::Storage(StorageError::Unavailable {
            reason: e.to_string(),
        })
    }
}

/// LMDB-backed persistence for optimization runs.
pub struct LmdbRunStore {
    env: Env,
    db: Database<Bytes, Bytes>,
}

impl LmdbRunStore {
    /// Open (or create) a store in `path`.
    ///
    /// # Arguments
    ///
    /// * `path` - Directory where LMDB files will be stored
    /// * `max_size_mb` - Maximum size of the database in megabytes
    pub fn open<P: AsRef<Path>>(path: P, max_size_mb: usize) -> Result<Self, LmdbStoreError> {
        std::fs::create_dir_all(&path)?;

        // SAFETY: the environment directory is owned by this store and is not
        // opened twice within the process.
        let env = unsafe {
            EnvOpenOptions::new()
                .map_size(max_size_mb * 1024 * 1024)
                .max_dbs(1)
                .open(path.as_ref())
        }
        .map_err(|e| LmdbStoreError::EnvOpen(e.to_string()))?;

        let mut wtxn = env
            .write_txn()
            .map_err(|e| LmdbStoreError::Transaction(e.to_string()))?;

        let db: Database<Bytes, Bytes> = env
            .create_database(&mut wtxn, None)
            .map_err(|e| LmdbStoreError::DbOpen(e.to_string()))?;

        wtxn.commit()
            .map_err(|e| LmdbStoreError::Transaction(e.to_string()))?;

        Ok(Self { env, db })
    }

    fn decode(bytes: &[u8]) -> ZoneOptResult<OptimizationRun> {
        serde_json::from_slice(bytes).map_err(|e| {
            StorageError::ReadFailed {
                reason: format!("corrupt run record: {}", e),
            }
            .into()
        })
    }

    fn read_failed(e: heed::Error) -> ZoneOptError {
        StorageError::ReadFailed {
            reason: e.to_string(),
        }
        .into()
    }
}

#[async_trait]
impl RunStore for LmdbRunStore {
    async fn upsert_run(&self, run: &OptimizationRun) -> ZoneOptResult<OptimizationRun> {
        let key = run.project_id.as_str().as_bytes();
        let upsert_failed = |reason: String| -> ZoneOptError {
            StorageError::UpsertFailed {
                project_id: run.project_id.clone(),
                reason,
            }
            .into()
        };

        let mut wtxn = self
            .env
            .write_txn()
            .map_err(|e| upsert_failed(e.to_string()))?;

        let existing = match self
            .db
            .get(&wtxn, key)
            .map_err(|e| upsert_failed(e.to_string()))?
        {
            Some(bytes) => Some(Self::decode(bytes)?),
            None => None,
        };

        let stored = merge_for_upsert(existing.as_ref(), run);
        let value = serde_json::to_vec(&stored).map_err(|e| upsert_failed(e.to_string()))?;

        self.db
            .put(&mut wtxn, key, &value)
            .map_err(|e| upsert_failed(e.to_string()))?;
        wtxn.commit().map_err(|e| upsert_failed(e.to_string()))?;

        tracing::debug!(
            project_id = %stored.project_id,
            run_id = %stored.run_id,
            replaced = existing.is_some(),
            "Run upserted (lmdb)"
        );
        Ok(stored)
    }

    async fn get_run(&self, project_id: &ProjectId) -> ZoneOptResult<Option<OptimizationRun>> {
        let rtxn = self.env.read_txn().map_err(Self::read_failed)?;
        match self
            .db
            .get(&rtxn, project_id.as_str().as_bytes())
            .map_err(Self::read_failed)?
        {
            Some(bytes) => Ok(Some(Self::decode(bytes)?)),
            None => Ok(None),
        }
    }

    async fn list_runs_for_user(&self, user_id: &UserId) -> ZoneOptResult<Vec<OptimizationRun>> {
        let rtxn = self.env.read_txn().map_err(Self::read_failed)?;
        let mut owned = Vec::new();
        for entry in self.db.iter(&rtxn).map_err(Self::read_failed)? {
            let (_, bytes) = entry.map_err(Self::read_failed)?;
            let run = Self::decode(bytes)?;
            if &run.user_id == user_id {
                owned.push(run);
            }
        }
        sort_most_recent_first(&mut owned);
        Ok(owned)
    }

    async fn delete_run(&self, project_id: &ProjectId) -> ZoneOptResult<bool> {
        let delete_failed = |e: heed::Error| -> ZoneOptError {
            StorageError::DeleteFailed {
                project_id: project_id.clone(),
                reason: e.to_string(),
            }
            .into()
        };

        let mut wtxn = self.env.write_txn().map_err(delete_failed)?;
        let deleted = self
            .db
            .delete(&mut wtxn, project_id.as_str().as_bytes())
            .map_err(delete_failed)?;
        wtxn.commit().map_err(delete_failed)?;
        Ok(deleted)
    }

    async fn count(&self) -> ZoneOptResult<usize> {
        let rtxn = self.env.read_txn().map_err(Self::read_failed)?;
        let len = self.db.len(&rtxn).map_err(Self::read_failed)?;
        Ok(len as usize)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::fixtures::run_for;
    use tempfile::TempDir;

    fn create_test_store() -> (LmdbRunStore, TempDir) {
        let temp_dir = TempDir::new().expect("TempDir creation should succeed");
        let store = LmdbRunStore::open(temp_dir.path(), 10).expect("store creation should succeed");
        (store, temp_dir)
    }

    #[tokio::test]
    async fn test_upsert_and_get() {
        let (store, _temp_dir) = create_test_store();
        let stored = store
            .upsert_run(&run_for("p1", "u1", 0.75))
            .await
            .expect("upsert should succeed");

        let loaded = store
            .get_run(&ProjectId::new("p1"))
            .await
            .expect("get should succeed")
            .expect("run should exist");
        assert_eq!(loaded, stored);
    }

    #[tokio::test]
    async fn test_second_upsert_supersedes_first() {
        let (store, _temp_dir) = create_test_store();
        let first = store.upsert_run(&run_for("p1", "u1", 0.5)).await.unwrap();

        let mut second = run_for("p1", "u1", 0.8);
        second.method = "nsga3".to_string();
        let stored = store.upsert_run(&second).await.unwrap();

        assert_eq!(store.count().await.unwrap(), 1);
        assert_eq!(stored.run_id, first.run_id);
        let loaded = store.get_run(&ProjectId::new("p1")).await.unwrap().unwrap();
        assert_eq!(loaded.fitness_score, 0.8);
        assert_eq!(loaded.method, "nsga3");
    }

    #[tokio::test]
    async fn test_list_and_delete() {
        let (store, _temp_dir) = create_test_store();
        store.upsert_run(&run_for("p1", "u1", 0.5)).await.unwrap();
        store.upsert_run(&run_for("p2", "u2", 0.5)).await.unwrap();

        let owned = store.list_runs_for_user(&UserId::new("u2")).await.unwrap();
        assert_eq!(owned.len(), 1);
        assert_eq!(owned[0].project_id, ProjectId::new("p2"));

        assert!(store.delete_run(&ProjectId::new("p2")).await.unwrap());
        assert_eq!(store.count().await.unwrap(), 1);
    }

    #[tokio::test]
    async fn test_reopen_keeps_runs() {
        let temp_dir = TempDir::new().unwrap();
        {
            let store = LmdbRunStore::open(temp_dir.path(), 10).unwrap();
            store.upsert_run(&run_for("p1", "u1", 0.5)).await.unwrap();
        }
        let store = LmdbRunStore::open(temp_dir.path(), 10).unwrap();
        assert!(store.get_run(&ProjectId::new("p1")).await.unwrap().is_some());
    }

    mod properties {
        use super::*;
        use proptest::prelude::*;
        use std::collections::HashSet;
        use zoneopt_core::{
            CellAssignment, LandUse, PolygonGeometry, ZoneProperties, ZoningFeature,
            ZoningPolygons, METERS_PER_DEGREE,
        };

        /// A run whose polygons and assignments sit at arbitrary coordinates.
        fn run_at(cells: &[(f64, f64, f64)]) -> OptimizationRun {
            let half_width = 100.0 / METERS_PER_DEGREE / 2.0;
            let mut run = run_for("p-geo", "u", 0.5);
            run.assignments = cells
                .iter()
                .enumerate()
                .map(|(i, (lon, lat, suitability))| CellAssignment {
                    cell_id: i.to_string(),
                    lon: *lon,
                    lat: *lat,
                    land_use: LandUse::Residential,
                    suitability: *suitability,
                    slope: lat.abs() / 7.0,
                })
                .collect();
            run.zoning_polygons = ZoningPolygons::new(
                run.assignments
                    .iter()
                    .map(|cell| {
                        ZoningFeature::new(
                            PolygonGeometry::square(cell.lon, cell.lat, half_width),
                            ZoneProperties {
                                cell_id: cell.cell_id.clone(),
                                land_use: cell.land_use.clone(),
                                suitability: cell.suitability,
                                slope: cell.slope,
                                color: "#FFD700".to_string(),
                                area_m2: 10_000.0,
                                area_ha: 1.0,
                            },
                        )
                    })
                    .collect(),
            );
            run.fitness_score = cells.iter().map(|c| c.2).sum::<f64>() / cells.len() as f64;
            run
        }

        proptest! {
            #![proptest_config(ProptestConfig::with_cases(16))]

            #[test]
            fn prop_one_record_per_project(projects in proptest::collection::vec(0u8..5, 1..20)) {
                let runtime = tokio::runtime::Builder::new_current_thread()
                    .build()
                    .map_err(|e| TestCaseError::fail(e.to_string()))?;
                let (store, _temp_dir) = create_test_store();
                runtime.block_on(async {
                    for p in &projects {
                        store.upsert_run(&run_for(&format!("p{}", p), "u", 0.5)).await.unwrap();
                    }
                });
                let distinct: HashSet<_> = projects.iter().collect();
                let count = runtime.block_on(store.count()).unwrap();
                prop_assert_eq!(count, distinct.len());
            }

            #[test]
            fn prop_stored_run_reads_back_unchanged(
                cells in proptest::collection::vec(
                    (-180.0f64..180.0, -85.0f64..85.0, 0.0f64..=1.0),
                    1..8,
                ),
            ) {
                let runtime = tokio::runtime::Builder::new_current_thread()
                    .build()
                    .map_err(|e| TestCaseError::fail(e.to_string()))?;
                let (store, _temp_dir) = create_test_store();
                let run = run_at(&cells);

                let stored = runtime.block_on(store.upsert_run(&run)).unwrap();
                let loaded = runtime
                    .block_on(store.get_run(&run.project_id))
                    .unwrap()
                    .unwrap();

                prop_assert_eq!(&loaded, &stored);
                let mut expected = run.clone();
                expected.updated_at = stored.updated_at;
                prop_assert_eq!(&loaded, &expected);
            }
        }
    }
}
