//! PostgreSQL Run Store
//!
//! Connection pooling via deadpool-postgres. Each project has exactly one
//! row in `zoneopt_optimization_runs`; writes go through
//! `INSERT ... ON CONFLICT (project_id) DO UPDATE` so a second run for the
//! same project replaces the first in place.

use async_trait::async_trait;
use deadpool_postgres::{Config, ManagerConfig, Pool, PoolConfig, RecyclingMethod, Runtime};
use serde::{Deserialize, Serialize};
use std::time::Duration;
use tokio_postgres::{NoTls, Row};
use zoneopt_core::{
    OptimizationRun, ProjectId, RunId, StorageError, Timestamp, UserId, ZoneOptResult,
};
use zoneopt_storage::RunStore;

use crate::config::{env_parse, ConfigError};

// ============================================================================
// CONNECTION POOL CONFIGURATION
// ============================================================================

/// Database connection pool configuration.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct DbConfig {
    /// PostgreSQL host
    pub host: String,
    /// PostgreSQL port
    pub port: u16,
    /// Database name
    pub dbname: String,
    /// Database user
    pub user: String,
    /// Database password
    pub password: String,
    /// Maximum pool size
    pub max_size: usize,
    /// Seconds to wait for a pooled connection
    pub timeout_secs: u64,
}

impl Default for DbConfig {
    fn default() -> Self {
        Self {
            host: "localhost".to_string(),
            port: 5432,
            dbname: "zoneopt".to_string(),
            user: "postgres".to_string(),
            password: "".to_string(),
            max_size: 16,
            timeout_secs: 30,
        }
    }
}

impl DbConfig {
    /// Create a new database configuration from environment variables.
    pub fn from_env() -> Result<Self, ConfigError> {
        let mut config = Self::default();
        config.apply_overrides(|key| std::env::var(key).ok())?;
        Ok(config)
    }

    /// Overlay `ZONEOPT_DB_*` values from `lookup`.
    pub fn apply_overrides(
        &mut self,
        lookup: impl Fn(&str) -> Option<String>,
    ) -> Result<(), ConfigError> {
        if let Some(host) = lookup("ZONEOPT_DB_HOST") {
            self.host = host;
        }
        if let Some(port) = env_parse(&lookup, "ZONEOPT_DB_PORT", "storage.postgres.port")? {
            self.port = port;
        }
        if let Some(dbname) = lookup("ZONEOPT_DB_NAME") {
            self.dbname = dbname;
        }
        if let Some(user) = lookup("ZONEOPT_DB_USER") {
            self.user = user;
        }
        if let Some(password) = lookup("ZONEOPT_DB_PASSWORD") {
            self.password = password;
        }
        if let Some(size) =
            env_parse(&lookup, "ZONEOPT_DB_POOL_SIZE", "storage.postgres.max_size")?
        {
            self.max_size = size;
        }
        if let Some(secs) =
            env_parse(&lookup, "ZONEOPT_DB_TIMEOUT", "storage.postgres.timeout_secs")?
        {
            self.timeout_secs = secs;
        }
        Ok(())
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.host.trim().is_empty() {
            return Err(ConfigError::InvalidValue {
                field: "storage.postgres.host",
                reason: "must not be empty".to_string(),
            });
        }
        if self.dbname.trim().is_empty() {
            return Err(ConfigError::InvalidValue {
                field: "storage.postgres.dbname",
                reason: "must not be empty".to_string(),
            });
        }
        if self.max_size == 0 {
            return Err(ConfigError::InvalidValue {
                field: "storage.postgres.max_size",
                reason: "must be > 0".to_string(),
            });
        }
        Ok(())
    }

    /// Create a connection pool from this configuration.
    pub fn create_pool(&self) -> ZoneOptResult<Pool> {
        let mut cfg = Config::new();
        cfg.host = Some(self.host.clone());
        cfg.port = Some(self.port);
        cfg.dbname = Some(self.dbname.clone());
        cfg.user = Some(self.user.clone());
        cfg.password = Some(self.password.clone());

        cfg.manager = Some(ManagerConfig {
            recycling_method: RecyclingMethod::Fast,
        });

        let mut pool_config = PoolConfig::new(self.max_size);
        pool_config.timeouts.wait = Some(Duration::from_secs(self.timeout_secs));
        cfg.pool = Some(pool_config);

        let pool = cfg
            .create_pool(Some(Runtime::Tokio1), NoTls)
            .map_err(|e| StorageError::Unavailable {
                reason: format!("Failed to create pool: {}", e),
            })?;

        Ok(pool)
    }
}

// ============================================================================
// SCHEMA
// ============================================================================

const SCHEMA: &str = "
CREATE TABLE IF NOT EXISTS zoneopt_optimization_runs (
    project_id        TEXT PRIMARY KEY,
    run_id            UUID NOT NULL,
    user_id           TEXT NOT NULL,
    polygon_id        TEXT,
    status            TEXT NOT NULL,
    fitness_score     DOUBLE PRECISION NOT NULL,
    convergence_score DOUBLE PRECISION NOT NULL,
    total_cells       BIGINT NOT NULL,
    method            TEXT NOT NULL,
    record            JSONB NOT NULL,
    created_at        TIMESTAMPTZ NOT NULL,
    updated_at        TIMESTAMPTZ NOT NULL
);
CREATE INDEX IF NOT EXISTS zoneopt_optimization_runs_user_idx
    ON zoneopt_optimization_runs (user_id, updated_at DESC);
";

const UPSERT: &str = "
INSERT INTO zoneopt_optimization_runs (
    project_id, run_id, user_id, polygon_id, status, fitness_score,
    convergence_score, total_cells, method, record, created_at, updated_at
) VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9, $10, $11, now())
ON CONFLICT (project_id) DO UPDATE SET
    user_id = EXCLUDED.user_id,
    polygon_id = EXCLUDED.polygon_id,
    status = EXCLUDED.status,
    fitness_score = EXCLUDED.fitness_score,
    convergence_score = EXCLUDED.convergence_score,
    total_cells = EXCLUDED.total_cells,
    method = EXCLUDED.method,
    record = EXCLUDED.record,
    updated_at = now()
RETURNING run_id, created_at, updated_at
";

const SELECT_COLUMNS: &str = "SELECT run_id, created_at, updated_at, record FROM zoneopt_optimization_runs";

// ============================================================================
// STORE
// ============================================================================

/// Run store backed by PostgreSQL.
#[derive(Clone)]
pub struct PgRunStore {
    pool: Pool,
}

impl PgRunStore {
    pub fn new(pool: Pool) -> Self {
        Self { pool }
    }

    /// Create a store from configuration. Does not touch the database.
    pub fn from_config(config: &DbConfig) -> ZoneOptResult<Self> {
        Ok(Self::new(config.create_pool()?))
    }

    /// Create the runs table and index if they do not exist.
    pub async fn ensure_schema(&self) -> ZoneOptResult<()> {
        let conn = self.get_conn().await?;
        conn.batch_execute(SCHEMA).await.map_err(unavailable)?;
        tracing::info!("Run table ready");
        Ok(())
    }

    /// Get the current pool size for observability.
    pub fn pool_size(&self) -> usize {
        self.pool.status().size
    }

    async fn get_conn(&self) -> ZoneOptResult<deadpool_postgres::Object> {
        self.pool.get().await.map_err(|e| {
            tracing::error!("Connection pool error: {:?}", e);
            StorageError::Unavailable {
                reason: format!("Failed to acquire database connection: {}", e),
            }
            .into()
        })
    }
}

fn unavailable(err: tokio_postgres::Error) -> StorageError {
    StorageError::Unavailable {
        reason: err.to_string(),
    }
}

fn read_failed(err: impl std::fmt::Display) -> StorageError {
    StorageError::ReadFailed {
        reason: err.to_string(),
    }
}

/// Rebuild a run from its JSON record. Identity and timestamps come from
/// the columns, which the database maintains.
fn run_from_row(row: &Row) -> ZoneOptResult<OptimizationRun> {
    let run_id: RunId = row.try_get("run_id").map_err(read_failed)?;
    let created_at: Timestamp = row.try_get("created_at").map_err(read_failed)?;
    let updated_at: Timestamp = row.try_get("updated_at").map_err(read_failed)?;
    let record: serde_json::Value = row.try_get("record").map_err(read_failed)?;

    let mut run: OptimizationRun = serde_json::from_value(record).map_err(read_failed)?;
    run.run_id = run_id;
    run.created_at = created_at;
    run.updated_at = updated_at;
    Ok(run)
}

#[async_trait]
impl RunStore for PgRunStore {
    async fn upsert_run(&self, run: &OptimizationRun) -> ZoneOptResult<OptimizationRun> {
        let upsert_failed = |reason: String| StorageError::UpsertFailed {
            project_id: run.project_id.clone(),
            reason,
        };

        let record = serde_json::to_value(run).map_err(|e| upsert_failed(e.to_string()))?;
        let conn = self.get_conn().await?;
        let row = conn
            .query_one(
                UPSERT,
                &[
                    &run.project_id.as_str(),
                    &run.run_id,
                    &run.user_id.as_str(),
                    &run.polygon_id.as_ref().map(|p| p.as_str()),
                    &run.status.as_db_str(),
                    &run.fitness_score,
                    &run.convergence_score(),
                    &(run.total_cells as i64),
                    &run.method,
                    &record,
                    &run.created_at,
                ],
            )
            .await
            .map_err(|e| upsert_failed(e.to_string()))?;

        let mut stored = run.clone();
        stored.run_id = row.try_get("run_id").map_err(read_failed)?;
        stored.created_at = row.try_get("created_at").map_err(read_failed)?;
        stored.updated_at = row.try_get("updated_at").map_err(read_failed)?;

        tracing::debug!(project_id = %stored.project_id, run_id = %stored.run_id, "Run upserted (postgres)");
        Ok(stored)
    }

    async fn get_run(&self, project_id: &ProjectId) -> ZoneOptResult<Option<OptimizationRun>> {
        let conn = self.get_conn().await?;
        let query = format!("{} WHERE project_id = $1", SELECT_COLUMNS);
        let row = conn
            .query_opt(query.as_str(), &[&project_id.as_str()])
            .await
            .map_err(read_failed)?;
        row.as_ref().map(run_from_row).transpose()
    }

    async fn list_runs_for_user(&self, user_id: &UserId) -> ZoneOptResult<Vec<OptimizationRun>> {
        let conn = self.get_conn().await?;
        let query = format!(
            "{} WHERE user_id = $1 ORDER BY updated_at DESC",
            SELECT_COLUMNS
        );
        let rows = conn
            .query(query.as_str(), &[&user_id.as_str()])
            .await
            .map_err(read_failed)?;
        rows.iter().map(run_from_row).collect()
    }

    async fn delete_run(&self, project_id: &ProjectId) -> ZoneOptResult<bool> {
        let conn = self.get_conn().await?;
        let deleted = conn
            .execute(
                "DELETE FROM zoneopt_optimization_runs WHERE project_id = $1",
                &[&project_id.as_str()],
            )
            .await
            .map_err(|e| StorageError::DeleteFailed {
                project_id: project_id.clone(),
                reason: e.to_string(),
            })?;
        Ok(deleted > 0)
    }

    async fn count(&self) -> ZoneOptResult<usize> {
        let conn = self.get_conn().await?;
        let row = conn
            .query_one("SELECT COUNT(*) FROM zoneopt_optimization_runs", &[])
            .await
            .map_err(read_failed)?;
        let count: i64 = row.try_get(0).map_err(read_failed)?;
        Ok(count as usize)
    }
}
