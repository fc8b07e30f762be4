//! Optimization Service
//!
//! Drives one run end to end: validate the request, locate the elevation
//! raster, run the engine, derive statistics and polygons, optionally add a
//! road network, then persist the completed record. A run is stored only
//! when every required step succeeded.

use std::sync::Arc;
use std::time::{Duration, Instant};

use tokio::task::JoinHandle;
use tracing::Instrument;
use zoneopt_core::{
    new_run_id, OptimizationRun, ProjectId, RasterReference, RoadNetwork, RunRequest, RunStatus,
    UserId, ValidationReport, ZoneOptError,
};
use zoneopt_engine::{
    locate_raster, transform, EngineCommand, EngineInvoker, EngineReport, FsProbe, LocatorConfig,
    LocatorContext, NetworkInvoker, NetworkUnavailable, PathProbe, TransformedResult,
    DEFAULT_INTERPRETERS,
};
use zoneopt_storage::{InMemoryRunStore, LmdbRunStore, RunStore};

use crate::config::{ServiceConfig, StorageBackend, StorageConfig};
use crate::db::PgRunStore;
use crate::error::{ServiceError, ServiceResult};

/// Orchestrates optimization runs against an engine and a run store.
#[derive(Clone)]
pub struct OptimizationService {
    engine: EngineInvoker,
    network: Option<NetworkInvoker>,
    locator: Arc<LocatorConfig>,
    probe: Arc<dyn PathProbe>,
    store: Arc<dyn RunStore>,
}

impl OptimizationService {
    pub fn new(engine: EngineInvoker, store: Arc<dyn RunStore>) -> Self {
        Self {
            engine,
            network: None,
            locator: Arc::new(LocatorConfig::default()),
            probe: Arc::new(FsProbe),
            store,
        }
    }

    pub fn with_network(mut self, network: NetworkInvoker) -> Self {
        self.network = Some(network);
        self
    }

    pub fn with_locator(mut self, locator: LocatorConfig) -> Self {
        self.locator = Arc::new(locator);
        self
    }

    pub fn with_probe(mut self, probe: Arc<dyn PathProbe>) -> Self {
        self.probe = probe;
        self
    }

    /// Build a service from configuration.
    ///
    /// The engine command is resolved here, once; a missing interpreter or
    /// script fails startup with `ScriptMissing`. The network command is
    /// only checked when a run asks for it.
    pub async fn from_config(config: &ServiceConfig) -> ServiceResult<Self> {
        let command = EngineCommand::resolve(
            config.engine.program.as_deref(),
            DEFAULT_INTERPRETERS,
            config.engine.script.clone(),
        )?;
        let mut engine = EngineInvoker::new(command, &config.output_dir)
            .with_timeout(Duration::from_secs(config.engine.timeout_secs));
        if let Some(dir) = &config.temp_dir {
            engine = engine.with_temp_dir(dir);
        }

        let store = open_store(&config.storage).await?;
        let mut service = Self::new(engine, store).with_locator(config.locator.clone());

        if config.network.is_enabled() {
            let program = config
                .network
                .program
                .clone()
                .unwrap_or_else(|| DEFAULT_INTERPRETERS[0].to_string());
            let command = EngineCommand::new(program, config.network.script.clone());
            tracing::info!(
                script = ?config.network.script,
                timeout_secs = config.network.timeout_secs,
                "Road network generation enabled"
            );
            service = service.with_network(
                NetworkInvoker::new(command, &config.output_dir)
                    .with_timeout(Duration::from_secs(config.network.timeout_secs)),
            );
        }
        Ok(service)
    }

    pub fn store(&self) -> &Arc<dyn RunStore> {
        &self.store
    }

    /// Pre-flight report for a request. Never runs the engine.
    pub fn validate(request: &RunRequest) -> ValidationReport {
        request.preflight()
    }

    /// Execute a run and return the persisted record.
    pub async fn run(&self, request: RunRequest) -> ServiceResult<OptimizationRun> {
        let started = Instant::now();
        match self.execute(&request).await {
            Ok(run) => {
                tracing::info!(
                    project_id = %run.project_id,
                    run_id = %run.run_id,
                    fitness_score = run.fitness_score,
                    convergence = run.convergence_score(),
                    total_cells = run.total_cells,
                    road_network = run.road_network.is_some(),
                    elapsed_ms = started.elapsed().as_millis() as u64,
                    "Optimization run completed"
                );
                Ok(run)
            }
            Err(err) => {
                tracing::warn!(
                    project_id = %request.project_id,
                    code = %err.code,
                    error = %err.message,
                    elapsed_ms = started.elapsed().as_millis() as u64,
                    "Optimization run failed"
                );
                Err(err)
            }
        }
    }

    /// Dispatch a run on its own task.
    pub fn spawn_run(self: &Arc<Self>, request: RunRequest) -> JoinHandle<ServiceResult<OptimizationRun>> {
        let service = Arc::clone(self);
        let span = tracing::info_span!("optimization_run", project_id = %request.project_id);
        tokio::spawn(async move { service.run(request).await }.instrument(span))
    }

    /// The stored run for a project.
    pub async fn latest_run(&self, project_id: &ProjectId) -> ServiceResult<OptimizationRun> {
        self.store
            .get_run(project_id)
            .await?
            .ok_or_else(|| {
                ServiceError::not_found(format!("No optimization run for project {}", project_id))
            })
    }

    pub async fn runs_for_user(&self, user_id: &UserId) -> ServiceResult<Vec<OptimizationRun>> {
        Ok(self.store.list_runs_for_user(user_id).await?)
    }

    /// Remove a project's run. Returns whether one existed.
    pub async fn delete_run(&self, project_id: &ProjectId) -> ServiceResult<bool> {
        let deleted = self.store.delete_run(project_id).await?;
        if deleted {
            tracing::info!(project_id = %project_id, "Optimization run deleted");
        }
        Ok(deleted)
    }

    async fn execute(&self, request: &RunRequest) -> ServiceResult<OptimizationRun> {
        let report = request.validate()?;
        for warning in &report.warnings {
            tracing::warn!(project_id = %request.project_id, warning = %warning, "Run parameter warning");
        }

        let raster = self.locate(request).await?;
        let engine_report = self.engine.optimize(request, &raster).await?;
        let result = transform(&engine_report, &request.parameters);
        if result.total_cells != engine_report.total_cells {
            tracing::warn!(
                project_id = %request.project_id,
                reported = engine_report.total_cells,
                assigned = result.total_cells,
                "Engine cell total disagrees with its assignments"
            );
        }

        let road_network = if request.generate_road_network {
            self.road_network(request, &raster, &engine_report, &result).await
        } else {
            None
        };

        let run = build_run(request, engine_report, result, road_network);
        Ok(self.store.upsert_run(&run).await?)
    }

    async fn locate(&self, request: &RunRequest) -> ServiceResult<RasterReference> {
        let reference = request.raster_path.clone().unwrap_or_default();
        let project_id = request.project_id.as_str().to_string();
        let polygon_id = request.polygon_id.as_ref().map(|p| p.as_str().to_string());
        let locator = Arc::clone(&self.locator);
        let probe = Arc::clone(&self.probe);

        let located = tokio::task::spawn_blocking(move || {
            let context = LocatorContext {
                project_id: Some(project_id.as_str()),
                polygon_id: polygon_id.as_deref(),
            };
            locate_raster(&reference, context, &locator, probe.as_ref())
        })
        .await
        .map_err(|e| ServiceError::internal_error(format!("Raster search task failed: {}", e)))?;

        Ok(located?)
    }

    /// Best-effort road network. Failures are logged and dropped.
    async fn road_network(
        &self,
        request: &RunRequest,
        raster: &RasterReference,
        report: &EngineReport,
        result: &TransformedResult,
    ) -> Option<RoadNetwork> {
        let outcome = match &self.network {
            Some(network) => network.generate(request, raster, report, result).await,
            None => Err(NetworkUnavailable::NotConfigured),
        };
        match outcome {
            Ok(network) => Some(network),
            Err(err) => {
                tracing::warn!(
                    project_id = %request.project_id,
                    error = %err,
                    "Road network unavailable; continuing without it"
                );
                None
            }
        }
    }
}

/// Open the configured run store without touching the engine.
pub async fn open_store(config: &StorageConfig) -> ServiceResult<Arc<dyn RunStore>> {
    let store: Arc<dyn RunStore> = match config.backend {
        StorageBackend::Memory => Arc::new(InMemoryRunStore::new()),
        StorageBackend::Lmdb => Arc::new(
            LmdbRunStore::open(&config.lmdb.path, config.lmdb.max_size_mb)
                .map_err(ZoneOptError::from)?,
        ),
        StorageBackend::Postgres => {
            let store = PgRunStore::from_config(&config.postgres)?;
            store.ensure_schema().await?;
            Arc::new(store)
        }
    };
    tracing::info!(backend = ?config.backend, "Run store ready");
    Ok(store)
}

/// Open a store that outlives this process, for reading back earlier runs.
///
/// The memory backend starts empty every time, so it is rejected.
pub async fn open_persistent_store(config: &StorageConfig) -> ServiceResult<Arc<dyn RunStore>> {
    if config.backend == StorageBackend::Memory {
        return Err(ServiceError::config_error(
            "The memory backend holds no runs from earlier invocations; set storage.backend to lmdb or postgres",
        ));
    }
    open_store(config).await
}

fn build_run(
    request: &RunRequest,
    report: EngineReport,
    result: TransformedResult,
    road_network: Option<RoadNetwork>,
) -> OptimizationRun {
    let now = chrono::Utc::now();
    OptimizationRun {
        run_id: new_run_id(),
        project_id: request.project_id.clone(),
        user_id: request.user_id.clone(),
        polygon_id: request.polygon_id.clone(),
        status: RunStatus::Completed,
        parameters: request.parameters.clone(),
        zoning_polygons: result.zoning_polygons,
        statistics: report.statistics,
        fitness_score: result.fitness_score,
        generations: report.generations.or_else(|| request.parameters.generations()),
        convergence_info: result.convergence_info,
        zone_statistics: result.zone_statistics,
        assignments: report.assignments,
        land_use_distribution: report.land_use_distribution,
        total_cells: result.total_cells,
        method: report.method,
        road_network,
        zones: result.zones,
        raw_output: report.raw,
        created_at: now,
        updated_at: now,
        completed_at: Some(now),
    }
}
