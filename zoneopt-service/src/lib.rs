//! ZoneOpt Service - Optimization Run Orchestration
//!
//! Wires the engine crate and a run store into a service that executes
//! optimization runs, plus the configuration, telemetry and error surface
//! used by the `zoneopt` binary.

pub mod config;
pub mod db;
pub mod error;
pub mod service;
pub mod telemetry;

// Re-export commonly used types
pub use config::{
    ConfigError, EngineConfig, LmdbConfig, NetworkConfig, ServiceConfig, StorageBackend,
    StorageConfig,
};
pub use db::{DbConfig, PgRunStore};
pub use error::{ErrorCode, ServiceError, ServiceResult};
pub use service::{open_persistent_store, open_store, OptimizationService};
pub use telemetry::{init_tracing, LogFormat, DEFAULT_FILTER};
