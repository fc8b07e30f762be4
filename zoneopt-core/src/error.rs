//! Error types for ZoneOpt operations

use crate::ProjectId;
use std::path::PathBuf;
use thiserror::Error;

/// Raster resolution errors.
#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum RasterError {
    #[error(
        "Elevation raster not found for reference '{reference}' ({} locations checked); run terrain analysis first",
        checked.len()
    )]
    NotFound {
        reference: String,
        checked: Vec<PathBuf>,
    },
}

/// External engine process errors.
#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum EngineError {
    #[error("Engine script not found: {}", path.display())]
    ScriptMissing { path: PathBuf },

    #[error("Failed to launch {program}: {reason}")]
    LaunchFailed { program: String, reason: String },

    #[error("Engine terminated by signal {}", signal.map(|s| s.to_string()).unwrap_or_else(|| "unknown".to_string()))]
    Signaled { signal: Option<i32> },

    #[error("Engine exited with code {code} and produced no output: {stderr}")]
    ExitedWithoutOutput { code: i32, stderr: String },

    #[error("Engine timed out after {after_secs}s")]
    TimedOut { after_secs: u64 },

    #[error("Engine reported failure: {message}")]
    Reported { message: String },

    #[error("Failed to prepare side-channel file: {reason}")]
    SideChannel { reason: String },

    #[error("Engine I/O failed: {reason}")]
    Io { reason: String },
}

/// Errors recovering a structured result from captured engine output.
#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum OutputError {
    #[error("No structured result could be recovered from engine output: {preview}")]
    Unrecoverable { preview: String },

    #[error("Engine result is missing required field '{field}'")]
    MissingField { field: String },

    #[error("Engine result field '{field}' is malformed: {reason}")]
    MalformedField { field: String, reason: String },
}

/// Run persistence errors.
#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum StorageError {
    #[error("Upsert failed for project {project_id}: {reason}")]
    UpsertFailed { project_id: ProjectId, reason: String },

    #[error("Read failed: {reason}")]
    ReadFailed { reason: String },

    #[error("Delete failed for project {project_id}: {reason}")]
    DeleteFailed { project_id: ProjectId, reason: String },

    #[error("Storage backend unavailable: {reason}")]
    Unavailable { reason: String },

    #[error("Storage lock poisoned")]
    LockPoisoned,
}

/// Validation errors.
#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum ValidationError {
    #[error("Required field missing: {field}")]
    RequiredFieldMissing { field: String },

    #[error("Invalid value for {field}: {reason}")]
    InvalidValue { field: String, reason: String },

    #[error("Run parameters rejected: {}", errors.join("; "))]
    Rejected { errors: Vec<String> },
}

/// Master error type for all ZoneOpt errors.
#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum ZoneOptError {
    #[error("Raster error: {0}")]
    Raster(#[from] RasterError),

    #[error("Engine error: {0}")]
    Engine(#[from] EngineError),

    #[error("Output error: {0}")]
    Output(#[from] OutputError),

    #[error("Storage error: {0}")]
    Storage(#[from] StorageError),

    #[error("Validation error: {0}")]
    Validation(#[from] ValidationError),
}

impl ZoneOptError {
    /// Machine-readable failure kind surfaced to callers.
    pub fn kind(&self) -> &'static str {
        match self {
            ZoneOptError::Raster(_) => "RasterNotFound",
            ZoneOptError::Engine(EngineError::ScriptMissing { .. }) => "ScriptMissing",
            ZoneOptError::Engine(_) => "EngineError",
            ZoneOptError::Output(_) => "OutputParseError",
            ZoneOptError::Storage(_) => "PersistenceError",
            ZoneOptError::Validation(_) => "InvalidInput",
        }
    }
}

/// Result type alias for ZoneOpt operations.
pub type ZoneOptResult<T> = Result<T, ZoneOptError>;

// =============================================================================
// TESTS
// =============================================================================
