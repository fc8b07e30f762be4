//! Error Types for the ZoneOpt service
//!
//! Every failure that reaches a caller is a [`ServiceError`]: a
//! machine-readable [`ErrorCode`], a human-readable message, and optional
//! structured details (for example the locations a raster search checked).

use serde::{Deserialize, Serialize};
use std::fmt;
use zoneopt_core::{EngineError, RasterError, ZoneOptError};
use zoneopt_engine::NetworkUnavailable;

use crate::config::ConfigError;

// ============================================================================
// ERROR CODE ENUM
// ============================================================================

/// Failure categories surfaced to callers.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum ErrorCode {
    /// Request failed validation before any work started
    InvalidInput,

    /// No elevation raster could be found for the request
    RasterNotFound,

    /// Engine program or script is not installed
    ScriptMissing,

    /// Engine could not run or reported failure
    EngineError,

    /// Engine output held no recoverable result
    OutputParseError,

    /// Road network generation failed. Logged, never returned from a run.
    NetworkGenerationFailure,

    /// Run could not be persisted or read back
    PersistenceError,

    /// Requested run does not exist
    NotFound,

    /// Service configuration is invalid
    ConfigError,

    /// Unexpected internal failure
    InternalError,
}

impl ErrorCode {
    /// Get the default message for this error code.
    pub fn default_message(&self) -> &'static str {
        match self {
            ErrorCode::InvalidInput => "Invalid run request",
            ErrorCode::RasterNotFound => {
                "Elevation raster not found; run terrain analysis first"
            }
            ErrorCode::ScriptMissing => "Optimization engine is not installed",
            ErrorCode::EngineError => "Optimization engine failed",
            ErrorCode::OutputParseError => "Optimization engine output could not be read",
            ErrorCode::NetworkGenerationFailure => "Road network generation failed",
            ErrorCode::PersistenceError => "Optimization run could not be stored",
            ErrorCode::NotFound => "Optimization run not found",
            ErrorCode::ConfigError => "Invalid service configuration",
            ErrorCode::InternalError => "Internal error",
        }
    }

    /// Process exit code used by the command-line front end.
    pub fn exit_code(&self) -> u8 {
        match self {
            ErrorCode::InvalidInput => 2,
            ErrorCode::ConfigError => 3,
            ErrorCode::RasterNotFound | ErrorCode::NotFound => 4,
            ErrorCode::ScriptMissing => 5,
            ErrorCode::EngineError
            | ErrorCode::OutputParseError
            | ErrorCode::NetworkGenerationFailure => 6,
            ErrorCode::PersistenceError => 7,
            ErrorCode::InternalError => 1,
        }
    }
}

impl fmt::Display for ErrorCode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            ErrorCode::InvalidInput => "INVALID_INPUT",
            ErrorCode::RasterNotFound => "RASTER_NOT_FOUND",
            ErrorCode::ScriptMissing => "SCRIPT_MISSING",
            ErrorCode::EngineError => "ENGINE_ERROR",
            ErrorCode::OutputParseError => "OUTPUT_PARSE_ERROR",
            ErrorCode::NetworkGenerationFailure => "NETWORK_GENERATION_FAILURE",
            ErrorCode::PersistenceError => "PERSISTENCE_ERROR",
            ErrorCode::NotFound => "NOT_FOUND",
            ErrorCode::ConfigError => "CONFIG_ERROR",
            ErrorCode::InternalError => "INTERNAL_ERROR",
        };
        write!(f, "{}", s)
    }
}

// ============================================================================
// SERVICE ERROR
// ============================================================================

/// Structured failure returned to callers.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ServiceError {
    /// Machine-readable error code
    pub code: ErrorCode,

    /// Human-readable error message
    pub message: String,

    /// Optional additional details
    #[serde(skip_serializing_if = "Option::is_none")]
    pub details: Option<serde_json::Value>,
}

impl ServiceError {
    /// Create a new error with the given code and message.
    pub fn new(code: ErrorCode, message: impl Into<String>) -> Self {
        Self {
            code,
            message: message.into(),
            details: None,
        }
    }

    /// Create a new error with the given code, using the default message.
    pub fn from_code(code: ErrorCode) -> Self {
        Self::new(code, code.default_message())
    }

    /// Add additional details to the error.
    pub fn with_details(mut self, details: serde_json::Value) -> Self {
        self.details = Some(details);
        self
    }

    pub fn invalid_input(message: impl Into<String>) -> Self {
        Self::new(ErrorCode::InvalidInput, message)
    }

    pub fn not_found(message: impl Into<String>) -> Self {
        Self::new(ErrorCode::NotFound, message)
    }

    pub fn config_error(message: impl Into<String>) -> Self {
        Self::new(ErrorCode::ConfigError, message)
    }

    pub fn internal_error(message: impl Into<String>) -> Self {
        Self::new(ErrorCode::InternalError, message)
    }

    pub fn persistence_error(message: impl Into<String>) -> Self {
        Self::new(ErrorCode::PersistenceError, message)
    }
}

impl fmt::Display for ServiceError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}: {}", self.code, self.message)
    }
}

impl std::error::Error for ServiceError {}

// ============================================================================
// CONVERSIONS
// ============================================================================

impl From<ZoneOptError> for ServiceError {
    fn from(err: ZoneOptError) -> Self {
        let message = err.to_string();
        match err {
            ZoneOptError::Raster(RasterError::NotFound { reference, checked }) => {
                let checked: Vec<String> =
                    checked.iter().map(|p| p.display().to_string()).collect();
                ServiceError::new(ErrorCode::RasterNotFound, message).with_details(
                    serde_json::json!({
                        "reference": reference,
                        "checkedLocations": checked,
                        "hint": "Run terrain analysis for this project first",
                    }),
                )
            }
            ZoneOptError::Engine(EngineError::ScriptMissing { path }) => {
                ServiceError::new(ErrorCode::ScriptMissing, message)
                    .with_details(serde_json::json!({ "path": path.display().to_string() }))
            }
            ZoneOptError::Engine(EngineError::ExitedWithoutOutput { code, stderr }) => {
                ServiceError::new(ErrorCode::EngineError, message)
                    .with_details(serde_json::json!({ "exitCode": code, "stderr": stderr }))
            }
            ZoneOptError::Engine(_) => ServiceError::new(ErrorCode::EngineError, message),
            ZoneOptError::Output(_) => ServiceError::new(ErrorCode::OutputParseError, message),
            ZoneOptError::Storage(_) => {
                tracing::error!(error = %message, "Persistence failure");
                ServiceError::new(ErrorCode::PersistenceError, message)
            }
            ZoneOptError::Validation(zoneopt_core::ValidationError::Rejected { errors }) => {
                ServiceError::new(ErrorCode::InvalidInput, message)
                    .with_details(serde_json::json!({ "errors": errors }))
            }
            ZoneOptError::Validation(_) => ServiceError::new(ErrorCode::InvalidInput, message),
        }
    }
}

macro_rules! impl_from_via_zoneopt {
    ($($source:ty),* $(,)?) => {
        $(
            impl From<$source> for ServiceError {
                fn from(err: $source) -> Self {
                    ServiceError::from(ZoneOptError::from(err))
                }
            }
        )*
    };
}

impl_from_via_zoneopt!(
    RasterError,
    EngineError,
    zoneopt_core::OutputError,
    zoneopt_core::StorageError,
    zoneopt_core::ValidationError,
);

impl From<NetworkUnavailable> for ServiceError {
    fn from(err: NetworkUnavailable) -> Self {
        ServiceError::new(ErrorCode::NetworkGenerationFailure, err.to_string())
    }
}

impl From<ConfigError> for ServiceError {
    fn from(err: ConfigError) -> Self {
        ServiceError::config_error(err.to_string())
    }
}

impl From<serde_json::Error> for ServiceError {
    fn from(err: serde_json::Error) -> Self {
        ServiceError::invalid_input(format!("Invalid JSON: {}", err))
    }
}

// ============================================================================
// RESULT TYPE ALIAS
// ============================================================================

/// Result type alias for service operations.
pub type ServiceResult<T> = Result<T, ServiceError>;
