//! ZoneOpt Core - Entity Types
//!
//! Data structures shared by every ZoneOpt crate: the persisted optimization
//! run, transient cell assignments, run parameters with their pre-flight
//! checks, and the error taxonomy. No I/O lives here.

pub mod entities;
pub mod enums;
pub mod error;
pub mod geometry;
pub mod identity;
pub mod params;

pub use entities::{
    CategoryConvergence, CellAssignment, ConvergenceInfo, OptimizationRun, RasterReference,
    RasterSource, RoadNetwork, ZoneStatistic,
};
pub use enums::{LandUse, RoadDensity, RunStatus, RunStatusParseError};
pub use error::{
    EngineError, OutputError, RasterError, StorageError, ValidationError, ZoneOptError,
    ZoneOptResult,
};
pub use geometry::{
    Boundary, PolygonGeometry, ZoneProperties, ZoningFeature, ZoningPolygons, METERS_PER_DEGREE,
};
pub use identity::{new_run_id, PolygonId, ProjectId, RunId, Timestamp, UserId};
pub use params::{
    RunParameters, RunRequest, TuningParameters, ValidationReport, DEFAULT_CELL_SIZE_M,
    MAX_RECOMMENDED_GENERATIONS, MAX_RECOMMENDED_POPULATION, RECOMMENDED_CELL_SIZE_M,
    TARGET_SUM_TOLERANCE,
};
