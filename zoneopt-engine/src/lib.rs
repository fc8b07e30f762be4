//! ZoneOpt Engine - External Optimizer Orchestration
//!
//! Everything between a validated run request and the figures that get
//! persisted: finding the elevation raster, running the optimization engine
//! as a subprocess, recovering its JSON result from noisy output, and
//! deriving statistics and polygons. Road network generation is best-effort.

pub mod invoker;
pub mod locator;
pub mod network;
pub mod output;
pub mod parser;
pub mod process;
pub mod transform;

pub use invoker::{
    write_side_channel, EngineCommand, EngineInvoker, DEFAULT_ENGINE_TIMEOUT, DEFAULT_INTERPRETERS,
};
pub use locator::{
    is_raster_candidate, locate_raster, FsProbe, LocatorConfig, LocatorContext, PathProbe,
    ProbeEntry, RASTER_EXTENSIONS, RASTER_KEYWORDS, UPLOAD_PREFIX,
};
pub use network::{
    road_network_from_document, NetworkInvoker, NetworkUnavailable, DEFAULT_NETWORK_TIMEOUT,
};
pub use output::{derive_distribution, EngineReport, UNKNOWN_METHOD};
pub use parser::{recover_document, Recovered, RecoveryStrategy, PREVIEW_CHARS};
pub use process::{run_captured, CapturedOutput, ProcessSpec};
pub use transform::{
    convergence, fitness_score, land_use_color, synthesize_polygons, transform, zone_statistics,
    TransformedResult, DEFAULT_CONVERGENCE,
};
