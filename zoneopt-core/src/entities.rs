//! Core entity structures

use crate::{
    LandUse, PolygonId, ProjectId, RoadDensity, RunId, RunParameters, RunStatus, Timestamp,
    UserId, ZoningPolygons,
};
use serde::{Deserialize, Deserializer, Serialize};
use serde_json::Value;
use std::collections::BTreeMap;
use std::path::PathBuf;

// ============================================================================
// CELL ASSIGNMENT
// ============================================================================

/// One grid cell with the land use the engine assigned to it.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CellAssignment {
    #[serde(deserialize_with = "string_or_number")]
    pub cell_id: String,
    pub lon: f64,
    pub lat: f64,
    pub land_use: LandUse,
    pub suitability: f64,
    #[serde(default)]
    pub slope: f64,
}

/// Engines emit cell ids as either integers or strings.
fn string_or_number<'de, D>(deserializer: D) -> Result<String, D::Error>
where
    D: Deserializer<'de>,
{
    match Value::deserialize(deserializer)? {
        Value::String(s) => Ok(s),
        Value::Number(n) => Ok(n.to_string()),
        other => Err(serde::de::Error::custom(format!(
            "cell_id must be a string or number, got {}",
            other
        ))),
    }
}

// ============================================================================
// ZONE STATISTICS
// ============================================================================

/// Aggregate figures for one land-use category.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ZoneStatistic {
    pub land_use: LandUse,
    pub cell_count: u64,
    /// Share of all cells, in percent (0–100).
    pub percentage: f64,
    pub mean_suitability: f64,
    pub mean_slope: f64,
}

// ============================================================================
// CONVERGENCE
// ============================================================================

/// How one requested category fared against its target.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CategoryConvergence {
    pub target_share: f64,
    pub actual_share: f64,
    pub score: f64,
}

/// Convergence summary of a run.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ConvergenceInfo {
    /// 0–1, where 1 means realized proportions exactly match targets.
    pub score: f64,
    pub targets_supplied: bool,
    #[serde(default, skip_serializing_if = "BTreeMap::is_empty")]
    pub categories: BTreeMap<LandUse, CategoryConvergence>,
}

// ============================================================================
// RASTER REFERENCE
// ============================================================================

/// Search stage that produced a resolved raster.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RasterSource {
    /// The reference was already an existing absolute path.
    Absolute,
    /// Found under one of the upload storage roots.
    UploadRoot,
    /// Resolved against the service root.
    ServiceRelative,
    /// Discovered by scanning output directories.
    Discovered,
    /// A fixed fallback sample file.
    Fallback,
}

/// A concrete raster file for one invocation. Never persisted.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RasterReference {
    pub logical: String,
    pub resolved: PathBuf,
    pub source: RasterSource,
}

// ============================================================================
// ROAD NETWORK
// ============================================================================

/// Road network derived from a zoning result by the secondary generator.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RoadNetwork {
    pub density: RoadDensity,
    /// GeoJSON as produced by the generator.
    pub roads: Value,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub total_length_km: Option<f64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub segment_count: Option<u64>,
}

// ============================================================================
// OPTIMIZATION RUN
// ============================================================================

/// The persisted record of the latest optimization for a project.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct OptimizationRun {
    pub run_id: RunId,
    pub project_id: ProjectId,
    pub user_id: UserId,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub polygon_id: Option<PolygonId>,
    pub status: RunStatus,
    pub parameters: RunParameters,
    pub zoning_polygons: ZoningPolygons,
    /// Statistics block exactly as the engine reported it.
    pub statistics: Value,
    pub fitness_score: f64,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub generations: Option<u32>,
    pub convergence_info: ConvergenceInfo,
    pub zone_statistics: BTreeMap<LandUse, ZoneStatistic>,
    pub assignments: Vec<CellAssignment>,
    pub land_use_distribution: BTreeMap<LandUse, u64>,
    pub total_cells: u64,
    pub method: String,
    pub road_network: Option<RoadNetwork>,
    /// Zone statistics as an ordered list, for consumers that iterate zones.
    pub zones: Vec<ZoneStatistic>,
    /// Full structured document recovered from the engine.
    pub raw_output: Value,
    pub created_at: Timestamp,
    pub updated_at: Timestamp,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub completed_at: Option<Timestamp>,
}

impl OptimizationRun {
    /// Convergence score shortcut.
    pub fn convergence_score(&self) -> f64 {
        self.convergence_info.score
    }
}
