//! Run parameters, run requests and pre-flight validation.

use crate::{
    Boundary, LandUse, PolygonId, ProjectId, RoadDensity, UserId, ValidationError, ZoneOptResult,
};
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use std::collections::BTreeMap;

/// Default grid cell size in meters.
pub const DEFAULT_CELL_SIZE_M: f64 = 100.0;

/// Allowed deviation of the target sum from 1.0.
pub const TARGET_SUM_TOLERANCE: f64 = 0.01;

/// Cell sizes outside this range (meters) are accepted with a warning.
pub const RECOMMENDED_CELL_SIZE_M: (f64, f64) = (10.0, 1000.0);

/// Generation counts above this are accepted with a warning.
pub const MAX_RECOMMENDED_GENERATIONS: u32 = 1000;

/// Population sizes above this are accepted with a warning.
pub const MAX_RECOMMENDED_POPULATION: u32 = 200;

// ============================================================================
// PARAMETERS
// ============================================================================

/// Engine tuning parameters.
///
/// Only the two knobs the orchestrator reasons about are typed; anything else
/// is passed through to the engine as-is.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct TuningParameters {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub generations: Option<u32>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub population_size: Option<u32>,
    #[serde(flatten)]
    pub extra: Map<String, Value>,
}

impl TuningParameters {
    pub fn is_empty(&self) -> bool {
        self.generations.is_none() && self.population_size.is_none() && self.extra.is_empty()
    }
}

/// Parameters of one optimization run.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RunParameters {
    #[serde(default = "default_cell_size")]
    pub cell_size: f64,
    /// Land use → requested share of all cells (fractions summing to 1.0).
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub custom_targets: Option<BTreeMap<LandUse, f64>>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub constraints: Option<Value>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub optimization_params: Option<TuningParameters>,
}

fn default_cell_size() -> f64 {
    DEFAULT_CELL_SIZE_M
}

impl Default for RunParameters {
    fn default() -> Self {
        Self {
            cell_size: DEFAULT_CELL_SIZE_M,
            custom_targets: None,
            constraints: None,
            optimization_params: None,
        }
    }
}

impl RunParameters {
    /// Targets, if any were supplied and non-empty.
    pub fn targets(&self) -> Option<&BTreeMap<LandUse, f64>> {
        self.custom_targets.as_ref().filter(|t| !t.is_empty())
    }

    /// Requested generation count, if any.
    pub fn generations(&self) -> Option<u32> {
        self.optimization_params.as_ref().and_then(|p| p.generations)
    }

    /// Pre-flight check: never fails, reports every finding.
    pub fn preflight(&self) -> ValidationReport {
        let mut report = ValidationReport::default();

        if !self.cell_size.is_finite() || self.cell_size <= 0.0 {
            report.error(format!(
                "Cell size must be a positive number of meters, got {}",
                self.cell_size
            ));
        } else {
            let (min, max) = RECOMMENDED_CELL_SIZE_M;
            if self.cell_size < min || self.cell_size > max {
                report.warning(format!(
                    "Cell size {}m is outside the recommended range [{}, {}]m",
                    self.cell_size, min, max
                ));
            }
            report.info(format!("Cell size: {}m", self.cell_size));
        }

        match self.targets() {
            Some(targets) => {
                for (land_use, share) in targets {
                    if !share.is_finite() || *share < 0.0 || *share > 1.0 {
                        report.error(format!(
                            "Target for {} must be between 0 and 1, got {}",
                            land_use, share
                        ));
                    }
                }
                let sum: f64 = targets.values().sum();
                if (sum - 1.0).abs() > TARGET_SUM_TOLERANCE {
                    report.error(format!(
                        "Custom targets must sum to 1.0 (±{}), got {:.3}",
                        TARGET_SUM_TOLERANCE, sum
                    ));
                }
                let summary = targets
                    .iter()
                    .map(|(land_use, share)| format!("{} {:.0}%", land_use, share * 100.0))
                    .collect::<Vec<_>>()
                    .join(", ");
                report.info(format!("Custom targets: {}", summary));
            }
            None => report.info("No custom targets; engine defaults apply"),
        }

        if let Some(constraints) = &self.constraints {
            if !constraints.is_object() {
                report.error("Constraints must be a JSON object");
            }
        }

        if let Some(tuning) = &self.optimization_params {
            if let Some(generations) = tuning.generations {
                if generations > MAX_RECOMMENDED_GENERATIONS {
                    report.warning(format!(
                        "{} generations exceeds {}; the run may take a long time",
                        generations, MAX_RECOMMENDED_GENERATIONS
                    ));
                }
                report.info(format!("Generations: {}", generations));
            }
            if let Some(population) = tuning.population_size {
                if population > MAX_RECOMMENDED_POPULATION {
                    report.warning(format!(
                        "Population size {} exceeds {}; memory use will be high",
                        population, MAX_RECOMMENDED_POPULATION
                    ));
                }
                report.info(format!("Population size: {}", population));
            }
        }

        report
    }
}

// ============================================================================
// VALIDATION REPORT
// ============================================================================

/// Result of a pre-flight parameter check.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ValidationReport {
    pub is_valid: bool,
    pub errors: Vec<String>,
    pub warnings: Vec<String>,
    pub info: Vec<String>,
}

impl Default for ValidationReport {
    fn default() -> Self {
        Self {
            is_valid: true,
            errors: Vec::new(),
            warnings: Vec::new(),
            info: Vec::new(),
        }
    }
}

impl ValidationReport {
    fn error(&mut self, message: impl Into<String>) {
        self.is_valid = false;
        self.errors.push(message.into());
    }

    fn warning(&mut self, message: impl Into<String>) {
        self.warnings.push(message.into());
    }

    fn info(&mut self, message: impl Into<String>) {
        self.info.push(message.into());
    }

    /// Convert a failing report into a validation error.
    pub fn into_result(self) -> Result<Self, ValidationError> {
        if self.is_valid {
            Ok(self)
        } else {
            Err(ValidationError::Rejected {
                errors: self.errors,
            })
        }
    }
}

// ============================================================================
// RUN REQUEST
// ============================================================================

/// Everything a caller supplies to start an optimization run.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RunRequest {
    pub project_id: ProjectId,
    pub user_id: UserId,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub polygon_id: Option<PolygonId>,
    /// Logical elevation raster reference; empty means "discover one".
    #[serde(default)]
    pub raster_path: Option<String>,
    pub boundary: Boundary,
    /// Terrain statistics from an earlier analysis, forwarded to the engine.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub terrain_data: Option<Value>,
    #[serde(default)]
    pub parameters: RunParameters,
    #[serde(default)]
    pub generate_road_network: bool,
    #[serde(default)]
    pub road_density: RoadDensity,
    /// Overrides the configured engine timeout.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub timeout_secs: Option<u64>,
}

impl RunRequest {
    pub fn new(project_id: ProjectId, user_id: UserId, boundary: Boundary) -> Self {
        Self {
            project_id,
            user_id,
            polygon_id: None,
            raster_path: None,
            boundary,
            terrain_data: None,
            parameters: RunParameters::default(),
            generate_road_network: false,
            road_density: RoadDensity::default(),
            timeout_secs: None,
        }
    }

    /// Full pre-flight report for the request. Never fails; identifier and
    /// boundary problems are reported as errors alongside parameter findings.
    pub fn preflight(&self) -> ValidationReport {
        let mut report = ValidationReport::default();
        if self.project_id.is_blank() {
            report.error("projectId is required");
        }
        if self.user_id.is_blank() {
            report.error("userId is required");
        }
        if self.timeout_secs == Some(0) {
            report.error("timeoutSecs must be positive");
        }
        if let Err(e) = self.boundary.validate() {
            report.error(e.to_string());
        }

        let parameters = self.parameters.preflight();
        if !parameters.is_valid {
            report.is_valid = false;
        }
        report.errors.extend(parameters.errors);
        report.warnings.extend(parameters.warnings);
        report.info.extend(parameters.info);
        report
    }

    /// Hard validation before any work starts. Warnings are returned, errors
    /// abort.
    pub fn validate(&self) -> ZoneOptResult<ValidationReport> {
        if self.project_id.is_blank() {
            return Err(ValidationError::RequiredFieldMissing {
                field: "projectId".to_string(),
            }
            .into());
        }
        if self.user_id.is_blank() {
            return Err(ValidationError::RequiredFieldMissing {
                field: "userId".to_string(),
            }
            .into());
        }
        if self.timeout_secs == Some(0) {
            return Err(ValidationError::InvalidValue {
                field: "timeoutSecs".to_string(),
                reason: "must be positive".to_string(),
            }
            .into());
        }
        self.boundary.validate()?;
        Ok(self.parameters.preflight().into_result()?)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn targets(pairs: &[(LandUse, f64)]) -> BTreeMap<LandUse, f64> {
        pairs.iter().cloned().collect()
    }

    fn boundary() -> Boundary {
        Boundary::new(json!({
            "type": "Polygon",
            "coordinates": [[[0.0, 0.0], [0.01, 0.0], [0.01, 0.01], [0.0, 0.01], [0.0, 0.0]]]
        }))
    }

    #[test]
    fn test_preflight_defaults_are_valid() {
        let report = RunParameters::default().preflight();
        assert!(report.is_valid);
        assert!(report.errors.is_empty());
        assert!(report.warnings.is_empty());
        assert!(!report.info.is_empty());
    }

    #[test]
    fn test_targets_must_sum_to_one() {
        let params = RunParameters {
            custom_targets: Some(targets(&[
                (LandUse::Residential, 0.5),
                (LandUse::GreenSpace, 0.3),
            ])),
            ..Default::default()
        };
        let report = params.preflight();
        assert!(!report.is_valid);
        assert!(report.errors[0].contains("sum to 1.0"));
    }

    #[test]
    fn test_target_sum_tolerance() {
        let params = RunParameters {
            custom_targets: Some(targets(&[
                (LandUse::Residential, 0.505),
                (LandUse::GreenSpace, 0.5),
            ])),
            ..Default::default()
        };
        assert!(params.preflight().is_valid);
    }

    #[test]
    fn test_cell_size_range_is_a_warning() {
        let params = RunParameters {
            cell_size: 5.0,
            ..Default::default()
        };
        let report = params.preflight();
        assert!(report.is_valid);
        assert_eq!(report.warnings.len(), 1);

        let params = RunParameters {
            cell_size: 0.0,
            ..Default::default()
        };
        assert!(!params.preflight().is_valid);
    }

    #[test]
    fn test_tuning_limits_are_warnings() {
        let params = RunParameters {
            optimization_params: Some(TuningParameters {
                generations: Some(1500),
                population_size: Some(500),
                extra: Map::new(),
            }),
            ..Default::default()
        };
        let report = params.preflight();
        assert!(report.is_valid);
        assert_eq!(report.warnings.len(), 2);
    }

    #[test]
    fn test_tuning_passthrough_fields_survive_serde() {
        let tuning: TuningParameters = serde_json::from_value(json!({
            "generations": 50,
            "population_size": 40,
            "mutation_rate": 0.2
        }))
        .unwrap();
        assert_eq!(tuning.generations, Some(50));
        assert_eq!(tuning.extra["mutation_rate"], json!(0.2));
        let back = serde_json::to_value(&tuning).unwrap();
        assert_eq!(back["mutation_rate"], json!(0.2));
    }

    #[test]
    fn test_request_validation_rejects_blank_project() {
        let request = RunRequest::new(ProjectId::new(" "), UserId::new("u"), boundary());
        let err = request.validate().unwrap_err();
        assert_eq!(err.kind(), "InvalidInput");
    }

    #[test]
    fn test_request_validation_surfaces_parameter_errors() {
        let mut request = RunRequest::new(ProjectId::new("p"), UserId::new("u"), boundary());
        request.parameters.custom_targets = Some(targets(&[(LandUse::Commercial, 2.0)]));
        assert!(request.validate().is_err());

        request.parameters.custom_targets = Some(targets(&[(LandUse::Commercial, 1.0)]));
        assert!(request.validate().is_ok());
    }

    #[test]
    fn test_request_preflight_collects_every_problem() {
        let mut request = RunRequest::new(ProjectId::new(""), UserId::new("u"), boundary());
        request.parameters.cell_size = -1.0;
        let report = request.preflight();
        assert!(!report.is_valid);
        assert_eq!(report.errors.len(), 2);
        assert!(report.errors[0].contains("projectId"));
    }

    #[test]
    fn test_request_deserializes_camel_case() {
        let request: RunRequest = serde_json::from_value(json!({
            "projectId": "p1",
            "userId": "u1",
            "rasterPath": "/uploads/dem/p1.tif",
            "boundary": boundary(),
            "parameters": {"cellSize": 50.0, "customTargets": {"residential": 1.0}},
            "generateRoadNetwork": true,
            "roadDensity": "high"
        }))
        .unwrap();
        assert_eq!(request.parameters.cell_size, 50.0);
        assert_eq!(request.road_density, RoadDensity::High);
        assert!(request.generate_road_network);
        assert_eq!(
            request.parameters.targets().unwrap()[&LandUse::Residential],
            1.0
        );
    }

    mod properties {
        use super::*;
        use proptest::prelude::*;

        proptest! {
            #[test]
            fn prop_normalized_targets_always_pass(weights in proptest::collection::vec(0.01f64..1.0, 1..6)) {
                let total: f64 = weights.iter().sum();
                let targets: BTreeMap<LandUse, f64> = LandUse::known()
                    .iter()
                    .cloned()
                    .zip(weights.iter().map(|w| w / total))
                    .collect();
                let params = RunParameters { custom_targets: Some(targets), ..Default::default() };
                prop_assert!(params.preflight().is_valid);
            }

            #[test]
            fn prop_cell_size_never_errors_when_positive(cell_size in 0.5f64..5000.0) {
                let params = RunParameters { cell_size, ..Default::default() };
                prop_assert!(params.preflight().errors.is_empty());
            }
        }
    }
}
