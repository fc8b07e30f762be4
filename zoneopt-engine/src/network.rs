//! Secondary Network Invoker
//!
//! Derives a road network from a finished zoning result by running a second
//! external generator. Nothing here can fail a run: every problem becomes a
//! [`NetworkUnavailable`] that the caller logs and discards.

use serde_json::{json, Value};
use std::path::PathBuf;
use std::time::Duration;
use zoneopt_core::{
    EngineError, OutputError, RasterReference, RoadDensity, RoadNetwork, RunRequest,
};

use crate::invoker::EngineCommand;
use crate::output::EngineReport;
use crate::parser::recover_document;
use crate::process::run_captured;
use crate::transform::TransformedResult;

/// Default network generator timeout.
pub const DEFAULT_NETWORK_TIMEOUT: Duration = Duration::from_secs(120);

/// Why no road network was produced.
#[derive(Debug, Clone, PartialEq, thiserror::Error)]
pub enum NetworkUnavailable {
    #[error("road network generation is not configured")]
    NotConfigured,

    #[error("network generator could not run: {0}")]
    Process(#[from] EngineError),

    #[error("network generator output unreadable: {0}")]
    Output(#[from] OutputError),

    #[error("network generator reported failure: {0}")]
    Reported(String),

    #[error("network generator output has no roads")]
    MissingRoads,
}

/// Runs the road network generator.
#[derive(Debug, Clone)]
pub struct NetworkInvoker {
    command: EngineCommand,
    output_dir: PathBuf,
    timeout: Duration,
}

impl NetworkInvoker {
    pub fn new(command: EngineCommand, output_dir: impl Into<PathBuf>) -> Self {
        Self {
            command,
            output_dir: output_dir.into(),
            timeout: DEFAULT_NETWORK_TIMEOUT,
        }
    }

    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = timeout;
        self
    }

    /// Generate a road network for a completed zoning result.
    pub async fn generate(
        &self,
        request: &RunRequest,
        raster: &RasterReference,
        report: &EngineReport,
        result: &TransformedResult,
    ) -> Result<RoadNetwork, NetworkUnavailable> {
        self.command.ensure_present()?;

        let zoning_data = json!({
            "assignments": report.assignments,
            "zone_statistics": result.zone_statistics,
        });
        let args = vec![
            request.project_id.as_str().into(),
            raster.resolved.clone().into_os_string(),
            request.boundary.to_json_string().into(),
            request.road_density.as_str().into(),
            self.output_dir.clone().into_os_string(),
            "--zoning-data".into(),
            zoning_data.to_string().into(),
        ];
        let spec = self.command.spec("network", args, self.timeout);

        let captured = run_captured(&spec).await?;
        if captured.is_blank() {
            return Err(EngineError::ExitedWithoutOutput {
                code: captured.exit_code.unwrap_or(-1),
                stderr: captured.stderr,
            }
            .into());
        }

        let recovered = recover_document(&captured.stdout_lines)?;
        road_network_from_document(recovered.document, request.road_density)
    }
}

/// Extract the road network from a generator document.
pub fn road_network_from_document(
    document: Value,
    density: RoadDensity,
) -> Result<RoadNetwork, NetworkUnavailable> {
    if document.get("success").and_then(Value::as_bool) == Some(false) {
        let message = document
            .get("error")
            .and_then(Value::as_str)
            .unwrap_or("no message")
            .to_string();
        return Err(NetworkUnavailable::Reported(message));
    }

    let roads = ["roads", "road_network"]
        .iter()
        .filter_map(|key| document.get(*key))
        .find(|v| v.is_object())
        .cloned()
        .ok_or(NetworkUnavailable::MissingRoads)?;

    let lookup = |pointers: &[&str]| pointers.iter().find_map(|p| document.pointer(p).cloned());

    let total_length_km = lookup(&["/statistics/total_length_km", "/total_length_km"])
        .and_then(|v| v.as_f64());
    let segment_count = lookup(&["/statistics/segment_count", "/segment_count"])
        .and_then(|v| v.as_u64())
        .or_else(|| {
            roads
                .get("features")
                .and_then(Value::as_array)
                .map(|f| f.len() as u64)
        });

    Ok(RoadNetwork {
        density,
        roads,
        total_length_km,
        segment_count,
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_roads_key() {
        let network = road_network_from_document(
            json!({
                "success": true,
                "roads": {"type": "FeatureCollection", "features": [{}, {}, {}]},
                "statistics": {"total_length_km": 4.5}
            }),
            RoadDensity::High,
        )
        .unwrap();
        assert_eq!(network.density, RoadDensity::High);
        assert_eq!(network.total_length_km, Some(4.5));
        assert_eq!(network.segment_count, Some(3));
    }

    #[test]
    fn test_road_network_key_and_explicit_count() {
        let network = road_network_from_document(
            json!({"road_network": {"type": "FeatureCollection", "features": []}, "segment_count": 7}),
            RoadDensity::Medium,
        )
        .unwrap();
        assert_eq!(network.segment_count, Some(7));
        assert_eq!(network.total_length_km, None);
    }

    #[test]
    fn test_missing_roads() {
        assert_eq!(
            road_network_from_document(json!({"success": true, "roads": []}), RoadDensity::Low),
            Err(NetworkUnavailable::MissingRoads)
        );
    }

    #[test]
    fn test_reported_failure() {
        let err = road_network_from_document(
            json!({"success": false, "error": "no zones"}),
            RoadDensity::Low,
        )
        .unwrap_err();
        assert_eq!(err, NetworkUnavailable::Reported("no zones".to_string()));
    }
}
