//! ZoneOpt Test Utilities
//!
//! Shared test infrastructure for the ZoneOpt workspace:
//! - Proptest generators for assignments and targets
//! - Fixtures for the canonical four-cell scenario
//! - Fake engine scripts that stand in for the external optimizer
//! - Assertions on error kinds and temp-file cleanup

pub use zoneopt_storage::InMemoryRunStore;

pub use zoneopt_core::{
    Boundary, CellAssignment, LandUse, OptimizationRun, ProjectId, RunParameters, RunRequest,
    RunStatus, UserId, ZoneOptError, ZoneOptResult,
};
pub use zoneopt_engine::{EngineCommand, EngineReport};

// ============================================================================
// PROPTEST GENERATORS
// ============================================================================

pub mod generators {
    //! Proptest strategies for engine-shaped data.

    use super::*;
    use proptest::prelude::*;
    use std::collections::BTreeMap;

    /// One of the known land-use categories.
    pub fn arb_land_use() -> impl Strategy<Value = LandUse> {
        prop::sample::select(LandUse::known().to_vec())
    }

    /// A single cell near Berlin with a unit-interval suitability.
    pub fn arb_cell_assignment() -> impl Strategy<Value = CellAssignment> {
        (
            "[a-z0-9]{1,6}",
            13.0f64..13.8,
            52.3f64..52.7,
            arb_land_use(),
            0.0f64..=1.0,
            0.0f64..45.0,
        )
            .prop_map(|(cell_id, lon, lat, land_use, suitability, slope)| CellAssignment {
                cell_id,
                lon,
                lat,
                land_use,
                suitability,
                slope,
            })
    }

    /// Between 1 and `max` assignments.
    pub fn arb_assignments(max: usize) -> impl Strategy<Value = Vec<CellAssignment>> {
        prop::collection::vec(arb_cell_assignment(), 1..=max.max(1))
    }

    /// Targets over a subset of categories that sum to exactly 1.0.
    pub fn arb_normalized_targets() -> impl Strategy<Value = BTreeMap<LandUse, f64>> {
        prop::collection::btree_map(arb_land_use(), 0.05f64..1.0, 1..5).prop_map(|raw| {
            let total: f64 = raw.values().sum();
            raw.into_iter().map(|(k, v)| (k, v / total)).collect()
        })
    }

    /// A line of diagnostic chatter that never contains braces.
    pub fn arb_noise_line() -> impl Strategy<Value = String> {
        "[A-Za-z0-9 .:%/=-]{0,60}"
    }
}

// ============================================================================
// FIXTURES
// ============================================================================

pub mod fixtures {
    //! Pre-built fixtures for common scenarios.

    use super::*;
    use serde_json::{json, Value};
    use std::collections::BTreeMap;

    /// Small closed polygon used as a project boundary.
    pub fn sample_boundary() -> Boundary {
        Boundary::new(json!({
            "type": "Polygon",
            "coordinates": [[
                [13.400, 52.500],
                [13.404, 52.500],
                [13.404, 52.504],
                [13.400, 52.504],
                [13.400, 52.500]
            ]]
        }))
    }

    /// Request for `project` owned by `user` with default parameters.
    pub fn sample_request(project: &str, user: &str) -> RunRequest {
        RunRequest::new(ProjectId::new(project), UserId::new(user), sample_boundary())
    }

    /// Even split between residential and green space.
    pub fn even_targets() -> BTreeMap<LandUse, f64> {
        [(LandUse::Residential, 0.5), (LandUse::GreenSpace, 0.5)]
            .into_iter()
            .collect()
    }

    /// Engine result with two residential cells (0.8, 0.6) and two green
    /// space cells (0.9, 0.7).
    pub fn four_cell_document() -> Value {
        json!({
            "success": true,
            "optimization_result": {
                "assignments": [
                    {"cell_id": 1, "lon": 13.4005, "lat": 52.5005, "land_use": "residential", "suitability": 0.8, "slope": 2.0},
                    {"cell_id": 2, "lon": 13.4015, "lat": 52.5005, "land_use": "residential", "suitability": 0.6, "slope": 4.0},
                    {"cell_id": 3, "lon": 13.4005, "lat": 52.5015, "land_use": "green_space", "suitability": 0.9, "slope": 1.0},
                    {"cell_id": 4, "lon": 13.4015, "lat": 52.5015, "land_use": "green_space", "suitability": 0.7, "slope": 3.0}
                ],
                "land_use_distribution": {"residential": 2, "green_space": 2},
                "generations": 25
            },
            "statistics": {"total_cells": 4, "method": "nsga2"}
        })
    }

    /// The four-cell document, normalized.
    pub fn four_cell_report() -> EngineReport {
        match EngineReport::from_document(four_cell_document()) {
            Ok(report) => report,
            Err(e) => panic!("four-cell fixture must parse: {}", e),
        }
    }

    /// A completed run built from the four-cell scenario.
    pub fn completed_run(project: &str, user: &str) -> OptimizationRun {
        let report = four_cell_report();
        let parameters = RunParameters {
            custom_targets: Some(even_targets()),
            ..Default::default()
        };
        let result = zoneopt_engine::transform(&report, &parameters);
        let now = chrono::Utc::now();
        OptimizationRun {
            run_id: zoneopt_core::new_run_id(),
            project_id: ProjectId::new(project),
            user_id: UserId::new(user),
            polygon_id: None,
            status: RunStatus::Completed,
            parameters,
            zoning_polygons: result.zoning_polygons,
            statistics: report.statistics.clone(),
            fitness_score: result.fitness_score,
            generations: report.generations,
            convergence_info: result.convergence_info,
            zone_statistics: result.zone_statistics,
            assignments: report.assignments.clone(),
            land_use_distribution: report.land_use_distribution.clone(),
            total_cells: result.total_cells,
            method: report.method.clone(),
            road_network: None,
            zones: result.zones,
            raw_output: report.raw,
            created_at: now,
            updated_at: now,
            completed_at: Some(now),
        }
    }

    /// Road generator result with two segments.
    pub fn road_network_document() -> Value {
        json!({
            "success": true,
            "roads": {
                "type": "FeatureCollection",
                "features": [
                    {"type": "Feature", "geometry": {"type": "LineString", "coordinates": [[13.400, 52.500], [13.404, 52.500]]}, "properties": {"class": "primary"}},
                    {"type": "Feature", "geometry": {"type": "LineString", "coordinates": [[13.402, 52.500], [13.402, 52.504]]}, "properties": {"class": "local"}}
                ]
            },
            "statistics": {"total_length_km": 0.71}
        })
    }
}

// ============================================================================
// FAKE ENGINES
// ============================================================================

pub mod fake_engine {
    //! Shell scripts that mimic the external optimizer and road generator.
    //!
    //! Every script records the path passed via `--terrain-data-file` (and a
    //! copy of its contents) in its own directory, so tests can check that
    //! the side-channel file existed during the run and is gone afterwards.

    use super::*;
    use serde_json::Value;
    use std::path::{Path, PathBuf};
    use tempfile::TempDir;

    const TERRAIN_PATH_FILE: &str = "terrain_path.txt";
    const TERRAIN_COPY_FILE: &str = "terrain_copy.json";
    const ARGS_FILE: &str = "args.txt";

    /// A fake executable living in its own temporary directory.
    pub struct FakeEngine {
        dir: TempDir,
        script: PathBuf,
    }

    impl FakeEngine {
        /// Write a script whose behavior after argument recording is `body`.
        pub fn with_body(body: &str) -> std::io::Result<Self> {
            let dir = tempfile::tempdir()?;
            let script = dir.path().join("engine.sh");
            let preamble = format!(
                r#"#!/bin/sh
printf '%s\n' "$@" > "{dir}/{args}"
prev=""
for arg in "$@"; do
  if [ "$prev" = "--terrain-data-file" ]; then
    printf '%s' "$arg" > "{dir}/{path}"
    cp "$arg" "{dir}/{copy}"
  fi
  prev="$arg"
done
"#,
                dir = dir.path().display(),
                args = ARGS_FILE,
                path = TERRAIN_PATH_FILE,
                copy = TERRAIN_COPY_FILE,
            );
            std::fs::write(&script, format!("{}{}\n", preamble, body))?;
            Ok(Self { dir, script })
        }

        /// Prints `document` as the only output.
        pub fn emitting(document: &Value) -> std::io::Result<Self> {
            Self::with_body(&format!("cat <<'JSON'\n{}\nJSON", document))
        }

        /// Prints progress chatter around `document`, like a real engine.
        pub fn noisy(document: &Value) -> std::io::Result<Self> {
            Self::with_body(&format!(
                "echo 'Loading elevation raster'\necho 'Generation 1/25: best=0.41' \necho 'Generation 25/25: best=0.75'\necho 'progress warning' >&2\ncat <<'JSON'\n{}\nJSON\necho 'Optimization complete'",
                serde_json::to_string_pretty(document).unwrap_or_default()
            ))
        }

        /// Prints `document` with a trailing comma before the closing brace.
        pub fn trailing_comma(document: &Value) -> std::io::Result<Self> {
            let text = document.to_string();
            let broken = format!("{},}}", &text[..text.len().saturating_sub(1)]);
            Self::with_body(&format!("echo 'done'\ncat <<'JSON'\n{}\nJSON", broken))
        }

        /// Exits non-zero with nothing on stdout.
        pub fn crashing(code: i32) -> std::io::Result<Self> {
            Self::with_body(&format!("echo 'Traceback: boom' >&2\nexit {}", code))
        }

        /// Prints text with no JSON in it.
        pub fn garbage() -> std::io::Result<Self> {
            Self::with_body("echo 'Segmentation of raster failed'\necho 'no result'")
        }

        /// Sleeps far longer than any test timeout.
        pub fn sleeping(secs: u64) -> std::io::Result<Self> {
            Self::with_body(&format!("sleep {}", secs))
        }

        /// Command that runs this script with `/bin/sh`.
        pub fn command(&self) -> EngineCommand {
            EngineCommand::new("/bin/sh", Some(self.script.clone()))
        }

        pub fn dir(&self) -> &Path {
            self.dir.path()
        }

        pub fn script(&self) -> &Path {
            &self.script
        }

        /// Arguments the script received on its last run.
        pub fn recorded_args(&self) -> Vec<String> {
            std::fs::read_to_string(self.dir.path().join(ARGS_FILE))
                .map(|s| s.lines().map(str::to_string).collect())
                .unwrap_or_default()
        }

        /// The `--terrain-data-file` path the script received, if any.
        pub fn recorded_terrain_path(&self) -> Option<PathBuf> {
            std::fs::read_to_string(self.dir.path().join(TERRAIN_PATH_FILE))
                .ok()
                .map(PathBuf::from)
        }

        /// Contents of the terrain file as the script saw them.
        pub fn recorded_terrain(&self) -> Option<Value> {
            let bytes = std::fs::read(self.dir.path().join(TERRAIN_COPY_FILE)).ok()?;
            serde_json::from_slice(&bytes).ok()
        }
    }
}

// ============================================================================
// CUSTOM ASSERTIONS
// ============================================================================

pub mod assertions {
    //! Assertions for ZoneOpt-specific validation.

    use super::*;
    use std::path::Path;

    /// Assert that a result failed with the given machine-readable kind.
    #[track_caller]
    pub fn assert_kind<T: std::fmt::Debug>(result: &ZoneOptResult<T>, kind: &str) {
        match result {
            Err(e) => assert_eq!(e.kind(), kind, "unexpected error: {}", e),
            Ok(value) => panic!("Expected {} error, got Ok: {:?}", kind, value),
        }
    }

    /// Assert that `dir` holds no side-channel files.
    #[track_caller]
    pub fn assert_no_side_channel_files(dir: &Path) {
        let leftovers: Vec<_> = std::fs::read_dir(dir)
            .map(|entries| {
                entries
                    .filter_map(Result::ok)
                    .map(|e| e.path())
                    .filter(|p| {
                        p.file_name()
                            .and_then(|n| n.to_str())
                            .map(|n| n.starts_with("zoneopt-"))
                            .unwrap_or(false)
                    })
                    .collect()
            })
            .unwrap_or_default();
        assert!(leftovers.is_empty(), "side-channel files left behind: {:?}", leftovers);
    }

    /// Assert the persisted run reflects the four-cell scenario.
    #[track_caller]
    pub fn assert_four_cell_run(run: &OptimizationRun) {
        assert_eq!(run.status, RunStatus::Completed);
        assert_eq!(run.total_cells, 4);
        assert!((run.fitness_score - 0.75).abs() < 1e-9);
        let residential = &run.zone_statistics[&LandUse::Residential];
        assert!((residential.percentage - 50.0).abs() < 1e-9);
        assert!((residential.mean_suitability - 0.7).abs() < 1e-9);
        let green = &run.zone_statistics[&LandUse::GreenSpace];
        assert!((green.mean_suitability - 0.8).abs() < 1e-9);
        assert_eq!(run.zoning_polygons.len(), 4);
    }
}

// ============================================================================
// TESTS
// ============================================================================
