//! Result Transformer
//!
//! Turns an [`EngineReport`] into the figures that get persisted: fitness,
//! convergence against the requested targets, per-category zone statistics
//! and one map polygon per cell.

use std::collections::BTreeMap;
use zoneopt_core::{
    CategoryConvergence, CellAssignment, ConvergenceInfo, LandUse, PolygonGeometry,
    RunParameters, ZoneProperties, ZoneStatistic, ZoningFeature, ZoningPolygons,
    METERS_PER_DEGREE,
};

use crate::output::{derive_distribution, EngineReport};

/// Convergence reported when the caller supplied no targets.
pub const DEFAULT_CONVERGENCE: f64 = 0.95;

/// Everything derived from one engine report.
#[derive(Debug, Clone, PartialEq)]
pub struct TransformedResult {
    /// Cell count every share and percentage was computed against.
    pub total_cells: u64,
    pub fitness_score: f64,
    pub convergence_info: ConvergenceInfo,
    pub zone_statistics: BTreeMap<LandUse, ZoneStatistic>,
    /// Same statistics as a list, in land-use label order.
    pub zones: Vec<ZoneStatistic>,
    pub zoning_polygons: ZoningPolygons,
}

/// Derive every persisted figure from `report`.
pub fn transform(report: &EngineReport, parameters: &RunParameters) -> TransformedResult {
    let denominator = report.cell_denominator();

    let counts = if report.assignments.is_empty() {
        report.land_use_distribution.clone()
    } else {
        derive_distribution(&report.assignments)
    };

    let zone_statistics = zone_statistics(&report.assignments, denominator);
    let zones = zone_statistics.values().cloned().collect();

    TransformedResult {
        total_cells: denominator,
        fitness_score: fitness_score(&report.assignments),
        convergence_info: convergence(parameters.targets(), &counts, denominator),
        zone_statistics,
        zones,
        zoning_polygons: synthesize_polygons(&report.assignments, parameters.cell_size),
    }
}

/// Mean suitability of the assigned cells; 0 for none.
pub fn fitness_score(assignments: &[CellAssignment]) -> f64 {
    if assignments.is_empty() {
        return 0.0;
    }
    assignments.iter().map(|c| c.suitability).sum::<f64>() / assignments.len() as f64
}

/// How closely realized shares match `targets`.
///
/// Each target category scores `1 - |actual - target|`; the run scores the
/// mean, clamped to [0, 1]. Without targets the score is
/// [`DEFAULT_CONVERGENCE`].
pub fn convergence(
    targets: Option<&BTreeMap<LandUse, f64>>,
    counts: &BTreeMap<LandUse, u64>,
    total_cells: u64,
) -> ConvergenceInfo {
    let Some(targets) = targets.filter(|t| !t.is_empty()) else {
        return ConvergenceInfo {
            score: DEFAULT_CONVERGENCE,
            targets_supplied: false,
            categories: BTreeMap::new(),
        };
    };

    let categories: BTreeMap<LandUse, CategoryConvergence> = targets
        .iter()
        .map(|(land_use, target)| {
            let count = counts.get(land_use).copied().unwrap_or(0);
            let actual = share(count, total_cells);
            let score = (1.0 - (actual - target).abs()).clamp(0.0, 1.0);
            (
                land_use.clone(),
                CategoryConvergence {
                    target_share: *target,
                    actual_share: actual,
                    score,
                },
            )
        })
        .collect();

    let mean = categories.values().map(|c| c.score).sum::<f64>() / categories.len() as f64;
    ConvergenceInfo {
        score: if mean.is_finite() { mean.clamp(0.0, 1.0) } else { 0.0 },
        targets_supplied: true,
        categories,
    }
}

fn share(count: u64, total: u64) -> f64 {
    if total == 0 {
        0.0
    } else {
        count as f64 / total as f64
    }
}

/// Per-category counts and means, keyed (and therefore ordered) by label.
pub fn zone_statistics(
    assignments: &[CellAssignment],
    total_cells: u64,
) -> BTreeMap<LandUse, ZoneStatistic> {
    #[derive(Default)]
    struct Accumulator {
        count: u64,
        suitability: f64,
        slope: f64,
    }

    let mut groups: BTreeMap<&LandUse, Accumulator> = BTreeMap::new();
    for cell in assignments {
        let acc = groups.entry(&cell.land_use).or_default();
        acc.count += 1;
        acc.suitability += cell.suitability;
        acc.slope += cell.slope;
    }

    groups
        .into_iter()
        .map(|(land_use, acc)| {
            let n = acc.count as f64;
            (
                land_use.clone(),
                ZoneStatistic {
                    land_use: land_use.clone(),
                    cell_count: acc.count,
                    percentage: share(acc.count, total_cells) * 100.0,
                    mean_suitability: acc.suitability / n,
                    mean_slope: acc.slope / n,
                },
            )
        })
        .collect()
}

/// Display color for a land-use category.
pub fn land_use_color(land_use: &LandUse) -> &'static str {
    match land_use {
        LandUse::Residential => "#FFD700",
        LandUse::Commercial => "#FF4500",
        LandUse::Industrial => "#8B008B",
        LandUse::MixedUse => "#FF8C00",
        LandUse::GreenSpace => "#228B22",
        LandUse::Institutional => "#1E90FF",
        LandUse::Agricultural => "#9ACD32",
        LandUse::Conservation => "#006400",
        LandUse::Infrastructure => "#708090",
        LandUse::Other(_) => "#BEBEBE",
    }
}

/// One closed square per cell, centered on the cell, never merged.
pub fn synthesize_polygons(assignments: &[CellAssignment], cell_size_m: f64) -> ZoningPolygons {
    let half_width = cell_size_m / METERS_PER_DEGREE / 2.0;
    let area_m2 = cell_size_m * cell_size_m;
    let area_ha = area_m2 / 10_000.0;

    let features = assignments
        .iter()
        .map(|cell| {
            ZoningFeature::new(
                PolygonGeometry::square(cell.lon, cell.lat, half_width),
                ZoneProperties {
                    cell_id: cell.cell_id.clone(),
                    land_use: cell.land_use.clone(),
                    suitability: cell.suitability,
                    slope: cell.slope,
                    color: land_use_color(&cell.land_use).to_string(),
                    area_m2,
                    area_ha,
                },
            )
        })
        .collect();
    ZoningPolygons::new(features)
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn cell(id: &str, land_use: LandUse, suitability: f64, slope: f64) -> CellAssignment {
        CellAssignment {
            cell_id: id.to_string(),
            lon: 10.0,
            lat: 50.0,
            land_use,
            suitability,
            slope,
        }
    }

    fn four_cells() -> Vec<CellAssignment> {
        vec![
            cell("1", LandUse::Residential, 0.8, 2.0),
            cell("2", LandUse::Residential, 0.6, 4.0),
            cell("3", LandUse::GreenSpace, 0.9, 1.0),
            cell("4", LandUse::GreenSpace, 0.7, 3.0),
        ]
    }

    fn report(assignments: Vec<CellAssignment>) -> EngineReport {
        EngineReport {
            total_cells: assignments.len() as u64,
            land_use_distribution: derive_distribution(&assignments),
            assignments,
            method: "nsga2".to_string(),
            generations: Some(10),
            statistics: json!({}),
            raw: json!({}),
        }
    }

    fn approx(a: f64, b: f64) -> bool {
        (a - b).abs() < 1e-9
    }

    #[test]
    fn test_four_cell_scenario() {
        let params = RunParameters {
            custom_targets: Some(
                [(LandUse::Residential, 0.5), (LandUse::GreenSpace, 0.5)]
                    .into_iter()
                    .collect(),
            ),
            ..Default::default()
        };
        let result = transform(&report(four_cells()), &params);

        assert!(approx(result.fitness_score, 0.75));
        let residential = &result.zone_statistics[&LandUse::Residential];
        assert_eq!(residential.cell_count, 2);
        assert!(approx(residential.percentage, 50.0));
        assert!(approx(residential.mean_suitability, 0.7));
        assert!(approx(residential.mean_slope, 3.0));
        let green = &result.zone_statistics[&LandUse::GreenSpace];
        assert!(approx(green.percentage, 50.0));
        assert!(approx(green.mean_suitability, 0.8));
        assert!(approx(result.convergence_info.score, 1.0));
        assert!(result.convergence_info.targets_supplied);
        assert_eq!(result.zoning_polygons.len(), 4);
        assert_eq!(result.zones.len(), 2);
        assert_eq!(result.zones[0].land_use, LandUse::GreenSpace);
    }

    #[test]
    fn test_total_cells_follows_assignments_over_reported_total() {
        let mut overstated = report(four_cells());
        overstated.total_cells = 10;
        let result = transform(&overstated, &RunParameters::default());

        assert_eq!(result.total_cells, 4);
        let total: f64 = result.zone_statistics.values().map(|s| s.percentage).sum();
        assert!(approx(total, 100.0));

        let mut counts_only = report(Vec::new());
        counts_only.total_cells = 10;
        assert_eq!(transform(&counts_only, &RunParameters::default()).total_cells, 10);
    }

    #[test]
    fn test_empty_assignments() {
        let result = transform(&report(Vec::new()), &RunParameters::default());
        assert_eq!(result.fitness_score, 0.0);
        assert!(result.zone_statistics.is_empty());
        assert!(result.zoning_polygons.is_empty());
        assert_eq!(result.convergence_info.score, DEFAULT_CONVERGENCE);
    }

    #[test]
    fn test_default_convergence_without_targets() {
        let info = convergence(None, &BTreeMap::new(), 10);
        assert_eq!(info.score, DEFAULT_CONVERGENCE);
        assert!(!info.targets_supplied);

        let empty = BTreeMap::new();
        assert_eq!(convergence(Some(&empty), &BTreeMap::new(), 10).score, DEFAULT_CONVERGENCE);
    }

    #[test]
    fn test_convergence_penalizes_missing_category() {
        let targets: BTreeMap<_, _> = [(LandUse::Residential, 0.6), (LandUse::Commercial, 0.4)]
            .into_iter()
            .collect();
        let counts: BTreeMap<_, _> = [(LandUse::Residential, 10u64)].into_iter().collect();
        let info = convergence(Some(&targets), &counts, 10);
        // residential: 1 - |1.0 - 0.6| = 0.6, commercial: 1 - 0.4 = 0.6
        assert!(approx(info.score, 0.6));
        assert!(approx(info.categories[&LandUse::Commercial].actual_share, 0.0));
    }

    #[test]
    fn test_polygon_geometry() {
        let polygons = synthesize_polygons(&four_cells()[..1], 111.32);
        let feature = &polygons.features[0];
        let ring = &feature.geometry.coordinates[0];
        assert_eq!(ring.len(), 5);
        assert_eq!(ring[0], ring[4]);
        assert!(approx(ring[1][0] - ring[0][0], 0.001));
        assert!(approx(feature.properties.area_m2, 111.32 * 111.32));
        assert!(approx(feature.properties.area_ha, 111.32 * 111.32 / 10_000.0));
        assert_eq!(feature.properties.color, "#FFD700");
        assert_eq!(feature.properties.cell_id, "1");
    }

    #[test]
    fn test_every_known_category_has_a_distinct_color() {
        let colors: std::collections::HashSet<_> =
            LandUse::known().iter().map(land_use_color).collect();
        assert_eq!(colors.len(), LandUse::known().len());
    }

    mod properties {
        use super::*;
        use proptest::prelude::*;

        fn assignments() -> impl Strategy<Value = Vec<CellAssignment>> {
            proptest::collection::vec(
                (0usize..LandUse::known().len(), 0.0f64..=1.0, 0.0f64..45.0),
                1..200,
            )
            .prop_map(|cells| {
                cells
                    .into_iter()
                    .enumerate()
                    .map(|(i, (k, suitability, slope))| {
                        cell(&i.to_string(), LandUse::known()[k].clone(), suitability, slope)
                    })
                    .collect()
            })
        }

        proptest! {
            #[test]
            fn prop_fitness_within_unit_interval(cells in assignments()) {
                let fitness = fitness_score(&cells);
                prop_assert!((0.0..=1.0).contains(&fitness));
            }

            #[test]
            fn prop_zone_percentages_sum_to_100(cells in assignments()) {
                let stats = zone_statistics(&cells, cells.len() as u64);
                let total: f64 = stats.values().map(|s| s.percentage).sum();
                prop_assert!((total - 100.0).abs() < 1e-6);
            }

            #[test]
            fn prop_convergence_within_unit_interval(
                cells in assignments(),
                weights in proptest::collection::vec(0.0f64..=1.0, 1..9),
            ) {
                let targets: BTreeMap<LandUse, f64> =
                    LandUse::known().iter().cloned().zip(weights).collect();
                let counts = derive_distribution(&cells);
                let info = convergence(Some(&targets), &counts, cells.len() as u64);
                prop_assert!((0.0..=1.0).contains(&info.score));
            }

            #[test]
            fn prop_realized_shares_as_targets_converge_fully(cells in assignments()) {
                let counts = derive_distribution(&cells);
                let total = cells.len() as u64;
                let targets: BTreeMap<LandUse, f64> = counts
                    .iter()
                    .map(|(k, v)| (k.clone(), *v as f64 / total as f64))
                    .collect();
                let info = convergence(Some(&targets), &counts, total);
                prop_assert!((info.score - 1.0).abs() < 1e-9);
            }
        }
    }
}
