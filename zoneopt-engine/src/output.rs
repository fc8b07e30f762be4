//! Engine result model.
//!
//! Engine versions disagree on where fields live. Each field is looked up at
//! a fixed list of JSON pointers, first match wins, and anything still
//! missing is derived from the assignment list.

use serde_json::{json, Value};
use std::collections::BTreeMap;
use zoneopt_core::{
    CellAssignment, EngineError, LandUse, OutputError, ZoneOptError, ZoneOptResult,
};

const ASSIGNMENTS: &[&str] = &["/optimization_result/assignments", "/assignments"];
const DISTRIBUTION: &[&str] = &[
    "/optimization_result/land_use_distribution",
    "/land_use_distribution",
];
const TOTAL_CELLS: &[&str] = &[
    "/statistics/total_cells",
    "/optimization_result/total_cells",
    "/total_cells",
];
const METHOD: &[&str] = &["/statistics/method", "/optimization_result/method", "/method"];
const GENERATIONS: &[&str] = &[
    "/optimization_result/generations",
    "/statistics/generations",
    "/generations",
];

/// Method label used when the engine does not name one.
pub const UNKNOWN_METHOD: &str = "unknown";

/// Normalized view of one engine result.
#[derive(Debug, Clone, PartialEq)]
pub struct EngineReport {
    pub assignments: Vec<CellAssignment>,
    pub land_use_distribution: BTreeMap<LandUse, u64>,
    pub total_cells: u64,
    pub method: String,
    pub generations: Option<u32>,
    /// The engine's statistics block, or a minimal one when absent.
    pub statistics: Value,
    /// The whole recovered document.
    pub raw: Value,
}

impl EngineReport {
    /// Extract a report from a recovered document.
    ///
    /// A document with `success: false` is the engine reporting its own
    /// failure and becomes an [`EngineError::Reported`].
    pub fn from_document(document: Value) -> ZoneOptResult<Self> {
        if document.get("success").and_then(Value::as_bool) == Some(false) {
            let message = document
                .get("error")
                .map(|e| match e {
                    Value::String(s) => s.clone(),
                    other => other.to_string(),
                })
                .unwrap_or_else(|| "engine reported failure without a message".to_string());
            return Err(EngineError::Reported { message }.into());
        }

        let assignments = parse_assignments(&document)?;

        let land_use_distribution = match first_present(&document, DISTRIBUTION) {
            Some(value) => parse_distribution(value)?,
            None => derive_distribution(&assignments),
        };

        let total_cells = match first_present(&document, TOTAL_CELLS) {
            Some(value) => as_count(value).ok_or_else(|| malformed("total_cells", value))?,
            None => assignments.len() as u64,
        };

        let method = first_present(&document, METHOD)
            .and_then(Value::as_str)
            .filter(|m| !m.trim().is_empty())
            .unwrap_or(UNKNOWN_METHOD)
            .to_string();

        let generations = match first_present(&document, GENERATIONS) {
            Some(value) => Some(
                as_count(value)
                    .and_then(|g| u32::try_from(g).ok())
                    .ok_or_else(|| malformed("generations", value))?,
            ),
            None => None,
        };

        let statistics = match document.get("statistics") {
            Some(stats) if stats.is_object() => stats.clone(),
            _ => json!({ "total_cells": total_cells, "method": method }),
        };

        Ok(Self {
            assignments,
            land_use_distribution,
            total_cells,
            method,
            generations,
            statistics,
            raw: document,
        })
    }

    /// Number of cells that shares are computed against: the assignments
    /// when there are any, the reported total otherwise.
    ///
    /// This is the figure persisted as a run's `totalCells`. An engine total
    /// that disagrees with its own assignment list survives only in the raw
    /// `statistics` block.
    pub fn cell_denominator(&self) -> u64 {
        if self.assignments.is_empty() {
            self.total_cells
        } else {
            self.assignments.len() as u64
        }
    }
}

fn first_present<'a>(document: &'a Value, pointers: &[&str]) -> Option<&'a Value> {
    pointers
        .iter()
        .filter_map(|p| document.pointer(p))
        .find(|v| !v.is_null())
}

fn malformed(field: &str, value: &Value) -> ZoneOptError {
    OutputError::MalformedField {
        field: field.to_string(),
        reason: format!("unexpected value {}", value),
    }
    .into()
}

/// Non-negative integer, tolerating integral floats.
fn as_count(value: &Value) -> Option<u64> {
    value.as_u64().or_else(|| {
        value
            .as_f64()
            .filter(|f| *f >= 0.0 && f.fract() == 0.0)
            .map(|f| f as u64)
    })
}

fn parse_assignments(document: &Value) -> ZoneOptResult<Vec<CellAssignment>> {
    let value = first_present(document, ASSIGNMENTS).ok_or_else(|| OutputError::MissingField {
        field: "assignments".to_string(),
    })?;
    let items = value.as_array().ok_or_else(|| malformed("assignments", value))?;
    items
        .iter()
        .enumerate()
        .map(|(index, item)| {
            serde_json::from_value::<CellAssignment>(item.clone()).map_err(|e| {
                ZoneOptError::from(OutputError::MalformedField {
                    field: format!("assignments[{}]", index),
                    reason: e.to_string(),
                })
            })
        })
        .collect()
}

fn parse_distribution(value: &Value) -> ZoneOptResult<BTreeMap<LandUse, u64>> {
    let entries = value
        .as_object()
        .ok_or_else(|| malformed("land_use_distribution", value))?;
    let mut distribution = BTreeMap::new();
    for (label, count) in entries {
        let count = as_count(count)
            .ok_or_else(|| malformed(&format!("land_use_distribution.{}", label), count))?;
        *distribution.entry(LandUse::from_label(label)).or_insert(0) += count;
    }
    Ok(distribution)
}

/// Category counts taken directly from the assignments.
pub fn derive_distribution(assignments: &[CellAssignment]) -> BTreeMap<LandUse, u64> {
    let mut distribution = BTreeMap::new();
    for cell in assignments {
        *distribution.entry(cell.land_use.clone()).or_insert(0) += 1;
    }
    distribution
}
