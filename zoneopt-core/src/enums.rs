//! Enum types for ZoneOpt entities

use serde::{Deserialize, Serialize};
use std::cmp::Ordering;
use std::fmt;
use std::hash::{Hash, Hasher};
use std::str::FromStr;

// ============================================================================
// LAND USE
// ============================================================================

/// Land-use category assigned to a grid cell.
///
/// The engine is free to emit labels this crate does not know about; those
/// land in `Other` after the same normalization [`LandUse::from_label`]
/// applies to every label (trimmed, lowercased, spaces and dashes turned
/// into underscores).
///
/// Equality, hashing and ordering all compare the label, so an `Other`
/// spelling a known label is the same category as the named variant.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(from = "String", into = "String")]
pub enum LandUse {
    Residential,
    Commercial,
    Industrial,
    MixedUse,
    GreenSpace,
    Institutional,
    Agricultural,
    Conservation,
    Infrastructure,
    Other(String),
}

impl LandUse {
    /// Canonical snake_case label, as exchanged with the engine.
    pub fn as_str(&self) -> &str {
        match self {
            LandUse::Residential => "residential",
            LandUse::Commercial => "commercial",
            LandUse::Industrial => "industrial",
            LandUse::MixedUse => "mixed_use",
            LandUse::GreenSpace => "green_space",
            LandUse::Institutional => "institutional",
            LandUse::Agricultural => "agricultural",
            LandUse::Conservation => "conservation",
            LandUse::Infrastructure => "infrastructure",
            LandUse::Other(label) => label,
        }
    }

    /// Parse a label, normalizing case, whitespace and separators.
    pub fn from_label(label: &str) -> Self {
        let normalized = label.trim().to_lowercase().replace([' ', '-'], "_");
        match normalized.as_str() {
            "residential" => LandUse::Residential,
            "commercial" => LandUse::Commercial,
            "industrial" => LandUse::Industrial,
            "mixed_use" | "mixed" => LandUse::MixedUse,
            "green_space" | "greenspace" | "green" | "park" => LandUse::GreenSpace,
            "institutional" => LandUse::Institutional,
            "agricultural" | "agriculture" => LandUse::Agricultural,
            "conservation" => LandUse::Conservation,
            "infrastructure" => LandUse::Infrastructure,
            _ => LandUse::Other(normalized),
        }
    }

    /// All categories with a fixed meaning.
    pub fn known() -> &'static [LandUse] {
        &[
            LandUse::Residential,
            LandUse::Commercial,
            LandUse::Industrial,
            LandUse::MixedUse,
            LandUse::GreenSpace,
            LandUse::Institutional,
            LandUse::Agricultural,
            LandUse::Conservation,
            LandUse::Infrastructure,
        ]
    }
}

impl fmt::Display for LandUse {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for LandUse {
    type Err = std::convert::Infallible;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Ok(Self::from_label(s))
    }
}

impl From<String> for LandUse {
    fn from(value: String) -> Self {
        Self::from_label(&value)
    }
}

impl From<LandUse> for String {
    fn from(value: LandUse) -> Self {
        value.as_str().to_string()
    }
}

impl PartialEq for LandUse {
    fn eq(&self, other: &Self) -> bool {
        self.as_str() == other.as_str()
    }
}

impl Eq for LandUse {}

impl Hash for LandUse {
    fn hash<H: Hasher>(&self, state: &mut H) {
        self.as_str().hash(state);
    }
}

// Label order keeps map-keyed output stable across runs.
impl Ord for LandUse {
    fn cmp(&self, other: &Self) -> Ordering {
        self.as_str().cmp(other.as_str())
    }
}

impl PartialOrd for LandUse {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        Some(self.cmp(other))
    }
}

// ============================================================================
// RUN STATUS
// ============================================================================

/// Lifecycle status of an optimization run.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, Default)]
#[serde(rename_all = "lowercase")]
pub enum RunStatus {
    #[default]
    Pending,
    Processing,
    Completed,
    Failed,
}

impl RunStatus {
    /// Convert to database string representation.
    pub fn as_db_str(&self) -> &'static str {
        match self {
            RunStatus::Pending => "pending",
            RunStatus::Processing => "processing",
            RunStatus::Completed => "completed",
            RunStatus::Failed => "failed",
        }
    }

    /// Parse from database string representation.
    pub fn from_db_str(s: &str) -> Result<Self, RunStatusParseError> {
        match s.to_lowercase().as_str() {
            "pending" => Ok(RunStatus::Pending),
            "processing" => Ok(RunStatus::Processing),
            "completed" => Ok(RunStatus::Completed),
            "failed" => Ok(RunStatus::Failed),
            _ => Err(RunStatusParseError(s.to_string())),
        }
    }

    pub fn is_terminal(&self) -> bool {
        matches!(self, RunStatus::Completed | RunStatus::Failed)
    }
}

impl fmt::Display for RunStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.as_db_str())
    }
}

impl FromStr for RunStatus {
    type Err = RunStatusParseError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Self::from_db_str(s)
    }
}

/// Error when parsing an invalid run status string.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RunStatusParseError(pub String);

impl fmt::Display for RunStatusParseError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "Invalid run status: {}", self.0)
    }
}

impl std::error::Error for RunStatusParseError {}

// ============================================================================
// ROAD DENSITY
// ============================================================================

/// Road density requested from the network generator.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, Default)]
#[serde(rename_all = "lowercase")]
pub enum RoadDensity {
    Low,
    #[default]
    Medium,
    High,
}

impl RoadDensity {
    pub fn as_str(&self) -> &'static str {
        match self {
            RoadDensity::Low => "low",
            RoadDensity::Medium => "medium",
            RoadDensity::High => "high",
        }
    }
}

impl fmt::Display for RoadDensity {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}
