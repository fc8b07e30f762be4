//! Raster Locator
//!
//! Resolves a logical elevation-raster reference to a file on disk. The
//! search walks a fixed sequence of stages and stops at the first hit:
//!
//! 1. the reference itself, when it is an existing absolute path
//! 2. `/uploads/...` references re-rooted under each storage root, in order
//! 3. the reference resolved against the service root
//! 4. the newest matching raster in any output directory
//! 5. fixed fallback samples
//!
//! All filesystem access goes through [`PathProbe`], so the search itself is
//! a pure function of its inputs.

use serde::{Deserialize, Serialize};
use std::path::{Component, Path, PathBuf};
use std::time::SystemTime;
use zoneopt_core::{RasterError, RasterReference, RasterSource};

/// Prefix of web-relative upload references.
pub const UPLOAD_PREFIX: &str = "/uploads/";

/// File-name fragments that mark a file as an elevation raster.
pub const RASTER_KEYWORDS: &[&str] = &["elevation", "clipped", "dem"];

/// Raster file extensions considered during discovery.
pub const RASTER_EXTENSIONS: &[&str] = &["tif", "tiff"];

// ============================================================================
// PROBE
// ============================================================================

/// A file seen while listing a directory.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ProbeEntry {
    pub path: PathBuf,
    pub modified: SystemTime,
}

/// Read-only view of the filesystem used by the locator.
pub trait PathProbe: Send + Sync {
    /// True when `path` names an existing regular file.
    fn is_file(&self, path: &Path) -> bool;

    /// Regular files directly inside `dir`. Missing or unreadable
    /// directories yield an empty list.
    fn list_files(&self, dir: &Path) -> Vec<ProbeEntry>;
}

/// Probe backed by `std::fs`.
#[derive(Debug, Clone, Copy, Default)]
pub struct FsProbe;

impl PathProbe for FsProbe {
    fn is_file(&self, path: &Path) -> bool {
        path.is_file()
    }

    fn list_files(&self, dir: &Path) -> Vec<ProbeEntry> {
        let Ok(entries) = std::fs::read_dir(dir) else {
            return Vec::new();
        };
        entries
            .filter_map(Result::ok)
            .filter_map(|entry| {
                let metadata = entry.metadata().ok()?;
                if !metadata.is_file() {
                    return None;
                }
                Some(ProbeEntry {
                    path: entry.path(),
                    modified: metadata.modified().unwrap_or(SystemTime::UNIX_EPOCH),
                })
            })
            .collect()
    }
}

// ============================================================================
// CONFIGURATION
// ============================================================================

/// Search locations, in priority order within each stage.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct LocatorConfig {
    /// Roots that `/uploads/` references are re-rooted under: primary
    /// uploads, companion analysis uploads, processed downloads, companion
    /// output, local output.
    #[serde(default)]
    pub storage_roots: Vec<PathBuf>,
    /// Directory relative references are resolved against.
    #[serde(default)]
    pub service_root: Option<PathBuf>,
    /// Directories scanned for rasters when no direct match exists.
    #[serde(default)]
    pub output_dirs: Vec<PathBuf>,
    /// Sample rasters tried last.
    #[serde(default)]
    pub fallback_rasters: Vec<PathBuf>,
}

/// Identifiers that make a discovered raster preferable.
#[derive(Debug, Clone, Copy, Default)]
pub struct LocatorContext<'a> {
    pub project_id: Option<&'a str>,
    pub polygon_id: Option<&'a str>,
}

// ============================================================================
// SEARCH
// ============================================================================

/// Resolve `reference` to an existing raster file.
///
/// On failure the error lists every location that was checked, in the order
/// it was checked. Discovery contributes the directories it scanned.
pub fn locate_raster(
    reference: &str,
    context: LocatorContext<'_>,
    config: &LocatorConfig,
    probe: &dyn PathProbe,
) -> Result<RasterReference, RasterError> {
    let reference = reference.trim();
    let mut checked = Vec::new();

    let found = |resolved: PathBuf, source: RasterSource| {
        tracing::debug!(
            reference,
            resolved = %resolved.display(),
            ?source,
            "Raster located"
        );
        RasterReference {
            logical: reference.to_string(),
            resolved,
            source,
        }
    };

    if !reference.is_empty() {
        let as_given = Path::new(reference);
        if as_given.is_absolute() {
            checked.push(as_given.to_path_buf());
            if probe.is_file(as_given) {
                return Ok(found(as_given.to_path_buf(), RasterSource::Absolute));
            }
        }

        if let Some(remainder) = upload_remainder(reference) {
            for root in &config.storage_roots {
                let candidate = root.join(remainder);
                checked.push(candidate.clone());
                if probe.is_file(&candidate) {
                    return Ok(found(candidate, RasterSource::UploadRoot));
                }
            }
        }

        if let Some(service_root) = &config.service_root {
            let relative = reference.trim_start_matches('/');
            if is_contained(Path::new(relative)) {
                let candidate = service_root.join(relative);
                if !checked.contains(&candidate) {
                    checked.push(candidate.clone());
                    if probe.is_file(&candidate) {
                        return Ok(found(candidate, RasterSource::ServiceRelative));
                    }
                }
            }
        }
    }

    if let Some(discovered) = discover(context, &config.output_dirs, probe, &mut checked) {
        return Ok(found(discovered, RasterSource::Discovered));
    }

    for fallback in &config.fallback_rasters {
        checked.push(fallback.clone());
        if probe.is_file(fallback) {
            tracing::warn!(
                reference,
                fallback = %fallback.display(),
                "Using fallback sample raster"
            );
            return Ok(found(fallback.clone(), RasterSource::Fallback));
        }
    }

    Err(RasterError::NotFound {
        reference: reference.to_string(),
        checked,
    })
}

/// The part of a web-relative upload reference below `/uploads/`.
fn upload_remainder(reference: &str) -> Option<&str> {
    let remainder = reference
        .strip_prefix(UPLOAD_PREFIX)
        .or_else(|| reference.strip_prefix(&UPLOAD_PREFIX[1..]))?;
    if remainder.is_empty() || !is_contained(Path::new(remainder)) {
        return None;
    }
    Some(remainder)
}

/// Relative path that cannot climb out of the directory it is joined to.
fn is_contained(path: &Path) -> bool {
    path.components()
        .all(|c| matches!(c, Component::Normal(_) | Component::CurDir))
}

/// True for `.tif`/`.tiff` files whose name carries a raster keyword.
pub fn is_raster_candidate(path: &Path) -> bool {
    let Some(name) = path.file_name().and_then(|n| n.to_str()) else {
        return false;
    };
    let extension_ok = path
        .extension()
        .and_then(|e| e.to_str())
        .map(|e| RASTER_EXTENSIONS.contains(&e.to_ascii_lowercase().as_str()))
        .unwrap_or(false);
    let name = name.to_ascii_lowercase();
    extension_ok && RASTER_KEYWORDS.iter().any(|k| name.contains(k))
}

fn discover(
    context: LocatorContext<'_>,
    output_dirs: &[PathBuf],
    probe: &dyn PathProbe,
    checked: &mut Vec<PathBuf>,
) -> Option<PathBuf> {
    let ids: Vec<String> = [context.project_id, context.polygon_id]
        .into_iter()
        .flatten()
        .map(str::trim)
        .filter(|id| !id.is_empty())
        .map(str::to_ascii_lowercase)
        .collect();

    let mut candidates: Vec<(bool, ProbeEntry)> = Vec::new();
    for dir in output_dirs {
        checked.push(dir.clone());
        for entry in probe.list_files(dir) {
            if !is_raster_candidate(&entry.path) {
                continue;
            }
            let name = entry
                .path
                .file_name()
                .and_then(|n| n.to_str())
                .map(str::to_ascii_lowercase)
                .unwrap_or_default();
            let preferred = ids.iter().any(|id| name.contains(id.as_str()));
            candidates.push((preferred, entry));
        }
    }

    // Preferred files beat newer unrelated ones; ties go to the earlier directory.
    candidates
        .into_iter()
        .enumerate()
        .max_by(|(ia, (pa, a)), (ib, (pb, b))| {
            pa.cmp(pb)
                .then(a.modified.cmp(&b.modified))
                .then(ib.cmp(ia))
        })
        .map(|(_, (_, entry))| entry.path)
}
