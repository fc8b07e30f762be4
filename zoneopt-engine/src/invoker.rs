//! Engine Invoker
//!
//! Builds the engine command line for a run, passes bulky terrain data
//! through a temporary file, and hands the captured output to the parser.

use serde_json::Value;
use std::ffi::OsString;
use std::io::Write;
use std::path::{Path, PathBuf};
use std::time::Duration;
use tempfile::NamedTempFile;
use zoneopt_core::{EngineError, RasterReference, RunRequest, ZoneOptResult};

use crate::output::EngineReport;
use crate::parser::recover_document;
use crate::process::{run_captured, CapturedOutput, ProcessSpec};

/// Interpreters tried, in order, when no program is configured.
pub const DEFAULT_INTERPRETERS: &[&str] = &["python3", "python"];

/// Default engine timeout.
pub const DEFAULT_ENGINE_TIMEOUT: Duration = Duration::from_secs(600);

// ============================================================================
// ENGINE COMMAND
// ============================================================================

/// Program plus optional script the program runs.
///
/// Resolved once at startup and shared by every invocation.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct EngineCommand {
    pub program: PathBuf,
    pub script: Option<PathBuf>,
}

impl EngineCommand {
    /// A command used as-is, without any lookup.
    pub fn new(program: impl Into<PathBuf>, script: Option<PathBuf>) -> Self {
        Self {
            program: program.into(),
            script,
        }
    }

    /// Resolve the program and check the script exists.
    ///
    /// An explicit `program` containing a path separator must exist as a
    /// file; a bare name is looked up on `PATH`. Without one, the first of
    /// `interpreters` found on `PATH` is used.
    pub fn resolve(
        program: Option<&str>,
        interpreters: &[&str],
        script: Option<PathBuf>,
    ) -> Result<Self, EngineError> {
        let program = match program.map(str::trim).filter(|p| !p.is_empty()) {
            Some(explicit) if Path::new(explicit).components().count() > 1 => {
                let path = PathBuf::from(explicit);
                if !path.is_file() {
                    return Err(EngineError::ScriptMissing { path });
                }
                path
            }
            Some(name) => find_on_path(name).ok_or_else(|| EngineError::ScriptMissing {
                path: PathBuf::from(name),
            })?,
            None => interpreters
                .iter()
                .find_map(|name| find_on_path(name))
                .ok_or_else(|| EngineError::ScriptMissing {
                    path: PathBuf::from(interpreters.join("|")),
                })?,
        };

        if let Some(script) = &script {
            if !script.is_file() {
                return Err(EngineError::ScriptMissing {
                    path: script.clone(),
                });
            }
        }

        tracing::info!(
            program = %program.display(),
            script = ?script.as_ref().map(|s| s.display().to_string()),
            "Resolved external command"
        );
        Ok(Self { program, script })
    }

    /// Fail with `ScriptMissing` if the script disappeared since startup.
    pub fn ensure_present(&self) -> Result<(), EngineError> {
        match &self.script {
            Some(script) if !script.is_file() => Err(EngineError::ScriptMissing {
                path: script.clone(),
            }),
            _ => Ok(()),
        }
    }

    /// Process spec for this command with `args` appended after the script.
    pub fn spec(&self, label: &'static str, args: Vec<OsString>, timeout: Duration) -> ProcessSpec {
        let mut full = Vec::with_capacity(args.len() + 1);
        if let Some(script) = &self.script {
            full.push(script.clone().into_os_string());
        }
        full.extend(args);
        ProcessSpec {
            label,
            program: self.program.clone(),
            args: full,
            timeout,
        }
    }
}

fn find_on_path(name: &str) -> Option<PathBuf> {
    let paths = std::env::var_os("PATH")?;
    std::env::split_paths(&paths)
        .map(|dir| dir.join(name))
        .find(|candidate| candidate.is_file())
}

// ============================================================================
// SIDE-CHANNEL FILES
// ============================================================================

/// Write `value` as JSON to a uniquely named temporary file.
///
/// The file is removed when the returned handle is dropped.
pub fn write_side_channel(
    value: &Value,
    prefix: &str,
    dir: Option<&Path>,
) -> Result<NamedTempFile, EngineError> {
    let side_channel = |e: std::io::Error| EngineError::SideChannel {
        reason: e.to_string(),
    };

    let mut builder = tempfile::Builder::new();
    builder.prefix(prefix).suffix(".json");
    let mut file = match dir {
        Some(dir) => builder.tempfile_in(dir),
        None => builder.tempfile(),
    }
    .map_err(side_channel)?;

    serde_json::to_writer(&mut file, value).map_err(|e| EngineError::SideChannel {
        reason: e.to_string(),
    })?;
    file.flush().map_err(side_channel)?;
    Ok(file)
}

// ============================================================================
// ENGINE INVOKER
// ============================================================================

/// Runs the optimization engine for one request at a time.
#[derive(Debug, Clone)]
pub struct EngineInvoker {
    command: EngineCommand,
    output_dir: PathBuf,
    default_timeout: Duration,
    temp_dir: Option<PathBuf>,
}

impl EngineInvoker {
    pub fn new(command: EngineCommand, output_dir: impl Into<PathBuf>) -> Self {
        Self {
            command,
            output_dir: output_dir.into(),
            default_timeout: DEFAULT_ENGINE_TIMEOUT,
            temp_dir: None,
        }
    }

    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.default_timeout = timeout;
        self
    }

    /// Directory for side-channel files instead of the system temp dir.
    pub fn with_temp_dir(mut self, dir: impl Into<PathBuf>) -> Self {
        self.temp_dir = Some(dir.into());
        self
    }

    pub fn command(&self) -> &EngineCommand {
        &self.command
    }

    pub fn output_dir(&self) -> &Path {
        &self.output_dir
    }

    /// Timeout for `request`: its own override or the configured default.
    pub fn timeout_for(&self, request: &RunRequest) -> Duration {
        request
            .timeout_secs
            .map(Duration::from_secs)
            .unwrap_or(self.default_timeout)
    }

    /// Command-line arguments after the script path.
    pub fn build_args(
        &self,
        request: &RunRequest,
        raster: &RasterReference,
        terrain_file: Option<&Path>,
    ) -> Result<Vec<OsString>, EngineError> {
        let params = &request.parameters;
        let mut args: Vec<OsString> = vec![
            request.project_id.as_str().into(),
            raster.resolved.clone().into_os_string(),
            request.boundary.to_json_string().into(),
            params.cell_size.to_string().into(),
            self.output_dir.clone().into_os_string(),
        ];

        if let Some(path) = terrain_file {
            args.push("--terrain-data-file".into());
            args.push(path.as_os_str().to_owned());
        }
        if let Some(targets) = params.targets() {
            args.push("--custom-targets".into());
            args.push(to_json_arg(targets)?);
        }
        if let Some(constraints) = &params.constraints {
            args.push("--constraints".into());
            args.push(to_json_arg(constraints)?);
        }
        if let Some(tuning) = params.optimization_params.as_ref().filter(|t| !t.is_empty()) {
            args.push("--optimization-params".into());
            args.push(to_json_arg(tuning)?);
        }
        Ok(args)
    }

    /// Launch the engine and capture its output.
    ///
    /// Side-channel files live exactly as long as this call, so they are
    /// gone once it returns, whatever the outcome.
    pub async fn invoke(
        &self,
        request: &RunRequest,
        raster: &RasterReference,
    ) -> Result<CapturedOutput, EngineError> {
        self.command.ensure_present()?;
        tokio::fs::create_dir_all(&self.output_dir)
            .await
            .map_err(|e| EngineError::Io {
                reason: format!("cannot create {}: {}", self.output_dir.display(), e),
            })?;

        let terrain_file = match &request.terrain_data {
            Some(terrain) => Some(write_side_channel(
                terrain,
                "zoneopt-terrain-",
                self.temp_dir.as_deref(),
            )?),
            None => None,
        };

        let args = self.build_args(request, raster, terrain_file.as_ref().map(|f| f.path()))?;
        let spec = self
            .command
            .spec("engine", args, self.timeout_for(request));

        tracing::info!(
            project_id = %request.project_id,
            raster = %raster.resolved.display(),
            cell_size = request.parameters.cell_size,
            timeout_secs = spec.timeout.as_secs(),
            "Starting optimization engine"
        );

        let captured = run_captured(&spec).await?;
        drop(terrain_file);

        if let Some(signal) = captured.signal {
            return Err(EngineError::Signaled {
                signal: Some(signal),
            });
        }
        match captured.exit_code {
            None => return Err(EngineError::Signaled { signal: None }),
            Some(code) if code != 0 && captured.is_blank() => {
                return Err(EngineError::ExitedWithoutOutput {
                    code,
                    stderr: captured.stderr.clone(),
                });
            }
            Some(code) if code != 0 => {
                tracing::warn!(
                    project_id = %request.project_id,
                    exit_code = code,
                    "Engine exited non-zero; parsing its output"
                );
            }
            Some(_) => {}
        }

        tracing::info!(
            project_id = %request.project_id,
            exit_code = ?captured.exit_code,
            elapsed_ms = captured.elapsed.as_millis() as u64,
            lines = captured.stdout_lines.len(),
            "Optimization engine finished"
        );
        Ok(captured)
    }

    /// Invoke, recover and normalize in one step.
    pub async fn optimize(
        &self,
        request: &RunRequest,
        raster: &RasterReference,
    ) -> ZoneOptResult<EngineReport> {
        let captured = self.invoke(request, raster).await?;
        let recovered = recover_document(&captured.stdout_lines)?;
        EngineReport::from_document(recovered.document)
    }
}

fn to_json_arg<T: serde::Serialize + ?Sized>(value: &T) -> Result<OsString, EngineError> {
    serde_json::to_string(value)
        .map(OsString::from)
        .map_err(|e| EngineError::Io {
            reason: format!("cannot encode argument: {}", e),
        })
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;
    use zoneopt_core::{Boundary, LandUse, ProjectId, RasterSource, TuningParameters, UserId};

    fn request() -> RunRequest {
        RunRequest::new(
            ProjectId::new("p1"),
            UserId::new("u1"),
            Boundary::new(json!({
                "type": "Polygon",
                "coordinates": [[[0.0, 0.0], [0.01, 0.0], [0.01, 0.01], [0.0, 0.0]]]
            })),
        )
    }

    fn raster() -> RasterReference {
        RasterReference {
            logical: "/uploads/dem.tif".to_string(),
            resolved: PathBuf::from("/srv/uploads/dem.tif"),
            source: RasterSource::UploadRoot,
        }
    }

    fn invoker() -> EngineInvoker {
        EngineInvoker::new(
            EngineCommand::new("/usr/bin/python3", Some(PathBuf::from("/opt/engine/optimize.py"))),
            "/tmp/zoneopt-out",
        )
    }

    #[test]
    fn test_positional_arguments() {
        let args = invoker().build_args(&request(), &raster(), None).unwrap();
        assert_eq!(args.len(), 5);
        assert_eq!(args[0], "p1");
        assert_eq!(args[1], "/srv/uploads/dem.tif");
        assert!(args[2].to_string_lossy().contains("\"Polygon\""));
        assert_eq!(args[3], "100");
        assert_eq!(args[4], "/tmp/zoneopt-out");
    }

    #[test]
    fn test_optional_flags() {
        let mut request = request();
        request.parameters.custom_targets =
            Some([(LandUse::Residential, 1.0)].into_iter().collect());
        request.parameters.constraints = Some(json!({"max_slope": 15}));
        request.parameters.optimization_params = Some(TuningParameters {
            generations: Some(20),
            ..Default::default()
        });

        let args = invoker()
            .build_args(&request, &raster(), Some(Path::new("/tmp/terrain.json")))
            .unwrap();
        let args: Vec<String> = args.iter().map(|a| a.to_string_lossy().into_owned()).collect();
        assert_eq!(
            &args[5..],
            &[
                "--terrain-data-file",
                "/tmp/terrain.json",
                "--custom-targets",
                "{\"residential\":1.0}",
                "--constraints",
                "{\"max_slope\":15}",
                "--optimization-params",
                "{\"generations\":20}",
            ]
        );
    }

    #[test]
    fn test_spec_puts_script_first() {
        let spec = invoker().command().spec("engine", vec!["a".into()], Duration::from_secs(1));
        assert_eq!(spec.program, PathBuf::from("/usr/bin/python3"));
        assert_eq!(spec.args, vec![OsString::from("/opt/engine/optimize.py"), "a".into()]);
    }

    #[test]
    fn test_timeout_override() {
        let mut request = request();
        assert_eq!(invoker().timeout_for(&request), DEFAULT_ENGINE_TIMEOUT);
        request.timeout_secs = Some(5);
        assert_eq!(invoker().timeout_for(&request), Duration::from_secs(5));
    }

    #[test]
    fn test_resolve_reports_missing_script() {
        let err = EngineCommand::resolve(
            Some("/bin/sh"),
            DEFAULT_INTERPRETERS,
            Some(PathBuf::from("/nonexistent/optimize.py")),
        )
        .unwrap_err();
        assert_eq!(
            err,
            EngineError::ScriptMissing {
                path: PathBuf::from("/nonexistent/optimize.py")
            }
        );
    }

    #[test]
    fn test_resolve_reports_missing_program() {
        let err = EngineCommand::resolve(Some("/nonexistent/python9"), &[], None).unwrap_err();
        assert!(matches!(err, EngineError::ScriptMissing { .. }));

        let err = EngineCommand::resolve(None, &["zoneopt-no-such-interpreter"], None).unwrap_err();
        assert!(matches!(err, EngineError::ScriptMissing { .. }));
    }

    #[test]
    fn test_side_channel_file_is_removed_on_drop() {
        let dir = tempfile::tempdir().unwrap();
        let file = write_side_channel(&json!({"mean_slope": 4.2}), "zoneopt-terrain-", Some(dir.path()))
            .unwrap();
        let path = file.path().to_path_buf();
        let written: Value = serde_json::from_slice(&std::fs::read(&path).unwrap()).unwrap();
        assert_eq!(written, json!({"mean_slope": 4.2}));

        drop(file);
        assert!(!path.exists());
        assert_eq!(std::fs::read_dir(dir.path()).unwrap().count(), 0);
    }
}
