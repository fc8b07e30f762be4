//! ZoneOpt command-line entry point.
//!
//! ```text
//! zoneopt [--config <path>] run <request.json>
//! zoneopt [--config <path>] validate <request.json>
//! zoneopt [--config <path>] show <project-id>
//! zoneopt [--config <path>] delete <project-id>
//! ```
//!
//! Results are printed to stdout as JSON. Failures are printed to stderr as
//! a JSON error object and reflected in the exit code.

use std::path::{Path, PathBuf};
use std::process::ExitCode;

use zoneopt_core::{ProjectId, RunRequest};
use zoneopt_service::{
    init_tracing, open_persistent_store, OptimizationService, ServiceConfig, ServiceError,
    ServiceResult,
};

const USAGE: &str =
    "usage: zoneopt [--config <path>] <run <request.json> | validate <request.json> | show <project-id> | delete <project-id>>";

enum Command {
    Run(PathBuf),
    Validate(PathBuf),
    Show(ProjectId),
    Delete(ProjectId),
}

impl Command {
    fn from_args(mut args: impl Iterator<Item = String>) -> ServiceResult<Self> {
        let mut positional = Vec::new();
        while let Some(arg) = args.next() {
            if arg == "--config" {
                args.next();
                continue;
            }
            positional.push(arg);
        }

        match positional.as_slice() {
            [cmd, target] if cmd == "run" => Ok(Command::Run(PathBuf::from(target))),
            [cmd, target] if cmd == "validate" => Ok(Command::Validate(PathBuf::from(target))),
            [cmd, target] if cmd == "show" => Ok(Command::Show(ProjectId::new(target.as_str()))),
            [cmd, target] if cmd == "delete" => {
                Ok(Command::Delete(ProjectId::new(target.as_str())))
            }
            _ => Err(ServiceError::invalid_input(USAGE)),
        }
    }
}

#[tokio::main]
async fn main() -> ExitCode {
    match run_cli().await {
        Ok(code) => code,
        Err(err) => {
            let rendered = serde_json::to_string(&err).unwrap_or_else(|_| err.to_string());
            eprintln!("{}", rendered);
            ExitCode::from(err.code.exit_code())
        }
    }
}

async fn run_cli() -> ServiceResult<ExitCode> {
    let command = Command::from_args(std::env::args().skip(1))?;
    let config = ServiceConfig::load()?;
    init_tracing(config.log_format).map_err(ServiceError::internal_error)?;

    match command {
        Command::Validate(path) => {
            let request = read_request(&path).await?;
            let report = OptimizationService::validate(&request);
            print_json(&report)?;
            Ok(if report.is_valid {
                ExitCode::SUCCESS
            } else {
                ExitCode::from(zoneopt_service::ErrorCode::InvalidInput.exit_code())
            })
        }
        Command::Run(path) => {
            let request = read_request(&path).await?;
            let service = OptimizationService::from_config(&config).await?;
            let run = service.run(request).await?;
            print_json(&run)?;
            Ok(ExitCode::SUCCESS)
        }
        Command::Show(project_id) => {
            let store = open_persistent_store(&config.storage).await?;
            let run = store.get_run(&project_id).await?.ok_or_else(|| {
                ServiceError::not_found(format!("No optimization run for project {}", project_id))
            })?;
            print_json(&run)?;
            Ok(ExitCode::SUCCESS)
        }
        Command::Delete(project_id) => {
            let store = open_persistent_store(&config.storage).await?;
            let deleted = store.delete_run(&project_id).await?;
            print_json(&serde_json::json!({ "projectId": project_id, "deleted": deleted }))?;
            Ok(ExitCode::SUCCESS)
        }
    }
}

async fn read_request(path: &Path) -> ServiceResult<RunRequest> {
    let contents = tokio::fs::read_to_string(path).await.map_err(|e| {
        ServiceError::invalid_input(format!("Cannot read {}: {}", path.display(), e))
    })?;
    Ok(serde_json::from_str(&contents)?)
}

fn print_json<T: serde::Serialize>(value: &T) -> ServiceResult<()> {
    let rendered = serde_json::to_string_pretty(value)
        .map_err(|e| ServiceError::internal_error(format!("Cannot encode output: {}", e)))?;
    println!("{}", rendered);
    Ok(())
}
