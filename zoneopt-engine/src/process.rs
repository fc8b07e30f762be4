//! Subprocess runner shared by the engine and network invokers.
//!
//! Standard output is collected line by line, standard error is collected
//! separately and echoed to the log. The whole exchange is bounded by a
//! timeout; on expiry the child is killed and reaped before returning.

use std::ffi::OsString;
use std::path::PathBuf;
use std::process::{ExitStatus, Stdio};
use std::time::{Duration, Instant};
use tokio::io::{AsyncBufReadExt, AsyncRead, BufReader};
use tokio::process::Command;
use zoneopt_core::EngineError;

/// One subprocess invocation.
#[derive(Debug, Clone)]
pub struct ProcessSpec {
    /// Short name used in log lines ("engine", "network").
    pub label: &'static str,
    pub program: PathBuf,
    pub args: Vec<OsString>,
    pub timeout: Duration,
}

/// What a finished subprocess left behind.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CapturedOutput {
    /// Standard output, one entry per line, in order.
    pub stdout_lines: Vec<String>,
    pub stderr: String,
    /// `None` when the process was terminated by a signal.
    pub exit_code: Option<i32>,
    pub signal: Option<i32>,
    pub elapsed: Duration,
}

impl CapturedOutput {
    pub fn success(&self) -> bool {
        self.exit_code == Some(0)
    }

    /// True when nothing but whitespace reached standard output.
    pub fn is_blank(&self) -> bool {
        self.stdout_lines.iter().all(|l| l.trim().is_empty())
    }
}

/// Run `spec` to completion, or until its timeout elapses.
pub async fn run_captured(spec: &ProcessSpec) -> Result<CapturedOutput, EngineError> {
    let started = Instant::now();
    let mut command = Command::new(&spec.program);
    command
        .args(&spec.args)
        .stdin(Stdio::null())
        .stdout(Stdio::piped())
        .stderr(Stdio::piped())
        .kill_on_drop(true);

    let mut child = command.spawn().map_err(|e| EngineError::LaunchFailed {
        program: spec.program.display().to_string(),
        reason: e.to_string(),
    })?;

    let stdout = child.stdout.take().ok_or_else(|| EngineError::Io {
        reason: "stdout was not captured".to_string(),
    })?;
    let stderr = child.stderr.take().ok_or_else(|| EngineError::Io {
        reason: "stderr was not captured".to_string(),
    })?;

    let label = spec.label;
    let exchange = async {
        let (stdout_lines, stderr_lines, status) = tokio::join!(
            read_lines(stdout, |_| {}),
            read_lines(stderr, |line| tracing::warn!(process = label, "{}", line)),
            child.wait(),
        );
        Ok::<_, std::io::Error>((stdout_lines?, stderr_lines?, status?))
    };

    let outcome = tokio::time::timeout(spec.timeout, exchange).await;
    match outcome {
        Ok(Ok((stdout_lines, stderr_lines, status))) => {
            let elapsed = started.elapsed();
            tracing::debug!(
                process = label,
                exit_code = ?status.code(),
                elapsed_ms = elapsed.as_millis() as u64,
                lines = stdout_lines.len(),
                "Subprocess finished"
            );
            Ok(CapturedOutput {
                stdout_lines,
                stderr: stderr_lines.join("\n"),
                exit_code: status.code(),
                signal: exit_signal(&status),
                elapsed,
            })
        }
        Ok(Err(e)) => Err(EngineError::Io {
            reason: e.to_string(),
        }),
        Err(_) => {
            if let Err(e) = child.kill().await {
                tracing::warn!(process = label, error = %e, "Failed to kill timed-out subprocess");
            }
            tracing::warn!(
                process = label,
                timeout_ms = spec.timeout.as_millis() as u64,
                "Subprocess timed out"
            );
            Err(EngineError::TimedOut {
                after_secs: spec.timeout.as_secs(),
            })
        }
    }
}

/// Read a pipe to EOF, splitting on newlines. Invalid UTF-8 is replaced
/// rather than aborting the read.
async fn read_lines<R, F>(pipe: R, mut on_line: F) -> std::io::Result<Vec<String>>
where
    R: AsyncRead + Unpin,
    F: FnMut(&str),
{
    let mut segments = BufReader::new(pipe).split(b'\n');
    let mut lines = Vec::new();
    while let Some(segment) = segments.next_segment().await? {
        let line = String::from_utf8_lossy(&segment)
            .trim_end_matches('\r')
            .to_string();
        on_line(&line);
        lines.push(line);
    }
    Ok(lines)
}

#[cfg(unix)]
fn exit_signal(status: &ExitStatus) -> Option<i32> {
    use std::os::unix::process::ExitStatusExt;
    status.signal()
}

#[cfg(not(unix))]
fn exit_signal(_status: &ExitStatus) -> Option<i32> {
    None
}

#[cfg(all(test, unix))]
mod tests {
    use super::*;

    fn sh(script: &str, timeout: Duration) -> ProcessSpec {
        ProcessSpec {
            label: "test",
            program: PathBuf::from("/bin/sh"),
            args: vec![OsString::from("-c"), OsString::from(script)],
            timeout,
        }
    }

    #[tokio::test]
    async fn test_captures_stdout_lines_and_stderr_separately() {
        let out = run_captured(&sh(
            "echo first; echo oops >&2; printf 'second\\r\\n'",
            Duration::from_secs(5),
        ))
        .await
        .unwrap();
        assert!(out.success());
        assert_eq!(out.stdout_lines, vec!["first", "second"]);
        assert_eq!(out.stderr, "oops");
    }

    #[tokio::test]
    async fn test_nonzero_exit_is_reported_not_raised() {
        let out = run_captured(&sh("echo partial; exit 3", Duration::from_secs(5)))
            .await
            .unwrap();
        assert_eq!(out.exit_code, Some(3));
        assert!(!out.is_blank());
    }

    #[tokio::test]
    async fn test_signal_exit_has_no_code() {
        let out = run_captured(&sh("kill -9 $$", Duration::from_secs(5)))
            .await
            .unwrap();
        assert_eq!(out.exit_code, None);
        assert_eq!(out.signal, Some(9));
    }

    #[tokio::test]
    async fn test_timeout_kills_child() {
        let started = Instant::now();
        let err = run_captured(&sh("sleep 30", Duration::from_secs(1)))
            .await
            .unwrap_err();
        assert_eq!(err, EngineError::TimedOut { after_secs: 1 });
        assert!(started.elapsed() < Duration::from_secs(10));
    }

    #[tokio::test]
    async fn test_missing_program_fails_to_launch() {
        let spec = ProcessSpec {
            label: "test",
            program: PathBuf::from("/nonexistent/zoneopt-engine"),
            args: Vec::new(),
            timeout: Duration::from_secs(1),
        };
        assert!(matches!(
            run_captured(&spec).await,
            Err(EngineError::LaunchFailed { .. })
        ));
    }
}
