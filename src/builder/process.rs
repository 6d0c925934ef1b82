//! Supervision of a single nix subprocess.
//!
//! Spawns the command with piped stdio, pumps stdout into the session log
//! buffer (and the tracing sink) as it arrives, accumulates stderr separately,
//! enforces an optional deadline, and classifies the exit into the
//! [`BuilderError`] taxonomy.

use std::process::Stdio;
use std::sync::OnceLock;
use std::time::Duration;
use regex::Regex;
use tokio::io::{AsyncBufReadExt, BufReader};
use tokio::process::Command;
use tracing::debug;

use crate::builder::LogBuffer;
use crate::errors::BuilderError;

/// What nix prints on stderr when a build is cancelled with Ctrl-C. A nonzero
/// exit carrying this signature is treated the same as a deadline expiry.
fn interrupted_re() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| Regex::new(r"interrupted by the user").unwrap())
}

/// Runs `cmd` with `args` to completion and returns the stdout captured by
/// this invocation. Stdout is also appended to `logs` chunk by chunk, so
/// the session log stays readable while the process runs.
pub async fn run(
    cmd: &str,
    args: &[String],
    timeout: Option<Duration>,
    logs: LogBuffer,
) -> Result<String, BuilderError> {
    debug!("executing command: {} {}", cmd, args.join(" "));

    let mut child = Command::new(cmd)
        .args(args)
        .stdin(Stdio::null())
        .stdout(Stdio::piped())
        .stderr(Stdio::piped())
        .kill_on_drop(true)
        .spawn()?;

    let stdout = child.stdout.take().unwrap();
    let stderr = child.stderr.take().unwrap();
    let mut out_reader = BufReader::new(stdout);
    let mut err_reader = BufReader::new(stderr);

    let pump_out = tokio::spawn(async move {
        let mut captured = String::new();
        let mut line = String::new();
        while out_reader.read_line(&mut line).await.unwrap_or(0) > 0 {
            debug!(target: "cliquer::nix", "{}", line.trim_end());
            logs.lock().await.push_str(&line);
            captured.push_str(&line);
            line.clear();
        }
        captured
    });

    let pump_err = tokio::spawn(async move {
        let mut captured = String::new();
        let mut line = String::new();
        while err_reader.read_line(&mut line).await.unwrap_or(0) > 0 {
            captured.push_str(&line);
            line.clear();
        }
        captured
    });

    let status = match timeout {
        Some(limit) => match tokio::time::timeout(limit, child.wait()).await {
            Ok(status) => status?,
            Err(_) => {
                debug!("deadline of {limit:?} elapsed, killing builder process");
                let _ = child.kill().await;
                let _ = pump_out.await;
                let _ = pump_err.await;
                return Err(BuilderError::Timeout);
            }
        },
        None => child.wait().await?,
    };

    // Classification happens only after both streams have drained, so the
    // captured output is complete.
    let captured = pump_out.await.unwrap_or_default();
    let err_buffer = pump_err.await.unwrap_or_default();

    debug!("builder process exited with {status}");
    match status.code() {
        // Killed by a signal: the only thing that signals the child is our
        // own timeout enforcement.
        None => Err(BuilderError::Timeout),
        Some(0) => Ok(captured),
        Some(code) => {
            if interrupted_re().is_match(&err_buffer) {
                Err(BuilderError::Timeout)
            } else {
                Err(BuilderError::Build { code, stderr: err_buffer })
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Arc;
    use tokio::sync::Mutex;

    fn sink() -> LogBuffer {
        Arc::new(Mutex::new(String::new()))
    }

    fn sh(script: &str) -> Vec<String> {
        vec!["-c".to_string(), script.to_string()]
    }

    #[tokio::test]
    async fn captures_stdout_on_clean_exit() {
        let logs = sink();
        let out = run("sh", &sh("echo hello; echo world"), None, logs.clone())
            .await
            .unwrap();
        assert_eq!(out, "hello\nworld\n");
        assert_eq!(logs.lock().await.as_str(), "hello\nworld\n");
    }

    #[tokio::test]
    async fn nonzero_exit_is_a_build_failure_with_stderr() {
        let err = run("sh", &sh("echo oops >&2; exit 3"), None, sink())
            .await
            .unwrap_err();
        match err {
            BuilderError::Build { code, stderr } => {
                assert_eq!(code, 3);
                assert_eq!(stderr.trim(), "oops");
            }
            other => panic!("expected Build, got {other:?}"),
        }
    }

    #[tokio::test]
    async fn interrupted_signature_maps_to_timeout() {
        let err = run(
            "sh",
            &sh("echo 'error: interrupted by the user' >&2; exit 1"),
            None,
            sink(),
        )
        .await
        .unwrap_err();
        assert!(matches!(err, BuilderError::Timeout));
    }

    #[tokio::test]
    async fn deadline_kills_the_process() {
        let logs = sink();
        let err = run(
            "sh",
            &sh("echo started; sleep 10"),
            Some(Duration::from_millis(200)),
            logs.clone(),
        )
        .await
        .unwrap_err();
        assert!(matches!(err, BuilderError::Timeout));
        // Output captured before the kill is still readable.
        assert_eq!(logs.lock().await.as_str(), "started\n");
    }

    #[tokio::test]
    async fn signal_death_maps_to_timeout() {
        let err = run("sh", &sh("kill -9 $$"), None, sink()).await.unwrap_err();
        assert!(matches!(err, BuilderError::Timeout));
    }

    #[tokio::test]
    async fn missing_binary_is_a_process_error() {
        let err = run("definitely-not-a-binary", &[], None, sink())
            .await
            .unwrap_err();
        assert!(matches!(err, BuilderError::Process(_)));
    }
}
