//! Build sessions: one `Builder` per accepted build request.
//!
//! A session owns the target/output/inputs triple, the accumulated log
//! buffer, and the lifecycle status. `start()` composes the process
//! supervisor and the output parser, then hands the resolved artifact to the
//! registered completion callback. Terminal states are final; a session is
//! never restarted.

pub mod output;
pub mod process;

use std::sync::Arc;
use std::time::Duration;
use chrono::{DateTime, Utc};
use futures_util::future::BoxFuture;
use regex::Regex;
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use std::sync::OnceLock;
use tokio::process::Command;
use tokio::sync::Mutex;
use tracing::info;

use crate::errors::BuilderError;

/// Shared append-only stdout buffer of one session.
pub type LogBuffer = Arc<Mutex<String>>;

/// Invoked with the artifact store path once a build succeeds.
pub type DoneCallback = Box<dyn Fn(String) -> BoxFuture<'static, ()> + Send + Sync>;

/// Flags passed to every `nix build` invocation.
const BASE_BUILD_OPTIONS: &[&str] = &[
    "--no-link", // do not create result symlinks
    "--json",    // machine-parseable output
];

/// The store output the artifact is read from.
const STORE_OUTPUT: &str = "out";

/// Deadline for the optional dry-run probe; probes only evaluate, so they
/// should come back well before this.
const LOCATE_TIMEOUT: Duration = Duration::from_secs(30);

fn locate_re() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| {
        Regex::new(r"does not provide attribute|cannot find flake|does not exist").unwrap()
    })
}

/// Lifecycle status of a session. Serialized kebab-case over the wire.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum BuildStatus {
    Pending,
    Running,
    Succeeded,
    Failed,
    TimedOut,
}

/// How the external builder is invoked. Immutable once a session starts.
#[derive(Debug, Clone)]
pub struct BuilderOptions {
    /// Builder command, `nix` unless overridden.
    pub nix_cmd: String,
    /// Extra arguments appended to every build invocation.
    pub nix_args: Vec<String>,
    /// Per-build deadline; unbounded when absent.
    pub timeout: Option<Duration>,
    /// Platform passed as `--system` to select the right output variant.
    pub system: Option<String>,
}

impl Default for BuilderOptions {
    fn default() -> Self {
        Self {
            nix_cmd: "nix".to_string(),
            nix_args: Vec::new(),
            timeout: None,
            system: None,
        }
    }
}

#[derive(Debug)]
struct BuildState {
    status: BuildStatus,
    artifact: Option<String>,
    started_at: Option<DateTime<Utc>>,
}

pub struct Builder {
    target: String,
    output: String,
    inputs: Map<String, Value>,
    options: BuilderOptions,
    callback: Option<DoneCallback>,
    logs: LogBuffer,
    state: Mutex<BuildState>,
}

impl Builder {
    pub fn new(
        target: impl Into<String>,
        output: impl Into<String>,
        inputs: Map<String, Value>,
        options: BuilderOptions,
        callback: Option<DoneCallback>,
    ) -> Self {
        Self {
            target: target.into(),
            output: output.into(),
            inputs,
            options,
            callback,
            logs: Arc::new(Mutex::new(String::new())),
            state: Mutex::new(BuildState {
                status: BuildStatus::Pending,
                artifact: None,
                started_at: None,
            }),
        }
    }

    pub fn target(&self) -> &str {
        &self.target
    }

    pub fn output(&self) -> &str {
        &self.output
    }

    pub async fn status(&self) -> BuildStatus {
        self.state.lock().await.status
    }

    pub async fn started_at(&self) -> Option<DateTime<Utc>> {
        self.state.lock().await.started_at
    }

    pub async fn artifact(&self) -> Option<String> {
        self.state.lock().await.artifact.clone()
    }

    /// Snapshot of the accumulated build log. Safe to call at any point,
    /// including while the build is still running.
    pub async fn logs(&self) -> String {
        self.logs.lock().await.clone()
    }

    /// Argument vector for the main build invocation.
    fn build_args(&self) -> Vec<String> {
        let mut args = vec![
            "build".to_string(),
            format!("{}#{}", self.target, self.output),
        ];
        args.extend(BASE_BUILD_OPTIONS.iter().map(|s| s.to_string()));
        if let Some(system) = &self.options.system {
            args.push("--system".to_string());
            args.push(system.clone());
        }
        args.extend(input_flags(&self.inputs));
        args.extend(self.options.nix_args.iter().cloned());
        args
    }

    /// Dry-run probe: fails fast on targets nix cannot resolve, without
    /// building anything. A nonzero exit whose stderr carries the locate
    /// signature becomes [`BuilderError::Locate`]; other failures pass
    /// through unchanged.
    pub async fn locate(&self) -> Result<(), BuilderError> {
        let mut args = self.build_args();
        args.push("--dry-run".to_string());
        match process::run(
            &self.options.nix_cmd,
            &args,
            Some(LOCATE_TIMEOUT),
            self.logs.clone(),
        )
        .await
        {
            Ok(_) => Ok(()),
            Err(BuilderError::Build { stderr, .. }) if locate_re().is_match(&stderr) => {
                Err(BuilderError::Locate(stderr.trim().to_string()))
            }
            Err(e) => Err(e),
        }
    }

    /// Runs the build to completion. Transitions `pending -> running`, then
    /// to `succeeded` (recording the artifact and invoking the completion
    /// callback) or to `failed`/`timed-out`. A second call is rejected.
    pub async fn start(&self) -> Result<String, BuilderError> {
        {
            let mut state = self.state.lock().await;
            if state.status != BuildStatus::Pending {
                return Err(BuilderError::AlreadyStarted);
            }
            state.status = BuildStatus::Running;
            state.started_at = Some(Utc::now());
        }

        info!("building {}#{}", self.target, self.output);
        let result = match process::run(
            &self.options.nix_cmd,
            &self.build_args(),
            self.options.timeout,
            self.logs.clone(),
        )
        .await
        {
            Ok(stdout) => output::parse(&stdout)
                .and_then(|out| out.path_for(STORE_OUTPUT).map(str::to_string)),
            Err(e) => Err(e),
        };

        match result {
            Ok(path) => {
                {
                    let mut state = self.state.lock().await;
                    state.status = BuildStatus::Succeeded;
                    state.artifact = Some(path.clone());
                }
                info!("build of {}#{} resolved to {path}", self.target, self.output);
                if let Some(callback) = &self.callback {
                    callback(path.clone()).await;
                }
                Ok(path)
            }
            Err(e) => {
                let mut state = self.state.lock().await;
                state.status = match e {
                    BuilderError::Timeout => BuildStatus::TimedOut,
                    _ => BuildStatus::Failed,
                };
                Err(e)
            }
        }
    }

    /// Deletes the resolved artifact from the store. A session that never
    /// resolved an artifact has nothing to delete and succeeds trivially.
    pub async fn cleanup(&self) -> Result<(), BuilderError> {
        let artifact = { self.state.lock().await.artifact.clone() };
        let Some(path) = artifact else {
            return Ok(());
        };

        info!("deleting {path} from the store");
        let out = Command::new(&self.options.nix_cmd)
            .args(["store", "delete", &path])
            .output()
            .await?;
        if !out.status.success() {
            return Err(BuilderError::Cleanup(
                String::from_utf8_lossy(&out.stderr).trim().to_string(),
            ));
        }
        Ok(())
    }
}

/// Serializes nested build inputs as `--override-input` flags, nesting
/// flattened to `/`-joined paths. Strings pass through; other values are
/// rendered as JSON.
fn input_flags(inputs: &Map<String, Value>) -> Vec<String> {
    let mut flags = Vec::new();
    flatten_inputs(None, inputs, &mut flags);
    flags
}

fn flatten_inputs(prefix: Option<&str>, inputs: &Map<String, Value>, flags: &mut Vec<String>) {
    for (key, value) in inputs {
        let path = match prefix {
            Some(p) => format!("{p}/{key}"),
            None => key.clone(),
        };
        match value {
            Value::Object(nested) => flatten_inputs(Some(&path), nested, flags),
            Value::String(s) => {
                flags.push("--override-input".to_string());
                flags.push(path);
                flags.push(s.clone());
            }
            other => {
                flags.push("--override-input".to_string());
                flags.push(path);
                flags.push(other.to_string());
            }
        }
    }
}
