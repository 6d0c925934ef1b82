//! Queries against the local nix installation.

use std::sync::OnceLock;
use anyhow::{bail, Context, Result};
use regex::Regex;
use tokio::process::Command;
use tracing::info;

/// `builtins.currentSystem` prints a quoted string, e.g. `"x86_64-linux"`.
fn quoted_re() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| Regex::new(r#""(.*)""#).unwrap())
}

fn parse_system(stdout: &str) -> Option<String> {
    quoted_re()
        .captures(stdout.trim())
        .and_then(|c| c.get(1))
        .map(|m| m.as_str().to_string())
}

/// Resolves the platform identifier builds are targeted at: the `NIX_SYSTEM`
/// environment variable when set, otherwise the local nix installation's
/// `builtins.currentSystem`.
pub async fn current_system() -> Result<String> {
    if let Ok(system) = std::env::var("NIX_SYSTEM") {
        if !system.is_empty() {
            info!("using nix system from NIX_SYSTEM: {system}");
            return Ok(system);
        }
    }

    let out = Command::new("nix-instantiate")
        .args(["--eval", "-E", "builtins.currentSystem"])
        .output()
        .await
        .context("running nix-instantiate")?;
    if !out.status.success() {
        bail!(
            "nix-instantiate exited with {}: {}",
            out.status,
            String::from_utf8_lossy(&out.stderr).trim()
        );
    }

    let stdout = String::from_utf8_lossy(&out.stdout);
    let system = parse_system(&stdout)
        .with_context(|| format!("unexpected nix-instantiate output: {}", stdout.trim()))?;
    info!("detected nix system: {system}");
    Ok(system)
}
