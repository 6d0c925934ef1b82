use std::time::Duration;
use anyhow::{bail, Result};
use clap::Parser;
use tokio::net::TcpListener;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

use cliquer::builder::BuilderOptions;
use cliquer::nix;
use cliquer::server::{app, AppState};

#[derive(Parser, Debug)]
#[command(name = "cliquer", version, about = "Nix flake build service")]
struct Cli {
    /// Server host and port
    #[arg(long, default_value = "127.0.0.1:8000")]
    bind: String,
    /// Builder command
    #[arg(long, default_value = "nix")]
    nix_cmd: String,
    /// Extra argument appended to every build invocation (repeatable)
    #[arg(long = "nix-arg")]
    nix_args: Vec<String>,
    /// Per-build deadline in seconds (unbounded when absent)
    #[arg(long)]
    timeout: Option<u64>,
    /// Probe targets with a dry run before accepting a build
    #[arg(long)]
    probe: bool,
    /// Maximum number of tracked builds
    #[arg(long, default_value_t = 1000)]
    capacity: usize,
    /// Seconds an untouched build stays pollable
    #[arg(long, default_value_t = 3600)]
    ttl: u64,
    /// Verbose logs
    #[arg(short, long)]
    verbose: bool,
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    let filter = if cli.verbose { "info" } else { "warn" };
    tracing_subscriber::registry()
        .with(tracing_subscriber::EnvFilter::new(
            std::env::var("CLIQUER_LOG").unwrap_or_else(|_| filter.into()),
        ))
        .with(tracing_subscriber::fmt::layer())
        .init();

    if which::which(&cli.nix_cmd).is_err() {
        bail!("{} not found in PATH", cli.nix_cmd);
    }
    let system = nix::current_system().await?;

    let options = BuilderOptions {
        nix_cmd: cli.nix_cmd,
        nix_args: cli.nix_args,
        timeout: cli.timeout.map(Duration::from_secs),
        system: Some(system),
    };
    let state = AppState::new(
        options,
        cli.probe,
        cli.capacity,
        Duration::from_secs(cli.ttl),
    );

    let listener = TcpListener::bind(&cli.bind).await?;
    println!("Server listening on http://{}", cli.bind);
    axum::serve(listener, app(state)).await?;
    Ok(())
}
