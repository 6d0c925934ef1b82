//! Typed failure taxonomy for the build pipeline.
//!
//! Every stage of a build — spawning nix, waiting for it, decoding its JSON
//! output, shipping the artifact, deleting it from the store — reports through
//! this one enum so callers can match on the discriminant.

use thiserror::Error;

#[derive(Debug, Error)]
pub enum BuilderError {
    /// The build exceeded its deadline, was killed by a signal, or nix
    /// reported a user interruption.
    #[error("build timed out")]
    Timeout,

    /// nix exited nonzero for an ordinary build failure.
    #[error("nix build failed with code {code}: {stderr}")]
    Build { code: i32, stderr: String },

    /// nix exited 0 but its stdout was not the expected JSON document.
    #[error("invalid build output: {0}")]
    MalformedOutput(String),

    /// The JSON document decoded but had no entry for the requested output.
    #[error("build produced no output named '{0}'")]
    MissingOutput(String),

    /// The target could not be resolved to a buildable attribute.
    #[error("cannot locate target: {0}")]
    Locate(String),

    /// `start()` was called on a session that already ran.
    #[error("build session was already started")]
    AlreadyStarted,

    /// The artifact POST to the callback URL failed.
    #[error("artifact delivery failed: {0}")]
    Delivery(String),

    /// `nix store delete` exited nonzero.
    #[error("store cleanup failed: {0}")]
    Cleanup(String),

    /// The builder process could not be spawned or awaited.
    #[error("failed to run builder process: {0}")]
    Process(#[from] std::io::Error),
}
