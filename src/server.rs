//! HTTP surface: accept build requests, poll build status, serve the API
//! document. Everything here is thin glue over the builder core.

use std::sync::Arc;
use std::sync::OnceLock;
use axum::extract::{Path, State};
use axum::http::StatusCode;
use axum::routing::{get, post};
use axum::{Json, Router};
use regex::Regex;
use serde::Deserialize;
use serde_json::{json, Map, Value};
use tokio::sync::Mutex;
use tower_http::cors::CorsLayer;
use tower_http::trace::TraceLayer;
use tracing::{error, info, warn};
use url::Url;
use uuid::Uuid;

use crate::builder::{Builder, BuilderOptions, DoneCallback};
use crate::delivery;
use crate::docs;
use crate::errors::BuilderError;
use crate::registry::Registry;

/// Accepted flake target providers, `provider:owner/repo[/ref]`.
fn target_re() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| {
        Regex::new(r"^(github|gitlab|bitbucket):[\w.-]+/[\w.-]+(/[\w.-]+)?$").unwrap()
    })
}

fn output_re() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| Regex::new(r"^[a-zA-Z_][a-zA-Z0-9_'.\-]*$").unwrap())
}

#[derive(Clone)]
pub struct AppState {
    pub builds: Arc<Mutex<Registry<Arc<Builder>>>>,
    pub options: BuilderOptions,
    /// Run a synchronous dry-run probe before accepting a build.
    pub probe: bool,
}

impl AppState {
    pub fn new(
        options: BuilderOptions,
        probe: bool,
        capacity: usize,
        ttl: std::time::Duration,
    ) -> Self {
        Self {
            builds: Arc::new(Mutex::new(Registry::new(capacity, ttl))),
            options,
            probe,
        }
    }
}

pub fn app(state: AppState) -> Router {
    Router::new()
        .route("/builds", post(handle_post_build))
        .route("/builds/:id", get(handle_get_build))
        .route("/docs.json", get(handle_docs))
        .layer(TraceLayer::new_for_http())
        .layer(CorsLayer::permissive())
        .with_state(state)
}

fn default_output() -> String {
    "default".to_string()
}

#[derive(Debug, Deserialize)]
pub struct BuildRequest {
    pub target: String,
    #[serde(default = "default_output")]
    pub output: String,
    pub callback: String,
    #[serde(default)]
    pub inputs: Map<String, Value>,
}

/// Input values may be strings, numbers, booleans, nested mappings, or
/// arrays of primitives. Nulls have no builder-side rendering.
fn valid_input_value(value: &Value) -> bool {
    match value {
        Value::String(_) | Value::Number(_) | Value::Bool(_) => true,
        Value::Object(nested) => nested.values().all(valid_input_value),
        Value::Array(items) => items
            .iter()
            .all(|i| matches!(i, Value::String(_) | Value::Number(_) | Value::Bool(_))),
        Value::Null => false,
    }
}

/// Validates the request and parses the callback. `Err` carries every
/// validation message at once.
fn validate(req: &BuildRequest) -> Result<Url, Vec<String>> {
    let mut errors = Vec::new();
    if !target_re().is_match(&req.target) {
        errors.push(format!(
            "target '{}' is not a valid github/gitlab/bitbucket flake uri",
            req.target
        ));
    }
    if !output_re().is_match(&req.output) {
        errors.push(format!("output '{}' is not a valid attribute name", req.output));
    }
    let callback = Url::parse(&req.callback)
        .map_err(|_| errors.push(format!("callback '{}' is not a valid url", req.callback)))
        .ok();
    if !req.inputs.values().all(valid_input_value) {
        errors.push("inputs may only hold strings, numbers, booleans, nested mappings, and arrays of primitives".to_string());
    }
    match callback {
        Some(url) if errors.is_empty() => Ok(url),
        _ => Err(errors),
    }
}

#[axum::debug_handler]
async fn handle_post_build(
    State(state): State<AppState>,
    Json(req): Json<BuildRequest>,
) -> (StatusCode, Json<Value>) {
    info!("received build request for {}#{}", req.target, req.output);

    let callback_url = match validate(&req) {
        Ok(url) => url,
        Err(errors) => {
            return (StatusCode::BAD_REQUEST, Json(json!({ "errors": errors })));
        }
    };

    let on_done: DoneCallback = {
        let callback_url = callback_url.clone();
        Box::new(move |artifact: String| {
            let callback_url = callback_url.clone();
            Box::pin(async move {
                if let Err(e) = delivery::deliver(&artifact, &callback_url).await {
                    warn!("delivery to {callback_url} failed: {e}");
                }
            })
        })
    };

    let builder = Arc::new(Builder::new(
        req.target.clone(),
        req.output.clone(),
        req.inputs,
        state.options.clone(),
        Some(on_done),
    ));

    // Optional fail-fast pre-check before acknowledging the request.
    if state.probe {
        match builder.locate().await {
            Ok(()) => {}
            Err(e @ BuilderError::Locate(_)) => {
                return (StatusCode::NOT_FOUND, Json(json!({ "error": e.to_string() })));
            }
            Err(e) => {
                return (
                    StatusCode::INTERNAL_SERVER_ERROR,
                    Json(json!({ "error": e.to_string() })),
                );
            }
        }
    }

    let build_id = Uuid::new_v4().to_string();
    state
        .builds
        .lock()
        .await
        .put(build_id.clone(), builder.clone());

    // Fire and forget: the request is acknowledged now, failures from here
    // on are only logged.
    let (target, output) = (req.target, req.output);
    tokio::spawn(async move {
        match builder.start().await {
            Ok(artifact) => {
                info!("build of {target}#{output} complete: {artifact}");
                if let Err(e) = builder.cleanup().await {
                    warn!("cleanup after {target}#{output} failed: {e}");
                }
            }
            Err(e) => error!("build of {target}#{output} failed: {e}"),
        }
    });

    (StatusCode::ACCEPTED, Json(json!({ "buildId": build_id })))
}

#[axum::debug_handler]
async fn handle_get_build(
    State(state): State<AppState>,
    Path(build_id): Path<String>,
) -> (StatusCode, Json<Value>) {
    let mut builds = state.builds.lock().await;
    match builds.get(&build_id) {
        Some(builder) => {
            let started_at = builder.started_at().await.map(|t| t.to_rfc3339());
            let status = builder.status().await;
            (
                StatusCode::OK,
                Json(json!({
                    "build": {
                        "startedAt": started_at,
                        "buildInfo": { "status": status }
                    }
                })),
            )
        }
        None => (
            StatusCode::NOT_FOUND,
            Json(json!({ "error": "Build not found" })),
        ),
    }
}

async fn handle_docs() -> Json<Value> {
    Json(docs::document())
}
