//! Streaming delivery of a finished artifact to the caller's endpoint.

use reqwest::header::{CONTENT_LENGTH, CONTENT_TYPE};
use tokio_util::io::ReaderStream;
use tracing::info;
use url::Url;

use crate::errors::BuilderError;

/// POSTs the artifact at `path` to `callback` as a raw octet stream with an
/// explicit `Content-Length` taken from the file's size on disk. The file is
/// streamed, never loaded whole. One attempt, no retries.
pub async fn deliver(path: &str, callback: &Url) -> Result<(), BuilderError> {
    let meta = tokio::fs::metadata(path)
        .await
        .map_err(|e| BuilderError::Delivery(format!("stat {path}: {e}")))?;
    let file = tokio::fs::File::open(path)
        .await
        .map_err(|e| BuilderError::Delivery(format!("open {path}: {e}")))?;

    info!("sending artifact {path} ({} bytes) to {callback}", meta.len());
    let resp = reqwest::Client::new()
        .post(callback.clone())
        .header(CONTENT_TYPE, "application/octet-stream")
        .header(CONTENT_LENGTH, meta.len())
        .body(reqwest::Body::wrap_stream(ReaderStream::new(file)))
        .send()
        .await
        .map_err(|e| BuilderError::Delivery(e.to_string()))?;

    if !resp.status().is_success() {
        return Err(BuilderError::Delivery(format!(
            "callback answered {}",
            resp.status()
        )));
    }
    info!("artifact sent, callback answered {}", resp.status());
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;
    use std::sync::Arc;
    use axum::extract::State;
    use axum::http::HeaderMap;
    use axum::routing::post;
    use axum::Router;
    use tokio::net::TcpListener;
    use tokio::sync::Mutex;

    #[derive(Default)]
    struct Received {
        content_length: Option<String>,
        content_type: Option<String>,
        body: Vec<u8>,
    }

    async fn receiver() -> (Url, Arc<Mutex<Received>>) {
        let received = Arc::new(Mutex::new(Received::default()));
        let state = received.clone();
        let app = Router::new()
            .route(
                "/upload",
                post(
                    |State(state): State<Arc<Mutex<Received>>>,
                     headers: HeaderMap,
                     body: axum::body::Bytes| async move {
                        let mut r = state.lock().await;
                        r.content_length = headers
                            .get(CONTENT_LENGTH)
                            .map(|v| v.to_str().unwrap().to_string());
                        r.content_type = headers
                            .get(CONTENT_TYPE)
                            .map(|v| v.to_str().unwrap().to_string());
                        r.body = body.to_vec();
                        "ok"
                    },
                ),
            )
            .with_state(state);

        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        tokio::spawn(async move {
            axum::serve(listener, app).await.unwrap();
        });
        let url = Url::parse(&format!("http://{addr}/upload")).unwrap();
        (url, received)
    }

    #[tokio::test]
    async fn streams_the_file_with_exact_content_length() {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        file.write_all(b"artifact bytes").unwrap();
        file.flush().unwrap();

        let (url, received) = receiver().await;
        deliver(file.path().to_str().unwrap(), &url).await.unwrap();

        let r = received.lock().await;
        assert_eq!(r.content_length.as_deref(), Some("14"));
        assert_eq!(r.content_type.as_deref(), Some("application/octet-stream"));
        assert_eq!(r.body, b"artifact bytes");
    }

    #[tokio::test]
    async fn missing_artifact_is_a_delivery_failure() {
        let url = Url::parse("http://127.0.0.1:9/upload").unwrap();
        let err = deliver("/definitely/not/there", &url).await.unwrap_err();
        assert!(matches!(err, BuilderError::Delivery(_)));
    }

    #[tokio::test]
    async fn unreachable_callback_is_a_delivery_failure() {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        file.write_all(b"x").unwrap();
        file.flush().unwrap();

        // Port 9 (discard) is not listening.
        let url = Url::parse("http://127.0.0.1:9/upload").unwrap();
        let err = deliver(file.path().to_str().unwrap(), &url)
            .await
            .unwrap_err();
        assert!(matches!(err, BuilderError::Delivery(_)));
    }

    #[tokio::test]
    async fn non_2xx_response_is_a_delivery_failure() {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        file.write_all(b"x").unwrap();
        file.flush().unwrap();

        let app = Router::new().route(
            "/upload",
            post(|| async { (axum::http::StatusCode::INTERNAL_SERVER_ERROR, "no") }),
        );
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        tokio::spawn(async move {
            axum::serve(listener, app).await.unwrap();
        });

        let url = Url::parse(&format!("http://{addr}/upload")).unwrap();
        let err = deliver(file.path().to_str().unwrap(), &url)
            .await
            .unwrap_err();
        match err {
            BuilderError::Delivery(detail) => assert!(detail.contains("500")),
            other => panic!("expected Delivery, got {other:?}"),
        }
    }
}
