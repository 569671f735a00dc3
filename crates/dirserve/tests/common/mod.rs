//! Test utilities and common setup.

use std::path::Path;
use std::sync::Arc;

use axum::Router;
use axum::body::Body;
use axum::http::Request;
use axum::response::Response;
use dirserve::routes::file_routes;
use dirserve::{AppState, Config, LogSink};
use tempfile::TempDir;

/// A served root plus a separate lookup directory, both temporary.
pub struct Fixture {
    pub root: TempDir,
    pub lookup: TempDir,
    pub logs: Arc<LogSink>,
    pub app: Router,
}

impl Fixture {
    pub fn root_path(&self) -> &Path {
        self.root.path()
    }
}

/// Create a file server router over a fresh temporary directory.
pub fn test_app() -> Fixture {
    test_app_with(Config::default())
}

pub fn test_app_with(mut config: Config) -> Fixture {
    let root = TempDir::new().unwrap();
    let lookup = TempDir::new().unwrap();
    config.lookup_dir = lookup.path().to_path_buf();
    config.log_file = lookup.path().join("log.txt");

    let logs = Arc::new(LogSink::new(config.log_capacity, config.log_file.clone()));
    let state = AppState::new(
        root.path().canonicalize().unwrap(),
        Arc::new(config),
        logs.clone(),
    );

    Fixture {
        root,
        lookup,
        logs,
        app: file_routes(state),
    }
}

pub fn get(uri: &str) -> Request<Body> {
    Request::builder().uri(uri).body(Body::empty()).unwrap()
}

pub fn post_json(uri: &str, body: serde_json::Value) -> Request<Body> {
    Request::builder()
        .method("POST")
        .uri(uri)
        .header("content-type", "application/json")
        .body(Body::from(body.to_string()))
        .unwrap()
}

/// Build a multipart body with one `files` part per `(filename, content)`.
pub fn post_multipart(uri: &str, files: &[(&str, &str)]) -> Request<Body> {
    let boundary = "dirserve-test-boundary";
    let mut body = String::new();
    for (filename, content) in files {
        body.push_str(&format!(
            "--{boundary}\r\nContent-Disposition: form-data; name=\"files\"; filename=\"{filename}\"\r\n\
             Content-Type: application/octet-stream\r\n\r\n{content}\r\n"
        ));
    }
    body.push_str(&format!("--{boundary}--\r\n"));

    Request::builder()
        .method("POST")
        .uri(uri)
        .header(
            "content-type",
            format!("multipart/form-data; boundary={boundary}"),
        )
        .body(Body::from(body))
        .unwrap()
}

pub async fn body_string(response: Response) -> String {
    let bytes = axum::body::to_bytes(response.into_body(), usize::MAX)
        .await
        .unwrap();
    String::from_utf8(bytes.to_vec()).unwrap()
}

pub async fn body_json(response: Response) -> serde_json::Value {
    serde_json::from_str(&body_string(response).await).unwrap()
}
