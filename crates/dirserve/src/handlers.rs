use std::path::Path;

use axum::{
    Json,
    body::Body,
    extract::{Request, State},
    http::{Method, StatusCode, header},
    response::{Html, IntoResponse, Response},
};
use serde::Serialize;
use tokio::fs;
use tokio_util::io::ReaderStream;
use tracing::{debug, error};

use crate::AppState;
use crate::error::FileServerError;
use crate::guard::{decode_request_path, is_safe_segment, resolve_and_verify_path};
use crate::listing;
use crate::mutation::MutationRequest;
use crate::routes::{Endpoint, ROUTES};

/// Health check response
#[derive(Debug, Serialize)]
pub struct HealthResponse {
    pub status: &'static str,
}

/// Entry point for every request of a running file server.
pub async fn dispatch(State(state): State<AppState>, request: Request) -> Response {
    let method = request.method().clone();
    let uri_path = request.uri().path().to_string();

    match route(&state, request).await {
        Ok(response) => response,
        Err(err) => {
            if err.is_internal() {
                state
                    .logs
                    .append(format!("{} {} failed: {}", method, uri_path, err));
            } else {
                debug!("{} {} -> {}", method, uri_path, err.status());
            }
            err.into_response()
        }
    }
}

async fn route(state: &AppState, request: Request) -> Result<Response, FileServerError> {
    let raw_path = request.uri().path().to_string();
    let path = decode_request_path(&raw_path)?;
    let matched = ROUTES.resolve(request.method(), &path)?;

    match matched.endpoint {
        Endpoint::Health => Ok(Json(HealthResponse { status: "ok" }).into_response()),
        Endpoint::TextLookup => {
            lookup(&state.config.text_lookup_dir(), matched.remainder, "txt").await
        }
        Endpoint::JsonLookup => {
            lookup(&state.config.json_lookup_dir(), matched.remainder, "json").await
        }
        Endpoint::Files if request.method() == Method::POST => {
            mutate(state, &path, request).await
        }
        Endpoint::Files => serve_path(state, &path, &raw_path).await,
    }
}

/// GET /lookup/get/{id}, /lookup/getjson/{id} - read `{id}.{extension}` from `dir`.
///
/// Missing artifacts are plain 404s. Other read failures are logged with the
/// path here and answered without it.
async fn lookup(dir: &Path, id: &str, extension: &str) -> Result<Response, FileServerError> {
    if id.is_empty() {
        return Err(FileServerError::NotFound);
    }
    if !is_safe_segment(id) {
        return Err(FileServerError::InvalidId);
    }

    let path = dir.join(format!("{}.{}", id, extension));
    match fs::read(&path).await {
        Ok(content) => Ok((
            StatusCode::OK,
            [(header::CONTENT_TYPE, "application/json")],
            content,
        )
            .into_response()),
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => Err(FileServerError::NotFound),
        Err(e) => {
            error!("Error reading lookup artifact {}: {}", path.display(), e);
            Err(FileServerError::Internal)
        }
    }
}

/// GET on the catch-all path: file, `index.html`, or a listing.
async fn serve_path(
    state: &AppState,
    request_path: &str,
    raw_path: &str,
) -> Result<Response, FileServerError> {
    let path = resolve_and_verify_path(&state.root_dir, request_path)?;

    let metadata = match fs::metadata(&path).await {
        Ok(metadata) => metadata,
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
            return Err(FileServerError::NotFound);
        }
        Err(e) => return Err(FileServerError::Io(e)),
    };

    if !metadata.is_dir() {
        return stream_file(&path, metadata.len()).await;
    }

    // Relative links inside the directory only work with a trailing slash.
    if !request_path.ends_with('/') {
        return Ok((
            StatusCode::MOVED_PERMANENTLY,
            [(header::LOCATION, directory_location(raw_path))],
        )
            .into_response());
    }

    let index = resolve_and_verify_path(&state.root_dir, &format!("{}index.html", request_path))?;
    let index_metadata = fs::metadata(&index).await.ok().filter(|m| m.is_file());
    if let Some(index_metadata) = index_metadata {
        return stream_file(&index, index_metadata.len()).await;
    }

    debug!("Listing directory: {}", path.display());
    let entries = listing::read_entries(&path).await?;
    Ok(Html(listing::render_html(request_path, &entries)).into_response())
}

/// Slash-terminated redirect target for a directory path.
///
/// Leading slashes are collapsed: `//host` would be read by browsers as a
/// protocol-relative URL pointing off-site.
fn directory_location(raw_path: &str) -> String {
    let trimmed = raw_path.trim_matches('/');
    if trimmed.is_empty() {
        "/".to_string()
    } else {
        format!("/{}/", trimmed)
    }
}

/// Stream a file without loading it into memory.
async fn stream_file(path: &Path, size: u64) -> Result<Response, FileServerError> {
    debug!("Streaming file: {}", path.display());

    let file = fs::File::open(path).await?;
    let body = Body::from_stream(ReaderStream::new(file));

    let mime = mime_guess::from_path(path)
        .first_or_octet_stream()
        .to_string();

    Ok((
        StatusCode::OK,
        [
            (header::CONTENT_TYPE, mime),
            (header::CONTENT_LENGTH, size.to_string()),
        ],
        body,
    )
        .into_response())
}

/// POST on the catch-all path: the path must name an existing directory.
async fn mutate(
    state: &AppState,
    request_path: &str,
    request: Request,
) -> Result<Response, FileServerError> {
    let target_dir = resolve_and_verify_path(&state.root_dir, request_path)?;
    let is_dir = fs::metadata(&target_dir)
        .await
        .map(|metadata| metadata.is_dir())
        .unwrap_or(false);
    if !is_dir {
        return Err(FileServerError::InvalidTargetDirectory);
    }

    let body_limit = usize::try_from(state.config.max_upload_size).unwrap_or(usize::MAX);
    MutationRequest::from_request(target_dir, request, body_limit)
        .await?
        .apply(state)
        .await
}
