//! Uploads and folder/file creation inside a served directory.
//!
//! Every operation works on a target directory that the router has already
//! resolved from the request path and checked to be an existing directory.

use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::{SystemTime, UNIX_EPOCH};

use axum::{
    Json,
    body::{Body, to_bytes},
    extract::{FromRequest, Multipart, multipart::Field},
    http::{Request, header},
    response::{IntoResponse, Response},
};
use serde::{Deserialize, Serialize};
use tokio::fs;
use tokio::io::AsyncWriteExt;
use tracing::{error, info, warn};

use crate::AppState;
use crate::error::FileServerError;
use crate::guard::{base_name, is_safe_segment};

/// Multipart field carrying uploaded files.
const UPLOAD_FIELD: &str = "files";

/// Response for folder/file creation
#[derive(Debug, Serialize)]
pub struct SuccessResponse {
    pub success: bool,
    pub message: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub path: Option<String>,
}

/// Response for uploads. `skipped` lists files that failed individually.
#[derive(Debug, Serialize)]
pub struct UploadResponse {
    pub success: bool,
    pub message: String,
    pub uploaded: Vec<String>,
    pub skipped: Vec<String>,
}

/// JSON body of a create request
#[derive(Debug, Deserialize)]
struct CreateRequest {
    action: String,
    #[serde(default)]
    name: String,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum EntryKind {
    Folder,
    File,
}

/// A mutating request against a target directory.
pub enum MutationRequest {
    Upload { target_dir: PathBuf, form: Multipart },
    CreateFolder { target_dir: PathBuf, name: String },
    CreateFile { target_dir: PathBuf, name: String },
}

impl MutationRequest {
    /// Classify a POST by content type: JSON bodies create entries,
    /// multipart bodies upload files.
    pub async fn from_request(
        target_dir: PathBuf,
        request: Request<Body>,
        body_limit: usize,
    ) -> Result<Self, FileServerError> {
        let content_type = request
            .headers()
            .get(header::CONTENT_TYPE)
            .and_then(|value| value.to_str().ok())
            .unwrap_or_default()
            .to_ascii_lowercase();

        if content_type.contains("application/json") {
            let body = to_bytes(request.into_body(), body_limit)
                .await
                .map_err(|e| FileServerError::InvalidRequest(e.to_string()))?;
            let create: CreateRequest = serde_json::from_slice(&body)
                .map_err(|e| FileServerError::InvalidRequest(e.to_string()))?;

            return match create.action.as_str() {
                "createFolder" => Ok(MutationRequest::CreateFolder {
                    target_dir,
                    name: create.name,
                }),
                "createFile" => Ok(MutationRequest::CreateFile {
                    target_dir,
                    name: create.name,
                }),
                _ => Err(FileServerError::InvalidAction),
            };
        }

        if content_type.starts_with("multipart/form-data") {
            let form = Multipart::from_request(request, &())
                .await
                .map_err(|rejection| FileServerError::InvalidRequest(rejection.body_text()))?;
            return Ok(MutationRequest::Upload { target_dir, form });
        }

        Err(FileServerError::UnsupportedMediaType(content_type))
    }

    pub async fn apply(self, state: &AppState) -> Result<Response, FileServerError> {
        match self {
            MutationRequest::Upload { target_dir, form } => {
                let response = upload(state, &target_dir, form).await?;
                Ok(Json(response).into_response())
            }
            MutationRequest::CreateFolder { target_dir, name } => {
                let response = create_folder(state, &target_dir, &name).await?;
                Ok(Json(response).into_response())
            }
            MutationRequest::CreateFile { target_dir, name } => {
                let response = create_file(state, &target_dir, &name).await?;
                Ok(Json(response).into_response())
            }
        }
    }
}

/// Create a folder named `name` inside `target_dir`.
pub async fn create_folder(
    state: &AppState,
    target_dir: &Path,
    name: &str,
) -> Result<SuccessResponse, FileServerError> {
    create_entry(state, target_dir, name, EntryKind::Folder).await
}

/// Create an empty file named `name` inside `target_dir`.
pub async fn create_file(
    state: &AppState,
    target_dir: &Path,
    name: &str,
) -> Result<SuccessResponse, FileServerError> {
    create_entry(state, target_dir, name, EntryKind::File).await
}

async fn create_entry(
    state: &AppState,
    target_dir: &Path,
    name: &str,
    kind: EntryKind,
) -> Result<SuccessResponse, FileServerError> {
    if name.is_empty() || !is_safe_segment(name) {
        warn!("Rejected {:?} name: {:?}", kind, name);
        return Err(FileServerError::InvalidName);
    }

    if !is_directory(target_dir).await {
        return Err(FileServerError::InvalidTargetDirectory);
    }

    let path = target_dir.join(name);
    if fs::symlink_metadata(&path).await.is_ok() {
        return Err(FileServerError::Conflict(name.to_string()));
    }

    match kind {
        EntryKind::Folder => {
            fs::create_dir_all(&path).await.map_err(|e| {
                error!("Failed to create folder {}: {}", path.display(), e);
                FileServerError::Io(e)
            })?;
            state.logs.append(format!("Folder created: {}", path.display()));
        }
        EntryKind::File => {
            // create_new closes the window between the existence check and the create
            fs::OpenOptions::new()
                .write(true)
                .create_new(true)
                .open(&path)
                .await
                .map_err(|e| match e.kind() {
                    std::io::ErrorKind::AlreadyExists => {
                        FileServerError::Conflict(name.to_string())
                    }
                    _ => {
                        error!("Failed to create file {}: {}", path.display(), e);
                        FileServerError::Io(e)
                    }
                })?;
            state.logs.append(format!("File created: {}", path.display()));
        }
    }

    let message = match kind {
        EntryKind::Folder => "Folder created successfully",
        EntryKind::File => "File created successfully",
    };

    Ok(SuccessResponse {
        success: true,
        message: message.to_string(),
        path: Some(name.to_string()),
    })
}

/// Why storing a single uploaded file failed.
enum StoreError {
    /// The request itself is broken or too large; stop processing.
    Abort(FileServerError),
    /// Only this file failed; log and move on.
    Skip(String),
}

/// Store every file part of `form` in `target_dir`.
///
/// Filenames are reduced to their base name and must pass the segment guard.
/// Files that fail individually are logged and reported in `skipped`; files
/// written before a failure are kept.
pub async fn upload(
    state: &AppState,
    target_dir: &Path,
    mut form: Multipart,
) -> Result<UploadResponse, FileServerError> {
    let limit = state.config.max_upload_size;
    let mut total_size = 0u64;
    let mut file_parts = 0usize;
    let mut uploaded = Vec::new();
    let mut skipped = Vec::new();

    while let Some(mut field) = form.next_field().await? {
        if field.name() != Some(UPLOAD_FIELD) {
            continue;
        }
        let Some(raw_filename) = field.file_name().map(str::to_string) else {
            continue;
        };
        file_parts += 1;

        let file_name = base_name(&raw_filename);
        if file_name.is_empty() || file_name == "." || !is_safe_segment(file_name) {
            state
                .logs
                .append(format!("Rejected upload filename: {:?}", raw_filename));
            skipped.push(raw_filename);
            continue;
        }
        let file_name = file_name.to_string();
        let final_path = target_dir.join(&file_name);

        match store_field(&mut field, &final_path, &mut total_size, limit).await {
            Ok(size) => {
                info!("Uploaded file: {} ({} bytes)", final_path.display(), size);
                state
                    .logs
                    .append(format!("File uploaded: {}", final_path.display()));
                uploaded.push(file_name);
            }
            Err(StoreError::Skip(reason)) => {
                state.logs.append(format!(
                    "Error saving file {}: {}",
                    final_path.display(),
                    reason
                ));
                skipped.push(file_name);
            }
            Err(StoreError::Abort(err)) => return Err(err),
        }
    }

    if file_parts == 0 {
        return Err(FileServerError::NoFiles);
    }

    Ok(UploadResponse {
        success: true,
        message: format!("Uploaded {} of {} file(s)", uploaded.len(), file_parts),
        uploaded,
        skipped,
    })
}

/// Stream one field into a temporary sibling of `final_path`, then rename it
/// into place.
async fn store_field(
    field: &mut Field<'_>,
    final_path: &Path,
    total_size: &mut u64,
    limit: u64,
) -> Result<u64, StoreError> {
    let existing = fs::symlink_metadata(final_path).await.ok();
    if existing.is_some_and(|m| m.file_type().is_symlink() || m.is_dir()) {
        return Err(StoreError::Skip(
            "refusing to replace a directory or symlink".to_string(),
        ));
    }

    let parent_dir = final_path
        .parent()
        .ok_or_else(|| StoreError::Skip("missing parent directory".to_string()))?;
    let temp_path = parent_dir.join(temp_upload_name());

    let mut temp_file = fs::File::create(&temp_path)
        .await
        .map_err(|e| StoreError::Skip(e.to_string()))?;

    let mut size = 0u64;
    loop {
        let chunk = match field.chunk().await {
            Ok(Some(chunk)) => chunk,
            Ok(None) => break,
            Err(e) => {
                let _ = fs::remove_file(&temp_path).await;
                return Err(StoreError::Abort(FileServerError::Multipart(e)));
            }
        };

        size = size.saturating_add(chunk.len() as u64);
        *total_size = total_size.saturating_add(chunk.len() as u64);
        if *total_size > limit {
            let _ = fs::remove_file(&temp_path).await;
            return Err(StoreError::Abort(FileServerError::FileTooLarge {
                size: *total_size,
                limit,
            }));
        }

        if let Err(e) = temp_file.write_all(&chunk).await {
            let _ = fs::remove_file(&temp_path).await;
            return Err(StoreError::Skip(e.to_string()));
        }
    }

    if let Err(e) = temp_file.flush().await {
        let _ = fs::remove_file(&temp_path).await;
        return Err(StoreError::Skip(e.to_string()));
    }
    drop(temp_file);

    if let Err(e) = fs::rename(&temp_path, final_path).await {
        let _ = fs::remove_file(&temp_path).await;
        return Err(StoreError::Skip(e.to_string()));
    }

    Ok(size)
}

/// Fixed-length name for an in-progress upload, so a client filename close to
/// the filesystem name limit still fits.
fn temp_upload_name() -> String {
    static COUNTER: AtomicU64 = AtomicU64::new(0);

    let nonce = SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|d| d.as_nanos())
        .unwrap_or(0);
    let seq = COUNTER.fetch_add(1, Ordering::Relaxed);
    format!(".upload-{:x}-{:x}", nonce, seq)
}

async fn is_directory(path: &Path) -> bool {
    fs::metadata(path)
        .await
        .map(|metadata| metadata.is_dir())
        .unwrap_or(false)
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    fn state_for(root: &Path) -> AppState {
        AppState::with_root(root.to_path_buf())
    }

    #[test]
    fn test_temp_upload_name_is_short_and_unique() {
        let a = temp_upload_name();
        let b = temp_upload_name();
        assert_ne!(a, b);
        assert!(a.starts_with(".upload-"));
        assert!(a.len() < 64);
    }

    #[tokio::test]
    async fn test_create_folder() {
        let temp = TempDir::new().unwrap();
        let state = state_for(temp.path());

        let response = create_folder(&state, temp.path(), "docs").await.unwrap();
        assert!(response.success);
        assert!(temp.path().join("docs").is_dir());
        assert!(state.logs.snapshot()[0].starts_with("Folder created: "));
    }

    #[tokio::test]
    async fn test_create_file_is_empty() {
        let temp = TempDir::new().unwrap();
        let state = state_for(temp.path());

        create_file(&state, temp.path(), "notes.md").await.unwrap();
        let metadata = std::fs::metadata(temp.path().join("notes.md")).unwrap();
        assert!(metadata.is_file());
        assert_eq!(metadata.len(), 0);
    }

    #[tokio::test]
    async fn test_create_rejects_unsafe_names() {
        let temp = TempDir::new().unwrap();
        let state = state_for(temp.path());

        for name in ["", "..", "../escape", "a/b", "a\\b", "x..y"] {
            let folder = create_folder(&state, temp.path(), name).await;
            assert!(matches!(folder, Err(FileServerError::InvalidName)), "{name:?}");
            let file = create_file(&state, temp.path(), name).await;
            assert!(matches!(file, Err(FileServerError::InvalidName)), "{name:?}");
        }

        assert_eq!(std::fs::read_dir(temp.path()).unwrap().count(), 0);
        assert!(!temp.path().parent().unwrap().join("escape").exists());
    }

    #[tokio::test]
    async fn test_create_conflict_leaves_existing_untouched() {
        let temp = TempDir::new().unwrap();
        let state = state_for(temp.path());
        std::fs::create_dir(temp.path().join("docs")).unwrap();
        std::fs::write(temp.path().join("docs/keep.txt"), "keep").unwrap();

        let result = create_folder(&state, temp.path(), "docs").await;
        assert!(matches!(result, Err(FileServerError::Conflict(_))));
        let result = create_file(&state, temp.path(), "docs").await;
        assert!(matches!(result, Err(FileServerError::Conflict(_))));

        assert_eq!(
            std::fs::read_to_string(temp.path().join("docs/keep.txt")).unwrap(),
            "keep"
        );
    }

    #[tokio::test]
    async fn test_create_in_missing_target_directory() {
        let temp = TempDir::new().unwrap();
        let state = state_for(temp.path());
        let missing = temp.path().join("missing");

        let result = create_folder(&state, &missing, "docs").await;
        assert!(matches!(result, Err(FileServerError::InvalidTargetDirectory)));
        assert!(!missing.exists());
    }

    #[tokio::test]
    async fn test_classifies_json_actions() {
        let temp = TempDir::new().unwrap();
        let request = |body: &'static str| {
            Request::builder()
                .method("POST")
                .header(header::CONTENT_TYPE, "application/json")
                .body(Body::from(body))
                .unwrap()
        };

        let folder = MutationRequest::from_request(
            temp.path().to_path_buf(),
            request(r#"{"action":"createFolder","name":"a"}"#),
            1024,
        )
        .await
        .unwrap();
        assert!(matches!(folder, MutationRequest::CreateFolder { ref name, .. } if name == "a"));

        let file = MutationRequest::from_request(
            temp.path().to_path_buf(),
            request(r#"{"action":"createFile","name":"b"}"#),
            1024,
        )
        .await
        .unwrap();
        assert!(matches!(file, MutationRequest::CreateFile { ref name, .. } if name == "b"));

        let unknown = MutationRequest::from_request(
            temp.path().to_path_buf(),
            request(r#"{"action":"delete","name":"b"}"#),
            1024,
        )
        .await;
        assert!(matches!(unknown, Err(FileServerError::InvalidAction)));

        let garbage =
            MutationRequest::from_request(temp.path().to_path_buf(), request("{not json"), 1024)
                .await;
        assert!(matches!(garbage, Err(FileServerError::InvalidRequest(_))));
    }

    #[tokio::test]
    async fn test_rejects_other_content_types() {
        let temp = TempDir::new().unwrap();
        let request = Request::builder()
            .method("POST")
            .header(header::CONTENT_TYPE, "text/plain")
            .body(Body::from("hello"))
            .unwrap();

        let result = MutationRequest::from_request(temp.path().to_path_buf(), request, 1024).await;
        assert!(matches!(
            result,
            Err(FileServerError::UnsupportedMediaType(_))
        ));
    }
}
