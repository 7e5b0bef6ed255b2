use anyhow::{Context, Result};
use axum::{
    extract::{multipart::MultipartError, Multipart, State},
    http::StatusCode,
    Json,
};
use sha2::{Digest, Sha256};
use std::path::PathBuf;
use tokio::{fs::File, io::AsyncWriteExt};
use uuid::Uuid;

use crate::coordinator::Command;
use crate::protocol::UploadResponse;
use crate::AppState;

const MAX_STORED_NAME_LEN: usize = 64;
const DIGEST_PREFIX_LEN: usize = 16;
pub const MEDIA_ROUTE: &str = "/uploads";

/// Writes uploaded media to disk and hands back the ref clients load from
#[derive(Debug, Clone)]
pub struct MediaStore {
    dir: PathBuf,
}

/// An upload being streamed to a temporary file in the media directory
pub struct PendingUpload {
    dir: PathBuf,
    temp_path: PathBuf,
    file: File,
    hasher: Sha256,
    written: u64,
}

impl MediaStore {
    pub fn new(dir: PathBuf) -> Self {
        Self { dir }
    }

    pub fn dir(&self) -> &PathBuf {
        &self.dir
    }

    pub async fn begin(&self) -> Result<PendingUpload> {
        tokio::fs::create_dir_all(&self.dir)
            .await
            .with_context(|| format!("Failed to create upload directory {:?}", self.dir))?;
        let temp_path = self.dir.join(format!(".upload-{}.part", Uuid::new_v4()));
        let file = File::create(&temp_path)
            .await
            .with_context(|| format!("Failed to create {:?}", temp_path))?;
        Ok(PendingUpload {
            dir: self.dir.clone(),
            temp_path,
            file,
            hasher: Sha256::new(),
            written: 0,
        })
    }
}

impl PendingUpload {
    pub async fn write(&mut self, chunk: &[u8]) -> Result<()> {
        self.hasher.update(chunk);
        self.file
            .write_all(chunk)
            .await
            .with_context(|| format!("Failed to write upload to {:?}", self.temp_path))?;
        self.written += chunk.len() as u64;
        Ok(())
    }

    /// Moves the file to its content-addressed name and returns its media ref.
    pub async fn finish(mut self, original_name: &str) -> Result<String> {
        self.file.flush().await.context("Failed to flush upload")?;
        drop(self.file);
        let name = stored_name(original_name, &self.hasher.finalize());
        let path = self.dir.join(&name);
        tokio::fs::rename(&self.temp_path, &path)
            .await
            .with_context(|| format!("Failed to move upload to {:?}", path))?;
        tracing::info!("Stored {} bytes as {:?}", self.written, path);
        Ok(format!("{MEDIA_ROUTE}/{name}"))
    }

    pub async fn discard(self) {
        drop(self.file);
        if let Err(e) = tokio::fs::remove_file(&self.temp_path).await {
            tracing::debug!("Failed to remove {:?}: {}", self.temp_path, e);
        }
    }
}

/// `POST /upload`: multipart with a `video` file and an optional `roomId`.
pub async fn upload_media(
    State(state): State<AppState>,
    mut multipart: Multipart,
) -> Result<Json<UploadResponse>, (StatusCode, String)> {
    let mut room_id = None;
    let mut media_ref = None;

    while let Some(mut field) = multipart.next_field().await.map_err(bad_request)? {
        let name = field.name().map(str::to_owned);
        match name.as_deref() {
            Some("video") => {
                let file_name = field
                    .file_name()
                    .map(str::to_owned)
                    .unwrap_or_else(|| "video".to_string());
                let mut pending = state.media_store.begin().await.map_err(storage_failed)?;
                loop {
                    match field.chunk().await {
                        Ok(Some(chunk)) => {
                            if let Err(e) = pending.write(&chunk).await {
                                pending.discard().await;
                                return Err(storage_failed(e));
                            }
                        }
                        Ok(None) => break,
                        Err(e) => {
                            pending.discard().await;
                            return Err(bad_request(e));
                        }
                    }
                }
                media_ref = Some(pending.finish(&file_name).await.map_err(storage_failed)?);
            }
            Some("roomId") => room_id = Some(field.text().await.map_err(bad_request)?),
            _ => {}
        }
    }

    let media_ref = media_ref.ok_or((
        StatusCode::BAD_REQUEST,
        "missing `video` file field".to_string(),
    ))?;

    if let Some(room_id) = room_id.filter(|id| !id.trim().is_empty()) {
        tracing::info!("Media uploaded for room {}: {}", room_id, media_ref);
        if state
            .commands
            .send(Command::MediaUploaded {
                room_id,
                media_ref: media_ref.clone(),
            })
            .is_err()
        {
            tracing::error!("Coordinator is not running; upload not announced");
        }
    }

    Ok(Json(UploadResponse { media_ref }))
}

fn storage_failed(err: anyhow::Error) -> (StatusCode, String) {
    tracing::error!("Upload failed: {:#}", err);
    (StatusCode::INTERNAL_SERVER_ERROR, err.to_string())
}

fn bad_request(err: MultipartError) -> (StatusCode, String) {
    (StatusCode::BAD_REQUEST, err.to_string())
}

/// `<first 16 hex of sha256(content)>-<sanitized name>`
fn stored_name(original_name: &str, digest: &[u8]) -> String {
    let hex: String = digest.iter().map(|byte| format!("{byte:02x}")).collect();
    format!(
        "{}-{}",
        &hex[..DIGEST_PREFIX_LEN],
        sanitize_file_name(original_name)
    )
}

fn sanitize_file_name(raw: &str) -> String {
    let base = raw.rsplit(|c: char| c == '/' || c == '\\').next().unwrap_or(raw).trim();
    let mut cleaned = String::with_capacity(base.len().min(MAX_STORED_NAME_LEN));
    for ch in base.chars() {
        if cleaned.len() >= MAX_STORED_NAME_LEN {
            break;
        }
        if ch.is_ascii_alphanumeric() || matches!(ch, '.' | '-' | '_') {
            cleaned.push(ch);
        } else {
            cleaned.push('_');
        }
    }
    let cleaned = cleaned.trim_start_matches('.').to_string();
    if cleaned.is_empty() {
        "video".to_string()
    } else {
        cleaned
    }
}
