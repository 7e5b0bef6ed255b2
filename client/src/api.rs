use anyhow::{bail, Context, Result};
use reqwest::multipart::{Form, Part};
use std::{path::Path, time::Duration};
use tokio_util::io::ReaderStream;
use url::Url;

use crate::protocol::{RoomCreated, UploadResponse};

const HEALTH_TIMEOUT: Duration = Duration::from_secs(10);

/// HTTP side of the coordinator: room creation, uploads, health
#[derive(Clone)]
pub struct ServerApi {
    client: reqwest::Client,
    base: Url,
}

impl ServerApi {
    pub fn from_ws_url(ws_url: &str) -> Result<Self> {
        let base = http_base_from_ws(ws_url)
            .with_context(|| format!("Not a WebSocket URL: {ws_url}"))?;
        Ok(Self {
            client: reqwest::Client::new(),
            base,
        })
    }

    pub fn base(&self) -> &Url {
        &self.base
    }

    pub async fn health(&self) -> Result<reqwest::StatusCode> {
        let response = self
            .client
            .get(self.endpoint("/healthz")?)
            .timeout(HEALTH_TIMEOUT)
            .send()
            .await
            .context("Health check failed")?;
        Ok(response.status())
    }

    pub async fn create_room(&self) -> Result<String> {
        let response = self
            .client
            .post(self.endpoint("/create-room")?)
            .send()
            .await
            .context("Failed to reach server")?;
        if !response.status().is_success() {
            bail!("Room creation failed with {}", response.status());
        }
        let created: RoomCreated = response.json().await.context("Invalid room response")?;
        Ok(created.room_id)
    }

    /// Upload a local file; when `room_id` is given the server announces it to the room.
    pub async fn upload(&self, path: &Path, room_id: Option<&str>) -> Result<String> {
        let mut form = Form::new().part("video", video_part(path).await?);
        if let Some(room_id) = room_id {
            form = form.text("roomId", room_id.to_string());
        }

        let response = self
            .client
            .post(self.endpoint("/upload")?)
            .multipart(form)
            .send()
            .await
            .context("Upload request failed")?;
        if !response.status().is_success() {
            bail!("Upload rejected with {}", response.status());
        }
        let uploaded: UploadResponse = response.json().await.context("Invalid upload response")?;
        Ok(uploaded.media_ref)
    }

    /// Absolute URL for a media ref the coordinator handed out
    pub fn media_url(&self, media_ref: &str) -> Result<Url> {
        if let Ok(absolute) = Url::parse(media_ref) {
            return Ok(absolute);
        }
        self.endpoint(media_ref)
    }

    fn endpoint(&self, path: &str) -> Result<Url> {
        self.base
            .join(path)
            .with_context(|| format!("Invalid path {path}"))
    }
}

/// Streams the file from disk instead of buffering it whole.
async fn video_part(path: &Path) -> Result<Part> {
    let file = tokio::fs::File::open(path)
        .await
        .with_context(|| format!("Failed to open {}", path.display()))?;
    let len = file
        .metadata()
        .await
        .with_context(|| format!("Failed to stat {}", path.display()))?
        .len();
    let file_name = path
        .file_name()
        .and_then(|name| name.to_str())
        .unwrap_or("video")
        .to_string();

    let body = reqwest::Body::wrap_stream(ReaderStream::new(file));
    Ok(Part::stream_with_length(body, len).file_name(file_name))
}

/// `ws://host:port/ws` → `http://host:port/`
pub fn http_base_from_ws(ws_url: &str) -> Option<Url> {
    let parsed = Url::parse(ws_url).ok()?;
    let scheme = match parsed.scheme() {
        "ws" => "http",
        "wss" => "https",
        _ => return None,
    };

    let mut http = parsed;
    http.set_scheme(scheme).ok()?;
    http.set_path("/");
    http.set_query(None);
    http.set_fragment(None);
    Some(http)
}
