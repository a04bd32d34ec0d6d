//! reqwest client for the vision backend's `/cv` routes

use super::messages::{StartSessionRequest, StartSessionResponse, StopSessionRequest};
use super::{BackendError, LatestSummary, NarrationBackend, StartedSession};
use crate::capture::{CaptureFrame, DEFAULT_FRAME_NAME};
use crate::config::BackendConfig;
use async_trait::async_trait;
use reqwest::multipart::{Form, Part};
use std::time::Duration;
use tracing::{debug, info, instrument, warn};
use url::Url;

/// Multipart field carrying the session id
const SESSION_ID_FIELD: &str = "session_id";

/// Multipart field carrying the image file
const FRAMES_FIELD: &str = "frames";

/// Multipart field carrying capture timestamps as a JSON array
const TIMESTAMPS_FIELD: &str = "timestamps_json";

/// Client for the vision backend
pub struct HttpBackend {
    base: Url,
    client: reqwest::Client,
}

impl HttpBackend {
    pub fn new(config: &BackendConfig) -> Result<Self, BackendError> {
        let base = Url::parse(&config.api_base)
            .map_err(|e| BackendError::InvalidUrl(format!("{}: {}", config.api_base, e)))?;
        if base.cannot_be_a_base() {
            return Err(BackendError::InvalidUrl(config.api_base.clone()));
        }

        let client = reqwest::Client::builder()
            .timeout(Duration::from_secs(config.request_timeout_secs))
            .connect_timeout(Duration::from_secs(config.connect_timeout_secs))
            .build()?;

        info!(api_base = %base, "Vision backend client created");
        Ok(Self { base, client })
    }

    /// Append path segments to the base URL, escaping each one
    fn endpoint(&self, segments: &[&str]) -> Result<Url, BackendError> {
        let mut url = self.base.clone();
        url.path_segments_mut()
            .map_err(|_| BackendError::InvalidUrl(self.base.to_string()))?
            .pop_if_empty()
            .extend(segments);
        Ok(url)
    }

    /// Turn a non-success response into `ServerError`
    async fn ensure_success(response: reqwest::Response) -> Result<reqwest::Response, BackendError> {
        let status = response.status();
        if status.is_success() {
            return Ok(response);
        }
        let message = response.text().await.unwrap_or_default();
        Err(BackendError::ServerError {
            status: status.as_u16(),
            message,
        })
    }
}

#[async_trait]
impl NarrationBackend for HttpBackend {
    #[instrument(skip(self))]
    async fn check_reachable(&self) -> Result<u16, BackendError> {
        let response = self.client.get(self.base.clone()).send().await?;
        let response = Self::ensure_success(response).await?;
        let status = response.status().as_u16();
        debug!(status, "Backend reachable");
        Ok(status)
    }

    #[instrument(skip(self, request))]
    async fn start_session(
        &self,
        request: &StartSessionRequest,
    ) -> Result<StartedSession, BackendError> {
        let url = self.endpoint(&["cv", "session", "start"])?;
        let response = self.client.post(url).json(request).send().await?;
        let response = Self::ensure_success(response).await?;
        let status = response.status().as_u16();

        let body: StartSessionResponse = response.json().await.map_err(|e| {
            BackendError::InvalidResponse(format!("Failed to parse session start response: {}", e))
        })?;
        if body.session_id.trim().is_empty() {
            return Err(BackendError::InvalidResponse(
                "Session start response has an empty session_id".into(),
            ));
        }

        info!(session_id = %body.session_id, status, "Vision session started");
        Ok(StartedSession {
            session_id: body.session_id,
            status,
        })
    }

    #[instrument(skip(self))]
    async fn stop_session(&self, session_id: &str) -> Result<(), BackendError> {
        let url = self.endpoint(&["cv", "session", "stop"])?;
        let response = self
            .client
            .post(url)
            .json(&StopSessionRequest { session_id })
            .send()
            .await?;
        Self::ensure_success(response).await?;
        info!(session_id = %session_id, "Vision session stopped");
        Ok(())
    }

    async fn upload_frame(
        &self,
        session_id: &str,
        frame: CaptureFrame,
    ) -> Result<u16, BackendError> {
        let url = self.endpoint(&["cv", "frames"])?;
        let timestamps = serde_json::json!([frame.timestamp_secs()]).to_string();
        let file_name = frame
            .file_name
            .unwrap_or_else(|| DEFAULT_FRAME_NAME.to_string());
        let content_type = infer_content_type(&file_name);
        let size = frame.data.len();

        let part = Part::bytes(frame.data)
            .file_name(file_name)
            .mime_str(content_type)?;
        let form = Form::new()
            .text(SESSION_ID_FIELD, session_id.to_string())
            .text(TIMESTAMPS_FIELD, timestamps)
            .part(FRAMES_FIELD, part);

        let response = self.client.post(url).multipart(form).send().await?;
        let status = response.status();
        if status.is_success() {
            debug!(session_id = %session_id, status = status.as_u16(), bytes = size, "Frame uploaded");
        } else {
            warn!(session_id = %session_id, status = status.as_u16(), "Frame upload rejected");
        }
        Ok(status.as_u16())
    }

    #[instrument(skip(self))]
    async fn latest_summary(&self, session_id: &str) -> Result<LatestSummary, BackendError> {
        let mut url = self.endpoint(&["cv", "summary", "latest"])?;
        url.query_pairs_mut().append_pair(SESSION_ID_FIELD, session_id);

        let response = self.client.get(url).send().await?;
        let response = Self::ensure_success(response).await?;
        response.json().await.map_err(|e| {
            BackendError::InvalidResponse(format!("Failed to parse latest summary: {}", e))
        })
    }

    fn summary_stream_url(&self, session_id: &str) -> Result<String, BackendError> {
        let url = self.endpoint(&["cv", "summary", "ws", session_id])?;
        Ok(to_ws_url(url)?.to_string())
    }
}

/// Map an http(s) URL onto the matching ws(s) scheme
fn to_ws_url(mut url: Url) -> Result<Url, BackendError> {
    let scheme = match url.scheme() {
        "http" | "ws" => "ws",
        "https" | "wss" => "wss",
        other => {
            return Err(BackendError::InvalidUrl(format!(
                "unsupported scheme '{}' for summary stream",
                other
            )))
        }
    };
    url.set_scheme(scheme)
        .map_err(|_| BackendError::InvalidUrl(url.to_string()))?;
    Ok(url)
}

/// Content type for an uploaded frame, from its file extension
fn infer_content_type(file_name: &str) -> &'static str {
    let extension = file_name
        .rsplit_once('.')
        .map(|(_, ext)| ext.to_ascii_lowercase());
    match extension.as_deref() {
        Some("png") => "image/png",
        Some("webp") => "image/webp",
        Some("heic") => "image/heic",
        _ => "image/jpeg",
    }
}
