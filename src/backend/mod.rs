//! Vision backend client
//!
//! The narration controller depends on the [`NarrationBackend`] trait only;
//! [`HttpBackend`] is the reqwest implementation used by the binary.

mod client;
mod messages;

pub use client::HttpBackend;
pub use messages::{LatestSummary, StartSessionRequest};

use crate::capture::CaptureFrame;
use async_trait::async_trait;
use thiserror::Error;

/// A session accepted by the backend
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StartedSession {
    pub session_id: String,
    /// HTTP status of the start response
    pub status: u16,
}

/// HTTP surface of the vision backend used by a narration session
#[async_trait]
pub trait NarrationBackend: Send + Sync {
    /// Reachability probe; returns the 2xx status on success
    async fn check_reachable(&self) -> Result<u16, BackendError>;

    async fn start_session(
        &self,
        request: &StartSessionRequest,
    ) -> Result<StartedSession, BackendError>;

    async fn stop_session(&self, session_id: &str) -> Result<(), BackendError>;

    /// Upload one frame; any HTTP response yields its status code
    async fn upload_frame(&self, session_id: &str, frame: CaptureFrame)
        -> Result<u16, BackendError>;

    async fn latest_summary(&self, session_id: &str) -> Result<LatestSummary, BackendError>;

    /// WebSocket URL of the summary stream for `session_id`
    fn summary_stream_url(&self, session_id: &str) -> Result<String, BackendError>;
}

/// Backend request errors
#[derive(Debug, Error)]
pub enum BackendError {
    #[error("Network error: {0}")]
    Network(#[from] reqwest::Error),

    #[error("Server error ({status}): {message}")]
    ServerError { status: u16, message: String },

    #[error("Invalid response from server: {0}")]
    InvalidResponse(String),

    #[error("Invalid backend URL: {0}")]
    InvalidUrl(String),
}

impl BackendError {
    /// HTTP status associated with the failure, if a response was received
    pub fn status(&self) -> Option<u16> {
        match self {
            BackendError::ServerError { status, .. } => Some(*status),
            BackendError::Network(e) => e.status().map(|s| s.as_u16()),
            BackendError::InvalidResponse(_) | BackendError::InvalidUrl(_) => None,
        }
    }
}
