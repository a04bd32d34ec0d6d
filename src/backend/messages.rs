//! Request and response bodies of the vision backend's `/cv` routes

use serde::{Deserialize, Serialize};

/// Body of `POST /cv/session/start`
///
/// Both fields are optional tuning; unset fields are omitted so the default
/// body is an empty JSON object.
#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct StartSessionRequest {
    /// Frontend sampling rate N (every N frames)
    #[serde(skip_serializing_if = "Option::is_none")]
    pub sampling_rate: Option<u32>,
    /// Override of the server's summary interval in seconds
    #[serde(skip_serializing_if = "Option::is_none")]
    pub summary_interval_s: Option<f64>,
}

#[derive(Debug, Deserialize)]
pub(crate) struct StartSessionResponse {
    pub session_id: String,
}

/// Body of `POST /cv/session/stop`
#[derive(Debug, Serialize)]
pub(crate) struct StopSessionRequest<'a> {
    pub session_id: &'a str,
}

/// Response of `GET /cv/summary/latest`
///
/// Every field but the id is absent until the backend has produced a
/// summary for the session.
#[derive(Debug, Clone, Default, PartialEq, Deserialize)]
pub struct LatestSummary {
    pub session_id: String,
    #[serde(default)]
    pub ts: Option<f64>,
    #[serde(default)]
    pub version: Option<u64>,
    #[serde(default)]
    pub text: Option<String>,
    #[serde(default)]
    pub audio_url: Option<String>,
}
