//! Observable state of a narration session

use std::fmt;

/// Lifecycle of the backend session owned by a controller
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub enum SessionStatus {
    #[default]
    Idle,
    Preflighting,
    Starting,
    ChannelAttaching,
    Active,
    Stopping,
    Stopped,
    /// Absorbing; set on preflight or session-start failure
    Failed,
}

impl SessionStatus {
    pub fn is_terminal(&self) -> bool {
        matches!(self, SessionStatus::Stopped | SessionStatus::Failed)
    }
}

impl fmt::Display for SessionStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            SessionStatus::Idle => "idle",
            SessionStatus::Preflighting => "preflighting",
            SessionStatus::Starting => "starting",
            SessionStatus::ChannelAttaching => "channel attaching",
            SessionStatus::Active => "active",
            SessionStatus::Stopping => "stopping",
            SessionStatus::Stopped => "stopped",
            SessionStatus::Failed => "failed",
        };
        f.write_str(name)
    }
}

/// Connection state of the summary channel
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub enum ChannelState {
    #[default]
    Idle,
    Connecting,
    Open,
    Failed,
    Closed,
}

/// Everything recorded about a session for troubleshooting
#[derive(Debug, Clone, Default, PartialEq)]
pub struct Diagnostics {
    /// Status of the reachability probe, if a response was received
    pub preflight_status: Option<u16>,
    /// Status of the session start request, if a response was received
    pub start_status: Option<u16>,
    /// Most recent frame upload status
    pub last_upload_status: Option<u16>,
    pub last_error: Option<String>,
    pub channel: ChannelState,
    /// Close code reported by the summary channel (4404 = unknown session)
    pub close_code: Option<u16>,
    pub frames_captured: u64,
    pub frames_uploaded: u64,
    pub capture_misses: u64,
    pub upload_failures: u64,
    /// Times the capture timer was cancelled; never exceeds one
    pub timer_cancellations: u32,
}

/// Point-in-time copy of a controller's observable state
#[derive(Debug, Clone, PartialEq)]
pub struct NarrationSnapshot {
    pub status: SessionStatus,
    pub session_id: Option<String>,
    /// Latest scene description
    pub narration: Option<String>,
    pub diagnostics: Diagnostics,
}

/// Change notifications published to subscribers
#[derive(Debug, Clone, PartialEq)]
pub enum NarrationEvent {
    StatusChanged(SessionStatus),
    /// The narration text was replaced
    Narration { text: String },
    Channel(ChannelState),
}
