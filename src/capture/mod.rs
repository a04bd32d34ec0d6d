//! Capture device abstraction
//!
//! The narration controller never talks to camera hardware directly. It
//! drives a [`CaptureDevice`] and watches a [`ReadinessGate`] that combines
//! the user's permission with the device's own initialisation signal.

mod directory;
mod gate;

pub use directory::DirectoryCamera;
pub use gate::ReadinessGate;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use std::path::PathBuf;

/// File name used for frames when the device does not provide one
pub const DEFAULT_FRAME_NAME: &str = "frame.jpg";

/// One encoded still, consumed exactly once by the upload pipeline
#[derive(Debug, Clone, PartialEq)]
pub struct CaptureFrame {
    /// Encoded image bytes (JPEG unless the file name says otherwise)
    pub data: Vec<u8>,
    /// File name hint used to infer the upload content type
    pub file_name: Option<String>,
    pub captured_at: DateTime<Utc>,
}

impl CaptureFrame {
    pub fn new(data: Vec<u8>) -> Self {
        Self {
            data,
            file_name: None,
            captured_at: Utc::now(),
        }
    }

    /// Capture time as fractional seconds since the Unix epoch
    pub fn timestamp_secs(&self) -> f64 {
        self.captured_at.timestamp_millis() as f64 / 1000.0
    }
}

/// Parameters of a single still request
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct StillOptions {
    /// Encoder quality, 0.0 to 1.0
    pub quality: f32,
    /// Skip resizing and other post-processing for latency
    pub skip_processing: bool,
    /// Longest edge in pixels when processing is applied
    pub max_dimension: u32,
}

impl Default for StillOptions {
    fn default() -> Self {
        Self {
            quality: 0.2,
            skip_processing: true,
            max_dimension: 640,
        }
    }
}

impl StillOptions {
    /// JPEG quality on the encoder's 1-100 scale
    pub fn jpeg_quality(&self) -> u8 {
        (self.quality.clamp(0.0, 1.0) * 100.0).round().clamp(1.0, 100.0) as u8
    }
}

/// Camera collaborator driven by the narration controller
#[async_trait]
pub trait CaptureDevice: Send + Sync {
    /// Whether the user has already granted camera access
    fn permission_granted(&self) -> bool;

    /// Show the one-time consent prompt; returns whether access was granted
    async fn request_permission(&self) -> Result<bool, CaptureError>;

    /// Bring the hardware up. Completion is the device-ready signal.
    async fn initialize(&self) -> Result<(), CaptureError>;

    /// Take one still. `Ok(None)` is a transient miss, not an error.
    async fn take_still(&self, options: &StillOptions)
        -> Result<Option<CaptureFrame>, CaptureError>;
}

/// Errors that can occur while capturing stills
#[derive(Debug, thiserror::Error)]
pub enum CaptureError {
    #[error("Camera permission denied")]
    PermissionDenied,

    #[error("No image files found in {0}")]
    NoFrames(PathBuf),

    #[error("Capture I/O error for {path}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("Failed to encode still: {0}")]
    Encode(String),
}
