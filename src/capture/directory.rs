//! File-backed camera for the command-line host
//!
//! Serves stills round-robin from a directory of JPEG/PNG files, re-encoded
//! as JPEG at the requested quality the way a phone camera would compress
//! its own output.

use super::{CaptureDevice, CaptureError, CaptureFrame, StillOptions, DEFAULT_FRAME_NAME};
use async_trait::async_trait;
use image::codecs::jpeg::JpegEncoder;
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::Mutex;
use std::time::Duration;
use tracing::{debug, info, warn};

const IMAGE_EXTENSIONS: [&str; 3] = ["jpg", "jpeg", "png"];

pub struct DirectoryCamera {
    dir: PathBuf,
    init_delay: Duration,
    granted: AtomicBool,
    files: Mutex<Vec<PathBuf>>,
    cursor: AtomicUsize,
}

impl DirectoryCamera {
    pub fn new(dir: impl Into<PathBuf>, init_delay: Duration) -> Self {
        Self {
            dir: dir.into(),
            init_delay,
            granted: AtomicBool::new(false),
            files: Mutex::new(Vec::new()),
            cursor: AtomicUsize::new(0),
        }
    }

    fn next_file(&self) -> Option<PathBuf> {
        let files = match self.files.lock() {
            Ok(files) => files,
            Err(poisoned) => poisoned.into_inner(),
        };
        if files.is_empty() {
            return None;
        }
        let index = self.cursor.fetch_add(1, Ordering::SeqCst) % files.len();
        files.get(index).cloned()
    }
}

#[async_trait]
impl CaptureDevice for DirectoryCamera {
    fn permission_granted(&self) -> bool {
        self.granted.load(Ordering::SeqCst)
    }

    async fn request_permission(&self) -> Result<bool, CaptureError> {
        // Running the host with a frames directory is the user's consent.
        info!(dir = ?self.dir, "Camera access granted for frames directory");
        self.granted.store(true, Ordering::SeqCst);
        Ok(true)
    }

    async fn initialize(&self) -> Result<(), CaptureError> {
        tokio::time::sleep(self.init_delay).await;

        let files = scan_image_files(&self.dir).await?;
        if files.is_empty() {
            return Err(CaptureError::NoFrames(self.dir.clone()));
        }
        info!(count = files.len(), dir = ?self.dir, "Directory camera ready");

        let mut slot = match self.files.lock() {
            Ok(slot) => slot,
            Err(poisoned) => poisoned.into_inner(),
        };
        *slot = files;
        Ok(())
    }

    async fn take_still(
        &self,
        options: &StillOptions,
    ) -> Result<Option<CaptureFrame>, CaptureError> {
        let Some(path) = self.next_file() else {
            return Ok(None);
        };

        let bytes = match tokio::fs::read(&path).await {
            Ok(bytes) => bytes,
            Err(e) => {
                // Files can disappear between scans; treat as a missed shot.
                debug!(path = ?path, error = %e, "Still source unreadable, skipping");
                return Ok(None);
            }
        };

        let options = *options;
        let data = tokio::task::spawn_blocking(move || encode_still(&bytes, &options))
            .await
            .map_err(|e| CaptureError::Encode(e.to_string()))??;

        Ok(Some(CaptureFrame {
            data,
            file_name: Some(DEFAULT_FRAME_NAME.to_string()),
            captured_at: chrono::Utc::now(),
        }))
    }
}

/// List image files in `dir`, sorted by name
async fn scan_image_files(dir: &Path) -> Result<Vec<PathBuf>, CaptureError> {
    let io_error = |source| CaptureError::Io {
        path: dir.to_path_buf(),
        source,
    };

    let mut entries = tokio::fs::read_dir(dir).await.map_err(io_error)?;
    let mut files = Vec::new();
    while let Some(entry) = entries.next_entry().await.map_err(io_error)? {
        let path = entry.path();
        if is_image_file(&path) {
            files.push(path);
        } else {
            debug!(path = ?path, "Ignoring non-image file");
        }
    }
    files.sort();
    Ok(files)
}

fn is_image_file(path: &Path) -> bool {
    path.extension()
        .and_then(|ext| ext.to_str())
        .map(|ext| IMAGE_EXTENSIONS.contains(&ext.to_ascii_lowercase().as_str()))
        .unwrap_or(false)
}

/// Decode, optionally downsize, and re-encode as JPEG
fn encode_still(bytes: &[u8], options: &StillOptions) -> Result<Vec<u8>, CaptureError> {
    let mut image =
        image::load_from_memory(bytes).map_err(|e| CaptureError::Encode(e.to_string()))?;

    if !options.skip_processing
        && (image.width() > options.max_dimension || image.height() > options.max_dimension)
    {
        image = image.thumbnail(options.max_dimension, options.max_dimension);
    }

    let rgb = image.to_rgb8();
    let mut data = Vec::new();
    {
        let mut encoder = JpegEncoder::new_with_quality(&mut data, options.jpeg_quality());
        encoder.encode_image(&rgb).map_err(|e| {
            warn!("JPEG encoding failed: {}", e);
            CaptureError::Encode(e.to_string())
        })?;
    }
    Ok(data)
}
