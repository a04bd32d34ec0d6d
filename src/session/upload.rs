//! Upload pipeline
//!
//! Each frame is posted on its own task: no retry, no ordering, and a slow
//! upload never delays the next capture tick.

use super::Inner;
use crate::backend::BackendError;
use crate::capture::CaptureFrame;
use std::sync::Arc;
use tracing::{debug, warn};

pub(super) fn submit_frame(inner: &Arc<Inner>, session_id: String, frame: CaptureFrame) {
    let inner = inner.clone();
    tokio::spawn(async move {
        let result = inner.backend.upload_frame(&session_id, frame).await;
        inner.record_upload(&session_id, result);
    });
}

impl Inner {
    fn record_upload(&self, session_id: &str, result: Result<u16, BackendError>) {
        let mut state = self.lock();
        if !self.accepts_results(&state) || state.session_id.as_deref() != Some(session_id) {
            debug!(session_id = %session_id, "Discarding upload result for stopped session");
            return;
        }

        let diagnostics = &mut state.diagnostics;
        match result {
            Ok(status) if (200..300).contains(&status) => {
                diagnostics.last_upload_status = Some(status);
                diagnostics.frames_uploaded += 1;
            }
            Ok(status) => {
                diagnostics.last_upload_status = Some(status);
                diagnostics.upload_failures += 1;
            }
            Err(e) => {
                warn!(session_id = %session_id, "Frame upload failed: {}", e);
                diagnostics.last_upload_status = e.status();
                diagnostics.last_error = Some(format!("Upload failed: {}", e));
                diagnostics.upload_failures += 1;
            }
        }
    }
}
