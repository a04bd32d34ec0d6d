//! Frame producer
//!
//! One repeating timer per session. The first tick fires one period after
//! arming; missed ticks are skipped rather than bunched up.

use super::{upload, Inner, SessionStatus};
use crate::capture::CaptureError;
use std::sync::atomic::Ordering;
use std::sync::Arc;
use tokio::task::JoinHandle;
use tokio::time::{interval_at, Instant, MissedTickBehavior};
use tracing::{debug, trace, warn};

pub(super) fn spawn_producer(inner: Arc<Inner>) -> JoinHandle<()> {
    tokio::spawn(run_producer(inner))
}

async fn run_producer(inner: Arc<Inner>) {
    let period = inner.settings.capture_interval;
    let should_stop = inner.should_stop.clone();
    let mut ticker = interval_at(Instant::now() + period, period);
    ticker.set_missed_tick_behavior(MissedTickBehavior::Skip);

    loop {
        ticker.tick().await;
        if should_stop.load(Ordering::SeqCst) {
            break;
        }

        let Some(session_id) = inner.capture_target() else {
            trace!("Capture tick skipped, session or device not ready");
            continue;
        };

        match inner.device.take_still(&inner.settings.still).await {
            Ok(Some(frame)) => {
                if should_stop.load(Ordering::SeqCst) {
                    break;
                }
                inner.record_capture();
                upload::submit_frame(&inner, session_id, frame);
            }
            Ok(None) => {
                debug!("Capture device returned no image");
                inner.record_capture_miss(None);
            }
            Err(e) => {
                warn!("Capture failed: {}", e);
                inner.record_capture_miss(Some(e));
            }
        }
    }
}

impl Inner {
    /// Session id to capture for, if a capture is allowed right now
    fn capture_target(&self) -> Option<String> {
        let state = self.lock();
        if !self.accepts_results(&state)
            || state.status != SessionStatus::Active
            || !self.gate.is_ready()
        {
            return None;
        }
        state.session_id.clone()
    }

    fn record_capture(&self) {
        let mut state = self.lock();
        if self.accepts_results(&state) {
            state.diagnostics.frames_captured += 1;
        }
    }

    fn record_capture_miss(&self, error: Option<CaptureError>) {
        let mut state = self.lock();
        if !self.accepts_results(&state) {
            return;
        }
        state.diagnostics.capture_misses += 1;
        if let Some(e) = error {
            state.diagnostics.last_error = Some(format!("Capture failed: {}", e));
        }
    }
}
