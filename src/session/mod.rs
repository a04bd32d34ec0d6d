//! Live narration session controller
//!
//! # Lifecycle
//! `Idle → Preflighting → Starting → ChannelAttaching → Active → Stopping →
//! Stopped`, with `Failed` reachable from the start sequence and absorbing.
//!
//! A controller owns exactly one backend session, one summary channel and at
//! most one capture timer. All of its state sits behind a single mutex that
//! is never held across an `.await`. Every background task and in-flight
//! request checks `should_stop` and the session id under that lock before
//! its result is applied, so nothing lands after `stop()`.

mod events;
mod producer;
mod state;
mod upload;


pub use state::{ChannelState, Diagnostics, NarrationEvent, NarrationSnapshot, SessionStatus};

use crate::backend::{BackendError, NarrationBackend, StartSessionRequest};
use crate::capture::{CaptureDevice, CaptureError, ReadinessGate, StillOptions};
use crate::channel::{ChannelEventHandler, SummaryChannel, SummaryTransport};
use crate::config::Config;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use std::time::Duration;
use tokio::runtime::Handle;
use tokio::sync::broadcast;
use tokio::task::JoinHandle;
use tracing::{debug, error, info, instrument, warn};

/// Capacity of the change-notification channel
const EVENT_CHANNEL_CAPACITY: usize = 64;

/// Timing and request parameters of a session
#[derive(Debug, Clone)]
pub struct SessionSettings {
    /// Period of the capture timer
    pub capture_interval: Duration,
    /// Delay between device readiness and arming the timer
    pub warmup: Duration,
    pub still: StillOptions,
    pub start_request: StartSessionRequest,
}

impl Default for SessionSettings {
    fn default() -> Self {
        Self {
            capture_interval: Duration::from_millis(3000),
            warmup: Duration::from_millis(500),
            still: StillOptions::default(),
            start_request: StartSessionRequest::default(),
        }
    }
}

impl From<&Config> for SessionSettings {
    fn from(config: &Config) -> Self {
        Self {
            capture_interval: Duration::from_millis(config.capture.interval_ms),
            warmup: Duration::from_millis(config.capture.warmup_ms),
            still: StillOptions {
                quality: config.capture.quality,
                skip_processing: config.capture.skip_processing,
                max_dimension: config.capture.max_dimension,
            },
            start_request: StartSessionRequest {
                sampling_rate: config.session.sampling_rate,
                summary_interval_s: config.session.summary_interval_s,
            },
        }
    }
}

/// Reasons `start()` can fail
#[derive(Debug, thiserror::Error)]
pub enum StartError {
    #[error("Session can only be started once (status: {0})")]
    NotIdle(SessionStatus),

    #[error("Vision backend is unreachable: {0}")]
    Preflight(#[source] BackendError),

    #[error("Failed to start vision session: {0}")]
    SessionStart(#[source] BackendError),
}

#[derive(Default)]
struct ControllerState {
    status: SessionStatus,
    started: bool,
    torn_down: bool,
    session_id: Option<String>,
    narration: Option<String>,
    diagnostics: Diagnostics,
    bring_up: Option<JoinHandle<()>>,
    arming: Option<JoinHandle<()>>,
    producer: Option<JoinHandle<()>>,
    channel: Option<SummaryChannel>,
}

struct Inner {
    backend: Arc<dyn NarrationBackend>,
    transport: Arc<dyn SummaryTransport>,
    device: Arc<dyn CaptureDevice>,
    gate: ReadinessGate,
    settings: SessionSettings,
    state: Mutex<ControllerState>,
    should_stop: Arc<AtomicBool>,
    event_tx: broadcast::Sender<NarrationEvent>,
}

/// Drives one narration session from preflight to teardown
///
/// Dropping the controller stops the session.
pub struct NarrationController {
    inner: Arc<Inner>,
}

impl NarrationController {
    pub fn new(
        backend: Arc<dyn NarrationBackend>,
        transport: Arc<dyn SummaryTransport>,
        device: Arc<dyn CaptureDevice>,
        gate: ReadinessGate,
        settings: SessionSettings,
    ) -> Self {
        let (event_tx, _) = broadcast::channel(EVENT_CHANNEL_CAPACITY);
        Self {
            inner: Arc::new(Inner {
                backend,
                transport,
                device,
                gate,
                settings,
                state: Mutex::new(ControllerState::default()),
                should_stop: Arc::new(AtomicBool::new(false)),
                event_tx,
            }),
        }
    }

    /// Subscribe to status, narration and channel changes
    pub fn subscribe(&self) -> broadcast::Receiver<NarrationEvent> {
        self.inner.event_tx.subscribe()
    }

    pub fn gate(&self) -> &ReadinessGate {
        &self.inner.gate
    }

    /// Bring the capture device up in the background
    ///
    /// Requests permission if it has not been granted yet and initialises the
    /// hardware; each outcome sets its latch on the gate as soon as it is
    /// known. Calling this more than once has no effect.
    pub fn mount(&self) {
        let mut state = self.inner.lock();
        if state.torn_down || state.bring_up.is_some() {
            return;
        }
        let inner = self.inner.clone();
        state.bring_up = Some(tokio::spawn(async move { inner.bring_up_device().await }));
    }

    /// Run the start sequence
    ///
    /// Returns once the summary channel is attached. The capture timer is
    /// armed in the background after the readiness gate opens and the
    /// warm-up delay elapses. If `stop()` is called while this is running,
    /// the sequence ends early with `Ok(())` and nothing more is applied.
    #[instrument(skip(self))]
    pub async fn start(&self) -> Result<(), StartError> {
        let inner = &self.inner;
        {
            let mut state = inner.lock();
            if state.started || state.torn_down {
                warn!(status = %state.status, "Ignoring repeated session start");
                return Err(StartError::NotIdle(state.status));
            }
            state.started = true;
            inner.set_status(&mut state, SessionStatus::Preflighting);
        }

        // 1. Reachability
        let preflight = inner.backend.check_reachable().await;
        {
            let mut state = inner.lock();
            if !inner.accepts_results(&state) {
                debug!("Stopped during preflight");
                return Ok(());
            }
            match preflight {
                Ok(status) => {
                    state.diagnostics.preflight_status = Some(status);
                    inner.set_status(&mut state, SessionStatus::Starting);
                }
                Err(e) => {
                    error!("Vision backend preflight failed: {}", e);
                    state.diagnostics.preflight_status = e.status();
                    state.diagnostics.last_error = Some(format!("Preflight failed: {}", e));
                    inner.set_status(&mut state, SessionStatus::Failed);
                    return Err(StartError::Preflight(e));
                }
            }
        }

        // 2. Session creation
        let started = inner
            .backend
            .start_session(&inner.settings.start_request)
            .await;
        let session_id = {
            let mut state = inner.lock();
            let live = inner.accepts_results(&state);
            match started {
                Ok(started) if live => {
                    state.diagnostics.start_status = Some(started.status);
                    state.session_id = Some(started.session_id.clone());
                    inner.set_status(&mut state, SessionStatus::ChannelAttaching);
                    started.session_id
                }
                Ok(started) => {
                    drop(state);
                    info!(session_id = %started.session_id, "Session started after stop, releasing it");
                    inner.release_session(started.session_id);
                    return Ok(());
                }
                Err(e) if live => {
                    error!("Vision session start failed: {}", e);
                    state.diagnostics.start_status = e.status();
                    state.diagnostics.last_error = Some(format!("Session start failed: {}", e));
                    inner.set_status(&mut state, SessionStatus::Failed);
                    return Err(StartError::SessionStart(e));
                }
                Err(e) => {
                    debug!("Session start failed after stop: {}", e);
                    return Ok(());
                }
            }
        };

        // 3. Summary channel
        inner.attach_channel(&session_id).await;

        // 4. Arm the capture timer once the device is ready
        let mut state = inner.lock();
        if !inner.accepts_results(&state) || state.status != SessionStatus::ChannelAttaching {
            return Ok(());
        }
        let arming_inner = inner.clone();
        state.arming = Some(tokio::spawn(async move {
            arming_inner.gate.wait_ready().await;
            debug!("Capture device ready, warming up");
            tokio::time::sleep(arming_inner.settings.warmup).await;
            arming_inner.arm_producer();
        }));
        info!(session_id = %session_id, "Narration session attached");
        Ok(())
    }

    /// Tear the session down
    ///
    /// Safe to call at any time and any number of times.
    pub fn stop(&self) {
        self.inner.teardown();
    }

    /// Fetch the latest summary over HTTP and apply it
    ///
    /// Uses the same replace-latest rule and liveness checks as channel
    /// messages. Returns the narration afterwards, or `None` when there is
    /// no live session.
    pub async fn refresh_narration(&self) -> Result<Option<String>, BackendError> {
        let inner = &self.inner;
        let Some(session_id) = inner.live_session_id() else {
            return Ok(None);
        };
        let latest = inner.backend.latest_summary(&session_id).await?;

        let mut state = inner.lock();
        if !inner.accepts_updates_for(&state, &session_id) {
            return Ok(None);
        }
        if let Some(text) = latest.text {
            inner.apply_narration(&mut state, text);
        }
        Ok(state.narration.clone())
    }

    pub fn status(&self) -> SessionStatus {
        self.inner.lock().status
    }

    pub fn narration(&self) -> Option<String> {
        self.inner.lock().narration.clone()
    }

    pub fn diagnostics(&self) -> Diagnostics {
        self.inner.lock().diagnostics.clone()
    }

    pub fn snapshot(&self) -> NarrationSnapshot {
        let state = self.inner.lock();
        NarrationSnapshot {
            status: state.status,
            session_id: state.session_id.clone(),
            narration: state.narration.clone(),
            diagnostics: state.diagnostics.clone(),
        }
    }
}

impl Drop for NarrationController {
    fn drop(&mut self) {
        self.inner.teardown();
    }
}

impl Inner {
    fn lock(&self) -> MutexGuard<'_, ControllerState> {
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Whether async results may still be applied
    fn accepts_results(&self, state: &ControllerState) -> bool {
        !state.torn_down && !self.should_stop.load(Ordering::SeqCst)
    }

    fn set_status(&self, state: &mut ControllerState, status: SessionStatus) {
        if state.status == status {
            return;
        }
        debug!(from = %state.status, to = %status, "Session status changed");
        state.status = status;
        let _ = self.event_tx.send(NarrationEvent::StatusChanged(status));
    }

    fn set_channel_state(&self, state: &mut ControllerState, channel: ChannelState) {
        if state.diagnostics.channel == channel {
            return;
        }
        state.diagnostics.channel = channel;
        let _ = self.event_tx.send(NarrationEvent::Channel(channel));
    }

    fn live_session_id(&self) -> Option<String> {
        let state = self.lock();
        let id = state.session_id.as_deref()?;
        self.accepts_updates_for(&state, id).then(|| id.to_string())
    }

    async fn bring_up_device(self: Arc<Self>) {
        let permission = async {
            let granted = if self.device.permission_granted() {
                true
            } else {
                match self.device.request_permission().await {
                    Ok(granted) => granted,
                    Err(e) => {
                        warn!("Camera permission request failed: {}", e);
                        false
                    }
                }
            };
            if !granted {
                warn!("Camera permission not granted, capture stays disabled");
                self.lock().diagnostics.last_error =
                    Some(CaptureError::PermissionDenied.to_string());
            }
            self.gate.set_permission(granted);
        };

        let hardware = async {
            match self.device.initialize().await {
                Ok(()) => {
                    info!("Capture device ready");
                    self.gate.set_device_ready(true);
                }
                Err(e) => {
                    error!("Capture device failed to initialise: {}", e);
                    self.lock().diagnostics.last_error =
                        Some(format!("Capture device failed: {}", e));
                }
            }
        };

        tokio::join!(permission, hardware);
    }

    async fn attach_channel(self: &Arc<Self>, session_id: &str) {
        let url = match self.backend.summary_stream_url(session_id) {
            Ok(url) => url,
            Err(e) => {
                error!("Cannot build summary stream URL: {}", e);
                let mut state = self.lock();
                if self.accepts_results(&state) {
                    state.diagnostics.last_error = Some(format!("Summary channel: {}", e));
                    self.set_channel_state(&mut state, ChannelState::Failed);
                }
                return;
            }
        };

        {
            let mut state = self.lock();
            if !self.accepts_results(&state) {
                return;
            }
            self.set_channel_state(&mut state, ChannelState::Connecting);
        }

        let weak = Arc::downgrade(self);
        let handler_session = session_id.to_string();
        let handler: ChannelEventHandler = Arc::new(move |event| {
            if let Some(inner) = weak.upgrade() {
                inner.handle_channel_event(&handler_session, event);
            }
        });

        match SummaryChannel::open(self.transport.as_ref(), &url, handler).await {
            Ok(channel) => {
                let mut state = self.lock();
                if self.accepts_results(&state) {
                    state.channel = Some(channel);
                } else {
                    debug!("Stopped while the summary channel was opening");
                    drop(state);
                    drop(channel);
                }
            }
            Err(e) => {
                // Not terminal: uploads continue without live summaries.
                warn!("Summary channel failed to open: {}", e);
                let mut state = self.lock();
                if self.accepts_results(&state) {
                    state.diagnostics.last_error = Some(format!("Summary channel: {}", e));
                    self.set_channel_state(&mut state, ChannelState::Failed);
                }
            }
        }
    }

    /// Create the capture timer; a no-op unless still attaching
    fn arm_producer(self: &Arc<Self>) {
        let mut state = self.lock();
        if !self.accepts_results(&state)
            || state.status != SessionStatus::ChannelAttaching
            || state.producer.is_some()
        {
            debug!(status = %state.status, "Not arming capture timer");
            return;
        }
        state.producer = Some(producer::spawn_producer(self.clone()));
        self.set_status(&mut state, SessionStatus::Active);
        info!(
            interval_ms = self.settings.capture_interval.as_millis() as u64,
            "Capture timer armed"
        );
    }

    fn teardown(&self) {
        self.should_stop.store(true, Ordering::SeqCst);

        let mut state = self.lock();
        if state.torn_down {
            debug!("Session already torn down");
            return;
        }
        state.torn_down = true;

        let failed = state.status == SessionStatus::Failed;
        if !failed {
            self.set_status(&mut state, SessionStatus::Stopping);
        }

        for task in [state.bring_up.take(), state.arming.take()]
            .into_iter()
            .flatten()
        {
            task.abort();
        }
        if let Some(producer) = state.producer.take() {
            producer.abort();
            state.diagnostics.timer_cancellations += 1;
            info!("Capture timer cancelled");
        }
        if let Some(mut channel) = state.channel.take() {
            debug!(url = %channel.url(), open = channel.is_open(), "Closing summary channel");
            channel.close();
        }
        // A channel still connecting is dropped by `attach_channel` on arrival.
        if matches!(
            state.diagnostics.channel,
            ChannelState::Connecting | ChannelState::Open
        ) {
            self.set_channel_state(&mut state, ChannelState::Closed);
        }

        let session_id = state.session_id.clone();
        if !failed {
            self.set_status(&mut state, SessionStatus::Stopped);
        }
        drop(state);

        if let Some(session_id) = session_id {
            self.release_session(session_id);
        }
        info!("Narration session stopped");
    }

    /// Best-effort, non-awaited `POST /cv/session/stop`
    fn release_session(&self, session_id: String) {
        let Ok(handle) = Handle::try_current() else {
            warn!(session_id = %session_id, "No runtime available to release session");
            return;
        };
        let backend = self.backend.clone();
        handle.spawn(async move {
            if let Err(e) = backend.stop_session(&session_id).await {
                warn!(session_id = %session_id, "Failed to release vision session: {}", e);
            }
        });
    }
}
