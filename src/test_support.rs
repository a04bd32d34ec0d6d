//! In-memory collaborators for controller and channel tests

use crate::backend::{
    BackendError, LatestSummary, NarrationBackend, StartSessionRequest, StartedSession,
};
use crate::capture::{CaptureDevice, CaptureError, CaptureFrame, StillOptions};
use crate::channel::{ChannelError, ChannelEvent, EventStream, SummaryTransport};
use async_trait::async_trait;
use futures_util::{stream, StreamExt};
use std::collections::VecDeque;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;
use tokio::sync::mpsc;

/// A request seen by [`FakeBackend`]
#[derive(Debug, Clone, PartialEq)]
pub enum BackendCall {
    Preflight,
    Start,
    Stop(String),
    Upload { session_id: String },
    Latest(String),
}

/// Scripted result of one frame upload
#[derive(Debug, Clone, Copy)]
pub enum UploadOutcome {
    Status(u16),
    TransportError,
}

pub struct FakeBackend {
    session_id: String,
    reachable: bool,
    start_failure: Option<u16>,
    start_delay: Duration,
    uploads: Mutex<VecDeque<UploadOutcome>>,
    latest_text: Mutex<Option<String>>,
    calls: Mutex<Vec<BackendCall>>,
}

impl FakeBackend {
    pub fn new(session_id: &str) -> Self {
        Self {
            session_id: session_id.to_string(),
            reachable: true,
            start_failure: None,
            start_delay: Duration::ZERO,
            uploads: Mutex::new(VecDeque::new()),
            latest_text: Mutex::new(None),
            calls: Mutex::new(Vec::new()),
        }
    }

    pub fn unreachable() -> Self {
        Self {
            reachable: false,
            ..Self::new("unused")
        }
    }

    pub fn with_start_status(mut self, status: u16) -> Self {
        self.start_failure = Some(status);
        self
    }

    pub fn with_start_delay(mut self, delay: Duration) -> Self {
        self.start_delay = delay;
        self
    }

    /// Queue upload results; uploads past the end of the plan answer 200
    pub fn with_uploads(self, outcomes: impl IntoIterator<Item = UploadOutcome>) -> Self {
        self.uploads.lock().unwrap().extend(outcomes);
        self
    }

    pub fn set_latest_text(&self, text: &str) {
        *self.latest_text.lock().unwrap() = Some(text.to_string());
    }

    pub fn calls(&self) -> Vec<BackendCall> {
        self.calls.lock().unwrap().clone()
    }

    pub fn count(&self, matches: impl Fn(&BackendCall) -> bool) -> usize {
        self.calls().iter().filter(|c| matches(c)).count()
    }

    pub fn uploads(&self) -> usize {
        self.count(|c| matches!(c, BackendCall::Upload { .. }))
    }

    pub fn stops(&self) -> Vec<String> {
        self.calls()
            .into_iter()
            .filter_map(|c| match c {
                BackendCall::Stop(id) => Some(id),
                _ => None,
            })
            .collect()
    }

    fn record(&self, call: BackendCall) {
        self.calls.lock().unwrap().push(call);
    }
}

#[async_trait]
impl NarrationBackend for FakeBackend {
    async fn check_reachable(&self) -> Result<u16, BackendError> {
        self.record(BackendCall::Preflight);
        if self.reachable {
            Ok(200)
        } else {
            Err(BackendError::InvalidResponse("connection refused".into()))
        }
    }

    async fn start_session(
        &self,
        _request: &StartSessionRequest,
    ) -> Result<StartedSession, BackendError> {
        self.record(BackendCall::Start);
        if !self.start_delay.is_zero() {
            tokio::time::sleep(self.start_delay).await;
        }
        match self.start_failure {
            Some(status) => Err(BackendError::ServerError {
                status,
                message: "Internal Server Error".into(),
            }),
            None => Ok(StartedSession {
                session_id: self.session_id.clone(),
                status: 200,
            }),
        }
    }

    async fn stop_session(&self, session_id: &str) -> Result<(), BackendError> {
        self.record(BackendCall::Stop(session_id.to_string()));
        Ok(())
    }

    async fn upload_frame(
        &self,
        session_id: &str,
        _frame: CaptureFrame,
    ) -> Result<u16, BackendError> {
        self.record(BackendCall::Upload {
            session_id: session_id.to_string(),
        });
        let outcome = self
            .uploads
            .lock()
            .unwrap()
            .pop_front()
            .unwrap_or(UploadOutcome::Status(200));
        match outcome {
            UploadOutcome::Status(status) => Ok(status),
            UploadOutcome::TransportError => {
                Err(BackendError::InvalidResponse("connection reset".into()))
            }
        }
    }

    async fn latest_summary(&self, session_id: &str) -> Result<LatestSummary, BackendError> {
        self.record(BackendCall::Latest(session_id.to_string()));
        Ok(LatestSummary {
            session_id: session_id.to_string(),
            text: self.latest_text.lock().unwrap().clone(),
            ..LatestSummary::default()
        })
    }

    fn summary_stream_url(&self, session_id: &str) -> Result<String, BackendError> {
        Ok(format!("ws://fake/cv/summary/ws/{}", session_id))
    }
}

/// Counts a stream as released when its state is dropped
struct ReleaseGuard(Arc<AtomicUsize>);

impl Drop for ReleaseGuard {
    fn drop(&mut self) {
        self.0.fetch_add(1, Ordering::SeqCst);
    }
}

#[derive(Default)]
pub struct FakeTransport {
    fail: bool,
    connect_delay: Duration,
    urls: Mutex<Vec<String>>,
    senders: Mutex<Vec<mpsc::UnboundedSender<ChannelEvent>>>,
    released: Arc<AtomicUsize>,
}

impl FakeTransport {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn failing() -> Self {
        Self {
            fail: true,
            ..Self::new()
        }
    }

    pub fn with_connect_delay(mut self, delay: Duration) -> Self {
        self.connect_delay = delay;
        self
    }

    /// Deliver an event on the most recent connection
    pub fn push(&self, event: ChannelEvent) {
        if let Some(tx) = self.senders.lock().unwrap().last() {
            let _ = tx.send(event);
        }
    }

    pub fn urls(&self) -> Vec<String> {
        self.urls.lock().unwrap().clone()
    }

    /// Number of connections whose stream has been dropped
    pub fn released(&self) -> usize {
        self.released.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl SummaryTransport for FakeTransport {
    async fn connect(&self, url: &str) -> Result<EventStream, ChannelError> {
        self.urls.lock().unwrap().push(url.to_string());
        if !self.connect_delay.is_zero() {
            tokio::time::sleep(self.connect_delay).await;
        }
        if self.fail {
            return Err(ChannelError::ConnectionError("connection refused".into()));
        }

        let (tx, rx) = mpsc::unbounded_channel();
        self.senders.lock().unwrap().push(tx);
        let guard = ReleaseGuard(self.released.clone());
        Ok(stream::unfold((rx, guard), |(mut rx, guard)| async move {
            rx.recv().await.map(|event| (event, (rx, guard)))
        })
        .boxed())
    }
}

pub struct FakeDevice {
    granted: AtomicBool,
    grant_on_request: bool,
    producing: AtomicBool,
    permission_requests: AtomicUsize,
    captures: AtomicUsize,
}

impl FakeDevice {
    /// Permission not yet granted; the prompt grants it
    pub fn new() -> Self {
        Self {
            granted: AtomicBool::new(false),
            grant_on_request: true,
            producing: AtomicBool::new(true),
            permission_requests: AtomicUsize::new(0),
            captures: AtomicUsize::new(0),
        }
    }

    pub fn already_granted() -> Self {
        let device = Self::new();
        device.granted.store(true, Ordering::SeqCst);
        device
    }

    pub fn denying() -> Self {
        Self {
            grant_on_request: false,
            ..Self::new()
        }
    }

    /// Whether `take_still` returns an image
    pub fn set_producing(&self, producing: bool) {
        self.producing.store(producing, Ordering::SeqCst);
    }

    pub fn captures(&self) -> usize {
        self.captures.load(Ordering::SeqCst)
    }

    pub fn permission_requests(&self) -> usize {
        self.permission_requests.load(Ordering::SeqCst)
    }
}

impl Default for FakeDevice {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl CaptureDevice for FakeDevice {
    fn permission_granted(&self) -> bool {
        self.granted.load(Ordering::SeqCst)
    }

    async fn request_permission(&self) -> Result<bool, CaptureError> {
        self.permission_requests.fetch_add(1, Ordering::SeqCst);
        self.granted.store(self.grant_on_request, Ordering::SeqCst);
        Ok(self.grant_on_request)
    }

    async fn initialize(&self) -> Result<(), CaptureError> {
        Ok(())
    }

    async fn take_still(
        &self,
        _options: &StillOptions,
    ) -> Result<Option<CaptureFrame>, CaptureError> {
        self.captures.fetch_add(1, Ordering::SeqCst);
        if self.producing.load(Ordering::SeqCst) {
            Ok(Some(CaptureFrame::new(vec![0xFF, 0xD8, 0xFF, 0xD9])))
        } else {
            Ok(None)
        }
    }
}
