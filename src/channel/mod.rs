//! Summary channel
//!
//! Wraps one persistent streaming connection that pushes scene summaries for
//! a single session. Transports turn their wire traffic into
//! [`ChannelEvent`]s; [`SummaryChannel`] pumps those events into a single
//! handler until the stream ends or the channel is closed locally.
//! Connections are never reopened automatically.

mod helpers;
mod websocket;

pub use websocket::WsSummaryTransport;

use async_trait::async_trait;
use futures_util::stream::BoxStream;
use futures_util::StreamExt;
use serde_json::Value;
use std::sync::Arc;
use tokio::sync::oneshot;
use tokio::task::JoinHandle;
use tracing::{debug, info};

/// Everything a summary connection can report, in delivery order
#[derive(Debug, Clone, PartialEq)]
pub enum ChannelEvent {
    /// Connection established
    Opened,
    /// Raw inbound text payload
    Message(String),
    /// Transport-level failure
    Error(String),
    /// Connection closed by the peer or the network
    Closed { code: Option<u16>, reason: String },
}

/// Stream of events produced by a connected transport
pub type EventStream = BoxStream<'static, ChannelEvent>;

/// Single dispatch point for channel events
pub type ChannelEventHandler = Arc<dyn Fn(ChannelEvent) + Send + Sync>;

/// Opens summary streams
#[async_trait]
pub trait SummaryTransport: Send + Sync {
    async fn connect(&self, url: &str) -> Result<EventStream, ChannelError>;
}

/// Errors that can occur while opening a summary channel
#[derive(Debug, thiserror::Error)]
pub enum ChannelError {
    #[error("Connection error: {0}")]
    ConnectionError(String),

    #[error("Connection timeout - summary stream did not respond within {0} seconds")]
    ConnectionTimeout(u64),
}

/// Decoded summary-stream message
#[derive(Debug, Clone, PartialEq)]
pub enum SummaryEvent {
    /// New scene description
    Summary(Summary),
    /// Backend-reported problem (e.g. unknown session)
    Error { detail: String },
    /// Any other message kind; ignored
    Other { kind: String },
}

#[derive(Debug, Clone, PartialEq)]
pub struct Summary {
    pub text: String,
    pub version: Option<u64>,
    pub ts: Option<f64>,
    pub audio_url: Option<String>,
}

impl SummaryEvent {
    /// Decode a raw payload.
    ///
    /// Returns `None` for anything that is not a JSON object with a string
    /// `type`, and for summaries whose `text` is not a string.
    pub fn decode(raw: &str) -> Option<SummaryEvent> {
        let value: Value = serde_json::from_str(raw).ok()?;
        let kind = value.get("type")?.as_str()?;
        match kind {
            "summary" => {
                let text = value.get("text")?.as_str()?;
                Some(SummaryEvent::Summary(Summary {
                    text: text.to_string(),
                    version: value.get("version").and_then(Value::as_u64),
                    ts: value.get("ts").and_then(Value::as_f64),
                    audio_url: value
                        .get("audio_url")
                        .and_then(Value::as_str)
                        .map(String::from),
                }))
            }
            "error" => Some(SummaryEvent::Error {
                detail: value
                    .get("detail")
                    .and_then(Value::as_str)
                    .unwrap_or("unspecified error")
                    .to_string(),
            }),
            other => Some(SummaryEvent::Other {
                kind: other.to_string(),
            }),
        }
    }
}

/// Handle to an open summary channel
///
/// Owns the pump task. Closing is idempotent and also happens on drop.
pub struct SummaryChannel {
    url: String,
    close_tx: Option<oneshot::Sender<()>>,
    task: Option<JoinHandle<()>>,
}

impl SummaryChannel {
    /// Connect and start delivering events to `handler`
    pub async fn open(
        transport: &dyn SummaryTransport,
        url: &str,
        handler: ChannelEventHandler,
    ) -> Result<Self, ChannelError> {
        let mut events = transport.connect(url).await?;
        info!(url = %url, "Summary channel open");
        handler(ChannelEvent::Opened);

        let (close_tx, mut close_rx) = oneshot::channel::<()>();
        let task_url = url.to_string();
        let task = tokio::spawn(async move {
            loop {
                tokio::select! {
                    biased;

                    _ = &mut close_rx => {
                        debug!(url = %task_url, "Summary channel closed locally");
                        break;
                    }
                    next = events.next() => match next {
                        Some(event) => {
                            let closed = matches!(event, ChannelEvent::Closed { .. });
                            handler(event);
                            if closed {
                                break;
                            }
                        }
                        None => {
                            handler(ChannelEvent::Closed { code: None, reason: String::new() });
                            break;
                        }
                    }
                }
            }
        });

        Ok(Self {
            url: url.to_string(),
            close_tx: Some(close_tx),
            task: Some(task),
        })
    }

    pub fn url(&self) -> &str {
        &self.url
    }

    /// Whether the pump is still delivering events
    pub fn is_open(&self) -> bool {
        self.close_tx.is_some() && self.task.as_ref().is_some_and(|t| !t.is_finished())
    }

    /// Stop delivering events and release the connection
    pub fn close(&mut self) {
        if let Some(close_tx) = self.close_tx.take() {
            // The pump may already have exited on its own.
            let _ = close_tx.send(());
            debug!(url = %self.url, "Summary channel close requested");
        }
        self.task.take();
    }
}

impl Drop for SummaryChannel {
    fn drop(&mut self) {
        self.close();
    }
}
