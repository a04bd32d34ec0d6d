//! WebSocket transport for the summary stream
//!
//! A pump task owns the socket. It forwards inbound frames as
//! [`ChannelEvent`]s, sends keep-alive pings, and sends a close frame once
//! the consumer drops the event stream.

use super::helpers::build_ws_request;
use super::{ChannelError, ChannelEvent, EventStream, SummaryTransport};
use async_trait::async_trait;
use futures_util::{stream, SinkExt, StreamExt};
use std::time::Duration;
use tokio::net::TcpStream;
use tokio::sync::mpsc;
use tokio::time::{interval_at, timeout, Instant, MissedTickBehavior};
use tokio_tungstenite::tungstenite::Message;
use tokio_tungstenite::{connect_async, MaybeTlsStream, WebSocketStream};
use tracing::{debug, error, info, trace, warn};

/// Buffered events between the pump and the channel
const EVENT_BUFFER: usize = 64;

pub struct WsSummaryTransport {
    connect_timeout: Duration,
    ping_interval: Duration,
}

impl WsSummaryTransport {
    pub fn new(connect_timeout: Duration, ping_interval: Duration) -> Self {
        Self {
            connect_timeout,
            ping_interval,
        }
    }
}

#[async_trait]
impl SummaryTransport for WsSummaryTransport {
    async fn connect(&self, url: &str) -> Result<EventStream, ChannelError> {
        let request = build_ws_request(url)?;
        info!(url = %url, "Connecting to summary stream");

        let ws_stream = match timeout(self.connect_timeout, connect_async(request)).await {
            Ok(Ok((stream, _response))) => stream,
            Ok(Err(e)) => {
                error!("Summary stream connection failed: {}", e);
                return Err(ChannelError::ConnectionError(e.to_string()));
            }
            Err(_) => {
                error!("Summary stream connection timed out");
                return Err(ChannelError::ConnectionTimeout(
                    self.connect_timeout.as_secs(),
                ));
            }
        };

        let (event_tx, event_rx) = mpsc::channel(EVENT_BUFFER);
        tokio::spawn(run_pump(ws_stream, event_tx, self.ping_interval));

        Ok(stream::unfold(event_rx, |mut rx| async move {
            rx.recv().await.map(|event| (event, rx))
        })
        .boxed())
    }
}

/// Own the socket until it closes or the consumer goes away
async fn run_pump(
    ws_stream: WebSocketStream<MaybeTlsStream<TcpStream>>,
    event_tx: mpsc::Sender<ChannelEvent>,
    ping_interval: Duration,
) {
    let (mut ws_sink, mut ws_stream) = ws_stream.split();
    let mut ping = interval_at(Instant::now() + ping_interval, ping_interval);
    ping.set_missed_tick_behavior(MissedTickBehavior::Skip);

    loop {
        tokio::select! {
            biased;

            _ = event_tx.closed() => {
                debug!("Summary stream released, closing socket");
                if let Err(e) = ws_sink.close().await {
                    trace!("Close frame not delivered: {}", e);
                }
                break;
            }
            _ = ping.tick() => {
                if ws_sink.send(Message::Ping(Vec::new())).await.is_err() {
                    warn!("Failed to send summary stream keepalive ping");
                    let _ = event_tx
                        .send(ChannelEvent::Error("keepalive ping failed".to_string()))
                        .await;
                    break;
                }
                trace!("Sent summary stream keepalive ping");
            }
            msg = ws_stream.next() => match msg {
                Some(Ok(Message::Text(text))) => {
                    trace!("Summary stream message: {}", text);
                    if event_tx.send(ChannelEvent::Message(text)).await.is_err() {
                        break;
                    }
                }
                Some(Ok(Message::Binary(bytes))) => match String::from_utf8(bytes) {
                    Ok(text) => {
                        if event_tx.send(ChannelEvent::Message(text)).await.is_err() {
                            break;
                        }
                    }
                    Err(_) => trace!("Ignoring non-UTF-8 binary frame"),
                },
                Some(Ok(Message::Close(frame))) => {
                    let (code, reason) = frame
                        .map(|f| (Some(u16::from(f.code)), f.reason.into_owned()))
                        .unwrap_or((None, String::new()));
                    info!(code = ?code, reason = %reason, "Summary stream closed by server");
                    let _ = event_tx.send(ChannelEvent::Closed { code, reason }).await;
                    break;
                }
                Some(Ok(_)) => {
                    // Ping/pong are answered by tungstenite
                }
                Some(Err(e)) => {
                    error!("Summary stream receive error: {}", e);
                    let _ = event_tx.send(ChannelEvent::Error(e.to_string())).await;
                    break;
                }
                None => {
                    info!("Summary stream ended");
                    let _ = event_tx
                        .send(ChannelEvent::Closed { code: None, reason: String::new() })
                        .await;
                    break;
                }
            }
        }
    }
}
