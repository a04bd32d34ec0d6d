//! Helper functions for the channel module

use super::ChannelError;
use base64::Engine;

/// Generate a random WebSocket key
pub(super) fn generate_ws_key() -> String {
    use rand::Rng;
    let mut rng = rand::thread_rng();
    let mut key = [0u8; 16];
    rng.fill(&mut key);
    base64::engine::general_purpose::STANDARD.encode(key)
}

/// Build the WebSocket upgrade request for a summary stream URL
pub(super) fn build_ws_request(ws_url: &str) -> Result<http::Request<()>, ChannelError> {
    let parsed =
        url::Url::parse(ws_url).map_err(|e| ChannelError::ConnectionError(e.to_string()))?;
    let host = parsed
        .host_str()
        .ok_or_else(|| ChannelError::ConnectionError("Invalid URL: no host".to_string()))?;
    let host_header = match parsed.port() {
        Some(port) => format!("{}:{}", host, port),
        None => host.to_string(),
    };

    http::Request::builder()
        .uri(ws_url)
        .header("Host", host_header)
        .header("Connection", "Upgrade")
        .header("Upgrade", "websocket")
        .header("Sec-WebSocket-Version", "13")
        .header("Sec-WebSocket-Key", generate_ws_key())
        .header(
            "User-Agent",
            concat!("navi-narrator/", env!("CARGO_PKG_VERSION")),
        )
        .body(())
        .map_err(|e| ChannelError::ConnectionError(e.to_string()))
}
