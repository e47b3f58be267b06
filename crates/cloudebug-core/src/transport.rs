//! WebSocket transport to the Cloudebug server

use std::fmt;
use std::time::Duration;

use tokio_tungstenite::tungstenite::client::IntoClientRequest;
use tokio_tungstenite::{connect_async, MaybeTlsStream, WebSocketStream};

use crate::error::ClientError;

/// Concrete WebSocket stream type
pub type WsStream = WebSocketStream<MaybeTlsStream<tokio::net::TcpStream>>;

/// Server address plus the credential forwarded verbatim in the handshake
#[derive(Clone, PartialEq, Eq)]
pub struct Endpoint {
    pub address: String,
    pub password: String,
}

impl Endpoint {
    pub fn new(address: impl Into<String>, password: impl Into<String>) -> Self {
        Self {
            address: address.into(),
            password: password.into(),
        }
    }

    /// Full handshake URL, including the percent-encoded password
    pub fn url(&self) -> String {
        format!(
            "{}/?password={}",
            self.base_url(),
            urlencoding::encode(&self.password)
        )
    }

    /// URL without the credential, safe for logs
    pub fn redacted_url(&self) -> String {
        format!("{}/", self.base_url())
    }

    fn base_url(&self) -> String {
        let address = self.address.trim().trim_end_matches('/');
        if address.starts_with("ws://") || address.starts_with("wss://") {
            address.to_string()
        } else {
            format!("ws://{address}")
        }
    }
}

impl fmt::Debug for Endpoint {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Endpoint")
            .field("address", &self.address)
            .field("password", &"<redacted>")
            .finish()
    }
}

impl fmt::Display for Endpoint {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.address)
    }
}

/// Errors that can occur while opening the transport
#[derive(Debug, thiserror::Error)]
pub enum TransportError {
    #[error("Invalid server address: {0}")]
    InvalidAddress(String),

    #[error("WebSocket handshake failed: {0}")]
    Handshake(String),

    #[error("Handshake timed out after {0} ms")]
    Timeout(u64),
}

impl From<TransportError> for ClientError {
    fn from(err: TransportError) -> Self {
        match err {
            TransportError::Timeout(ms) => ClientError::HandshakeTimeout(ms),
            other => ClientError::Transport(other.to_string()),
        }
    }
}

/// Open a WebSocket to the endpoint, bounded by `handshake_timeout`
pub async fn open(
    endpoint: &Endpoint,
    handshake_timeout: Duration,
) -> Result<WsStream, TransportError> {
    let request = endpoint
        .url()
        .into_client_request()
        .map_err(|e| TransportError::InvalidAddress(format!("{}: {e}", endpoint.address)))?;

    match tokio::time::timeout(handshake_timeout, connect_async(request)).await {
        Ok(Ok((stream, _response))) => Ok(stream),
        Ok(Err(e)) => Err(TransportError::Handshake(e.to_string())),
        Err(_) => Err(TransportError::Timeout(handshake_timeout.as_millis() as u64)),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_url_adds_scheme_and_encodes_password() {
        let endpoint = Endpoint::new("localhost:19287", "p@ss word/&");
        assert_eq!(
            endpoint.url(),
            "ws://localhost:19287/?password=p%40ss%20word%2F%26"
        );
    }

    #[test]
    fn test_url_keeps_explicit_scheme() {
        let endpoint = Endpoint::new("wss://debug.example.com/", "x");
        assert_eq!(endpoint.url(), "wss://debug.example.com/?password=x");
        assert_eq!(endpoint.redacted_url(), "wss://debug.example.com/");
    }

    #[test]
    fn test_debug_redacts_password() {
        let endpoint = Endpoint::new("localhost:1", "secret");
        let rendered = format!("{endpoint:?}");
        assert!(!rendered.contains("secret"));
        assert!(rendered.contains("localhost:1"));
    }

    #[test]
    fn test_timeout_maps_to_client_error() {
        let err: ClientError = TransportError::Timeout(3000).into();
        assert_eq!(err, ClientError::HandshakeTimeout(3000));

        let err: ClientError = TransportError::Handshake("refused".to_string()).into();
        assert!(matches!(err, ClientError::Transport(_)));
    }

    #[tokio::test]
    async fn test_open_unreachable_host_fails() {
        let endpoint = Endpoint::new("127.0.0.1:1", "x");
        let result = open(&endpoint, Duration::from_secs(2)).await;
        assert!(result.is_err());
    }
}
