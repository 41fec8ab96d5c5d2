//! WebSocket transport using `tokio-tungstenite`.
//!
//! [`WebSocketConnector`] is what the connection loop holds: every time the
//! session needs a link to the game server it calls
//! [`connect`](Connector::connect) and gets back a fresh [`WebSocketTransport`].
//! `wss://` endpoints need the `websocket-tls` feature.
//!
//! # Example
//!
//! ```rust,no_run
//! # async fn example() -> Result<(), zlehcito_client::RaceError> {
//! use std::time::Duration;
//! use zlehcito_client::transport::{Connector, Transport};
//! use zlehcito_client::WebSocketConnector;
//!
//! let connector = WebSocketConnector::new("ws://localhost:5000/ws", Duration::from_secs(5));
//! let mut transport = connector.connect().await?;
//! transport.send(r#"{"$type":"GET_GAMES"}"#.to_string()).await?;
//! # Ok(())
//! # }
//! ```

use std::time::Duration;

use async_trait::async_trait;
use futures_util::{SinkExt, StreamExt};
use tokio_tungstenite::tungstenite::protocol::Message;

use crate::config::ClientConfig;
use crate::error::RaceError;
use crate::transport::{Connector, Transport};

/// The underlying WebSocket stream.
pub type WsStream =
    tokio_tungstenite::WebSocketStream<tokio_tungstenite::MaybeTlsStream<tokio::net::TcpStream>>;

/// A [`Transport`] backed by one WebSocket connection.
///
/// Only text frames carry protocol messages. Binary and control frames are
/// skipped, and a close frame ends the stream.
///
/// # Cancel Safety
///
/// [`recv`](Transport::recv) only awaits `StreamExt::next`, which is
/// cancel-safe, so it can sit inside `tokio::select!`.
#[derive(Debug)]
pub struct WebSocketTransport {
    stream: WsStream,
    closed: bool,
}

impl WebSocketTransport {
    /// Open a WebSocket connection to `url`.
    ///
    /// # Errors
    ///
    /// Returns [`RaceError::Io`] if the URL is invalid or the handshake fails.
    /// An underlying I/O error keeps its [`ErrorKind`](std::io::ErrorKind).
    pub async fn connect(url: &str) -> Result<Self, RaceError> {
        tracing::debug!(url = %url, "opening WebSocket");

        let (stream, _response) = tokio_tungstenite::connect_async(url)
            .await
            .map_err(|e| {
                let kind = match &e {
                    tokio_tungstenite::tungstenite::Error::Io(io) => io.kind(),
                    _ => std::io::ErrorKind::Other,
                };
                RaceError::Io(std::io::Error::new(kind, e))
            })?;

        tracing::info!(url = %url, "WebSocket open");
        Ok(Self::from_stream(stream))
    }

    /// Wrap an already-established stream.
    pub fn from_stream(stream: WsStream) -> Self {
        Self {
            stream,
            closed: false,
        }
    }
}

#[async_trait]
impl Transport for WebSocketTransport {
    async fn send(&mut self, message: String) -> Result<(), RaceError> {
        if self.closed {
            return Err(RaceError::TransportClosed);
        }
        self.stream
            .send(Message::Text(message.into()))
            .await
            .map_err(|e| RaceError::TransportSend(e.to_string()))
    }

    async fn recv(&mut self) -> Option<Result<String, RaceError>> {
        while let Some(next) = self.stream.next().await {
            match next {
                Ok(Message::Text(text)) => return Some(Ok(text.to_string())),
                Ok(Message::Close(frame)) => {
                    tracing::debug!(?frame, "server sent close frame");
                    return None;
                }
                Ok(Message::Binary(bytes)) => {
                    tracing::warn!(len = bytes.len(), "ignoring binary frame");
                }
                // Ping is answered by tungstenite itself; pong and raw frames carry nothing for us.
                Ok(Message::Ping(_) | Message::Pong(_) | Message::Frame(_)) => {}
                Err(e) => return Some(Err(RaceError::TransportReceive(e.to_string()))),
            }
        }
        None
    }

    async fn close(&mut self) -> Result<(), RaceError> {
        if std::mem::replace(&mut self.closed, true) {
            return Ok(());
        }
        self.stream
            .close(None)
            .await
            .map_err(|e| RaceError::TransportSend(e.to_string()))
    }
}

/// Opens [`WebSocketTransport`]s to one fixed endpoint.
#[derive(Debug, Clone)]
pub struct WebSocketConnector {
    url: String,
    timeout: Duration,
}

impl WebSocketConnector {
    /// Create a connector for `url`. Each attempt is abandoned after `timeout`.
    pub fn new(url: impl Into<String>, timeout: Duration) -> Self {
        Self {
            url: url.into(),
            timeout,
        }
    }

    /// Connector for the endpoint and connect timeout in `config`.
    pub fn from_config(config: &ClientConfig) -> Self {
        Self::new(config.endpoint.clone(), config.connect_timeout)
    }

    /// The endpoint this connector dials.
    pub fn url(&self) -> &str {
        &self.url
    }
}

#[async_trait]
impl Connector for WebSocketConnector {
    type Transport = WebSocketTransport;

    async fn connect(&self) -> Result<WebSocketTransport, RaceError> {
        tokio::time::timeout(self.timeout, WebSocketTransport::connect(&self.url))
            .await
            .map_err(|_| RaceError::Timeout)?
    }
}

#[cfg(test)]
#[allow(
    clippy::unwrap_used,
    clippy::expect_used,
    clippy::panic,
    clippy::todo,
    clippy::unimplemented,
    clippy::indexing_slicing
)]
mod tests {
    use super::*;
    use tokio::net::TcpListener;

    /// Accept one WebSocket client on a local port and hand it to `handler`.
    async fn start_mock_server<F, Fut>(handler: F) -> String
    where
        F: FnOnce(tokio_tungstenite::WebSocketStream<tokio::net::TcpStream>) -> Fut
            + Send
            + 'static,
        Fut: std::future::Future<Output = ()> + Send,
    {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();

        tokio::spawn(async move {
            let (tcp, _) = listener.accept().await.unwrap();
            let ws = tokio_tungstenite::accept_async(tcp).await.unwrap();
            handler(ws).await;
        });

        format!("ws://{addr}")
    }

    #[test]
    fn transport_and_connector_are_send() {
        fn assert_send<T: Send>() {}
        assert_send::<WebSocketTransport>();
        assert_send::<WebSocketConnector>();
    }

    #[tokio::test]
    async fn connect_rejects_invalid_url() {
        let err = WebSocketTransport::connect("definitely not a url")
            .await
            .unwrap_err();
        assert!(matches!(err, RaceError::Io(_)));
    }

    #[tokio::test]
    async fn connector_times_out_on_unroutable_host() {
        let connector = WebSocketConnector::new("ws://192.0.2.1:1", Duration::from_millis(50));
        let err = connector.connect().await.unwrap_err();
        assert!(matches!(err, RaceError::Timeout | RaceError::Io(_)));
    }

    #[tokio::test]
    async fn connector_yields_working_transport() {
        let url = start_mock_server(|mut ws| async move {
            if let Some(Ok(Message::Text(text))) = ws.next().await {
                ws.send(Message::Text(text)).await.unwrap();
            }
            ws.close(None).await.unwrap();
        })
        .await;

        let connector = WebSocketConnector::new(url.clone(), Duration::from_secs(5));
        assert_eq!(connector.url(), url);
        let mut transport = connector.connect().await.unwrap();
        transport
            .send(r#"{"$type":"GET_GAMES"}"#.to_string())
            .await
            .unwrap();

        let echoed = transport.recv().await.unwrap().unwrap();
        assert_eq!(echoed, r#"{"$type":"GET_GAMES"}"#);
        assert!(transport.recv().await.is_none());
    }

    #[tokio::test]
    async fn binary_frames_are_skipped() {
        let url = start_mock_server(|mut ws| async move {
            ws.send(Message::Binary(vec![1, 2, 3].into())).await.unwrap();
            ws.send(Message::Text(r#"{"$type":"RACE_END"}"#.into()))
                .await
                .unwrap();
            ws.close(None).await.unwrap();
        })
        .await;

        let mut transport = WebSocketTransport::connect(&url).await.unwrap();
        let msg = transport.recv().await.unwrap().unwrap();
        assert_eq!(msg, r#"{"$type":"RACE_END"}"#);
    }

    #[tokio::test]
    async fn send_after_close_fails_and_close_is_idempotent() {
        let url =
            start_mock_server(|mut ws| async move { while let Some(Ok(_)) = ws.next().await {} })
                .await;

        let mut transport = WebSocketTransport::connect(&url).await.unwrap();
        transport.close().await.unwrap();
        transport.close().await.unwrap();

        let err = transport.send("late".to_string()).await.unwrap_err();
        assert!(matches!(err, RaceError::TransportClosed));
    }
}
