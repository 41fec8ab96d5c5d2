//! Transport abstraction for the race game protocol.
//!
//! The [`Transport`] trait defines a bidirectional text message channel between
//! the client and server. The protocol uses JSON text messages, so every
//! transport implementation must handle message framing internally.
//!
//! Unlike a one-shot client, the race client keeps a single logical session
//! alive across drops, so it also needs a way to open *new* transports on
//! demand. That is the job of [`Connector`]: the connection loop calls
//! [`Connector::connect`] whenever it needs a fresh link to the fixed endpoint.
//!
//! # Implementing a Custom Transport
//!
//! ```rust,no_run
//! use async_trait::async_trait;
//! use zlehcito_client::error::RaceError;
//! use zlehcito_client::transport::{Connector, Transport};
//!
//! struct MyTransport { /* ... */ }
//!
//! #[async_trait]
//! impl Transport for MyTransport {
//!     async fn send(&mut self, message: String) -> Result<(), RaceError> {
//!         // Send the JSON text message over your transport
//!         Ok(())
//!     }
//!
//!     async fn recv(&mut self) -> Option<Result<String, RaceError>> {
//!         // Return None when the connection is closed cleanly
//!         None
//!     }
//!
//!     async fn close(&mut self) -> Result<(), RaceError> {
//!         Ok(())
//!     }
//! }
//!
//! struct MyConnector;
//!
//! #[async_trait]
//! impl Connector for MyConnector {
//!     type Transport = MyTransport;
//!
//!     async fn connect(&self) -> Result<MyTransport, RaceError> {
//!         Ok(MyTransport {})
//!     }
//! }
//! ```

use async_trait::async_trait;

use crate::error::RaceError;

/// A bidirectional text message transport.
///
/// Each call to [`send`](Transport::send) transmits one complete JSON message.
/// Each call to [`recv`](Transport::recv) returns one complete JSON message.
///
/// # Cancel Safety
///
/// The [`recv`](Transport::recv) method **MUST** be cancel-safe because it is used
/// inside `tokio::select!`. If `recv` is cancelled before completion, calling it
/// again must not lose data.
#[async_trait]
pub trait Transport: Send + 'static {
    /// Send a JSON text message to the server.
    ///
    /// # Errors
    ///
    /// Returns [`RaceError::TransportSend`] if the message could not be sent.
    async fn send(&mut self, message: String) -> Result<(), RaceError>;

    /// Receive the next JSON text message from the server.
    ///
    /// Returns:
    /// - `Some(Ok(text))`: a complete message was received
    /// - `Some(Err(e))`: a transport error occurred (peer reset, timeout)
    /// - `None`: the connection was closed by the server
    async fn recv(&mut self) -> Option<Result<String, RaceError>>;

    /// Close the transport connection gracefully.
    ///
    /// # Errors
    ///
    /// Returns an error if the graceful shutdown fails. Implementations should
    /// still release resources even if the close handshake fails.
    async fn close(&mut self) -> Result<(), RaceError>;
}

/// Opens new [`Transport`]s to a fixed endpoint.
///
/// The connection loop holds one connector for its whole lifetime and calls
/// [`connect`](Connector::connect) on a spawned task, so implementations must
/// be `Send + Sync`.
#[async_trait]
pub trait Connector: Send + Sync + 'static {
    /// The transport produced by a successful connect.
    type Transport: Transport;

    /// Establish a new connection.
    ///
    /// # Errors
    ///
    /// Any error is treated as a failed attempt; the connection stays closed
    /// until the next `connect` or `send`.
    async fn connect(&self) -> Result<Self::Transport, RaceError>;
}
