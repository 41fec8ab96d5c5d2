//! # zlehcito client
//!
//! Async client core for the Zlehčíto multiplayer vocabulary race.
//!
//! The crate keeps one logical session alive over an unreliable WebSocket,
//! routes the server's `$type`-tagged JSON pushes to the models that care
//! about them, and runs the per-round state machines for both game modes:
//!
//! - **Writing**: the server hands out one term at a time and judges typed answers.
//! - **Connecting**: the player matches terms to definitions from a small
//!   shuffled window over the round's work queue.
//!
//! UI code reads state through `tokio::sync::watch` receivers and calls the
//! models' methods; it never mutates engine state directly.
//!
//! ## Layers
//!
//! | Module | Role |
//! |---|---|
//! | [`transport`], [`transports`] | `Transport`/`Connector` traits and the WebSocket backend |
//! | [`connection`] | single reconnecting link with deferred sends |
//! | [`router`] | `$type` → handler table with scoped registrations |
//! | [`session`] | connection + router + game/user ids for one view |
//! | [`lobby`], [`setup`] | lobby list, join/leave and the start signal |
//! | [`game`] | running game session (timers, handlers, published state) |
//! | [`lifecycle`], [`writing`], [`connecting`], [`partition`] | pure game logic |
//!
//! ## Quick start
//!
//! ```rust,no_run
//! # #[cfg(feature = "transport-websocket")]
//! # async fn run() -> Result<(), zlehcito_client::RaceError> {
//! use zlehcito_client::{
//!     ClientConfig, GameConfig, GameSession, GameSetupModel, SessionContext, WebSocketConnector,
//! };
//!
//! let config = ClientConfig::from_env();
//! let session = SessionContext::start(WebSocketConnector::from_config(&config), &config);
//!
//! let setup = GameSetupModel::start(&session, "42")?;
//! setup.join("Alice")?;
//!
//! let mut start = setup.start_signal();
//! start.wait_for(Option::is_some).await.map_err(|_| zlehcito_client::RaceError::NotConnected)?;
//! setup.consume_start_signal();
//!
//! let game = GameSession::start(&session, GameConfig::default())?;
//! let mut phase = game.phase();
//! while phase.changed().await.is_ok() {
//!     println!("phase: {:?}", *phase.borrow());
//! }
//! # Ok(())
//! # }
//! ```

pub mod config;
pub mod connecting;
pub mod connection;
pub mod error;
pub mod game;
pub mod lifecycle;
pub mod lobby;
pub mod partition;
pub mod protocol;
pub mod router;
pub mod session;
pub mod setup;
#[cfg(test)]
mod testing;
pub mod transport;
pub mod transports;
pub mod writing;

pub use config::{ClientConfig, GameConfig};
pub use connecting::{ConnectingEngine, ConnectingRoundState};
pub use connection::{Connection, ConnectionState, Outbox};
pub use error::{RaceError, Result};
pub use game::GameSession;
pub use lifecycle::{GameController, GamePhase, GameSessionDescriptor};
pub use lobby::LobbyModel;
pub use protocol::{ClientMessage, Envelope, TermDefinitionPair};
pub use router::{Registration, Router};
pub use session::{SessionContext, SessionIds};
pub use setup::{GameSetupModel, StartSignal};
pub use transport::{Connector, Transport};
pub use writing::{WritingEngine, WritingRoundState};

#[cfg(feature = "transport-websocket")]
pub use transports::{WebSocketConnector, WebSocketTransport};
