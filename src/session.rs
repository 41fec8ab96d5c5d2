//! Per-view session context.
//!
//! A [`SessionContext`] bundles everything the lobby, setup and game models
//! share: the [`Connection`], a [`Router`] fed by a pump task that drains
//! inbound frames in arrival order, and the game/user identifiers. It is
//! created when a game-session view opens and torn down when it closes;
//! handlers registered by models built on it are dropped with those models.
//!
//! A new socket starts with no server-side subscriptions. Each model hands
//! its opening messages to [`SessionContext::resync_on_reconnect`] so they
//! are sent again every time the connection reopens.

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;

use tokio::sync::{mpsc, watch};
use tokio::task::JoinHandle;
use tracing::{debug, trace, warn};

use crate::config::ClientConfig;
use crate::connection::{Connection, ConnectionState, Outbox};
use crate::error::{RaceError, Result};
use crate::protocol::{ClientMessage, GameManipulationKey};
use crate::router::Router;
use crate::transport::Connector;

/// Identifiers of the game the session is tracking.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct SessionIds {
    pub id_game: Option<String>,
    pub id_user: Option<String>,
}

impl SessionIds {
    /// The key the server expects on game-scoped requests, if both ids are known.
    pub fn game_key(&self) -> Option<GameManipulationKey> {
        match (&self.id_game, &self.id_user) {
            (Some(game), Some(user)) => Some(GameManipulationKey::new(game.clone(), user.clone())),
            _ => None,
        }
    }
}

/// Connection, router and identifiers for one session view.
pub struct SessionContext {
    connection: Connection,
    router: Router,
    ids: Arc<watch::Sender<SessionIds>>,
    pump: Option<JoinHandle<()>>,
    shutdown_timeout: Duration,
}

impl SessionContext {
    /// Open a connection through `connector` and start routing its frames.
    pub fn start<C: Connector>(connector: C, config: &ClientConfig) -> Self {
        let (connection, frames) = Connection::start(connector, config);
        let router = Router::new();
        let pump = tokio::spawn(pump_frames(frames, router.clone()));
        let (ids, _) = watch::channel(SessionIds::default());
        Self {
            connection,
            router,
            ids: Arc::new(ids),
            pump: Some(pump),
            shutdown_timeout: config.shutdown_timeout,
        }
    }

    pub fn outbox(&self) -> Outbox {
        self.connection.outbox()
    }

    pub fn router(&self) -> &Router {
        &self.router
    }

    pub fn set_game(&self, id_game: impl Into<String>) {
        let id_game = id_game.into();
        self.ids.send_if_modified(|ids| replace_id(&mut ids.id_game, id_game));
    }

    pub fn set_user(&self, id_user: impl Into<String>) {
        let id_user = id_user.into();
        self.ids.send_if_modified(|ids| replace_id(&mut ids.id_user, id_user));
    }

    /// Forget the current game and user.
    pub fn clear_ids(&self) {
        self.ids.send_if_modified(|ids| {
            let changed = *ids != SessionIds::default();
            *ids = SessionIds::default();
            changed
        });
    }

    pub fn ids(&self) -> SessionIds {
        self.ids.borrow().clone()
    }

    pub fn subscribe_ids(&self) -> watch::Receiver<SessionIds> {
        self.ids.subscribe()
    }

    /// Key for game-scoped requests.
    ///
    /// # Errors
    ///
    /// Returns [`RaceError::NoGameKey`] until both the game id and user id are set.
    pub fn game_key(&self) -> Result<GameManipulationKey> {
        self.ids.borrow().game_key().ok_or(RaceError::NoGameKey)
    }

    pub fn is_open(&self) -> bool {
        self.connection.is_open()
    }

    /// Observe connectivity, e.g. to show a loading state.
    pub fn connectivity(&self) -> watch::Receiver<ConnectionState> {
        self.connection.subscribe_state()
    }

    pub fn dropped_messages(&self) -> u64 {
        self.connection.dropped_messages()
    }

    pub(crate) fn shutdown_timeout(&self) -> Duration {
        self.shutdown_timeout
    }

    pub(crate) fn ids_writer(&self) -> Arc<watch::Sender<SessionIds>> {
        Arc::clone(&self.ids)
    }

    /// Send `messages` again whenever the connection reopens.
    ///
    /// The first open after a start while disconnected is skipped unless
    /// something was dropped meanwhile: the originals are still deferred and
    /// go out with it. The task stops when the returned guard is dropped.
    pub(crate) fn resync_on_reconnect(&self, messages: Vec<ClientMessage>) -> Resync {
        let mut state = self.connectivity();
        let opened = *state.borrow_and_update() == ConnectionState::Open;
        let dropped = self.connection.dropped_counter();
        let baseline = Baseline {
            opened,
            dropped: dropped.load(Ordering::Relaxed),
        };
        Resync {
            task: tokio::spawn(resync(self.outbox(), state, dropped, baseline, messages)),
        }
    }

    /// Close the connection and stop routing.
    pub async fn shutdown(&mut self) {
        self.connection.shutdown().await;

        // The pump ends by itself once the connection loop drops its frame sender.
        if let Some(mut pump) = self.pump.take() {
            if tokio::time::timeout(self.shutdown_timeout, &mut pump).await.is_err() {
                warn!("frame pump did not exit within timeout; aborting task");
                pump.abort();
            }
        }
    }
}

impl std::fmt::Debug for SessionContext {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SessionContext")
            .field("connection", &self.connection)
            .field("ids", &*self.ids.borrow())
            .field("router", &self.router)
            .finish()
    }
}

impl Drop for SessionContext {
    fn drop(&mut self) {
        if let Some(pump) = self.pump.take() {
            pump.abort();
        }
    }
}

pub(crate) fn replace_id(slot: &mut Option<String>, value: String) -> bool {
    if slot.as_deref() == Some(value.as_str()) {
        return false;
    }
    *slot = Some(value);
    true
}

/// Guard for a [`SessionContext::resync_on_reconnect`] task.
#[derive(Debug)]
pub(crate) struct Resync {
    task: JoinHandle<()>,
}

impl Drop for Resync {
    fn drop(&mut self) {
        self.task.abort();
    }
}

/// Connection as it was when the resync task was set up.
struct Baseline {
    opened: bool,
    dropped: u64,
}

async fn resync(
    outbox: Outbox,
    mut state: watch::Receiver<ConnectionState>,
    dropped: Arc<AtomicU64>,
    baseline: Baseline,
    messages: Vec<ClientMessage>,
) {
    let mut opened = baseline.opened;

    while state.changed().await.is_ok() {
        if *state.borrow_and_update() != ConnectionState::Open {
            continue;
        }
        let first_open = !opened;
        opened = true;
        if first_open && dropped.load(Ordering::Relaxed) == baseline.dropped {
            continue;
        }
        debug!(count = messages.len(), "connection reopened; resubscribing");
        for msg in &messages {
            if let Err(e) = outbox.send(msg) {
                warn!(error = %e, "resync stopped");
                return;
            }
        }
    }
}

async fn pump_frames(mut frames: mpsc::Receiver<String>, router: Router) {
    debug!("frame pump started");
    while let Some(frame) = frames.recv().await {
        let outcome = router.dispatch(&frame);
        trace!(?outcome, "frame routed");
    }
    debug!("frame pump exited");
}

#[cfg(test)]
#[allow(clippy::unwrap_used, clippy::expect_used)]
mod tests {
    use super::*;
    use crate::testing::SilentConnector;

    #[tokio::test]
    async fn game_key_requires_both_ids() {
        let session = SessionContext::start(SilentConnector::default(), &ClientConfig::default());
        assert!(matches!(session.game_key(), Err(RaceError::NoGameKey)));

        session.set_game("g-1");
        assert!(matches!(session.game_key(), Err(RaceError::NoGameKey)));

        session.set_user("u-1");
        assert_eq!(session.game_key().unwrap(), GameManipulationKey::new("g-1", "u-1"));

        session.clear_ids();
        assert_eq!(session.ids(), SessionIds::default());
    }

    #[tokio::test]
    async fn setting_same_id_does_not_notify() {
        let session = SessionContext::start(SilentConnector::default(), &ClientConfig::default());
        let mut rx = session.subscribe_ids();
        session.set_game("g-1");
        assert!(rx.has_changed().unwrap());
        rx.borrow_and_update();

        session.set_game("g-1");
        assert!(!rx.has_changed().unwrap());
    }

    #[tokio::test]
    async fn shutdown_closes_connection() {
        let mut session =
            SessionContext::start(SilentConnector::default(), &ClientConfig::default());
        session
            .connectivity()
            .wait_for(|s| *s == ConnectionState::Open)
            .await
            .unwrap();
        assert!(session.is_open());

        session.shutdown().await;
        assert!(!session.is_open());
        assert!(session.outbox().send(&crate::ClientMessage::GetGames).is_err());
    }
}
