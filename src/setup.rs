//! Game setup screen: join or leave a game and wait for it to start.
//!
//! The model publishes the game detail, this player's [`GameKey`], and a
//! one-shot start signal. Joining copies the server-issued user id into the
//! [`SessionContext`] so a [`GameSession`](crate::game::GameSession) can be
//! started on the same context once the signal fires.

use std::sync::Arc;

use tokio::sync::watch;
use tracing::{debug, info};

use crate::connection::Outbox;
use crate::error::Result;
use crate::protocol::{
    ClientMessage, GameDetailPayload, GameJoin, GameKey, JoinGamePayload, LobbyGameDetail,
    MessageType, SubscriptionType,
};
use crate::router::Registration;
use crate::session::{replace_id, Resync, SessionContext};

/// Published when the server starts the game.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StartSignal {
    pub id_game: String,
    pub id_user: String,
}

/// Setup screen for one game: detail, membership and the start signal.
#[derive(Debug)]
pub struct GameSetupModel {
    id_game: String,
    outbox: Outbox,
    detail: watch::Receiver<Option<LobbyGameDetail>>,
    key: watch::Receiver<GameKey>,
    start_tx: Arc<watch::Sender<Option<StartSignal>>>,
    _registrations: Vec<Registration>,
    _resync: Resync,
}

impl GameSetupModel {
    /// Subscribe to setup pushes for `id_game` and request its detail.
    ///
    /// Also records `id_game` as the session's game. The subscription and the
    /// detail request are repeated whenever the connection reopens.
    ///
    /// # Errors
    ///
    /// Returns [`RaceError::NotConnected`](crate::RaceError::NotConnected) if
    /// the session's connection has shut down.
    pub fn start(session: &SessionContext, id_game: impl Into<String>) -> Result<Self> {
        let id_game = id_game.into();
        session.set_game(id_game.clone());

        let (detail_tx, detail) = watch::channel(None);
        let detail_tx = Arc::new(detail_tx);
        let (key_tx, key) = watch::channel(GameKey::invalid(id_game.clone()));
        let key_tx = Arc::new(key_tx);
        let (start_tx, _) = watch::channel(None);
        let start_tx = Arc::new(start_tx);
        let router = session.router();

        let on_detail = {
            let detail_tx = Arc::clone(&detail_tx);
            router.register_decoded(MessageType::GetGame, move |payload: GameDetailPayload| {
                detail_tx.send_replace(Some(payload.game));
            })
        };

        let on_join = {
            let key_tx = Arc::clone(&key_tx);
            let ids = session.ids_writer();
            router.register_decoded(MessageType::JoinGame, move |payload: JoinGamePayload| {
                let key = payload.game_key_player;
                info!(joined = key.is_joined(), "join reply received");
                if key.is_joined() {
                    let id_user = key.id_user.clone();
                    ids.send_if_modified(|ids| replace_id(&mut ids.id_user, id_user));
                }
                key_tx.send_replace(key);
            })
        };

        let on_leave = {
            let id_game = id_game.clone();
            router.register(MessageType::LeaveGame, move |_| {
                debug!("left game");
                key_tx.send_replace(GameKey::invalid(id_game.clone()));
                detail_tx.send_replace(None);
            })
        };

        let on_start = {
            let start_tx = Arc::clone(&start_tx);
            let key = key.clone();
            let id_game = id_game.clone();
            router.register(MessageType::RaceStartGame, move |_| {
                let id_user = key.borrow().id_user.clone();
                info!("game started");
                start_tx.send_replace(Some(StartSignal {
                    id_game: id_game.clone(),
                    id_user,
                }));
            })
        };

        let opening = vec![
            ClientMessage::subscribe(SubscriptionType::GameSetup, id_game.clone()),
            ClientMessage::GetGame {
                id_game: id_game.clone(),
            },
        ];
        let outbox = session.outbox();
        for msg in &opening {
            outbox.send(msg)?;
        }
        Ok(Self {
            id_game,
            outbox,
            detail,
            key,
            start_tx,
            _registrations: vec![on_detail, on_join, on_leave, on_start],
            _resync: session.resync_on_reconnect(opening),
        })
    }

    /// The game this model was started for.
    pub fn id_game(&self) -> &str {
        &self.id_game
    }

    /// Ask to join under `player_name`.
    ///
    /// # Errors
    ///
    /// Returns [`RaceError::NotConnected`](crate::RaceError::NotConnected) if
    /// the session's connection has shut down.
    pub fn join(&self, player_name: impl Into<String>) -> Result<()> {
        self.outbox.send(&ClientMessage::JoinGame {
            join: GameJoin {
                id_game: self.id_game.clone(),
                player_name: player_name.into(),
            },
        })
    }

    /// Ask to leave. Does nothing unless the player has joined.
    ///
    /// Returns whether a request was sent.
    ///
    /// # Errors
    ///
    /// Returns [`RaceError::NotConnected`](crate::RaceError::NotConnected) if
    /// the session's connection has shut down.
    pub fn leave(&self) -> Result<bool> {
        let key = self.key.borrow().clone();
        if !key.is_joined() {
            debug!("leave ignored: not joined");
            return Ok(false);
        }
        self.outbox.send(&ClientMessage::LeaveGame {
            key: key.manipulation_key(),
        })?;
        Ok(true)
    }

    /// Latest `GET_GAME` detail; `None` after leaving.
    pub fn detail(&self) -> watch::Receiver<Option<LobbyGameDetail>> {
        self.detail.clone()
    }

    /// This player's key; `Invalid` until a join is accepted.
    pub fn game_key(&self) -> watch::Receiver<GameKey> {
        self.key.clone()
    }

    /// Becomes `Some` when the server starts the game.
    pub fn start_signal(&self) -> watch::Receiver<Option<StartSignal>> {
        self.start_tx.subscribe()
    }

    /// Take the start signal, clearing it for every reader.
    pub fn consume_start_signal(&self) -> Option<StartSignal> {
        let taken = self.start_tx.send_replace(None);
        if taken.is_some() {
            debug!("start signal consumed");
        }
        taken
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used, clippy::expect_used)]
mod tests {
    use super::*;
    use crate::config::ClientConfig;
    use crate::router::Dispatch;
    use crate::testing::SilentConnector;

    fn session() -> SessionContext {
        SessionContext::start(SilentConnector::default(), &ClientConfig::default())
    }

    fn join_reply(id_user: &str, key_type: &str) -> String {
        format!(
            r#"{{"$type":"JOIN_GAME","gameKeyPlayer":{{"idGame":"g-1","idUser":"{id_user}","keyType":"{key_type}"}}}}"#
        )
    }

    #[tokio::test]
    async fn accepted_join_sets_key_and_session_user() {
        let session = session();
        let setup = GameSetupModel::start(&session, "g-1").unwrap();
        assert!(!setup.game_key().borrow().is_joined());

        assert_eq!(session.router().dispatch(&join_reply("u-3", "Player")), Dispatch::Handled);
        assert!(setup.game_key().borrow().is_joined());
        assert_eq!(session.ids().id_user.as_deref(), Some("u-3"));
    }

    #[tokio::test]
    async fn invalid_key_is_published_but_not_joined() {
        let session = session();
        let setup = GameSetupModel::start(&session, "g-1").unwrap();

        session.router().dispatch(&join_reply("u-3", "Invalid"));
        assert_eq!(setup.game_key().borrow().key_type, "Invalid");
        assert!(!setup.game_key().borrow().is_joined());
        assert_eq!(session.ids().id_user, None);
        assert!(!setup.leave().unwrap());
    }

    #[tokio::test]
    async fn start_signal_is_consumed_once() {
        let session = session();
        let setup = GameSetupModel::start(&session, "g-1").unwrap();
        assert!(setup.consume_start_signal().is_none());

        let mut signal = setup.start_signal();
        session.router().dispatch(&join_reply("u-3", "Player"));
        session.router().dispatch(r#"{"$type":"RACE_START_GAME"}"#);

        assert!(signal.has_changed().unwrap());
        assert_eq!(
            setup.consume_start_signal(),
            Some(StartSignal {
                id_game: "g-1".into(),
                id_user: "u-3".into(),
            })
        );
        assert_eq!(*signal.borrow_and_update(), None);
        assert!(setup.consume_start_signal().is_none());
    }

    #[tokio::test]
    async fn leave_push_resets_key_and_detail() {
        let session = session();
        let setup = GameSetupModel::start(&session, "g-1").unwrap();
        session.router().dispatch(
            r#"{"$type":"GET_GAME","game":{"idString":"g-1","name":"Animals","players":[]}}"#,
        );
        session.router().dispatch(&join_reply("u-3", "Player"));
        assert!(setup.detail().borrow().is_some());

        session.router().dispatch(r#"{"$type":"LEAVE_GAME"}"#);
        assert!(!setup.game_key().borrow().is_joined());
        assert!(setup.detail().borrow().is_none());
    }
}
