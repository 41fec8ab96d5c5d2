//! Lobby: the list of open games.

use tokio::sync::watch;
use tracing::debug;

use crate::connection::Outbox;
use crate::error::Result;
use crate::protocol::{ClientMessage, GamesListPayload, LobbyGame, MessageType, SubscriptionType};
use crate::router::Registration;
use crate::session::{Resync, SessionContext};

/// Only games of this type are offered by [`LobbyModel::filtered_games`].
pub const RACE_GAME_TYPE: &str = "Race";

/// Keeps the lobby game list current while it is alive.
#[derive(Debug)]
pub struct LobbyModel {
    outbox: Outbox,
    games: watch::Receiver<Vec<LobbyGame>>,
    _registration: Registration,
    _resync: Resync,
}

impl LobbyModel {
    /// Subscribe to lobby pushes and request the current list.
    ///
    /// Both are sent again whenever the connection reopens.
    ///
    /// # Errors
    ///
    /// Returns [`RaceError::NotConnected`](crate::RaceError::NotConnected) if
    /// the session's connection has shut down.
    pub fn start(session: &SessionContext) -> Result<Self> {
        let (games_tx, games) = watch::channel(Vec::new());
        let registration = session.router().register_decoded(
            MessageType::GetGames,
            move |payload: GamesListPayload| {
                debug!(count = payload.games.len(), "lobby list received");
                games_tx.send_if_modified(|current| {
                    if *current == payload.games {
                        return false;
                    }
                    *current = payload.games;
                    true
                });
            },
        );

        let opening = vec![
            ClientMessage::subscribe(SubscriptionType::Lobby, ""),
            ClientMessage::GetGames,
        ];
        let outbox = session.outbox();
        for msg in &opening {
            outbox.send(msg)?;
        }
        Ok(Self {
            outbox,
            games,
            _registration: registration,
            _resync: session.resync_on_reconnect(opening),
        })
    }

    /// Ask the server for the list again.
    ///
    /// # Errors
    ///
    /// Returns [`RaceError::NotConnected`](crate::RaceError::NotConnected) if
    /// the session's connection has shut down.
    pub fn refresh(&self) -> Result<()> {
        self.outbox.send(&ClientMessage::GetGames)
    }

    /// Snapshot of the current list.
    pub fn games(&self) -> Vec<LobbyGame> {
        self.games.borrow().clone()
    }

    pub fn subscribe_games(&self) -> watch::Receiver<Vec<LobbyGame>> {
        self.games.clone()
    }

    /// Race games whose name contains `query`, ignoring case.
    pub fn filtered_games(&self, query: &str) -> Vec<LobbyGame> {
        filter_games(&self.games.borrow(), query)
    }
}

/// Race games in `games` whose name contains `query`, ignoring case.
pub fn filter_games(games: &[LobbyGame], query: &str) -> Vec<LobbyGame> {
    let needle = query.to_lowercase();
    games
        .iter()
        .filter(|g| g.game_type == RACE_GAME_TYPE && g.name.to_lowercase().contains(&needle))
        .cloned()
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    fn game(name: &str, game_type: &str) -> LobbyGame {
        LobbyGame {
            id_game: name.to_lowercase(),
            name: name.into(),
            player_count: 0,
            game_type: game_type.into(),
        }
    }

    #[test]
    fn filter_matches_name_case_insensitively() {
        let games = vec![
            game("Animals", "Race"),
            game("Capitals", "Race"),
            game("ANIMAL sounds", "Race"),
            game("Animals quiz", "Quiz"),
        ];
        let names: Vec<String> = filter_games(&games, "anim")
            .into_iter()
            .map(|g| g.name)
            .collect();
        assert_eq!(names, vec!["Animals", "ANIMAL sounds"]);
    }

    #[test]
    fn empty_query_keeps_every_race() {
        let games = vec![game("A", "Race"), game("B", "Quiz")];
        assert_eq!(filter_games(&games, "").len(), 1);
    }
}
