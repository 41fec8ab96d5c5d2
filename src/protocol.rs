//! Wire types for the race game protocol.
//!
//! Every message is a JSON object carrying a string discriminator under the
//! reserved key [`DISCRIMINATOR`] (`"$type"`). Outbound messages are a single
//! internally tagged [`ClientMessage`] enum. Inbound messages are routed by
//! discriminator first and then decoded strictly into the payload struct for
//! that type via [`Envelope::decode`], so a shape change in one server message
//! never poisons the others.

use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::error::{RaceError, Result};

/// Reserved key holding the message type of every frame.
pub const DISCRIMINATOR: &str = "$type";

/// `keyType` value the server uses for "not joined".
pub const INVALID_KEY_TYPE: &str = "Invalid";

// ── Message types ───────────────────────────────────────────────────

/// Known values of the `$type` discriminator.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum MessageType {
    SubscriptionPut,
    GetGames,
    GetGame,
    JoinGame,
    LeaveGame,
    RaceStartGame,
    RaceGetGame,
    RaceRoundStart,
    RaceNewTerm,
    RaceSubmitAnswer,
    RaceEnd,
}

impl MessageType {
    /// The discriminator string on the wire.
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::SubscriptionPut => "SUBSCRIPTION_PUT",
            Self::GetGames => "GET_GAMES",
            Self::GetGame => "GET_GAME",
            Self::JoinGame => "JOIN_GAME",
            Self::LeaveGame => "LEAVE_GAME",
            Self::RaceStartGame => "RACE_START_GAME",
            Self::RaceGetGame => "RACE_GET_GAME",
            Self::RaceRoundStart => "RACE_ROUND_START",
            Self::RaceNewTerm => "RACE_NEW_TERM",
            Self::RaceSubmitAnswer => "RACE_SUBMIT_ANSWER",
            Self::RaceEnd => "RACE_END",
        }
    }
}

impl std::fmt::Display for MessageType {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

impl From<MessageType> for String {
    fn from(kind: MessageType) -> Self {
        kind.as_str().to_owned()
    }
}

// ── Shared data ─────────────────────────────────────────────────────

/// One term and its definition.
///
/// Identity is the whole pair: the same term may appear more than once in a
/// dataset with different definitions.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct TermDefinitionPair {
    #[serde(alias = "Term")]
    pub term: String,
    #[serde(alias = "Definition")]
    pub definition: String,
}

impl TermDefinitionPair {
    pub fn new(term: impl Into<String>, definition: impl Into<String>) -> Self {
        Self {
            term: term.into(),
            definition: definition.into(),
        }
    }
}

/// How players answer during a race.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
pub enum InputType {
    /// Type the definition for one term at a time.
    Writing,
    /// Match terms to definitions from a visible window.
    Connecting,
}

/// Pub/sub topic for [`ClientMessage::SubscriptionPut`].
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
pub enum SubscriptionType {
    Lobby,
    /// Game setup screen. The server calls this topic `Game`.
    #[serde(rename = "Game")]
    GameSetup,
    GameRunning,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub struct SubscriptionPut {
    /// Empty for the lobby topic.
    #[serde(rename = "idGameString")]
    pub id_game: String,
    pub subscription_type: SubscriptionType,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct GameJoin {
    #[serde(rename = "idGame")]
    pub id_game: String,
    #[serde(rename = "PlayerName")]
    pub player_name: String,
}

/// Identifies the player acting on a game.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct GameManipulationKey {
    #[serde(rename = "IdGame")]
    pub id_game: String,
    #[serde(rename = "IdUser")]
    pub id_user: String,
}

impl GameManipulationKey {
    pub fn new(id_game: impl Into<String>, id_user: impl Into<String>) -> Self {
        Self {
            id_game: id_game.into(),
            id_user: id_user.into(),
        }
    }
}

/// Key the server hands out on `JOIN_GAME`.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub struct GameKey {
    pub id_game: String,
    #[serde(default)]
    pub id_user: String,
    pub key_type: String,
}

impl GameKey {
    /// The "not joined" key for `id_game`.
    pub fn invalid(id_game: impl Into<String>) -> Self {
        Self {
            id_game: id_game.into(),
            id_user: String::new(),
            key_type: INVALID_KEY_TYPE.to_owned(),
        }
    }

    /// `true` once the server has accepted the player into the game.
    pub fn is_joined(&self) -> bool {
        !self.id_user.is_empty() && self.key_type != INVALID_KEY_TYPE
    }

    pub fn manipulation_key(&self) -> GameManipulationKey {
        GameManipulationKey::new(self.id_game.clone(), self.id_user.clone())
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub struct Player {
    pub in_game_name: String,
}

/// Final or inter-round standing of one player.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub struct RacePlayerResult {
    pub in_game_name: String,
    pub points: i64,
}

/// Per-player progress within a round, echoed with answer verdicts.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct RaceRoundPlayerState {
    pub player_name: String,
    #[serde(default)]
    pub mistake_count: i64,
    #[serde(default)]
    pub percentage_done: f64,
}

// ── Lobby / setup payloads ──────────────────────────────────────────

/// Row of the lobby game list.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub struct LobbyGame {
    #[serde(rename = "idString")]
    pub id_game: String,
    pub name: String,
    #[serde(default)]
    pub player_count: u32,
    pub game_type: String,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct GamesListPayload {
    pub games: Vec<LobbyGame>,
}

/// Game as shown on the setup screen.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub struct LobbyGameDetail {
    #[serde(rename = "idString")]
    pub id_game: String,
    pub name: String,
    #[serde(default)]
    pub players: Vec<Player>,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct GameDetailPayload {
    pub game: LobbyGameDetail,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub struct JoinGamePayload {
    pub game_key_player: GameKey,
}

// ── Race payloads ───────────────────────────────────────────────────

/// Full race game snapshot, including the shared dataset.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub struct RaceGame {
    #[serde(rename = "idString")]
    pub id_game: String,
    #[serde(default)]
    pub name: String,
    #[serde(default)]
    pub term_definition_pairs: Vec<TermDefinitionPair>,
    pub input_type: InputType,
    pub round_count: i32,
    /// `-1` once the game has concluded.
    pub current_round: i32,
    #[serde(default)]
    pub players: Vec<Player>,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct RaceGamePayload {
    pub game: RaceGame,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub struct InterRoundState {
    pub current_round: i32,
    #[serde(default, alias = "playerResult")]
    pub player_results: Vec<RacePlayerResult>,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub struct RoundStartPayload {
    pub race_game_inter_round_state: InterRoundState,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct NewTermPayload {
    pub term: String,
}

/// Server verdict on one submitted answer.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct SubmitAnswerPayload {
    /// The submitted term together with its correct definition.
    pub term_definition_pair: TermDefinitionPair,
    pub answer_correct: bool,
    #[serde(default)]
    pub end_of_round: bool,
    #[serde(default)]
    pub race_game_round_state: Option<RaceRoundPlayerState>,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub struct RaceEndPayload {
    #[serde(alias = "playerResult")]
    pub race_player_results: Vec<RacePlayerResult>,
}

// ── Outbound ────────────────────────────────────────────────────────

/// Messages sent from client to server.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(tag = "$type", rename_all = "SCREAMING_SNAKE_CASE")]
pub enum ClientMessage {
    /// Subscribe to pushes for a topic.
    SubscriptionPut {
        #[serde(rename = "webSocketSubscriptionPut")]
        subscription: SubscriptionPut,
    },
    /// Request the lobby game list.
    GetGames,
    /// Request the setup snapshot of one game.
    GetGame {
        #[serde(rename = "idGame")]
        id_game: String,
    },
    JoinGame {
        #[serde(rename = "gameJoinDto")]
        join: GameJoin,
    },
    LeaveGame {
        #[serde(rename = "gameManipulationKey")]
        key: GameManipulationKey,
    },
    /// Request the race snapshot (dataset, mode, rounds).
    RaceGetGame {
        #[serde(rename = "gameManipulationKey")]
        key: GameManipulationKey,
    },
    /// Request the next Writing-mode term.
    RaceNewTerm {
        #[serde(rename = "gameManipulationKey")]
        key: GameManipulationKey,
    },
    RaceSubmitAnswer {
        #[serde(rename = "gameManipulationKey")]
        key: GameManipulationKey,
        answer: TermDefinitionPair,
    },
}

impl ClientMessage {
    pub fn subscribe(subscription_type: SubscriptionType, id_game: impl Into<String>) -> Self {
        Self::SubscriptionPut {
            subscription: SubscriptionPut {
                id_game: id_game.into(),
                subscription_type,
            },
        }
    }

    /// The discriminator this message is sent under.
    pub fn message_type(&self) -> MessageType {
        match self {
            Self::SubscriptionPut { .. } => MessageType::SubscriptionPut,
            Self::GetGames => MessageType::GetGames,
            Self::GetGame { .. } => MessageType::GetGame,
            Self::JoinGame { .. } => MessageType::JoinGame,
            Self::LeaveGame { .. } => MessageType::LeaveGame,
            Self::RaceGetGame { .. } => MessageType::RaceGetGame,
            Self::RaceNewTerm { .. } => MessageType::RaceNewTerm,
            Self::RaceSubmitAnswer { .. } => MessageType::RaceSubmitAnswer,
        }
    }

    /// Serialize to the JSON text sent on the wire.
    ///
    /// # Errors
    ///
    /// Returns [`RaceError::Serialization`] if serialization fails.
    pub fn to_json(&self) -> Result<String> {
        Ok(serde_json::to_string(self)?)
    }
}

// ── Inbound ─────────────────────────────────────────────────────────

/// An inbound frame split into its discriminator and raw body.
#[derive(Debug, Clone, PartialEq)]
pub struct Envelope {
    kind: String,
    body: Value,
}

impl Envelope {
    /// Parse a raw text frame.
    ///
    /// # Errors
    ///
    /// Returns [`RaceError::Serialization`] for invalid JSON and
    /// [`RaceError::MissingDiscriminator`] when `$type` is absent or not a string.
    pub fn parse(text: &str) -> Result<Self> {
        let body: Value = serde_json::from_str(text)?;
        let kind = body
            .get(DISCRIMINATOR)
            .and_then(Value::as_str)
            .ok_or(RaceError::MissingDiscriminator)?
            .to_owned();
        Ok(Self { kind, body })
    }

    /// The `$type` discriminator.
    pub fn kind(&self) -> &str {
        &self.kind
    }

    pub fn body(&self) -> &Value {
        &self.body
    }

    /// Decode the body into the payload type registered for this discriminator.
    ///
    /// Unknown fields (including `$type` itself) are ignored; missing required
    /// fields or wrong types are errors, and the caller keeps its previous state.
    ///
    /// # Errors
    ///
    /// Returns [`RaceError::Serialization`] if the body does not match `T`.
    pub fn decode<T: DeserializeOwned>(&self) -> Result<T> {
        Ok(T::deserialize(&self.body)?)
    }
}

#[cfg(test)]
#[allow(
    clippy::unwrap_used,
    clippy::expect_used,
    clippy::panic,
    clippy::indexing_slicing
)]
mod tests {
    use super::*;
    use serde_json::json;

    fn key() -> GameManipulationKey {
        GameManipulationKey::new("g-1", "u-7")
    }

    #[test]
    fn submit_answer_request_matches_server_shape() {
        let msg = ClientMessage::RaceSubmitAnswer {
            key: key(),
            answer: TermDefinitionPair::new("pes", "dog"),
        };
        let value: Value = serde_json::from_str(&msg.to_json().unwrap()).unwrap();
        assert_eq!(
            value,
            json!({
                "$type": "RACE_SUBMIT_ANSWER",
                "gameManipulationKey": {"IdGame": "g-1", "IdUser": "u-7"},
                "answer": {"term": "pes", "definition": "dog"}
            })
        );
    }

    #[test]
    fn unit_and_subscription_requests() {
        let value: Value = serde_json::to_value(ClientMessage::GetGames).unwrap();
        assert_eq!(value, json!({"$type": "GET_GAMES"}));

        let value = serde_json::to_value(ClientMessage::subscribe(SubscriptionType::GameSetup, "g-1"))
            .unwrap();
        assert_eq!(
            value,
            json!({
                "$type": "SUBSCRIPTION_PUT",
                "webSocketSubscriptionPut": {"idGameString": "g-1", "subscriptionType": "Game"}
            })
        );
    }

    #[test]
    fn join_request_uses_server_casing() {
        let msg = ClientMessage::JoinGame {
            join: GameJoin {
                id_game: "g-1".into(),
                player_name: "Alice".into(),
            },
        };
        let value = serde_json::to_value(&msg).unwrap();
        assert_eq!(value["gameJoinDto"]["PlayerName"], "Alice");
        assert_eq!(value["gameJoinDto"]["idGame"], "g-1");
        assert_eq!(msg.message_type(), MessageType::JoinGame);
    }

    #[test]
    fn message_type_strings_match_serialized_tags() {
        let messages = [
            ClientMessage::GetGames,
            ClientMessage::GetGame { id_game: "g".into() },
            ClientMessage::RaceGetGame { key: key() },
            ClientMessage::RaceNewTerm { key: key() },
            ClientMessage::LeaveGame { key: key() },
        ];
        for msg in messages {
            let value = serde_json::to_value(&msg).unwrap();
            assert_eq!(value[DISCRIMINATOR], msg.message_type().as_str());
        }
    }

    #[test]
    fn envelope_reads_discriminator() {
        let env = Envelope::parse(r#"{"$type":"RACE_NEW_TERM","term":"kočka"}"#).unwrap();
        assert_eq!(env.kind(), "RACE_NEW_TERM");
        let payload: NewTermPayload = env.decode().unwrap();
        assert_eq!(payload.term, "kočka");
    }

    #[test]
    fn envelope_without_discriminator_is_rejected() {
        let err = Envelope::parse(r#"{"term":"x"}"#).unwrap_err();
        assert!(matches!(err, RaceError::MissingDiscriminator));

        let err = Envelope::parse(r#"{"$type":5}"#).unwrap_err();
        assert!(matches!(err, RaceError::MissingDiscriminator));

        let err = Envelope::parse("not json").unwrap_err();
        assert!(matches!(err, RaceError::Serialization(_)));
    }

    #[test]
    fn decode_is_strict_about_required_fields() {
        let env = Envelope::parse(r#"{"$type":"RACE_NEW_TERM","word":"x"}"#).unwrap();
        assert!(env.decode::<NewTermPayload>().is_err());
    }

    #[test]
    fn race_game_fixture_decodes() {
        let text = r#"{
            "$type": "RACE_GET_GAME",
            "game": {
                "idString": "g-1",
                "name": "Animals",
                "termDefinitionPairs": [
                    {"term": "pes", "definition": "dog"},
                    {"term": "kočka", "definition": "cat"}
                ],
                "inputType": "Connecting",
                "roundCount": 2,
                "currentRound": -1,
                "players": [{"inGameName": "Alice"}]
            }
        }"#;
        let game = Envelope::parse(text)
            .unwrap()
            .decode::<RaceGamePayload>()
            .unwrap()
            .game;
        assert_eq!(game.input_type, InputType::Connecting);
        assert_eq!(game.current_round, -1);
        assert_eq!(game.term_definition_pairs.len(), 2);
        assert_eq!(game.players[0].in_game_name, "Alice");
    }

    #[test]
    fn unknown_input_type_fails_decode() {
        let value = json!({
            "game": {"idString": "g", "inputType": "Drawing", "roundCount": 1, "currentRound": 1}
        });
        assert!(serde_json::from_value::<RaceGamePayload>(value).is_err());
    }

    #[test]
    fn submit_answer_and_round_payloads_decode() {
        let answer: SubmitAnswerPayload = serde_json::from_value(json!({
            "termDefinitionPair": {"term": "pes", "definition": "dog"},
            "answerCorrect": false,
            "endOfRound": false,
            "raceGameRoundState": {"playerName": "Alice", "mistakeCount": 2, "percentageDone": 40}
        }))
        .unwrap();
        assert!(!answer.answer_correct);
        assert_eq!(answer.race_game_round_state.unwrap().mistake_count, 2);

        let round: RoundStartPayload = serde_json::from_value(json!({
            "raceGameInterRoundState": {
                "currentRound": 2,
                "playerResult": [{"inGameName": "Alice", "points": 10}]
            }
        }))
        .unwrap();
        assert_eq!(round.race_game_inter_round_state.current_round, 2);
        assert_eq!(round.race_game_inter_round_state.player_results.len(), 1);

        let end: RaceEndPayload = serde_json::from_value(json!({
            "racePlayerResults": [{"inGameName": "Bob", "points": 31}]
        }))
        .unwrap();
        assert_eq!(end.race_player_results[0].points, 31);
    }

    #[test]
    fn game_key_join_state() {
        let key = GameKey::invalid("g-1");
        assert!(!key.is_joined());

        let key: GameKey = serde_json::from_value(json!({
            "idGame": "g-1", "idUser": "u-1", "keyType": "Player"
        }))
        .unwrap();
        assert!(key.is_joined());
        assert_eq!(key.manipulation_key(), GameManipulationKey::new("g-1", "u-1"));
    }

    #[test]
    fn pair_accepts_capitalized_fields() {
        let pair: TermDefinitionPair =
            serde_json::from_value(json!({"Term": "pes", "Definition": "dog"})).unwrap();
        assert_eq!(pair, TermDefinitionPair::new("pes", "dog"));
    }
}
