#![allow(
    dead_code,
    clippy::unwrap_used,
    clippy::expect_used,
    clippy::panic,
    clippy::indexing_slicing
)]
//! Shared test utilities for the race client integration tests.
//!
//! [`MockServer`] stands in for the game server: every connect through a
//! [`MockConnector`] opens a fresh in-memory link whose inbound side the test
//! feeds with [`MockServer::push`], and everything the client sends is
//! recorded as parsed JSON.

use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::{Arc, Mutex as StdMutex};
use std::time::Duration;

use async_trait::async_trait;
use serde_json::{json, Value};
use tokio::sync::mpsc;
use zlehcito_client::{ClientConfig, Connector, RaceError, SessionContext, Transport};

// ── MockServer ──────────────────────────────────────────────────────

#[derive(Default)]
pub struct MockServer {
    pub connects: AtomicUsize,
    pub refuse: AtomicBool,
    link: StdMutex<Option<mpsc::UnboundedSender<String>>>,
    sent: Arc<StdMutex<Vec<Value>>>,
}

impl MockServer {
    /// Deliver `frame` on the current link. Panics if no link is open.
    pub fn push(&self, frame: Value) {
        let link = self.link.lock().unwrap();
        link.as_ref()
            .expect("no open link")
            .send(frame.to_string())
            .expect("client side of link dropped");
    }

    /// Deliver a raw text frame (for malformed input).
    pub fn push_raw(&self, frame: &str) {
        let link = self.link.lock().unwrap();
        link.as_ref().expect("no open link").send(frame.to_owned()).unwrap();
    }

    /// Close the current link from the server side.
    pub fn hang_up(&self) {
        self.link.lock().unwrap().take();
    }

    /// Every message the client has sent, in order.
    pub fn sent(&self) -> Vec<Value> {
        self.sent.lock().unwrap().clone()
    }

    /// Sent messages with the given `$type`.
    pub fn sent_of(&self, kind: &str) -> Vec<Value> {
        self.sent()
            .into_iter()
            .filter(|m| m["$type"] == kind)
            .collect()
    }

    pub fn sent_types(&self) -> Vec<String> {
        self.sent()
            .iter()
            .map(|m| m["$type"].as_str().unwrap_or_default().to_owned())
            .collect()
    }

    /// Wait (in virtual or real time) until `count` messages of `kind` were sent.
    pub async fn wait_for_sent(&self, kind: &str, count: usize) -> Vec<Value> {
        for _ in 0..400 {
            let found = self.sent_of(kind);
            if found.len() >= count {
                return found;
            }
            tokio::time::sleep(Duration::from_millis(5)).await;
        }
        panic!(
            "timed out waiting for {count} x {kind}; sent so far: {:?}",
            self.sent_types()
        );
    }
}

// ── MockConnector / MockTransport ───────────────────────────────────

pub struct MockTransport {
    incoming: mpsc::UnboundedReceiver<String>,
    sent: Arc<StdMutex<Vec<Value>>>,
}

#[async_trait]
impl Transport for MockTransport {
    async fn send(&mut self, message: String) -> Result<(), RaceError> {
        let value: Value = serde_json::from_str(&message)?;
        self.sent.lock().unwrap().push(value);
        Ok(())
    }

    async fn recv(&mut self) -> Option<Result<String, RaceError>> {
        self.incoming.recv().await.map(Ok)
    }

    async fn close(&mut self) -> Result<(), RaceError> {
        Ok(())
    }
}

#[derive(Clone, Default)]
pub struct MockConnector(pub Arc<MockServer>);

#[async_trait]
impl Connector for MockConnector {
    type Transport = MockTransport;

    async fn connect(&self) -> Result<MockTransport, RaceError> {
        self.0.connects.fetch_add(1, Ordering::SeqCst);
        if self.0.refuse.load(Ordering::SeqCst) {
            return Err(RaceError::Connect("refused".into()));
        }
        let (tx, rx) = mpsc::unbounded_channel();
        *self.0.link.lock().unwrap() = Some(tx);
        Ok(MockTransport {
            incoming: rx,
            sent: Arc::clone(&self.0.sent),
        })
    }
}

/// A session on a fresh mock server, already connected.
pub async fn open_session() -> (SessionContext, Arc<MockServer>) {
    let connector = MockConnector::default();
    let server = Arc::clone(&connector.0);
    let session = SessionContext::start(connector, &ClientConfig::new("mock://server"));
    session
        .connectivity()
        .wait_for(|s| *s == zlehcito_client::ConnectionState::Open)
        .await
        .unwrap();
    (session, server)
}

// ── Server JSON builders ────────────────────────────────────────────

pub fn pairs_json(pairs: &[(&str, &str)]) -> Value {
    Value::Array(
        pairs
            .iter()
            .map(|(t, d)| json!({"term": t, "definition": d}))
            .collect(),
    )
}

pub fn race_game_json(
    input_type: &str,
    round_count: i32,
    current_round: i32,
    pairs: &[(&str, &str)],
) -> Value {
    json!({
        "$type": "RACE_GET_GAME",
        "game": {
            "idString": "g-1",
            "name": "Animals",
            "termDefinitionPairs": pairs_json(pairs),
            "inputType": input_type,
            "roundCount": round_count,
            "currentRound": current_round,
            "players": [{"inGameName": "Alice"}, {"inGameName": "Bob"}]
        }
    })
}

pub fn round_start_json(round: i32) -> Value {
    json!({
        "$type": "RACE_ROUND_START",
        "raceGameInterRoundState": {
            "currentRound": round,
            "playerResults": [{"inGameName": "Alice", "points": 10 * round}]
        }
    })
}

pub fn new_term_json(term: &str) -> Value {
    json!({"$type": "RACE_NEW_TERM", "term": term})
}

pub fn answer_json(term: &str, definition: &str, correct: bool, end_of_round: bool) -> Value {
    json!({
        "$type": "RACE_SUBMIT_ANSWER",
        "termDefinitionPair": {"term": term, "definition": definition},
        "answerCorrect": correct,
        "endOfRound": end_of_round,
        "raceGameRoundState": {"playerName": "Alice", "mistakeCount": 0, "percentageDone": 50.0}
    })
}

pub fn race_end_json(results: &[(&str, i64)]) -> Value {
    let results: Vec<Value> = results
        .iter()
        .map(|(name, points)| json!({"inGameName": name, "points": points}))
        .collect();
    json!({"$type": "RACE_END", "racePlayerResults": results})
}

pub fn games_json(games: &[(&str, &str, &str)]) -> Value {
    let games: Vec<Value> = games
        .iter()
        .map(|(id, name, kind)| json!({"idString": id, "name": name, "playerCount": 1, "gameType": kind}))
        .collect();
    json!({"$type": "GET_GAMES", "games": games})
}

pub fn game_detail_json(id: &str, players: &[&str]) -> Value {
    let players: Vec<Value> = players.iter().map(|p| json!({"inGameName": p})).collect();
    json!({"$type": "GET_GAME", "game": {"idString": id, "name": "Animals", "players": players}})
}

pub fn join_reply_json(id_game: &str, id_user: &str, key_type: &str) -> Value {
    json!({
        "$type": "JOIN_GAME",
        "gameKeyPlayer": {"idGame": id_game, "idUser": id_user, "keyType": key_type}
    })
}

/// Wait until every frame pushed before this call has been routed.
///
/// Inbound frames are dispatched strictly in order, so once a handler for a
/// private barrier type fires, everything before it has been handled.
pub async fn barrier(session: &SessionContext, server: &MockServer) {
    let (tx, mut rx) = mpsc::unbounded_channel();
    let _registration = session.router().register("TEST_BARRIER", move |_| {
        let _ = tx.send(());
    });
    server.push(json!({"$type": "TEST_BARRIER"}));
    rx.recv().await.expect("barrier handler dropped");
}
