#![allow(
    clippy::unwrap_used,
    clippy::expect_used,
    clippy::panic,
    clippy::indexing_slicing
)]
//! Lobby, game setup and connection behavior against a mock server.

mod common;

use std::sync::atomic::Ordering;
use std::time::Duration;

use serde_json::json;
use zlehcito_client::{ClientConfig, ConnectionState, GameSetupModel, LobbyModel, SessionContext};

use common::{
    barrier, game_detail_json, games_json, join_reply_json, open_session, MockConnector,
};

#[tokio::test]
async fn lobby_subscribes_and_lists_race_games() {
    let (session, server) = open_session().await;
    let lobby = LobbyModel::start(&session).unwrap();

    server.wait_for_sent("GET_GAMES", 1).await;
    assert_eq!(server.sent_types(), vec!["SUBSCRIPTION_PUT", "GET_GAMES"]);
    let subscription = &server.sent()[0]["webSocketSubscriptionPut"];
    assert_eq!(subscription["subscriptionType"], "Lobby");
    assert_eq!(subscription["idGameString"], "");

    server.push(games_json(&[
        ("1", "Animals", "Race"),
        ("2", "Capitals", "Race"),
        ("3", "Animal pictures", "Pexeso"),
    ]));
    let mut games = lobby.subscribe_games();
    games.wait_for(|g| g.len() == 3).await.unwrap();

    let filtered = lobby.filtered_games("ANIM");
    assert_eq!(filtered.len(), 1);
    assert_eq!(filtered[0].id_game, "1");
}

#[tokio::test]
async fn lobby_keeps_list_when_payload_is_bad() {
    let (session, server) = open_session().await;
    let lobby = LobbyModel::start(&session).unwrap();
    server.push(games_json(&[("1", "Animals", "Race")]));
    barrier(&session, &server).await;
    assert_eq!(lobby.games().len(), 1);

    server.push(json!({"$type": "GET_GAMES", "games": "not a list"}));
    server.push(json!({"$type": "GAMES_RESHUFFLED"}));
    server.push_raw("{{{");
    barrier(&session, &server).await;

    assert_eq!(lobby.games().len(), 1);
    assert_eq!(lobby.games()[0].name, "Animals");
}

#[tokio::test]
async fn dropping_a_model_unregisters_its_handlers() {
    let (session, _server) = open_session().await;
    let lobby = LobbyModel::start(&session).unwrap();
    assert!(session.router().is_registered("GET_GAMES"));

    drop(lobby);
    assert!(!session.router().is_registered("GET_GAMES"));
}

#[tokio::test]
async fn join_leave_and_start_signal() {
    let (session, server) = open_session().await;
    let setup = GameSetupModel::start(&session, "g-1").unwrap();
    assert_eq!(session.ids().id_game.as_deref(), Some("g-1"));

    let sent = server.wait_for_sent("GET_GAME", 1).await;
    assert_eq!(sent[0]["idGame"], "g-1");
    let subscription = &server.sent_of("SUBSCRIPTION_PUT")[0]["webSocketSubscriptionPut"];
    assert_eq!(subscription["subscriptionType"], "Game");

    server.push(game_detail_json("g-1", &["Bob"]));
    let mut detail = setup.detail();
    detail.wait_for(Option::is_some).await.unwrap();

    // Not joined yet: leave is a no-op.
    assert!(!setup.leave().unwrap());

    setup.join("Alice").unwrap();
    let join = server.wait_for_sent("JOIN_GAME", 1).await;
    assert_eq!(join[0]["gameJoinDto"], json!({"idGame": "g-1", "PlayerName": "Alice"}));

    server.push(join_reply_json("g-1", "u-9", "Player"));
    setup.game_key().wait_for(|k| k.is_joined()).await.unwrap();
    assert_eq!(session.game_key().unwrap().id_user, "u-9");

    server.push(json!({"$type": "RACE_START_GAME"}));
    setup.start_signal().wait_for(Option::is_some).await.unwrap();
    let signal = setup.consume_start_signal().unwrap();
    assert_eq!((signal.id_game.as_str(), signal.id_user.as_str()), ("g-1", "u-9"));
    assert!(setup.consume_start_signal().is_none());

    assert!(setup.leave().unwrap());
    let leave = server.wait_for_sent("LEAVE_GAME", 1).await;
    assert_eq!(leave[0]["gameManipulationKey"], json!({"IdGame": "g-1", "IdUser": "u-9"}));

    server.push(json!({"$type": "LEAVE_GAME"}));
    setup.game_key().wait_for(|k| !k.is_joined()).await.unwrap();
    detail.wait_for(Option::is_none).await.unwrap();
}

#[tokio::test]
async fn invalid_join_reply_does_not_set_user() {
    let (session, server) = open_session().await;
    let setup = GameSetupModel::start(&session, "g-1").unwrap();
    setup.join("Alice").unwrap();

    server.push(join_reply_json("g-1", "", "Invalid"));
    barrier(&session, &server).await;
    assert!(!setup.game_key().borrow().is_joined());
    assert_eq!(session.ids().id_user, None);
}

#[tokio::test]
async fn send_after_server_hang_up_reconnects() {
    let (session, server) = open_session().await;
    let lobby = LobbyModel::start(&session).unwrap();
    server.wait_for_sent("GET_GAMES", 1).await;

    server.hang_up();
    session
        .connectivity()
        .wait_for(|s| *s == ConnectionState::Closed)
        .await
        .unwrap();

    lobby.refresh().unwrap();
    server.wait_for_sent("GET_GAMES", 2).await;
    // The reopened link also carries the lobby subscription and a fresh list.
    let subscriptions = server.wait_for_sent("SUBSCRIPTION_PUT", 2).await;
    assert_eq!(
        subscriptions[1]["webSocketSubscriptionPut"]["subscriptionType"],
        "Lobby"
    );
    server.wait_for_sent("GET_GAMES", 3).await;
    assert_eq!(server.connects.load(Ordering::SeqCst), 2);
    assert!(session.is_open());
    assert_eq!(session.dropped_messages(), 0);
}

#[tokio::test(start_paused = true)]
async fn sends_are_dropped_while_server_unreachable() {
    let connector = MockConnector::default();
    connector.0.refuse.store(true, Ordering::SeqCst);
    let server = std::sync::Arc::clone(&connector.0);
    let config = ClientConfig::new("mock://server").with_send_retry_delay(Duration::from_secs(2));
    let mut session = SessionContext::start(connector, &config);

    let lobby = LobbyModel::start(&session).unwrap();
    tokio::time::sleep(Duration::from_secs(3)).await;

    assert_eq!(session.dropped_messages(), 2);
    assert!(server.sent().is_empty());
    assert_eq!(*session.connectivity().borrow(), ConnectionState::Closed);

    // Once the server is back, the next send goes through.
    server.refuse.store(false, Ordering::SeqCst);
    lobby.refresh().unwrap();
    server.wait_for_sent("GET_GAMES", 1).await;
    // The dropped subscription is replayed once the link first opens.
    server.wait_for_sent("SUBSCRIPTION_PUT", 1).await;
    assert_eq!(session.dropped_messages(), 2);

    session.shutdown().await;
}
