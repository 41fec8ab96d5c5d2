#![allow(
    clippy::unwrap_used,
    clippy::expect_used,
    clippy::panic,
    clippy::indexing_slicing
)]
//! Running game sessions driven end to end through the mock server.

mod common;

use std::sync::Arc;
use std::time::Duration;

use serde_json::json;
use zlehcito_client::connecting::Feedback;
use zlehcito_client::protocol::InputType;
use zlehcito_client::{
    ConnectionState, GameConfig, GamePhase, GameSession, RaceError, SessionContext,
};

use common::{
    answer_json, barrier, new_term_json, open_session, race_end_json, race_game_json,
    round_start_json, MockServer,
};

async fn joined_session() -> (SessionContext, Arc<MockServer>) {
    let (session, server) = open_session().await;
    session.set_game("g-1");
    session.set_user("u-1");
    (session, server)
}

fn fast_config() -> GameConfig {
    GameConfig::default()
        .with_countdown(2, Duration::from_millis(10))
        .with_feedback_duration(Duration::from_millis(250))
        .with_shuffle_seed(7)
}

#[tokio::test]
async fn start_requires_game_and_user() {
    let (session, _server) = open_session().await;
    session.set_game("g-1");

    let result = GameSession::start(&session, GameConfig::default());
    assert!(matches!(result, Err(RaceError::NoGameKey)));
    assert!(!session.router().is_registered("RACE_GET_GAME"));
}

#[tokio::test]
async fn writing_game_runs_from_countdown_to_results() {
    let (session, server) = joined_session().await;
    let game = GameSession::start(&session, fast_config()).unwrap();

    let requested = server.wait_for_sent("RACE_GET_GAME", 1).await;
    assert_eq!(
        requested[0]["gameManipulationKey"],
        json!({"IdGame": "g-1", "IdUser": "u-1"})
    );
    let subscription = &server.sent_of("SUBSCRIPTION_PUT")[0]["webSocketSubscriptionPut"];
    assert_eq!(subscription["subscriptionType"], "GameRunning");
    assert_eq!(subscription["idGameString"], "g-1");

    server.push(race_game_json("Writing", 2, 0, &[("cat", "kočka"), ("dog", "pes")]));
    game.descriptor()
        .wait_for(|d| d.as_ref().is_some_and(|d| d.input_type == InputType::Writing))
        .await
        .unwrap();
    assert_eq!(*game.phase().borrow(), GamePhase::AwaitingGameData);

    server.push(round_start_json(1));
    game.phase()
        .wait_for(|p| *p == GamePhase::RoundActive)
        .await
        .unwrap();
    server.wait_for_sent("RACE_NEW_TERM", 1).await;
    assert_eq!(game.inter_round_results().borrow()[0].points, 10);

    server.push(new_term_json("cat"));
    let mut writing = game.writing();
    writing
        .wait_for(|w| w.current_term.as_deref() == Some("cat"))
        .await
        .unwrap();

    game.set_user_response("kocour").unwrap();
    game.submit_answer().unwrap();
    // Still waiting on the verdict: a second submit is refused.
    game.submit_answer().unwrap();
    let submitted = server.wait_for_sent("RACE_SUBMIT_ANSWER", 1).await;
    assert_eq!(submitted[0]["answer"], json!({"term": "cat", "definition": "kocour"}));

    server.push(answer_json("cat", "kočka", false, false));
    writing.wait_for(|w| w.is_wrong_answer).await.unwrap();
    {
        let state = writing.borrow();
        assert_eq!(state.correct_definition.as_deref(), Some("kočka"));
        assert_eq!(state.user_response, "kočka");
    }
    assert_eq!(game.mistakes().borrow().get("cat"), Some(&1));
    assert!(game.round_player_state().borrow().is_some());
    assert_eq!(server.sent_of("RACE_SUBMIT_ANSWER").len(), 1);
    assert_eq!(server.sent_of("RACE_NEW_TERM").len(), 1);

    game.submit_answer().unwrap();
    server.wait_for_sent("RACE_SUBMIT_ANSWER", 2).await;
    server.push(answer_json("cat", "kočka", true, false));
    server.wait_for_sent("RACE_NEW_TERM", 2).await;

    server.push(race_end_json(&[("Alice", 30), ("Bob", 20)]));
    game.phase()
        .wait_for(|p| *p == GamePhase::ResultsDisplay)
        .await
        .unwrap();
    assert_eq!(game.final_results().borrow().len(), 2);
    assert_eq!(game.mistakes().borrow().get("cat"), Some(&1));
}

#[tokio::test]
async fn finished_game_opens_on_results() {
    let (session, server) = joined_session().await;
    let game = GameSession::start(&session, fast_config()).unwrap();

    server.push(race_game_json("Writing", 3, -1, &[("cat", "kočka")]));
    game.phase()
        .wait_for(|p| *p == GamePhase::ResultsDisplay)
        .await
        .unwrap();

    tokio::time::sleep(Duration::from_millis(30)).await;
    assert!(server.sent_of("RACE_NEW_TERM").is_empty());
}

#[tokio::test]
async fn connecting_round_judges_locally_and_clears_feedback() {
    let (session, server) = joined_session().await;
    let game = GameSession::start(&session, fast_config()).unwrap();

    server.push(race_game_json(
        "Connecting",
        1,
        1,
        &[("A", "1"), ("B", "2"), ("C", "3")],
    ));
    let mut connecting = game.connecting();
    connecting
        .wait_for(|c| c.work_queue.len() == 3)
        .await
        .unwrap();
    assert_eq!(*game.phase().borrow(), GamePhase::RoundActive);
    {
        let state = connecting.borrow();
        let mut terms = state.visible_terms.clone();
        terms.sort();
        assert_eq!(terms, vec!["A", "B", "C"]);
    }

    game.select_term("A").unwrap();
    game.select_definition("1").unwrap();
    connecting
        .wait_for(|c| c.feedback == Some(Feedback::Correct))
        .await
        .unwrap();
    assert_eq!(connecting.borrow().connected_count, 1);
    let sent = server.wait_for_sent("RACE_SUBMIT_ANSWER", 1).await;
    assert_eq!(sent[0]["answer"], json!({"term": "A", "definition": "1"}));

    connecting.wait_for(|c| c.feedback.is_none()).await.unwrap();

    game.select_term("B").unwrap();
    game.select_definition("3").unwrap();
    connecting
        .wait_for(|c| c.mistake_count == 1)
        .await
        .unwrap();
    {
        let state = connecting.borrow();
        assert_eq!(state.feedback, Some(Feedback::Incorrect));
        let tail = state.work_queue.last().unwrap();
        assert_eq!((tail.term.as_str(), tail.definition.as_str()), ("B", "3"));
        assert_eq!(state.work_queue.len(), 3);
    }
    server.wait_for_sent("RACE_SUBMIT_ANSWER", 2).await;

    // The server's verdict only refreshes progress; the queue stays as judged.
    server.push(answer_json("B", "2", false, false));
    game.round_player_state()
        .wait_for(Option::is_some)
        .await
        .unwrap();
    assert_eq!(connecting.borrow().work_queue.len(), 3);
    assert_eq!(game.mistakes().borrow().get("B"), Some(&1));
}

#[tokio::test]
async fn bad_frames_leave_game_state_alone() {
    let (session, server) = joined_session().await;
    let game = GameSession::start(&session, fast_config()).unwrap();

    server.push(race_game_json("Writing", 1, 1, &[("cat", "kočka")]));
    game.phase()
        .wait_for(|p| *p == GamePhase::RoundActive)
        .await
        .unwrap();

    server.push(json!({"$type": "RACE_NEW_TERM"}));
    server.push(json!({"$type": "RACE_NEW_TERM", "term": 42}));
    server.push(json!({"$type": "RACE_SOMETHING_NEW", "term": "dog"}));
    server.push(json!({"term": "dog"}));
    server.push_raw("not json");
    barrier(&session, &server).await;
    tokio::time::sleep(Duration::from_millis(20)).await;

    assert_eq!(game.writing().borrow().current_term, None);
    assert_eq!(*game.phase().borrow(), GamePhase::RoundActive);
    assert!(session.is_open());
}

#[tokio::test]
async fn shutdown_unregisters_and_a_new_game_can_start() {
    let (session, server) = joined_session().await;
    let mut first = GameSession::start(&session, fast_config()).unwrap();
    server.wait_for_sent("RACE_GET_GAME", 1).await;
    assert!(session.router().is_registered("RACE_NEW_TERM"));

    first.shutdown().await;
    for kind in [
        "RACE_GET_GAME",
        "RACE_ROUND_START",
        "RACE_NEW_TERM",
        "RACE_SUBMIT_ANSWER",
        "RACE_END",
    ] {
        assert!(!session.router().is_registered(kind), "{kind} still registered");
    }
    assert!(first.set_user_response("late").is_err());

    let second = GameSession::start(&session, fast_config()).unwrap();
    server.wait_for_sent("RACE_GET_GAME", 2).await;
    server.push(race_game_json("Writing", 1, 1, &[("cat", "kočka")]));
    second
        .phase()
        .wait_for(|p| *p == GamePhase::RoundActive)
        .await
        .unwrap();
}

#[tokio::test]
async fn running_game_resubscribes_and_catches_up_after_reconnect() {
    let (session, server) = joined_session().await;
    let game = GameSession::start(&session, fast_config()).unwrap();

    server.push(race_game_json("Writing", 2, 1, &[("cat", "kočka"), ("dog", "pes")]));
    server.wait_for_sent("RACE_NEW_TERM", 1).await;
    server.push(new_term_json("cat"));
    let mut writing = game.writing();
    writing
        .wait_for(|w| w.current_term.as_deref() == Some("cat"))
        .await
        .unwrap();

    server.hang_up();
    session
        .connectivity()
        .wait_for(|s| *s == ConnectionState::Closed)
        .await
        .unwrap();

    // The answer reconnects the link; its verdict never arrives.
    game.set_user_response("kocour").unwrap();
    game.submit_answer().unwrap();
    server.wait_for_sent("RACE_SUBMIT_ANSWER", 1).await;
    let subscriptions = server.wait_for_sent("SUBSCRIPTION_PUT", 2).await;
    assert_eq!(
        subscriptions[1]["webSocketSubscriptionPut"]["subscriptionType"],
        "GameRunning"
    );
    server.wait_for_sent("RACE_GET_GAME", 2).await;
    writing.wait_for(|w| w.awaiting_verdict).await.unwrap();

    // Same round: the lost verdict no longer blocks the next submit.
    server.push(race_game_json("Writing", 2, 1, &[("cat", "kočka"), ("dog", "pes")]));
    writing.wait_for(|w| !w.awaiting_verdict).await.unwrap();
    assert_eq!(writing.borrow().current_term.as_deref(), Some("cat"));
    game.submit_answer().unwrap();
    server.wait_for_sent("RACE_SUBMIT_ANSWER", 2).await;

    // The server moved on while we were away.
    server.push(race_game_json("Writing", 2, 2, &[("cat", "kočka"), ("dog", "pes")]));
    game.descriptor()
        .wait_for(|d| d.as_ref().is_some_and(|d| d.current_round == 2))
        .await
        .unwrap();
    let requests = server.wait_for_sent("RACE_NEW_TERM", 2).await;
    assert_eq!(requests.len(), 2);
    assert_eq!(*game.phase().borrow(), GamePhase::RoundActive);
    assert_eq!(game.writing().borrow().current_term, None);

    server.push(race_game_json("Writing", 2, -1, &[("cat", "kočka"), ("dog", "pes")]));
    game.phase()
        .wait_for(|p| *p == GamePhase::ResultsDisplay)
        .await
        .unwrap();
}

#[tokio::test]
async fn late_connecting_verdict_keeps_newest_feedback() {
    let (session, server) = joined_session().await;
    let config = fast_config().with_feedback_duration(Duration::from_secs(30));
    let game = GameSession::start(&session, config).unwrap();

    server.push(race_game_json(
        "Connecting",
        1,
        1,
        &[("A", "1"), ("B", "2"), ("C", "3")],
    ));
    let mut connecting = game.connecting();
    connecting
        .wait_for(|c| c.work_queue.len() == 3)
        .await
        .unwrap();

    game.select_term("A").unwrap();
    game.select_definition("1").unwrap();
    game.select_term("B").unwrap();
    game.select_definition("3").unwrap();
    connecting
        .wait_for(|c| c.feedback == Some(Feedback::Incorrect))
        .await
        .unwrap();
    server.wait_for_sent("RACE_SUBMIT_ANSWER", 2).await;

    // Verdict for the first attempt lands after the second was judged.
    server.push(answer_json("A", "1", true, false));
    game.round_player_state()
        .wait_for(Option::is_some)
        .await
        .unwrap();
    barrier(&session, &server).await;
    assert_eq!(connecting.borrow().feedback, Some(Feedback::Incorrect));

    server.push(answer_json("B", "3", false, false));
    barrier(&session, &server).await;
    assert_eq!(connecting.borrow().feedback, Some(Feedback::Incorrect));
    assert_eq!(connecting.borrow().connected_count, 1);
    assert_eq!(connecting.borrow().mistake_count, 1);
}

#[tokio::test(start_paused = true)]
async fn countdown_ticks_once_per_tick() {
    let (session, server) = joined_session().await;
    let game = GameSession::start(&session, GameConfig::default()).unwrap();

    server.push(race_game_json("Writing", 2, 0, &[("cat", "kočka")]));
    server.push(round_start_json(1));
    let mut phase = game.phase();
    phase
        .wait_for(|p| *p == GamePhase::Countdown(3))
        .await
        .unwrap();

    tokio::time::sleep(Duration::from_millis(1500)).await;
    assert_eq!(*phase.borrow(), GamePhase::Countdown(2));
    tokio::time::sleep(Duration::from_secs(1)).await;
    assert_eq!(*phase.borrow(), GamePhase::Countdown(1));
    assert!(server.sent_of("RACE_NEW_TERM").is_empty());

    tokio::time::sleep(Duration::from_secs(1)).await;
    assert_eq!(*phase.borrow(), GamePhase::RoundActive);
    server.wait_for_sent("RACE_NEW_TERM", 1).await;
}

#[tokio::test(start_paused = true)]
async fn dropped_game_sends_nothing_after_countdown() {
    let (session, server) = joined_session().await;
    let game = GameSession::start(&session, GameConfig::default()).unwrap();

    server.push(race_game_json("Writing", 2, 0, &[("cat", "kočka")]));
    server.push(round_start_json(1));
    game.phase()
        .wait_for(|p| matches!(p, GamePhase::Countdown(_)))
        .await
        .unwrap();

    drop(game);
    assert!(!session.router().is_registered("RACE_ROUND_START"));
    tokio::time::sleep(Duration::from_secs(5)).await;
    assert!(server.sent_of("RACE_NEW_TERM").is_empty());
}
