#![no_main]

use libfuzzer_sys::fuzz_target;
use zlehcito_client::protocol::{
    GameDetailPayload, GamesListPayload, JoinGamePayload, NewTermPayload, RaceEndPayload,
    RaceGamePayload, RoundStartPayload, SubmitAnswerPayload,
};
use zlehcito_client::Router;

fuzz_target!(|data: &[u8]| {
    let Ok(text) = std::str::from_utf8(data) else {
        return;
    };

    // Every inbound payload type behind a decoding handler, the way the
    // models register them.
    let router = Router::new();
    let _registrations = [
        router.register_decoded("GET_GAMES", |_: GamesListPayload| {}),
        router.register_decoded("GET_GAME", |_: GameDetailPayload| {}),
        router.register_decoded("JOIN_GAME", |_: JoinGamePayload| {}),
        router.register_decoded("RACE_GET_GAME", |_: RaceGamePayload| {}),
        router.register_decoded("RACE_ROUND_START", |_: RoundStartPayload| {}),
        router.register_decoded("RACE_NEW_TERM", |_: NewTermPayload| {}),
        router.register_decoded("RACE_SUBMIT_ANSWER", |_: SubmitAnswerPayload| {}),
        router.register_decoded("RACE_END", |_: RaceEndPayload| {}),
    ];

    let _ = router.dispatch(text);
});
