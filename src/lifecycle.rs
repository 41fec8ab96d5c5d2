//! Round and game lifecycle.
//!
//! [`GameController`] is a plain state machine. Every input (a server push, a
//! countdown tick, a player action) returns a [`Step`] listing the messages to
//! send and the timers to arm or cancel. It never touches the network or the
//! clock itself, which keeps it deterministic; [`GameSession`](crate::game::GameSession)
//! carries the steps out.
//!
//! ```text
//! AwaitingGameData ─round start─► Countdown(n) ─ticks─► RoundActive
//!        ▲                             ▲                    │
//!        │                             └────round start─────┤
//!        └ (never returns)        ResultsDisplay ◄─game end─┘
//! ```
//!
//! Game data with `currentRound == -1` jumps straight to `ResultsDisplay`.
//! Game data arriving mid-round (the snapshot re-requested after a reconnect)
//! is trusted over local state: a newer round number restarts the round.

use tracing::{debug, info};

use crate::config::GameConfig;
use crate::connecting::{Attempt, ConnectingEngine, ConnectingRoundState};
use crate::partition::partition;
use crate::protocol::{
    ClientMessage, GameManipulationKey, InputType, InterRoundState, Player, RaceGame,
    RacePlayerResult, RaceRoundPlayerState, SubmitAnswerPayload, SubscriptionType,
    TermDefinitionPair,
};
use crate::writing::{merge_mistakes, MistakeTally, WritingEngine, WritingRoundState};

/// `currentRound` value meaning the game has already ended.
pub const GAME_OVER_ROUND: i32 = -1;

/// Top-level phase of a running game.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum GamePhase {
    /// Waiting for the `RACE_GET_GAME` snapshot or the first round start.
    #[default]
    AwaitingGameData,
    /// Seconds left before the round starts.
    Countdown(u32),
    RoundActive,
    /// The game is over; final results are shown.
    ResultsDisplay,
}

/// What the session knows about the running game.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct GameSessionDescriptor {
    pub id_game: String,
    pub id_user: String,
    pub name: String,
    pub input_type: InputType,
    pub round_count: i32,
    pub current_round: i32,
    pub players: Vec<Player>,
}

/// Timer changes requested by the controller.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TimerCommand {
    /// Arm the per-tick countdown timer.
    StartCountdown,
    CancelCountdown,
    /// Clear Connecting-mode feedback after `feedback_duration`.
    ScheduleFeedbackClear,
}

/// Side effects requested by one controller input.
#[derive(Debug, Default, PartialEq)]
pub struct Step {
    pub outbound: Vec<ClientMessage>,
    pub timers: Vec<TimerCommand>,
}

impl Step {
    fn send(mut self, msg: ClientMessage) -> Self {
        self.outbound.push(msg);
        self
    }

    fn timer(mut self, timer: TimerCommand) -> Self {
        self.timers.push(timer);
        self
    }

    /// `true` when the step asks for nothing.
    pub fn is_empty(&self) -> bool {
        self.outbound.is_empty() && self.timers.is_empty()
    }
}

/// State machine for one game, from the first snapshot to the results.
#[derive(Debug)]
pub struct GameController {
    key: GameManipulationKey,
    config: GameConfig,
    phase: GamePhase,
    descriptor: Option<GameSessionDescriptor>,
    dataset: Vec<TermDefinitionPair>,
    writing: WritingEngine,
    connecting: ConnectingEngine,
    inter_round_results: Vec<RacePlayerResult>,
    final_results: Vec<RacePlayerResult>,
    round_player_state: Option<RaceRoundPlayerState>,
    final_mistakes: Option<MistakeTally>,
}

impl GameController {
    pub fn new(key: GameManipulationKey, config: GameConfig) -> Self {
        let connecting = match config.shuffle_seed {
            Some(seed) => ConnectingEngine::with_seed(config.max_visible_pairs, seed),
            None => ConnectingEngine::new(config.max_visible_pairs),
        };
        Self {
            key,
            config,
            phase: GamePhase::AwaitingGameData,
            descriptor: None,
            dataset: Vec::new(),
            writing: WritingEngine::new(),
            connecting,
            inter_round_results: Vec::new(),
            final_results: Vec::new(),
            round_player_state: None,
            final_mistakes: None,
        }
    }

    // ── Accessors ───────────────────────────────────────────────────

    pub fn key(&self) -> &GameManipulationKey {
        &self.key
    }

    pub fn phase(&self) -> GamePhase {
        self.phase
    }

    pub fn descriptor(&self) -> Option<&GameSessionDescriptor> {
        self.descriptor.as_ref()
    }

    pub fn input_type(&self) -> Option<InputType> {
        self.descriptor.as_ref().map(|d| d.input_type)
    }

    pub fn writing(&self) -> &WritingRoundState {
        self.writing.state()
    }

    pub fn connecting(&self) -> &ConnectingRoundState {
        self.connecting.state()
    }

    pub fn inter_round_results(&self) -> &[RacePlayerResult] {
        &self.inter_round_results
    }

    pub fn final_results(&self) -> &[RacePlayerResult] {
        &self.final_results
    }

    pub fn round_player_state(&self) -> Option<&RaceRoundPlayerState> {
        self.round_player_state.as_ref()
    }

    /// Mistakes per term across both modes. Frozen once the game ends.
    pub fn mistakes(&self) -> MistakeTally {
        if let Some(frozen) = &self.final_mistakes {
            return frozen.clone();
        }
        let mut all = self.writing.mistakes();
        merge_mistakes(&mut all, &self.connecting.mistakes());
        all
    }

    // ── Server pushes ───────────────────────────────────────────────

    /// Subscribe to the running game and ask for its snapshot.
    pub fn begin(&self) -> Step {
        Step::default()
            .send(ClientMessage::subscribe(
                SubscriptionType::GameRunning,
                self.key.id_game.clone(),
            ))
            .send(ClientMessage::RaceGetGame {
                key: self.key.clone(),
            })
    }

    /// Store the game snapshot and enter the phase it implies.
    pub fn on_game_data(&mut self, game: RaceGame) -> Step {
        let previous_round = self.current_round();
        let descriptor = GameSessionDescriptor {
            id_game: game.id_game,
            id_user: self.key.id_user.clone(),
            name: game.name,
            input_type: game.input_type,
            round_count: game.round_count,
            current_round: game.current_round,
            players: game.players,
        };
        info!(
            input_type = ?descriptor.input_type,
            rounds = descriptor.round_count,
            current = descriptor.current_round,
            "game data received"
        );
        self.dataset = game.term_definition_pairs;
        self.descriptor = Some(descriptor);

        if game.current_round == GAME_OVER_ROUND {
            return self.enter_results();
        }
        if game.current_round <= 0 {
            return Step::default();
        }

        match self.phase {
            // Round announced before the dataset arrived: deal it now.
            GamePhase::Countdown(_) => {
                self.prime_connecting();
                Step::default()
            }
            // Joined mid-round.
            GamePhase::AwaitingGameData => {
                self.prime_round();
                self.activate()
            }
            GamePhase::RoundActive => self.reconcile_round(previous_round),
            GamePhase::ResultsDisplay => Step::default(),
        }
    }

    pub fn on_round_start(&mut self, state: InterRoundState) -> Step {
        info!(round = state.current_round, "round starting");
        if let Some(descriptor) = self.descriptor.as_mut() {
            descriptor.current_round = state.current_round;
        }
        self.inter_round_results = state.player_results;
        self.round_player_state = None;
        self.final_mistakes = None;
        self.prime_round();

        if self.config.countdown_seconds == 0 {
            return self.activate();
        }
        self.set_phase(GamePhase::Countdown(self.config.countdown_seconds));
        Step::default().timer(TimerCommand::StartCountdown)
    }

    pub fn on_countdown_tick(&mut self) -> Step {
        let GamePhase::Countdown(left) = self.phase else {
            return Step::default().timer(TimerCommand::CancelCountdown);
        };
        let left = left.saturating_sub(1);
        if left > 0 {
            self.set_phase(GamePhase::Countdown(left));
            return Step::default();
        }
        self.activate().timer(TimerCommand::CancelCountdown)
    }

    pub fn on_new_term(&mut self, term: String) -> Step {
        if self.phase != GamePhase::RoundActive || self.input_type() != Some(InputType::Writing) {
            debug!(phase = ?self.phase, "new term ignored");
            return Step::default();
        }
        self.writing.set_current_term(term);
        Step::default()
    }

    pub fn on_answer(&mut self, payload: &SubmitAnswerPayload) -> Step {
        if let Some(round_state) = &payload.race_game_round_state {
            self.round_player_state = Some(round_state.clone());
        }
        if self.phase != GamePhase::RoundActive {
            debug!(phase = ?self.phase, "answer verdict outside an active round");
            return Step::default();
        }
        match self.input_type() {
            Some(InputType::Writing) => {
                let mut step = Step::default();
                if let Some(next) = self.writing.apply_answer(payload, self.key.clone()) {
                    step = step.send(next);
                }
                step
            }
            Some(InputType::Connecting) => {
                let recoloured = self
                    .connecting
                    .apply_server_verdict(&payload.term_definition_pair, payload.answer_correct);
                if recoloured {
                    Step::default().timer(TimerCommand::ScheduleFeedbackClear)
                } else {
                    Step::default()
                }
            }
            None => Step::default(),
        }
    }

    pub fn on_game_end(&mut self, results: Vec<RacePlayerResult>) -> Step {
        info!(players = results.len(), "game over");
        self.final_results = results;
        self.enter_results()
    }

    pub fn clear_feedback(&mut self) {
        self.connecting.clear_feedback();
    }

    // ── Player actions ──────────────────────────────────────────────

    pub fn set_user_response(&mut self, response: String) {
        if self.input_type() == Some(InputType::Writing) {
            self.writing.set_user_response(response);
        }
    }

    pub fn submit_answer(&mut self) -> Step {
        if self.phase != GamePhase::RoundActive || self.input_type() != Some(InputType::Writing) {
            return Step::default();
        }
        match self.writing.submit_answer(self.key.clone()) {
            Some(msg) => Step::default().send(msg),
            None => Step::default(),
        }
    }

    /// Connecting mode: select a visible term. Sends the attempt once a
    /// definition is also selected.
    pub fn select_term(&mut self, term: &str) -> Step {
        if !self.connecting_active() {
            return Step::default();
        }
        let attempt = self.connecting.select_term(term);
        self.attempt_step(attempt)
    }

    /// Connecting mode: select a visible definition.
    pub fn select_definition(&mut self, definition: &str) -> Step {
        if !self.connecting_active() {
            return Step::default();
        }
        let attempt = self.connecting.select_definition(definition);
        self.attempt_step(attempt)
    }

    // ── Internals ───────────────────────────────────────────────────

    fn connecting_active(&self) -> bool {
        self.phase == GamePhase::RoundActive && self.input_type() == Some(InputType::Connecting)
    }

    /// Every attempt goes to the server for scoring, judged locally or not.
    fn attempt_step(&self, attempt: Option<Attempt>) -> Step {
        match attempt {
            Some(attempt) => Step::default()
                .send(ClientMessage::RaceSubmitAnswer {
                    key: self.key.clone(),
                    answer: attempt.pair,
                })
                .timer(TimerCommand::ScheduleFeedbackClear),
            None => Step::default(),
        }
    }

    fn set_phase(&mut self, next: GamePhase) {
        if self.phase != next {
            debug!(from = ?self.phase, to = ?next, "game phase changed");
            self.phase = next;
        }
    }

    fn current_round(&self) -> i32 {
        self.descriptor.as_ref().map_or(0, |d| d.current_round)
    }

    fn prime_round(&mut self) {
        match self.input_type() {
            Some(InputType::Writing) => self.writing.start_round(),
            Some(InputType::Connecting) => self.prime_connecting(),
            None => {}
        }
    }

    fn prime_connecting(&mut self) {
        if self.input_type() != Some(InputType::Connecting) {
            return;
        }
        let round_count = self.descriptor.as_ref().map_or(1, |d| d.round_count);
        let shard = partition(&self.dataset, round_count, self.current_round());
        self.connecting.start_round(shard);
    }

    /// Snapshot received while a round is running.
    fn reconcile_round(&mut self, previous_round: i32) -> Step {
        let round = self.current_round();
        if round != previous_round {
            info!(from = previous_round, to = round, "server is on another round; restarting it");
            self.prime_round();
            return self.activate();
        }
        match self.input_type() {
            Some(InputType::Writing) => match self.writing.resume(self.key.clone()) {
                Some(request) => Step::default().send(request),
                None => Step::default(),
            },
            Some(InputType::Connecting) => {
                self.connecting.forget_pending();
                Step::default()
            }
            None => Step::default(),
        }
    }

    fn activate(&mut self) -> Step {
        self.set_phase(GamePhase::RoundActive);
        match self.input_type() {
            Some(InputType::Writing) => Step::default().send(self.writing.request_term(self.key.clone())),
            _ => Step::default(),
        }
    }

    fn enter_results(&mut self) -> Step {
        self.writing.finish();
        self.connecting.finish();
        self.final_mistakes = Some(self.mistakes());
        self.set_phase(GamePhase::ResultsDisplay);
        Step::default().timer(TimerCommand::CancelCountdown)
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
    use crate::connecting::Feedback;

    fn key() -> GameManipulationKey {
        GameManipulationKey::new("g-1", "u-1")
    }

    fn controller() -> GameController {
        GameController::new(key(), GameConfig::default().with_shuffle_seed(5))
    }

    fn game(input_type: InputType, round_count: i32, current_round: i32) -> RaceGame {
        RaceGame {
            id_game: "g-1".into(),
            name: "Animals".into(),
            term_definition_pairs: (1..=7)
                .map(|n| TermDefinitionPair::new(format!("t{n}"), format!("d{n}")))
                .collect(),
            input_type,
            round_count,
            current_round,
            players: vec![],
        }
    }

    fn round_start(round: i32) -> InterRoundState {
        InterRoundState {
            current_round: round,
            player_results: vec![],
        }
    }

    fn run_countdown(ctl: &mut GameController) -> Step {
        let mut last = Step::default();
        for _ in 0..3 {
            last = ctl.on_countdown_tick();
        }
        last
    }

    #[test]
    fn begin_subscribes_then_requests_game() {
        let step = controller().begin();
        assert_eq!(step.outbound.len(), 2);
        assert!(matches!(step.outbound[0], ClientMessage::SubscriptionPut { .. }));
        assert_eq!(step.outbound[1], ClientMessage::RaceGetGame { key: key() });
    }

    #[test]
    fn finished_game_data_goes_to_results() {
        let mut ctl = controller();
        ctl.on_game_data(game(InputType::Writing, 3, 1));
        assert_eq!(ctl.phase(), GamePhase::RoundActive);

        let step = ctl.on_game_data(game(InputType::Writing, 3, GAME_OVER_ROUND));
        assert_eq!(ctl.phase(), GamePhase::ResultsDisplay);
        assert!(step.timers.contains(&TimerCommand::CancelCountdown));
    }

    #[test]
    fn not_started_game_waits_for_round_start() {
        let mut ctl = controller();
        let step = ctl.on_game_data(game(InputType::Connecting, 3, 0));
        assert!(step.is_empty());
        assert_eq!(ctl.phase(), GamePhase::AwaitingGameData);
    }

    #[test]
    fn writing_round_requests_term_after_countdown() {
        let mut ctl = controller();
        ctl.on_game_data(game(InputType::Writing, 3, 0));

        let step = ctl.on_round_start(round_start(1));
        assert_eq!(step.timers, vec![TimerCommand::StartCountdown]);
        assert_eq!(ctl.phase(), GamePhase::Countdown(3));

        assert!(ctl.on_countdown_tick().outbound.is_empty());
        assert_eq!(ctl.phase(), GamePhase::Countdown(2));
        ctl.on_countdown_tick();
        let step = ctl.on_countdown_tick();
        assert_eq!(ctl.phase(), GamePhase::RoundActive);
        assert_eq!(step.outbound, vec![ClientMessage::RaceNewTerm { key: key() }]);
        assert!(step.timers.contains(&TimerCommand::CancelCountdown));
    }

    #[test]
    fn connecting_round_deals_partition() {
        let mut ctl = controller();
        ctl.on_game_data(game(InputType::Connecting, 3, 0));
        ctl.on_round_start(round_start(2));
        let step = run_countdown(&mut ctl);

        assert!(step.outbound.is_empty());
        let queue = &ctl.connecting().work_queue;
        assert_eq!(
            queue,
            &vec![TermDefinitionPair::new("t4", "d4"), TermDefinitionPair::new("t5", "d5")]
        );
    }

    #[test]
    fn round_start_before_game_data_is_dealt_late() {
        let mut ctl = controller();
        ctl.on_round_start(round_start(1));
        assert_eq!(ctl.phase(), GamePhase::Countdown(3));

        ctl.on_game_data(game(InputType::Connecting, 3, 1));
        assert_eq!(ctl.connecting().work_queue.len(), 3);
        assert_eq!(ctl.phase(), GamePhase::Countdown(3));
    }

    #[test]
    fn resumed_mid_round_connecting_is_active_at_once() {
        let mut ctl = controller();
        let step = ctl.on_game_data(game(InputType::Connecting, 3, 3));
        assert!(step.outbound.is_empty());
        assert_eq!(ctl.phase(), GamePhase::RoundActive);
        assert_eq!(ctl.connecting().work_queue.len(), 2);
    }

    #[test]
    fn connecting_attempt_is_sent_and_feedback_scheduled() {
        let mut ctl = controller();
        ctl.on_game_data(game(InputType::Connecting, 7, 1));
        assert!(ctl.select_term("t1").is_empty());
        let step = ctl.select_definition("d1");

        assert_eq!(
            step.outbound,
            vec![ClientMessage::RaceSubmitAnswer {
                key: key(),
                answer: TermDefinitionPair::new("t1", "d1"),
            }]
        );
        assert_eq!(step.timers, vec![TimerCommand::ScheduleFeedbackClear]);
        assert!(ctl.connecting().round_finished());
    }

    #[test]
    fn writing_flow_through_verdicts() {
        let mut ctl = controller();
        ctl.on_game_data(game(InputType::Writing, 1, 1));
        ctl.on_new_term("t1".into());
        ctl.set_user_response("wrong".into());

        let step = ctl.submit_answer();
        assert_eq!(step.outbound.len(), 1);

        let wrong = SubmitAnswerPayload {
            term_definition_pair: TermDefinitionPair::new("t1", "d1"),
            answer_correct: false,
            end_of_round: false,
            race_game_round_state: Some(RaceRoundPlayerState {
                player_name: "Alice".into(),
                mistake_count: 1,
                percentage_done: 0.0,
            }),
        };
        assert!(ctl.on_answer(&wrong).outbound.is_empty());
        assert_eq!(ctl.writing().correct_definition.as_deref(), Some("d1"));
        assert_eq!(ctl.round_player_state().unwrap().mistake_count, 1);

        ctl.submit_answer();
        let right = SubmitAnswerPayload {
            answer_correct: true,
            ..wrong
        };
        let step = ctl.on_answer(&right);
        assert_eq!(step.outbound, vec![ClientMessage::RaceNewTerm { key: key() }]);
    }

    #[test]
    fn game_end_freezes_results_and_mistakes() {
        let mut ctl = controller();
        ctl.on_game_data(game(InputType::Connecting, 1, 1));
        ctl.select_term("t1");
        ctl.select_definition("d2");

        let results = vec![RacePlayerResult {
            in_game_name: "Alice".into(),
            points: 12,
        }];
        ctl.on_game_end(results.clone());
        assert_eq!(ctl.phase(), GamePhase::ResultsDisplay);
        assert_eq!(ctl.final_results(), results.as_slice());
        assert_eq!(ctl.mistakes().get("t1"), Some(&1));

        // Selections after the end change nothing.
        assert!(ctl.select_term("t1").is_empty());
        assert!(ctl.on_countdown_tick().outbound.is_empty());
    }

    #[test]
    fn snapshot_for_a_later_round_restarts_it() {
        let mut ctl = controller();
        ctl.on_game_data(game(InputType::Connecting, 3, 1));
        assert_eq!(ctl.connecting().work_queue.len(), 3);

        let step = ctl.on_game_data(game(InputType::Connecting, 3, 2));
        assert!(step.is_empty());
        assert_eq!(ctl.phase(), GamePhase::RoundActive);
        assert_eq!(
            ctl.connecting().work_queue,
            vec![TermDefinitionPair::new("t4", "d4"), TermDefinitionPair::new("t5", "d5")]
        );
    }

    #[test]
    fn snapshot_for_the_same_round_keeps_progress() {
        let mut ctl = controller();
        ctl.on_game_data(game(InputType::Writing, 1, 1));
        ctl.on_new_term("t1".into());
        ctl.set_user_response("x".into());
        assert_eq!(ctl.submit_answer().outbound.len(), 1);

        // The verdict was lost with the old connection.
        let step = ctl.on_game_data(game(InputType::Writing, 1, 1));
        assert!(step.outbound.is_empty());
        assert_eq!(ctl.writing().current_term.as_deref(), Some("t1"));
        assert_eq!(ctl.submit_answer().outbound.len(), 1);
    }

    #[test]
    fn snapshot_after_the_end_shows_results_mid_round() {
        let mut ctl = controller();
        ctl.on_game_data(game(InputType::Writing, 2, 1));
        let step = ctl.on_game_data(game(InputType::Writing, 2, GAME_OVER_ROUND));
        assert_eq!(ctl.phase(), GamePhase::ResultsDisplay);
        assert!(step.outbound.is_empty());
    }

    #[test]
    fn stale_connecting_verdict_does_not_recolour() {
        let mut ctl = controller();
        ctl.on_game_data(game(InputType::Connecting, 1, 1));
        ctl.select_term("t1");
        ctl.select_definition("d1");
        ctl.select_term("t2");
        ctl.select_definition("d3");

        let stale = SubmitAnswerPayload {
            term_definition_pair: TermDefinitionPair::new("t1", "d1"),
            answer_correct: true,
            end_of_round: false,
            race_game_round_state: None,
        };
        assert!(ctl.on_answer(&stale).is_empty());
        assert_eq!(ctl.connecting().feedback, Some(Feedback::Incorrect));
    }

    #[test]
    fn new_term_outside_round_is_ignored() {
        let mut ctl = controller();
        ctl.on_game_data(game(InputType::Writing, 3, 0));
        ctl.on_new_term("t1".into());
        assert_eq!(ctl.writing().current_term, None);
    }
}
