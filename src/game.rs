//! Running game session.
//!
//! [`GameSession`] wires a [`GameController`] to a [`SessionContext`]: it
//! registers the race handlers on the session's router, runs the countdown
//! and feedback timers, sends whatever the controller asks for, and publishes
//! every piece of game state through `watch` channels for the UI.
//!
//! All state lives in one task. Server pushes and player actions are both
//! turned into events on the same channel, so they are applied strictly in
//! the order they arrive.
//!
//! Whenever the connection reopens, the subscription and the snapshot request
//! are sent again; the fresh snapshot is reconciled by the controller.
//!
//! Dropping the session (or calling [`shutdown`](GameSession::shutdown))
//! unregisters its handlers and cancels any pending countdown.

use std::time::Duration;

use tokio::sync::{mpsc, oneshot, watch};
use tokio::task::JoinHandle;
use tokio::time::Instant;
use tracing::{debug, warn};

use crate::config::GameConfig;
use crate::connecting::ConnectingRoundState;
use crate::connection::Outbox;
use crate::error::{RaceError, Result};
use crate::lifecycle::{GameController, GamePhase, GameSessionDescriptor, Step, TimerCommand};
use crate::protocol::{
    InterRoundState, MessageType, NewTermPayload, RaceEndPayload, RaceGame, RaceGamePayload,
    RacePlayerResult, RaceRoundPlayerState, RoundStartPayload, SubmitAnswerPayload,
};
use crate::router::{Registration, Router};
use crate::session::{Resync, SessionContext};
use crate::writing::{MistakeTally, WritingRoundState};

enum Event {
    GameData(Box<RaceGame>),
    RoundStart(InterRoundState),
    NewTerm(String),
    Answer(SubmitAnswerPayload),
    End(Vec<RacePlayerResult>),
    UserResponse(String),
    Submit,
    SelectTerm(String),
    SelectDefinition(String),
}

// ── Published state ─────────────────────────────────────────────────

struct Cells {
    phase: watch::Sender<GamePhase>,
    descriptor: watch::Sender<Option<GameSessionDescriptor>>,
    writing: watch::Sender<WritingRoundState>,
    connecting: watch::Sender<ConnectingRoundState>,
    inter_round_results: watch::Sender<Vec<RacePlayerResult>>,
    final_results: watch::Sender<Vec<RacePlayerResult>>,
    round_player_state: watch::Sender<Option<RaceRoundPlayerState>>,
    mistakes: watch::Sender<MistakeTally>,
}

/// Read side of [`Cells`], kept by the handle.
#[derive(Clone)]
struct Views {
    phase: watch::Receiver<GamePhase>,
    descriptor: watch::Receiver<Option<GameSessionDescriptor>>,
    writing: watch::Receiver<WritingRoundState>,
    connecting: watch::Receiver<ConnectingRoundState>,
    inter_round_results: watch::Receiver<Vec<RacePlayerResult>>,
    final_results: watch::Receiver<Vec<RacePlayerResult>>,
    round_player_state: watch::Receiver<Option<RaceRoundPlayerState>>,
    mistakes: watch::Receiver<MistakeTally>,
}

fn cells() -> (Cells, Views) {
    let (phase, phase_rx) = watch::channel(GamePhase::default());
    let (descriptor, descriptor_rx) = watch::channel(None);
    let (writing, writing_rx) = watch::channel(WritingRoundState::default());
    let (connecting, connecting_rx) = watch::channel(ConnectingRoundState::default());
    let (inter_round_results, inter_rx) = watch::channel(Vec::new());
    let (final_results, final_rx) = watch::channel(Vec::new());
    let (round_player_state, round_rx) = watch::channel(None);
    let (mistakes, mistakes_rx) = watch::channel(MistakeTally::new());
    (
        Cells {
            phase,
            descriptor,
            writing,
            connecting,
            inter_round_results,
            final_results,
            round_player_state,
            mistakes,
        },
        Views {
            phase: phase_rx,
            descriptor: descriptor_rx,
            writing: writing_rx,
            connecting: connecting_rx,
            inter_round_results: inter_rx,
            final_results: final_rx,
            round_player_state: round_rx,
            mistakes: mistakes_rx,
        },
    )
}

/// Replace the cell's value only if it changed, so readers wake on real changes.
fn publish<T: PartialEq>(cell: &watch::Sender<T>, value: T) {
    cell.send_if_modified(|current| {
        if *current == value {
            false
        } else {
            *current = value;
            true
        }
    });
}

impl Cells {
    fn publish(&self, ctl: &GameController) {
        publish(&self.phase, ctl.phase());
        publish(&self.descriptor, ctl.descriptor().cloned());
        publish(&self.writing, ctl.writing().clone());
        publish(&self.connecting, ctl.connecting().clone());
        publish(&self.inter_round_results, ctl.inter_round_results().to_vec());
        publish(&self.final_results, ctl.final_results().to_vec());
        publish(&self.round_player_state, ctl.round_player_state().cloned());
        publish(&self.mistakes, ctl.mistakes());
    }
}

// ── Handle ──────────────────────────────────────────────────────────

/// A game in progress, scoped to one [`SessionContext`].
pub struct GameSession {
    event_tx: mpsc::UnboundedSender<Event>,
    views: Views,
    registrations: Vec<Registration>,
    resync: Option<Resync>,
    task: Option<JoinHandle<()>>,
    shutdown_tx: Option<oneshot::Sender<()>>,
    shutdown_timeout: Duration,
}

impl GameSession {
    /// Register the race handlers, subscribe to the game and request its data.
    ///
    /// # Errors
    ///
    /// Returns [`RaceError::NoGameKey`] if the session does not know both the
    /// game id and the user id yet.
    pub fn start(session: &SessionContext, config: GameConfig) -> Result<Self> {
        let key = session.game_key()?;
        let (event_tx, event_rx) = mpsc::unbounded_channel();
        let router = session.router();

        let registrations = vec![
            forward(router, MessageType::RaceGetGame, &event_tx, |p: RaceGamePayload| {
                Event::GameData(Box::new(p.game))
            }),
            forward(router, MessageType::RaceRoundStart, &event_tx, |p: RoundStartPayload| {
                Event::RoundStart(p.race_game_inter_round_state)
            }),
            forward(router, MessageType::RaceNewTerm, &event_tx, |p: NewTermPayload| {
                Event::NewTerm(p.term)
            }),
            forward(router, MessageType::RaceSubmitAnswer, &event_tx, Event::Answer),
            forward(router, MessageType::RaceEnd, &event_tx, |p: RaceEndPayload| {
                Event::End(p.race_player_results)
            }),
        ];

        let controller = GameController::new(key, config.clone());
        let resync = session.resync_on_reconnect(controller.begin().outbound);

        let (cells, views) = cells();
        let (shutdown_tx, shutdown_rx) = oneshot::channel();
        let actor = GameActor {
            controller,
            outbox: session.outbox(),
            cells,
            countdown_tick: config.countdown_tick,
            feedback_duration: config.feedback_duration,
            countdown_at: None,
            feedback_at: None,
        };
        let task = tokio::spawn(actor.run(event_rx, shutdown_rx));

        Ok(Self {
            event_tx,
            views,
            registrations,
            resync: Some(resync),
            task: Some(task),
            shutdown_tx: Some(shutdown_tx),
            shutdown_timeout: session.shutdown_timeout(),
        })
    }

    fn push(&self, event: Event) -> Result<()> {
        self.event_tx.send(event).map_err(|_| RaceError::NotConnected)
    }

    /// Update the typed Writing-mode answer.
    ///
    /// # Errors
    ///
    /// Returns [`RaceError::NotConnected`] once the session has shut down.
    pub fn set_user_response(&self, response: impl Into<String>) -> Result<()> {
        self.push(Event::UserResponse(response.into()))
    }

    /// Submit the typed answer for the current term.
    ///
    /// Ignored while no term is shown or an earlier answer is still being judged.
    ///
    /// # Errors
    ///
    /// Returns [`RaceError::NotConnected`] once the session has shut down.
    pub fn submit_answer(&self) -> Result<()> {
        self.push(Event::Submit)
    }

    /// Select a visible term in Connecting mode.
    ///
    /// # Errors
    ///
    /// Returns [`RaceError::NotConnected`] once the session has shut down.
    pub fn select_term(&self, term: impl Into<String>) -> Result<()> {
        self.push(Event::SelectTerm(term.into()))
    }

    /// Select a visible definition in Connecting mode.
    ///
    /// # Errors
    ///
    /// Returns [`RaceError::NotConnected`] once the session has shut down.
    pub fn select_definition(&self, definition: impl Into<String>) -> Result<()> {
        self.push(Event::SelectDefinition(definition.into()))
    }

    // ── Views ───────────────────────────────────────────────────────

    /// Phase, including the countdown value.
    pub fn phase(&self) -> watch::Receiver<GamePhase> {
        self.views.phase.clone()
    }

    pub fn descriptor(&self) -> watch::Receiver<Option<GameSessionDescriptor>> {
        self.views.descriptor.clone()
    }

    pub fn writing(&self) -> watch::Receiver<WritingRoundState> {
        self.views.writing.clone()
    }

    pub fn connecting(&self) -> watch::Receiver<ConnectingRoundState> {
        self.views.connecting.clone()
    }

    /// Standings carried by the latest round start.
    pub fn inter_round_results(&self) -> watch::Receiver<Vec<RacePlayerResult>> {
        self.views.inter_round_results.clone()
    }

    pub fn final_results(&self) -> watch::Receiver<Vec<RacePlayerResult>> {
        self.views.final_results.clone()
    }

    /// This player's progress as last reported with an answer verdict.
    pub fn round_player_state(&self) -> watch::Receiver<Option<RaceRoundPlayerState>> {
        self.views.round_player_state.clone()
    }

    /// Mistakes per term over the whole game, both modes merged.
    pub fn mistakes(&self) -> watch::Receiver<MistakeTally> {
        self.views.mistakes.clone()
    }

    /// Unregister handlers and stop the session task.
    pub async fn shutdown(&mut self) {
        debug!("game session shutdown requested");
        self.registrations.clear();
        self.resync = None;

        if let Some(tx) = self.shutdown_tx.take() {
            let _ = tx.send(());
        }
        if let Some(mut task) = self.task.take() {
            if tokio::time::timeout(self.shutdown_timeout, &mut task).await.is_err() {
                warn!("game session task did not exit within timeout; aborting task");
                task.abort();
            }
        }
    }
}

impl std::fmt::Debug for GameSession {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("GameSession")
            .field("phase", &*self.views.phase.borrow())
            .field("handlers", &self.registrations.len())
            .field("has_task", &self.task.is_some())
            .finish()
    }
}

impl Drop for GameSession {
    fn drop(&mut self) {
        self.registrations.clear();
        if let Some(task) = self.task.take() {
            task.abort();
        }
    }
}

fn forward<T, F>(
    router: &Router,
    kind: MessageType,
    event_tx: &mpsc::UnboundedSender<Event>,
    wrap: F,
) -> Registration
where
    T: serde::de::DeserializeOwned,
    F: Fn(T) -> Event + Send + 'static,
{
    let tx = event_tx.clone();
    router.register_decoded(kind, move |payload: T| {
        if tx.send(wrap(payload)).is_err() {
            debug!(%kind, "game session gone; push discarded");
        }
    })
}

// ── Actor ───────────────────────────────────────────────────────────

struct GameActor {
    controller: GameController,
    outbox: Outbox,
    cells: Cells,
    countdown_tick: Duration,
    feedback_duration: Duration,
    countdown_at: Option<Instant>,
    feedback_at: Option<Instant>,
}

impl GameActor {
    async fn run(
        mut self,
        mut event_rx: mpsc::UnboundedReceiver<Event>,
        mut shutdown_rx: oneshot::Receiver<()>,
    ) {
        debug!("game session task started");
        let begin = self.controller.begin();
        self.apply(begin);

        loop {
            tokio::select! {
                event = event_rx.recv() => match event {
                    Some(event) => {
                        let step = self.handle(event);
                        self.apply(step);
                    }
                    None => break,
                },

                _ = &mut shutdown_rx => break,

                () = wait_until(self.countdown_at) => {
                    self.countdown_at = self.countdown_at.map(|at| at + self.countdown_tick);
                    let step = self.controller.on_countdown_tick();
                    self.apply(step);
                }

                () = wait_until(self.feedback_at) => {
                    self.feedback_at = None;
                    self.controller.clear_feedback();
                    self.cells.publish(&self.controller);
                }
            }
        }

        debug!("game session task exited");
    }

    fn handle(&mut self, event: Event) -> Step {
        let ctl = &mut self.controller;
        match event {
            Event::GameData(game) => ctl.on_game_data(*game),
            Event::RoundStart(state) => ctl.on_round_start(state),
            Event::NewTerm(term) => ctl.on_new_term(term),
            Event::Answer(payload) => ctl.on_answer(&payload),
            Event::End(results) => ctl.on_game_end(results),
            Event::UserResponse(response) => {
                ctl.set_user_response(response);
                Step::default()
            }
            Event::Submit => ctl.submit_answer(),
            Event::SelectTerm(term) => ctl.select_term(&term),
            Event::SelectDefinition(definition) => ctl.select_definition(&definition),
        }
    }

    fn apply(&mut self, step: Step) {
        for timer in step.timers {
            match timer {
                TimerCommand::StartCountdown => {
                    self.countdown_at = Some(Instant::now() + self.countdown_tick);
                }
                TimerCommand::CancelCountdown => self.countdown_at = None,
                TimerCommand::ScheduleFeedbackClear => {
                    self.feedback_at = Some(Instant::now() + self.feedback_duration);
                }
            }
        }
        for msg in &step.outbound {
            if let Err(e) = self.outbox.send(msg) {
                warn!(kind = %msg.message_type(), error = %e, "could not queue message");
            }
        }
        self.cells.publish(&self.controller);
    }
}

async fn wait_until(deadline: Option<Instant>) {
    match deadline {
        Some(at) => tokio::time::sleep_until(at).await,
        None => std::future::pending().await,
    }
}
