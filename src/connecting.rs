//! Connecting mode: match terms to definitions from a small visible window.
//!
//! The work queue is the authoritative set of unmatched pairs for the round.
//! Only its first `max_visible` entries are shown, with terms and definitions
//! shuffled independently so a term's position says nothing about where its
//! definition is.
//!
//! Attempts are judged locally and mutate the queue at once. The server's
//! verdict for the same attempt only colours the feedback; if the two
//! disagree the local queue stands and the disagreement is logged.
//!
//! Several attempts may be awaiting a verdict at once. They are kept in
//! submission order and each verdict is matched to its attempt by the echoed
//! pair; only the verdict for the newest attempt changes the feedback.

use std::collections::VecDeque;

use rand::rngs::StdRng;
use rand::seq::SliceRandom;
use rand::SeedableRng;
use tracing::{debug, warn};

use crate::protocol::TermDefinitionPair;
use crate::writing::{merge_mistakes, MistakeTally};

/// Where a Connecting round stands.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum ConnectingPhase {
    /// No pairs dealt yet.
    #[default]
    Loading,
    /// Selections are accepted.
    Active,
    /// Every pair was matched, or the game ended.
    RoundComplete,
}

/// Transient colouring after an attempt.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Feedback {
    Correct,
    Incorrect,
}

impl Feedback {
    fn from_correct(correct: bool) -> Self {
        if correct {
            Self::Correct
        } else {
            Self::Incorrect
        }
    }
}

/// Pending selection; an attempt is made once both halves are set.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Selection {
    pub term: Option<String>,
    pub definition: Option<String>,
}

/// One evaluated term/definition pairing.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Attempt {
    pub pair: TermDefinitionPair,
    pub correct: bool,
}

/// Observable state of the current Connecting round.
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct ConnectingRoundState {
    pub phase: ConnectingPhase,
    pub work_queue: Vec<TermDefinitionPair>,
    pub visible_terms: Vec<String>,
    pub visible_definitions: Vec<String>,
    pub connected_count: u32,
    pub mistake_count: u32,
    pub selection: Selection,
    pub feedback: Option<Feedback>,
    /// Pairs dealt at round start.
    pub total_pairs: usize,
    pub results: Vec<Attempt>,
    pub mistake_tally: MistakeTally,
}

impl ConnectingRoundState {
    /// `true` once the work queue is empty or the game has ended.
    pub fn round_finished(&self) -> bool {
        self.phase == ConnectingPhase::RoundComplete
    }
}

/// Connecting-mode round engine.
///
/// Owns the work queue and the display shuffle; [`state`](Self::state) is
/// what gets published to the UI.
#[derive(Debug)]
pub struct ConnectingEngine {
    max_visible: usize,
    rng: StdRng,
    state: ConnectingRoundState,
    /// Attempts sent to the server and not yet answered, oldest first.
    in_flight: VecDeque<Attempt>,
    earlier_rounds: MistakeTally,
}

impl ConnectingEngine {
    /// Engine showing at most `max_visible` pairs (clamped to at least 1).
    pub fn new(max_visible: usize) -> Self {
        Self::with_rng(max_visible, StdRng::from_entropy())
    }

    /// Same as [`new`](Self::new) with a reproducible shuffle.
    pub fn with_seed(max_visible: usize, seed: u64) -> Self {
        Self::with_rng(max_visible, StdRng::seed_from_u64(seed))
    }

    fn with_rng(max_visible: usize, rng: StdRng) -> Self {
        Self {
            max_visible: max_visible.max(1),
            rng,
            state: ConnectingRoundState::default(),
            in_flight: VecDeque::new(),
            earlier_rounds: MistakeTally::new(),
        }
    }

    pub fn state(&self) -> &ConnectingRoundState {
        &self.state
    }

    /// Attempts still waiting for the server's verdict.
    pub fn pending_verdicts(&self) -> usize {
        self.in_flight.len()
    }

    /// Deal `pairs` (already cut to this round) into a fresh work queue.
    pub fn start_round(&mut self, pairs: &[TermDefinitionPair]) {
        let previous = std::mem::take(&mut self.state);
        merge_mistakes(&mut self.earlier_rounds, &previous.mistake_tally);
        self.in_flight.clear();

        self.state.work_queue = pairs.to_vec();
        self.state.total_pairs = pairs.len();
        self.state.phase = if pairs.is_empty() {
            ConnectingPhase::RoundComplete
        } else {
            ConnectingPhase::Active
        };
        self.refresh_window();
        debug!(pairs = pairs.len(), "connecting round started");
    }

    /// Select a visible term.
    ///
    /// Returns the evaluated [`Attempt`] when a definition was already
    /// selected. Values that are not visible, or any selection outside an
    /// active round, are ignored.
    pub fn select_term(&mut self, term: &str) -> Option<Attempt> {
        if !self.accepts(&self.state.visible_terms, term) {
            return None;
        }
        self.state.selection.term = Some(term.to_owned());
        self.try_attempt()
    }

    /// Select a visible definition. See [`select_term`](Self::select_term).
    pub fn select_definition(&mut self, definition: &str) -> Option<Attempt> {
        if !self.accepts(&self.state.visible_definitions, definition) {
            return None;
        }
        self.state.selection.definition = Some(definition.to_owned());
        self.try_attempt()
    }

    fn accepts(&self, visible: &[String], value: &str) -> bool {
        if self.state.phase != ConnectingPhase::Active {
            debug!(phase = ?self.state.phase, "selection ignored outside an active round");
            return false;
        }
        if !visible.iter().any(|v| v == value) {
            debug!(value, "selection ignored: not visible");
            return false;
        }
        true
    }

    fn try_attempt(&mut self) -> Option<Attempt> {
        let (Some(term), Some(definition)) =
            (&self.state.selection.term, &self.state.selection.definition)
        else {
            return None;
        };
        let pair = TermDefinitionPair::new(term.clone(), definition.clone());
        self.state.selection = Selection::default();
        Some(self.evaluate(pair))
    }

    fn evaluate(&mut self, pair: TermDefinitionPair) -> Attempt {
        let state = &mut self.state;
        let correct = match state.work_queue.iter().position(|p| *p == pair) {
            Some(index) => {
                state.work_queue.remove(index);
                state.connected_count += 1;
                true
            }
            None => {
                state.work_queue.push(pair.clone());
                state.mistake_count += 1;
                *state.mistake_tally.entry(pair.term.clone()).or_insert(0) += 1;
                false
            }
        };
        state.feedback = Some(Feedback::from_correct(correct));
        let attempt = Attempt { pair, correct };
        state.results.push(attempt.clone());
        self.in_flight.push_back(attempt.clone());

        if state.work_queue.is_empty() {
            state.phase = ConnectingPhase::RoundComplete;
            debug!(
                connected = state.connected_count,
                mistakes = state.mistake_count,
                "connecting round complete"
            );
        }
        self.refresh_window();
        attempt
    }

    fn refresh_window(&mut self) {
        let window = self
            .state
            .work_queue
            .get(..self.max_visible.min(self.state.work_queue.len()))
            .unwrap_or_default();
        let mut terms: Vec<String> = window.iter().map(|p| p.term.clone()).collect();
        let mut definitions: Vec<String> = window.iter().map(|p| p.definition.clone()).collect();
        terms.shuffle(&mut self.rng);
        definitions.shuffle(&mut self.rng);
        self.state.visible_terms = terms;
        self.state.visible_definitions = definitions;
    }

    /// Match the server's verdict for `pair` to its in-flight attempt.
    ///
    /// Older attempts still waiting ahead of it are taken as answered. The
    /// queue is never touched; the feedback is recoloured only when the
    /// verdict belongs to the newest attempt. Returns whether it was.
    pub fn apply_server_verdict(&mut self, pair: &TermDefinitionPair, correct: bool) -> bool {
        let Some(index) = self.in_flight.iter().position(|a| a.pair == *pair) else {
            debug!(term = %pair.term, "verdict for no pending attempt; ignored");
            return false;
        };
        let Some(local) = self.in_flight.drain(..=index).last() else {
            return false;
        };
        if local.correct != correct {
            warn!(
                term = %local.pair.term,
                local = local.correct,
                server = correct,
                "server verdict disagrees with local judgement; keeping local queue"
            );
        }
        if !self.in_flight.is_empty() {
            debug!(pending = self.in_flight.len(), "verdict for an older attempt");
            return false;
        }
        self.state.feedback = Some(Feedback::from_correct(correct));
        true
    }

    /// Give up on verdicts that will not arrive, e.g. after a reconnect.
    pub fn forget_pending(&mut self) {
        if !self.in_flight.is_empty() {
            debug!(count = self.in_flight.len(), "forgetting unanswered attempts");
            self.in_flight.clear();
        }
    }

    /// Drop the transient feedback colouring.
    pub fn clear_feedback(&mut self) {
        self.state.feedback = None;
    }

    /// Stop accepting selections.
    pub fn finish(&mut self) {
        self.state.selection = Selection::default();
        self.in_flight.clear();
        if self.state.phase == ConnectingPhase::Active {
            self.state.phase = ConnectingPhase::RoundComplete;
        }
    }

    /// All mistakes made this game, current round included.
    pub fn mistakes(&self) -> MistakeTally {
        let mut all = self.earlier_rounds.clone();
        merge_mistakes(&mut all, &self.state.mistake_tally);
        all
    }
}
