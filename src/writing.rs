//! Writing mode: one term at a time, typed answers, server-judged.
//!
//! The engine never judges an answer itself. It builds the outbound requests
//! and folds the server's verdicts into [`WritingRoundState`]; the caller sends
//! whatever messages the engine hands back.

use std::collections::BTreeMap;

use tracing::debug;

use crate::protocol::{ClientMessage, GameManipulationKey, SubmitAnswerPayload, TermDefinitionPair};

/// Mistake count per term.
pub type MistakeTally = BTreeMap<String, u32>;

/// Add every count in `from` to `into`.
pub fn merge_mistakes(into: &mut MistakeTally, from: &MistakeTally) {
    for (term, count) in from {
        *into.entry(term.clone()).or_insert(0) += count;
    }
}

/// Where the Writing round stands.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum WritingPhase {
    /// No round started yet.
    #[default]
    Idle,
    /// A term has been requested and not yet received.
    AwaitingTerm,
    /// A term is shown and the player is typing.
    Answering,
    /// The round (or game) is over; only a new round leaves this phase.
    Finished,
}

/// Observable state of the current Writing round.
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct WritingRoundState {
    pub phase: WritingPhase,
    pub current_term: Option<String>,
    pub user_response: String,
    pub last_answer_correct: bool,
    pub is_wrong_answer: bool,
    /// Definition the server sent back after a wrong answer.
    pub correct_definition: Option<String>,
    /// Set between `submit_answer` and the verdict; further submits are refused.
    pub awaiting_verdict: bool,
    pub mistake_tally: MistakeTally,
}

/// Writing-mode round engine.
///
/// Pure state: every method that needs the server returns the message to
/// send instead of sending it.
#[derive(Debug, Default)]
pub struct WritingEngine {
    state: WritingRoundState,
    earlier_rounds: MistakeTally,
}

impl WritingEngine {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn state(&self) -> &WritingRoundState {
        &self.state
    }

    /// Reset for a new round, keeping earlier rounds' mistakes.
    pub fn start_round(&mut self) {
        let previous = std::mem::take(&mut self.state);
        merge_mistakes(&mut self.earlier_rounds, &previous.mistake_tally);
        debug!("writing round started");
    }

    /// Build the request for the next term.
    pub fn request_term(&mut self, key: GameManipulationKey) -> ClientMessage {
        self.state.phase = WritingPhase::AwaitingTerm;
        ClientMessage::RaceNewTerm { key }
    }

    /// Show `term` with an empty response and no verdict.
    pub fn set_current_term(&mut self, term: impl Into<String>) {
        let state = &mut self.state;
        state.current_term = Some(term.into());
        state.user_response.clear();
        state.last_answer_correct = false;
        state.is_wrong_answer = false;
        state.correct_definition = None;
        state.awaiting_verdict = false;
        state.phase = WritingPhase::Answering;
    }

    /// Replace the typed answer.
    pub fn set_user_response(&mut self, response: impl Into<String>) {
        self.state.user_response = response.into();
    }

    /// Build the submission for the current term and typed response.
    ///
    /// Returns `None` when there is nothing to submit: no term, the round is
    /// not in the answering phase, or an earlier submission is still unanswered.
    pub fn submit_answer(&mut self, key: GameManipulationKey) -> Option<ClientMessage> {
        if self.state.phase != WritingPhase::Answering || self.state.awaiting_verdict {
            debug!(phase = ?self.state.phase, "submit ignored");
            return None;
        }
        let term = self.state.current_term.clone()?;
        self.state.awaiting_verdict = true;
        Some(ClientMessage::RaceSubmitAnswer {
            key,
            answer: TermDefinitionPair::new(term, self.state.user_response.clone()),
        })
    }

    /// Record a verdict for the current term.
    ///
    /// A wrong answer shows `correct_definition` in place of the response and
    /// counts a mistake against the term.
    pub fn set_answer_result(&mut self, correct: bool, correct_definition: Option<String>) {
        let state = &mut self.state;
        state.awaiting_verdict = false;
        state.last_answer_correct = correct;
        state.is_wrong_answer = !correct;
        if correct {
            state.correct_definition = None;
            return;
        }
        if let Some(definition) = &correct_definition {
            state.user_response.clone_from(definition);
        }
        state.correct_definition = correct_definition;
        if let Some(term) = &state.current_term {
            *state.mistake_tally.entry(term.clone()).or_insert(0) += 1;
        }
    }

    /// Fold a server verdict into the state.
    ///
    /// Returns the next-term request when the answer was correct and the round
    /// goes on.
    pub fn apply_answer(
        &mut self,
        payload: &SubmitAnswerPayload,
        key: GameManipulationKey,
    ) -> Option<ClientMessage> {
        let echoed = &payload.term_definition_pair;
        if self.state.current_term.as_deref() != Some(echoed.term.as_str()) {
            debug!(term = %echoed.term, "verdict for a term that is not current");
        }
        self.set_answer_result(payload.answer_correct, Some(echoed.definition.clone()));

        if !payload.answer_correct {
            return None;
        }
        if payload.end_of_round {
            self.state.phase = WritingPhase::Finished;
            return None;
        }
        Some(self.request_term(key))
    }

    /// End the round; submits are refused until the next one starts.
    pub fn finish(&mut self) {
        self.state.phase = WritingPhase::Finished;
        self.state.awaiting_verdict = false;
    }

    /// Pick the round back up after the connection was lost.
    ///
    /// A pending verdict is given up so the player can submit again. Returns
    /// the term request to repeat when a term was asked for and never arrived.
    pub fn resume(&mut self, key: GameManipulationKey) -> Option<ClientMessage> {
        if self.state.awaiting_verdict {
            debug!("verdict lost; submit re-enabled");
            self.state.awaiting_verdict = false;
        }
        (self.state.phase == WritingPhase::AwaitingTerm).then(|| self.request_term(key))
    }

    /// All mistakes made this game, current round included.
    pub fn mistakes(&self) -> MistakeTally {
        let mut all = self.earlier_rounds.clone();
        merge_mistakes(&mut all, &self.state.mistake_tally);
        all
    }
}
