use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::analysis_state::StageId;

/// Which of the two debates a [`DebateState`] belongs to.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash)]
#[serde(rename_all = "snake_case")]
pub enum DebateKind {
    /// Bull vs bear researchers, judged by the research manager.
    Research,
    /// Risky vs safe vs neutral analysts, judged by the risk manager.
    Risk,
}

impl DebateKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            DebateKind::Research => "research",
            DebateKind::Risk => "risk",
        }
    }
}

impl std::fmt::Display for DebateKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// A debate participant.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash)]
#[serde(rename_all = "snake_case")]
pub enum Speaker {
    Bull,
    Bear,
    Risky,
    Safe,
    Neutral,
}

impl Speaker {
    pub fn label(&self) -> &'static str {
        match self {
            Speaker::Bull => "Bull Analyst",
            Speaker::Bear => "Bear Analyst",
            Speaker::Risky => "Risky Analyst",
            Speaker::Safe => "Safe Analyst",
            Speaker::Neutral => "Neutral Analyst",
        }
    }

    pub fn stage(&self) -> StageId {
        match self {
            Speaker::Bull => StageId::BullResearcher,
            Speaker::Bear => StageId::BearResearcher,
            Speaker::Risky => StageId::RiskyAnalyst,
            Speaker::Safe => StageId::SafeAnalyst,
            Speaker::Neutral => StageId::NeutralAnalyst,
        }
    }
}

/// One contribution to a debate.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct DebateTurn {
    /// 1-based round this turn belongs to. Assigned on commit.
    pub round: u32,
    pub speaker: Speaker,
    pub text: String,
    pub timestamp: DateTime<Utc>,
}

impl DebateTurn {
    pub fn new(speaker: Speaker, text: impl Into<String>) -> Self {
        Self {
            round: 0,
            speaker,
            text: text.into(),
            timestamp: Utc::now(),
        }
    }
}

#[derive(Error, Debug, Clone, PartialEq)]
pub enum DebateError {
    #[error("round bound reached: {max_rounds} rounds already committed")]
    RoundLimit { max_rounds: u32 },

    #[error("a round must contain at least one turn")]
    EmptyRound,

    #[error("judge decision already recorded")]
    AlreadyJudged,

    #[error("judge invoked before the debate finished (round {round_count} of {max_rounds})")]
    JudgeTooEarly { round_count: u32, max_rounds: u32 },

    #[error("turn tagged round {round} does not follow the committed rounds (round_count {round_count})")]
    MisnumberedTurn { round: u32, round_count: u32 },
}

/// History and bookkeeping for one debate.
///
/// Fields are private: `round_count` only moves through [`DebateState::commit_round`], which
/// refuses to pass `max_rounds`, and the judge decision can be recorded once. Deserialized
/// values are checked against the same rules.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(try_from = "DebateRecord")]
pub struct DebateState {
    kind: DebateKind,
    history: Vec<DebateTurn>,
    round_count: u32,
    max_rounds: u32,
    judge_decision: Option<String>,
    consensus_reached: bool,
    last_quality_score: Option<Decimal>,
    truncated: bool,
}

/// Wire form of [`DebateState`], validated on the way in.
#[derive(Deserialize)]
struct DebateRecord {
    kind: DebateKind,
    history: Vec<DebateTurn>,
    round_count: u32,
    max_rounds: u32,
    judge_decision: Option<String>,
    consensus_reached: bool,
    last_quality_score: Option<Decimal>,
    truncated: bool,
}

impl TryFrom<DebateRecord> for DebateState {
    type Error = DebateError;

    fn try_from(record: DebateRecord) -> Result<Self, Self::Error> {
        if record.round_count > record.max_rounds {
            return Err(DebateError::RoundLimit {
                max_rounds: record.max_rounds,
            });
        }

        // Turns run 1..=round_count in order, with no round left empty.
        let mut current = 0;
        for turn in &record.history {
            if turn.round == 0 || (turn.round != current && turn.round != current + 1) {
                return Err(DebateError::MisnumberedTurn {
                    round: turn.round,
                    round_count: record.round_count,
                });
            }
            current = turn.round;
        }
        if current != record.round_count {
            return Err(DebateError::MisnumberedTurn {
                round: current,
                round_count: record.round_count,
            });
        }

        let debate = Self {
            kind: record.kind,
            history: record.history,
            round_count: record.round_count,
            max_rounds: record.max_rounds,
            judge_decision: record.judge_decision,
            consensus_reached: record.consensus_reached,
            last_quality_score: record.last_quality_score,
            truncated: record.truncated,
        };
        if debate.judge_decision.is_some()
            && !(debate.rounds_exhausted() || debate.consensus_reached || debate.truncated)
        {
            return Err(DebateError::JudgeTooEarly {
                round_count: debate.round_count,
                max_rounds: debate.max_rounds,
            });
        }
        Ok(debate)
    }
}

impl DebateState {
    pub fn new(kind: DebateKind, max_rounds: u32) -> Self {
        Self {
            kind,
            history: Vec::new(),
            round_count: 0,
            max_rounds,
            judge_decision: None,
            consensus_reached: false,
            last_quality_score: None,
            truncated: false,
        }
    }

    pub fn kind(&self) -> DebateKind {
        self.kind
    }

    pub fn history(&self) -> &[DebateTurn] {
        &self.history
    }

    pub fn round_count(&self) -> u32 {
        self.round_count
    }

    pub fn max_rounds(&self) -> u32 {
        self.max_rounds
    }

    pub fn judge_decision(&self) -> Option<&str> {
        self.judge_decision.as_deref()
    }

    pub fn consensus_reached(&self) -> bool {
        self.consensus_reached
    }

    pub fn last_quality_score(&self) -> Option<Decimal> {
        self.last_quality_score
    }

    pub fn truncated(&self) -> bool {
        self.truncated
    }

    pub fn rounds_exhausted(&self) -> bool {
        self.round_count >= self.max_rounds
    }

    /// Turns of the most recently committed round.
    pub fn last_round(&self) -> &[DebateTurn] {
        let start = self
            .history
            .iter()
            .rposition(|t| t.round != self.round_count)
            .map(|i| i + 1)
            .unwrap_or(0);
        &self.history[start..]
    }

    /// Atomically append one full round of turns and advance the round counter.
    pub fn commit_round(&mut self, turns: Vec<DebateTurn>) -> Result<u32, DebateError> {
        if self.rounds_exhausted() {
            return Err(DebateError::RoundLimit {
                max_rounds: self.max_rounds,
            });
        }
        if turns.is_empty() {
            return Err(DebateError::EmptyRound);
        }
        if self.judge_decision.is_some() {
            return Err(DebateError::AlreadyJudged);
        }

        let round = self.round_count + 1;
        self.history.extend(turns.into_iter().map(|mut t| {
            t.round = round;
            t
        }));
        self.round_count = round;
        Ok(round)
    }

    pub fn record_quality(&mut self, score: Decimal) {
        self.last_quality_score = Some(score);
    }

    pub fn mark_consensus(&mut self) {
        self.consensus_reached = true;
    }

    /// Mark the debate as cut short by a failed participant.
    pub fn mark_truncated(&mut self) {
        self.truncated = true;
    }

    /// Record the judge's ruling. Allowed once, and only after the debate has ended.
    pub fn record_judgement(&mut self, decision: impl Into<String>) -> Result<(), DebateError> {
        if self.judge_decision.is_some() {
            return Err(DebateError::AlreadyJudged);
        }
        if !(self.rounds_exhausted() || self.consensus_reached || self.truncated) {
            return Err(DebateError::JudgeTooEarly {
                round_count: self.round_count,
                max_rounds: self.max_rounds,
            });
        }
        self.judge_decision = Some(decision.into());
        Ok(())
    }

    /// Render the history as "Speaker: text" lines for prompts.
    pub fn transcript(&self) -> String {
        self.history
            .iter()
            .map(|t| format!("{}: {}", t.speaker.label(), t.text))
            .collect::<Vec<_>>()
            .join("\n")
    }
}
