use async_trait::async_trait;
use rust_decimal::Decimal;
use tira_models::{AnalysisState, AnalystKind, DebateKind, DebateState, DebateTurn, Speaker, StageId};

use crate::data::ToolBox;
use crate::error::StageError;

/// One of the four fan-out analysts. Returns report text; provenance comes from `tools`.
#[async_trait]
pub trait AnalystStage: Send + Sync {
    fn kind(&self) -> AnalystKind;

    async fn analyze(&self, state: &AnalysisState, tools: &ToolBox) -> Result<String, StageError>;
}

/// What a debater or judge may read: the run state, committed history and the turns
/// already given in the round being collected.
#[derive(Debug, Clone, Copy)]
pub struct DebateView<'a> {
    pub state: &'a AnalysisState,
    pub debate: &'a DebateState,
    pub pending: &'a [DebateTurn],
}

impl DebateView<'_> {
    /// 1-based number of the round being collected.
    pub fn round(&self) -> u32 {
        self.debate.round_count() + 1
    }

    /// Most recent turn by someone other than `speaker`, staged turns first.
    pub fn last_opponent_turn(&self, speaker: Speaker) -> Option<&DebateTurn> {
        self.pending
            .iter()
            .rev()
            .chain(self.debate.history().iter().rev())
            .find(|t| t.speaker != speaker)
    }

    /// Committed transcript followed by the staged turns of the current round.
    pub fn transcript(&self) -> String {
        let mut lines = vec![self.debate.transcript()];
        lines.extend(
            self.pending
                .iter()
                .map(|t| format!("{}: {}", t.speaker.label(), t.text)),
        );
        lines.retain(|l| !l.is_empty());
        lines.join("\n")
    }
}

/// A debate participant contributing one turn per round.
#[async_trait]
pub trait Debater: Send + Sync {
    fn speaker(&self) -> Speaker;

    async fn argue(&self, view: &DebateView<'_>) -> Result<String, StageError>;
}

/// Rules on a finished debate.
#[async_trait]
pub trait DebateJudge: Send + Sync {
    fn kind(&self) -> DebateKind;

    fn stage(&self) -> StageId {
        StageId::judge_of(self.kind())
    }

    async fn judge(&self, view: &DebateView<'_>) -> Result<String, StageError>;
}

/// Turns the research manager's investment plan into a trading plan.
#[async_trait]
pub trait TraderStage: Send + Sync {
    async fn plan(&self, state: &AnalysisState) -> Result<String, StageError>;
}

/// Deterministic quality rubric used for the consensus check. Scores lie in `[0, 1]`.
pub trait QualityScorer: Send + Sync {
    fn score(&self, debate: &DebateState) -> Decimal;
}
