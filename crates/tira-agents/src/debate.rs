use std::collections::HashMap;
use std::sync::Arc;

use rust_decimal::Decimal;
use tira_models::{AnalysisState, DebateKind, DebateState, DebateTurn, StageId, StateDelta};
use tracing::{info, warn};

use crate::context::RunContext;
use crate::error::PipelineError;
use crate::signal::extract_signal;
use crate::stage::{DebateJudge, DebateView, Debater, QualityScorer};

/// States of a debate. A run walks them in order, looping on `RoundInProgress`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DebatePhase {
    RoundInProgress,
    Consensus,
    MaxRoundsReached,
    AwaitingJudge,
    Done,
}

/// Result of a completed debate.
#[derive(Debug, Clone, PartialEq)]
pub struct DebateRun {
    pub decision: String,
    /// Every phase visited, in order, ending with `Done`.
    pub phases: Vec<DebatePhase>,
}

/// Share of the latest round's turns that back the same action. Turns with no extractable
/// action count against agreement.
#[derive(Debug, Clone, Copy, Default)]
pub struct AgreementScorer;

impl QualityScorer for AgreementScorer {
    fn score(&self, debate: &DebateState) -> Decimal {
        let turns = debate.last_round();
        if turns.is_empty() {
            return Decimal::ZERO;
        }

        let mut votes = HashMap::new();
        for turn in turns {
            let signal = extract_signal(&turn.text).signal;
            if signal.is_actionable() {
                *votes.entry(signal).or_insert(0u32) += 1;
            }
        }
        let top = votes.values().copied().max().unwrap_or(0);
        Decimal::from(top) / Decimal::from(turns.len())
    }
}

/// Runs one debate: rounds among a fixed panel, a consensus check after each committed
/// round, then a single ruling by the judge.
pub struct DebateEngine {
    kind: DebateKind,
    panel: Vec<Arc<dyn Debater>>,
    judge: Arc<dyn DebateJudge>,
    scorer: Arc<dyn QualityScorer>,
    threshold: Decimal,
}

impl DebateEngine {
    pub fn new(
        kind: DebateKind,
        panel: Vec<Arc<dyn Debater>>,
        judge: Arc<dyn DebateJudge>,
        scorer: Arc<dyn QualityScorer>,
        threshold: Decimal,
    ) -> Self {
        Self {
            kind,
            panel,
            judge,
            scorer,
            threshold,
        }
    }

    pub fn kind(&self) -> DebateKind {
        self.kind
    }

    /// Drive the debate to a judge decision.
    ///
    /// Progress is written to `state` after every committed round, so a run cut short by its
    /// deadline still carries the rounds that finished. A debater that fails fatally ends the
    /// debate early with `truncated` set; the judge still rules.
    pub async fn run(
        &self,
        state: &mut AnalysisState,
        ctx: &RunContext,
    ) -> Result<DebateRun, PipelineError> {
        let owner = StageId::judge_of(self.kind);
        let mut debate = state.debate(self.kind).clone();
        let mut phases = Vec::new();
        let mut phase = DebatePhase::RoundInProgress;
        let mut decision = String::new();

        loop {
            phases.push(phase);
            phase = match phase {
                DebatePhase::RoundInProgress if debate.rounds_exhausted() => {
                    DebatePhase::MaxRoundsReached
                }
                DebatePhase::RoundInProgress => {
                    let collected = self.collect_round(state, &debate, ctx).await;
                    match collected {
                        Ok(turns) => {
                            let round = ctx.controller().commit_round(&mut debate, turns)?;
                            let score = self.scorer.score(&debate);
                            let consensus =
                                ctx.controller().check_consensus(&mut debate, score, self.threshold);
                            state.apply(owner, StateDelta::Debate(debate.clone()))?;
                            info!(
                                trace_id = %ctx.trace_id(),
                                debate = %self.kind,
                                round,
                                max_rounds = debate.max_rounds(),
                                score = %score,
                                consensus,
                                "debate round committed"
                            );
                            if consensus {
                                DebatePhase::Consensus
                            } else if debate.rounds_exhausted() {
                                DebatePhase::MaxRoundsReached
                            } else {
                                DebatePhase::RoundInProgress
                            }
                        }
                        Err(PipelineError::Stage { stage, error, .. }) => {
                            warn!(
                                trace_id = %ctx.trace_id(),
                                debate = %self.kind,
                                %stage,
                                error = %error,
                                committed_rounds = debate.round_count(),
                                "debater failed, judging partial history"
                            );
                            debate.mark_truncated();
                            state.apply(owner, StateDelta::Debate(debate.clone()))?;
                            DebatePhase::AwaitingJudge
                        }
                        Err(other) => return Err(other),
                    }
                }
                DebatePhase::Consensus | DebatePhase::MaxRoundsReached => {
                    DebatePhase::AwaitingJudge
                }
                DebatePhase::AwaitingJudge => {
                    decision = self.rule(state, &debate, ctx).await?;
                    debate.record_judgement(decision.clone())?;
                    state.apply(owner, StateDelta::Debate(debate.clone()))?;
                    DebatePhase::Done
                }
                DebatePhase::Done => break,
            };
        }

        Ok(DebateRun { decision, phases })
    }

    /// Collect one turn from each panelist. Turns are staged locally; nothing reaches the
    /// debate record unless every speaker answers, so a retried speaker cannot duplicate turns.
    async fn collect_round(
        &self,
        state: &AnalysisState,
        debate: &DebateState,
        ctx: &RunContext,
    ) -> Result<Vec<DebateTurn>, PipelineError> {
        let mut pending: Vec<DebateTurn> = Vec::with_capacity(self.panel.len());
        for debater in &self.panel {
            let speaker = debater.speaker();
            let view = DebateView {
                state,
                debate,
                pending: &pending,
            };
            let view = &view;
            let text = ctx
                .invoke(speaker.stage(), move |_| debater.argue(view))
                .await?
                .value;
            pending.push(DebateTurn::new(speaker, text));
        }
        Ok(pending)
    }

    async fn rule(
        &self,
        state: &AnalysisState,
        debate: &DebateState,
        ctx: &RunContext,
    ) -> Result<String, PipelineError> {
        let view = DebateView {
            state,
            debate,
            pending: &[],
        };
        let view = &view;
        let judge = &self.judge;
        let ruling = ctx
            .invoke(judge.stage(), move |_| judge.judge(view))
            .await?;
        info!(
            trace_id = %ctx.trace_id(),
            debate = %self.kind,
            rounds = debate.round_count(),
            truncated = debate.truncated(),
            attempts = ruling.attempts,
            "judge ruled"
        );
        Ok(ruling.value)
    }
}
