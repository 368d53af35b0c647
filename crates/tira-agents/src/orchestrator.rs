use std::sync::Arc;
use std::time::{Duration, Instant};

use chrono::NaiveDate;
use tira_cache::FetchMemo;
use tira_models::{
    AnalysisState, AnalystKind, DebateKind, FailureKind, PipelineConfig, ReportSlot, RunFailure,
    RunOutcome, RunStatus, StageId, StateDelta,
};
use tracing::{error, info, warn};

use crate::claude_cli::LanguageModel;
use crate::context::RunContext;
use crate::debate::DebateEngine;
use crate::error::PipelineError;
use crate::fanout::{merge_outcomes, FanOutCoordinator};
use crate::signal::{extract_signal, SignalProcessor};
use crate::stage::{DebateJudge, Debater, QualityScorer, TraderStage};
use crate::supervisor::{supervise, Supervised};

pub use crate::fanout::AnalystBinding;

const DEFAULT_MEMO_CAPACITY: u64 = 1_000;

/// Every stage implementation the pipeline needs.
pub struct PipelineStages {
    pub analysts: Vec<AnalystBinding>,
    pub bull: Arc<dyn Debater>,
    pub bear: Arc<dyn Debater>,
    pub research_judge: Arc<dyn DebateJudge>,
    pub trader: Arc<dyn TraderStage>,
    pub risky: Arc<dyn Debater>,
    pub safe: Arc<dyn Debater>,
    pub neutral: Arc<dyn Debater>,
    pub risk_judge: Arc<dyn DebateJudge>,
    pub scorer: Arc<dyn QualityScorer>,
    /// Model asked to name the action when the final decision has no action keyword.
    pub signal_model: Option<Arc<dyn LanguageModel>>,
}

/// The orchestrator runs the fixed pipeline: analyst fan-out, research debate, trader,
/// risk debate, signal extraction.
pub struct Orchestrator {
    fan_out: FanOutCoordinator,
    research: DebateEngine,
    trader: Arc<dyn TraderStage>,
    risk: DebateEngine,
    signal: SignalProcessor,
    config: PipelineConfig,
    memo_capacity: u64,
}

impl Orchestrator {
    pub fn new(stages: PipelineStages, config: PipelineConfig) -> Self {
        let threshold = config.consensus_quality_threshold;
        let research = DebateEngine::new(
            DebateKind::Research,
            vec![stages.bull, stages.bear],
            stages.research_judge,
            Arc::clone(&stages.scorer),
            threshold,
        );
        let risk = DebateEngine::new(
            DebateKind::Risk,
            vec![stages.risky, stages.safe, stages.neutral],
            stages.risk_judge,
            stages.scorer,
            threshold,
        );

        Self {
            fan_out: FanOutCoordinator::new(stages.analysts, config.proceed_with_degraded_analysts),
            research,
            trader: stages.trader,
            risk,
            signal: SignalProcessor::new(stages.signal_model),
            config,
            memo_capacity: DEFAULT_MEMO_CAPACITY,
        }
    }

    /// Bound the per-run fetch memo.
    pub fn with_memo_capacity(mut self, capacity: u64) -> Self {
        self.memo_capacity = capacity;
        self
    }

    pub fn config(&self) -> &PipelineConfig {
        &self.config
    }

    pub fn memo_capacity(&self) -> u64 {
        self.memo_capacity
    }

    /// Analyze one ticker for one trading date.
    ///
    /// Never fails: timeouts and fatal errors come back as a status on the outcome together
    /// with whatever state the run had built.
    pub async fn run(&self, ticker: &str, trade_date: NaiveDate) -> RunOutcome {
        let start = Instant::now();
        let mut state = AnalysisState::new(
            ticker,
            trade_date,
            self.config.max_debate_rounds,
            self.config.max_risk_discuss_rounds,
        );
        let run_timeout = self.config.run_timeout();
        let memo = FetchMemo::new(self.memo_capacity(), run_timeout.max(Duration::from_secs(1)));
        let ctx = Arc::new(RunContext::new(state.trace_id(), &self.config, memo));
        info!(
            ticker,
            %trade_date,
            trace_id = %ctx.trace_id(),
            memo_capacity = self.memo_capacity(),
            "Starting analysis run"
        );

        let supervised = supervise(&ctx, run_timeout, self.pipeline(&mut state, &ctx)).await;

        let (status, failure) = match supervised {
            Supervised::Finished(Ok(())) => (RunStatus::Ok, None),
            Supervised::Finished(Err(e)) => {
                error!(ticker, trace_id = %ctx.trace_id(), error = %e, "Analysis run failed");
                let failure = RunFailure {
                    kind: e.failure_kind(),
                    message: e.to_string(),
                };
                (RunStatus::FatalError, Some(failure))
            }
            Supervised::TimedOut { after } => {
                let failure = RunFailure {
                    kind: FailureKind::Timeout,
                    message: format!("run exceeded {} ms", after.as_millis()),
                };
                (RunStatus::Timeout, Some(failure))
            }
        };

        let fallback_deadline = self.fallback_deadline(status, &state, &ctx, start);
        let extracted = self
            .signal
            .process(state.final_trade_decision(), fallback_deadline)
            .await;
        if let Err(e) = state.apply(
            StageId::SignalProcessor,
            StateDelta::Signal(extracted.signal),
        ) {
            error!(error = %e, "failed to record processed signal");
        }

        let elapsed_ms = start.elapsed().as_millis() as u64;
        info!(
            ticker,
            trace_id = %ctx.trace_id(),
            signal = %extracted.signal,
            status = ?status,
            stage_invocations = ctx.controller().steps_taken(),
            elapsed_ms,
            "Analysis run complete"
        );

        RunOutcome {
            state,
            signal: extracted.signal,
            unresolved_decision: extracted.unresolved,
            status,
            failure,
            elapsed_ms,
        }
    }

    async fn pipeline(
        &self,
        state: &mut AnalysisState,
        ctx: &Arc<RunContext>,
    ) -> Result<(), PipelineError> {
        self.mark_missing_analysts(state)?;

        let snapshot = Arc::new(state.clone());
        let outcomes = self.fan_out.run(snapshot, ctx).await?;
        merge_outcomes(state, outcomes)?;
        if state.reports().all(|(_, slot)| !slot.is_ready()) {
            warn!(trace_id = %ctx.trace_id(), "no analyst produced a report, debating on sentinels");
        }

        let research = self.research.run(state, ctx).await?;
        state.apply(
            StageId::ResearchManager,
            StateDelta::InvestmentPlan(research.decision),
        )?;

        let trader = &self.trader;
        let view: &AnalysisState = state;
        let plan = ctx
            .invoke(StageId::Trader, move |_| trader.plan(view))
            .await?;
        info!(trace_id = %ctx.trace_id(), attempts = plan.attempts, "Trader plan ready");
        state.apply(StageId::Trader, StateDelta::TraderPlan(plan.value))?;

        let risk = self.risk.run(state, ctx).await?;
        state.apply(StageId::RiskManager, StateDelta::FinalDecision(risk.decision))?;
        Ok(())
    }

    /// Budget for the signal fallback: the stage timeout capped by what is left of the run.
    /// `None` when the fallback is off, not needed or out of budget.
    fn fallback_deadline(
        &self,
        status: RunStatus,
        state: &AnalysisState,
        ctx: &RunContext,
        start: Instant,
    ) -> Option<Duration> {
        if status != RunStatus::Ok || !self.config.signal_llm_fallback || !self.signal.has_fallback()
        {
            return None;
        }
        let decision = state.final_trade_decision()?;
        if extract_signal(decision).signal.is_actionable() {
            return None;
        }
        let remaining = self.config.run_timeout().saturating_sub(start.elapsed());
        if remaining.is_zero() {
            warn!(trace_id = %ctx.trace_id(), "run budget spent, skipping signal fallback");
            return None;
        }
        if let Err(e) = ctx.controller().step(StageId::SignalProcessor) {
            warn!(trace_id = %ctx.trace_id(), error = %e, "skipping signal fallback");
            return None;
        }
        Some(remaining.min(ctx.stage_timeout()))
    }

    /// Disabled or unconfigured analysts get an explicit `Unavailable` slot up front.
    fn mark_missing_analysts(&self, state: &mut AnalysisState) -> Result<(), PipelineError> {
        for kind in AnalystKind::ALL {
            let binding = self.fan_out.analysts().iter().find(|b| b.kind() == kind);
            let reason = match binding {
                Some(b) if b.enabled => continue,
                Some(_) => "disabled",
                None => "not configured",
            };
            state.apply(
                kind.owner(),
                StateDelta::Report {
                    kind,
                    slot: ReportSlot::Unavailable {
                        reason: reason.to_string(),
                    },
                },
            )?;
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rust_decimal_macros::dec;
    use tira_models::TradeSignal;

    use crate::data::DataSource;
    use crate::test_support::{
        grounded_analysts, scripted_stages, ScriptedAnalyst, ScriptedJudge, StaticSource,
    };

    fn config() -> PipelineConfig {
        let mut config = PipelineConfig::default();
        config.tool_retry_attempts = 2;
        config.backoff.initial_ms = 1;
        config.backoff.jitter_ms = 0;
        config.consensus_quality_threshold = dec!(0.8);
        config
    }

    fn date() -> NaiveDate {
        NaiveDate::from_ymd_opt(2024, 5, 10).unwrap()
    }

    #[tokio::test]
    async fn full_run_produces_final_decision_and_signal() {
        let orchestrator = Orchestrator::new(scripted_stages(grounded_analysts()), config());
        let outcome = orchestrator.run("AAPL", date()).await;

        assert_eq!(outcome.status, RunStatus::Ok, "failure: {:?}", outcome.failure);
        assert!(outcome.failure.is_none());
        assert!(outcome.state.reports().all(|(_, slot)| slot.is_ready()));
        assert!(outcome.state.investment_plan().is_some());
        assert!(outcome.state.trader_plan().is_some());
        assert!(outcome.state.final_trade_decision().is_some());
        assert_eq!(outcome.signal, TradeSignal::Buy);
        assert_eq!(outcome.state.processed_signal(), Some(TradeSignal::Buy));
    }

    #[tokio::test]
    async fn disabled_and_missing_analysts_are_unavailable() {
        let analysts = vec![
            AnalystBinding::new(
                Arc::new(ScriptedAnalyst::grounded(AnalystKind::Market)),
                vec![Arc::new(StaticSource::new("prices")) as Arc<dyn DataSource>],
            ),
            AnalystBinding::new(
                Arc::new(ScriptedAnalyst::grounded(AnalystKind::News)),
                vec![Arc::new(StaticSource::new("news")) as Arc<dyn DataSource>],
            )
            .disabled(),
        ];
        let orchestrator = Orchestrator::new(scripted_stages(analysts), config());
        let outcome = orchestrator.run("AAPL", date()).await;

        assert!(outcome.is_ok());
        assert!(outcome.state.report(AnalystKind::Market).is_ready());
        assert_eq!(
            outcome.state.report(AnalystKind::News),
            &ReportSlot::Unavailable {
                reason: "disabled".to_string()
            }
        );
        assert_eq!(
            outcome.state.report(AnalystKind::Fundamentals),
            &ReportSlot::Unavailable {
                reason: "not configured".to_string()
            }
        );
    }

    #[tokio::test]
    async fn failing_research_judge_is_fatal() {
        let mut stages = scripted_stages(grounded_analysts());
        stages.research_judge = Arc::new(ScriptedJudge::failing(DebateKind::Research));
        let outcome = Orchestrator::new(stages, config()).run("AAPL", date()).await;

        assert_eq!(outcome.status, RunStatus::FatalError);
        assert_eq!(outcome.failure.unwrap().kind, FailureKind::Fatal);
        assert!(outcome.state.investment_plan().is_none());
        assert_eq!(outcome.signal, TradeSignal::Unknown);
        assert!(outcome.state.report(AnalystKind::Market).is_ready());
    }

    #[tokio::test]
    async fn recursion_limit_is_reported() {
        let mut config = config();
        config.max_recursion_steps = 5;
        let outcome = Orchestrator::new(scripted_stages(grounded_analysts()), config)
            .run("AAPL", date())
            .await;

        assert_eq!(outcome.status, RunStatus::FatalError);
        assert_eq!(outcome.failure.unwrap().kind, FailureKind::RecursionLimit);
        assert!(outcome.state.final_trade_decision().is_none());
    }
}
