//! End-to-end pipeline scenarios driven by scripted stages.
//!
//! Each test wires the full orchestrator with test doubles from `tira_agents::test_support`,
//! runs one ticker/date and checks the outcome and the state it carries.

use std::sync::atomic::Ordering;
use std::sync::Arc;
use std::time::{Duration, Instant};

use chrono::NaiveDate;
use rust_decimal_macros::dec;
use tira_agents::test_support::{
    grounded_analysts, grounded_report, scripted_stages, FixedScorer, HangingModel,
    ScriptedAnalyst, ScriptedDebater, ScriptedJudge, StaticSource,
};
use tira_agents::{AnalystBinding, DataSource, DebateJudge, Orchestrator};
use tira_models::{
    AnalystKind, DebateKind, FailureKind, IssueCode, PipelineConfig, ReportSlot, RunStatus,
    Speaker, TradeSignal,
};

fn config() -> PipelineConfig {
    let mut config = PipelineConfig::default();
    config.tool_retry_attempts = 3;
    config.backoff.initial_ms = 1;
    config.backoff.max_ms = 5;
    config.backoff.jitter_ms = 0;
    config.consensus_quality_threshold = dec!(0.8);
    config
}

fn trade_date() -> NaiveDate {
    NaiveDate::from_ymd_opt(2024, 5, 10).unwrap()
}

fn bind(analyst: ScriptedAnalyst, source: &str) -> AnalystBinding {
    AnalystBinding::new(
        Arc::new(analyst),
        vec![Arc::new(StaticSource::new(source)) as Arc<dyn DataSource>],
    )
}

fn analysts_with_delays(delays: [u64; 4]) -> Vec<AnalystBinding> {
    let sources = ["prices", "social", "news", "fundamentals"];
    AnalystKind::ALL
        .into_iter()
        .zip(delays)
        .zip(sources)
        .map(|((kind, ms), source)| {
            bind(
                ScriptedAnalyst::grounded(kind).with_delay(Duration::from_millis(ms)),
                source,
            )
        })
        .collect()
}

#[tokio::test]
async fn research_debate_stops_on_consensus_before_round_limit() {
    let mut config = config();
    config.max_debate_rounds = 3;

    let judge = Arc::new(ScriptedJudge::new(
        DebateKind::Research,
        "Both sides converge on upside.\n\nFINAL TRANSACTION PROPOSAL: **BUY**",
    ));
    let mut stages = scripted_stages(grounded_analysts());
    stages.research_judge = Arc::clone(&judge) as Arc<dyn DebateJudge>;
    stages.scorer = Arc::new(FixedScorer::new([dec!(0.4), dec!(0.9), dec!(0.95)]));

    let outcome = Orchestrator::new(stages, config).run("AAPL", trade_date()).await;

    assert!(outcome.is_ok(), "failure: {:?}", outcome.failure);
    let debate = outcome.state.debate(DebateKind::Research);
    assert_eq!(debate.round_count(), 2);
    assert!(debate.consensus_reached());
    assert_eq!(debate.last_quality_score(), Some(dec!(0.9)));
    assert_eq!(debate.history().len(), 4);
    assert_eq!(judge.rounds_seen(), vec![2]);
    assert!(debate.judge_decision().is_some());
    assert_eq!(outcome.signal, TradeSignal::Buy);
}

#[tokio::test]
async fn ungrounded_analyst_is_rejected_and_run_still_completes() {
    let mut analysts = grounded_analysts();
    analysts.retain(|b| b.kind() != AnalystKind::Sentiment);
    let ungrounded = ScriptedAnalyst::ungrounded(AnalystKind::Sentiment);
    let calls = ungrounded.call_counter();
    analysts.push(bind(ungrounded, "social"));

    let outcome = Orchestrator::new(scripted_stages(analysts), config())
        .run("TSLA", trade_date())
        .await;

    assert_eq!(outcome.status, RunStatus::Ok);
    match outcome.state.report(AnalystKind::Sentiment) {
        ReportSlot::Rejected { issues, attempts } => {
            assert!(issues.contains(&IssueCode::NoDataBacking));
            assert_eq!(*attempts, 3);
        }
        other => panic!("expected rejected slot, got {other:?}"),
    }
    assert_eq!(calls.load(Ordering::SeqCst), 3);
    assert!(outcome
        .state
        .reports_digest()
        .contains("analyst unavailable: sentiment"));
    assert_eq!(outcome.signal, TradeSignal::Buy);
    assert!(outcome.unresolved_decision.is_none());
}

#[tokio::test]
async fn run_deadline_mid_debate_returns_partial_state() {
    let mut config = config();
    config.run_timeout_seconds = 1;
    config.per_stage_timeout_seconds = 30;

    let mut stages = scripted_stages(grounded_analysts());
    stages.bull = Arc::new(ScriptedDebater::new(Speaker::Bull, ["BUY"]).hanging());

    let started = Instant::now();
    let outcome = Orchestrator::new(stages, config).run("NVDA", trade_date()).await;

    assert!(started.elapsed() < Duration::from_secs(5));
    assert_eq!(outcome.status, RunStatus::Timeout);
    assert_eq!(outcome.failure.as_ref().unwrap().kind, FailureKind::Timeout);
    assert!(outcome.state.reports().all(|(_, slot)| slot.is_ready()));
    assert_eq!(outcome.state.debate(DebateKind::Research).round_count(), 0);
    assert!(outcome.state.investment_plan().is_none());
    assert!(outcome.state.final_trade_decision().is_none());
    assert_eq!(outcome.signal, TradeSignal::Unknown);
}

#[tokio::test]
async fn hanging_judge_is_cut_off_by_stage_deadline() {
    let mut config = config();
    config.per_stage_timeout_seconds = 1;
    config.tool_retry_attempts = 2;

    let mut stages = scripted_stages(grounded_analysts());
    stages.risk_judge = Arc::new(ScriptedJudge::new(DebateKind::Risk, "BUY").hanging());

    let started = Instant::now();
    let outcome = Orchestrator::new(stages, config).run("MSFT", trade_date()).await;

    assert!(started.elapsed() < Duration::from_secs(10));
    assert_eq!(outcome.status, RunStatus::FatalError);
    assert_eq!(outcome.failure.as_ref().unwrap().kind, FailureKind::Fatal);
    assert!(outcome.state.trader_plan().is_some());
    assert!(outcome.state.final_trade_decision().is_none());
}

#[tokio::test]
async fn hanging_signal_fallback_stays_within_run_budget() {
    let mut config = config();
    config.run_timeout_seconds = 2;
    config.signal_llm_fallback = true;

    let mut stages = scripted_stages(grounded_analysts());
    stages.risk_judge = Arc::new(ScriptedJudge::new(
        DebateKind::Risk,
        "Reduce exposure meaningfully.",
    ));
    stages.signal_model = Some(Arc::new(HangingModel));

    let started = Instant::now();
    let outcome = tokio::time::timeout(
        Duration::from_secs(6),
        Orchestrator::new(stages, config).run("NFLX", trade_date()),
    )
    .await
    .expect("run outlived its budget");

    assert!(started.elapsed() < Duration::from_secs(4));
    assert_eq!(outcome.status, RunStatus::Ok);
    assert_eq!(outcome.signal, TradeSignal::Unknown);
    assert_eq!(
        outcome.unresolved_decision.as_deref(),
        Some("Reduce exposure meaningfully.")
    );
}

#[tokio::test]
async fn fan_out_merge_is_independent_of_completion_order() {
    let fast_first = Orchestrator::new(scripted_stages(analysts_with_delays([0, 20, 40, 60])), config())
        .run("AAPL", trade_date())
        .await;
    let slow_first = Orchestrator::new(scripted_stages(analysts_with_delays([60, 40, 20, 0])), config())
        .run("AAPL", trade_date())
        .await;

    assert!(fast_first.is_ok() && slow_first.is_ok());
    for kind in AnalystKind::ALL {
        let expected = grounded_report(kind);
        assert_eq!(fast_first.state.report(kind).text(), Some(expected.as_str()));
        assert_eq!(slow_first.state.report(kind).text(), Some(expected.as_str()));
    }
    assert_eq!(fast_first.signal, slow_first.signal);
}

#[tokio::test]
async fn retried_debater_commits_exactly_one_turn() {
    let mut config = config();
    config.max_debate_rounds = 1;

    let bear = Arc::new(ScriptedDebater::new(Speaker::Bear, ["Too expensive. SELL"]).failing_first(1));
    let mut stages = scripted_stages(grounded_analysts());
    stages.bear = bear.clone();

    let outcome = Orchestrator::new(stages, config).run("AMZN", trade_date()).await;

    assert!(outcome.is_ok(), "failure: {:?}", outcome.failure);
    assert_eq!(bear.calls(), 2);
    let debate = outcome.state.debate(DebateKind::Research);
    assert_eq!(debate.round_count(), 1);
    let bear_turns = debate
        .history()
        .iter()
        .filter(|t| t.speaker == Speaker::Bear)
        .count();
    assert_eq!(bear_turns, 1);
    assert_eq!(debate.history().len(), 2);
}

#[tokio::test]
async fn zero_round_debates_go_straight_to_the_judge() {
    let mut config = config();
    config.max_debate_rounds = 0;
    config.max_risk_discuss_rounds = 0;

    let bull = Arc::new(ScriptedDebater::new(Speaker::Bull, ["BUY"]));
    let mut stages = scripted_stages(grounded_analysts());
    stages.bull = bull.clone();

    let outcome = Orchestrator::new(stages, config).run("GOOG", trade_date()).await;

    assert!(outcome.is_ok(), "failure: {:?}", outcome.failure);
    assert_eq!(bull.calls(), 0);
    assert_eq!(outcome.state.debate(DebateKind::Research).round_count(), 0);
    assert_eq!(outcome.state.debate(DebateKind::Risk).round_count(), 0);
    assert!(outcome.state.investment_plan().is_some());
    assert!(outcome.state.final_trade_decision().is_some());
    assert_eq!(outcome.signal, TradeSignal::Buy);
}

#[tokio::test]
async fn fatal_analyst_aborts_without_degraded_mode() {
    let mut config = config();
    config.proceed_with_degraded_analysts = false;

    let mut analysts = grounded_analysts();
    analysts.retain(|b| b.kind() != AnalystKind::Fundamentals);
    analysts.push(bind(ScriptedAnalyst::fatal(AnalystKind::Fundamentals), "fundamentals"));

    let outcome = Orchestrator::new(scripted_stages(analysts), config)
        .run("META", trade_date())
        .await;

    assert_eq!(outcome.status, RunStatus::FatalError);
    assert_eq!(outcome.failure.as_ref().unwrap().kind, FailureKind::Fatal);
    assert!(outcome.state.investment_plan().is_none());
    assert_eq!(outcome.signal, TradeSignal::Unknown);
}

#[tokio::test]
async fn fatal_analyst_degrades_when_allowed() {
    let mut analysts = grounded_analysts();
    analysts.retain(|b| b.kind() != AnalystKind::Fundamentals);
    analysts.push(bind(ScriptedAnalyst::fatal(AnalystKind::Fundamentals), "fundamentals"));

    let outcome = Orchestrator::new(scripted_stages(analysts), config())
        .run("META", trade_date())
        .await;

    assert!(outcome.is_ok());
    assert!(matches!(
        outcome.state.report(AnalystKind::Fundamentals),
        ReportSlot::Unavailable { .. }
    ));
    assert!(outcome.state.final_trade_decision().is_some());
}
