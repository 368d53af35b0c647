use chrono::NaiveDate;
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use thiserror::Error;
use uuid::Uuid;

use crate::debate::{DebateKind, DebateState};
use crate::fetch::FetchRecord;
use crate::signal::TradeSignal;

/// The four independent analyst stages run during fan-out.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash, PartialOrd, Ord)]
#[serde(rename_all = "snake_case")]
pub enum AnalystKind {
    Market,
    Sentiment,
    News,
    Fundamentals,
}

impl AnalystKind {
    pub const ALL: [AnalystKind; 4] = [
        AnalystKind::Market,
        AnalystKind::Sentiment,
        AnalystKind::News,
        AnalystKind::Fundamentals,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            AnalystKind::Market => "market",
            AnalystKind::Sentiment => "sentiment",
            AnalystKind::News => "news",
            AnalystKind::Fundamentals => "fundamentals",
        }
    }

    /// The stage that owns this analyst's report field.
    pub fn owner(&self) -> StageId {
        match self {
            AnalystKind::Market => StageId::MarketAnalyst,
            AnalystKind::Sentiment => StageId::SentimentAnalyst,
            AnalystKind::News => StageId::NewsAnalyst,
            AnalystKind::Fundamentals => StageId::FundamentalsAnalyst,
        }
    }
}

impl std::fmt::Display for AnalystKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Identity of every stage in the fixed pipeline topology.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash)]
#[serde(rename_all = "snake_case")]
pub enum StageId {
    MarketAnalyst,
    SentimentAnalyst,
    NewsAnalyst,
    FundamentalsAnalyst,
    BullResearcher,
    BearResearcher,
    ResearchManager,
    Trader,
    RiskyAnalyst,
    SafeAnalyst,
    NeutralAnalyst,
    RiskManager,
    SignalProcessor,
}

impl StageId {
    pub fn as_str(&self) -> &'static str {
        match self {
            StageId::MarketAnalyst => "market_analyst",
            StageId::SentimentAnalyst => "sentiment_analyst",
            StageId::NewsAnalyst => "news_analyst",
            StageId::FundamentalsAnalyst => "fundamentals_analyst",
            StageId::BullResearcher => "bull_researcher",
            StageId::BearResearcher => "bear_researcher",
            StageId::ResearchManager => "research_manager",
            StageId::Trader => "trader",
            StageId::RiskyAnalyst => "risky_analyst",
            StageId::SafeAnalyst => "safe_analyst",
            StageId::NeutralAnalyst => "neutral_analyst",
            StageId::RiskManager => "risk_manager",
            StageId::SignalProcessor => "signal_processor",
        }
    }

    /// Judge stage that owns a debate's record.
    pub fn judge_of(kind: DebateKind) -> StageId {
        match kind {
            DebateKind::Research => StageId::ResearchManager,
            DebateKind::Risk => StageId::RiskManager,
        }
    }
}

impl std::fmt::Display for StageId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Reasons the validator can reject an analyst report.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum IssueCode {
    NoDataBacking,
    TooShort,
    MissingSections,
    NoCitations,
    NoNumbers,
}

impl IssueCode {
    pub fn as_str(&self) -> &'static str {
        match self {
            IssueCode::NoDataBacking => "NO_DATA_BACKING",
            IssueCode::TooShort => "TOO_SHORT",
            IssueCode::MissingSections => "MISSING_SECTIONS",
            IssueCode::NoCitations => "NO_CITATIONS",
            IssueCode::NoNumbers => "NO_NUMBERS",
        }
    }
}

impl std::fmt::Display for IssueCode {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// A grounded analyst report that passed validation.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct AnalystReport {
    pub text: String,
    /// Fetches that backed the report.
    pub sources: Vec<FetchRecord>,
    /// Number of attempts used, including the successful one.
    pub attempts: u32,
    pub quality_score: Decimal,
}

/// Per-analyst report field. Distinguishes "not yet run", "succeeded" and "failed".
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Default)]
#[serde(tag = "status", rename_all = "snake_case")]
pub enum ReportSlot {
    #[default]
    Pending,
    Ready(AnalystReport),
    /// Validation kept failing until the retry budget ran out.
    Rejected { issues: Vec<IssueCode>, attempts: u32 },
    /// The analyst could not produce anything usable (failure, timeout, disabled).
    Unavailable { reason: String },
}

impl ReportSlot {
    pub fn is_ready(&self) -> bool {
        matches!(self, ReportSlot::Ready(_))
    }

    pub fn is_pending(&self) -> bool {
        matches!(self, ReportSlot::Pending)
    }

    /// Rejected or unavailable: downstream stages see the "analyst unavailable" sentinel.
    pub fn is_unavailable(&self) -> bool {
        matches!(self, ReportSlot::Rejected { .. } | ReportSlot::Unavailable { .. })
    }

    pub fn text(&self) -> Option<&str> {
        match self {
            ReportSlot::Ready(report) => Some(&report.text),
            _ => None,
        }
    }

    /// Text handed to downstream stages. Missing analysts are spelled out, never omitted.
    pub fn prompt_text(&self, kind: AnalystKind) -> String {
        match self {
            ReportSlot::Ready(report) => report.text.clone(),
            ReportSlot::Pending => format!("[{kind} report not produced]"),
            ReportSlot::Rejected { issues, .. } => {
                let codes: Vec<&str> = issues.iter().map(IssueCode::as_str).collect();
                format!("[analyst unavailable: {kind} report rejected ({})]", codes.join(", "))
            }
            ReportSlot::Unavailable { reason } => {
                format!("[analyst unavailable: {kind} ({reason})]")
            }
        }
    }
}

/// Partial update produced by a stage and merged by the engine.
#[derive(Debug, Clone, PartialEq)]
pub enum StateDelta {
    Report { kind: AnalystKind, slot: ReportSlot },
    InvestmentPlan(String),
    TraderPlan(String),
    FinalDecision(String),
    Debate(DebateState),
    Signal(TradeSignal),
}

impl StateDelta {
    /// The only stage allowed to produce this delta.
    pub fn owner(&self) -> StageId {
        match self {
            StateDelta::Report { kind, .. } => kind.owner(),
            StateDelta::InvestmentPlan(_) => StageId::ResearchManager,
            StateDelta::TraderPlan(_) => StageId::Trader,
            StateDelta::FinalDecision(_) => StageId::RiskManager,
            StateDelta::Debate(debate) => StageId::judge_of(debate.kind()),
            StateDelta::Signal(_) => StageId::SignalProcessor,
        }
    }
}

#[derive(Error, Debug, Clone, PartialEq)]
#[error("stage {writer} attempted to write a field owned by {owner}")]
pub struct ContractViolation {
    pub writer: StageId,
    pub owner: StageId,
}

/// The single record threaded through one pipeline run.
///
/// Fields are only changed through [`AnalysisState::apply`], which enforces field ownership.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct AnalysisState {
    ticker: String,
    trade_date: NaiveDate,
    trace_id: Uuid,
    market_report: ReportSlot,
    sentiment_report: ReportSlot,
    news_report: ReportSlot,
    fundamentals_report: ReportSlot,
    investment_debate: DebateState,
    risk_debate: DebateState,
    investment_plan: Option<String>,
    trader_plan: Option<String>,
    final_trade_decision: Option<String>,
    processed_signal: Option<TradeSignal>,
}

impl AnalysisState {
    pub fn new(
        ticker: impl Into<String>,
        trade_date: NaiveDate,
        max_debate_rounds: u32,
        max_risk_rounds: u32,
    ) -> Self {
        Self {
            ticker: ticker.into(),
            trade_date,
            trace_id: Uuid::new_v4(),
            market_report: ReportSlot::Pending,
            sentiment_report: ReportSlot::Pending,
            news_report: ReportSlot::Pending,
            fundamentals_report: ReportSlot::Pending,
            investment_debate: DebateState::new(DebateKind::Research, max_debate_rounds),
            risk_debate: DebateState::new(DebateKind::Risk, max_risk_rounds),
            investment_plan: None,
            trader_plan: None,
            final_trade_decision: None,
            processed_signal: None,
        }
    }

    pub fn ticker(&self) -> &str {
        &self.ticker
    }

    pub fn trade_date(&self) -> NaiveDate {
        self.trade_date
    }

    pub fn trace_id(&self) -> Uuid {
        self.trace_id
    }

    pub fn report(&self, kind: AnalystKind) -> &ReportSlot {
        match kind {
            AnalystKind::Market => &self.market_report,
            AnalystKind::Sentiment => &self.sentiment_report,
            AnalystKind::News => &self.news_report,
            AnalystKind::Fundamentals => &self.fundamentals_report,
        }
    }

    /// All four report slots in canonical order.
    pub fn reports(&self) -> impl Iterator<Item = (AnalystKind, &ReportSlot)> {
        AnalystKind::ALL.into_iter().map(move |k| (k, self.report(k)))
    }

    pub fn debate(&self, kind: DebateKind) -> &DebateState {
        match kind {
            DebateKind::Research => &self.investment_debate,
            DebateKind::Risk => &self.risk_debate,
        }
    }

    pub fn investment_plan(&self) -> Option<&str> {
        self.investment_plan.as_deref()
    }

    pub fn trader_plan(&self) -> Option<&str> {
        self.trader_plan.as_deref()
    }

    pub fn final_trade_decision(&self) -> Option<&str> {
        self.final_trade_decision.as_deref()
    }

    pub fn processed_signal(&self) -> Option<TradeSignal> {
        self.processed_signal
    }

    /// Render all analyst reports for downstream prompts.
    pub fn reports_digest(&self) -> String {
        self.reports()
            .map(|(kind, slot)| format!("## {kind} report\n{}", slot.prompt_text(kind)))
            .collect::<Vec<_>>()
            .join("\n\n")
    }

    /// Merge a stage's delta. `writer` must be the delta's designated owner.
    ///
    /// Returns `true` when a populated field was overwritten by its owner.
    pub fn apply(&mut self, writer: StageId, delta: StateDelta) -> Result<bool, ContractViolation> {
        let owner = delta.owner();
        if writer != owner {
            return Err(ContractViolation { writer, owner });
        }

        let overwrote = match delta {
            StateDelta::Report { kind, slot } => {
                let field = match kind {
                    AnalystKind::Market => &mut self.market_report,
                    AnalystKind::Sentiment => &mut self.sentiment_report,
                    AnalystKind::News => &mut self.news_report,
                    AnalystKind::Fundamentals => &mut self.fundamentals_report,
                };
                let overwrote = !field.is_pending();
                *field = slot;
                overwrote
            }
            StateDelta::InvestmentPlan(text) => self.investment_plan.replace(text).is_some(),
            StateDelta::TraderPlan(text) => self.trader_plan.replace(text).is_some(),
            StateDelta::FinalDecision(text) => self.final_trade_decision.replace(text).is_some(),
            StateDelta::Debate(debate) => {
                let field = match debate.kind() {
                    DebateKind::Research => &mut self.investment_debate,
                    DebateKind::Risk => &mut self.risk_debate,
                };
                let overwrote = field.round_count() > 0 || field.judge_decision().is_some();
                *field = debate;
                overwrote
            }
            StateDelta::Signal(signal) => self.processed_signal.replace(signal).is_some(),
        };
        Ok(overwrote)
    }
}
