//! Scripted stages, data sources and models for exercising the engine without the Claude CLI.
//!
//! Every double is deterministic and counts its invocations so tests can assert on retries.

use std::sync::atomic::{AtomicU32, AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use async_trait::async_trait;
use chrono::{NaiveDate, Utc};
use rust_decimal::Decimal;
use tira_models::{
    AnalysisState, AnalystKind, DebateKind, DebateState, FetchPayload, Speaker,
};

use crate::claude_cli::LanguageModel;
use crate::data::{DataSource, ToolBox};
use crate::debate::AgreementScorer;
use crate::error::{AgentError, FetchError, StageError};
use crate::fanout::AnalystBinding;
use crate::orchestrator::PipelineStages;
use crate::stage::{AnalystStage, DebateJudge, DebateView, Debater, QualityScorer, TraderStage};

/// Report text that passes validation for `kind` when backed by a fetch.
pub fn grounded_report(kind: AnalystKind) -> String {
    let body = match kind {
        AnalystKind::Market => {
            "The price trend is constructive: the stock closed at $182.40, up 4.2% on the week, \
             and volume ran 18% above its 20-day average on up days."
        }
        AnalystKind::Sentiment => {
            "Social sentiment improved through the week, with positive mentions rising from 54% \
             to 63% and social volume up 2.1x after the product event."
        }
        AnalystKind::News => {
            "Company news was dominated by the $110B buyback, while the macro backdrop softened \
             as the 10-year yield fell 15 bps after a cooler CPI print of 3.4%."
        }
        AnalystKind::Fundamentals => {
            "Quarterly revenue reached $90.8B and earnings per share were $1.53, beating \
             estimates by 2%; the balance sheet holds $162B of cash against $105B of debt."
        }
    };
    format!(
        "According to the {kind} data as of the trade date, {body} Based on the sourced figures \
         above, the {kind} picture is supportive of the position over the next 2 to 4 weeks."
    )
}

/// Always returns one payload for any ticker and date.
pub struct StaticSource {
    name: String,
    label: Option<String>,
    calls: AtomicU32,
}

impl StaticSource {
    pub fn new(name: &str) -> Self {
        Self {
            name: name.to_string(),
            label: None,
            calls: AtomicU32::new(0),
        }
    }

    /// Stamp payloads with `label` instead of the configured name.
    pub fn labelled(mut self, label: &str) -> Self {
        self.label = Some(label.to_string());
        self
    }

    pub fn calls(&self) -> u32 {
        self.calls.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl DataSource for StaticSource {
    fn name(&self) -> &str {
        &self.name
    }

    async fn fetch(&self, ticker: &str, as_of: NaiveDate) -> Result<FetchPayload, FetchError> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        Ok(FetchPayload {
            source: self.label.clone().unwrap_or_else(|| self.name.clone()),
            ticker: ticker.to_string(),
            as_of,
            data: serde_json::json!({ "close": 182.4, "volume": 51_200_000 }),
            citations: vec![format!("{} vendor feed", self.name)],
            fetched_at: Utc::now(),
        })
    }
}

/// Always unavailable.
pub struct FailingSource {
    name: String,
}

impl FailingSource {
    pub fn new(name: &str) -> Self {
        Self {
            name: name.to_string(),
        }
    }
}

#[async_trait]
impl DataSource for FailingSource {
    fn name(&self) -> &str {
        &self.name
    }

    async fn fetch(&self, _ticker: &str, _as_of: NaiveDate) -> Result<FetchPayload, FetchError> {
        Err(FetchError::Unavailable {
            data_source: self.name.clone(),
            reason: "vendor returned 503".to_string(),
        })
    }
}

/// Replays canned completions in order, repeating the last one.
pub struct ScriptedModel {
    responses: Vec<String>,
    next: AtomicUsize,
    prompts: Mutex<Vec<String>>,
}

impl ScriptedModel {
    pub fn new<I, S>(responses: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        Self {
            responses: responses.into_iter().map(Into::into).collect(),
            next: AtomicUsize::new(0),
            prompts: Mutex::new(Vec::new()),
        }
    }

    pub fn calls(&self) -> usize {
        self.next.load(Ordering::SeqCst)
    }

    pub fn last_user_prompt(&self) -> Option<String> {
        self.prompts.lock().ok()?.last().cloned()
    }
}

#[async_trait]
impl LanguageModel for ScriptedModel {
    fn model(&self) -> &str {
        "scripted"
    }

    async fn complete(&self, _system_prompt: &str, user_prompt: &str) -> Result<String, AgentError> {
        if let Ok(mut prompts) = self.prompts.lock() {
            prompts.push(user_prompt.to_string());
        }
        let i = self.next.fetch_add(1, Ordering::SeqCst);
        self.responses
            .get(i.min(self.responses.len().saturating_sub(1)))
            .cloned()
            .ok_or_else(|| AgentError::Cli("no scripted response".to_string()))
    }
}

/// Model that never answers.
pub struct HangingModel;

#[async_trait]
impl LanguageModel for HangingModel {
    fn model(&self) -> &str {
        "hanging"
    }

    async fn complete(&self, _system_prompt: &str, _user_prompt: &str) -> Result<String, AgentError> {
        std::future::pending().await
    }
}

#[derive(Debug, Clone, Copy, PartialEq)]
enum AnalystMode {
    Grounded,
    Ungrounded,
    Fatal,
}

/// Analyst double. Grounded analysts fetch every source before answering.
pub struct ScriptedAnalyst {
    kind: AnalystKind,
    mode: AnalystMode,
    delay: Duration,
    text: Option<String>,
    calls: Arc<AtomicU32>,
}

impl ScriptedAnalyst {
    fn with_mode(kind: AnalystKind, mode: AnalystMode) -> Self {
        Self {
            kind,
            mode,
            delay: Duration::ZERO,
            text: None,
            calls: Arc::new(AtomicU32::new(0)),
        }
    }

    pub fn grounded(kind: AnalystKind) -> Self {
        Self::with_mode(kind, AnalystMode::Grounded)
    }

    /// Writes a plausible report without ever calling a data tool.
    pub fn ungrounded(kind: AnalystKind) -> Self {
        Self::with_mode(kind, AnalystMode::Ungrounded)
    }

    pub fn fatal(kind: AnalystKind) -> Self {
        Self::with_mode(kind, AnalystMode::Fatal)
    }

    pub fn with_delay(mut self, delay: Duration) -> Self {
        self.delay = delay;
        self
    }

    pub fn with_text(mut self, text: impl Into<String>) -> Self {
        self.text = Some(text.into());
        self
    }

    pub fn call_counter(&self) -> Arc<AtomicU32> {
        Arc::clone(&self.calls)
    }
}

#[async_trait]
impl AnalystStage for ScriptedAnalyst {
    fn kind(&self) -> AnalystKind {
        self.kind
    }

    async fn analyze(&self, _state: &AnalysisState, tools: &ToolBox) -> Result<String, StageError> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        if !self.delay.is_zero() {
            tokio::time::sleep(self.delay).await;
        }
        match self.mode {
            AnalystMode::Fatal => return Err(StageError::Fatal("scripted failure".to_string())),
            AnalystMode::Grounded => {
                let fetched = tools.fetch_all().await;
                if fetched.iter().all(|r| r.is_err()) {
                    return Err(StageError::Recoverable("no data".to_string()));
                }
            }
            AnalystMode::Ungrounded => {}
        }
        Ok(self.text.clone().unwrap_or_else(|| grounded_report(self.kind)))
    }
}

/// Panics on every call.
pub struct PanickingAnalyst(pub AnalystKind);

#[async_trait]
impl AnalystStage for PanickingAnalyst {
    fn kind(&self) -> AnalystKind {
        self.0
    }

    async fn analyze(&self, _state: &AnalysisState, _tools: &ToolBox) -> Result<String, StageError> {
        panic!("{} analyst exploded", self.0);
    }
}

/// Debater that answers `responses[round - 1]`, repeating the last entry.
pub struct ScriptedDebater {
    speaker: Speaker,
    responses: Vec<String>,
    fail_first: u32,
    fatal_from_round: Option<u32>,
    hang: bool,
    calls: AtomicU32,
}

impl ScriptedDebater {
    pub fn new<I, S>(speaker: Speaker, responses: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        Self {
            speaker,
            responses: responses.into_iter().map(Into::into).collect(),
            fail_first: 0,
            fatal_from_round: None,
            hang: false,
            calls: AtomicU32::new(0),
        }
    }

    /// Fail the first `n` calls with a recoverable error.
    pub fn failing_first(mut self, n: u32) -> Self {
        self.fail_first = n;
        self
    }

    /// Fail fatally once the debate reaches `round`.
    pub fn fatal_from_round(mut self, round: u32) -> Self {
        self.fatal_from_round = Some(round);
        self
    }

    /// Never answer.
    pub fn hanging(mut self) -> Self {
        self.hang = true;
        self
    }

    pub fn calls(&self) -> u32 {
        self.calls.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl Debater for ScriptedDebater {
    fn speaker(&self) -> Speaker {
        self.speaker
    }

    async fn argue(&self, view: &DebateView<'_>) -> Result<String, StageError> {
        let call = self.calls.fetch_add(1, Ordering::SeqCst) + 1;
        if self.hang {
            std::future::pending::<()>().await;
        }
        if call <= self.fail_first {
            return Err(StageError::Recoverable(format!("{} stalled", self.speaker.label())));
        }
        let round = view.round();
        if self.fatal_from_round.is_some_and(|r| round >= r) {
            return Err(StageError::Fatal(format!("{} crashed", self.speaker.label())));
        }
        let index = (round as usize - 1).min(self.responses.len().saturating_sub(1));
        self.responses
            .get(index)
            .cloned()
            .ok_or_else(|| StageError::Fatal("no scripted argument".to_string()))
    }
}

/// Judge that returns a fixed decision and remembers how many rounds it was shown.
pub struct ScriptedJudge {
    kind: DebateKind,
    decision: String,
    failing: bool,
    hang: bool,
    rounds_seen: Mutex<Vec<u32>>,
}

impl ScriptedJudge {
    pub fn new(kind: DebateKind, decision: impl Into<String>) -> Self {
        Self {
            kind,
            decision: decision.into(),
            failing: false,
            hang: false,
            rounds_seen: Mutex::new(Vec::new()),
        }
    }

    /// Fails every call with a recoverable error.
    pub fn failing(kind: DebateKind) -> Self {
        let mut judge = Self::new(kind, "");
        judge.failing = true;
        judge
    }

    /// Never rule.
    pub fn hanging(mut self) -> Self {
        self.hang = true;
        self
    }

    pub fn rounds_seen(&self) -> Vec<u32> {
        self.rounds_seen.lock().map(|r| r.clone()).unwrap_or_default()
    }
}

#[async_trait]
impl DebateJudge for ScriptedJudge {
    fn kind(&self) -> DebateKind {
        self.kind
    }

    async fn judge(&self, view: &DebateView<'_>) -> Result<String, StageError> {
        if let Ok(mut seen) = self.rounds_seen.lock() {
            seen.push(view.debate.round_count());
        }
        if self.hang {
            std::future::pending::<()>().await;
        }
        if self.failing {
            return Err(StageError::Recoverable("judge output malformed".to_string()));
        }
        Ok(self.decision.clone())
    }
}

pub struct ScriptedTrader {
    plan: String,
}

impl ScriptedTrader {
    pub fn new(plan: impl Into<String>) -> Self {
        Self { plan: plan.into() }
    }
}

#[async_trait]
impl TraderStage for ScriptedTrader {
    async fn plan(&self, state: &AnalysisState) -> Result<String, StageError> {
        if state.investment_plan().is_none() {
            return Err(StageError::Fatal("no investment plan".to_string()));
        }
        Ok(self.plan.clone())
    }
}

/// Returns `scores[round - 1]` for the latest committed round, repeating the last entry.
pub struct FixedScorer {
    scores: Vec<Decimal>,
}

impl FixedScorer {
    pub fn new(scores: impl IntoIterator<Item = Decimal>) -> Self {
        Self {
            scores: scores.into_iter().collect(),
        }
    }
}

impl QualityScorer for FixedScorer {
    fn score(&self, debate: &DebateState) -> Decimal {
        let Some(last) = self.scores.len().checked_sub(1) else {
            return Decimal::ZERO;
        };
        match debate.round_count() {
            0 => Decimal::ZERO,
            round => self.scores[(round as usize - 1).min(last)],
        }
    }
}

/// All four analysts, grounded, each with one static source.
pub fn grounded_analysts() -> Vec<AnalystBinding> {
    [
        (AnalystKind::Market, "prices"),
        (AnalystKind::Sentiment, "social"),
        (AnalystKind::News, "news"),
        (AnalystKind::Fundamentals, "fundamentals"),
    ]
    .into_iter()
    .map(|(kind, source)| {
        AnalystBinding::new(
            Arc::new(ScriptedAnalyst::grounded(kind)),
            vec![Arc::new(StaticSource::new(source)) as Arc<dyn DataSource>],
        )
    })
    .collect()
}

/// A complete scripted pipeline around `analysts`. Both debates agree on BUY.
pub fn scripted_stages(analysts: Vec<AnalystBinding>) -> PipelineStages {
    PipelineStages {
        analysts,
        bull: Arc::new(ScriptedDebater::new(
            Speaker::Bull,
            ["Services growth of 14% justifies the multiple. BUY"],
        )),
        bear: Arc::new(ScriptedDebater::new(
            Speaker::Bear,
            ["China exposure is a real risk, but the buyback cushions it. BUY"],
        )),
        research_judge: Arc::new(ScriptedJudge::new(
            DebateKind::Research,
            "The bull case is better supported.\n\nFINAL TRANSACTION PROPOSAL: **BUY**",
        )),
        trader: Arc::new(ScriptedTrader::new(
            "Enter 1/3 now, add on a pullback to the 50-day. FINAL TRANSACTION PROPOSAL: **BUY**",
        )),
        risky: Arc::new(ScriptedDebater::new(Speaker::Risky, ["Size up. BUY"])),
        safe: Arc::new(ScriptedDebater::new(Speaker::Safe, ["Keep a tight stop. BUY"])),
        neutral: Arc::new(ScriptedDebater::new(Speaker::Neutral, ["Balanced entry. BUY"])),
        risk_judge: Arc::new(ScriptedJudge::new(
            DebateKind::Risk,
            "Approve with a 7% stop.\n\nFINAL TRANSACTION PROPOSAL: **BUY**",
        )),
        scorer: Arc::new(AgreementScorer),
        signal_model: None,
    }
}
