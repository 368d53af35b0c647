use std::sync::Arc;

use async_trait::async_trait;
use tira_models::{AnalysisState, AnalystKind, DebateKind, Speaker};
use tracing::debug;

use crate::claude_cli::LanguageModel;
use crate::data::ToolBox;
use crate::error::StageError;
use crate::parser::parse_judgement;
use crate::prompts::{
    analyst_system_prompt, debater_system_prompt, judge_system_prompt, trader_system_prompt,
};
use crate::signal::extract_signal;
use crate::stage::{AnalystStage, DebateJudge, DebateView, Debater, TraderStage};

/// Analyst that fetches every configured source, then asks the model to write the report.
pub struct LlmAnalyst {
    kind: AnalystKind,
    model: Arc<dyn LanguageModel>,
}

impl LlmAnalyst {
    pub fn new(kind: AnalystKind, model: Arc<dyn LanguageModel>) -> Self {
        Self { kind, model }
    }
}

#[async_trait]
impl AnalystStage for LlmAnalyst {
    fn kind(&self) -> AnalystKind {
        self.kind
    }

    async fn analyze(&self, state: &AnalysisState, tools: &ToolBox) -> Result<String, StageError> {
        let mut payloads = Vec::new();
        for result in tools.fetch_all().await {
            match result {
                Ok(payload) => payloads.push(payload),
                Err(e) => debug!(analyst = %self.kind, error = %e, "source skipped"),
            }
        }
        if payloads.is_empty() {
            return Err(StageError::Recoverable(format!(
                "no data returned by [{}]",
                tools.source_names().join(", ")
            )));
        }

        let request = serde_json::json!({
            "ticker": state.ticker(),
            "trade_date": state.trade_date(),
            "payloads": payloads,
        });
        let user_prompt = serde_json::to_string_pretty(&request)
            .map_err(|e| StageError::Fatal(format!("cannot encode analyst request: {e}")))?;
        Ok(self
            .model
            .complete(&analyst_system_prompt(self.kind), &user_prompt)
            .await?)
    }
}

/// Shared context block for debaters and judges.
fn debate_context(view: &DebateView<'_>) -> String {
    let state = view.state;
    let mut sections = vec![
        format!("Ticker: {}\nTrade date: {}", state.ticker(), state.trade_date()),
        state.reports_digest(),
    ];
    if view.debate.kind() == DebateKind::Risk {
        if let Some(plan) = state.investment_plan() {
            sections.push(format!("## Investment plan\n{plan}"));
        }
        if let Some(plan) = state.trader_plan() {
            sections.push(format!("## Trader plan\n{plan}"));
        }
    }
    let transcript = view.transcript();
    if !transcript.is_empty() {
        sections.push(format!("## Debate so far\n{transcript}"));
    }
    sections.join("\n\n")
}

pub struct LlmDebater {
    speaker: Speaker,
    model: Arc<dyn LanguageModel>,
}

impl LlmDebater {
    pub fn new(speaker: Speaker, model: Arc<dyn LanguageModel>) -> Self {
        Self { speaker, model }
    }
}

#[async_trait]
impl Debater for LlmDebater {
    fn speaker(&self) -> Speaker {
        self.speaker
    }

    async fn argue(&self, view: &DebateView<'_>) -> Result<String, StageError> {
        let mut user_prompt = debate_context(view);
        if let Some(turn) = view.last_opponent_turn(self.speaker) {
            user_prompt.push_str(&format!(
                "\n\n## Latest argument to answer ({})\n{}",
                turn.speaker.label(),
                turn.text
            ));
        }
        user_prompt.push_str(&format!("\n\nRound {}. Give your turn.", view.round()));

        let text = self
            .model
            .complete(&debater_system_prompt(self.speaker), &user_prompt)
            .await?;
        Ok(text.trim().to_string())
    }
}

pub struct LlmJudge {
    kind: DebateKind,
    model: Arc<dyn LanguageModel>,
}

impl LlmJudge {
    pub fn new(kind: DebateKind, model: Arc<dyn LanguageModel>) -> Self {
        Self { kind, model }
    }
}

#[async_trait]
impl DebateJudge for LlmJudge {
    fn kind(&self) -> DebateKind {
        self.kind
    }

    async fn judge(&self, view: &DebateView<'_>) -> Result<String, StageError> {
        let mut user_prompt = debate_context(view);
        if view.debate.history().is_empty() {
            user_prompt.push_str("\n\nNo debate took place; rule on the material above.");
        }
        let raw = self
            .model
            .complete(&judge_system_prompt(self.kind), &user_prompt)
            .await?;
        Ok(parse_judgement(&raw)?.render())
    }
}

pub struct LlmTrader {
    model: Arc<dyn LanguageModel>,
}

impl LlmTrader {
    pub fn new(model: Arc<dyn LanguageModel>) -> Self {
        Self { model }
    }
}

#[async_trait]
impl TraderStage for LlmTrader {
    async fn plan(&self, state: &AnalysisState) -> Result<String, StageError> {
        let investment_plan = state
            .investment_plan()
            .ok_or_else(|| StageError::Fatal("trader invoked before an investment plan".into()))?;
        let user_prompt = format!(
            "Ticker: {}\nTrade date: {}\n\n## Investment plan\n{investment_plan}\n\n{}",
            state.ticker(),
            state.trade_date(),
            state.reports_digest()
        );

        let text = self
            .model
            .complete(&trader_system_prompt(), &user_prompt)
            .await?;
        if !extract_signal(&text).signal.is_actionable() {
            return Err(StageError::Recoverable(
                "trader plan does not state an action".to_string(),
            ));
        }
        Ok(text.trim().to_string())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::NaiveDate;
    use std::time::Duration;
    use tira_cache::FetchMemo;
    use tira_models::{DebateState, DebateTurn, StageId, StateDelta};

    use crate::data::DataSource;
    use crate::test_support::{FailingSource, ScriptedModel, StaticSource};

    fn state() -> AnalysisState {
        AnalysisState::new("AAPL", NaiveDate::from_ymd_opt(2024, 5, 10).unwrap(), 1, 1)
    }

    fn tools(sources: Vec<Arc<dyn DataSource>>) -> ToolBox {
        ToolBox::new(
            "AAPL",
            NaiveDate::from_ymd_opt(2024, 5, 10).unwrap(),
            sources,
            FetchMemo::new(10, Duration::from_secs(60)),
        )
    }

    #[tokio::test]
    async fn analyst_sends_payloads_to_model() {
        let model = Arc::new(ScriptedModel::new(["Report body"]));
        let analyst = LlmAnalyst::new(AnalystKind::Market, model.clone());
        let tools = tools(vec![Arc::new(StaticSource::new("prices")) as Arc<dyn DataSource>]);

        let text = analyst.analyze(&state(), &tools).await.unwrap();
        assert_eq!(text, "Report body");
        assert!(tools.has_tool_data());
        assert!(model.last_user_prompt().unwrap().contains("\"payloads\""));
    }

    #[tokio::test]
    async fn analyst_without_any_data_is_recoverable() {
        let model = Arc::new(ScriptedModel::new(["never used"]));
        let analyst = LlmAnalyst::new(AnalystKind::Sentiment, model.clone());
        let tools = tools(vec![Arc::new(FailingSource::new("social")) as Arc<dyn DataSource>]);

        let err = analyst.analyze(&state(), &tools).await.unwrap_err();
        assert!(matches!(err, StageError::Recoverable(_)));
        assert_eq!(model.calls(), 0);
    }

    #[tokio::test]
    async fn debater_answers_latest_opponent() {
        let model = Arc::new(ScriptedModel::new(["  Margins will recover. BUY  "]));
        let debater = LlmDebater::new(Speaker::Bull, model.clone());
        let state = state();
        let debate = DebateState::new(DebateKind::Research, 2);
        let pending = vec![DebateTurn::new(Speaker::Bear, "Margins are shrinking.")];
        let view = DebateView {
            state: &state,
            debate: &debate,
            pending: &pending,
        };

        assert_eq!(debater.argue(&view).await.unwrap(), "Margins will recover. BUY");
        let prompt = model.last_user_prompt().unwrap();
        assert!(prompt.contains("Latest argument to answer (Bear Analyst)"));
        assert!(prompt.contains("Round 1."));
    }

    #[tokio::test]
    async fn judge_renders_structured_ruling() {
        let model = Arc::new(ScriptedModel::new([
            r#"{"decision": "SELL", "rationale": "Bear case is better supported."}"#,
        ]));
        let judge = LlmJudge::new(DebateKind::Risk, model);
        let state = state();
        let debate = DebateState::new(DebateKind::Risk, 0);
        let view = DebateView {
            state: &state,
            debate: &debate,
            pending: &[],
        };

        let decision = judge.judge(&view).await.unwrap();
        assert!(decision.ends_with("FINAL TRANSACTION PROPOSAL: **SELL**"));
        assert_eq!(judge.stage(), StageId::RiskManager);
    }

    #[tokio::test]
    async fn malformed_ruling_is_recoverable() {
        let judge = LlmJudge::new(
            DebateKind::Research,
            Arc::new(ScriptedModel::new(["I think buying is wise."])),
        );
        let state = state();
        let debate = DebateState::new(DebateKind::Research, 0);
        let view = DebateView {
            state: &state,
            debate: &debate,
            pending: &[],
        };
        assert!(matches!(
            judge.judge(&view).await,
            Err(StageError::Recoverable(_))
        ));
    }

    #[tokio::test]
    async fn trader_needs_plan_and_action() {
        let trader = LlmTrader::new(Arc::new(ScriptedModel::new([
            "Scale in slowly.",
            "Scale in slowly. FINAL TRANSACTION PROPOSAL: **BUY**",
        ])));
        let mut state = state();
        assert!(matches!(trader.plan(&state).await, Err(StageError::Fatal(_))));

        state
            .apply(
                StageId::ResearchManager,
                StateDelta::InvestmentPlan("Accumulate".to_string()),
            )
            .unwrap();
        assert!(matches!(
            trader.plan(&state).await,
            Err(StageError::Recoverable(_))
        ));
        assert!(trader.plan(&state).await.unwrap().ends_with("**BUY**"));
    }
}
