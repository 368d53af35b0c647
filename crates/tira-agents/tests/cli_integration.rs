//! Integration tests that invoke the real Claude CLI.
//!
//! These tests are `#[ignore]` by default. They require:
//! - The `claude` CLI installed and on PATH
//! - Valid Anthropic credentials configured
//!
//! Run explicitly with:
//! ```bash
//! cargo test -p tira-agents --test cli_integration -- --ignored
//! ```

use std::sync::Arc;
use std::time::Duration;

use chrono::NaiveDate;
use tira_agents::claude_cli::{check_cli_available, invoke_claude, ClaudeCli, ClaudeCliConfig};
use tira_agents::parser::{extract_json, parse_judgement};
use tira_agents::prompts::judge_system_prompt;
use tira_agents::signal::SignalProcessor;
use tira_agents::stage::DebateView;
use tira_agents::{DebateJudge, LlmJudge};
use tira_models::{AnalysisState, DebateKind, DebateState, TradeSignal};

const MODEL: &str = "claude-3-5-haiku-latest";

#[tokio::test]
#[ignore]
async fn cli_is_available() {
    assert!(
        check_cli_available().await,
        "claude CLI not found on PATH, install it from https://docs.anthropic.com/en/docs/claude-code"
    );
}

/// Catches CLI output format changes (new wrapping, banners) before they reach the judges.
#[tokio::test]
#[ignore]
async fn cli_output_is_parseable_json() {
    if !check_cli_available().await {
        eprintln!("Skipping: claude CLI not available");
        return;
    }

    let config = ClaudeCliConfig {
        model: MODEL.to_string(),
        timeout: Duration::from_secs(30),
    };
    let system_prompt = concat!(
        "You are a test agent. Respond ONLY with a JSON object, no other text.\n",
        "The JSON must have exactly these fields:\n",
        "- \"status\": the string \"ok\"\n",
        "- \"echo\": repeat back the user's message exactly\n",
    );

    let raw = invoke_claude(system_prompt, "ping", &config)
        .await
        .expect("Claude CLI invocation failed");
    let json_str = extract_json(&raw)
        .unwrap_or_else(|e| panic!("CLI output no longer yields JSON ({e}).\nRaw output:\n{raw}"));
    let value: serde_json::Value = serde_json::from_str(&json_str).unwrap();
    assert_eq!(value["status"], "ok");
}

/// The judge prompt must produce a ruling `parse_judgement` accepts.
#[tokio::test]
#[ignore]
async fn judge_prompt_yields_valid_judgement() {
    if !check_cli_available().await {
        eprintln!("Skipping: claude CLI not available");
        return;
    }

    let config = ClaudeCliConfig {
        model: MODEL.to_string(),
        timeout: Duration::from_secs(60),
    };
    let user_prompt = concat!(
        "Ticker: AAPL, trade date 2024-05-10.\n",
        "Bull Analyst: Services revenue grew 14% and the $110B buyback supports the price. BUY\n",
        "Bear Analyst: China sales fell 8% and the multiple is 28x earnings. SELL\n",
    );

    let raw = invoke_claude(&judge_system_prompt(DebateKind::Research), user_prompt, &config)
        .await
        .expect("Claude CLI invocation failed");
    let judgement = parse_judgement(&raw)
        .unwrap_or_else(|e| panic!("judge output rejected ({e}).\nRaw output:\n{raw}"));
    assert!(judgement.decision.is_actionable());
}

#[tokio::test]
#[ignore]
async fn llm_judge_rules_on_empty_debate() {
    if !check_cli_available().await {
        eprintln!("Skipping: claude CLI not available");
        return;
    }

    let model = Arc::new(ClaudeCli::new(MODEL, Duration::from_secs(60)));
    let judge = LlmJudge::new(DebateKind::Research, model);
    let state = AnalysisState::new("MSFT", NaiveDate::from_ymd_opt(2024, 5, 10).unwrap(), 0, 0);
    let debate = DebateState::new(DebateKind::Research, 0);
    let view = DebateView {
        state: &state,
        debate: &debate,
        pending: &[],
    };

    let decision = judge.judge(&view).await.expect("judge failed");
    let extracted = SignalProcessor::default().process(Some(&decision), None).await;
    assert_ne!(extracted.signal, TradeSignal::Unknown, "decision: {decision}");
}
