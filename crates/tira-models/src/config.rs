use std::time::Duration;

use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};

use crate::analysis_state::AnalystKind;

/// Top-level configuration for TIRA.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct TiraConfig {
    #[serde(default)]
    pub pipeline: PipelineConfig,
    #[serde(default)]
    pub llm: LlmConfig,
    #[serde(default)]
    pub data: DataConfig,
    #[serde(default = "default_analysts")]
    pub analysts: Vec<AnalystConfig>,
}

impl Default for TiraConfig {
    fn default() -> Self {
        Self {
            pipeline: PipelineConfig::default(),
            llm: LlmConfig::default(),
            data: DataConfig::default(),
            analysts: default_analysts(),
        }
    }
}

impl TiraConfig {
    pub fn analyst(&self, kind: AnalystKind) -> Option<&AnalystConfig> {
        self.analysts.iter().find(|a| a.kind == kind)
    }
}

/// Bounds and deadlines for the orchestration engine.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct PipelineConfig {
    /// Maximum bull/bear rounds in the research debate.
    pub max_debate_rounds: u32,
    /// Maximum risky/safe/neutral rounds in the risk debate.
    pub max_risk_discuss_rounds: u32,
    /// Maximum stage invocations in one run before forced termination.
    pub max_recursion_steps: u32,
    /// Attempts per stage (first try included) before a recoverable failure turns fatal.
    pub tool_retry_attempts: u32,
    pub per_stage_timeout_seconds: u64,
    pub run_timeout_seconds: u64,
    /// Quality score (0.0 to 1.0) at which a debate is considered settled early.
    pub consensus_quality_threshold: Decimal,
    /// Continue past a failed analyst with an "analyst unavailable" sentinel instead of aborting.
    pub proceed_with_degraded_analysts: bool,
    /// Ask the quick model to classify decisions the keyword scan cannot resolve.
    pub signal_llm_fallback: bool,
    pub backoff: BackoffConfig,
}

impl Default for PipelineConfig {
    fn default() -> Self {
        Self {
            max_debate_rounds: 1,
            max_risk_discuss_rounds: 1,
            max_recursion_steps: 100,
            tool_retry_attempts: 3,
            per_stage_timeout_seconds: 120,
            run_timeout_seconds: 1800,
            consensus_quality_threshold: Decimal::new(8, 1),
            proceed_with_degraded_analysts: true,
            signal_llm_fallback: false,
            backoff: BackoffConfig::default(),
        }
    }
}

impl PipelineConfig {
    pub fn per_stage_timeout(&self) -> Duration {
        Duration::from_secs(self.per_stage_timeout_seconds)
    }

    pub fn run_timeout(&self) -> Duration {
        Duration::from_secs(self.run_timeout_seconds)
    }
}

/// Jittered exponential backoff between retries.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct BackoffConfig {
    pub initial_ms: u64,
    pub multiplier: f64,
    pub max_ms: u64,
    /// Random extra delay in `[0, jitter_ms]` added to every sleep.
    pub jitter_ms: u64,
}

impl Default for BackoffConfig {
    fn default() -> Self {
        Self {
            initial_ms: 500,
            multiplier: 2.0,
            max_ms: 10_000,
            jitter_ms: 250,
        }
    }
}

/// Models used by LLM-backed stages.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct LlmConfig {
    /// Model for judges (research manager, risk manager).
    pub deep_think_model: String,
    /// Model for analysts, debaters, trader and signal fallback.
    pub quick_think_model: String,
    /// Timeout for a single CLI invocation.
    pub timeout_seconds: u64,
}

impl Default for LlmConfig {
    fn default() -> Self {
        Self {
            deep_think_model: "claude-sonnet-4-5-20250929".to_string(),
            quick_think_model: "claude-3-5-haiku-latest".to_string(),
            timeout_seconds: 90,
        }
    }
}

/// Location of the vendor data snapshot read by the bundled data sources.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct DataConfig {
    /// Path to the shared SQLite snapshot (written by external fetch jobs, read by TIRA).
    pub sqlite_path: String,
    /// Maximum number of payloads kept in the in-memory moka cache, and in each run's fetch memo.
    pub memory_max_capacity: u64,
    pub memory_ttl_seconds: u64,
}

impl Default for DataConfig {
    fn default() -> Self {
        Self {
            sqlite_path: "data/tira_snapshots.db".to_string(),
            memory_max_capacity: 10_000,
            memory_ttl_seconds: 300,
        }
    }
}

/// Configuration for a single analyst stage.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct AnalystConfig {
    pub kind: AnalystKind,
    #[serde(default = "default_true")]
    pub enabled: bool,
    /// Data source names this analyst fetches from.
    #[serde(default)]
    pub sources: Vec<String>,
    /// Override model for this analyst. Falls back to `LlmConfig::quick_think_model`.
    #[serde(default)]
    pub model: Option<String>,
}

impl AnalystConfig {
    pub fn new(kind: AnalystKind, sources: &[&str]) -> Self {
        Self {
            kind,
            enabled: true,
            sources: sources.iter().map(|s| s.to_string()).collect(),
            model: None,
        }
    }
}

fn default_true() -> bool {
    true
}

fn default_analysts() -> Vec<AnalystConfig> {
    vec![
        AnalystConfig::new(AnalystKind::Market, &["prices", "indicators"]),
        AnalystConfig::new(AnalystKind::Sentiment, &["social"]),
        AnalystConfig::new(AnalystKind::News, &["news", "global_news"]),
        AnalystConfig::new(
            AnalystKind::Fundamentals,
            &["fundamentals", "balance_sheet", "income_statement"],
        ),
    ]
}

#[cfg(test)]
mod tests {
    use super::*;
    use rust_decimal_macros::dec;

    #[test]
    fn roundtrip_tira_config() {
        let config = TiraConfig::default();
        let json = serde_json::to_string(&config).unwrap();
        let deserialized: TiraConfig = serde_json::from_str(&json).unwrap();
        assert_eq!(config, deserialized);
    }

    #[test]
    fn default_config_has_four_enabled_analysts() {
        let config = TiraConfig::default();
        assert_eq!(config.analysts.len(), 4);
        assert!(config.analysts.iter().all(|a| a.enabled && !a.sources.is_empty()));
        assert!(config.analyst(AnalystKind::News).is_some());
    }

    #[test]
    fn run_deadline_dwarfs_stage_deadline() {
        let pipeline = PipelineConfig::default();
        assert!(pipeline.run_timeout() > pipeline.per_stage_timeout() * 10);
        assert_eq!(pipeline.consensus_quality_threshold, dec!(0.8));
    }

    #[test]
    fn config_from_toml() {
        let toml_str = r#"
[pipeline]
max_debate_rounds = 3
max_risk_discuss_rounds = 2
tool_retry_attempts = 4
run_timeout_seconds = 600
consensus_quality_threshold = "0.75"
proceed_with_degraded_analysts = false

[pipeline.backoff]
initial_ms = 100
jitter_ms = 0

[llm]
quick_think_model = "claude-3-5-haiku-latest"

[data]
sqlite_path = "/tmp/snapshots.db"

[[analysts]]
kind = "market"
sources = ["prices"]

[[analysts]]
kind = "news"
enabled = false
"#;

        let config: TiraConfig = toml::from_str(toml_str).unwrap();
        assert_eq!(config.pipeline.max_debate_rounds, 3);
        assert_eq!(config.pipeline.consensus_quality_threshold, dec!(0.75));
        assert!(!config.pipeline.proceed_with_degraded_analysts);
        // Unset fields fall back to defaults.
        assert_eq!(config.pipeline.max_recursion_steps, 100);
        assert_eq!(config.pipeline.backoff.initial_ms, 100);
        assert_eq!(config.pipeline.backoff.max_ms, 10_000);
        assert_eq!(config.data.sqlite_path, "/tmp/snapshots.db");
        assert_eq!(config.data.memory_ttl_seconds, 300);
        assert_eq!(config.analysts.len(), 2);
        assert!(config.analysts[0].enabled);
        assert!(!config.analysts[1].enabled);
        assert!(config.analysts[1].sources.is_empty());
    }

    #[test]
    fn empty_toml_uses_defaults() {
        let config: TiraConfig = toml::from_str("").unwrap();
        assert_eq!(config, TiraConfig::default());
    }
}
