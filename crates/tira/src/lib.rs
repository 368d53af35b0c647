//! TIRA - Trading Investment Research Agents
//!
//! Runs a fixed multi-stage analysis pipeline over one ticker and trading date: four
//! analysts in parallel, a bull/bear research debate, a trader, a risk debate and a final
//! BUY/SELL/HOLD signal. Stages are backed by the Claude CLI and read vendor data from a
//! shared SQLite snapshot.
//!
//! # Library Usage
//!
//! ```rust,no_run
//! use tira::models::{TiraConfig, RunOutcome, TradeSignal};
//! use tira::agents::{Orchestrator, PipelineStages, AnalystBinding};
//! use tira::cache::{SnapshotCache, SnapshotReader};
//! ```

pub use tira_agents as agents;
pub use tira_cache as cache;
pub use tira_models as models;

use std::collections::HashSet;
use std::sync::Arc;
use std::time::Duration;

use anyhow::{bail, Context};
use chrono::NaiveDate;
use tira_agents::claude_cli::{ClaudeCli, LanguageModel};
use tira_agents::{
    AgreementScorer, AnalystBinding, DataSource, LlmAnalyst, LlmDebater, LlmJudge, LlmTrader,
    Orchestrator, PipelineStages, SnapshotSource,
};
use tira_cache::{SnapshotCache, SnapshotReader};
use tira_models::{DebateKind, RunOutcome, Speaker, TiraConfig};

/// Build an Orchestrator from configuration, reading vendor data from the configured snapshot.
pub fn build_orchestrator(config: &TiraConfig) -> Result<Orchestrator, anyhow::Error> {
    let sqlite = SnapshotReader::open(&config.data.sqlite_path)
        .with_context(|| format!("Failed to open snapshot: {}", config.data.sqlite_path))?;
    let cache = Arc::new(SnapshotCache::new(
        sqlite,
        config.data.memory_max_capacity,
        Duration::from_secs(config.data.memory_ttl_seconds),
    ));
    build_with_cache(config, cache)
}

/// Build an Orchestrator whose data sources read from `cache`.
pub fn build_with_cache(
    config: &TiraConfig,
    cache: Arc<SnapshotCache>,
) -> Result<Orchestrator, anyhow::Error> {
    let timeout = Duration::from_secs(config.llm.timeout_seconds);
    let quick: Arc<dyn LanguageModel> =
        Arc::new(ClaudeCli::new(config.llm.quick_think_model.clone(), timeout));
    let deep: Arc<dyn LanguageModel> =
        Arc::new(ClaudeCli::new(config.llm.deep_think_model.clone(), timeout));

    let mut seen = HashSet::new();
    let mut analysts = Vec::with_capacity(config.analysts.len());
    for analyst in &config.analysts {
        if !seen.insert(analyst.kind) {
            bail!("analyst '{}' is configured more than once", analyst.kind);
        }
        let model = match &analyst.model {
            Some(name) => Arc::new(ClaudeCli::new(name.clone(), timeout)) as Arc<dyn LanguageModel>,
            None => Arc::clone(&quick),
        };
        let sources = analyst
            .sources
            .iter()
            .map(|name| {
                Arc::new(SnapshotSource::new(name.clone(), Arc::clone(&cache))) as Arc<dyn DataSource>
            })
            .collect();
        let binding = AnalystBinding::new(Arc::new(LlmAnalyst::new(analyst.kind, model)), sources);
        analysts.push(if analyst.enabled {
            binding
        } else {
            binding.disabled()
        });
    }

    let debater = |speaker: Speaker| Arc::new(LlmDebater::new(speaker, Arc::clone(&quick)));
    let stages = PipelineStages {
        analysts,
        bull: debater(Speaker::Bull),
        bear: debater(Speaker::Bear),
        research_judge: Arc::new(LlmJudge::new(DebateKind::Research, Arc::clone(&deep))),
        trader: Arc::new(LlmTrader::new(Arc::clone(&quick))),
        risky: debater(Speaker::Risky),
        safe: debater(Speaker::Safe),
        neutral: debater(Speaker::Neutral),
        risk_judge: Arc::new(LlmJudge::new(DebateKind::Risk, deep)),
        scorer: Arc::new(AgreementScorer),
        signal_model: config.pipeline.signal_llm_fallback.then(|| Arc::clone(&quick)),
    };

    Ok(Orchestrator::new(stages, config.pipeline.clone())
        .with_memo_capacity(config.data.memory_max_capacity))
}

/// Analyze `ticker` as of `trade_date` using the given orchestrator.
pub async fn run(orchestrator: &Orchestrator, ticker: &str, trade_date: NaiveDate) -> RunOutcome {
    orchestrator.run(ticker, trade_date).await
}

#[cfg(test)]
mod tests {
    use super::*;
    use tira_models::{AnalystConfig, AnalystKind};

    fn cache() -> Arc<SnapshotCache> {
        let sqlite = SnapshotReader::open_in_memory().unwrap();
        Arc::new(SnapshotCache::new(sqlite, 10, Duration::from_secs(60)))
    }

    #[test]
    fn bundled_config_parses() {
        let config: TiraConfig = toml::from_str(include_str!("../../../config/tira.toml")).unwrap();
        assert_eq!(config.analysts.len(), 4);
        assert!(config.pipeline.max_debate_rounds >= 1);
    }

    #[test]
    fn builds_from_default_config() {
        let config = TiraConfig::default();
        let orchestrator = build_with_cache(&config, cache()).unwrap();
        assert_eq!(orchestrator.config(), &config.pipeline);
    }

    #[test]
    fn run_memo_capacity_follows_data_config() {
        let mut config = TiraConfig::default();
        config.data.memory_max_capacity = 42;
        let orchestrator = build_with_cache(&config, cache()).unwrap();
        assert_eq!(orchestrator.memo_capacity(), 42);
    }

    #[test]
    fn duplicate_analyst_is_rejected() {
        let mut config = TiraConfig::default();
        config
            .analysts
            .push(AnalystConfig::new(AnalystKind::News, &["news"]));
        let err = build_with_cache(&config, cache()).err().unwrap();
        assert!(err.to_string().contains("news"));
    }

    #[test]
    fn missing_snapshot_is_an_error() {
        let mut config = TiraConfig::default();
        config.data.sqlite_path = "/nonexistent/tira_snapshots.db".to_string();
        assert!(build_orchestrator(&config).is_err());
    }
}
