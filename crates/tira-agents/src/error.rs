use std::time::Duration;

use chrono::NaiveDate;
use rust_decimal::Decimal;
use thiserror::Error;
use tira_models::{ContractViolation, DebateError, FailureKind, IssueCode, StageId};

#[derive(Error, Debug)]
pub enum AgentError {
    #[error("Claude CLI error: {0}")]
    Cli(String),

    #[error("Agent response parse error: {0}")]
    Parse(String),

    #[error("Agent timed out after {0} seconds")]
    Timeout(u64),

    #[error("Fetch error: {0}")]
    Fetch(#[from] FetchError),

    #[error("Cache error: {0}")]
    Cache(#[from] tira_cache::CacheError),

    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),
}

/// Failure of a single `DataSource::fetch`.
#[derive(Error, Debug, Clone, PartialEq)]
pub enum FetchError {
    #[error("{data_source} has no data for {ticker} on or before {as_of}")]
    NotFound {
        data_source: String,
        ticker: String,
        as_of: NaiveDate,
    },

    #[error("no data source named {0} is configured for this analyst")]
    UnknownSource(String),

    #[error("{data_source} unavailable: {reason}")]
    Unavailable { data_source: String, reason: String },
}

/// Outcome of one stage attempt that did not produce a delta.
#[derive(Error, Debug, Clone, PartialEq)]
pub enum StageError {
    #[error("recoverable: {0}")]
    Recoverable(String),

    #[error("fatal: {0}")]
    Fatal(String),

    #[error("report rejected ({}), score {score}", join_issues(.issues))]
    Rejected { issues: Vec<IssueCode>, score: Decimal },

    #[error("stage exceeded its {0:?} deadline")]
    TimedOut(Duration),

    #[error("run cancelled")]
    Cancelled,
}

impl StageError {
    /// Recoverable, rejected and timed-out attempts are retried; everything else escalates.
    pub fn is_retryable(&self) -> bool {
        matches!(
            self,
            StageError::Recoverable(_) | StageError::Rejected { .. } | StageError::TimedOut(_)
        )
    }
}

impl From<AgentError> for StageError {
    fn from(err: AgentError) -> Self {
        match err {
            // CLI hiccups, malformed output, slow models and missing data are all worth a retry.
            AgentError::Cli(_)
            | AgentError::Parse(_)
            | AgentError::Timeout(_)
            | AgentError::Fetch(_)
            | AgentError::Cache(_) => StageError::Recoverable(err.to_string()),
            AgentError::Json(_) => StageError::Fatal(err.to_string()),
        }
    }
}

fn join_issues(issues: &[IssueCode]) -> String {
    issues
        .iter()
        .map(IssueCode::as_str)
        .collect::<Vec<_>>()
        .join(", ")
}

/// Failure that escaped a stage's local retry loop.
#[derive(Error, Debug, Clone, PartialEq)]
pub enum PipelineError {
    #[error("{stage} failed after {attempts} attempt(s): {error}")]
    Stage {
        stage: StageId,
        attempts: u32,
        error: StageError,
    },

    #[error("recursion limit of {limit} stage invocations exceeded")]
    RecursionLimit { limit: u32 },

    #[error(transparent)]
    Contract(#[from] ContractViolation),

    #[error("debate bookkeeping error: {0}")]
    Debate(#[from] DebateError),

    #[error("run cancelled")]
    Cancelled,
}

impl PipelineError {
    pub fn failure_kind(&self) -> FailureKind {
        match self {
            PipelineError::Stage {
                error: StageError::Rejected { .. },
                ..
            } => FailureKind::ValidationRejection,
            PipelineError::Stage { .. } => FailureKind::Fatal,
            PipelineError::RecursionLimit { .. } => FailureKind::RecursionLimit,
            PipelineError::Contract(_) | PipelineError::Debate(_) => FailureKind::Contract,
            PipelineError::Cancelled => FailureKind::Timeout,
        }
    }
}
