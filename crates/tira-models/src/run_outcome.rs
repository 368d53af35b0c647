use serde::{Deserialize, Serialize};

use crate::analysis_state::AnalysisState;
use crate::signal::TradeSignal;

/// Terminal status of a run.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum RunStatus {
    Ok,
    Timeout,
    FatalError,
}

/// Why a run did not finish cleanly.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum FailureKind {
    Timeout,
    Fatal,
    RecursionLimit,
    ValidationRejection,
    Contract,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct RunFailure {
    pub kind: FailureKind,
    pub message: String,
}

/// What the run entry point always returns: a (possibly partial) state plus explicit status.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct RunOutcome {
    pub state: AnalysisState,
    pub signal: TradeSignal,
    /// Raw decision text kept for human triage when the signal is `UNKNOWN`.
    pub unresolved_decision: Option<String>,
    pub status: RunStatus,
    pub failure: Option<RunFailure>,
    pub elapsed_ms: u64,
}

impl RunOutcome {
    pub fn is_ok(&self) -> bool {
        self.status == RunStatus::Ok
    }
}
