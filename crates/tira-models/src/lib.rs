pub mod analysis_state;
pub mod config;
pub mod debate;
pub mod fetch;
pub mod run_outcome;
pub mod signal;
pub mod snapshot_schema;

pub use analysis_state::{
    AnalysisState, AnalystKind, AnalystReport, ContractViolation, IssueCode, ReportSlot, StageId,
    StateDelta,
};
pub use config::{AnalystConfig, BackoffConfig, DataConfig, LlmConfig, PipelineConfig, TiraConfig};
pub use debate::{DebateError, DebateKind, DebateState, DebateTurn, Speaker};
pub use fetch::{FetchPayload, FetchRecord};
pub use run_outcome::{FailureKind, RunFailure, RunOutcome, RunStatus};
pub use signal::TradeSignal;
pub use snapshot_schema::SnapshotRow;
