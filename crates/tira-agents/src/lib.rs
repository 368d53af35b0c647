pub mod breaker;
pub mod claude_cli;
pub mod context;
pub mod data;
pub mod debate;
pub mod error;
pub mod fanout;
pub mod orchestrator;
pub mod parser;
pub mod prompts;
pub mod signal;
pub mod specialist;
pub mod stage;
pub mod supervisor;
pub mod validator;

pub mod test_support;

pub use context::RunContext;
pub use data::{DataSource, SnapshotSource, ToolBox};
pub use debate::{AgreementScorer, DebateEngine};
pub use error::{AgentError, FetchError, PipelineError, StageError};
pub use orchestrator::{AnalystBinding, Orchestrator, PipelineStages};
pub use specialist::{LlmAnalyst, LlmDebater, LlmJudge, LlmTrader};
pub use stage::{AnalystStage, DebateJudge, Debater, QualityScorer, TraderStage};
