use std::panic::AssertUnwindSafe;
use std::sync::Arc;
use std::time::Instant;

use futures::FutureExt;
use tira_models::{
    AnalysisState, AnalystKind, AnalystReport, ContractViolation, ReportSlot, StateDelta,
};
use tokio::task::JoinSet;
use tracing::{error, info, warn};

use crate::context::RunContext;
use crate::data::{DataSource, ToolBox};
use crate::error::{PipelineError, StageError};
use crate::stage::AnalystStage;
use crate::validator::validate_report;

/// An analyst wired to the data sources it may call.
#[derive(Clone)]
pub struct AnalystBinding {
    pub stage: Arc<dyn AnalystStage>,
    pub sources: Vec<Arc<dyn DataSource>>,
    pub enabled: bool,
}

impl AnalystBinding {
    pub fn new(stage: Arc<dyn AnalystStage>, sources: Vec<Arc<dyn DataSource>>) -> Self {
        Self {
            stage,
            sources,
            enabled: true,
        }
    }

    pub fn disabled(mut self) -> Self {
        self.enabled = false;
        self
    }

    pub fn kind(&self) -> AnalystKind {
        self.stage.kind()
    }
}

/// Terminal state of one analyst task.
#[derive(Debug, Clone, PartialEq)]
pub struct AnalystOutcome {
    pub kind: AnalystKind,
    pub slot: ReportSlot,
    pub elapsed_ms: u64,
    /// Set when the analyst escalated instead of producing a report.
    pub failure: Option<PipelineError>,
}

/// Runs the enabled analysts concurrently and joins them.
pub struct FanOutCoordinator {
    analysts: Vec<AnalystBinding>,
    proceed_degraded: bool,
}

impl FanOutCoordinator {
    pub fn new(analysts: Vec<AnalystBinding>, proceed_degraded: bool) -> Self {
        Self {
            analysts,
            proceed_degraded,
        }
    }

    pub fn analysts(&self) -> &[AnalystBinding] {
        &self.analysts
    }

    /// Spawn one task per enabled analyst and wait for every one of them.
    ///
    /// Outcomes come back in canonical kind order regardless of completion order. A failed
    /// analyst aborts the fan-out unless degraded input is allowed.
    pub async fn run(
        &self,
        snapshot: Arc<AnalysisState>,
        ctx: &Arc<RunContext>,
    ) -> Result<Vec<AnalystOutcome>, PipelineError> {
        let mut tasks = JoinSet::new();
        for binding in self.analysts.iter().filter(|b| b.enabled) {
            let kind = binding.kind();
            let work = analyze(
                Arc::clone(&binding.stage),
                binding.sources.clone(),
                Arc::clone(&snapshot),
                Arc::clone(ctx),
            );
            tasks.spawn(ctx.guard(async move {
                match AssertUnwindSafe(work).catch_unwind().await {
                    Ok(result) => result,
                    Err(_) => {
                        error!(analyst = %kind, "Analyst task panicked");
                        let failure = PipelineError::Stage {
                            stage: kind.owner(),
                            attempts: 1,
                            error: StageError::Fatal("analyst task panicked".to_string()),
                        };
                        Ok(AnalystOutcome {
                            kind,
                            slot: ReportSlot::Unavailable {
                                reason: failure.to_string(),
                            },
                            elapsed_ms: 0,
                            failure: Some(failure),
                        })
                    }
                }
            }));
        }

        let mut outcomes = Vec::new();
        let mut escalation = None;
        while let Some(joined) = tasks.join_next().await {
            match joined {
                Ok(Some(Ok(outcome))) => outcomes.push(outcome),
                Ok(Some(Err(e))) => {
                    escalation.get_or_insert(e);
                }
                Ok(None) => {
                    escalation.get_or_insert(PipelineError::Cancelled);
                }
                Err(e) => {
                    error!(error = %e, "Analyst task aborted");
                    escalation.get_or_insert(PipelineError::Cancelled);
                }
            }
        }

        if let Some(e) = escalation {
            return Err(e);
        }

        outcomes.sort_by_key(|o| o.kind);
        if !self.proceed_degraded {
            if let Some(failure) = outcomes.iter().find_map(|o| o.failure.clone()) {
                return Err(failure);
            }
        }
        Ok(outcomes)
    }
}

/// Run one analyst with retries. Each attempt gets a fresh tool ledger, and the validator
/// runs inside the attempt so a rejected report is retried like any recoverable failure.
async fn analyze(
    stage: Arc<dyn AnalystStage>,
    sources: Vec<Arc<dyn DataSource>>,
    snapshot: Arc<AnalysisState>,
    ctx: Arc<RunContext>,
) -> Result<AnalystOutcome, PipelineError> {
    let kind = stage.kind();
    let start = Instant::now();

    let result = ctx
        .invoke(kind.owner(), |attempt| {
            let stage = Arc::clone(&stage);
            let sources = sources.clone();
            let snapshot = Arc::clone(&snapshot);
            let memo = ctx.memo().clone();
            async move {
                let tools =
                    ToolBox::new(snapshot.ticker(), snapshot.trade_date(), sources, memo);
                let text = stage.analyze(&snapshot, &tools).await?;
                let validation = validate_report(kind, &text, tools.has_tool_data());
                if !validation.valid {
                    return Err(StageError::Rejected {
                        issues: validation.issues,
                        score: validation.score,
                    });
                }
                Ok(AnalystReport {
                    text,
                    sources: tools.records(),
                    attempts: attempt,
                    quality_score: validation.score,
                })
            }
        })
        .await;

    let elapsed_ms = start.elapsed().as_millis() as u64;
    let outcome = |slot: ReportSlot, failure: Option<PipelineError>| AnalystOutcome {
        kind,
        slot,
        elapsed_ms,
        failure,
    };

    match result {
        Ok(report) => {
            info!(
                trace_id = %ctx.trace_id(),
                analyst = %kind,
                attempts = report.attempts,
                score = %report.value.quality_score,
                sources = report.value.sources.len(),
                elapsed_ms,
                "Analyst succeeded"
            );
            Ok(outcome(ReportSlot::Ready(report.value), None))
        }
        Err(PipelineError::Stage {
            stage,
            attempts,
            error,
        }) => {
            let rejected = match &error {
                StageError::Rejected { issues, .. } => Some(issues.clone()),
                _ => None,
            };
            let failure = PipelineError::Stage {
                stage,
                attempts,
                error,
            };
            warn!(
                trace_id = %ctx.trace_id(),
                analyst = %kind,
                attempts,
                error = %failure,
                elapsed_ms,
                "Analyst failed, marking unavailable"
            );
            let slot = match rejected {
                Some(issues) => ReportSlot::Rejected { issues, attempts },
                None => ReportSlot::Unavailable {
                    reason: failure.to_string(),
                },
            };
            Ok(outcome(slot, Some(failure)))
        }
        Err(e) => Err(e),
    }
}

/// Write fan-out results into the state. The four report fields are disjoint, so the
/// result does not depend on the order of `outcomes`.
pub fn merge_outcomes(
    state: &mut AnalysisState,
    outcomes: Vec<AnalystOutcome>,
) -> Result<(), ContractViolation> {
    for outcome in outcomes {
        state.apply(
            outcome.kind.owner(),
            StateDelta::Report {
                kind: outcome.kind,
                slot: outcome.slot,
            },
        )?;
    }
    Ok(())
}
