//! Bounded retries and bounded iteration.
//!
//! [`RetryPolicy`] caps attempts per stage invocation with jittered exponential backoff.
//! [`RoundController`] owns the run-wide stage-invocation counter and is the only code that
//! advances debate rounds or declares consensus.

use std::future::Future;
use std::sync::atomic::{AtomicU32, Ordering};
use std::time::Duration;

use rand::Rng;
use rust_decimal::Decimal;
use tira_models::{BackoffConfig, DebateState, DebateTurn, PipelineConfig, StageId};
use tracing::{debug, warn};

use crate::error::{PipelineError, StageError};

/// A stage result together with the number of attempts it took.
#[derive(Debug, Clone, PartialEq)]
pub struct Attempted<T> {
    pub value: T,
    pub attempts: u32,
}

#[derive(Debug, Clone)]
pub struct RetryPolicy {
    max_attempts: u32,
    backoff: BackoffConfig,
}

impl RetryPolicy {
    pub fn new(max_attempts: u32, backoff: BackoffConfig) -> Self {
        Self {
            max_attempts: max_attempts.max(1),
            backoff,
        }
    }

    pub fn from_config(config: &PipelineConfig) -> Self {
        Self::new(config.tool_retry_attempts, config.backoff.clone())
    }

    pub fn max_attempts(&self) -> u32 {
        self.max_attempts
    }

    /// Delay before retry number `retry` (1-based), without jitter.
    pub fn base_delay(&self, retry: u32) -> Duration {
        let exponent = retry.saturating_sub(1).min(32) as i32;
        let scaled = self.backoff.initial_ms as f64 * self.backoff.multiplier.max(1.0).powi(exponent);
        Duration::from_millis(scaled.min(self.backoff.max_ms as f64) as u64)
    }

    /// [`base_delay`](Self::base_delay) plus up to `jitter_ms` of random spread.
    pub fn delay(&self, retry: u32) -> Duration {
        let jitter = if self.backoff.jitter_ms == 0 {
            0
        } else {
            rand::rng().random_range(0..=self.backoff.jitter_ms)
        };
        self.base_delay(retry) + Duration::from_millis(jitter)
    }

    /// Run `op` until it succeeds, fails fatally or the attempt budget is spent.
    ///
    /// Every attempt counts as one stage invocation against `controller`. `op` receives the
    /// 1-based attempt number.
    pub async fn execute<T, F, Fut>(
        &self,
        stage: StageId,
        controller: &RoundController,
        mut op: F,
    ) -> Result<Attempted<T>, PipelineError>
    where
        F: FnMut(u32) -> Fut,
        Fut: Future<Output = Result<T, StageError>>,
    {
        let mut attempt = 1;
        loop {
            controller.step(stage)?;

            let error = match op(attempt).await {
                Ok(value) => {
                    if attempt > 1 {
                        debug!(%stage, attempt, "stage succeeded after retry");
                    }
                    return Ok(Attempted {
                        value,
                        attempts: attempt,
                    });
                }
                Err(StageError::Cancelled) => return Err(PipelineError::Cancelled),
                Err(e) => e,
            };

            if !error.is_retryable() || attempt >= self.max_attempts {
                warn!(%stage, attempt, error = %error, "stage failed, escalating");
                return Err(PipelineError::Stage {
                    stage,
                    attempts: attempt,
                    error,
                });
            }

            let delay = self.delay(attempt);
            warn!(
                %stage,
                attempt,
                max_attempts = self.max_attempts,
                delay_ms = delay.as_millis() as u64,
                error = %error,
                "stage attempt failed, retrying"
            );
            tokio::time::sleep(delay).await;
            attempt += 1;
        }
    }
}

/// Run-wide iteration guard and single writer of debate rounds.
#[derive(Debug)]
pub struct RoundController {
    steps: AtomicU32,
    max_steps: u32,
}

impl RoundController {
    pub fn new(max_steps: u32) -> Self {
        Self {
            steps: AtomicU32::new(0),
            max_steps,
        }
    }

    /// Count one stage invocation. Fails once the run has used up its budget.
    pub fn step(&self, stage: StageId) -> Result<u32, PipelineError> {
        let taken = self.steps.fetch_add(1, Ordering::SeqCst) + 1;
        if taken > self.max_steps {
            warn!(%stage, limit = self.max_steps, "recursion limit reached");
            return Err(PipelineError::RecursionLimit {
                limit: self.max_steps,
            });
        }
        Ok(taken)
    }

    pub fn steps_taken(&self) -> u32 {
        self.steps.load(Ordering::SeqCst).min(self.max_steps)
    }

    pub fn max_steps(&self) -> u32 {
        self.max_steps
    }

    /// Commit a fully collected round. The debate record refuses to pass its bound.
    pub fn commit_round(
        &self,
        debate: &mut DebateState,
        turns: Vec<DebateTurn>,
    ) -> Result<u32, PipelineError> {
        Ok(debate.commit_round(turns)?)
    }

    /// Record the round's quality score and declare consensus when it meets `threshold`.
    pub fn check_consensus(
        &self,
        debate: &mut DebateState,
        score: Decimal,
        threshold: Decimal,
    ) -> bool {
        debate.record_quality(score);
        let reached = debate.round_count() > 0 && score >= threshold;
        if reached {
            debate.mark_consensus();
        }
        reached
    }
}
