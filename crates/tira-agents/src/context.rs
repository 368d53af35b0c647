use std::future::Future;
use std::time::Duration;

use tira_cache::FetchMemo;
use tira_models::{PipelineConfig, StageId};
use tokio_util::sync::CancellationToken;
use tokio_util::task::TaskTracker;
use uuid::Uuid;

use crate::breaker::{Attempted, RetryPolicy, RoundController};
use crate::error::{PipelineError, StageError};
use crate::supervisor::with_deadline;

/// Everything one run shares across its stages, built fresh per run.
pub struct RunContext {
    trace_id: Uuid,
    cancel: CancellationToken,
    tracker: TaskTracker,
    controller: RoundController,
    retry: RetryPolicy,
    stage_timeout: Duration,
    memo: FetchMemo,
}

impl RunContext {
    pub fn new(trace_id: Uuid, config: &PipelineConfig, memo: FetchMemo) -> Self {
        Self {
            trace_id,
            cancel: CancellationToken::new(),
            tracker: TaskTracker::new(),
            controller: RoundController::new(config.max_recursion_steps),
            retry: RetryPolicy::from_config(config),
            stage_timeout: config.per_stage_timeout(),
            memo,
        }
    }

    pub fn trace_id(&self) -> Uuid {
        self.trace_id
    }

    pub fn controller(&self) -> &RoundController {
        &self.controller
    }

    pub fn retry(&self) -> &RetryPolicy {
        &self.retry
    }

    pub fn stage_timeout(&self) -> Duration {
        self.stage_timeout
    }

    pub fn memo(&self) -> &FetchMemo {
        &self.memo
    }

    pub fn tracker(&self) -> &TaskTracker {
        &self.tracker
    }

    pub fn is_cancelled(&self) -> bool {
        self.cancel.is_cancelled()
    }

    pub fn cancel(&self) {
        self.cancel.cancel();
    }

    /// Invoke a stage with the run's retry policy, each attempt bounded by the stage deadline.
    pub async fn invoke<T, F, Fut>(
        &self,
        stage: StageId,
        mut op: F,
    ) -> Result<Attempted<T>, PipelineError>
    where
        F: FnMut(u32) -> Fut,
        Fut: Future<Output = Result<T, StageError>>,
    {
        let deadline = self.stage_timeout;
        let cancel = &self.cancel;
        self.retry
            .execute(stage, &self.controller, |attempt| {
                let attempt_fut = op(attempt);
                async move {
                    if cancel.is_cancelled() {
                        return Err(StageError::Cancelled);
                    }
                    with_deadline(deadline, attempt_fut).await
                }
            })
            .await
    }

    /// Wrap work destined for `tokio::spawn` so it is tracked and stops on run cancellation.
    /// Resolves to `None` when cancelled first.
    pub fn guard<F>(&self, fut: F) -> impl Future<Output = Option<F::Output>> + Send + 'static
    where
        F: Future + Send + 'static,
        F::Output: Send,
    {
        let token = self.cancel.clone();
        self.tracker.track_future(async move {
            tokio::select! {
                biased;
                _ = token.cancelled() => None,
                out = fut => Some(out),
            }
        })
    }

    /// Close the tracker and wait for every guarded task to finish.
    pub async fn shutdown(&self) {
        self.tracker.close();
        self.tracker.wait().await;
    }
}
