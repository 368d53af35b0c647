use std::future::Future;
use std::time::{Duration, Instant};

use tracing::warn;

use crate::context::RunContext;
use crate::error::StageError;

/// Bound one stage attempt. Running past `deadline` is a recoverable [`StageError::TimedOut`].
pub async fn with_deadline<T, Fut>(deadline: Duration, fut: Fut) -> Result<T, StageError>
where
    Fut: Future<Output = Result<T, StageError>>,
{
    match tokio::time::timeout(deadline, fut).await {
        Ok(result) => result,
        Err(_) => Err(StageError::TimedOut(deadline)),
    }
}

/// How a supervised run ended.
#[derive(Debug, PartialEq)]
pub enum Supervised<T> {
    Finished(T),
    TimedOut { after: Duration },
}

/// Drive `fut` to completion or until `deadline`, then make sure nothing spawned under `ctx`
/// is still running.
///
/// On timeout the future is dropped first, which releases any borrow of the run state, then
/// the run token is cancelled and the task tracker is drained.
pub async fn supervise<T, Fut>(ctx: &RunContext, deadline: Duration, fut: Fut) -> Supervised<T>
where
    Fut: Future<Output = T>,
{
    let start = Instant::now();
    let outcome = match tokio::time::timeout(deadline, fut).await {
        Ok(value) => Supervised::Finished(value),
        Err(_) => {
            warn!(
                trace_id = %ctx.trace_id(),
                deadline_ms = deadline.as_millis() as u64,
                "run deadline exceeded, cancelling"
            );
            Supervised::TimedOut { after: deadline }
        }
    };

    ctx.cancel();
    ctx.shutdown().await;
    if let Supervised::TimedOut { .. } = outcome {
        warn!(
            trace_id = %ctx.trace_id(),
            elapsed_ms = start.elapsed().as_millis() as u64,
            "all run tasks stopped"
        );
    }
    outcome
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicBool, Ordering};
    use std::sync::Arc;

    use tira_cache::FetchMemo;
    use tira_models::PipelineConfig;
    use uuid::Uuid;

    fn ctx() -> RunContext {
        RunContext::new(
            Uuid::new_v4(),
            &PipelineConfig::default(),
            FetchMemo::new(10, Duration::from_secs(60)),
        )
    }

    #[tokio::test]
    async fn deadline_turns_slow_stage_into_timeout() {
        let result: Result<(), _> = with_deadline(Duration::from_millis(10), async {
            tokio::time::sleep(Duration::from_secs(60)).await;
            Ok(())
        })
        .await;
        assert_eq!(result, Err(StageError::TimedOut(Duration::from_millis(10))));
    }

    #[tokio::test]
    async fn deadline_passes_through_fast_results() {
        let result = with_deadline(Duration::from_secs(1), async { Ok::<_, StageError>(7) }).await;
        assert_eq!(result, Ok(7));
    }

    #[tokio::test]
    async fn supervise_cancels_spawned_work_on_timeout() {
        let ctx = ctx();
        let finished = Arc::new(AtomicBool::new(false));
        let flag = finished.clone();

        let stuck = ctx.guard(async move {
            tokio::time::sleep(Duration::from_secs(3600)).await;
            flag.store(true, Ordering::SeqCst);
        });
        let handle = tokio::spawn(stuck);

        let start = Instant::now();
        let outcome = supervise(&ctx, Duration::from_millis(50), async {
            tokio::time::sleep(Duration::from_secs(3600)).await;
        })
        .await;

        assert_eq!(
            outcome,
            Supervised::TimedOut {
                after: Duration::from_millis(50)
            }
        );
        assert!(start.elapsed() < Duration::from_secs(5));
        assert!(ctx.tracker().is_empty());
        assert_eq!(handle.await.unwrap(), None);
        assert!(!finished.load(Ordering::SeqCst));
    }

    #[tokio::test]
    async fn supervise_returns_finished_value() {
        let ctx = ctx();
        let outcome = supervise(&ctx, Duration::from_secs(5), async { "done" }).await;
        assert_eq!(outcome, Supervised::Finished("done"));
        assert!(ctx.tracker().is_closed());
    }
}
