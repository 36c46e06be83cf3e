//! Bounded retry around engine attempts.
//!
//! Each operation runs `Pending -> Retrying* -> Succeeded | Failed`. The
//! loop lives inside the caller's future and spawns nothing, so dropping
//! that future abandons any pending delay and no further attempt starts.

use crate::engine::{EngineError, EngineOp};
use crate::error::{KvError, Target};
use crate::operation::OperationConfig;
use crate::pool::ConnectionPool;
use std::future::Future;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum OpState {
    Pending,
    /// Waiting to make attempt number `attempt` (1-based).
    Retrying { attempt: u32 },
    Succeeded,
    Failed,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AttemptOutcome {
    Success,
    Transient,
    Permanent,
}

impl AttemptOutcome {
    pub fn of<T>(result: &Result<T, EngineError>) -> Self {
        match result {
            Ok(_) => Self::Success,
            Err(e) if e.is_transient() => Self::Transient,
            Err(_) => Self::Permanent,
        }
    }
}

impl OpState {
    /// State after attempt number `attempts` finished with `outcome`, given a
    /// budget of `retry` attempts beyond the first.
    pub fn advance(self, outcome: AttemptOutcome, attempts: u32, retry: u32) -> OpState {
        match (self, outcome) {
            (Self::Succeeded | Self::Failed, _) => self,
            (_, AttemptOutcome::Success) => Self::Succeeded,
            (_, AttemptOutcome::Permanent) => Self::Failed,
            (_, AttemptOutcome::Transient) if attempts <= retry => Self::Retrying {
                attempt: attempts + 1,
            },
            (_, AttemptOutcome::Transient) => Self::Failed,
        }
    }

    pub fn is_terminal(&self) -> bool {
        matches!(self, Self::Succeeded | Self::Failed)
    }
}

/// Run `attempt` until it succeeds, fails permanently or the retry budget in
/// `config` runs out.
///
/// Every attempt holds a pool connection and is cut off after
/// `config.attempt_timeout`, counted from the start of the checkout. The
/// connection is released before the backoff delay.
pub(crate) async fn with_retries<T, F, Fut>(
    pool: &ConnectionPool,
    op: EngineOp,
    target: Target,
    config: &OperationConfig,
    mut attempt: F,
) -> Result<T, KvError>
where
    F: FnMut() -> Fut,
    Fut: Future<Output = Result<T, EngineError>>,
{
    let m = siblingkv_metrics::metrics();
    let mut state = OpState::Pending;
    let mut attempts = 0u32;

    loop {
        attempts += 1;
        m.attempts.with_label_values(&[op.as_str()]).inc();

        let timed = async {
            let _conn = pool.checkout().await?;
            Ok::<_, KvError>(attempt().await)
        };
        let result = match tokio::time::timeout(config.attempt_timeout, timed).await {
            Ok(Ok(result)) => result,
            Ok(Err(closed)) => return Err(closed),
            Err(_) => Err(EngineError::Timeout(config.attempt_timeout)),
        };

        state = state.advance(AttemptOutcome::of(&result), attempts, config.retry);
        let err = match result {
            Ok(value) => {
                tracing::debug!("{} {} succeeded on attempt {}", op.as_str(), target, attempts);
                return Ok(value);
            }
            Err(e) => e,
        };
        m.failed_attempts.with_label_values(&[err.class()]).inc();

        match state {
            OpState::Retrying { attempt: next } => {
                let delay = config.backoff.delay(attempts);
                tracing::warn!(
                    "{} {} attempt {} failed: {}; retrying (attempt {}) in {:?}",
                    op.as_str(),
                    target,
                    attempts,
                    err,
                    next,
                    delay
                );
                m.retries.inc();
                tokio::time::sleep(delay).await;
            }
            _ if err.is_transient() => {
                tracing::debug!("{} {} gave up after {} attempts", op.as_str(), target, attempts);
                return Err(KvError::RetriesExhausted {
                    op,
                    target,
                    attempts,
                    last: err,
                });
            }
            _ => {
                tracing::debug!("{} {} failed permanently: {}", op.as_str(), target, err);
                return Err(KvError::Permanent {
                    op,
                    target,
                    attempts,
                    source: err,
                });
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::operation::Backoff;
    use siblingkv_common::Location;
    use std::sync::atomic::{AtomicU32, Ordering};
    use std::time::Duration;

    fn target() -> Target {
        Target::Key(Location::new("b", "k"))
    }

    fn quick(retry: u32) -> OperationConfig {
        OperationConfig::new()
            .retry(retry)
            .backoff(Backoff::None)
            .attempt_timeout(Duration::from_millis(50))
    }

    #[test]
    fn test_state_transitions() {
        let s = OpState::Pending;
        assert_eq!(
            s.advance(AttemptOutcome::Transient, 1, 2),
            OpState::Retrying { attempt: 2 }
        );
        assert_eq!(s.advance(AttemptOutcome::Success, 1, 2), OpState::Succeeded);
        assert_eq!(s.advance(AttemptOutcome::Permanent, 1, 2), OpState::Failed);

        let r = OpState::Retrying { attempt: 3 };
        assert_eq!(r.advance(AttemptOutcome::Transient, 3, 2), OpState::Failed);
        assert_eq!(r.advance(AttemptOutcome::Success, 3, 2), OpState::Succeeded);

        assert_eq!(
            OpState::Failed.advance(AttemptOutcome::Success, 4, 9),
            OpState::Failed
        );
        assert!(OpState::Succeeded.is_terminal());
        assert!(!r.is_terminal());
    }

    #[test]
    fn test_zero_retry_budget_fails_after_one_attempt() {
        assert_eq!(
            OpState::Pending.advance(AttemptOutcome::Transient, 1, 0),
            OpState::Failed
        );
    }

    #[tokio::test]
    async fn test_transient_then_success() {
        let pool = ConnectionPool::new(1);
        let calls = AtomicU32::new(0);
        let result = with_retries(&pool, EngineOp::Get, target(), &quick(2), || {
            let n = calls.fetch_add(1, Ordering::SeqCst);
            async move {
                if n < 2 {
                    Err(EngineError::Unavailable("down".into()))
                } else {
                    Ok(n)
                }
            }
        })
        .await
        .unwrap();
        assert_eq!(result, 2);
        assert_eq!(calls.load(Ordering::SeqCst), 3);
        assert_eq!(pool.available(), 1);
    }

    #[tokio::test]
    async fn test_budget_exhausted() {
        let pool = ConnectionPool::new(1);
        let calls = AtomicU32::new(0);
        let err = with_retries(&pool, EngineOp::Put, target(), &quick(1), || {
            calls.fetch_add(1, Ordering::SeqCst);
            async { Err::<(), _>(EngineError::QuorumNotMet { needed: 2, got: 1 }) }
        })
        .await
        .unwrap_err();
        assert!(matches!(err, KvError::RetriesExhausted { attempts: 2, .. }));
        assert_eq!(calls.load(Ordering::SeqCst), 2);
    }

    #[tokio::test]
    async fn test_permanent_is_not_retried() {
        let pool = ConnectionPool::new(1);
        let calls = AtomicU32::new(0);
        let err = with_retries(&pool, EngineOp::Delete, target(), &quick(5), || {
            calls.fetch_add(1, Ordering::SeqCst);
            async { Err::<(), _>(EngineError::Malformed("empty key".into())) }
        })
        .await
        .unwrap_err();
        assert!(matches!(err, KvError::Permanent { attempts: 1, .. }));
        assert_eq!(calls.load(Ordering::SeqCst), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn test_slow_attempt_times_out() {
        let pool = ConnectionPool::new(1);
        let err = with_retries(&pool, EngineOp::Get, target(), &quick(0), || async {
            tokio::time::sleep(Duration::from_secs(60)).await;
            Ok::<_, EngineError>(())
        })
        .await
        .unwrap_err();
        match err {
            KvError::RetriesExhausted { last, .. } => {
                assert_eq!(last, EngineError::Timeout(Duration::from_millis(50)))
            }
            other => panic!("expected timeout, got {other:?}"),
        }
    }

    #[tokio::test(start_paused = true)]
    async fn test_starved_pool_counts_against_attempt_timeout() {
        let pool = ConnectionPool::new(1);
        let held = pool.checkout().await.unwrap();
        let calls = AtomicU32::new(0);

        let err = with_retries(&pool, EngineOp::Get, target(), &quick(1), || {
            calls.fetch_add(1, Ordering::SeqCst);
            async { Ok::<_, EngineError>(()) }
        })
        .await
        .unwrap_err();
        assert!(matches!(
            err,
            KvError::RetriesExhausted {
                attempts: 2,
                last: EngineError::Timeout(_),
                ..
            }
        ));
        assert_eq!(calls.load(Ordering::SeqCst), 0);

        drop(held);
        assert_eq!(pool.available(), 1);
    }

    #[tokio::test]
    async fn test_closed_pool_stops_operation() {
        let pool = ConnectionPool::new(1);
        pool.close();
        let err = with_retries(&pool, EngineOp::Get, target(), &quick(3), || async {
            Ok::<_, EngineError>(())
        })
        .await
        .unwrap_err();
        assert!(matches!(err, KvError::ClientClosed));
    }
}
