//! Fault injection wrapper for any [`Engine`].
//!
//! [`ChaosEngine`] counts calls per operation and can inject random
//! failures, latency, and scripted errors queued for specific operations.

use crate::engine::{Engine, EngineError, EngineOp, FetchReply, PutReply, PutRequest};
use crate::operation::Quorum;
use rand::Rng;
use siblingkv_common::Location;
use std::collections::{HashMap, VecDeque};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use tokio::sync::RwLock;
use tokio::time::Duration;

#[derive(Debug, Clone)]
pub struct ChaosConfig {
    /// Probability of a transient failure \[0.0, 1.0\].
    pub failure_rate: f64,
    /// Fixed latency injected before forwarding.
    pub latency: Duration,
    /// Random additional latency in \[0, jitter\].
    pub jitter: Duration,
}

impl Default for ChaosConfig {
    fn default() -> Self {
        Self {
            failure_rate: 0.0,
            latency: Duration::ZERO,
            jitter: Duration::ZERO,
        }
    }
}

const OPS: usize = 4;

fn slot(op: EngineOp) -> usize {
    match op {
        EngineOp::Get => 0,
        EngineOp::Put => 1,
        EngineOp::Delete => 2,
        EngineOp::ListKeys => 3,
    }
}

pub struct ChaosEngine<E: Engine> {
    inner: Arc<E>,
    config: Arc<RwLock<ChaosConfig>>,
    scripted: Mutex<HashMap<EngineOp, VecDeque<EngineError>>>,
    calls: [AtomicUsize; OPS],
}

impl<E: Engine> std::fmt::Debug for ChaosEngine<E> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ChaosEngine")
            .field("total_calls", &self.total_calls())
            .finish_non_exhaustive()
    }
}

impl<E: Engine> ChaosEngine<E> {
    pub fn new(inner: Arc<E>, config: ChaosConfig) -> Self {
        Self {
            inner,
            config: Arc::new(RwLock::new(config)),
            scripted: Mutex::new(HashMap::new()),
            calls: Default::default(),
        }
    }

    /// Wrap with no chaos: only counts calls.
    pub fn passthrough(inner: Arc<E>) -> Self {
        Self::new(inner, ChaosConfig::default())
    }

    pub fn inner(&self) -> &Arc<E> {
        &self.inner
    }

    /// Make the next `n` calls of `op` fail with `error`.
    pub fn fail_next(&self, op: EngineOp, n: usize, error: EngineError) {
        let mut scripted = self.scripted.lock().unwrap_or_else(|p| p.into_inner());
        let queue = scripted.entry(op).or_default();
        queue.extend(std::iter::repeat(error).take(n));
    }

    /// Queue one error for the next call of `op`, after any already queued.
    pub fn inject(&self, op: EngineOp, error: EngineError) {
        self.fail_next(op, 1, error);
    }

    pub async fn set_failure_rate(&self, rate: f64) {
        self.config.write().await.failure_rate = rate;
    }

    pub async fn set_latency(&self, latency: Duration) {
        self.config.write().await.latency = latency;
    }

    /// Calls made to `op`, including those that failed or timed out.
    pub fn calls(&self, op: EngineOp) -> usize {
        self.calls[slot(op)].load(Ordering::SeqCst)
    }

    pub fn total_calls(&self) -> usize {
        self.calls.iter().map(|c| c.load(Ordering::SeqCst)).sum()
    }

    pub fn reset_calls(&self) {
        for c in &self.calls {
            c.store(0, Ordering::SeqCst);
        }
    }

    fn next_scripted(&self, op: EngineOp) -> Option<EngineError> {
        let mut scripted = self.scripted.lock().unwrap_or_else(|p| p.into_inner());
        scripted.get_mut(&op).and_then(VecDeque::pop_front)
    }

    /// Count the call, then apply latency and any injected failure.
    async fn maybe_fail(&self, op: EngineOp) -> Result<(), EngineError> {
        self.calls[slot(op)].fetch_add(1, Ordering::SeqCst);

        let (delay, failure_rate) = {
            let config = self.config.read().await;
            let jitter_ms = if config.jitter.is_zero() {
                0
            } else {
                rand::thread_rng().gen_range(0..=config.jitter.as_millis() as u64)
            };
            (
                config.latency + Duration::from_millis(jitter_ms),
                config.failure_rate,
            )
        };

        if !delay.is_zero() {
            tokio::time::sleep(delay).await;
        }

        if let Some(error) = self.next_scripted(op) {
            return Err(error);
        }

        if failure_rate > 0.0 && rand::thread_rng().gen_bool(failure_rate.min(1.0)) {
            return Err(EngineError::Unavailable("chaos: random failure".into()));
        }

        Ok(())
    }
}

#[async_trait::async_trait]
impl<E: Engine> Engine for ChaosEngine<E> {
    async fn get(&self, location: &Location, quorum: Quorum) -> Result<FetchReply, EngineError> {
        self.maybe_fail(EngineOp::Get).await?;
        self.inner.get(location, quorum).await
    }

    async fn put(&self, request: PutRequest) -> Result<PutReply, EngineError> {
        self.maybe_fail(EngineOp::Put).await?;
        self.inner.put(request).await
    }

    async fn delete(&self, location: &Location, quorum: Quorum) -> Result<(), EngineError> {
        self.maybe_fail(EngineOp::Delete).await?;
        self.inner.delete(location, quorum).await
    }

    async fn list_keys(&self, bucket: &str) -> Result<Vec<String>, EngineError> {
        self.maybe_fail(EngineOp::ListKeys).await?;
        self.inner.list_keys(bucket).await
    }
}

// ────────────────────────── Tests ──────────────────────────
