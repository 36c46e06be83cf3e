//! Bounded pool of engine connections.
//!
//! A permit stands in for a connection. One is held for the length of a
//! single attempt and returned before the retry delay.

use crate::error::KvError;
use std::sync::Arc;
use tokio::sync::{OwnedSemaphorePermit, Semaphore};

pub const DEFAULT_POOL_SIZE: usize = 16;

#[derive(Debug, Clone)]
pub struct ConnectionPool {
    permits: Arc<Semaphore>,
    size: usize,
}

/// A checked-out connection. Dropping it returns the permit.
#[derive(Debug)]
pub struct PoolGuard {
    _permit: OwnedSemaphorePermit,
}

impl ConnectionPool {
    pub fn new(size: usize) -> Self {
        let size = size.max(1);
        Self {
            permits: Arc::new(Semaphore::new(size)),
            size,
        }
    }

    /// Wait for a free connection.
    pub async fn checkout(&self) -> Result<PoolGuard, KvError> {
        let permit = self
            .permits
            .clone()
            .acquire_owned()
            .await
            .map_err(|_| KvError::ClientClosed)?;
        Ok(PoolGuard { _permit: permit })
    }

    pub fn size(&self) -> usize {
        self.size
    }

    pub fn available(&self) -> usize {
        self.permits.available_permits()
    }

    /// Refuse further checkouts. Guards already out stay valid.
    pub fn close(&self) {
        self.permits.close();
    }

    pub fn is_closed(&self) -> bool {
        self.permits.is_closed()
    }
}

impl Default for ConnectionPool {
    fn default() -> Self {
        Self::new(DEFAULT_POOL_SIZE)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_checkout_and_release() {
        let pool = ConnectionPool::new(2);
        let a = pool.checkout().await.unwrap();
        let _b = pool.checkout().await.unwrap();
        assert_eq!(pool.available(), 0);
        drop(a);
        assert_eq!(pool.available(), 1);
    }

    #[tokio::test]
    async fn test_closed_pool_rejects_checkout() {
        let pool = ConnectionPool::new(1);
        let held = pool.checkout().await.unwrap();
        pool.close();
        assert!(pool.is_closed());
        assert!(matches!(pool.checkout().await, Err(KvError::ClientClosed)));
        drop(held);
    }

    #[test]
    fn test_zero_size_is_clamped() {
        assert_eq!(ConnectionPool::new(0).size(), 1);
    }
}
