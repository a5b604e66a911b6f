//! Per-provider concurrency limiter.
//!
//! A counting semaphore caps in-flight requests. Permits are RAII:
//! dropping a [`RequestPermit`] releases its slot, which covers every
//! error path and stream teardown without explicit bookkeeping.

use std::sync::Arc;
use tokio::sync::{OwnedSemaphorePermit, Semaphore};
use tokio::time::Instant;

use crate::error::ProviderError;

/// A held request slot. The slot frees when this drops.
pub struct RequestPermit {
    _permit: OwnedSemaphorePermit,
}

/// Counters exposed for stats endpoints.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct LimiterStats {
    pub capacity: u32,
    pub available: u32,
    pub active: u32,
}

/// Counting semaphore of capacity `max_concurrent_requests`.
pub struct ConcurrencyLimiter {
    semaphore: Arc<Semaphore>,
    capacity: u32,
}

impl ConcurrencyLimiter {
    pub fn new(capacity: u32) -> Self {
        let capacity = capacity.max(1);
        Self {
            semaphore: Arc::new(Semaphore::new(capacity as usize)),
            capacity,
        }
    }

    /// Wait for a slot, but not past `deadline`. On timeout the request
    /// fails with [`ProviderError::PermitTimeout`] and no permit is
    /// consumed.
    pub async fn acquire(&self, deadline: Option<Instant>) -> Result<RequestPermit, ProviderError> {
        let acquire = self.semaphore.clone().acquire_owned();
        let permit = match deadline {
            Some(deadline) => tokio::time::timeout_at(deadline, acquire)
                .await
                .map_err(|_| ProviderError::PermitTimeout)?,
            None => acquire.await,
        };
        // Acquisition only errors when the semaphore was closed by a
        // forced shutdown.
        let permit = permit.map_err(|_| ProviderError::Cancelled)?;
        Ok(RequestPermit { _permit: permit })
    }

    /// Wait until every slot is free, i.e. all in-flight requests have
    /// finished. Used by graceful deregistration; the drained permits
    /// are never returned.
    pub async fn drain(&self, deadline: Option<Instant>) -> Result<(), ProviderError> {
        let acquire = self.semaphore.clone().acquire_many_owned(self.capacity);
        let permits = match deadline {
            Some(deadline) => tokio::time::timeout_at(deadline, acquire)
                .await
                .map_err(|_| ProviderError::Timeout)?,
            None => acquire.await,
        };
        permits.map_err(|_| ProviderError::Cancelled)?.forget();
        Ok(())
    }

    /// Abort all waiters and refuse future acquisitions. Used by forced
    /// deregistration.
    pub fn close(&self) {
        self.semaphore.close();
    }

    pub fn stats(&self) -> LimiterStats {
        let available = self.semaphore.available_permits().min(self.capacity as usize) as u32;
        LimiterStats {
            capacity: self.capacity,
            available,
            active: self.capacity - available,
        }
    }
}
