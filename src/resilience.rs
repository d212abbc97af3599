//! Resilience primitives for the dispatcher and the tree walker.
//!
//! Provides a try-acquire concurrency limiter and a timeout wrapper. Retries
//! live in the dispatcher because whether to retry depends on the decoded
//! response, not only on the error.

use crate::error::{CmdError, Result};
use std::future::Future;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;

// ============================================================================
// Bulkhead (Concurrency Limiter)
// ============================================================================

/// Bulkhead for limiting concurrent operations.
///
/// Acquisition never waits: a caller that gets `None` is expected to do the
/// work itself instead of queueing for a slot.
#[derive(Debug)]
pub struct Bulkhead {
    /// Maximum concurrent operations.
    max_concurrent: usize,
    /// Current concurrent operations.
    current: AtomicUsize,
    /// Most permits ever held at once.
    high_water: AtomicUsize,
    /// Name for logging.
    name: String,
}

impl Bulkhead {
    /// Create a new bulkhead.
    pub fn new(name: impl Into<String>, max_concurrent: usize) -> Arc<Self> {
        Arc::new(Self {
            max_concurrent,
            current: AtomicUsize::new(0),
            high_water: AtomicUsize::new(0),
            name: name.into(),
        })
    }

    /// Try to acquire a permit. The permit owns a handle to the bulkhead so it
    /// can move into a spawned task.
    pub fn try_acquire(self: &Arc<Self>) -> Option<BulkheadPermit> {
        loop {
            let current = self.current.load(Ordering::Relaxed);
            if current >= self.max_concurrent {
                return None;
            }
            if self
                .current
                .compare_exchange_weak(current, current + 1, Ordering::AcqRel, Ordering::Relaxed)
                .is_ok()
            {
                self.high_water.fetch_max(current + 1, Ordering::AcqRel);
                return Some(BulkheadPermit {
                    bulkhead: Arc::clone(self),
                });
            }
        }
    }

    /// Get current concurrent operations.
    pub fn current(&self) -> usize {
        self.current.load(Ordering::Relaxed)
    }

    /// Get available permits.
    pub fn available(&self) -> usize {
        self.max_concurrent.saturating_sub(self.current())
    }

    pub fn max_concurrent(&self) -> usize {
        self.max_concurrent
    }

    /// Highest number of permits held at the same time so far.
    pub fn high_water_mark(&self) -> usize {
        self.high_water.load(Ordering::Acquire)
    }

    pub fn name(&self) -> &str {
        &self.name
    }
}

/// Permit for a bulkhead slot. The slot is freed on drop.
#[derive(Debug)]
pub struct BulkheadPermit {
    bulkhead: Arc<Bulkhead>,
}

impl Drop for BulkheadPermit {
    fn drop(&mut self) {
        self.bulkhead.current.fetch_sub(1, Ordering::AcqRel);
    }
}

// ============================================================================
// Timeout Wrapper
// ============================================================================

/// Run `fut` with a deadline. Expiry is an rpc-transport error naming `addr`.
pub async fn with_timeout<Fut, T>(timeout: Duration, addr: &str, fut: Fut) -> Result<T>
where
    Fut: Future<Output = T>,
{
    tokio::time::timeout(timeout, fut)
        .await
        .map_err(|_| CmdError::rpc_transport(addr, format!("timed out after {:?}", timeout)))
}
