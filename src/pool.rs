//! Connection pooling for MDS endpoints.
//!
//! The pool keeps a free list of established connections per address. A
//! connection is checked out by exactly one call at a time and handed back
//! with [`ConnectionPool::release`] when the call is done. The map lock is
//! only held for bookkeeping; dialing always happens outside it, so a slow
//! endpoint never stalls checkouts for other addresses.
//!
//! There is no idle timeout. The pool lives for one command invocation.

use crate::error::Result;
use async_trait::async_trait;
use parking_lot::Mutex;
use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::Duration;
use tracing::debug;

/// Factory for connections to an address.
#[async_trait]
pub trait Connector: Send + Sync + 'static {
    type Conn: Send + 'static;

    /// Dial `addr`, giving up after `timeout`.
    async fn connect(&self, addr: &str, timeout: Duration) -> Result<Self::Conn>;

    /// Whether a returned connection may be handed out again.
    fn is_reusable(&self, _conn: &Self::Conn) -> bool {
        true
    }
}

/// Connection pool statistics.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct PoolStats {
    /// Connections dialed.
    pub created: u64,
    /// Checkouts served from the free list.
    pub reused: u64,
    /// Returned connections dropped as broken.
    pub discarded: u64,
    /// Connections currently idle, over all addresses.
    pub idle: usize,
}

#[derive(Default)]
struct PoolStatsInner {
    created: AtomicU64,
    reused: AtomicU64,
    discarded: AtomicU64,
}

/// Per-address cache of established connections.
pub struct ConnectionPool<C: Connector> {
    connector: C,
    idle: Mutex<HashMap<String, Vec<C::Conn>>>,
    stats: PoolStatsInner,
}

impl<C: Connector> ConnectionPool<C> {
    pub fn new(connector: C) -> Self {
        Self {
            connector,
            idle: Mutex::new(HashMap::new()),
            stats: PoolStatsInner::default(),
        }
    }

    /// Check out a connection to `addr`, dialing a new one if none is idle.
    pub async fn acquire(&self, addr: &str, timeout: Duration) -> Result<C::Conn> {
        let cached = self.idle.lock().get_mut(addr).and_then(Vec::pop);
        if let Some(conn) = cached {
            self.stats.reused.fetch_add(1, Ordering::Relaxed);
            return Ok(conn);
        }

        let conn = self.connector.connect(addr, timeout).await?;
        self.stats.created.fetch_add(1, Ordering::Relaxed);
        debug!(addr = %addr, "Dialed new connection");
        Ok(conn)
    }

    /// Return a connection after use. Broken connections are dropped.
    pub fn release(&self, addr: &str, conn: C::Conn) {
        if !self.connector.is_reusable(&conn) {
            self.stats.discarded.fetch_add(1, Ordering::Relaxed);
            debug!(addr = %addr, "Dropping broken connection");
            return;
        }
        self.idle
            .lock()
            .entry(addr.to_string())
            .or_default()
            .push(conn);
    }

    /// Drop every idle connection for `addr`. Returns how many were dropped.
    pub fn evict(&self, addr: &str) -> usize {
        let removed = self.idle.lock().remove(addr);
        removed.map(|conns| conns.len()).unwrap_or(0)
    }

    /// Number of idle connections for one address.
    pub fn idle_count(&self, addr: &str) -> usize {
        self.idle.lock().get(addr).map(Vec::len).unwrap_or(0)
    }

    pub fn stats(&self) -> PoolStats {
        let idle = self.idle.lock().values().map(Vec::len).sum();
        PoolStats {
            created: self.stats.created.load(Ordering::Relaxed),
            reused: self.stats.reused.load(Ordering::Relaxed),
            discarded: self.stats.discarded.load(Ordering::Relaxed),
            idle,
        }
    }

    pub fn connector(&self) -> &C {
        &self.connector
    }
}
