//! RPC dispatch across candidate MDS endpoints.
//!
//! [`RpcDispatcher::call`] turns one logical call into attempts against a list
//! of addresses:
//!
//! 1. Order the addresses. [`DispatchMode::LeaderFirst`] asks the
//!    [`LeaderResolver`] for the leader and moves it to the front.
//! 2. For each address, check out a pooled connection and invoke the method
//!    under the per-call timeout. Transport failures and transient statuses
//!    (see [`crate::status::should_retry`]) are retried on the same address
//!    after `retry_delay`, up to `max_retries` times. Each address starts with
//!    a fresh budget. Statuses listed in [`RpcCallSpec::stop_on`] end the
//!    address at once even when transient, so the caller can react to them.
//! 3. The first OK response is returned immediately. A final non-OK status
//!    becomes an rpc-result error for that address and the next address is
//!    tried. [`DispatchMode::SingleNode`] stops after the first address.
//! 4. When every address failed, the per-address errors are merged with
//!    [`merge_except_success`].
//!
//! # Example
//!
//! ```rust,no_run
//! use mdsctl::messages::ListMdsRequest;
//! use mdsctl::pool::ConnectionPool;
//! use mdsctl::rpc::{RpcCallSpec, RpcDispatcher};
//! use mdsctl::transport::TcpConnector;
//! use std::sync::Arc;
//!
//! # async fn example() -> mdsctl::error::Result<()> {
//! let dispatcher = RpcDispatcher::new(Arc::new(ConnectionPool::new(TcpConnector)));
//! let spec = RpcCallSpec::new("ListMds", vec!["10.0.0.1:6700".into()]);
//! let reply = dispatcher
//!     .call(&spec, |mut conn| async move {
//!         let result = conn.call(&ListMdsRequest::default()).await;
//!         (conn, result)
//!     })
//!     .await?;
//! println!("{} nodes", reply.nodes.len());
//! # Ok(())
//! # }
//! ```

use crate::error::{merge_except_success, CmdError, Result};
use crate::observability::{RPC_ATTEMPTS, RPC_FAILURES, RPC_RETRIES};
use crate::pool::{ConnectionPool, Connector};
use crate::resilience::with_timeout;
use crate::status::{should_retry, RetryStatus, StatusCode};
use async_trait::async_trait;
use metrics::counter;
use std::future::Future;
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, info, warn};

/// How the candidate addresses of a call are used.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum DispatchMode {
    /// Try every address in the given order.
    #[default]
    Failover,
    /// Try the current leader first, then the others.
    LeaderFirst,
    /// Only the first address is authoritative.
    SingleNode,
}

/// Parameters of one logical call. Reusable across a batch.
#[derive(Debug, Clone)]
pub struct RpcCallSpec {
    pub addrs: Vec<String>,
    pub timeout: Duration,
    pub max_retries: u32,
    pub retry_delay: Duration,
    pub show_diagnostics: bool,
    pub method: &'static str,
    pub mode: DispatchMode,
    /// Transient statuses handed straight back instead of retried.
    pub stop_on: Vec<StatusCode>,
}

impl RpcCallSpec {
    pub fn new(method: &'static str, addrs: Vec<String>) -> Self {
        Self {
            addrs,
            timeout: Duration::from_secs(3),
            max_retries: 3,
            retry_delay: Duration::from_millis(100),
            show_diagnostics: false,
            method,
            mode: DispatchMode::Failover,
            stop_on: Vec::new(),
        }
    }

    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = timeout;
        self
    }

    pub fn with_retries(mut self, max_retries: u32, retry_delay: Duration) -> Self {
        self.max_retries = max_retries;
        self.retry_delay = retry_delay;
        self
    }

    pub fn with_mode(mut self, mode: DispatchMode) -> Self {
        self.mode = mode;
        self
    }

    pub fn with_diagnostics(mut self, show: bool) -> Self {
        self.show_diagnostics = show;
        self
    }

    pub fn stop_on(mut self, status: StatusCode) -> Self {
        self.stop_on.push(status);
        self
    }

    /// Same call parameters against a different method and address list.
    pub fn retarget(&self, method: &'static str, addrs: Vec<String>) -> Self {
        Self {
            addrs,
            method,
            ..self.clone()
        }
    }
}

/// Finds the current leader among a set of RPC addresses.
#[async_trait]
pub trait LeaderResolver: Send + Sync {
    async fn resolve_leader(&self, addrs: &[String]) -> Result<String>;
}

/// Issues calls through a shared [`ConnectionPool`].
pub struct RpcDispatcher<C: Connector> {
    pool: Arc<ConnectionPool<C>>,
    resolver: Option<Arc<dyn LeaderResolver>>,
}

impl<C: Connector> Clone for RpcDispatcher<C> {
    fn clone(&self) -> Self {
        Self {
            pool: Arc::clone(&self.pool),
            resolver: self.resolver.clone(),
        }
    }
}

impl<C: Connector> RpcDispatcher<C> {
    pub fn new(pool: Arc<ConnectionPool<C>>) -> Self {
        Self {
            pool,
            resolver: None,
        }
    }

    pub fn with_resolver(mut self, resolver: Arc<dyn LeaderResolver>) -> Self {
        self.resolver = Some(resolver);
        self
    }

    pub fn pool(&self) -> &Arc<ConnectionPool<C>> {
        &self.pool
    }

    /// Run one logical call. `invoke` receives a checked-out connection and
    /// must hand it back with the outcome; `Err` means a transport failure.
    pub async fn call<R, F, Fut>(&self, spec: &RpcCallSpec, mut invoke: F) -> Result<R>
    where
        R: RetryStatus,
        F: FnMut(C::Conn) -> Fut,
        Fut: Future<Output = (C::Conn, Result<R>)>,
    {
        let addrs = self.ordered_addrs(spec).await;
        if addrs.is_empty() {
            return Err(CmdError::internal(format!(
                "{}: no address to call",
                spec.method
            )));
        }

        let mut errors = Vec::with_capacity(addrs.len());
        for addr in &addrs {
            match self.call_addr(spec, addr, &mut invoke).await {
                Ok(response) => return Ok(response),
                Err(e) => errors.push(e),
            }
            if spec.mode == DispatchMode::SingleNode {
                break;
            }
        }

        Err(merge_except_success(&errors))
    }

    /// Run one call per spec concurrently. Results come back in input order.
    pub async fn call_many<R, F, Fut>(&self, specs: Vec<RpcCallSpec>, invoke: F) -> Vec<Result<R>>
    where
        R: RetryStatus + Send + 'static,
        F: Fn(usize, C::Conn) -> Fut + Clone + Send + Sync + 'static,
        Fut: Future<Output = (C::Conn, Result<R>)> + Send + 'static,
    {
        let handles: Vec<_> = specs
            .into_iter()
            .enumerate()
            .map(|(index, spec)| {
                let dispatcher = self.clone();
                let invoke = invoke.clone();
                tokio::spawn(async move {
                    dispatcher
                        .call(&spec, move |conn| invoke(index, conn))
                        .await
                })
            })
            .collect();

        futures::future::join_all(handles)
            .await
            .into_iter()
            .map(|joined| {
                joined.unwrap_or_else(|e| Err(CmdError::internal(format!("rpc task failed: {}", e))))
            })
            .collect()
    }

    async fn ordered_addrs(&self, spec: &RpcCallSpec) -> Vec<String> {
        let mut addrs = spec.addrs.clone();
        if spec.mode != DispatchMode::LeaderFirst || addrs.len() < 2 {
            return addrs;
        }
        let Some(resolver) = &self.resolver else {
            return addrs;
        };

        match resolver.resolve_leader(&addrs).await {
            Ok(leader) => {
                if let Some(pos) = addrs.iter().position(|a| *a == leader) {
                    let leader = addrs.remove(pos);
                    addrs.insert(0, leader);
                }
            }
            Err(e) => {
                warn!(method = spec.method, error = %e, "Leader lookup failed, keeping address order");
            }
        }
        addrs
    }

    /// All attempts against one address.
    async fn call_addr<R, F, Fut>(&self, spec: &RpcCallSpec, addr: &str, invoke: &mut F) -> Result<R>
    where
        R: RetryStatus,
        F: FnMut(C::Conn) -> Fut,
        Fut: Future<Output = (C::Conn, Result<R>)>,
    {
        let mut attempt: u32 = 0;
        loop {
            let conn = match self.pool.acquire(addr, spec.timeout).await {
                Ok(conn) => conn,
                Err(e) => {
                    record_failure(spec, addr, &e);
                    return Err(e);
                }
            };

            counter!(RPC_ATTEMPTS, "method" => spec.method).increment(1);
            // A timed-out call drops its connection along with the future.
            let outcome = match with_timeout(spec.timeout, addr, invoke(conn)).await {
                Ok((conn, result)) => {
                    self.pool.release(addr, conn);
                    result
                }
                Err(e) => Err(e),
            };

            let error = match outcome {
                Ok(response)
                    if should_retry(&response) && !spec.stop_on.contains(&response.status()) =>
                {
                    let status = response.status();
                    CmdError::rpc_result(
                        status.value(),
                        format!("{} on {} returned {}", spec.method, addr, status),
                    )
                }
                Ok(response) if response.status().is_ok() => return Ok(response),
                Ok(response) => {
                    let status = response.status();
                    let e = CmdError::rpc_result(
                        status.value(),
                        format!("{} on {} returned {}", spec.method, addr, status),
                    );
                    record_failure(spec, addr, &e);
                    return Err(e);
                }
                Err(e) => e,
            };

            if attempt >= spec.max_retries {
                record_failure(spec, addr, &error);
                return Err(error);
            }
            attempt += 1;

            counter!(RPC_RETRIES, "method" => spec.method).increment(1);
            if spec.show_diagnostics {
                info!(method = spec.method, addr = %addr, attempt, error = %error, "Retrying");
            } else {
                debug!(method = spec.method, addr = %addr, attempt, error = %error, "Retrying");
            }
            tokio::time::sleep(spec.retry_delay).await;
        }
    }
}

fn record_failure(spec: &RpcCallSpec, addr: &str, error: &CmdError) {
    counter!(RPC_FAILURES, "method" => spec.method).increment(1);
    if spec.show_diagnostics {
        info!(method = spec.method, addr = %addr, code = error.code(), error = %error, "Address failed");
    } else {
        debug!(method = spec.method, addr = %addr, code = error.code(), error = %error, "Address failed");
    }
}
