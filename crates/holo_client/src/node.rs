//! Per-node connection pool.
//!
//! A `RedisNode` bounds the connections it has checked out with a semaphore
//! and keeps a short LIFO list of idle connections for reuse. Connections that
//! failed mid-exchange come back through `shutdown_conn` and are closed rather
//! than pooled.

use std::collections::VecDeque;
use std::fmt;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::{Arc, Mutex, MutexGuard};

use async_trait::async_trait;
use serde::Serialize;
use tokio::sync::Semaphore;
use tokio::time;

use crate::config::PoolConfig;
use crate::conn::RespConn;
use crate::error::ClientError;
use crate::types::NodeHandle;

/// Point-in-time pool counters for one node.
#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize)]
pub struct PoolStats {
    pub addr: String,
    pub created: u64,
    pub acquired: u64,
    pub released: u64,
    pub discarded: u64,
    /// Healthy connections closed on release because the idle list was full
    /// or the pool was closed.
    pub evicted: u64,
    pub idle: usize,
    pub available_permits: usize,
}

pub struct RedisNode {
    addr: String,
    config: PoolConfig,
    idle: Mutex<VecDeque<RespConn>>,
    permits: Arc<Semaphore>,
    closed: AtomicBool,
    created: AtomicU64,
    acquired: AtomicU64,
    released: AtomicU64,
    discarded: AtomicU64,
    evicted: AtomicU64,
}

impl fmt::Debug for RedisNode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("RedisNode")
            .field("addr", &self.addr)
            .field("closed", &self.is_closed())
            .finish_non_exhaustive()
    }
}

impl RedisNode {
    pub fn new(addr: impl Into<String>, config: PoolConfig) -> Self {
        Self {
            addr: addr.into(),
            permits: Arc::new(Semaphore::new(config.max_active)),
            idle: Mutex::new(VecDeque::with_capacity(config.max_idle)),
            closed: AtomicBool::new(false),
            created: AtomicU64::new(0),
            acquired: AtomicU64::new(0),
            released: AtomicU64::new(0),
            discarded: AtomicU64::new(0),
            evicted: AtomicU64::new(0),
            config,
        }
    }

    pub fn is_closed(&self) -> bool {
        self.closed.load(Ordering::SeqCst)
    }

    /// Stop handing out connections and drop every idle one. Connections
    /// currently checked out are closed when they come back.
    pub fn close(&self) {
        self.closed.store(true, Ordering::SeqCst);
        self.permits.close();
        let drained = {
            let mut idle = self.idle_list();
            idle.drain(..).count()
        };
        tracing::debug!(node = %self.addr, dropped = drained, "node pool closed");
    }

    pub fn stats(&self) -> PoolStats {
        PoolStats {
            addr: self.addr.clone(),
            created: self.created.load(Ordering::Relaxed),
            acquired: self.acquired.load(Ordering::Relaxed),
            released: self.released.load(Ordering::Relaxed),
            discarded: self.discarded.load(Ordering::Relaxed),
            evicted: self.evicted.load(Ordering::Relaxed),
            idle: self.idle_list().len(),
            available_permits: self.permits.available_permits(),
        }
    }

    fn idle_list(&self) -> MutexGuard<'_, VecDeque<RespConn>> {
        // A panic while holding the lock leaves the list itself intact.
        self.idle.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    /// Most recently released connection that has not sat idle too long.
    fn take_idle(&self) -> Option<RespConn> {
        let max_idle_age = self.config.idle_timeout();
        let mut idle = self.idle_list();
        while let Some(conn) = idle.pop_back() {
            if conn.idle_for() <= max_idle_age {
                return Some(conn);
            }
            tracing::debug!(node = %self.addr, conn = conn.id(), "dropping stale idle connection");
        }
        None
    }

    async fn dial(&self) -> Result<RespConn, ClientError> {
        let conn = RespConn::connect(
            &self.addr,
            self.config.connect_timeout(),
            self.config.io_timeout(),
        )
        .await?;
        self.created.fetch_add(1, Ordering::Relaxed);
        tracing::debug!(node = %self.addr, conn = conn.id(), "connected");
        Ok(conn)
    }
}

#[async_trait]
impl NodeHandle for RedisNode {
    type Conn = RespConn;

    fn addr(&self) -> &str {
        &self.addr
    }

    async fn get_conn(&self) -> Result<RespConn, ClientError> {
        if self.is_closed() {
            return Err(ClientError::PoolClosed(self.addr.clone()));
        }

        let permit = match time::timeout(
            self.config.connect_timeout(),
            Arc::clone(&self.permits).acquire_owned(),
        )
        .await
        {
            Ok(Ok(permit)) => permit,
            Ok(Err(_)) => return Err(ClientError::PoolClosed(self.addr.clone())),
            Err(_) => return Err(ClientError::PoolTimeout(self.addr.clone())),
        };

        let mut conn = match self.take_idle() {
            Some(conn) => conn,
            None => self.dial().await?,
        };
        conn.attach_permit(permit);
        conn.touch();
        self.acquired.fetch_add(1, Ordering::Relaxed);
        Ok(conn)
    }

    fn release_conn(&self, mut conn: RespConn) {
        conn.detach_permit();
        self.released.fetch_add(1, Ordering::Relaxed);
        if !self.is_closed() {
            let mut idle = self.idle_list();
            if idle.len() < self.config.max_idle {
                conn.touch();
                idle.push_back(conn);
                return;
            }
        }
        self.evicted.fetch_add(1, Ordering::Relaxed);
        tracing::debug!(node = %self.addr, conn = conn.id(), "closing released connection");
    }

    fn shutdown_conn(&self, conn: RespConn) {
        self.discarded.fetch_add(1, Ordering::Relaxed);
        tracing::debug!(node = %self.addr, conn = conn.id(), "discarding connection");
        drop(conn);
    }
}
