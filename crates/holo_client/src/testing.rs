//! Scripted collaborators for unit tests.
//!
//! Keys are routed by their prefix before the first `:`, so `"A:1"` lands on
//! the node named `A`. Replies echo `node|cmd args...` so tests can tell
//! which command produced them.

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use async_trait::async_trait;
use bytes::Bytes;
use redis_protocol::resp2::types::BytesFrame;

use crate::error::ClientError;
use crate::types::{NodeHandle, PipelineConn, Reply, Topology};

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub(crate) enum Failure {
    None,
    Connect,
    Flush,
    /// Fail the read of the reply at this position.
    Read(usize),
}

type FlushLog = Arc<Mutex<Vec<(u64, Vec<String>)>>>;

pub(crate) struct StubNode {
    name: String,
    failure: Failure,
    delay: Duration,
    next_conn: AtomicU64,
    acquired: AtomicU64,
    released: Mutex<Vec<u64>>,
    discarded: Mutex<Vec<u64>>,
    flushed: FlushLog,
}

impl StubNode {
    pub(crate) fn new(name: &str) -> Arc<Self> {
        Self::scripted(name, Failure::None, Duration::ZERO)
    }

    pub(crate) fn scripted(name: &str, failure: Failure, delay: Duration) -> Arc<Self> {
        Arc::new(Self {
            name: name.to_string(),
            failure,
            delay,
            next_conn: AtomicU64::new(1),
            acquired: AtomicU64::new(0),
            released: Mutex::new(Vec::new()),
            discarded: Mutex::new(Vec::new()),
            flushed: Arc::new(Mutex::new(Vec::new())),
        })
    }

    pub(crate) fn name(&self) -> &str {
        &self.name
    }

    pub(crate) fn acquired(&self) -> u64 {
        self.acquired.load(Ordering::SeqCst)
    }

    pub(crate) fn released(&self) -> Vec<u64> {
        self.released.lock().unwrap().clone()
    }

    pub(crate) fn discarded(&self) -> Vec<u64> {
        self.discarded.lock().unwrap().clone()
    }

    /// Commands written per flushed connection, as `cmd arg...` strings.
    pub(crate) fn flushed(&self) -> Vec<(u64, Vec<String>)> {
        self.flushed.lock().unwrap().clone()
    }
}

#[async_trait]
impl NodeHandle for StubNode {
    type Conn = StubConn;

    fn addr(&self) -> &str {
        &self.name
    }

    async fn get_conn(&self) -> Result<StubConn, ClientError> {
        if !self.delay.is_zero() {
            tokio::time::sleep(self.delay).await;
        }
        if self.failure == Failure::Connect {
            return Err(ClientError::ConnectTimeout(self.name.clone()));
        }
        self.acquired.fetch_add(1, Ordering::SeqCst);
        Ok(StubConn {
            id: self.next_conn.fetch_add(1, Ordering::SeqCst),
            name: self.name.clone(),
            failure: self.failure,
            flushed: Arc::clone(&self.flushed),
            pending: Vec::new(),
            inflight: Vec::new(),
            read: 0,
        })
    }

    fn release_conn(&self, conn: StubConn) {
        self.released.lock().unwrap().push(conn.id);
    }

    fn shutdown_conn(&self, conn: StubConn) {
        self.discarded.lock().unwrap().push(conn.id);
    }
}

pub(crate) struct StubConn {
    id: u64,
    name: String,
    failure: Failure,
    flushed: FlushLog,
    pending: Vec<String>,
    inflight: Vec<String>,
    read: usize,
}

#[async_trait]
impl PipelineConn for StubConn {
    fn send(&mut self, cmd: &str, args: &[Bytes]) {
        let mut line = cmd.to_string();
        for arg in args {
            line.push(' ');
            line.push_str(&String::from_utf8_lossy(arg));
        }
        self.pending.push(line);
    }

    async fn flush(&mut self) -> Result<(), ClientError> {
        if self.failure == Failure::Flush {
            return Err(ClientError::Io(std::io::Error::new(
                std::io::ErrorKind::BrokenPipe,
                format!("flush to {} failed", self.name),
            )));
        }
        let sent = std::mem::take(&mut self.pending);
        self.flushed.lock().unwrap().push((self.id, sent.clone()));
        self.inflight.extend(sent);
        Ok(())
    }

    async fn receive(&mut self) -> Result<Reply, ClientError> {
        if self.failure == Failure::Read(self.read) || self.read >= self.inflight.len() {
            return Err(ClientError::ConnectionClosed);
        }
        let line = format!("{}|{}", self.name, self.inflight[self.read]);
        self.read += 1;
        Ok(BytesFrame::BulkString(Bytes::from(line)))
    }
}

/// Routes `"<node>:..."` keys to the node called `<node>`.
pub(crate) struct StubTopology {
    nodes: Vec<Arc<StubNode>>,
}

impl StubTopology {
    pub(crate) fn new(nodes: Vec<Arc<StubNode>>) -> Self {
        Self { nodes }
    }
}

impl Topology for StubTopology {
    type Node = StubNode;

    fn node_by_key(&self, key: &[u8]) -> Result<Arc<StubNode>, ClientError> {
        let key = String::from_utf8_lossy(key);
        let prefix = key.split(':').next().unwrap_or_default();
        self.nodes
            .iter()
            .find(|node| node.name == prefix)
            .cloned()
            .ok_or(ClientError::SlotNotCovered(0))
    }

    fn random_node(&self) -> Result<Arc<StubNode>, ClientError> {
        self.nodes.first().cloned().ok_or(ClientError::EmptyCluster)
    }
}

/// Render a stub reply back to its `node|cmd args` text.
pub(crate) fn reply_text(reply: &Reply) -> String {
    match reply {
        BytesFrame::BulkString(bytes) => String::from_utf8_lossy(bytes).into_owned(),
        other => format!("{other:?}"),
    }
}
