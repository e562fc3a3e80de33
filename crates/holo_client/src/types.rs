//! Collaborator contracts consumed by the batching engine.
//!
//! `Topology` maps keys to nodes, `NodeHandle` owns a node's connection pool
//! and `PipelineConn` is one pooled connection speaking the request/response
//! protocol. The engine only sees these traits; `Cluster`, `RedisNode` and
//! `RespConn` are the production implementations.

use std::sync::Arc;

use async_trait::async_trait;
use bytes::Bytes;
use redis_protocol::resp2::types::BytesFrame;

use crate::error::ClientError;

/// One parsed server reply. Opaque to the batching layer; RESP error replies
/// are carried here too.
pub type Reply = BytesFrame;

/// A single connection able to pipeline requests.
#[async_trait]
pub trait PipelineConn: Send + 'static {
    /// Buffer one request. Nothing is transmitted until `flush`.
    fn send(&mut self, cmd: &str, args: &[Bytes]);

    /// Transmit every buffered request as one unit.
    async fn flush(&mut self) -> Result<(), ClientError>;

    /// Read the next reply, in the order requests were sent.
    async fn receive(&mut self) -> Result<Reply, ClientError>;
}

/// A cluster node and its connection pool.
#[async_trait]
pub trait NodeHandle: Send + Sync + 'static {
    type Conn: PipelineConn;

    /// Human readable address, used for logs and error messages.
    fn addr(&self) -> &str;

    async fn get_conn(&self) -> Result<Self::Conn, ClientError>;

    /// Return a healthy connection for reuse.
    fn release_conn(&self, conn: Self::Conn);

    /// Discard a connection left in an indeterminate protocol state.
    fn shutdown_conn(&self, conn: Self::Conn);
}

/// Key-to-node routing.
pub trait Topology {
    type Node: NodeHandle;

    fn node_by_key(&self, key: &[u8]) -> Result<Arc<Self::Node>, ClientError>;

    /// Uniform pick across the cluster, for commands without a key.
    fn random_node(&self) -> Result<Arc<Self::Node>, ClientError>;
}
