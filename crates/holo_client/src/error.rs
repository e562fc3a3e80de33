//! Error types for routing, transactions, pooling and pipelined I/O.

use std::time::Duration;

use thiserror::Error;

#[derive(Debug, Error)]
pub enum ClientError {
    #[error("no key found in args for {0}")]
    NoKey(String),

    #[error("{0} not supported in a batch, split it into single-key commands")]
    Unsupported(String),

    #[error("slot {0} is not served by any node")]
    SlotNotCovered(u16),

    #[error("cluster is empty, no nodes registered")]
    EmptyCluster,

    #[error("transaction command [{cmd}] key [{key}] not hashed in the same slot")]
    CrossSlotTransaction { cmd: String, key: String },

    #[error("MULTI calls can not be nested")]
    NestedMulti,

    #[error("transaction opened by MULTI was never closed with EXEC or DISCARD")]
    UnterminatedTransaction,

    #[error("connect to {addr}: {source}")]
    Connect {
        addr: String,
        #[source]
        source: std::io::Error,
    },

    #[error("connect to {0} timed out")]
    ConnectTimeout(String),

    #[error("connection pool for {0} is closed")]
    PoolClosed(String),

    #[error("timed out waiting for a pooled connection to {0}")]
    PoolTimeout(String),

    #[error("io error: {0}")]
    Io(#[from] std::io::Error),

    #[error("protocol error: {0}")]
    Protocol(String),

    #[error("connection closed by peer")]
    ConnectionClosed,

    #[error("i/o timed out after {0:?}")]
    Timeout(Duration),

    #[error("node task for {addr} did not complete: {reason}")]
    TaskFailed { addr: String, reason: String },

    #[error("node {0} returned fewer replies than commands sent")]
    MissingReply(String),

    #[error("invalid config: {0}")]
    InvalidConfig(String),
}

impl From<redis_protocol::error::RedisProtocolError> for ClientError {
    fn from(err: redis_protocol::error::RedisProtocolError) -> Self {
        ClientError::Protocol(err.to_string())
    }
}

impl ClientError {
    /// Errors raised synchronously by `Batch::put` while choosing a node.
    pub fn is_routing_error(&self) -> bool {
        matches!(
            self,
            Self::NoKey(_) | Self::Unsupported(_) | Self::SlotNotCovered(_) | Self::EmptyCluster
        )
    }

    /// Errors raised by MULTI/EXEC bookkeeping on a batch.
    pub fn is_transaction_error(&self) -> bool {
        matches!(
            self,
            Self::CrossSlotTransaction { .. }
                | Self::NestedMulti
                | Self::UnterminatedTransaction
        )
    }

    /// Errors that leave a connection unusable or prevented acquiring one.
    pub fn is_connection_error(&self) -> bool {
        matches!(
            self,
            Self::Connect { .. }
                | Self::ConnectTimeout(_)
                | Self::PoolClosed(_)
                | Self::PoolTimeout(_)
                | Self::Io(_)
                | Self::Protocol(_)
                | Self::ConnectionClosed
                | Self::Timeout(_)
        )
    }
}
