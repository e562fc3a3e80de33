//! Pipelined batch client for a hash-slot sharded Redis-protocol cluster.
//!
//! Commands are queued on a [`Batch`], grouped by the node owning each key,
//! sent to every node concurrently over one pipelined connection per node,
//! and handed back in the order they were queued.
//!
//! ```no_run
//! # async fn demo() -> Result<(), holo_client::ClientError> {
//! use holo_client::{Cluster, ClusterConfig};
//!
//! let cluster = Cluster::new(ClusterConfig::from_slot_list(
//!     "127.0.0.1:7000=0-8191,127.0.0.1:7001=8192-16383",
//! )?)?;
//! let mut batch = cluster.new_batch();
//! batch.put("SET", ["user:1", "alice"])?;
//! batch.put("GET", ["user:2"])?;
//! batch.put("PING", Vec::<bytes::Bytes>::new())?;
//! let replies = cluster.run_batch(batch).await?;
//! assert_eq!(replies.len(), 3);
//! # Ok(())
//! # }
//! ```

pub mod batch;
pub mod cluster;
pub mod config;
pub mod conn;
pub mod dispatch;
pub mod error;
pub mod node;
pub mod slot;
pub mod types;

#[cfg(test)]
mod testing;

pub use batch::{Batch, NodeBatch, NodeCommand};
pub use cluster::{BatchStatsSnapshot, Cluster};
pub use config::{ClusterConfig, NodeConfig, PoolConfig, SlotRange};
pub use conn::RespConn;
pub use dispatch::run_batch;
pub use error::ClientError;
pub use node::{PoolStats, RedisNode};
pub use slot::key_slot;
pub use types::{NodeHandle, PipelineConn, Reply, Topology};
