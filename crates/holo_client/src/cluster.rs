//! Static cluster view: a slot table over per-node pools.

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Instant;

use bytes::Bytes;
use rand::seq::SliceRandom;
use serde::Serialize;

use crate::batch::Batch;
use crate::config::ClusterConfig;
use crate::dispatch;
use crate::error::ClientError;
use crate::node::{PoolStats, RedisNode};
use crate::slot::{key_slot, SLOT_COUNT};
use crate::types::{Reply, Topology};

/// Counters for batches run through one `Cluster`.
#[derive(Default)]
struct BatchStats {
    batches: AtomicU64,
    failed_batches: AtomicU64,
    commands: AtomicU64,
    groups: AtomicU64,
    max_groups: AtomicU64,
    elapsed_total_us: AtomicU64,
    elapsed_max_us: AtomicU64,
}

/// Snapshot of batch counters since the previous snapshot.
#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize)]
pub struct BatchStatsSnapshot {
    pub batches: u64,
    pub failed_batches: u64,
    pub commands: u64,
    pub groups: u64,
    pub max_groups: u64,
    pub elapsed_total_us: u64,
    pub elapsed_max_us: u64,
}

impl BatchStats {
    fn record(&self, commands: u64, groups: u64, elapsed_us: u64, failed: bool) {
        self.batches.fetch_add(1, Ordering::Relaxed);
        if failed {
            self.failed_batches.fetch_add(1, Ordering::Relaxed);
        }
        self.commands.fetch_add(commands, Ordering::Relaxed);
        self.groups.fetch_add(groups, Ordering::Relaxed);
        self.max_groups.fetch_max(groups, Ordering::Relaxed);
        self.elapsed_total_us.fetch_add(elapsed_us, Ordering::Relaxed);
        self.elapsed_max_us.fetch_max(elapsed_us, Ordering::Relaxed);
    }

    fn snapshot_and_reset(&self) -> BatchStatsSnapshot {
        BatchStatsSnapshot {
            batches: self.batches.swap(0, Ordering::Relaxed),
            failed_batches: self.failed_batches.swap(0, Ordering::Relaxed),
            commands: self.commands.swap(0, Ordering::Relaxed),
            groups: self.groups.swap(0, Ordering::Relaxed),
            max_groups: self.max_groups.swap(0, Ordering::Relaxed),
            elapsed_total_us: self.elapsed_total_us.swap(0, Ordering::Relaxed),
            elapsed_max_us: self.elapsed_max_us.swap(0, Ordering::Relaxed),
        }
    }
}

pub struct Cluster {
    nodes: Vec<Arc<RedisNode>>,
    /// Owning node index per slot; `None` for uncovered slots.
    slots: Vec<Option<usize>>,
    stats: BatchStats,
}

impl Cluster {
    pub fn new(config: ClusterConfig) -> Result<Self, ClientError> {
        config.validate()?;
        let mut nodes = Vec::with_capacity(config.nodes.len());
        let mut slots = vec![None; SLOT_COUNT as usize];
        for (idx, node) in config.nodes.iter().enumerate() {
            for range in &node.slots {
                for slot in range.start..=range.end {
                    slots[slot as usize] = Some(idx);
                }
            }
            nodes.push(Arc::new(RedisNode::new(node.addr.clone(), config.pool.clone())));
        }
        let covered = slots.iter().filter(|owner| owner.is_some()).count();
        tracing::info!(nodes = nodes.len(), covered_slots = covered, "cluster configured");
        Ok(Self {
            nodes,
            slots,
            stats: BatchStats::default(),
        })
    }

    pub fn nodes(&self) -> &[Arc<RedisNode>] {
        &self.nodes
    }

    pub fn new_batch(&self) -> Batch<'_, Self> {
        Batch::new(self)
    }

    /// Run `batch` and record it in the batch counters.
    pub async fn run_batch(&self, batch: Batch<'_, Self>) -> Result<Vec<Reply>, ClientError> {
        let commands = batch.len() as u64;
        let groups = batch.group_count() as u64;
        let start = Instant::now();
        let res = dispatch::run_batch(batch).await;
        let elapsed_us = start.elapsed().as_micros() as u64;
        self.stats.record(commands, groups, elapsed_us, res.is_err());
        res
    }

    /// Run one command as a batch of one.
    pub async fn execute<I, A>(&self, cmd: &str, args: I) -> Result<Reply, ClientError>
    where
        I: IntoIterator<Item = A>,
        A: Into<Bytes>,
    {
        let mut batch = self.new_batch();
        batch.put(cmd, args)?;
        let mut replies = self.run_batch(batch).await?;
        replies
            .pop()
            .ok_or_else(|| ClientError::MissingReply(cmd.to_string()))
    }

    /// Close every node pool. Later batches fail with `PoolClosed`.
    pub fn close(&self) {
        for node in &self.nodes {
            node.close();
        }
    }

    pub fn batch_stats_snapshot(&self) -> BatchStatsSnapshot {
        self.stats.snapshot_and_reset()
    }

    pub fn node_stats(&self) -> Vec<PoolStats> {
        self.nodes.iter().map(|node| node.stats()).collect()
    }
}

impl Topology for Cluster {
    type Node = RedisNode;

    fn node_by_key(&self, key: &[u8]) -> Result<Arc<RedisNode>, ClientError> {
        let slot = key_slot(key);
        self.slots[slot as usize]
            .map(|idx| Arc::clone(&self.nodes[idx]))
            .ok_or(ClientError::SlotNotCovered(slot))
    }

    fn random_node(&self) -> Result<Arc<RedisNode>, ClientError> {
        self.nodes
            .choose(&mut rand::thread_rng())
            .cloned()
            .ok_or(ClientError::EmptyCluster)
    }
}
