//! Concurrent per-node execution of a `Batch`.
//!
//! `run_batch` spawns one task per node group, waits for every task, then
//! rebuilds replies in submission order from the routing index. A failed group
//! fails the whole batch with the error of the first failing group in
//! submission order; partial replies are never returned.

use std::sync::Arc;

use crate::batch::{Batch, NodeBatch};
use crate::error::ClientError;
use crate::types::{NodeHandle, PipelineConn, Reply, Topology};

/// Execute every queued command and return replies in `put` order.
///
/// There is no timeout here; a stalled node blocks the call unless the
/// connections it uses enforce their own I/O deadlines.
pub async fn run_batch<T: Topology>(batch: Batch<'_, T>) -> Result<Vec<Reply>, ClientError> {
    let (groups, index) = batch.into_parts()?;

    let mut tasks = Vec::with_capacity(groups.len());
    for group in groups {
        let node = Arc::clone(&group.node);
        tasks.push((node, tokio::spawn(do_batch(group))));
    }

    // Barrier: nothing is inspected until every group has finished.
    let mut finished = Vec::with_capacity(tasks.len());
    for (node, task) in tasks {
        let group = match task.await {
            Ok(group) => group,
            Err(err) => {
                let addr = node.addr().to_string();
                tracing::warn!(node = %addr, error = %err, "batch node task aborted");
                NodeBatch::failed(
                    node,
                    ClientError::TaskFailed {
                        addr,
                        reason: err.to_string(),
                    },
                )
            }
        };
        finished.push(group);
    }

    collect_replies(finished, &index)
}

/// Walk the routing index, taking the head reply of the named group each time.
fn collect_replies<N: NodeHandle>(
    mut groups: Vec<NodeBatch<N>>,
    index: &[usize],
) -> Result<Vec<Reply>, ClientError> {
    let mut replies = Vec::with_capacity(index.len());
    for &pos in index {
        let group = &mut groups[pos];
        if let Some(err) = group.err.take() {
            return Err(err);
        }
        let reply = group
            .cmds
            .pop_front()
            .and_then(|cmd| cmd.reply)
            .ok_or_else(|| ClientError::MissingReply(group.node.addr().to_string()))?;
        replies.push(reply);
    }
    Ok(replies)
}

/// Pipeline one group over a single pooled connection.
///
/// Returning the group is the completion signal; every path returns it, with
/// `err` set on failure. A connection that failed mid-exchange is shut down,
/// never released back to the pool.
pub(crate) async fn do_batch<N: NodeHandle>(mut group: NodeBatch<N>) -> NodeBatch<N> {
    let node = Arc::clone(&group.node);
    if group.is_empty() {
        return group;
    }
    tracing::debug!(node = node.addr(), cmds = group.len(), "dispatching node batch");

    let mut conn = match node.get_conn().await {
        Ok(conn) => conn,
        Err(err) => {
            tracing::warn!(node = node.addr(), error = %err, stage = "acquire", "node batch failed");
            group.err = Some(err);
            return group;
        }
    };

    for cmd in &group.cmds {
        conn.send(cmd.cmd(), cmd.args());
    }

    if let Err(err) = conn.flush().await {
        tracing::warn!(node = node.addr(), error = %err, stage = "flush", "node batch failed");
        node.shutdown_conn(conn);
        group.err = Some(err);
        return group;
    }

    let mut failure = None;
    for cmd in group.cmds.iter_mut() {
        match conn.receive().await {
            Ok(reply) => cmd.reply = Some(reply),
            Err(err) => {
                failure = Some(err);
                break;
            }
        }
    }

    match failure {
        Some(err) => {
            tracing::warn!(node = node.addr(), error = %err, stage = "receive", "node batch failed");
            node.shutdown_conn(conn);
            group.err = Some(err);
        }
        None => node.release_conn(conn),
    }
    group
}
