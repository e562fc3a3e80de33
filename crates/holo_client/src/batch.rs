//! Command batches grouped by owning node.
//!
//! A `Batch` records every queued command twice: once in the `NodeBatch` of
//! the node it routes to, and once as an entry in `index` naming that group.
//! Groups keep commands in submission order, so walking `index` and popping
//! the head of the named group pairs each reply with the `put` that queued it.
//!
//! MULTI/EXEC state belongs to the batch. Commands inside an open transaction
//! are validated on `put` but held back until EXEC (or DISCARD) closes the
//! block, which is then enqueued as one run on the transaction's node.

use std::collections::VecDeque;
use std::sync::Arc;

use bytes::Bytes;

use crate::error::ClientError;
use crate::types::{Reply, Topology};

/// One queued command and, after dispatch, its reply.
#[derive(Debug)]
pub struct NodeCommand {
    pub(crate) cmd: String,
    pub(crate) args: Vec<Bytes>,
    pub(crate) reply: Option<Reply>,
}

impl NodeCommand {
    fn new(cmd: &str, args: Vec<Bytes>) -> Self {
        Self {
            cmd: cmd.to_string(),
            args,
            reply: None,
        }
    }

    pub fn cmd(&self) -> &str {
        &self.cmd
    }

    pub fn args(&self) -> &[Bytes] {
        &self.args
    }
}

/// Commands routed to one node, pipelined together on one connection.
///
/// `err` is authoritative: once set, replies of the group are never consulted.
pub struct NodeBatch<N> {
    pub(crate) node: Arc<N>,
    pub(crate) cmds: VecDeque<NodeCommand>,
    pub(crate) err: Option<ClientError>,
}

impl<N> NodeBatch<N> {
    fn new(node: Arc<N>) -> Self {
        Self {
            node,
            cmds: VecDeque::new(),
            err: None,
        }
    }

    pub(crate) fn failed(node: Arc<N>, err: ClientError) -> Self {
        Self {
            node,
            cmds: VecDeque::new(),
            err: Some(err),
        }
    }

    pub fn node(&self) -> &Arc<N> {
        &self.node
    }

    pub fn len(&self) -> usize {
        self.cmds.len()
    }

    pub fn is_empty(&self) -> bool {
        self.cmds.is_empty()
    }
}

/// A MULTI block that has not seen its EXEC yet.
struct OpenTxn<N> {
    node: Option<Arc<N>>,
    cmds: Vec<NodeCommand>,
}

impl<N> OpenTxn<N> {
    /// Pin the block to `node`, or check `node` is the one already pinned.
    fn pin(&mut self, node: Arc<N>, key: &[u8], cmd: &str) -> Result<(), ClientError> {
        if let Some(pinned) = &self.node {
            if !Arc::ptr_eq(pinned, &node) {
                return Err(ClientError::CrossSlotTransaction {
                    key: String::from_utf8_lossy(key).into_owned(),
                    cmd: cmd.to_string(),
                });
            }
        } else {
            self.node = Some(node);
        }
        Ok(())
    }
}

/// Caller-facing batch. Consumed by one `run_batch` call.
pub struct Batch<'a, T: Topology> {
    topology: &'a T,
    pub(crate) groups: Vec<NodeBatch<T::Node>>,
    pub(crate) index: Vec<usize>,
    txn: Option<OpenTxn<T::Node>>,
}

impl<'a, T: Topology> Batch<'a, T> {
    pub fn new(topology: &'a T) -> Self {
        Self {
            topology,
            groups: Vec::new(),
            index: Vec::new(),
            txn: None,
        }
    }

    /// Route `cmd` to its node and queue it.
    ///
    /// MGET, MSET and MSETNX are rejected since their keys may live on
    /// different nodes. PING goes to any node. Every other command needs its
    /// key as the first argument, except MULTI/EXEC/DISCARD which route by
    /// key only when they carry one. On error nothing is queued.
    pub fn put<I, A>(&mut self, cmd: &str, args: I) -> Result<(), ClientError>
    where
        I: IntoIterator<Item = A>,
        A: Into<Bytes>,
    {
        let command = NodeCommand::new(cmd, args.into_iter().map(Into::into).collect());

        if cmd.eq_ignore_ascii_case("PING") {
            return self.put_ping(command);
        }

        match cmd.to_ascii_uppercase().as_str() {
            "MGET" | "MSET" | "MSETNX" => Err(ClientError::Unsupported(cmd.to_string())),
            "MULTI" => self.open_transaction(command),
            "EXEC" | "DISCARD" => self.close_transaction(command),
            _ => self.put_keyed(command),
        }
    }

    fn put_ping(&mut self, command: NodeCommand) -> Result<(), ClientError> {
        // Inside a transaction PING travels with the block to the pinned node.
        if let Some(txn) = self.txn.as_mut() {
            txn.cmds.push(command);
            return Ok(());
        }
        self.put_anywhere(command)
    }

    fn put_anywhere(&mut self, command: NodeCommand) -> Result<(), ClientError> {
        let node = self.topology.random_node()?;
        self.enqueue(node, command);
        Ok(())
    }

    fn put_keyed(&mut self, command: NodeCommand) -> Result<(), ClientError> {
        let Some(key) = command.args.first() else {
            return Err(ClientError::NoKey(command.cmd));
        };
        let node = self.topology.node_by_key(key)?;

        let Some(txn) = self.txn.as_mut() else {
            self.enqueue(node, command);
            return Ok(());
        };
        txn.pin(node, key, &command.cmd)?;
        txn.cmds.push(command);
        Ok(())
    }

    fn open_transaction(&mut self, command: NodeCommand) -> Result<(), ClientError> {
        if self.txn.is_some() {
            return Err(ClientError::NestedMulti);
        }
        // A MULTI carrying a key pins the block up front.
        let node = match command.args.first() {
            Some(key) => Some(self.topology.node_by_key(key)?),
            None => None,
        };
        self.txn = Some(OpenTxn {
            node,
            cmds: vec![command],
        });
        Ok(())
    }

    fn close_transaction(&mut self, command: NodeCommand) -> Result<(), ClientError> {
        let Some(mut txn) = self.txn.take() else {
            // Nothing to close: queue it like any other command and let the
            // server answer.
            if command.args.is_empty() {
                return self.put_anywhere(command);
            }
            return self.put_keyed(command);
        };
        let node = match self.transaction_target(&mut txn, &command) {
            Ok(node) => node,
            Err(err) => {
                self.txn = Some(txn);
                return Err(err);
            }
        };
        txn.cmds.push(command);
        for cmd in txn.cmds {
            self.enqueue(Arc::clone(&node), cmd);
        }
        Ok(())
    }

    /// Node the closing block goes to: the pin, checked against the
    /// terminator's key if it has one, else any node.
    fn transaction_target(
        &self,
        txn: &mut OpenTxn<T::Node>,
        terminator: &NodeCommand,
    ) -> Result<Arc<T::Node>, ClientError> {
        if let Some(key) = terminator.args.first() {
            let node = self.topology.node_by_key(key)?;
            txn.pin(node, key, &terminator.cmd)?;
        }
        match &txn.node {
            Some(node) => Ok(Arc::clone(node)),
            None => self.topology.random_node(),
        }
    }

    fn enqueue(&mut self, node: Arc<T::Node>, command: NodeCommand) {
        // Groups stay in first-touch order.
        let pos = match self.groups.iter().position(|g| Arc::ptr_eq(&g.node, &node)) {
            Some(pos) => pos,
            None => {
                self.groups.push(NodeBatch::new(node));
                self.groups.len() - 1
            }
        };
        self.groups[pos].cmds.push_back(command);
        self.index.push(pos);
    }

    /// Number of commands queued for dispatch, one reply each. Commands
    /// buffered in a still-open transaction block are not counted until its
    /// EXEC or DISCARD; see `pending_transaction_len`.
    pub fn len(&self) -> usize {
        self.index.len()
    }

    /// True when nothing is queued for dispatch. An open transaction block
    /// does not count.
    pub fn is_empty(&self) -> bool {
        self.index.is_empty()
    }

    /// Number of distinct nodes touched so far.
    pub fn group_count(&self) -> usize {
        self.groups.len()
    }

    pub fn groups(&self) -> &[NodeBatch<T::Node>] {
        &self.groups
    }

    pub fn in_transaction(&self) -> bool {
        self.txn.is_some()
    }

    /// Node pinned by the first keyed command of the open transaction.
    pub fn transaction_node(&self) -> Option<&Arc<T::Node>> {
        self.txn.as_ref().and_then(|txn| txn.node.as_ref())
    }

    /// Commands buffered in the open transaction, MULTI included.
    pub fn pending_transaction_len(&self) -> usize {
        self.txn.as_ref().map_or(0, |txn| txn.cmds.len())
    }

    /// Split into groups and routing index, refusing an unclosed MULTI.
    pub(crate) fn into_parts(self) -> Result<(Vec<NodeBatch<T::Node>>, Vec<usize>), ClientError> {
        if self.txn.is_some() {
            return Err(ClientError::UnterminatedTransaction);
        }
        Ok((self.groups, self.index))
    }
}
