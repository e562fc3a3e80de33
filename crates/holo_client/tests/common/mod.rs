//! Shared helpers for integration tests.
//!
//! `FakeNode` is an in-process RESP2 server on an ephemeral port with a tiny
//! in-memory keyspace. It understands enough commands to drive the client end
//! to end, plus two test hooks: `SLEEP <key> <ms>` delays its reply and
//! `DROPCONN <key>` closes the connection without answering. Both take a key
//! only so the client can route them.

#![allow(dead_code)]

use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use bytes::Bytes;
use futures_util::{SinkExt, StreamExt};
use holo_client::{key_slot, ClusterConfig, NodeConfig, PoolConfig, SlotRange};
use redis_protocol::codec::Resp2;
use redis_protocol::resp2::types::{BytesFrame, Resp2Frame};
use tokio::net::{TcpListener, TcpStream};
use tokio::task::JoinHandle;
use tokio_util::codec::Framed;

type Store = Arc<Mutex<HashMap<Bytes, Bytes>>>;

pub struct FakeNode {
    pub addr: String,
    accepted: Arc<AtomicU64>,
    store: Store,
    task: JoinHandle<()>,
}

impl FakeNode {
    pub async fn spawn() -> Self {
        let listener = TcpListener::bind("127.0.0.1:0").await.expect("bind");
        let addr = listener.local_addr().expect("local addr").to_string();
        let accepted = Arc::new(AtomicU64::new(0));
        let store: Store = Arc::new(Mutex::new(HashMap::new()));

        let task = {
            let accepted = accepted.clone();
            let store = store.clone();
            tokio::spawn(async move {
                while let Ok((socket, _)) = listener.accept().await {
                    accepted.fetch_add(1, Ordering::SeqCst);
                    tokio::spawn(serve(socket, store.clone()));
                }
            })
        };

        Self {
            addr,
            accepted,
            store,
            task,
        }
    }

    /// Connections accepted so far.
    pub fn accepted(&self) -> u64 {
        self.accepted.load(Ordering::SeqCst)
    }

    pub fn get(&self, key: &str) -> Option<String> {
        self.store
            .lock()
            .expect("store lock")
            .get(key.as_bytes())
            .map(|v| String::from_utf8_lossy(v).into_owned())
    }
}

impl Drop for FakeNode {
    fn drop(&mut self) {
        self.task.abort();
    }
}

/// Two nodes splitting the slot space in half.
pub fn split_config(a: &FakeNode, b: &FakeNode) -> ClusterConfig {
    ClusterConfig {
        nodes: vec![
            NodeConfig {
                addr: a.addr.clone(),
                slots: vec![SlotRange::new(0, 8191)],
            },
            NodeConfig {
                addr: b.addr.clone(),
                slots: vec![SlotRange::new(8192, 16383)],
            },
        ],
        pool: PoolConfig {
            connect_timeout_ms: 2_000,
            io_timeout_ms: 5_000,
            ..PoolConfig::default()
        },
    }
}

/// A key named `<prefix>-<n>` whose slot falls in the first (`low`) or
/// second half of the slot space.
pub fn key_in_half(prefix: &str, low: bool) -> String {
    (0..)
        .map(|n| format!("{prefix}-{n}"))
        .find(|key| (key_slot(key.as_bytes()) < 8192) == low)
        .expect("key exists")
}

pub fn bulk(reply: &BytesFrame) -> Option<String> {
    match reply {
        BytesFrame::BulkString(b) | BytesFrame::SimpleString(b) => {
            Some(String::from_utf8_lossy(b).into_owned())
        }
        _ => None,
    }
}

async fn serve(socket: TcpStream, store: Store) {
    let mut framed = Framed::new(socket, Resp2::default());
    let mut queued: Option<Vec<Vec<BytesFrame>>> = None;

    while let Some(Ok(frame)) = framed.next().await {
        let BytesFrame::Array(parts) = frame else {
            return;
        };
        let Some(cmd) = parts.first().and_then(|p| p.as_str()).map(|s| s.to_ascii_uppercase())
        else {
            return;
        };

        let in_txn = queued.is_some();
        let reply = match cmd.as_str() {
            "DROPCONN" => return,
            "MULTI" if in_txn => err("ERR MULTI calls can not be nested"),
            "MULTI" => {
                queued = Some(Vec::new());
                ok()
            }
            "EXEC" | "DISCARD" if !in_txn => err(&format!("ERR {cmd} without MULTI")),
            "EXEC" => {
                let cmds = queued.take().unwrap_or_default();
                let mut results = Vec::with_capacity(cmds.len());
                for parts in cmds {
                    results.push(apply(&parts, &store).await);
                }
                BytesFrame::Array(results)
            }
            "DISCARD" => {
                queued = None;
                ok()
            }
            _ => match queued.as_mut() {
                Some(block) => {
                    block.push(parts);
                    BytesFrame::SimpleString(Bytes::from_static(b"QUEUED"))
                }
                None => apply(&parts, &store).await,
            },
        };

        if framed.feed(reply).await.is_err() {
            return;
        }
        if <Framed<TcpStream, Resp2> as SinkExt<BytesFrame>>::flush(&mut framed)
            .await
            .is_err()
        {
            return;
        }
    }
}

async fn apply(parts: &[BytesFrame], store: &Store) -> BytesFrame {
    let cmd = parts
        .first()
        .and_then(|p| p.as_str())
        .map(|s| s.to_ascii_uppercase())
        .unwrap_or_default();
    let arg = |i: usize| match parts.get(i) {
        Some(BytesFrame::BulkString(b)) => Some(b.clone()),
        _ => None,
    };

    match cmd.as_str() {
        "PING" => BytesFrame::SimpleString(Bytes::from_static(b"PONG")),
        "SLEEP" => {
            let ms = arg(2)
                .and_then(|b| std::str::from_utf8(&b).ok()?.parse::<u64>().ok())
                .unwrap_or(0);
            tokio::time::sleep(Duration::from_millis(ms)).await;
            ok()
        }
        "GET" => match arg(1) {
            Some(key) => {
                let value = store.lock().expect("store lock").get(&key).cloned();
                value.map_or(BytesFrame::Null, BytesFrame::BulkString)
            }
            None => err("ERR wrong number of arguments for 'get'"),
        },
        "SET" => match (arg(1), arg(2)) {
            (Some(key), Some(value)) => {
                store.lock().expect("store lock").insert(key, value);
                ok()
            }
            _ => err("ERR wrong number of arguments for 'set'"),
        },
        "DEL" => match arg(1) {
            Some(key) => {
                let removed = store.lock().expect("store lock").remove(&key).is_some();
                BytesFrame::Integer(removed as i64)
            }
            None => err("ERR wrong number of arguments for 'del'"),
        },
        "INCR" => match arg(1) {
            Some(key) => {
                let mut store = store.lock().expect("store lock");
                let current = match store.get(&key) {
                    None => Some(0),
                    Some(value) => std::str::from_utf8(value)
                        .ok()
                        .and_then(|v| v.parse::<i64>().ok()),
                };
                match current {
                    Some(current) => {
                        let next = current + 1;
                        store.insert(key, Bytes::from(next.to_string()));
                        BytesFrame::Integer(next)
                    }
                    None => err("ERR value is not an integer or out of range"),
                }
            }
            None => err("ERR wrong number of arguments for 'incr'"),
        },
        other => err(&format!("ERR unknown command '{other}'")),
    }
}

fn ok() -> BytesFrame {
    BytesFrame::SimpleString(Bytes::from_static(b"OK"))
}

fn err(msg: &str) -> BytesFrame {
    BytesFrame::Error(msg.to_string().into())
}
