//! RESP2 connection with explicit pipelining.
//!
//! Requests are buffered by `send` and written by `flush` in one go; replies
//! are then read back one frame at a time in request order.

use std::fmt;
use std::future::Future;
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::{Duration, Instant};

use async_trait::async_trait;
use bytes::Bytes;
use futures_util::{SinkExt, StreamExt};
use redis_protocol::codec::Resp2;
use redis_protocol::resp2::types::BytesFrame;
use tokio::net::TcpStream;
use tokio::sync::OwnedSemaphorePermit;
use tokio::time;
use tokio_util::codec::Framed;

use crate::error::ClientError;
use crate::types::{PipelineConn, Reply};

static NEXT_CONN_ID: AtomicU64 = AtomicU64::new(1);

pub struct RespConn {
    id: u64,
    framed: Framed<TcpStream, Resp2>,
    pending: Vec<BytesFrame>,
    io_timeout: Option<Duration>,
    last_used: Instant,
    // Held for the connection's lifetime so the pool's active count drops with it.
    _permit: Option<OwnedSemaphorePermit>,
}

impl fmt::Debug for RespConn {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("RespConn")
            .field("id", &self.id)
            .field("pending", &self.pending.len())
            .field("io_timeout", &self.io_timeout)
            .finish_non_exhaustive()
    }
}

impl RespConn {
    /// Dial `addr`, giving up after `connect_timeout`.
    pub async fn connect(
        addr: &str,
        connect_timeout: Duration,
        io_timeout: Option<Duration>,
    ) -> Result<Self, ClientError> {
        let socket = match time::timeout(connect_timeout, TcpStream::connect(addr)).await {
            Ok(Ok(socket)) => socket,
            Ok(Err(source)) => {
                return Err(ClientError::Connect {
                    addr: addr.to_string(),
                    source,
                })
            }
            Err(_) => return Err(ClientError::ConnectTimeout(addr.to_string())),
        };
        socket.set_nodelay(true).ok();
        Ok(Self {
            id: NEXT_CONN_ID.fetch_add(1, Ordering::Relaxed),
            framed: Framed::new(socket, Resp2::default()),
            pending: Vec::new(),
            io_timeout,
            last_used: Instant::now(),
            _permit: None,
        })
    }

    pub fn id(&self) -> u64 {
        self.id
    }

    /// Requests buffered but not yet flushed.
    pub fn pending(&self) -> usize {
        self.pending.len()
    }

    pub(crate) fn attach_permit(&mut self, permit: OwnedSemaphorePermit) {
        self._permit = Some(permit);
    }

    pub(crate) fn detach_permit(&mut self) {
        self._permit = None;
    }

    pub(crate) fn idle_for(&self) -> Duration {
        self.last_used.elapsed()
    }

    pub(crate) fn touch(&mut self) {
        self.last_used = Instant::now();
    }

    async fn with_deadline<T, F>(io_timeout: Option<Duration>, fut: F) -> Result<T, ClientError>
    where
        F: Future<Output = Result<T, ClientError>>,
    {
        match io_timeout {
            Some(limit) => match time::timeout(limit, fut).await {
                Ok(res) => res,
                Err(_) => Err(ClientError::Timeout(limit)),
            },
            None => fut.await,
        }
    }
}

/// Encode a command as a RESP array of bulk strings.
pub fn command_frame(cmd: &str, args: &[Bytes]) -> BytesFrame {
    let mut parts = Vec::with_capacity(args.len() + 1);
    parts.push(BytesFrame::BulkString(Bytes::copy_from_slice(cmd.as_bytes())));
    parts.extend(args.iter().cloned().map(BytesFrame::BulkString));
    BytesFrame::Array(parts)
}

#[async_trait]
impl PipelineConn for RespConn {
    fn send(&mut self, cmd: &str, args: &[Bytes]) {
        self.pending.push(command_frame(cmd, args));
    }

    async fn flush(&mut self) -> Result<(), ClientError> {
        let frames = std::mem::take(&mut self.pending);
        let framed = &mut self.framed;
        let res = Self::with_deadline(self.io_timeout, async move {
            for frame in frames {
                framed.feed(frame).await?;
            }
            <Framed<TcpStream, Resp2> as SinkExt<BytesFrame>>::flush(framed).await?;
            Ok(())
        })
        .await;
        self.touch();
        res
    }

    async fn receive(&mut self) -> Result<Reply, ClientError> {
        let framed = &mut self.framed;
        let res = Self::with_deadline(self.io_timeout, async move {
            match framed.next().await {
                Some(Ok(frame)) => Ok(frame),
                Some(Err(err)) => Err(ClientError::from(err)),
                None => Err(ClientError::ConnectionClosed),
            }
        })
        .await;
        self.touch();
        res
    }
}
