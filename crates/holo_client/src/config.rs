//! Static cluster layout and pool tuning.
//!
//! Layouts come from JSON or from a compact `addr=start-end+start-end,...`
//! list. Pool settings default to conservative values and can be overridden
//! through `HOLO_CLIENT_*` environment variables.

use std::env;
use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::error::ClientError;
use crate::slot::SLOT_COUNT;

const DEFAULT_MAX_ACTIVE: usize = 64;
const DEFAULT_MAX_IDLE: usize = 16;
const DEFAULT_IDLE_TIMEOUT_MS: u64 = 60_000;
const DEFAULT_CONNECT_TIMEOUT_MS: u64 = 5_000;

/// Inclusive range of hash slots.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct SlotRange {
    pub start: u16,
    pub end: u16,
}

impl SlotRange {
    pub fn new(start: u16, end: u16) -> Self {
        Self { start, end }
    }

    fn parse(input: &str) -> Result<Self, ClientError> {
        let bad = || ClientError::InvalidConfig(format!("invalid slot range {input:?}"));
        let (start, end) = match input.split_once('-') {
            Some((start, end)) => (start.trim(), end.trim()),
            None => (input.trim(), input.trim()),
        };
        Ok(Self {
            start: start.parse().map_err(|_| bad())?,
            end: end.parse().map_err(|_| bad())?,
        })
    }
}

/// One node and the slots it serves.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct NodeConfig {
    pub addr: String,
    pub slots: Vec<SlotRange>,
}

/// Connection pool tuning shared by every node.
///
/// A zero `io_timeout_ms` disables I/O deadlines: reads and flushes block
/// until the peer answers or the socket fails.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct PoolConfig {
    pub max_active: usize,
    pub max_idle: usize,
    pub idle_timeout_ms: u64,
    pub connect_timeout_ms: u64,
    pub io_timeout_ms: u64,
}

impl Default for PoolConfig {
    fn default() -> Self {
        Self {
            max_active: DEFAULT_MAX_ACTIVE,
            max_idle: DEFAULT_MAX_IDLE,
            idle_timeout_ms: DEFAULT_IDLE_TIMEOUT_MS,
            connect_timeout_ms: DEFAULT_CONNECT_TIMEOUT_MS,
            io_timeout_ms: 0,
        }
    }
}

impl PoolConfig {
    /// Defaults overlaid with any `HOLO_CLIENT_*` environment overrides.
    pub fn from_env() -> Self {
        let base = Self::default();
        Self {
            max_active: read_env_usize("HOLO_CLIENT_MAX_ACTIVE", base.max_active),
            max_idle: read_env_usize("HOLO_CLIENT_MAX_IDLE", base.max_idle),
            idle_timeout_ms: read_env_u64("HOLO_CLIENT_IDLE_TIMEOUT_MS", base.idle_timeout_ms),
            connect_timeout_ms: read_env_u64(
                "HOLO_CLIENT_CONNECT_TIMEOUT_MS",
                base.connect_timeout_ms,
            ),
            io_timeout_ms: read_env_u64("HOLO_CLIENT_IO_TIMEOUT_MS", base.io_timeout_ms),
        }
    }

    pub fn idle_timeout(&self) -> Duration {
        Duration::from_millis(self.idle_timeout_ms)
    }

    pub fn connect_timeout(&self) -> Duration {
        Duration::from_millis(self.connect_timeout_ms)
    }

    pub fn io_timeout(&self) -> Option<Duration> {
        (self.io_timeout_ms > 0).then(|| Duration::from_millis(self.io_timeout_ms))
    }
}

/// Full client configuration: slot layout plus pool tuning.
#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ClusterConfig {
    pub nodes: Vec<NodeConfig>,
    #[serde(default)]
    pub pool: PoolConfig,
}

impl ClusterConfig {
    pub fn from_json(data: &str) -> Result<Self, ClientError> {
        let config: Self = serde_json::from_str(data)
            .map_err(|err| ClientError::InvalidConfig(format!("parse cluster json: {err}")))?;
        config.validate()?;
        Ok(config)
    }

    /// Parse `addr=0-8191,addr2=8192-16383`; a node may list several ranges
    /// joined with `+`, e.g. `addr=0-99+200-299`.
    pub fn from_slot_list(input: &str) -> Result<Self, ClientError> {
        let mut nodes = Vec::new();
        for part in input.split(',').map(str::trim).filter(|s| !s.is_empty()) {
            let (addr, ranges) = part.split_once('=').ok_or_else(|| {
                ClientError::InvalidConfig(format!("expected addr=slots, got {part:?}"))
            })?;
            let slots = ranges
                .split('+')
                .map(SlotRange::parse)
                .collect::<Result<Vec<_>, _>>()?;
            nodes.push(NodeConfig {
                addr: addr.trim().to_string(),
                slots,
            });
        }
        let config = Self {
            nodes,
            pool: PoolConfig::from_env(),
        };
        config.validate()?;
        Ok(config)
    }

    /// Reject empty layouts, bad ranges and slots claimed twice. Uncovered
    /// slots are allowed; keys hashing there fail at routing time.
    pub fn validate(&self) -> Result<(), ClientError> {
        if self.nodes.is_empty() {
            return Err(ClientError::InvalidConfig("no nodes configured".to_string()));
        }
        if self.pool.max_active == 0 {
            return Err(ClientError::InvalidConfig("pool.max_active must be > 0".to_string()));
        }
        let mut owner: Vec<Option<usize>> = vec![None; SLOT_COUNT as usize];
        for (idx, node) in self.nodes.iter().enumerate() {
            if node.addr.is_empty() {
                return Err(ClientError::InvalidConfig(format!("node {idx} has no address")));
            }
            for range in &node.slots {
                if range.start > range.end || range.end >= SLOT_COUNT {
                    return Err(ClientError::InvalidConfig(format!(
                        "node {} has invalid slot range {}-{}",
                        node.addr, range.start, range.end
                    )));
                }
                for slot in range.start..=range.end {
                    if let Some(prev) = owner[slot as usize].replace(idx) {
                        return Err(ClientError::InvalidConfig(format!(
                            "slot {slot} claimed by both {} and {}",
                            self.nodes[prev].addr, node.addr
                        )));
                    }
                }
            }
        }
        Ok(())
    }
}

fn read_env_usize(name: &str, default: usize) -> usize {
    env::var(name)
        .ok()
        .and_then(|v| v.parse::<usize>().ok())
        .unwrap_or(default)
}

fn read_env_u64(name: &str, default: u64) -> u64 {
    env::var(name)
        .ok()
        .and_then(|v| v.parse::<u64>().ok())
        .unwrap_or(default)
}
