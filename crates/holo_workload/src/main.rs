//! Batch workload generator for a slot-sharded Redis-protocol cluster.
//!
//! Each batch mixes SET/GET/PING over a small keyspace, optionally with a
//! MULTI/EXEC block pinned to one hash tag, and runs through
//! `holo_client::Cluster::run_batch`. GETs on keys written earlier in the same
//! batch are checked against the written value, which exercises the reply
//! ordering across nodes. A JSON summary is written at the end.

use std::collections::{BTreeMap, HashMap};
use std::path::{Path, PathBuf};
use std::time::{Duration, Instant};

use anyhow::Context;
use bytes::Bytes;
use clap::{Parser, Subcommand};
use holo_client::{
    BatchStatsSnapshot, ClientError, Cluster, ClusterConfig, PoolConfig, PoolStats, Reply,
};
use rand::rngs::SmallRng;
use rand::{Rng, SeedableRng};
use redis_protocol::resp2::types::BytesFrame;
use tracing_subscriber::EnvFilter;

/// CLI entry point wrapper.
#[derive(Parser, Debug)]
#[command(name = "holo-workload")]
struct Args {
    #[command(subcommand)]
    cmd: Command,
}

#[derive(Subcommand, Debug)]
enum Command {
    Run(RunArgs),
}

/// CLI options for running the workload.
#[derive(Parser, Debug, Clone)]
struct RunArgs {
    /// Slot layout, e.g. `127.0.0.1:7000=0-8191,127.0.0.1:7001=8192-16383`.
    #[arg(long, conflicts_with = "topology")]
    nodes: Option<String>,

    /// JSON cluster config file (nodes, slot ranges and pool settings).
    #[arg(long)]
    topology: Option<PathBuf>,

    /// Number of batches to run.
    #[arg(long, default_value_t = 100)]
    batches: usize,

    /// Plain commands per batch (a transaction block comes on top).
    #[arg(long, default_value_t = 32)]
    batch_size: usize,

    /// Number of keys used by the workload.
    #[arg(long, default_value_t = 64)]
    keys: usize,

    /// Keys are generated as `{key_prefix}{seed}_k{idx}`.
    #[arg(long, default_value = "holo_")]
    key_prefix: String,

    /// Percent of plain commands that are SET (the rest are GET or PING).
    #[arg(long, default_value_t = 50)]
    set_pct: u8,

    /// Percent of plain commands that are PING.
    #[arg(long, default_value_t = 5)]
    ping_pct: u8,

    /// Percent of batches that also carry a MULTI/EXEC block.
    #[arg(long, default_value_t = 0)]
    txn_pct: u8,

    /// Random seed (0 picks a random seed).
    #[arg(long, default_value_t = 0)]
    seed: u64,

    /// Per-read/flush deadline on pooled connections (0s disables it).
    #[arg(long, default_value = "10s")]
    io_timeout: humantime::Duration,

    /// When true, the first failed batch or reply mismatch aborts the run.
    #[arg(long, default_value_t = true, action = clap::ArgAction::Set)]
    fail_fast: bool,

    /// Write the JSON run summary to this path.
    #[arg(long, default_value = ".tmp/workload/summary.json")]
    out: PathBuf,
}

/// Reply a planned command must produce.
#[derive(Clone, Debug, PartialEq, Eq)]
enum Expect {
    Anything,
    Ok,
    Pong,
    Queued,
    Value(String),
    /// EXEC result array with this many entries.
    Exec(usize),
}

#[derive(Clone, Debug)]
struct PlannedOp {
    cmd: &'static str,
    args: Vec<String>,
    expect: Expect,
}

impl PlannedOp {
    fn new(cmd: &'static str, args: Vec<String>, expect: Expect) -> Self {
        Self { cmd, args, expect }
    }
}

#[derive(Default, Debug, Clone, serde::Serialize)]
struct OpCounts {
    sets: u64,
    gets: u64,
    pings: u64,
    txns: u64,
}

#[derive(Debug, Clone, serde::Serialize)]
struct RunMeta {
    nodes: Vec<String>,
    batches: usize,
    batch_size: usize,
    keys: usize,
    key_prefix: String,
    set_pct: u8,
    ping_pct: u8,
    txn_pct: u8,
    seed: u64,
    io_timeout_ms: u64,
}

#[derive(Debug, Clone, serde::Serialize)]
struct Summary {
    meta: RunMeta,
    batches_ok: u64,
    batches_failed: u64,
    /// Failed batches keyed by error class.
    failures: BTreeMap<&'static str, u64>,
    commands: u64,
    ops: OpCounts,
    checked_replies: u64,
    mismatches: u64,
    error_replies: u64,
    latency_avg_us: u64,
    latency_max_us: u64,
    elapsed_ms: u64,
    cluster: BatchStatsSnapshot,
    pools: Vec<PoolStats>,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    tracing_subscriber::fmt()
        .with_target(false)
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")),
        )
        .init();

    let args = Args::parse();
    match args.cmd {
        Command::Run(args) => run(args).await,
    }
}

async fn run(args: RunArgs) -> anyhow::Result<()> {
    anyhow::ensure!(args.batches > 0, "--batches must be > 0");
    anyhow::ensure!(args.batch_size > 0, "--batch-size must be > 0");
    anyhow::ensure!(args.keys > 0, "--keys must be > 0");
    anyhow::ensure!(args.set_pct <= 100, "--set-pct must be <= 100");
    anyhow::ensure!(
        args.set_pct as u16 + args.ping_pct as u16 <= 100,
        "--set-pct plus --ping-pct must be <= 100"
    );
    anyhow::ensure!(args.txn_pct <= 100, "--txn-pct must be <= 100");

    let mut config = load_config(&args)?;
    let io_timeout: Duration = args.io_timeout.into();
    config.pool = PoolConfig {
        io_timeout_ms: io_timeout.as_millis() as u64,
        ..config.pool
    };
    let meta_nodes = config.nodes.iter().map(|n| n.addr.clone()).collect();
    let cluster = Cluster::new(config).context("build cluster")?;

    // Use a random seed when the user provides zero.
    let seed = if args.seed == 0 {
        rand::thread_rng().gen()
    } else {
        args.seed
    };
    let mut rng = SmallRng::seed_from_u64(seed);
    let keyspace = (0..args.keys)
        .map(|i| format!("{}{}_k{i}", args.key_prefix, seed))
        .collect::<Vec<_>>();

    tracing::info!(
        batches = args.batches,
        batch_size = args.batch_size,
        seed,
        "starting workload"
    );

    let mut ops = OpCounts::default();
    let mut batches_ok = 0u64;
    let mut batches_failed = 0u64;
    let mut failures: BTreeMap<&'static str, u64> = BTreeMap::new();
    let mut commands = 0u64;
    let mut checked_replies = 0u64;
    let mut mismatches = 0u64;
    let mut error_replies = 0u64;
    let mut latency_total_us = 0u64;
    let mut latency_max_us = 0u64;

    let start = Instant::now();
    for batch_no in 0..args.batches {
        let with_txn = rng.gen_range(0..100) < args.txn_pct as u32;
        let txn_tag = format!("{}{}_t{batch_no}", args.key_prefix, seed);
        let plan = plan_batch(
            &mut rng,
            &keyspace,
            args.batch_size,
            args.set_pct,
            args.ping_pct,
            with_txn.then_some(txn_tag.as_str()),
            batch_no,
        );
        count_ops(&plan, &mut ops);

        let mut batch = cluster.new_batch();
        for op in &plan {
            batch
                .put(op.cmd, op.args.iter().cloned().map(Bytes::from))
                .with_context(|| format!("queue {} in batch {batch_no}", op.cmd))?;
        }

        let sent = Instant::now();
        let res = cluster.run_batch(batch).await;
        let latency_us = sent.elapsed().as_micros() as u64;
        latency_total_us += latency_us;
        latency_max_us = latency_max_us.max(latency_us);
        commands += plan.len() as u64;

        let replies = match res {
            Ok(replies) => replies,
            Err(err) => {
                batches_failed += 1;
                let kind = error_kind(&err);
                *failures.entry(kind).or_default() += 1;
                tracing::warn!(batch = batch_no, kind, error = %err, "batch failed");
                if args.fail_fast {
                    anyhow::bail!("batch {batch_no} failed: {err}");
                }
                continue;
            }
        };
        batches_ok += 1;

        for (op, reply) in plan.iter().zip(&replies) {
            if matches!(reply, BytesFrame::Error(_)) {
                error_replies += 1;
            }
            if op.expect == Expect::Anything {
                continue;
            }
            checked_replies += 1;
            if let Err(reason) = check_reply(&op.expect, reply) {
                mismatches += 1;
                tracing::warn!(batch = batch_no, cmd = op.cmd, args = ?op.args, %reason, "reply mismatch");
                if args.fail_fast {
                    anyhow::bail!("batch {batch_no}: {} {:?}: {reason}", op.cmd, op.args);
                }
            }
        }
    }
    let elapsed = start.elapsed();

    let summary = Summary {
        meta: RunMeta {
            nodes: meta_nodes,
            batches: args.batches,
            batch_size: args.batch_size,
            keys: args.keys,
            key_prefix: args.key_prefix.clone(),
            set_pct: args.set_pct,
            ping_pct: args.ping_pct,
            txn_pct: args.txn_pct,
            seed,
            io_timeout_ms: io_timeout.as_millis() as u64,
        },
        batches_ok,
        batches_failed,
        failures,
        commands,
        ops,
        checked_replies,
        mismatches,
        error_replies,
        latency_avg_us: latency_total_us / args.batches as u64,
        latency_max_us,
        elapsed_ms: elapsed.as_millis() as u64,
        cluster: cluster.batch_stats_snapshot(),
        pools: cluster.node_stats(),
    };
    cluster.close();

    write_summary(&args.out, &summary).context("write summary")?;
    tracing::info!(
        batches_ok,
        batches_failed,
        mismatches,
        out = %args.out.display(),
        "workload finished"
    );
    Ok(())
}

fn load_config(args: &RunArgs) -> anyhow::Result<ClusterConfig> {
    match (&args.nodes, &args.topology) {
        (Some(list), None) => ClusterConfig::from_slot_list(list).context("parse --nodes"),
        (None, Some(path)) => {
            let data = std::fs::read_to_string(path)
                .with_context(|| format!("read {}", path.display()))?;
            ClusterConfig::from_json(&data).with_context(|| format!("parse {}", path.display()))
        }
        _ => anyhow::bail!("pass exactly one of --nodes or --topology"),
    }
}

/// Build one batch worth of commands.
///
/// Plain commands come first. When `txn_tag` is set a MULTI/EXEC block over
/// two keys sharing that hash tag is appended, followed by a GET that reads
/// the block's write back.
fn plan_batch(
    rng: &mut SmallRng,
    keyspace: &[String],
    batch_size: usize,
    set_pct: u8,
    ping_pct: u8,
    txn_tag: Option<&str>,
    batch_no: usize,
) -> Vec<PlannedOp> {
    let mut plan = Vec::with_capacity(batch_size + 5);
    // Values written so far in this batch.
    let mut written: HashMap<&str, String> = HashMap::new();

    for i in 0..batch_size {
        let roll = rng.gen_range(0..100u32);
        if roll < ping_pct as u32 {
            plan.push(PlannedOp::new("PING", Vec::new(), Expect::Pong));
            continue;
        }
        let key = keyspace[rng.gen_range(0..keyspace.len())].as_str();
        if roll < ping_pct as u32 + set_pct as u32 {
            let value = format!("b{batch_no}:{i}");
            written.insert(key, value.clone());
            plan.push(PlannedOp::new(
                "SET",
                vec![key.to_string(), value],
                Expect::Ok,
            ));
        } else {
            let expect = written
                .get(key)
                .map_or(Expect::Anything, |v| Expect::Value(v.clone()));
            plan.push(PlannedOp::new("GET", vec![key.to_string()], expect));
        }
    }

    if let Some(tag) = txn_tag {
        let value_key = format!("{{{tag}}}.value");
        let counter_key = format!("{{{tag}}}.counter");
        let value = format!("txn{batch_no}");
        plan.push(PlannedOp::new("MULTI", Vec::new(), Expect::Ok));
        plan.push(PlannedOp::new(
            "SET",
            vec![value_key.clone(), value.clone()],
            Expect::Queued,
        ));
        plan.push(PlannedOp::new("INCR", vec![counter_key], Expect::Queued));
        plan.push(PlannedOp::new("EXEC", Vec::new(), Expect::Exec(2)));
        plan.push(PlannedOp::new("GET", vec![value_key], Expect::Value(value)));
    }
    plan
}

fn count_ops(plan: &[PlannedOp], counts: &mut OpCounts) {
    for op in plan {
        match op.cmd {
            "SET" if op.expect == Expect::Ok => counts.sets += 1,
            "GET" => counts.gets += 1,
            "PING" => counts.pings += 1,
            "EXEC" => counts.txns += 1,
            _ => {}
        }
    }
}

/// Compare a reply against what the workload expects of it.
fn check_reply(expect: &Expect, reply: &Reply) -> Result<(), String> {
    let ok = match (expect, reply) {
        (Expect::Anything, _) => true,
        (Expect::Ok, BytesFrame::SimpleString(s)) => s.as_ref() == b"OK",
        (Expect::Pong, BytesFrame::SimpleString(s)) => s.as_ref() == b"PONG",
        (Expect::Queued, BytesFrame::SimpleString(s)) => s.as_ref() == b"QUEUED",
        (Expect::Value(want), BytesFrame::BulkString(got)) => got.as_ref() == want.as_bytes(),
        (Expect::Exec(len), BytesFrame::Array(items)) => items.len() == *len,
        _ => false,
    };
    if ok {
        Ok(())
    } else {
        Err(format!("expected {expect:?}, got {reply:?}"))
    }
}

fn error_kind(err: &ClientError) -> &'static str {
    if err.is_routing_error() {
        "routing"
    } else if err.is_transaction_error() {
        "transaction"
    } else if err.is_connection_error() {
        "connection"
    } else {
        "other"
    }
}

/// Serialize and write the run summary JSON.
fn write_summary(path: &Path, summary: &Summary) -> anyhow::Result<()> {
    if let Some(parent) = path.parent() {
        std::fs::create_dir_all(parent)
            .with_context(|| format!("create dir {}", parent.display()))?;
    }
    let data = serde_json::to_vec_pretty(summary).context("serialize summary")?;
    std::fs::write(path, data).with_context(|| format!("write {}", path.display()))?;
    Ok(())
}
