use std::path::PathBuf;
use std::sync::Arc;
use std::sync::atomic::{AtomicU32, Ordering};
use std::time::Duration;

use anyhow::{Context, bail};
use async_trait::async_trait;
use clap::Parser;
use serde::{Deserialize, Serialize};
use tokio::runtime::Handle;
use tracing::info;
use tracing_subscriber::EnvFilter;

use heddle_core::app::{Handler, HandlerError, TypedWorkQueue, WorkQueue, WorkQueueConfig};
use heddle_core::buffer::{BufferPool, BufferPoolConfig};
use heddle_core::domain::Task;
use heddle_core::impls::{LocalLogConfig, LocalReplicatedLog};
use heddle_core::ports::ReplicatedLog;

/// Run a producer, a crashing consumer and a task processor against a local log.
#[derive(Debug, Parser)]
#[command(name = "heddle", version)]
struct Args {
    /// Tasks the producer adds.
    #[arg(long, default_value_t = 10)]
    tasks: usize,

    /// Handlers running at once.
    #[arg(long, default_value_t = 4)]
    parallelism: usize,

    /// The first N handler calls fail.
    #[arg(long, default_value_t = 2)]
    failures: u32,

    /// Hand failed tasks back immediately instead of on session close.
    #[arg(long)]
    release_on_failure: bool,

    /// JSON config file (`queue`, `pool`, `log` sections; all optional).
    #[arg(long)]
    config: Option<PathBuf>,
}

#[derive(Debug, Default, Deserialize)]
#[serde(default)]
struct NodeConfig {
    queue: WorkQueueConfig,
    pool: BufferPoolConfig,
    log: LocalLogConfig,
}

impl NodeConfig {
    fn load(path: Option<&PathBuf>) -> anyhow::Result<Self> {
        let Some(path) = path else {
            return Ok(Self::default());
        };
        let text = std::fs::read_to_string(path)
            .with_context(|| format!("reading config {}", path.display()))?;
        serde_json::from_str(&text).with_context(|| format!("parsing config {}", path.display()))
    }
}

#[derive(Debug, Serialize, Deserialize)]
struct HelloPayload {
    name: String,
}

struct HelloHandler {
    remaining_failures: AtomicU32,
}

impl HelloHandler {
    fn new(n: u32) -> Self {
        Self {
            remaining_failures: AtomicU32::new(n),
        }
    }
}

#[async_trait]
impl Handler<HelloPayload> for HelloHandler {
    async fn handle(&self, task: Task<HelloPayload>) -> Result<(), HandlerError> {
        let failed = self
            .remaining_failures
            .fetch_update(Ordering::SeqCst, Ordering::SeqCst, |left| left.checked_sub(1))
            .is_ok();
        if failed {
            return Err(format!("intentional failure for {}", task.id()).into());
        }

        tokio::time::sleep(Duration::from_millis(20)).await;
        println!("Hello, {}! ({})", task.payload().name, task.id());
        Ok(())
    }
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")),
        )
        .init();

    let args = Args::parse();
    let mut config = NodeConfig::load(args.config.as_ref())?;
    if args.release_on_failure {
        config.queue.release_on_failure = true;
    }
    if args.tasks == 0 {
        bail!("--tasks must be > 0");
    }

    let pool = BufferPool::new(config.pool.clone());
    let log = Arc::new(LocalReplicatedLog::new(pool.clone(), config.log.clone()));

    // (A) producer
    let producer: TypedWorkQueue<HelloPayload> =
        TypedWorkQueue::new(WorkQueue::new(log.clone(), config.queue.clone()));
    let payloads: Vec<HelloPayload> = (0..args.tasks)
        .map(|i| HelloPayload {
            name: format!("guest-{i}"),
        })
        .collect();
    producer.add_multiple(&payloads).await?;
    info!(tasks = args.tasks, "producer done");

    // (B) a consumer takes work and disappears; its tasks go back in line
    let crashed: TypedWorkQueue<HelloPayload> =
        TypedWorkQueue::new(WorkQueue::new(log.clone(), config.queue.clone()));
    let held = crashed.take(2).await?;
    info!(session = %crashed.raw().session(), held = held.len(), "consumer crashed");
    log.expire_session(crashed.raw().session()).await?;

    // (C) processor
    let worker: TypedWorkQueue<HelloPayload> =
        TypedWorkQueue::new(WorkQueue::new(log.clone(), config.queue.clone()));
    worker
        .register_task_processor(
            HelloHandler::new(args.failures),
            args.parallelism,
            Handle::current(),
        )
        .await?;

    let expected = args.tasks as u64;
    tokio::time::timeout(Duration::from_secs(30), async {
        loop {
            let stats = log.local_stats();
            let settled = stats.pending == 0
                && stats.completed_total + stats.in_process as u64 >= expected;
            if settled {
                break;
            }
            tokio::time::sleep(Duration::from_millis(10)).await;
        }
    })
    .await
    .context("tasks did not settle within 30s")?;

    // failed tasks are still held by the worker; closing hands them back
    worker.close().await?;

    let stats = producer.stats().await?;
    println!(
        "queue: pending={} in_process={} completed_total={}",
        stats.pending, stats.in_process, stats.completed_total
    );
    let pool_stats = pool.stats();
    println!(
        "pool: allocated={} reused={} released={} discarded={} free={}",
        pool_stats.allocated,
        pool_stats.reused,
        pool_stats.released,
        pool_stats.discarded,
        pool_stats.free
    );
    println!("log: last_applied={}", log.last_applied());
    Ok(())
}
