//! Concurrent workload
//!
//! Writers overwrite random ranges and append to a shared object while
//! readers keep re-reading a pinned snapshot version. Any difference between
//! a pinned read and the snapshot taken before the writers started fails the
//! run.

use anyhow::{Result, bail};
use clap::Args;
use pagestore_common::{Config, Version};
use pagestore_core::{ObjectHandle, VersionStore};
use rand::Rng;
use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::Instant;
use tokio::task::JoinSet;
use tracing::{debug, info};

#[derive(Args, Debug, Clone)]
pub struct BenchArgs {
    /// Concurrent writer tasks
    #[arg(long, default_value = "4")]
    writers: usize,

    /// Concurrent reader tasks
    #[arg(long, default_value = "4")]
    readers: usize,

    /// Operations per task
    #[arg(long, default_value = "100")]
    ops: usize,

    /// Bytes per write
    #[arg(long, default_value = "4096")]
    write_size: usize,

    /// Initial object size in pages
    #[arg(long, default_value = "16")]
    pages: u64,
}

#[derive(Default)]
struct Counters {
    bytes_written: AtomicU64,
    bytes_read: AtomicU64,
    versions: AtomicU64,
    reads: AtomicU64,
}

async fn writer(
    handle: Arc<ObjectHandle>,
    args: Arc<BenchArgs>,
    counters: Arc<Counters>,
) -> Result<()> {
    for _ in 0..args.ops {
        let latest = handle.latest()?;
        let size = handle.size(latest)?;

        let (append, offset, data) = {
            let mut rng = rand::thread_rng();
            let len = rng.gen_range(1..=args.write_size.max(1));
            let mut data = vec![0u8; len];
            rng.fill(&mut data[..]);
            let append = rng.gen_bool(0.2) || (len as u64) > size;
            let offset = if append { 0 } else { rng.gen_range(0..=size - len as u64) };
            (append, offset, data)
        };

        let version = if append {
            handle.append(&data).await?
        } else {
            handle.write(offset, &data).await?
        };
        debug!("Writer committed {:?}", version);
        counters.bytes_written.fetch_add(data.len() as u64, Ordering::Relaxed);
        counters.versions.fetch_add(1, Ordering::Relaxed);
    }
    Ok(())
}

async fn reader(
    handle: Arc<ObjectHandle>,
    pinned: Version,
    snapshot: Arc<Vec<u8>>,
    args: Arc<BenchArgs>,
    counters: Arc<Counters>,
) -> Result<()> {
    let size = snapshot.len() as u64;
    for _ in 0..args.ops {
        let (offset, len) = {
            let mut rng = rand::thread_rng();
            let offset = rng.gen_range(0..size);
            let len = rng.gen_range(1..=size - offset);
            (offset, len)
        };

        let data = handle.read(offset, len, pinned).await?;
        let start = usize::try_from(offset)?;
        if data[..] != snapshot[start..start + data.len()] {
            bail!("pinned {pinned:?} changed at [{offset}, {})", offset + len);
        }

        // Latest reads must always succeed against whatever is committed
        let latest = handle.latest()?;
        let latest_size = handle.size(latest)?;
        let head = handle.read(0, latest_size.min(len), latest).await?;

        counters
            .bytes_read
            .fetch_add(data.len() as u64 + head.len() as u64, Ordering::Relaxed);
        counters.reads.fetch_add(2, Ordering::Relaxed);
    }
    Ok(())
}

pub async fn run(store: Arc<VersionStore>, config: &Config, args: &BenchArgs) -> Result<()> {
    let page_size = config.store.page_size;
    if args.pages == 0 {
        bail!("--pages must be at least 1");
    }

    let handle = Arc::new(ObjectHandle::create(
        store,
        page_size,
        config.store.replication_count,
    )?);

    let initial_len = usize::try_from(page_size * args.pages)?;
    let mut initial = vec![0u8; initial_len];
    rand::thread_rng().fill(&mut initial[..]);
    let pinned = handle.append(&initial).await?;
    let snapshot = Arc::new(initial);

    info!(
        "Benchmarking object {}: {} writers, {} readers, {} ops each",
        handle.id(),
        args.writers,
        args.readers,
        args.ops
    );

    let shared = Arc::new(args.clone());
    let counters = Arc::new(Counters::default());
    let started = Instant::now();

    let mut tasks = JoinSet::new();
    for _ in 0..args.writers {
        tasks.spawn(writer(handle.clone(), shared.clone(), counters.clone()));
    }
    for _ in 0..args.readers {
        tasks.spawn(reader(
            handle.clone(),
            pinned,
            snapshot.clone(),
            shared.clone(),
            counters.clone(),
        ));
    }
    while let Some(result) = tasks.join_next().await {
        result??;
    }

    let elapsed = started.elapsed().as_secs_f64().max(f64::EPSILON);
    let written = counters.bytes_written.load(Ordering::Relaxed);
    let read = counters.bytes_read.load(Ordering::Relaxed);
    let versions = counters.versions.load(Ordering::Relaxed);
    let reads = counters.reads.load(Ordering::Relaxed);

    let latest = handle.latest()?;
    if u64::from(latest.as_u32()) != versions + 1 {
        bail!("expected {} versions, found {:?}", versions + 1, latest);
    }

    println!("Benchmark Results");
    println!("=================");
    println!("Elapsed:        {elapsed:.3} s");
    println!("Versions:       {versions} ({:.1}/s)", versions as f64 / elapsed);
    println!("Reads:          {reads} ({:.1}/s)", reads as f64 / elapsed);
    println!(
        "Write payload:  {written} bytes ({:.2} MiB/s)",
        written as f64 / elapsed / (1024.0 * 1024.0)
    );
    println!(
        "Read payload:   {read} bytes ({:.2} MiB/s)",
        read as f64 / elapsed / (1024.0 * 1024.0)
    );
    println!("Final size:     {} bytes at {:?}", handle.size(latest)?, latest);
    Ok(())
}
