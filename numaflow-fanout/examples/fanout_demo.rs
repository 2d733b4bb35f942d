use std::time::{Duration, Instant};

use futures::StreamExt;
use numaflow_fanout::{Concurrency, Config, OffloadPool, Operation, each, map};
use tokio::sync::mpsc;
use tracing::{Level, info};
use tracing_subscriber::layer::SubscriberExt;
use tracing_subscriber::util::SubscriberInitExt;
use tracing_subscriber::{EnvFilter, fmt};

fn setup_tracing() {
    // RUST_LOG can be used to set the log level, the default is `info`.
    let filter = EnvFilter::builder()
        .with_default_directive(Level::INFO.into())
        .from_env_lossy();

    tracing_subscriber::registry()
        .with(filter)
        .with(fmt::layer())
        .init();
}

async fn slow_lookup(id: u64) -> Result<String, std::io::Error> {
    tokio::time::sleep(Duration::from_millis(100 + (id * 37) % 200)).await;
    Ok(format!("record-{id}"))
}

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    setup_tracing();

    // NUMAFLOW_FANOUT_CONCURRENCY etc. override the defaults
    let config = Config::load(std::env::vars())?;
    let config = match config.concurrency {
        Concurrency::Unbounded => config.with_concurrency(Concurrency::bounded(4)?),
        Concurrency::Bounded(_) => config,
    };

    println!("1. map over 12 ids with concurrency {}", config.concurrency);
    let start = Instant::now();
    let records = map(0..12, Operation::from_async(slow_lookup), config.clone()).await?;
    println!("   {:?} in {:?}", records, start.elapsed());

    println!("\n2. each over a sequence, results in completion order");
    let mut handle = each(
        vec![5u64, 1, 4, 2, 3],
        Operation::from_async(slow_lookup),
        config.clone(),
    );
    while let Some(record) = handle.next().await {
        println!("   completed {}", record?);
    }
    handle.wait().await?;
    println!("   processed {}", handle.count_processed());

    println!("\n3. each over a queue fed by a producer, cancelled once drained");
    let (tx, rx) = mpsc::unbounded_channel();
    let mut handle = each(rx, Operation::from_async(slow_lookup), config.clone());
    tokio::spawn(async move {
        for id in 100..106 {
            tokio::time::sleep(Duration::from_millis(30)).await;
            if tx.send(id).is_err() {
                break;
            }
        }
    });
    let mut received = 0;
    while let Some(record) = handle.next().await {
        println!("   completed {}", record?);
        received += 1;
        if received == 6 {
            handle.cancel();
        }
    }
    handle.wait().await?;

    println!("\n4. CPU-bound checksum offloaded to the blocking pool");
    let checksum = Operation::from_fn(|seed: u64| {
        let sum = (0..2_000_000u64).fold(seed, |acc, x| acc.wrapping_mul(31).wrapping_add(x));
        Ok::<_, std::io::Error>(sum)
    });
    let sums = map(
        0..8u64,
        checksum,
        config.with_offload(OffloadPool::Blocking),
    )
    .await?;
    info!(count = sums.len(), "Checksums computed");

    Ok(())
}
