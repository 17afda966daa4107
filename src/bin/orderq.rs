//! orderq CLI: drive a simulated keyed workload through the executor.

use clap::{Parser, Subcommand};
use orderq::telemetry::{TelemetryConfig, init_telemetry};
use orderq::{ExecutorOptions, Keyed, OrderedExecutor};
use std::collections::BTreeMap;
use std::path::PathBuf;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex, PoisonError};
use std::time::{Duration, Instant};
use tracing::warn;
use uuid::Uuid;

#[derive(Parser)]
#[command(name = "orderq", about = "Key-partitioned ordered task executor")]
struct Cli {
    /// TOML file with an [executor] table (defaults to ORDERQ_* env vars)
    #[arg(long, global = true)]
    config: Option<PathBuf>,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand)]
enum Command {
    /// Submit a random workload and verify per-key completion order
    Run {
        /// Number of items to submit
        #[arg(long, default_value_t = 40)]
        items: usize,
        /// Number of distinct keys
        #[arg(long, default_value_t = 4)]
        keys: usize,
        /// Override the configured degree of parallelism
        #[arg(long)]
        degree: Option<usize>,
        /// Upper bound for each item's simulated duration
        #[arg(long, default_value_t = 50)]
        max_ms: u64,
        /// Make every item with this key fail
        #[arg(long)]
        fail_key: Option<String>,
    },
    /// Print the effective executor options
    Config,
}

/// A simulated job: sleeps, then succeeds or fails.
struct Job {
    id: Uuid,
    key: String,
    /// Position among the jobs sharing `key`.
    seq: usize,
    duration: Duration,
}

impl Keyed for Job {
    type Key = String;

    fn key(&self) -> &String {
        &self.key
    }
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    dotenvy::dotenv().ok();
    let cli = Cli::parse();

    let options = match &cli.config {
        Some(path) => ExecutorOptions::load(path)?,
        None => ExecutorOptions::from_env()?,
    };

    match cli.command {
        Command::Run {
            items,
            keys,
            degree,
            max_ms,
            fail_key,
        } => {
            let options = match degree {
                Some(degree) => options.with_max_degree_of_parallelism(degree),
                None => options,
            };
            cmd_run(options, items, keys, max_ms, fail_key).await
        }
        Command::Config => cmd_config(&options),
    }
}

async fn cmd_run(
    options: ExecutorOptions,
    items: usize,
    keys: usize,
    max_ms: u64,
    fail_key: Option<String>,
) -> anyhow::Result<()> {
    let telemetry = init_telemetry(TelemetryConfig {
        endpoint: std::env::var("OTEL_ENDPOINT").ok(),
        service_name: "orderq".to_string(),
    })?;

    anyhow::ensure!(keys > 0, "--keys must be at least 1");

    let finished: Arc<Mutex<Vec<(String, usize)>>> = Arc::default();
    let failures = Arc::new(AtomicUsize::new(0));

    let executor = {
        let finished = Arc::clone(&finished);
        OrderedExecutor::new(
            move |job: Job| {
                let finished = Arc::clone(&finished);
                let fail = fail_key.as_deref() == Some(job.key.as_str());
                async move {
                    tokio::time::sleep(job.duration).await;
                    finished
                        .lock()
                        .unwrap_or_else(PoisonError::into_inner)
                        .push((job.key.clone(), job.seq));
                    if fail {
                        anyhow::bail!("job {} failed on purpose", job.id);
                    }
                    Ok(())
                }
            },
            options,
        )?
    };
    {
        let failures = Arc::clone(&failures);
        executor.set_error_handler(move |error| {
            let failures = Arc::clone(&failures);
            async move {
                failures.fetch_add(1, Ordering::SeqCst);
                warn!(key = error.key().unwrap_or("-"), "{error}");
            }
        });
    }

    let started = Instant::now();
    let mut per_key = vec![0usize; keys];
    for n in 0..items {
        let slot = n % keys;
        // Random bits from a v4 uuid are plenty for simulated durations.
        let jitter = Uuid::new_v4().as_u128() % (u128::from(max_ms) + 1);
        let job = Job {
            id: Uuid::new_v4(),
            key: format!("key-{slot}"),
            seq: per_key[slot],
            duration: Duration::from_millis(jitter as u64),
        };
        per_key[slot] += 1;
        if !executor.submit(job).await {
            anyhow::bail!("executor refused item {n}");
        }
    }
    println!(
        "Submitted {items} item(s) over {keys} key(s) at degree {}, pending {}",
        executor.options().max_degree_of_parallelism,
        executor.pending_count()
    );

    executor.complete().await?;
    let elapsed = started.elapsed();
    if let Err(e) = telemetry.force_flush() {
        warn!("{e}");
    }

    let finished = finished
        .lock()
        .unwrap_or_else(PoisonError::into_inner)
        .clone();
    let mut by_key: BTreeMap<String, Vec<usize>> = BTreeMap::new();
    for (key, seq) in finished {
        by_key.entry(key).or_default().push(seq);
    }

    let mut out_of_order = 0;
    for (key, seqs) in &by_key {
        let ordered = seqs.windows(2).all(|w| w[0] < w[1]);
        if !ordered {
            out_of_order += 1;
        }
        println!(
            "{key:<8}  {:<4}  {}",
            if ordered { "ok" } else { "BAD" },
            seqs.iter()
                .map(|s| s.to_string())
                .collect::<Vec<_>>()
                .join(" ")
        );
    }
    println!(
        "\nDrained in {}ms, {} failure(s) reported",
        elapsed.as_millis(),
        failures.load(Ordering::SeqCst)
    );

    anyhow::ensure!(out_of_order == 0, "{out_of_order} key(s) completed out of order");
    Ok(())
}

fn cmd_config(options: &ExecutorOptions) -> anyhow::Result<()> {
    options.validate()?;
    println!("Name:         {}", options.name);
    println!("Degree:       {}", options.max_degree_of_parallelism);
    println!(
        "Capacity:     {}",
        options
            .bounded_capacity
            .map(|n| n.to_string())
            .unwrap_or("unbounded".to_string())
    );
    println!("Scan:         {}ms", options.scan_interval.as_millis());
    println!("Dispatch:     {}ms", options.dispatch_wait.as_millis());
    Ok(())
}
