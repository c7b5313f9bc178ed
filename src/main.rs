use anyhow::Result;
use clap::Parser;
use std::sync::Arc;
use tracing::{info, warn};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

use keyed_job_queue::{
    config::Config,
    job_queue::{Admission, JobQueue},
    jobs::CommandSpec,
    observability::QueueObservability,
};

#[derive(Parser)]
#[command(name = "keyed-job-queue")]
#[command(version)]
#[command(about = "Run shell jobs serially per queue key and concurrently across keys")]
#[command(long_about = None)]
struct Cli {
    /// Configuration file path
    #[arg(short, long, default_value = "keyed-job-queue.toml")]
    config: String,

    /// Maximum number of queues executing at once, 0 for unbounded (overrides config file)
    #[arg(short = 'm', long, value_name = "N")]
    max_concurrent: Option<usize>,

    /// Log level (overrides config file)
    #[arg(short = 'v', long)]
    log_level: Option<String>,

    /// Print the queue snapshot as JSON after submitting
    #[arg(long)]
    dump: bool,

    /// Job to run as `[QUEUE::]COMMAND`; jobs without a queue run in parallel
    #[arg(short, long = "job", value_name = "JOB")]
    jobs: Vec<CommandSpec>,
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    let mut config = Config::load_from_file(&cli.config)?;
    if let Some(max_concurrent) = cli.max_concurrent {
        config.job_queue.max_concurrent_jobs = max_concurrent;
    }
    if let Some(level) = cli.log_level {
        config.logging.level = level;
    }
    config.validate()?;

    let log_filter = format!("keyed_job_queue={}", config.logging.level.to_lowercase());
    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| log_filter.into()),
        )
        .with(tracing_subscriber::fmt::layer())
        .init();

    info!("Starting keyed-job-queue v{}", env!("CARGO_PKG_VERSION"));
    info!("Configuration loaded from: {}", cli.config);

    let observability = QueueObservability::new("keyed-job-queue");
    let queue = JobQueue::builder()
        .gate(config.job_queue.execution_gate())
        .limit(config.job_queue.concurrency_limit())
        .metrics(Arc::new(observability))
        .build()?;

    info!(
        "Job queue ready (max concurrent: {}, enabled: {})",
        config
            .job_queue
            .concurrency_limit()
            .get()
            .map_or_else(|| "unbounded".to_string(), |max| max.to_string()),
        queue.gate().is_enabled()
    );

    for spec in cli.jobs {
        let queue_key = spec.queue_key();
        let job = Arc::new(spec.into_job());
        match queue.submit(job.clone(), queue_key)? {
            Admission::Started => info!("Started {}", job.command()),
            Admission::Queued => info!("Queued {}", job.command()),
            Admission::Disabled => warn!("Execution disabled, skipped {}", job.command()),
        }
    }

    if cli.dump {
        println!("{}", serde_json::to_string_pretty(&queue.snapshot())?);
    }

    tokio::select! {
        _ = queue.wait_idle(None) => {
            info!("All jobs finished");
        }
        _ = tokio::signal::ctrl_c() => {
            info!("Received interrupt, no new jobs will start");
            queue.gate().disable();

            let timeout = config.job_queue.shutdown_timeout;
            if !queue.wait_idle(Some(timeout)).await {
                let counts = queue.counts();
                warn!(
                    "Timeout waiting for {} jobs to complete after {}, killing them",
                    counts.executing,
                    humantime::format_duration(timeout)
                );
                queue.debug();
            }
            queue.clear().await;
        }
    }

    queue.check_consistency()?;
    Ok(())
}
