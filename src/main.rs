//! Load simulator for the request pipeline.
//!
//! Fires a burst of requests at a simulated backend through a fully
//! configured pipeline, then prints a JSON summary of the outcomes.
//!
//! ```text
//! request-pipeline --config pipeline.toml --requests 500 --transient-rate 0.3 --watch
//! ```

use clap::Parser;
use futures_util::future::join_all;
use serde::Serialize;
use std::collections::BTreeMap;
use std::net::SocketAddr;
use std::path::PathBuf;
use std::time::Duration;
use tokio::sync::mpsc::UnboundedReceiver;
use tokio::time::Instant;

use request_pipeline::backend::simulated::{SimulatedBackend, SimulatedProfile};
use request_pipeline::config::watcher::ConfigWatcher;
use request_pipeline::config::{load_config, PipelineConfig};
use request_pipeline::observability::{logging::init_logging, metrics::init_metrics};
use request_pipeline::pipeline::{Outcome, Pipeline, PipelineStats};

#[derive(Parser)]
#[command(name = "request-pipeline")]
#[command(about = "Drive a burst of requests through the pipeline against a simulated backend", long_about = None)]
struct Cli {
    /// Pipeline configuration (TOML). Built-in defaults when omitted.
    #[arg(short, long)]
    config: Option<PathBuf>,

    /// Number of requests in the burst.
    #[arg(short = 'n', long, default_value_t = 200)]
    requests: usize,

    /// Base backend latency.
    #[arg(long, default_value_t = 20)]
    latency_ms: u64,

    /// Probability of a transient backend failure.
    #[arg(long, default_value_t = 0.1)]
    transient_rate: f64,

    /// Probability of a permanent backend failure.
    #[arg(long, default_value_t = 0.0)]
    permanent_rate: f64,

    /// Deadline applied to every request.
    #[arg(long)]
    deadline_ms: Option<u64>,

    /// Watch the config file and apply reloadable settings while running.
    #[arg(long, requires = "config")]
    watch: bool,
}

#[derive(Serialize)]
struct Summary {
    submitted: usize,
    succeeded: usize,
    failed: usize,
    timed_out: usize,
    canceled: usize,
    rejected: BTreeMap<&'static str, usize>,
    total_retries: u64,
    mean_latency_ms: f64,
    max_latency_ms: u64,
    elapsed_ms: u64,
    backend_calls: u64,
    pipeline: PipelineStats,
}

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    let cli = Cli::parse();

    let config = match &cli.config {
        Some(path) => load_config(path)?,
        None => PipelineConfig::default(),
    };
    init_logging(&config.observability)?;

    if config.observability.metrics_enabled {
        let addr: SocketAddr = config.observability.metrics_address.parse()?;
        init_metrics(addr)?;
    }

    let backend = SimulatedBackend::new(SimulatedProfile {
        latency: Duration::from_millis(cli.latency_ms),
        latency_jitter: Duration::from_millis(cli.latency_ms / 2),
        transient_rate: cli.transient_rate,
        permanent_rate: cli.permanent_rate,
    });
    let pipeline = Pipeline::new(config, backend)?;

    // Keep the watcher alive for as long as reloads are consumed.
    let mut _watcher = None;
    let mut reloads = None;
    if let (true, Some(path)) = (cli.watch, &cli.config) {
        let (watcher, rx) = ConfigWatcher::new(path);
        _watcher = Some(watcher.run()?);
        reloads = Some(rx);
    }

    tracing::info!(requests = cli.requests, "Starting burst");
    let summary = {
        let burst = run_burst(&pipeline, &cli);
        tokio::pin!(burst);
        loop {
            tokio::select! {
                summary = &mut burst => break Some(summary),
                Some(next) = next_reload(&mut reloads) => {
                    match pipeline.apply_reload(next) {
                        Ok(ignored) if ignored.is_empty() => tracing::info!("Reload applied"),
                        Ok(ignored) => tracing::info!(?ignored, "Reload applied partially"),
                        Err(e) => tracing::error!(error = %e, "Reload rejected"),
                    }
                }
                _ = tokio::signal::ctrl_c() => {
                    tracing::warn!("Interrupted, abandoning burst");
                    break None;
                }
            }
        }
    };

    if let Some(summary) = summary {
        println!("{}", serde_json::to_string_pretty(&summary)?);
    }
    pipeline.shutdown().await;
    Ok(())
}

async fn next_reload(reloads: &mut Option<UnboundedReceiver<PipelineConfig>>) -> Option<PipelineConfig> {
    match reloads {
        Some(rx) => rx.recv().await,
        None => std::future::pending().await,
    }
}

async fn run_burst(pipeline: &Pipeline<SimulatedBackend>, cli: &Cli) -> Summary {
    let started = Instant::now();
    let submissions = (0..cli.requests).map(|n| async move {
        let deadline = cli
            .deadline_ms
            .map(|ms| Instant::now() + Duration::from_millis(ms));
        pipeline.submit(format!("prompt #{n}"), deadline).await.await
    });
    let completions = join_all(submissions).await;

    let mut summary = Summary {
        submitted: completions.len(),
        succeeded: 0,
        failed: 0,
        timed_out: 0,
        canceled: 0,
        rejected: BTreeMap::new(),
        total_retries: 0,
        mean_latency_ms: 0.0,
        max_latency_ms: 0,
        elapsed_ms: started.elapsed().as_millis() as u64,
        backend_calls: 0,
        pipeline: pipeline.stats(),
    };

    let mut latency_sum = Duration::ZERO;
    for completion in &completions {
        summary.total_retries += u64::from(completion.retries());
        summary.backend_calls += u64::from(completion.attempts);
        summary.max_latency_ms = summary.max_latency_ms.max(completion.latency.as_millis() as u64);
        latency_sum += completion.latency;
        match &completion.outcome {
            Outcome::Success(_) => summary.succeeded += 1,
            Outcome::Failure(_) => summary.failed += 1,
            Outcome::Timeout => summary.timed_out += 1,
            Outcome::Canceled => summary.canceled += 1,
            Outcome::Rejected(reason) => *summary.rejected.entry(reason.as_str()).or_default() += 1,
        }
    }
    if !completions.is_empty() {
        summary.mean_latency_ms = latency_sum.as_secs_f64() * 1000.0 / completions.len() as f64;
    }
    summary
}
