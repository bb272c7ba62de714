// (c) Cartesi and individual authors (see AUTHORS)
// SPDX-License-Identifier: Apache-2.0 (see LICENSE)

use std::error::Error;
use std::fs;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;

use clap::{Parser, ValueEnum};
use serde::Serialize;
use tokio_util::sync::CancellationToken;
use tracing::{info, warn};
use tracing_subscriber::EnvFilter;

use txpool_check::endpoint::{EndpointPool, RpcEndpoint};
use txpool_check::observer::NetworkObservers;
use txpool_check::{
    BenchmarkConfig, Coordinator, ObserverMode, RecordedResult, RunSummary, TaskResult,
};

type BenchResult<T> = Result<T, Box<dyn Error + Send + Sync>>;

#[derive(Debug, Parser)]
#[command(
    name = "tx_pool_check",
    about = "transaction pool latency and throughput check",
    version,
    after_help = "Examples:\n  cargo run -p txpool-check --bin tx_pool_check -- --endpoint geth=http://127.0.0.1:8545 --private-key 0x.. --tx-count 200\n  cargo run -p txpool-check --bin tx_pool_check -- --config task.json --endpoint a=http://10.0.0.2:8545 --endpoint b=http://10.0.0.3:8545 --observer poll"
)]
struct Args {
    /// Execution client RPC endpoint as NAME=URL; a bare URL is named client-<index>.
    #[arg(long = "endpoint", required = true)]
    endpoints: Vec<String>,
    /// JSON task config; flags below override its values.
    #[arg(long)]
    config: Option<PathBuf>,
    #[arg(long, env = "TXPOOL_CHECK_PRIVATE_KEY", hide_env_values = true)]
    private_key: Option<String>,
    #[arg(long)]
    nonce: Option<u64>,
    #[arg(long)]
    tx_count: Option<u64>,
    #[arg(long)]
    measure_interval: Option<u64>,
    #[arg(long)]
    expected_latency_ms: Option<u64>,
    /// `--fail-on-high-latency` alone means true.
    #[arg(long, num_args = 0..=1, default_missing_value = "true")]
    fail_on_high_latency: Option<bool>,
    #[arg(long)]
    client_pattern: Option<String>,
    #[arg(long)]
    exclude_client_pattern: Option<String>,
    #[arg(long, value_enum)]
    observer: Option<CliObserver>,
    #[arg(long)]
    settle_delay_ms: Option<u64>,
    #[arg(long)]
    drain_grace_ms: Option<u64>,
    /// Overall deadline for the whole run.
    #[arg(long)]
    timeout_secs: Option<u64>,
    #[arg(long)]
    seed: Option<u64>,
    #[arg(long)]
    json_out: Option<String>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, ValueEnum)]
enum CliObserver {
    #[value(name = "wire")]
    Wire,
    #[value(name = "poll")]
    Poll,
}

impl From<CliObserver> for ObserverMode {
    fn from(value: CliObserver) -> Self {
        match value {
            CliObserver::Wire => Self::Wire,
            CliObserver::Poll => Self::Poll,
        }
    }
}

impl Args {
    fn benchmark_config(&self) -> BenchResult<BenchmarkConfig> {
        let mut config = match self.config.as_ref() {
            Some(path) => BenchmarkConfig::from_json_file(path)?,
            None => BenchmarkConfig::default(),
        };
        if let Some(key) = self.private_key.as_ref() {
            config.private_key = key.clone();
        }
        if self.nonce.is_some() {
            config.nonce = self.nonce;
        }
        if let Some(value) = self.tx_count {
            config.tx_count = value;
        }
        if let Some(value) = self.measure_interval {
            config.measure_interval = value;
        }
        if let Some(value) = self.expected_latency_ms {
            config.expected_latency = value;
        }
        if let Some(value) = self.fail_on_high_latency {
            config.fail_on_high_latency = value;
        }
        if let Some(value) = self.client_pattern.as_ref() {
            config.client_pattern = value.clone();
        }
        if let Some(value) = self.exclude_client_pattern.as_ref() {
            config.exclude_client_pattern = value.clone();
        }
        if let Some(value) = self.observer {
            config.observer = value.into();
        }
        if let Some(value) = self.settle_delay_ms {
            config.settle_delay_ms = value;
        }
        if let Some(value) = self.drain_grace_ms {
            config.drain_grace_ms = value;
        }
        config.validate()?;
        Ok(config)
    }

    fn endpoint_pool(&self) -> BenchResult<EndpointPool> {
        let mut pool = EndpointPool::new();
        for (index, raw) in self.endpoints.iter().enumerate() {
            let (name, url) = parse_endpoint_arg(raw, index);
            let endpoint = RpcEndpoint::connect(&url)?;
            info!(endpoint = %name, url = endpoint.url(), "registered endpoint");
            pool.add(name, Arc::new(endpoint));
        }
        Ok(pool)
    }
}

fn parse_endpoint_arg(raw: &str, index: usize) -> (String, String) {
    match raw.split_once('=') {
        Some((name, url)) if !name.is_empty() && !name.contains("://") => {
            (name.to_string(), url.to_string())
        }
        _ => (format!("client-{index}"), raw.to_string()),
    }
}

#[derive(Debug, Serialize)]
struct JsonOutput<'a> {
    benchmark: &'static str,
    config: &'a BenchmarkConfig,
    result: &'a RecordedResult,
    summary: Option<&'a RunSummary>,
    error: Option<String>,
}

#[tokio::main]
async fn main() -> BenchResult<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")),
        )
        .init();

    let args = Args::parse();
    let config = args.benchmark_config()?;
    let pool = args.endpoint_pool()?;
    info!(
        endpoints = pool.len(),
        tx_count = config.tx_count,
        measure_interval = config.measure_interval,
        expected_latency_ms = config.expected_latency,
        fail_on_high_latency = config.fail_on_high_latency,
        observer = ?config.observer,
        "txpool check config"
    );

    let cancel = CancellationToken::new();
    let watchdog = tokio::spawn(cancel_on_signal_or_deadline(
        cancel.clone(),
        args.timeout_secs.map(Duration::from_secs),
    ));

    let observers = Arc::new(NetworkObservers::new(config.observer));
    let mut coordinator = Coordinator::new(config.clone(), pool, observers)?;
    if let Some(seed) = args.seed {
        coordinator = coordinator.with_seed(seed);
    }
    let mut result = RecordedResult::default();
    let outcome = coordinator.run(&mut result, &cancel).await;
    watchdog.abort();

    print_result(&result, outcome.as_ref().ok());
    if let Some(path) = args.json_out.as_ref() {
        if let Some(parent) = Path::new(path).parent() {
            fs::create_dir_all(parent)?;
        }
        let payload = JsonOutput {
            benchmark: "tx_pool_check",
            config: &config,
            result: &result,
            summary: outcome.as_ref().ok(),
            error: outcome.as_ref().err().map(ToString::to_string),
        };
        fs::write(path, serde_json::to_vec_pretty(&payload)?)?;
        println!("txpool check json: {path}");
    }

    outcome?;
    if result.result != TaskResult::Success {
        return Err("txpool check verdict: failure".into());
    }
    Ok(())
}

async fn cancel_on_signal_or_deadline(cancel: CancellationToken, deadline: Option<Duration>) {
    let deadline = async {
        match deadline {
            Some(limit) => tokio::time::sleep(limit).await,
            None => std::future::pending().await,
        }
    };
    tokio::select! {
        signal = tokio::signal::ctrl_c() => {
            if let Err(err) = signal {
                warn!(error = %err, "cannot listen for ctrl-c");
                return;
            }
            warn!("interrupted, cancelling run");
        }
        _ = deadline => warn!("overall deadline elapsed, cancelling run"),
    }
    cancel.cancel();
}

fn print_result(result: &RecordedResult, summary: Option<&RunSummary>) {
    println!("txpool check: {:?}", result.result);
    for (name, value) in &result.outputs {
        println!("  {name}: {value}");
    }
    if let Some(summary) = summary {
        println!("  latency_endpoint: {}", summary.latency_endpoint);
        if let Some(endpoint) = summary.throughput_endpoint.as_ref() {
            println!("  throughput_endpoint: {endpoint}");
        }
        println!("  latency_retries: {}", summary.latency_retries);
        if let Some(stats) = summary.latency_stats.as_ref() {
            println!("  latency: {}", txpool_check::report::format_stats(stats));
        }
    }
}
