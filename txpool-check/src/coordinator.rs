// (c) Cartesi and individual authors (see AUTHORS)
// SPDX-License-Identifier: Apache-2.0 (see LICENSE)

use std::error::Error as _;
use std::sync::Arc;

use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};
use serde::Serialize;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};

use crate::chain::ChainContext;
use crate::config::BenchmarkConfig;
use crate::endpoint::{EndpointPool, phase_indices};
use crate::error::BenchError;
use crate::nonce::{NonceCursor, resolve_starting_nonce};
use crate::observer::ObserverFactory;
use crate::phase::{
    LatencySettings, ThroughputSettings, run_latency_phase, run_throughput_phase,
};
use crate::report::{LatencyStats, format_stats};
use crate::sink::{
    OUTPUT_AVG_LATENCY_MS, OUTPUT_TOTAL_TIME_MS, OUTPUT_TX_COUNT, ResultSink, TaskResult,
};
use crate::transaction::parse_signing_key;

#[derive(Debug, Clone, Serialize)]
pub struct RunSummary {
    pub verdict: TaskResult,
    pub latency_endpoint: String,
    pub throughput_endpoint: Option<String>,
    pub tx_count: u64,
    pub avg_latency_ms: u64,
    pub latency_retries: u64,
    pub latency_stats: Option<LatencyStats>,
    pub total_time_ms: Option<u64>,
}

/// Runs the latency phase, then the throughput phase, and reports the
/// outcome to a [`ResultSink`].
pub struct Coordinator {
    config: BenchmarkConfig,
    pool: EndpointPool,
    observers: Arc<dyn ObserverFactory>,
    rng: StdRng,
}

impl Coordinator {
    pub fn new(
        config: BenchmarkConfig,
        pool: EndpointPool,
        observers: Arc<dyn ObserverFactory>,
    ) -> Result<Self, BenchError> {
        config.validate()?;
        Ok(Self {
            config,
            pool,
            observers,
            rng: StdRng::from_entropy(),
        })
    }

    /// Makes endpoint selection reproducible.
    pub fn with_seed(mut self, seed: u64) -> Self {
        self.rng = StdRng::seed_from_u64(seed);
        self
    }

    /// Every fatal error is logged here once and turns the verdict into a
    /// failure before being returned.
    pub async fn run(
        &mut self,
        sink: &mut dyn ResultSink,
        cancel: &CancellationToken,
    ) -> Result<RunSummary, BenchError> {
        match self.run_phases(sink, cancel).await {
            Ok(summary) => {
                sink.set_result(summary.verdict);
                Ok(summary)
            }
            Err(err) => {
                error!(
                    error = %err,
                    cause = %error_chain(&err),
                    timeout = err.is_timeout(),
                    "txpool check failed"
                );
                sink.set_result(TaskResult::Failure);
                Err(err)
            }
        }
    }

    async fn run_phases(
        &mut self,
        sink: &mut dyn ResultSink,
        cancel: &CancellationToken,
    ) -> Result<RunSummary, BenchError> {
        let ready = self.pool.ready_endpoints(&self.config.endpoint_filter()?);
        if ready.is_empty() {
            return Err(BenchError::NoReadyEndpoints);
        }
        let (latency_index, throughput_index) =
            phase_indices(self.rng.gen_range(0..ready.len()), ready.len());
        let latency_endpoint = &ready[latency_index];

        let signer = parse_signing_key(&self.config.private_key)?;
        let schedule = self.config.fork_schedule();
        let chain = ChainContext::fetch(latency_endpoint, &schedule).await?;
        info!(
            endpoint = %latency_endpoint.name,
            chain_id = chain.chain_id,
            head = chain.head.number,
            fork_hash = %alloy_primitives::hex::encode(chain.fork_id.hash),
            fork_next = chain.fork_id.next,
            sender = %signer.address(),
            "chain context loaded"
        );
        let start_nonce = resolve_starting_nonce(
            latency_endpoint,
            signer.address(),
            self.config.nonce,
            chain.head.number,
        )
        .await?;
        let mut cursor = NonceCursor::new(start_nonce);

        let mut observer = self.observers.connect(latency_endpoint, &chain).await?;
        let latency = run_latency_phase(
            latency_endpoint,
            observer.as_mut(),
            &signer,
            chain.chain_id,
            &mut cursor,
            &LatencySettings {
                tx_count: self.config.tx_count,
                measure_interval: self.config.measure_interval,
                max_consecutive_failures: self.config.max_consecutive_send_failures,
            },
            cancel,
        )
        .await;
        observer.close().await;
        let latency = latency?;

        let avg_latency_ms = latency.average_latency_ms();
        let latency_stats = latency.recorder.stats();
        if let Some(stats) = latency_stats.as_ref() {
            info!(stats = %format_stats(stats), "latency distribution");
        }
        debug!("latency percentiles:\n{}", latency.recorder.render());

        let mut summary = RunSummary {
            verdict: TaskResult::Success,
            latency_endpoint: latency_endpoint.name.clone(),
            throughput_endpoint: None,
            tx_count: latency.completed,
            avg_latency_ms,
            latency_retries: latency.retries,
            latency_stats,
            total_time_ms: None,
        };

        if avg_latency_ms > self.config.expected_latency {
            if self.config.fail_on_high_latency {
                warn!(
                    avg_latency_ms,
                    expected_latency_ms = self.config.expected_latency,
                    "average latency above threshold, failing run"
                );
                summary.verdict = TaskResult::Failure;
                return Ok(summary);
            }
            warn!(
                avg_latency_ms,
                expected_latency_ms = self.config.expected_latency,
                "average latency above threshold"
            );
        }
        info!(
            tx_count = latency.completed,
            avg_latency_ms,
            retries = latency.retries,
            "latency phase complete"
        );
        sink.set_output(OUTPUT_TX_COUNT, latency.completed);
        sink.set_output(OUTPUT_AVG_LATENCY_MS, avg_latency_ms);

        // Observer attaches before the settle delay.
        let throughput_endpoint = &ready[throughput_index];
        let chain = chain.refresh_head(throughput_endpoint, &schedule).await?;
        let mut observer = self.observers.connect(throughput_endpoint, &chain).await?;
        tokio::select! {
            _ = tokio::time::sleep(self.config.settle_delay()) => {}
            _ = cancel.cancelled() => {
                observer.close().await;
                return Err(BenchError::Cancelled);
            }
        }
        let throughput = run_throughput_phase(
            throughput_endpoint,
            observer.as_mut(),
            &signer,
            chain.chain_id,
            &mut cursor,
            &ThroughputSettings {
                tx_count: self.config.tx_count,
                measure_interval: self.config.measure_interval,
                drain_grace: self.config.drain_grace(),
            },
            cancel,
        )
        .await;
        observer.close().await;
        let throughput = throughput?;

        sink.set_output(OUTPUT_TX_COUNT, throughput.submitted);
        sink.set_output(OUTPUT_TOTAL_TIME_MS, throughput.total_time_ms());
        summary.throughput_endpoint = Some(throughput_endpoint.name.clone());
        summary.total_time_ms = Some(throughput.total_time_ms());
        Ok(summary)
    }
}

fn error_chain(err: &BenchError) -> String {
    let mut causes = Vec::new();
    let mut source = err.source();
    while let Some(cause) = source {
        causes.push(cause.to_string());
        source = cause.source();
    }
    if causes.is_empty() {
        "-".to_string()
    } else {
        causes.join(": ")
    }
}
