// (c) Cartesi and individual authors (see AUTHORS)
// SPDX-License-Identifier: Apache-2.0 (see LICENSE)

use std::sync::Arc;
use std::time::Duration;

use alloy::signers::local::PrivateKeySigner;
use alloy_primitives::TxHash;
use tokio::sync::oneshot;
use tokio::task::JoinHandle;
use tokio::time::Instant;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info};

use crate::endpoint::{ExecutionEndpoint, NamedEndpoint};
use crate::error::BenchError;
use crate::nonce::NonceCursor;
use crate::observer::{BatchDrain, ConfirmationCounter, ConfirmationObserver};
use crate::transaction::build_transfer;

#[derive(Debug, Clone, Copy)]
pub struct ThroughputSettings {
    pub tx_count: u64,
    pub measure_interval: u64,
    /// Pause after the last confirmation before the clock stops.
    pub drain_grace: Duration,
}

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct RateCheckpoint {
    pub confirmed: u64,
    pub rate_per_sec: f64,
}

#[derive(Debug, Clone, PartialEq)]
pub struct ThroughputOutcome {
    pub submitted: u64,
    pub confirmed: u64,
    pub total_time: Duration,
    pub checkpoints: Vec<RateCheckpoint>,
}

impl ThroughputOutcome {
    pub fn total_time_ms(&self) -> u64 {
        u64::try_from(self.total_time.as_millis()).unwrap_or(u64::MAX)
    }
}

pub fn rate_per_sec(count: u64, elapsed: Duration) -> f64 {
    if elapsed.is_zero() {
        0.0
    } else {
        count as f64 / elapsed.as_secs_f64()
    }
}

/// Logs the confirmation rate every `interval` confirmations.
#[derive(Debug, Clone)]
pub struct ThroughputMeter {
    interval: u64,
    last_mark: Instant,
    last_count: u64,
    checkpoints: Vec<RateCheckpoint>,
}

impl ThroughputMeter {
    pub fn new(interval: u64, started: Instant) -> Self {
        Self {
            interval: interval.max(1),
            last_mark: started,
            last_count: 0,
            checkpoints: Vec::new(),
        }
    }

    pub fn observe(&mut self, confirmed: u64) {
        if confirmed < self.last_count.saturating_add(self.interval) {
            return;
        }
        let now = Instant::now();
        let rate = rate_per_sec(confirmed - self.last_count, now - self.last_mark);
        info!(confirmed, rate_tx_per_s = rate, "throughput progress");
        self.checkpoints.push(RateCheckpoint {
            confirmed,
            rate_per_sec: rate,
        });
        self.last_mark = now;
        self.last_count = confirmed;
    }

    pub fn checkpoints(&self) -> &[RateCheckpoint] {
        &self.checkpoints
    }
}

struct SenderReport {
    submitted: u64,
    next_nonce: u64,
}

/// Aborts the sender if the phase returns before joining it.
struct SenderTask(Option<JoinHandle<Result<SenderReport, BenchError>>>);

impl SenderTask {
    fn is_running(&self) -> bool {
        self.0.is_some()
    }

    /// Never resolves once the task has been joined.
    async fn join(&mut self) -> Result<SenderReport, BenchError> {
        let Some(handle) = self.0.as_mut() else {
            return std::future::pending().await;
        };
        let joined = handle.await;
        self.0 = None;
        joined.map_err(|e| BenchError::sender_task(format!("sender task did not finish: {e}")))?
    }
}

impl Drop for SenderTask {
    fn drop(&mut self) {
        if let Some(handle) = self.0.take() {
            handle.abort();
        }
    }
}

struct BatchSender {
    endpoint: Arc<dyn ExecutionEndpoint>,
    name: String,
    signer: PrivateKeySigner,
    chain_id: u64,
    cursor: NonceCursor,
    count: u64,
    interval: u64,
}

impl BatchSender {
    /// Fire and forget: submits back to back and hands the last hash to the
    /// drainer. Any submission failure ends the batch.
    async fn run(
        mut self,
        sentinel: oneshot::Sender<TxHash>,
        cancel: CancellationToken,
    ) -> Result<SenderReport, BenchError> {
        let started = Instant::now();
        let mut last = None;
        for sent in 1..=self.count {
            if cancel.is_cancelled() {
                return Err(BenchError::Cancelled);
            }
            let nonce = self.cursor.advance();
            let tx = build_transfer(nonce, self.chain_id, &self.signer)?;
            self.endpoint
                .send_raw_transaction(&tx.raw)
                .await
                .map_err(|source| BenchError::Submission { nonce, source })?;
            last = Some(tx.hash);
            if sent.is_multiple_of(self.interval) {
                debug!(
                    endpoint = %self.name,
                    sent,
                    rate_tx_per_s = rate_per_sec(sent, started.elapsed()),
                    "batch submission progress"
                );
            }
        }
        if let Some(hash) = last {
            let _ = sentinel.send(hash);
        }
        info!(
            endpoint = %self.name,
            submitted = self.count,
            elapsed_ms = started.elapsed().as_millis() as u64,
            "batch submitted"
        );
        Ok(SenderReport {
            submitted: self.count,
            next_nonce: self.cursor.current(),
        })
    }
}

/// Open loop: a spawned sender submits the whole batch while this task drains
/// confirmations through `observer`. The clock starts when the sender is
/// spawned and stops after the drain grace period.
pub async fn run_throughput_phase(
    endpoint: &NamedEndpoint,
    observer: &mut dyn ConfirmationObserver,
    signer: &PrivateKeySigner,
    chain_id: u64,
    cursor: &mut NonceCursor,
    settings: &ThroughputSettings,
    cancel: &CancellationToken,
) -> Result<ThroughputOutcome, BenchError> {
    info!(
        endpoint = %endpoint.name,
        tx_count = settings.tx_count,
        start_nonce = cursor.current(),
        observer = ?observer.mode(),
        "starting throughput phase"
    );

    let (sentinel_tx, sentinel_rx) = oneshot::channel();
    let mut counter = ConfirmationCounter::default();
    let started = Instant::now();
    let mut meter = ThroughputMeter::new(settings.measure_interval, started);
    let sender = BatchSender {
        endpoint: Arc::clone(&endpoint.endpoint),
        name: endpoint.name.clone(),
        signer: signer.clone(),
        chain_id,
        cursor: *cursor,
        count: settings.tx_count,
        interval: settings.measure_interval.max(1),
    };
    let mut sender_task = SenderTask(Some(tokio::spawn(
        sender.run(sentinel_tx, cancel.child_token()),
    )));
    let mut sender_report = None;

    {
        let drain = observer.drain_batch(BatchDrain {
            expected: settings.tx_count,
            sentinel: sentinel_rx,
            counter: &mut counter,
            meter: &mut meter,
        });
        tokio::pin!(drain);
        loop {
            tokio::select! {
                drained = &mut drain => {
                    if let Err(err) = drained {
                        return Err(sender_failure_or(&mut sender_task, err).await);
                    }
                    break;
                }
                joined = sender_task.join(), if sender_task.is_running() => {
                    sender_report = Some(joined?);
                }
                _ = cancel.cancelled() => return Err(BenchError::Cancelled),
            }
        }
    }

    let report = match sender_report {
        Some(report) => report,
        None => tokio::select! {
            joined = sender_task.join() => joined?,
            _ = cancel.cancelled() => return Err(BenchError::Cancelled),
        },
    };
    *cursor = NonceCursor::new(report.next_nonce);

    tokio::select! {
        _ = tokio::time::sleep(settings.drain_grace) => {}
        _ = cancel.cancelled() => return Err(BenchError::Cancelled),
    }
    let total_time = started.elapsed();
    info!(
        confirmed = counter.events(),
        announced_items = counter.items(),
        total_time_ms = total_time.as_millis() as u64,
        rate_tx_per_s = rate_per_sec(report.submitted, total_time),
        "throughput phase complete"
    );

    Ok(ThroughputOutcome {
        submitted: report.submitted,
        confirmed: counter.events(),
        total_time,
        checkpoints: meter.checkpoints().to_vec(),
    })
}

/// A drain that failed because the sentinel never arrived is reported as the
/// sender's own error.
async fn sender_failure_or(sender: &mut SenderTask, drain_error: BenchError) -> BenchError {
    if !matches!(drain_error, BenchError::SenderTask { .. }) || !sender.is_running() {
        return drain_error;
    }
    match sender.join().await {
        Err(sender_error) => sender_error,
        Ok(_) => drain_error,
    }
}
