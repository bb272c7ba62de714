// (c) Cartesi and individual authors (see AUTHORS)
// SPDX-License-Identifier: Apache-2.0 (see LICENSE)

use std::time::Duration;

use alloy::signers::local::PrivateKeySigner;
use tokio_util::sync::CancellationToken;
use tracing::{info, warn};

use crate::endpoint::NamedEndpoint;
use crate::error::BenchError;
use crate::nonce::{NonceCursor, RetryBudget};
use crate::observer::ConfirmationObserver;
use crate::report::LatencyRecorder;
use crate::transaction::build_transfer;

#[derive(Debug, Clone, Copy)]
pub struct LatencySettings {
    pub tx_count: u64,
    pub measure_interval: u64,
    pub max_consecutive_failures: u32,
}

/// Progress line emitted every `measure_interval` completed iterations.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ProgressCheckpoint {
    pub completed: u64,
    pub running_average_ms: u64,
}

pub struct LatencyOutcome {
    pub completed: u64,
    pub total_latency: Duration,
    /// Failed submissions that were retried with the next nonce.
    pub retries: u64,
    pub checkpoints: Vec<ProgressCheckpoint>,
    pub recorder: LatencyRecorder,
}

impl LatencyOutcome {
    /// Cumulative latency divided by iteration count, truncated to whole ms.
    pub fn average_latency_ms(&self) -> u64 {
        average_ms(self.total_latency, self.completed)
    }
}

fn average_ms(total: Duration, completed: u64) -> u64 {
    if completed == 0 {
        return 0;
    }
    u64::try_from(total.as_millis() / u128::from(completed)).unwrap_or(u64::MAX)
}

/// Closed loop: one transaction in flight, each confirmed before the next is
/// built. A rejected submission burns its nonce and retries the same
/// iteration with the next one.
pub async fn run_latency_phase(
    endpoint: &NamedEndpoint,
    observer: &mut dyn ConfirmationObserver,
    signer: &PrivateKeySigner,
    chain_id: u64,
    cursor: &mut NonceCursor,
    settings: &LatencySettings,
    cancel: &CancellationToken,
) -> Result<LatencyOutcome, BenchError> {
    let mut recorder = LatencyRecorder::new().map_err(|e| BenchError::Report {
        reason: format!("cannot create latency histogram: {e}"),
    })?;
    let mut budget = RetryBudget::new(settings.max_consecutive_failures);
    let mut total_latency = Duration::ZERO;
    let mut completed = 0_u64;
    let mut retries = 0_u64;
    let mut checkpoints = Vec::new();

    info!(
        endpoint = %endpoint.name,
        tx_count = settings.tx_count,
        start_nonce = cursor.current(),
        observer = ?observer.mode(),
        "starting latency phase"
    );

    while completed < settings.tx_count {
        if cancel.is_cancelled() {
            return Err(BenchError::Cancelled);
        }

        let nonce = cursor.current();
        let tx = build_transfer(nonce, chain_id, signer)?;
        let started = tokio::time::Instant::now();
        let submitted = tokio::select! {
            result = endpoint.endpoint.send_raw_transaction(&tx.raw) => result,
            _ = cancel.cancelled() => return Err(BenchError::Cancelled),
        };
        cursor.advance();

        if let Err(err) = submitted {
            retries += 1;
            budget.record_failure(nonce)?;
            warn!(
                nonce,
                iteration = completed + 1,
                consecutive_failures = budget.consecutive_failures(),
                error = %err,
                "submission failed, retrying with next nonce"
            );
            continue;
        }
        budget.reset();

        let event = tokio::select! {
            event = observer.await_transaction(tx.hash) => event?,
            _ = cancel.cancelled() => return Err(BenchError::Cancelled),
        };
        let latency = event.observed_at.saturating_duration_since(started);
        total_latency += latency;
        completed += 1;
        recorder.record(latency);

        if completed.is_multiple_of(settings.measure_interval) {
            let running_average_ms = average_ms(total_latency, completed);
            info!(
                completed,
                tx_count = settings.tx_count,
                running_average_ms,
                "latency progress"
            );
            checkpoints.push(ProgressCheckpoint {
                completed,
                running_average_ms,
            });
        }
    }

    Ok(LatencyOutcome {
        completed,
        total_latency,
        retries,
        checkpoints,
        recorder,
    })
}
