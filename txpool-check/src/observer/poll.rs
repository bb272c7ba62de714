// (c) Cartesi and individual authors (see AUTHORS)
// SPDX-License-Identifier: Apache-2.0 (see LICENSE)

use std::sync::Arc;
use std::time::Duration;

use alloy_primitives::TxHash;
use async_trait::async_trait;
use tracing::{debug, info};

use super::{BatchDrain, ConfirmationEvent, ConfirmationObserver};
use crate::config::ObserverMode;
use crate::endpoint::{ExecutionEndpoint, NamedEndpoint};
use crate::error::BenchError;

pub const POLL_INTERVAL: Duration = Duration::from_millis(50);
/// Budget for one latency-phase transaction.
pub const SINGLE_TX_BUDGET: Duration = Duration::from_secs(10);
/// Budget for the last transaction of a throughput batch.
pub const SENTINEL_BUDGET: Duration = Duration::from_secs(30);

/// Looks transactions up by hash over RPC until found.
pub struct PollObserver {
    endpoint: Arc<dyn ExecutionEndpoint>,
    name: String,
    interval: Duration,
    single_budget: Duration,
    sentinel_budget: Duration,
}

impl PollObserver {
    pub fn new(endpoint: &NamedEndpoint) -> Self {
        Self {
            endpoint: Arc::clone(&endpoint.endpoint),
            name: endpoint.name.clone(),
            interval: POLL_INTERVAL,
            single_budget: SINGLE_TX_BUDGET,
            sentinel_budget: SENTINEL_BUDGET,
        }
    }

    pub fn with_budgets(mut self, single: Duration, sentinel: Duration) -> Self {
        self.single_budget = single;
        self.sentinel_budget = sentinel;
        self
    }

    /// Lookup errors count as "not yet found"; only the budget ends the wait.
    async fn wait_for(
        &self,
        tx_hash: TxHash,
        budget: Duration,
    ) -> Result<ConfirmationEvent, BenchError> {
        let lookup = async {
            let mut attempts = 0_u64;
            loop {
                attempts += 1;
                match self.endpoint.transaction_known(tx_hash).await {
                    Ok(true) => return attempts,
                    Ok(false) => {}
                    Err(err) => {
                        debug!(
                            endpoint = %self.name,
                            %tx_hash,
                            error = %err,
                            "transaction lookup failed"
                        );
                    }
                }
                tokio::time::sleep(self.interval).await;
            }
        };
        match tokio::time::timeout(budget, lookup).await {
            Ok(attempts) => {
                debug!(endpoint = %self.name, %tx_hash, attempts, "transaction found");
                Ok(ConfirmationEvent::now(1))
            }
            Err(_) => Err(BenchError::ConfirmationTimeout { tx_hash, budget }),
        }
    }
}

#[async_trait]
impl ConfirmationObserver for PollObserver {
    fn mode(&self) -> ObserverMode {
        ObserverMode::Poll
    }

    async fn await_transaction(
        &mut self,
        tx_hash: TxHash,
    ) -> Result<ConfirmationEvent, BenchError> {
        self.wait_for(tx_hash, self.single_budget).await
    }

    async fn drain_batch(&mut self, batch: BatchDrain<'_>) -> Result<(), BenchError> {
        let sentinel = batch.sentinel.await.map_err(|_| {
            BenchError::sender_task("sender stopped before submitting the last transaction")
        })?;
        info!(endpoint = %self.name, %sentinel, "waiting for last transaction of the batch");
        self.wait_for(sentinel, self.sentinel_budget).await?;
        let confirmed = batch.counter.record_batch(batch.expected);
        batch.meter.observe(confirmed);
        Ok(())
    }
}
