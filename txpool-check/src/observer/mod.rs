// (c) Cartesi and individual authors (see AUTHORS)
// SPDX-License-Identifier: Apache-2.0 (see LICENSE)

//! Confirmation detection. Both strategies sit behind [`ConfirmationObserver`]
//! so the phase runners stay strategy-agnostic.

mod poll;
mod wire;

use std::time::Duration;

use alloy_primitives::TxHash;
use async_trait::async_trait;
use tokio::sync::oneshot;
use tokio::time::Instant;

pub use poll::{POLL_INTERVAL, PollObserver, SENTINEL_BUDGET, SINGLE_TX_BUDGET};
pub use wire::WireObserver;

use crate::chain::ChainContext;
use crate::config::ObserverMode;
use crate::endpoint::NamedEndpoint;
use crate::error::BenchError;
use crate::phase::ThroughputMeter;

pub const DEFAULT_DIAL_TIMEOUT: Duration = Duration::from_secs(10);

/// Evidence that a transaction propagated. Wire observers cannot tell which
/// transaction an announcement belongs to; only occurrence is meaningful.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ConfirmationEvent {
    pub observed_at: Instant,
    /// Transactions (or hashes) carried by the underlying message.
    pub items: usize,
}

impl ConfirmationEvent {
    pub fn now(items: usize) -> Self {
        Self {
            observed_at: Instant::now(),
            items,
        }
    }
}

/// Confirmations seen during one run. Owned by the run and lent to whoever
/// drains confirmations.
#[derive(Debug, Default, Clone, Copy, PartialEq, Eq)]
pub struct ConfirmationCounter {
    events: u64,
    items: u64,
}

impl ConfirmationCounter {
    pub fn record(&mut self, event: &ConfirmationEvent) -> u64 {
        self.events += 1;
        self.items = self.items.saturating_add(event.items as u64);
        self.events
    }

    /// Marks a whole batch as confirmed at once (sentinel found).
    pub fn record_batch(&mut self, size: u64) -> u64 {
        self.events = self.events.saturating_add(size);
        self.items = self.items.saturating_add(size);
        self.events
    }

    pub fn events(&self) -> u64 {
        self.events
    }

    pub fn items(&self) -> u64 {
        self.items
    }
}

/// Everything a batch drain needs from the throughput phase.
pub struct BatchDrain<'a> {
    pub expected: u64,
    /// Hash of the last transaction, delivered once the sender has submitted it.
    pub sentinel: oneshot::Receiver<TxHash>,
    pub counter: &'a mut ConfirmationCounter,
    pub meter: &'a mut ThroughputMeter,
}

#[async_trait]
pub trait ConfirmationObserver: Send {
    fn mode(&self) -> ObserverMode;

    /// Blocks until one confirmation for `tx_hash` is observed.
    async fn await_transaction(&mut self, tx_hash: TxHash)
    -> Result<ConfirmationEvent, BenchError>;

    /// Blocks until the whole batch is confirmed.
    async fn drain_batch(&mut self, batch: BatchDrain<'_>) -> Result<(), BenchError>;

    /// Releases the observer's resources. Dropping also releases them.
    async fn close(self: Box<Self>) {}
}

/// Creates the observer for one phase against one endpoint.
#[async_trait]
pub trait ObserverFactory: Send + Sync {
    async fn connect(
        &self,
        endpoint: &NamedEndpoint,
        chain: &ChainContext,
    ) -> Result<Box<dyn ConfirmationObserver>, BenchError>;
}

/// Real observers: a dialed peer session or RPC polling.
#[derive(Debug, Clone, Copy)]
pub struct NetworkObservers {
    pub mode: ObserverMode,
    pub dial_timeout: Duration,
}

impl NetworkObservers {
    pub fn new(mode: ObserverMode) -> Self {
        Self {
            mode,
            dial_timeout: DEFAULT_DIAL_TIMEOUT,
        }
    }
}

#[async_trait]
impl ObserverFactory for NetworkObservers {
    async fn connect(
        &self,
        endpoint: &NamedEndpoint,
        chain: &ChainContext,
    ) -> Result<Box<dyn ConfirmationObserver>, BenchError> {
        match self.mode {
            ObserverMode::Wire => Ok(Box::new(
                WireObserver::connect(endpoint, chain, self.dial_timeout).await?,
            )),
            ObserverMode::Poll => Ok(Box::new(PollObserver::new(endpoint))),
        }
    }
}
