// (c) Cartesi and individual authors (see AUTHORS)
// SPDX-License-Identifier: Apache-2.0 (see LICENSE)

#![allow(dead_code)]

use std::collections::HashSet;
use std::sync::{Arc, Mutex};
use std::time::Duration;

use alloy::consensus::{Transaction, TxEnvelope};
use alloy::eips::BlockNumberOrTag;
use alloy::eips::eip2718::Decodable2718;
use alloy_primitives::{Address, B256, TxHash};
use async_trait::async_trait;
use txpool_check::BenchError;
use txpool_check::chain::ChainContext;
use txpool_check::config::ObserverMode;
use txpool_check::endpoint::{
    BlockRef, EndpointPool, ExecutionEndpoint, NamedEndpoint, NodeInfo,
};
use txpool_check::error::EndpointError;
use txpool_check::observer::{
    BatchDrain, ConfirmationEvent, ConfirmationObserver, ObserverFactory,
};

pub const CHAIN_ID: u64 = 1337;
pub const ANVIL_KEY: &str = "0xac0974bec39a17e36ba4a6b4d238ff944bacb478cbed5efcae784d7bf4f2ff80";

#[derive(Default)]
struct MockState {
    attempts: Vec<u64>,
    accepted: Vec<u64>,
    known: HashSet<TxHash>,
    lookups: u64,
}

/// Scripted execution client. Submission attempts are numbered from zero.
#[derive(Default)]
pub struct MockEndpoint {
    state: Mutex<MockState>,
    account_nonce: u64,
    /// Attempt indices that are rejected.
    failing_attempts: HashSet<usize>,
    always_fail: bool,
    /// Lookups that fail with an RPC error before lookups start succeeding.
    failing_lookups: u64,
    /// A submitted transaction becomes visible after this many lookups.
    visible_after_lookups: u64,
    never_visible: bool,
    fail_nonce_query: bool,
    enode: Option<String>,
}

impl MockEndpoint {
    pub fn with_account_nonce(mut self, nonce: u64) -> Self {
        self.account_nonce = nonce;
        self
    }

    pub fn failing_at(mut self, attempts: impl IntoIterator<Item = usize>) -> Self {
        self.failing_attempts.extend(attempts);
        self
    }

    pub fn always_failing(mut self) -> Self {
        self.always_fail = true;
        self
    }

    pub fn with_lookups(mut self, failing: u64, visible_after: u64) -> Self {
        self.failing_lookups = failing;
        self.visible_after_lookups = visible_after;
        self
    }

    pub fn never_visible(mut self) -> Self {
        self.never_visible = true;
        self
    }

    pub fn failing_nonce_query(mut self) -> Self {
        self.fail_nonce_query = true;
        self
    }

    pub fn with_enode(mut self, enode: String) -> Self {
        self.enode = Some(enode);
        self
    }

    pub fn attempts(&self) -> Vec<u64> {
        self.state.lock().expect("mock state").attempts.clone()
    }

    pub fn accepted(&self) -> Vec<u64> {
        self.state.lock().expect("mock state").accepted.clone()
    }

    pub fn lookups(&self) -> u64 {
        self.state.lock().expect("mock state").lookups
    }
}

pub fn block(number: u64) -> BlockRef {
    BlockRef {
        number,
        hash: B256::with_last_byte(number as u8),
        timestamp: number * 12,
    }
}

#[async_trait]
impl ExecutionEndpoint for MockEndpoint {
    async fn chain_id(&self) -> Result<u64, EndpointError> {
        Ok(CHAIN_ID)
    }

    async fn block(&self, block_tag: BlockNumberOrTag) -> Result<BlockRef, EndpointError> {
        match block_tag {
            BlockNumberOrTag::Number(number) => Ok(block(number)),
            _ => Ok(block(42)),
        }
    }

    async fn nonce_at(&self, _address: Address, _block: u64) -> Result<u64, EndpointError> {
        if self.fail_nonce_query {
            return Err(EndpointError::Rpc("nonce unavailable".to_string()));
        }
        Ok(self.account_nonce)
    }

    async fn send_raw_transaction(&self, raw: &[u8]) -> Result<TxHash, EndpointError> {
        let envelope = TxEnvelope::decode_2718(&mut &raw[..])
            .map_err(|e| EndpointError::Rpc(format!("undecodable transaction: {e}")))?;
        let mut state = self.state.lock().expect("mock state");
        let attempt = state.attempts.len();
        state.attempts.push(envelope.nonce());
        if self.always_fail || self.failing_attempts.contains(&attempt) {
            return Err(EndpointError::Rpc("nonce too low".to_string()));
        }
        state.accepted.push(envelope.nonce());
        state.known.insert(*envelope.tx_hash());
        Ok(*envelope.tx_hash())
    }

    async fn transaction_known(&self, tx_hash: TxHash) -> Result<bool, EndpointError> {
        let mut state = self.state.lock().expect("mock state");
        state.lookups += 1;
        if state.lookups <= self.failing_lookups {
            return Err(EndpointError::Rpc("busy".to_string()));
        }
        Ok(!self.never_visible
            && state.lookups > self.visible_after_lookups
            && state.known.contains(&tx_hash))
    }

    async fn node_info(&self) -> Result<NodeInfo, EndpointError> {
        match self.enode.as_ref() {
            Some(enode) => Ok(NodeInfo {
                enode: enode.clone(),
                name: "mock".to_string(),
            }),
            None => Err(EndpointError::NotFound("admin api disabled".to_string())),
        }
    }
}

pub fn named(name: &str, endpoint: Arc<MockEndpoint>) -> NamedEndpoint {
    NamedEndpoint {
        name: name.to_string(),
        endpoint,
    }
}

pub fn pool(endpoints: &[(&str, Arc<MockEndpoint>)]) -> EndpointPool {
    let mut pool = EndpointPool::new();
    for (name, endpoint) in endpoints {
        pool.add(*name, endpoint.clone());
    }
    pool
}

/// Confirms every transaction after a fixed delay, counting like a wire
/// observer does.
pub struct DelayedObserver {
    pub delay: Duration,
    pub awaited: Arc<Mutex<Vec<TxHash>>>,
}

impl DelayedObserver {
    pub fn new(delay: Duration) -> Self {
        Self {
            delay,
            awaited: Arc::new(Mutex::new(Vec::new())),
        }
    }
}

#[async_trait]
impl ConfirmationObserver for DelayedObserver {
    fn mode(&self) -> ObserverMode {
        ObserverMode::Wire
    }

    async fn await_transaction(
        &mut self,
        tx_hash: TxHash,
    ) -> Result<ConfirmationEvent, BenchError> {
        tokio::time::sleep(self.delay).await;
        self.awaited.lock().expect("awaited").push(tx_hash);
        Ok(ConfirmationEvent::now(1))
    }

    async fn drain_batch(&mut self, batch: BatchDrain<'_>) -> Result<(), BenchError> {
        while batch.counter.events() < batch.expected {
            tokio::time::sleep(self.delay).await;
            let confirmed = batch.counter.record(&ConfirmationEvent::now(1));
            batch.meter.observe(confirmed);
        }
        Ok(())
    }
}

/// Hands out [`DelayedObserver`]s and remembers which endpoints were used.
pub struct DelayedObservers {
    pub delay: Duration,
    pub connected: Mutex<Vec<String>>,
    pub connected_at: Mutex<Vec<tokio::time::Instant>>,
}

impl DelayedObservers {
    pub fn new(delay: Duration) -> Self {
        Self {
            delay,
            connected: Mutex::new(Vec::new()),
            connected_at: Mutex::new(Vec::new()),
        }
    }

    pub fn connected(&self) -> Vec<String> {
        self.connected.lock().expect("connected").clone()
    }

    pub fn connected_at(&self) -> Vec<tokio::time::Instant> {
        self.connected_at.lock().expect("connected at").clone()
    }
}

#[async_trait]
impl ObserverFactory for DelayedObservers {
    async fn connect(
        &self,
        endpoint: &NamedEndpoint,
        _chain: &ChainContext,
    ) -> Result<Box<dyn ConfirmationObserver>, BenchError> {
        self.connected
            .lock()
            .expect("connected")
            .push(endpoint.name.clone());
        self.connected_at
            .lock()
            .expect("connected at")
            .push(tokio::time::Instant::now());
        Ok(Box::new(DelayedObserver::new(self.delay)))
    }
}
