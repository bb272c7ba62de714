// (c) Cartesi and individual authors (see AUTHORS)
// SPDX-License-Identifier: Apache-2.0 (see LICENSE)

use std::fmt;
use std::sync::Arc;

use alloy::eips::{BlockId, BlockNumberOrTag};
use alloy::providers::{DynProvider, Provider, ProviderBuilder};
use alloy::rpc::client::NoParams;
use alloy_primitives::{Address, B256, TxHash};
use async_trait::async_trait;
use regex::Regex;
use serde::Deserialize;

use crate::error::{ConfigError, EndpointError};

/// Number, hash and timestamp of a block.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct BlockRef {
    pub number: u64,
    pub hash: B256,
    pub timestamp: u64,
}

/// Subset of the `admin_nodeInfo` response needed to dial the node.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
pub struct NodeInfo {
    pub enode: String,
    #[serde(default)]
    pub name: String,
}

/// RPC surface of one execution client.
#[async_trait]
pub trait ExecutionEndpoint: Send + Sync {
    async fn chain_id(&self) -> Result<u64, EndpointError>;

    async fn block(&self, block: BlockNumberOrTag) -> Result<BlockRef, EndpointError>;

    /// Account nonce as of `block_number`.
    async fn nonce_at(&self, address: Address, block_number: u64) -> Result<u64, EndpointError>;

    async fn send_raw_transaction(&self, raw: &[u8]) -> Result<TxHash, EndpointError>;

    /// Whether the node knows the transaction (pending or mined).
    async fn transaction_known(&self, tx_hash: TxHash) -> Result<bool, EndpointError>;

    async fn node_info(&self) -> Result<NodeInfo, EndpointError>;
}

pub struct RpcEndpoint {
    url: String,
    provider: DynProvider,
}

impl RpcEndpoint {
    pub fn connect(url: &str) -> Result<Self, EndpointError> {
        let parsed = url.parse().map_err(|e| EndpointError::InvalidUrl {
            url: url.to_string(),
            reason: format!("{e}"),
        })?;
        let provider = ProviderBuilder::new().connect_http(parsed).erased();
        Ok(Self {
            url: url.to_string(),
            provider,
        })
    }

    pub fn url(&self) -> &str {
        &self.url
    }
}

#[async_trait]
impl ExecutionEndpoint for RpcEndpoint {
    async fn chain_id(&self) -> Result<u64, EndpointError> {
        self.provider.get_chain_id().await.map_err(EndpointError::rpc)
    }

    async fn block(&self, block: BlockNumberOrTag) -> Result<BlockRef, EndpointError> {
        let found = self
            .provider
            .get_block_by_number(block)
            .await
            .map_err(EndpointError::rpc)?
            .ok_or_else(|| EndpointError::NotFound(format!("block {block}")))?;
        Ok(BlockRef {
            number: found.header.number,
            hash: found.header.hash,
            timestamp: found.header.timestamp,
        })
    }

    async fn nonce_at(&self, address: Address, block_number: u64) -> Result<u64, EndpointError> {
        self.provider
            .get_transaction_count(address)
            .block_id(BlockId::number(block_number))
            .await
            .map_err(EndpointError::rpc)
    }

    async fn send_raw_transaction(&self, raw: &[u8]) -> Result<TxHash, EndpointError> {
        let pending = self
            .provider
            .send_raw_transaction(raw)
            .await
            .map_err(EndpointError::rpc)?;
        Ok(*pending.tx_hash())
    }

    async fn transaction_known(&self, tx_hash: TxHash) -> Result<bool, EndpointError> {
        let found = self
            .provider
            .get_transaction_by_hash(tx_hash)
            .await
            .map_err(EndpointError::rpc)?;
        Ok(found.is_some())
    }

    async fn node_info(&self) -> Result<NodeInfo, EndpointError> {
        self.provider
            .raw_request::<_, NodeInfo>("admin_nodeInfo".into(), NoParams::default())
            .await
            .map_err(EndpointError::rpc)
    }
}

/// An endpoint together with the client name used for selection and logs.
#[derive(Clone)]
pub struct NamedEndpoint {
    pub name: String,
    pub endpoint: Arc<dyn ExecutionEndpoint>,
}

impl fmt::Debug for NamedEndpoint {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("NamedEndpoint")
            .field("name", &self.name)
            .finish_non_exhaustive()
    }
}

/// Include/exclude regexes over client names. Empty patterns are inactive.
#[derive(Debug, Clone, Default)]
pub struct EndpointFilter {
    include: Option<Regex>,
    exclude: Option<Regex>,
}

impl EndpointFilter {
    pub fn new(include: &str, exclude: &str) -> Result<Self, ConfigError> {
        let compile = |pattern: &str, field: &'static str| {
            if pattern.is_empty() {
                return Ok(None);
            }
            Regex::new(pattern)
                .map(Some)
                .map_err(|source| ConfigError::InvalidPattern { field, source })
        };
        Ok(Self {
            include: compile(include, "clientPattern")?,
            exclude: compile(exclude, "excludeClientPattern")?,
        })
    }

    pub fn matches(&self, name: &str) -> bool {
        let included = self.include.as_ref().is_none_or(|re| re.is_match(name));
        let excluded = self.exclude.as_ref().is_some_and(|re| re.is_match(name));
        included && !excluded
    }
}

/// Ready endpoints known to the run, in registration order.
#[derive(Debug, Clone, Default)]
pub struct EndpointPool {
    endpoints: Vec<NamedEndpoint>,
}

impl EndpointPool {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn add(&mut self, name: impl Into<String>, endpoint: Arc<dyn ExecutionEndpoint>) {
        self.endpoints.push(NamedEndpoint {
            name: name.into(),
            endpoint,
        });
    }

    pub fn len(&self) -> usize {
        self.endpoints.len()
    }

    pub fn is_empty(&self) -> bool {
        self.endpoints.is_empty()
    }

    pub fn ready_endpoints(&self, filter: &EndpointFilter) -> Vec<NamedEndpoint> {
        self.endpoints
            .iter()
            .filter(|candidate| filter.matches(&candidate.name))
            .cloned()
            .collect()
    }
}

/// Indices of the latency-phase and throughput-phase endpoints. The
/// throughput phase moves on to the next endpoint in rotation.
pub fn phase_indices(first: usize, ready: usize) -> (usize, usize) {
    (first, (first + 1) % ready)
}
