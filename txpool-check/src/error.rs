// (c) Cartesi and individual authors (see AUTHORS)
// SPDX-License-Identifier: Apache-2.0 (see LICENSE)

use std::time::Duration;

use alloy_primitives::TxHash;
use peer_wire::WireError;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum EndpointError {
    #[error("rpc: {0}")]
    Rpc(String),
    #[error("not found: {0}")]
    NotFound(String),
    #[error("invalid endpoint url '{url}': {reason}")]
    InvalidUrl { url: String, reason: String },
}

impl EndpointError {
    pub fn rpc(err: impl std::fmt::Display) -> Self {
        Self::Rpc(err.to_string())
    }
}

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("txCount must be greater than zero")]
    ZeroTxCount,
    #[error("measureInterval must be greater than zero")]
    ZeroMeasureInterval,
    #[error("privateKey is required")]
    MissingPrivateKey,
    #[error("invalid {field} pattern")]
    InvalidPattern {
        field: &'static str,
        #[source]
        source: regex::Error,
    },
    #[error("cannot read config file {path}")]
    Read {
        path: String,
        #[source]
        source: std::io::Error,
    },
    #[error("cannot parse config file {path}")]
    Parse {
        path: String,
        #[source]
        source: serde_json::Error,
    },
}

/// Every way a benchmark run can fail.
#[derive(Debug, Error)]
pub enum BenchError {
    #[error("invalid configuration")]
    Config(#[from] ConfigError),
    #[error("no ready execution endpoints")]
    NoReadyEndpoints,
    #[error("cannot fetch chain metadata from {endpoint}")]
    ChainMetadata {
        endpoint: String,
        #[source]
        source: EndpointError,
    },
    #[error("cannot fetch starting nonce from {endpoint}")]
    NonceFetch {
        endpoint: String,
        #[source]
        source: EndpointError,
    },
    #[error("invalid private key: {reason}")]
    InvalidKey { reason: String },
    #[error("signing transaction with nonce {nonce} failed: {reason}")]
    Signing { nonce: u64, reason: String },
    #[error("cannot dial peer of {endpoint}")]
    PeerDial {
        endpoint: String,
        #[source]
        source: PeerDialError,
    },
    #[error("peer handshake with {endpoint} failed")]
    PeerHandshake {
        endpoint: String,
        #[source]
        source: WireError,
    },
    #[error("reading from peer {endpoint} failed")]
    PeerRead {
        endpoint: String,
        #[source]
        source: WireError,
    },
    #[error("submitting transaction with nonce {nonce} failed")]
    Submission {
        nonce: u64,
        #[source]
        source: EndpointError,
    },
    #[error("{failures} consecutive submission failures, last nonce {last_nonce}")]
    RetryBudgetExhausted { failures: u32, last_nonce: u64 },
    #[error("transaction {tx_hash} not found within {budget:?}")]
    ConfirmationTimeout { tx_hash: TxHash, budget: Duration },
    #[error("sender task failed: {reason}")]
    SenderTask { reason: String },
    #[error("run cancelled")]
    Cancelled,
    #[error("cannot write report: {reason}")]
    Report { reason: String },
}

/// Resolving the peer address happens over RPC, the dial itself over TCP.
#[derive(Debug, Error)]
pub enum PeerDialError {
    #[error("admin_nodeInfo failed")]
    NodeInfo(#[source] EndpointError),
    #[error(transparent)]
    Wire(#[from] WireError),
}

impl BenchError {
    pub fn is_timeout(&self) -> bool {
        matches!(self, Self::ConfirmationTimeout { .. })
    }

    pub fn sender_task(reason: impl Into<String>) -> Self {
        Self::SenderTask {
            reason: reason.into(),
        }
    }
}
