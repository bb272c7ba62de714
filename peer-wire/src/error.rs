// (c) Cartesi and individual authors (see AUTHORS)
// SPDX-License-Identifier: Apache-2.0 (see LICENSE)

use thiserror::Error;

use crate::message::DisconnectReason;

#[derive(Debug, Error)]
pub enum WireError {
    #[error("invalid enode url: {0}")]
    InvalidEnode(String),
    #[error("tcp connect to {addr} timed out")]
    DialTimeout { addr: String },
    #[error("io error: {0}")]
    Io(#[from] std::io::Error),
    #[error("ecies: {0}")]
    Ecies(String),
    #[error("{0} mac mismatch")]
    MacMismatch(&'static str),
    #[error("rlp decode: {0}")]
    Rlp(#[from] alloy_rlp::Error),
    #[error("snappy: {0}")]
    Snappy(#[from] snap::Error),
    #[error("frame too large: {0} bytes")]
    FrameTooLarge(usize),
    #[error("protocol violation: {0}")]
    Protocol(String),
    #[error("remote disconnected: {0}")]
    Disconnected(DisconnectReason),
    #[error("status mismatch: {0}")]
    StatusMismatch(String),
}

impl WireError {
    pub(crate) fn ecies(message: impl Into<String>) -> Self {
        Self::Ecies(message.into())
    }

    pub(crate) fn protocol(message: impl Into<String>) -> Self {
        Self::Protocol(message.into())
    }
}
