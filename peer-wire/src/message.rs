// (c) Cartesi and individual authors (see AUTHORS)
// SPDX-License-Identifier: Apache-2.0 (see LICENSE)

use std::fmt;

use alloy_primitives::{B256, U256};
use alloy_rlp::{Decodable, Encodable, Header};

use crate::WireError;
use crate::forkid::ForkId;
use crate::rlpx::decode_fixed;

pub(crate) const HELLO: u64 = 0x00;
pub(crate) const DISCONNECT: u64 = 0x01;
pub(crate) const PING: u64 = 0x02;
pub(crate) const PONG: u64 = 0x03;

/// `eth` message ids live after the 16 reserved base-protocol ids.
pub(crate) const ETH_STATUS: u64 = 0x10;
pub(crate) const ETH_TRANSACTIONS: u64 = 0x12;
pub(crate) const ETH_GET_BLOCK_HEADERS: u64 = 0x13;
pub(crate) const ETH_BLOCK_HEADERS: u64 = 0x14;
pub(crate) const ETH_NEW_POOLED_TRANSACTION_HASHES: u64 = 0x18;

pub(crate) const BASE_PROTOCOL_VERSION: u64 = 5;
pub const ETH_VERSION: u64 = 68;
pub(crate) const EMPTY_LIST: [u8; 1] = [0xc0];

fn list_header(payload: &[u8], out: &mut Vec<u8>) {
    Header {
        list: true,
        payload_length: payload.len(),
    }
    .encode(out);
}

fn wrap_list(payload: Vec<u8>) -> Vec<u8> {
    let mut out = Vec::with_capacity(payload.len() + 4);
    list_header(&payload, &mut out);
    out.extend_from_slice(&payload);
    out
}

/// Base protocol handshake message.
#[derive(Debug, Clone, PartialEq, Eq)]
pub(crate) struct Hello {
    pub protocol_version: u64,
    pub client_id: String,
    pub capabilities: Vec<(String, u64)>,
    pub node_id: [u8; 64],
}

impl Hello {
    pub(crate) fn new(client_id: &str, node_id: [u8; 64]) -> Self {
        Self {
            protocol_version: BASE_PROTOCOL_VERSION,
            client_id: client_id.to_string(),
            capabilities: vec![("eth".to_string(), ETH_VERSION)],
            node_id,
        }
    }

    pub(crate) fn encode(&self) -> Vec<u8> {
        let mut caps = Vec::new();
        for (name, version) in &self.capabilities {
            let mut cap = Vec::new();
            name.as_str().encode(&mut cap);
            version.encode(&mut cap);
            caps.extend_from_slice(&wrap_list(cap));
        }

        let mut payload = Vec::new();
        self.protocol_version.encode(&mut payload);
        self.client_id.as_str().encode(&mut payload);
        payload.extend_from_slice(&wrap_list(caps));
        0_u64.encode(&mut payload);
        self.node_id.as_slice().encode(&mut payload);
        wrap_list(payload)
    }

    pub(crate) fn decode(mut buf: &[u8]) -> Result<Self, WireError> {
        let mut fields = Header::decode_bytes(&mut buf, true)?;
        let protocol_version = u64::decode(&mut fields)?;
        let client_id = String::decode(&mut fields)?;

        let mut caps = Header::decode_bytes(&mut fields, true)?;
        let mut capabilities = Vec::new();
        while !caps.is_empty() {
            let mut cap = Header::decode_bytes(&mut caps, true)?;
            let name = String::decode(&mut cap)?;
            let version = u64::decode(&mut cap)?;
            capabilities.push((name, version));
        }

        // listen port, unused
        Header::decode_bytes(&mut fields, false)?;
        let node_id = decode_fixed(&mut fields)?;
        Ok(Self {
            protocol_version,
            client_id,
            capabilities,
            node_id,
        })
    }

    pub(crate) fn supports(&self, name: &str, version: u64) -> bool {
        self.capabilities
            .iter()
            .any(|(cap, v)| cap == name && *v == version)
    }
}

/// The `eth` Status message.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Status {
    pub version: u64,
    pub network_id: u64,
    pub total_difficulty: U256,
    pub head: B256,
    pub genesis: B256,
    pub fork_id: ForkId,
}

impl Status {
    pub fn new(network_id: u64, head: B256, genesis: B256, fork_id: ForkId) -> Self {
        Self {
            version: ETH_VERSION,
            network_id,
            total_difficulty: U256::ZERO,
            head,
            genesis,
            fork_id,
        }
    }

    pub(crate) fn encode(&self) -> Vec<u8> {
        let mut payload = Vec::new();
        self.version.encode(&mut payload);
        self.network_id.encode(&mut payload);
        self.total_difficulty.encode(&mut payload);
        self.head.encode(&mut payload);
        self.genesis.encode(&mut payload);
        self.fork_id.encode(&mut payload);
        wrap_list(payload)
    }

    pub(crate) fn decode(mut buf: &[u8]) -> Result<Self, WireError> {
        let mut fields = Header::decode_bytes(&mut buf, true)?;
        let version = u64::decode(&mut fields)?;
        let network_id = u64::decode(&mut fields)?;
        let total_difficulty = U256::decode(&mut fields)?;
        let head = B256::decode(&mut fields)?;
        let genesis = B256::decode(&mut fields)?;
        let mut fork = Header::decode_bytes(&mut fields, true)?;
        let fork_id = ForkId {
            hash: decode_fixed(&mut fork)?,
            next: u64::decode(&mut fork)?,
        };
        Ok(Self {
            version,
            network_id,
            total_difficulty,
            head,
            genesis,
            fork_id,
        })
    }

    /// Checks that a peer's Status describes the same chain as ours.
    pub(crate) fn ensure_compatible(&self, remote: &Status) -> Result<(), WireError> {
        if remote.version != self.version {
            return Err(WireError::StatusMismatch(format!(
                "eth version {} != {}",
                remote.version, self.version
            )));
        }
        if remote.network_id != self.network_id {
            return Err(WireError::StatusMismatch(format!(
                "network id {} != {}",
                remote.network_id, self.network_id
            )));
        }
        if remote.genesis != self.genesis {
            return Err(WireError::StatusMismatch(format!(
                "genesis {} != {}",
                remote.genesis, self.genesis
            )));
        }
        Ok(())
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DisconnectReason {
    Requested,
    TcpError,
    ProtocolBreach,
    UselessPeer,
    TooManyPeers,
    AlreadyConnected,
    IncompatibleVersion,
    InvalidIdentity,
    ClientQuitting,
    UnexpectedIdentity,
    ConnectedToSelf,
    PingTimeout,
    SubprotocolError,
    Unknown(u8),
}

impl DisconnectReason {
    pub(crate) fn code(self) -> u8 {
        match self {
            Self::Requested => 0x00,
            Self::TcpError => 0x01,
            Self::ProtocolBreach => 0x02,
            Self::UselessPeer => 0x03,
            Self::TooManyPeers => 0x04,
            Self::AlreadyConnected => 0x05,
            Self::IncompatibleVersion => 0x06,
            Self::InvalidIdentity => 0x07,
            Self::ClientQuitting => 0x08,
            Self::UnexpectedIdentity => 0x09,
            Self::ConnectedToSelf => 0x0a,
            Self::PingTimeout => 0x0b,
            Self::SubprotocolError => 0x10,
            Self::Unknown(code) => code,
        }
    }

    fn from_code(code: u8) -> Self {
        match code {
            0x00 => Self::Requested,
            0x01 => Self::TcpError,
            0x02 => Self::ProtocolBreach,
            0x03 => Self::UselessPeer,
            0x04 => Self::TooManyPeers,
            0x05 => Self::AlreadyConnected,
            0x06 => Self::IncompatibleVersion,
            0x07 => Self::InvalidIdentity,
            0x08 => Self::ClientQuitting,
            0x09 => Self::UnexpectedIdentity,
            0x0a => Self::ConnectedToSelf,
            0x0b => Self::PingTimeout,
            0x10 => Self::SubprotocolError,
            other => Self::Unknown(other),
        }
    }

    /// Peers send either `[reason]`, a bare reason byte, or nothing at all.
    pub(crate) fn decode(payload: &[u8]) -> Self {
        let mut buf = payload;
        if buf.is_empty() {
            return Self::Requested;
        }
        if let Ok(mut fields) = Header::decode_bytes(&mut buf, true) {
            if fields.is_empty() {
                return Self::Requested;
            }
            return u8::decode(&mut fields).map_or(Self::Unknown(0xff), Self::from_code);
        }
        let mut buf = payload;
        u8::decode(&mut buf).map_or(Self::Unknown(0xff), Self::from_code)
    }

    pub(crate) fn encode(self) -> Vec<u8> {
        let mut payload = Vec::new();
        self.code().encode(&mut payload);
        wrap_list(payload)
    }
}

impl fmt::Display for DisconnectReason {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let text = match self {
            Self::Requested => "disconnect requested",
            Self::TcpError => "tcp sub-system error",
            Self::ProtocolBreach => "breach of protocol",
            Self::UselessPeer => "useless peer",
            Self::TooManyPeers => "too many peers",
            Self::AlreadyConnected => "already connected",
            Self::IncompatibleVersion => "incompatible p2p protocol version",
            Self::InvalidIdentity => "invalid node identity",
            Self::ClientQuitting => "client quitting",
            Self::UnexpectedIdentity => "unexpected identity",
            Self::ConnectedToSelf => "connected to self",
            Self::PingTimeout => "ping timeout",
            Self::SubprotocolError => "subprotocol error",
            Self::Unknown(code) => return write!(f, "unknown reason {code:#04x}"),
        };
        f.write_str(text)
    }
}

/// What kind of `eth` message carried transactions.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AnnouncementKind {
    /// Full transaction bodies (`Transactions`).
    Transactions,
    /// Hash announcements (`NewPooledTransactionHashes`).
    PooledHashes,
}

/// One transaction-carrying message received from a peer.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Announcement {
    pub kind: AnnouncementKind,
    /// Transactions or hashes contained in the message.
    pub items: usize,
}

fn count_items(mut list: &[u8]) -> Result<usize, WireError> {
    let mut count = 0;
    while !list.is_empty() {
        let header = Header::decode(&mut list)?;
        if header.payload_length > list.len() {
            return Err(alloy_rlp::Error::InputTooShort.into());
        }
        list = &list[header.payload_length..];
        count += 1;
    }
    Ok(count)
}

impl Announcement {
    pub(crate) fn transactions(mut payload: &[u8]) -> Result<Self, WireError> {
        let list = Header::decode_bytes(&mut payload, true)?;
        Ok(Self {
            kind: AnnouncementKind::Transactions,
            items: count_items(list)?,
        })
    }

    /// eth/68 layout: `[types, [sizes...], [hashes...]]`.
    pub(crate) fn pooled_hashes(mut payload: &[u8]) -> Result<Self, WireError> {
        let mut fields = Header::decode_bytes(&mut payload, true)?;
        Header::decode_bytes(&mut fields, false)?;
        Header::decode_bytes(&mut fields, true)?;
        let hashes = Header::decode_bytes(&mut fields, true)?;
        Ok(Self {
            kind: AnnouncementKind::PooledHashes,
            items: count_items(hashes)?,
        })
    }
}

/// eth/68 `NewPooledTransactionHashes` payload announcing dynamic-fee
/// transactions of a nominal size.
#[cfg(any(test, feature = "test-utils"))]
pub(crate) fn pooled_hashes_message(announced: &[B256]) -> Vec<u8> {
    let mut sizes = Vec::new();
    let mut hashes = Vec::new();
    for hash in announced {
        110_u32.encode(&mut sizes);
        hash.encode(&mut hashes);
    }
    let mut payload = Vec::new();
    vec![0x02_u8; announced.len()].as_slice().encode(&mut payload);
    payload.extend_from_slice(&wrap_list(sizes));
    payload.extend_from_slice(&wrap_list(hashes));
    wrap_list(payload)
}

/// Builds an empty `BlockHeaders` reply for a `GetBlockHeaders` request.
pub(crate) fn empty_block_headers(mut request: &[u8]) -> Result<Vec<u8>, WireError> {
    let mut fields = Header::decode_bytes(&mut request, true)?;
    let request_id = u64::decode(&mut fields)?;
    let mut payload = Vec::new();
    request_id.encode(&mut payload);
    payload.extend_from_slice(&EMPTY_LIST);
    Ok(wrap_list(payload))
}
