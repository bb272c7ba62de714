// (c) Cartesi and individual authors (see AUTHORS)
// SPDX-License-Identifier: Apache-2.0 (see LICENSE)

use std::fmt;

use k256::PublicKey;

use crate::WireError;

/// Node identity and TCP address parsed from an `enode://` URL.
#[derive(Clone, PartialEq, Eq)]
pub struct NodeRecord {
    /// Uncompressed secp256k1 public key without the `0x04` prefix.
    pub id: [u8; 64],
    pub host: String,
    pub tcp_port: u16,
}

impl NodeRecord {
    pub fn from_enode(url: &str) -> Result<Self, WireError> {
        let rest = url
            .trim()
            .strip_prefix("enode://")
            .ok_or_else(|| WireError::InvalidEnode(format!("missing enode:// scheme: {url}")))?;
        let (id_hex, address) = rest
            .split_once('@')
            .ok_or_else(|| WireError::InvalidEnode(format!("missing '@' separator: {url}")))?;

        let id_bytes = alloy_primitives::hex::decode(id_hex)
            .map_err(|e| WireError::InvalidEnode(format!("node id is not hex: {e}")))?;
        let id: [u8; 64] = id_bytes.as_slice().try_into().map_err(|_| {
            WireError::InvalidEnode(format!(
                "node id must be 64 bytes, got {}",
                id_bytes.len()
            ))
        })?;

        let address = address.split_once('?').map_or(address, |(addr, _)| addr);
        let (host, port) = address
            .rsplit_once(':')
            .ok_or_else(|| WireError::InvalidEnode(format!("missing tcp port: {url}")))?;
        let host = host.trim_start_matches('[').trim_end_matches(']');
        if host.is_empty() {
            return Err(WireError::InvalidEnode(format!("missing host: {url}")));
        }
        let tcp_port = port
            .parse::<u16>()
            .map_err(|e| WireError::InvalidEnode(format!("invalid tcp port '{port}': {e}")))?;

        let record = Self {
            id,
            host: host.to_string(),
            tcp_port,
        };
        record.public_key()?;
        Ok(record)
    }

    pub fn public_key(&self) -> Result<PublicKey, WireError> {
        public_key_from_id(&self.id)
    }

    pub fn socket_addr(&self) -> String {
        if self.host.contains(':') {
            format!("[{}]:{}", self.host, self.tcp_port)
        } else {
            format!("{}:{}", self.host, self.tcp_port)
        }
    }
}

impl fmt::Debug for NodeRecord {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("NodeRecord")
            .field("id", &alloy_primitives::hex::encode(&self.id[..8]))
            .field("addr", &self.socket_addr())
            .finish()
    }
}

pub(crate) fn public_key_from_id(id: &[u8; 64]) -> Result<PublicKey, WireError> {
    let mut sec1 = [0_u8; 65];
    sec1[0] = 0x04;
    sec1[1..].copy_from_slice(id);
    PublicKey::from_sec1_bytes(&sec1)
        .map_err(|_| WireError::InvalidEnode("node id is not a valid secp256k1 point".to_string()))
}

pub(crate) fn id_from_public_key(key: &PublicKey) -> [u8; 64] {
    use k256::elliptic_curve::sec1::ToEncodedPoint;

    let point = key.to_encoded_point(false);
    let mut id = [0_u8; 64];
    id.copy_from_slice(&point.as_bytes()[1..]);
    id
}

#[cfg(test)]
mod tests {
    use super::*;
    use k256::SecretKey;

    fn sample_id() -> [u8; 64] {
        let secret = SecretKey::from_slice(&[0x11; 32]).expect("secret");
        id_from_public_key(&secret.public_key())
    }

    #[test]
    fn parses_enode_with_discport_query() {
        let id = sample_id();
        let url = format!(
            "enode://{}@10.0.0.7:30303?discport=30301",
            alloy_primitives::hex::encode(id)
        );
        let record = NodeRecord::from_enode(&url).expect("parse enode");
        assert_eq!(record.id, id);
        assert_eq!(record.host, "10.0.0.7");
        assert_eq!(record.tcp_port, 30303);
        assert_eq!(record.socket_addr(), "10.0.0.7:30303");
    }

    #[test]
    fn parses_bracketed_ipv6_host() {
        let url = format!("enode://{}@[::1]:30304", alloy_primitives::hex::encode(sample_id()));
        let record = NodeRecord::from_enode(&url).expect("parse enode");
        assert_eq!(record.host, "::1");
        assert_eq!(record.socket_addr(), "[::1]:30304");
    }

    #[test]
    fn rejects_malformed_urls() {
        let id = alloy_primitives::hex::encode(sample_id());
        for url in [
            format!("enr://{id}@127.0.0.1:30303"),
            format!("enode://{id}127.0.0.1:30303"),
            format!("enode://{}@127.0.0.1:30303", &id[..100]),
            format!("enode://{id}@127.0.0.1"),
            format!("enode://{id}@127.0.0.1:notaport"),
            format!("enode://{}@127.0.0.1:30303", "00".repeat(64)),
        ] {
            assert!(NodeRecord::from_enode(&url).is_err(), "accepted {url}");
        }
    }

    #[test]
    fn public_key_round_trips_through_id() {
        let id = sample_id();
        let key = public_key_from_id(&id).expect("valid point");
        assert_eq!(id_from_public_key(&key), id);
    }
}
