// (c) Cartesi and individual authors (see AUTHORS)
// SPDX-License-Identifier: Apache-2.0 (see LICENSE)

use alloy::consensus::{SignableTransaction, TxEnvelope, TxLegacy};
use alloy::eips::Encodable2718;
use alloy::network::TxSignerSync;
use alloy::signers::local::PrivateKeySigner;
use alloy_primitives::{Address, Bytes, TxHash, TxKind, U256};
use k256::ecdsa::SigningKey;

use crate::error::BenchError;

pub const TRANSFER_VALUE: u64 = 100;
pub const TRANSFER_GAS_LIMIT: u64 = 21_000;
pub const TRANSFER_GAS_PRICE: u128 = 1;

/// A signed, EIP-2718 encoded self-transfer.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SignedTransaction {
    pub nonce: u64,
    pub hash: TxHash,
    pub raw: Bytes,
}

pub fn parse_signing_key(hex: &str) -> Result<PrivateKeySigner, BenchError> {
    let invalid = |reason: String| BenchError::InvalidKey { reason };
    let bytes = alloy_primitives::hex::decode(hex.trim())
        .map_err(|e| invalid(format!("not hex: {e}")))?;
    if bytes.len() != 32 {
        return Err(invalid(format!("expected 32 bytes, got {}", bytes.len())));
    }
    let mut key_bytes = [0_u8; 32];
    key_bytes.copy_from_slice(&bytes);
    let key = SigningKey::from_bytes((&key_bytes).into())
        .map_err(|e| invalid(format!("invalid key material: {e}")))?;
    Ok(PrivateKeySigner::from_signing_key(key))
}

/// Value transfer from the signer back to itself with fixed gas, price and
/// value. Equal inputs give byte-identical output.
pub fn build_transfer(
    nonce: u64,
    chain_id: u64,
    signer: &PrivateKeySigner,
) -> Result<SignedTransaction, BenchError> {
    let to: Address = signer.address();
    let mut tx = TxLegacy {
        chain_id: Some(chain_id),
        nonce,
        gas_price: TRANSFER_GAS_PRICE,
        gas_limit: TRANSFER_GAS_LIMIT,
        to: TxKind::Call(to),
        value: U256::from(TRANSFER_VALUE),
        input: Bytes::new(),
    };
    let signature = signer
        .sign_transaction_sync(&mut tx)
        .map_err(|e| BenchError::Signing {
            nonce,
            reason: e.to_string(),
        })?;
    let envelope = TxEnvelope::Legacy(tx.into_signed(signature));
    Ok(SignedTransaction {
        nonce,
        hash: *envelope.tx_hash(),
        raw: envelope.encoded_2718().into(),
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use alloy::consensus::Transaction;
    use alloy::eips::Decodable2718;

    const ANVIL_KEY: &str = "0xac0974bec39a17e36ba4a6b4d238ff944bacb478cbed5efcae784d7bf4f2ff80";

    #[test]
    fn equal_inputs_give_byte_identical_transactions() {
        let signer = parse_signing_key(ANVIL_KEY).expect("signer");
        let first = build_transfer(5, 1337, &signer).expect("first");
        let second = build_transfer(5, 1337, &signer).expect("second");
        assert_eq!(first, second);

        let other_nonce = build_transfer(6, 1337, &signer).expect("other nonce");
        assert_ne!(first.hash, other_nonce.hash);
        let other_chain = build_transfer(5, 1, &signer).expect("other chain");
        assert_ne!(first.raw, other_chain.raw);
    }

    #[test]
    fn transfer_is_a_fixed_self_send() {
        let signer = parse_signing_key(ANVIL_KEY).expect("signer");
        let signed = build_transfer(3, 1337, &signer).expect("build");

        let decoded = TxEnvelope::decode_2718(&mut signed.raw.as_ref()).expect("decode");
        assert_eq!(*decoded.tx_hash(), signed.hash);
        assert_eq!(decoded.nonce(), 3);
        assert_eq!(decoded.chain_id(), Some(1337));
        assert_eq!(decoded.gas_limit(), TRANSFER_GAS_LIMIT);
        assert_eq!(decoded.value(), U256::from(TRANSFER_VALUE));
        assert_eq!(decoded.to(), Some(signer.address()));
    }

    #[test]
    fn rejects_malformed_keys() {
        assert!(matches!(
            parse_signing_key("0x1234"),
            Err(BenchError::InvalidKey { .. })
        ));
        assert!(matches!(
            parse_signing_key("not-hex"),
            Err(BenchError::InvalidKey { .. })
        ));
        assert!(matches!(
            parse_signing_key(&format!("0x{}", "00".repeat(32))),
            Err(BenchError::InvalidKey { .. })
        ));
    }
}
