// (c) Cartesi and individual authors (see AUTHORS)
// SPDX-License-Identifier: Apache-2.0 (see LICENSE)

//! ECIES as used by the RLPx auth/ack exchange: secp256k1 ECDH, NIST
//! concat-KDF with SHA-256, AES-128-CTR and HMAC-SHA256 over
//! `iv || ciphertext || shared-mac-data`.

use aes::cipher::{KeyIvInit, StreamCipher};
use hmac::{Hmac, Mac};
use k256::elliptic_curve::sec1::ToEncodedPoint;
use k256::{PublicKey, SecretKey};
use rand::RngCore;
use rand::rngs::OsRng;
use sha2::{Digest, Sha256};

use crate::WireError;

type Aes128Ctr = ctr::Ctr128BE<aes::Aes128>;
type HmacSha256 = Hmac<Sha256>;

const PUBLIC_KEY_LEN: usize = 65;
const IV_LEN: usize = 16;
const TAG_LEN: usize = 32;

/// Bytes added by [`encrypt`] on top of the plaintext.
pub const OVERHEAD: usize = PUBLIC_KEY_LEN + IV_LEN + TAG_LEN;

pub(crate) fn ecdh_x(secret: &SecretKey, public: &PublicKey) -> [u8; 32] {
    let shared = k256::ecdh::diffie_hellman(secret.to_nonzero_scalar(), public.as_affine());
    let mut x = [0_u8; 32];
    x.copy_from_slice(shared.raw_secret_bytes().as_slice());
    x
}

fn derive_keys(shared_x: &[u8; 32]) -> ([u8; 16], [u8; 32]) {
    // One concat-KDF round yields 32 bytes: 16 for AES, 16 hashed into the MAC key.
    let mut kdf = Sha256::new();
    kdf.update(1_u32.to_be_bytes());
    kdf.update(shared_x);
    let key_material = kdf.finalize();

    let mut enc_key = [0_u8; 16];
    enc_key.copy_from_slice(&key_material[..16]);
    let mut mac_key = [0_u8; 32];
    mac_key.copy_from_slice(&Sha256::digest(&key_material[16..32]));
    (enc_key, mac_key)
}

fn tag(
    mac_key: &[u8; 32],
    iv: &[u8],
    cipher_text: &[u8],
    auth_data: &[u8],
) -> Result<HmacSha256, WireError> {
    let mut mac = <HmacSha256 as Mac>::new_from_slice(mac_key)
        .map_err(|e| WireError::ecies(format!("hmac key: {e}")))?;
    mac.update(iv);
    mac.update(cipher_text);
    mac.update(auth_data);
    Ok(mac)
}

fn apply_keystream(enc_key: &[u8; 16], iv: &[u8], data: &mut [u8]) -> Result<(), WireError> {
    let mut cipher = Aes128Ctr::new_from_slices(enc_key, iv)
        .map_err(|e| WireError::ecies(format!("aes key/iv: {e}")))?;
    cipher.apply_keystream(data);
    Ok(())
}

pub fn encrypt(remote: &PublicKey, plain: &[u8], auth_data: &[u8]) -> Result<Vec<u8>, WireError> {
    let ephemeral = SecretKey::random(&mut OsRng);
    let (enc_key, mac_key) = derive_keys(&ecdh_x(&ephemeral, remote));

    let mut iv = [0_u8; IV_LEN];
    OsRng.fill_bytes(&mut iv);
    let mut cipher_text = plain.to_vec();
    apply_keystream(&enc_key, &iv, &mut cipher_text)?;
    let digest = tag(&mac_key, &iv, &cipher_text, auth_data)?.finalize().into_bytes();

    let mut out = Vec::with_capacity(plain.len() + OVERHEAD);
    out.extend_from_slice(ephemeral.public_key().to_encoded_point(false).as_bytes());
    out.extend_from_slice(&iv);
    out.extend_from_slice(&cipher_text);
    out.extend_from_slice(&digest);
    Ok(out)
}

pub fn decrypt(secret: &SecretKey, data: &[u8], auth_data: &[u8]) -> Result<Vec<u8>, WireError> {
    if data.len() < OVERHEAD {
        return Err(WireError::ecies(format!(
            "message too short: {} < {OVERHEAD}",
            data.len()
        )));
    }
    let (ephemeral, rest) = data.split_at(PUBLIC_KEY_LEN);
    let (iv, rest) = rest.split_at(IV_LEN);
    let (cipher_text, expected_tag) = rest.split_at(rest.len() - TAG_LEN);

    let ephemeral = PublicKey::from_sec1_bytes(ephemeral)
        .map_err(|_| WireError::ecies("invalid ephemeral public key"))?;
    let (enc_key, mac_key) = derive_keys(&ecdh_x(secret, &ephemeral));

    tag(&mac_key, iv, cipher_text, auth_data)?
        .verify_slice(expected_tag)
        .map_err(|_| WireError::MacMismatch("ecies"))?;

    let mut plain = cipher_text.to_vec();
    apply_keystream(&enc_key, iv, &mut plain)?;
    Ok(plain)
}
