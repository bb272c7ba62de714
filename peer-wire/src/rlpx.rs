// (c) Cartesi and individual authors (see AUTHORS)
// SPDX-License-Identifier: Apache-2.0 (see LICENSE)

//! RLPx transport: EIP-8 auth/ack handshake and the framed, MAC-authenticated
//! stream that follows it.

use aes::cipher::{BlockEncrypt, KeyInit, KeyIvInit, StreamCipher};
use alloy_primitives::keccak256;
use alloy_rlp::{Encodable, Header};
use k256::ecdsa::SigningKey;
use k256::{PublicKey, SecretKey};
use rand::rngs::OsRng;
use rand::{Rng, RngCore};
use sha3::{Digest, Keccak256};
use tokio::io::{AsyncRead, AsyncReadExt, AsyncWrite, AsyncWriteExt};

use crate::WireError;
use crate::ecies;
use crate::enode::{id_from_public_key, public_key_from_id};

type Aes256Ctr = ctr::Ctr128BE<aes::Aes256>;

const PROTOCOL_VERSION: u64 = 4;
/// Frame header payload: empty capability-id/context-id list.
const HEADER_DATA: [u8; 3] = [0xc2, 0x80, 0x80];
const MAX_FRAME_SIZE: usize = 0xff_ffff;
pub(crate) const HEADER_LEN: usize = 32;
const MAC_LEN: usize = 16;

fn xor32(a: &[u8; 32], b: &[u8; 32]) -> [u8; 32] {
    let mut out = [0_u8; 32];
    for (i, byte) in out.iter_mut().enumerate() {
        *byte = a[i] ^ b[i];
    }
    out
}

fn random_nonce() -> [u8; 32] {
    let mut nonce = [0_u8; 32];
    OsRng.fill_bytes(&mut nonce);
    nonce
}

fn rlp_list(payload: &[u8]) -> Vec<u8> {
    let mut out = Vec::with_capacity(payload.len() + 4);
    Header {
        list: true,
        payload_length: payload.len(),
    }
    .encode(&mut out);
    out.extend_from_slice(payload);
    out
}

pub(crate) fn decode_fixed<const N: usize>(buf: &mut &[u8]) -> Result<[u8; N], WireError> {
    let bytes = Header::decode_bytes(buf, false)?;
    bytes
        .try_into()
        .map_err(|_| WireError::protocol(format!("expected {N} bytes, got {}", bytes.len())))
}

/// EIP-8 handshake messages carry random padding so they are not
/// distinguishable from the legacy fixed-size format.
fn pad(body: &mut Vec<u8>) {
    let padding = OsRng.gen_range(100..200);
    body.resize(body.len() + padding, 0);
}

/// Seals `body` as a size-prefixed EIP-8 handshake packet.
fn seal_packet(remote: &PublicKey, body: &[u8]) -> Result<Vec<u8>, WireError> {
    let size = u16::try_from(body.len() + ecies::OVERHEAD)
        .map_err(|_| WireError::protocol("handshake message too large"))?;
    let prefix = size.to_be_bytes();
    let sealed = ecies::encrypt(remote, body, &prefix)?;

    let mut packet = Vec::with_capacity(2 + sealed.len());
    packet.extend_from_slice(&prefix);
    packet.extend_from_slice(&sealed);
    Ok(packet)
}

/// Reads a size-prefixed handshake packet; returns the raw packet (needed for
/// MAC seeding) together with the decrypted body.
async fn read_packet<S>(stream: &mut S, secret: &SecretKey) -> Result<(Vec<u8>, Vec<u8>), WireError>
where
    S: AsyncRead + Unpin,
{
    let mut prefix = [0_u8; 2];
    stream.read_exact(&mut prefix).await?;
    let size = u16::from_be_bytes(prefix) as usize;
    let mut packet = vec![0_u8; 2 + size];
    packet[..2].copy_from_slice(&prefix);
    stream.read_exact(&mut packet[2..]).await?;
    let body = ecies::decrypt(secret, &packet[2..], &prefix)?;
    Ok((packet, body))
}

struct Ack {
    ephemeral_id: [u8; 64],
    nonce: [u8; 32],
}

impl Ack {
    #[cfg(any(test, feature = "test-utils"))]
    fn encode(&self) -> Vec<u8> {
        let mut payload = Vec::new();
        self.ephemeral_id.as_slice().encode(&mut payload);
        self.nonce.as_slice().encode(&mut payload);
        PROTOCOL_VERSION.encode(&mut payload);
        rlp_list(&payload)
    }

    /// Trailing list elements are ignored, as EIP-8 requires.
    fn decode(mut buf: &[u8]) -> Result<Self, WireError> {
        let mut fields = Header::decode_bytes(&mut buf, true)?;
        Ok(Self {
            ephemeral_id: decode_fixed(&mut fields)?,
            nonce: decode_fixed(&mut fields)?,
        })
    }
}

/// Performs the initiator side of the handshake over a fresh connection.
pub(crate) async fn initiate<S>(
    stream: &mut S,
    static_key: &SecretKey,
    remote: &PublicKey,
) -> Result<FrameCodec, WireError>
where
    S: AsyncRead + AsyncWrite + Unpin,
{
    let ephemeral = SecretKey::random(&mut OsRng);
    let nonce = random_nonce();

    let static_shared = ecies::ecdh_x(static_key, remote);
    let (signature, recovery_id) = SigningKey::from(&ephemeral)
        .sign_prehash_recoverable(&xor32(&static_shared, &nonce))
        .map_err(|e| WireError::protocol(format!("signing auth message: {e}")))?;
    let mut signature_bytes = [0_u8; 65];
    signature_bytes[..64].copy_from_slice(&signature.to_bytes());
    signature_bytes[64] = recovery_id.to_byte();

    let mut payload = Vec::new();
    signature_bytes.as_slice().encode(&mut payload);
    id_from_public_key(&static_key.public_key())
        .as_slice()
        .encode(&mut payload);
    nonce.as_slice().encode(&mut payload);
    PROTOCOL_VERSION.encode(&mut payload);
    let mut body = rlp_list(&payload);
    pad(&mut body);

    let auth_packet = seal_packet(remote, &body)?;
    stream.write_all(&auth_packet).await?;
    stream.flush().await?;

    let (ack_packet, ack_body) = read_packet(stream, static_key).await?;
    let ack = Ack::decode(&ack_body)?;
    let remote_ephemeral = public_key_from_id(&ack.ephemeral_id)?;

    Secrets::derive(
        &ephemeral,
        &remote_ephemeral,
        Nonces {
            initiator: nonce,
            recipient: ack.nonce,
        },
        Role::Initiator,
        &auth_packet,
        &ack_packet,
    )
    .into_codec()
}

#[derive(Clone, Copy, PartialEq, Eq)]
enum Role {
    Initiator,
    #[cfg_attr(not(any(test, feature = "test-utils")), allow(dead_code))]
    Recipient,
}

struct Nonces {
    initiator: [u8; 32],
    recipient: [u8; 32],
}

struct Secrets {
    aes: [u8; 32],
    mac: [u8; 32],
    egress_mac: Keccak256,
    ingress_mac: Keccak256,
}

impl Secrets {
    fn derive(
        ephemeral: &SecretKey,
        remote_ephemeral: &PublicKey,
        nonces: Nonces,
        role: Role,
        auth_packet: &[u8],
        ack_packet: &[u8],
    ) -> Self {
        let ephemeral_shared = ecies::ecdh_x(ephemeral, remote_ephemeral);
        let nonce_hash = keccak256([nonces.recipient, nonces.initiator].concat());
        let shared = keccak256([ephemeral_shared, nonce_hash.0].concat());
        let aes = keccak256([ephemeral_shared, shared.0].concat()).0;
        let mac = keccak256([ephemeral_shared, aes].concat()).0;

        let (local_nonce, remote_nonce, sent, received) = match role {
            Role::Initiator => (nonces.initiator, nonces.recipient, auth_packet, ack_packet),
            Role::Recipient => (nonces.recipient, nonces.initiator, ack_packet, auth_packet),
        };
        let mut egress_mac = Keccak256::new();
        egress_mac.update(xor32(&mac, &remote_nonce));
        egress_mac.update(sent);
        let mut ingress_mac = Keccak256::new();
        ingress_mac.update(xor32(&mac, &local_nonce));
        ingress_mac.update(received);

        Self {
            aes,
            mac,
            egress_mac,
            ingress_mac,
        }
    }

    fn into_codec(self) -> Result<FrameCodec, WireError> {
        let cipher = || {
            Aes256Ctr::new_from_slices(&self.aes, &[0_u8; 16])
                .map_err(|e| WireError::protocol(format!("frame cipher: {e}")))
        };
        let block = || {
            aes::Aes256::new_from_slice(&self.mac)
                .map_err(|e| WireError::protocol(format!("mac cipher: {e}")))
        };
        Ok(FrameCodec {
            egress_aes: cipher()?,
            ingress_aes: cipher()?,
            egress_mac: MacState {
                hash: self.egress_mac.clone(),
                cipher: block()?,
            },
            ingress_mac: MacState {
                hash: self.ingress_mac.clone(),
                cipher: block()?,
            },
        })
    }
}

/// Running keccak MAC, updated with AES-encrypted seeds per header and frame.
struct MacState {
    hash: Keccak256,
    cipher: aes::Aes256,
}

impl MacState {
    fn digest_prefix(&self) -> [u8; MAC_LEN] {
        let digest = self.hash.clone().finalize();
        let mut prefix = [0_u8; MAC_LEN];
        prefix.copy_from_slice(&digest[..MAC_LEN]);
        prefix
    }

    fn update_with_seed(&mut self, seed: &[u8; MAC_LEN]) -> [u8; MAC_LEN] {
        let current = self.digest_prefix();
        let mut block = aes::Block::clone_from_slice(&current);
        self.cipher.encrypt_block(&mut block);
        for (byte, seed_byte) in block.iter_mut().zip(seed) {
            *byte ^= seed_byte;
        }
        self.hash.update(block);
        self.digest_prefix()
    }

    fn compute_header(&mut self, header_cipher_text: &[u8; MAC_LEN]) -> [u8; MAC_LEN] {
        self.update_with_seed(header_cipher_text)
    }

    fn compute_frame(&mut self, frame_cipher_text: &[u8]) -> [u8; MAC_LEN] {
        self.hash.update(frame_cipher_text);
        let seed = self.digest_prefix();
        self.update_with_seed(&seed)
    }
}

fn padded_len(size: usize) -> usize {
    size.div_ceil(16) * 16
}

pub(crate) struct FrameCodec {
    egress_aes: Aes256Ctr,
    ingress_aes: Aes256Ctr,
    egress_mac: MacState,
    ingress_mac: MacState,
}

impl FrameCodec {
    pub(crate) fn encode_frame(&mut self, data: &[u8]) -> Result<Vec<u8>, WireError> {
        if data.len() > MAX_FRAME_SIZE {
            return Err(WireError::FrameTooLarge(data.len()));
        }
        let mut header = [0_u8; 16];
        header[..3].copy_from_slice(&(data.len() as u32).to_be_bytes()[1..]);
        header[3..6].copy_from_slice(&HEADER_DATA);
        self.egress_aes.apply_keystream(&mut header);
        let header_mac = self.egress_mac.compute_header(&header);

        let mut frame = data.to_vec();
        frame.resize(padded_len(data.len()), 0);
        self.egress_aes.apply_keystream(&mut frame);
        let frame_mac = self.egress_mac.compute_frame(&frame);

        let mut out = Vec::with_capacity(HEADER_LEN + frame.len() + MAC_LEN);
        out.extend_from_slice(&header);
        out.extend_from_slice(&header_mac);
        out.extend_from_slice(&frame);
        out.extend_from_slice(&frame_mac);
        Ok(out)
    }

    /// Authenticates and decrypts a frame header, returning the frame size.
    pub(crate) fn decode_header(&mut self, header: &[u8; HEADER_LEN]) -> Result<usize, WireError> {
        let mut cipher_text = [0_u8; 16];
        cipher_text.copy_from_slice(&header[..16]);
        let expected = self.ingress_mac.compute_header(&cipher_text);
        if expected.as_slice() != &header[16..] {
            return Err(WireError::MacMismatch("header"));
        }
        self.ingress_aes.apply_keystream(&mut cipher_text);
        Ok(u32::from_be_bytes([0, cipher_text[0], cipher_text[1], cipher_text[2]]) as usize)
    }

    /// Number of bytes following the header for a frame of `size` bytes.
    pub(crate) fn body_len(size: usize) -> usize {
        padded_len(size) + MAC_LEN
    }

    pub(crate) fn decode_body(&mut self, body: &mut [u8], size: usize) -> Result<Vec<u8>, WireError> {
        if body.len() != Self::body_len(size) {
            return Err(WireError::protocol(format!(
                "frame body length {} does not match size {size}",
                body.len()
            )));
        }
        let (frame, mac) = body.split_at_mut(body.len() - MAC_LEN);
        let expected = self.ingress_mac.compute_frame(frame);
        if expected.as_slice() != &mac[..] {
            return Err(WireError::MacMismatch("frame"));
        }
        self.ingress_aes.apply_keystream(frame);
        Ok(frame[..size].to_vec())
    }
}

/// Recipient side of the handshake, for in-process peers.
#[cfg(any(test, feature = "test-utils"))]
pub(crate) async fn respond<S>(
    stream: &mut S,
    static_key: &SecretKey,
) -> Result<(FrameCodec, [u8; 64]), WireError>
where
    S: AsyncRead + AsyncWrite + Unpin,
{
    use k256::ecdsa::{RecoveryId, Signature, VerifyingKey};

    let (auth_packet, auth_body) = read_packet(stream, static_key).await?;
    let mut buf = auth_body.as_slice();
    let mut fields = Header::decode_bytes(&mut buf, true)?;
    let signature_bytes: [u8; 65] = decode_fixed(&mut fields)?;
    let initiator_id: [u8; 64] = decode_fixed(&mut fields)?;
    let initiator_nonce: [u8; 32] = decode_fixed(&mut fields)?;
    let initiator = public_key_from_id(&initiator_id)?;

    let static_shared = ecies::ecdh_x(static_key, &initiator);
    let signature = Signature::from_slice(&signature_bytes[..64])
        .map_err(|e| WireError::protocol(format!("auth signature: {e}")))?;
    let recovery_id = RecoveryId::from_byte(signature_bytes[64])
        .ok_or_else(|| WireError::protocol("auth recovery id"))?;
    let remote_ephemeral = VerifyingKey::recover_from_prehash(
        &xor32(&static_shared, &initiator_nonce),
        &signature,
        recovery_id,
    )
    .map_err(|e| WireError::protocol(format!("auth signature recovery: {e}")))?;
    let remote_ephemeral = PublicKey::from(&remote_ephemeral);

    let ephemeral = SecretKey::random(&mut OsRng);
    let nonce = random_nonce();
    let mut body = Ack {
        ephemeral_id: id_from_public_key(&ephemeral.public_key()),
        nonce,
    }
    .encode();
    pad(&mut body);
    let ack_packet = seal_packet(&initiator, &body)?;
    stream.write_all(&ack_packet).await?;
    stream.flush().await?;

    let codec = Secrets::derive(
        &ephemeral,
        &remote_ephemeral,
        Nonces {
            initiator: initiator_nonce,
            recipient: nonce,
        },
        Role::Recipient,
        &auth_packet,
        &ack_packet,
    )
    .into_codec()?;
    Ok((codec, initiator_id))
}
