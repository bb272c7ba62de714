// (c) Cartesi and individual authors (see AUTHORS)
// SPDX-License-Identifier: Apache-2.0 (see LICENSE)

use std::time::Duration;

use alloy_rlp::{Decodable, Encodable};
use k256::SecretKey;
use rand::rngs::OsRng;
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::net::TcpStream;
use tracing::{debug, trace};

use crate::WireError;
use crate::enode::{NodeRecord, id_from_public_key};
use crate::message::{
    Announcement, BASE_PROTOCOL_VERSION, DISCONNECT, DisconnectReason, EMPTY_LIST,
    ETH_BLOCK_HEADERS, ETH_GET_BLOCK_HEADERS, ETH_NEW_POOLED_TRANSACTION_HASHES, ETH_STATUS,
    ETH_TRANSACTIONS, ETH_VERSION, HELLO, Hello, PING, PONG, Status, empty_block_headers,
};
use crate::rlpx::{self, FrameCodec, HEADER_LEN};

const CLIENT_ID: &str = concat!("peer-wire/v", env!("CARGO_PKG_VERSION"));
const MAX_MESSAGE_SIZE: usize = 16 * 1024 * 1024;

struct Message {
    id: u64,
    payload: Vec<u8>,
}

/// An established RLPx connection speaking `eth/68` to a single node.
///
/// The socket is closed when the session is dropped; [`PeerSession::disconnect`]
/// additionally tells the peer why.
pub struct PeerSession {
    stream: TcpStream,
    codec: FrameCodec,
    snappy: bool,
    remote: NodeRecord,
    remote_client: String,
}

impl PeerSession {
    /// Connects, runs the RLPx handshake and exchanges Hello. Each step is
    /// bounded by `timeout`.
    pub async fn dial(record: &NodeRecord, timeout: Duration) -> Result<Self, WireError> {
        let addr = record.socket_addr();
        let remote_key = record.public_key()?;
        let static_key = SecretKey::random(&mut OsRng);

        let mut stream = tokio::time::timeout(timeout, TcpStream::connect(addr.as_str()))
            .await
            .map_err(|_| WireError::DialTimeout { addr: addr.clone() })??;
        stream.set_nodelay(true)?;

        let codec = tokio::time::timeout(
            timeout,
            rlpx::initiate(&mut stream, &static_key, &remote_key),
        )
        .await
        .map_err(|_| WireError::protocol(format!("rlpx handshake with {addr} timed out")))??;

        let mut session = Self {
            stream,
            codec,
            snappy: false,
            remote: record.clone(),
            remote_client: String::new(),
        };
        tokio::time::timeout(timeout, session.exchange_hello(&static_key))
            .await
            .map_err(|_| WireError::protocol(format!("hello exchange with {addr} timed out")))??;

        debug!(peer = ?record, client = %session.remote_client, "rlpx session established");
        Ok(session)
    }

    pub fn remote(&self) -> &NodeRecord {
        &self.remote
    }

    /// Client identifier the peer reported in its Hello.
    pub fn remote_client(&self) -> &str {
        &self.remote_client
    }

    /// Sends our Status and waits for the peer's, returning it once it is
    /// known to describe the same chain.
    pub async fn handshake(&mut self, status: &Status) -> Result<Status, WireError> {
        self.write_message(ETH_STATUS, &status.encode()).await?;
        loop {
            let message = self.read_message().await?;
            match message.id {
                ETH_STATUS => {
                    let remote = Status::decode(&message.payload)?;
                    if let Err(err) = status.ensure_compatible(&remote) {
                        self.send_disconnect(DisconnectReason::UselessPeer).await;
                        return Err(err);
                    }
                    return Ok(remote);
                }
                _ => self.handle_control(message).await?,
            }
        }
    }

    /// Waits for the next message that carries transactions. Control traffic
    /// (ping, header requests) is answered while waiting.
    pub async fn read_transaction_messages(&mut self) -> Result<Announcement, WireError> {
        loop {
            let message = self.read_message().await?;
            match message.id {
                ETH_TRANSACTIONS => return Announcement::transactions(&message.payload),
                ETH_NEW_POOLED_TRANSACTION_HASHES => {
                    return Announcement::pooled_hashes(&message.payload);
                }
                _ => self.handle_control(message).await?,
            }
        }
    }

    pub async fn disconnect(mut self) {
        self.send_disconnect(DisconnectReason::ClientQuitting).await;
        if let Err(err) = self.stream.shutdown().await {
            trace!(error = %err, "socket shutdown failed");
        }
    }

    async fn handle_control(&mut self, message: Message) -> Result<(), WireError> {
        match message.id {
            PING => self.write_message(PONG, &EMPTY_LIST).await,
            PONG => Ok(()),
            DISCONNECT => Err(WireError::Disconnected(DisconnectReason::decode(
                &message.payload,
            ))),
            ETH_GET_BLOCK_HEADERS => {
                let reply = empty_block_headers(&message.payload)?;
                self.write_message(ETH_BLOCK_HEADERS, &reply).await
            }
            other => {
                trace!(id = other, size = message.payload.len(), "ignoring message");
                Ok(())
            }
        }
    }

    async fn exchange_hello(&mut self, static_key: &SecretKey) -> Result<(), WireError> {
        let hello = Hello::new(CLIENT_ID, id_from_public_key(&static_key.public_key()));
        self.write_message(HELLO, &hello.encode()).await?;

        let message = self.read_message().await?;
        match message.id {
            HELLO => {}
            DISCONNECT => {
                return Err(WireError::Disconnected(DisconnectReason::decode(
                    &message.payload,
                )));
            }
            other => {
                return Err(WireError::protocol(format!(
                    "expected hello, got message {other:#x}"
                )));
            }
        }

        let remote = Hello::decode(&message.payload)?;
        if remote.node_id != self.remote.id {
            return Err(WireError::protocol("hello node id does not match enode"));
        }
        if !remote.supports("eth", ETH_VERSION) {
            self.send_disconnect(DisconnectReason::UselessPeer).await;
            return Err(WireError::protocol(format!(
                "peer does not support eth/{ETH_VERSION}"
            )));
        }
        self.snappy = remote.protocol_version >= BASE_PROTOCOL_VERSION;
        self.remote_client = remote.client_id;
        Ok(())
    }

    async fn send_disconnect(&mut self, reason: DisconnectReason) {
        if let Err(err) = self.write_message(DISCONNECT, &reason.encode()).await {
            trace!(error = %err, "failed to send disconnect");
        }
    }

    async fn write_message(&mut self, id: u64, payload: &[u8]) -> Result<(), WireError> {
        let mut data = Vec::with_capacity(payload.len() + 1);
        id.encode(&mut data);
        if self.snappy {
            data.extend_from_slice(&snap::raw::Encoder::new().compress_vec(payload)?);
        } else {
            data.extend_from_slice(payload);
        }
        let frame = self.codec.encode_frame(&data)?;
        self.stream.write_all(&frame).await?;
        Ok(())
    }

    async fn read_message(&mut self) -> Result<Message, WireError> {
        let mut header = [0_u8; HEADER_LEN];
        self.stream.read_exact(&mut header).await?;
        let size = self.codec.decode_header(&header)?;
        let mut body = vec![0_u8; FrameCodec::body_len(size)];
        self.stream.read_exact(&mut body).await?;
        let data = self.codec.decode_body(&mut body, size)?;

        let mut buf = data.as_slice();
        let id = u64::decode(&mut buf)?;
        let payload = if self.snappy {
            let len = snap::raw::decompress_len(buf)?;
            if len > MAX_MESSAGE_SIZE {
                return Err(WireError::FrameTooLarge(len));
            }
            snap::raw::Decoder::new().decompress_vec(buf)?
        } else {
            buf.to_vec()
        };
        Ok(Message { id, payload })
    }
}

#[cfg(any(test, feature = "test-utils"))]
impl PeerSession {
    /// Recipient side of [`PeerSession::dial`] on an accepted connection.
    pub async fn accept(mut stream: TcpStream, static_key: &SecretKey) -> Result<Self, WireError> {
        let peer_addr = stream.peer_addr()?;
        let (codec, remote_id) = rlpx::respond(&mut stream, static_key).await?;
        let mut session = Self {
            stream,
            codec,
            snappy: false,
            remote: NodeRecord {
                id: remote_id,
                host: peer_addr.ip().to_string(),
                tcp_port: peer_addr.port(),
            },
            remote_client: String::new(),
        };
        session.exchange_hello(static_key).await?;
        Ok(session)
    }

    /// Announces `hashes` as pooled dynamic-fee transactions.
    pub async fn announce_pooled_hashes(
        &mut self,
        hashes: &[alloy_primitives::B256],
    ) -> Result<(), WireError> {
        let payload = crate::message::pooled_hashes_message(hashes);
        self.write_message(ETH_NEW_POOLED_TRANSACTION_HASHES, &payload).await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::forkid::ForkId;
    use crate::message::AnnouncementKind;
    use alloy_primitives::B256;
    use tokio::net::TcpListener;

    fn chain_status() -> Status {
        Status::new(
            1337,
            B256::repeat_byte(0xaa),
            B256::repeat_byte(0xbb),
            ForkId {
                hash: [0xde, 0xad, 0xbe, 0xef],
                next: 0,
            },
        )
    }

    fn rlp_list(items: &[Vec<u8>]) -> Vec<u8> {
        let payload: Vec<u8> = items.concat();
        let mut out = Vec::new();
        alloy_rlp::Header {
            list: true,
            payload_length: payload.len(),
        }
        .encode(&mut out);
        out.extend_from_slice(&payload);
        out
    }

    fn encoded<T: Encodable>(value: T) -> Vec<u8> {
        let mut out = Vec::new();
        value.encode(&mut out);
        out
    }

    /// Minimal in-process node: accepts one connection, completes the
    /// handshakes and then plays a fixed script.
    async fn scripted_peer(listener: TcpListener, key: SecretKey) -> Vec<u64> {
        let (stream, _) = listener.accept().await.expect("accept");
        let mut peer = PeerSession::accept(stream, &key).await.expect("accept session");
        assert_eq!(peer.remote_client(), CLIENT_ID);

        let status = peer.read_message().await.expect("client status");
        assert_eq!(status.id, ETH_STATUS);
        assert_eq!(Status::decode(&status.payload).expect("status"), chain_status());
        peer.write_message(ETH_STATUS, &chain_status().encode())
            .await
            .expect("status");

        let txs = rlp_list(&[encoded(&b"tx-one"[..]), encoded(&b"tx-two"[..])]);
        peer.write_message(PING, &EMPTY_LIST).await.expect("ping");
        peer.write_message(ETH_TRANSACTIONS, &txs).await.expect("txs");

        let request = rlp_list(&[encoded(9_u64), rlp_list(&[encoded(1_u64), encoded(1_u64)])]);
        peer.write_message(ETH_GET_BLOCK_HEADERS, &request)
            .await
            .expect("header request");
        let hashes: Vec<B256> = (1..=3_u8).map(B256::repeat_byte).collect();
        peer.announce_pooled_hashes(&hashes).await.expect("hashes");

        let mut replies = Vec::new();
        for _ in 0..3 {
            replies.push(peer.read_message().await.expect("reply").id);
        }
        replies
    }

    #[tokio::test]
    async fn dial_handshake_and_count_announcements() {
        let listener = TcpListener::bind("127.0.0.1:0").await.expect("bind");
        let port = listener.local_addr().expect("addr").port();
        let key = SecretKey::random(&mut OsRng);
        let record = NodeRecord {
            id: id_from_public_key(&key.public_key()),
            host: "127.0.0.1".to_string(),
            tcp_port: port,
        };
        let peer = tokio::spawn(scripted_peer(listener, key));

        let mut session = PeerSession::dial(&record, Duration::from_secs(5))
            .await
            .expect("dial");
        assert_eq!(session.remote_client(), CLIENT_ID);
        assert_eq!(session.remote(), &record);
        let remote = session.handshake(&chain_status()).await.expect("status");
        assert_eq!(remote.genesis, B256::repeat_byte(0xbb));

        let first = session.read_transaction_messages().await.expect("first");
        assert_eq!(first.kind, AnnouncementKind::Transactions);
        assert_eq!(first.items, 2);
        let second = session.read_transaction_messages().await.expect("second");
        assert_eq!(second.kind, AnnouncementKind::PooledHashes);
        assert_eq!(second.items, 3);
        session.disconnect().await;

        let replies = peer.await.expect("peer task");
        assert_eq!(replies, vec![PONG, ETH_BLOCK_HEADERS, DISCONNECT]);
    }

    #[tokio::test]
    async fn dial_to_closed_port_fails() {
        let listener = TcpListener::bind("127.0.0.1:0").await.expect("bind");
        let port = listener.local_addr().expect("addr").port();
        drop(listener);
        let key = SecretKey::random(&mut OsRng);
        let record = NodeRecord {
            id: id_from_public_key(&key.public_key()),
            host: "127.0.0.1".to_string(),
            tcp_port: port,
        };
        assert!(PeerSession::dial(&record, Duration::from_secs(2)).await.is_err());
    }
}
