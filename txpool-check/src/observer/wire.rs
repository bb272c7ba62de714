// (c) Cartesi and individual authors (see AUTHORS)
// SPDX-License-Identifier: Apache-2.0 (see LICENSE)

use std::time::Duration;

use alloy_primitives::TxHash;
use async_trait::async_trait;
use peer_wire::{NodeRecord, PeerSession, WireError};
use tracing::{debug, info};

use super::{BatchDrain, ConfirmationEvent, ConfirmationObserver};
use crate::chain::ChainContext;
use crate::config::ObserverMode;
use crate::endpoint::NamedEndpoint;
use crate::error::{BenchError, PeerDialError};

/// Counts transaction announcements arriving over a direct peer connection.
/// The connection lives exactly as long as the observer.
pub struct WireObserver {
    session: PeerSession,
    endpoint: String,
}

impl WireObserver {
    pub async fn connect(
        endpoint: &NamedEndpoint,
        chain: &ChainContext,
        timeout: Duration,
    ) -> Result<Self, BenchError> {
        let dial_error = |source: PeerDialError| BenchError::PeerDial {
            endpoint: endpoint.name.clone(),
            source,
        };
        let node_info = endpoint
            .endpoint
            .node_info()
            .await
            .map_err(|e| dial_error(PeerDialError::NodeInfo(e)))?;
        let record =
            NodeRecord::from_enode(&node_info.enode).map_err(|e| dial_error(e.into()))?;
        let mut session = PeerSession::dial(&record, timeout)
            .await
            .map_err(|e| dial_error(e.into()))?;

        let handshake_error = |source: WireError| BenchError::PeerHandshake {
            endpoint: endpoint.name.clone(),
            source,
        };
        let remote = tokio::time::timeout(timeout, session.handshake(&chain.status()))
            .await
            .map_err(|_| {
                handshake_error(WireError::Protocol("status exchange timed out".to_string()))
            })?
            .map_err(handshake_error)?;

        info!(
            endpoint = %endpoint.name,
            peer = ?session.remote(),
            client = session.remote_client(),
            head = %remote.head,
            "peer handshake complete"
        );
        Ok(Self {
            session,
            endpoint: endpoint.name.clone(),
        })
    }

    async fn next_announcement(&mut self) -> Result<ConfirmationEvent, BenchError> {
        let announcement = self
            .session
            .read_transaction_messages()
            .await
            .map_err(|source| BenchError::PeerRead {
                endpoint: self.endpoint.clone(),
                source,
            })?;
        debug!(kind = ?announcement.kind, items = announcement.items, "transaction announcement");
        Ok(ConfirmationEvent::now(announcement.items))
    }
}

#[async_trait]
impl ConfirmationObserver for WireObserver {
    fn mode(&self) -> ObserverMode {
        ObserverMode::Wire
    }

    /// Announcements are not correlated with `tx_hash`; the next one counts.
    async fn await_transaction(
        &mut self,
        _tx_hash: TxHash,
    ) -> Result<ConfirmationEvent, BenchError> {
        self.next_announcement().await
    }

    /// Only terminates once exactly `expected` announcements were counted.
    async fn drain_batch(&mut self, batch: BatchDrain<'_>) -> Result<(), BenchError> {
        while batch.counter.events() < batch.expected {
            let event = self.next_announcement().await?;
            let confirmed = batch.counter.record(&event);
            batch.meter.observe(confirmed);
        }
        Ok(())
    }

    async fn close(self: Box<Self>) {
        debug!(endpoint = %self.endpoint, "closing peer session");
        self.session.disconnect().await;
    }
}
