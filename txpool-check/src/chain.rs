// (c) Cartesi and individual authors (see AUTHORS)
// SPDX-License-Identifier: Apache-2.0 (see LICENSE)

use alloy::eips::BlockNumberOrTag;
use peer_wire::{ForkId, ForkSchedule, Status};

use crate::endpoint::{BlockRef, NamedEndpoint};
use crate::error::BenchError;

/// Chain identity fetched once per phase and reused for peer handshakes.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ChainContext {
    pub chain_id: u64,
    pub genesis: BlockRef,
    pub head: BlockRef,
    pub fork_id: ForkId,
}

impl ChainContext {
    pub async fn fetch(
        endpoint: &NamedEndpoint,
        schedule: &ForkSchedule,
    ) -> Result<Self, BenchError> {
        let metadata = |source| BenchError::ChainMetadata {
            endpoint: endpoint.name.clone(),
            source,
        };
        let chain_id = endpoint.endpoint.chain_id().await.map_err(metadata)?;
        let genesis = endpoint
            .endpoint
            .block(BlockNumberOrTag::Number(0))
            .await
            .map_err(metadata)?;
        let head = endpoint
            .endpoint
            .block(BlockNumberOrTag::Latest)
            .await
            .map_err(metadata)?;
        Ok(Self::new(chain_id, genesis, head, schedule))
    }

    pub fn new(chain_id: u64, genesis: BlockRef, head: BlockRef, schedule: &ForkSchedule) -> Self {
        let fork_id = ForkId::new(
            &genesis.hash,
            genesis.timestamp,
            schedule,
            head.number,
            head.timestamp,
        );
        Self {
            chain_id,
            genesis,
            head,
            fork_id,
        }
    }

    /// Re-reads the head from `endpoint`, keeping chain id and genesis.
    pub async fn refresh_head(
        &self,
        endpoint: &NamedEndpoint,
        schedule: &ForkSchedule,
    ) -> Result<Self, BenchError> {
        let head = endpoint
            .endpoint
            .block(BlockNumberOrTag::Latest)
            .await
            .map_err(|source| BenchError::ChainMetadata {
                endpoint: endpoint.name.clone(),
                source,
            })?;
        Ok(Self::new(self.chain_id, self.genesis, head, schedule))
    }

    /// `eth` Status announcing this chain; the network id is the chain id.
    pub fn status(&self) -> Status {
        Status::new(self.chain_id, self.head.hash, self.genesis.hash, self.fork_id)
    }
}
