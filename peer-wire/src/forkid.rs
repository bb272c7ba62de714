// (c) Cartesi and individual authors (see AUTHORS)
// SPDX-License-Identifier: Apache-2.0 (see LICENSE)

use alloy_primitives::B256;
use alloy_rlp::{Encodable, Header};

/// EIP-2124 fork identifier exchanged in the `eth` Status message.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ForkId {
    pub hash: [u8; 4],
    pub next: u64,
}

/// Fork activation points. Activations at block 0 (or at/before the genesis
/// timestamp) are folded into the genesis and never contribute to the checksum.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ForkSchedule {
    pub blocks: Vec<u64>,
    pub timestamps: Vec<u64>,
}

impl ForkSchedule {
    fn block_forks(&self) -> Vec<u64> {
        let mut forks: Vec<u64> = self.blocks.iter().copied().filter(|b| *b > 0).collect();
        forks.sort_unstable();
        forks.dedup();
        forks
    }

    fn time_forks(&self, genesis_time: u64) -> Vec<u64> {
        let mut forks: Vec<u64> = self
            .timestamps
            .iter()
            .copied()
            .filter(|t| *t > genesis_time)
            .collect();
        forks.sort_unstable();
        forks.dedup();
        forks
    }
}

impl ForkId {
    pub fn new(
        genesis_hash: &B256,
        genesis_time: u64,
        schedule: &ForkSchedule,
        head_number: u64,
        head_time: u64,
    ) -> Self {
        let mut hasher = crc32fast::Hasher::new();
        hasher.update(genesis_hash.as_slice());

        for fork in schedule.block_forks() {
            if fork > head_number {
                return Self::from_checksum(&hasher, fork);
            }
            hasher.update(&fork.to_be_bytes());
        }
        for fork in schedule.time_forks(genesis_time) {
            if fork > head_time {
                return Self::from_checksum(&hasher, fork);
            }
            hasher.update(&fork.to_be_bytes());
        }
        Self::from_checksum(&hasher, 0)
    }

    fn from_checksum(hasher: &crc32fast::Hasher, next: u64) -> Self {
        Self {
            hash: hasher.clone().finalize().to_be_bytes(),
            next,
        }
    }

    pub(crate) fn encode(&self, out: &mut Vec<u8>) {
        let mut payload = Vec::new();
        self.hash.as_slice().encode(&mut payload);
        self.next.encode(&mut payload);
        Header {
            list: true,
            payload_length: payload.len(),
        }
        .encode(out);
        out.extend_from_slice(&payload);
    }
}
