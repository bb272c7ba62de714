// (c) Cartesi and individual authors (see AUTHORS)
// SPDX-License-Identifier: Apache-2.0 (see LICENSE)

use alloy_primitives::Address;
use tracing::info;

use crate::endpoint::NamedEndpoint;
use crate::error::BenchError;

/// Next nonce to sign with. Advances after every submission attempt,
/// successful or not.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct NonceCursor {
    next: u64,
}

impl NonceCursor {
    pub fn new(start: u64) -> Self {
        Self { next: start }
    }

    pub fn current(&self) -> u64 {
        self.next
    }

    pub fn advance(&mut self) -> u64 {
        let used = self.next;
        self.next = self.next.saturating_add(1);
        used
    }
}

/// Bounds consecutive submission failures within one logical iteration.
#[derive(Debug, Clone, Copy)]
pub struct RetryBudget {
    max_consecutive: u32,
    consecutive: u32,
}

impl RetryBudget {
    pub fn new(max_consecutive: u32) -> Self {
        Self {
            max_consecutive,
            consecutive: 0,
        }
    }

    pub fn consecutive_failures(&self) -> u32 {
        self.consecutive
    }

    /// Counts one failed attempt; exceeding the budget is fatal.
    pub fn record_failure(&mut self, nonce: u64) -> Result<(), BenchError> {
        self.consecutive = self.consecutive.saturating_add(1);
        if self.consecutive > self.max_consecutive {
            return Err(BenchError::RetryBudgetExhausted {
                failures: self.consecutive,
                last_nonce: nonce,
            });
        }
        Ok(())
    }

    pub fn reset(&mut self) {
        self.consecutive = 0;
    }
}

/// Uses `override_nonce` verbatim when set, otherwise asks the endpoint for
/// the account nonce at `head_number`.
pub async fn resolve_starting_nonce(
    endpoint: &NamedEndpoint,
    address: Address,
    override_nonce: Option<u64>,
    head_number: u64,
) -> Result<u64, BenchError> {
    if let Some(nonce) = override_nonce {
        info!(nonce, "using configured starting nonce");
        return Ok(nonce);
    }
    let nonce = endpoint
        .endpoint
        .nonce_at(address, head_number)
        .await
        .map_err(|source| BenchError::NonceFetch {
            endpoint: endpoint.name.clone(),
            source,
        })?;
    info!(nonce, block = head_number, endpoint = %endpoint.name, "fetched starting nonce");
    Ok(nonce)
}
