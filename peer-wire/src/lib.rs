// (c) Cartesi and individual authors (see AUTHORS)
// SPDX-License-Identifier: Apache-2.0 (see LICENSE)

//! Minimal devp2p client: dials a node from its enode URL, completes the
//! RLPx and `eth/68` handshakes and reports transaction-carrying messages.

pub mod ecies;
mod enode;
mod error;
mod forkid;
mod message;
mod rlpx;
mod session;

pub use enode::NodeRecord;
pub use error::WireError;
pub use forkid::{ForkId, ForkSchedule};
pub use message::{Announcement, AnnouncementKind, DisconnectReason, ETH_VERSION, Status};
pub use session::PeerSession;
