// (c) Cartesi and individual authors (see AUTHORS)
// SPDX-License-Identifier: Apache-2.0 (see LICENSE)

pub mod chain;
pub mod config;
pub mod coordinator;
pub mod endpoint;
pub mod error;
pub mod nonce;
pub mod observer;
pub mod phase;
pub mod report;
pub mod sink;
pub mod transaction;

pub use config::{BenchmarkConfig, ObserverMode};
pub use coordinator::{Coordinator, RunSummary};
pub use error::{BenchError, ConfigError, EndpointError};
pub use sink::{RecordedResult, ResultSink, TaskResult};
