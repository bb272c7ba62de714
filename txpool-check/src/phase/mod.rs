// (c) Cartesi and individual authors (see AUTHORS)
// SPDX-License-Identifier: Apache-2.0 (see LICENSE)

mod latency;
mod throughput;

pub use latency::{LatencyOutcome, LatencySettings, ProgressCheckpoint, run_latency_phase};
pub use throughput::{
    RateCheckpoint, ThroughputMeter, ThroughputOutcome, ThroughputSettings, rate_per_sec,
    run_throughput_phase,
};
