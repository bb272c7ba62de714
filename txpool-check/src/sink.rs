// (c) Cartesi and individual authors (see AUTHORS)
// SPDX-License-Identifier: Apache-2.0 (see LICENSE)

use std::collections::BTreeMap;

use serde::Serialize;

pub const OUTPUT_TX_COUNT: &str = "tx_count";
pub const OUTPUT_AVG_LATENCY_MS: &str = "avg_latency_ms";
pub const OUTPUT_TOTAL_TIME_MS: &str = "total_time_ms";

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum TaskResult {
    #[default]
    Pending,
    Success,
    Failure,
}

/// Receiver of the verdict and named numeric outputs of a run.
pub trait ResultSink {
    fn set_result(&mut self, result: TaskResult);
    fn set_output(&mut self, name: &str, value: u64);
}

/// In-memory sink. A failure verdict is sticky.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct RecordedResult {
    pub result: TaskResult,
    pub outputs: BTreeMap<String, u64>,
}

impl RecordedResult {
    pub fn output(&self, name: &str) -> Option<u64> {
        self.outputs.get(name).copied()
    }
}

impl ResultSink for RecordedResult {
    fn set_result(&mut self, result: TaskResult) {
        if self.result != TaskResult::Failure {
            self.result = result;
        }
    }

    fn set_output(&mut self, name: &str, value: u64) {
        self.outputs.insert(name.to_string(), value);
    }
}
