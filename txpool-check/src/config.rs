// (c) Cartesi and individual authors (see AUTHORS)
// SPDX-License-Identifier: Apache-2.0 (see LICENSE)

use std::fs;
use std::path::Path;
use std::time::Duration;

use peer_wire::ForkSchedule;
use serde::{Deserialize, Serialize};

use crate::endpoint::EndpointFilter;
use crate::error::ConfigError;

pub const DEFAULT_TX_COUNT: u64 = 1000;
pub const DEFAULT_MEASURE_INTERVAL: u64 = 100;
pub const DEFAULT_EXPECTED_LATENCY_MS: u64 = 500;
pub const DEFAULT_SETTLE_DELAY_MS: u64 = 5_000;
pub const DEFAULT_DRAIN_GRACE_MS: u64 = 2_000;
pub const DEFAULT_MAX_CONSECUTIVE_SEND_FAILURES: u32 = 1000;

/// How confirmations are detected.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ObserverMode {
    /// Direct peer connection counting transaction announcements.
    #[default]
    Wire,
    /// `eth_getTransactionByHash` polling.
    Poll,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct ForkScheduleConfig {
    pub blocks: Vec<u64>,
    pub timestamps: Vec<u64>,
}

impl From<&ForkScheduleConfig> for ForkSchedule {
    fn from(value: &ForkScheduleConfig) -> Self {
        Self {
            blocks: value.blocks.clone(),
            timestamps: value.timestamps.clone(),
        }
    }
}

/// Task configuration, keyed the way orchestrator task files spell it.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct BenchmarkConfig {
    #[serde(skip_serializing)]
    pub private_key: String,
    /// Fixed starting nonce; fetched from the endpoint when absent.
    pub nonce: Option<u64>,
    pub tx_count: u64,
    pub measure_interval: u64,
    /// Average-latency threshold in milliseconds.
    pub expected_latency: u64,
    pub fail_on_high_latency: bool,
    pub client_pattern: String,
    pub exclude_client_pattern: String,
    pub observer: ObserverMode,
    pub settle_delay_ms: u64,
    pub drain_grace_ms: u64,
    pub max_consecutive_send_failures: u32,
    pub fork_schedule: ForkScheduleConfig,
}

impl Default for BenchmarkConfig {
    fn default() -> Self {
        Self {
            private_key: String::new(),
            nonce: None,
            tx_count: DEFAULT_TX_COUNT,
            measure_interval: DEFAULT_MEASURE_INTERVAL,
            expected_latency: DEFAULT_EXPECTED_LATENCY_MS,
            fail_on_high_latency: false,
            client_pattern: String::new(),
            exclude_client_pattern: String::new(),
            observer: ObserverMode::Wire,
            settle_delay_ms: DEFAULT_SETTLE_DELAY_MS,
            drain_grace_ms: DEFAULT_DRAIN_GRACE_MS,
            max_consecutive_send_failures: DEFAULT_MAX_CONSECUTIVE_SEND_FAILURES,
            fork_schedule: ForkScheduleConfig::default(),
        }
    }
}

impl BenchmarkConfig {
    pub fn from_json_file(path: impl AsRef<Path>) -> Result<Self, ConfigError> {
        let path = path.as_ref();
        let raw = fs::read(path).map_err(|source| ConfigError::Read {
            path: path.display().to_string(),
            source,
        })?;
        serde_json::from_slice(&raw).map_err(|source| ConfigError::Parse {
            path: path.display().to_string(),
            source,
        })
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.tx_count == 0 {
            return Err(ConfigError::ZeroTxCount);
        }
        if self.measure_interval == 0 {
            return Err(ConfigError::ZeroMeasureInterval);
        }
        if self.private_key.trim().is_empty() {
            return Err(ConfigError::MissingPrivateKey);
        }
        self.endpoint_filter()?;
        Ok(())
    }

    pub fn endpoint_filter(&self) -> Result<EndpointFilter, ConfigError> {
        EndpointFilter::new(&self.client_pattern, &self.exclude_client_pattern)
    }

    pub fn settle_delay(&self) -> Duration {
        Duration::from_millis(self.settle_delay_ms)
    }

    pub fn drain_grace(&self) -> Duration {
        Duration::from_millis(self.drain_grace_ms)
    }

    pub fn fork_schedule(&self) -> ForkSchedule {
        (&self.fork_schedule).into()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;

    fn valid() -> BenchmarkConfig {
        BenchmarkConfig {
            private_key: "0x01".to_string(),
            ..BenchmarkConfig::default()
        }
    }

    #[test]
    fn loads_camel_case_task_file_with_defaults() {
        let mut file = tempfile::NamedTempFile::new().expect("tempfile");
        write!(
            file,
            r#"{{"privateKey":"0xabc","txCount":25,"failOnHighLatency":true,
                "clientPattern":"geth.*","observer":"poll",
                "forkSchedule":{{"timestamps":[1700000000]}}}}"#
        )
        .expect("write config");

        let config = BenchmarkConfig::from_json_file(file.path()).expect("load");
        assert_eq!(config.private_key, "0xabc");
        assert_eq!(config.tx_count, 25);
        assert_eq!(config.measure_interval, DEFAULT_MEASURE_INTERVAL);
        assert_eq!(config.expected_latency, DEFAULT_EXPECTED_LATENCY_MS);
        assert!(config.fail_on_high_latency);
        assert_eq!(config.observer, ObserverMode::Poll);
        assert_eq!(config.fork_schedule.timestamps, vec![1_700_000_000]);
        assert!(config.fork_schedule.blocks.is_empty());
    }

    #[test]
    fn missing_file_reports_path() {
        let err = BenchmarkConfig::from_json_file("/nonexistent/txpool.json").expect_err("missing");
        assert!(matches!(err, ConfigError::Read { ref path, .. } if path.contains("txpool.json")));
    }

    #[test]
    fn validate_rejects_zero_count_interval_and_bad_patterns() {
        valid().validate().expect("valid config");

        let zero_count = BenchmarkConfig {
            tx_count: 0,
            ..valid()
        };
        assert!(matches!(zero_count.validate(), Err(ConfigError::ZeroTxCount)));

        let zero_interval = BenchmarkConfig {
            measure_interval: 0,
            ..valid()
        };
        assert!(matches!(
            zero_interval.validate(),
            Err(ConfigError::ZeroMeasureInterval)
        ));

        let no_key = BenchmarkConfig::default();
        assert!(matches!(no_key.validate(), Err(ConfigError::MissingPrivateKey)));

        let bad_pattern = BenchmarkConfig {
            exclude_client_pattern: "(".to_string(),
            ..valid()
        };
        assert!(matches!(
            bad_pattern.validate(),
            Err(ConfigError::InvalidPattern {
                field: "excludeClientPattern",
                ..
            })
        ));
    }

    #[test]
    fn private_key_is_never_serialized() {
        let json = serde_json::to_string(&valid()).expect("serialize");
        assert!(!json.contains("privateKey"));
        assert!(json.contains("\"txCount\":1000"));
    }
}
