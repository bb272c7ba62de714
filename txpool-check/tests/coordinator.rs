// (c) Cartesi and individual authors (see AUTHORS)
// SPDX-License-Identifier: Apache-2.0 (see LICENSE)

mod common;

use std::sync::Arc;
use std::time::Duration;

use tokio_util::sync::CancellationToken;
use txpool_check::observer::{NetworkObservers, SINGLE_TX_BUDGET};
use txpool_check::sink::{OUTPUT_AVG_LATENCY_MS, OUTPUT_TOTAL_TIME_MS, OUTPUT_TX_COUNT};
use txpool_check::{
    BenchError, BenchmarkConfig, Coordinator, ObserverMode, RecordedResult, TaskResult,
};

use common::{ANVIL_KEY, DelayedObservers, MockEndpoint, pool};

fn config() -> BenchmarkConfig {
    BenchmarkConfig {
        private_key: ANVIL_KEY.to_string(),
        tx_count: 10,
        measure_interval: 5,
        expected_latency: 500,
        settle_delay_ms: 1_000,
        drain_grace_ms: 500,
        ..BenchmarkConfig::default()
    }
}

#[tokio::test(start_paused = true)]
async fn successful_run_publishes_both_phases() {
    let geth = Arc::new(MockEndpoint::default());
    let besu = Arc::new(MockEndpoint::default());
    let observers = Arc::new(DelayedObservers::new(Duration::from_millis(100)));
    let mut coordinator = Coordinator::new(
        config(),
        pool(&[("geth", geth.clone()), ("besu", besu.clone())]),
        observers.clone(),
    )
    .expect("valid config")
    .with_seed(7);
    let mut sink = RecordedResult::default();

    let summary = coordinator
        .run(&mut sink, &CancellationToken::new())
        .await
        .expect("run succeeds");

    assert_eq!(summary.verdict, TaskResult::Success);
    assert_eq!(sink.result, TaskResult::Success);
    assert_eq!(summary.avg_latency_ms, 100);
    assert_eq!(sink.output(OUTPUT_AVG_LATENCY_MS), Some(100));
    assert_eq!(sink.output(OUTPUT_TX_COUNT), Some(10));
    assert!(sink.output(OUTPUT_TOTAL_TIME_MS).expect("total time") >= 1_500);

    let throughput_endpoint = summary.throughput_endpoint.expect("throughput ran");
    assert_ne!(summary.latency_endpoint, throughput_endpoint);
    assert_eq!(
        observers.connected(),
        vec![summary.latency_endpoint.clone(), throughput_endpoint.clone()]
    );
    // Throughput observer is attached right after the latency phase, before settling.
    let connected_at = observers.connected_at();
    let gap = connected_at[1] - connected_at[0];
    assert!(gap >= Duration::from_millis(1_000), "gap {gap:?}");
    assert!(gap < Duration::from_millis(2_000), "gap {gap:?}");

    let (latency_mock, throughput_mock) = if summary.latency_endpoint == "geth" {
        (&geth, &besu)
    } else {
        (&besu, &geth)
    };
    assert_eq!(latency_mock.accepted(), (0..10).collect::<Vec<_>>());
    assert_eq!(throughput_mock.accepted(), (10..20).collect::<Vec<_>>());
}

#[tokio::test(start_paused = true)]
async fn high_latency_fails_run_without_outputs_when_enforced() {
    let geth = Arc::new(MockEndpoint::default());
    let observers = Arc::new(DelayedObservers::new(Duration::from_millis(600)));
    let mut coordinator = Coordinator::new(
        BenchmarkConfig {
            fail_on_high_latency: true,
            ..config()
        },
        pool(&[("geth", geth.clone())]),
        observers.clone(),
    )
    .expect("valid config");
    let mut sink = RecordedResult::default();

    let summary = coordinator
        .run(&mut sink, &CancellationToken::new())
        .await
        .expect("threshold breach is a verdict, not an error");

    assert_eq!(summary.verdict, TaskResult::Failure);
    assert_eq!(summary.avg_latency_ms, 600);
    assert_eq!(sink.result, TaskResult::Failure);
    assert!(sink.outputs.is_empty());
    assert_eq!(summary.throughput_endpoint, None);
    assert_eq!(observers.connected().len(), 1);
    assert_eq!(geth.accepted().len(), 10);
}

#[tokio::test(start_paused = true)]
async fn high_latency_only_warns_when_not_enforced() {
    let geth = Arc::new(MockEndpoint::default());
    let observers = Arc::new(DelayedObservers::new(Duration::from_millis(600)));
    let mut coordinator = Coordinator::new(config(), pool(&[("geth", geth.clone())]), observers)
        .expect("valid config");
    let mut sink = RecordedResult::default();

    let summary = coordinator
        .run(&mut sink, &CancellationToken::new())
        .await
        .expect("run succeeds");

    assert_eq!(summary.verdict, TaskResult::Success);
    assert_eq!(sink.output(OUTPUT_AVG_LATENCY_MS), Some(600));
    assert!(sink.output(OUTPUT_TOTAL_TIME_MS).is_some());
    assert_eq!(summary.throughput_endpoint.as_deref(), Some("geth"));
    assert_eq!(geth.accepted(), (0..20).collect::<Vec<_>>());
}

#[tokio::test(start_paused = true)]
async fn configured_nonce_is_used_verbatim() {
    let geth = Arc::new(MockEndpoint::default().with_account_nonce(5));
    let observers = Arc::new(DelayedObservers::new(Duration::from_millis(10)));
    let mut coordinator = Coordinator::new(
        BenchmarkConfig {
            nonce: Some(42),
            tx_count: 2,
            measure_interval: 1,
            ..config()
        },
        pool(&[("geth", geth.clone())]),
        observers,
    )
    .expect("valid config");
    let mut sink = RecordedResult::default();

    coordinator
        .run(&mut sink, &CancellationToken::new())
        .await
        .expect("run succeeds");

    assert_eq!(geth.accepted(), vec![42, 43, 44, 45]);
}

#[tokio::test(start_paused = true)]
async fn filtered_out_endpoints_fail_the_run() {
    let observers = Arc::new(DelayedObservers::new(Duration::from_millis(10)));
    let mut coordinator = Coordinator::new(
        BenchmarkConfig {
            client_pattern: "^reth".to_string(),
            exclude_client_pattern: "geth".to_string(),
            ..config()
        },
        pool(&[
            ("geth", Arc::new(MockEndpoint::default())),
            ("besu", Arc::new(MockEndpoint::default())),
        ]),
        observers.clone(),
    )
    .expect("valid config");
    let mut sink = RecordedResult::default();

    let err = coordinator
        .run(&mut sink, &CancellationToken::new())
        .await
        .err()
        .expect("nothing to run against");

    assert!(matches!(err, BenchError::NoReadyEndpoints));
    assert_eq!(sink.result, TaskResult::Failure);
    assert!(observers.connected().is_empty());
}

#[tokio::test(start_paused = true)]
async fn nonce_query_failure_fails_the_run() {
    let geth = Arc::new(MockEndpoint::default().failing_nonce_query());
    let observers = Arc::new(DelayedObservers::new(Duration::from_millis(10)));
    let mut coordinator = Coordinator::new(config(), pool(&[("geth", geth.clone())]), observers)
        .expect("valid config");
    let mut sink = RecordedResult::default();

    let err = coordinator
        .run(&mut sink, &CancellationToken::new())
        .await
        .err()
        .expect("nonce unavailable");

    assert!(
        matches!(&err, BenchError::NonceFetch { endpoint, .. } if endpoint == "geth"),
        "unexpected error: {err:?}"
    );
    assert_eq!(sink.result, TaskResult::Failure);
    assert!(geth.attempts().is_empty());
}

#[tokio::test(start_paused = true)]
async fn unseen_transaction_times_out_and_fails_the_run() {
    let geth = Arc::new(MockEndpoint::default().never_visible());
    let mut coordinator = Coordinator::new(
        BenchmarkConfig {
            observer: ObserverMode::Poll,
            ..config()
        },
        pool(&[("geth", geth.clone())]),
        Arc::new(NetworkObservers::new(ObserverMode::Poll)),
    )
    .expect("valid config");
    let mut sink = RecordedResult::default();

    let err = coordinator
        .run(&mut sink, &CancellationToken::new())
        .await
        .err()
        .expect("first transaction is never seen");

    assert!(err.is_timeout(), "unexpected error: {err:?}");
    assert!(matches!(
        err,
        BenchError::ConfirmationTimeout { budget, .. } if budget == SINGLE_TX_BUDGET
    ));
    assert_eq!(sink.result, TaskResult::Failure);
    assert!(sink.outputs.is_empty());
    assert_eq!(geth.accepted(), vec![0]);
}

#[test]
fn invalid_config_is_rejected_up_front() {
    let observers = Arc::new(DelayedObservers::new(Duration::from_millis(10)));
    let result = Coordinator::new(
        BenchmarkConfig {
            tx_count: 0,
            ..config()
        },
        pool(&[]),
        observers,
    );
    assert!(matches!(result, Err(BenchError::Config(_))));
}
