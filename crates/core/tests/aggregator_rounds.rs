//! Round outcomes: quorum, outlier rejection, health and scheduling.

mod common;

use common::{aggregator, settings, source, Script, ScriptedClient};
use pulse_chain::FetchError;
use pulse_core::{
    AggregatorError, AggregatorState, FailureReason, NodeHealth, QuorumStage, RoundError,
    RoundEvent,
};
use std::time::Duration;

#[tokio::test(start_paused = true)]
async fn test_quorum_met_then_lost_keeps_latest() {
    let client = ScriptedClient::new();
    for id in ["a", "b", "c"] {
        client.set(id, Script::value(90.0));
    }
    let agg = aggregator(
        settings(2),
        vec![source("a"), source("b"), source("c")],
        client.clone(),
    );

    let first = agg.poll_round().await.unwrap();
    assert_eq!(first.value, 90.0);
    assert_eq!(first.contributors.len(), 3);

    client.set("b", Script::unreachable());
    client.set("c", Script::Invalid);

    match agg.poll_round().await {
        Err(AggregatorError::RoundFailed(failure)) => {
            assert_eq!(failure.round, 2);
            assert_eq!(
                failure.error,
                RoundError::QuorumLost {
                    stage: QuorumStage::Fetch,
                    required: 2,
                    available: 1,
                }
            );
            assert_eq!(failure.readings.len(), 1);
            assert_eq!(failure.readings[0].source, "a");
            assert!(matches!(
                failure.failures["b"],
                FetchError::Unreachable(_)
            ));
            assert!(matches!(
                failure.failures["c"],
                FetchError::InvalidResponse(_)
            ));
        }
        other => panic!("expected round failure, got {:?}", other),
    }

    // Previous aggregate is still served
    assert_eq!(agg.latest().unwrap().round, first.round);
}

#[tokio::test(start_paused = true)]
async fn test_equal_readings_ignore_weights() {
    let client = ScriptedClient::new();
    for id in ["a", "b", "c"] {
        client.set(id, Script::value(87.5));
    }
    let agg = aggregator(
        settings(3),
        vec![
            source("a").with_weight(9.0),
            source("b").with_weight(0.0),
            source("c").with_weight(0.25),
        ],
        client,
    );

    let data = agg.poll_round().await.unwrap();
    assert_eq!(data.value, 87.5);
    assert!(data.outliers.is_empty());
}

#[tokio::test(start_paused = true)]
async fn test_outlier_excluded_and_recorded() {
    let client = ScriptedClient::new();
    client.set("a", Script::value(10.0));
    client.set("b", Script::value(10.1));
    client.set("c", Script::value(9.9));
    client.set("d", Script::value(1000.0));

    let agg = aggregator(
        settings(3),
        vec![source("a"), source("b"), source("c"), source("d")],
        client,
    );

    let data = agg.poll_round().await.unwrap();
    assert_eq!(data.value, 10.0);
    assert_eq!(data.outliers, vec!["d"]);
    assert_eq!(data.contributors, vec!["a", "b", "c"]);
    assert!(!data.readings.contains_key("d"));
    assert_eq!(data.readings["b"].value, 10.1);

    let status = agg.status();
    assert_eq!(status["a"].health, NodeHealth::Healthy);
    assert_eq!(status["a"].last_value, Some(10.0));
    assert_eq!(status["d"].health, NodeHealth::Degraded);
    assert!(matches!(
        status["d"].last_failure,
        Some(FailureReason::Outlier { value, .. }) if value == 1000.0
    ));
}

#[tokio::test(start_paused = true)]
async fn test_quorum_lost_to_outliers_is_distinct() {
    let client = ScriptedClient::new();
    client.set("a", Script::value(10.0));
    client.set("b", Script::value(10.2));
    client.set("c", Script::value(50.0));

    let agg = aggregator(
        settings(3),
        vec![source("a"), source("b"), source("c")],
        client,
    );
    let mut events = agg.subscribe();

    let failure = match agg.poll_round().await {
        Err(AggregatorError::RoundFailed(failure)) => failure,
        other => panic!("expected round failure, got {:?}", other),
    };
    assert_eq!(
        failure.error,
        RoundError::QuorumLost {
            stage: QuorumStage::OutlierRejection,
            required: 3,
            available: 2,
        }
    );
    assert_eq!(failure.outliers, vec!["c"]);
    assert_eq!(failure.readings.len(), 3);

    match events.recv().await.unwrap() {
        RoundEvent::Failed(event) => assert_eq!(event.round, failure.round),
        other => panic!("expected failed event, got {:?}", other),
    }
    assert!(agg.latest().is_none());
    assert_eq!(agg.state(), AggregatorState::Published);
}

#[tokio::test(start_paused = true)]
async fn test_timeout_then_recovery() {
    let client = ScriptedClient::new();
    client.set("a", Script::value(90.0));
    client.set("slow", Script::slow(90.0, Duration::from_secs(10)));

    let agg = aggregator(settings(1), vec![source("a"), source("slow")], client.clone());

    let data = agg.poll_round().await.unwrap();
    assert_eq!(data.contributors, vec!["a"]);
    assert_eq!(
        data.failures["slow"],
        FetchError::Timeout {
            after: Duration::from_secs(1)
        }
    );

    let status = agg.status();
    assert_eq!(status["slow"].health, NodeHealth::Degraded);
    assert_eq!(status["slow"].consecutive_failures, 1);

    client.set("slow", Script::value(91.0));
    agg.poll_round().await.unwrap();

    let status = agg.status();
    assert_eq!(status["slow"].health, NodeHealth::Healthy);
    assert_eq!(status["slow"].consecutive_failures, 0);
    assert_eq!(status["slow"].last_value, Some(91.0));
}

#[tokio::test(start_paused = true)]
async fn test_round_deadline_caps_source_timeout() {
    let client = ScriptedClient::new();
    client.set("a", Script::value(90.0));
    client.set("lagging", Script::slow(90.0, Duration::from_secs(30)));

    let agg = aggregator(
        settings(1),
        vec![
            source("a"),
            source("lagging").with_timeout(Duration::from_secs(4)),
        ],
        client,
    );

    let started = tokio::time::Instant::now();
    let data = agg.poll_round().await.unwrap();

    // Round deadline is 2s, below the source's own 4s timeout
    let elapsed = started.elapsed();
    assert!(elapsed >= Duration::from_secs(2) && elapsed < Duration::from_secs(3));
    assert_eq!(
        data.failures["lagging"],
        FetchError::Timeout {
            after: Duration::from_secs(2)
        }
    );
}

#[tokio::test(start_paused = true)]
async fn test_health_degrades_to_unreachable() {
    let client = ScriptedClient::new();
    client.set("a", Script::value(90.0));
    client.set("down", Script::unreachable());

    let agg = aggregator(settings(1), vec![source("a"), source("down")], client);

    let mut seen = Vec::new();
    for _ in 0..5 {
        agg.poll_round().await.unwrap();
        seen.push(agg.status()["down"].health);
    }

    assert_eq!(
        seen,
        vec![
            NodeHealth::Degraded,
            NodeHealth::Degraded,
            NodeHealth::Degraded,
            NodeHealth::Unreachable,
            NodeHealth::Unreachable,
        ]
    );
}

#[tokio::test(start_paused = true)]
async fn test_disabled_source_not_polled() {
    let client = ScriptedClient::new();
    client.set("a", Script::value(90.0));
    client.set("off", Script::value(10.0));

    let agg = aggregator(
        settings(1),
        vec![source("a"), source("off").disabled()],
        client.clone(),
    );

    let data = agg.poll_round().await.unwrap();
    assert_eq!(client.calls("off"), 0);
    assert!(!data.failures.contains_key("off"));

    let status = agg.status();
    assert!(!status["off"].enabled);
    assert_eq!(status["off"].health, NodeHealth::Healthy);
}

#[tokio::test(start_paused = true)]
async fn test_consensus_threshold() {
    let client = ScriptedClient::new();
    client.set("a", Script::value(72.0));

    let mut s = settings(1);
    s.consensus_threshold = Some(80.0);
    let agg = aggregator(s, vec![source("a")], client.clone());

    assert!(!agg.poll_round().await.unwrap().consensus_reached);

    client.set("a", Script::value(80.0));
    assert!(agg.poll_round().await.unwrap().consensus_reached);
}

#[tokio::test(start_paused = true)]
async fn test_scheduler_publishes_each_interval() {
    let client = ScriptedClient::new();
    client.set("a", Script::value(90.0));

    let agg = aggregator(settings(1), vec![source("a")], client.clone());
    let mut events = agg.subscribe();
    agg.start().unwrap();

    let started = tokio::time::Instant::now();
    for expected in 1..=3 {
        let event = events.recv().await.unwrap();
        assert_eq!(event.round(), expected);
    }

    // Rounds fire at 0s, 5s and 10s
    assert!(started.elapsed() >= Duration::from_secs(10));
    assert_eq!(client.calls("a"), 3);

    agg.stop();
    assert_eq!(agg.state(), AggregatorState::Idle);
}
