//! Startup and shutdown through the lifecycle controller

use expense_events::config::MessagingConfig;
use expense_events::connection::{CloseOutcome, ConnectionState};
use expense_events::lifecycle::LifecycleController;
use expense_events::testing::MockConnector;
use serde_json::json;
use std::sync::Arc;
use std::time::Duration;
use tokio::time::Instant;

fn controller(connector: &MockConnector) -> (LifecycleController, expense_events::EventPublisher) {
    LifecycleController::with_connector(
        &MessagingConfig::default(),
        Arc::new(connector.clone()),
    )
}

#[tokio::test]
async fn test_shutdown_is_idempotent() {
    let connector = MockConnector::healthy();
    let broker = connector.broker();
    let (controller, _publisher) = controller(&connector);
    controller.startup().await.unwrap();

    assert_eq!(controller.shutdown().await, CloseOutcome::Closed);
    assert_eq!(controller.shutdown().await, CloseOutcome::NotConnected);
    assert_eq!(controller.state(), ConnectionState::Disconnected);
    assert_eq!(broker.close_calls(), 1);

    let snapshot = controller.manager().metrics().snapshot();
    assert_eq!(snapshot.closes, 1);
    assert!(!snapshot.connected);
}

#[tokio::test]
async fn test_shutdown_without_startup() {
    let connector = MockConnector::healthy();
    let (controller, _publisher) = controller(&connector);

    assert_eq!(controller.shutdown().await, CloseOutcome::NotConnected);
    assert_eq!(connector.attempt_count().await, 0);
}

#[tokio::test(start_paused = true)]
async fn test_hanging_close_is_bounded() {
    let connector = MockConnector::healthy();
    let broker = connector.broker();
    let (controller, _publisher) = controller(&connector);
    controller.startup().await.unwrap();
    broker.hang_on_close(true);

    let started = Instant::now();
    let outcome = controller.shutdown().await;
    let elapsed = started.elapsed();

    assert_eq!(outcome, CloseOutcome::TimedOut);
    assert!(elapsed >= Duration::from_secs(5));
    assert!(elapsed < Duration::from_secs(6));
    assert_eq!(controller.manager().metrics().snapshot().close_timeouts, 1);
}

#[tokio::test(start_paused = true)]
async fn test_close_deadline_covers_in_flight_publish() {
    let connector = MockConnector::healthy();
    let broker = connector.broker();
    let (controller, publisher) = controller(&connector);
    controller.startup().await.unwrap();
    broker.publish_delay(Duration::from_secs(60));

    let in_flight = tokio::spawn({
        let publisher = publisher.clone();
        async move {
            publisher.publish("expense.created", &json!({"id": "slow"})).await;
        }
    });
    tokio::time::sleep(Duration::from_millis(10)).await;

    let started = Instant::now();
    assert_eq!(controller.shutdown().await, CloseOutcome::TimedOut);
    assert!(started.elapsed() < Duration::from_secs(6));
    assert_eq!(broker.close_calls(), 0);

    // Once the slow publish lets go, the session is still closed
    in_flight.await.unwrap();
    for _ in 0..100 {
        if broker.close_calls() > 0 {
            break;
        }
        tokio::task::yield_now().await;
    }
    assert_eq!(broker.close_calls(), 1);
    assert_eq!(broker.published().await.len(), 1);
    assert_eq!(controller.shutdown().await, CloseOutcome::NotConnected);
}

#[tokio::test]
async fn test_publish_after_shutdown_is_dropped() {
    let connector = MockConnector::healthy();
    let broker = connector.broker();
    let (controller, publisher) = controller(&connector);
    controller.startup().await.unwrap();
    controller.shutdown().await;

    publisher.publish("expense.deleted", &json!({"id": "3"})).await;

    assert!(broker.published().await.is_empty());
    assert_eq!(
        controller.manager().metrics().snapshot().events_dropped_unavailable,
        1
    );
}

#[tokio::test(start_paused = true)]
async fn test_shutdown_during_startup_stops_retrying() {
    let connector = MockConnector::always_failing();
    let (controller, _publisher) = controller(&connector);

    let startup = controller.spawn_startup();
    tokio::time::sleep(Duration::from_secs(4)).await;
    assert_eq!(controller.shutdown().await, CloseOutcome::NotConnected);

    LifecycleController::join_startup(startup).await.unwrap();
    let attempts = connector.attempt_count().await;
    assert_eq!(controller.state(), ConnectionState::Disconnected);

    tokio::time::sleep(Duration::from_secs(300)).await;
    assert_eq!(connector.attempt_count().await, attempts);
}

#[tokio::test(start_paused = true)]
async fn test_shutdown_after_degradation_keeps_degraded() {
    let connector = MockConnector::always_failing();
    let (controller, _publisher) = controller(&connector);
    controller.startup().await.unwrap();

    assert_eq!(controller.shutdown().await, CloseOutcome::NotConnected);
    assert_eq!(controller.state(), ConnectionState::Degraded);
}
