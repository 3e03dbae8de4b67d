//! Fire-and-forget event publisher
//!
//! [`EventPublisher`] is the handle request handlers hold. Every call is
//! best-effort: when the broker is unavailable, or the write fails, the event is
//! logged and dropped. Nothing is returned to the caller, nothing is queued.

use crate::connection::{ConnectionManager, ConnectionState, SubmitOutcome};
use crate::error::display_chain;
use crate::events::{ExpenseEventKind, OutboundEvent};
use serde::Serialize;
use std::sync::Arc;
use tracing::{debug, error, warn, Instrument};

/// Cloneable publishing handle backed by a shared [`ConnectionManager`]
#[derive(Debug, Clone)]
pub struct EventPublisher {
    manager: Arc<ConnectionManager>,
}

impl EventPublisher {
    pub fn new(manager: Arc<ConnectionManager>) -> Self {
        Self { manager }
    }

    pub fn manager(&self) -> &Arc<ConnectionManager> {
        &self.manager
    }

    /// Current connection state, for readiness reporting
    pub fn state(&self) -> ConnectionState {
        self.manager.state()
    }

    /// Publish `payload` as JSON under `routing_key`
    ///
    /// Returns once the message is handed to the connection, without waiting
    /// for the broker to acknowledge it. Never fails.
    pub async fn publish<T>(&self, routing_key: &str, payload: &T)
    where
        T: Serialize + ?Sized,
    {
        let metrics = self.manager.metrics();

        let state = self.manager.state();
        if !state.can_publish() {
            metrics.event_dropped();
            warn!(
                routing_key,
                state = %state,
                "Broker unavailable, dropping event"
            );
            return;
        }

        let event = match OutboundEvent::new(routing_key, payload) {
            Ok(event) => event,
            Err(e) => {
                metrics.event_rejected();
                error!(
                    routing_key,
                    error = %display_chain(&e),
                    "Event rejected before publishing"
                );
                return;
            }
        };

        let span = crate::publish_span!(
            routing_key = %event.routing_key(),
            message_id = %event.message_id()
        );
        self.submit(event).instrument(span).await;
    }

    /// Publish an expense lifecycle event under its standard routing key
    pub async fn publish_expense<T>(&self, kind: ExpenseEventKind, payload: &T)
    where
        T: Serialize + ?Sized,
    {
        self.publish(kind.routing_key(), payload).await;
    }

    /// Publish on a background task and return immediately
    ///
    /// Outside a tokio runtime the event is dropped with a warning.
    pub fn publish_detached<K, T>(&self, routing_key: K, payload: T)
    where
        K: Into<String>,
        T: Serialize + Send + Sync + 'static,
    {
        let routing_key = routing_key.into();
        match tokio::runtime::Handle::try_current() {
            Ok(handle) => {
                let publisher = self.clone();
                handle.spawn(async move {
                    publisher.publish(&routing_key, &payload).await;
                });
            }
            Err(_) => {
                self.manager.metrics().event_dropped();
                warn!(
                    routing_key = %routing_key,
                    "No async runtime available, dropping event"
                );
            }
        }
    }

    async fn submit(&self, event: OutboundEvent) {
        let metrics = self.manager.metrics();

        match self.manager.submit(&event).await {
            SubmitOutcome::Sent => {
                metrics.event_published();
                debug!(bytes = event.body().len(), "Event published");
            }
            SubmitOutcome::Unavailable(state) => {
                metrics.event_dropped();
                warn!(state = %state, "Broker session closed before publish, dropping event");
            }
            SubmitOutcome::Failed(e) => {
                metrics.publish_failed();
                error!(error = %display_chain(&e), "Publishing failed, dropping event");
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::BrokerEndpoint;
    use crate::connection::{RetryPolicy, DEFAULT_CLOSE_TIMEOUT};
    use crate::testing::MockConnector;
    use serde_json::json;

    fn publisher(connector: MockConnector) -> EventPublisher {
        let manager = ConnectionManager::new(
            BrokerEndpoint::new("amqp://localhost", "/", "expenses_exchange"),
            RetryPolicy::default(),
            DEFAULT_CLOSE_TIMEOUT,
            Arc::new(connector),
        );
        EventPublisher::new(Arc::new(manager))
    }

    #[tokio::test]
    async fn test_publish_while_disconnected_is_dropped() {
        let connector = MockConnector::healthy();
        let broker = connector.broker();
        let publisher = publisher(connector);

        publisher
            .publish("expense.created", &json!({"id": "42"}))
            .await;

        assert!(broker.published().await.is_empty());
        assert_eq!(
            publisher.manager().metrics().snapshot().events_dropped_unavailable,
            1
        );
    }

    #[tokio::test]
    async fn test_publish_expense_uses_standard_key() {
        let connector = MockConnector::healthy();
        let broker = connector.broker();
        let publisher = publisher(connector);
        publisher.manager().connect().await.unwrap();

        publisher
            .publish_expense(ExpenseEventKind::Exported, &json!({"id": "7"}))
            .await;

        let published = broker.published().await;
        assert_eq!(published.len(), 1);
        assert_eq!(published[0].routing_key, "expense.exported");
        assert_eq!(published[0].exchange, "expenses_exchange");
    }

    #[tokio::test]
    async fn test_oversized_routing_key_is_rejected_not_raised() {
        let connector = MockConnector::healthy();
        let broker = connector.broker();
        let publisher = publisher(connector);
        publisher.manager().connect().await.unwrap();

        publisher.publish(&"k".repeat(256), &json!({})).await;

        assert!(broker.published().await.is_empty());
        assert_eq!(publisher.manager().metrics().snapshot().events_rejected, 1);
    }

    #[tokio::test]
    async fn test_keys_legal_on_topic_exchange_are_published() {
        let connector = MockConnector::healthy();
        let broker = connector.broker();
        let publisher = publisher(connector);
        publisher.manager().connect().await.unwrap();

        publisher.publish("expense..created", &json!({})).await;
        publisher.publish("", &json!({})).await;

        let keys: Vec<String> = broker
            .published()
            .await
            .into_iter()
            .map(|message| message.routing_key)
            .collect();
        assert_eq!(keys, vec!["expense..created".to_string(), String::new()]);
        assert_eq!(publisher.manager().metrics().snapshot().events_rejected, 0);
    }

    #[tokio::test]
    async fn test_transport_failure_is_absorbed() {
        let connector = MockConnector::healthy();
        let broker = connector.broker();
        let publisher = publisher(connector);
        publisher.manager().connect().await.unwrap();

        broker.fail_publishes(true);
        publisher.publish("expense.updated", &json!({"id": "1"})).await;

        assert!(broker.published().await.is_empty());
        let snapshot = publisher.manager().metrics().snapshot();
        assert_eq!(snapshot.publish_failures, 1);
        assert!(publisher.manager().is_connected());

        broker.fail_publishes(false);
        publisher.publish("expense.updated", &json!({"id": "1"})).await;
        assert_eq!(broker.published().await.len(), 1);
    }

    #[tokio::test]
    async fn test_publish_detached_delivers() {
        let connector = MockConnector::healthy();
        let broker = connector.broker();
        let publisher = publisher(connector);
        publisher.manager().connect().await.unwrap();

        publisher.publish_detached("expense.deleted", json!({"id": "9"}));

        for _ in 0..100 {
            if !broker.published().await.is_empty() {
                break;
            }
            tokio::task::yield_now().await;
        }
        let published = broker.published().await;
        assert_eq!(published.len(), 1);
        assert_eq!(published[0].routing_key, "expense.deleted");
    }

    #[test]
    fn test_publish_detached_without_runtime_drops() {
        let publisher = publisher(MockConnector::healthy());
        publisher.publish_detached("expense.created", json!({}));
        assert_eq!(
            publisher.manager().metrics().snapshot().events_dropped_unavailable,
            1
        );
    }
}
