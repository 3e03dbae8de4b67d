//! Mock implementations for testing
//!
//! Provides an in-memory broker plus a connector whose failures can be
//! scripted, so the connection manager, publisher and lifecycle can be tested
//! without a running RabbitMQ.

use crate::config::BrokerEndpoint;
use crate::events::{topic_matches, OutboundEvent};
use crate::topology::ExchangeSpec;
use crate::transport::{BrokerConnector, BrokerSession, TransportError};
use async_trait::async_trait;
use serde_json::Value;
use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, AtomicU32, AtomicU64, AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::Mutex;
use tokio::time::Instant;
use uuid::Uuid;

/// A message as the mock broker received it
#[derive(Debug, Clone, PartialEq)]
pub struct PublishedMessage {
    pub exchange: String,
    pub routing_key: String,
    pub body: Vec<u8>,
    pub persistent: bool,
    pub message_id: Uuid,
}

impl PublishedMessage {
    /// Decode the body as JSON
    pub fn json(&self) -> serde_json::Result<Value> {
        serde_json::from_slice(&self.body)
    }
}

#[derive(Debug, Default)]
struct BrokerState {
    exchanges: Mutex<HashMap<String, ExchangeSpec>>,
    declarations: Mutex<Vec<ExchangeSpec>>,
    published: Mutex<Vec<PublishedMessage>>,
    fail_declarations: AtomicBool,
    fail_publishes: AtomicBool,
    hang_on_close: AtomicBool,
    connection_dropped: AtomicBool,
    publish_delay_ms: AtomicU64,
    close_calls: AtomicUsize,
    in_flight: AtomicBool,
    overlap: AtomicBool,
}

/// In-memory broker shared by every session it opens
#[derive(Debug, Clone, Default)]
pub struct MockBroker {
    state: Arc<BrokerState>,
}

impl MockBroker {
    pub fn new() -> Self {
        Self::default()
    }

    /// Open a session directly, bypassing any connector
    pub fn open_session(&self) -> Box<dyn BrokerSession> {
        Box::new(MockSession {
            broker: self.clone(),
            closed: false,
        })
    }

    /// Register an exchange as if another service had declared it first
    pub async fn preexisting_exchange(&self, spec: ExchangeSpec) {
        self.state
            .exchanges
            .lock()
            .await
            .insert(spec.name.clone(), spec);
    }

    /// Successful declarations, in order
    pub async fn declarations(&self) -> Vec<ExchangeSpec> {
        self.state.declarations.lock().await.clone()
    }

    pub async fn published(&self) -> Vec<PublishedMessage> {
        self.state.published.lock().await.clone()
    }

    /// Messages a queue bound with `pattern` would receive
    pub async fn messages_matching(&self, pattern: &str) -> Vec<PublishedMessage> {
        self.state
            .published
            .lock()
            .await
            .iter()
            .filter(|message| topic_matches(pattern, &message.routing_key))
            .cloned()
            .collect()
    }

    pub fn fail_declarations(&self, fail: bool) {
        self.state.fail_declarations.store(fail, Ordering::SeqCst);
    }

    pub fn fail_publishes(&self, fail: bool) {
        self.state.fail_publishes.store(fail, Ordering::SeqCst);
    }

    /// Make `close` never complete
    pub fn hang_on_close(&self, hang: bool) {
        self.state.hang_on_close.store(hang, Ordering::SeqCst);
    }

    /// Simulate the broker dropping every open connection
    pub fn drop_connection(&self, dropped: bool) {
        self.state.connection_dropped.store(dropped, Ordering::SeqCst);
    }

    /// Hold every publish for `delay` before recording it
    pub fn publish_delay(&self, delay: Duration) {
        self.state
            .publish_delay_ms
            .store(delay.as_millis() as u64, Ordering::SeqCst);
    }

    pub fn close_calls(&self) -> usize {
        self.state.close_calls.load(Ordering::SeqCst)
    }

    /// Whether two publishes were ever in flight at the same time
    pub fn overlap_detected(&self) -> bool {
        self.state.overlap.load(Ordering::SeqCst)
    }
}

/// Session handed out by [`MockBroker`]
#[derive(Debug)]
pub struct MockSession {
    broker: MockBroker,
    closed: bool,
}

#[async_trait]
impl BrokerSession for MockSession {
    async fn declare_exchange(&mut self, spec: &ExchangeSpec) -> Result<(), TransportError> {
        let state = &self.broker.state;
        if state.fail_declarations.load(Ordering::SeqCst) {
            return Err(TransportError::Channel("mock declaration failure".into()));
        }

        let mut exchanges = state.exchanges.lock().await;
        if let Some(existing) = exchanges.get(&spec.name) {
            if existing != spec {
                return Err(TransportError::PreconditionFailed(format!(
                    "PRECONDITION_FAILED - inequivalent arg for exchange '{}': existing {existing}",
                    spec.name
                )));
            }
        }
        exchanges.insert(spec.name.clone(), spec.clone());
        drop(exchanges);

        state.declarations.lock().await.push(spec.clone());
        Ok(())
    }

    async fn publish(
        &mut self,
        exchange: &str,
        event: &OutboundEvent,
    ) -> Result<(), TransportError> {
        let state = &self.broker.state;
        if self.closed || state.connection_dropped.load(Ordering::SeqCst) {
            return Err(TransportError::Channel("mock connection closed".into()));
        }

        if state.in_flight.swap(true, Ordering::SeqCst) {
            state.overlap.store(true, Ordering::SeqCst);
        }
        tokio::task::yield_now().await;
        let delay_ms = state.publish_delay_ms.load(Ordering::SeqCst);
        if delay_ms > 0 {
            tokio::time::sleep(Duration::from_millis(delay_ms)).await;
        }

        let result = if state.fail_publishes.load(Ordering::SeqCst) {
            Err(TransportError::publish("mock publish failure"))
        } else {
            state.published.lock().await.push(PublishedMessage {
                exchange: exchange.to_string(),
                routing_key: event.routing_key().to_string(),
                body: event.body().to_vec(),
                persistent: event.is_persistent(),
                message_id: event.message_id(),
            });
            Ok(())
        };

        state.in_flight.store(false, Ordering::SeqCst);
        result
    }

    async fn close(&mut self) -> Result<(), TransportError> {
        let state = &self.broker.state;
        state.close_calls.fetch_add(1, Ordering::SeqCst);
        if state.hang_on_close.load(Ordering::SeqCst) {
            std::future::pending::<()>().await;
        }
        self.closed = true;
        Ok(())
    }

    fn is_open(&self) -> bool {
        !self.closed && !self.broker.state.connection_dropped.load(Ordering::SeqCst)
    }
}

/// Connector whose connection attempts fail a scripted number of times
#[derive(Debug, Clone)]
pub struct MockConnector {
    broker: MockBroker,
    failures_remaining: Arc<AtomicU32>,
    hang: bool,
    attempts: Arc<Mutex<Vec<Instant>>>,
    endpoints: Arc<Mutex<Vec<BrokerEndpoint>>>,
}

impl MockConnector {
    fn with_failures(failures: u32) -> Self {
        Self {
            broker: MockBroker::new(),
            failures_remaining: Arc::new(AtomicU32::new(failures)),
            hang: false,
            attempts: Arc::new(Mutex::new(Vec::new())),
            endpoints: Arc::new(Mutex::new(Vec::new())),
        }
    }

    /// Every attempt succeeds
    pub fn healthy() -> Self {
        Self::with_failures(0)
    }

    /// Every attempt fails with a connection error
    pub fn always_failing() -> Self {
        Self::with_failures(u32::MAX)
    }

    /// The first `failures` attempts fail, later ones succeed
    pub fn failing_times(failures: u32) -> Self {
        Self::with_failures(failures)
    }

    /// Every attempt hangs, like a blackholed TCP handshake
    pub fn hanging() -> Self {
        Self {
            hang: true,
            ..Self::with_failures(0)
        }
    }

    /// Broker behind this connector
    pub fn broker(&self) -> MockBroker {
        self.broker.clone()
    }

    /// Time of each connection attempt
    pub async fn attempts(&self) -> Vec<Instant> {
        self.attempts.lock().await.clone()
    }

    pub async fn attempt_count(&self) -> usize {
        self.attempts.lock().await.len()
    }

    /// Endpoints passed to each attempt
    pub async fn endpoints(&self) -> Vec<BrokerEndpoint> {
        self.endpoints.lock().await.clone()
    }
}

#[async_trait]
impl BrokerConnector for MockConnector {
    async fn connect(
        &self,
        endpoint: &BrokerEndpoint,
    ) -> Result<Box<dyn BrokerSession>, TransportError> {
        self.attempts.lock().await.push(Instant::now());
        self.endpoints.lock().await.push(endpoint.clone());
        if self.hang {
            std::future::pending::<()>().await;
        }

        let failing = self
            .failures_remaining
            .fetch_update(Ordering::SeqCst, Ordering::SeqCst, |remaining| {
                match remaining {
                    0 => None,
                    u32::MAX => Some(u32::MAX),
                    n => Some(n - 1),
                }
            })
            .is_ok();

        if failing {
            return Err(TransportError::connection(
                "connection refused (os error 111)",
            ));
        }
        Ok(self.broker.open_session())
    }
}
