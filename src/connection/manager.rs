//! Broker connection manager
//!
//! Owns the single broker session, runs the startup retry loop and guards the
//! session behind a mutex so concurrent publishers never interleave writes.

use super::retry::{RetryDecision, RetryPolicy};
use super::state::{log_state_transition, ConnectionEvent, ConnectionState};
use crate::config::{BrokerEndpoint, MessagingConfig};
use crate::error::{display_chain, MessagingError, MessagingResult};
use crate::events::OutboundEvent;
use crate::observability::metrics::MessagingMetrics;
use crate::topology::{ExchangeSpec, TopologyDeclarator, TopologyError};
use crate::transport::{BrokerConnector, BrokerSession, TransportError};
use std::fmt;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::{watch, Mutex};
use tokio::time::Instant;
use tracing::{debug, error, info, warn, Instrument};

/// Default deadline for closing the broker session
pub const DEFAULT_CLOSE_TIMEOUT: Duration = Duration::from_secs(5);

/// Result of submitting one event to the session
#[derive(Debug)]
pub enum SubmitOutcome {
    /// Handed to the broker connection
    Sent,
    /// No session available; nothing was written
    Unavailable(ConnectionState),
    /// The write itself failed
    Failed(TransportError),
}

/// Result of closing the session
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CloseOutcome {
    /// Session closed cleanly
    Closed,
    /// Nothing to close
    NotConnected,
    /// Deadline hit; the connection was abandoned
    TimedOut,
    /// Broker returned an error while closing; the session is dropped anyway
    Failed,
}

impl fmt::Display for CloseOutcome {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let label = match self {
            CloseOutcome::Closed => "closed",
            CloseOutcome::NotConnected => "not connected",
            CloseOutcome::TimedOut => "timed out",
            CloseOutcome::Failed => "failed",
        };
        f.write_str(label)
    }
}

enum AttemptError {
    Retryable(TransportError),
    Fatal(TopologyError),
    ShutdownRequested,
}

/// Supervises the broker connection for the lifetime of the process
pub struct ConnectionManager {
    endpoint: BrokerEndpoint,
    exchange: ExchangeSpec,
    policy: RetryPolicy,
    close_timeout: Duration,
    connector: Arc<dyn BrokerConnector>,
    declarator: TopologyDeclarator,
    session: Arc<Mutex<Option<Box<dyn BrokerSession>>>>,
    state_tx: watch::Sender<ConnectionState>,
    shutdown_tx: watch::Sender<bool>,
    started: AtomicBool,
    metrics: MessagingMetrics,
}

impl ConnectionManager {
    pub fn new(
        endpoint: BrokerEndpoint,
        policy: RetryPolicy,
        close_timeout: Duration,
        connector: Arc<dyn BrokerConnector>,
    ) -> Self {
        let exchange = ExchangeSpec::durable_topic(endpoint.exchange());
        let (state_tx, _) = watch::channel(ConnectionState::Disconnected);
        let (shutdown_tx, _) = watch::channel(false);

        Self {
            endpoint,
            exchange,
            policy,
            close_timeout,
            connector,
            declarator: TopologyDeclarator::new(),
            session: Arc::new(Mutex::new(None)),
            state_tx,
            shutdown_tx,
            started: AtomicBool::new(false),
            metrics: MessagingMetrics::new(),
        }
    }

    pub fn from_config(config: &MessagingConfig, connector: Arc<dyn BrokerConnector>) -> Self {
        Self::new(
            config.endpoint(),
            config.retry_policy(),
            config.close_timeout(),
            connector,
        )
    }

    pub fn endpoint(&self) -> &BrokerEndpoint {
        &self.endpoint
    }

    pub fn exchange(&self) -> &ExchangeSpec {
        &self.exchange
    }

    pub fn retry_policy(&self) -> &RetryPolicy {
        &self.policy
    }

    pub fn metrics(&self) -> &MessagingMetrics {
        &self.metrics
    }

    pub fn state(&self) -> ConnectionState {
        *self.state_tx.borrow()
    }

    pub fn is_connected(&self) -> bool {
        self.state().can_publish()
    }

    pub fn is_degraded(&self) -> bool {
        self.state().is_terminal()
    }

    /// Watch state transitions
    pub fn subscribe(&self) -> watch::Receiver<ConnectionState> {
        self.state_tx.subscribe()
    }

    pub fn shutdown_requested(&self) -> bool {
        *self.shutdown_tx.borrow()
    }

    fn apply(&self, event: ConnectionEvent) -> ConnectionState {
        let mut transition = None;
        self.state_tx.send_if_modified(|state| {
            let next = state.next(event);
            if next == *state {
                return false;
            }
            transition = Some((*state, next));
            *state = next;
            true
        });
        if let Some((from, to)) = transition {
            log_state_transition(&from, &to);
        }
        self.state()
    }

    /// Run the startup connection sequence
    ///
    /// Connection failures never surface as errors: after the retry budget is
    /// spent the manager is `Degraded` and this returns `Ok(())`. Only a
    /// topology conflict (misconfigured deployment) is returned as an error.
    /// May be called once per manager.
    pub async fn connect(&self) -> MessagingResult<()> {
        if self.started.swap(true, Ordering::SeqCst) {
            warn!("Broker connection sequence already started, ignoring second call");
            return Err(MessagingError::AlreadyStarted);
        }

        let span = crate::broker_span!(
            exchange = %self.endpoint.exchange(),
            uri = %self.endpoint.redacted_uri()
        );
        self.run_startup().instrument(span).await
    }

    async fn run_startup(&self) -> MessagingResult<()> {
        let mut shutdown_rx = self.shutdown_tx.subscribe();
        let max_attempts = self.policy.max_attempts;
        let mut failed_attempts = 0u32;

        info!(max_attempts, "Connecting to broker");

        loop {
            let shutdown_requested = *shutdown_rx.borrow();
            match self.policy.decide(failed_attempts, shutdown_requested) {
                RetryDecision::Proceed { attempt, delay } => {
                    if !delay.is_zero() {
                        info!(
                            attempt,
                            max_attempts,
                            delay_ms = delay.as_millis() as u64,
                            "Retrying broker connection after delay"
                        );
                        if !interruptible_sleep(&mut shutdown_rx, delay).await {
                            info!("Shutdown requested during connection backoff");
                            self.apply(ConnectionEvent::Aborted);
                            return Ok(());
                        }
                    }

                    self.apply(ConnectionEvent::AttemptStarted(attempt));
                    self.metrics.connection_attempt();

                    match self.try_establish().await {
                        Ok(()) => {
                            info!(attempt, "Connected to broker");
                            return Ok(());
                        }
                        Err(AttemptError::Retryable(e)) => {
                            failed_attempts = attempt;
                            self.metrics.connection_failed();
                            warn!(
                                attempt,
                                max_attempts,
                                error = %display_chain(&e),
                                "Broker connection attempt failed"
                            );
                        }
                        Err(AttemptError::Fatal(e)) => {
                            self.metrics.connection_failed();
                            self.apply(ConnectionEvent::AttemptsExhausted);
                            error!(
                                error = %display_chain(&e),
                                "Exchange topology conflict, messaging disabled"
                            );
                            return Err(MessagingError::Topology(e));
                        }
                        Err(AttemptError::ShutdownRequested) => {
                            info!("Shutdown requested while connecting, session discarded");
                            self.apply(ConnectionEvent::Aborted);
                            return Ok(());
                        }
                    }
                }
                RetryDecision::GiveUp => {
                    self.apply(ConnectionEvent::AttemptsExhausted);
                    warn!(
                        attempts = failed_attempts,
                        "Broker unreachable after all attempts, continuing without messaging"
                    );
                    return Ok(());
                }
                RetryDecision::AbortShutdownRequested => {
                    info!("Shutdown requested before connecting");
                    self.apply(ConnectionEvent::Aborted);
                    return Ok(());
                }
            }
        }
    }

    async fn try_establish(&self) -> Result<(), AttemptError> {
        let attempt_timeout = self.policy.attempt_timeout;
        let session = match tokio::time::timeout(attempt_timeout, self.open_session()).await {
            Ok(result) => result?,
            Err(_) => {
                return Err(AttemptError::Retryable(TransportError::connection(format!(
                    "connection attempt timed out after {} ms",
                    attempt_timeout.as_millis()
                ))))
            }
        };

        let mut guard = self.session.lock().await;
        if *self.shutdown_tx.borrow() {
            drop(guard);
            self.discard(session).await;
            return Err(AttemptError::ShutdownRequested);
        }
        *guard = Some(session);
        self.apply(ConnectionEvent::Established);
        self.metrics.connection_established();
        Ok(())
    }

    /// Connect and declare the exchange; the session is discarded on failure
    async fn open_session(&self) -> Result<Box<dyn BrokerSession>, AttemptError> {
        let mut session = self
            .connector
            .connect(&self.endpoint)
            .await
            .map_err(AttemptError::Retryable)?;

        if let Err(e) = self
            .declarator
            .ensure_exchange(session.as_mut(), &self.exchange)
            .await
        {
            self.discard(session).await;
            return Err(match e {
                TopologyError::Transport(inner) => AttemptError::Retryable(inner),
                conflict => AttemptError::Fatal(conflict),
            });
        }
        Ok(session)
    }

    async fn discard(&self, mut session: Box<dyn BrokerSession>) {
        match tokio::time::timeout(self.close_timeout, session.close()).await {
            Ok(Ok(())) => {}
            Ok(Err(e)) => debug!(error = %display_chain(&e), "Discarded session close failed"),
            Err(_) => debug!("Discarded session close timed out"),
        }
    }

    /// Close the session once an in-flight publish releases it
    fn spawn_deferred_close(&self) {
        let session = Arc::clone(&self.session);
        let close_timeout = self.close_timeout;
        tokio::spawn(async move {
            let Some(mut session) = session.lock().await.take() else {
                return;
            };
            match tokio::time::timeout(close_timeout, session.close()).await {
                Ok(Ok(())) => debug!("Deferred broker session close completed"),
                Ok(Err(e)) => debug!(error = %display_chain(&e), "Deferred session close failed"),
                Err(_) => debug!("Deferred session close timed out"),
            }
        });
    }

    /// Submit one event over the shared session
    ///
    /// Serialized with every other submission. Does not wait for broker
    /// acknowledgment.
    pub async fn submit(&self, event: &OutboundEvent) -> SubmitOutcome {
        let state = self.state();
        if !state.can_publish() {
            return SubmitOutcome::Unavailable(state);
        }

        let mut guard = self.session.lock().await;
        let Some(session) = guard.as_mut() else {
            return SubmitOutcome::Unavailable(self.state());
        };
        if !session.is_open() {
            return SubmitOutcome::Failed(TransportError::Channel(
                "broker session is no longer open".into(),
            ));
        }

        match session.publish(self.endpoint.exchange(), event).await {
            Ok(()) => SubmitOutcome::Sent,
            Err(e) => SubmitOutcome::Failed(e),
        }
    }

    /// Close the session within the close deadline
    ///
    /// Idempotent and infallible. Also stops an in-flight startup sequence.
    /// If an in-flight publish holds the session past the deadline, the
    /// session is closed in the background once that publish finishes.
    pub async fn close(&self) -> CloseOutcome {
        self.shutdown_tx.send_replace(true);

        let deadline = Instant::now() + self.close_timeout;
        let taken = match tokio::time::timeout_at(deadline, self.session.lock()).await {
            Ok(mut guard) => {
                // Under the lock, ordered after any establishing attempt
                let taken = guard.take();
                self.apply(ConnectionEvent::Closed);
                taken
            }
            Err(_) => {
                self.apply(ConnectionEvent::Closed);
                warn!(
                    timeout_ms = self.close_timeout.as_millis() as u64,
                    "Timed out waiting for in-flight publish, closing in background"
                );
                self.spawn_deferred_close();
                self.metrics.connection_closed(true);
                return CloseOutcome::TimedOut;
            }
        };

        let Some(mut session) = taken else {
            debug!("Close requested with no open broker session");
            return CloseOutcome::NotConnected;
        };

        let outcome = match tokio::time::timeout_at(deadline, session.close()).await {
            Ok(Ok(())) => {
                info!("Broker session closed");
                CloseOutcome::Closed
            }
            Ok(Err(e)) => {
                warn!(error = %display_chain(&e), "Broker session close failed, dropping it");
                CloseOutcome::Failed
            }
            Err(_) => {
                warn!(
                    timeout_ms = self.close_timeout.as_millis() as u64,
                    "Broker session close timed out, abandoning connection"
                );
                CloseOutcome::TimedOut
            }
        };
        drop(session);

        self.metrics
            .connection_closed(outcome == CloseOutcome::TimedOut);
        outcome
    }
}

impl fmt::Debug for ConnectionManager {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ConnectionManager")
            .field("endpoint", &self.endpoint.redacted_uri())
            .field("exchange", &self.exchange)
            .field("state", &self.state())
            .finish_non_exhaustive()
    }
}

/// Sleep for `delay` unless shutdown is signalled first
///
/// Returns true if the sleep completed, false if shutdown was requested.
async fn interruptible_sleep(shutdown_rx: &mut watch::Receiver<bool>, delay: Duration) -> bool {
    if *shutdown_rx.borrow() {
        return false;
    }

    let sleep = tokio::time::sleep(delay);
    tokio::pin!(sleep);

    loop {
        tokio::select! {
            _ = &mut sleep => return true,
            changed = shutdown_rx.changed() => {
                if changed.is_err() {
                    (&mut sleep).await;
                    return true;
                }
                if *shutdown_rx.borrow() {
                    return false;
                }
            }
        }
    }
}
