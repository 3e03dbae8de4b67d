//! Process-level wiring of the event publisher
//!
//! The controller owns the [`ConnectionManager`] for the life of the process:
//! it starts the connection sequence at boot, hands out [`EventPublisher`]
//! handles and performs the bounded close on shutdown.

use crate::config::MessagingConfig;
use crate::connection::{CloseOutcome, ConnectionManager, ConnectionState};
use crate::error::{display_chain, MessagingError, MessagingResult};
use crate::publisher::EventPublisher;
use crate::transport::amqp::AmqpConnector;
use crate::transport::BrokerConnector;
use std::sync::Arc;
use tokio::task::JoinHandle;
use tracing::{error, info, warn, Instrument};

/// Owns the broker connection between process start and shutdown
#[derive(Debug, Clone)]
pub struct LifecycleController {
    manager: Arc<ConnectionManager>,
}

impl LifecycleController {
    pub fn new(manager: Arc<ConnectionManager>) -> Self {
        Self { manager }
    }

    /// Build a controller backed by RabbitMQ
    ///
    /// Fails only on invalid configuration; the broker is not contacted until
    /// [`startup`](Self::startup).
    pub fn from_config(config: &MessagingConfig) -> MessagingResult<(Self, EventPublisher)> {
        config.validate()?;
        Ok(Self::with_connector(config, Arc::new(AmqpConnector::new())))
    }

    /// Build a controller over any connector
    pub fn with_connector(
        config: &MessagingConfig,
        connector: Arc<dyn BrokerConnector>,
    ) -> (Self, EventPublisher) {
        let manager = Arc::new(ConnectionManager::from_config(config, connector));
        let publisher = EventPublisher::new(Arc::clone(&manager));
        (Self::new(manager), publisher)
    }

    pub fn manager(&self) -> &Arc<ConnectionManager> {
        &self.manager
    }

    /// New publisher handle sharing this controller's connection
    pub fn publisher(&self) -> EventPublisher {
        EventPublisher::new(Arc::clone(&self.manager))
    }

    pub fn state(&self) -> ConnectionState {
        self.manager.state()
    }

    /// Run the connection sequence to completion
    ///
    /// Returns `Ok(())` when connected, degraded or interrupted by shutdown.
    /// Only a topology conflict is returned as an error.
    pub async fn startup(&self) -> MessagingResult<()> {
        let span = crate::lifecycle_span!(phase = "startup", exchange = %self.manager.exchange());
        async {
            info!("Starting event publisher");
            let result = self.manager.connect().await;
            match &result {
                Ok(()) => info!(state = %self.manager.state(), "Event publisher startup finished"),
                Err(e) if e.is_fatal() => {
                    error!(error = %display_chain(e), "Event publisher startup failed")
                }
                Err(e) => warn!(error = %display_chain(e), "Event publisher startup skipped"),
            }
            result
        }
        .instrument(span)
        .await
    }

    /// Run [`startup`](Self::startup) on a background task
    ///
    /// The service can accept requests while the broker is still being
    /// reached; publishes made in the meantime are dropped.
    pub fn spawn_startup(&self) -> JoinHandle<MessagingResult<()>> {
        let controller = self.clone();
        tokio::spawn(async move { controller.startup().await })
    }

    /// Await a task returned by [`spawn_startup`](Self::spawn_startup)
    pub async fn join_startup(handle: JoinHandle<MessagingResult<()>>) -> MessagingResult<()> {
        handle.await.map_err(|e| MessagingError::StartupTask {
            message: e.to_string(),
        })?
    }

    /// Stop retrying and close the broker session within the close deadline
    ///
    /// Idempotent; never fails.
    pub async fn shutdown(&self) -> CloseOutcome {
        let span = crate::lifecycle_span!(phase = "shutdown", state = %self.manager.state());
        async {
            info!("Shutting down event publisher");
            let outcome = self.manager.close().await;
            match outcome {
                CloseOutcome::Closed | CloseOutcome::NotConnected => {
                    info!(outcome = %outcome, "Event publisher shut down")
                }
                CloseOutcome::TimedOut | CloseOutcome::Failed => {
                    warn!(outcome = %outcome, "Event publisher shut down uncleanly")
                }
            }
            outcome
        }
        .instrument(span)
        .await
    }

    /// Resolve when the process receives SIGINT or SIGTERM
    pub async fn wait_for_termination() -> std::io::Result<()> {
        #[cfg(unix)]
        {
            use tokio::signal::unix::{signal, SignalKind};

            let mut sigint = signal(SignalKind::interrupt())?;
            let mut sigterm = signal(SignalKind::terminate())?;
            tokio::select! {
                _ = sigint.recv() => info!("Received SIGINT, shutting down gracefully..."),
                _ = sigterm.recv() => info!("Received SIGTERM, shutting down gracefully..."),
            }
        }

        #[cfg(not(unix))]
        {
            tokio::signal::ctrl_c().await?;
            info!("Received Ctrl-C, shutting down gracefully...");
        }

        Ok(())
    }

    /// Wait for a termination signal, then shut down
    pub async fn run_until_signal(&self) -> std::io::Result<CloseOutcome> {
        Self::wait_for_termination().await?;
        Ok(self.shutdown().await)
    }
}
