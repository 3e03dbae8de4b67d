//! Transport layer for broker communication
//!
//! This module provides the broker abstraction the connection manager drives and
//! the AMQP implementation backed by `lapin`.

use crate::config::BrokerEndpoint;
use crate::events::OutboundEvent;
use crate::topology::ExchangeSpec;
use thiserror::Error;

pub mod amqp;

pub type BoxError = Box<dyn std::error::Error + Send + Sync>;

/// Broker transport errors
#[derive(Debug, Error)]
pub enum TransportError {
    #[error("Invalid broker URI: {0}")]
    InvalidUri(String),
    #[error("Connection failed")]
    Connection(#[source] BoxError),
    #[error("Channel error")]
    Channel(#[source] BoxError),
    #[error("Broker rejected declaration: {0}")]
    PreconditionFailed(String),
    #[error("Publishing failed")]
    Publish(#[source] BoxError),
    #[error("Close failed")]
    Close(#[source] BoxError),
}

impl TransportError {
    /// Build a connection error from a plain message
    pub fn connection<S: Into<String>>(message: S) -> Self {
        Self::Connection(message.into().into())
    }

    /// Build a publish error from a plain message
    pub fn publish<S: Into<String>>(message: S) -> Self {
        Self::Publish(message.into().into())
    }
}

/// Opens sessions against a broker endpoint
///
/// One call equals one connection attempt. Implementations must not retry
/// internally; the connection manager owns the retry schedule.
#[async_trait::async_trait]
pub trait BrokerConnector: Send + Sync {
    /// Open a connection and a channel on it
    async fn connect(
        &self,
        endpoint: &BrokerEndpoint,
    ) -> Result<Box<dyn BrokerSession>, TransportError>;
}

/// An open connection plus channel to the broker
///
/// Sessions are not assumed to be safe for concurrent writers; the connection
/// manager serializes every call behind a mutex.
#[async_trait::async_trait]
pub trait BrokerSession: Send {
    /// Declare an exchange; identical redeclaration must succeed
    async fn declare_exchange(&mut self, spec: &ExchangeSpec) -> Result<(), TransportError>;

    /// Submit one message. Must not wait for broker acknowledgment.
    async fn publish(&mut self, exchange: &str, event: &OutboundEvent)
        -> Result<(), TransportError>;

    /// Close channel and connection
    async fn close(&mut self) -> Result<(), TransportError>;

    /// Whether the underlying connection still reports itself open
    fn is_open(&self) -> bool;
}
