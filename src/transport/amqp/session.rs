//! `lapin`-backed broker connector and session

use super::properties::{classify_declare_error, exchange_kind, message_properties};
use crate::config::BrokerEndpoint;
use crate::events::OutboundEvent;
use crate::topology::ExchangeSpec;
use crate::transport::{BrokerConnector, BrokerSession, TransportError};
use lapin::options::{BasicPublishOptions, ExchangeDeclareOptions};
use lapin::types::FieldTable;
use lapin::{Channel, Connection, ConnectionProperties};
use tracing::{debug, trace};

/// AMQP reply code for a normal shutdown
const REPLY_SUCCESS: u16 = 200;

/// Opens one `lapin` connection plus channel per call
#[derive(Debug, Clone, Default)]
pub struct AmqpConnector;

impl AmqpConnector {
    pub fn new() -> Self {
        Self
    }
}

#[async_trait::async_trait]
impl BrokerConnector for AmqpConnector {
    async fn connect(
        &self,
        endpoint: &BrokerEndpoint,
    ) -> Result<Box<dyn BrokerSession>, TransportError> {
        let uri = endpoint
            .amqp_uri()
            .map_err(|e| TransportError::InvalidUri(e.to_string()))?;

        let properties = ConnectionProperties::default()
            .with_connection_name(endpoint.connection_name().into());

        debug!(uri = %endpoint.redacted_uri(), "Opening AMQP connection");
        let connection = Connection::connect(&uri, properties)
            .await
            .map_err(|e| TransportError::Connection(Box::new(e)))?;

        let channel = match connection.create_channel().await {
            Ok(channel) => channel,
            Err(e) => {
                let _ = connection.close(REPLY_SUCCESS, "channel open failed").await;
                return Err(TransportError::Channel(Box::new(e)));
            }
        };

        debug!(channel_id = channel.id(), "AMQP channel opened");
        Ok(Box::new(AmqpSession::new(connection, channel)))
    }
}

/// One AMQP connection with a single publishing channel
pub struct AmqpSession {
    connection: Connection,
    channel: Channel,
}

impl AmqpSession {
    pub fn new(connection: Connection, channel: Channel) -> Self {
        Self {
            connection,
            channel,
        }
    }
}

impl std::fmt::Debug for AmqpSession {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("AmqpSession")
            .field("channel_id", &self.channel.id())
            .field("open", &self.is_open())
            .finish()
    }
}

#[async_trait::async_trait]
impl BrokerSession for AmqpSession {
    async fn declare_exchange(&mut self, spec: &ExchangeSpec) -> Result<(), TransportError> {
        let options = ExchangeDeclareOptions {
            durable: spec.durable,
            ..ExchangeDeclareOptions::default()
        };

        self.channel
            .exchange_declare(
                &spec.name,
                exchange_kind(spec.kind),
                options,
                FieldTable::default(),
            )
            .await
            .map_err(classify_declare_error)
    }

    async fn publish(
        &mut self,
        exchange: &str,
        event: &OutboundEvent,
    ) -> Result<(), TransportError> {
        // The returned confirm is dropped: delivery is best-effort and
        // publisher confirms are not enabled on this channel.
        self.channel
            .basic_publish(
                exchange,
                event.routing_key(),
                BasicPublishOptions::default(),
                event.body(),
                message_properties(event),
            )
            .await
            .map_err(|e| TransportError::Publish(Box::new(e)))?;

        trace!(
            exchange,
            routing_key = event.routing_key(),
            "AMQP frame written"
        );
        Ok(())
    }

    async fn close(&mut self) -> Result<(), TransportError> {
        if self.channel.status().connected() {
            if let Err(e) = self.channel.close(REPLY_SUCCESS, "OK").await {
                debug!(error = %e, "AMQP channel close failed, closing connection anyway");
            }
        }

        if !self.connection.status().connected() {
            return Ok(());
        }
        self.connection
            .close(REPLY_SUCCESS, "OK")
            .await
            .map_err(|e| TransportError::Close(Box::new(e)))
    }

    fn is_open(&self) -> bool {
        self.connection.status().connected() && self.channel.status().connected()
    }
}
