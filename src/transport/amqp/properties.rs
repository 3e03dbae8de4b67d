//! Pure mapping between our types and AMQP frame contents

use crate::events::{OutboundEvent, JSON_CONTENT_TYPE};
use crate::topology::ExchangeKind;
use crate::transport::TransportError;
use lapin::protocol::{AMQPErrorKind, AMQPSoftError};
use lapin::BasicProperties;

/// AMQP delivery mode for messages that survive a broker restart
pub const PERSISTENT: u8 = 2;

/// AMQP delivery mode for transient messages
pub const TRANSIENT: u8 = 1;

pub fn exchange_kind(kind: ExchangeKind) -> lapin::ExchangeKind {
    match kind {
        ExchangeKind::Direct => lapin::ExchangeKind::Direct,
        ExchangeKind::Fanout => lapin::ExchangeKind::Fanout,
        ExchangeKind::Topic => lapin::ExchangeKind::Topic,
        ExchangeKind::Headers => lapin::ExchangeKind::Headers,
    }
}

/// Message properties attached to every published event
pub fn message_properties(event: &OutboundEvent) -> BasicProperties {
    let delivery_mode = if event.is_persistent() {
        PERSISTENT
    } else {
        TRANSIENT
    };

    BasicProperties::default()
        .with_delivery_mode(delivery_mode)
        .with_content_type(JSON_CONTENT_TYPE.into())
        .with_message_id(event.message_id().to_string().into())
        .with_timestamp(event.amqp_timestamp())
}

/// Classify a failed `exchange.declare`
///
/// The broker answers a declaration whose parameters differ from the existing
/// exchange with a `PRECONDITION_FAILED` channel close. That is a deployment
/// conflict, not a transient fault.
pub fn classify_declare_error(error: lapin::Error) -> TransportError {
    if let lapin::Error::ProtocolError(ref amqp_error) = error {
        if amqp_error.kind() == &AMQPErrorKind::Soft(AMQPSoftError::PRECONDITIONFAILED) {
            return TransportError::PreconditionFailed(amqp_error.to_string());
        }
    }
    TransportError::Channel(Box::new(error))
}

#[cfg(test)]
mod tests {
    use super::*;
    use lapin::protocol::AMQPError;
    use serde_json::json;

    #[test]
    fn test_exchange_kind_mapping() {
        assert_eq!(exchange_kind(ExchangeKind::Topic), lapin::ExchangeKind::Topic);
        assert_eq!(exchange_kind(ExchangeKind::Direct), lapin::ExchangeKind::Direct);
        assert_eq!(exchange_kind(ExchangeKind::Fanout), lapin::ExchangeKind::Fanout);
        assert_eq!(
            exchange_kind(ExchangeKind::Headers),
            lapin::ExchangeKind::Headers
        );
    }

    #[test]
    fn test_message_properties_are_persistent_json() {
        let event = OutboundEvent::new("expense.created", &json!({"id": "1"})).unwrap();
        let properties = message_properties(&event);

        assert_eq!(properties.delivery_mode(), &Some(PERSISTENT));
        assert_eq!(
            properties.content_type().as_ref().map(|c| c.as_str()),
            Some(JSON_CONTENT_TYPE)
        );
        assert_eq!(properties.timestamp(), &Some(event.amqp_timestamp()));
        assert_eq!(
            properties.message_id().as_ref().map(|id| id.as_str().to_string()),
            Some(event.message_id().to_string())
        );
    }

    #[test]
    fn test_precondition_failed_is_conflict() {
        let amqp_error = AMQPError::new(
            AMQPErrorKind::Soft(AMQPSoftError::PRECONDITIONFAILED),
            "PRECONDITION_FAILED - inequivalent arg 'type' for exchange 'expenses_exchange'"
                .into(),
        );
        let error = classify_declare_error(lapin::Error::ProtocolError(amqp_error));
        match error {
            TransportError::PreconditionFailed(detail) => {
                assert!(detail.contains("inequivalent arg"));
            }
            other => panic!("expected precondition failure, got {other:?}"),
        }
    }

    #[test]
    fn test_other_protocol_errors_are_transient() {
        let amqp_error = AMQPError::new(
            AMQPErrorKind::Soft(AMQPSoftError::ACCESSREFUSED),
            "ACCESS_REFUSED".into(),
        );
        assert!(matches!(
            classify_declare_error(lapin::Error::ProtocolError(amqp_error)),
            TransportError::Channel(_)
        ));
    }
}
