//! Outbound event model and routing keys for expense lifecycle events
//!
//! An [`OutboundEvent`] is built once per publish call from a routing key and a
//! serializable payload, then handed to the transport. The payload is encoded to
//! JSON at construction and never touched again.

use chrono::{DateTime, Utc};
use serde::Serialize;
use std::fmt;
use thiserror::Error;
use uuid::Uuid;

/// Maximum routing key length accepted by AMQP (short string).
pub const MAX_ROUTING_KEY_LEN: usize = 255;

/// Binding pattern the archival consumer uses to receive every expense event.
pub const EXPENSE_BINDING_PATTERN: &str = "expense.*";

/// Content type attached to every outbound message.
pub const JSON_CONTENT_TYPE: &str = "application/json";

/// Expense lifecycle events announced by the backend
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ExpenseEventKind {
    Created,
    Updated,
    Deleted,
    Exported,
}

impl ExpenseEventKind {
    pub const ALL: [ExpenseEventKind; 4] = [
        ExpenseEventKind::Created,
        ExpenseEventKind::Updated,
        ExpenseEventKind::Deleted,
        ExpenseEventKind::Exported,
    ];

    /// Routing key used on the wire for this event kind
    pub fn routing_key(self) -> &'static str {
        match self {
            ExpenseEventKind::Created => "expense.created",
            ExpenseEventKind::Updated => "expense.updated",
            ExpenseEventKind::Deleted => "expense.deleted",
            ExpenseEventKind::Exported => "expense.exported",
        }
    }
}

impl fmt::Display for ExpenseEventKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.routing_key())
    }
}

/// Errors raised while building an outbound event
#[derive(Debug, Error)]
pub enum EventError {
    #[error("Routing key exceeds {MAX_ROUTING_KEY_LEN} bytes: {len}")]
    RoutingKeyTooLong { len: usize },
    #[error("Payload serialization failed")]
    Serialization(#[source] serde_json::Error),
}

/// Check a routing key against the AMQP short string limit
///
/// Empty keys and empty words (`expense..created`) are legal on a topic
/// exchange and pass through unchanged.
pub fn validate_routing_key(routing_key: &str) -> Result<(), EventError> {
    if routing_key.len() > MAX_ROUTING_KEY_LEN {
        return Err(EventError::RoutingKeyTooLong {
            len: routing_key.len(),
        });
    }
    Ok(())
}

/// Topic exchange matching: `*` matches exactly one word, `#` zero or more words.
pub fn topic_matches(pattern: &str, routing_key: &str) -> bool {
    let pattern: Vec<&str> = pattern.split('.').collect();
    let key: Vec<&str> = routing_key.split('.').collect();
    match_words(&pattern, &key)
}

fn match_words(pattern: &[&str], key: &[&str]) -> bool {
    match pattern.split_first() {
        None => key.is_empty(),
        Some((&"#", rest)) => (0..=key.len()).any(|skip| match_words(rest, &key[skip..])),
        Some((&word, rest)) => match key.split_first() {
            Some((&head, tail)) => (word == "*" || word == head) && match_words(rest, tail),
            None => false,
        },
    }
}

/// A single event ready for submission
///
/// Immutable once built. Carries the JSON body plus the metadata attached to
/// the AMQP message: message id, publish timestamp and the persistence flag.
#[derive(Debug, Clone, PartialEq)]
pub struct OutboundEvent {
    routing_key: String,
    body: Vec<u8>,
    message_id: Uuid,
    published_at: DateTime<Utc>,
    persistent: bool,
}

impl OutboundEvent {
    /// Build an event, validating the routing key and encoding the payload
    pub fn new<T>(routing_key: &str, payload: &T) -> Result<Self, EventError>
    where
        T: Serialize + ?Sized,
    {
        validate_routing_key(routing_key)?;
        let body = serde_json::to_vec(payload).map_err(EventError::Serialization)?;

        Ok(Self {
            routing_key: routing_key.to_string(),
            body,
            message_id: Uuid::new_v4(),
            published_at: Utc::now(),
            persistent: true,
        })
    }

    pub fn routing_key(&self) -> &str {
        &self.routing_key
    }

    /// JSON encoding of the payload, exactly as it goes on the wire
    pub fn body(&self) -> &[u8] {
        &self.body
    }

    pub fn message_id(&self) -> Uuid {
        self.message_id
    }

    pub fn published_at(&self) -> DateTime<Utc> {
        self.published_at
    }

    pub fn is_persistent(&self) -> bool {
        self.persistent
    }

    /// AMQP timestamp property (seconds since the epoch)
    pub fn amqp_timestamp(&self) -> u64 {
        self.published_at.timestamp().max(0) as u64
    }
}
