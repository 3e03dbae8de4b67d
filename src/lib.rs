//! Expense Events - best-effort AMQP event publishing
//!
//! Announces expense lifecycle events (`expense.created`, `expense.updated`, ...)
//! to a durable RabbitMQ topic exchange so downstream consumers can react to
//! them. Messaging is strictly best-effort: the service keeps working when the
//! broker is down, and publishing never returns an error to its caller.
//!
//! # Overview
//!
//! - Connection management with a bounded exponential-backoff startup sequence
//! - Durable topic exchange declaration
//! - Fire-and-forget publishing of JSON payloads
//! - Graceful shutdown with a bounded close
//!
//! # Quick Start
//!
//! ```rust,no_run
//! use expense_events::config::MessagingConfig;
//! use expense_events::events::ExpenseEventKind;
//! use expense_events::lifecycle::LifecycleController;
//! use serde_json::json;
//!
//! # tokio_test::block_on(async {
//! let config = MessagingConfig::from_env()?;
//! let (controller, publisher) = LifecycleController::from_config(&config)?;
//!
//! // Connect in the background so the service can start serving right away
//! let startup = controller.spawn_startup();
//!
//! publisher
//!     .publish_expense(ExpenseEventKind::Created, &json!({"id": "42", "amount": 12.5}))
//!     .await;
//!
//! LifecycleController::join_startup(startup).await?;
//! controller.shutdown().await;
//! # Ok::<(), Box<dyn std::error::Error>>(())
//! # });
//! ```

pub mod config;
pub mod connection;
pub mod error;
pub mod events;
pub mod lifecycle;
pub mod observability;
pub mod publisher;
pub mod testing;
pub mod topology;
pub mod transport;

pub use config::{BrokerEndpoint, ConfigError, MessagingConfig};
pub use connection::{CloseOutcome, ConnectionManager, ConnectionState, RetryPolicy};
pub use error::{MessagingError, MessagingResult};
pub use events::{topic_matches, ExpenseEventKind, OutboundEvent};
pub use lifecycle::LifecycleController;
pub use publisher::EventPublisher;
pub use topology::{ExchangeKind, ExchangeSpec};
pub use transport::amqp::AmqpConnector;
pub use transport::{BrokerConnector, BrokerSession, TransportError};
