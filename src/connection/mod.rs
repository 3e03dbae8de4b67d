//! Broker connection management
//!
//! - [`state`] - pure connection state machine
//! - [`retry`] - startup retry policy and backoff schedule
//! - [`manager`] - the connection manager owning the broker session

pub mod manager;
pub mod retry;
pub mod state;

pub use manager::{CloseOutcome, ConnectionManager, SubmitOutcome, DEFAULT_CLOSE_TIMEOUT};
pub use retry::{RetryDecision, RetryPolicy};
pub use state::{ConnectionEvent, ConnectionState};
