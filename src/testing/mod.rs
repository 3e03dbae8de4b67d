//! Testing utilities and mock implementations
//!
//! This module provides an in-memory broker for testing the event publisher
//! without a running RabbitMQ.

pub mod mocks;

pub use mocks::*;
