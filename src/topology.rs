//! Exchange topology declaration
//!
//! Declares the durable topic exchange the backend publishes to. Declaration is
//! idempotent: the same spec may be declared any number of times, a different
//! spec under an already declared name is a conflict.

use crate::transport::{BrokerSession, TransportError};
use std::collections::HashMap;
use std::fmt;
use std::sync::Mutex;
use thiserror::Error;
use tracing::{debug, info};

/// AMQP exchange kinds
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ExchangeKind {
    Direct,
    Fanout,
    Topic,
    Headers,
}

impl fmt::Display for ExchangeKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            ExchangeKind::Direct => "direct",
            ExchangeKind::Fanout => "fanout",
            ExchangeKind::Topic => "topic",
            ExchangeKind::Headers => "headers",
        };
        f.write_str(name)
    }
}

/// Exchange parameters
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ExchangeSpec {
    pub name: String,
    pub kind: ExchangeKind,
    pub durable: bool,
}

impl ExchangeSpec {
    /// Durable topic exchange, the only kind this backend declares
    pub fn durable_topic<S: Into<String>>(name: S) -> Self {
        Self {
            name: name.into(),
            kind: ExchangeKind::Topic,
            durable: true,
        }
    }
}

impl fmt::Display for ExchangeSpec {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "{} ({}, {})",
            self.name,
            self.kind,
            if self.durable { "durable" } else { "transient" }
        )
    }
}

/// Topology declaration errors
#[derive(Debug, Error)]
pub enum TopologyError {
    /// Exchange exists with incompatible parameters. Fatal: misconfigured deployment.
    #[error("Exchange '{name}' conflicts with existing declaration: {detail}")]
    Conflict { name: String, detail: String },
    /// Declaration could not be sent; treated as a failed connection attempt
    #[error("Exchange declaration failed")]
    Transport(#[source] TransportError),
}

impl TopologyError {
    pub fn is_conflict(&self) -> bool {
        matches!(self, TopologyError::Conflict { .. })
    }
}

/// Ensures exchanges exist, remembering what was declared in this process
#[derive(Debug, Default)]
pub struct TopologyDeclarator {
    declared: Mutex<HashMap<String, ExchangeSpec>>,
}

impl TopologyDeclarator {
    pub fn new() -> Self {
        Self::default()
    }

    /// Declare `spec` on `session`
    ///
    /// The broker declare is sent on every call so a restarted broker gets the
    /// exchange back; it is a no-op broker-side when parameters match.
    pub async fn ensure_exchange(
        &self,
        session: &mut dyn BrokerSession,
        spec: &ExchangeSpec,
    ) -> Result<(), TopologyError> {
        if let Some(existing) = self.declared(&spec.name) {
            if existing != *spec {
                return Err(TopologyError::Conflict {
                    name: spec.name.clone(),
                    detail: format!("declared as {existing}, requested {spec}"),
                });
            }
            debug!(exchange = %spec, "Exchange already declared, re-asserting");
        }

        session
            .declare_exchange(spec)
            .await
            .map_err(|e| match e {
                TransportError::PreconditionFailed(detail) => TopologyError::Conflict {
                    name: spec.name.clone(),
                    detail,
                },
                other => TopologyError::Transport(other),
            })?;

        if let Ok(mut declared) = self.declared.lock() {
            declared.insert(spec.name.clone(), spec.clone());
        }
        info!(exchange = %spec, "Exchange declared");
        Ok(())
    }

    /// Spec recorded for `name`, if it was declared successfully
    pub fn declared(&self, name: &str) -> Option<ExchangeSpec> {
        self.declared
            .lock()
            .ok()
            .and_then(|declared| declared.get(name).cloned())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::testing::MockBroker;

    #[tokio::test]
    async fn test_identical_redeclaration_succeeds() {
        let broker = MockBroker::new();
        let mut session = broker.open_session();
        let declarator = TopologyDeclarator::new();
        let spec = ExchangeSpec::durable_topic("expenses_exchange");

        declarator
            .ensure_exchange(session.as_mut(), &spec)
            .await
            .expect("first declaration");
        declarator
            .ensure_exchange(session.as_mut(), &spec)
            .await
            .expect("identical redeclaration");

        assert_eq!(declarator.declared("expenses_exchange"), Some(spec));
        assert_eq!(broker.declarations().await.len(), 2);
    }

    #[tokio::test]
    async fn test_local_conflict_is_rejected_before_broker_call() {
        let broker = MockBroker::new();
        let mut session = broker.open_session();
        let declarator = TopologyDeclarator::new();

        declarator
            .ensure_exchange(
                session.as_mut(),
                &ExchangeSpec::durable_topic("expenses_exchange"),
            )
            .await
            .unwrap();

        let fanout = ExchangeSpec {
            name: "expenses_exchange".to_string(),
            kind: ExchangeKind::Fanout,
            durable: true,
        };
        let result = declarator.ensure_exchange(session.as_mut(), &fanout).await;

        assert!(matches!(result, Err(TopologyError::Conflict { .. })));
        assert_eq!(broker.declarations().await.len(), 1);
    }

    #[tokio::test]
    async fn test_broker_precondition_failure_maps_to_conflict() {
        let broker = MockBroker::new();
        broker
            .preexisting_exchange(ExchangeSpec {
                name: "expenses_exchange".to_string(),
                kind: ExchangeKind::Direct,
                durable: false,
            })
            .await;
        let mut session = broker.open_session();
        let declarator = TopologyDeclarator::new();

        let err = declarator
            .ensure_exchange(
                session.as_mut(),
                &ExchangeSpec::durable_topic("expenses_exchange"),
            )
            .await
            .unwrap_err();

        assert!(err.is_conflict());
        assert!(err.to_string().contains("expenses_exchange"));
        assert_eq!(declarator.declared("expenses_exchange"), None);
    }

    #[tokio::test]
    async fn test_transport_failure_is_not_a_conflict() {
        let broker = MockBroker::new();
        broker.fail_declarations(true);
        let mut session = broker.open_session();
        let declarator = TopologyDeclarator::new();

        let err = declarator
            .ensure_exchange(
                session.as_mut(),
                &ExchangeSpec::durable_topic("expenses_exchange"),
            )
            .await
            .unwrap_err();

        assert!(matches!(err, TopologyError::Transport(_)));
    }

    #[test]
    fn test_exchange_spec_display() {
        let spec = ExchangeSpec::durable_topic("expenses_exchange");
        assert_eq!(spec.to_string(), "expenses_exchange (topic, durable)");
    }
}
