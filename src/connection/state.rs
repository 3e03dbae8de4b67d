//! Pure connection state machine
//!
//! `Disconnected -> Connecting -> Connected`, or terminal `Degraded` once the
//! startup retry budget is spent. Transitions are computed here without I/O so
//! the manager only has to feed events in.

use std::fmt;
use tracing::{error, info, warn};

/// Connection state owned by the connection manager
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConnectionState {
    /// Initial state, and the state after an explicit close
    Disconnected,
    /// Startup attempt in progress (1-based attempt index)
    Connecting { attempt: u32 },
    /// Session open, exchange declared, publishing available
    Connected,
    /// Retry budget exhausted; messaging unavailable for the process lifetime
    Degraded,
}

impl ConnectionState {
    pub fn can_publish(&self) -> bool {
        matches!(self, ConnectionState::Connected)
    }

    pub fn is_terminal(&self) -> bool {
        matches!(self, ConnectionState::Degraded)
    }

    /// Compute the next state for `event`
    ///
    /// `Degraded` absorbs every event. Events that make no sense for the
    /// current state leave it unchanged.
    pub fn next(self, event: ConnectionEvent) -> ConnectionState {
        use ConnectionEvent as E;
        use ConnectionState as S;

        match (self, event) {
            (S::Degraded, _) => S::Degraded,
            (S::Disconnected | S::Connecting { .. }, E::AttemptStarted(attempt)) => {
                S::Connecting { attempt }
            }
            (S::Connecting { .. }, E::Established) => S::Connected,
            (S::Connecting { .. }, E::AttemptsExhausted) => S::Degraded,
            (S::Connecting { .. } | S::Disconnected, E::Aborted) => S::Disconnected,
            (S::Connected, E::Closed) => S::Disconnected,
            (state, _) => state,
        }
    }

    /// Short label for logs and metrics
    pub fn label(&self) -> &'static str {
        match self {
            ConnectionState::Disconnected => "disconnected",
            ConnectionState::Connecting { .. } => "connecting",
            ConnectionState::Connected => "connected",
            ConnectionState::Degraded => "degraded",
        }
    }
}

impl fmt::Display for ConnectionState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ConnectionState::Connecting { attempt } => write!(f, "connecting (attempt {attempt})"),
            other => f.write_str(other.label()),
        }
    }
}

/// Inputs of the connection state machine
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConnectionEvent {
    /// A connection attempt began
    AttemptStarted(u32),
    /// Session opened and topology declared
    Established,
    /// Every attempt failed, or the topology is misconfigured
    AttemptsExhausted,
    /// Session closed on request
    Closed,
    /// Startup interrupted by shutdown
    Aborted,
}

/// Log a state transition
pub fn log_state_transition(from: &ConnectionState, to: &ConnectionState) {
    if from == to {
        return;
    }
    match (from, to) {
        (_, ConnectionState::Connected) => {
            info!("Broker connection established");
        }
        (ConnectionState::Connected, ConnectionState::Disconnected) => {
            info!("Broker connection closed");
        }
        (_, ConnectionState::Degraded) => {
            error!("Broker connection degraded: publishing disabled for this process");
        }
        (ConnectionState::Connecting { .. }, ConnectionState::Disconnected) => {
            warn!("Broker connection startup aborted");
        }
        _ => {
            tracing::debug!("Connection state: {} -> {}", from, to);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_happy_path() {
        let state = ConnectionState::Disconnected
            .next(ConnectionEvent::AttemptStarted(1))
            .next(ConnectionEvent::AttemptStarted(2))
            .next(ConnectionEvent::AttemptStarted(3));
        assert_eq!(state, ConnectionState::Connecting { attempt: 3 });

        let state = state.next(ConnectionEvent::Established);
        assert_eq!(state, ConnectionState::Connected);
        assert!(state.can_publish());
    }

    #[test]
    fn test_exhaustion_is_terminal() {
        let degraded = ConnectionState::Connecting { attempt: 10 }
            .next(ConnectionEvent::AttemptsExhausted);
        assert_eq!(degraded, ConnectionState::Degraded);
        assert!(degraded.is_terminal());

        for event in [
            ConnectionEvent::AttemptStarted(1),
            ConnectionEvent::Established,
            ConnectionEvent::Closed,
            ConnectionEvent::Aborted,
            ConnectionEvent::AttemptsExhausted,
        ] {
            assert_eq!(degraded.next(event), ConnectionState::Degraded);
        }
    }

    #[test]
    fn test_close_from_connected() {
        assert_eq!(
            ConnectionState::Connected.next(ConnectionEvent::Closed),
            ConnectionState::Disconnected
        );
    }

    #[test]
    fn test_abort_during_startup() {
        assert_eq!(
            ConnectionState::Connecting { attempt: 4 }.next(ConnectionEvent::Aborted),
            ConnectionState::Disconnected
        );
    }

    #[test]
    fn test_irrelevant_events_leave_state_unchanged() {
        assert_eq!(
            ConnectionState::Disconnected.next(ConnectionEvent::Established),
            ConnectionState::Disconnected
        );
        assert_eq!(
            ConnectionState::Connected.next(ConnectionEvent::AttemptStarted(2)),
            ConnectionState::Connected
        );
        assert_eq!(
            ConnectionState::Disconnected.next(ConnectionEvent::Closed),
            ConnectionState::Disconnected
        );
    }

    #[test]
    fn test_only_connected_can_publish() {
        assert!(!ConnectionState::Disconnected.can_publish());
        assert!(!ConnectionState::Connecting { attempt: 1 }.can_publish());
        assert!(!ConnectionState::Degraded.can_publish());
        assert!(ConnectionState::Connected.can_publish());
    }

    #[test]
    fn test_display() {
        assert_eq!(
            ConnectionState::Connecting { attempt: 2 }.to_string(),
            "connecting (attempt 2)"
        );
        assert_eq!(ConnectionState::Degraded.to_string(), "degraded");
    }
}
