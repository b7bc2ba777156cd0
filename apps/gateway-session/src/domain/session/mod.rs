//! Session Lifecycle State Machine
//!
//! Tracks one connection to the gateway from connect through
//! service-ready, with an absorbing terminated state reachable from
//! anywhere. The machine is pure: status events go in, state changes
//! happen, and side-effecting steps come back out as
//! [`LifecycleAction`]s for the dispatcher to execute through the
//! transport port.

use serde::{Deserialize, Serialize};

use crate::domain::event::{ServiceStatus, SessionStatus};

// =============================================================================
// State
// =============================================================================

/// Connection state of a session.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum SessionState {
    /// No connection attempt has started.
    Disconnected,
    /// A connection attempt is in flight.
    Connecting,
    /// The session started; the service has not been requested yet.
    Connected,
    /// The service-open request was issued; awaiting the result.
    ServiceOpening,
    /// The service is open: requests and subscriptions are legal.
    ServiceReady,
    /// Absorbing failure/shutdown state. No further operations are legal.
    Terminated {
        /// Recorded failure or shutdown reason.
        reason: String,
    },
}

impl SessionState {
    /// Whether request/subscribe operations are legal in this state.
    #[must_use]
    pub const fn is_ready(&self) -> bool {
        matches!(self, Self::ServiceReady)
    }

    /// Whether the session has reached the absorbing terminal state.
    #[must_use]
    pub const fn is_terminated(&self) -> bool {
        matches!(self, Self::Terminated { .. })
    }
}

impl std::fmt::Display for SessionState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Disconnected => write!(f, "disconnected"),
            Self::Connecting => write!(f, "connecting"),
            Self::Connected => write!(f, "connected"),
            Self::ServiceOpening => write!(f, "service-opening"),
            Self::ServiceReady => write!(f, "service-ready"),
            Self::Terminated { reason } => write!(f, "terminated ({reason})"),
        }
    }
}

/// Side-effecting step requested by a state transition.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum LifecycleAction {
    /// Ask the gateway to open the named service.
    OpenService(String),
}

// =============================================================================
// Lifecycle
// =============================================================================

/// State machine driving connect → service-open → ready.
#[derive(Debug)]
pub struct SessionLifecycle {
    state: SessionState,
    service: String,
    connection_up: bool,
}

impl SessionLifecycle {
    /// Create a lifecycle for the named service, in `Disconnected`.
    #[must_use]
    pub const fn new(service: String) -> Self {
        Self {
            state: SessionState::Disconnected,
            service,
            connection_up: false,
        }
    }

    /// Current state.
    #[must_use]
    pub const fn state(&self) -> &SessionState {
        &self.state
    }

    /// The service this session opens once started.
    #[must_use]
    pub fn service(&self) -> &str {
        &self.service
    }

    /// Whether request/subscribe operations are legal.
    #[must_use]
    pub const fn is_ready(&self) -> bool {
        self.state.is_ready()
    }

    /// Note that a connection attempt has started.
    pub fn begin_connect(&mut self) {
        if matches!(self.state, SessionState::Disconnected) {
            self.state = SessionState::Connecting;
        }
    }

    /// Apply a session status event.
    ///
    /// Returns the action the dispatcher must execute, if any. A
    /// connection-down while service-ready is reported but does not
    /// terminate the session: in-flight operations stay pending.
    pub fn on_session_status(&mut self, status: &SessionStatus) -> Option<LifecycleAction> {
        if self.state.is_terminated() {
            tracing::debug!(status = ?status, "session status ignored after termination");
            return None;
        }

        match status {
            SessionStatus::Started => {
                if matches!(self.state, SessionState::Connecting) {
                    self.state = SessionState::Connected;
                    return Some(LifecycleAction::OpenService(self.service.clone()));
                }
                tracing::warn!(state = %self.state, "unexpected session-started event");
                None
            }
            SessionStatus::StartupFailure { reason } => {
                self.terminate(format!("session startup failed: {reason}"));
                None
            }
            SessionStatus::Terminated => {
                self.terminate("session terminated by gateway".to_string());
                None
            }
            SessionStatus::ConnectionUp => {
                self.connection_up = true;
                None
            }
            SessionStatus::ConnectionDown => {
                self.connection_up = false;
                if self.state.is_ready() {
                    tracing::warn!("connection down while service-ready; requests remain pending");
                }
                None
            }
        }
    }

    /// Note that the service-open request was issued.
    pub fn note_service_opening(&mut self) {
        if matches!(self.state, SessionState::Connected) {
            self.state = SessionState::ServiceOpening;
        }
    }

    /// Apply a service status event.
    pub fn on_service_status(&mut self, status: &ServiceStatus) {
        if self.state.is_terminated() {
            tracing::debug!(status = ?status, "service status ignored after termination");
            return;
        }

        match status {
            ServiceStatus::Opened { service } => {
                if *service != self.service {
                    tracing::debug!(service = %service, "ignoring open of unrelated service");
                    return;
                }
                if matches!(
                    self.state,
                    SessionState::Connected | SessionState::ServiceOpening
                ) {
                    self.state = SessionState::ServiceReady;
                } else {
                    tracing::warn!(state = %self.state, "unexpected service-opened event");
                }
            }
            ServiceStatus::OpenFailure { service, reason } => {
                if *service == self.service {
                    self.terminate(format!("service {service} failed to open: {reason}"));
                }
            }
        }
    }

    /// Force the absorbing terminal state with a recorded reason.
    pub fn terminate(&mut self, reason: String) {
        if self.state.is_terminated() {
            return;
        }
        tracing::info!(reason = %reason, "session terminated");
        self.state = SessionState::Terminated { reason };
    }

    /// Whether the underlying connection is currently up.
    #[must_use]
    pub const fn connection_up(&self) -> bool {
        self.connection_up
    }
}

// =============================================================================
// Tests
// =============================================================================
