//! Application Services
//!
//! The request/response correlation and streaming-subscription core:
//! event dispatch, request correlation, subscription management,
//! workflow orchestration, and the session facade that wires them over
//! an established connection.

/// Request correlation: tokens, continuations, terminal resolution.
pub mod correlator;

/// The single dispatch path from the event stream to the core.
pub mod dispatcher;

/// Session facade assembling the core over a connection.
pub mod session;

/// Streaming subscriptions: lifecycle, snapshots, data routing.
pub mod subscriptions;

/// Multi-step chained request workflows.
pub mod workflow;

// =============================================================================
// Test Support
// =============================================================================

#[cfg(test)]
pub(crate) mod test_support {
    use std::sync::atomic::{AtomicBool, Ordering};

    use parking_lot::Mutex;
    use tokio::sync::watch;

    use crate::application::ports::{GatewayTransport, TransportError};
    use crate::domain::correlation::CorrelationToken;
    use crate::domain::request::GatewayRequest;
    use crate::domain::session::SessionState;
    use crate::domain::subscription::SubscriptionEntry;

    /// Transport fake that records every outbound operation.
    #[derive(Default)]
    pub(crate) struct RecordingTransport {
        pub(crate) sent: Mutex<Vec<(GatewayRequest, CorrelationToken)>>,
        pub(crate) subscribed: Mutex<Vec<SubscriptionEntry>>,
        pub(crate) subscribe_calls: Mutex<Vec<usize>>,
        pub(crate) opened: Mutex<Vec<String>>,
        fail: AtomicBool,
    }

    impl RecordingTransport {
        pub(crate) fn new() -> Self {
            Self::default()
        }

        /// Make every subsequent operation fail with a rejection.
        pub(crate) fn fail_sends(&self) {
            self.fail.store(true, Ordering::SeqCst);
        }

        fn check(&self) -> Result<(), TransportError> {
            if self.fail.load(Ordering::SeqCst) {
                Err(TransportError::Rejected("test transport failure".into()))
            } else {
                Ok(())
            }
        }
    }

    impl GatewayTransport for RecordingTransport {
        fn open_service(&self, service: &str) -> Result<(), TransportError> {
            self.check()?;
            self.opened.lock().push(service.to_string());
            Ok(())
        }

        fn send_request(
            &self,
            request: GatewayRequest,
            token: CorrelationToken,
        ) -> Result<(), TransportError> {
            self.check()?;
            self.sent.lock().push((request, token));
            Ok(())
        }

        fn subscribe(&self, entries: &[SubscriptionEntry]) -> Result<(), TransportError> {
            self.check()?;
            self.subscribe_calls.lock().push(entries.len());
            self.subscribed.lock().extend_from_slice(entries);
            Ok(())
        }
    }

    /// A session-state watch channel pinned to the given state.
    pub(crate) fn session_state(
        state: SessionState,
    ) -> (watch::Sender<SessionState>, watch::Receiver<SessionState>) {
        watch::channel(state)
    }
}
