//! Request Correlation
//!
//! Issues requests under fresh correlation tokens and resolves arriving
//! response events back to the continuation registered by the caller.
//! One request yields exactly one terminal response; partial responses
//! are delivered without consuming the pending record.

use std::sync::Arc;

use chrono::{DateTime, Utc};
use parking_lot::Mutex;
use tokio::sync::watch;

use crate::application::ports::{GatewayTransport, TransportError};
use crate::domain::correlation::{
    CorrelationRegistry, CorrelationToken, RoutingError, TokenGenerator,
};
use crate::domain::event::{FieldMap, ResponseBody};
use crate::domain::request::GatewayRequest;
use crate::domain::session::SessionState;

// =============================================================================
// Outcomes
// =============================================================================

/// One delivery to a request continuation.
#[derive(Debug, Clone, PartialEq)]
pub enum RequestUpdate {
    /// Intermediate event for a still-open request.
    Partial {
        /// Message type of the partial payload.
        operation: String,
        /// Partial payload fields.
        fields: FieldMap,
    },
    /// Terminal success.
    Complete {
        /// Message type of the payload.
        operation: String,
        /// Payload fields.
        fields: FieldMap,
    },
    /// Terminal business-level failure reported by the gateway.
    Failed {
        /// Vendor-supplied error code.
        code: i32,
        /// Vendor-supplied error message.
        message: String,
    },
}

impl RequestUpdate {
    /// Whether this delivery ends the request.
    #[must_use]
    pub const fn is_terminal(&self) -> bool {
        matches!(self, Self::Complete { .. } | Self::Failed { .. })
    }
}

/// Continuation invoked with every delivery for a request. Runs on the
/// dispatch path; must return promptly.
pub type Continuation = Box<dyn FnMut(RequestUpdate) + Send>;

/// Failures returned from [`RequestCorrelator::send`].
#[derive(Debug, thiserror::Error)]
pub enum SendError {
    /// The session has not reached service-ready.
    #[error("session has not reached service-ready")]
    NotReady,
    /// The transport could not enqueue the request.
    #[error(transparent)]
    Transport(#[from] TransportError),
}

// =============================================================================
// Pending Requests
// =============================================================================

struct PendingRequest {
    issued_at: DateTime<Utc>,
    operation: String,
    // Shared so the continuation can be invoked with the registry lock
    // released; a continuation may re-enter `send`.
    continuation: Arc<Mutex<Continuation>>,
}

// =============================================================================
// Correlator
// =============================================================================

/// Issues requests and routes response events to their continuations.
pub struct RequestCorrelator {
    transport: Arc<dyn GatewayTransport>,
    tokens: Arc<TokenGenerator>,
    pending: CorrelationRegistry<PendingRequest>,
    session_state: watch::Receiver<SessionState>,
}

impl RequestCorrelator {
    /// Create a correlator over the given transport and token source.
    #[must_use]
    pub fn new(
        transport: Arc<dyn GatewayTransport>,
        tokens: Arc<TokenGenerator>,
        session_state: watch::Receiver<SessionState>,
    ) -> Self {
        Self {
            transport,
            tokens,
            pending: CorrelationRegistry::new(),
            session_state,
        }
    }

    /// Issue a request. Returns as soon as the request is enqueued; the
    /// continuation is invoked later, on the dispatch path, with every
    /// partial payload and exactly one terminal outcome.
    ///
    /// # Errors
    ///
    /// Returns [`SendError::NotReady`] before the session reaches
    /// service-ready, or [`SendError::Transport`] if the request cannot
    /// be enqueued (in which case nothing stays registered).
    pub fn send(
        &self,
        request: GatewayRequest,
        continuation: impl FnMut(RequestUpdate) + Send + 'static,
    ) -> Result<CorrelationToken, SendError> {
        if !self.session_state.borrow().is_ready() {
            return Err(SendError::NotReady);
        }

        let operation = request.operation().to_string();
        let record = PendingRequest {
            issued_at: Utc::now(),
            operation: operation.clone(),
            continuation: Arc::new(Mutex::new(Box::new(continuation))),
        };

        // Generator tokens are process-unique, so a collision here is a
        // bookkeeping defect, not a caller error.
        let token = self.tokens.next_token();
        if let Err(error) = self.pending.register(token, record) {
            tracing::error!(token = %token, error = %error, "token collision; request not sent");
            return Err(SendError::Transport(TransportError::Rejected(
                error.to_string(),
            )));
        }

        if let Err(error) = self.transport.send_request(request, token) {
            // Nothing was sent; withdraw the registration.
            let _ = self.pending.resolve(token);
            return Err(error.into());
        }

        tracing::debug!(token = %token, operation = %operation, "request dispatched");
        Ok(token)
    }

    /// Route a response event to its pending request.
    ///
    /// Unknown tokens (including a second terminal event for an
    /// already-resolved token) are logged and dropped, never fatal.
    pub fn on_response(&self, token: CorrelationToken, partial: bool, body: ResponseBody) {
        match (partial, body) {
            (true, ResponseBody::Success { operation, fields }) => {
                self.deliver_partial(token, operation, fields);
            }
            (true, ResponseBody::Error { code, message }) => {
                // Errors only ever arrive as final responses; treat the
                // anomaly as the terminal event.
                tracing::warn!(token = %token, "error body on partial response; treating as terminal");
                self.resolve_terminal(token, RequestUpdate::Failed { code, message });
            }
            (false, ResponseBody::Success { operation, fields }) => {
                self.resolve_terminal(token, RequestUpdate::Complete { operation, fields });
            }
            (false, ResponseBody::Error { code, message }) => {
                self.resolve_terminal(token, RequestUpdate::Failed { code, message });
            }
        }
    }

    fn resolve_terminal(&self, token: CorrelationToken, update: RequestUpdate) {
        match self.pending.resolve(token) {
            Ok(pending) => {
                let elapsed_ms = (Utc::now() - pending.issued_at).num_milliseconds();
                tracing::debug!(
                    token = %token,
                    operation = %pending.operation,
                    elapsed_ms,
                    "terminal response resolved"
                );
                let mut continuation = pending.continuation.lock();
                (*continuation)(update);
            }
            Err(error) => {
                tracing::warn!(token = %token, error = %error, "response event dropped");
            }
        }
    }

    /// Discard interest in a pending request. The record stays pending
    /// so a late terminal event still resolves cleanly, against a no-op
    /// continuation.
    ///
    /// # Errors
    ///
    /// Returns [`RoutingError::UnknownToken`] if nothing is pending for
    /// the token.
    pub fn discard(&self, token: CorrelationToken) -> Result<(), RoutingError> {
        self.pending.with_entry(token, |pending| {
            pending.continuation = Arc::new(Mutex::new(Box::new(|_| {})));
        })?;
        tracing::debug!(token = %token, "caller discarded interest in pending request");
        Ok(())
    }

    /// Resolve a pending request to an error from outside the dispatch
    /// path. This is the layering point for caller-side timeouts: the
    /// caller races this against the real terminal event, and whichever
    /// resolves first wins; the loser observes `UnknownToken`.
    ///
    /// # Errors
    ///
    /// Returns [`RoutingError::UnknownToken`] if the request already
    /// resolved (the caller lost the race) or never existed.
    pub fn fail_pending(
        &self,
        token: CorrelationToken,
        code: i32,
        message: &str,
    ) -> Result<(), RoutingError> {
        let pending = self.pending.resolve(token)?;
        tracing::debug!(token = %token, code, "pending request resolved externally");
        let mut continuation = pending.continuation.lock();
        (*continuation)(RequestUpdate::Failed {
            code,
            message: message.to_string(),
        });
        Ok(())
    }

    /// Number of requests currently in flight.
    #[must_use]
    pub fn pending_count(&self) -> usize {
        self.pending.len()
    }

    fn deliver_partial(&self, token: CorrelationToken, operation: String, fields: FieldMap) {
        // Clone the continuation handle out so the registry lock is
        // released before user code runs.
        match self
            .pending
            .with_entry(token, |pending| Arc::clone(&pending.continuation))
        {
            Ok(continuation) => {
                tracing::debug!(token = %token, operation = %operation, "partial response");
                let mut continuation = continuation.lock();
                (*continuation)(RequestUpdate::Partial { operation, fields });
            }
            Err(error) => {
                tracing::warn!(token = %token, error = %error, "partial response dropped");
            }
        }
    }
}

// =============================================================================
// Tests
// =============================================================================

#[cfg(test)]
mod tests {
    use std::sync::Arc;

    use parking_lot::Mutex;

    use crate::application::services::test_support::{RecordingTransport, session_state};
    use crate::domain::event::FieldValue;
    use crate::domain::request::RequestBuilder;

    use super::*;

    fn correlator_with(
        transport: Arc<RecordingTransport>,
        state: SessionState,
    ) -> RequestCorrelator {
        let (_tx, rx) = session_state(state);
        RequestCorrelator::new(transport, Arc::new(TokenGenerator::new()), rx)
    }

    fn create_order() -> GatewayRequest {
        RequestBuilder::new("CreateOrder")
            .set("TICKER", "IBM US Equity")
            .set("AMOUNT", 100)
            .build()
    }

    fn success_body(id: i64) -> ResponseBody {
        ResponseBody::Success {
            operation: "CreateOrder".to_string(),
            fields: FieldMap::from([("ORDER_ID".to_string(), FieldValue::Int(id))]),
        }
    }

    #[test]
    fn send_before_ready_fails() {
        let transport = Arc::new(RecordingTransport::new());
        let correlator = correlator_with(Arc::clone(&transport), SessionState::Connecting);

        let result = correlator.send(create_order(), |_| {});
        assert!(matches!(result, Err(SendError::NotReady)));
        assert!(transport.sent.lock().is_empty());
    }

    #[test]
    fn terminal_success_resolves_once_and_removes_record() {
        let transport = Arc::new(RecordingTransport::new());
        let correlator = correlator_with(transport, SessionState::ServiceReady);

        let outcomes = Arc::new(Mutex::new(Vec::new()));
        let sink = Arc::clone(&outcomes);
        let token = correlator
            .send(create_order(), move |update| sink.lock().push(update))
            .unwrap();
        assert_eq!(correlator.pending_count(), 1);

        correlator.on_response(token, false, success_body(42));

        let delivered = outcomes.lock();
        assert_eq!(delivered.len(), 1);
        let RequestUpdate::Complete { fields, .. } = &delivered[0] else {
            panic!("expected terminal success");
        };
        assert_eq!(fields.get("ORDER_ID"), Some(&FieldValue::Int(42)));
        assert_eq!(correlator.pending_count(), 0);
    }

    #[test]
    fn error_body_is_delivered_as_failure() {
        let transport = Arc::new(RecordingTransport::new());
        let correlator = correlator_with(transport, SessionState::ServiceReady);

        let outcomes = Arc::new(Mutex::new(Vec::new()));
        let sink = Arc::clone(&outcomes);
        let token = correlator
            .send(create_order(), move |update| sink.lock().push(update))
            .unwrap();

        correlator.on_response(
            token,
            false,
            ResponseBody::Error {
                code: 1537,
                message: "insufficient buying power".to_string(),
            },
        );

        assert_eq!(
            outcomes.lock().as_slice(),
            &[RequestUpdate::Failed {
                code: 1537,
                message: "insufficient buying power".to_string(),
            }]
        );
    }

    #[test]
    fn partial_responses_retain_the_pending_record() {
        let transport = Arc::new(RecordingTransport::new());
        let correlator = correlator_with(transport, SessionState::ServiceReady);

        let outcomes = Arc::new(Mutex::new(Vec::new()));
        let sink = Arc::clone(&outcomes);
        let token = correlator
            .send(create_order(), move |update| sink.lock().push(update))
            .unwrap();

        correlator.on_response(token, true, success_body(1));
        assert_eq!(correlator.pending_count(), 1);

        correlator.on_response(token, false, success_body(1));
        assert_eq!(correlator.pending_count(), 0);

        let delivered = outcomes.lock();
        assert!(matches!(delivered[0], RequestUpdate::Partial { .. }));
        assert!(matches!(delivered[1], RequestUpdate::Complete { .. }));
    }

    #[test]
    fn duplicate_terminal_event_is_dropped() {
        let transport = Arc::new(RecordingTransport::new());
        let correlator = correlator_with(transport, SessionState::ServiceReady);

        let outcomes = Arc::new(Mutex::new(Vec::new()));
        let sink = Arc::clone(&outcomes);
        let token = correlator
            .send(create_order(), move |update| sink.lock().push(update))
            .unwrap();

        correlator.on_response(token, false, success_body(42));
        correlator.on_response(token, false, success_body(42));

        // Only the first terminal delivery reached the continuation.
        assert_eq!(outcomes.lock().len(), 1);
    }

    #[test]
    fn response_for_unknown_token_is_dropped() {
        let transport = Arc::new(RecordingTransport::new());
        let correlator = correlator_with(transport, SessionState::ServiceReady);

        // Must not panic or disturb anything.
        correlator.on_response(CorrelationToken::new(999), false, success_body(1));
        assert_eq!(correlator.pending_count(), 0);
    }

    #[test]
    fn discard_keeps_record_but_silences_continuation() {
        let transport = Arc::new(RecordingTransport::new());
        let correlator = correlator_with(transport, SessionState::ServiceReady);

        let outcomes = Arc::new(Mutex::new(Vec::new()));
        let sink = Arc::clone(&outcomes);
        let token = correlator
            .send(create_order(), move |update| sink.lock().push(update))
            .unwrap();

        correlator.discard(token).unwrap();
        assert_eq!(correlator.pending_count(), 1);

        correlator.on_response(token, false, success_body(42));
        assert!(outcomes.lock().is_empty());
        assert_eq!(correlator.pending_count(), 0);
    }

    #[test]
    fn external_failure_wins_the_race_and_real_response_loses() {
        let transport = Arc::new(RecordingTransport::new());
        let correlator = correlator_with(transport, SessionState::ServiceReady);

        let outcomes = Arc::new(Mutex::new(Vec::new()));
        let sink = Arc::clone(&outcomes);
        let token = correlator
            .send(create_order(), move |update| sink.lock().push(update))
            .unwrap();

        correlator.fail_pending(token, -1, "timed out").unwrap();
        assert_eq!(correlator.pending_count(), 0);

        // The loser of the race observes UnknownToken internally; the
        // continuation sees exactly one terminal outcome.
        correlator.on_response(token, false, success_body(42));
        assert_eq!(
            outcomes.lock().as_slice(),
            &[RequestUpdate::Failed {
                code: -1,
                message: "timed out".to_string(),
            }]
        );

        // And the other way round: once resolved, fail_pending loses.
        assert!(matches!(
            correlator.fail_pending(token, -1, "timed out"),
            Err(RoutingError::UnknownToken(_))
        ));
    }

    #[test]
    fn transport_rejection_withdraws_registration() {
        let transport = Arc::new(RecordingTransport::new());
        transport.fail_sends();
        let correlator = correlator_with(transport, SessionState::ServiceReady);

        let result = correlator.send(create_order(), |_| {});
        assert!(matches!(result, Err(SendError::Transport(_))));
        assert_eq!(correlator.pending_count(), 0);
    }

    #[test]
    fn continuation_may_reenter_send() {
        let transport = Arc::new(RecordingTransport::new());
        let correlator = Arc::new(correlator_with(
            Arc::clone(&transport),
            SessionState::ServiceReady,
        ));

        let chained = Arc::new(Mutex::new(None));
        let inner_correlator = Arc::clone(&correlator);
        let inner_chained = Arc::clone(&chained);
        let token = correlator
            .send(create_order(), move |update| {
                if update.is_terminal() {
                    let follow_up = inner_correlator
                        .send(RequestBuilder::new("RouteOrder").build(), |_| {})
                        .unwrap();
                    *inner_chained.lock() = Some(follow_up);
                }
            })
            .unwrap();

        correlator.on_response(token, false, success_body(7));

        let follow_up = chained.lock().unwrap();
        assert_ne!(follow_up, token);
        assert_eq!(transport.sent.lock().len(), 2);
    }
}
