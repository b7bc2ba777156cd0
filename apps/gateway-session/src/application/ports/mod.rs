//! Port Interfaces
//!
//! Contracts at the boundary with the external event source. The wire
//! transport is not part of this crate's core: an adapter (the in-process
//! sim gateway, or a real wire client) implements these traits and feeds
//! the inbound event stream.
//!
//! ## Driven Ports (Outbound)
//!
//! - [`GatewayConnector`]: establishes a session and yields the event stream
//! - [`GatewayTransport`]: fire-and-forget operations on an open session
//!
//! ## Callback Ports (Inbound)
//!
//! - [`SubscriptionListener`]: subscriber-supplied sink for lifecycle and
//!   data delivery, kept distinct from each other

use std::sync::Arc;

use async_trait::async_trait;
use tokio::sync::mpsc;

use crate::domain::correlation::CorrelationToken;
use crate::domain::event::{FieldMap, GatewayEvent};
use crate::domain::request::GatewayRequest;
use crate::domain::subscription::{FieldSnapshot, SubscriptionEntry};

// =============================================================================
// Endpoint
// =============================================================================

/// Network endpoint of the gateway's back-end process.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Endpoint {
    /// Host name or address.
    pub host: String,
    /// TCP port.
    pub port: u16,
}

impl Endpoint {
    /// Create an endpoint.
    #[must_use]
    pub fn new(host: &str, port: u16) -> Self {
        Self {
            host: host.to_string(),
            port,
        }
    }
}

impl std::fmt::Display for Endpoint {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}:{}", self.host, self.port)
    }
}

// =============================================================================
// Errors
// =============================================================================

/// The session never reached the gateway. Fatal; not retried by the core.
#[derive(Debug, Clone, thiserror::Error)]
pub enum ConnectionError {
    /// The endpoint did not accept the connection.
    #[error("gateway endpoint {endpoint} is unreachable: {reason}")]
    Unreachable {
        /// The endpoint that was tried.
        endpoint: String,
        /// Transport-level description.
        reason: String,
    },
}

/// A fire-and-forget transport operation could not be enqueued.
#[derive(Debug, Clone, thiserror::Error)]
pub enum TransportError {
    /// The connection to the gateway is gone.
    #[error("gateway connection closed")]
    Closed,
    /// The transport rejected the operation outright.
    #[error("transport rejected the operation: {0}")]
    Rejected(String),
}

// =============================================================================
// Transport
// =============================================================================

/// Fire-and-forget operations on an open session.
///
/// Every operation returns as soon as the outbound message is enqueued;
/// results are delivered later as events carrying the same correlation
/// token. Implementations must not block.
pub trait GatewayTransport: Send + Sync {
    /// Ask the gateway to open the named service. The result arrives as
    /// a service-status event.
    ///
    /// # Errors
    ///
    /// Returns [`TransportError`] if the message cannot be enqueued.
    fn open_service(&self, service: &str) -> Result<(), TransportError>;

    /// Dispatch a request under a correlation token. Always paired with
    /// a later response event carrying the same token.
    ///
    /// # Errors
    ///
    /// Returns [`TransportError`] if the message cannot be enqueued.
    fn send_request(
        &self,
        request: GatewayRequest,
        token: CorrelationToken,
    ) -> Result<(), TransportError>;

    /// Open one or more streaming subscriptions.
    ///
    /// # Errors
    ///
    /// Returns [`TransportError`] if the message cannot be enqueued.
    fn subscribe(&self, entries: &[SubscriptionEntry]) -> Result<(), TransportError>;
}

/// An established session: the transport handle plus the single inbound
/// event stream that multiplexes all responses and subscription data.
pub struct GatewayConnection {
    /// Fire-and-forget operations on the session.
    pub transport: Arc<dyn GatewayTransport>,
    /// Inbound events, strictly in arrival order.
    pub events: mpsc::UnboundedReceiver<GatewayEvent>,
}

/// Establishes sessions with the gateway.
#[async_trait]
pub trait GatewayConnector: Send + Sync {
    /// Connect to the gateway at the given endpoint.
    ///
    /// # Errors
    ///
    /// Returns [`ConnectionError`] if the endpoint is unreachable.
    async fn connect(&self, endpoint: &Endpoint) -> Result<GatewayConnection, ConnectionError>;
}

// =============================================================================
// Subscription Listener
// =============================================================================

/// Subscriber-supplied sink for one or more subscriptions.
///
/// Lifecycle callbacks and data delivery are separate methods so a
/// consumer can react to a failed or terminated feed distinctly from
/// ordinary updates. All callbacks run on the dispatch path and must
/// return promptly; hand long-running reactions off to another task.
pub trait SubscriptionListener: Send + Sync {
    /// The subscription is live; the initial paint follows.
    fn on_started(&self, _token: CorrelationToken) {}

    /// The subscription could not be established or broke.
    fn on_failed(&self, _token: CorrelationToken, _code: i32, _message: &str) {}

    /// The gateway ended the subscription unsolicited.
    fn on_terminated(&self, _token: CorrelationToken, _reason: &str) {}

    /// A full baseline image has now been delivered.
    fn on_initial_paint_complete(&self, _token: CorrelationToken) {}

    /// Liveness signal; no data.
    fn on_heartbeat(&self, _token: CorrelationToken) {}

    /// An incremental update was applied to the snapshot.
    fn on_update(&self, _token: CorrelationToken, _delta: &FieldMap, _snapshot: &FieldSnapshot) {}
}
