//! Subscription Management
//!
//! Opens long-lived streaming feeds keyed by topic, tracks per-feed
//! lifecycle state, and routes field-level deltas into each feed's
//! snapshot. Lifecycle transitions and data delivery reach the
//! subscriber through separate [`SubscriptionListener`] callbacks.

use std::sync::Arc;

use tokio::sync::watch;

use crate::application::ports::{GatewayTransport, SubscriptionListener};
use crate::application::services::correlator::SendError;
use crate::domain::correlation::{CorrelationRegistry, CorrelationToken, TokenGenerator};
use crate::domain::event::{DeliveryStatus, FieldMap, SubscriptionStatus};
use crate::domain::session::SessionState;
use crate::domain::subscription::{
    FieldSnapshot, Subscription, SubscriptionEntry, SubscriptionState, TopicSpec,
};

// =============================================================================
// Records
// =============================================================================

struct SubscriptionRecord {
    subscription: Subscription,
    listener: Arc<dyn SubscriptionListener>,
}

/// A subscription request: stream kind, fields, and the listener that
/// receives its lifecycle and data callbacks.
pub struct SubscribeSpec {
    /// Stream kind within the session's service (e.g. `orders`).
    pub stream: String,
    /// Fields to deliver.
    pub fields: Vec<String>,
    /// Callback sink for this subscription.
    pub listener: Arc<dyn SubscriptionListener>,
}

impl SubscribeSpec {
    /// Build a subscribe spec.
    #[must_use]
    pub fn new(stream: &str, fields: &[&str], listener: Arc<dyn SubscriptionListener>) -> Self {
        Self {
            stream: stream.to_string(),
            fields: fields.iter().map(ToString::to_string).collect(),
            listener,
        }
    }
}

// What a table mutation decided to tell the listener, invoked only
// after the table lock is released.
enum Callback {
    Started,
    Failed { code: i32, message: String },
    Terminated { reason: String },
    PaintComplete,
    Heartbeat,
    Updated { delta: FieldMap, snapshot: FieldSnapshot },
}

// =============================================================================
// Service
// =============================================================================

/// Issues subscriptions and routes their status and data events.
pub struct SubscriptionService {
    transport: Arc<dyn GatewayTransport>,
    tokens: Arc<TokenGenerator>,
    entries: CorrelationRegistry<SubscriptionRecord>,
    session_state: watch::Receiver<SessionState>,
    service: String,
}

impl SubscriptionService {
    /// Create a subscription service bound to the session's service name.
    #[must_use]
    pub fn new(
        transport: Arc<dyn GatewayTransport>,
        tokens: Arc<TokenGenerator>,
        session_state: watch::Receiver<SessionState>,
        service: &str,
    ) -> Self {
        Self {
            transport,
            tokens,
            entries: CorrelationRegistry::new(),
            session_state,
            service: service.to_string(),
        }
    }

    /// Open one streaming subscription.
    ///
    /// # Errors
    ///
    /// Returns [`SendError::NotReady`] before the session reaches
    /// service-ready, or [`SendError::Transport`] if the subscribe
    /// message cannot be enqueued (nothing stays registered).
    pub fn subscribe(&self, spec: SubscribeSpec) -> Result<CorrelationToken, SendError> {
        self.subscribe_many(vec![spec]).map(|tokens| tokens[0])
    }

    /// Open several subscriptions with a single wire-level subscribe
    /// call.
    ///
    /// # Errors
    ///
    /// Returns [`SendError::NotReady`] before the session reaches
    /// service-ready, or [`SendError::Transport`] if the subscribe
    /// message cannot be enqueued (nothing stays registered).
    pub fn subscribe_many(
        &self,
        specs: Vec<SubscribeSpec>,
    ) -> Result<Vec<CorrelationToken>, SendError> {
        if !self.session_state.borrow().is_ready() {
            return Err(SendError::NotReady);
        }

        let mut tokens = Vec::with_capacity(specs.len());
        let mut wire_entries = Vec::with_capacity(specs.len());
        for spec in specs {
            let token = self.tokens.next_token();
            let fields: Vec<&str> = spec.fields.iter().map(String::as_str).collect();
            let topic = TopicSpec::new(&self.service, &spec.stream, &fields);

            wire_entries.push(SubscriptionEntry {
                topic: topic.to_wire(),
                token,
            });

            let record = SubscriptionRecord {
                subscription: Subscription::new(topic),
                listener: spec.listener,
            };
            if let Err(error) = self.entries.register(token, record) {
                tracing::error!(token = %token, error = %error, "token collision; subscribe aborted");
                self.withdraw(&tokens);
                return Err(SendError::Transport(
                    crate::application::ports::TransportError::Rejected(error.to_string()),
                ));
            }
            tokens.push(token);
        }

        if let Err(error) = self.transport.subscribe(&wire_entries) {
            self.withdraw(&tokens);
            return Err(error.into());
        }

        for entry in &wire_entries {
            tracing::info!(token = %entry.token, topic = %entry.topic, "subscription requested");
        }
        Ok(tokens)
    }

    /// Route a subscription lifecycle event.
    pub fn on_status(&self, token: CorrelationToken, status: &SubscriptionStatus) {
        let callback = self.entries.with_entry(token, |record| {
            let next = match status {
                SubscriptionStatus::Started => SubscriptionState::Started,
                SubscriptionStatus::Failure { code, message } => SubscriptionState::Failed {
                    code: *code,
                    message: message.clone(),
                },
                SubscriptionStatus::Terminated { reason } => SubscriptionState::Terminated {
                    reason: reason.clone(),
                },
            };

            if !record.subscription.transition(next) {
                tracing::warn!(
                    token = %token,
                    state = ?record.subscription.state(),
                    status = ?status,
                    "illegal subscription transition ignored"
                );
                return None;
            }

            let callback = match status {
                SubscriptionStatus::Started => Callback::Started,
                SubscriptionStatus::Failure { code, message } => Callback::Failed {
                    code: *code,
                    message: message.clone(),
                },
                SubscriptionStatus::Terminated { reason } => Callback::Terminated {
                    reason: reason.clone(),
                },
            };
            Some((Arc::clone(&record.listener), callback))
        });

        match callback {
            Ok(Some((listener, callback))) => Self::notify(&*listener, token, callback),
            Ok(None) => {}
            Err(error) => {
                tracing::warn!(token = %token, error = %error, "subscription status dropped");
            }
        }
    }

    /// Route a subscription data event.
    ///
    /// Heartbeats and the initial-paint-complete marker carry no data;
    /// updates are merged into the snapshot. Events for feeds that are
    /// not `Started` (failed, terminated, or never started) are
    /// dropped without touching the snapshot.
    pub fn on_data(&self, token: CorrelationToken, status_code: i32, fields: &FieldMap) {
        let status = DeliveryStatus::from_code(status_code);
        if let DeliveryStatus::Unrecognized(code) = status {
            tracing::warn!(token = %token, code, "unrecognized subscription data status");
            return;
        }

        let callback = self.entries.with_entry(token, |record| {
            if !record.subscription.state().accepts_data() {
                tracing::debug!(
                    token = %token,
                    state = ?record.subscription.state(),
                    "data event for inactive subscription dropped"
                );
                return None;
            }

            let callback = match status {
                DeliveryStatus::Heartbeat => Callback::Heartbeat,
                DeliveryStatus::InitialPaintComplete => {
                    record.subscription.mark_painted();
                    Callback::PaintComplete
                }
                DeliveryStatus::Update => {
                    record.subscription.apply_delta(fields);
                    Callback::Updated {
                        delta: fields.clone(),
                        snapshot: record.subscription.snapshot().clone(),
                    }
                }
                DeliveryStatus::Unrecognized(_) => return None,
            };
            Some((Arc::clone(&record.listener), callback))
        });

        match callback {
            Ok(Some((listener, callback))) => Self::notify(&*listener, token, callback),
            Ok(None) => {}
            Err(error) => {
                tracing::warn!(token = %token, error = %error, "subscription data dropped");
            }
        }
    }

    /// Current lifecycle state of a subscription, if the token is known.
    #[must_use]
    pub fn state(&self, token: CorrelationToken) -> Option<SubscriptionState> {
        self.entries
            .with_entry(token, |record| record.subscription.state().clone())
            .ok()
    }

    /// Current field snapshot of a subscription, if the token is known.
    #[must_use]
    pub fn snapshot(&self, token: CorrelationToken) -> Option<FieldSnapshot> {
        self.entries
            .with_entry(token, |record| record.subscription.snapshot().clone())
            .ok()
    }

    /// Whether a subscription has completed its initial paint.
    #[must_use]
    pub fn painted(&self, token: CorrelationToken) -> Option<bool> {
        self.entries
            .with_entry(token, |record| record.subscription.painted())
            .ok()
    }

    /// Drop a subscription's record. Terminal records stay queryable
    /// until dropped; tokens are never reused, so retention is safe.
    pub fn drop_subscription(&self, token: CorrelationToken) {
        if self.entries.resolve(token).is_ok() {
            tracing::debug!(token = %token, "subscription record dropped");
        }
    }

    /// Number of tracked subscriptions, terminal records included.
    #[must_use]
    pub fn tracked_count(&self) -> usize {
        self.entries.len()
    }

    fn withdraw(&self, tokens: &[CorrelationToken]) {
        for token in tokens {
            let _ = self.entries.resolve(*token);
        }
    }

    // Listener callbacks run with no table lock held: a listener may
    // call back into this service.
    fn notify(listener: &dyn SubscriptionListener, token: CorrelationToken, callback: Callback) {
        match callback {
            Callback::Started => listener.on_started(token),
            Callback::Failed { code, message } => listener.on_failed(token, code, &message),
            Callback::Terminated { reason } => listener.on_terminated(token, &reason),
            Callback::PaintComplete => listener.on_initial_paint_complete(token),
            Callback::Heartbeat => listener.on_heartbeat(token),
            Callback::Updated { delta, snapshot } => listener.on_update(token, &delta, &snapshot),
        }
    }
}

// =============================================================================
// Tests
// =============================================================================
