//! Subscription State and Field Snapshots
//!
//! A subscription is a long-lived streaming feed keyed by topic. After
//! it starts, the gateway paints a full baseline image as incremental
//! messages, marks the paint complete, then keeps the snapshot current
//! with field-level deltas. Absent fields on a delta mean "unchanged",
//! never "default".

use serde::{Deserialize, Serialize};

use crate::domain::correlation::CorrelationToken;
use crate::domain::event::{FieldMap, FieldValue};

// =============================================================================
// Subscription State
// =============================================================================

/// Lifecycle state of one subscription. Transitions are monotonic;
/// `Started` persists until termination or shutdown.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum SubscriptionState {
    /// Subscribe call issued; awaiting the gateway's answer.
    Requested,
    /// Live: data events are flowing.
    Started,
    /// The subscription could not be established or broke.
    Failed {
        /// Vendor-supplied error code.
        code: i32,
        /// Vendor-supplied error description.
        message: String,
    },
    /// The gateway ended the subscription.
    Terminated {
        /// Gateway-supplied termination reason.
        reason: String,
    },
}

impl SubscriptionState {
    /// Whether data deltas may still be applied in this state.
    #[must_use]
    pub const fn accepts_data(&self) -> bool {
        matches!(self, Self::Started)
    }

    /// Whether this is a terminal state.
    #[must_use]
    pub const fn is_terminal(&self) -> bool {
        matches!(self, Self::Failed { .. } | Self::Terminated { .. })
    }
}

// =============================================================================
// Field Snapshot
// =============================================================================

/// Current field state of one subscription, mutated in place as
/// incremental updates arrive. Process-local; rebuilt from scratch on
/// resubscription.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct FieldSnapshot {
    values: FieldMap,
}

impl FieldSnapshot {
    /// Create an empty snapshot.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Apply a delta: only fields present in the delta are overwritten.
    pub fn apply(&mut self, delta: &FieldMap) {
        for (name, value) in delta {
            self.values.insert(name.clone(), value.clone());
        }
    }

    /// Look up a field by name.
    #[must_use]
    pub fn get(&self, name: &str) -> Option<&FieldValue> {
        self.values.get(name)
    }

    /// Number of fields currently held.
    #[must_use]
    pub fn len(&self) -> usize {
        self.values.len()
    }

    /// Whether the snapshot holds no fields.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.values.is_empty()
    }

    /// All current field values.
    #[must_use]
    pub const fn fields(&self) -> &FieldMap {
        &self.values
    }
}

// =============================================================================
// Topics
// =============================================================================

/// A subscription topic: service, stream kind, and the requested field
/// list, encoded as `<service>/<stream>?fields=F1,F2,...` on the wire.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TopicSpec {
    /// Service name, e.g. `//gateway/order-api`.
    pub service: String,
    /// Stream kind within the service, e.g. `orders`.
    pub stream: String,
    /// Fields to deliver.
    pub fields: Vec<String>,
}

impl TopicSpec {
    /// Build a topic spec.
    #[must_use]
    pub fn new(service: &str, stream: &str, fields: &[&str]) -> Self {
        Self {
            service: service.to_string(),
            stream: stream.to_string(),
            fields: fields.iter().map(ToString::to_string).collect(),
        }
    }

    /// Wire form of the topic.
    #[must_use]
    pub fn to_wire(&self) -> String {
        format!(
            "{}/{}?fields={}",
            self.service,
            self.stream,
            self.fields.join(",")
        )
    }

    /// Parse the wire form of a topic.
    ///
    /// Returns `None` when the string does not follow the
    /// `<service>/<stream>?fields=...` grammar.
    #[must_use]
    pub fn parse(wire: &str) -> Option<Self> {
        let (path, query) = wire.split_once("?fields=")?;
        let (service, stream) = path.rsplit_once('/')?;
        if service.is_empty() || stream.is_empty() {
            return None;
        }

        let fields: Vec<String> = query
            .split(',')
            .filter(|field| !field.is_empty())
            .map(ToString::to_string)
            .collect();
        if fields.is_empty() {
            return None;
        }

        Some(Self {
            service: service.to_string(),
            stream: stream.to_string(),
            fields,
        })
    }
}

impl std::fmt::Display for TopicSpec {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.to_wire())
    }
}

/// One entry of a wire-level subscribe call.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SubscriptionEntry {
    /// Wire form of the topic, field list included.
    pub topic: String,
    /// Correlation token echoed on every event for this subscription.
    pub token: CorrelationToken,
}

// =============================================================================
// Subscription Record
// =============================================================================

/// Bookkeeping for one subscription: topic, lifecycle state, and the
/// live field snapshot.
#[derive(Debug)]
pub struct Subscription {
    topic: TopicSpec,
    state: SubscriptionState,
    snapshot: FieldSnapshot,
    painted: bool,
}

impl Subscription {
    /// Create a subscription in `Requested`.
    #[must_use]
    pub fn new(topic: TopicSpec) -> Self {
        Self {
            topic,
            state: SubscriptionState::Requested,
            snapshot: FieldSnapshot::new(),
            painted: false,
        }
    }

    /// The subscription's topic.
    #[must_use]
    pub const fn topic(&self) -> &TopicSpec {
        &self.topic
    }

    /// Current lifecycle state.
    #[must_use]
    pub const fn state(&self) -> &SubscriptionState {
        &self.state
    }

    /// Current field snapshot.
    #[must_use]
    pub const fn snapshot(&self) -> &FieldSnapshot {
        &self.snapshot
    }

    /// Whether the initial paint has completed.
    #[must_use]
    pub const fn painted(&self) -> bool {
        self.painted
    }

    /// Attempt a monotonic state transition. Returns `false` (leaving
    /// the state untouched) when the transition is not legal from the
    /// current state.
    pub fn transition(&mut self, next: SubscriptionState) -> bool {
        let legal = match (&self.state, &next) {
            (SubscriptionState::Requested, SubscriptionState::Started)
            | (
                SubscriptionState::Requested | SubscriptionState::Started,
                SubscriptionState::Failed { .. },
            )
            | (SubscriptionState::Started, SubscriptionState::Terminated { .. }) => true,
            _ => false,
        };
        if legal {
            self.state = next;
        }
        legal
    }

    /// Mark the initial paint complete.
    pub fn mark_painted(&mut self) {
        self.painted = true;
    }

    /// Apply a field delta to the snapshot. Only legal while `Started`.
    pub fn apply_delta(&mut self, delta: &FieldMap) -> bool {
        if !self.state.accepts_data() {
            return false;
        }
        self.snapshot.apply(delta);
        true
    }
}

// =============================================================================
// Tests
// =============================================================================
