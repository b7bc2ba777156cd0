//! Inbound Event Taxonomy
//!
//! Everything the gateway delivers arrives on one event stream. The
//! dispatcher classifies each event into this tagged union and routes it
//! to the component that owns the corresponding state. Unrecognized
//! event kinds are represented explicitly so the dispatcher can log and
//! drop them instead of crashing.

use std::collections::HashMap;

use serde::{Deserialize, Serialize};

use crate::domain::correlation::CorrelationToken;

// =============================================================================
// Field Values
// =============================================================================

/// A typed field value as carried by gateway messages.
///
/// The field schema is fixed and known at subscribe/request time: every
/// field is a string, an integer, or a float.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum FieldValue {
    /// String field.
    Str(String),
    /// Integer field.
    Int(i64),
    /// Floating-point field.
    Float(f64),
}

impl FieldValue {
    /// The value as a string slice, if this is a string field.
    #[must_use]
    pub fn as_str(&self) -> Option<&str> {
        match self {
            Self::Str(value) => Some(value),
            _ => None,
        }
    }

    /// The value as an integer, if this is an integer field.
    #[must_use]
    pub const fn as_int(&self) -> Option<i64> {
        match self {
            Self::Int(value) => Some(*value),
            _ => None,
        }
    }

    /// The value as a float, if this is a float field.
    #[must_use]
    pub const fn as_float(&self) -> Option<f64> {
        match self {
            Self::Float(value) => Some(*value),
            _ => None,
        }
    }
}

impl std::fmt::Display for FieldValue {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Str(value) => write!(f, "{value}"),
            Self::Int(value) => write!(f, "{value}"),
            Self::Float(value) => write!(f, "{value}"),
        }
    }
}

impl From<&str> for FieldValue {
    fn from(value: &str) -> Self {
        Self::Str(value.to_string())
    }
}

impl From<String> for FieldValue {
    fn from(value: String) -> Self {
        Self::Str(value)
    }
}

impl From<i64> for FieldValue {
    fn from(value: i64) -> Self {
        Self::Int(value)
    }
}

impl From<i32> for FieldValue {
    fn from(value: i32) -> Self {
        Self::Int(i64::from(value))
    }
}

impl From<f64> for FieldValue {
    fn from(value: f64) -> Self {
        Self::Float(value)
    }
}

/// A partial mapping from field name to typed value.
///
/// Absent keys mean "unchanged", never "default".
pub type FieldMap = HashMap<String, FieldValue>;

// =============================================================================
// Session and Service Status
// =============================================================================

/// Session-level status messages.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum SessionStatus {
    /// The session started and is ready to open services.
    Started,
    /// The session never came up.
    StartupFailure {
        /// Gateway-supplied failure description.
        reason: String,
    },
    /// The gateway terminated the session.
    Terminated,
    /// The underlying connection came up.
    ConnectionUp,
    /// The underlying connection dropped. Does not terminate the session
    /// by itself; in-flight operations stay pending.
    ConnectionDown,
}

/// Service-level status messages.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum ServiceStatus {
    /// The named service opened and can accept requests.
    Opened {
        /// Service name.
        service: String,
    },
    /// The named service failed to open.
    OpenFailure {
        /// Service name.
        service: String,
        /// Gateway-supplied failure description.
        reason: String,
    },
}

// =============================================================================
// Responses
// =============================================================================

/// Body of a response event.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum ResponseBody {
    /// The request executed; payload fields are operation-specific.
    Success {
        /// Name of the message type (mirrors the request operation).
        operation: String,
        /// Typed payload fields.
        fields: FieldMap,
    },
    /// The remote side executed the request but reports a business-level
    /// failure.
    Error {
        /// Vendor-supplied error code.
        code: i32,
        /// Vendor-supplied error message.
        message: String,
    },
}

// =============================================================================
// Subscription Status and Data
// =============================================================================

/// Subscription lifecycle messages, delivered distinctly from data.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum SubscriptionStatus {
    /// The subscription is live; the initial paint follows.
    Started,
    /// The subscription could not be established or broke.
    Failure {
        /// Vendor-supplied error code.
        code: i32,
        /// Vendor-supplied error message.
        message: String,
    },
    /// The gateway ended the subscription unsolicited.
    Terminated {
        /// Gateway-supplied termination reason.
        reason: String,
    },
}

/// Per-message delivery status of a subscription data event.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum DeliveryStatus {
    /// Liveness signal; carries no data.
    Heartbeat,
    /// Incremental field update: only the fields present in the message
    /// are overwritten.
    Update,
    /// Control signal: the subscriber has now received a full baseline
    /// image. Carries no data of its own.
    InitialPaintComplete,
    /// A status code this client does not understand. Logged, not fatal.
    Unrecognized(i32),
}

/// Heartbeat status code.
pub const STATUS_HEARTBEAT: i32 = 1;
/// Initial-paint row status code.
pub const STATUS_INITIAL_PAINT: i32 = 4;
/// New-row status code.
pub const STATUS_NEW: i32 = 6;
/// Changed-row status code.
pub const STATUS_UPDATE: i32 = 7;
/// End-of-initial-paint status code.
pub const STATUS_INITIAL_PAINT_COMPLETE: i32 = 11;

impl DeliveryStatus {
    /// Classify a wire status code.
    #[must_use]
    pub const fn from_code(code: i32) -> Self {
        match code {
            STATUS_HEARTBEAT => Self::Heartbeat,
            STATUS_INITIAL_PAINT | STATUS_NEW | STATUS_UPDATE => Self::Update,
            STATUS_INITIAL_PAINT_COMPLETE => Self::InitialPaintComplete,
            other => Self::Unrecognized(other),
        }
    }
}

// =============================================================================
// Administrative
// =============================================================================

/// Administrative notices from the gateway.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum AdminNotice {
    /// This consumer is falling behind the event stream.
    SlowConsumerWarning,
    /// The slow-consumer condition cleared.
    SlowConsumerWarningCleared,
    /// Any other administrative message.
    Other(String),
}

// =============================================================================
// Gateway Event
// =============================================================================

/// One event delivered by the gateway, classified by kind.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum GatewayEvent {
    /// Session lifecycle status.
    SessionStatus(SessionStatus),
    /// Service lifecycle status.
    ServiceStatus(ServiceStatus),
    /// Response to a correlated request.
    Response {
        /// Token echoed from the originating request.
        token: CorrelationToken,
        /// Whether this is an intermediate event for a still-open
        /// request. Only a non-partial event is terminal.
        partial: bool,
        /// Response payload or error.
        body: ResponseBody,
    },
    /// Subscription lifecycle status.
    SubscriptionStatus {
        /// Token echoed from the originating subscription.
        token: CorrelationToken,
        /// The lifecycle transition.
        status: SubscriptionStatus,
    },
    /// Streaming data for a subscription.
    SubscriptionData {
        /// Token echoed from the originating subscription.
        token: CorrelationToken,
        /// Wire status code; see [`DeliveryStatus::from_code`].
        status_code: i32,
        /// Delta fields. Absent fields keep their prior value.
        fields: FieldMap,
    },
    /// Administrative message.
    Administrative(AdminNotice),
    /// Anything the classifier does not recognize.
    Unknown {
        /// Wire-level kind tag, for logging.
        kind: String,
    },
}

// =============================================================================
// Tests
// =============================================================================
