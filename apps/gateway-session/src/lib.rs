#![cfg_attr(
    test,
    allow(
        clippy::unwrap_used,
        clippy::expect_used,
        clippy::float_cmp,
        clippy::significant_drop_tightening,
        clippy::too_many_lines,
        clippy::match_same_arms,
        clippy::needless_pass_by_value,
        clippy::default_trait_access,
        clippy::items_after_statements,
        clippy::cast_possible_truncation
    )
)]

//! Gateway Session - Trading Gateway Session Driver
//!
//! Drives a remote trading/market-data gateway through an asynchronous,
//! event-delivered session: one inbound event stream multiplexes all
//! responses and subscription data, and this crate correlates them back
//! to the operations that caused them.
//!
//! # Layers (inside → outside)
//!
//! - **Domain**: Pure types and state machines
//!   - `correlation`: tokens and the pending-operation registry
//!   - `event`: the inbound event tagged union
//!   - `request`: outbound request construction
//!   - `session`: the connect → service-ready lifecycle
//!   - `subscription`: subscription state and field snapshots
//!   - `workflow`: chained-request step definitions
//!
//! - **Application**: Ports and services
//!   - `ports`: connector/transport contracts, subscription listener
//!   - `services`: dispatcher, correlator, subscriptions, workflow
//!     orchestration, session facade
//!
//! - **Infrastructure**: Adapters
//!   - `config`: environment-based settings
//!   - `sim`: in-process simulated gateway
//!   - `telemetry`: tracing subscriber setup
//!
//! # Data Flow
//!
//! ```text
//!                  ┌──────────────┐    ┌──────────────────────────────┐
//! Gateway events ─►│  Dispatcher  │───►│ SessionLifecycle             │
//!   (one stream)   │ (one task,   │    │ RequestCorrelator ──► continuations
//!                  │  in order)   │    │ SubscriptionService ─► listeners
//!                  └──────────────┘    └──────────────────────────────┘
//!                         ▲                   │ chained sends
//!                         └── transport ◄─────┘
//! ```

#![forbid(unsafe_code)]
#![warn(missing_docs)]
#![warn(clippy::pedantic)]

// =============================================================================
// Module Declarations
// =============================================================================

/// Domain layer - pure types and state machines.
pub mod domain;

/// Application layer - ports and services.
pub mod application;

/// Infrastructure layer - adapters and integrations.
pub mod infrastructure;

// =============================================================================
// Re-exports
// =============================================================================

// Correlation
pub use domain::correlation::{
    CorrelationRegistry, CorrelationToken, RoutingError, TokenGenerator,
};

// Events
pub use domain::event::{
    AdminNotice, DeliveryStatus, FieldMap, FieldValue, GatewayEvent, ResponseBody, ServiceStatus,
    SessionStatus, SubscriptionStatus,
};

// Requests
pub use domain::request::{Element, ElementGroup, GatewayRequest, RequestBuilder};

// Session lifecycle
pub use domain::session::{LifecycleAction, SessionLifecycle, SessionState};

// Subscriptions
pub use domain::subscription::{
    FieldSnapshot, Subscription, SubscriptionEntry, SubscriptionState, TopicSpec,
};

// Workflows
pub use domain::workflow::{StepResults, WorkflowSpec, WorkflowSpecError, WorkflowStep};

// Ports
pub use application::ports::{
    ConnectionError, Endpoint, GatewayConnection, GatewayConnector, GatewayTransport,
    SubscriptionListener, TransportError,
};

// Services
pub use application::services::correlator::{RequestCorrelator, RequestUpdate, SendError};
pub use application::services::dispatcher::EventDispatcher;
pub use application::services::session::{GatewaySession, SessionError};
pub use application::services::subscriptions::{SubscribeSpec, SubscriptionService};
pub use application::services::workflow::{WorkflowError, WorkflowOrchestrator, WorkflowStatus};

// Infrastructure
pub use infrastructure::config::{ConfigError, GatewayConfig};
pub use infrastructure::sim::{SimGateway, SimGatewayConfig};
pub use infrastructure::telemetry::init as init_telemetry;
