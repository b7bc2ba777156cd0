//! Application layer - ports and services.

/// Port interfaces at the boundary with the external event source.
pub mod ports;

/// Correlation, dispatch, subscription, and workflow services.
pub mod services;
