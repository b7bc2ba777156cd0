//! Correlation Tokens and the Pending-Operation Registry
//!
//! Every outbound request or subscription carries an opaque correlation
//! token that the gateway echoes on every related inbound event. The
//! registry maps tokens to pending-operation records so that a single
//! event stream can be shared by an unbounded number of concurrent
//! operations.
//!
//! # Design
//!
//! - Tokens are allocated from a process-wide atomic counter, so they are
//!   unique among all operations that are pending at the same time.
//! - The registry is one mutual-exclusion domain: a single mutex guards
//!   the whole table. Inserts arrive from callers issuing new operations
//!   while the dispatch path resolves and inspects entries; neither side
//!   holds the lock across callback invocation.

use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};

use parking_lot::Mutex;
use serde::{Deserialize, Serialize};

// =============================================================================
// Correlation Token
// =============================================================================

/// Opaque identifier linking an outbound request or subscription to its
/// inbound events.
#[derive(
    Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize, Default,
)]
pub struct CorrelationToken(u64);

impl CorrelationToken {
    /// Create a token from a raw value.
    #[must_use]
    pub const fn new(value: u64) -> Self {
        Self(value)
    }

    /// The raw token value.
    #[must_use]
    pub const fn value(self) -> u64 {
        self.0
    }
}

impl std::fmt::Display for CorrelationToken {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl From<u64> for CorrelationToken {
    fn from(value: u64) -> Self {
        Self(value)
    }
}

/// Allocates process-unique correlation tokens.
#[derive(Debug, Default)]
pub struct TokenGenerator {
    next: AtomicU64,
}

impl TokenGenerator {
    /// Create a generator starting at token 1.
    #[must_use]
    pub const fn new() -> Self {
        Self {
            next: AtomicU64::new(0),
        }
    }

    /// Allocate the next token.
    pub fn next_token(&self) -> CorrelationToken {
        CorrelationToken(self.next.fetch_add(1, Ordering::Relaxed) + 1)
    }
}

// =============================================================================
// Routing Errors
// =============================================================================

/// Bookkeeping failures while routing events to pending operations.
///
/// These are never fatal: the offending event is logged and dropped, and
/// dispatch continues.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum RoutingError {
    /// A registration was attempted for a token that is already pending.
    #[error("correlation token {0} is already pending")]
    DuplicateToken(CorrelationToken),

    /// An event arrived for a token with no pending operation.
    #[error("no pending operation for correlation token {0}")]
    UnknownToken(CorrelationToken),
}

// =============================================================================
// Correlation Registry
// =============================================================================

/// Table of pending operations keyed by correlation token.
///
/// Generic over the record type so the same structure backs both the
/// one-shot pending-request table and the long-lived subscription table.
/// The table length equals the number of in-flight operations at all
/// times; no token ever resolves to more than one record concurrently.
#[derive(Debug, Default)]
pub struct CorrelationRegistry<R> {
    entries: Mutex<HashMap<CorrelationToken, R>>,
}

impl<R> CorrelationRegistry<R> {
    /// Create an empty registry.
    #[must_use]
    pub fn new() -> Self {
        Self {
            entries: Mutex::new(HashMap::new()),
        }
    }

    /// Register a record for a token.
    ///
    /// # Errors
    ///
    /// Returns [`RoutingError::DuplicateToken`] if the token is already
    /// pending; the existing registration is untouched.
    pub fn register(&self, token: CorrelationToken, record: R) -> Result<(), RoutingError> {
        let mut entries = self.entries.lock();
        match entries.entry(token) {
            std::collections::hash_map::Entry::Occupied(_) => {
                Err(RoutingError::DuplicateToken(token))
            }
            std::collections::hash_map::Entry::Vacant(slot) => {
                slot.insert(record);
                Ok(())
            }
        }
    }

    /// Remove and return the record for a token.
    ///
    /// # Errors
    ///
    /// Returns [`RoutingError::UnknownToken`] if no operation is pending
    /// for the token.
    pub fn resolve(&self, token: CorrelationToken) -> Result<R, RoutingError> {
        self.entries
            .lock()
            .remove(&token)
            .ok_or(RoutingError::UnknownToken(token))
    }

    /// Inspect or mutate a record in place without removing it.
    ///
    /// Used for long-lived records (subscriptions) that are resolved
    /// repeatedly. The table lock is held for the duration of the
    /// closure, so the closure must not call back into the registry.
    ///
    /// # Errors
    ///
    /// Returns [`RoutingError::UnknownToken`] if no operation is pending
    /// for the token.
    pub fn with_entry<T>(
        &self,
        token: CorrelationToken,
        f: impl FnOnce(&mut R) -> T,
    ) -> Result<T, RoutingError> {
        self.entries
            .lock()
            .get_mut(&token)
            .map(f)
            .ok_or(RoutingError::UnknownToken(token))
    }

    /// Whether a token is currently pending.
    #[must_use]
    pub fn contains(&self, token: CorrelationToken) -> bool {
        self.entries.lock().contains_key(&token)
    }

    /// Number of in-flight operations.
    #[must_use]
    pub fn len(&self) -> usize {
        self.entries.lock().len()
    }

    /// Whether the registry has no pending operations.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.entries.lock().is_empty()
    }
}

// =============================================================================
// Tests
// =============================================================================

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn generator_tokens_are_sequential_and_unique() {
        let generator = TokenGenerator::new();
        let first = generator.next_token();
        let second = generator.next_token();

        assert_eq!(first.value(), 1);
        assert_eq!(second.value(), 2);
        assert_ne!(first, second);
    }

    #[test]
    fn register_then_resolve_returns_record_once() {
        let registry = CorrelationRegistry::new();
        let token = CorrelationToken::new(7);

        registry.register(token, "record").unwrap();
        assert_eq!(registry.resolve(token), Ok("record"));

        // Second resolve fails: the record was consumed.
        assert_eq!(
            registry.resolve(token),
            Err(RoutingError::UnknownToken(token))
        );
    }

    #[test]
    fn duplicate_registration_is_rejected_and_original_untouched() {
        let registry = CorrelationRegistry::new();
        let token = CorrelationToken::new(3);

        registry.register(token, "first").unwrap();
        assert_eq!(
            registry.register(token, "second"),
            Err(RoutingError::DuplicateToken(token))
        );

        assert_eq!(registry.resolve(token), Ok("first"));
    }

    #[test]
    fn with_entry_leaves_record_pending() {
        let registry = CorrelationRegistry::new();
        let token = CorrelationToken::new(9);

        registry.register(token, 10_i32).unwrap();

        let doubled = registry.with_entry(token, |value| {
            *value *= 2;
            *value
        });
        assert_eq!(doubled, Ok(20));
        assert!(registry.contains(token));
        assert_eq!(registry.resolve(token), Ok(20));
    }

    #[test]
    fn with_entry_unknown_token_fails() {
        let registry: CorrelationRegistry<()> = CorrelationRegistry::new();
        let token = CorrelationToken::new(42);

        assert_eq!(
            registry.with_entry(token, |()| ()),
            Err(RoutingError::UnknownToken(token))
        );
    }

    #[test]
    fn len_tracks_in_flight_operations() {
        let registry = CorrelationRegistry::new();
        assert!(registry.is_empty());

        registry.register(CorrelationToken::new(1), ()).unwrap();
        registry.register(CorrelationToken::new(2), ()).unwrap();
        assert_eq!(registry.len(), 2);

        registry.resolve(CorrelationToken::new(1)).unwrap();
        assert_eq!(registry.len(), 1);
    }

    mod properties {
        use proptest::prelude::*;

        use super::*;

        proptest! {
            // Any set of distinct tokens registers cleanly and each
            // resolves exactly once.
            #[test]
            fn distinct_tokens_resolve_exactly_once(values in proptest::collection::hash_set(1_u64..10_000, 1..50)) {
                let registry = CorrelationRegistry::new();

                for value in &values {
                    let token = CorrelationToken::new(*value);
                    prop_assert!(registry.register(token, *value).is_ok());
                }

                prop_assert_eq!(registry.len(), values.len());

                for value in &values {
                    let token = CorrelationToken::new(*value);
                    prop_assert_eq!(registry.resolve(token), Ok(*value));
                    prop_assert_eq!(
                        registry.resolve(token),
                        Err(RoutingError::UnknownToken(token))
                    );
                }

                prop_assert!(registry.is_empty());
            }
        }
    }
}
