//! Outbound Request Construction
//!
//! Requests are trees of named elements: scalar fields set once, repeated
//! fields appended to, nested groups for structured parameters (strategy
//! parameter lists, scoped filters), and choice elements selecting one
//! variant of a request type. The builder mirrors how the gateway's
//! request schema is populated; element order is preserved because some
//! operations (broker strategies in particular) are order-sensitive.

use serde::{Deserialize, Serialize};

use crate::domain::event::FieldValue;

// =============================================================================
// Elements
// =============================================================================

/// One element of a request: a scalar, a repeated scalar, a nested group,
/// a repeated group, or a choice.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum Element {
    /// Scalar field.
    Value(FieldValue),
    /// Repeated scalar field, built by appending.
    Repeated(Vec<FieldValue>),
    /// Nested group of named elements.
    Group(ElementGroup),
    /// Repeated group, one entry per appended row.
    GroupList(Vec<ElementGroup>),
    /// Choice element: exactly one named variant is selected.
    Choice {
        /// Selected variant name.
        variant: String,
        /// Variant content; empty for marker-style choices.
        content: ElementGroup,
    },
}

/// An ordered collection of named elements.
#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
pub struct ElementGroup {
    entries: Vec<(String, Element)>,
}

impl ElementGroup {
    /// Create an empty group.
    #[must_use]
    pub const fn new() -> Self {
        Self {
            entries: Vec::new(),
        }
    }

    /// Set a scalar field, replacing any existing element of that name.
    #[must_use]
    pub fn set(mut self, name: &str, value: impl Into<FieldValue>) -> Self {
        self.put(name, Element::Value(value.into()));
        self
    }

    /// Append a value to a repeated field.
    #[must_use]
    pub fn append(mut self, name: &str, value: impl Into<FieldValue>) -> Self {
        let value = value.into();
        match self.position(name) {
            Some(index) => match &mut self.entries[index].1 {
                Element::Repeated(values) => values.push(value),
                other => *other = Element::Repeated(vec![value]),
            },
            None => {
                self.entries
                    .push((name.to_string(), Element::Repeated(vec![value])));
            }
        }
        self
    }

    /// Set a nested group built by the closure, replacing any existing
    /// element of that name.
    #[must_use]
    pub fn group(mut self, name: &str, build: impl FnOnce(Self) -> Self) -> Self {
        let content = build(Self::new());
        self.put(name, Element::Group(content));
        self
    }

    /// Append one row to a repeated group.
    #[must_use]
    pub fn append_row(mut self, name: &str, build: impl FnOnce(Self) -> Self) -> Self {
        let row = build(Self::new());
        match self.position(name) {
            Some(index) => match &mut self.entries[index].1 {
                Element::GroupList(rows) => rows.push(row),
                other => *other = Element::GroupList(vec![row]),
            },
            None => {
                self.entries
                    .push((name.to_string(), Element::GroupList(vec![row])));
            }
        }
        self
    }

    /// Select a choice variant with no content.
    #[must_use]
    pub fn choice(self, name: &str, variant: &str) -> Self {
        self.choice_with(name, variant, |group| group)
    }

    /// Select a choice variant and populate its content.
    #[must_use]
    pub fn choice_with(mut self, name: &str, variant: &str, build: impl FnOnce(Self) -> Self) -> Self {
        let content = build(Self::new());
        self.put(
            name,
            Element::Choice {
                variant: variant.to_string(),
                content,
            },
        );
        self
    }

    /// Look up an element by name.
    #[must_use]
    pub fn get(&self, name: &str) -> Option<&Element> {
        self.entries
            .iter()
            .find(|(entry_name, _)| entry_name == name)
            .map(|(_, element)| element)
    }

    /// Scalar field accessor.
    #[must_use]
    pub fn get_value(&self, name: &str) -> Option<&FieldValue> {
        match self.get(name) {
            Some(Element::Value(value)) => Some(value),
            _ => None,
        }
    }

    /// Repeated field accessor.
    #[must_use]
    pub fn get_repeated(&self, name: &str) -> Option<&[FieldValue]> {
        match self.get(name) {
            Some(Element::Repeated(values)) => Some(values),
            _ => None,
        }
    }

    /// Iterate entries in insertion order.
    pub fn entries(&self) -> impl Iterator<Item = (&str, &Element)> {
        self.entries
            .iter()
            .map(|(name, element)| (name.as_str(), element))
    }

    /// Whether the group has no elements.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    fn put(&mut self, name: &str, element: Element) {
        match self.position(name) {
            Some(index) => self.entries[index].1 = element,
            None => self.entries.push((name.to_string(), element)),
        }
    }

    fn position(&self, name: &str) -> Option<usize> {
        self.entries
            .iter()
            .position(|(entry_name, _)| entry_name == name)
    }
}

// =============================================================================
// Request
// =============================================================================

/// A fully built request, ready to dispatch with a correlation token.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct GatewayRequest {
    operation: String,
    root: ElementGroup,
}

impl GatewayRequest {
    /// The operation name this request invokes.
    #[must_use]
    pub fn operation(&self) -> &str {
        &self.operation
    }

    /// The request's element tree.
    #[must_use]
    pub const fn root(&self) -> &ElementGroup {
        &self.root
    }
}

/// Builder for [`GatewayRequest`].
///
/// # Example
///
/// ```rust
/// use gateway_session::domain::request::RequestBuilder;
///
/// let request = RequestBuilder::new("CreateOrder")
///     .set("TICKER", "CLN7 Comdty")
///     .set("AMOUNT", 100)
///     .set("ORDER_TYPE", "MKT")
///     .set("SIDE", "BUY")
///     .build();
///
/// assert_eq!(request.operation(), "CreateOrder");
/// ```
#[derive(Debug, Clone)]
pub struct RequestBuilder {
    operation: String,
    root: ElementGroup,
}

impl RequestBuilder {
    /// Start a request for the named operation.
    #[must_use]
    pub fn new(operation: &str) -> Self {
        Self {
            operation: operation.to_string(),
            root: ElementGroup::new(),
        }
    }

    /// Set a scalar field.
    #[must_use]
    pub fn set(mut self, name: &str, value: impl Into<FieldValue>) -> Self {
        self.root = self.root.set(name, value);
        self
    }

    /// Append a value to a repeated field.
    #[must_use]
    pub fn append(mut self, name: &str, value: impl Into<FieldValue>) -> Self {
        self.root = self.root.append(name, value);
        self
    }

    /// Populate a nested group.
    #[must_use]
    pub fn group(mut self, name: &str, build: impl FnOnce(ElementGroup) -> ElementGroup) -> Self {
        self.root = self.root.group(name, build);
        self
    }

    /// Append one row to a repeated group.
    #[must_use]
    pub fn append_row(
        mut self,
        name: &str,
        build: impl FnOnce(ElementGroup) -> ElementGroup,
    ) -> Self {
        self.root = self.root.append_row(name, build);
        self
    }

    /// Select a choice variant with no content.
    #[must_use]
    pub fn choice(mut self, name: &str, variant: &str) -> Self {
        self.root = self.root.choice(name, variant);
        self
    }

    /// Select a choice variant and populate its content.
    #[must_use]
    pub fn choice_with(
        mut self,
        name: &str,
        variant: &str,
        build: impl FnOnce(ElementGroup) -> ElementGroup,
    ) -> Self {
        self.root = self.root.choice_with(name, variant, build);
        self
    }

    /// Finish the request.
    #[must_use]
    pub fn build(self) -> GatewayRequest {
        GatewayRequest {
            operation: self.operation,
            root: self.root,
        }
    }
}

// =============================================================================
// Tests
// =============================================================================

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn set_replaces_existing_scalar() {
        let request = RequestBuilder::new("CreateOrder")
            .set("TICKER", "IBM US Equity")
            .set("TICKER", "MSFT US Equity")
            .build();

        assert_eq!(
            request.root().get_value("TICKER"),
            Some(&FieldValue::from("MSFT US Equity"))
        );
    }

    #[test]
    fn append_builds_repeated_field_in_order() {
        let request = RequestBuilder::new("GroupRoute")
            .append("ORDER_ID", 3_663_923_i64)
            .append("ORDER_ID", 3_663_924_i64)
            .build();

        let orders = request.root().get_repeated("ORDER_ID").unwrap();
        assert_eq!(
            orders,
            &[FieldValue::Int(3_663_923), FieldValue::Int(3_663_924)]
        );
    }

    #[test]
    fn nested_group_holds_strategy_parameters() {
        let request = RequestBuilder::new("RouteOrder")
            .group("STRATEGY_PARAMS", |group| {
                group
                    .set("STRATEGY_NAME", "VWAP")
                    .append_row("STRATEGY_FIELDS", |row| {
                        row.set("FIELD_DATA", "09:30:00").set("FIELD_INDICATOR", 0)
                    })
                    .append_row("STRATEGY_FIELDS", |row| {
                        row.set("FIELD_DATA", "10:30:00").set("FIELD_INDICATOR", 0)
                    })
            })
            .build();

        let Some(Element::Group(strategy)) = request.root().get("STRATEGY_PARAMS") else {
            panic!("expected STRATEGY_PARAMS group");
        };
        assert_eq!(
            strategy.get_value("STRATEGY_NAME"),
            Some(&FieldValue::from("VWAP"))
        );

        let Some(Element::GroupList(rows)) = strategy.get("STRATEGY_FIELDS") else {
            panic!("expected STRATEGY_FIELDS rows");
        };
        assert_eq!(rows.len(), 2);
        assert_eq!(
            rows[0].get_value("FIELD_DATA"),
            Some(&FieldValue::from("09:30:00"))
        );
    }

    #[test]
    fn choice_selects_variant() {
        let request = RequestBuilder::new("GroupRoute")
            .choice("REQUEST_TYPE", "Spread")
            .build();

        let Some(Element::Choice { variant, content }) = request.root().get("REQUEST_TYPE") else {
            panic!("expected REQUEST_TYPE choice");
        };
        assert_eq!(variant, "Spread");
        assert!(content.is_empty());
    }

    #[test]
    fn entries_preserve_insertion_order() {
        let request = RequestBuilder::new("CreateOrder")
            .set("TICKER", "IBM US Equity")
            .set("AMOUNT", 100)
            .set("SIDE", "BUY")
            .build();

        let names: Vec<&str> = request.root().entries().map(|(name, _)| name).collect();
        assert_eq!(names, vec!["TICKER", "AMOUNT", "SIDE"]);
    }
}
