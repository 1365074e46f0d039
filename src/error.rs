//! Typed errors for the aggregation core.
//!
//! Everything above the aggregator (loading, rendering, serving) uses
//! `anyhow`; these variants are the precondition violations a caller can
//! match on.

use crate::models::CategoryField;
use thiserror::Error;

/// Errors raised by the windowed metric aggregator.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum AggregationError {
    /// A maximum/minimum was required over zero rows.
    #[error("aggregation requires at least one event")]
    EmptyInput,

    /// No opportunity total exists for a category value. `category` is
    /// `None` when the totals table is empty altogether.
    #[error("no opportunity total for {field}{}", describe_category(.category))]
    MissingTotals {
        field: CategoryField,
        category: Option<String>,
    },

    /// The requested category field is not part of the event schema.
    #[error("unknown category field: '{0}'")]
    UnknownField(String),

    /// A slot value could not be parsed to an integer.
    #[error("malformed slot value: '{0}'")]
    MalformedSlot(String),
}

fn describe_category(category: &Option<String>) -> String {
    match category {
        Some(value) => format!(" value '{}'", value),
        None => " (totals table is empty)".to_string(),
    }
}
