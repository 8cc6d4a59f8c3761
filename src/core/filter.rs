//! Subscription filters
//!
//! A client describes what it wants to hear about with a list of clauses:
//!
//! ```json
//! {"clauses": [{"field": "/uri", "operator": "one_of", "value": ["https://a.com"]}]}
//! ```
//!
//! [`RawFilter`] is the shape as received on the wire. [`SubscriptionFilter`]
//! is the validated, immutable form the broker stores. Validation runs over
//! every clause before anything is built, so a filter is either accepted
//! whole or rejected whole.

use super::error::FilterError;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::collections::BTreeSet;

/// Wire name of the document URI field
pub const DOCUMENT_URI_FIELD: &str = "/uri";

/// Wire name of the set-membership operator
pub const ONE_OF_OPERATOR: &str = "one_of";

/// Filter as sent by the client, before validation
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct RawFilter {
    #[serde(default)]
    pub clauses: Vec<RawClause>,
}

/// One clause as sent by the client
///
/// Every part is optional here so that validation, not deserialization,
/// decides what is wrong with it.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct RawClause {
    #[serde(default)]
    pub field: Option<String>,
    #[serde(default)]
    pub operator: Option<String>,
    #[serde(default)]
    pub value: Option<Value>,
}

impl RawClause {
    /// Convenience constructor for a `/uri one_of [...]` clause
    pub fn uri_one_of<I, S>(uris: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        Self {
            field: Some(DOCUMENT_URI_FIELD.to_string()),
            operator: Some(ONE_OF_OPERATOR.to_string()),
            value: Some(Value::Array(
                uris.into_iter().map(|u| Value::String(u.into())).collect(),
            )),
        }
    }
}

impl RawFilter {
    pub fn new(clauses: Vec<RawClause>) -> Self {
        Self { clauses }
    }
}

/// Fields a clause may test
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FilterField {
    DocumentUri,
}

impl FilterField {
    fn parse(raw: &str) -> Option<Self> {
        raw.eq_ignore_ascii_case(DOCUMENT_URI_FIELD)
            .then_some(FilterField::DocumentUri)
    }
}

/// Comparison operators
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FilterOperator {
    OneOf,
}

impl FilterOperator {
    fn parse(raw: &str) -> Option<Self> {
        raw.eq_ignore_ascii_case(ONE_OF_OPERATOR)
            .then_some(FilterOperator::OneOf)
    }
}

/// A validated clause
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FilterClause {
    pub field: FilterField,
    pub operator: FilterOperator,
    values: BTreeSet<String>,
}

impl FilterClause {
    pub fn values(&self) -> impl Iterator<Item = &str> {
        self.values.iter().map(String::as_str)
    }

    fn matches_uri(&self, uri: &str) -> bool {
        match (self.field, self.operator) {
            (FilterField::DocumentUri, FilterOperator::OneOf) => self.values.contains(uri),
        }
    }
}

/// Validated, immutable subscription filter
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SubscriptionFilter {
    clauses: Vec<FilterClause>,
}

impl SubscriptionFilter {
    /// Validate a raw filter
    pub fn parse(raw: &RawFilter) -> Result<Self, FilterError> {
        if raw.clauses.is_empty() {
            return Err(FilterError::NoClauses);
        }

        let clauses = raw
            .clauses
            .iter()
            .map(parse_clause)
            .collect::<Result<Vec<_>, _>>()?;

        Ok(Self { clauses })
    }

    pub fn clauses(&self) -> &[FilterClause] {
        &self.clauses
    }

    /// Whether an annotation on `uri` passes every clause
    pub fn matches_uri(&self, uri: &str) -> bool {
        self.clauses.iter().all(|clause| clause.matches_uri(uri))
    }
}

/// Validate a raw filter into a [`SubscriptionFilter`]
pub fn parse_filter(raw: &RawFilter) -> Result<SubscriptionFilter, FilterError> {
    SubscriptionFilter::parse(raw)
}

fn parse_clause(raw: &RawClause) -> Result<FilterClause, FilterError> {
    let field_name = raw.field.as_deref().unwrap_or_default();
    let field = FilterField::parse(field_name)
        .ok_or_else(|| FilterError::UnsupportedField(field_name.to_string()))?;

    let operator_name = raw.operator.as_deref().unwrap_or_default();
    let operator = FilterOperator::parse(operator_name)
        .ok_or_else(|| FilterError::UnsupportedOperator(operator_name.to_string()))?;

    let items = match &raw.value {
        Some(Value::Array(items)) if !items.is_empty() => items,
        Some(Value::Array(_)) | Some(Value::Null) | None => {
            return Err(FilterError::EmptyValues {
                field: field_name.to_string(),
            });
        }
        Some(_) => {
            return Err(FilterError::InvalidValue {
                field: field_name.to_string(),
            });
        }
    };

    let values = items
        .iter()
        .map(|item| {
            item.as_str()
                .map(str::to_string)
                .ok_or_else(|| FilterError::InvalidValue {
                    field: field_name.to_string(),
                })
        })
        .collect::<Result<BTreeSet<_>, _>>()?;

    Ok(FilterClause {
        field,
        operator,
        values,
    })
}
