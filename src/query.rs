//! Filter builder for FluxDB `FIND` queries
//!
//! Builds the filter documents the server understands: a field mapped to a
//! plain value matches by equality, a field mapped to a one-entry document
//! keyed by an operator (`$gt`, `$ne`, ...) is an operator expression.
//! Operators are evaluated by the server, never by the client, and the
//! server decides which of them it supports. The builder passes every
//! operator through unchecked; one the server does not know is for the
//! server to reject or ignore.

use std::fmt;

use crate::document::{Document, Value};

/// Comparison operator
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Op {
    Ne,
    Gt,
    Gte,
    Lt,
    Lte,
    Contains,
    StartsWith,
    EndsWith,
    Exists,
}

impl Op {
    pub fn as_str(&self) -> &'static str {
        match self {
            Op::Ne => "$ne",
            Op::Gt => "$gt",
            Op::Gte => "$gte",
            Op::Lt => "$lt",
            Op::Lte => "$lte",
            Op::Contains => "$contains",
            Op::StartsWith => "$startsWith",
            Op::EndsWith => "$endsWith",
            Op::Exists => "$exists",
        }
    }
}

impl fmt::Display for Op {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// A single condition on one field
#[derive(Debug, Clone, PartialEq)]
pub enum Filter {
    Eq(String, Value),
    Cmp(String, Op, Value),
}

impl Filter {
    pub fn field(&self) -> &str {
        match self {
            Filter::Eq(field, _) | Filter::Cmp(field, _, _) => field,
        }
    }

    /// Value stored under the field in the filter document
    fn to_value(&self) -> Value {
        match self {
            Filter::Eq(_, value) => value.clone(),
            Filter::Cmp(_, op, value) => Document::new().with(op.as_str(), value.clone()).into(),
        }
    }

    /// Filter document holding only this condition
    pub fn into_document(self) -> Document {
        filter([self])
    }
}

/// Field expression builder for fluent filter construction
pub struct Field {
    name: String,
}

impl Field {
    pub fn new(name: impl Into<String>) -> Self {
        Self { name: name.into() }
    }

    pub fn eq(self, value: impl Into<Value>) -> Filter {
        Filter::Eq(self.name, value.into())
    }

    pub fn ne(self, value: impl Into<Value>) -> Filter {
        self.cmp(Op::Ne, value)
    }

    pub fn gt(self, value: i64) -> Filter {
        self.cmp(Op::Gt, value)
    }

    pub fn gte(self, value: i64) -> Filter {
        self.cmp(Op::Gte, value)
    }

    pub fn lt(self, value: i64) -> Filter {
        self.cmp(Op::Lt, value)
    }

    pub fn lte(self, value: i64) -> Filter {
        self.cmp(Op::Lte, value)
    }

    pub fn contains(self, value: impl Into<String>) -> Filter {
        self.cmp(Op::Contains, value.into())
    }

    pub fn starts_with(self, value: impl Into<String>) -> Filter {
        self.cmp(Op::StartsWith, value.into())
    }

    pub fn ends_with(self, value: impl Into<String>) -> Filter {
        self.cmp(Op::EndsWith, value.into())
    }

    pub fn exists(self, value: bool) -> Filter {
        self.cmp(Op::Exists, value)
    }

    fn cmp(self, op: Op, value: impl Into<Value>) -> Filter {
        Filter::Cmp(self.name, op, value.into())
    }
}

/// Create a field expression
pub fn field(name: impl Into<String>) -> Field {
    Field::new(name)
}

/// Combine conditions into one filter document; all must hold.
///
/// A later condition on the same field replaces an earlier one, since a
/// document holds each field once.
///
/// ```
/// use fluxdb::query::{field, filter};
///
/// let query = filter([field("type").eq("lead"), field("value").gt(1000)]);
/// assert_eq!(query.to_json(), r#"{"type":"lead","value":{"$gt":1000}}"#);
/// ```
pub fn filter(conditions: impl IntoIterator<Item = Filter>) -> Document {
    conditions
        .into_iter()
        .map(|c| (c.field().to_string(), c.to_value()))
        .collect()
}
