//! # Filter DSL
//!
//! A backend-agnostic description of query predicates, ordering, and
//! pagination. A [`Filter`] performs no execution: the repository engine
//! translates it into a SQL statement. Conditions live in a map keyed by
//! field name, ordering is an ordered sequence applied with ties broken by
//! later entries, and named [`Scope`]s are reusable add-only fragments
//! composed left-to-right.

use std::collections::BTreeMap;

use chrono::{DateTime, Utc};
use sea_orm::Value;
use serde_json::Value as JsonValue;

/// Closed set of comparison operators.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Operator {
    Eq,
    Ne,
    Gt,
    Gte,
    Lt,
    Lte,
    /// SQL LIKE pattern match.
    Like,
    /// Set membership over a [`FieldValue::List`].
    In,
}

impl Operator {
    /// Parse an operator token. Unrecognized tokens fall back to equality;
    /// this is deliberate permissiveness, not a validation error.
    pub fn parse(token: &str) -> Self {
        match token {
            "=" | "eq" => Self::Eq,
            "!=" | "<>" | "ne" => Self::Ne,
            ">" | "gt" => Self::Gt,
            ">=" | "gte" => Self::Gte,
            "<" | "lt" => Self::Lt,
            "<=" | "lte" => Self::Lte,
            "like" => Self::Like,
            "in" => Self::In,
            _ => Self::Eq,
        }
    }
}

/// Tagged value union carried by conditions and partial updates.
#[derive(Debug, Clone, PartialEq)]
pub enum FieldValue {
    Null,
    Bool(bool),
    Int(i64),
    Float(f64),
    Text(String),
    Timestamp(DateTime<Utc>),
    Json(JsonValue),
    List(Vec<FieldValue>),
}

impl FieldValue {
    /// Convert into a SeaORM scalar value. A `List` is encoded as a JSON
    /// array; operators that need true set semantics (`In`) unpack the list
    /// themselves before conversion.
    pub fn into_scalar(self) -> Value {
        match self {
            Self::Null => Value::String(None),
            Self::Bool(v) => v.into(),
            Self::Int(v) => v.into(),
            Self::Float(v) => v.into(),
            Self::Text(v) => v.into(),
            Self::Timestamp(v) => v.into(),
            Self::Json(v) => v.into(),
            Self::List(items) => {
                JsonValue::Array(items.into_iter().map(FieldValue::into_json).collect()).into()
            }
        }
    }

    fn into_json(self) -> JsonValue {
        match self {
            Self::Null => JsonValue::Null,
            Self::Bool(v) => v.into(),
            Self::Int(v) => v.into(),
            Self::Float(v) => v.into(),
            Self::Text(v) => v.into(),
            Self::Timestamp(v) => v.to_rfc3339().into(),
            Self::Json(v) => v,
            Self::List(items) => {
                JsonValue::Array(items.into_iter().map(FieldValue::into_json).collect())
            }
        }
    }
}

impl From<&str> for FieldValue {
    fn from(v: &str) -> Self {
        Self::Text(v.to_string())
    }
}

impl From<String> for FieldValue {
    fn from(v: String) -> Self {
        Self::Text(v)
    }
}

impl From<i64> for FieldValue {
    fn from(v: i64) -> Self {
        Self::Int(v)
    }
}

impl From<i32> for FieldValue {
    fn from(v: i32) -> Self {
        Self::Int(v as i64)
    }
}

impl From<f64> for FieldValue {
    fn from(v: f64) -> Self {
        Self::Float(v)
    }
}

impl From<bool> for FieldValue {
    fn from(v: bool) -> Self {
        Self::Bool(v)
    }
}

impl From<DateTime<Utc>> for FieldValue {
    fn from(v: DateTime<Utc>) -> Self {
        Self::Timestamp(v)
    }
}

impl<T: Into<FieldValue>> From<Vec<T>> for FieldValue {
    fn from(v: Vec<T>) -> Self {
        Self::List(v.into_iter().map(Into::into).collect())
    }
}

/// One predicate on one field.
#[derive(Debug, Clone, PartialEq)]
pub struct WhereCondition {
    pub operator: Operator,
    pub value: FieldValue,
}

/// Sort direction.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Direction {
    Ascending,
    Descending,
}

/// One ordering entry; applied in sequence order, ties broken by later
/// entries.
#[derive(Debug, Clone, PartialEq)]
pub struct OrderBy {
    pub field: String,
    pub direction: Direction,
}

/// A named, reusable query fragment: predicates, ordering, and pagination
/// that can be composed onto any filter. Scopes are plain data, so the
/// add-only composition guarantee holds structurally.
#[derive(Debug, Clone, Default)]
pub struct Scope {
    name: String,
    conditions: BTreeMap<String, WhereCondition>,
    order_by: Vec<OrderBy>,
    limit: Option<u64>,
    offset: Option<u64>,
}

impl Scope {
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            ..Self::default()
        }
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn where_field(
        mut self,
        field: impl Into<String>,
        operator: Operator,
        value: impl Into<FieldValue>,
    ) -> Self {
        self.conditions.insert(
            field.into(),
            WhereCondition {
                operator,
                value: value.into(),
            },
        );
        self
    }

    pub fn order_by(mut self, field: impl Into<String>, direction: Direction) -> Self {
        self.order_by.push(OrderBy {
            field: field.into(),
            direction,
        });
        self
    }

    /// Non-positive means unrestricted.
    pub fn limit(mut self, limit: i64) -> Self {
        self.limit = (limit > 0).then_some(limit as u64);
        self
    }

    /// Non-positive means no offset.
    pub fn offset(mut self, offset: i64) -> Self {
        self.offset = (offset > 0).then_some(offset as u64);
        self
    }
}

/// Immutable query description consumed by the repository engine.
#[derive(Debug, Clone, Default)]
pub struct Filter {
    conditions: BTreeMap<String, WhereCondition>,
    order_by: Vec<OrderBy>,
    limit: Option<u64>,
    offset: Option<u64>,
    scopes: Vec<Scope>,
    include_deleted: bool,
}

impl Filter {
    pub fn new() -> Self {
        Self::default()
    }

    /// Add a predicate. Field keys are unique: a later predicate on the same
    /// field replaces the earlier one (direct builder calls only; scope
    /// composition never replaces).
    pub fn where_field(
        mut self,
        field: impl Into<String>,
        operator: Operator,
        value: impl Into<FieldValue>,
    ) -> Self {
        self.conditions.insert(
            field.into(),
            WhereCondition {
                operator,
                value: value.into(),
            },
        );
        self
    }

    /// Shorthand for an equality predicate.
    pub fn where_eq(self, field: impl Into<String>, value: impl Into<FieldValue>) -> Self {
        self.where_field(field, Operator::Eq, value)
    }

    pub fn order_by(mut self, field: impl Into<String>, direction: Direction) -> Self {
        self.order_by.push(OrderBy {
            field: field.into(),
            direction,
        });
        self
    }

    pub fn order_by_asc(self, field: impl Into<String>) -> Self {
        self.order_by(field, Direction::Ascending)
    }

    pub fn order_by_desc(self, field: impl Into<String>) -> Self {
        self.order_by(field, Direction::Descending)
    }

    /// Non-positive means unrestricted.
    pub fn limit(mut self, limit: i64) -> Self {
        self.limit = (limit > 0).then_some(limit as u64);
        self
    }

    /// Non-positive means no offset.
    pub fn offset(mut self, offset: i64) -> Self {
        self.offset = (offset > 0).then_some(offset as u64);
        self
    }

    /// Append a named scope; scopes compose left-to-right at resolution.
    pub fn scope(mut self, scope: Scope) -> Self {
        self.scopes.push(scope);
        self
    }

    /// Include soft-deleted rows (unscoped access).
    pub fn include_deleted(mut self) -> Self {
        self.include_deleted = true;
        self
    }

    pub fn is_include_deleted(&self) -> bool {
        self.include_deleted
    }

    /// Fold the scope sequence into a flat filter. Predicates compose
    /// first-wins so an earlier predicate is never removed; ordering entries
    /// append in scope order; pagination from a scope applies only where the
    /// filter has none.
    pub fn resolve(&self) -> ResolvedFilter {
        let mut conditions = self.conditions.clone();
        let mut order_by = self.order_by.clone();
        let mut limit = self.limit;
        let mut offset = self.offset;

        for scope in &self.scopes {
            for (field, condition) in &scope.conditions {
                conditions
                    .entry(field.clone())
                    .or_insert_with(|| condition.clone());
            }
            order_by.extend(scope.order_by.iter().cloned());
            if limit.is_none() {
                limit = scope.limit;
            }
            if offset.is_none() {
                offset = scope.offset;
            }
        }

        ResolvedFilter {
            conditions,
            order_by,
            limit,
            offset,
            include_deleted: self.include_deleted,
        }
    }
}

/// A filter with its scopes folded in; what the engine actually translates.
#[derive(Debug, Clone)]
pub struct ResolvedFilter {
    pub conditions: BTreeMap<String, WhereCondition>,
    pub order_by: Vec<OrderBy>,
    pub limit: Option<u64>,
    pub offset: Option<u64>,
    pub include_deleted: bool,
}
