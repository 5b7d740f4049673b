//! # Entity Model
//!
//! Attribute layering for persisted records: every entity embeds
//! [`BaseFields`] (identity, timestamps, soft delete) and may additionally
//! embed [`AuditFields`] (actor trail, optimistic-concurrency version) and a
//! tenant identifier. The [`Record`] trait exposes these layers to the
//! generic repository engine as a small capability set instead of a class
//! hierarchy: tenancy and audit are optional, defaulted methods that a type
//! overrides when it carries the corresponding fields.

use chrono::{DateTime, Utc};
use sea_orm::{QueryResult, Value};

use crate::error::RepositoryError;

/// Column names shared by every persisted entity.
pub mod columns {
    pub const ID: &str = "id";
    pub const TENANT_ID: &str = "tenant_id";
    pub const CREATED_AT: &str = "created_at";
    pub const UPDATED_AT: &str = "updated_at";
    pub const DELETED_AT: &str = "deleted_at";
    pub const CREATED_BY: &str = "created_by";
    pub const UPDATED_BY: &str = "updated_by";
    pub const DELETED_BY: &str = "deleted_by";
    pub const VERSION: &str = "version";
}

/// Identity and lifecycle fields carried by every entity.
///
/// `id` is empty until the first successful persist, after which it is
/// immutable. A non-null `deleted_at` marks the row as soft-deleted.
#[derive(Debug, Clone, PartialEq)]
pub struct BaseFields {
    pub id: String,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
    pub deleted_at: Option<DateTime<Utc>>,
}

impl Default for BaseFields {
    fn default() -> Self {
        Self {
            id: String::new(),
            created_at: DateTime::UNIX_EPOCH,
            updated_at: DateTime::UNIX_EPOCH,
            deleted_at: None,
        }
    }
}

impl BaseFields {
    /// Read the base columns out of a query result row.
    pub fn from_row(row: &QueryResult) -> Result<Self, RepositoryError> {
        Ok(Self {
            id: row
                .try_get("", columns::ID)
                .map_err(RepositoryError::database_error)?,
            created_at: row
                .try_get("", columns::CREATED_AT)
                .map_err(RepositoryError::database_error)?,
            updated_at: row
                .try_get("", columns::UPDATED_AT)
                .map_err(RepositoryError::database_error)?,
            deleted_at: row
                .try_get("", columns::DELETED_AT)
                .map_err(RepositoryError::database_error)?,
        })
    }
}

/// Audit trail and optimistic-concurrency fields.
///
/// `version` starts at 1 on create and increases by exactly 1 on every
/// successful update; concurrent writers are detected by the engine's
/// version predicate, never by locking.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct AuditFields {
    pub created_by: Option<String>,
    pub updated_by: Option<String>,
    pub deleted_by: Option<String>,
    pub version: i64,
}

impl AuditFields {
    /// Read the audit columns out of a query result row.
    pub fn from_row(row: &QueryResult) -> Result<Self, RepositoryError> {
        Ok(Self {
            created_by: row
                .try_get("", columns::CREATED_BY)
                .map_err(RepositoryError::database_error)?,
            updated_by: row
                .try_get("", columns::UPDATED_BY)
                .map_err(RepositoryError::database_error)?,
            deleted_by: row
                .try_get("", columns::DELETED_BY)
                .map_err(RepositoryError::database_error)?,
            version: row
                .try_get("", columns::VERSION)
                .map_err(RepositoryError::database_error)?,
        })
    }
}

/// Capability set required of every persisted entity type.
///
/// Required: a storage name, the column list, a row codec, and access to the
/// embedded [`BaseFields`]. Optional: tenancy and audit capabilities, which
/// a type opts into by overriding the defaulted methods (and keeping the
/// associated flags consistent with them). The engine resolves the optional
/// capabilities through `Self::tenant_scoped()` / `Self::audited()`, plain
/// associated functions, so the check is per type, not per call.
pub trait Record: Clone + Send + Sync + Sized {
    /// Storage location (table) name.
    fn table_name() -> &'static str;

    /// Full column list in the order produced by [`Record::values`].
    fn columns() -> &'static [&'static str];

    /// The entity encoded as one value per column, in [`Record::columns`]
    /// order.
    fn values(&self) -> Vec<Value>;

    /// Decode an entity from a query result row.
    fn from_row(row: &QueryResult) -> Result<Self, RepositoryError>;

    fn base(&self) -> &BaseFields;
    fn base_mut(&mut self) -> &mut BaseFields;

    /// Whether reads and writes of this type are restricted to the ambient
    /// tenant. Types overriding this must also override [`Record::tenant_id`]
    /// and [`Record::set_tenant_id`].
    fn tenant_scoped() -> bool {
        false
    }

    fn tenant_id(&self) -> Option<&str> {
        None
    }

    fn set_tenant_id(&mut self, _tenant_id: &str) {}

    /// Whether this type carries [`AuditFields`]. Types overriding this must
    /// also override [`Record::audit`] and [`Record::audit_mut`].
    fn audited() -> bool {
        false
    }

    fn audit(&self) -> Option<&AuditFields> {
        None
    }

    fn audit_mut(&mut self) -> Option<&mut AuditFields> {
        None
    }

    /// Entity-level validation, invoked by the engine before writes when
    /// `RepositoryOptions::validate_on_save` is set.
    fn validate(&self) -> Result<(), String> {
        Ok(())
    }

    /// The assigned identity; empty before the first persist.
    fn id(&self) -> &str {
        &self.base().id
    }

    fn set_id(&mut self, id: String) {
        self.base_mut().id = id;
    }

    /// Whether the row is logically removed.
    fn is_soft_deleted(&self) -> bool {
        self.base().deleted_at.is_some()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[derive(Debug, Clone, Default)]
    struct Widget {
        base: BaseFields,
    }

    impl Record for Widget {
        fn table_name() -> &'static str {
            "widgets"
        }

        fn columns() -> &'static [&'static str] {
            &["id", "created_at", "updated_at", "deleted_at"]
        }

        fn values(&self) -> Vec<Value> {
            vec![
                self.base.id.clone().into(),
                self.base.created_at.into(),
                self.base.updated_at.into(),
                self.base.deleted_at.into(),
            ]
        }

        fn from_row(row: &QueryResult) -> Result<Self, RepositoryError> {
            Ok(Self {
                base: BaseFields::from_row(row)?,
            })
        }

        fn base(&self) -> &BaseFields {
            &self.base
        }

        fn base_mut(&mut self) -> &mut BaseFields {
            &mut self.base
        }
    }

    #[test]
    fn capability_defaults_are_off() {
        assert!(!Widget::tenant_scoped());
        assert!(!Widget::audited());
        let w = Widget::default();
        assert_eq!(w.tenant_id(), None);
        assert!(w.audit().is_none());
    }

    #[test]
    fn id_accessors_go_through_base() {
        let mut w = Widget::default();
        assert!(w.id().is_empty());
        w.set_id("w-1".to_string());
        assert_eq!(w.id(), "w-1");
        assert!(!w.is_soft_deleted());
        w.base_mut().deleted_at = Some(Utc::now());
        assert!(w.is_soft_deleted());
    }

    #[test]
    fn values_align_with_columns() {
        let w = Widget::default();
        assert_eq!(Widget::columns().len(), w.values().len());
    }
}
