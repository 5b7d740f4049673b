//! Test utilities for database testing.
//!
//! Provides an in-memory SQLite database provisioned through the migration
//! tracker, plus a tenant-scoped, audited `User` entity that exercises the
//! full attribute set of the repository engine.

use anyhow::Result;
use sea_orm::{ConnectOptions, Database, DatabaseConnection, QueryResult, Value};

use strata::crypto::{decrypt_field, encrypt_field, field_aad, CryptoKey};
use strata::entity::{columns, AuditFields, BaseFields};
use strata::migrate::{MemorySource, Migrator};
use strata::{Record, RepositoryError};

/// Deterministic 32-byte key for the fixture's encrypted column.
pub fn fixture_key() -> CryptoKey {
    CryptoKey::new(vec![0x17; 32]).expect("valid fixture key")
}

/// Tenant-scoped, audited fixture entity. `secret_note` is stored encrypted
/// at rest, bound to its row through the field AAD.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct User {
    pub base: BaseFields,
    pub audit: AuditFields,
    pub tenant_id: String,
    pub email: String,
    pub display_name: String,
    pub secret_note: String,
}

impl User {
    pub fn new(email: &str, display_name: &str) -> Self {
        Self {
            email: email.to_string(),
            display_name: display_name.to_string(),
            ..Self::default()
        }
    }
}

impl Record for User {
    fn table_name() -> &'static str {
        "users"
    }

    fn columns() -> &'static [&'static str] {
        &[
            "id",
            "tenant_id",
            "created_at",
            "updated_at",
            "deleted_at",
            "created_by",
            "updated_by",
            "deleted_by",
            "version",
            "email",
            "display_name",
            "secret_note",
        ]
    }

    fn values(&self) -> Vec<Value> {
        let note = encrypt_field(
            &fixture_key(),
            &field_aad("users", "secret_note", &self.base.id),
            &self.secret_note,
        )
        .expect("field encryption");
        vec![
            self.base.id.clone().into(),
            self.tenant_id.clone().into(),
            self.base.created_at.into(),
            self.base.updated_at.into(),
            self.base.deleted_at.into(),
            self.audit.created_by.clone().into(),
            self.audit.updated_by.clone().into(),
            self.audit.deleted_by.clone().into(),
            self.audit.version.into(),
            self.email.clone().into(),
            self.display_name.clone().into(),
            note.into(),
        ]
    }

    fn from_row(row: &QueryResult) -> Result<Self, RepositoryError> {
        let base = BaseFields::from_row(row)?;
        let stored: String = row
            .try_get("", "secret_note")
            .map_err(RepositoryError::database_error)?;
        let secret_note = decrypt_field(
            &fixture_key(),
            &field_aad("users", "secret_note", &base.id),
            &stored,
        )
        .map_err(|err| RepositoryError::query(format!("secret_note decryption failed: {err}")))?;
        Ok(Self {
            base,
            audit: AuditFields::from_row(row)?,
            tenant_id: row
                .try_get("", columns::TENANT_ID)
                .map_err(RepositoryError::database_error)?,
            email: row
                .try_get("", "email")
                .map_err(RepositoryError::database_error)?,
            display_name: row
                .try_get("", "display_name")
                .map_err(RepositoryError::database_error)?,
            secret_note,
        })
    }

    fn base(&self) -> &BaseFields {
        &self.base
    }

    fn base_mut(&mut self) -> &mut BaseFields {
        &mut self.base
    }

    fn tenant_scoped() -> bool {
        true
    }

    fn tenant_id(&self) -> Option<&str> {
        if self.tenant_id.is_empty() {
            None
        } else {
            Some(&self.tenant_id)
        }
    }

    fn set_tenant_id(&mut self, tenant_id: &str) {
        self.tenant_id = tenant_id.to_string();
    }

    fn audited() -> bool {
        true
    }

    fn audit(&self) -> Option<&AuditFields> {
        Some(&self.audit)
    }

    fn audit_mut(&mut self) -> Option<&mut AuditFields> {
        Some(&mut self.audit)
    }

    fn validate(&self) -> Result<(), String> {
        if !self.email.contains('@') {
            return Err(format!("invalid email: {}", self.email));
        }
        Ok(())
    }
}

/// Migration steps that provision the `users` fixture table.
pub fn user_schema() -> MemorySource {
    MemorySource::new().step(
        1,
        "create_users",
        "CREATE TABLE users (
            id TEXT PRIMARY KEY,
            tenant_id TEXT NOT NULL,
            created_at TEXT NOT NULL,
            updated_at TEXT NOT NULL,
            deleted_at TEXT,
            created_by TEXT,
            updated_by TEXT,
            deleted_by TEXT,
            version INTEGER NOT NULL,
            email TEXT NOT NULL,
            display_name TEXT NOT NULL,
            secret_note TEXT NOT NULL
        )",
        "DROP TABLE users",
    )
}

/// Sets up an in-memory SQLite database with the fixture schema applied.
pub async fn setup_test_db() -> Result<DatabaseConnection> {
    // A single pooled connection keeps every handle on the same in-memory
    // database.
    let mut opt = ConnectOptions::new("sqlite::memory:");
    opt.max_connections(1).sqlx_logging(false);
    let db = Database::connect(opt).await?;

    Migrator::new(&db, user_schema()).migrate().await?;

    Ok(db)
}
