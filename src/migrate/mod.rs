//! # Migration State Tracker
//!
//! A state machine over `(version, dirty)` persisted in a single-row
//! tracking table in the target database. "Clean at version N" is stable;
//! "dirty at version N" means a step started and did not finish cleanly and
//! requires operator intervention: no step re-runs automatically after a
//! dirty transition, only [`Migrator::force`] (or a corrected reapplication
//! after it) recovers the tracker.
//!
//! The tracker assumes single-writer execution; concurrent migration runs
//! against the same database must be serialized externally, e.g. by a
//! deployment-time lock.

mod source;

pub use source::{DirSource, MemorySource, MigrationSource, MigrationStep};

use sea_orm::sea_query::{Alias, ColumnDef, Expr, Query, Table};
use sea_orm::{ConnectionTrait, DatabaseBackend, DatabaseConnection, Statement, TransactionTrait};

use crate::error::RepositoryError;

const DEFAULT_TRACKING_TABLE: &str = "schema_migrations";

/// Point-in-time report of the tracker's state.
///
/// `applied` and `pending` are best-effort counts derived from the source's
/// step list; if the source cannot be enumerated they are reported as zero
/// rather than failing the status call.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MigrationStatus {
    pub version: u64,
    pub dirty: bool,
    pub applied: usize,
    pub pending: usize,
}

/// Forward/backward schema migration tracker.
pub struct Migrator<'a, S: MigrationSource> {
    db: &'a DatabaseConnection,
    source: S,
    table: String,
}

impl<'a, S: MigrationSource> Migrator<'a, S> {
    pub fn new(db: &'a DatabaseConnection, source: S) -> Self {
        Self {
            db,
            source,
            table: DEFAULT_TRACKING_TABLE.to_string(),
        }
    }

    /// Use a non-default tracking table name.
    pub fn with_table(mut self, table: impl Into<String>) -> Self {
        self.table = table.into();
        self
    }

    /// Apply all unapplied steps in ascending order, ending clean at the
    /// highest source version. On a step failure the tracker is left dirty
    /// at the failed step's version and no further step runs.
    pub async fn migrate(&self) -> Result<(), RepositoryError> {
        let steps = self.source.steps()?;
        let Some(target) = steps.last().map(|s| s.version) else {
            // Empty source: nothing to apply, but a dirty tracker still
            // blocks.
            self.ensure_table().await?;
            let (current, dirty) = self.read_state().await?;
            if dirty {
                return Err(RepositoryError::MigrationDirty { version: current });
            }
            return Ok(());
        };
        self.migrate_to(target).await
    }

    /// Apply or revert exactly the steps between the current and target
    /// version, in the correct direction. The target must be 0 or a version
    /// present in the source.
    pub async fn migrate_to(&self, target: u64) -> Result<(), RepositoryError> {
        self.ensure_table().await?;
        let (current, dirty) = self.read_state().await?;
        if dirty {
            return Err(RepositoryError::MigrationDirty { version: current });
        }

        let steps = self.source.steps()?;
        if target != 0 && !steps.iter().any(|s| s.version == target) {
            return Err(RepositoryError::invalid_input(format!(
                "unknown migration target version {target}"
            )));
        }

        if target > current {
            for step in steps
                .iter()
                .filter(|s| s.version > current && s.version <= target)
            {
                self.apply_step(step).await?;
            }
        } else if target < current {
            self.revert_until(&steps, current, target).await?;
        }
        Ok(())
    }

    /// Revert exactly one step.
    pub async fn rollback(&self) -> Result<(), RepositoryError> {
        self.ensure_table().await?;
        let (current, dirty) = self.read_state().await?;
        if dirty {
            return Err(RepositoryError::MigrationDirty { version: current });
        }
        if current == 0 {
            return Err(RepositoryError::invalid_input(
                "nothing to roll back: already at version 0",
            ));
        }

        let steps = self.source.steps()?;
        let previous = steps
            .iter()
            .rev()
            .find(|s| s.version < current)
            .map(|s| s.version)
            .unwrap_or(0);
        self.revert_until(&steps, current, previous).await
    }

    /// Revert steps until the recorded version is at or below `target`.
    /// A target at or ahead of the current version is a no-op success.
    pub async fn rollback_to(&self, target: u64) -> Result<(), RepositoryError> {
        self.ensure_table().await?;
        let (current, dirty) = self.read_state().await?;
        if dirty {
            return Err(RepositoryError::MigrationDirty { version: current });
        }
        if target >= current {
            return Ok(());
        }
        let steps = self.source.steps()?;
        self.revert_until(&steps, current, target).await
    }

    /// Unconditionally overwrite the recorded version and clear the dirty
    /// flag without executing any step. Operator escape hatch for
    /// recovering a dirty tracker; never invoked automatically.
    pub async fn force(&self, version: u64) -> Result<(), RepositoryError> {
        self.ensure_table().await?;
        tracing::warn!(version, table = %self.table, "forcing migration version, clearing dirty state");
        self.write_state(version, false).await
    }

    /// Current version, dirty flag, and best-effort applied/pending counts.
    pub async fn status(&self) -> Result<MigrationStatus, RepositoryError> {
        self.ensure_table().await?;
        let (version, dirty) = self.read_state().await?;

        let (applied, pending) = match self.source.steps() {
            Ok(steps) => (
                steps.iter().filter(|s| s.version <= version).count(),
                steps.iter().filter(|s| s.version > version).count(),
            ),
            Err(e) => {
                tracing::debug!(error = %e, "cannot enumerate migration source for status");
                (0, 0)
            }
        };

        Ok(MigrationStatus {
            version,
            dirty,
            applied,
            pending,
        })
    }

    /// Irreversibly drop every table in the target database, including the
    /// tracking table. Intentionally manual-only; never part of routine
    /// operation.
    pub async fn drop_all(&self) -> Result<(), RepositoryError> {
        tracing::warn!(table = %self.table, "dropping all managed schema objects");

        let backend = self.db.get_database_backend();
        let (list_sql, name_col) = match backend {
            DatabaseBackend::Sqlite => (
                "SELECT name FROM sqlite_master WHERE type = 'table' AND name NOT LIKE 'sqlite_%'"
                    .to_string(),
                "name",
            ),
            DatabaseBackend::Postgres => (
                "SELECT tablename AS name FROM pg_tables WHERE schemaname = current_schema()"
                    .to_string(),
                "name",
            ),
            DatabaseBackend::MySql => (
                "SELECT table_name AS name FROM information_schema.tables \
                 WHERE table_schema = DATABASE()"
                    .to_string(),
                "name",
            ),
        };

        let rows = self
            .db
            .query_all(Statement::from_string(backend, list_sql))
            .await
            .map_err(RepositoryError::database_error)?;

        for row in rows {
            let name: String = row
                .try_get("", name_col)
                .map_err(RepositoryError::database_error)?;
            let mut stmt = Table::drop();
            stmt.table(Alias::new(name.as_str())).if_exists();
            // Sqlite rejects DROP TABLE .. CASCADE.
            if backend != DatabaseBackend::Sqlite {
                stmt.cascade();
            }
            self.db
                .execute(backend.build(&stmt))
                .await
                .map_err(RepositoryError::database_error)?;
        }
        Ok(())
    }

    async fn apply_step(&self, step: &MigrationStep) -> Result<(), RepositoryError> {
        tracing::info!(version = step.version, name = %step.name, "applying migration step");
        // Record dirty before running so a partial step is never mistaken
        // for a clean state.
        self.write_state(step.version, true).await?;

        self.run_script(&step.up).await.map_err(|e| {
            RepositoryError::Query {
                message: format!(
                    "migration step {} ({}) failed, tracker left dirty: {e}",
                    step.version, step.name
                ),
                source: match e {
                    RepositoryError::Query { source, .. } => source,
                    _ => None,
                },
            }
        })?;

        self.write_state(step.version, false).await
    }

    async fn revert_until(
        &self,
        steps: &[MigrationStep],
        mut current: u64,
        target: u64,
    ) -> Result<(), RepositoryError> {
        while current > target {
            // Only steps strictly above the target are revert candidates;
            // a forced version can sit between steps, leaving none.
            let Some(step) = steps
                .iter()
                .rev()
                .find(|s| s.version <= current && s.version > target)
            else {
                self.write_state(target, false).await?;
                return Ok(());
            };
            let down = step.down.as_deref().ok_or_else(|| {
                RepositoryError::invalid_input(format!(
                    "migration step {} ({}) has no down script",
                    step.version, step.name
                ))
            })?;
            let previous = steps
                .iter()
                .rev()
                .find(|s| s.version < step.version)
                .map(|s| s.version)
                .unwrap_or(0);

            tracing::info!(version = step.version, name = %step.name, "reverting migration step");
            self.write_state(step.version, true).await?;
            self.run_script(down).await.map_err(|e| RepositoryError::Query {
                message: format!(
                    "rollback of step {} ({}) failed, tracker left dirty: {e}",
                    step.version, step.name
                ),
                source: match e {
                    RepositoryError::Query { source, .. } => source,
                    _ => None,
                },
            })?;
            self.write_state(previous, false).await?;

            current = previous;
        }
        Ok(())
    }

    /// Run one script inside a transaction where the backend supports
    /// transactional DDL; on backends that do not, the transaction still
    /// bounds the statement batch.
    async fn run_script(&self, sql: &str) -> Result<(), RepositoryError> {
        let tx = self
            .db
            .begin()
            .await
            .map_err(RepositoryError::database_error)?;
        tx.execute_unprepared(sql)
            .await
            .map_err(RepositoryError::database_error)?;
        tx.commit().await.map_err(RepositoryError::database_error)
    }

    async fn ensure_table(&self) -> Result<(), RepositoryError> {
        let stmt = Table::create()
            .table(Alias::new(self.table.as_str()))
            .if_not_exists()
            .col(
                ColumnDef::new(Alias::new("version"))
                    .big_integer()
                    .not_null(),
            )
            .col(ColumnDef::new(Alias::new("dirty")).boolean().not_null())
            .to_owned();
        self.db
            .execute(self.db.get_database_backend().build(&stmt))
            .await
            .map_err(RepositoryError::database_error)?;
        Ok(())
    }

    async fn read_state(&self) -> Result<(u64, bool), RepositoryError> {
        let stmt = Query::select()
            .column(Alias::new("version"))
            .column(Alias::new("dirty"))
            .from(Alias::new(self.table.as_str()))
            .limit(1)
            .to_owned();
        let row = self
            .db
            .query_one(self.db.get_database_backend().build(&stmt))
            .await
            .map_err(RepositoryError::database_error)?;

        match row {
            Some(row) => {
                let version: i64 = row
                    .try_get("", "version")
                    .map_err(RepositoryError::database_error)?;
                let dirty: bool = row
                    .try_get("", "dirty")
                    .map_err(RepositoryError::database_error)?;
                Ok((version.max(0) as u64, dirty))
            }
            None => Ok((0, false)),
        }
    }

    /// The tracking table holds exactly one row; the pair is replaced
    /// atomically within a transaction.
    async fn write_state(&self, version: u64, dirty: bool) -> Result<(), RepositoryError> {
        let tx = self
            .db
            .begin()
            .await
            .map_err(RepositoryError::database_error)?;

        let delete = Query::delete()
            .from_table(Alias::new(self.table.as_str()))
            .to_owned();
        tx.execute(self.db.get_database_backend().build(&delete))
            .await
            .map_err(RepositoryError::database_error)?;

        let mut insert = Query::insert();
        insert
            .into_table(Alias::new(self.table.as_str()))
            .columns([Alias::new("version"), Alias::new("dirty")])
            .values([
                Expr::value(version as i64),
                Expr::value(dirty),
            ])
            .map_err(|e| RepositoryError::invalid_input(e.to_string()))?;
        tx.execute(self.db.get_database_backend().build(&insert))
            .await
            .map_err(RepositoryError::database_error)?;

        tx.commit().await.map_err(RepositoryError::database_error)
    }
}
