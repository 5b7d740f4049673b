//! Generic repository engine.
//!
//! All SQL is composed with `sea_query` through the connection's backend, so
//! the same engine runs unchanged on Postgres, MySQL, and SQLite. Every
//! operation takes the ambient [`RequestContext`]: for tenant-scoped entity
//! types the context's tenant is the only authority for scoping and
//! stamping, and a zero-affected-rows outcome is always surfaced as
//! [`RepositoryError::NotFound`], never swallowed.

use std::collections::BTreeMap;
use std::marker::PhantomData;

use chrono::Utc;
use sea_orm::sea_query::{Alias, Condition, Expr, ExprTrait, Order, Query, SimpleExpr};
use sea_orm::{
    ConnectionTrait, DatabaseConnection, DatabaseTransaction, Statement, TransactionTrait, Value,
};
use uuid::Uuid;

use crate::context::RequestContext;
use crate::entity::{Record, columns};
use crate::error::RepositoryError;
use crate::filter::{Direction, FieldValue, Filter, Operator, WhereCondition};

const DEFAULT_BATCH_SIZE: usize = 100;

/// Columns stamped by the engine; silently dropped from caller-supplied
/// partial-update maps so a caller can never forge audit state.
const MANAGED_COLUMNS: &[&str] = &[
    columns::ID,
    columns::TENANT_ID,
    columns::CREATED_AT,
    columns::CREATED_BY,
    columns::UPDATED_AT,
    columns::UPDATED_BY,
    columns::DELETED_AT,
    columns::DELETED_BY,
    columns::VERSION,
];

/// Tuning knobs shared by every repository bound to the same configuration.
#[derive(Debug, Clone, Copy)]
pub struct RepositoryOptions {
    /// Chunk size for batch creation; zero selects the default of 100.
    pub batch_size: usize,
    /// Run [`Record::validate`] before create and update.
    pub validate_on_save: bool,
}

impl Default for RepositoryOptions {
    fn default() -> Self {
        Self {
            batch_size: DEFAULT_BATCH_SIZE,
            validate_on_save: false,
        }
    }
}

impl From<&crate::config::AppConfig> for RepositoryOptions {
    fn from(cfg: &crate::config::AppConfig) -> Self {
        Self {
            batch_size: cfg.batch_size,
            ..Self::default()
        }
    }
}

impl RepositoryOptions {
    fn effective_batch_size(&self) -> usize {
        if self.batch_size == 0 {
            DEFAULT_BATCH_SIZE
        } else {
            self.batch_size
        }
    }
}

/// Generic repository over one entity type and one connection.
///
/// `C` is any SeaORM connection: the shared pool by default, or a
/// [`DatabaseTransaction`] when obtained through [`Repository::with_tx`].
pub struct Repository<'a, E: Record, C: ConnectionTrait = DatabaseConnection> {
    db: &'a C,
    options: RepositoryOptions,
    _entity: PhantomData<E>,
}

impl<'a, E: Record, C: ConnectionTrait> Repository<'a, E, C> {
    /// Create a repository with default options.
    pub fn new(db: &'a C) -> Self {
        Self::with_options(db, RepositoryOptions::default())
    }

    pub fn with_options(db: &'a C, options: RepositoryOptions) -> Self {
        Self {
            db,
            options,
            _entity: PhantomData,
        }
    }

    pub fn options(&self) -> RepositoryOptions {
        self.options
    }

    /// A repository bound to the given transaction, sharing this one's
    /// options. This is a value copy; the original stays bound to its own
    /// connection.
    pub fn with_tx<'t>(&self, tx: &'t DatabaseTransaction) -> Repository<'t, E, DatabaseTransaction> {
        Repository::with_options(tx, self.options)
    }

    /// Insert one entity, assigning an id if absent and stamping audit and
    /// tenant fields from the ambient context. The entity is mutated only on
    /// success.
    pub async fn create(&self, ctx: &RequestContext, entity: &mut E) -> Result<(), RepositoryError> {
        let mut next = entity.clone();
        self.prepare_insert(ctx, &mut next)?;

        let mut stmt = Query::insert();
        stmt.into_table(Alias::new(E::table_name()))
            .columns(E::columns().iter().map(|c| Alias::new(*c)))
            .values(row_exprs(next.values()))
            .map_err(|e| RepositoryError::invalid_input(e.to_string()))?;

        self.db
            .execute(self.build(&stmt))
            .await
            .map_err(RepositoryError::database_error)?;

        *entity = next;
        Ok(())
    }

    /// Insert a batch in chunks of [`RepositoryOptions::batch_size`].
    ///
    /// `None` entries are silently dropped before stamping; an empty input
    /// is a successful no-op. Chunks are atomic individually but not across
    /// each other: a failure aborts the remaining chunks and the error
    /// states how many entities were already committed.
    pub async fn create_batch(
        &self,
        ctx: &RequestContext,
        entities: Vec<Option<E>>,
    ) -> Result<Vec<E>, RepositoryError> {
        let mut pending: Vec<E> = entities.into_iter().flatten().collect();
        if pending.is_empty() {
            return Ok(Vec::new());
        }

        for entity in &mut pending {
            self.prepare_insert(ctx, entity)?;
        }

        let chunk_size = self.options.effective_batch_size();
        let total = pending.len();
        let mut committed = 0usize;

        for chunk in pending.chunks(chunk_size) {
            let mut stmt = Query::insert();
            stmt.into_table(Alias::new(E::table_name()))
                .columns(E::columns().iter().map(|c| Alias::new(*c)));
            for entity in chunk {
                stmt.values(row_exprs(entity.values()))
                    .map_err(|e| RepositoryError::invalid_input(e.to_string()))?;
            }

            if let Err(source) = self.db.execute(self.build(&stmt)).await {
                tracing::warn!(
                    table = E::table_name(),
                    committed,
                    total,
                    "batch create aborted; committed prefix is not rolled back"
                );
                return Err(RepositoryError::Query {
                    message: format!(
                        "batch insert into {} failed after committing {committed} of {total} entities \
                         (committed prefix is not rolled back): {source}",
                        E::table_name()
                    ),
                    source: Some(source),
                });
            }
            committed += chunk.len();
        }

        tracing::debug!(table = E::table_name(), count = total, "batch create complete");
        Ok(pending)
    }

    /// Fetch one entity by identity, restricted to the ambient tenant and
    /// excluding soft-deleted rows.
    pub async fn get_by_id(&self, ctx: &RequestContext, id: &str) -> Result<E, RepositoryError> {
        require_id(id)?;

        let mut stmt = Query::select();
        stmt.from(Alias::new(E::table_name()))
            .columns(E::columns().iter().map(|c| Alias::new(*c)))
            .cond_where(
                self.scope_condition(ctx)?
                    .add(Expr::col(Alias::new(columns::ID)).eq(id))
                    .add(Expr::col(Alias::new(columns::DELETED_AT)).is_null()),
            )
            .limit(1);

        let row = self
            .db
            .query_one(self.build(&stmt))
            .await
            .map_err(RepositoryError::database_error)?
            .ok_or_else(|| RepositoryError::not_found(E::table_name(), id))?;

        E::from_row(&row)
    }

    /// Full-row save. Re-stamps `updated_at`/`updated_by`, increments the
    /// version by exactly one, and applies the write under an
    /// id+version+tenant predicate: zero affected rows means the entity is
    /// absent, soft-deleted, concurrently modified, or outside the caller's
    /// tenant, and is reported as not found. The in-memory entity is only
    /// updated on success, so retrying a failed call cannot double-stamp.
    pub async fn update(&self, ctx: &RequestContext, entity: &mut E) -> Result<(), RepositoryError> {
        require_id(entity.id())?;
        if self.options.validate_on_save {
            entity.validate().map_err(RepositoryError::invalid_input)?;
        }

        let expected_version = entity.audit().map(|a| a.version);
        let mut next = entity.clone();
        next.base_mut().updated_at = Utc::now();
        if let Some(audit) = next.audit_mut() {
            audit.updated_by = ctx.actor_id().map(str::to_string);
            audit.version += 1;
        }

        let mut stmt = Query::update();
        stmt.table(Alias::new(E::table_name()));
        for (col, value) in E::columns().iter().zip(next.values()) {
            // Identity and tenant are immutable after creation.
            if *col == columns::ID || *col == columns::TENANT_ID {
                continue;
            }
            stmt.value(Alias::new(*col), value);
        }

        let mut cond = self
            .scope_condition(ctx)?
            .add(Expr::col(Alias::new(columns::ID)).eq(entity.id()))
            .add(Expr::col(Alias::new(columns::DELETED_AT)).is_null());
        if let Some(version) = expected_version {
            cond = cond.add(Expr::col(Alias::new(columns::VERSION)).eq(version));
        }
        stmt.cond_where(cond);

        let result = self
            .db
            .execute(self.build(&stmt))
            .await
            .map_err(RepositoryError::database_error)?;
        if result.rows_affected() == 0 {
            return Err(RepositoryError::not_found(E::table_name(), entity.id()));
        }

        *entity = next;
        Ok(())
    }

    /// Targeted column update restricted by id and ambient tenant.
    ///
    /// Engine-managed columns in the caller's map are dropped, then the
    /// audit stamps (`updated_at`, `updated_by`, `version = version + 1` for
    /// audited types) are merged in before applying.
    pub async fn update_partial(
        &self,
        ctx: &RequestContext,
        id: &str,
        updates: BTreeMap<String, FieldValue>,
    ) -> Result<(), RepositoryError> {
        require_id(id)?;
        if updates.is_empty() {
            return Err(RepositoryError::invalid_input("empty update map"));
        }

        let mut stmt = Query::update();
        stmt.table(Alias::new(E::table_name()));
        let mut applied = 0usize;
        for (field, value) in updates {
            if MANAGED_COLUMNS.contains(&field.as_str()) {
                continue;
            }
            stmt.value(Alias::new(field.as_str()), value.into_scalar());
            applied += 1;
        }
        if applied == 0 {
            return Err(RepositoryError::invalid_input(
                "update map contains only engine-managed columns",
            ));
        }
        stmt.value(Alias::new(columns::UPDATED_AT), Value::from(Utc::now()));
        if E::audited() {
            stmt.value(
                Alias::new(columns::UPDATED_BY),
                Value::from(ctx.actor_id().map(str::to_string)),
            );
            stmt.value(
                Alias::new(columns::VERSION),
                Expr::col(Alias::new(columns::VERSION)).add(1),
            );
        }
        stmt.cond_where(
            self.scope_condition(ctx)?
                .add(Expr::col(Alias::new(columns::ID)).eq(id))
                .add(Expr::col(Alias::new(columns::DELETED_AT)).is_null()),
        );

        let result = self
            .db
            .execute(self.build(&stmt))
            .await
            .map_err(RepositoryError::database_error)?;
        if result.rows_affected() == 0 {
            return Err(RepositoryError::not_found(E::table_name(), id));
        }
        Ok(())
    }

    /// Physical row removal, restricted by id and ambient tenant.
    pub async fn delete(&self, ctx: &RequestContext, id: &str) -> Result<(), RepositoryError> {
        require_id(id)?;

        let mut stmt = Query::delete();
        stmt.from_table(Alias::new(E::table_name())).cond_where(
            self.scope_condition(ctx)?
                .add(Expr::col(Alias::new(columns::ID)).eq(id)),
        );

        let result = self
            .db
            .execute(self.build(&stmt))
            .await
            .map_err(RepositoryError::database_error)?;
        if result.rows_affected() == 0 {
            return Err(RepositoryError::not_found(E::table_name(), id));
        }
        Ok(())
    }

    /// Mark the row logically removed. The row stays in storage and is
    /// excluded from default-scoped reads from then on.
    pub async fn soft_delete(&self, ctx: &RequestContext, id: &str) -> Result<(), RepositoryError> {
        require_id(id)?;
        let now = Utc::now();

        let mut stmt = Query::update();
        stmt.table(Alias::new(E::table_name()))
            .value(Alias::new(columns::DELETED_AT), Value::from(now))
            .value(Alias::new(columns::UPDATED_AT), Value::from(now));
        if E::audited() {
            stmt.value(
                Alias::new(columns::DELETED_BY),
                Value::from(ctx.actor_id().map(str::to_string)),
            );
        }
        stmt.cond_where(
            self.scope_condition(ctx)?
                .add(Expr::col(Alias::new(columns::ID)).eq(id))
                .add(Expr::col(Alias::new(columns::DELETED_AT)).is_null()),
        );

        let result = self
            .db
            .execute(self.build(&stmt))
            .await
            .map_err(RepositoryError::database_error)?;
        if result.rows_affected() == 0 {
            return Err(RepositoryError::not_found(E::table_name(), id));
        }
        Ok(())
    }

    /// Run a filtered query. Ambient tenant restriction applies first, then
    /// the filter's predicates, ordering, and pagination. Absence of matches
    /// yields an empty vector, never an error.
    pub async fn find(&self, ctx: &RequestContext, filter: &Filter) -> Result<Vec<E>, RepositoryError> {
        let stmt = self.select_from_filter(ctx, filter, true)?;
        let rows = self
            .db
            .query_all(self.build(&stmt))
            .await
            .map_err(RepositoryError::database_error)?;
        rows.iter().map(E::from_row).collect()
    }

    /// Like [`Repository::find`] but expects at least one match.
    pub async fn find_one(&self, ctx: &RequestContext, filter: &Filter) -> Result<E, RepositoryError> {
        let mut stmt = self.select_from_filter(ctx, filter, true)?;
        stmt.limit(1);
        let row = self
            .db
            .query_one(self.build(&stmt))
            .await
            .map_err(RepositoryError::database_error)?
            .ok_or_else(|| {
                RepositoryError::NotFound(format!("{} matching filter", E::table_name()))
            })?;
        E::from_row(&row)
    }

    /// Count rows matching the filter's predicates and tenant scope.
    /// Ordering and pagination are ignored.
    pub async fn count(&self, ctx: &RequestContext, filter: &Filter) -> Result<u64, RepositoryError> {
        let resolved = filter.resolve();
        let mut stmt = Query::select();
        stmt.from(Alias::new(E::table_name()))
            .expr_as(Expr::cust("COUNT(*)"), Alias::new("num_rows"));

        let mut cond = self.scope_condition(ctx)?;
        if !resolved.include_deleted {
            cond = cond.add(Expr::col(Alias::new(columns::DELETED_AT)).is_null());
        }
        for (field, condition) in &resolved.conditions {
            cond = cond.add(condition_expr(field, condition));
        }
        stmt.cond_where(cond);

        let row = self
            .db
            .query_one(self.build(&stmt))
            .await
            .map_err(RepositoryError::database_error)?
            .ok_or_else(|| RepositoryError::query("count query returned no row"))?;
        let count: i64 = row
            .try_get("", "num_rows")
            .map_err(RepositoryError::database_error)?;
        Ok(count.max(0) as u64)
    }

    /// Whether a row with this id is visible in the default scope.
    pub async fn exists(&self, ctx: &RequestContext, id: &str) -> Result<bool, RepositoryError> {
        require_id(id)?;

        let mut stmt = Query::select();
        stmt.from(Alias::new(E::table_name()))
            .expr(Expr::cust("1"))
            .cond_where(
                self.scope_condition(ctx)?
                    .add(Expr::col(Alias::new(columns::ID)).eq(id))
                    .add(Expr::col(Alias::new(columns::DELETED_AT)).is_null()),
            )
            .limit(1);

        let row = self
            .db
            .query_one(self.build(&stmt))
            .await
            .map_err(RepositoryError::database_error)?;
        Ok(row.is_some())
    }

    /// Fetch every visible row whose id is in `ids`; an empty input is a
    /// successful no-op.
    pub async fn find_by_ids(
        &self,
        ctx: &RequestContext,
        ids: &[String],
    ) -> Result<Vec<E>, RepositoryError> {
        if ids.is_empty() {
            return Ok(Vec::new());
        }

        let mut stmt = Query::select();
        stmt.from(Alias::new(E::table_name()))
            .columns(E::columns().iter().map(|c| Alias::new(*c)))
            .cond_where(
                self.scope_condition(ctx)?
                    .add(
                        Expr::col(Alias::new(columns::ID))
                            .is_in(ids.iter().map(|id| Value::from(id.clone()))),
                    )
                    .add(Expr::col(Alias::new(columns::DELETED_AT)).is_null()),
            );

        let rows = self
            .db
            .query_all(self.build(&stmt))
            .await
            .map_err(RepositoryError::database_error)?;
        rows.iter().map(E::from_row).collect()
    }

    /// Escape hatch: run a backend-native query and map the rows to `E`.
    /// The caller owns injection safety: parameterized placeholders only,
    /// never string-concatenated user input.
    pub async fn find_raw(&self, sql: &str, values: Vec<Value>) -> Result<Vec<E>, RepositoryError> {
        let stmt = Statement::from_sql_and_values(self.db.get_database_backend(), sql, values);
        let rows = self
            .db
            .query_all(stmt)
            .await
            .map_err(RepositoryError::database_error)?;
        rows.iter().map(E::from_row).collect()
    }

    /// Escape hatch: run a backend-native statement and return the affected
    /// row count. Same injection-safety contract as [`Repository::find_raw`].
    pub async fn execute_raw(&self, sql: &str, values: Vec<Value>) -> Result<u64, RepositoryError> {
        let stmt = Statement::from_sql_and_values(self.db.get_database_backend(), sql, values);
        let result = self
            .db
            .execute(stmt)
            .await
            .map_err(RepositoryError::database_error)?;
        Ok(result.rows_affected())
    }

    fn build<S>(&self, stmt: &S) -> Statement
    where
        S: sea_orm::StatementBuilder,
    {
        self.db.get_database_backend().build(stmt)
    }

    /// Tenant restriction applied before anything else. For tenant-scoped
    /// types the ambient tenant is required; entity-embedded values are
    /// never consulted.
    fn scope_condition(&self, ctx: &RequestContext) -> Result<Condition, RepositoryError> {
        let mut cond = Condition::all();
        if E::tenant_scoped() {
            let tenant = ctx.tenant_id().ok_or_else(|| {
                RepositoryError::invalid_input(format!(
                    "ambient tenant identity is required for {}",
                    E::table_name()
                ))
            })?;
            cond = cond.add(Expr::col(Alias::new(columns::TENANT_ID)).eq(tenant));
        }
        Ok(cond)
    }

    fn prepare_insert(&self, ctx: &RequestContext, entity: &mut E) -> Result<(), RepositoryError> {
        if self.options.validate_on_save {
            entity.validate().map_err(RepositoryError::invalid_input)?;
        }

        let now = Utc::now();
        if entity.id().is_empty() {
            entity.set_id(Uuid::new_v4().to_string());
        }
        {
            let base = entity.base_mut();
            base.created_at = now;
            base.updated_at = now;
            base.deleted_at = None;
        }

        if E::tenant_scoped() {
            let tenant = ctx.tenant_id().ok_or_else(|| {
                RepositoryError::invalid_input(format!(
                    "ambient tenant identity is required for {}",
                    E::table_name()
                ))
            })?;
            entity.set_tenant_id(tenant);
        }

        if let Some(audit) = entity.audit_mut() {
            audit.created_by = ctx.actor_id().map(str::to_string);
            audit.updated_by = None;
            audit.deleted_by = None;
            audit.version = 1;
        }
        Ok(())
    }

    fn select_from_filter(
        &self,
        ctx: &RequestContext,
        filter: &Filter,
        with_pagination: bool,
    ) -> Result<sea_orm::sea_query::SelectStatement, RepositoryError> {
        let resolved = filter.resolve();

        let mut stmt = Query::select();
        stmt.from(Alias::new(E::table_name()))
            .columns(E::columns().iter().map(|c| Alias::new(*c)));

        let mut cond = self.scope_condition(ctx)?;
        if !resolved.include_deleted {
            cond = cond.add(Expr::col(Alias::new(columns::DELETED_AT)).is_null());
        }
        for (field, condition) in &resolved.conditions {
            cond = cond.add(condition_expr(field, condition));
        }
        stmt.cond_where(cond);

        for entry in &resolved.order_by {
            let order = match entry.direction {
                Direction::Ascending => Order::Asc,
                Direction::Descending => Order::Desc,
            };
            stmt.order_by(Alias::new(entry.field.as_str()), order);
        }

        if with_pagination {
            if let Some(limit) = resolved.limit {
                stmt.limit(limit);
            }
            if let Some(offset) = resolved.offset {
                stmt.offset(offset);
            }
        }
        Ok(stmt)
    }
}

impl<'a, E: Record, C: ConnectionTrait + TransactionTrait> Repository<'a, E, C> {
    /// Open a transaction on this repository's connection. Bind a repository
    /// to it with [`Repository::with_tx`], then finish with [`commit_tx`] or
    /// [`rollback_tx`].
    pub async fn begin_tx(&self) -> Result<DatabaseTransaction, RepositoryError> {
        self.db.begin().await.map_err(RepositoryError::database_error)
    }
}

/// Commit a transaction opened with [`Repository::begin_tx`].
pub async fn commit_tx(tx: DatabaseTransaction) -> Result<(), RepositoryError> {
    tx.commit().await.map_err(RepositoryError::database_error)
}

/// Roll back a transaction opened with [`Repository::begin_tx`].
pub async fn rollback_tx(tx: DatabaseTransaction) -> Result<(), RepositoryError> {
    tx.rollback().await.map_err(RepositoryError::database_error)
}

fn require_id(id: &str) -> Result<(), RepositoryError> {
    if id.is_empty() {
        return Err(RepositoryError::invalid_input("empty id"));
    }
    Ok(())
}

fn row_exprs(values: Vec<Value>) -> Vec<SimpleExpr> {
    values.into_iter().map(SimpleExpr::from).collect()
}

/// Translate one filter condition into a SQL expression. A `Like` over a
/// non-text value and an `In` over a non-list value degrade to equality
/// semantics rather than erroring, matching the DSL's permissive contract.
fn condition_expr(field: &str, condition: &WhereCondition) -> SimpleExpr {
    let col = Expr::col(Alias::new(field));
    let value = condition.value.clone();
    match (condition.operator, value) {
        (Operator::Eq, FieldValue::Null) => col.is_null(),
        (Operator::Ne, FieldValue::Null) => col.is_not_null(),
        (Operator::In, FieldValue::List(items)) => {
            col.is_in(items.into_iter().map(FieldValue::into_scalar))
        }
        (Operator::In, v) => col.is_in([v.into_scalar()]),
        (Operator::Like, FieldValue::Text(pattern)) => col.like(pattern),
        (Operator::Like, v) => col.eq(v.into_scalar()),
        (Operator::Eq, v) => col.eq(v.into_scalar()),
        (Operator::Ne, v) => col.ne(v.into_scalar()),
        (Operator::Gt, v) => col.gt(v.into_scalar()),
        (Operator::Gte, v) => col.gte(v.into_scalar()),
        (Operator::Lt, v) => col.lt(v.into_scalar()),
        (Operator::Lte, v) => col.lte(v.into_scalar()),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::entity::BaseFields;
    use sea_orm::{ConnectOptions, Database, DatabaseConnection, QueryResult};

    #[derive(Debug, Clone, Default)]
    struct Note {
        base: BaseFields,
        title: String,
        body: String,
    }

    impl Record for Note {
        fn table_name() -> &'static str {
            "notes"
        }

        fn columns() -> &'static [&'static str] {
            &["id", "created_at", "updated_at", "deleted_at", "title", "body"]
        }

        fn values(&self) -> Vec<Value> {
            vec![
                self.base.id.clone().into(),
                self.base.created_at.into(),
                self.base.updated_at.into(),
                self.base.deleted_at.into(),
                self.title.clone().into(),
                self.body.clone().into(),
            ]
        }

        fn from_row(row: &QueryResult) -> Result<Self, RepositoryError> {
            Ok(Self {
                base: BaseFields::from_row(row)?,
                title: row
                    .try_get("", "title")
                    .map_err(RepositoryError::database_error)?,
                body: row
                    .try_get("", "body")
                    .map_err(RepositoryError::database_error)?,
            })
        }

        fn base(&self) -> &BaseFields {
            &self.base
        }

        fn base_mut(&mut self) -> &mut BaseFields {
            &mut self.base
        }

        fn validate(&self) -> Result<(), String> {
            if self.title.is_empty() {
                return Err("title cannot be empty".to_string());
            }
            Ok(())
        }
    }

    fn note(title: &str) -> Note {
        Note {
            title: title.to_string(),
            body: format!("body of {title}"),
            ..Note::default()
        }
    }

    async fn setup_db() -> DatabaseConnection {
        // A single pooled connection keeps every handle on the same
        // in-memory database.
        let mut opt = ConnectOptions::new("sqlite::memory:");
        opt.max_connections(1).sqlx_logging(false);
        let db = Database::connect(opt).await.expect("connect sqlite");
        db.execute_unprepared(
            "CREATE TABLE notes (
                id TEXT PRIMARY KEY,
                created_at TEXT NOT NULL,
                updated_at TEXT NOT NULL,
                deleted_at TEXT,
                title TEXT NOT NULL,
                body TEXT NOT NULL
            )",
        )
        .await
        .expect("create notes table");
        db
    }

    #[tokio::test]
    async fn create_assigns_id_and_timestamps() {
        let db = setup_db().await;
        let repo: Repository<Note> = Repository::new(&db);
        let ctx = RequestContext::system();

        let mut n = note("first");
        repo.create(&ctx, &mut n).await.unwrap();

        assert!(!n.id().is_empty());
        assert_eq!(n.base().created_at, n.base().updated_at);

        let fetched = repo.get_by_id(&ctx, n.id()).await.unwrap();
        assert_eq!(fetched.title, "first");
    }

    #[tokio::test]
    async fn create_keeps_caller_assigned_id() {
        let db = setup_db().await;
        let repo: Repository<Note> = Repository::new(&db);
        let ctx = RequestContext::system();

        let mut n = note("keyed");
        n.set_id("note-42".to_string());
        repo.create(&ctx, &mut n).await.unwrap();
        assert_eq!(n.id(), "note-42");
    }

    #[tokio::test]
    async fn validate_on_save_rejects_invalid_entities() {
        let db = setup_db().await;
        let repo: Repository<Note> = Repository::with_options(
            &db,
            RepositoryOptions {
                validate_on_save: true,
                ..RepositoryOptions::default()
            },
        );
        let ctx = RequestContext::system();

        let mut n = note("");
        let err = repo.create(&ctx, &mut n).await.unwrap_err();
        assert!(matches!(err, RepositoryError::InvalidInput(_)));
    }

    #[tokio::test]
    async fn get_by_id_miss_is_not_found() {
        let db = setup_db().await;
        let repo: Repository<Note> = Repository::new(&db);
        let ctx = RequestContext::system();

        let err = repo.get_by_id(&ctx, "absent").await.unwrap_err();
        assert!(err.is_not_found());

        let err = repo.get_by_id(&ctx, "").await.unwrap_err();
        assert!(matches!(err, RepositoryError::InvalidInput(_)));
    }

    #[tokio::test]
    async fn update_replaces_row_and_restamps() {
        let db = setup_db().await;
        let repo: Repository<Note> = Repository::new(&db);
        let ctx = RequestContext::system();

        let mut n = note("draft");
        repo.create(&ctx, &mut n).await.unwrap();

        n.title = "final".to_string();
        repo.update(&ctx, &mut n).await.unwrap();
        assert!(n.base().updated_at >= n.base().created_at);

        let fetched = repo.get_by_id(&ctx, n.id()).await.unwrap();
        assert_eq!(fetched.title, "final");
    }

    #[tokio::test]
    async fn update_of_absent_row_is_not_found_and_inserts_nothing() {
        let db = setup_db().await;
        let repo: Repository<Note> = Repository::new(&db);
        let ctx = RequestContext::system();

        let mut n = note("ghost");
        n.set_id("missing".to_string());
        let err = repo.update(&ctx, &mut n).await.unwrap_err();
        assert!(err.is_not_found());

        assert_eq!(repo.count(&ctx, &Filter::new()).await.unwrap(), 0);
    }

    #[tokio::test]
    async fn update_partial_applies_and_rejects_empty_map() {
        let db = setup_db().await;
        let repo: Repository<Note> = Repository::new(&db);
        let ctx = RequestContext::system();

        let mut n = note("partial");
        repo.create(&ctx, &mut n).await.unwrap();

        let err = repo
            .update_partial(&ctx, n.id(), BTreeMap::new())
            .await
            .unwrap_err();
        assert!(matches!(err, RepositoryError::InvalidInput(_)));

        let mut updates = BTreeMap::new();
        updates.insert("title".to_string(), FieldValue::from("patched"));
        // Managed columns in the caller map are dropped, not applied.
        updates.insert("id".to_string(), FieldValue::from("forged"));
        repo.update_partial(&ctx, n.id(), updates).await.unwrap();

        let fetched = repo.get_by_id(&ctx, n.id()).await.unwrap();
        assert_eq!(fetched.title, "patched");
    }

    #[tokio::test]
    async fn update_partial_rejects_a_map_of_only_managed_columns() {
        let db = setup_db().await;
        let repo: Repository<Note> = Repository::new(&db);
        let ctx = RequestContext::system();

        let mut n = note("stable");
        repo.create(&ctx, &mut n).await.unwrap();
        let before = repo.get_by_id(&ctx, n.id()).await.unwrap();

        let mut updates = BTreeMap::new();
        updates.insert("id".to_string(), FieldValue::from("forged"));
        updates.insert("deleted_at".to_string(), FieldValue::Null);
        let err = repo.update_partial(&ctx, n.id(), updates).await.unwrap_err();
        assert!(matches!(err, RepositoryError::InvalidInput(_)));

        // No stamp was applied either.
        let after = repo.get_by_id(&ctx, n.id()).await.unwrap();
        assert_eq!(after.base().updated_at, before.base().updated_at);
    }

    #[tokio::test]
    async fn soft_delete_hides_row_but_keeps_it_in_storage() {
        let db = setup_db().await;
        let repo: Repository<Note> = Repository::new(&db);
        let ctx = RequestContext::system();

        let mut n = note("to-hide");
        repo.create(&ctx, &mut n).await.unwrap();
        repo.soft_delete(&ctx, n.id()).await.unwrap();

        assert!(repo.get_by_id(&ctx, n.id()).await.unwrap_err().is_not_found());
        assert!(repo.find(&ctx, &Filter::new()).await.unwrap().is_empty());
        assert!(!repo.exists(&ctx, n.id()).await.unwrap());

        // Unscoped access still sees the row, and it is soft- not hard-deleted.
        let unscoped = repo
            .find(&ctx, &Filter::new().include_deleted())
            .await
            .unwrap();
        assert_eq!(unscoped.len(), 1);
        assert!(unscoped[0].is_soft_deleted());

        // A second soft delete matches zero rows.
        assert!(repo.soft_delete(&ctx, n.id()).await.unwrap_err().is_not_found());
    }

    #[tokio::test]
    async fn delete_removes_the_row_physically() {
        let db = setup_db().await;
        let repo: Repository<Note> = Repository::new(&db);
        let ctx = RequestContext::system();

        let mut n = note("to-remove");
        repo.create(&ctx, &mut n).await.unwrap();
        repo.delete(&ctx, n.id()).await.unwrap();

        let all = repo
            .find(&ctx, &Filter::new().include_deleted())
            .await
            .unwrap();
        assert!(all.is_empty());
        assert!(repo.delete(&ctx, n.id()).await.unwrap_err().is_not_found());
    }

    #[tokio::test]
    async fn find_applies_conditions_ordering_and_pagination() {
        let db = setup_db().await;
        let repo: Repository<Note> = Repository::new(&db);
        let ctx = RequestContext::system();

        for title in ["alpha", "beta", "gamma", "delta"] {
            let mut n = note(title);
            repo.create(&ctx, &mut n).await.unwrap();
        }

        let filter = Filter::new().order_by_asc("title");
        let all = repo.find(&ctx, &filter).await.unwrap();
        let titles: Vec<_> = all.iter().map(|n| n.title.as_str()).collect();
        assert_eq!(titles, ["alpha", "beta", "delta", "gamma"]);

        let page = repo
            .find(&ctx, &Filter::new().order_by_asc("title").limit(2).offset(1))
            .await
            .unwrap();
        let titles: Vec<_> = page.iter().map(|n| n.title.as_str()).collect();
        assert_eq!(titles, ["beta", "delta"]);

        let like = repo
            .find(
                &ctx,
                &Filter::new().where_field("title", Operator::Like, "%eta%"),
            )
            .await
            .unwrap();
        assert_eq!(like.len(), 1);
        assert_eq!(like[0].title, "beta");

        let members = repo
            .find(
                &ctx,
                &Filter::new().where_field(
                    "title",
                    Operator::In,
                    FieldValue::from(vec!["alpha", "gamma"]),
                ),
            )
            .await
            .unwrap();
        assert_eq!(members.len(), 2);
    }

    #[tokio::test]
    async fn repeated_find_is_stable_with_no_intervening_writes() {
        let db = setup_db().await;
        let repo: Repository<Note> = Repository::new(&db);
        let ctx = RequestContext::system();

        for title in ["one", "two", "three"] {
            let mut n = note(title);
            repo.create(&ctx, &mut n).await.unwrap();
        }

        let filter = Filter::new().order_by_asc("title").order_by_asc("id");
        let first: Vec<String> = repo
            .find(&ctx, &filter)
            .await
            .unwrap()
            .into_iter()
            .map(|n| n.base.id)
            .collect();
        let second: Vec<String> = repo
            .find(&ctx, &filter)
            .await
            .unwrap()
            .into_iter()
            .map(|n| n.base.id)
            .collect();
        assert_eq!(first, second);
    }

    #[tokio::test]
    async fn count_matches_unpaginated_find() {
        let db = setup_db().await;
        let repo: Repository<Note> = Repository::new(&db);
        let ctx = RequestContext::system();

        for title in ["match-a", "match-b", "other"] {
            let mut n = note(title);
            repo.create(&ctx, &mut n).await.unwrap();
        }

        let filter = Filter::new().where_field("title", Operator::Like, "match-%");
        let found = repo.find(&ctx, &filter).await.unwrap();
        let counted = repo.count(&ctx, &filter).await.unwrap();
        assert_eq!(found.len() as u64, counted);
        assert_eq!(counted, 2);
    }

    #[tokio::test]
    async fn find_one_requires_a_match() {
        let db = setup_db().await;
        let repo: Repository<Note> = Repository::new(&db);
        let ctx = RequestContext::system();

        let err = repo.find_one(&ctx, &Filter::new()).await.unwrap_err();
        assert!(err.is_not_found());

        let mut n = note("only");
        repo.create(&ctx, &mut n).await.unwrap();
        let found = repo.find_one(&ctx, &Filter::new()).await.unwrap();
        assert_eq!(found.title, "only");
    }

    #[tokio::test]
    async fn find_by_ids_skips_missing_and_empty_input() {
        let db = setup_db().await;
        let repo: Repository<Note> = Repository::new(&db);
        let ctx = RequestContext::system();

        let mut a = note("a");
        let mut b = note("b");
        repo.create(&ctx, &mut a).await.unwrap();
        repo.create(&ctx, &mut b).await.unwrap();

        assert!(repo.find_by_ids(&ctx, &[]).await.unwrap().is_empty());

        let ids = vec![
            a.id().to_string(),
            "missing".to_string(),
            b.id().to_string(),
        ];
        let found = repo.find_by_ids(&ctx, &ids).await.unwrap();
        assert_eq!(found.len(), 2);
    }

    #[tokio::test]
    async fn create_batch_drops_none_entries_and_chunks() {
        let db = setup_db().await;
        let repo: Repository<Note> = Repository::with_options(
            &db,
            RepositoryOptions {
                batch_size: 2,
                ..RepositoryOptions::default()
            },
        );
        let ctx = RequestContext::system();

        // Empty input is a successful no-op.
        let created = repo.create_batch(&ctx, Vec::new()).await.unwrap();
        assert!(created.is_empty());

        let input = vec![
            Some(note("b1")),
            None,
            Some(note("b2")),
            Some(note("b3")),
            None,
        ];
        let created = repo.create_batch(&ctx, input).await.unwrap();
        assert_eq!(created.len(), 3);
        assert!(created.iter().all(|n| !n.id().is_empty()));
        assert_eq!(repo.count(&ctx, &Filter::new()).await.unwrap(), 3);
    }

    #[tokio::test]
    async fn create_batch_failure_reports_committed_prefix() {
        let db = setup_db().await;
        let repo: Repository<Note> = Repository::with_options(
            &db,
            RepositoryOptions {
                batch_size: 1,
                ..RepositoryOptions::default()
            },
        );
        let ctx = RequestContext::system();

        // Second chunk collides on a fixed primary key.
        let mut good = note("ok");
        let mut dup_a = note("dup");
        let mut dup_b = note("dup");
        good.set_id("row-1".to_string());
        dup_a.set_id("row-2".to_string());
        dup_b.set_id("row-2".to_string());

        let err = repo
            .create_batch(&ctx, vec![Some(good), Some(dup_a), Some(dup_b)])
            .await
            .unwrap_err();
        let message = err.to_string();
        assert!(message.contains("2 of 3"), "unexpected message: {message}");

        // The committed prefix stays committed.
        assert_eq!(repo.count(&ctx, &Filter::new()).await.unwrap(), 2);
    }

    #[tokio::test]
    async fn raw_escape_hatches_round_trip() {
        let db = setup_db().await;
        let repo: Repository<Note> = Repository::new(&db);
        let ctx = RequestContext::system();

        let mut n = note("raw");
        repo.create(&ctx, &mut n).await.unwrap();

        let rows = repo
            .find_raw(
                "SELECT * FROM notes WHERE title = ?",
                vec!["raw".into()],
            )
            .await
            .unwrap();
        assert_eq!(rows.len(), 1);

        let affected = repo
            .execute_raw(
                "UPDATE notes SET body = ? WHERE id = ?",
                vec!["rewritten".into(), n.id().into()],
            )
            .await
            .unwrap();
        assert_eq!(affected, 1);
    }

    #[tokio::test]
    async fn transaction_rollback_discards_writes() {
        let db = setup_db().await;
        let repo: Repository<Note> = Repository::new(&db);
        let ctx = RequestContext::system();

        let tx = repo.begin_tx().await.unwrap();
        {
            let tx_repo = repo.with_tx(&tx);
            let mut n = note("transient");
            tx_repo.create(&ctx, &mut n).await.unwrap();
            assert_eq!(tx_repo.count(&ctx, &Filter::new()).await.unwrap(), 1);
        }
        rollback_tx(tx).await.unwrap();

        assert_eq!(repo.count(&ctx, &Filter::new()).await.unwrap(), 0);
    }

    #[tokio::test]
    async fn transaction_commit_makes_writes_visible() {
        let db = setup_db().await;
        let repo: Repository<Note> = Repository::new(&db);
        let ctx = RequestContext::system();

        let tx = repo.begin_tx().await.unwrap();
        let mut n = note("durable");
        repo.with_tx(&tx).create(&ctx, &mut n).await.unwrap();
        commit_tx(tx).await.unwrap();

        assert!(repo.exists(&ctx, n.id()).await.unwrap());
    }
}
