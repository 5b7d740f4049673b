//! # Strata
//!
//! A generic data-access layer over SeaORM: a repository engine for entities
//! with identity, soft-delete, multi-tenancy, audit, and optimistic
//! concurrency semantics, a composable filter DSL, and a forward/backward
//! schema migration tracker.

pub mod config;
pub mod context;
pub mod crypto;
pub mod db;
pub mod entity;
pub mod error;
pub mod filter;
pub mod logging;
pub mod migrate;
pub mod repository;

pub use context::RequestContext;
pub use entity::{AuditFields, BaseFields, Record};
pub use error::RepositoryError;
pub use filter::{Direction, FieldValue, Filter, Operator, Scope};
pub use migrate::{DirSource, MemorySource, MigrationSource, Migrator};
pub use repository::{Repository, RepositoryOptions};
