//! # Repository Layer
//!
//! The generic repository engine: type-parameterized CRUD, query, and
//! transaction operations over any [`Record`](crate::entity::Record) type,
//! with tenant scoping and audit stamping driven by the ambient
//! [`RequestContext`](crate::context::RequestContext).

mod engine;

pub use engine::{Repository, RepositoryOptions, commit_tx, rollback_tx};
