//! Query compilation and execution.
//!
//! A request flows through [`executor::QueryRunner`]: it is parsed, its
//! variables and placeholders are substituted, default limits are applied,
//! and the statement is rendered twice (canonical and execution dialect)
//! before being sent to storage. [`paginator::HasMorePaginator`] wraps the
//! runner for page-at-a-time callers.

/// Statement tree.
pub mod ast;

/// Per-request context and error containment policy.
pub mod context;

/// Catalog of queryable tables.
pub mod database;

/// The orchestrating pipeline.
pub mod executor;

/// Reserved `filters` placeholder resolution.
pub mod filters;

/// Limit contexts and default-limit injection.
pub mod limits;

/// Behavioural modifiers and their resolution.
pub mod modifiers;

/// Has-more pagination on top of the pipeline.
pub mod paginator;

/// Named placeholder substitution.
pub mod placeholders;

/// Dialect rendering.
pub mod printer;

/// Collaborator traits and the bundle handed to the pipeline.
pub mod services;

/// Storage collaborator and query tags.
pub mod storage;

/// Team state.
pub mod team;

/// In-memory collaborators.
pub mod testing;

/// Stage timing.
pub mod timings;

/// Scalar values.
pub mod value;

/// Variable substitution.
pub mod variables;

/// Tree walkers.
pub mod visitor;

pub use executor::{CompiledQuery, QueryRequest, QueryRunner, Response};
pub use paginator::{HasMorePaginator, PaginationParams};
