//! Analytics query compiler.
//!
//! Turns query text or a statement tree into text for a columnar store,
//! applying per-team modifiers, substitutions, row limits and has-more
//! pagination, and runs it through a storage collaborator.

#![forbid(unsafe_code)]
#![warn(missing_docs)]

/// Compiler configuration loaded from TOML.
pub mod config;
/// Error types shared by every stage.
pub mod error;
/// The query pipeline and its collaborators.
pub mod query;

pub use config::CompilerConfig;
pub use error::{ErrorKind, QueryError, Result, StorageError};
pub use query::{HasMorePaginator, PaginationParams, QueryRequest, QueryRunner, Response};
