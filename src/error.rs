use std::fmt;
use std::path::PathBuf;

use thiserror::Error;

/// Crate-wide result alias.
pub type Result<T> = std::result::Result<T, QueryError>;

/// Message substituted for any error that is not safe to show to end users.
pub const UNKNOWN_ERROR: &str = "Unknown error";

/// Broad classification used to decide containment behaviour.
#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub enum ErrorKind {
    /// Malformed or ambiguous input. Never contained.
    Input,
    /// Rendering into either dialect failed.
    Compile,
    /// The storage engine rejected or failed the statement.
    Storage,
    /// Configuration could not be loaded.
    Configuration,
    /// Anything else.
    Internal,
}

/// Failure reported by the storage engine.
#[derive(Clone, Debug, Eq, PartialEq)]
pub struct StorageError {
    /// Engine error code, if the engine reported one.
    pub code: Option<u32>,
    /// Engine message.
    pub message: String,
    /// Whether the message may be surfaced to end users verbatim.
    pub exposed: bool,
}

impl StorageError {
    /// Builds an error whose message is safe to show.
    pub fn exposed(code: Option<u32>, message: impl Into<String>) -> Self {
        Self {
            code,
            message: message.into(),
            exposed: true,
        }
    }

    /// Builds an error whose message must stay internal.
    pub fn internal(code: Option<u32>, message: impl Into<String>) -> Self {
        Self {
            code,
            message: message.into(),
            exposed: false,
        }
    }
}

impl fmt::Display for StorageError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self.code {
            Some(code) => write!(f, "Code: {code}. {}", self.message),
            None => f.write_str(&self.message),
        }
    }
}

impl std::error::Error for StorageError {}

/// Structured errors emitted while compiling or executing a query.
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum QueryError {
    /// Raw text failed to parse.
    #[error("Syntax error at {start}..{end}: {message}")]
    Syntax {
        /// Parser message.
        message: String,
        /// Byte offset where the error starts.
        start: usize,
        /// Byte offset where the error ends.
        end: usize,
    },
    /// `filters` was supplied both as a placeholder and as a filter object.
    #[error("Query contains 'filters' placeholder, yet filters are also provided as a standalone query parameter.")]
    AmbiguousFilters,
    /// A placeholder without a field chain was found.
    #[error("Placeholders, such as {{...}}, are not supported in this context")]
    UnsupportedPlaceholder,
    /// The query has placeholders but the caller supplied none.
    #[error("Query contains placeholders, but none were provided: {}", .names.join(", "))]
    PlaceholdersNotProvided {
        /// Every placeholder found in the query.
        names: Vec<String>,
    },
    /// Some placeholders had no value.
    #[error("Placeholders {} are not available in this context. You can use the following: {}", .names.join(", "), .available.join(", "))]
    UnresolvedPlaceholders {
        /// Placeholders that had no value.
        names: Vec<String>,
        /// Names that do have values.
        available: Vec<String>,
    },
    /// The operation needs a different statement kind.
    #[error("Expected {expected}")]
    UnsupportedStatement {
        /// Statement kind the operation accepts.
        expected: &'static str,
    },
    /// A variable binding is unusable.
    #[error("Variable '{name}' is invalid: {reason}")]
    InvalidVariable {
        /// Variable id.
        name: String,
        /// What is wrong with it.
        reason: String,
    },
    /// Part of the filter object is malformed.
    #[error("Invalid filter: {message}")]
    InvalidFilter {
        /// What is wrong with the filter.
        message: String,
    },
    /// Rendering failed in a way the user can act on.
    #[error("{message}")]
    Compile {
        /// User-facing message.
        message: String,
    },
    /// The catalog has no table with this name.
    #[error("Unknown table `{name}`.")]
    UnknownTable {
        /// Name used in the query.
        name: String,
    },
    /// Storage engine failure.
    #[error(transparent)]
    Storage(#[from] StorageError),
    /// Configuration file could not be read or parsed.
    #[error("invalid configuration{}: {message}", display_path(.path))]
    Config {
        /// File that failed, when loading from disk.
        path: Option<PathBuf>,
        /// Parse or read failure.
        message: String,
    },
    /// Unexpected internal failure.
    #[error("internal error: {message}")]
    Internal {
        /// Diagnostic message, never shown to users.
        message: String,
    },
}

impl QueryError {
    /// Builds a [`QueryError::Compile`].
    pub fn compile(message: impl Into<String>) -> Self {
        QueryError::Compile {
            message: message.into(),
        }
    }

    /// Builds a [`QueryError::InvalidFilter`].
    pub fn invalid_filter(message: impl Into<String>) -> Self {
        QueryError::InvalidFilter {
            message: message.into(),
        }
    }

    /// Builds a [`QueryError::Internal`].
    pub fn internal(message: impl Into<String>) -> Self {
        QueryError::Internal {
            message: message.into(),
        }
    }

    /// Returns the containment class of the error.
    pub fn kind(&self) -> ErrorKind {
        match self {
            QueryError::Syntax { .. }
            | QueryError::AmbiguousFilters
            | QueryError::UnsupportedPlaceholder
            | QueryError::PlaceholdersNotProvided { .. }
            | QueryError::UnresolvedPlaceholders { .. }
            | QueryError::UnsupportedStatement { .. }
            | QueryError::InvalidVariable { .. }
            | QueryError::InvalidFilter { .. } => ErrorKind::Input,
            QueryError::Compile { .. } | QueryError::UnknownTable { .. } => ErrorKind::Compile,
            QueryError::Storage(_) => ErrorKind::Storage,
            QueryError::Config { .. } => ErrorKind::Configuration,
            QueryError::Internal { .. } => ErrorKind::Internal,
        }
    }

    /// Whether the message can be shown to end users verbatim.
    pub fn is_exposed(&self) -> bool {
        match self {
            QueryError::Storage(err) => err.exposed,
            QueryError::Internal { .. } | QueryError::Config { .. } => false,
            _ => true,
        }
    }

    /// Message captured into a response when the error is contained.
    pub fn user_message(&self) -> String {
        if self.is_exposed() {
            self.to_string()
        } else {
            UNKNOWN_ERROR.to_owned()
        }
    }

    /// Returns a machine-readable code for the error variant.
    pub fn code(&self) -> &'static str {
        match self {
            QueryError::Syntax { .. } => "SyntaxError",
            QueryError::AmbiguousFilters => "AmbiguousFilters",
            QueryError::UnsupportedPlaceholder => "UnsupportedPlaceholder",
            QueryError::PlaceholdersNotProvided { .. } => "PlaceholdersNotProvided",
            QueryError::UnresolvedPlaceholders { .. } => "UnresolvedPlaceholders",
            QueryError::UnsupportedStatement { .. } => "UnsupportedStatement",
            QueryError::InvalidVariable { .. } => "InvalidVariable",
            QueryError::InvalidFilter { .. } => "InvalidFilter",
            QueryError::Compile { .. } => "CompileError",
            QueryError::UnknownTable { .. } => "CompileError",
            QueryError::Storage(_) => "StorageError",
            QueryError::Config { .. } => "ConfigError",
            QueryError::Internal { .. } => "InternalError",
        }
    }
}

fn display_path(path: &Option<PathBuf>) -> String {
    path.as_ref()
        .map(|p| format!(" in {}", p.display()))
        .unwrap_or_default()
}

/// Convenience wrapper that formats errors with their codes.
pub struct QueryErrorWithCode<'a>(pub &'a QueryError);

impl fmt::Display for QueryErrorWithCode<'_> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "[{}] {}", self.0.code(), self.0)
    }
}
