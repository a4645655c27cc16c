//! Collaborators the pipeline calls but does not implement.
//!
//! Every external dependency is an explicit handle on [`QueryServices`];
//! nothing is looked up through process-wide state.

use std::collections::BTreeMap;
use std::sync::Arc;

use serde::{Deserialize, Serialize};

use crate::config::CompilerConfig;
use crate::error::Result;
use crate::query::ast::SelectStatement;
use crate::query::database::DatabaseProvider;
use crate::query::filters::{DefaultFilterResolver, FilterResolver};
use crate::query::printer::{QueryPrinter, SqlPrinter};
use crate::query::storage::StorageClient;
use crate::query::team::Team;

/// Turns query text into a statement tree.
pub trait QueryParser: Send + Sync {
    /// Fails with [`crate::QueryError::Syntax`] on malformed input.
    fn parse_select(&self, text: &str) -> Result<SelectStatement>;
}

/// Feature-flag evaluation.
pub trait FeatureFlags: Send + Sync {
    /// `None` when the flag state cannot be determined.
    fn feature_enabled(
        &self,
        flag: &str,
        subject_id: &str,
        attributes: &BTreeMap<String, String>,
    ) -> Option<bool>;
}

/// Flag evaluator that never determines anything.
#[derive(Clone, Copy, Debug, Default)]
pub struct NoFeatureFlags;

impl FeatureFlags for NoFeatureFlags {
    fn feature_enabled(&self, _: &str, _: &str, _: &BTreeMap<String, String>) -> Option<bool> {
        None
    }
}

/// Outcome of validating canonical query text.
#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct MetadataResponse {
    /// Whether the text compiled cleanly.
    pub is_valid: bool,
    /// Blocking problems.
    #[serde(default)]
    pub errors: Vec<String>,
    /// Non-blocking remarks.
    #[serde(default)]
    pub warnings: Vec<String>,
}

/// Validates canonical query text; only consulted in debug mode.
pub trait MetadataValidator: Send + Sync {
    /// Checks `hogql` as it would run for `team`.
    fn validate(&self, hogql: &str, team: &Team, debug: bool) -> Result<MetadataResponse>;
}

/// Handles to every collaborator plus the compiler configuration.
#[derive(Clone)]
pub struct QueryServices {
    /// Limits, deployment and engine budgets.
    pub config: CompilerConfig,
    /// Text to tree.
    pub parser: Arc<dyn QueryParser>,
    /// Tree to dialect text.
    pub printer: Arc<dyn QueryPrinter>,
    /// Engine client.
    pub storage: Arc<dyn StorageClient>,
    /// Catalog source.
    pub databases: Arc<dyn DatabaseProvider>,
    /// `{filters}` replacement.
    pub filters: Arc<dyn FilterResolver>,
    /// Feature flag lookup.
    pub flags: Arc<dyn FeatureFlags>,
    /// Optional debug-mode validator.
    pub metadata: Option<Arc<dyn MetadataValidator>>,
}

impl QueryServices {
    /// Bundles the required collaborators with the reference printer and
    /// filter resolver, no feature flags and no metadata validation.
    pub fn new(
        parser: Arc<dyn QueryParser>,
        storage: Arc<dyn StorageClient>,
        databases: Arc<dyn DatabaseProvider>,
    ) -> Self {
        Self {
            config: CompilerConfig::default(),
            parser,
            printer: Arc::new(SqlPrinter),
            storage,
            databases,
            filters: Arc::new(DefaultFilterResolver),
            flags: Arc::new(NoFeatureFlags),
            metadata: None,
        }
    }

    /// Replaces the configuration.
    pub fn with_config(mut self, config: CompilerConfig) -> Self {
        self.config = config;
        self
    }

    /// Replaces the printer.
    pub fn with_printer(mut self, printer: Arc<dyn QueryPrinter>) -> Self {
        self.printer = printer;
        self
    }

    /// Replaces the filter resolver.
    pub fn with_filters(mut self, filters: Arc<dyn FilterResolver>) -> Self {
        self.filters = filters;
        self
    }

    /// Replaces the feature flag source.
    pub fn with_flags(mut self, flags: Arc<dyn FeatureFlags>) -> Self {
        self.flags = flags;
        self
    }

    /// Enables metadata validation.
    pub fn with_metadata(mut self, metadata: Arc<dyn MetadataValidator>) -> Self {
        self.metadata = Some(metadata);
        self
    }
}
