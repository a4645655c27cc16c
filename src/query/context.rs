//! Per-request execution context and error containment.

use std::collections::BTreeMap;
use std::fmt;
use std::sync::{Arc, OnceLock};

use tracing::warn;

use crate::config::LimitConfig;
use crate::error::{ErrorKind, Result};
use crate::query::database::{Database, DatabaseProvider};
use crate::query::limits::LimitContext;
use crate::query::modifiers::Modifiers;
use crate::query::team::TeamId;
use crate::query::timings::Timings;
use crate::query::value::Value;

/// Whether a failing stage aborts the run or is captured into the response.
#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub enum ErrorPolicy {
    /// Return the error to the caller.
    Propagate,
    /// Record a classified message and let the pipeline continue.
    Capture,
}

impl ErrorPolicy {
    /// Capture in debug mode, propagate otherwise.
    pub fn from_debug(debug: bool) -> Self {
        if debug {
            ErrorPolicy::Capture
        } else {
            ErrorPolicy::Propagate
        }
    }

    /// Runs one fallible stage under this policy.
    ///
    /// Returns `Ok(Some(_))` on success and `Ok(None)` when a failure was
    /// captured into `captured`. Input errors always propagate.
    pub fn run_fallible<T>(
        self,
        stage: &str,
        captured: &mut Option<String>,
        body: impl FnOnce() -> Result<T>,
    ) -> Result<Option<T>> {
        match body() {
            Ok(value) => Ok(Some(value)),
            Err(err) if self == ErrorPolicy::Capture && err.kind() != ErrorKind::Input => {
                warn!(stage, code = err.code(), error = %err, "captured stage failure");
                *captured = Some(err.user_message());
                Ok(None)
            }
            Err(err) => Err(err),
        }
    }
}

/// State shared by every stage of one request.
///
/// Contexts derived with [`ExecutionContext::derive`] share the team,
/// modifiers, timings and the lazily built catalog, but get their own
/// bound values and scratch fields.
pub struct ExecutionContext {
    /// Team the request runs for.
    pub team_id: TeamId,
    /// Resolved modifiers.
    pub modifiers: Modifiers,
    /// Stage timer shared with derived contexts.
    pub timings: Arc<Timings>,
    /// Which row limits apply.
    pub limit_context: LimitContext,
    /// Configured row limits.
    pub limits: LimitConfig,
    /// Clamp top-level limits to the context maximum while printing.
    pub limit_top_select: bool,
    /// Parameters bound while rendering the execution dialect.
    pub values: BTreeMap<String, Value>,
    /// Message of a captured stage failure.
    pub error: Option<String>,
    /// Engine plan lines, filled in debug mode.
    pub explain: Option<Vec<String>>,
    databases: Arc<dyn DatabaseProvider>,
    database: Arc<OnceLock<Arc<Database>>>,
}

impl fmt::Debug for ExecutionContext {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ExecutionContext")
            .field("team_id", &self.team_id)
            .field("modifiers", &self.modifiers)
            .field("limit_context", &self.limit_context)
            .field("values", &self.values)
            .field("error", &self.error)
            .field("explain", &self.explain)
            .field("has_database", &self.has_database())
            .finish_non_exhaustive()
    }
}

impl ExecutionContext {
    /// Context with default limits and no bound values.
    pub fn new(
        team_id: TeamId,
        modifiers: Modifiers,
        timings: Arc<Timings>,
        databases: Arc<dyn DatabaseProvider>,
    ) -> Self {
        Self {
            team_id,
            modifiers,
            timings,
            limit_context: LimitContext::default(),
            limits: LimitConfig::default(),
            limit_top_select: true,
            values: BTreeMap::new(),
            error: None,
            explain: None,
            databases,
            database: Arc::new(OnceLock::new()),
        }
    }

    /// Overrides the configured limits.
    pub fn with_limits(mut self, limits: LimitConfig) -> Self {
        self.limits = limits;
        self
    }

    /// Overrides the limit context.
    pub fn with_limit_context(mut self, limit_context: LimitContext) -> Self {
        self.limit_context = limit_context;
        self
    }

    /// Fresh context for another render pass over the same request.
    pub fn derive(&self) -> Self {
        Self {
            team_id: self.team_id,
            modifiers: self.modifiers.clone(),
            timings: Arc::clone(&self.timings),
            limit_context: self.limit_context,
            limits: self.limits.clone(),
            limit_top_select: self.limit_top_select,
            values: BTreeMap::new(),
            error: None,
            explain: None,
            databases: Arc::clone(&self.databases),
            database: Arc::clone(&self.database),
        }
    }

    /// Whether debug mode is on.
    pub fn debug(&self) -> bool {
        self.modifiers.debug_enabled()
    }

    /// Policy matching the debug flag.
    pub fn error_policy(&self) -> ErrorPolicy {
        ErrorPolicy::from_debug(self.debug())
    }

    /// Row ceiling for the top-level select in this context.
    pub fn max_limit(&self) -> i64 {
        self.limit_context.max_limit(&self.limits)
    }

    /// Returns the catalog, building it on first use.
    pub fn database(&self) -> Result<Arc<Database>> {
        if let Some(database) = self.database.get() {
            return Ok(Arc::clone(database));
        }
        let built = Arc::new(self.databases.build(self.team_id, &self.modifiers, &self.timings)?);
        Ok(Arc::clone(self.database.get_or_init(|| built)))
    }

    /// Whether a catalog has been built for this context chain.
    pub fn has_database(&self) -> bool {
        self.database.get().is_some()
    }

    /// Binds `value` as a statement parameter and returns its name.
    pub fn add_value(&mut self, value: Value) -> String {
        let name = format!("hogql_val_{}", self.values.len());
        self.values.insert(name.clone(), value);
        name
    }
}
