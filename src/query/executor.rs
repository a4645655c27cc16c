//! Query execution pipeline.
//!
//! Stages run strictly in order: parse, variable substitution, placeholder
//! substitution, default limits, canonical render, execution render and,
//! for [`QueryRunner::execute`], the storage call plus debug-only
//! enrichment. [`QueryRunner::generate_execution_text`] stops after the
//! execution render.

use std::collections::BTreeMap;
use std::sync::Arc;

use serde::{Deserialize, Serialize};
use tracing::{debug, warn};

use crate::error::Result;
use crate::query::ast::{Expr, Query, SelectStatement};
use crate::query::context::{ErrorPolicy, ExecutionContext};
use crate::query::filters::HogQLFilters;
use crate::query::limits::{apply_default_limit, LimitContext};
use crate::query::modifiers::{ModifierResolver, Modifiers};
use crate::query::placeholders::replace_placeholders;
use crate::query::printer::{Dialect, ExecutionSettings};
use crate::query::services::{MetadataResponse, QueryServices};
use crate::query::storage::{QueryTags, StorageRequest, StorageResult, Workload};
use crate::query::team::{Principal, Team};
use crate::query::timings::{QueryTiming, Timings};
use crate::query::value::Value;
use crate::query::variables::{replace_variables, HogQLVariable};

/// Query type label used when the caller gives none.
pub const DEFAULT_QUERY_TYPE: &str = "hogql_query";

/// Everything a caller can say about one run.
#[derive(Clone, Debug)]
pub struct QueryRequest {
    /// Raw text or a statement tree.
    pub query: Query,
    /// Text the statement was parsed from before it reached the runner.
    ///
    /// Preferred over [`Query::text`] for [`Response::query`].
    pub original_text: Option<String>,
    /// Logical label attached to telemetry.
    pub query_type: String,
    /// Filter object for the reserved `filters` placeholders.
    pub filters: Option<HogQLFilters>,
    /// Values for named placeholders.
    pub placeholders: BTreeMap<String, Expr>,
    /// Bindings keyed by variable id.
    pub variables: BTreeMap<String, HogQLVariable>,
    /// Storage routing class.
    pub workload: Workload,
    /// Engine settings; derived from configuration when absent.
    pub settings: Option<ExecutionSettings>,
    /// Explicit modifiers, highest precedence during resolution.
    pub modifiers: Option<Modifiers>,
    /// Why the query runs; `query` when absent.
    pub limit_context: Option<LimitContext>,
    /// Shared stage timer; a fresh one is created when absent.
    pub timings: Option<Arc<Timings>>,
    /// Render with line breaks between clauses.
    pub pretty: bool,
    /// Ask the engine to reject writes.
    pub readonly: bool,
    /// Who the query runs for.
    pub principal: Principal,
}

impl QueryRequest {
    /// Request with defaults: readonly, system principal, default workload.
    pub fn new(query: impl Into<Query>) -> Self {
        Self {
            query: query.into(),
            original_text: None,
            query_type: DEFAULT_QUERY_TYPE.to_owned(),
            filters: None,
            placeholders: BTreeMap::new(),
            variables: BTreeMap::new(),
            workload: Workload::Default,
            settings: None,
            modifiers: None,
            limit_context: None,
            timings: None,
            pretty: false,
            readonly: true,
            principal: Principal::System,
        }
    }

    /// Sets the telemetry label.
    pub fn with_query_type(mut self, query_type: impl Into<String>) -> Self {
        self.query_type = query_type.into();
        self
    }

    /// Supplies the filter object.
    pub fn with_filters(mut self, filters: HogQLFilters) -> Self {
        self.filters = Some(filters);
        self
    }

    /// Binds one named placeholder.
    pub fn with_placeholder(mut self, name: impl Into<String>, value: Expr) -> Self {
        self.placeholders.insert(name.into(), value);
        self
    }

    /// Binds one variable under its id.
    pub fn with_variable(mut self, variable: HogQLVariable) -> Self {
        self.variables.insert(variable.variable_id.clone(), variable);
        self
    }

    /// Sets the storage routing class.
    pub fn with_workload(mut self, workload: Workload) -> Self {
        self.workload = workload;
        self
    }

    /// Overrides the engine settings.
    pub fn with_settings(mut self, settings: ExecutionSettings) -> Self {
        self.settings = Some(settings);
        self
    }

    /// Sets explicit modifiers.
    pub fn with_modifiers(mut self, modifiers: Modifiers) -> Self {
        self.modifiers = Some(modifiers);
        self
    }

    /// Sets the limit context.
    pub fn with_limit_context(mut self, limit_context: LimitContext) -> Self {
        self.limit_context = Some(limit_context);
        self
    }

    /// Shares an existing stage timer.
    pub fn with_timings(mut self, timings: Arc<Timings>) -> Self {
        self.timings = Some(timings);
        self
    }

    /// Sets the principal.
    pub fn with_principal(mut self, principal: Principal) -> Self {
        self.principal = principal;
        self
    }

    /// Toggles pretty rendering.
    pub fn pretty(mut self, pretty: bool) -> Self {
        self.pretty = pretty;
        self
    }

    /// Toggles readonly execution.
    pub fn readonly(mut self, readonly: bool) -> Self {
        self.readonly = readonly;
        self
    }
}

/// Output of the compile phase.
#[derive(Debug)]
pub struct CompiledQuery {
    /// Original text when the query arrived as text.
    pub query: Option<String>,
    /// Statement after substitution and limit injection.
    pub statement: SelectStatement,
    /// Canonical dialect text.
    pub hogql: String,
    /// Execution dialect text. Empty when the execution render failed in
    /// debug mode.
    pub clickhouse: String,
    /// Output column names.
    pub columns: Vec<String>,
    /// Message captured in debug mode.
    pub error: Option<String>,
    /// Context of the execution render, holding the bound values.
    pub context: ExecutionContext,
}

impl CompiledQuery {
    /// Parameters bound while rendering the execution text.
    pub fn values(&self) -> &BTreeMap<String, Value> {
        &self.context.values
    }
}

/// Result of a full run.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct Response {
    /// Original text when the query arrived as text.
    pub query: Option<String>,
    /// Canonical dialect text.
    pub hogql: String,
    /// Execution dialect text, empty when nothing ran.
    pub clickhouse: String,
    /// Message captured in debug mode.
    pub error: Option<String>,
    /// Stage timings ending with the `.` total.
    pub timings: Vec<QueryTiming>,
    /// Result rows.
    pub results: Vec<Vec<Value>>,
    /// Output column names.
    pub columns: Vec<String>,
    /// `(name, type)` pairs reported by the engine.
    pub types: Vec<(String, String)>,
    /// Fully resolved modifiers.
    pub modifiers: Modifiers,
    /// `EXPLAIN` output, debug mode only.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub explain: Option<Vec<String>>,
    /// Validation of the canonical text, debug mode only.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub metadata: Option<MetadataResponse>,
}

/// Runs requests against a fixed set of collaborators.
#[derive(Clone)]
pub struct QueryRunner {
    services: QueryServices,
}

impl QueryRunner {
    /// Runner over `services`.
    pub fn new(services: QueryServices) -> Self {
        Self { services }
    }

    /// Collaborators in use.
    pub fn services(&self) -> &QueryServices {
        &self.services
    }

    /// Compiles `request` into both dialects without touching storage.
    pub fn generate_execution_text(&self, request: &QueryRequest, team: &Team) -> Result<CompiledQuery> {
        let services = &self.services;
        let timings = request
            .timings
            .clone()
            .unwrap_or_else(|| Arc::new(Timings::new()));
        let limit_context = request.limit_context.unwrap_or_default();

        let resolver = ModifierResolver::new(&services.config, services.flags.as_ref());
        let modifiers = if limit_context == LimitContext::CohortCalculation {
            resolver.resolve_for_cohort(request.modifiers.as_ref(), team, &request.principal)
        } else {
            resolver.resolve(request.modifiers.as_ref(), team, &request.principal)
        };

        let mut statement = match &request.query {
            Query::Raw(text) => timings.time("parse_select", || services.parser.parse_select(text))?,
            Query::Structured(stmt) => stmt.clone(),
        };
        debug!(team_id = %team.id, stage = "parsed", leaves = statement.leaf_count());

        if !request.variables.is_empty() {
            statement = timings.time("replace_variables", || {
                replace_variables(statement, &request.variables, team)
            })?;
        }
        statement = timings.time("replace_placeholders", || {
            replace_placeholders(
                statement,
                request.filters.as_ref(),
                &request.placeholders,
                team,
                services.filters.as_ref(),
            )
        })?;
        debug!(team_id = %team.id, stage = "placeholders_substituted");

        timings.time("max_limit", || {
            apply_default_limit(&mut statement, limit_context, &services.config.limits)
        });

        let mut context = ExecutionContext::new(
            team.id,
            modifiers,
            Arc::clone(&timings),
            Arc::clone(&services.databases),
        )
        .with_limits(services.config.limits.clone())
        .with_limit_context(limit_context);

        let mut canonical = context.derive();
        let hogql = timings.time("hogql", || {
            services
                .printer
                .print(&statement, &mut canonical, Dialect::HogQl, None, request.pretty)
        })?;
        let columns = self.output_columns(&statement, &mut canonical)?;
        debug!(team_id = %team.id, stage = "canonical_rendered", columns = columns.len());

        let mut settings = request
            .settings
            .clone()
            .unwrap_or_else(|| ExecutionSettings::from_config(&services.config.execution));
        if limit_context.is_long_running() {
            settings.max_execution_time = Some(services.config.execution.increased_max_execution_time);
        }

        let mut error = None;
        let clickhouse = context
            .error_policy()
            .run_fallible("clickhouse", &mut error, || {
                timings.time("clickhouse", || {
                    services.printer.print(
                        &statement,
                        &mut context,
                        Dialect::ClickHouse,
                        Some(&settings),
                        request.pretty,
                    )
                })
            })?;
        let clickhouse = match clickhouse {
            Some(text) => text,
            None => {
                context.values.clear();
                String::new()
            }
        };
        context.error = error.clone();
        debug!(
            team_id = %team.id,
            stage = "execution_rendered",
            captured_error = error.is_some()
        );

        Ok(CompiledQuery {
            query: request
                .original_text
                .clone()
                .or_else(|| request.query.text().map(str::to_owned)),
            statement,
            hogql,
            clickhouse,
            columns,
            error,
            context,
        })
    }

    /// Compiles and runs `request`.
    pub fn execute(&self, request: &QueryRequest, team: &Team) -> Result<Response> {
        let CompiledQuery {
            query,
            hogql,
            mut clickhouse,
            columns,
            mut error,
            mut context,
            ..
        } = self.generate_execution_text(request, team)?;
        let timings = Arc::clone(&context.timings);

        let mut results = Vec::new();
        let mut types = Vec::new();
        let mut explain = None;
        let mut metadata = None;

        if clickhouse.is_empty() {
            debug!(team_id = %team.id, stage = "execution_skipped");
        } else {
            let tags = QueryTags::for_statement(&context, &request.query_type, &clickhouse, request.workload);
            let storage_request = StorageRequest {
                sql: &clickhouse,
                values: &context.values,
                workload: request.workload,
                team_id: team.id,
                readonly: request.readonly,
                tags: &tags,
            };
            let outcome = context.error_policy().run_fallible("execute", &mut error, || {
                timings.time("execute", || self.services.storage.execute(&storage_request))
            })?;
            match outcome {
                Some(StorageResult { rows, types: column_types }) => {
                    results = rows;
                    types = column_types;
                    debug!(team_id = %team.id, stage = "executed", rows = results.len());
                    if context.debug() && error.is_none() {
                        explain = self.explain(&context, &tags, &clickhouse, request);
                        metadata = self.validate_metadata(&hogql, team);
                    }
                }
                None => clickhouse.clear(),
            }
        }

        context.error = error.clone();
        context.explain = explain.clone();

        Ok(Response {
            query,
            hogql,
            clickhouse,
            error,
            timings: timings.to_list(),
            results,
            columns,
            types,
            modifiers: context.modifiers.clone(),
            explain,
            metadata,
        })
    }

    /// Output column names of the first leaf, re-rendering unaliased
    /// expressions.
    fn output_columns(&self, statement: &SelectStatement, ctx: &mut ExecutionContext) -> Result<Vec<String>> {
        let mut columns = Vec::new();
        for expr in &statement.first_leaf().select {
            match expr {
                Expr::Alias { alias, .. } => columns.push(alias.clone()),
                other => columns.push(self.services.printer.print_expr(other, ctx, Dialect::HogQl)?),
            }
        }
        Ok(columns)
    }

    fn explain(
        &self,
        context: &ExecutionContext,
        tags: &QueryTags,
        clickhouse: &str,
        request: &QueryRequest,
    ) -> Option<Vec<String>> {
        let sql = format!("EXPLAIN {clickhouse}");
        let explain_request = StorageRequest {
            sql: &sql,
            values: &context.values,
            workload: request.workload,
            team_id: context.team_id,
            readonly: request.readonly,
            tags,
        };
        let mut captured = None;
        let outcome = ErrorPolicy::Capture.run_fallible("explain", &mut captured, || {
            context
                .timings
                .time("explain", || self.services.storage.execute(&explain_request))
        });
        match outcome {
            Ok(Some(result)) => Some(result.text_lines()),
            Ok(None) => None,
            Err(err) => {
                warn!(team_id = %context.team_id, error = %err, "explain query failed");
                None
            }
        }
    }

    fn validate_metadata(&self, hogql: &str, team: &Team) -> Option<MetadataResponse> {
        let validator = self.services.metadata.as_ref()?;
        match validator.validate(hogql, team, true) {
            Ok(response) => Some(response),
            Err(err) => {
                warn!(team_id = %team.id, error = %err, "metadata validation failed");
                None
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::{QueryError, StorageError, UNKNOWN_ERROR};
    use crate::query::ast::SelectQuery;
    use crate::query::database::{Database, StaticDatabaseProvider};
    use crate::query::modifiers::InCohortVia;
    use crate::query::testing::{RecordingStorage, StaticParser};

    fn runner(storage: Arc<RecordingStorage>) -> QueryRunner {
        let parser = StaticParser::new().with_statement(
            "SELECT event FROM events",
            SelectQuery::new(vec![Expr::field(["event"])]).from_table("events"),
        );
        let database = Database::new().with_table("events", "events", ["event"]);
        QueryRunner::new(QueryServices::new(
            Arc::new(parser),
            storage,
            Arc::new(StaticDatabaseProvider::new(database)),
        ))
    }

    #[test]
    fn compile_phase_does_not_touch_storage() {
        let storage = Arc::new(RecordingStorage::new());
        let compiled = runner(Arc::clone(&storage))
            .generate_execution_text(&QueryRequest::new("SELECT event FROM events"), &Team::new(1))
            .expect("compile");
        assert_eq!(compiled.query.as_deref(), Some("SELECT event FROM events"));
        assert_eq!(compiled.hogql, "SELECT event FROM events LIMIT 100");
        assert_eq!(
            compiled.clickhouse,
            "SELECT event FROM events LIMIT %(hogql_val_0)s SETTINGS readonly=2, max_execution_time=60"
        );
        assert_eq!(compiled.values().get("hogql_val_0"), Some(&Value::Int(100)));
        assert_eq!(compiled.columns, vec!["event"]);
        assert!(storage.calls().is_empty());
    }

    #[test]
    fn long_running_contexts_raise_the_time_budget() {
        let storage = Arc::new(RecordingStorage::new());
        let request = QueryRequest::new("SELECT event FROM events").with_limit_context(LimitContext::Export);
        let compiled = runner(storage)
            .generate_execution_text(&request, &Team::new(1))
            .expect("compile");
        assert!(compiled.clickhouse.ends_with("max_execution_time=600"));
        assert_eq!(compiled.values().get("hogql_val_0"), Some(&Value::Int(50_000)));
    }

    #[test]
    fn cohort_contexts_use_cohort_resolution() {
        let storage = Arc::new(RecordingStorage::new());
        let request = QueryRequest::new("SELECT event FROM events")
            .with_limit_context(LimitContext::CohortCalculation)
            .with_modifiers(Modifiers {
                in_cohort_via: Some(InCohortVia::Auto),
                ..Modifiers::default()
            });
        let compiled = runner(storage)
            .generate_execution_text(&request, &Team::new(1))
            .expect("compile");
        assert_eq!(compiled.context.modifiers.in_cohort_via, Some(InCohortVia::Subquery));
    }

    #[test]
    fn storage_failures_propagate_outside_debug_mode() {
        let storage = Arc::new(RecordingStorage::new());
        storage.push_error(StorageError::internal(Some(241), "memory limit exceeded").into());
        let err = runner(storage)
            .execute(&QueryRequest::new("SELECT event FROM events"), &Team::new(1))
            .unwrap_err();
        assert_eq!(err.code(), "StorageError");
    }

    #[test]
    fn debug_mode_flattens_unexposed_storage_errors() {
        let storage = Arc::new(RecordingStorage::new());
        storage.push_error(StorageError::internal(Some(241), "memory limit exceeded").into());
        let request = QueryRequest::new("SELECT event FROM events").with_modifiers(Modifiers {
            debug: Some(true),
            ..Modifiers::default()
        });
        let response = runner(Arc::clone(&storage))
            .execute(&request, &Team::new(1))
            .expect("contained");
        assert_eq!(response.error.as_deref(), Some(UNKNOWN_ERROR));
        assert!(response.results.is_empty());
        assert_eq!(response.explain, None);
        assert_eq!(storage.calls().len(), 1, "no explain after a failure");
    }

    #[test]
    fn parse_errors_are_never_contained() {
        let storage = Arc::new(RecordingStorage::new());
        let request = QueryRequest::new("SELEC oops").with_modifiers(Modifiers {
            debug: Some(true),
            ..Modifiers::default()
        });
        let err = runner(storage).execute(&request, &Team::new(1)).unwrap_err();
        assert!(matches!(err, QueryError::Syntax { .. }));
    }
}
