#![allow(clippy::all)]
#![allow(missing_docs)]

use std::sync::Arc;

use hogql_exec::error::{QueryError, Result, StorageError, UNKNOWN_ERROR};
use hogql_exec::query::ast::{CompareOp, Expr, SelectQuery, SelectStatement};
use hogql_exec::query::context::ExecutionContext;
use hogql_exec::query::database::{Database, StaticDatabaseProvider};
use hogql_exec::query::filters::HogQLFilters;
use hogql_exec::query::modifiers::{InCohortVia, Modifiers};
use hogql_exec::query::printer::{Dialect, ExecutionSettings, QueryPrinter, SqlPrinter};
use hogql_exec::query::services::{MetadataResponse, QueryServices};
use hogql_exec::query::storage::Workload;
use hogql_exec::query::team::Team;
use hogql_exec::query::testing::{RecordingStorage, StaticMetadataValidator, StaticParser};
use hogql_exec::query::value::Value;
use hogql_exec::query::variables::HogQLVariable;
use hogql_exec::{QueryRequest, QueryRunner};

fn init_tracing() {
    let _ = tracing_subscriber::fmt()
        .with_env_filter(tracing_subscriber::EnvFilter::from_default_env())
        .with_test_writer()
        .try_init();
}

fn parser() -> StaticParser {
    StaticParser::new()
        .with_statement("SELECT 1", SelectQuery::new(vec![Expr::constant(1_i64)]))
        .with_statement(
            "SELECT event, count() AS c FROM events GROUP BY event",
            SelectQuery {
                group_by: vec![Expr::field(["event"])],
                ..SelectQuery::new(vec![
                    Expr::field(["event"]),
                    Expr::alias("c", Expr::call("count", vec![])),
                ])
                .from_table("events")
            },
        )
        .with_statement(
            "SELECT event FROM events WHERE {filters}",
            SelectQuery::new(vec![Expr::field(["event"])])
                .from_table("events")
                .filter(Expr::placeholder(["filters"])),
        )
        .with_statement(
            "SELECT event FROM events WHERE event = {variables.event_name}",
            SelectQuery::new(vec![Expr::field(["event"])])
                .from_table("events")
                .filter(Expr::compare(
                    CompareOp::Eq,
                    Expr::field(["event"]),
                    Expr::placeholder(["variables", "event_name"]),
                )),
        )
        .with_statement("SELECT * FROM missing", SelectQuery::new(vec![Expr::Asterisk]).from_table("missing"))
}

fn services(storage: Arc<RecordingStorage>) -> QueryServices {
    let database = Database::new().with_table("events", "sharded_events", ["event", "timestamp", "properties"]);
    QueryServices::new(
        Arc::new(parser()),
        storage,
        Arc::new(StaticDatabaseProvider::new(database)),
    )
}

fn debug_modifiers() -> Modifiers {
    Modifiers {
        debug: Some(true),
        ..Modifiers::default()
    }
}

#[test]
fn select_one_resolves_every_modifier() -> Result<()> {
    init_tracing();
    let storage = Arc::new(RecordingStorage::new());
    storage.push_rows(1);
    let runner = QueryRunner::new(services(Arc::clone(&storage)));

    let response = runner.execute(&QueryRequest::new("SELECT 1"), &Team::new(1))?;

    assert!(response.modifiers.is_resolved(), "unset: {:?}", response.modifiers.unset_fields());
    assert_eq!(response.modifiers.in_cohort_via, Some(InCohortVia::Subquery));
    assert_eq!(response.query.as_deref(), Some("SELECT 1"));
    assert_eq!(response.hogql, "SELECT 1 LIMIT 100");
    assert_eq!(response.results, vec![vec![Value::Int(0)]]);
    assert_eq!(response.columns, vec!["1"]);
    assert_eq!(response.error, None);
    assert_eq!(response.explain, None);
    Ok(())
}

#[test]
fn storage_receives_values_tags_and_routing() -> Result<()> {
    init_tracing();
    let storage = Arc::new(RecordingStorage::new());
    let runner = QueryRunner::new(services(Arc::clone(&storage)));
    let request = QueryRequest::new("SELECT event, count() AS c FROM events GROUP BY event")
        .with_query_type("TrendsQuery")
        .with_workload(Workload::Online)
        .readonly(false);

    let response = runner.execute(&request, &Team::new(42))?;

    assert_eq!(response.columns, vec!["event", "c"]);
    let calls = storage.calls();
    assert_eq!(calls.len(), 1);
    let call = &calls[0];
    assert_eq!(call.sql, response.clickhouse);
    assert!(call.sql.starts_with("SELECT event, count() AS c FROM sharded_events GROUP BY event"));
    assert_eq!(call.values.get("hogql_val_0"), Some(&Value::Int(100)));
    assert_eq!(call.workload, Workload::Online);
    assert!(!call.readonly);
    assert_eq!(call.tags.query_type, "TrendsQuery");
    assert_eq!(call.tags.team_id, Team::new(42).id);
    assert!(!call.tags.has_joins);
    assert_eq!(call.tags.modifiers.len(), 15);
    Ok(())
}

#[test]
fn structured_queries_keep_no_original_text() -> Result<()> {
    let storage = Arc::new(RecordingStorage::new());
    let runner = QueryRunner::new(services(storage));
    let stmt: SelectStatement = SelectQuery::new(vec![Expr::field(["event"])])
        .from_table("events")
        .limit(7)
        .into();
    let response = runner.execute(&QueryRequest::new(stmt.clone()), &Team::new(1))?;
    assert_eq!(response.query, None);
    assert_eq!(response.hogql, "SELECT event FROM events LIMIT 7");

    let timing_keys: Vec<_> = response.timings.iter().map(|t| t.k.as_str()).collect();
    for stage in ["./hogql", "./clickhouse", "./execute"] {
        assert!(timing_keys.contains(&stage), "missing {stage} in {timing_keys:?}");
    }
    assert_eq!(timing_keys.last(), Some(&"."));
    Ok(())
}

#[test]
fn debug_storage_failure_is_captured_into_the_response() -> Result<()> {
    init_tracing();
    let storage = Arc::new(RecordingStorage::new());
    storage.push_error(StorageError::exposed(Some(47), "Unknown identifier `evnt`").into());
    let runner = QueryRunner::new(services(Arc::clone(&storage)));
    let request = QueryRequest::new("SELECT 1").with_modifiers(debug_modifiers());

    let response = runner.execute(&request, &Team::new(1))?;

    assert_eq!(response.clickhouse, "");
    assert_eq!(response.error.as_deref(), Some("Code: 47. Unknown identifier `evnt`"));
    assert!(response.results.is_empty());
    assert_eq!(response.hogql, "SELECT 1 LIMIT 100");
    assert_eq!(response.explain, None);
    Ok(())
}

#[test]
fn debug_success_adds_explain_and_metadata() -> Result<()> {
    let storage = Arc::new(RecordingStorage::new());
    storage.push_rows(2);
    storage.push_explain(Ok(vec!["Expression".into(), "  ReadFromMergeTree".into()]));
    let validator = Arc::new(StaticMetadataValidator::valid());
    let runner = QueryRunner::new(services(Arc::clone(&storage)).with_metadata(validator.clone()));
    let request = QueryRequest::new("SELECT 1").with_modifiers(debug_modifiers());

    let response = runner.execute(&request, &Team::new(1))?;

    assert_eq!(response.error, None);
    assert_eq!(
        response.explain,
        Some(vec!["Expression".to_owned(), "  ReadFromMergeTree".to_owned()])
    );
    assert_eq!(
        response.metadata,
        Some(MetadataResponse {
            is_valid: true,
            ..MetadataResponse::default()
        })
    );
    assert_eq!(validator.call_count(), 1);
    let calls = storage.calls();
    assert_eq!(calls.len(), 2);
    assert_eq!(calls[1].sql, format!("EXPLAIN {}", response.clickhouse));
    Ok(())
}

#[test]
fn enrichment_failures_leave_the_response_intact() -> Result<()> {
    let storage = Arc::new(RecordingStorage::new());
    storage.push_rows(3);
    storage.push_explain(Err(StorageError::internal(None, "explain exploded").into()));
    let validator = Arc::new(StaticMetadataValidator::returning(Err(QueryError::internal("down"))));
    let runner = QueryRunner::new(services(storage).with_metadata(validator));
    let request = QueryRequest::new("SELECT 1").with_modifiers(debug_modifiers());

    let response = runner.execute(&request, &Team::new(1))?;

    assert_eq!(response.results.len(), 3);
    assert_eq!(response.error, None);
    assert_eq!(response.explain, None);
    assert_eq!(response.metadata, None);
    Ok(())
}

/// Printer that renders the canonical dialect but refuses the execution one.
struct BrokenExecutionPrinter;

impl QueryPrinter for BrokenExecutionPrinter {
    fn print(
        &self,
        stmt: &SelectStatement,
        ctx: &mut ExecutionContext,
        dialect: Dialect,
        settings: Option<&ExecutionSettings>,
        pretty: bool,
    ) -> Result<String> {
        match dialect {
            Dialect::HogQl => SqlPrinter.print(stmt, ctx, dialect, settings, pretty),
            Dialect::ClickHouse => Err(QueryError::internal("printer crashed")),
        }
    }

    fn print_expr(&self, expr: &Expr, ctx: &mut ExecutionContext, dialect: Dialect) -> Result<String> {
        SqlPrinter.print_expr(expr, ctx, dialect)
    }
}

#[test]
fn execution_render_failures_depend_on_debug_mode() -> Result<()> {
    let storage = Arc::new(RecordingStorage::new());
    let runner = QueryRunner::new(
        services(Arc::clone(&storage)).with_printer(Arc::new(BrokenExecutionPrinter)),
    );

    let err = runner.execute(&QueryRequest::new("SELECT 1"), &Team::new(1)).unwrap_err();
    assert_eq!(err, QueryError::internal("printer crashed"));

    let request = QueryRequest::new("SELECT 1").with_modifiers(debug_modifiers());
    let response = runner.execute(&request, &Team::new(1))?;
    assert_eq!(response.clickhouse, "");
    assert_eq!(response.error.as_deref(), Some(UNKNOWN_ERROR));
    assert_eq!(response.hogql, "SELECT 1 LIMIT 100");
    assert!(storage.calls().is_empty(), "storage skipped without execution text");
    Ok(())
}

#[test]
fn canonical_render_failures_always_propagate() {
    let storage = Arc::new(RecordingStorage::new());
    let runner = QueryRunner::new(services(Arc::clone(&storage)));
    let request = QueryRequest::new("SELECT * FROM missing").with_modifiers(debug_modifiers());
    let err = runner.execute(&request, &Team::new(1)).unwrap_err();
    assert_eq!(err, QueryError::UnknownTable { name: "missing".into() });
    assert!(storage.calls().is_empty());
}

#[test]
fn ambiguous_filters_fail_before_rendering() {
    let storage = Arc::new(RecordingStorage::new());
    let runner = QueryRunner::new(services(Arc::clone(&storage)));
    let request = QueryRequest::new("SELECT event FROM events WHERE {filters}")
        .with_filters(HogQLFilters::default())
        .with_placeholder("filters", Expr::constant(true))
        .with_modifiers(debug_modifiers());
    let err = runner
        .generate_execution_text(&request, &Team::new(1))
        .unwrap_err();
    assert_eq!(err, QueryError::AmbiguousFilters);
    assert!(storage.calls().is_empty());
}

#[test]
fn filters_and_variables_flow_into_both_dialects() -> Result<()> {
    let storage = Arc::new(RecordingStorage::new());
    let runner = QueryRunner::new(services(storage));

    let filtered = QueryRequest::new("SELECT event FROM events WHERE {filters}")
        .with_filters(HogQLFilters::default().with_date_range(Some("2024-01-01"), None));
    let compiled = runner.generate_execution_text(&filtered, &Team::new(1))?;
    assert_eq!(
        compiled.hogql,
        "SELECT event FROM events WHERE timestamp >= toDateTime('2024-01-01 00:00:00') LIMIT 100"
    );
    assert_eq!(
        compiled.values().get("hogql_val_0"),
        Some(&Value::DateTime(1_704_067_200_000_000_000))
    );

    let with_variable = QueryRequest::new("SELECT event FROM events WHERE event = {variables.event_name}")
        .with_variable(HogQLVariable::new("var-1", "event_name", Some(Value::from("$pageview"))));
    let compiled = runner.generate_execution_text(&with_variable, &Team::new(1))?;
    assert_eq!(
        compiled.hogql,
        "SELECT event FROM events WHERE event = '$pageview' LIMIT 100"
    );

    let missing = QueryRequest::new("SELECT event FROM events WHERE event = {variables.event_name}");
    let err = runner.generate_execution_text(&missing, &Team::new(1)).unwrap_err();
    assert_eq!(
        err,
        QueryError::PlaceholdersNotProvided {
            names: vec!["variables.event_name".into()],
        }
    );
    Ok(())
}
