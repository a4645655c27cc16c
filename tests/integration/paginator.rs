#![allow(clippy::all)]
#![allow(missing_docs)]

use std::sync::Arc;

use hogql_exec::config::LimitConfig;
use hogql_exec::error::{Result, StorageError};
use hogql_exec::query::ast::{Expr, SelectQuery, SelectSetQuery, SelectStatement, SetOperator};
use hogql_exec::query::database::{Database, StaticDatabaseProvider};
use hogql_exec::query::limits::LimitContext;
use hogql_exec::query::services::QueryServices;
use hogql_exec::query::team::Team;
use hogql_exec::query::testing::{RecordingStorage, StaticParser};
use hogql_exec::query::value::Value;
use hogql_exec::{HasMorePaginator, PaginationParams, QueryRequest, QueryRunner};

fn runner(storage: Arc<RecordingStorage>) -> QueryRunner {
    let parser = StaticParser::new().with_statement(
        "SELECT event FROM events",
        SelectQuery::new(vec![Expr::field(["event"])]).from_table("events"),
    );
    let database = Database::new()
        .with_table("events", "sharded_events", ["event"])
        .with_table("persons", "person", ["id"]);
    QueryRunner::new(QueryServices::new(
        Arc::new(parser),
        storage,
        Arc::new(StaticDatabaseProvider::new(database)),
    ))
}

#[test]
fn six_rows_for_a_page_of_five_means_more() -> Result<()> {
    let storage = Arc::new(RecordingStorage::new());
    storage.push_rows(6);
    let runner = runner(Arc::clone(&storage));
    let mut paginator = HasMorePaginator::new(Some(5), Some(0), &LimitConfig::default());

    let response = paginator.execute_hogql_query(&runner, QueryRequest::new("SELECT event FROM events"), &Team::new(1))?;
    assert_eq!(response.results.len(), 6);

    assert!(paginator.has_more());
    assert_eq!(
        paginator.trim_results(),
        (0..5).map(|i| vec![Value::Int(i)]).collect::<Vec<_>>()
    );
    assert_eq!(paginator.results().len(), 5);
    assert_eq!(
        paginator.response_params(),
        PaginationParams {
            has_more: true,
            limit: 5,
            offset: 0,
        }
    );

    let call = &storage.calls()[0];
    assert!(call.sql.contains("LIMIT %(hogql_val_0)s OFFSET %(hogql_val_1)s"), "{}", call.sql);
    assert_eq!(call.values.get("hogql_val_0"), Some(&Value::Int(6)));
    assert_eq!(call.values.get("hogql_val_1"), Some(&Value::Int(0)));
    Ok(())
}

#[test]
fn short_result_has_no_more_pages() -> Result<()> {
    let storage = Arc::new(RecordingStorage::new());
    storage.push_rows(3);
    let runner = runner(storage);
    let mut paginator = HasMorePaginator::new(Some(5), None, &LimitConfig::default());

    paginator.execute_hogql_query(&runner, QueryRequest::new("SELECT event FROM events"), &Team::new(1))?;

    assert!(!paginator.has_more());
    assert_eq!(paginator.trim_results().len(), 3);
    assert_eq!(
        serde_json::to_value(paginator.response_params()).expect("serialize"),
        serde_json::json!({"hasMore": false, "limit": 5, "offset": 0})
    );
    Ok(())
}

#[test]
fn every_union_branch_gets_the_same_window() -> Result<()> {
    let storage = Arc::new(RecordingStorage::new());
    let runner = runner(Arc::clone(&storage));
    let mut paginator = HasMorePaginator::new(Some(10), Some(20), &LimitConfig::default());
    let stmt: SelectStatement = SelectSetQuery::from_queries(
        SetOperator::UnionAll,
        [
            SelectQuery::new(vec![Expr::field(["event"])]).from_table("events"),
            SelectQuery::new(vec![Expr::field(["id"])]).from_table("persons").limit(2),
        ],
    )
    .expect("two branches")
    .into();

    let response = paginator.execute_hogql_query(&runner, QueryRequest::new(stmt), &Team::new(1))?;

    assert_eq!(
        response.hogql,
        "SELECT event FROM events LIMIT 11 OFFSET 20 UNION ALL SELECT id FROM persons LIMIT 11 OFFSET 20"
    );
    let call = &storage.calls()[0];
    let windows: Vec<_> = call.values.values().cloned().collect();
    assert_eq!(
        windows,
        vec![Value::Int(11), Value::Int(20), Value::Int(11), Value::Int(20)]
    );
    Ok(())
}

#[test]
fn limit_context_travels_with_the_paginator() -> Result<()> {
    let storage = Arc::new(RecordingStorage::new());
    let runner = runner(Arc::clone(&storage));
    let mut paginator =
        HasMorePaginator::with_limit_context(None, None, LimitContext::Export, &LimitConfig::default());
    assert_eq!(paginator.limit(), 49_999);

    paginator.execute_hogql_query(&runner, QueryRequest::new("SELECT event FROM events"), &Team::new(1))?;

    let call = &storage.calls()[0];
    assert!(call.sql.ends_with("max_execution_time=600"), "{}", call.sql);
    // the look-ahead row fits exactly under the export ceiling
    assert_eq!(call.values.get("hogql_val_0"), Some(&Value::Int(50_000)));
    Ok(())
}

#[test]
fn full_pages_at_the_row_ceiling_still_detect_more() -> Result<()> {
    let config = LimitConfig::default();
    let storage = Arc::new(RecordingStorage::new());
    storage.push_rows(50_000);
    let runner = runner(Arc::clone(&storage));
    let mut paginator =
        HasMorePaginator::with_limit_context(Some(50_000), None, LimitContext::Query, &config);

    paginator.execute_hogql_query(&runner, QueryRequest::new("SELECT event FROM events"), &Team::new(1))?;

    let sent = storage.calls()[0].values.get("hogql_val_0").cloned();
    assert_eq!(sent, Some(Value::Int(paginator.limit() + 1)));
    assert_eq!(sent, Some(Value::Int(config.max_select_returned_rows)));
    assert!(paginator.has_more());
    assert_eq!(paginator.results().len() as i64, paginator.limit());
    Ok(())
}

#[test]
fn raw_text_survives_pagination() -> Result<()> {
    let storage = Arc::new(RecordingStorage::new());
    let runner = runner(storage);
    let mut paginator = HasMorePaginator::new(Some(5), None, &LimitConfig::default());

    let response =
        paginator.execute_hogql_query(&runner, QueryRequest::new("SELECT event FROM events"), &Team::new(1))?;

    assert_eq!(response.query.as_deref(), Some("SELECT event FROM events"));
    assert!(
        response.timings.iter().any(|timing| timing.k == "./parse_select"),
        "{:?}",
        response.timings
    );
    Ok(())
}

#[test]
fn failed_runs_drop_the_previous_page() -> Result<()> {
    let storage = Arc::new(RecordingStorage::new());
    storage.push_rows(6);
    storage.push_error(StorageError::exposed(Some(159), "Timeout exceeded").into());
    let runner = runner(Arc::clone(&storage));
    let mut paginator = HasMorePaginator::new(Some(5), None, &LimitConfig::default());
    let request = QueryRequest::new("SELECT event FROM events");

    paginator.execute_hogql_query(&runner, request.clone(), &Team::new(1))?;
    assert!(paginator.has_more());

    let err = paginator
        .execute_hogql_query(&runner, request, &Team::new(1))
        .unwrap_err();
    assert_eq!(err.code(), "StorageError");
    assert!(paginator.response().is_none());
    assert!(paginator.results().is_empty());
    assert!(!paginator.response_params().has_more);
    Ok(())
}
