//! Storage-engine collaborator and the telemetry attached to each call.

use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};

use crate::error::Result;
use crate::query::context::ExecutionContext;
use crate::query::team::TeamId;
use crate::query::timings::QueryTiming;
use crate::query::value::Value;

/// Routing class for the storage cluster.
#[derive(Clone, Copy, Debug, Default, Eq, PartialEq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Workload {
    /// Shared pool.
    #[default]
    Default,
    /// Interactive traffic.
    Online,
    /// Batch and export traffic.
    Offline,
}

/// Telemetry attached to every storage call.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct QueryTags {
    /// Team the statement runs for.
    pub team_id: TeamId,
    /// Caller-supplied query kind.
    pub query_type: String,
    /// Statement contains a join.
    pub has_joins: bool,
    /// Statement reads JSON properties.
    pub has_json_operations: bool,
    /// Stage timings recorded so far.
    pub timings: Vec<QueryTiming>,
    /// Resolved modifiers with unset fields omitted.
    pub modifiers: BTreeMap<String, serde_json::Value>,
    /// Routing class.
    pub workload: Workload,
}

impl QueryTags {
    /// Tags for executing `sql` under `ctx`.
    pub fn for_statement(ctx: &ExecutionContext, query_type: &str, sql: &str, workload: Workload) -> Self {
        Self {
            team_id: ctx.team_id,
            query_type: query_type.to_owned(),
            has_joins: sql.contains(" JOIN "),
            has_json_operations: sql.contains("JSONExtract") || sql.contains("JSONHas"),
            timings: ctx.timings.to_list(),
            modifiers: ctx.modifiers.to_tag_map(),
            workload,
        }
    }
}

/// One statement submitted to the engine.
#[derive(Clone, Copy, Debug)]
pub struct StorageRequest<'a> {
    /// Execution-dialect text.
    pub sql: &'a str,
    /// Parameters referenced by `sql`.
    pub values: &'a BTreeMap<String, Value>,
    /// Routing class.
    pub workload: Workload,
    /// Owning team.
    pub team_id: TeamId,
    /// Reject writes.
    pub readonly: bool,
    /// Telemetry for the call.
    pub tags: &'a QueryTags,
}

/// Rows and `(name, type)` column descriptions returned by the engine.
#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize)]
pub struct StorageResult {
    /// Result rows.
    pub rows: Vec<Vec<Value>>,
    /// Column names and engine types.
    pub types: Vec<(String, String)>,
}

impl StorageResult {
    /// Result from rows and column descriptions.
    pub fn new(rows: Vec<Vec<Value>>, types: Vec<(String, String)>) -> Self {
        Self { rows, types }
    }

    /// First column of every row rendered as text, the shape of `EXPLAIN`
    /// output.
    pub fn text_lines(&self) -> Vec<String> {
        self.rows
            .iter()
            .filter_map(|row| row.first())
            .map(|cell| match cell {
                Value::String(line) => line.clone(),
                other => serde_json::to_string(other).unwrap_or_default(),
            })
            .collect()
    }
}

/// Executes rendered statements.
pub trait StorageClient: Send + Sync {
    /// Fails with [`crate::QueryError::Storage`] when the engine rejects the
    /// statement.
    fn execute(&self, request: &StorageRequest<'_>) -> Result<StorageResult>;
}
