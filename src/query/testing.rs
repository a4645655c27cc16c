//! In-memory collaborators for tests and prototyping.

use std::collections::{BTreeMap, VecDeque};
use std::sync::atomic::{AtomicUsize, Ordering};

use parking_lot::Mutex;

use crate::error::{QueryError, Result};
use crate::query::ast::SelectStatement;
use crate::query::services::{FeatureFlags, MetadataResponse, MetadataValidator, QueryParser};
use crate::query::storage::{QueryTags, StorageClient, StorageRequest, StorageResult, Workload};
use crate::query::team::{Team, TeamId};
use crate::query::value::Value;

/// Parser that knows a fixed set of query texts.
#[derive(Clone, Debug, Default)]
pub struct StaticParser {
    statements: BTreeMap<String, SelectStatement>,
}

impl StaticParser {
    /// Parser with no known texts.
    pub fn new() -> Self {
        Self::default()
    }

    /// Registers the tree returned for `text`.
    pub fn with_statement(mut self, text: &str, stmt: impl Into<SelectStatement>) -> Self {
        self.statements.insert(text.trim().to_owned(), stmt.into());
        self
    }
}

impl QueryParser for StaticParser {
    fn parse_select(&self, text: &str) -> Result<SelectStatement> {
        self.statements
            .get(text.trim())
            .cloned()
            .ok_or_else(|| QueryError::Syntax {
                message: format!("no statement registered for '{}'", text.trim()),
                start: 0,
                end: text.len(),
            })
    }
}

/// Storage call as received by [`RecordingStorage`].
#[derive(Clone, Debug, PartialEq)]
pub struct RecordedCall {
    /// Statement text.
    pub sql: String,
    /// Bound parameters.
    pub values: BTreeMap<String, Value>,
    /// Routing class.
    pub workload: Workload,
    /// Owning team.
    pub team_id: TeamId,
    /// Readonly flag.
    pub readonly: bool,
    /// Telemetry.
    pub tags: QueryTags,
}

/// Storage double replaying scripted outcomes.
///
/// Statements starting with `EXPLAIN` draw from a separate script. An empty
/// script answers with an empty result.
#[derive(Debug, Default)]
pub struct RecordingStorage {
    outcomes: Mutex<VecDeque<Result<StorageResult>>>,
    explain_outcomes: Mutex<VecDeque<Result<StorageResult>>>,
    calls: Mutex<Vec<RecordedCall>>,
}

impl RecordingStorage {
    /// Storage with empty scripts.
    pub fn new() -> Self {
        Self::default()
    }

    /// Scripts the next result.
    pub fn push_result(&self, result: StorageResult) {
        self.outcomes.lock().push_back(Ok(result));
    }

    /// Scripts a result made of single-column integer rows `0..count`.
    pub fn push_rows(&self, count: usize) {
        let rows = (0..count).map(|i| vec![Value::Int(i as i64)]).collect();
        self.push_result(StorageResult::new(rows, vec![("n".to_owned(), "Int64".to_owned())]));
    }

    /// Scripts the next failure.
    pub fn push_error(&self, error: QueryError) {
        self.outcomes.lock().push_back(Err(error));
    }

    /// Scripts the output of the next `EXPLAIN`.
    pub fn push_explain(&self, outcome: Result<Vec<String>>) {
        let outcome = outcome.map(|lines| {
            StorageResult::new(
                lines.into_iter().map(|line| vec![Value::String(line)]).collect(),
                vec![("explain".to_owned(), "String".to_owned())],
            )
        });
        self.explain_outcomes.lock().push_back(outcome);
    }

    /// Calls received so far, in order.
    pub fn calls(&self) -> Vec<RecordedCall> {
        self.calls.lock().clone()
    }
}

impl StorageClient for RecordingStorage {
    fn execute(&self, request: &StorageRequest<'_>) -> Result<StorageResult> {
        self.calls.lock().push(RecordedCall {
            sql: request.sql.to_owned(),
            values: request.values.clone(),
            workload: request.workload,
            team_id: request.team_id,
            readonly: request.readonly,
            tags: request.tags.clone(),
        });
        let script = if request.sql.starts_with("EXPLAIN ") {
            &self.explain_outcomes
        } else {
            &self.outcomes
        };
        script
            .lock()
            .pop_front()
            .unwrap_or_else(|| Ok(StorageResult::default()))
    }
}

/// Flag evaluator backed by a map; unknown flags are undetermined.
#[derive(Clone, Debug, Default)]
pub struct StaticFlags {
    flags: BTreeMap<String, bool>,
}

impl StaticFlags {
    /// Sets `name` to `enabled`.
    pub fn with_flag(mut self, name: &str, enabled: bool) -> Self {
        self.flags.insert(name.to_owned(), enabled);
        self
    }
}

impl FeatureFlags for StaticFlags {
    fn feature_enabled(&self, flag: &str, _: &str, _: &BTreeMap<String, String>) -> Option<bool> {
        self.flags.get(flag).copied()
    }
}

/// Metadata validator returning a fixed outcome.
#[derive(Debug)]
pub struct StaticMetadataValidator {
    outcome: Result<MetadataResponse>,
    calls: AtomicUsize,
}

impl StaticMetadataValidator {
    /// Validator that accepts everything.
    pub fn valid() -> Self {
        Self::returning(Ok(MetadataResponse {
            is_valid: true,
            ..MetadataResponse::default()
        }))
    }

    /// Validator that always yields `outcome`.
    pub fn returning(outcome: Result<MetadataResponse>) -> Self {
        Self {
            outcome,
            calls: AtomicUsize::new(0),
        }
    }

    /// Number of validations performed.
    pub fn call_count(&self) -> usize {
        self.calls.load(Ordering::Relaxed)
    }
}

impl MetadataValidator for StaticMetadataValidator {
    fn validate(&self, _hogql: &str, _team: &Team, _debug: bool) -> Result<MetadataResponse> {
        self.calls.fetch_add(1, Ordering::Relaxed);
        self.outcome.clone()
    }
}
