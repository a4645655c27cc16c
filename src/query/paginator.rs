//! Has-more pagination.
//!
//! The paginator asks for one row more than the page size; if that row
//! comes back there is another page. Set queries get the same limit and
//! offset on every branch, so a page is only meaningful per branch.

use std::sync::Arc;

use serde::{Deserialize, Serialize};

use crate::config::LimitConfig;
use crate::error::{QueryError, Result};
use crate::query::ast::{Expr, Query, SelectStatement};
use crate::query::executor::{QueryRequest, QueryRunner, Response};
use crate::query::limits::LimitContext;
use crate::query::team::Team;
use crate::query::timings::Timings;
use crate::query::value::Value;

/// Pagination fields embedded in a caller-facing envelope.
#[derive(Clone, Copy, Debug, Eq, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PaginationParams {
    /// Another page exists.
    pub has_more: bool,
    /// Page size.
    pub limit: i64,
    /// Rows skipped before the page.
    pub offset: i64,
}

/// Runs queries one page at a time, fetching a look-ahead row to detect
/// further pages.
#[derive(Clone, Debug)]
pub struct HasMorePaginator {
    limit: i64,
    offset: i64,
    limit_context: Option<LimitContext>,
    response: Option<Response>,
    results: Vec<Vec<Value>>,
}

impl HasMorePaginator {
    /// A non-positive or absent limit becomes the default page size; a
    /// negative or absent offset becomes zero. The page size is capped so
    /// the look-ahead row still fits under the interactive row ceiling.
    pub fn new(limit: Option<i64>, offset: Option<i64>, limits: &LimitConfig) -> Self {
        let requested = limit
            .filter(|limit| *limit > 0)
            .unwrap_or(limits.default_returned_rows);
        Self {
            limit: page_size(requested, LimitContext::Query.max_limit(limits)),
            offset: offset.filter(|offset| *offset >= 0).unwrap_or(0),
            limit_context: None,
            response: None,
            results: Vec::new(),
        }
    }

    /// Like [`HasMorePaginator::new`], with the page size capped below the
    /// context's maximum.
    pub fn with_limit_context(
        limit: Option<i64>,
        offset: Option<i64>,
        limit_context: LimitContext,
        limits: &LimitConfig,
    ) -> Self {
        let requested = limit
            .filter(|limit| *limit > 0)
            .unwrap_or_else(|| limit_context.default_limit(limits));
        let mut paginator = Self::new(None, offset, limits);
        paginator.limit = page_size(requested, limit_context.max_limit(limits));
        paginator.limit_context = Some(limit_context);
        paginator
    }

    /// Page size in rows.
    pub fn limit(&self) -> i64 {
        self.limit
    }

    /// Rows skipped before the page.
    pub fn offset(&self) -> i64 {
        self.offset
    }

    /// Last stored response, if the last run succeeded.
    pub fn response(&self) -> Option<&Response> {
        self.response.as_ref()
    }

    /// Rows of the last response without the look-ahead row.
    pub fn results(&self) -> &[Vec<Value>] {
        &self.results
    }

    /// Sets `limit + 1` and `offset` on every leaf select.
    pub fn paginate(&self, mut stmt: SelectStatement) -> SelectStatement {
        let limit = self.limit.saturating_add(1);
        let offset = self.offset;
        stmt.for_each_leaf_select_mut(&mut |query| {
            query.limit = Some(Expr::constant(limit));
            query.offset = Some(Expr::constant(offset));
        });
        stmt
    }

    /// Paginates a structured query. Raw text must be parsed first.
    pub fn paginate_query(&self, query: Query) -> Result<SelectStatement> {
        match query {
            Query::Structured(stmt) => Ok(self.paginate(stmt)),
            Query::Raw(_) => Err(QueryError::UnsupportedStatement {
                expected: "a select statement or a set of select statements",
            }),
        }
    }

    /// Paginates and runs `request`, keeping the response.
    ///
    /// Raw text is parsed with the runner's parser before paginating; the
    /// text is kept as the request's original text. A failed run leaves the
    /// paginator without a response.
    pub fn execute_hogql_query(
        &mut self,
        runner: &QueryRunner,
        mut request: QueryRequest,
        team: &Team,
    ) -> Result<&Response> {
        self.response = None;
        self.results.clear();

        if let Query::Raw(text) = &request.query {
            let timings = Arc::clone(
                request
                    .timings
                    .get_or_insert_with(|| Arc::new(Timings::new())),
            );
            let parsed = timings.time("parse_select", || runner.services().parser.parse_select(text))?;
            request.original_text = Some(text.clone());
            request.query = Query::Structured(parsed);
        }
        let query = std::mem::replace(&mut request.query, Query::Raw(String::new()));
        request.query = Query::Structured(self.paginate_query(query)?);
        if request.limit_context.is_none() {
            request.limit_context = self.limit_context;
        }

        let response = runner.execute(&request, team)?;
        self.response = Some(response);
        self.results = self.trim_results();
        self.response
            .as_ref()
            .ok_or_else(|| QueryError::internal("response was not stored"))
    }

    /// True when the last response returned more rows than the page size.
    pub fn has_more(&self) -> bool {
        match &self.response {
            Some(response) if !response.results.is_empty() => {
                response.results.len() as i64 > self.limit
            }
            _ => false,
        }
    }

    /// Page rows: at most `limit` rows of the last response.
    pub fn trim_results(&self) -> Vec<Vec<Value>> {
        let Some(response) = &self.response else {
            return Vec::new();
        };
        let mut rows = response.results.clone();
        if self.has_more() {
            rows.truncate(usize::try_from(self.limit).unwrap_or(usize::MAX));
        }
        rows
    }

    /// Pagination fields for the last run.
    pub fn response_params(&self) -> PaginationParams {
        PaginationParams {
            has_more: self.has_more(),
            limit: self.limit,
            offset: self.offset,
        }
    }
}

/// Largest page whose look-ahead row stays within `max_rows`.
fn page_size(requested: i64, max_rows: i64) -> i64 {
    requested.min(max_rows.saturating_sub(1)).max(1)
}
