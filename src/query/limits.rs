//! Row limits per execution context and default-limit injection.

use serde::{Deserialize, Serialize};

use crate::config::LimitConfig;
use crate::query::ast::{Expr, SelectStatement};

/// Why a query runs. Sizes default/maximum row counts and execution budgets.
#[derive(Clone, Copy, Debug, Default, Eq, PartialEq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum LimitContext {
    /// Interactive query issued from the UI or API.
    #[default]
    Query,
    /// Query running in a background worker on behalf of a user.
    QueryAsync,
    /// Result export.
    Export,
    /// Cohort membership calculation.
    CohortCalculation,
    /// Materialisation of a saved query.
    SavedQuery,
}

impl LimitContext {
    /// Row count applied to selects that carry no limit.
    pub fn default_limit(self, limits: &LimitConfig) -> i64 {
        match self {
            LimitContext::Query | LimitContext::QueryAsync => limits.default_returned_rows,
            LimitContext::Export | LimitContext::SavedQuery => limits.max_select_returned_rows,
            LimitContext::CohortCalculation => limits.cohort_calculation_limit,
        }
    }

    /// Ceiling applied to any top-level limit.
    pub fn max_limit(self, limits: &LimitConfig) -> i64 {
        match self {
            LimitContext::Query
            | LimitContext::QueryAsync
            | LimitContext::Export
            | LimitContext::SavedQuery => limits.max_select_returned_rows,
            LimitContext::CohortCalculation => limits.cohort_calculation_limit,
        }
    }

    /// Contexts that get the increased execution-time budget.
    pub fn is_long_running(self) -> bool {
        matches!(
            self,
            LimitContext::Export
                | LimitContext::CohortCalculation
                | LimitContext::QueryAsync
                | LimitContext::SavedQuery
        )
    }
}

/// Gives every leaf select without a limit the context default.
///
/// Existing limits are never replaced, so the call is idempotent.
pub fn apply_default_limit(stmt: &mut SelectStatement, context: LimitContext, limits: &LimitConfig) {
    let default = context.default_limit(limits);
    stmt.for_each_leaf_select_mut(&mut |query| {
        if query.limit.is_none() {
            query.limit = Some(Expr::constant(default));
        }
    });
}
