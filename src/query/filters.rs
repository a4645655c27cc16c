//! Structured filter object resolved into the reserved `{filters}` placeholder.
//!
//! `{filters}` expands to the conjunction of every filter part,
//! `{filters.properties}` to the property conditions and
//! `{filters.dateRange}` to the bounds on `timestamp`. With no filter object
//! every reserved placeholder becomes `true`.

use serde::{Deserialize, Serialize};
use time::format_description::well_known::Rfc3339;
use time::macros::format_description;
use time::{Date, OffsetDateTime, PrimitiveDateTime, Time};

use crate::error::{QueryError, Result};
use crate::query::ast::{CompareOp, Expr, SelectStatement};
use crate::query::team::Team;
use crate::query::value::Value;
use crate::query::visitor::{walk_expr_mut, VisitorMut};

/// Name of the reserved placeholder.
pub const FILTERS_PLACEHOLDER: &str = "filters";

/// Whether a dotted placeholder name is handled by the filter resolver.
pub fn is_filters_placeholder(name: &str) -> bool {
    name == FILTERS_PLACEHOLDER
        || name
            .strip_prefix(FILTERS_PLACEHOLDER)
            .is_some_and(|rest| rest.starts_with('.'))
}

/// Entity a property filter reads from.
#[derive(Clone, Copy, Debug, Default, Eq, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum PropertyKind {
    /// `properties` on the event row.
    #[default]
    Event,
    /// `person.properties`.
    Person,
}

/// Comparison applied by a property filter.
#[derive(Clone, Copy, Debug, Default, Eq, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum PropertyOperator {
    /// Equality, or membership for a list value.
    #[default]
    Exact,
    /// Inequality.
    IsNot,
    /// Case-insensitive substring.
    Icontains,
    /// Negated substring match.
    NotIcontains,
    /// Regular expression match.
    Regex,
    /// Greater than.
    Gt,
    /// Less than.
    Lt,
    /// Property is present.
    IsSet,
    /// Property is absent.
    IsNotSet,
}

/// Single property condition.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct PropertyFilter {
    /// Property name.
    pub key: String,
    /// Operand; ignored by the set/not-set operators.
    #[serde(default)]
    pub value: serde_json::Value,
    /// Comparison.
    #[serde(default)]
    pub operator: PropertyOperator,
    /// Entity the property belongs to.
    #[serde(default, rename = "type")]
    pub kind: PropertyKind,
}

impl PropertyFilter {
    /// Filter on an event property.
    pub fn new(key: impl Into<String>, operator: PropertyOperator, value: serde_json::Value) -> Self {
        Self {
            key: key.into(),
            value,
            operator,
            kind: PropertyKind::Event,
        }
    }

    /// Boolean expression for the condition.
    pub fn to_expr(&self) -> Expr {
        let field = match self.kind {
            PropertyKind::Event => Expr::field(["properties", self.key.as_str()]),
            PropertyKind::Person => Expr::field(["person", "properties", self.key.as_str()]),
        };
        let scalar = || Expr::constant(Value::from(self.value.clone()));
        let list = || match &self.value {
            serde_json::Value::Array(items) => Some(Expr::Tuple {
                exprs: items
                    .iter()
                    .map(|item| Expr::constant(Value::from(item.clone())))
                    .collect(),
            }),
            _ => None,
        };
        match self.operator {
            PropertyOperator::Exact => match list() {
                Some(tuple) => Expr::compare(CompareOp::In, field, tuple),
                None => Expr::compare(CompareOp::Eq, field, scalar()),
            },
            PropertyOperator::IsNot => match list() {
                Some(tuple) => Expr::compare(CompareOp::NotIn, field, tuple),
                None => Expr::compare(CompareOp::NotEq, field, scalar()),
            },
            PropertyOperator::Icontains => {
                Expr::compare(CompareOp::ILike, field, Expr::constant(self.like_pattern()))
            }
            PropertyOperator::NotIcontains => {
                Expr::compare(CompareOp::NotILike, field, Expr::constant(self.like_pattern()))
            }
            PropertyOperator::Regex => Expr::call("match", vec![field, scalar()]),
            PropertyOperator::Gt => Expr::compare(CompareOp::Gt, field, scalar()),
            PropertyOperator::Lt => Expr::compare(CompareOp::Lt, field, scalar()),
            PropertyOperator::IsSet => Expr::call("isNotNull", vec![field]),
            PropertyOperator::IsNotSet => Expr::call("isNull", vec![field]),
        }
    }

    fn like_pattern(&self) -> String {
        let needle = match &self.value {
            serde_json::Value::String(text) => text.clone(),
            other => other.to_string(),
        };
        format!("%{needle}%")
    }
}

/// Lower and upper bounds on `timestamp`.
#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct DateRange {
    /// Inclusive lower bound.
    #[serde(default)]
    pub date_from: Option<String>,
    /// Exclusive upper bound; a plain date covers that whole day.
    #[serde(default)]
    pub date_to: Option<String>,
}

impl DateRange {
    /// Comparisons on `timestamp` for each bound that is set.
    pub fn to_exprs(&self) -> Result<Vec<Expr>> {
        let mut exprs = Vec::new();
        if let Some(from) = &self.date_from {
            let start = parse_bound(from, Bound::Start)?;
            exprs.push(Expr::compare(
                CompareOp::GtEq,
                Expr::field(["timestamp"]),
                Expr::constant(Value::DateTime(start)),
            ));
        }
        if let Some(to) = &self.date_to {
            let end = parse_bound(to, Bound::End)?;
            exprs.push(Expr::compare(
                CompareOp::Lt,
                Expr::field(["timestamp"]),
                Expr::constant(Value::DateTime(end)),
            ));
        }
        Ok(exprs)
    }
}

#[derive(Clone, Copy)]
enum Bound {
    Start,
    End,
}

/// Nanoseconds since the epoch for an RFC 3339 timestamp or a plain date.
///
/// A plain end date covers the whole day, so its bound is the next midnight.
fn parse_bound(text: &str, bound: Bound) -> Result<i128> {
    if let Ok(at) = OffsetDateTime::parse(text, &Rfc3339) {
        return Ok(at.unix_timestamp_nanos());
    }
    let date = Date::parse(text, format_description!("[year]-[month]-[day]"))
        .map_err(|err| QueryError::invalid_filter(format!("date '{text}' is not valid: {err}")))?;
    let date = match bound {
        Bound::Start => date,
        Bound::End => date
            .next_day()
            .ok_or_else(|| QueryError::invalid_filter(format!("date '{text}' is out of range")))?,
    };
    Ok(PrimitiveDateTime::new(date, Time::MIDNIGHT)
        .assume_utc()
        .unix_timestamp_nanos())
}

/// Structured filters supplied next to a query.
#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize)]
#[serde(default, rename_all = "camelCase")]
pub struct HogQLFilters {
    /// Property conditions, all of which must hold.
    pub properties: Vec<PropertyFilter>,
    /// Time window.
    pub date_range: Option<DateRange>,
    /// Exclude the team's internal and test traffic.
    pub filter_test_accounts: Option<bool>,
}

impl HogQLFilters {
    /// Adds a property condition.
    pub fn with_property(mut self, filter: PropertyFilter) -> Self {
        self.properties.push(filter);
        self
    }

    /// Sets the time window.
    pub fn with_date_range(mut self, from: Option<&str>, to: Option<&str>) -> Self {
        self.date_range = Some(DateRange {
            date_from: from.map(str::to_owned),
            date_to: to.map(str::to_owned),
        });
        self
    }

    /// Toggles test-account filtering.
    pub fn with_test_accounts_filtered(mut self, enabled: bool) -> Self {
        self.filter_test_accounts = Some(enabled);
        self
    }

    fn property_exprs(&self, team: &Team) -> Vec<Expr> {
        let mut exprs: Vec<Expr> = self.properties.iter().map(PropertyFilter::to_expr).collect();
        if self.filter_test_accounts == Some(true) {
            exprs.extend(team.test_account_filters.iter().map(PropertyFilter::to_expr));
        }
        exprs
    }

    fn date_exprs(&self) -> Result<Vec<Expr>> {
        match &self.date_range {
            Some(range) => range.to_exprs(),
            None => Ok(Vec::new()),
        }
    }
}

/// Replaces `filters` placeholders in a statement.
pub trait FilterResolver: Send + Sync {
    /// Returns `stmt` with every `{filters}` placeholder replaced.
    fn replace_filters(
        &self,
        stmt: SelectStatement,
        filters: Option<&HogQLFilters>,
        team: &Team,
    ) -> Result<SelectStatement>;
}

/// Resolver expanding filters into plain comparisons.
#[derive(Clone, Copy, Debug, Default)]
pub struct DefaultFilterResolver;

impl FilterResolver for DefaultFilterResolver {
    fn replace_filters(
        &self,
        mut stmt: SelectStatement,
        filters: Option<&HogQLFilters>,
        team: &Team,
    ) -> Result<SelectStatement> {
        let (properties, dates) = match filters {
            Some(filters) => (filters.property_exprs(team), filters.date_exprs()?),
            None => (Vec::new(), Vec::new()),
        };
        let mut replacer = FilterReplacer { properties, dates };
        replacer.visit_statement(&mut stmt)?;
        Ok(stmt)
    }
}

struct FilterReplacer {
    properties: Vec<Expr>,
    dates: Vec<Expr>,
}

impl FilterReplacer {
    fn expansion(&self, name: &str) -> Result<Expr> {
        match name {
            "filters" => Ok(Expr::and(
                self.dates.iter().chain(&self.properties).cloned().collect(),
            )),
            "filters.properties" => Ok(Expr::and(self.properties.clone())),
            "filters.dateRange" => Ok(Expr::and(self.dates.clone())),
            other => Err(QueryError::UnresolvedPlaceholders {
                names: vec![other.to_owned()],
                available: vec![
                    "filters".to_owned(),
                    "filters.dateRange".to_owned(),
                    "filters.properties".to_owned(),
                ],
            }),
        }
    }
}

impl VisitorMut for FilterReplacer {
    fn visit_expr(&mut self, expr: &mut Expr) -> Result<()> {
        if let Some(name) = expr.placeholder_name() {
            if is_filters_placeholder(&name) {
                *expr = self.expansion(&name)?;
            }
            return Ok(());
        }
        walk_expr_mut(self, expr)
    }
}
