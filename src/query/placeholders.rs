//! Named placeholder substitution.

use std::collections::{BTreeMap, BTreeSet};

use tracing::debug;

use crate::error::{QueryError, Result};
use crate::query::ast::{Expr, SelectStatement};
use crate::query::filters::{is_filters_placeholder, FilterResolver, HogQLFilters, FILTERS_PLACEHOLDER};
use crate::query::team::Team;
use crate::query::visitor::{walk_expr, walk_expr_mut, Visitor, VisitorMut};

/// Collects the dotted names of every placeholder in a statement.
///
/// Fails with [`QueryError::UnsupportedPlaceholder`] on an unnamed slot.
pub fn find_placeholders(stmt: &SelectStatement) -> Result<BTreeSet<String>> {
    let mut finder = PlaceholderFinder::default();
    finder.visit_statement(stmt)?;
    Ok(finder.names)
}

#[derive(Default)]
struct PlaceholderFinder {
    names: BTreeSet<String>,
}

impl Visitor for PlaceholderFinder {
    fn visit_expr(&mut self, expr: &Expr) -> Result<()> {
        if let Expr::Placeholder { .. } = expr {
            let name = expr.placeholder_name().ok_or(QueryError::UnsupportedPlaceholder)?;
            self.names.insert(name);
            return Ok(());
        }
        walk_expr(self, expr)
    }
}

/// Fills every placeholder in `stmt`.
///
/// `filters` and `filters.*` come from the filter object through
/// `resolver`; every other name must be present in `values`.
pub fn replace_placeholders(
    stmt: SelectStatement,
    filters: Option<&HogQLFilters>,
    values: &BTreeMap<String, Expr>,
    team: &Team,
    resolver: &dyn FilterResolver,
) -> Result<SelectStatement> {
    if filters.is_some() && values.contains_key(FILTERS_PLACEHOLDER) {
        return Err(QueryError::AmbiguousFilters);
    }

    let found = find_placeholders(&stmt)?;
    let (filter_names, remaining): (Vec<String>, Vec<String>) =
        found.into_iter().partition(|name| is_filters_placeholder(name));

    let mut stmt = stmt;
    if !filter_names.is_empty() {
        debug!(names = ?filter_names, "resolving filter placeholders");
        stmt = resolver.replace_filters(stmt, filters, team)?;
    }

    if remaining.is_empty() {
        return Ok(stmt);
    }
    if values.is_empty() {
        return Err(QueryError::PlaceholdersNotProvided { names: remaining });
    }
    let unresolved: Vec<String> = remaining
        .iter()
        .filter(|name| !values.contains_key(*name))
        .cloned()
        .collect();
    if !unresolved.is_empty() {
        return Err(QueryError::UnresolvedPlaceholders {
            names: unresolved,
            available: values.keys().cloned().collect(),
        });
    }

    let mut replacer = PlaceholderReplacer { values };
    replacer.visit_statement(&mut stmt)?;
    Ok(stmt)
}

struct PlaceholderReplacer<'a> {
    values: &'a BTreeMap<String, Expr>,
}

impl VisitorMut for PlaceholderReplacer<'_> {
    fn visit_expr(&mut self, expr: &mut Expr) -> Result<()> {
        if let Some(name) = expr.placeholder_name() {
            if let Some(value) = self.values.get(&name) {
                *expr = value.clone();
            }
            return Ok(());
        }
        walk_expr_mut(self, expr)
    }
}
