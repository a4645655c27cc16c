//! Tree walkers shared by the rewrite passes.
//!
//! Implementors override the hooks they care about and call the matching
//! `walk_*` function to keep descending. Placeholder nodes are leaves: the
//! field chain inside the braces is a name, not an expression to visit.

use crate::error::Result;
use crate::query::ast::{Expr, JoinExpr, SelectQuery, SelectStatement};

/// Read-only visitor.
pub trait Visitor {
    /// Called for every expression.
    fn visit_expr(&mut self, expr: &Expr) -> Result<()> {
        walk_expr(self, expr)
    }

    /// Called for every leaf select.
    fn visit_select(&mut self, query: &SelectQuery) -> Result<()> {
        walk_select(self, query)
    }

    /// Called for every statement, nested ones included.
    fn visit_statement(&mut self, stmt: &SelectStatement) -> Result<()> {
        walk_statement(self, stmt)
    }
}

/// Mutating visitor.
pub trait VisitorMut {
    /// Called for every expression.
    fn visit_expr(&mut self, expr: &mut Expr) -> Result<()> {
        walk_expr_mut(self, expr)
    }

    /// Called for every leaf select.
    fn visit_select(&mut self, query: &mut SelectQuery) -> Result<()> {
        walk_select_mut(self, query)
    }

    /// Called for every statement, nested ones included.
    fn visit_statement(&mut self, stmt: &mut SelectStatement) -> Result<()> {
        walk_statement_mut(self, stmt)
    }
}

/// Visits each leaf select of `stmt`.
pub fn walk_statement<V: Visitor + ?Sized>(v: &mut V, stmt: &SelectStatement) -> Result<()> {
    match stmt {
        SelectStatement::Select(query) => v.visit_select(query),
        SelectStatement::SelectSet(set) => {
            v.visit_statement(&set.initial)?;
            for node in &set.subsequent {
                v.visit_statement(&node.query)?;
            }
            Ok(())
        }
    }
}

/// Visits every expression of `query`, join constraints included.
pub fn walk_select<V: Visitor + ?Sized>(v: &mut V, query: &SelectQuery) -> Result<()> {
    for expr in &query.select {
        v.visit_expr(expr)?;
    }
    if let Some(join) = &query.select_from {
        walk_join(v, join)?;
    }
    for expr in [&query.prewhere, &query.where_, &query.having]
        .into_iter()
        .flatten()
    {
        v.visit_expr(expr)?;
    }
    for expr in &query.group_by {
        v.visit_expr(expr)?;
    }
    for order in &query.order_by {
        v.visit_expr(&order.expr)?;
    }
    for expr in [&query.limit, &query.offset].into_iter().flatten() {
        v.visit_expr(expr)?;
    }
    Ok(())
}

fn walk_join<V: Visitor + ?Sized>(v: &mut V, join: &JoinExpr) -> Result<()> {
    for entry in join.chain() {
        v.visit_expr(&entry.table)?;
        if let Some(constraint) = &entry.constraint {
            v.visit_expr(constraint)?;
        }
    }
    Ok(())
}

/// Visits the children of `expr`.
pub fn walk_expr<V: Visitor + ?Sized>(v: &mut V, expr: &Expr) -> Result<()> {
    match expr {
        Expr::Constant { .. } | Expr::Field { .. } | Expr::Asterisk | Expr::Placeholder { .. } => {
            Ok(())
        }
        Expr::Alias { expr, .. } | Expr::Not { expr } => v.visit_expr(expr),
        Expr::Call { args: exprs, .. }
        | Expr::And { exprs }
        | Expr::Or { exprs }
        | Expr::Tuple { exprs }
        | Expr::Array { exprs } => {
            for expr in exprs {
                v.visit_expr(expr)?;
            }
            Ok(())
        }
        Expr::Compare { left, right, .. } | Expr::Arithmetic { left, right, .. } => {
            v.visit_expr(left)?;
            v.visit_expr(right)
        }
        Expr::Select { query } => v.visit_statement(query),
    }
}

/// Mutable [`walk_statement`].
pub fn walk_statement_mut<V: VisitorMut + ?Sized>(
    v: &mut V,
    stmt: &mut SelectStatement,
) -> Result<()> {
    match stmt {
        SelectStatement::Select(query) => v.visit_select(query),
        SelectStatement::SelectSet(set) => {
            v.visit_statement(&mut set.initial)?;
            for node in &mut set.subsequent {
                v.visit_statement(&mut node.query)?;
            }
            Ok(())
        }
    }
}

/// Mutable [`walk_select`].
pub fn walk_select_mut<V: VisitorMut + ?Sized>(v: &mut V, query: &mut SelectQuery) -> Result<()> {
    for expr in &mut query.select {
        v.visit_expr(expr)?;
    }
    if let Some(join) = &mut query.select_from {
        walk_join_mut(v, join)?;
    }
    for expr in [&mut query.prewhere, &mut query.where_, &mut query.having]
        .into_iter()
        .flatten()
    {
        v.visit_expr(expr)?;
    }
    for expr in &mut query.group_by {
        v.visit_expr(expr)?;
    }
    for order in &mut query.order_by {
        v.visit_expr(&mut order.expr)?;
    }
    for expr in [&mut query.limit, &mut query.offset].into_iter().flatten() {
        v.visit_expr(expr)?;
    }
    Ok(())
}

fn walk_join_mut<V: VisitorMut + ?Sized>(v: &mut V, join: &mut JoinExpr) -> Result<()> {
    v.visit_expr(&mut join.table)?;
    if let Some(constraint) = &mut join.constraint {
        v.visit_expr(constraint)?;
    }
    match &mut join.next_join {
        Some(next) => walk_join_mut(v, next),
        None => Ok(()),
    }
}

/// Mutable [`walk_expr`].
pub fn walk_expr_mut<V: VisitorMut + ?Sized>(v: &mut V, expr: &mut Expr) -> Result<()> {
    match expr {
        Expr::Constant { .. } | Expr::Field { .. } | Expr::Asterisk | Expr::Placeholder { .. } => {
            Ok(())
        }
        Expr::Alias { expr, .. } | Expr::Not { expr } => v.visit_expr(expr),
        Expr::Call { args: exprs, .. }
        | Expr::And { exprs }
        | Expr::Or { exprs }
        | Expr::Tuple { exprs }
        | Expr::Array { exprs } => {
            for expr in exprs {
                v.visit_expr(expr)?;
            }
            Ok(())
        }
        Expr::Compare { left, right, .. } | Expr::Arithmetic { left, right, .. } => {
            v.visit_expr(left)?;
            v.visit_expr(right)
        }
        Expr::Select { query } => v.visit_statement(query),
    }
}
