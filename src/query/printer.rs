//! Rendering statement trees into query text.
//!
//! Two dialects are produced from the same tree. [`Dialect::HogQl`] is the
//! canonical form shown back to users: constants are inlined and table
//! names stay logical. [`Dialect::ClickHouse`] is what the storage engine
//! runs: constants are bound as named parameters into the context's
//! `values`, logical tables are mapped to storage tables, the top-level
//! limit is clamped and a `SETTINGS` clause is appended.

use std::sync::Arc;

use serde::{Deserialize, Serialize};
use time::OffsetDateTime;

use crate::config::ExecutionConfig;
use crate::error::{QueryError, Result};
use crate::query::ast::{Expr, JoinExpr, OrderExpr, SelectQuery, SelectStatement};
use crate::query::context::ExecutionContext;
use crate::query::database::Database;
use crate::query::value::Value;

/// Output dialect.
#[derive(Clone, Copy, Debug, Eq, PartialEq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Dialect {
    /// Canonical dialect with constants inline.
    HogQl,
    /// Execution dialect with bound parameters.
    ClickHouse,
}

/// Engine settings appended to execution-dialect statements.
#[derive(Clone, Debug, Default, Eq, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ExecutionSettings {
    /// Engine `readonly` level.
    pub readonly: Option<u8>,
    /// Seconds.
    pub max_execution_time: Option<u64>,
    /// Thread cap for the engine.
    pub max_threads: Option<u32>,
}

impl ExecutionSettings {
    /// Settings for a regular run.
    pub fn from_config(config: &ExecutionConfig) -> Self {
        Self {
            readonly: Some(config.readonly),
            max_execution_time: Some(config.max_execution_time),
            max_threads: None,
        }
    }

    fn pairs(&self) -> Vec<(&'static str, String)> {
        let mut pairs = Vec::new();
        if let Some(readonly) = self.readonly {
            pairs.push(("readonly", readonly.to_string()));
        }
        if let Some(seconds) = self.max_execution_time {
            pairs.push(("max_execution_time", seconds.to_string()));
        }
        if let Some(threads) = self.max_threads {
            pairs.push(("max_threads", threads.to_string()));
        }
        pairs
    }
}

/// Resolver/printer collaborator.
pub trait QueryPrinter: Send + Sync {
    /// Renders a whole statement.
    ///
    /// Fails with a compile-kind error for anything the dialect cannot
    /// express.
    fn print(
        &self,
        stmt: &SelectStatement,
        ctx: &mut ExecutionContext,
        dialect: Dialect,
        settings: Option<&ExecutionSettings>,
        pretty: bool,
    ) -> Result<String>;

    /// Renders a single expression.
    fn print_expr(&self, expr: &Expr, ctx: &mut ExecutionContext, dialect: Dialect) -> Result<String>;
}

/// Reference printer for both dialects.
#[derive(Clone, Copy, Debug, Default)]
pub struct SqlPrinter;

impl QueryPrinter for SqlPrinter {
    fn print(
        &self,
        stmt: &SelectStatement,
        ctx: &mut ExecutionContext,
        dialect: Dialect,
        settings: Option<&ExecutionSettings>,
        pretty: bool,
    ) -> Result<String> {
        let database = ctx.database()?;
        let mut printer = Printer {
            ctx,
            database,
            dialect,
            pretty,
        };
        let mut text = printer.statement(stmt, true)?;
        if dialect == Dialect::ClickHouse {
            if let Some(settings) = settings {
                let pairs = settings.pairs();
                if !pairs.is_empty() {
                    let joined = pairs
                        .iter()
                        .map(|(key, value)| format!("{key}={value}"))
                        .collect::<Vec<_>>()
                        .join(", ");
                    text.push_str(printer.separator());
                    text.push_str("SETTINGS ");
                    text.push_str(&joined);
                }
            }
        }
        Ok(text)
    }

    fn print_expr(&self, expr: &Expr, ctx: &mut ExecutionContext, dialect: Dialect) -> Result<String> {
        let database = ctx.database()?;
        let mut printer = Printer {
            ctx,
            database,
            dialect,
            pretty: false,
        };
        printer.expr(expr)
    }
}

struct Printer<'a> {
    ctx: &'a mut ExecutionContext,
    database: Arc<Database>,
    dialect: Dialect,
    pretty: bool,
}

impl Printer<'_> {
    fn separator(&self) -> &'static str {
        if self.pretty {
            "\n"
        } else {
            " "
        }
    }

    fn statement(&mut self, stmt: &SelectStatement, top_level: bool) -> Result<String> {
        match stmt {
            SelectStatement::Select(query) => self.select(query, top_level),
            SelectStatement::SelectSet(set) => {
                let mut text = self.set_member(&set.initial, top_level)?;
                for node in &set.subsequent {
                    text.push_str(self.separator());
                    text.push_str(node.op.keyword());
                    text.push_str(self.separator());
                    text.push_str(&self.set_member(&node.query, top_level)?);
                }
                Ok(text)
            }
        }
    }

    fn set_member(&mut self, stmt: &SelectStatement, top_level: bool) -> Result<String> {
        match stmt {
            SelectStatement::Select(_) => self.statement(stmt, top_level),
            SelectStatement::SelectSet(_) => Ok(format!("({})", self.statement(stmt, top_level)?)),
        }
    }

    fn select(&mut self, query: &SelectQuery, top_level: bool) -> Result<String> {
        let mut clauses = Vec::new();

        let columns = self.expr_list(&query.select)?;
        clauses.push(if query.distinct {
            format!("SELECT DISTINCT {columns}")
        } else {
            format!("SELECT {columns}")
        });
        if let Some(join) = &query.select_from {
            clauses.push(format!("FROM {}", self.join(join)?));
        }
        if let Some(prewhere) = &query.prewhere {
            clauses.push(format!("PREWHERE {}", self.expr(prewhere)?));
        }
        if let Some(condition) = &query.where_ {
            clauses.push(format!("WHERE {}", self.expr(condition)?));
        }
        if !query.group_by.is_empty() {
            clauses.push(format!("GROUP BY {}", self.expr_list(&query.group_by)?));
        }
        if let Some(having) = &query.having {
            clauses.push(format!("HAVING {}", self.expr(having)?));
        }
        if !query.order_by.is_empty() {
            clauses.push(format!("ORDER BY {}", self.order_list(&query.order_by)?));
        }

        let limit = if top_level && self.clamps_limits() {
            Some(self.clamped_limit(query.limit.as_ref()))
        } else {
            query.limit.clone()
        };
        if let Some(limit) = limit {
            clauses.push(format!("LIMIT {}", self.expr(&limit)?));
            if let Some(offset) = &query.offset {
                clauses.push(format!("OFFSET {}", self.expr(offset)?));
            }
        }

        Ok(clauses.join(self.separator()))
    }

    fn clamps_limits(&self) -> bool {
        self.dialect == Dialect::ClickHouse && self.ctx.limit_top_select
    }

    fn clamped_limit(&self, limit: Option<&Expr>) -> Expr {
        let max = self.ctx.max_limit();
        match limit {
            None => Expr::constant(max),
            Some(Expr::Constant {
                value: Value::Int(rows),
            }) => Expr::constant((*rows).min(max)),
            Some(other) => Expr::call("min2", vec![other.clone(), Expr::constant(max)]),
        }
    }

    fn join(&mut self, join: &JoinExpr) -> Result<String> {
        let mut parts = Vec::new();
        for entry in join.chain() {
            let mut text = String::new();
            if let Some(join_type) = entry.join_type {
                text.push_str(join_type.keyword());
                text.push(' ');
            }
            text.push_str(&self.table(&entry.table)?);
            if let Some(alias) = &entry.alias {
                text.push_str(" AS ");
                text.push_str(&self.identifier(alias));
            }
            if let Some(constraint) = &entry.constraint {
                text.push_str(" ON ");
                text.push_str(&self.expr(constraint)?);
            }
            parts.push(text);
        }
        Ok(parts.join(self.separator()))
    }

    fn table(&mut self, table: &Expr) -> Result<String> {
        match table {
            Expr::Field { chain } => {
                let name = chain.join(".");
                let schema = self
                    .database
                    .table(&name)
                    .ok_or_else(|| QueryError::UnknownTable { name: name.clone() })?;
                Ok(match self.dialect {
                    Dialect::HogQl => chain
                        .iter()
                        .map(|part| self.identifier(part))
                        .collect::<Vec<_>>()
                        .join("."),
                    Dialect::ClickHouse => self.identifier(&schema.storage_name),
                })
            }
            Expr::Select { query } => Ok(format!("({})", self.statement(query, false)?)),
            other => Err(QueryError::compile(format!(
                "Unsupported table expression: {}",
                expr_kind(other)
            ))),
        }
    }

    fn order_list(&mut self, order_by: &[OrderExpr]) -> Result<String> {
        let mut parts = Vec::with_capacity(order_by.len());
        for order in order_by {
            let direction = match order.order {
                crate::query::ast::SortOrder::Asc => "ASC",
                crate::query::ast::SortOrder::Desc => "DESC",
            };
            parts.push(format!("{} {direction}", self.expr(&order.expr)?));
        }
        Ok(parts.join(", "))
    }

    fn expr_list(&mut self, exprs: &[Expr]) -> Result<String> {
        let mut parts = Vec::with_capacity(exprs.len());
        for expr in exprs {
            parts.push(self.expr(expr)?);
        }
        Ok(parts.join(", "))
    }

    fn expr(&mut self, expr: &Expr) -> Result<String> {
        match expr {
            Expr::Constant { value } => self.constant(value),
            Expr::Field { chain } => self.field(chain),
            Expr::Alias { alias, expr } => {
                Ok(format!("{} AS {}", self.expr(expr)?, self.identifier(alias)))
            }
            Expr::Call {
                name,
                args,
                distinct,
            } => {
                let args = self.expr_list(args)?;
                if *distinct {
                    Ok(format!("{name}(DISTINCT {args})"))
                } else {
                    Ok(format!("{name}({args})"))
                }
            }
            Expr::Compare { op, left, right } => {
                let (left, right) = (self.expr(left)?, self.expr(right)?);
                Ok(match self.dialect {
                    Dialect::HogQl => format!("{left} {} {right}", op.symbol()),
                    Dialect::ClickHouse => format!("{}({left}, {right})", op.function()),
                })
            }
            Expr::Arithmetic { op, left, right } => {
                let (left, right) = (self.expr(left)?, self.expr(right)?);
                Ok(match self.dialect {
                    Dialect::HogQl => format!("{left} {} {right}", op.symbol()),
                    Dialect::ClickHouse => format!("{}({left}, {right})", op.function()),
                })
            }
            Expr::And { exprs } => Ok(format!("and({})", self.expr_list(exprs)?)),
            Expr::Or { exprs } => Ok(format!("or({})", self.expr_list(exprs)?)),
            Expr::Not { expr } => Ok(format!("not({})", self.expr(expr)?)),
            Expr::Tuple { exprs } => Ok(format!("tuple({})", self.expr_list(exprs)?)),
            Expr::Array { exprs } => Ok(format!("[{}]", self.expr_list(exprs)?)),
            Expr::Asterisk => Ok("*".to_owned()),
            Expr::Placeholder { .. } => {
                let name = expr.placeholder_name().unwrap_or_else(|| "...".to_owned());
                match self.dialect {
                    Dialect::HogQl => Ok(format!("{{{name}}}")),
                    Dialect::ClickHouse => Err(QueryError::compile(format!(
                        "Unresolved placeholder {{{name}}}"
                    ))),
                }
            }
            Expr::Select { query } => Ok(format!("({})", self.statement(query, false)?)),
        }
    }

    fn field(&mut self, chain: &[String]) -> Result<String> {
        if self.dialect == Dialect::ClickHouse && chain.len() >= 2 {
            let split = chain.len() - 1;
            if chain[split - 1] == "properties" {
                let column = self.dotted(&chain[..split]);
                let key = self.constant(&Value::String(chain[split].clone()))?;
                return Ok(format!("JSONExtractString({column}, {key})"));
            }
        }
        Ok(self.dotted(chain))
    }

    fn dotted(&self, chain: &[String]) -> String {
        chain
            .iter()
            .map(|part| self.identifier(part))
            .collect::<Vec<_>>()
            .join(".")
    }

    fn constant(&mut self, value: &Value) -> Result<String> {
        match self.dialect {
            Dialect::HogQl => inline_constant(value),
            Dialect::ClickHouse => match value {
                Value::Null => Ok("NULL".to_owned()),
                other => {
                    let name = self.ctx.add_value(other.clone());
                    Ok(format!("%({name})s"))
                }
            },
        }
    }

    fn identifier(&self, name: &str) -> String {
        let allow_dollar = self.dialect == Dialect::HogQl;
        let plain = name.chars().enumerate().all(|(i, c)| {
            c == '_' || c.is_ascii_alphabetic() || (i > 0 && c.is_ascii_digit()) || (allow_dollar && c == '$')
        });
        if plain && !name.is_empty() {
            name.to_owned()
        } else {
            format!("`{}`", name.replace('\\', "\\\\").replace('`', "\\`"))
        }
    }
}

fn inline_constant(value: &Value) -> Result<String> {
    Ok(match value {
        Value::Null => "NULL".to_owned(),
        Value::Bool(true) => "true".to_owned(),
        Value::Bool(false) => "false".to_owned(),
        Value::Int(v) => v.to_string(),
        Value::Float(v) => v.to_string(),
        Value::String(v) => quote_string(v),
        Value::DateTime(nanos) => {
            let at = OffsetDateTime::from_unix_timestamp_nanos(*nanos)
                .map_err(|err| QueryError::compile(format!("Invalid datetime constant: {err}")))?;
            format!(
                "toDateTime('{:04}-{:02}-{:02} {:02}:{:02}:{:02}')",
                at.year(),
                u8::from(at.month()),
                at.day(),
                at.hour(),
                at.minute(),
                at.second()
            )
        }
        Value::Array(items) => {
            let items = items.iter().map(inline_constant).collect::<Result<Vec<_>>>()?;
            format!("[{}]", items.join(", "))
        }
    })
}

fn quote_string(value: &str) -> String {
    format!("'{}'", value.replace('\\', "\\\\").replace('\'', "\\'"))
}

fn expr_kind(expr: &Expr) -> &'static str {
    match expr {
        Expr::Constant { .. } => "constant",
        Expr::Field { .. } => "field",
        Expr::Alias { .. } => "alias",
        Expr::Call { .. } => "call",
        Expr::Compare { .. } => "comparison",
        Expr::Arithmetic { .. } => "arithmetic",
        Expr::And { .. } => "and",
        Expr::Or { .. } => "or",
        Expr::Not { .. } => "not",
        Expr::Tuple { .. } => "tuple",
        Expr::Array { .. } => "array",
        Expr::Asterisk => "asterisk",
        Expr::Placeholder { .. } => "placeholder",
        Expr::Select { .. } => "subquery",
    }
}
