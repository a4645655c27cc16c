//! Statement tree for analytics queries.
//!
//! A parsed query is either a single [`SelectQuery`] or a [`SelectSetQuery`]
//! combining several selects with set operators. Both are wrapped in the
//! closed [`SelectStatement`] sum type; every rewrite pass that needs to touch
//! "each select" goes through [`SelectStatement::for_each_leaf_select_mut`]
//! rather than matching on the two variants itself.
//!
//! The tree is owned and mutated in place by substitution, limit injection
//! and pagination. Callers that need the pristine tree must `clone()` it
//! before handing it to the pipeline.

use serde::{Deserialize, Serialize};

use crate::query::value::Value;

/// Comparison operators.
#[derive(Clone, Copy, Debug, Eq, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum CompareOp {
    /// `=`
    Eq,
    /// `!=`
    NotEq,
    /// `<`
    Lt,
    /// `<=`
    LtEq,
    /// `>`
    Gt,
    /// `>=`
    GtEq,
    /// Case-sensitive pattern match.
    Like,
    /// Negated `LIKE`.
    NotLike,
    /// Case-insensitive pattern match.
    ILike,
    /// Negated `ILIKE`.
    NotILike,
    /// Membership in a tuple or subquery.
    In,
    /// Negated `IN`.
    NotIn,
}

impl CompareOp {
    /// Infix symbol used by the canonical dialect.
    pub fn symbol(self) -> &'static str {
        match self {
            CompareOp::Eq => "=",
            CompareOp::NotEq => "!=",
            CompareOp::Lt => "<",
            CompareOp::LtEq => "<=",
            CompareOp::Gt => ">",
            CompareOp::GtEq => ">=",
            CompareOp::Like => "LIKE",
            CompareOp::NotLike => "NOT LIKE",
            CompareOp::ILike => "ILIKE",
            CompareOp::NotILike => "NOT ILIKE",
            CompareOp::In => "IN",
            CompareOp::NotIn => "NOT IN",
        }
    }

    /// Function name used by the execution dialect.
    pub fn function(self) -> &'static str {
        match self {
            CompareOp::Eq => "equals",
            CompareOp::NotEq => "notEquals",
            CompareOp::Lt => "less",
            CompareOp::LtEq => "lessOrEquals",
            CompareOp::Gt => "greater",
            CompareOp::GtEq => "greaterOrEquals",
            CompareOp::Like => "like",
            CompareOp::NotLike => "notLike",
            CompareOp::ILike => "ilike",
            CompareOp::NotILike => "notILike",
            CompareOp::In => "in",
            CompareOp::NotIn => "notIn",
        }
    }
}

/// Arithmetic operators.
#[derive(Clone, Copy, Debug, Eq, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ArithmeticOp {
    /// `+`
    Add,
    /// `-`
    Sub,
    /// `*`
    Mult,
    /// `/`
    Div,
    /// `%`
    Mod,
}

impl ArithmeticOp {
    /// Infix symbol used by the canonical dialect.
    pub fn symbol(self) -> &'static str {
        match self {
            ArithmeticOp::Add => "+",
            ArithmeticOp::Sub => "-",
            ArithmeticOp::Mult => "*",
            ArithmeticOp::Div => "/",
            ArithmeticOp::Mod => "%",
        }
    }

    /// Function name used by the execution dialect.
    pub fn function(self) -> &'static str {
        match self {
            ArithmeticOp::Add => "plus",
            ArithmeticOp::Sub => "minus",
            ArithmeticOp::Mult => "multiply",
            ArithmeticOp::Div => "divide",
            ArithmeticOp::Mod => "modulo",
        }
    }
}

/// Expression node.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum Expr {
    /// Literal value.
    Constant {
        /// The value.
        value: Value,
    },
    /// Column or table reference, possibly qualified (`e.properties.$browser`).
    Field {
        /// Dotted name, one segment per element.
        chain: Vec<String>,
    },
    /// `expr AS alias`.
    Alias {
        /// Name the expression is bound to.
        alias: String,
        /// Aliased expression.
        expr: Box<Expr>,
    },
    /// Function call.
    Call {
        /// Function name as written.
        name: String,
        /// Positional arguments.
        args: Vec<Expr>,
        /// `name(DISTINCT ...)`.
        #[serde(default)]
        distinct: bool,
    },
    /// Binary comparison.
    Compare {
        /// Operator.
        op: CompareOp,
        /// Left operand.
        left: Box<Expr>,
        /// Right operand.
        right: Box<Expr>,
    },
    /// Binary arithmetic.
    Arithmetic {
        /// Operator.
        op: ArithmeticOp,
        /// Left operand.
        left: Box<Expr>,
        /// Right operand.
        right: Box<Expr>,
    },
    /// Conjunction.
    And {
        /// Operands.
        exprs: Vec<Expr>,
    },
    /// Disjunction.
    Or {
        /// Operands.
        exprs: Vec<Expr>,
    },
    /// Negation.
    Not {
        /// Negated expression.
        expr: Box<Expr>,
    },
    /// `(a, b, ...)`
    Tuple {
        /// Elements.
        exprs: Vec<Expr>,
    },
    /// `[a, b, ...]`
    Array {
        /// Elements.
        exprs: Vec<Expr>,
    },
    /// `*`
    Asterisk,
    /// Named hole (`{name}` or `{a.b}`) filled in by a substitution pass.
    ///
    /// Only a [`Expr::Field`] inside the braces names the placeholder; any
    /// other expression is an unnamed slot and is rejected.
    Placeholder {
        /// Expression between the braces.
        expr: Box<Expr>,
    },
    /// Scalar or `IN` subquery.
    Select {
        /// The nested statement.
        query: Box<SelectStatement>,
    },
}

impl Expr {
    /// Literal node.
    pub fn constant(value: impl Into<Value>) -> Self {
        Expr::Constant {
            value: value.into(),
        }
    }

    /// Field reference from a chain of names.
    pub fn field<I, S>(chain: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        Expr::Field {
            chain: chain.into_iter().map(Into::into).collect(),
        }
    }

    /// Wraps `expr` in `AS alias`.
    pub fn alias(alias: impl Into<String>, expr: Expr) -> Self {
        Expr::Alias {
            alias: alias.into(),
            expr: Box::new(expr),
        }
    }

    /// Plain call without `DISTINCT`.
    pub fn call(name: impl Into<String>, args: Vec<Expr>) -> Self {
        Expr::Call {
            name: name.into(),
            args,
            distinct: false,
        }
    }

    /// Binary comparison node.
    pub fn compare(op: CompareOp, left: Expr, right: Expr) -> Self {
        Expr::Compare {
            op,
            left: Box::new(left),
            right: Box::new(right),
        }
    }

    /// Conjunction that collapses to the single member or to `true` when empty.
    pub fn and(mut exprs: Vec<Expr>) -> Self {
        match exprs.len() {
            0 => Expr::constant(true),
            1 => exprs.remove(0),
            _ => Expr::And { exprs },
        }
    }

    /// Placeholder named by a dotted field chain, e.g. `["filters"]`.
    pub fn placeholder<I, S>(chain: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        Expr::Placeholder {
            expr: Box::new(Expr::field(chain)),
        }
    }

    /// Subquery expression.
    pub fn subquery(stmt: impl Into<SelectStatement>) -> Self {
        Expr::Select {
            query: Box::new(stmt.into()),
        }
    }

    /// Field chain naming a placeholder, `None` for unnamed placeholders and
    /// for every other node kind.
    pub fn placeholder_chain(&self) -> Option<&[String]> {
        match self {
            Expr::Placeholder { expr } => match expr.as_ref() {
                Expr::Field { chain } if !chain.is_empty() => Some(chain),
                _ => None,
            },
            _ => None,
        }
    }

    /// Dotted placeholder name (`filters.properties`).
    pub fn placeholder_name(&self) -> Option<String> {
        self.placeholder_chain().map(|chain| chain.join("."))
    }
}

/// Join kinds for `JOIN` clauses.
#[derive(Clone, Copy, Debug, Eq, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum JoinType {
    /// `INNER JOIN`
    Inner,
    /// `LEFT JOIN`
    Left,
    /// `RIGHT JOIN`
    Right,
    /// `FULL OUTER JOIN`
    Full,
    /// `CROSS JOIN`
    Cross,
}

impl JoinType {
    /// SQL keyword for the join.
    pub fn keyword(self) -> &'static str {
        match self {
            JoinType::Inner => "INNER JOIN",
            JoinType::Left => "LEFT JOIN",
            JoinType::Right => "RIGHT JOIN",
            JoinType::Full => "FULL OUTER JOIN",
            JoinType::Cross => "CROSS JOIN",
        }
    }
}

/// FROM clause entry. Additional joins hang off `next_join`.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct JoinExpr {
    /// Table reference ([`Expr::Field`]) or subquery ([`Expr::Select`]).
    pub table: Expr,
    /// Table alias.
    #[serde(default)]
    pub alias: Option<String>,
    /// Join kind for this entry; `None` on the leading table.
    #[serde(default)]
    pub join_type: Option<JoinType>,
    /// `ON` condition.
    #[serde(default)]
    pub constraint: Option<Expr>,
    /// Next entry in the join chain.
    #[serde(default)]
    pub next_join: Option<Box<JoinExpr>>,
}

impl JoinExpr {
    /// Leading entry for a plain table reference.
    pub fn table(name: impl Into<String>) -> Self {
        Self {
            table: Expr::field([name.into()]),
            alias: None,
            join_type: None,
            constraint: None,
            next_join: None,
        }
    }

    /// Appends a join at the end of the chain.
    pub fn join(mut self, join_type: JoinType, mut next: JoinExpr, on: Option<Expr>) -> Self {
        next.join_type = Some(join_type);
        next.constraint = on;
        self.push_join(next);
        self
    }

    fn push_join(&mut self, next: JoinExpr) {
        match &mut self.next_join {
            Some(existing) => existing.push_join(next),
            None => self.next_join = Some(Box::new(next)),
        }
    }

    /// Iterates over this entry and every joined entry.
    pub fn chain(&self) -> impl Iterator<Item = &JoinExpr> {
        std::iter::successors(Some(self), |join| join.next_join.as_deref())
    }

    /// Name of the leading table when it is a plain reference.
    pub fn table_name(&self) -> Option<String> {
        match &self.table {
            Expr::Field { chain } => Some(chain.join(".")),
            _ => None,
        }
    }
}

/// Direction of an `ORDER BY` term.
#[derive(Clone, Copy, Debug, Default, Eq, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum SortOrder {
    /// Ascending.
    #[default]
    Asc,
    /// Descending.
    Desc,
}

/// One `ORDER BY` term.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct OrderExpr {
    /// Sort key.
    pub expr: Expr,
    /// Direction.
    #[serde(default)]
    pub order: SortOrder,
}

/// A single `SELECT`.
#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct SelectQuery {
    /// Projection list.
    pub select: Vec<Expr>,
    /// `SELECT DISTINCT`.
    pub distinct: bool,
    /// FROM clause.
    pub select_from: Option<JoinExpr>,
    /// `PREWHERE` filter.
    pub prewhere: Option<Expr>,
    /// `WHERE` filter.
    #[serde(rename = "where")]
    pub where_: Option<Expr>,
    /// `GROUP BY` keys.
    pub group_by: Vec<Expr>,
    /// `HAVING` filter.
    pub having: Option<Expr>,
    /// `ORDER BY` terms.
    pub order_by: Vec<OrderExpr>,
    /// `LIMIT` expression.
    pub limit: Option<Expr>,
    /// `OFFSET` expression.
    pub offset: Option<Expr>,
}

impl SelectQuery {
    /// Select with only a projection.
    pub fn new(select: Vec<Expr>) -> Self {
        Self {
            select,
            ..Self::default()
        }
    }

    /// Sets the FROM clause to a plain table.
    pub fn from_table(mut self, name: impl Into<String>) -> Self {
        self.select_from = Some(JoinExpr::table(name));
        self
    }

    /// Sets the FROM clause.
    pub fn from_join(mut self, join: JoinExpr) -> Self {
        self.select_from = Some(join);
        self
    }

    /// Sets the `WHERE` filter.
    pub fn filter(mut self, condition: Expr) -> Self {
        self.where_ = Some(condition);
        self
    }

    /// Appends an `ORDER BY` term.
    pub fn order_by(mut self, expr: Expr, order: SortOrder) -> Self {
        self.order_by.push(OrderExpr { expr, order });
        self
    }

    /// Constant `LIMIT`.
    pub fn limit(mut self, limit: i64) -> Self {
        self.limit = Some(Expr::constant(limit));
        self
    }

    /// Constant `OFFSET`.
    pub fn offset(mut self, offset: i64) -> Self {
        self.offset = Some(Expr::constant(offset));
        self
    }
}

/// Set operators joining selects.
#[derive(Clone, Copy, Debug, Eq, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SetOperator {
    /// `UNION ALL`
    UnionAll,
    /// `UNION DISTINCT`
    UnionDistinct,
    /// `INTERSECT`
    Intersect,
    /// `EXCEPT`
    Except,
}

impl SetOperator {
    /// SQL keyword for the operator.
    pub fn keyword(self) -> &'static str {
        match self {
            SetOperator::UnionAll => "UNION ALL",
            SetOperator::UnionDistinct => "UNION DISTINCT",
            SetOperator::Intersect => "INTERSECT",
            SetOperator::Except => "EXCEPT",
        }
    }
}

/// A statement preceded by its set operator.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct SelectSetNode {
    /// Operator joining this statement to the previous one.
    pub op: SetOperator,
    /// The statement.
    pub query: SelectStatement,
}

/// Ordered sequence of statements combined by set operators.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct SelectSetQuery {
    /// First statement.
    pub initial: Box<SelectStatement>,
    /// Remaining statements, in order.
    #[serde(default)]
    pub subsequent: Vec<SelectSetNode>,
}

impl SelectSetQuery {
    /// Combines `queries` with the same operator.
    ///
    /// Returns `None` for an empty input.
    pub fn from_queries<I>(op: SetOperator, queries: I) -> Option<Self>
    where
        I: IntoIterator,
        I::Item: Into<SelectStatement>,
    {
        let mut iter = queries.into_iter();
        let initial = iter.next()?.into();
        Some(Self {
            initial: Box::new(initial),
            subsequent: iter
                .map(|query| SelectSetNode {
                    op,
                    query: query.into(),
                })
                .collect(),
        })
    }
}

/// Either a single select or a set of selects.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(tag = "kind", content = "query", rename_all = "snake_case")]
pub enum SelectStatement {
    /// Single select.
    Select(SelectQuery),
    /// Set of selects.
    SelectSet(SelectSetQuery),
}

impl SelectStatement {
    /// Visits every leaf select, descending through nested set queries.
    pub fn for_each_leaf_select<F>(&self, f: &mut F)
    where
        F: FnMut(&SelectQuery),
    {
        match self {
            SelectStatement::Select(query) => f(query),
            SelectStatement::SelectSet(set) => {
                set.initial.for_each_leaf_select(f);
                for node in &set.subsequent {
                    node.query.for_each_leaf_select(f);
                }
            }
        }
    }

    /// Mutable counterpart of [`SelectStatement::for_each_leaf_select`].
    pub fn for_each_leaf_select_mut<F>(&mut self, f: &mut F)
    where
        F: FnMut(&mut SelectQuery),
    {
        match self {
            SelectStatement::Select(query) => f(query),
            SelectStatement::SelectSet(set) => {
                set.initial.for_each_leaf_select_mut(f);
                for node in &mut set.subsequent {
                    node.query.for_each_leaf_select_mut(f);
                }
            }
        }
    }

    /// Number of leaf selects.
    pub fn leaf_count(&self) -> usize {
        let mut count = 0;
        self.for_each_leaf_select(&mut |_| count += 1);
        count
    }

    /// The left-most leaf, which defines the output columns.
    pub fn first_leaf(&self) -> &SelectQuery {
        match self {
            SelectStatement::Select(query) => query,
            SelectStatement::SelectSet(set) => set.initial.first_leaf(),
        }
    }
}

impl From<SelectQuery> for SelectStatement {
    fn from(query: SelectQuery) -> Self {
        SelectStatement::Select(query)
    }
}

impl From<SelectSetQuery> for SelectStatement {
    fn from(set: SelectSetQuery) -> Self {
        SelectStatement::SelectSet(set)
    }
}

/// Pipeline input: raw text still to be parsed, or an already built tree.
#[derive(Clone, Debug, PartialEq)]
pub enum Query {
    /// Text for the parser.
    Raw(String),
    /// Tree built by the caller.
    Structured(SelectStatement),
}

impl Query {
    /// Original text, when the query arrived as text.
    pub fn text(&self) -> Option<&str> {
        match self {
            Query::Raw(text) => Some(text),
            Query::Structured(_) => None,
        }
    }
}

impl From<&str> for Query {
    fn from(text: &str) -> Self {
        Query::Raw(text.to_owned())
    }
}

impl From<String> for Query {
    fn from(text: String) -> Self {
        Query::Raw(text)
    }
}

impl From<SelectStatement> for Query {
    fn from(stmt: SelectStatement) -> Self {
        Query::Structured(stmt)
    }
}

impl From<SelectQuery> for Query {
    fn from(query: SelectQuery) -> Self {
        Query::Structured(query.into())
    }
}

impl From<SelectSetQuery> for Query {
    fn from(set: SelectSetQuery) -> Self {
        Query::Structured(set.into())
    }
}
