//! Variable substitution for `{variables.<code_name>}` placeholders.
//!
//! Runs before placeholder substitution. A variable that cannot be bound is
//! left in place for the placeholder pass to report.

use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};

use crate::error::{QueryError, Result};
use crate::query::ast::{Expr, SelectStatement};
use crate::query::team::Team;
use crate::query::value::Value;
use crate::query::visitor::{walk_expr_mut, VisitorMut};

/// Leading chain element marking a variable reference.
pub const VARIABLES_PREFIX: &str = "variables";

/// Request-side binding of a team variable.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct HogQLVariable {
    /// Id of the team variable.
    pub variable_id: String,
    /// Name used in `{variables.<code_name>}`.
    pub code_name: String,
    /// Request value; the team default applies when `None`.
    #[serde(default)]
    pub value: Option<Value>,
}

impl HogQLVariable {
    /// Binding for `variable_id`.
    pub fn new(variable_id: impl Into<String>, code_name: impl Into<String>, value: Option<Value>) -> Self {
        Self {
            variable_id: variable_id.into(),
            code_name: code_name.into(),
            value,
        }
    }
}

/// Binds every variable in `variables` (keyed by variable id) into `stmt`.
///
/// A binding without a value falls back to the team's stored default.
pub fn replace_variables(
    mut stmt: SelectStatement,
    variables: &BTreeMap<String, HogQLVariable>,
    team: &Team,
) -> Result<SelectStatement> {
    let mut bound = BTreeMap::new();
    for (id, variable) in variables {
        if variable.code_name.trim().is_empty() {
            return Err(QueryError::InvalidVariable {
                name: id.clone(),
                reason: "variable has no code name".to_owned(),
            });
        }
        let value = variable.value.clone().or_else(|| {
            team.variable(&variable.variable_id)
                .or_else(|| team.variable(id))
                .and_then(|stored| stored.default_value.clone())
        });
        if let Some(value) = value {
            bound.insert(variable.code_name.clone(), value);
        }
    }
    if bound.is_empty() {
        return Ok(stmt);
    }
    VariableReplacer { bound: &bound }.visit_statement(&mut stmt)?;
    Ok(stmt)
}

struct VariableReplacer<'a> {
    bound: &'a BTreeMap<String, Value>,
}

impl VisitorMut for VariableReplacer<'_> {
    fn visit_expr(&mut self, expr: &mut Expr) -> Result<()> {
        if let Some(chain) = expr.placeholder_chain() {
            let value = match chain {
                [prefix, code_name] if prefix == VARIABLES_PREFIX => self.bound.get(code_name).cloned(),
                _ => None,
            };
            if let Some(value) = value {
                *expr = Expr::constant(value);
            }
            return Ok(());
        }
        walk_expr_mut(self, expr)
    }
}
