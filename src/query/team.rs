//! Team state read by the pipeline at call time.

use serde::{Deserialize, Serialize};

use crate::query::filters::PropertyFilter;
use crate::query::modifiers::PersonsOnEventsMode;
use crate::query::value::Value;

/// Numeric team identifier.
#[derive(Clone, Copy, Debug, Eq, PartialEq, Ord, PartialOrd, Hash, Serialize, Deserialize)]
pub struct TeamId(pub u64);

impl std::fmt::Display for TeamId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Who a query runs for. Only user principals consult per-user feature flags.
#[derive(Clone, Debug, Default, Eq, PartialEq)]
pub enum Principal {
    /// Background or internal work.
    #[default]
    System,
    /// A signed-in user.
    User {
        /// Identifier used for per-user flag evaluation.
        distinct_id: String,
    },
}

/// Team-scoped variable definition with an optional default value.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct InsightVariable {
    /// Stable id referenced by requests.
    pub id: String,
    /// Name used in `{variables.<code_name>}`.
    pub code_name: String,
    /// Value used when a request omits one.
    #[serde(default)]
    pub default_value: Option<Value>,
}

/// Team state consulted by modifier resolution.
pub trait TeamModifierSource {
    /// Owning team.
    fn team_id(&self) -> TeamId;
    /// Raw stored modifier overrides, keyed by camelCase field name.
    ///
    /// Values are validated field by field during resolution; a malformed
    /// entry never aborts resolution.
    fn stored_modifiers(&self) -> Option<&serde_json::Map<String, serde_json::Value>>;
    /// Flag-derived default for the persons-on-events mode.
    fn default_persons_on_events_mode(&self) -> PersonsOnEventsMode;
}

/// In-memory snapshot of a team.
#[derive(Clone, Debug, Default)]
pub struct Team {
    /// Team id.
    pub id: TeamId,
    /// IANA timezone name.
    pub timezone: String,
    /// Raw stored modifier overrides.
    pub stored_modifiers: Option<serde_json::Map<String, serde_json::Value>>,
    /// Flag-derived persons-on-events default.
    pub persons_on_events_mode: PersonsOnEventsMode,
    /// Variable definitions.
    pub variables: Vec<InsightVariable>,
    /// Conditions excluding internal and test users.
    pub test_account_filters: Vec<PropertyFilter>,
}

impl Default for TeamId {
    fn default() -> Self {
        TeamId(1)
    }
}

impl Team {
    /// Team in UTC with no overrides.
    pub fn new(id: u64) -> Self {
        Self {
            id: TeamId(id),
            timezone: "UTC".to_owned(),
            ..Self::default()
        }
    }

    /// Replaces the stored overrides. Non-object JSON clears them.
    pub fn with_stored_modifiers(mut self, modifiers: serde_json::Value) -> Self {
        self.stored_modifiers = match modifiers {
            serde_json::Value::Object(map) => Some(map),
            _ => None,
        };
        self
    }

    /// Sets the persons-on-events default.
    pub fn with_persons_on_events_mode(mut self, mode: PersonsOnEventsMode) -> Self {
        self.persons_on_events_mode = mode;
        self
    }

    /// Adds a variable definition.
    pub fn with_variable(mut self, variable: InsightVariable) -> Self {
        self.variables.push(variable);
        self
    }

    /// Looks up a variable definition by id.
    pub fn variable(&self, id: &str) -> Option<&InsightVariable> {
        self.variables.iter().find(|variable| variable.id == id)
    }
}

impl TeamModifierSource for Team {
    fn team_id(&self) -> TeamId {
        self.id
    }

    fn stored_modifiers(&self) -> Option<&serde_json::Map<String, serde_json::Value>> {
        self.stored_modifiers.as_ref()
    }

    fn default_persons_on_events_mode(&self) -> PersonsOnEventsMode {
        self.persons_on_events_mode
    }
}
