//! Catalog of queryable tables, bridging logical table names to storage tables.
//!
//! A [`Database`] is built by a [`DatabaseProvider`] at most once per request
//! and shared by both render passes through the request's
//! [`ExecutionContext`](crate::query::context::ExecutionContext).

use std::collections::BTreeMap;
use std::sync::atomic::{AtomicUsize, Ordering};

use crate::error::Result;
use crate::query::modifiers::Modifiers;
use crate::query::team::TeamId;
use crate::query::timings::Timings;

/// Table visible to queries.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct TableSchema {
    /// Logical name used in query text.
    pub name: String,
    /// Physical table name in the storage engine.
    pub storage_name: String,
    /// Known column names.
    pub fields: Vec<String>,
}

/// Team-scoped catalog.
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct Database {
    tables: BTreeMap<String, TableSchema>,
}

impl Database {
    /// Empty catalog.
    pub fn new() -> Self {
        Self::default()
    }

    /// Registers a table under its logical name.
    pub fn with_table<I, S>(mut self, name: &str, storage_name: &str, fields: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.tables.insert(
            name.to_owned(),
            TableSchema {
                name: name.to_owned(),
                storage_name: storage_name.to_owned(),
                fields: fields.into_iter().map(Into::into).collect(),
            },
        );
        self
    }

    /// Looks up a table by logical name.
    pub fn table(&self, name: &str) -> Option<&TableSchema> {
        self.tables.get(name)
    }

    /// Logical table names in sorted order.
    pub fn table_names(&self) -> impl Iterator<Item = &str> {
        self.tables.keys().map(String::as_str)
    }
}

/// Builds the catalog for a team.
pub trait DatabaseProvider: Send + Sync {
    /// Builds the catalog visible to `team_id` under `modifiers`.
    fn build(&self, team_id: TeamId, modifiers: &Modifiers, timings: &Timings) -> Result<Database>;
}

/// Provider returning a fixed catalog, used for tests or prototyping.
#[derive(Debug, Default)]
pub struct StaticDatabaseProvider {
    database: Database,
    builds: AtomicUsize,
}

impl StaticDatabaseProvider {
    /// Provider that always returns `database`.
    pub fn new(database: Database) -> Self {
        Self {
            database,
            builds: AtomicUsize::new(0),
        }
    }

    /// Number of times [`DatabaseProvider::build`] ran.
    pub fn build_count(&self) -> usize {
        self.builds.load(Ordering::Relaxed)
    }
}

impl DatabaseProvider for StaticDatabaseProvider {
    fn build(&self, _team_id: TeamId, _modifiers: &Modifiers, timings: &Timings) -> Result<Database> {
        let _stage = timings.measure("create_database");
        self.builds.fetch_add(1, Ordering::Relaxed);
        Ok(self.database.clone())
    }
}
