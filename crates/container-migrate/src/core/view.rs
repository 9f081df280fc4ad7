//! View definitions.

use serde::{Deserialize, Serialize};

/// A named view scoped to a database, with its declarative body.
///
/// Built field by field while an archive's metadata is streamed in, then
/// treated as read-only once handed to an engine. Views are matched by exact
/// `(database, view)` comparison; the type itself defines no identity.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ViewDefinition {
    database: String,
    view: String,
    definition: String,
}

impl ViewDefinition {
    pub fn new(
        database: impl Into<String>,
        view: impl Into<String>,
        definition: impl Into<String>,
    ) -> Self {
        Self {
            database: database.into(),
            view: view.into(),
            definition: definition.into(),
        }
    }

    pub fn database(&self) -> &str {
        &self.database
    }

    pub fn set_database(&mut self, database: impl Into<String>) {
        self.database = database.into();
    }

    pub fn view(&self) -> &str {
        &self.view
    }

    pub fn set_view(&mut self, view: impl Into<String>) {
        self.view = view.into();
    }

    pub fn definition(&self) -> &str {
        &self.definition
    }

    pub fn set_definition(&mut self, definition: impl Into<String>) {
        self.definition = definition.into();
    }

    /// `database.view` for logging and failure lists.
    pub fn full_name(&self) -> String {
        format!("{}.{}", self.database, self.view)
    }

    /// Exact-string match on database and view name.
    pub fn same_name(&self, database: &str, view: &str) -> bool {
        self.database == database && self.view == view
    }
}
