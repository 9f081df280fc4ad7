//! Container identity and identifier validation.
//!
//! Container names in the cluster are case-preserving but unique ignoring
//! case, so [`ContainerKey`] compares and hashes on a lower-cased form that is
//! computed once at construction. `Sales` and `sales` are the same container.

use std::fmt;
use std::hash::{Hash, Hasher};

use crate::error::{MigrateError, Result};

/// Maximum identifier length accepted for database and container names.
const MAX_IDENTIFIER_LENGTH: usize = 256;

/// Multiplier used to combine the database and container hashes.
const HASH_MULTIPLIER: u64 = 31;

/// Validate a database, container or view name.
///
/// Rejects:
/// - Empty identifiers
/// - Identifiers containing null bytes
/// - Identifiers exceeding maximum length
pub fn validate_identifier(name: &str) -> Result<()> {
    if name.is_empty() {
        return Err(MigrateError::Config(
            "Identifier cannot be empty".to_string(),
        ));
    }

    if name.contains('\0') {
        return Err(MigrateError::Config(format!(
            "Identifier contains null byte: {:?}",
            name
        )));
    }

    if name.len() > MAX_IDENTIFIER_LENGTH {
        return Err(MigrateError::Config(format!(
            "Identifier exceeds maximum length of {} bytes (got {} bytes): {:?}",
            MAX_IDENTIFIER_LENGTH,
            name.len(),
            name
        )));
    }

    Ok(())
}

/// Identity of a container: an optional database name plus a container name.
///
/// Equality and hashing ignore case on both fields. A missing database equals
/// only another missing database. `meta_file_name` and `filter_condition` ride
/// along with the key but are not part of its identity.
#[derive(Debug, Clone)]
pub struct ContainerKey {
    database: Option<String>,
    container: String,
    meta_file_name: Option<String>,
    filter_condition: Option<String>,
    folded_database: Option<String>,
    folded_container: String,
    hash_code: u64,
}

impl ContainerKey {
    /// Build a key from its database, container and archive metadata file name.
    pub fn new(
        database: Option<impl Into<String>>,
        container: impl Into<String>,
        meta_file_name: Option<impl Into<String>>,
    ) -> Self {
        let database: Option<String> = database.map(Into::into);
        let container: String = container.into();
        let folded_database = database.as_deref().map(str::to_lowercase);
        let folded_container = container.to_lowercase();
        let hash_code = combine_hash(folded_database.as_deref(), &folded_container);

        Self {
            database,
            container,
            meta_file_name: meta_file_name.map(Into::into),
            filter_condition: None,
            folded_database,
            folded_container,
            hash_code,
        }
    }

    /// Shorthand for a key with a database and no metadata file.
    pub fn in_database(database: &str, container: &str) -> Self {
        Self::new(Some(database), container, None::<String>)
    }

    /// Database name, if the container is database-scoped.
    pub fn database(&self) -> Option<&str> {
        self.database.as_deref()
    }

    /// Container name as originally spelled.
    pub fn container(&self) -> &str {
        &self.container
    }

    /// Archive-side metadata file for this container.
    pub fn meta_file_name(&self) -> Option<&str> {
        self.meta_file_name.as_deref()
    }

    /// Row filter applied when this container is exported.
    pub fn filter_condition(&self) -> Option<&str> {
        self.filter_condition.as_deref()
    }

    /// Set (or clear) the export row filter. Does not affect identity.
    pub fn set_filter_condition(&mut self, condition: Option<String>) {
        self.filter_condition = condition;
    }

    /// Return a copy with a different metadata file name.
    pub fn with_meta_file_name(mut self, meta_file_name: impl Into<String>) -> Self {
        self.meta_file_name = Some(meta_file_name.into());
        self
    }

    /// Case-folded `database.container` string, stable across spellings.
    pub fn normalized(&self) -> String {
        match &self.folded_database {
            Some(db) => format!("{}.{}", db, self.folded_container),
            None => self.folded_container.clone(),
        }
    }

    /// Hash computed from the case-folded fields: `31 * h(database) + h(container)`.
    pub fn hash_code(&self) -> u64 {
        self.hash_code
    }
}

/// Polynomial string hash over the folded characters.
fn fold_hash(s: &str) -> u64 {
    s.chars().fold(0u64, |acc, c| {
        acc.wrapping_mul(HASH_MULTIPLIER).wrapping_add(c as u64)
    })
}

fn combine_hash(database: Option<&str>, container: &str) -> u64 {
    let db_hash = database.map(fold_hash).unwrap_or(0);
    HASH_MULTIPLIER
        .wrapping_mul(db_hash)
        .wrapping_add(fold_hash(container))
}

impl PartialEq for ContainerKey {
    fn eq(&self, other: &Self) -> bool {
        self.folded_database == other.folded_database
            && self.folded_container == other.folded_container
    }
}

impl Eq for ContainerKey {}

impl Hash for ContainerKey {
    fn hash<H: Hasher>(&self, state: &mut H) {
        state.write_u64(self.hash_code);
    }
}

impl fmt::Display for ContainerKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match &self.database {
            Some(db) => write!(f, "{}.{}", db, self.container),
            None => write!(f, "{}", self.container),
        }
    }
}
