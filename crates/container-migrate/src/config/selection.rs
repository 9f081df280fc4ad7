//! Container selection: database scope, explicit names and glob patterns.
//!
//! A pattern that contains a `.` is matched against `database.container`;
//! otherwise it is matched against the container name alone. Matching ignores
//! case, like container identity.

use regex::Regex;

use crate::config::types::FilterRule;
use crate::core::{ContainerKey, ViewDefinition};
use crate::error::{MigrateError, Result};

/// A compiled glob pattern (`*` and `?`).
#[derive(Debug, Clone)]
pub struct GlobPattern {
    source: String,
    regex: Regex,
    qualified: bool,
}

impl GlobPattern {
    pub fn new(pattern: &str) -> Result<Self> {
        if pattern.trim().is_empty() {
            return Err(MigrateError::Config("empty container pattern".into()));
        }
        let mut expr = String::from("(?i)^");
        for c in pattern.chars() {
            match c {
                '*' => expr.push_str(".*"),
                '?' => expr.push('.'),
                other => expr.push_str(&regex::escape(&other.to_string())),
            }
        }
        expr.push('$');
        let regex = Regex::new(&expr).map_err(|e| {
            MigrateError::Config(format!("invalid container pattern {:?}: {}", pattern, e))
        })?;

        Ok(Self {
            source: pattern.to_string(),
            regex,
            qualified: pattern.contains('.'),
        })
    }

    pub fn as_str(&self) -> &str {
        &self.source
    }

    pub fn matches(&self, key: &ContainerKey) -> bool {
        if self.qualified {
            match key.database() {
                Some(db) => self.regex.is_match(&format!("{}.{}", db, key.container())),
                None => false,
            }
        } else {
            self.regex.is_match(key.container())
        }
    }
}

/// Which containers and views a run touches.
#[derive(Debug, Clone, Default)]
pub struct Selection {
    database: Option<String>,
    names: Vec<String>,
    include: Vec<GlobPattern>,
    exclude: Vec<GlobPattern>,
}

impl Selection {
    /// Select everything.
    pub fn all() -> Self {
        Self::default()
    }

    pub fn new(
        database: Option<String>,
        names: &[String],
        include: &[String],
        exclude: &[String],
    ) -> Result<Self> {
        Ok(Self {
            database,
            names: names.iter().map(|n| n.to_lowercase()).collect(),
            include: include
                .iter()
                .map(|p| GlobPattern::new(p))
                .collect::<Result<_>>()?,
            exclude: exclude
                .iter()
                .map(|p| GlobPattern::new(p))
                .collect::<Result<_>>()?,
        })
    }

    /// Database scope, if any.
    pub fn database(&self) -> Option<&str> {
        self.database.as_deref()
    }

    /// Restrict to one database.
    pub fn with_database(mut self, database: Option<String>) -> Self {
        self.database = database;
        self
    }

    /// Whether a container is part of the run.
    ///
    /// Database scope and explicit names are both required when set; the
    /// container must then match an include pattern (if any) and no exclude
    /// pattern.
    pub fn matches(&self, key: &ContainerKey) -> bool {
        if let Some(scope) = &self.database {
            match key.database() {
                Some(db) if db.eq_ignore_ascii_case(scope) => {}
                _ => return false,
            }
        }
        if !self.names.is_empty() {
            let name = key.container().to_lowercase();
            let qualified = key.normalized();
            if !self.names.iter().any(|n| *n == name || *n == qualified) {
                return false;
            }
        }
        if !self.include.is_empty() && !self.include.iter().any(|p| p.matches(key)) {
            return false;
        }
        !self.exclude.iter().any(|p| p.matches(key))
    }

    /// Whether a view is part of the run (database scope only).
    pub fn matches_view(&self, view: &ViewDefinition) -> bool {
        match &self.database {
            Some(scope) => view.database().eq_ignore_ascii_case(scope),
            None => true,
        }
    }
}

/// Compiled export row filters; the first matching rule applies.
#[derive(Debug, Clone, Default)]
pub struct FilterSet {
    rules: Vec<(GlobPattern, String)>,
}

impl FilterSet {
    pub fn new(rules: &[FilterRule]) -> Result<Self> {
        let rules = rules
            .iter()
            .map(|rule| {
                if rule.condition.trim().is_empty() {
                    return Err(MigrateError::Config(format!(
                        "filter for {:?} has an empty condition",
                        rule.container
                    )));
                }
                Ok((GlobPattern::new(&rule.container)?, rule.condition.clone()))
            })
            .collect::<Result<_>>()?;
        Ok(Self { rules })
    }

    pub fn is_empty(&self) -> bool {
        self.rules.is_empty()
    }

    /// Condition for `key`, if any rule matches.
    pub fn condition_for(&self, key: &ContainerKey) -> Option<&str> {
        self.rules
            .iter()
            .find(|(pattern, _)| pattern.matches(key))
            .map(|(_, condition)| condition.as_str())
    }

    /// Set the key's filter condition from the first matching rule.
    pub fn attach(&self, key: &mut ContainerKey) {
        if let Some(condition) = self.condition_for(key) {
            key.set_filter_condition(Some(condition.to_string()));
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn key(db: &str, c: &str) -> ContainerKey {
        ContainerKey::in_database(db, c)
    }

    fn strings(items: &[&str]) -> Vec<String> {
        items.iter().map(|s| s.to_string()).collect()
    }

    #[test]
    fn test_glob_unqualified_and_qualified() {
        let p = GlobPattern::new("sensor_*").unwrap();
        assert!(p.matches(&key("public", "SENSOR_01")));
        assert!(!p.matches(&key("public", "orders")));

        let q = GlobPattern::new("public.sensor_?").unwrap();
        assert!(q.matches(&key("Public", "sensor_1")));
        assert!(!q.matches(&key("public", "sensor_10")));
        assert!(!q.matches(&ContainerKey::new(None::<String>, "sensor_1", None::<String>)));
    }

    #[test]
    fn test_glob_escapes_regex_metacharacters() {
        let p = GlobPattern::new("a+b").unwrap();
        assert!(p.matches(&key("db", "a+b")));
        assert!(!p.matches(&key("db", "aab")));
    }

    #[test]
    fn test_selection_all() {
        assert!(Selection::all().matches(&key("any", "thing")));
    }

    #[test]
    fn test_selection_database_scope() {
        let sel = Selection::all().with_database(Some("public".into()));
        assert!(sel.matches(&key("PUBLIC", "a")));
        assert!(!sel.matches(&key("other", "a")));
        assert!(sel.matches_view(&ViewDefinition::new("public", "v", "SELECT 1")));
        assert!(!sel.matches_view(&ViewDefinition::new("other", "v", "SELECT 1")));
    }

    #[test]
    fn test_selection_names_include_exclude() {
        let sel = Selection::new(
            None,
            &strings(&["Orders"]),
            &[],
            &[],
        )
        .unwrap();
        assert!(sel.matches(&key("db", "orders")));
        assert!(!sel.matches(&key("db", "sensors")));

        let sel = Selection::new(None, &[], &strings(&["s*"]), &strings(&["*_tmp"])).unwrap();
        assert!(sel.matches(&key("db", "sales")));
        assert!(!sel.matches(&key("db", "sales_tmp")));
        assert!(!sel.matches(&key("db", "orders")));
    }

    #[test]
    fn test_filter_set_first_match_wins() {
        let set = FilterSet::new(&[
            FilterRule {
                container: "public.sensor_1".into(),
                condition: "value > 1".into(),
            },
            FilterRule {
                container: "sensor_*".into(),
                condition: "value > 0".into(),
            },
        ])
        .unwrap();

        let mut k = key("public", "sensor_1");
        set.attach(&mut k);
        assert_eq!(k.filter_condition(), Some("value > 1"));
        assert_eq!(set.condition_for(&key("public", "sensor_2")), Some("value > 0"));
        assert_eq!(set.condition_for(&key("public", "orders")), None);
    }

    #[test]
    fn test_filter_set_rejects_empty_condition() {
        let err = FilterSet::new(&[FilterRule {
            container: "x".into(),
            condition: "  ".into(),
        }]);
        assert!(err.is_err());
    }
}
