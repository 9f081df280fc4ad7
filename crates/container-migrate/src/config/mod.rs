//! Configuration loading and validation.

mod options;
mod selection;
mod types;
mod validation;

pub use options::{CommandKind, Mode, RunOptions, TargetType};
pub use selection::{FilterSet, GlobPattern, Selection};
pub use types::*;

use crate::error::Result;
use std::path::Path;

impl Config {
    /// Load configuration from a YAML file.
    pub fn load<P: AsRef<Path>>(path: P) -> Result<Self> {
        let content = std::fs::read_to_string(path)?;
        Self::from_yaml(&content)
    }

    /// Parse configuration from a YAML string.
    pub fn from_yaml(yaml: &str) -> Result<Self> {
        let config: Config = serde_yaml::from_str(yaml)?;
        config.validate()?;
        Ok(config)
    }

    /// Validate the configuration.
    pub fn validate(&self) -> Result<()> {
        validation::validate(self)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_from_yaml_full() {
        let yaml = r#"
cluster:
  url: sqlite://cluster.db
  database: public
archive:
  path: /tmp/archive
datasource:
  url: sqlite://external.db
migration:
  workers: 3
  include: ["public.*"]
  exclude: ["*_tmp"]
  filters:
    - container: "sensor*"
      condition: "value > 10"
  views: false
  schema_only: true
"#;
        let config = Config::from_yaml(yaml).unwrap();
        assert_eq!(config.cluster.database.as_deref(), Some("public"));
        assert_eq!(config.archive.path, std::path::PathBuf::from("/tmp/archive"));
        assert_eq!(config.migration.get_workers(), 3);
        assert_eq!(config.migration.filters.len(), 1);
        assert!(!config.migration.views);
        assert!(config.migration.schema_only);
    }

    #[test]
    fn test_from_yaml_minimal() {
        let config = Config::from_yaml("cluster:\n  url: memory://\n").unwrap();
        assert!(config.datasource.is_none());
        assert_eq!(config.archive.path, std::path::PathBuf::from("./export"));
    }

    #[test]
    fn test_from_yaml_missing_cluster() {
        assert!(Config::from_yaml("archive:\n  path: x\n").is_err());
    }

    #[test]
    fn test_load_missing_file_is_io_error() {
        let err = Config::load("definitely_missing_config.yaml").unwrap_err();
        assert!(matches!(err, crate::error::MigrateError::Io(_)));
    }
}
