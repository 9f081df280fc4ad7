//! Resolved options for one invocation.

use serde::{Deserialize, Serialize};

use super::selection::{FilterSet, Selection};
use super::types::Config;
use crate::error::{MigrateError, Result};

/// Which engine runs.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum CommandKind {
    Export,
    Import,
}

/// How an import treats containers that already exist at the destination.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Mode {
    /// Create missing containers, skip existing ones.
    #[default]
    Normal,
    /// Append rows to existing compatible containers, create missing ones.
    Append,
    /// Drop and recreate existing containers, create missing ones.
    Replace,
    /// Print the archive inventory only.
    List,
}

/// Archive counterpart of the run.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TargetType {
    /// Directory archive on the local filesystem.
    #[default]
    ExportFile,
    /// Live external data source connection.
    DataSource,
}

/// Validated configuration for one export or import run.
#[derive(Debug, Clone)]
pub struct RunOptions {
    pub command: CommandKind,
    pub mode: Mode,
    /// Dry run: enumerate, filter and validate, but change nothing.
    pub test_mode: bool,
    pub target_type: TargetType,
    pub workers: usize,
    pub selection: Selection,
    pub filters: FilterSet,
    pub include_views: bool,
    pub schema_only: bool,
}

impl RunOptions {
    /// Options for an export driven by `config`.
    pub fn export(config: &Config) -> Result<Self> {
        Self::from_config(config, CommandKind::Export, Mode::Normal)
    }

    /// Options for an import in `mode` driven by `config`.
    pub fn import(config: &Config, mode: Mode) -> Result<Self> {
        Self::from_config(config, CommandKind::Import, mode)
    }

    fn from_config(config: &Config, command: CommandKind, mode: Mode) -> Result<Self> {
        let m = &config.migration;
        let selection = Selection::new(
            config.cluster.database.clone(),
            &m.containers,
            &m.include,
            &m.exclude,
        )?;

        Ok(Self {
            command,
            mode,
            test_mode: false,
            target_type: TargetType::ExportFile,
            workers: m.get_workers(),
            selection,
            filters: FilterSet::new(&m.filters)?,
            include_views: m.views,
            schema_only: m.schema_only,
        })
    }

    pub fn with_test_mode(mut self, test_mode: bool) -> Self {
        self.test_mode = test_mode;
        self
    }

    pub fn with_target_type(mut self, target_type: TargetType) -> Self {
        self.target_type = target_type;
        self
    }

    pub fn with_workers(mut self, workers: usize) -> Self {
        self.workers = workers;
        self
    }

    pub fn with_selection(mut self, selection: Selection) -> Self {
        self.selection = selection;
        self
    }

    pub fn with_schema_only(mut self, schema_only: bool) -> Self {
        self.schema_only = schema_only;
        self
    }

    /// Reject combinations the engines do not accept.
    pub fn validate(&self) -> Result<()> {
        if self.workers == 0 {
            return Err(MigrateError::Config("workers must be at least 1".into()));
        }
        if self.command == CommandKind::Export && self.mode != Mode::Normal {
            return Err(MigrateError::Config(format!(
                "mode {:?} only applies to import",
                self.mode
            )));
        }
        Ok(())
    }

    /// Label used in logs and results, e.g. `import-replace`.
    pub fn label(&self) -> &'static str {
        match (self.command, self.mode) {
            (CommandKind::Export, _) => "export",
            (CommandKind::Import, Mode::Normal) => "import",
            (CommandKind::Import, Mode::Append) => "import-append",
            (CommandKind::Import, Mode::Replace) => "import-replace",
            (CommandKind::Import, Mode::List) => "import-list",
        }
    }
}
