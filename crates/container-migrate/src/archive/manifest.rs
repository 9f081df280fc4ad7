//! The `archive.json` manifest and per-container metadata files.

use std::path::Path;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};

use crate::core::{ContainerSchema, ViewDefinition};
use crate::error::{MigrateError, Result};

/// Manifest file name at the archive root.
pub const MANIFEST_FILE: &str = "archive.json";

/// Suffix of a container's metadata file.
pub const PROPERTIES_SUFFIX: &str = "_properties.json";

/// Suffix of a container's row file.
pub const ROWS_SUFFIX: &str = ".jsonl";

/// Top-level archive index.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Manifest {
    /// Version of the tool that wrote the archive.
    pub tool_version: String,
    pub exported_at: DateTime<Utc>,
    #[serde(default)]
    pub entries: Vec<ManifestEntry>,
    #[serde(default)]
    pub views: Vec<ViewDefinition>,
}

/// One container in the manifest.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ManifestEntry {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub database: Option<String>,
    pub container: String,
    pub meta_file: String,
    pub rows_file: String,
    pub row_count: u64,
    /// Hex SHA-256 of the rows file.
    pub sha256: String,
    /// Row filter that was applied at export time.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub filter_condition: Option<String>,
}

/// Contents of `<name>_properties.json`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ContainerMeta {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub database: Option<String>,
    pub container: String,
    #[serde(flatten)]
    pub schema: ContainerSchema,
}

impl Manifest {
    pub fn new() -> Self {
        Self {
            tool_version: env!("CARGO_PKG_VERSION").to_string(),
            exported_at: Utc::now(),
            entries: Vec::new(),
            views: Vec::new(),
        }
    }

    /// Load the manifest from an archive directory.
    ///
    /// A missing or unreadable manifest means the archive as a whole cannot
    /// be interpreted, so both cases are [`MigrateError::ArchiveCorrupt`].
    pub async fn load(root: &Path) -> Result<Self> {
        let path = root.join(MANIFEST_FILE);
        let content = tokio::fs::read_to_string(&path).await.map_err(|e| {
            MigrateError::ArchiveCorrupt(format!("cannot read {}: {}", path.display(), e))
        })?;
        serde_json::from_str(&content).map_err(|e| {
            MigrateError::ArchiveCorrupt(format!("cannot parse {}: {}", path.display(), e))
        })
    }

    /// Write the manifest atomically.
    pub async fn save(&self, root: &Path) -> Result<()> {
        let content = serde_json::to_vec_pretty(self)?;
        write_atomic(&root.join(MANIFEST_FILE), &content).await
    }

    /// Find an entry by its metadata file name.
    pub fn entry_for_meta(&self, meta_file: &str) -> Option<&ManifestEntry> {
        self.entries.iter().find(|e| e.meta_file == meta_file)
    }
}

impl Default for Manifest {
    fn default() -> Self {
        Self::new()
    }
}

/// Hex SHA-256 digest.
pub fn checksum(bytes: &[u8]) -> String {
    hex::encode(Sha256::digest(bytes))
}

/// Write a file through a temporary sibling and rename it into place.
pub async fn write_atomic(path: &Path, content: &[u8]) -> Result<()> {
    let temp_path = path.with_extension("tmp");
    tokio::fs::write(&temp_path, content).await?;
    tokio::fs::rename(&temp_path, path).await?;
    Ok(())
}
