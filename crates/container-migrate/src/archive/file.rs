//! Directory archive: a JSON manifest plus metadata and row files per container.

use std::collections::HashSet;
use std::path::{Path, PathBuf};
use std::sync::Mutex;

use async_trait::async_trait;
use serde_json::Value as Json;
use tokio::sync::OnceCell;
use tracing::debug;

use super::manifest::{
    checksum, write_atomic, ContainerMeta, Manifest, ManifestEntry, PROPERTIES_SUFFIX, ROWS_SUFFIX,
};
use crate::core::value::{decode_row, encode_row};
use crate::core::{
    ArchiveEntry, ArchiveTarget, ContainerData, ContainerKey, ContainerSchema, ViewDefinition,
};
use crate::error::{MigrateError, Result};

/// Entries and views accumulated during an export, published by `finish`.
#[derive(Debug, Default)]
struct Pending {
    entries: Vec<ManifestEntry>,
    views: Vec<ViewDefinition>,
    used_names: HashSet<String>,
}

/// File archive rooted at a directory.
#[derive(Debug)]
pub struct FileArchive {
    root: PathBuf,
    pending: Mutex<Pending>,
    manifest: OnceCell<Manifest>,
}

impl FileArchive {
    /// Archive that an export will write into. Nothing touches disk until the
    /// first container is written.
    pub fn for_export(root: impl Into<PathBuf>) -> Self {
        Self {
            root: root.into(),
            pending: Mutex::new(Pending::default()),
            manifest: OnceCell::new(),
        }
    }

    /// Archive that an import will read from. The directory must exist.
    pub fn for_import(root: impl Into<PathBuf>) -> Result<Self> {
        let root = root.into();
        if !root.is_dir() {
            return Err(MigrateError::Config(format!(
                "archive directory {} does not exist",
                root.display()
            )));
        }
        Ok(Self::for_export(root))
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    async fn manifest(&self) -> Result<&Manifest> {
        self.manifest
            .get_or_try_init(|| Manifest::load(&self.root))
            .await
    }

    async fn manifest_entry(&self, entry: &ArchiveEntry) -> Result<&ManifestEntry> {
        let meta_file = entry.key.meta_file_name().ok_or_else(|| {
            MigrateError::entity(entry.key.to_string(), "entry has no metadata file")
        })?;
        self.manifest()
            .await?
            .entry_for_meta(meta_file)
            .ok_or_else(|| {
                MigrateError::entity(
                    entry.key.to_string(),
                    format!("{} is not listed in the manifest", meta_file),
                )
            })
    }

    /// Reserve a file stem for `key`, unique ignoring case.
    fn reserve_name(&self, key: &ContainerKey) -> String {
        let base = file_stem(key);
        let mut pending = lock(&self.pending);
        let mut candidate = base.clone();
        let mut n = 2;
        while !pending.used_names.insert(candidate.to_lowercase()) {
            candidate = format!("{}_{}", base, n);
            n += 1;
        }
        candidate
    }

    async fn load_meta(
        &self,
        key: &ContainerKey,
        manifest_entry: &ManifestEntry,
    ) -> Result<ContainerMeta> {
        let path = self.root.join(&manifest_entry.meta_file);
        let content = tokio::fs::read(&path)
            .await
            .map_err(|e| entity_io(key, &path, e))?;
        let meta: ContainerMeta = serde_json::from_slice(&content).map_err(|e| {
            MigrateError::entity(key.to_string(), format!("{}: {}", path.display(), e))
        })?;

        let meta_key = ContainerKey::new(meta.database.as_deref(), &meta.container, None::<String>);
        if meta_key != *key {
            return Err(MigrateError::entity(
                key.to_string(),
                format!("metadata file describes {} instead", meta_key),
            ));
        }
        Ok(meta)
    }
}

fn lock(pending: &Mutex<Pending>) -> std::sync::MutexGuard<'_, Pending> {
    match pending.lock() {
        Ok(guard) => guard,
        Err(poisoned) => poisoned.into_inner(),
    }
}

fn entity_io(key: &ContainerKey, path: &Path, err: std::io::Error) -> MigrateError {
    MigrateError::entity(key.to_string(), format!("{}: {}", path.display(), err))
}

/// File-system safe stem derived from the key, e.g. `public_sales`.
fn file_stem(key: &ContainerKey) -> String {
    let raw = match key.database() {
        Some(db) => format!("{}_{}", db, key.container()),
        None => key.container().to_string(),
    };
    raw.chars()
        .map(|c| {
            if c.is_ascii_alphanumeric() || c == '_' || c == '-' {
                c
            } else {
                '_'
            }
        })
        .collect()
}

#[async_trait]
impl ArchiveTarget for FileArchive {
    fn describe(&self) -> String {
        format!("file archive {}", self.root.display())
    }

    async fn write_container(
        &self,
        key: &ContainerKey,
        data: &ContainerData,
    ) -> Result<ArchiveEntry> {
        tokio::fs::create_dir_all(&self.root).await?;

        let stem = self.reserve_name(key);
        let meta_file = format!("{}{}", stem, PROPERTIES_SUFFIX);
        let rows_file = format!("{}{}", stem, ROWS_SUFFIX);

        let meta = ContainerMeta {
            database: key.database().map(str::to_string),
            container: key.container().to_string(),
            schema: data.schema.clone(),
        };
        write_atomic(&self.root.join(&meta_file), &serde_json::to_vec_pretty(&meta)?).await?;

        let mut body = Vec::new();
        for row in &data.rows {
            body.extend_from_slice(encode_row(row).to_string().as_bytes());
            body.push(b'\n');
        }
        write_atomic(&self.root.join(&rows_file), &body).await?;
        debug!("Wrote {} ({} rows) to {}", key, data.row_count(), rows_file);

        lock(&self.pending).entries.push(ManifestEntry {
            database: meta.database,
            container: meta.container,
            meta_file: meta_file.clone(),
            rows_file,
            row_count: data.row_count(),
            sha256: checksum(&body),
            filter_condition: key.filter_condition().map(str::to_string),
        });

        Ok(ArchiveEntry {
            key: key.clone().with_meta_file_name(meta_file),
            row_count: Some(data.row_count()),
        })
    }

    async fn write_view(&self, view: &ViewDefinition) -> Result<()> {
        let mut pending = lock(&self.pending);
        pending
            .views
            .retain(|v| !v.same_name(view.database(), view.view()));
        pending.views.push(view.clone());
        Ok(())
    }

    async fn finish(&self) -> Result<()> {
        let mut manifest = Manifest::new();
        {
            let pending = lock(&self.pending);
            manifest.entries = pending.entries.clone();
            manifest.views = pending.views.clone();
        }
        manifest.entries.sort_by(|a, b| a.meta_file.cmp(&b.meta_file));
        manifest.views.sort_by_key(|v| v.full_name());

        tokio::fs::create_dir_all(&self.root).await?;
        manifest.save(&self.root).await
    }

    async fn read_entries(&self) -> Result<Vec<ArchiveEntry>> {
        let manifest = self.manifest().await?;
        Ok(manifest
            .entries
            .iter()
            .map(|e| ArchiveEntry {
                key: ContainerKey::new(e.database.as_deref(), &e.container, Some(&e.meta_file)),
                row_count: Some(e.row_count),
            })
            .collect())
    }

    async fn read_container(&self, entry: &ArchiveEntry) -> Result<ContainerData> {
        let key = &entry.key;
        let manifest_entry = self.manifest_entry(entry).await?;
        let schema = self.load_meta(key, manifest_entry).await?.schema;

        let path = self.root.join(&manifest_entry.rows_file);
        let body = tokio::fs::read(&path)
            .await
            .map_err(|e| entity_io(key, &path, e))?;
        if checksum(&body) != manifest_entry.sha256 {
            return Err(MigrateError::entity(
                key.to_string(),
                format!("checksum mismatch for {}", manifest_entry.rows_file),
            ));
        }

        let text = String::from_utf8(body)
            .map_err(|e| MigrateError::entity(key.to_string(), e.to_string()))?;
        let mut rows = Vec::new();
        for (line_no, line) in text.lines().enumerate() {
            if line.trim().is_empty() {
                continue;
            }
            let json: Json = serde_json::from_str(line).map_err(|e| {
                MigrateError::entity(key.to_string(), format!("line {}: {}", line_no + 1, e))
            })?;
            let row = decode_row(&json, &schema).map_err(|e| {
                MigrateError::entity(key.to_string(), format!("line {}: {}", line_no + 1, e))
            })?;
            rows.push(row);
        }

        if rows.len() as u64 != manifest_entry.row_count {
            return Err(MigrateError::entity(
                key.to_string(),
                format!(
                    "manifest records {} rows, file has {}",
                    manifest_entry.row_count,
                    rows.len()
                ),
            ));
        }

        Ok(ContainerData::new(schema, rows))
    }

    async fn read_schema(&self, entry: &ArchiveEntry) -> Result<ContainerSchema> {
        let manifest_entry = self.manifest_entry(entry).await?;
        Ok(self.load_meta(&entry.key, manifest_entry).await?.schema)
    }

    async fn read_views(&self) -> Result<Vec<ViewDefinition>> {
        Ok(self.manifest().await?.views.clone())
    }
}
