//! In-process container store.

use std::collections::HashMap;

use async_trait::async_trait;
use tokio::sync::RwLock;

use crate::core::{
    value::validate_row, ContainerData, ContainerKey, ContainerSchema, ContainerStore, Row,
    ViewDefinition,
};
use crate::error::{MigrateError, Result};

/// Container store held entirely in memory.
///
/// Each operation takes the map lock for its whole duration, so create and
/// replace are atomic to concurrent readers.
#[derive(Debug, Default)]
pub struct MemoryStore {
    containers: RwLock<HashMap<ContainerKey, ContainerData>>,
    views: RwLock<Vec<ViewDefinition>>,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }
}

/// Identity-only copy of a key, without archive or filter attachments.
fn bare(key: &ContainerKey) -> ContainerKey {
    ContainerKey::new(key.database(), key.container(), None::<String>)
}

fn check_rows(key: &ContainerKey, schema: &ContainerSchema, rows: &[Row]) -> Result<()> {
    for (i, row) in rows.iter().enumerate() {
        validate_row(row, schema)
            .map_err(|e| MigrateError::entity(key.to_string(), format!("row {}: {}", i, e)))?;
    }
    Ok(())
}

fn missing(key: &ContainerKey) -> MigrateError {
    MigrateError::entity(key.to_string(), "container does not exist")
}

#[async_trait]
impl ContainerStore for MemoryStore {
    async fn list_containers(&self, database: Option<&str>) -> Result<Vec<ContainerKey>> {
        let containers = self.containers.read().await;
        let mut keys: Vec<ContainerKey> = containers
            .keys()
            .filter(|k| match (database, k.database()) {
                (Some(scope), Some(db)) => db.eq_ignore_ascii_case(scope),
                (Some(_), None) => false,
                (None, _) => true,
            })
            .map(bare)
            .collect();
        keys.sort_by_key(|k| k.normalized());
        Ok(keys)
    }

    async fn container_exists(&self, key: &ContainerKey) -> Result<bool> {
        Ok(self.containers.read().await.contains_key(key))
    }

    async fn get_schema(&self, key: &ContainerKey) -> Result<ContainerSchema> {
        self.containers
            .read()
            .await
            .get(key)
            .map(|data| data.schema.clone())
            .ok_or_else(|| missing(key))
    }

    async fn read_rows(&self, key: &ContainerKey) -> Result<Vec<Row>> {
        self.containers
            .read()
            .await
            .get(key)
            .map(|data| data.rows.clone())
            .ok_or_else(|| missing(key))
    }

    async fn create_container(&self, key: &ContainerKey, data: &ContainerData) -> Result<()> {
        check_rows(key, &data.schema, &data.rows)?;
        let mut containers = self.containers.write().await;
        if containers.contains_key(key) {
            return Err(MigrateError::entity(
                key.to_string(),
                "container already exists",
            ));
        }
        containers.insert(bare(key), data.clone());
        Ok(())
    }

    async fn append_rows(&self, key: &ContainerKey, rows: &[Row]) -> Result<u64> {
        let mut containers = self.containers.write().await;
        let data = containers.get_mut(key).ok_or_else(|| missing(key))?;
        check_rows(key, &data.schema, rows)?;
        data.rows.extend_from_slice(rows);
        Ok(rows.len() as u64)
    }

    async fn replace_container(&self, key: &ContainerKey, data: &ContainerData) -> Result<()> {
        check_rows(key, &data.schema, &data.rows)?;
        let mut containers = self.containers.write().await;
        containers.remove(key);
        containers.insert(bare(key), data.clone());
        Ok(())
    }

    async fn drop_container(&self, key: &ContainerKey) -> Result<()> {
        self.containers.write().await.remove(key);
        Ok(())
    }

    async fn list_views(&self, database: Option<&str>) -> Result<Vec<ViewDefinition>> {
        let views = self.views.read().await;
        let mut out: Vec<ViewDefinition> = views
            .iter()
            .filter(|v| database.map_or(true, |db| v.database().eq_ignore_ascii_case(db)))
            .cloned()
            .collect();
        out.sort_by(|a, b| a.full_name().cmp(&b.full_name()));
        Ok(out)
    }

    async fn get_view(&self, database: &str, view: &str) -> Result<Option<ViewDefinition>> {
        let views = self.views.read().await;
        Ok(views.iter().find(|v| v.same_name(database, view)).cloned())
    }

    async fn put_view(&self, view: &ViewDefinition) -> Result<()> {
        let mut views = self.views.write().await;
        match views
            .iter_mut()
            .find(|v| v.same_name(view.database(), view.view()))
        {
            Some(existing) => existing.set_definition(view.definition()),
            None => views.push(view.clone()),
        }
        Ok(())
    }

    fn store_type(&self) -> &str {
        "memory"
    }

    async fn close(&self) {}
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::{Column, ColumnType, ContainerKind, Value};

    fn schema() -> ContainerSchema {
        ContainerSchema::new(
            ContainerKind::Collection,
            vec![
                Column::new("id", ColumnType::Long).not_null(),
                Column::new("name", ColumnType::String),
            ],
            true,
        )
    }

    fn data(n: i64) -> ContainerData {
        let rows = (0..n)
            .map(|i| vec![Value::Long(i), Value::String(format!("n{}", i))])
            .collect();
        ContainerData::new(schema(), rows)
    }

    #[tokio::test]
    async fn test_create_is_case_insensitive_on_identity() {
        let store = MemoryStore::new();
        store
            .create_container(&ContainerKey::in_database("public", "Sales"), &data(2))
            .await
            .unwrap();

        assert!(store
            .container_exists(&ContainerKey::in_database("PUBLIC", "sales"))
            .await
            .unwrap());
        let err = store
            .create_container(&ContainerKey::in_database("public", "SALES"), &data(1))
            .await
            .unwrap_err();
        assert!(err.to_string().contains("already exists"));

        let keys = store.list_containers(None).await.unwrap();
        assert_eq!(keys.len(), 1);
        assert_eq!(keys[0].container(), "Sales");
    }

    #[tokio::test]
    async fn test_append_and_replace() {
        let store = MemoryStore::new();
        let key = ContainerKey::in_database("db", "c");
        store.create_container(&key, &data(2)).await.unwrap();

        let appended = store.append_rows(&key, &data(3).rows).await.unwrap();
        assert_eq!(appended, 3);
        assert_eq!(store.read_rows(&key).await.unwrap().len(), 5);

        store.replace_container(&key, &data(1)).await.unwrap();
        assert_eq!(store.read_rows(&key).await.unwrap().len(), 1);
    }

    #[tokio::test]
    async fn test_rejects_rows_that_do_not_fit_schema() {
        let store = MemoryStore::new();
        let key = ContainerKey::in_database("db", "c");
        let bad = ContainerData::new(schema(), vec![vec![Value::Null, Value::Null]]);
        assert!(store.create_container(&key, &bad).await.is_err());
        assert!(!store.container_exists(&key).await.unwrap());
    }

    #[tokio::test]
    async fn test_list_filters_by_database() {
        let store = MemoryStore::new();
        store
            .create_container(&ContainerKey::in_database("a", "x"), &data(0))
            .await
            .unwrap();
        store
            .create_container(&ContainerKey::in_database("b", "y"), &data(0))
            .await
            .unwrap();
        assert_eq!(store.list_containers(Some("A")).await.unwrap().len(), 1);
        assert_eq!(store.list_containers(None).await.unwrap().len(), 2);
    }

    #[tokio::test]
    async fn test_views_match_exactly() {
        let store = MemoryStore::new();
        store
            .put_view(&ViewDefinition::new("db", "v", "SELECT 1"))
            .await
            .unwrap();
        assert!(store.get_view("db", "v").await.unwrap().is_some());
        assert!(store.get_view("db", "V").await.unwrap().is_none());

        store
            .put_view(&ViewDefinition::new("db", "v", "SELECT 2"))
            .await
            .unwrap();
        let views = store.list_views(None).await.unwrap();
        assert_eq!(views.len(), 1);
        assert_eq!(views[0].definition(), "SELECT 2");
    }
}
