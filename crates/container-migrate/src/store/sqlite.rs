//! SQLite-backed container store.
//!
//! Containers, their rows and view definitions live in three bookkeeping
//! tables. Rows are kept as JSON arrays in the archive encoding, so any
//! schema round-trips without DDL. Create, append and replace each run in a
//! single transaction. Write transactions are serialized through one store
//! lock; a deferred transaction that reads before it writes cannot be
//! retried by SQLite once another connection has committed.

use std::time::Duration;

use async_trait::async_trait;
use serde_json::Value as Json;
use sqlx::sqlite::{SqliteConnectOptions, SqliteJournalMode, SqlitePoolOptions};
use sqlx::{Row as _, Sqlite, SqlitePool, Transaction};
use tokio::sync::Mutex;
use tracing::debug;

use crate::core::value::{decode_row, encode_row, validate_row};
use crate::core::{
    ContainerData, ContainerKey, ContainerSchema, ContainerStore, Row, ViewDefinition,
};
use crate::error::{MigrateError, Result};

const INIT_SQL: &[&str] = &[
    r#"
    CREATE TABLE IF NOT EXISTS cm_containers (
        id INTEGER PRIMARY KEY AUTOINCREMENT,
        database_name TEXT,
        container_name TEXT NOT NULL,
        has_database INTEGER NOT NULL,
        folded_database TEXT NOT NULL,
        folded_container TEXT NOT NULL,
        schema_json TEXT NOT NULL,
        UNIQUE (has_database, folded_database, folded_container)
    )
    "#,
    r#"
    CREATE TABLE IF NOT EXISTS cm_rows (
        container_id INTEGER NOT NULL REFERENCES cm_containers(id) ON DELETE CASCADE,
        seq INTEGER NOT NULL,
        row_json TEXT NOT NULL,
        PRIMARY KEY (container_id, seq)
    )
    "#,
    r#"
    CREATE TABLE IF NOT EXISTS cm_views (
        database_name TEXT NOT NULL,
        view_name TEXT NOT NULL,
        definition TEXT NOT NULL,
        PRIMARY KEY (database_name, view_name)
    )
    "#,
];

/// Container store on a SQLite database file.
pub struct SqliteStore {
    pool: SqlitePool,
    write_lock: Mutex<()>,
}

impl SqliteStore {
    /// Open (creating if needed) the database at `path` and install the tables.
    pub async fn open(path: &str, max_connections: u32) -> Result<Self> {
        let options = SqliteConnectOptions::new()
            .filename(path)
            .create_if_missing(true)
            .journal_mode(SqliteJournalMode::Wal)
            .foreign_keys(true)
            .busy_timeout(Duration::from_secs(30));

        let pool = SqlitePoolOptions::new()
            .max_connections(max_connections.max(1))
            .connect_with(options)
            .await
            .map_err(MigrateError::store)?;

        for statement in INIT_SQL {
            sqlx::query(statement)
                .execute(&pool)
                .await
                .map_err(MigrateError::store)?;
        }

        debug!("SQLite store ready at {}", path);
        Ok(Self {
            pool,
            write_lock: Mutex::new(()),
        })
    }
}

/// Identity columns: (has_database, folded_database, folded_container).
fn identity(key: &ContainerKey) -> (i64, String, String) {
    match key.database() {
        Some(db) => (1, db.to_lowercase(), key.container().to_lowercase()),
        None => (0, String::new(), key.container().to_lowercase()),
    }
}

fn entity_err(key: &ContainerKey, err: impl std::fmt::Display) -> MigrateError {
    MigrateError::entity(key.to_string(), err.to_string())
}

fn check_rows(key: &ContainerKey, schema: &ContainerSchema, rows: &[Row]) -> Result<()> {
    for (i, row) in rows.iter().enumerate() {
        validate_row(row, schema).map_err(|e| entity_err(key, format!("row {}: {}", i, e)))?;
    }
    Ok(())
}

async fn find_id<'e, E>(executor: E, key: &ContainerKey) -> Result<Option<(i64, String)>>
where
    E: sqlx::Executor<'e, Database = Sqlite>,
{
    let (has_db, folded_db, folded_container) = identity(key);
    let row = sqlx::query(
        "SELECT id, schema_json FROM cm_containers
         WHERE has_database = ? AND folded_database = ? AND folded_container = ?",
    )
    .bind(has_db)
    .bind(folded_db)
    .bind(folded_container)
    .fetch_optional(executor)
    .await
    .map_err(MigrateError::store)?;

    match row {
        Some(row) => Ok(Some((
            row.try_get("id").map_err(MigrateError::store)?,
            row.try_get("schema_json").map_err(MigrateError::store)?,
        ))),
        None => Ok(None),
    }
}

async fn insert_rows(
    tx: &mut Transaction<'_, Sqlite>,
    container_id: i64,
    start_seq: i64,
    rows: &[Row],
) -> Result<()> {
    for (offset, row) in rows.iter().enumerate() {
        sqlx::query("INSERT INTO cm_rows (container_id, seq, row_json) VALUES (?, ?, ?)")
            .bind(container_id)
            .bind(start_seq + offset as i64)
            .bind(encode_row(row).to_string())
            .execute(&mut **tx)
            .await
            .map_err(MigrateError::store)?;
    }
    Ok(())
}

async fn insert_container(
    tx: &mut Transaction<'_, Sqlite>,
    key: &ContainerKey,
    data: &ContainerData,
) -> Result<()> {
    let (has_db, folded_db, folded_container) = identity(key);
    let schema_json = serde_json::to_string(&data.schema)?;
    let result = sqlx::query(
        "INSERT INTO cm_containers
         (database_name, container_name, has_database,
          folded_database, folded_container, schema_json)
         VALUES (?, ?, ?, ?, ?, ?)",
    )
    .bind(key.database())
    .bind(key.container())
    .bind(has_db)
    .bind(folded_db)
    .bind(folded_container)
    .bind(schema_json)
    .execute(&mut **tx)
    .await
    .map_err(MigrateError::store)?;

    insert_rows(tx, result.last_insert_rowid(), 0, &data.rows).await
}

async fn delete_container(tx: &mut Transaction<'_, Sqlite>, container_id: i64) -> Result<()> {
    sqlx::query("DELETE FROM cm_rows WHERE container_id = ?")
        .bind(container_id)
        .execute(&mut **tx)
        .await
        .map_err(MigrateError::store)?;
    sqlx::query("DELETE FROM cm_containers WHERE id = ?")
        .bind(container_id)
        .execute(&mut **tx)
        .await
        .map_err(MigrateError::store)?;
    Ok(())
}

fn parse_schema(key: &ContainerKey, json: &str) -> Result<ContainerSchema> {
    serde_json::from_str(json).map_err(|e| entity_err(key, format!("stored schema: {}", e)))
}

#[async_trait]
impl ContainerStore for SqliteStore {
    async fn list_containers(&self, database: Option<&str>) -> Result<Vec<ContainerKey>> {
        let rows = match database {
            Some(db) => sqlx::query(
                "SELECT database_name, container_name FROM cm_containers
                 WHERE has_database = 1 AND folded_database = ?
                 ORDER BY folded_database, folded_container",
            )
            .bind(db.to_lowercase())
            .fetch_all(&self.pool)
            .await,
            None => sqlx::query(
                "SELECT database_name, container_name FROM cm_containers
                 ORDER BY folded_database, folded_container",
            )
            .fetch_all(&self.pool)
            .await,
        }
        .map_err(MigrateError::store)?;

        rows.iter()
            .map(|row| {
                let database: Option<String> =
                    row.try_get("database_name").map_err(MigrateError::store)?;
                let container: String =
                    row.try_get("container_name").map_err(MigrateError::store)?;
                Ok(ContainerKey::new(database, container, None::<String>))
            })
            .collect()
    }

    async fn container_exists(&self, key: &ContainerKey) -> Result<bool> {
        Ok(find_id(&self.pool, key).await?.is_some())
    }

    async fn get_schema(&self, key: &ContainerKey) -> Result<ContainerSchema> {
        match find_id(&self.pool, key).await? {
            Some((_, schema_json)) => parse_schema(key, &schema_json),
            None => Err(entity_err(key, "container does not exist")),
        }
    }

    async fn read_rows(&self, key: &ContainerKey) -> Result<Vec<Row>> {
        let (id, schema_json) = find_id(&self.pool, key)
            .await?
            .ok_or_else(|| entity_err(key, "container does not exist"))?;
        let schema = parse_schema(key, &schema_json)?;

        let rows = sqlx::query("SELECT row_json FROM cm_rows WHERE container_id = ? ORDER BY seq")
            .bind(id)
            .fetch_all(&self.pool)
            .await
            .map_err(MigrateError::store)?;

        rows.iter()
            .map(|row| {
                let text: String = row.try_get("row_json").map_err(MigrateError::store)?;
                let json: Json = serde_json::from_str(&text)?;
                decode_row(&json, &schema).map_err(|e| entity_err(key, e))
            })
            .collect()
    }

    async fn create_container(&self, key: &ContainerKey, data: &ContainerData) -> Result<()> {
        check_rows(key, &data.schema, &data.rows)?;
        let _write = self.write_lock.lock().await;
        let mut tx = self.pool.begin().await.map_err(MigrateError::store)?;
        if find_id(&mut *tx, key).await?.is_some() {
            return Err(entity_err(key, "container already exists"));
        }
        insert_container(&mut tx, key, data).await?;
        tx.commit().await.map_err(MigrateError::store)?;
        Ok(())
    }

    async fn append_rows(&self, key: &ContainerKey, rows: &[Row]) -> Result<u64> {
        let _write = self.write_lock.lock().await;
        let mut tx = self.pool.begin().await.map_err(MigrateError::store)?;
        let (id, schema_json) = find_id(&mut *tx, key)
            .await?
            .ok_or_else(|| entity_err(key, "container does not exist"))?;
        check_rows(key, &parse_schema(key, &schema_json)?, rows)?;

        let next: i64 = sqlx::query(
            "SELECT COALESCE(MAX(seq) + 1, 0) AS next FROM cm_rows WHERE container_id = ?",
        )
        .bind(id)
        .fetch_one(&mut *tx)
        .await
        .map_err(MigrateError::store)?
        .try_get("next")
        .map_err(MigrateError::store)?;

        insert_rows(&mut tx, id, next, rows).await?;
        tx.commit().await.map_err(MigrateError::store)?;
        Ok(rows.len() as u64)
    }

    async fn replace_container(&self, key: &ContainerKey, data: &ContainerData) -> Result<()> {
        check_rows(key, &data.schema, &data.rows)?;
        let _write = self.write_lock.lock().await;
        let mut tx = self.pool.begin().await.map_err(MigrateError::store)?;
        if let Some((id, _)) = find_id(&mut *tx, key).await? {
            delete_container(&mut tx, id).await?;
        }
        insert_container(&mut tx, key, data).await?;
        tx.commit().await.map_err(MigrateError::store)?;
        Ok(())
    }

    async fn drop_container(&self, key: &ContainerKey) -> Result<()> {
        let _write = self.write_lock.lock().await;
        let mut tx = self.pool.begin().await.map_err(MigrateError::store)?;
        if let Some((id, _)) = find_id(&mut *tx, key).await? {
            delete_container(&mut tx, id).await?;
        }
        tx.commit().await.map_err(MigrateError::store)?;
        Ok(())
    }

    async fn list_views(&self, database: Option<&str>) -> Result<Vec<ViewDefinition>> {
        let rows = sqlx::query(
            "SELECT database_name, view_name, definition FROM cm_views
             ORDER BY database_name, view_name",
        )
        .fetch_all(&self.pool)
        .await
        .map_err(MigrateError::store)?;

        let mut views = Vec::with_capacity(rows.len());
        for row in rows {
            let db: String = row.try_get("database_name").map_err(MigrateError::store)?;
            if let Some(scope) = database {
                if !db.eq_ignore_ascii_case(scope) {
                    continue;
                }
            }
            views.push(ViewDefinition::new(
                db,
                row.try_get::<String, _>("view_name")
                    .map_err(MigrateError::store)?,
                row.try_get::<String, _>("definition")
                    .map_err(MigrateError::store)?,
            ));
        }
        Ok(views)
    }

    async fn get_view(&self, database: &str, view: &str) -> Result<Option<ViewDefinition>> {
        let row = sqlx::query(
            "SELECT definition FROM cm_views WHERE database_name = ? AND view_name = ?",
        )
        .bind(database)
        .bind(view)
        .fetch_optional(&self.pool)
        .await
        .map_err(MigrateError::store)?;

        match row {
            Some(row) => {
                let definition: String = row.try_get("definition").map_err(MigrateError::store)?;
                Ok(Some(ViewDefinition::new(database, view, definition)))
            }
            None => Ok(None),
        }
    }

    async fn put_view(&self, view: &ViewDefinition) -> Result<()> {
        let _write = self.write_lock.lock().await;
        sqlx::query(
            "INSERT INTO cm_views (database_name, view_name, definition) VALUES (?, ?, ?)
             ON CONFLICT (database_name, view_name) DO UPDATE SET definition = excluded.definition",
        )
        .bind(view.database())
        .bind(view.view())
        .bind(view.definition())
        .execute(&self.pool)
        .await
        .map_err(MigrateError::store)?;
        Ok(())
    }

    fn store_type(&self) -> &str {
        "sqlite"
    }

    async fn close(&self) {
        self.pool.close().await;
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::{Column, ColumnType, ContainerKind, Value};
    use chrono::{TimeZone, Utc};
    use tempfile::TempDir;

    fn schema() -> ContainerSchema {
        ContainerSchema::new(
            ContainerKind::TimeSeries,
            vec![
                Column::new("ts", ColumnType::Timestamp).not_null(),
                Column::new("value", ColumnType::Double),
                Column::new("raw", ColumnType::Blob),
            ],
            true,
        )
    }

    fn rows(n: i64) -> Vec<Row> {
        (0..n)
            .map(|i| {
                vec![
                    Value::Timestamp(Utc.timestamp_opt(1_700_000_000 + i, 0).unwrap()),
                    Value::Double(i as f64 / 2.0),
                    Value::Blob(vec![i as u8, 0xff]),
                ]
            })
            .collect()
    }

    async fn open(dir: &TempDir) -> SqliteStore {
        let path = dir.path().join("cluster.db");
        SqliteStore::open(path.to_str().unwrap(), 2).await.unwrap()
    }

    #[tokio::test]
    async fn test_create_read_round_trip() {
        let dir = TempDir::new().unwrap();
        let store = open(&dir).await;
        let key = ContainerKey::in_database("plant", "Sensor_A");

        store
            .create_container(&key, &ContainerData::new(schema(), rows(3)))
            .await
            .unwrap();

        let folded = ContainerKey::in_database("PLANT", "sensor_a");
        assert!(store.container_exists(&folded).await.unwrap());
        assert_eq!(store.get_schema(&folded).await.unwrap(), schema());
        assert_eq!(store.read_rows(&folded).await.unwrap(), rows(3));

        let keys = store.list_containers(Some("plant")).await.unwrap();
        assert_eq!(keys.len(), 1);
        assert_eq!(keys[0].container(), "Sensor_A");
        store.close().await;
    }

    #[tokio::test]
    async fn test_duplicate_create_fails_without_side_effects() {
        let dir = TempDir::new().unwrap();
        let store = open(&dir).await;
        let key = ContainerKey::in_database("db", "c");
        store
            .create_container(&key, &ContainerData::new(schema(), rows(2)))
            .await
            .unwrap();
        assert!(store
            .create_container(&key, &ContainerData::new(schema(), rows(5)))
            .await
            .is_err());
        assert_eq!(store.read_rows(&key).await.unwrap().len(), 2);
    }

    #[tokio::test]
    async fn test_append_and_replace() {
        let dir = TempDir::new().unwrap();
        let store = open(&dir).await;
        let key = ContainerKey::new(None::<String>, "c", None::<String>);
        store
            .create_container(&key, &ContainerData::new(schema(), rows(2)))
            .await
            .unwrap();

        assert_eq!(store.append_rows(&key, &rows(2)).await.unwrap(), 2);
        assert_eq!(store.read_rows(&key).await.unwrap().len(), 4);
        assert_eq!(store.append_rows(&key, &rows(3)).await.unwrap(), 3);
        let all = store.read_rows(&key).await.unwrap();
        assert_eq!(all.len(), 7);
        assert_eq!(&all[4..], &rows(3)[..]);

        store
            .replace_container(&key, &ContainerData::new(schema(), rows(1)))
            .await
            .unwrap();
        assert_eq!(store.read_rows(&key).await.unwrap(), rows(1));

        store.drop_container(&key).await.unwrap();
        assert!(!store.container_exists(&key).await.unwrap());
    }

    #[tokio::test]
    async fn test_views_upsert_by_exact_name() {
        let dir = TempDir::new().unwrap();
        let store = open(&dir).await;
        store
            .put_view(&ViewDefinition::new("db", "v", "SELECT 1"))
            .await
            .unwrap();
        store
            .put_view(&ViewDefinition::new("db", "v", "SELECT 2"))
            .await
            .unwrap();
        assert_eq!(
            store.get_view("db", "v").await.unwrap().unwrap().definition(),
            "SELECT 2"
        );
        assert!(store.get_view("DB", "v").await.unwrap().is_none());
        assert_eq!(store.list_views(Some("db")).await.unwrap().len(), 1);
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 4)]
    async fn test_concurrent_writers_all_succeed() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("cluster.db");
        let store = std::sync::Arc::new(
            SqliteStore::open(path.to_str().unwrap(), 4).await.unwrap(),
        );

        let mut handles = Vec::new();
        for i in 0..8 {
            let store = store.clone();
            handles.push(tokio::spawn(async move {
                let key = ContainerKey::in_database("db", &format!("c{}", i));
                store
                    .create_container(&key, &ContainerData::new(schema(), rows(3)))
                    .await?;
                store.append_rows(&key, &rows(2)).await?;
                store
                    .replace_container(&key, &ContainerData::new(schema(), rows(4)))
                    .await?;
                store.append_rows(&key, &rows(1)).await
            }));
        }
        for handle in handles {
            assert_eq!(handle.await.unwrap().unwrap(), 1);
        }

        let keys = store.list_containers(Some("db")).await.unwrap();
        assert_eq!(keys.len(), 8);
        for key in keys {
            assert_eq!(store.read_rows(&key).await.unwrap().len(), 5);
        }
    }
}
