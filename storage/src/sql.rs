//! Database-backed file table.

use crate::runtime::{
    ChangeOutcome, Entry, EntryInfo, StorageRuntime, WriteRequest, clean, clean_file, direct_child
};
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use config::RootKind;
use errors::RuntimeError;
use sqlx::{Pool, Row, Sqlite};
use std::collections::BTreeMap;

pub const FILES_TABLE: &str = "stowage_files";

fn db_err(e: sqlx::Error) -> RuntimeError {
    RuntimeError::Backend {
        backend: "sql".to_string(),
        reason: e.to_string()
    }
}

/// Files stored as rows keyed by `/<org id>/<path>`.
///
/// All roots of kind `sql` share the host's pool; rows from other
/// organisations are never visible.
pub struct SqlStorage {
    pool: Pool<Sqlite>,
    org_id: i64
}

impl SqlStorage {
    pub async fn new(pool: Pool<Sqlite>, org_id: i64) -> Result<Self, RuntimeError> {
        let storage = Self { pool, org_id };
        storage.initialize_schema().await?;
        Ok(storage)
    }

    pub async fn initialize_schema(&self) -> Result<(), RuntimeError> {
        sqlx::query(
            "CREATE TABLE IF NOT EXISTS stowage_files (
                path TEXT PRIMARY KEY,
                body BLOB NOT NULL,
                updated_at BIGINT NOT NULL
            )"
        )
        .execute(&self.pool)
        .await
        .map_err(db_err)?;
        Ok(())
    }

    fn key(&self, cleaned: &str) -> String {
        format!("/{}/{}", self.org_id, cleaned)
    }

    fn dir_key(&self, cleaned: &str) -> String {
        if cleaned.is_empty() {
            format!("/{}/", self.org_id)
        } else {
            format!("/{}/{}/", self.org_id, cleaned)
        }
    }
}

#[async_trait]
impl StorageRuntime for SqlStorage {
    fn kind(&self) -> RootKind {
        RootKind::Sql
    }

    fn location(&self) -> String {
        format!("sql:{}{}", FILES_TABLE, self.dir_key(""))
    }

    async fn list(&self, path: &str) -> Result<Vec<EntryInfo>, RuntimeError> {
        let cleaned = clean(path)?;
        let prefix = self.dir_key(&cleaned);
        let rows = sqlx::query(
            "SELECT path, length(body) AS size, updated_at FROM stowage_files
             WHERE substr(path, 1, length(?1)) = ?1
             ORDER BY path"
        )
        .bind(prefix.clone())
        .fetch_all(&self.pool)
        .await
        .map_err(db_err)?;

        let mut entries: BTreeMap<String, EntryInfo> = BTreeMap::new();
        for row in rows {
            let key: String = row.get("path");
            let Some((name, is_dir)) = key.get(prefix.len()..).and_then(direct_child) else {
                continue;
            };
            if entries.contains_key(name) {
                continue;
            }
            let size: i64 = row.get("size");
            let updated_at: i64 = row.get("updated_at");
            entries.insert(
                name.to_string(),
                EntryInfo {
                    path: utils::join_clean(&cleaned, name),
                    name: name.to_string(),
                    is_dir,
                    size: if is_dir { 0 } else { u64::try_from(size).unwrap_or(0) },
                    modified: if is_dir {
                        None
                    } else {
                        DateTime::<Utc>::from_timestamp_millis(updated_at)
                    }
                }
            );
        }
        Ok(entries.into_values().collect())
    }

    async fn read(&self, path: &str) -> Result<Option<Entry>, RuntimeError> {
        let cleaned = clean_file(path)?;
        let row = sqlx::query("SELECT body, updated_at FROM stowage_files WHERE path = ?1")
            .bind(self.key(&cleaned))
            .fetch_optional(&self.pool)
            .await
            .map_err(db_err)?;

        Ok(row.map(|row| {
            let body: Vec<u8> = row.get("body");
            let updated_at: i64 = row.get("updated_at");
            Entry {
                path: cleaned,
                body: body.into(),
                modified: DateTime::<Utc>::from_timestamp_millis(updated_at)
            }
        }))
    }

    async fn write(&self, request: WriteRequest) -> Result<ChangeOutcome, RuntimeError> {
        let cleaned = clean_file(&request.path)?;
        sqlx::query(
            "INSERT INTO stowage_files (path, body, updated_at) VALUES (?1, ?2, ?3)
             ON CONFLICT(path) DO UPDATE SET body = excluded.body, updated_at = excluded.updated_at"
        )
        .bind(self.key(&cleaned))
        .bind(request.body.to_vec())
        .bind(Utc::now().timestamp_millis())
        .execute(&self.pool)
        .await
        .map_err(db_err)?;

        Ok(ChangeOutcome::Committed {
            path: cleaned,
            revision: None
        })
    }

    async fn delete(&self, path: &str) -> Result<ChangeOutcome, RuntimeError> {
        let cleaned = clean_file(path)?;
        let result = sqlx::query("DELETE FROM stowage_files WHERE path = ?1")
            .bind(self.key(&cleaned))
            .execute(&self.pool)
            .await
            .map_err(db_err)?;

        if result.rows_affected() == 0 {
            Ok(ChangeOutcome::Missing { path: cleaned })
        } else {
            Ok(ChangeOutcome::Committed {
                path: cleaned,
                revision: None
            })
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use sqlx::sqlite::SqlitePoolOptions;

    async fn pool() -> Pool<Sqlite> {
        SqlitePoolOptions::new()
            .max_connections(1)
            .connect("sqlite::memory:")
            .await
            .unwrap()
    }

    #[tokio::test]
    async fn test_write_read_delete() {
        let sql = SqlStorage::new(pool().await, 1).await.unwrap();

        sql.write(WriteRequest::new("a/b.json", b"{}".to_vec()))
            .await
            .unwrap();
        let entry = sql.read("/a/b.json").await.unwrap().unwrap();
        assert_eq!(entry.body.as_ref(), b"{}");
        assert!(entry.modified.is_some());

        sql.write(WriteRequest::new("a/b.json", b"{\"v\":2}".to_vec()))
            .await
            .unwrap();
        let entry = sql.read("a/b.json").await.unwrap().unwrap();
        assert_eq!(entry.body.as_ref(), b"{\"v\":2}");

        assert!(matches!(
            sql.delete("a/b.json").await.unwrap(),
            ChangeOutcome::Committed { .. }
        ));
        assert!(matches!(
            sql.delete("a/b.json").await.unwrap(),
            ChangeOutcome::Missing { .. }
        ));
        assert!(sql.read("a/b.json").await.unwrap().is_none());
    }

    #[tokio::test]
    async fn test_list_groups_directories() {
        let sql = SqlStorage::new(pool().await, 1).await.unwrap();
        for path in ["top.json", "team/a.json", "team/b.json", "team/deep/c.json"] {
            sql.write(WriteRequest::new(path, b"x".to_vec())).await.unwrap();
        }

        let top = sql.list("").await.unwrap();
        let names: Vec<_> = top.iter().map(|e| (e.name.as_str(), e.is_dir)).collect();
        assert_eq!(names, vec![("team", true), ("top.json", false)]);

        let team = sql.list("team").await.unwrap();
        let names: Vec<_> = team.iter().map(|e| e.path.as_str()).collect();
        assert_eq!(names, vec!["team/a.json", "team/b.json", "team/deep"]);
        assert_eq!(team[0].size, 1);
    }

    #[tokio::test]
    async fn test_organisations_are_isolated() {
        let pool = pool().await;
        let org1 = SqlStorage::new(pool.clone(), 1).await.unwrap();
        let org2 = SqlStorage::new(pool, 2).await.unwrap();

        org1.write(WriteRequest::new("only-org1.json", b"1".to_vec()))
            .await
            .unwrap();

        assert!(org2.read("only-org1.json").await.unwrap().is_none());
        assert!(org2.list("").await.unwrap().is_empty());
        assert_eq!(org1.list("").await.unwrap().len(), 1);
        assert_eq!(org1.location(), "sql:stowage_files/1/");
    }

    #[tokio::test]
    async fn test_prefix_matching_is_literal() {
        let sql = SqlStorage::new(pool().await, 1).await.unwrap();
        sql.write(WriteRequest::new("a_b/x.json", b"x".to_vec())).await.unwrap();
        sql.write(WriteRequest::new("a%b/y.json", b"y".to_vec())).await.unwrap();

        let listed = sql.list("a_b").await.unwrap();
        assert_eq!(listed.len(), 1);
        assert_eq!(listed[0].name, "x.json");
    }
}
