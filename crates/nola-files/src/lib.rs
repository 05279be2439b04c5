//! The file registry: records describing audio files available for transcription.
//!
//! The worker only ever reads from this registry (`get_file`, `get_file_path`); the
//! write path (`create_file`, `delete_file`) exists for the producer side and for
//! tests that need to seed files ahead of enqueuing tasks.

mod error;

use chrono::{DateTime, Utc};
use nola_store::SqliteStore;
use sqlx::Row;

pub use error::FilesError;

/// A registered audio file available for transcription.
#[derive(Debug, Clone, PartialEq)]
pub struct FileRecord {
    pub id: String,
    pub filename: String,
    pub path: String,
    pub size: i64,
    pub content_type: String,
    pub created_at: DateTime<Utc>,
}

/// Fields required to register a new file.
#[derive(Debug, Clone)]
pub struct NewFile {
    pub id: String,
    pub filename: String,
    pub path: String,
    pub size: i64,
    pub content_type: String,
}

/// CRUD access to the `files` table backing [`nola_queue::TaskQueue`]'s foreign key.
#[derive(Clone)]
pub struct FileRegistry {
    store: SqliteStore,
}

impl FileRegistry {
    pub fn new(store: SqliteStore) -> Self {
        Self { store }
    }

    pub async fn create_file(&self, file: NewFile) -> Result<FileRecord, FilesError> {
        let created_at = Utc::now();

        let result = sqlx::query(
            "INSERT INTO files (id, filename, path, size, content_type, created_at) \
             VALUES (?, ?, ?, ?, ?, ?)",
        )
        .bind(&file.id)
        .bind(&file.filename)
        .bind(&file.path)
        .bind(file.size)
        .bind(&file.content_type)
        .bind(created_at.to_rfc3339())
        .execute(self.store.pool())
        .await;

        match result {
            Ok(_) => Ok(FileRecord {
                id: file.id,
                filename: file.filename,
                path: file.path,
                size: file.size,
                content_type: file.content_type,
                created_at,
            }),
            Err(sqlx::Error::Database(db_err)) if db_err.is_unique_violation() => {
                Err(FilesError::DuplicateId(file.id))
            }
            Err(other) => Err(FilesError::Database(other)),
        }
    }

    pub async fn get_file(&self, id: &str) -> Result<Option<FileRecord>, FilesError> {
        let row = sqlx::query(
            "SELECT id, filename, path, size, content_type, created_at FROM files WHERE id = ?",
        )
        .bind(id)
        .fetch_optional(self.store.pool())
        .await?;

        row.map(row_to_file_record).transpose()
    }

    /// Convenience accessor used by the worker's preflight check.
    pub async fn get_file_path(&self, id: &str) -> Result<Option<String>, FilesError> {
        Ok(self.get_file(id).await?.map(|f| f.path))
    }

    pub async fn delete_file(&self, id: &str) -> Result<bool, FilesError> {
        let result = sqlx::query("DELETE FROM files WHERE id = ?")
            .bind(id)
            .execute(self.store.pool())
            .await?;

        Ok(result.rows_affected() > 0)
    }
}

fn row_to_file_record(row: sqlx::sqlite::SqliteRow) -> Result<FileRecord, FilesError> {
    let created_at: String = row.try_get("created_at")?;
    Ok(FileRecord {
        id: row.try_get("id")?,
        filename: row.try_get("filename")?,
        path: row.try_get("path")?,
        size: row.try_get("size")?,
        content_type: row.try_get("content_type")?,
        created_at: DateTime::parse_from_rfc3339(&created_at)
            .map_err(|e| FilesError::Serialization(e.to_string()))?
            .with_timezone(&Utc),
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use nola_store::StoreConfig;

    async fn registry() -> FileRegistry {
        let store = SqliteStore::connect(StoreConfig::in_memory()).await.unwrap();
        FileRegistry::new(store)
    }

    fn sample(id: &str) -> NewFile {
        NewFile {
            id: id.to_string(),
            filename: "speech.wav".to_string(),
            path: format!("/data/{id}.wav"),
            size: 1024,
            content_type: "audio/wav".to_string(),
        }
    }

    #[tokio::test]
    async fn create_then_get_round_trips() {
        let registry = registry().await;
        let created = registry.create_file(sample("f1")).await.unwrap();

        let fetched = registry.get_file("f1").await.unwrap().unwrap();
        assert_eq!(fetched, created);
    }

    #[tokio::test]
    async fn duplicate_id_is_rejected() {
        let registry = registry().await;
        registry.create_file(sample("f1")).await.unwrap();

        let err = registry.create_file(sample("f1")).await.unwrap_err();
        assert!(matches!(err, FilesError::DuplicateId(id) if id == "f1"));
    }

    #[tokio::test]
    async fn get_file_path_of_unknown_file_is_none() {
        let registry = registry().await;
        assert_eq!(registry.get_file_path("missing").await.unwrap(), None);
    }

    #[tokio::test]
    async fn delete_removes_the_record() {
        let registry = registry().await;
        registry.create_file(sample("f1")).await.unwrap();

        assert!(registry.delete_file("f1").await.unwrap());
        assert_eq!(registry.get_file("f1").await.unwrap(), None);
        assert!(!registry.delete_file("f1").await.unwrap());
    }
}
