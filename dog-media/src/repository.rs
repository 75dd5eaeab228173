use std::collections::HashMap;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;

use async_trait::async_trait;
use chrono::Utc;
use parking_lot::RwLock;

use crate::{
    EntityId, LogId, MediaError, MediaResult, NewUploadLog, OwningEntity, UploadLogEntry,
};

/// Persistence for upload log entries
#[async_trait]
pub trait UploadLogStore: Send + Sync {
    /// Persist a new entry, assigning its id and creation time
    async fn create(&self, log: NewUploadLog) -> MediaResult<UploadLogEntry>;

    async fn get(&self, id: &LogId) -> MediaResult<Option<UploadLogEntry>>;

    /// Replace the stored variants of an existing entry
    async fn update(&self, entry: &UploadLogEntry) -> MediaResult<()>;

    /// Remove an entry; returns false if it was already gone
    async fn delete(&self, id: &LogId) -> MediaResult<bool>;

    /// Entries holding any variant stored under `filename`
    async fn find_by_filename(&self, filename: &str) -> MediaResult<Vec<UploadLogEntry>>;

    /// Newest entries first
    async fn recent(&self, limit: usize) -> MediaResult<Vec<UploadLogEntry>>;
}

/// Persistence for records that carry denormalized image columns
#[async_trait]
pub trait EntityStore: Send + Sync {
    async fn get(&self, id: &EntityId) -> MediaResult<Option<OwningEntity>>;

    async fn save(&self, entity: &OwningEntity) -> MediaResult<()>;
}

/// In-memory upload log for testing and development
#[derive(Clone, Default)]
pub struct MemoryUploadLogStore {
    entries: Arc<RwLock<HashMap<LogId, UploadLogEntry>>>,
}

impl MemoryUploadLogStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn len(&self) -> usize {
        self.entries.read().len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.read().is_empty()
    }

    /// Insert a fully formed entry, e.g. one written by an older release
    pub fn insert(&self, entry: UploadLogEntry) {
        self.entries.write().insert(entry.id.clone(), entry);
    }
}

#[async_trait]
impl UploadLogStore for MemoryUploadLogStore {
    async fn create(&self, log: NewUploadLog) -> MediaResult<UploadLogEntry> {
        let entry = log.into_entry(LogId::new(), Utc::now());
        self.entries.write().insert(entry.id.clone(), entry.clone());
        Ok(entry)
    }

    async fn get(&self, id: &LogId) -> MediaResult<Option<UploadLogEntry>> {
        Ok(self.entries.read().get(id).cloned())
    }

    async fn update(&self, entry: &UploadLogEntry) -> MediaResult<()> {
        let mut entries = self.entries.write();
        match entries.get_mut(&entry.id) {
            Some(stored) => {
                stored.variants = entry.variants.clone();
                Ok(())
            }
            None => Err(MediaError::log_not_found(entry.id.as_str())),
        }
    }

    async fn delete(&self, id: &LogId) -> MediaResult<bool> {
        Ok(self.entries.write().remove(id).is_some())
    }

    async fn find_by_filename(&self, filename: &str) -> MediaResult<Vec<UploadLogEntry>> {
        let mut found: Vec<UploadLogEntry> = self
            .entries
            .read()
            .values()
            .filter(|entry| entry.variants.values().any(|v| v.filename == filename))
            .cloned()
            .collect();
        found.sort_by(|a, b| a.created_at.cmp(&b.created_at).then(a.id.cmp(&b.id)));
        Ok(found)
    }

    async fn recent(&self, limit: usize) -> MediaResult<Vec<UploadLogEntry>> {
        let mut all: Vec<UploadLogEntry> = self.entries.read().values().cloned().collect();
        all.sort_by(|a, b| b.created_at.cmp(&a.created_at).then(b.id.cmp(&a.id)));
        all.truncate(limit);
        Ok(all)
    }
}

/// In-memory entity table for testing and development
#[derive(Clone, Default)]
pub struct MemoryEntityStore {
    entities: Arc<RwLock<HashMap<EntityId, OwningEntity>>>,
    saves: Arc<AtomicUsize>,
}

impl MemoryEntityStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn insert(&self, entity: OwningEntity) {
        self.entities.write().insert(entity.id.clone(), entity);
    }

    /// Number of `save` calls so far
    pub fn save_count(&self) -> usize {
        self.saves.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl EntityStore for MemoryEntityStore {
    async fn get(&self, id: &EntityId) -> MediaResult<Option<OwningEntity>> {
        Ok(self.entities.read().get(id).cloned())
    }

    async fn save(&self, entity: &OwningEntity) -> MediaResult<()> {
        self.saves.fetch_add(1, Ordering::SeqCst);
        self.entities
            .write()
            .insert(entity.id.clone(), entity.clone());
        Ok(())
    }
}

#[cfg(feature = "postgres")]
pub use pg::PgUploadLogStore;

#[cfg(feature = "postgres")]
mod pg {
    use std::collections::BTreeMap;

    use async_trait::async_trait;
    use chrono::{DateTime, Utc};
    use sqlx::postgres::{PgPool, PgRow};
    use sqlx::types::Json;
    use sqlx::Row;

    use super::UploadLogStore;
    use crate::{
        LogId, MediaError, MediaResult, NewUploadLog, SlotKey, UploadLogEntry, UploadSource,
        UploadedVariant,
    };

    const COLUMNS: &str = "id, title, source, uploader_id, variants, created_at";

    /// Upload log kept in a Postgres table with variants as JSONB
    #[derive(Debug, Clone)]
    pub struct PgUploadLogStore {
        pool: PgPool,
        table: String,
    }

    impl PgUploadLogStore {
        pub fn new(pool: PgPool) -> Self {
            Self {
                pool,
                table: "media_upload_logs".to_string(),
            }
        }

        pub fn with_table<S: Into<String>>(mut self, table: S) -> Self {
            self.table = table.into();
            self
        }

        /// Create the table and its recency index if missing
        pub async fn migrate(&self) -> MediaResult<()> {
            let create = format!(
                "CREATE TABLE IF NOT EXISTS {t} (
                    id TEXT PRIMARY KEY,
                    title TEXT,
                    source TEXT NOT NULL,
                    uploader_id BIGINT,
                    variants JSONB NOT NULL DEFAULT '{{}}'::jsonb,
                    created_at TIMESTAMPTZ NOT NULL DEFAULT now()
                )",
                t = self.table
            );
            sqlx::query(&create)
                .execute(&self.pool)
                .await
                .map_err(MediaError::persistence)?;

            let index = format!(
                "CREATE INDEX IF NOT EXISTS {t}_created_at_idx ON {t} (created_at DESC)",
                t = self.table
            );
            sqlx::query(&index)
                .execute(&self.pool)
                .await
                .map_err(MediaError::persistence)?;
            Ok(())
        }

        fn decode(row: &PgRow) -> MediaResult<UploadLogEntry> {
            let source: String = row.try_get("source").map_err(MediaError::persistence)?;
            let variants: Json<BTreeMap<SlotKey, UploadedVariant>> =
                row.try_get("variants").map_err(MediaError::persistence)?;
            let created_at: DateTime<Utc> =
                row.try_get("created_at").map_err(MediaError::persistence)?;

            Ok(UploadLogEntry {
                id: LogId::from_string(row.try_get("id").map_err(MediaError::persistence)?),
                title: row.try_get("title").map_err(MediaError::persistence)?,
                source: UploadSource::parse(&source).ok_or_else(|| {
                    MediaError::persistence_msg(format!("unknown upload source '{source}'"))
                })?,
                uploader_id: row.try_get("uploader_id").map_err(MediaError::persistence)?,
                variants: variants.0,
                created_at,
            })
        }
    }

    #[async_trait]
    impl UploadLogStore for PgUploadLogStore {
        async fn create(&self, log: NewUploadLog) -> MediaResult<UploadLogEntry> {
            let entry = log.into_entry(LogId::new(), Utc::now());
            let sql = format!(
                "INSERT INTO {} ({COLUMNS}) VALUES ($1, $2, $3, $4, $5, $6)",
                self.table
            );
            sqlx::query(&sql)
                .bind(entry.id.as_str())
                .bind(entry.title.as_deref())
                .bind(entry.source.as_str())
                .bind(entry.uploader_id)
                .bind(Json(&entry.variants))
                .bind(entry.created_at)
                .execute(&self.pool)
                .await
                .map_err(MediaError::persistence)?;
            Ok(entry)
        }

        async fn get(&self, id: &LogId) -> MediaResult<Option<UploadLogEntry>> {
            let sql = format!("SELECT {COLUMNS} FROM {} WHERE id = $1", self.table);
            let row = sqlx::query(&sql)
                .bind(id.as_str())
                .fetch_optional(&self.pool)
                .await
                .map_err(MediaError::persistence)?;
            row.as_ref().map(Self::decode).transpose()
        }

        async fn update(&self, entry: &UploadLogEntry) -> MediaResult<()> {
            let sql = format!("UPDATE {} SET variants = $2 WHERE id = $1", self.table);
            let result = sqlx::query(&sql)
                .bind(entry.id.as_str())
                .bind(Json(&entry.variants))
                .execute(&self.pool)
                .await
                .map_err(MediaError::persistence)?;
            if result.rows_affected() == 0 {
                return Err(MediaError::log_not_found(entry.id.as_str()));
            }
            Ok(())
        }

        async fn delete(&self, id: &LogId) -> MediaResult<bool> {
            let sql = format!("DELETE FROM {} WHERE id = $1", self.table);
            let result = sqlx::query(&sql)
                .bind(id.as_str())
                .execute(&self.pool)
                .await
                .map_err(MediaError::persistence)?;
            Ok(result.rows_affected() > 0)
        }

        async fn find_by_filename(&self, filename: &str) -> MediaResult<Vec<UploadLogEntry>> {
            let sql = format!(
                "SELECT {COLUMNS} FROM {} l
                 WHERE EXISTS (
                     SELECT 1 FROM jsonb_each(l.variants) v
                     WHERE v.value->>'filename' = $1
                 )
                 ORDER BY created_at, id",
                self.table
            );
            let rows = sqlx::query(&sql)
                .bind(filename)
                .fetch_all(&self.pool)
                .await
                .map_err(MediaError::persistence)?;
            rows.iter().map(Self::decode).collect()
        }

        async fn recent(&self, limit: usize) -> MediaResult<Vec<UploadLogEntry>> {
            let sql = format!(
                "SELECT {COLUMNS} FROM {} ORDER BY created_at DESC, id DESC LIMIT $1",
                self.table
            );
            let rows = sqlx::query(&sql)
                .bind(i64::try_from(limit).unwrap_or(i64::MAX))
                .fetch_all(&self.pool)
                .await
                .map_err(MediaError::persistence)?;
            rows.iter().map(Self::decode).collect()
        }
    }
}
