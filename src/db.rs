use sqlx::{
    sqlite::{SqliteConnectOptions, SqliteJournalMode, SqlitePoolOptions, SqliteSynchronous},
    ConnectOptions, Pool, Sqlite,
};
use chrono::Utc;
use serde_json::{Map, Value};
use std::str::FromStr;
use thiserror::Error;

/// Keys that are never served nor accepted through document updates.
const PROTECTED_KEYS: &[&str] = &["hashedPassword"];

#[derive(Debug, Error)]
pub enum StoreError {
    #[error("user not found: {0}")]
    UserNotFound(String),
    #[error("user already exists: {0}")]
    UserExists(String),
    #[error("document changed: expected version {expected}, found {actual}")]
    VersionConflict { expected: i64, actual: i64 },
    #[error("invalid update: {0}")]
    InvalidPatch(&'static str),
    #[error("database error: {0}")]
    Sqlx(#[from] sqlx::Error),
    #[error("stored document is not valid JSON: {0}")]
    Json(#[from] serde_json::Error),
}

pub type StoreResult<T> = Result<T, StoreError>;

/// A user document together with its revision number.
#[derive(Debug, Clone)]
pub struct StoredDocument {
    pub data: Value,
    pub version: i64,
}

#[derive(Clone)]
pub struct Db {
    pool: Pool<Sqlite>,
}

impl Db {
    pub async fn new(database_url: &str, max_connections: u32) -> anyhow::Result<Self> {
        let options = SqliteConnectOptions::from_str(database_url)?
            .journal_mode(SqliteJournalMode::Wal)
            .synchronous(SqliteSynchronous::Normal)
            .log_statements(log::LevelFilter::Trace);

        let pool = SqlitePoolOptions::new()
            .max_connections(max_connections)
            .connect_with(options)
            .await?;

        let db = Db { pool };
        db.migrate().await?;
        Ok(db)
    }

    /// A private in-memory database. One connection, since every SQLite
    /// memory connection is its own database.
    pub async fn in_memory() -> anyhow::Result<Self> {
        let options = SqliteConnectOptions::from_str("sqlite::memory:")?
            .log_statements(log::LevelFilter::Trace);
        let pool = SqlitePoolOptions::new()
            .max_connections(1)
            .idle_timeout(None)
            .max_lifetime(None)
            .connect_with(options)
            .await?;

        let db = Db { pool };
        db.migrate().await?;
        Ok(db)
    }

    async fn migrate(&self) -> anyhow::Result<()> {
        sqlx::query(
            r#"
            CREATE TABLE IF NOT EXISTS user_documents (
                user_id TEXT PRIMARY KEY,
                data TEXT NOT NULL,
                version INTEGER NOT NULL DEFAULT 1,
                created_at DATETIME DEFAULT CURRENT_TIMESTAMP,
                updated_at DATETIME DEFAULT CURRENT_TIMESTAMP
            );
            "#
        )
        .execute(&self.pool)
        .await?;

        Ok(())
    }

    pub async fn create_document(&self, user_id: &str, initial: &Value) -> StoreResult<()> {
        let result = sqlx::query("INSERT OR IGNORE INTO user_documents (user_id, data, version) VALUES (?, ?, 1)")
            .bind(user_id)
            .bind(serde_json::to_string(initial)?)
            .execute(&self.pool)
            .await?;

        if result.rows_affected() == 0 {
            return Err(StoreError::UserExists(user_id.to_string()));
        }
        log::info!("created document for user {}", user_id);
        Ok(())
    }

    pub async fn load(&self, user_id: &str) -> StoreResult<StoredDocument> {
        let row: Option<(String, i64)> =
            sqlx::query_as("SELECT data, version FROM user_documents WHERE user_id = ?")
                .bind(user_id)
                .fetch_optional(&self.pool)
                .await?;

        let (raw, version) = row.ok_or_else(|| StoreError::UserNotFound(user_id.to_string()))?;
        let mut data: Value = serde_json::from_str(&raw)?;
        if let Value::Object(map) = &mut data {
            strip_protected(map);
        }
        Ok(StoredDocument { data, version })
    }

    /// Shallow-merges `patch` into the stored document: each top-level key
    /// replaces the stored value wholesale (arrays included).
    ///
    /// With `expected_version`, the write only succeeds if nobody has
    /// written since that version was read. Returns the new version.
    pub async fn merge_update(
        &self,
        user_id: &str,
        patch: Map<String, Value>,
        expected_version: Option<i64>,
    ) -> StoreResult<i64> {
        let mut patch = patch;
        strip_protected(&mut patch);
        if patch.is_empty() {
            return Err(StoreError::InvalidPatch("update must contain at least one field"));
        }

        let mut tx = self.pool.begin().await?;

        let row: Option<(String, i64)> =
            sqlx::query_as("SELECT data, version FROM user_documents WHERE user_id = ?")
                .bind(user_id)
                .fetch_optional(&mut *tx)
                .await?;
        let (raw, version) = row.ok_or_else(|| StoreError::UserNotFound(user_id.to_string()))?;

        if let Some(expected) = expected_version {
            if expected != version {
                log::warn!("stale update for user {}: expected v{}, at v{}", user_id, expected, version);
                return Err(StoreError::VersionConflict { expected, actual: version });
            }
        }

        let mut data = match serde_json::from_str::<Value>(&raw)? {
            Value::Object(map) => map,
            _ => Map::new(),
        };
        let keys: Vec<String> = patch.keys().cloned().collect();
        data.extend(patch);

        let next_version = version + 1;
        let result = sqlx::query(
            "UPDATE user_documents SET data = ?, version = ?, updated_at = ? WHERE user_id = ? AND version = ?"
        )
        .bind(serde_json::to_string(&data)?)
        .bind(next_version)
        .bind(Utc::now())
        .bind(user_id)
        .bind(version)
        .execute(&mut *tx)
        .await?;

        if result.rows_affected() == 0 {
            return Err(StoreError::VersionConflict { expected: version, actual: version + 1 });
        }
        tx.commit().await?;

        log::debug!("user {} updated {:?} -> v{}", user_id, keys, next_version);
        Ok(next_version)
    }
}

fn strip_protected(map: &mut Map<String, Value>) {
    for key in PROTECTED_KEYS {
        map.remove(*key);
    }
}
