//! Persisted bridge state: one active-session row per user, plus the
//! per-user working directory remembered across restarts.

use std::path::Path;
use std::sync::Mutex;
use std::time::{SystemTime, UNIX_EPOCH};

use rusqlite::{params, Connection, OptionalExtension, Transaction};
use thiserror::Error;

const CURRENT_SCHEMA_VERSION: u32 = 1;

#[derive(Debug, Error)]
pub enum StoreError {
    #[error("store persistence error: {0}")]
    Persistence(String),
    #[error("store schema version {found} is newer than supported version {supported}")]
    UnsupportedSchemaVersion { supported: u32, found: u32 },
}

pub type StoreResult<T> = Result<T, StoreError>;

/// Active session persisted for one user. At most one row per `user_id`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BotSessionRecord {
    pub user_id: i64,
    pub session_id: String,
    pub directory: String,
    pub model: Option<String>,
    pub betas: Option<Vec<String>>,
    pub last_active_ms: i64,
}

pub struct SessionStore {
    conn: Mutex<Connection>,
}

impl SessionStore {
    pub fn open(path: impl AsRef<Path>) -> StoreResult<Self> {
        let conn = Connection::open(path).map_err(|err| StoreError::Persistence(err.to_string()))?;
        conn.pragma_update(None, "journal_mode", "WAL")
            .map_err(|err| StoreError::Persistence(err.to_string()))?;
        let store = Self {
            conn: Mutex::new(conn),
        };
        store.bootstrap()?;
        Ok(store)
    }

    pub fn in_memory() -> StoreResult<Self> {
        let conn = Connection::open_in_memory()
            .map_err(|err| StoreError::Persistence(err.to_string()))?;
        let store = Self {
            conn: Mutex::new(conn),
        };
        store.bootstrap()?;
        Ok(store)
    }

    /// Whole-row replace; `last_active` is set to now.
    pub fn upsert(
        &self,
        user_id: i64,
        session_id: &str,
        directory: &str,
        model: Option<&str>,
        betas: Option<&[String]>,
    ) -> StoreResult<()> {
        let betas_json = match betas {
            Some(betas) => Some(
                serde_json::to_string(betas)
                    .map_err(|err| StoreError::Persistence(err.to_string()))?,
            ),
            None => None,
        };

        self.with_conn(|conn| {
            conn.execute(
                "
                INSERT INTO bot_sessions (user_id, session_id, directory, model, betas, last_active_ms)
                VALUES (?1, ?2, ?3, ?4, ?5, ?6)
                ON CONFLICT(user_id) DO UPDATE SET
                    session_id = excluded.session_id,
                    directory = excluded.directory,
                    model = excluded.model,
                    betas = excluded.betas,
                    last_active_ms = excluded.last_active_ms
                ",
                params![user_id, session_id, directory, model, betas_json, now_ms()],
            )
            .map_err(|err| StoreError::Persistence(err.to_string()))?;
            Ok(())
        })
    }

    pub fn get_by_user(&self, user_id: i64) -> StoreResult<Option<BotSessionRecord>> {
        self.with_conn(|conn| {
            conn.query_row(
                "
                SELECT user_id, session_id, directory, model, betas, last_active_ms
                FROM bot_sessions
                WHERE user_id = ?1
                ",
                params![user_id],
                |row| {
                    let betas_json: Option<String> = row.get(4)?;
                    Ok(BotSessionRecord {
                        user_id: row.get(0)?,
                        session_id: row.get(1)?,
                        directory: row.get(2)?,
                        model: row.get(3)?,
                        betas: betas_json
                            .map(|raw| serde_json::from_str(&raw))
                            .transpose()
                            .map_err(|err| {
                                rusqlite::Error::FromSqlConversionFailure(
                                    4,
                                    rusqlite::types::Type::Text,
                                    Box::new(err),
                                )
                            })?,
                        last_active_ms: row.get(5)?,
                    })
                },
            )
            .optional()
            .map_err(|err| StoreError::Persistence(err.to_string()))
        })
    }

    pub fn delete(&self, user_id: i64) -> StoreResult<()> {
        self.with_conn(|conn| {
            conn.execute("DELETE FROM bot_sessions WHERE user_id = ?1", params![user_id])
                .map_err(|err| StoreError::Persistence(err.to_string()))?;
            Ok(())
        })
    }

    /// Remove rows whose `last_active` is older than the horizon; returns the
    /// number of rows deleted.
    pub fn cleanup_expired(&self, max_age_hours: u64) -> StoreResult<usize> {
        let cutoff = now_ms() - (max_age_hours as i64).saturating_mul(3_600_000);
        self.with_conn(|conn| {
            let deleted = conn
                .execute(
                    "DELETE FROM bot_sessions WHERE last_active_ms < ?1",
                    params![cutoff],
                )
                .map_err(|err| StoreError::Persistence(err.to_string()))?;
            if deleted > 0 {
                tracing::info!(deleted, max_age_hours, "expired bot sessions removed");
            }
            Ok(deleted)
        })
    }

    pub fn set_current_directory(&self, user_id: i64, directory: &str) -> StoreResult<()> {
        self.with_conn(|conn| {
            conn.execute(
                "
                INSERT INTO users (user_id, current_directory)
                VALUES (?1, ?2)
                ON CONFLICT(user_id) DO UPDATE SET
                    current_directory = excluded.current_directory
                ",
                params![user_id, directory],
            )
            .map_err(|err| StoreError::Persistence(err.to_string()))?;
            Ok(())
        })
    }

    pub fn current_directory(&self, user_id: i64) -> StoreResult<Option<String>> {
        self.with_conn(|conn| {
            conn.query_row(
                "SELECT current_directory FROM users WHERE user_id = ?1",
                params![user_id],
                |row| row.get::<_, Option<String>>(0),
            )
            .optional()
            .map_err(|err| StoreError::Persistence(err.to_string()))
            .map(Option::flatten)
        })
    }

    fn with_conn<T>(&self, f: impl FnOnce(&mut Connection) -> StoreResult<T>) -> StoreResult<T> {
        let mut conn = self
            .conn
            .lock()
            .map_err(|_| StoreError::Persistence("store connection mutex poisoned".to_owned()))?;
        f(&mut conn)
    }

    fn bootstrap(&self) -> StoreResult<()> {
        self.with_conn(|conn| {
            let current = current_schema_version(conn)?;
            if current > CURRENT_SCHEMA_VERSION {
                return Err(StoreError::UnsupportedSchemaVersion {
                    supported: CURRENT_SCHEMA_VERSION,
                    found: current,
                });
            }

            for version in (current + 1)..=CURRENT_SCHEMA_VERSION {
                let tx = conn
                    .transaction()
                    .map_err(|err| StoreError::Persistence(err.to_string()))?;
                apply_migration(&tx, version)?;
                tx.execute(
                    "INSERT INTO schema_migrations (version, applied_at_ms) VALUES (?1, ?2)",
                    params![version, now_ms()],
                )
                .map_err(|err| StoreError::Persistence(err.to_string()))?;
                tx.commit()
                    .map_err(|err| StoreError::Persistence(err.to_string()))?;
            }
            Ok(())
        })
    }
}

fn current_schema_version(conn: &Connection) -> StoreResult<u32> {
    let has_migrations: Option<()> = conn
        .query_row(
            "SELECT 1 FROM sqlite_master WHERE type = 'table' AND name = 'schema_migrations' LIMIT 1",
            [],
            |_| Ok(()),
        )
        .optional()
        .map_err(|err| StoreError::Persistence(err.to_string()))?;
    if has_migrations.is_none() {
        return Ok(0);
    }

    conn.query_row(
        "SELECT COALESCE(MAX(version), 0) FROM schema_migrations",
        [],
        |row| row.get(0),
    )
    .map_err(|err| StoreError::Persistence(err.to_string()))
}

fn apply_migration(tx: &Transaction<'_>, version: u32) -> StoreResult<()> {
    match version {
        1 => tx
            .execute_batch(
                "
                CREATE TABLE schema_migrations (
                    version INTEGER PRIMARY KEY,
                    applied_at_ms INTEGER NOT NULL
                );

                CREATE TABLE bot_sessions (
                    user_id INTEGER PRIMARY KEY,
                    session_id TEXT NOT NULL,
                    directory TEXT NOT NULL,
                    model TEXT,
                    betas TEXT,
                    last_active_ms INTEGER NOT NULL
                );

                CREATE TABLE users (
                    user_id INTEGER PRIMARY KEY,
                    current_directory TEXT
                );

                CREATE INDEX idx_bot_sessions_last_active ON bot_sessions(last_active_ms);
                ",
            )
            .map_err(|err| StoreError::Persistence(err.to_string())),
        _ => Err(StoreError::Persistence(format!(
            "no migration implementation for version {version}"
        ))),
    }
}

fn now_ms() -> i64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|elapsed| elapsed.as_millis() as i64)
        .unwrap_or(0)
}
