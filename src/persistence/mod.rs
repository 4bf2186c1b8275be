//! SQLite persistence for sessions and strategies.
//!
//! Persists state to survive restarts:
//! - Session snapshots (status, counters, scratch state, config)
//! - Strategy graphs
//!
//! The ledger owns trade/log history; this store only carries what a
//! controller needs to resume exactly where it left off.

use anyhow::{Context, Result};
use rusqlite::{params, Connection, OptionalExtension};
use std::path::Path;
use std::sync::Mutex;
use tracing::{debug, info};
use uuid::Uuid;

use crate::error::EngineResult;
use crate::session::BotExecutionSession;
use crate::strategy::Strategy;

/// SQLite-backed store for session and strategy snapshots.
pub struct SessionStore {
    conn: Mutex<Connection>,
}

impl SessionStore {
    /// Open (or create) the store database.
    pub fn open<P: AsRef<Path>>(db_path: P) -> Result<Self> {
        let conn = Connection::open(db_path.as_ref())
            .with_context(|| format!("Failed to open session store at {:?}", db_path.as_ref()))?;
        let store = Self {
            conn: Mutex::new(conn),
        };
        store.init_schema()?;
        info!("Session store initialized at {:?}", db_path.as_ref());
        Ok(store)
    }

    /// In-memory store for tests.
    pub fn open_in_memory() -> Result<Self> {
        let store = Self {
            conn: Mutex::new(Connection::open_in_memory()?),
        };
        store.init_schema()?;
        Ok(store)
    }

    fn init_schema(&self) -> Result<()> {
        let conn = self.conn.lock().expect("store mutex poisoned");
        conn.execute_batch(
            r#"
            CREATE TABLE IF NOT EXISTS sessions (
                id TEXT PRIMARY KEY,
                user_id TEXT NOT NULL,
                bot_id TEXT NOT NULL,
                status TEXT NOT NULL,
                body TEXT NOT NULL,
                updated_at TEXT NOT NULL
            );
            CREATE INDEX IF NOT EXISTS idx_sessions_user ON sessions(user_id);

            CREATE TABLE IF NOT EXISTS strategies (
                id TEXT PRIMARY KEY,
                owner TEXT NOT NULL,
                body TEXT NOT NULL,
                updated_at TEXT NOT NULL
            );
            CREATE INDEX IF NOT EXISTS idx_strategies_owner ON strategies(owner);
            "#,
        )?;
        debug!("Session store schema initialized");
        Ok(())
    }

    /// Upsert a session snapshot.
    pub fn save_session(&self, session: &BotExecutionSession) -> EngineResult<()> {
        let body = serde_json::to_string(session)?;
        let conn = self.conn.lock().expect("store mutex poisoned");
        conn.execute(
            r#"
            INSERT INTO sessions (id, user_id, bot_id, status, body, updated_at)
            VALUES (?1, ?2, ?3, ?4, ?5, ?6)
            ON CONFLICT(id) DO UPDATE SET
                status = ?4,
                body = ?5,
                updated_at = ?6
            "#,
            params![
                session.id.to_string(),
                session.user_id.to_string(),
                session.bot_id.to_string(),
                session.status.to_string(),
                body,
                chrono::Utc::now().to_rfc3339(),
            ],
        )?;
        Ok(())
    }

    /// Load one session snapshot exactly as last persisted.
    pub fn load_session(&self, session_id: Uuid) -> EngineResult<Option<BotExecutionSession>> {
        let conn = self.conn.lock().expect("store mutex poisoned");
        let body: Option<String> = conn
            .query_row(
                "SELECT body FROM sessions WHERE id = ?1",
                params![session_id.to_string()],
                |row| row.get(0),
            )
            .optional()?;
        match body {
            Some(body) => Ok(Some(serde_json::from_str(&body)?)),
            None => Ok(None),
        }
    }

    /// All persisted sessions for a user.
    pub fn list_sessions(&self, user_id: Uuid) -> EngineResult<Vec<BotExecutionSession>> {
        let conn = self.conn.lock().expect("store mutex poisoned");
        let mut stmt = conn.prepare("SELECT body FROM sessions WHERE user_id = ?1")?;
        let rows = stmt.query_map(params![user_id.to_string()], |row| {
            row.get::<_, String>(0)
        })?;
        Ok(rows
            .filter_map(|r| r.ok())
            .filter_map(|body| serde_json::from_str(&body).ok())
            .collect())
    }

    /// Every persisted session, most recently updated first.
    pub fn list_all_sessions(&self) -> EngineResult<Vec<BotExecutionSession>> {
        let conn = self.conn.lock().expect("store mutex poisoned");
        let mut stmt = conn.prepare("SELECT body FROM sessions ORDER BY updated_at DESC")?;
        let rows = stmt.query_map([], |row| row.get::<_, String>(0))?;
        Ok(rows
            .filter_map(|r| r.ok())
            .filter_map(|body| serde_json::from_str(&body).ok())
            .collect())
    }

    pub fn delete_session(&self, session_id: Uuid) -> EngineResult<()> {
        let conn = self.conn.lock().expect("store mutex poisoned");
        conn.execute(
            "DELETE FROM sessions WHERE id = ?1",
            params![session_id.to_string()],
        )?;
        Ok(())
    }

    /// Upsert a strategy graph.
    pub fn save_strategy(&self, strategy: &Strategy) -> EngineResult<()> {
        let body = serde_json::to_string(strategy)?;
        let conn = self.conn.lock().expect("store mutex poisoned");
        conn.execute(
            r#"
            INSERT INTO strategies (id, owner, body, updated_at)
            VALUES (?1, ?2, ?3, ?4)
            ON CONFLICT(id) DO UPDATE SET
                owner = ?2,
                body = ?3,
                updated_at = ?4
            "#,
            params![
                strategy.id.to_string(),
                strategy.owner.to_string(),
                body,
                chrono::Utc::now().to_rfc3339(),
            ],
        )?;
        Ok(())
    }

    pub fn load_strategy(&self, strategy_id: Uuid) -> EngineResult<Option<Strategy>> {
        let conn = self.conn.lock().expect("store mutex poisoned");
        let body: Option<String> = conn
            .query_row(
                "SELECT body FROM strategies WHERE id = ?1",
                params![strategy_id.to_string()],
                |row| row.get(0),
            )
            .optional()?;
        match body {
            Some(body) => Ok(Some(serde_json::from_str(&body)?)),
            None => Ok(None),
        }
    }

    pub fn delete_strategy(&self, strategy_id: Uuid) -> EngineResult<()> {
        let conn = self.conn.lock().expect("store mutex poisoned");
        conn.execute(
            "DELETE FROM strategies WHERE id = ?1",
            params![strategy_id.to_string()],
        )?;
        Ok(())
    }
}
