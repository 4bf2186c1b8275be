//! The execution ledger: append-only log entries and trade records.
//!
//! SQLite-backed so history survives restarts. Append is the only
//! mutation (plus the single pending→terminal trade transition); sessions
//! append concurrently through a shared handle. Performance metrics fold
//! forward as trades settle instead of replaying history on read.

mod metrics;

pub use metrics::{BotPerformanceMetrics, PerformanceTracker};

use anyhow::Context;
use chrono::{DateTime, Utc};
use rusqlite::{params, Connection};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::path::Path;
use std::str::FromStr;
use std::sync::Mutex;
use tracing::{debug, info};
use uuid::Uuid;

use crate::error::{EngineError, EngineResult};
use crate::evaluator::TradeSide;
use crate::execution::{BotTrade, TradeStatus, TxStatus};
use crate::strategy::ElementId;

/// Severity of a ledger log entry.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum LogLevel {
    Debug,
    Info,
    Warning,
    Error,
    Critical,
}

impl LogLevel {
    pub fn as_str(&self) -> &'static str {
        match self {
            LogLevel::Debug => "debug",
            LogLevel::Info => "info",
            LogLevel::Warning => "warning",
            LogLevel::Error => "error",
            LogLevel::Critical => "critical",
        }
    }

    fn all() -> [LogLevel; 5] {
        [
            LogLevel::Debug,
            LogLevel::Info,
            LogLevel::Warning,
            LogLevel::Error,
            LogLevel::Critical,
        ]
    }
}

impl FromStr for LogLevel {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        LogLevel::all()
            .into_iter()
            .find(|level| level.as_str() == s)
            .ok_or_else(|| format!("unknown log level '{}'", s))
    }
}

/// Reference to an on-chain transaction attached to a log entry.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TxRef {
    pub hash: String,
    pub status: TxStatus,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub fee_usd: Option<Decimal>,
}

/// One append-only execution log entry. Never mutated after creation.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ExecutionLogEntry {
    pub session_id: Uuid,
    pub timestamp: DateTime<Utc>,
    pub level: LogLevel,
    pub message: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub details: Option<serde_json::Value>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub element_id: Option<ElementId>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub tx: Option<TxRef>,
}

impl ExecutionLogEntry {
    pub fn new(session_id: Uuid, level: LogLevel, message: impl Into<String>) -> Self {
        Self {
            session_id,
            timestamp: Utc::now(),
            level,
            message: message.into(),
            details: None,
            element_id: None,
            tx: None,
        }
    }

    pub fn with_details(mut self, details: serde_json::Value) -> Self {
        self.details = Some(details);
        self
    }

    pub fn with_element(mut self, element_id: impl Into<ElementId>) -> Self {
        self.element_id = Some(element_id.into());
        self
    }

    pub fn with_tx(mut self, tx: TxRef) -> Self {
        self.tx = Some(tx);
        self
    }
}

/// Log query filter; paginated, newest first.
#[derive(Debug, Clone, Default)]
pub struct LogFilter {
    pub session_id: Option<Uuid>,
    pub from: Option<DateTime<Utc>>,
    pub to: Option<DateTime<Utc>>,
    pub min_level: Option<LogLevel>,
    pub element_id: Option<ElementId>,
    pub limit: Option<usize>,
    pub offset: usize,
}

/// Trade query filter; paginated, newest first.
#[derive(Debug, Clone, Default)]
pub struct TradeFilter {
    pub session_id: Option<Uuid>,
    pub from: Option<DateTime<Utc>>,
    pub to: Option<DateTime<Utc>>,
    pub status: Option<TradeStatus>,
    pub limit: Option<usize>,
    pub offset: usize,
}

const DEFAULT_PAGE: usize = 100;

/// SQLite-backed append-only store plus per-session metric trackers.
pub struct ExecutionLedger {
    conn: Mutex<Connection>,
    trackers: Mutex<HashMap<Uuid, PerformanceTracker>>,
}

impl ExecutionLedger {
    /// Open (or create) the ledger database.
    pub fn open<P: AsRef<Path>>(db_path: P) -> anyhow::Result<Self> {
        let conn = Connection::open(db_path.as_ref())
            .with_context(|| format!("Failed to open ledger at {:?}", db_path.as_ref()))?;
        let ledger = Self {
            conn: Mutex::new(conn),
            trackers: Mutex::new(HashMap::new()),
        };
        ledger.init_schema()?;
        info!("Execution ledger initialized at {:?}", db_path.as_ref());
        Ok(ledger)
    }

    /// In-memory ledger for tests and sandbox runs.
    pub fn open_in_memory() -> anyhow::Result<Self> {
        let ledger = Self {
            conn: Mutex::new(Connection::open_in_memory()?),
            trackers: Mutex::new(HashMap::new()),
        };
        ledger.init_schema()?;
        Ok(ledger)
    }

    fn init_schema(&self) -> anyhow::Result<()> {
        let conn = self.conn.lock().expect("ledger mutex poisoned");
        conn.execute_batch(
            r#"
            -- Execution log (append-only)
            CREATE TABLE IF NOT EXISTS execution_log (
                id INTEGER PRIMARY KEY AUTOINCREMENT,
                session_id TEXT NOT NULL,
                timestamp TEXT NOT NULL,
                level TEXT NOT NULL,
                message TEXT NOT NULL,
                details TEXT,
                element_id TEXT,
                tx_hash TEXT,
                tx_status TEXT,
                tx_fee_usd TEXT
            );
            CREATE INDEX IF NOT EXISTS idx_log_session ON execution_log(session_id);
            CREATE INDEX IF NOT EXISTS idx_log_timestamp ON execution_log(timestamp);

            -- Trade records (append-only; one pending->terminal transition)
            CREATE TABLE IF NOT EXISTS trades (
                id TEXT PRIMARY KEY,
                session_id TEXT NOT NULL,
                bot_id TEXT NOT NULL,
                strategy_id TEXT NOT NULL,
                wallet_id TEXT,
                timestamp TEXT NOT NULL,
                side TEXT NOT NULL,
                status TEXT NOT NULL,
                pair TEXT NOT NULL,
                amount TEXT NOT NULL,
                price TEXT,
                usd_value TEXT,
                profit_usd TEXT,
                profit_pct TEXT,
                tx_hash TEXT,
                gas_used_gwei TEXT,
                gas_price_gwei TEXT,
                fee_usd TEXT,
                network TEXT NOT NULL,
                error TEXT,
                duration_ms INTEGER NOT NULL
            );
            CREATE INDEX IF NOT EXISTS idx_trades_session ON trades(session_id);
            CREATE INDEX IF NOT EXISTS idx_trades_timestamp ON trades(timestamp);
            "#,
        )?;
        debug!("Ledger schema initialized");
        Ok(())
    }

    /// Append one log entry.
    pub fn append_log(&self, entry: &ExecutionLogEntry) -> EngineResult<()> {
        let conn = self.conn.lock().expect("ledger mutex poisoned");
        conn.execute(
            r#"
            INSERT INTO execution_log (session_id, timestamp, level, message, details,
                                       element_id, tx_hash, tx_status, tx_fee_usd)
            VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9)
            "#,
            params![
                entry.session_id.to_string(),
                entry.timestamp.to_rfc3339(),
                entry.level.as_str(),
                entry.message,
                entry.details.as_ref().map(|d| d.to_string()),
                entry.element_id,
                entry.tx.as_ref().map(|t| t.hash.clone()),
                entry.tx.as_ref().map(|t| format!("{:?}", t.status).to_lowercase()),
                entry.tx.as_ref().and_then(|t| t.fee_usd).map(|f| f.to_string()),
            ],
        )?;
        Ok(())
    }

    /// Append one trade record; terminal trades fold into the session's
    /// metrics immediately.
    pub fn append_trade(&self, trade: &BotTrade) -> EngineResult<()> {
        {
            let conn = self.conn.lock().expect("ledger mutex poisoned");
            conn.execute(
                r#"
                INSERT INTO trades (id, session_id, bot_id, strategy_id, wallet_id, timestamp,
                                    side, status, pair, amount, price, usd_value, profit_usd,
                                    profit_pct, tx_hash, gas_used_gwei, gas_price_gwei, fee_usd,
                                    network, error, duration_ms)
                VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10, ?11, ?12, ?13, ?14, ?15, ?16,
                        ?17, ?18, ?19, ?20, ?21)
                "#,
                params![
                    trade.id.to_string(),
                    trade.session_id.to_string(),
                    trade.bot_id.to_string(),
                    trade.strategy_id.to_string(),
                    trade.wallet_id.map(|w| w.to_string()),
                    trade.timestamp.to_rfc3339(),
                    format!("{:?}", trade.side).to_lowercase(),
                    trade.status.as_str(),
                    trade.pair,
                    trade.amount.to_string(),
                    trade.price.map(|v| v.to_string()),
                    trade.usd_value.map(|v| v.to_string()),
                    trade.profit_usd.map(|v| v.to_string()),
                    trade.profit_pct.map(|v| v.to_string()),
                    trade.tx_hash,
                    trade.gas_used_gwei.map(|v| v.to_string()),
                    trade.gas_price_gwei.map(|v| v.to_string()),
                    trade.fee_usd.map(|v| v.to_string()),
                    trade.network,
                    trade.error,
                    trade.duration_ms,
                ],
            )?;
        }

        if trade.status.is_terminal() {
            self.track(trade);
        }
        Ok(())
    }

    /// Apply the single pending→terminal transition to a stored trade.
    ///
    /// Rejected if the stored row already reached a terminal status.
    pub fn finalize_trade(&self, trade: &BotTrade) -> EngineResult<()> {
        if !trade.status.is_terminal() {
            return Err(EngineError::InvalidConfig(
                "finalize_trade requires a terminal status".to_string(),
            ));
        }
        let updated = {
            let conn = self.conn.lock().expect("ledger mutex poisoned");
            conn.execute(
                r#"
                UPDATE trades
                SET status = ?2, profit_usd = ?3, profit_pct = ?4, tx_hash = ?5,
                    gas_used_gwei = ?6, fee_usd = ?7, error = ?8, duration_ms = ?9
                WHERE id = ?1 AND status = 'pending'
                "#,
                params![
                    trade.id.to_string(),
                    trade.status.as_str(),
                    trade.profit_usd.map(|v| v.to_string()),
                    trade.profit_pct.map(|v| v.to_string()),
                    trade.tx_hash,
                    trade.gas_used_gwei.map(|v| v.to_string()),
                    trade.fee_usd.map(|v| v.to_string()),
                    trade.error,
                    trade.duration_ms,
                ],
            )?
        };
        if updated == 0 {
            return Err(EngineError::TradeAlreadyTerminal(trade.id));
        }
        self.track(trade);
        Ok(())
    }

    fn track(&self, trade: &BotTrade) {
        let mut trackers = self.trackers.lock().expect("tracker mutex poisoned");
        trackers
            .entry(trade.session_id)
            .or_default()
            .record(trade);
    }

    /// Aggregate metrics for a session.
    pub fn metrics(&self, session_id: Uuid) -> BotPerformanceMetrics {
        self.trackers
            .lock()
            .expect("tracker mutex poisoned")
            .get(&session_id)
            .map(|tracker| tracker.snapshot())
            .unwrap_or_default()
    }

    /// Query log entries, newest first.
    pub fn query_logs(&self, filter: &LogFilter) -> EngineResult<Vec<ExecutionLogEntry>> {
        let mut sql = String::from(
            "SELECT session_id, timestamp, level, message, details, element_id, \
             tx_hash, tx_status, tx_fee_usd FROM execution_log WHERE 1=1",
        );
        let mut args: Vec<String> = Vec::new();

        if let Some(session_id) = filter.session_id {
            args.push(session_id.to_string());
            sql.push_str(&format!(" AND session_id = ?{}", args.len()));
        }
        if let Some(from) = filter.from {
            args.push(from.to_rfc3339());
            sql.push_str(&format!(" AND timestamp >= ?{}", args.len()));
        }
        if let Some(to) = filter.to {
            args.push(to.to_rfc3339());
            sql.push_str(&format!(" AND timestamp <= ?{}", args.len()));
        }
        if let Some(element_id) = &filter.element_id {
            args.push(element_id.clone());
            sql.push_str(&format!(" AND element_id = ?{}", args.len()));
        }
        if let Some(min_level) = filter.min_level {
            let allowed: Vec<String> = LogLevel::all()
                .into_iter()
                .filter(|level| *level >= min_level)
                .map(|level| format!("'{}'", level.as_str()))
                .collect();
            sql.push_str(&format!(" AND level IN ({})", allowed.join(",")));
        }

        sql.push_str(&format!(
            " ORDER BY id DESC LIMIT {} OFFSET {}",
            filter.limit.unwrap_or(DEFAULT_PAGE),
            filter.offset
        ));

        let conn = self.conn.lock().expect("ledger mutex poisoned");
        let mut stmt = conn.prepare(&sql)?;
        let rows = stmt.query_map(rusqlite::params_from_iter(args.iter()), |row| {
            let session_id: String = row.get(0)?;
            let timestamp: String = row.get(1)?;
            let level: String = row.get(2)?;
            let details: Option<String> = row.get(4)?;
            let tx_hash: Option<String> = row.get(6)?;
            let tx_status: Option<String> = row.get(7)?;
            let tx_fee: Option<String> = row.get(8)?;

            Ok(ExecutionLogEntry {
                session_id: Uuid::parse_str(&session_id).unwrap_or_default(),
                timestamp: parse_timestamp(&timestamp),
                level: level.parse().unwrap_or(LogLevel::Info),
                message: row.get(3)?,
                details: details.and_then(|d| serde_json::from_str(&d).ok()),
                element_id: row.get(5)?,
                tx: tx_hash.map(|hash| TxRef {
                    hash,
                    status: match tx_status.as_deref() {
                        Some("confirmed") => TxStatus::Confirmed,
                        Some("failed") => TxStatus::Failed,
                        _ => TxStatus::Pending,
                    },
                    fee_usd: tx_fee.and_then(|f| Decimal::from_str(&f).ok()),
                }),
            })
        })?;

        Ok(rows.filter_map(|r| r.ok()).collect())
    }

    /// Query trade records, newest first.
    pub fn query_trades(&self, filter: &TradeFilter) -> EngineResult<Vec<BotTrade>> {
        let mut sql = String::from(
            "SELECT id, session_id, bot_id, strategy_id, wallet_id, timestamp, side, status, \
             pair, amount, price, usd_value, profit_usd, profit_pct, tx_hash, gas_used_gwei, \
             gas_price_gwei, fee_usd, network, error, duration_ms FROM trades WHERE 1=1",
        );
        let mut args: Vec<String> = Vec::new();

        if let Some(session_id) = filter.session_id {
            args.push(session_id.to_string());
            sql.push_str(&format!(" AND session_id = ?{}", args.len()));
        }
        if let Some(from) = filter.from {
            args.push(from.to_rfc3339());
            sql.push_str(&format!(" AND timestamp >= ?{}", args.len()));
        }
        if let Some(to) = filter.to {
            args.push(to.to_rfc3339());
            sql.push_str(&format!(" AND timestamp <= ?{}", args.len()));
        }
        if let Some(status) = filter.status {
            args.push(status.as_str().to_string());
            sql.push_str(&format!(" AND status = ?{}", args.len()));
        }

        sql.push_str(&format!(
            " ORDER BY timestamp DESC LIMIT {} OFFSET {}",
            filter.limit.unwrap_or(DEFAULT_PAGE),
            filter.offset
        ));

        let conn = self.conn.lock().expect("ledger mutex poisoned");
        let mut stmt = conn.prepare(&sql)?;
        let rows = stmt.query_map(rusqlite::params_from_iter(args.iter()), |row| {
            Ok(BotTrade {
                id: parse_uuid(row.get::<_, String>(0)?),
                session_id: parse_uuid(row.get::<_, String>(1)?),
                bot_id: parse_uuid(row.get::<_, String>(2)?),
                strategy_id: parse_uuid(row.get::<_, String>(3)?),
                wallet_id: row.get::<_, Option<String>>(4)?.map(parse_uuid),
                timestamp: parse_timestamp(&row.get::<_, String>(5)?),
                side: match row.get::<_, String>(6)?.as_str() {
                    "sell" => TradeSide::Sell,
                    "swap" => TradeSide::Swap,
                    _ => TradeSide::Buy,
                },
                status: row
                    .get::<_, String>(7)?
                    .parse()
                    .unwrap_or(TradeStatus::Pending),
                pair: row.get(8)?,
                amount: parse_decimal(row.get::<_, String>(9)?),
                price: row.get::<_, Option<String>>(10)?.map(parse_decimal),
                usd_value: row.get::<_, Option<String>>(11)?.map(parse_decimal),
                profit_usd: row.get::<_, Option<String>>(12)?.map(parse_decimal),
                profit_pct: row.get::<_, Option<String>>(13)?.map(parse_decimal),
                tx_hash: row.get(14)?,
                gas_used_gwei: row.get::<_, Option<String>>(15)?.map(parse_decimal),
                gas_price_gwei: row.get::<_, Option<String>>(16)?.map(parse_decimal),
                fee_usd: row.get::<_, Option<String>>(17)?.map(parse_decimal),
                network: row.get(18)?,
                error: row.get(19)?,
                duration_ms: row.get(20)?,
            })
        })?;

        Ok(rows.filter_map(|r| r.ok()).collect())
    }

    /// Count log entries for a session (all levels).
    pub fn log_count(&self, session_id: Uuid) -> EngineResult<u64> {
        let conn = self.conn.lock().expect("ledger mutex poisoned");
        let count: i64 = conn.query_row(
            "SELECT COUNT(*) FROM execution_log WHERE session_id = ?1",
            params![session_id.to_string()],
            |row| row.get(0),
        )?;
        Ok(count as u64)
    }
}

fn parse_uuid(s: String) -> Uuid {
    Uuid::parse_str(&s).unwrap_or_default()
}

fn parse_decimal(s: String) -> Decimal {
    Decimal::from_str(&s).unwrap_or_default()
}

fn parse_timestamp(s: &str) -> DateTime<Utc> {
    DateTime::parse_from_rfc3339(s)
        .map(|dt| dt.with_timezone(&Utc))
        .unwrap_or_else(|_| Utc::now())
}
