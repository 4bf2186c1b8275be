//! Execution sessions: the runtime binding of one strategy to one bot.
//!
//! `BotExecutionSession` carries the lifecycle state machine, counters,
//! and per-element scratch state. The controller (one task per session)
//! owns all mutation; the service routes commands and enforces one
//! controller per session id.

mod controller;
mod service;

pub use controller::{
    ControllerDeps, SessionCommand, SessionController, SessionHandle, StartSessionSpec,
};
pub use service::{ExecutionService, ServiceDeps, StatusSummary};

use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use std::fmt;
use uuid::Uuid;

use crate::config::BotExecutionConfig;
use crate::error::{EngineError, EngineResult};
use crate::evaluator::ScratchState;
use crate::ledger::BotPerformanceMetrics;
use crate::risk::SessionRuntimeCounters;

/// Session lifecycle states.
///
/// `idle → starting → running ⇄ paused → stopping → stopped`, with
/// `error` on unrecoverable failure and `completed` when a finite
/// schedule ends.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SessionStatus {
    Idle,
    Starting,
    Running,
    Paused,
    Stopping,
    Stopped,
    Completed,
    Error,
}

impl SessionStatus {
    pub fn is_terminal(&self) -> bool {
        matches!(
            self,
            SessionStatus::Stopped | SessionStatus::Completed | SessionStatus::Error
        )
    }
}

impl fmt::Display for SessionStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            SessionStatus::Idle => "idle",
            SessionStatus::Starting => "starting",
            SessionStatus::Running => "running",
            SessionStatus::Paused => "paused",
            SessionStatus::Stopping => "stopping",
            SessionStatus::Stopped => "stopped",
            SessionStatus::Completed => "completed",
            SessionStatus::Error => "error",
        };
        write!(f, "{}", s)
    }
}

/// What kind of funds a session trades.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ExecutionMode {
    Real,
    Paper,
    Backtest,
    Sandbox,
}

/// When a session evaluates its strategy.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum ExecutionFrequency {
    /// Re-tick as soon as the previous tick's execution work completes.
    Continuous,
    /// Tick every `interval_ms`, measured from tick start; overruns
    /// collapse instead of queueing.
    Interval { interval_ms: u64 },
    /// Tick once at each absolute time, then complete.
    Scheduled { times: Vec<DateTime<Utc>> },
    /// Tick only on externally delivered events.
    Triggered,
    /// Tick only via explicit manual trigger.
    Manual,
}

/// The runtime pairing of one strategy, one bot, and (for real trading)
/// one wallet. Mutated only by its owning controller.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct BotExecutionSession {
    pub id: Uuid,
    pub bot_id: Uuid,
    pub strategy_id: Uuid,
    pub user_id: Uuid,
    pub status: SessionStatus,
    pub mode: ExecutionMode,
    pub frequency: ExecutionFrequency,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub wallet_id: Option<Uuid>,
    pub created_at: DateTime<Utc>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub started_at: Option<DateTime<Utc>>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub last_active_at: Option<DateTime<Utc>>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub stopped_at: Option<DateTime<Utc>>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub next_execution_at: Option<DateTime<Utc>>,
    pub execution_count: u64,
    pub successful_executions: u64,
    pub failed_executions: u64,
    pub total_profit_usd: Decimal,
    /// Profit as a fraction of the configured capital base.
    pub total_profit_pct: Decimal,
    pub counters: SessionRuntimeCounters,
    pub config: BotExecutionConfig,
    #[serde(default)]
    pub metrics: BotPerformanceMetrics,
    /// Opaque per-element state the evaluator carries between ticks.
    #[serde(default)]
    pub scratch: ScratchState,
}

impl BotExecutionSession {
    /// Fresh session in `Starting`; only a start command creates one.
    pub fn new(
        bot_id: Uuid,
        strategy_id: Uuid,
        user_id: Uuid,
        mode: ExecutionMode,
        frequency: ExecutionFrequency,
        wallet_id: Option<Uuid>,
        config: BotExecutionConfig,
    ) -> Self {
        let now = Utc::now();
        Self {
            id: Uuid::new_v4(),
            bot_id,
            strategy_id,
            user_id,
            status: SessionStatus::Starting,
            mode,
            frequency,
            wallet_id,
            created_at: now,
            started_at: None,
            last_active_at: None,
            stopped_at: None,
            next_execution_at: None,
            execution_count: 0,
            successful_executions: 0,
            failed_executions: 0,
            total_profit_usd: Decimal::ZERO,
            total_profit_pct: Decimal::ZERO,
            counters: SessionRuntimeCounters::new(now.date_naive()),
            config,
            metrics: BotPerformanceMetrics::default(),
            scratch: ScratchState::default(),
        }
    }

    fn reject(&self, command: &'static str) -> EngineError {
        EngineError::StateTransition {
            status: self.status,
            command,
        }
    }

    /// starting → running.
    pub fn mark_running(&mut self) {
        self.status = SessionStatus::Running;
        self.started_at.get_or_insert_with(Utc::now);
    }

    /// Pause. Returns false for the idempotent already-paused no-op.
    pub fn apply_pause(&mut self) -> EngineResult<bool> {
        match self.status {
            SessionStatus::Running => {
                self.status = SessionStatus::Paused;
                Ok(true)
            }
            SessionStatus::Paused => Ok(false),
            _ => Err(self.reject("pause")),
        }
    }

    /// Resume. Returns false for the idempotent already-running no-op.
    pub fn apply_resume(&mut self) -> EngineResult<bool> {
        match self.status {
            SessionStatus::Paused => {
                self.status = SessionStatus::Running;
                Ok(true)
            }
            SessionStatus::Running => Ok(false),
            _ => Err(self.reject("resume")),
        }
    }

    /// Stop request: running/paused → stopping. Returns false when the
    /// session is already stopping or stopped.
    pub fn apply_stop_request(&mut self) -> EngineResult<bool> {
        match self.status {
            SessionStatus::Running | SessionStatus::Paused => {
                self.status = SessionStatus::Stopping;
                Ok(true)
            }
            SessionStatus::Stopping | SessionStatus::Stopped => Ok(false),
            _ => Err(self.reject("stop")),
        }
    }

    /// stopping → stopped, after any in-flight tick has finished.
    pub fn finish_stop(&mut self) {
        if self.status == SessionStatus::Stopping {
            self.status = SessionStatus::Stopped;
            self.stopped_at = Some(Utc::now());
        }
    }

    /// A finite schedule ran out.
    pub fn mark_completed(&mut self) {
        self.status = SessionStatus::Completed;
        self.stopped_at = Some(Utc::now());
    }

    /// Unrecoverable failure.
    pub fn mark_error(&mut self) {
        self.status = SessionStatus::Error;
        self.stopped_at = Some(Utc::now());
    }

    /// Fold one completed tick into the counters. Called exactly once per
    /// tick, including aborted and error ticks.
    pub fn record_tick(&mut self, success: bool) {
        self.execution_count += 1;
        if success {
            self.successful_executions += 1;
        } else {
            self.failed_executions += 1;
        }
        self.last_active_at = Some(Utc::now());
    }

    /// Fold a settled trade's realized profit into the session figures.
    pub fn record_profit(&mut self, profit_usd: Decimal) {
        self.total_profit_usd += profit_usd;
        if self.config.capital_base_usd > Decimal::ZERO {
            let delta_pct = profit_usd / self.config.capital_base_usd;
            self.total_profit_pct += delta_pct;
            self.counters.record_profit(delta_pct);
        }
    }
}
