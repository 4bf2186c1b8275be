//! The multi-session command surface.
//!
//! Owns the registry of live controllers (one per session id — the
//! mutual-exclusion point), routes commands, restores persisted sessions,
//! and serves the aggregate reads the presentation layer consumes.

use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::sync::Arc;
use tokio::sync::Mutex;
use tracing::info;
use uuid::Uuid;

use super::controller::{ControllerDeps, SessionController, SessionHandle, StartSessionSpec};
use super::{BotExecutionSession, ExecutionMode, SessionStatus};
use crate::config::ConfigPatch;
use crate::error::{EngineError, EngineResult};
use crate::execution::ExecutionVenue;
use crate::ledger::{
    BotPerformanceMetrics, ExecutionLedger, ExecutionLogEntry, LogFilter, TradeFilter,
};
use crate::market::MarketDataFeed;
use crate::notify::NotificationDispatcher;
use crate::persistence::SessionStore;
use crate::strategy::Strategy;

/// Everything the service wires into controllers.
pub struct ServiceDeps {
    pub feed: Arc<dyn MarketDataFeed>,
    /// Venue for real-money sessions; absent in paper-only deployments.
    pub real_venue: Option<Arc<dyn ExecutionVenue>>,
    /// Venue for paper/backtest/sandbox sessions.
    pub paper_venue: Arc<dyn ExecutionVenue>,
    pub ledger: Arc<ExecutionLedger>,
    pub store: Option<Arc<SessionStore>>,
    pub notifier: Arc<dyn NotificationDispatcher>,
}

/// Aggregate view over a user's sessions.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct StatusSummary {
    pub total_sessions: usize,
    pub running: usize,
    pub paused: usize,
    pub stopped: usize,
    pub completed: usize,
    pub error: usize,
    pub total_executions: u64,
    pub total_profit_usd: Decimal,
}

/// Routes commands to per-session controllers.
pub struct ExecutionService {
    deps: ServiceDeps,
    sessions: Mutex<HashMap<Uuid, Arc<SessionHandle>>>,
}

impl ExecutionService {
    pub fn new(deps: ServiceDeps) -> Self {
        Self {
            deps,
            sessions: Mutex::new(HashMap::new()),
        }
    }

    fn controller_deps(&self, mode: ExecutionMode) -> EngineResult<ControllerDeps> {
        let venue = match mode {
            ExecutionMode::Real => self.deps.real_venue.clone().ok_or_else(|| {
                EngineError::InvalidConfig("no live execution venue configured".to_string())
            })?,
            _ => self.deps.paper_venue.clone(),
        };
        Ok(ControllerDeps {
            feed: self.deps.feed.clone(),
            venue,
            ledger: self.deps.ledger.clone(),
            store: self.deps.store.clone(),
            notifier: self.deps.notifier.clone(),
        })
    }

    /// Start a new execution session for a strategy.
    pub async fn start_session(
        &self,
        spec: StartSessionSpec,
        strategy: Strategy,
    ) -> EngineResult<BotExecutionSession> {
        let deps = self.controller_deps(spec.mode)?;
        if let Some(store) = &self.deps.store {
            store.save_strategy(&strategy)?;
        }

        let handle = SessionController::start(spec, strategy, deps)?;
        let snapshot = handle.snapshot().await?;

        let mut sessions = self.sessions.lock().await;
        sessions.retain(|_, h| !h.is_finished());
        sessions.insert(handle.session_id, Arc::new(handle));
        info!(session = %snapshot.id, "session registered");
        Ok(snapshot)
    }

    /// Restore a persisted session into a paused controller.
    pub async fn restore_session(&self, session_id: Uuid) -> EngineResult<BotExecutionSession> {
        let store = self
            .deps
            .store
            .as_ref()
            .ok_or_else(|| {
                EngineError::InvalidConfig("no session store configured".to_string())
            })?
            .clone();

        let mut sessions = self.sessions.lock().await;
        sessions.retain(|_, h| !h.is_finished());
        if sessions.contains_key(&session_id) {
            return Err(EngineError::SessionBusy(session_id));
        }

        let session = store
            .load_session(session_id)?
            .ok_or(EngineError::SessionNotFound(session_id))?;
        let strategy = store
            .load_strategy(session.strategy_id)?
            .ok_or(EngineError::SessionNotFound(session_id))?;

        let deps = self.controller_deps(session.mode)?;
        let handle = SessionController::resume_from_store(session, strategy, deps)?;
        let snapshot = handle.snapshot().await?;
        sessions.insert(handle.session_id, Arc::new(handle));
        Ok(snapshot)
    }

    async fn handle(&self, session_id: Uuid) -> EngineResult<Arc<SessionHandle>> {
        self.sessions
            .lock()
            .await
            .get(&session_id)
            .cloned()
            .ok_or(EngineError::SessionNotFound(session_id))
    }

    pub async fn pause(&self, session_id: Uuid) -> EngineResult<BotExecutionSession> {
        self.handle(session_id).await?.pause().await
    }

    pub async fn resume(&self, session_id: Uuid) -> EngineResult<BotExecutionSession> {
        self.handle(session_id).await?.resume().await
    }

    pub async fn stop(&self, session_id: Uuid) -> EngineResult<BotExecutionSession> {
        self.handle(session_id).await?.stop().await
    }

    pub async fn trigger_manual(&self, session_id: Uuid) -> EngineResult<BotExecutionSession> {
        self.handle(session_id).await?.trigger_manual().await
    }

    pub async fn update_config(
        &self,
        session_id: Uuid,
        patch: ConfigPatch,
    ) -> EngineResult<BotExecutionSession> {
        self.handle(session_id).await?.update_config(patch).await
    }

    pub async fn get_session(&self, session_id: Uuid) -> EngineResult<BotExecutionSession> {
        self.handle(session_id).await?.snapshot().await
    }

    /// Deliver an external event to a `Triggered` session.
    pub async fn trigger_event(&self, session_id: Uuid) -> EngineResult<()> {
        let handle = self.handle(session_id).await?;
        if handle.trigger_event() {
            Ok(())
        } else {
            Err(EngineError::ControllerGone(session_id))
        }
    }

    /// Remove a terminal session from the registry and the store.
    pub async fn delete_session(&self, session_id: Uuid) -> EngineResult<()> {
        let mut sessions = self.sessions.lock().await;
        if let Some(handle) = sessions.get(&session_id) {
            match handle.snapshot().await {
                Ok(snapshot) if !snapshot.status.is_terminal() => {
                    return Err(EngineError::SessionStillActive(session_id));
                }
                // Terminal or already-gone controller: safe to drop.
                _ => {}
            }
            sessions.remove(&session_id);
        }
        if let Some(store) = &self.deps.store {
            store.delete_session(session_id)?;
        }
        info!(session = %session_id, "session deleted");
        Ok(())
    }

    /// Paginated log read.
    pub fn get_logs(&self, filter: &LogFilter) -> EngineResult<Vec<ExecutionLogEntry>> {
        self.deps.ledger.query_logs(filter)
    }

    /// Paginated trade read.
    pub fn get_trades(&self, filter: &TradeFilter) -> EngineResult<Vec<crate::execution::BotTrade>> {
        self.deps.ledger.query_trades(filter)
    }

    /// Per-element history: log entries carrying this element reference.
    pub fn get_element_history(
        &self,
        session_id: Uuid,
        element_id: &str,
        limit: Option<usize>,
    ) -> EngineResult<Vec<ExecutionLogEntry>> {
        self.deps.ledger.query_logs(&LogFilter {
            session_id: Some(session_id),
            element_id: Some(element_id.to_string()),
            limit,
            ..Default::default()
        })
    }

    pub fn metrics(&self, session_id: Uuid) -> BotPerformanceMetrics {
        self.deps.ledger.metrics(session_id)
    }

    /// Aggregate status across one user's sessions (live controllers
    /// first, persisted snapshots for everything else).
    pub async fn get_status_summary(&self, user_id: Uuid) -> EngineResult<StatusSummary> {
        let mut by_id: HashMap<Uuid, BotExecutionSession> = HashMap::new();

        if let Some(store) = &self.deps.store {
            for session in store.list_sessions(user_id)? {
                by_id.insert(session.id, session);
            }
        }
        {
            let sessions = self.sessions.lock().await;
            for handle in sessions.values().filter(|h| h.user_id == user_id) {
                if let Ok(snapshot) = handle.snapshot().await {
                    by_id.insert(snapshot.id, snapshot);
                }
            }
        }

        let mut summary = StatusSummary::default();
        for session in by_id.values() {
            summary.total_sessions += 1;
            match session.status {
                SessionStatus::Running | SessionStatus::Starting => summary.running += 1,
                SessionStatus::Paused => summary.paused += 1,
                SessionStatus::Stopped | SessionStatus::Stopping => summary.stopped += 1,
                SessionStatus::Completed => summary.completed += 1,
                SessionStatus::Error => summary.error += 1,
                SessionStatus::Idle => {}
            }
            summary.total_executions += session.execution_count;
            summary.total_profit_usd += session.total_profit_usd;
        }
        Ok(summary)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::BotExecutionConfig;
    use crate::execution::{MockMarketFeed, MockVenue, MockVenueBehavior};
    use crate::market::CandleInterval;
    use crate::notify::LogNotifier;
    use crate::session::ExecutionFrequency;
    use crate::strategy::{
        ActionKind, ActionSpec, ElementKind, LogicOp, LogicSpec, StrategyElement, ThresholdOp,
        TriggerKind,
    };
    use rust_decimal_macros::dec;

    fn strategy() -> Strategy {
        Strategy::from_parts(
            "svc-test",
            Uuid::new_v4(),
            "root",
            vec![
                StrategyElement::new(
                    "root",
                    "root",
                    ElementKind::Logic(LogicSpec {
                        op: LogicOp::And,
                        children: vec!["price".to_string(), "buy".to_string()],
                    }),
                ),
                StrategyElement::new(
                    "price",
                    "price above",
                    ElementKind::Trigger(TriggerKind::PriceThreshold {
                        pair: "SOL/USDC".to_string(),
                        op: ThresholdOp::Above,
                        value: dec!(100),
                    }),
                ),
                StrategyElement::new(
                    "buy",
                    "buy",
                    ElementKind::Action(ActionSpec {
                        action: ActionKind::Buy,
                        pair: "SOL/USDC".to_string(),
                        size: dec!(0.5),
                        limit_price: None,
                        trigger_price: None,
                        message: None,
                    }),
                ),
            ],
        )
    }

    async fn service() -> ExecutionService {
        let feed = MockMarketFeed::new(CandleInterval::OneHour);
        feed.set_history("SOL/USDC", vec![dec!(105)]).await;
        let venue = MockVenue::new(MockVenueBehavior::Fill);
        venue.set_price("SOL/USDC", dec!(105)).await;

        ExecutionService::new(ServiceDeps {
            feed: Arc::new(feed),
            real_venue: None,
            paper_venue: Arc::new(venue),
            ledger: Arc::new(ExecutionLedger::open_in_memory().unwrap()),
            store: Some(Arc::new(SessionStore::open_in_memory().unwrap())),
            notifier: Arc::new(LogNotifier),
        })
    }

    fn spec() -> StartSessionSpec {
        StartSessionSpec {
            bot_id: Uuid::new_v4(),
            user_id: Uuid::new_v4(),
            mode: ExecutionMode::Paper,
            frequency: ExecutionFrequency::Manual,
            wallet_id: None,
            config: BotExecutionConfig::default(),
        }
    }

    #[tokio::test]
    async fn test_start_and_command_round_trip() {
        let service = service().await;
        let session = service.start_session(spec(), strategy()).await.unwrap();
        assert_eq!(session.status, SessionStatus::Running);

        let ticked = service.trigger_manual(session.id).await.unwrap();
        assert_eq!(ticked.execution_count, 1);

        let stopped = service.stop(session.id).await.unwrap();
        assert_eq!(stopped.status, SessionStatus::Stopped);
    }

    #[tokio::test]
    async fn test_unknown_session_is_typed_error() {
        let service = service().await;
        let err = service.pause(Uuid::new_v4()).await.unwrap_err();
        assert!(matches!(err, EngineError::SessionNotFound(_)));
    }

    #[tokio::test]
    async fn test_real_mode_without_live_venue_is_rejected() {
        let service = service().await;
        let mut start = spec();
        start.mode = ExecutionMode::Real;
        start.wallet_id = Some(Uuid::new_v4());
        let err = service.start_session(start, strategy()).await.unwrap_err();
        assert!(matches!(err, EngineError::InvalidConfig(_)));
    }

    #[tokio::test]
    async fn test_delete_requires_terminal_status() {
        let service = service().await;
        let session = service.start_session(spec(), strategy()).await.unwrap();

        let err = service.delete_session(session.id).await.unwrap_err();
        assert!(matches!(err, EngineError::SessionStillActive(_)));

        service.stop(session.id).await.unwrap();
        service.delete_session(session.id).await.unwrap();
        assert!(matches!(
            service.get_session(session.id).await.unwrap_err(),
            EngineError::SessionNotFound(_)
        ));
    }

    #[tokio::test]
    async fn test_restore_comes_back_paused() {
        let service = service().await;
        let session = service.start_session(spec(), strategy()).await.unwrap();
        let session_id = session.id;

        // Simulate a restart: stop the live controller and drop its handle.
        service.stop(session_id).await.unwrap();
        service.sessions.lock().await.remove(&session_id);

        // Persisted status is stopped (terminal) -> restore refuses.
        let err = service.restore_session(session_id).await.unwrap_err();
        assert!(matches!(err, EngineError::StateTransition { .. }));

        // A session persisted mid-run restores paused.
        let store = service.deps.store.as_ref().unwrap();
        let mut persisted = store.load_session(session_id).unwrap().unwrap();
        persisted.status = SessionStatus::Running;
        store.save_session(&persisted).unwrap();

        let restored = service.restore_session(session_id).await.unwrap();
        assert_eq!(restored.status, SessionStatus::Paused);
        assert_eq!(restored.execution_count, persisted.execution_count);

        let resumed = service.resume(session_id).await.unwrap();
        assert_eq!(resumed.status, SessionStatus::Running);
        service.stop(session_id).await.unwrap();
    }

    #[tokio::test]
    async fn test_status_summary_aggregates_user_sessions() {
        let service = service().await;
        let user_id = Uuid::new_v4();

        let mut first = spec();
        first.user_id = user_id;
        let mut second = spec();
        second.user_id = user_id;

        let a = service.start_session(first, strategy()).await.unwrap();
        let _b = service.start_session(second, strategy()).await.unwrap();
        service.trigger_manual(a.id).await.unwrap();
        service.pause(a.id).await.unwrap();

        let summary = service.get_status_summary(user_id).await.unwrap();
        assert_eq!(summary.total_sessions, 2);
        assert_eq!(summary.paused, 1);
        assert_eq!(summary.running, 1);
        assert_eq!(summary.total_executions, 1);

        // Other users see nothing.
        let other = service.get_status_summary(Uuid::new_v4()).await.unwrap();
        assert_eq!(other.total_sessions, 0);
    }
}
