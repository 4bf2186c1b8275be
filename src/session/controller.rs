//! The per-session controller task.
//!
//! One tokio task owns each session: it schedules ticks according to the
//! session frequency, drives evaluate → risk gate → execute → ledger, and
//! serves the command surface over an mpsc channel. Commands are handled
//! between ticks, so an in-flight tick always finishes before a
//! transition completes; the stop intent flag is additionally observed at
//! every retry/wait point inside a tick.

use chrono::{DateTime, Utc};
use serde_json::json;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::{mpsc, oneshot, watch};
use tokio::task::JoinHandle;
use tokio::time::MissedTickBehavior;
use tracing::{debug, info, warn};
use uuid::Uuid;

use super::{BotExecutionSession, ExecutionFrequency, ExecutionMode, SessionStatus};
use crate::config::{BotExecutionConfig, ConfigPatch};
use crate::error::{EngineError, EngineResult};
use crate::evaluator::{evaluate, TradeProposal};
use crate::execution::{
    stop_channel, ExecutionPolicy, ExecutionVenue, StopToken, TradeContext, TradeExecutor,
    TradeStatus,
};
use crate::ledger::{ExecutionLedger, ExecutionLogEntry, LogLevel};
use crate::market::MarketDataFeed;
use crate::notify::{NotificationDispatcher, NotificationEvent};
use crate::persistence::SessionStore;
use crate::risk::{AdmittedAction, GateDecision, RiskGate};
use crate::strategy::Strategy;

use rust_decimal::Decimal;

/// Parameters of a start-execution command.
#[derive(Debug, Clone)]
pub struct StartSessionSpec {
    pub bot_id: Uuid,
    pub user_id: Uuid,
    pub mode: ExecutionMode,
    pub frequency: ExecutionFrequency,
    pub wallet_id: Option<Uuid>,
    pub config: BotExecutionConfig,
}

type Reply = oneshot::Sender<EngineResult<BotExecutionSession>>;

/// Commands served by the controller task.
pub enum SessionCommand {
    Pause(Reply),
    Resume(Reply),
    Stop(Reply),
    TriggerManual(Reply),
    UpdateConfig(Box<ConfigPatch>, Reply),
    Snapshot(Reply),
    /// External event for `Triggered` sessions; fire-and-forget.
    ExternalTrigger,
}

/// Collaborators a controller needs.
#[derive(Clone)]
pub struct ControllerDeps {
    pub feed: Arc<dyn MarketDataFeed>,
    pub venue: Arc<dyn ExecutionVenue>,
    pub ledger: Arc<ExecutionLedger>,
    pub store: Option<Arc<SessionStore>>,
    pub notifier: Arc<dyn NotificationDispatcher>,
}

/// Client half of a running controller.
#[derive(Debug)]
pub struct SessionHandle {
    pub session_id: Uuid,
    pub user_id: Uuid,
    pub bot_id: Uuid,
    cmd_tx: mpsc::Sender<SessionCommand>,
    stop_tx: watch::Sender<bool>,
    join: JoinHandle<()>,
}

impl SessionHandle {
    async fn request(
        &self,
        make: impl FnOnce(Reply) -> SessionCommand,
    ) -> EngineResult<BotExecutionSession> {
        let (tx, rx) = oneshot::channel();
        self.cmd_tx
            .send(make(tx))
            .await
            .map_err(|_| EngineError::ControllerGone(self.session_id))?;
        rx.await
            .map_err(|_| EngineError::ControllerGone(self.session_id))?
    }

    pub async fn pause(&self) -> EngineResult<BotExecutionSession> {
        self.request(SessionCommand::Pause).await
    }

    pub async fn resume(&self) -> EngineResult<BotExecutionSession> {
        self.request(SessionCommand::Resume).await
    }

    /// Raise the stop intent, then wait for the state transition. The
    /// intent flag is what in-flight retry waits observe.
    pub async fn stop(&self) -> EngineResult<BotExecutionSession> {
        let _ = self.stop_tx.send(true);
        self.request(SessionCommand::Stop).await
    }

    pub async fn trigger_manual(&self) -> EngineResult<BotExecutionSession> {
        self.request(SessionCommand::TriggerManual).await
    }

    pub async fn update_config(&self, patch: ConfigPatch) -> EngineResult<BotExecutionSession> {
        self.request(|reply| SessionCommand::UpdateConfig(Box::new(patch), reply))
            .await
    }

    pub async fn snapshot(&self) -> EngineResult<BotExecutionSession> {
        self.request(SessionCommand::Snapshot).await
    }

    /// Deliver an external event to a `Triggered` session.
    pub fn trigger_event(&self) -> bool {
        self.cmd_tx.try_send(SessionCommand::ExternalTrigger).is_ok()
    }

    pub fn is_finished(&self) -> bool {
        self.join.is_finished()
    }
}

/// What the scheduler should do next.
enum Plan {
    /// Tick immediately.
    Now,
    /// Tick after this delay (scheduled sessions).
    Delay(Duration),
    /// Tick on the interval timer.
    IntervalTick,
    /// No self-ticking (manual/triggered).
    Never,
    /// Finite schedule ran out.
    Exhausted,
}

/// Owns one session's scheduling loop. Exactly one controller per
/// session id; mutual exclusion is enforced by the service registry.
pub struct SessionController {
    session: BotExecutionSession,
    strategy: Strategy,
    feed: Arc<dyn MarketDataFeed>,
    executor: TradeExecutor,
    ledger: Arc<ExecutionLedger>,
    store: Option<Arc<SessionStore>>,
    notifier: Arc<dyn NotificationDispatcher>,
    gate: RiskGate,
    stop: StopToken,
    consecutive_failures: u32,
    next_schedule_idx: usize,
}

impl SessionController {
    /// Validate and launch a new session. Fails synchronously on an
    /// invalid strategy, invalid config, or a real-mode session without
    /// a bound wallet.
    pub fn start(
        spec: StartSessionSpec,
        strategy: Strategy,
        deps: ControllerDeps,
    ) -> EngineResult<SessionHandle> {
        spec.config.validate()?;

        let report = strategy.validate();
        if !report.is_valid() {
            return Err(EngineError::InvalidStrategy(report));
        }
        if spec.mode == ExecutionMode::Real && spec.wallet_id.is_none() {
            return Err(EngineError::WalletRequired);
        }
        for element in strategy.elements() {
            if !spec
                .config
                .allowed_element_families
                .contains(&element.family())
            {
                return Err(EngineError::InvalidConfig(format!(
                    "element family '{}' is not permitted for this session",
                    element.family()
                )));
            }
        }

        let mut frequency = spec.frequency;
        if let ExecutionFrequency::Scheduled { times } = &mut frequency {
            times.sort_unstable();
        }

        let session = BotExecutionSession::new(
            spec.bot_id,
            strategy.id,
            spec.user_id,
            spec.mode,
            frequency,
            spec.wallet_id,
            spec.config,
        );
        Self::spawn(session, strategy, deps, true)
    }

    /// Relaunch a persisted session. Sessions persisted as running come
    /// back paused; a process restart must not silently resume trading.
    pub fn resume_from_store(
        mut session: BotExecutionSession,
        strategy: Strategy,
        deps: ControllerDeps,
    ) -> EngineResult<SessionHandle> {
        if session.status.is_terminal() {
            return Err(EngineError::StateTransition {
                status: session.status,
                command: "resume_session",
            });
        }
        let report = strategy.validate();
        if !report.is_valid() {
            return Err(EngineError::InvalidStrategy(report));
        }
        session.status = SessionStatus::Paused;
        Self::spawn(session, strategy, deps, false)
    }

    fn spawn(
        session: BotExecutionSession,
        strategy: Strategy,
        deps: ControllerDeps,
        start_running: bool,
    ) -> EngineResult<SessionHandle> {
        let (cmd_tx, cmd_rx) = mpsc::channel(32);
        let (stop_tx, stop) = stop_channel();
        let session_id = session.id;
        let user_id = session.user_id;
        let bot_id = session.bot_id;

        let controller = SessionController {
            session,
            strategy,
            feed: deps.feed,
            executor: TradeExecutor::new(deps.venue),
            ledger: deps.ledger,
            store: deps.store,
            notifier: deps.notifier,
            gate: RiskGate,
            stop,
            consecutive_failures: 0,
            next_schedule_idx: 0,
        };
        let join = tokio::spawn(controller.run(cmd_rx, start_running));

        Ok(SessionHandle {
            session_id,
            user_id,
            bot_id,
            cmd_tx,
            stop_tx,
            join,
        })
    }

    async fn run(mut self, mut cmd_rx: mpsc::Receiver<SessionCommand>, start_running: bool) {
        if start_running {
            self.session.mark_running();
            info!(
                session = %self.session.id,
                bot = %self.session.bot_id,
                mode = ?self.session.mode,
                "session started"
            );
            self.append(
                LogLevel::Info,
                format!("session started in {:?} mode", self.session.mode),
            );
        } else {
            info!(session = %self.session.id, "session restored; awaiting resume");
            self.append(LogLevel::Info, "session restored in paused state".to_string());
        }
        self.persist();

        let mut ticker = match &self.session.frequency {
            ExecutionFrequency::Interval { interval_ms } => {
                let mut ticker =
                    tokio::time::interval(Duration::from_millis((*interval_ms).max(1)));
                // Overrunning ticks collapse instead of queueing.
                ticker.set_missed_tick_behavior(MissedTickBehavior::Skip);
                Some(ticker)
            }
            _ => None,
        };

        loop {
            if self.session.status.is_terminal() {
                break;
            }
            let can_tick = self.session.status == SessionStatus::Running;

            let plan = if can_tick { self.schedule_plan() } else { Plan::Never };
            if matches!(plan, Plan::Exhausted) {
                self.session.mark_completed();
                self.append(
                    LogLevel::Info,
                    "schedule exhausted; session completed".to_string(),
                );
                self.persist();
                continue;
            }
            let is_scheduled_tick = matches!(
                (&plan, &self.session.frequency),
                (Plan::Now | Plan::Delay(_), ExecutionFrequency::Scheduled { .. })
            );

            let wait = async {
                match plan {
                    Plan::Now => {}
                    Plan::Delay(delay) => tokio::time::sleep(delay).await,
                    Plan::IntervalTick => {
                        ticker
                            .as_mut()
                            .expect("interval frequency without a ticker")
                            .tick()
                            .await;
                    }
                    Plan::Never | Plan::Exhausted => std::future::pending::<()>().await,
                }
            };

            tokio::select! {
                biased;
                cmd = cmd_rx.recv() => {
                    match cmd {
                        Some(cmd) => self.handle_command(cmd).await,
                        None => {
                            // All handles dropped; shut down cooperatively.
                            if self.session.apply_stop_request().is_ok() {
                                self.session.finish_stop();
                            }
                            self.persist();
                            break;
                        }
                    }
                }
                _ = wait, if can_tick => {
                    if is_scheduled_tick {
                        self.consume_due_schedule_times();
                    }
                    self.run_tick().await;
                }
            }
        }

        info!(
            session = %self.session.id,
            status = %self.session.status,
            ticks = self.session.execution_count,
            "session loop ended"
        );
    }

    fn schedule_plan(&self) -> Plan {
        match &self.session.frequency {
            ExecutionFrequency::Continuous => Plan::Now,
            ExecutionFrequency::Interval { .. } => Plan::IntervalTick,
            ExecutionFrequency::Triggered | ExecutionFrequency::Manual => Plan::Never,
            ExecutionFrequency::Scheduled { times } => {
                let now = Utc::now();
                let mut idx = self.next_schedule_idx;
                let mut due = false;
                while idx < times.len() && times[idx] <= now {
                    idx += 1;
                    due = true;
                }
                if due {
                    // One tick for all due times; catch-up does not queue.
                    Plan::Now
                } else {
                    match times.get(idx) {
                        Some(next) => Plan::Delay(
                            (*next - now).to_std().unwrap_or(Duration::from_millis(0)),
                        ),
                        None => Plan::Exhausted,
                    }
                }
            }
        }
    }

    /// Advance past every schedule time that is now due.
    fn consume_due_schedule_times(&mut self) {
        if let ExecutionFrequency::Scheduled { times } = &self.session.frequency {
            let now = Utc::now();
            let mut idx = self.next_schedule_idx;
            while idx < times.len() && times[idx] <= now {
                idx += 1;
            }
            self.next_schedule_idx = idx;
        }
    }

    async fn handle_command(&mut self, cmd: SessionCommand) {
        match cmd {
            SessionCommand::Pause(reply) => {
                let response = match self.session.apply_pause() {
                    Ok(true) => {
                        self.append(LogLevel::Info, "session paused".to_string());
                        self.persist();
                        Ok(self.session.clone())
                    }
                    // Idempotent no-op: unchanged session, no new log entry.
                    Ok(false) => Ok(self.session.clone()),
                    Err(err) => Err(err),
                };
                let _ = reply.send(response);
            }
            SessionCommand::Resume(reply) => {
                let response = match self.session.apply_resume() {
                    Ok(true) => {
                        self.append(LogLevel::Info, "session resumed".to_string());
                        self.persist();
                        Ok(self.session.clone())
                    }
                    Ok(false) => Ok(self.session.clone()),
                    Err(err) => Err(err),
                };
                let _ = reply.send(response);
            }
            SessionCommand::Stop(reply) => {
                let response = match self.session.apply_stop_request() {
                    Ok(changed) => {
                        // Commands run between ticks, so no tick is in
                        // flight here; the stop completes immediately.
                        self.session.finish_stop();
                        if changed {
                            self.append(LogLevel::Info, "session stopped".to_string());
                        }
                        self.persist();
                        Ok(self.session.clone())
                    }
                    Err(err) => Err(err),
                };
                let _ = reply.send(response);
            }
            SessionCommand::TriggerManual(reply) => {
                if self.session.status.is_terminal() {
                    let _ = reply.send(Err(EngineError::StateTransition {
                        status: self.session.status,
                        command: "trigger_manual",
                    }));
                } else {
                    // One tick, any non-terminal state, status unchanged.
                    self.run_tick().await;
                    let _ = reply.send(Ok(self.session.clone()));
                }
            }
            SessionCommand::UpdateConfig(patch, reply) => {
                let response = match self.session.config.reconfigure(*patch) {
                    Ok(next) => {
                        self.session.config = next;
                        self.append(LogLevel::Info, "session reconfigured".to_string());
                        self.persist();
                        Ok(self.session.clone())
                    }
                    Err(err) => Err(err),
                };
                let _ = reply.send(response);
            }
            SessionCommand::Snapshot(reply) => {
                let _ = reply.send(Ok(self.session.clone()));
            }
            SessionCommand::ExternalTrigger => {
                let triggered = matches!(self.session.frequency, ExecutionFrequency::Triggered);
                if triggered && self.session.status == SessionStatus::Running {
                    self.run_tick().await;
                } else {
                    debug!(
                        session = %self.session.id,
                        status = %self.session.status,
                        "external trigger ignored"
                    );
                }
            }
        }
    }

    /// One evaluation tick, bounded by the execution timeout. Updates the
    /// tick counters exactly once on every path, including aborts.
    async fn run_tick(&mut self) {
        if self.stop.is_requested() {
            return;
        }
        let tick_started = Utc::now();
        let budget = Duration::from_millis(self.session.config.execution_timeout_ms);

        let outcome = tokio::time::timeout(budget, self.tick_inner()).await;
        let success = match outcome {
            Ok(Ok(clean)) => clean,
            Ok(Err(message)) => {
                self.append(LogLevel::Error, format!("tick failed: {}", message));
                false
            }
            Err(_) => {
                self.append(
                    LogLevel::Error,
                    format!(
                        "tick aborted after exceeding {}ms execution budget",
                        self.session.config.execution_timeout_ms
                    ),
                );
                false
            }
        };

        self.session.record_tick(success);
        self.session.next_execution_at = self.next_execution_after(tick_started);
        self.session.metrics = self.ledger.metrics(self.session.id);

        if success {
            self.consecutive_failures = 0;
        } else {
            self.consecutive_failures += 1;
            if self.consecutive_failures >= self.session.config.max_consecutive_failures {
                self.session.mark_error();
                self.append(
                    LogLevel::Critical,
                    format!(
                        "session escalated to error after {} consecutive tick failures",
                        self.consecutive_failures
                    ),
                );
                self.notify(NotificationEvent::SessionError {
                    session_id: self.session.id,
                    message: format!(
                        "{} consecutive tick failures",
                        self.consecutive_failures
                    ),
                })
                .await;
            }
        }
        self.persist();
    }

    /// Evaluate, gate, execute. Returns whether the tick was clean.
    async fn tick_inner(&mut self) -> Result<bool, String> {
        let now = Utc::now();
        self.session.counters.roll_over(now.date_naive());

        let snapshot = self
            .feed
            .snapshot(&self.session.config.trading_pairs, now)
            .await
            .map_err(|err| format!("market snapshot unavailable: {:#}", err))?;

        let evaluation = evaluate(&self.strategy, &snapshot, &mut self.session.scratch);

        // Full element-result tree, recorded so logs can explain why no
        // action fired.
        let _ = self.ledger.append_log(
            &ExecutionLogEntry::new(self.session.id, LogLevel::Debug, "tick evaluated")
                .with_details(json!({
                    "root_output": &evaluation.root_output,
                    "results": &evaluation.root_result,
                })),
        );

        let root_ok = evaluation.root_result.success;
        if !root_ok {
            let _ = self.ledger.append_log(
                &ExecutionLogEntry::new(
                    self.session.id,
                    LogLevel::Error,
                    format!(
                        "root element failed: {}",
                        evaluation
                            .root_result
                            .error
                            .as_deref()
                            .unwrap_or("unknown error")
                    ),
                )
                .with_element(evaluation.root_result.element_id.clone()),
            );
        }

        let (alerts, orders): (Vec<TradeProposal>, Vec<TradeProposal>) = evaluation
            .proposals
            .into_iter()
            .partition(|p| !p.action.is_order());

        for alert in alerts {
            let message = alert
                .message
                .clone()
                .unwrap_or_else(|| format!("alert from element '{}'", alert.element_id));
            let _ = self.ledger.append_log(
                &ExecutionLogEntry::new(self.session.id, LogLevel::Info, format!("alert: {}", message))
                    .with_element(alert.element_id.clone()),
            );
            self.notify(NotificationEvent::Alert {
                session_id: self.session.id,
                message,
            })
            .await;
        }

        let decisions = self.gate.admit(
            orders,
            &self.session.config,
            &self.session.counters,
            &snapshot,
        );

        let mut failed_trades = 0u32;
        for decision in decisions {
            match decision {
                GateDecision::Rejected { proposal, reason } => {
                    let _ = self.ledger.append_log(
                        &ExecutionLogEntry::new(
                            self.session.id,
                            LogLevel::Warning,
                            format!("action suppressed: {}", reason.code()),
                        )
                        .with_element(proposal.element_id.clone())
                        .with_details(json!({ "reason": reason, "proposal": proposal })),
                    );
                }
                GateDecision::Admitted(action) => {
                    // Stop intent also bounds work between trades.
                    if self.stop.is_requested() {
                        break;
                    }
                    failed_trades += self.execute_admitted(action).await;
                }
            }
        }

        Ok(root_ok && failed_trades == 0)
    }

    /// Run one admitted action to a terminal trade; returns 1 on failure.
    async fn execute_admitted(&mut self, action: AdmittedAction) -> u32 {
        let ctx = TradeContext {
            session_id: self.session.id,
            bot_id: self.session.bot_id,
            strategy_id: self.session.strategy_id,
            wallet_id: self.session.wallet_id,
            network: self.session.config.network.clone(),
        };
        let policy = ExecutionPolicy::from(&self.session.config);
        let mut stop = self.stop.clone();

        self.session.counters.open_trades += 1;
        let trade = self
            .executor
            .execute(&action, &ctx, &policy, &self.ledger, &mut stop)
            .await;
        self.session.counters.open_trades -= 1;

        match trade.status {
            TradeStatus::Completed => {
                self.session.counters.trades_today += 1;
                if action.proposal.action.opens_position() {
                    self.session.counters.open_exposure_usd += action.notional_usd;
                } else {
                    let reduced = self.session.counters.open_exposure_usd - action.notional_usd;
                    self.session.counters.open_exposure_usd = reduced.max(Decimal::ZERO);
                }

                let before_pct = self.session.total_profit_pct;
                if let Some(profit) = trade.profit_usd {
                    self.session.record_profit(profit);
                }
                self.emit_threshold_events(before_pct).await;

                self.notify(NotificationEvent::TradeExecuted {
                    session_id: self.session.id,
                    pair: trade.pair.clone(),
                    side: trade.side,
                    size: trade.amount,
                    success: true,
                })
                .await;
                0
            }
            TradeStatus::Failed => {
                self.session.counters.trades_today += 1;
                self.notify(NotificationEvent::TradeExecuted {
                    session_id: self.session.id,
                    pair: trade.pair.clone(),
                    side: trade.side,
                    size: trade.amount,
                    success: false,
                })
                .await;
                1
            }
            TradeStatus::Canceled | TradeStatus::Pending => 0,
        }
    }

    /// Profit-target / stop-loss notifications on threshold crossings.
    async fn emit_threshold_events(&self, before_pct: Decimal) {
        let after_pct = self.session.total_profit_pct;
        if let Some(take_profit) = self.session.config.take_profit_pct {
            if before_pct < take_profit && after_pct >= take_profit {
                self.notify(NotificationEvent::ProfitTargetReached {
                    session_id: self.session.id,
                    profit_pct: after_pct,
                })
                .await;
            }
        }
        if let Some(stop_loss) = self.session.config.stop_loss_pct {
            if before_pct > -stop_loss && after_pct <= -stop_loss {
                self.notify(NotificationEvent::StopLossTriggered {
                    session_id: self.session.id,
                    loss_pct: after_pct,
                })
                .await;
            }
        }
    }

    fn next_execution_after(&self, tick_started: DateTime<Utc>) -> Option<DateTime<Utc>> {
        match &self.session.frequency {
            ExecutionFrequency::Continuous => Some(Utc::now()),
            // Measured from tick start, not completion.
            ExecutionFrequency::Interval { interval_ms } => {
                Some(tick_started + chrono::Duration::milliseconds(*interval_ms as i64))
            }
            ExecutionFrequency::Scheduled { times } => {
                times.get(self.next_schedule_idx).copied()
            }
            ExecutionFrequency::Triggered | ExecutionFrequency::Manual => None,
        }
    }

    async fn notify(&self, event: NotificationEvent) {
        if self.session.config.notifications.allows(&event) {
            self.notifier.dispatch(event).await;
        }
    }

    fn append(&self, level: LogLevel, message: String) {
        let _ = self
            .ledger
            .append_log(&ExecutionLogEntry::new(self.session.id, level, message));
    }

    fn persist(&self) {
        if let Some(store) = &self.store {
            if let Err(err) = store.save_session(&self.session) {
                warn!(session = %self.session.id, error = %err, "failed to persist session");
            }
        }
    }
}
