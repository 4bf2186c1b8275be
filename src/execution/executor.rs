//! Trade execution with retry and timeout policy.
//!
//! One call to `TradeExecutor::execute` drives an admitted action to a
//! terminal `BotTrade`: each attempt (submit + confirmation tracking) is
//! bounded by the transaction timeout, retryable failures are retried with
//! a delay, and every attempt writes exactly one ledger entry. Only the
//! final outcome produces the trade record.

use rust_decimal::Decimal;
use serde_json::json;
use std::sync::Arc;
use std::time::{Duration, Instant};
use tokio::sync::watch;
use tokio::time::{sleep, timeout};
use tracing::{info, warn};
use uuid::Uuid;

use super::traits::{ExecutionVenue, OrderRequest, TxStatus, VenueError};
use super::{BotTrade, TradeStatus};
use crate::config::BotExecutionConfig;
use crate::evaluator::TradeSide;
use crate::ledger::{ExecutionLedger, ExecutionLogEntry, LogLevel, TxRef};
use crate::risk::AdmittedAction;

/// How often a pending transaction is re-checked within an attempt.
const CONFIRMATION_POLL_MS: u64 = 250;

/// Retry/timeout policy slice of the session config.
#[derive(Debug, Clone)]
pub struct ExecutionPolicy {
    pub max_retries: u32,
    pub retry_delay_ms: u64,
    pub transaction_timeout_ms: u64,
}

impl From<&BotExecutionConfig> for ExecutionPolicy {
    fn from(config: &BotExecutionConfig) -> Self {
        Self {
            max_retries: config.max_retries,
            retry_delay_ms: config.retry_delay_ms,
            transaction_timeout_ms: config.transaction_timeout_ms,
        }
    }
}

/// Session identity attached to produced trades.
#[derive(Debug, Clone)]
pub struct TradeContext {
    pub session_id: Uuid,
    pub bot_id: Uuid,
    pub strategy_id: Uuid,
    pub wallet_id: Option<Uuid>,
    pub network: String,
}

/// Cooperative stop intent, observed at retry/wait points.
#[derive(Debug, Clone)]
pub struct StopToken {
    rx: watch::Receiver<bool>,
}

/// Create a stop intent channel.
pub fn stop_channel() -> (watch::Sender<bool>, StopToken) {
    let (tx, rx) = watch::channel(false);
    (tx, StopToken { rx })
}

impl StopToken {
    pub fn is_requested(&self) -> bool {
        *self.rx.borrow()
    }

    /// Resolve once stop is requested. A dropped sender counts as stop.
    pub async fn requested(&mut self) {
        let _ = self.rx.wait_for(|stop| *stop).await;
    }
}

struct Confirmation {
    tx_hash: String,
    fee_usd: Option<Decimal>,
    gas_used_gwei: Option<Decimal>,
    realized_profit_usd: Option<Decimal>,
}

/// Drives admitted actions through the external venue.
pub struct TradeExecutor {
    venue: Arc<dyn ExecutionVenue>,
}

impl TradeExecutor {
    pub fn new(venue: Arc<dyn ExecutionVenue>) -> Self {
        Self { venue }
    }

    /// Execute one admitted action to a terminal trade record.
    ///
    /// The stop token is only observed between attempts; a submission
    /// already in flight is tracked to its terminal status.
    pub async fn execute(
        &self,
        action: &AdmittedAction,
        ctx: &TradeContext,
        policy: &ExecutionPolicy,
        ledger: &ExecutionLedger,
        stop: &mut StopToken,
    ) -> BotTrade {
        let trade_id = Uuid::new_v4();
        let proposal = &action.proposal;
        let side = proposal.side().unwrap_or(TradeSide::Buy);
        let reference_price = if proposal.size > Decimal::ZERO {
            Some(action.notional_usd / proposal.size)
        } else {
            None
        };

        let order = OrderRequest {
            client_order_id: trade_id,
            pair: proposal.pair.clone(),
            side,
            action: proposal.action,
            size: proposal.size,
            limit_price: proposal.limit_price,
            slippage_tolerance: action.slippage_tolerance,
            gas_price_gwei: action.gas_price_gwei,
            network: ctx.network.clone(),
        };

        let started = Instant::now();
        let max_attempts = policy.max_retries + 1;
        let mut last_error = String::new();

        for attempt in 1..=max_attempts {
            let is_last = attempt == max_attempts;
            let outcome = timeout(
                Duration::from_millis(policy.transaction_timeout_ms),
                self.attempt(&order),
            )
            .await;

            match outcome {
                Ok(Ok(confirmation)) => {
                    info!(
                        trade = %trade_id,
                        pair = %order.pair,
                        attempt,
                        tx_hash = %confirmation.tx_hash,
                        "trade confirmed"
                    );
                    let _ = ledger.append_log(
                        &ExecutionLogEntry::new(
                            ctx.session_id,
                            LogLevel::Info,
                            format!("trade attempt {} confirmed", attempt),
                        )
                        .with_element(proposal.element_id.clone())
                        .with_details(json!({ "trade_id": trade_id, "attempt": attempt }))
                        .with_tx(TxRef {
                            hash: confirmation.tx_hash.clone(),
                            status: TxStatus::Confirmed,
                            fee_usd: confirmation.fee_usd,
                        }),
                    );

                    let profit_usd = confirmation.realized_profit_usd;
                    let trade = BotTrade {
                        id: trade_id,
                        session_id: ctx.session_id,
                        bot_id: ctx.bot_id,
                        strategy_id: ctx.strategy_id,
                        wallet_id: ctx.wallet_id,
                        timestamp: chrono::Utc::now(),
                        side,
                        status: TradeStatus::Completed,
                        pair: proposal.pair.clone(),
                        amount: proposal.size,
                        price: reference_price,
                        usd_value: Some(action.notional_usd),
                        profit_usd,
                        profit_pct: profit_usd.map(|p| {
                            if action.notional_usd > Decimal::ZERO {
                                p / action.notional_usd * Decimal::from(100)
                            } else {
                                Decimal::ZERO
                            }
                        }),
                        tx_hash: Some(confirmation.tx_hash),
                        gas_used_gwei: confirmation.gas_used_gwei,
                        gas_price_gwei: action.gas_price_gwei,
                        fee_usd: confirmation.fee_usd,
                        network: ctx.network.clone(),
                        error: None,
                        duration_ms: started.elapsed().as_millis() as u64,
                    };
                    let _ = ledger.append_trade(&trade);
                    return trade;
                }
                Ok(Err(venue_error)) => {
                    let retryable = venue_error.is_retryable();
                    last_error = venue_error.to_string();
                    let level = if is_last || !retryable {
                        LogLevel::Error
                    } else {
                        LogLevel::Warning
                    };
                    warn!(
                        trade = %trade_id,
                        pair = %order.pair,
                        attempt,
                        max_attempts,
                        retryable,
                        error = %last_error,
                        "trade attempt failed"
                    );
                    let _ = ledger.append_log(
                        &ExecutionLogEntry::new(
                            ctx.session_id,
                            level,
                            format!("trade attempt {} failed: {}", attempt, last_error),
                        )
                        .with_element(proposal.element_id.clone())
                        .with_details(json!({
                            "trade_id": trade_id,
                            "attempt": attempt,
                            "retryable": retryable,
                        })),
                    );
                    if !retryable {
                        return self
                            .terminal_failure(trade_id, action, ctx, side, reference_price, started, last_error, ledger);
                    }
                }
                Err(_elapsed) => {
                    last_error = format!(
                        "transaction timed out after {}ms",
                        policy.transaction_timeout_ms
                    );
                    let level = if is_last { LogLevel::Error } else { LogLevel::Warning };
                    warn!(
                        trade = %trade_id,
                        pair = %order.pair,
                        attempt,
                        max_attempts,
                        timeout_ms = policy.transaction_timeout_ms,
                        "trade attempt timed out"
                    );
                    let _ = ledger.append_log(
                        &ExecutionLogEntry::new(
                            ctx.session_id,
                            level,
                            format!("trade attempt {} failed: {}", attempt, last_error),
                        )
                        .with_element(proposal.element_id.clone())
                        .with_details(json!({ "trade_id": trade_id, "attempt": attempt })),
                    );
                }
            }

            if !is_last {
                // Cancellable pause between attempts.
                let mut stop_wait = stop.clone();
                tokio::select! {
                    _ = sleep(Duration::from_millis(policy.retry_delay_ms)) => {}
                    _ = stop_wait.requested() => {
                        let _ = ledger.append_log(
                            &ExecutionLogEntry::new(
                                ctx.session_id,
                                LogLevel::Warning,
                                "trade canceled: stop requested before retry",
                            )
                            .with_element(proposal.element_id.clone())
                            .with_details(json!({ "trade_id": trade_id })),
                        );
                        let mut trade = self.skeleton(trade_id, action, ctx, side, reference_price, started);
                        trade.status = TradeStatus::Canceled;
                        trade.error = Some("session stop requested".to_string());
                        let _ = ledger.append_trade(&trade);
                        return trade;
                    }
                }
            }
        }

        self.terminal_failure(trade_id, action, ctx, side, reference_price, started, last_error, ledger)
    }

    /// Submit and track to confirmation; bounded by the caller's timeout.
    async fn attempt(&self, order: &OrderRequest) -> Result<Confirmation, VenueError> {
        let receipt = self.venue.submit(order).await?;

        let report = match receipt.status {
            TxStatus::Failed => {
                return Err(VenueError::Reverted("venue reported failure".to_string()))
            }
            TxStatus::Confirmed => self.venue.tx_status(&receipt.tx_hash).await?,
            TxStatus::Pending => loop {
                sleep(Duration::from_millis(CONFIRMATION_POLL_MS)).await;
                let report = self.venue.tx_status(&receipt.tx_hash).await?;
                match report.status {
                    TxStatus::Pending => continue,
                    TxStatus::Failed => {
                        return Err(VenueError::Reverted("transaction failed".to_string()))
                    }
                    TxStatus::Confirmed => break report,
                }
            },
        };

        Ok(Confirmation {
            tx_hash: receipt.tx_hash,
            fee_usd: report.fee_usd,
            gas_used_gwei: report.gas_used_gwei,
            realized_profit_usd: report.realized_profit_usd,
        })
    }

    #[allow(clippy::too_many_arguments)]
    fn terminal_failure(
        &self,
        trade_id: Uuid,
        action: &AdmittedAction,
        ctx: &TradeContext,
        side: TradeSide,
        reference_price: Option<Decimal>,
        started: Instant,
        error: String,
        ledger: &ExecutionLedger,
    ) -> BotTrade {
        let mut trade = self.skeleton(trade_id, action, ctx, side, reference_price, started);
        trade.status = TradeStatus::Failed;
        trade.error = Some(error);
        let _ = ledger.append_trade(&trade);
        trade
    }

    fn skeleton(
        &self,
        trade_id: Uuid,
        action: &AdmittedAction,
        ctx: &TradeContext,
        side: TradeSide,
        reference_price: Option<Decimal>,
        started: Instant,
    ) -> BotTrade {
        BotTrade {
            id: trade_id,
            session_id: ctx.session_id,
            bot_id: ctx.bot_id,
            strategy_id: ctx.strategy_id,
            wallet_id: ctx.wallet_id,
            timestamp: chrono::Utc::now(),
            side,
            status: TradeStatus::Pending,
            pair: action.proposal.pair.clone(),
            amount: action.proposal.size,
            price: reference_price,
            usd_value: Some(action.notional_usd),
            profit_usd: None,
            profit_pct: None,
            tx_hash: None,
            gas_used_gwei: None,
            gas_price_gwei: action.gas_price_gwei,
            fee_usd: None,
            network: ctx.network.clone(),
            error: None,
            duration_ms: started.elapsed().as_millis() as u64,
        }
    }
}
