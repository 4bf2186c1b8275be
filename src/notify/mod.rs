//! Fire-and-forget notification dispatch.
//!
//! The controller emits events on trade execution, errors, and
//! profit-target / stop-loss hits; `NotificationSettings` gates which of
//! them leave the session. Delivery transport is a boundary trait; the
//! default implementation routes events into structured logs.

use async_trait::async_trait;
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use tracing::{error, info, warn};
use uuid::Uuid;

use crate::evaluator::TradeSide;

/// Which event classes a session is allowed to emit.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct NotificationSettings {
    #[serde(default = "default_true")]
    pub on_trade: bool,
    #[serde(default = "default_true")]
    pub on_error: bool,
    #[serde(default = "default_true")]
    pub on_profit_target: bool,
    #[serde(default = "default_true")]
    pub on_stop_loss: bool,
}

fn default_true() -> bool {
    true
}

impl Default for NotificationSettings {
    fn default() -> Self {
        Self {
            on_trade: true,
            on_error: true,
            on_profit_target: true,
            on_stop_loss: true,
        }
    }
}

impl NotificationSettings {
    pub fn allows(&self, event: &NotificationEvent) -> bool {
        match event {
            NotificationEvent::TradeExecuted { .. } => self.on_trade,
            NotificationEvent::SessionError { .. } => self.on_error,
            NotificationEvent::ProfitTargetReached { .. } => self.on_profit_target,
            NotificationEvent::StopLossTriggered { .. } => self.on_stop_loss,
            NotificationEvent::Alert { .. } => true,
        }
    }
}

/// Events a session can emit.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "event", rename_all = "snake_case")]
pub enum NotificationEvent {
    TradeExecuted {
        session_id: Uuid,
        pair: String,
        side: TradeSide,
        size: Decimal,
        success: bool,
    },
    SessionError {
        session_id: Uuid,
        message: String,
    },
    ProfitTargetReached {
        session_id: Uuid,
        profit_pct: Decimal,
    },
    StopLossTriggered {
        session_id: Uuid,
        loss_pct: Decimal,
    },
    /// Raised by alert actions in the strategy graph.
    Alert {
        session_id: Uuid,
        message: String,
    },
}

/// Boundary to the external notification transport.
#[async_trait]
pub trait NotificationDispatcher: Send + Sync {
    /// Deliver one event. Failures are the dispatcher's problem; sessions
    /// never block or fail on notification delivery.
    async fn dispatch(&self, event: NotificationEvent);
}

/// Default dispatcher: structured log emission, one line per event.
pub struct LogNotifier;

#[async_trait]
impl NotificationDispatcher for LogNotifier {
    async fn dispatch(&self, event: NotificationEvent) {
        let json = serde_json::to_string(&event).unwrap_or_default();
        match &event {
            NotificationEvent::SessionError { .. } | NotificationEvent::StopLossTriggered { .. } => {
                error!(target: "notification", "NOTIFY: {}", json)
            }
            NotificationEvent::Alert { .. } => warn!(target: "notification", "NOTIFY: {}", json),
            _ => info!(target: "notification", "NOTIFY: {}", json),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rust_decimal_macros::dec;

    #[test]
    fn test_settings_gate_events() {
        let settings = NotificationSettings {
            on_trade: false,
            ..Default::default()
        };
        let session_id = Uuid::new_v4();

        let trade = NotificationEvent::TradeExecuted {
            session_id,
            pair: "SOL/USDC".to_string(),
            side: TradeSide::Buy,
            size: dec!(0.5),
            success: true,
        };
        let stop = NotificationEvent::StopLossTriggered {
            session_id,
            loss_pct: dec!(0.06),
        };

        assert!(!settings.allows(&trade));
        assert!(settings.allows(&stop));
    }

    #[tokio::test]
    async fn test_log_notifier_accepts_all_events() {
        LogNotifier
            .dispatch(NotificationEvent::Alert {
                session_id: Uuid::new_v4(),
                message: "price crossed".to_string(),
            })
            .await;
    }
}
