//! Trade execution: the venue boundary, the retrying executor, and the
//! paper-trading mock.

mod executor;
mod mock;
mod traits;

pub use executor::{stop_channel, ExecutionPolicy, StopToken, TradeContext, TradeExecutor};
pub use mock::{MockMarketFeed, MockVenue, MockVenueBehavior};
pub use traits::{
    ExecutionVenue, OrderRequest, SubmitReceipt, TxReport, TxStatus, VenueError,
};

use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::error::{EngineError, EngineResult};
use crate::evaluator::TradeSide;

/// Lifecycle of a trade record.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TradeStatus {
    Pending,
    Completed,
    Failed,
    Canceled,
}

impl TradeStatus {
    pub fn is_terminal(&self) -> bool {
        !matches!(self, TradeStatus::Pending)
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            TradeStatus::Pending => "pending",
            TradeStatus::Completed => "completed",
            TradeStatus::Failed => "failed",
            TradeStatus::Canceled => "canceled",
        }
    }
}

impl std::str::FromStr for TradeStatus {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "pending" => Ok(TradeStatus::Pending),
            "completed" => Ok(TradeStatus::Completed),
            "failed" => Ok(TradeStatus::Failed),
            "canceled" => Ok(TradeStatus::Canceled),
            other => Err(format!("unknown trade status '{}'", other)),
        }
    }
}

/// Append-only record of one trade. `pending` transitions to exactly one
/// terminal status; terminal records are immutable.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct BotTrade {
    pub id: Uuid,
    pub session_id: Uuid,
    pub bot_id: Uuid,
    pub strategy_id: Uuid,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub wallet_id: Option<Uuid>,
    pub timestamp: DateTime<Utc>,
    pub side: TradeSide,
    pub status: TradeStatus,
    pub pair: String,
    pub amount: Decimal,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub price: Option<Decimal>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub usd_value: Option<Decimal>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub profit_usd: Option<Decimal>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub profit_pct: Option<Decimal>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub tx_hash: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub gas_used_gwei: Option<Decimal>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub gas_price_gwei: Option<Decimal>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub fee_usd: Option<Decimal>,
    pub network: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
    pub duration_ms: u64,
}

impl BotTrade {
    /// Move a pending trade to its single terminal status.
    pub fn finalize(&mut self, status: TradeStatus) -> EngineResult<()> {
        if self.status.is_terminal() {
            return Err(EngineError::TradeAlreadyTerminal(self.id));
        }
        self.status = status;
        Ok(())
    }
}
