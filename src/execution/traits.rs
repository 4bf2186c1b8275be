//! Boundary traits for the external signing/broadcast collaborator.
//!
//! The core never talks to a chain directly: it hands a fully-resolved
//! order to an `ExecutionVenue` and tracks the returned transaction to a
//! terminal status. Venue failures are classified so the executor knows
//! what is worth retrying.

use async_trait::async_trait;
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use thiserror::Error;
use uuid::Uuid;

use crate::evaluator::TradeSide;
use crate::strategy::ActionKind;

/// A fully-resolved order handed to the venue.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct OrderRequest {
    /// Idempotency key; one per trade, stable across retries.
    pub client_order_id: Uuid,
    pub pair: String,
    pub side: TradeSide,
    pub action: ActionKind,
    pub size: Decimal,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub limit_price: Option<Decimal>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub slippage_tolerance: Option<Decimal>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub gas_price_gwei: Option<Decimal>,
    pub network: String,
}

/// On-chain transaction status.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TxStatus {
    Pending,
    Confirmed,
    Failed,
}

/// Receipt returned by a submission.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SubmitReceipt {
    pub tx_hash: String,
    pub status: TxStatus,
}

/// Status report for a submitted transaction.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TxReport {
    pub status: TxStatus,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub fee_usd: Option<Decimal>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub gas_used_gwei: Option<Decimal>,
    /// Realized profit attributed by venues that track fills (the paper
    /// venue does); live venues may leave this unset.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub realized_profit_usd: Option<Decimal>,
}

/// Venue-side failures, classified for retry policy.
#[derive(Debug, Clone, Error)]
pub enum VenueError {
    #[error("venue timed out")]
    Timeout,
    #[error("nonce conflict")]
    NonceConflict,
    #[error("transient rpc error: {0}")]
    Rpc(String),
    #[error("insufficient funds")]
    InsufficientFunds,
    #[error("transaction reverted: {0}")]
    Reverted(String),
    #[error("order rejected: {0}")]
    Rejected(String),
}

impl VenueError {
    /// Timeouts, nonce conflicts, and transient RPC failures are worth
    /// another attempt; the rest fail immediately.
    pub fn is_retryable(&self) -> bool {
        matches!(
            self,
            VenueError::Timeout | VenueError::NonceConflict | VenueError::Rpc(_)
        )
    }
}

/// Boundary to the external execution/signing collaborator.
#[async_trait]
pub trait ExecutionVenue: Send + Sync {
    /// Sign and broadcast an order.
    async fn submit(&self, order: &OrderRequest) -> Result<SubmitReceipt, VenueError>;

    /// Check a submitted transaction.
    async fn tx_status(&self, tx_hash: &str) -> Result<TxReport, VenueError>;
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_retryable_classification() {
        assert!(VenueError::Timeout.is_retryable());
        assert!(VenueError::NonceConflict.is_retryable());
        assert!(VenueError::Rpc("503".to_string()).is_retryable());
        assert!(!VenueError::InsufficientFunds.is_retryable());
        assert!(!VenueError::Reverted("out of gas".to_string()).is_retryable());
    }
}
