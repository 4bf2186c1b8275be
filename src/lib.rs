//! # Botgraph
//!
//! The strategy execution core for automated crypto-trading bots: a typed
//! strategy-graph model plus the session controller that evaluates it
//! against market state, enforces risk limits, dispatches trades, and
//! keeps an auditable ledger.
//!
//! ## Architecture
//!
//! - `strategy`: Typed element graph, mutations, and validation
//! - `evaluator`: Pure post-order graph evaluation with scratch state
//! - `risk`: Ordered risk-gate admission checks over proposed actions
//! - `execution`: Venue boundary, retrying trade executor, paper mock
//! - `session`: Session lifecycle, per-session controller, command surface
//! - `ledger`: Append-only log/trade store and incremental metrics
//! - `market`: Market snapshot types and the data-feed boundary
//! - `config`: Execution config, patching, and app settings
//! - `persistence`: SQLite session/strategy snapshots for restart resume
//! - `notify`: Fire-and-forget notification dispatch
//! - `utils`: Shared utilities and decimal arithmetic

pub mod config;
pub mod error;
pub mod evaluator;
pub mod execution;
pub mod ledger;
pub mod market;
pub mod notify;
pub mod persistence;
pub mod risk;
pub mod session;
pub mod strategy;
pub mod utils;

pub use config::{AppConfig, BotExecutionConfig};
pub use error::{EngineError, EngineResult};
