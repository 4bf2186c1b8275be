//! Execution configuration for bot sessions.
//!
//! `BotExecutionConfig` is the immutable risk/resource policy attached to
//! a session. It only changes through `reconfigure`, which applies a
//! validated patch and returns a fresh snapshot — never by mutating shared
//! state in place. The binary's own settings load from environment
//! variables and config files.

use anyhow::{Context, Result};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};

use crate::error::{EngineError, EngineResult};
use crate::notify::NotificationSettings;
use crate::strategy::ElementFamily;

/// Gas pricing policy for submitted transactions.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "policy", rename_all = "snake_case")]
pub enum GasPolicy {
    /// Let the venue pick; no ceiling enforced.
    UseDefault,
    /// Multiply the network base price, rejected above the ceiling.
    Multiplier {
        multiplier: Decimal,
        ceiling_gwei: Decimal,
    },
}

impl Default for GasPolicy {
    fn default() -> Self {
        GasPolicy::UseDefault
    }
}

/// Risk/resource policy for one execution session.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct BotExecutionConfig {
    /// Maximum trades in flight at once.
    #[serde(default = "default_max_concurrent_trades")]
    pub max_concurrent_trades: u32,
    /// Maximum trades per UTC day.
    #[serde(default = "default_max_daily_trades")]
    pub max_daily_trades: u32,
    /// Maximum fraction of the capital base exposed (0.0-1.0).
    #[serde(default = "default_max_exposure_pct")]
    pub max_exposure_pct: Decimal,
    /// Capital base in USD that exposure is measured against.
    #[serde(default = "default_capital_base_usd")]
    pub capital_base_usd: Decimal,

    /// Global stop-loss as a fraction of the capital base (0.0-1.0).
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub stop_loss_pct: Option<Decimal>,
    /// Global take-profit as a fraction of the capital base (0.0-1.0).
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub take_profit_pct: Option<Decimal>,
    /// Trailing offset that ratchets the stop up from peak profit.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub trailing_stop_pct: Option<Decimal>,

    /// Maximum slippage tolerance attached to market-style orders (0.0-1.0).
    #[serde(default = "default_slippage_tolerance")]
    pub slippage_tolerance: Decimal,
    #[serde(default)]
    pub gas: GasPolicy,

    /// Retry policy for trade submission.
    #[serde(default = "default_max_retries")]
    pub max_retries: u32,
    #[serde(default = "default_retry_delay_ms")]
    pub retry_delay_ms: u64,

    /// Timeout budgets.
    #[serde(default = "default_execution_timeout_ms")]
    pub execution_timeout_ms: u64,
    #[serde(default = "default_transaction_timeout_ms")]
    pub transaction_timeout_ms: u64,

    /// Consecutive tick-level failures before the session escalates to error.
    #[serde(default = "default_max_consecutive_failures")]
    pub max_consecutive_failures: u32,

    #[serde(default)]
    pub notifications: NotificationSettings,

    /// Trading pairs this session may touch.
    #[serde(default = "default_trading_pairs")]
    pub trading_pairs: Vec<String>,
    /// Target network for submitted transactions.
    #[serde(default = "default_network")]
    pub network: String,
    /// Element families this session's strategy is allowed to contain.
    #[serde(default = "default_allowed_element_families")]
    pub allowed_element_families: Vec<ElementFamily>,
}

fn default_max_concurrent_trades() -> u32 {
    3
}

fn default_max_daily_trades() -> u32 {
    10
}

fn default_max_exposure_pct() -> Decimal {
    Decimal::new(25, 2) // 0.25
}

fn default_capital_base_usd() -> Decimal {
    Decimal::new(10_000, 0)
}

fn default_slippage_tolerance() -> Decimal {
    Decimal::new(5, 3) // 0.005 (0.5%)
}

fn default_max_retries() -> u32 {
    3
}

fn default_retry_delay_ms() -> u64 {
    1_000
}

fn default_execution_timeout_ms() -> u64 {
    60_000
}

fn default_transaction_timeout_ms() -> u64 {
    30_000
}

fn default_max_consecutive_failures() -> u32 {
    3
}

fn default_trading_pairs() -> Vec<String> {
    vec!["SOL/USDC".to_string()]
}

fn default_network() -> String {
    "mainnet".to_string()
}

fn default_allowed_element_families() -> Vec<ElementFamily> {
    vec![
        ElementFamily::Trigger,
        ElementFamily::Indicator,
        ElementFamily::Condition,
        ElementFamily::Logic,
        ElementFamily::Action,
    ]
}

impl Default for BotExecutionConfig {
    fn default() -> Self {
        Self {
            max_concurrent_trades: default_max_concurrent_trades(),
            max_daily_trades: default_max_daily_trades(),
            max_exposure_pct: default_max_exposure_pct(),
            capital_base_usd: default_capital_base_usd(),
            stop_loss_pct: None,
            take_profit_pct: None,
            trailing_stop_pct: None,
            slippage_tolerance: default_slippage_tolerance(),
            gas: GasPolicy::default(),
            max_retries: default_max_retries(),
            retry_delay_ms: default_retry_delay_ms(),
            execution_timeout_ms: default_execution_timeout_ms(),
            transaction_timeout_ms: default_transaction_timeout_ms(),
            max_consecutive_failures: default_max_consecutive_failures(),
            notifications: NotificationSettings::default(),
            trading_pairs: default_trading_pairs(),
            network: default_network(),
            allowed_element_families: default_allowed_element_families(),
        }
    }
}

impl BotExecutionConfig {
    /// Validate configuration values.
    pub fn validate(&self) -> EngineResult<()> {
        let fail = |msg: &str| Err(EngineError::InvalidConfig(msg.to_string()));

        if self.max_exposure_pct <= Decimal::ZERO || self.max_exposure_pct > Decimal::ONE {
            return fail("max_exposure_pct must be in (0, 1]");
        }
        if self.capital_base_usd <= Decimal::ZERO {
            return fail("capital_base_usd must be positive");
        }
        if self.slippage_tolerance < Decimal::ZERO || self.slippage_tolerance > Decimal::ONE {
            return fail("slippage_tolerance must be in [0, 1]");
        }
        for (name, value) in [
            ("stop_loss_pct", self.stop_loss_pct),
            ("take_profit_pct", self.take_profit_pct),
            ("trailing_stop_pct", self.trailing_stop_pct),
        ] {
            if let Some(v) = value {
                if v <= Decimal::ZERO || v > Decimal::ONE {
                    return Err(EngineError::InvalidConfig(format!(
                        "{} must be in (0, 1]",
                        name
                    )));
                }
            }
        }
        if let GasPolicy::Multiplier {
            multiplier,
            ceiling_gwei,
        } = &self.gas
        {
            if *multiplier <= Decimal::ZERO {
                return fail("gas multiplier must be positive");
            }
            if *ceiling_gwei <= Decimal::ZERO {
                return fail("gas ceiling must be positive");
            }
        }
        if self.max_concurrent_trades == 0 {
            return fail("max_concurrent_trades must be at least 1");
        }
        if self.max_daily_trades == 0 {
            return fail("max_daily_trades must be at least 1");
        }
        if self.execution_timeout_ms == 0 || self.transaction_timeout_ms == 0 {
            return fail("timeout budgets must be positive");
        }
        if self.max_consecutive_failures == 0 {
            return fail("max_consecutive_failures must be at least 1");
        }
        if self.trading_pairs.is_empty() {
            return fail("at least one trading pair is required");
        }
        Ok(())
    }

    /// Apply a patch and return the validated new snapshot; `self` is
    /// untouched on failure.
    pub fn reconfigure(&self, patch: ConfigPatch) -> EngineResult<BotExecutionConfig> {
        let mut next = self.clone();
        patch.apply_to(&mut next);
        next.validate()?;
        Ok(next)
    }
}

/// Partial update applied by an explicit reconfigure command.
///
/// `None` leaves the field unchanged; optional policy fields use a nested
/// `Option` so a patch can also clear them.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct ConfigPatch {
    pub max_concurrent_trades: Option<u32>,
    pub max_daily_trades: Option<u32>,
    pub max_exposure_pct: Option<Decimal>,
    pub capital_base_usd: Option<Decimal>,
    pub stop_loss_pct: Option<Option<Decimal>>,
    pub take_profit_pct: Option<Option<Decimal>>,
    pub trailing_stop_pct: Option<Option<Decimal>>,
    pub slippage_tolerance: Option<Decimal>,
    pub gas: Option<GasPolicy>,
    pub max_retries: Option<u32>,
    pub retry_delay_ms: Option<u64>,
    pub execution_timeout_ms: Option<u64>,
    pub transaction_timeout_ms: Option<u64>,
    pub max_consecutive_failures: Option<u32>,
    pub notifications: Option<NotificationSettings>,
    pub trading_pairs: Option<Vec<String>>,
    pub network: Option<String>,
    pub allowed_element_families: Option<Vec<ElementFamily>>,
}

impl ConfigPatch {
    fn apply_to(self, config: &mut BotExecutionConfig) {
        macro_rules! patch {
            ($($field:ident),* $(,)?) => {
                $(if let Some(value) = self.$field {
                    config.$field = value;
                })*
            };
        }
        patch!(
            max_concurrent_trades,
            max_daily_trades,
            max_exposure_pct,
            capital_base_usd,
            stop_loss_pct,
            take_profit_pct,
            trailing_stop_pct,
            slippage_tolerance,
            gas,
            max_retries,
            retry_delay_ms,
            execution_timeout_ms,
            transaction_timeout_ms,
            max_consecutive_failures,
            notifications,
            trading_pairs,
            network,
            allowed_element_families,
        );
    }
}

/// Settings for the `botgraph` binary.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AppConfig {
    /// SQLite database path for the ledger.
    #[serde(default = "default_ledger_db")]
    pub ledger_db: String,
    /// SQLite database path for session/strategy snapshots.
    #[serde(default = "default_session_db")]
    pub session_db: String,
    /// Default execution config for sessions started from the CLI.
    #[serde(default)]
    pub execution: BotExecutionConfig,
}

fn default_ledger_db() -> String {
    "data/ledger.db".to_string()
}

fn default_session_db() -> String {
    "data/sessions.db".to_string()
}

impl Default for AppConfig {
    fn default() -> Self {
        Self {
            ledger_db: default_ledger_db(),
            session_db: default_session_db(),
            execution: BotExecutionConfig::default(),
        }
    }
}

impl AppConfig {
    /// Load settings from config files and environment variables.
    pub fn load() -> Result<Self> {
        dotenvy::dotenv().ok();

        let config = config::Config::builder()
            .add_source(config::File::with_name("config").required(false))
            .add_source(
                config::Environment::default()
                    .separator("__")
                    .prefix("BOTGRAPH"),
            )
            .build()
            .context("Failed to build configuration")?;

        config
            .try_deserialize()
            .context("Failed to deserialize configuration")
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rust_decimal_macros::dec;

    #[test]
    fn test_default_config_is_valid() {
        assert!(BotExecutionConfig::default().validate().is_ok());
    }

    #[test]
    fn test_validation_rejects_bad_exposure() {
        let config = BotExecutionConfig {
            max_exposure_pct: dec!(1.5),
            ..Default::default()
        };
        assert!(matches!(
            config.validate(),
            Err(EngineError::InvalidConfig(_))
        ));
    }

    #[test]
    fn test_reconfigure_returns_new_snapshot() {
        let base = BotExecutionConfig::default();
        let patch = ConfigPatch {
            max_daily_trades: Some(1),
            stop_loss_pct: Some(Some(dec!(0.05))),
            ..Default::default()
        };

        let next = base.reconfigure(patch).unwrap();
        assert_eq!(next.max_daily_trades, 1);
        assert_eq!(next.stop_loss_pct, Some(dec!(0.05)));
        // The base snapshot is untouched.
        assert_eq!(base.max_daily_trades, default_max_daily_trades());
        assert_eq!(base.stop_loss_pct, None);
    }

    #[test]
    fn test_reconfigure_rejects_invalid_patch() {
        let base = BotExecutionConfig::default();
        let patch = ConfigPatch {
            max_daily_trades: Some(0),
            ..Default::default()
        };
        assert!(base.reconfigure(patch).is_err());
        assert_eq!(base.max_daily_trades, default_max_daily_trades());
    }

    #[test]
    fn test_patch_can_clear_optional_policy() {
        let base = BotExecutionConfig {
            stop_loss_pct: Some(dec!(0.1)),
            ..Default::default()
        };
        let patch = ConfigPatch {
            stop_loss_pct: Some(None),
            ..Default::default()
        };
        let next = base.reconfigure(patch).unwrap();
        assert_eq!(next.stop_loss_pct, None);
    }
}
