//! `Strategy` identity and its `StrategyConfig` entry/exit rules.

use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::errors::{SimError, SimResult};

/// Entry/exit configuration for a strategy. Every field is validated by
/// [`StrategyConfig::validate`] before a strategy may be created or a
/// simulation started against it.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct StrategyConfig {
    pub market_cap_threshold: Decimal,
    pub only_new_tokens: bool,
    pub min_buys_for_entry: u32,
    pub entry_time_window_sec: u64,
    pub take_profit_pct: Decimal,
    pub stop_loss_pct: Decimal,
    pub max_hold_time_sec: u64,
    pub fixed_position_size_sol: Decimal,
    pub initial_balance: Decimal,
}

impl StrategyConfig {
    /// Validates the invariants named in the data model: every field
    /// finite, `take_profit_pct`/`stop_loss_pct` strictly positive,
    /// `min_buys_for_entry`/`entry_time_window_sec`/`max_hold_time_sec`
    /// strictly positive, and the initial balance covers at least one
    /// position.
    pub fn validate(&self) -> SimResult<()> {
        if self.market_cap_threshold < Decimal::ZERO {
            return Err(SimError::validation("market_cap_threshold must be >= 0"));
        }
        if self.min_buys_for_entry < 1 {
            return Err(SimError::validation("min_buys_for_entry must be >= 1"));
        }
        if self.entry_time_window_sec == 0 {
            return Err(SimError::validation("entry_time_window_sec must be > 0"));
        }
        if self.take_profit_pct <= Decimal::ZERO {
            return Err(SimError::validation("take_profit_pct must be > 0"));
        }
        if self.stop_loss_pct <= Decimal::ZERO {
            return Err(SimError::validation("stop_loss_pct must be > 0"));
        }
        if self.max_hold_time_sec == 0 {
            return Err(SimError::validation("max_hold_time_sec must be > 0"));
        }
        if self.fixed_position_size_sol <= Decimal::ZERO {
            return Err(SimError::validation("fixed_position_size_sol must be > 0"));
        }
        if self.initial_balance < self.fixed_position_size_sol {
            return Err(SimError::validation(
                "initial_balance must cover at least one position",
            ));
        }
        Ok(())
    }
}

/// A strategy's identity and metadata. Behavior lives in [`StrategyConfig`].
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Strategy {
    pub id: Uuid,
    pub name: String,
    pub description: Option<String>,
    pub tags: Vec<String>,
    pub config: StrategyConfig,
    pub complexity_score: Option<f64>,
    pub risk_score: Option<f64>,
    pub ai_enhanced: bool,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl Strategy {
    pub fn new(name: impl Into<String>, config: StrategyConfig) -> SimResult<Self> {
        config.validate()?;
        let now = Utc::now();
        Ok(Self {
            id: Uuid::new_v4(),
            name: name.into(),
            description: None,
            tags: Vec::new(),
            config,
            complexity_score: None,
            risk_score: None,
            ai_enhanced: false,
            created_at: now,
            updated_at: now,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rust_decimal_macros::dec;

    fn valid_config() -> StrategyConfig {
        StrategyConfig {
            market_cap_threshold: dec!(0),
            only_new_tokens: false,
            min_buys_for_entry: 1,
            entry_time_window_sec: 60,
            take_profit_pct: dec!(25),
            stop_loss_pct: dec!(10),
            max_hold_time_sec: 600,
            fixed_position_size_sol: dec!(1.0),
            initial_balance: dec!(10.0),
        }
    }

    #[test]
    fn valid_config_passes() {
        assert!(valid_config().validate().is_ok());
    }

    #[test]
    fn zero_take_profit_rejected() {
        let mut cfg = valid_config();
        cfg.take_profit_pct = Decimal::ZERO;
        assert!(cfg.validate().is_err());
    }

    #[test]
    fn balance_below_position_size_rejected() {
        let mut cfg = valid_config();
        cfg.initial_balance = dec!(0.5);
        assert!(cfg.validate().is_err());
    }

    #[test]
    fn strategy_new_validates_config() {
        let mut cfg = valid_config();
        cfg.max_hold_time_sec = 0;
        assert!(Strategy::new("bad", cfg).is_err());
    }
}
