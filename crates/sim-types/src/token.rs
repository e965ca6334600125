//! `Token` and `Trade` — the market-observed entities fed in by the
//! Ingestor. Mutated only via the Ingestor; append-only / upsert-by-key,
//! never deleted.

use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// An on-chain token, identified by its unique mint address.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Token {
    pub id: Uuid,
    pub mint_address: String,
    pub creator: Option<String>,
    pub name: Option<String>,
    pub symbol: Option<String>,
    pub market_cap: Option<Decimal>,
    pub usd_market_cap: Option<Decimal>,
    pub created_timestamp: DateTime<Utc>,
    pub complete: bool,
}

impl Token {
    pub fn new(mint_address: impl Into<String>, created_timestamp: DateTime<Utc>) -> Self {
        Self {
            id: Uuid::new_v4(),
            mint_address: mint_address.into(),
            creator: None,
            name: None,
            symbol: None,
            market_cap: None,
            usd_market_cap: None,
            created_timestamp,
            complete: false,
        }
    }

    /// Age of this token relative to `now`, used by `onlyNewTokens`.
    pub fn age_seconds(&self, now: DateTime<Utc>) -> i64 {
        (now - self.created_timestamp).num_seconds().max(0)
    }
}

/// A trade observed on a token, as reported by the upstream feed.
/// Append-only; `signature` is unique.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Trade {
    pub id: Uuid,
    pub token_id: Uuid,
    pub mint_address: String,
    pub signature: String,
    pub sol_amount: Decimal,
    pub token_amount: Decimal,
    pub is_buy: bool,
    pub user_address: String,
    pub timestamp: DateTime<Utc>,
    pub market_cap: Option<Decimal>,
    pub usd_market_cap: Option<Decimal>,
}

impl Trade {
    /// Derives the trade price as `sol_amount / token_amount`.
    ///
    /// Returns `None` when `token_amount` is zero — such events are
    /// rejected rather than treated as a carried-forward mark price (see
    /// the price-derivation design decision).
    pub fn price(&self) -> Option<Decimal> {
        if self.token_amount.is_zero() {
            None
        } else {
            Some(self.sol_amount / self.token_amount)
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rust_decimal_macros::dec;

    #[test]
    fn price_derivation_matches_spec_formula() {
        let trade = Trade {
            id: Uuid::new_v4(),
            token_id: Uuid::new_v4(),
            mint_address: "T".into(),
            signature: "sig1".into(),
            sol_amount: dec!(1.0),
            token_amount: dec!(1000),
            is_buy: true,
            user_address: "u1".into(),
            timestamp: Utc::now(),
            market_cap: None,
            usd_market_cap: None,
        };
        assert_eq!(trade.price(), Some(dec!(0.001)));
    }

    #[test]
    fn zero_token_amount_rejected() {
        let trade = Trade {
            id: Uuid::new_v4(),
            token_id: Uuid::new_v4(),
            mint_address: "T".into(),
            signature: "sig2".into(),
            sol_amount: dec!(1.0),
            token_amount: Decimal::ZERO,
            is_buy: true,
            user_address: "u1".into(),
            timestamp: Utc::now(),
            market_cap: None,
            usd_market_cap: None,
        };
        assert_eq!(trade.price(), None);
    }

    #[test]
    fn age_seconds_never_negative() {
        let now = Utc::now();
        let token = Token::new("T", now + chrono::Duration::seconds(5));
        assert_eq!(token.age_seconds(now), 0);
    }
}
