//! Typed events: the upstream feed's `tokenCreated`/`tradeCreated` frames
//! ([`IngestEvent`]) and the Event Bus's seven outbound kinds
//! ([`EngineEvent`]). Both are closed, strongly-typed sets — no open-ended
//! reflection on field names is needed anywhere downstream.

use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::simulation::ExitReason;

/// Raw upstream frame, normalized by the Ingestor onto the two bounded
/// channels. Mirrors the wire schema in the external-interfaces contract.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type")]
pub enum IngestEvent {
    #[serde(rename = "tokenCreated")]
    TokenCreated {
        mint: String,
        creator: Option<String>,
        name: Option<String>,
        symbol: Option<String>,
        image_uri: Option<String>,
        twitter: Option<String>,
        website: Option<String>,
        telegram: Option<String>,
        metadata_uri: Option<String>,
        created_timestamp: i64,
        market_cap: Option<Decimal>,
        usd_market_cap: Option<Decimal>,
        complete: Option<bool>,
        king_of_the_hill_timestamp: Option<i64>,
    },
    #[serde(rename = "tradeCreated")]
    TradeCreated {
        mint: String,
        signature: String,
        sol_amount: Decimal,
        token_amount: Decimal,
        is_buy: bool,
        user: String,
        timestamp: i64,
        market_cap: Option<Decimal>,
        usd_market_cap: Option<Decimal>,
    },
}

/// AI Caller's qualitative rating of a strategy's performance.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum PerformanceRating {
    Excellent,
    Good,
    Average,
    Poor,
    VeryPoor,
}

/// One of the seven Event Bus event kinds. Every variant carries
/// `strategy_id` and `timestamp` via the enclosing [`EngineEvent`]
/// envelope, not duplicated per-variant.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum EngineEventKind {
    SimulationStarted {
        run_id: Uuid,
    },
    SimulationStatus {
        total_trades: u64,
        active_trades: u64,
        profitable_trades: u64,
        losing_trades: u64,
        win_rate: Decimal,
        roi: Decimal,
        current_balance: Decimal,
        initial_balance: Decimal,
    },
    TradeExecuted {
        token_mint: String,
        price: Decimal,
        amount: Decimal,
        entry_market_cap: Option<Decimal>,
        current_balance: Decimal,
    },
    TradeClosed {
        token_mint: String,
        entry_price: Decimal,
        exit_price: Decimal,
        profit_loss: Decimal,
        profit_loss_pct: Decimal,
        exit_reason: ExitReason,
        entry_market_cap: Option<Decimal>,
        exit_market_cap: Option<Decimal>,
    },
    SimulationBalanceDepleted {
        remaining_balance: Decimal,
        position_size: Decimal,
    },
    SimulationCompleted {
        total_iterations: u64,
        execution_time_sec: u64,
        failed: bool,
    },
    AiAnalysis {
        rating: PerformanceRating,
        analysis: String,
        metrics: serde_json::Value,
    },
}

/// The envelope every Event Bus subscriber receives.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct EngineEvent {
    pub strategy_id: Uuid,
    pub timestamp: i64,
    #[serde(flatten)]
    pub kind: EngineEventKind,
}

impl EngineEvent {
    pub fn new(strategy_id: Uuid, kind: EngineEventKind) -> Self {
        Self {
            strategy_id,
            timestamp: Utc::now().timestamp(),
            kind,
        }
    }

    pub fn at(strategy_id: Uuid, timestamp: DateTime<Utc>, kind: EngineEventKind) -> Self {
        Self {
            strategy_id,
            timestamp: timestamp.timestamp(),
            kind,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rust_decimal_macros::dec;

    #[test]
    fn ingest_event_roundtrips_token_created() {
        let raw = r#"{"type":"tokenCreated","mint":"T","creator":null,"name":null,"symbol":null,
            "image_uri":null,"twitter":null,"website":null,"telegram":null,"metadata_uri":null,
            "created_timestamp":0,"market_cap":null,"usd_market_cap":5000,"complete":null,
            "king_of_the_hill_timestamp":null}"#;
        let event: IngestEvent = serde_json::from_str(raw).unwrap();
        match event {
            IngestEvent::TokenCreated { mint, usd_market_cap, .. } => {
                assert_eq!(mint, "T");
                assert_eq!(usd_market_cap, Some(dec!(5000)));
            }
            _ => panic!("expected TokenCreated"),
        }
    }

    #[test]
    fn engine_event_serializes_with_type_tag() {
        let event = EngineEvent::new(
            Uuid::new_v4(),
            EngineEventKind::SimulationBalanceDepleted {
                remaining_balance: dec!(1.0),
                position_size: dec!(4.0),
            },
        );
        let json = serde_json::to_value(&event).unwrap();
        assert_eq!(json["type"], "simulation_balance_depleted");
        assert_eq!(json["remaining_balance"], "1.0");
    }
}
