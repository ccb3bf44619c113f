use crate::ctx::Ctx;
use crate::db_model_manager::DbModelManager;
use anyhow::Result;
use chrono::{DateTime, Utc};
use st_domain::{ShipSymbol, TradeGoodSymbol, WaypointSymbol};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PersistedTransactionAction {
    Buy,
    Sell,
}

impl std::fmt::Display for PersistedTransactionAction {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            PersistedTransactionAction::Buy => write!(f, "BUY"),
            PersistedTransactionAction::Sell => write!(f, "SELL"),
        }
    }
}

/// A durable record of one buy/sell at a market, independent from the
/// wire-format `Transaction` embedded in API responses - this is what the
/// persistent store keeps, and what operator-facing trade logs are derived
/// from.
#[derive(Debug, Clone)]
pub struct PersistedTransaction {
    pub ts: DateTime<Utc>,
    pub ship_symbol: ShipSymbol,
    pub waypoint_symbol: WaypointSymbol,
    pub action: PersistedTransactionAction,
    pub good: TradeGoodSymbol,
    pub units: i64,
    pub unit_price: f64,
    pub total_price: f64,
    pub credits_after: i64,
}

pub struct TransactionBmc;

impl TransactionBmc {
    pub async fn insert_transaction(_ctx: &Ctx, mm: &DbModelManager, transaction: &PersistedTransaction) -> Result<()> {
        sqlx::query(
            r#"
INSERT INTO transactions
    (ts, ship_symbol, waypoint_symbol, action, good, units, unit_price, total_price, credits_after)
VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9)
"#,
        )
        .bind(transaction.ts.to_rfc3339())
        .bind(&transaction.ship_symbol.0)
        .bind(&transaction.waypoint_symbol.0)
        .bind(transaction.action.to_string())
        .bind(transaction.good.to_string())
        .bind(transaction.units)
        .bind(transaction.unit_price)
        .bind(transaction.total_price)
        .bind(transaction.credits_after)
        .execute(mm.pool())
        .await?;

        Ok(())
    }
}
