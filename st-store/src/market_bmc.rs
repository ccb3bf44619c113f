use crate::ctx::Ctx;
use crate::db_model_manager::DbModelManager;
use anyhow::Result;
use chrono::{DateTime, Utc};
use itertools::Itertools;
use sqlx::FromRow;
use st_domain::{SystemSymbol, TradeGoodSymbol, WaypointSymbol};
use std::collections::HashMap;

#[derive(Debug, Clone, FromRow)]
struct DbGoodObservationRow {
    ts: String,
    system_symbol: String,
    waypoint_symbol: String,
    good: String,
    buy_price: f64,
    sell_price: f64,
    trade_volume: i64,
    supply: String,
    activity: Option<String>,
}

/// One append-only observation of a single tradeable good at a waypoint,
/// as kept in the persistent store (and, freshly recorded, mirrored into
/// the warehouse's in-memory history for the same good).
#[derive(Debug, Clone)]
pub struct GoodObservation {
    pub ts: DateTime<Utc>,
    pub system_symbol: SystemSymbol,
    pub waypoint_symbol: WaypointSymbol,
    pub good: TradeGoodSymbol,
    pub buy_price: f64,
    pub sell_price: f64,
    pub trade_volume: i64,
    pub supply: String,
    pub activity: Option<String>,
}

impl TryFrom<DbGoodObservationRow> for GoodObservation {
    type Error = anyhow::Error;

    fn try_from(row: DbGoodObservationRow) -> Result<Self> {
        Ok(GoodObservation {
            ts: DateTime::parse_from_rfc3339(&row.ts)?.with_timezone(&Utc),
            system_symbol: SystemSymbol(row.system_symbol),
            waypoint_symbol: WaypointSymbol(row.waypoint_symbol),
            good: serde_json::from_value(serde_json::Value::String(row.good.clone()))?,
            buy_price: row.buy_price,
            sell_price: row.sell_price,
            trade_volume: row.trade_volume,
            supply: row.supply,
            activity: row.activity,
        })
    }
}

pub struct MarketBmc;

impl MarketBmc {
    #[allow(clippy::too_many_arguments)]
    pub async fn insert_observation(_ctx: &Ctx, mm: &DbModelManager, observation: &GoodObservation) -> Result<()> {
        sqlx::query(
            r#"
INSERT INTO market_observations
    (ts, system_symbol, waypoint_symbol, good, buy_price, sell_price, trade_volume, supply, activity)
VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9)
"#,
        )
        .bind(observation.ts.to_rfc3339())
        .bind(&observation.system_symbol.0)
        .bind(&observation.waypoint_symbol.0)
        .bind(observation.good.to_string())
        .bind(observation.buy_price)
        .bind(observation.sell_price)
        .bind(observation.trade_volume)
        .bind(&observation.supply)
        .bind(&observation.activity)
        .execute(mm.pool())
        .await?;

        Ok(())
    }

    /// Returns, per waypoint, the most recent observation of every good ever
    /// seen there - the "hydrate the warehouse's market cache on startup"
    /// query.
    pub async fn fetch_latest_prices_by_waypoint(_ctx: &Ctx, mm: &DbModelManager) -> Result<HashMap<WaypointSymbol, Vec<GoodObservation>>> {
        let rows: Vec<DbGoodObservationRow> = sqlx::query_as(
            r#"
SELECT mo.ts, mo.system_symbol, mo.waypoint_symbol, mo.good, mo.buy_price, mo.sell_price, mo.trade_volume, mo.supply, mo.activity
  FROM market_observations mo
 INNER JOIN (
    SELECT waypoint_symbol, good, MAX(ts) AS max_ts
      FROM market_observations
     GROUP BY waypoint_symbol, good
 ) latest
    ON mo.waypoint_symbol = latest.waypoint_symbol
   AND mo.good = latest.good
   AND mo.ts = latest.max_ts
"#,
        )
        .fetch_all(mm.pool())
        .await?;

        let mut by_waypoint: HashMap<WaypointSymbol, Vec<GoodObservation>> = HashMap::new();
        for row in rows {
            let observation: GoodObservation = row.try_into()?;
            by_waypoint
                .entry(observation.waypoint_symbol.clone())
                .or_default()
                .push(observation);
        }

        for observations in by_waypoint.values_mut() {
            *observations = observations.drain(..).sorted_by_key(|o| o.good.to_string()).collect();
        }

        Ok(by_waypoint)
    }
}
