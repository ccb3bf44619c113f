use anyhow::Result;
use chrono::{DateTime, Duration, Utc};
use std::collections::HashMap;
use std::fs::OpenOptions;
use std::io::Write as _;
use tracing::info;

use st_domain::{Agent, MarketData, MarketTradeGood, ShipRuntime, ShipSymbol, SystemSymbol, SystemsPageData, TradeGoodSymbol, Waypoint, WaypointSymbol};
use st_store::{db, Ctx, DbModelManager, GoodObservation, MarketBmc, PersistedTransaction, TransactionBmc};

/// How often `maybe_prune` is allowed to actually touch the store, per
/// §4.2's "at most once per hour" retention rule.
const PRUNE_INTERVAL: Duration = Duration::hours(1);

/// The most recently fetched set of sell/buy prices at one waypoint,
/// replacing the previous snapshot wholesale on every visit.
#[derive(Debug, Clone)]
pub struct MarketSnapshot {
    pub system_symbol: SystemSymbol,
    pub waypoint_symbol: WaypointSymbol,
    pub seen_at: DateTime<Utc>,
    pub trade_goods: Vec<MarketTradeGood>,
}

/// In-memory mirror of everything the dispatcher needs on every tick:
/// the fleet, discovered waypoints, market price history, and per-ship
/// runtime state. Hydrated from the persistent store on startup, kept
/// current by the scheduler as API responses come back. Also the one
/// place that writes observations and transactions through to the store,
/// mirroring the original warehouse's "record appends to memory and disk
/// together" behavior.
#[derive(Debug)]
pub struct Warehouse {
    pub agent: Option<Agent>,
    pub ships_by_symbol: HashMap<ShipSymbol, st_domain::Ship>,
    pub runtime_by_ship: HashMap<ShipSymbol, ShipRuntime>,
    pub systems_by_symbol: HashMap<SystemSymbol, SystemsPageData>,
    pub waypoints_by_symbol: HashMap<WaypointSymbol, Waypoint>,
    pub goods_observations: HashMap<WaypointSymbol, Vec<GoodObservation>>,
    pub market_snapshots: HashMap<WaypointSymbol, MarketSnapshot>,
    ctx: Ctx,
    mm: DbModelManager,
    retention_days: i64,
    last_pruned_at: Option<DateTime<Utc>>,
}

impl Warehouse {
    pub fn new(ctx: Ctx, mm: DbModelManager, retention_days: i64) -> Self {
        Warehouse {
            agent: None,
            ships_by_symbol: HashMap::new(),
            runtime_by_ship: HashMap::new(),
            systems_by_symbol: HashMap::new(),
            waypoints_by_symbol: HashMap::new(),
            goods_observations: HashMap::new(),
            market_snapshots: HashMap::new(),
            ctx,
            mm,
            retention_days,
            last_pruned_at: None,
        }
    }

    /// Loads the most recent observation of every good at every waypoint
    /// ever seen, so price knowledge survives a restart.
    pub async fn hydrate_market_knowledge(&mut self) -> Result<()> {
        self.goods_observations = MarketBmc::fetch_latest_prices_by_waypoint(&self.ctx, &self.mm).await?;
        Ok(())
    }

    pub fn upsert_agent(&mut self, agent: Agent) {
        self.agent = Some(agent);
    }

    pub fn upsert_ship(&mut self, ship: st_domain::Ship) {
        let symbol = ship.symbol.clone();
        self.runtime_by_ship.entry(symbol.clone()).or_insert_with(|| ShipRuntime::idle(symbol.clone()));
        self.ships_by_symbol.insert(symbol, ship);
    }

    pub fn upsert_fleet(&mut self, ships: Vec<st_domain::Ship>) {
        for ship in ships {
            self.upsert_ship(ship);
        }
    }

    pub fn upsert_waypoint(&mut self, waypoint: Waypoint) {
        self.waypoints_by_symbol.insert(waypoint.symbol.clone(), waypoint);
    }

    pub fn upsert_system(&mut self, system: SystemsPageData) {
        self.systems_by_symbol.insert(system.symbol.clone(), system);
    }

    pub fn upsert_systems(&mut self, systems: Vec<SystemsPageData>) {
        for system in systems {
            self.upsert_system(system);
        }
    }

    pub fn get_waypoints_in_system(&self, system_symbol: &SystemSymbol) -> Vec<&Waypoint> {
        self.waypoints_by_symbol.values().filter(|wp| &wp.system_symbol == system_symbol).collect()
    }

    /// Waypoints orbiting `symbol`, looked up via its cached `orbitals`.
    pub fn get_children(&self, symbol: &WaypointSymbol) -> Vec<&Waypoint> {
        let Some(wp) = self.waypoints_by_symbol.get(symbol) else {
            return Vec::new();
        };
        wp.orbitals.iter().filter_map(|orbital| self.waypoints_by_symbol.get(&orbital.symbol)).collect()
    }

    /// The waypoint `symbol` orbits, if any, looked up via its cached `orbits`.
    pub fn get_parent(&self, symbol: &WaypointSymbol) -> Option<&Waypoint> {
        let wp = self.waypoints_by_symbol.get(symbol)?;
        let parent_symbol = wp.orbits.as_ref()?;
        self.waypoints_by_symbol.get(parent_symbol)
    }

    pub fn runtime_for(&self, ship_symbol: &ShipSymbol) -> Option<&ShipRuntime> {
        self.runtime_by_ship.get(ship_symbol)
    }

    pub fn runtime_for_mut(&mut self, ship_symbol: &ShipSymbol) -> Option<&mut ShipRuntime> {
        self.runtime_by_ship.get_mut(ship_symbol)
    }

    /// Persists a freshly observed price and mirrors it into the in-memory
    /// history, then applies the rate-limited retention prune. Matches the
    /// original warehouse's "record appends to memory and disk together".
    pub async fn record_observation(&mut self, observation: GoodObservation) -> Result<()> {
        MarketBmc::insert_observation(&self.ctx, &self.mm, &observation).await?;

        self.goods_observations
            .entry(observation.waypoint_symbol.clone())
            .or_default()
            .push(observation);

        self.maybe_prune().await
    }

    /// Persists a completed buy/sell, appends it to the operator-facing
    /// trade and credit logs, then applies the rate-limited retention
    /// prune.
    pub async fn record_transaction(&mut self, transaction: PersistedTransaction) -> Result<()> {
        TransactionBmc::insert_transaction(&self.ctx, &self.mm, &transaction).await?;
        append_trade_log(&transaction)?;
        append_credits_log(transaction.credits_after)?;
        self.maybe_prune().await
    }

    /// Replaces the cached snapshot for the market's waypoint. Logs each
    /// good whose price changed since the last snapshot, or a single
    /// "updated" line when nothing changed, matching the original
    /// warehouse's "snapshot plus change log" behavior.
    pub fn upsert_market_snapshot(&mut self, system_symbol: SystemSymbol, market: &MarketData) {
        let waypoint_symbol = market.symbol.clone();
        let new_goods = market.trade_goods.clone().unwrap_or_default();

        match self.market_snapshots.get(&waypoint_symbol) {
            Some(previous) => {
                let mut changed = false;
                for good in &new_goods {
                    match previous.trade_goods.iter().find(|g| g.symbol == good.symbol) {
                        Some(prior) if prior.sell_price != good.sell_price || prior.purchase_price != good.purchase_price => {
                            changed = true;
                            info!(%waypoint_symbol, good = %good.symbol, sell_price = good.sell_price, buy_price = good.purchase_price, "market price changed");
                        }
                        None => {
                            changed = true;
                            info!(%waypoint_symbol, good = %good.symbol, "market good newly observed");
                        }
                        _ => {}
                    }
                }
                if !changed {
                    info!(%waypoint_symbol, "market snapshot updated, no price changes");
                }
            }
            None => info!(%waypoint_symbol, goods = new_goods.len(), "market snapshot recorded"),
        }

        self.market_snapshots.insert(
            waypoint_symbol.clone(),
            MarketSnapshot {
                system_symbol,
                waypoint_symbol,
                seen_at: Utc::now(),
                trade_goods: new_goods,
            },
        );
    }

    pub fn has_market_snapshot(&self, waypoint_symbol: &WaypointSymbol) -> bool {
        self.market_snapshots.contains_key(waypoint_symbol)
    }

    pub fn market_snapshot_age(&self, waypoint_symbol: &WaypointSymbol) -> Option<DateTime<Utc>> {
        self.market_snapshots.get(waypoint_symbol).map(|s| s.seen_at)
    }

    /// The observation with the highest sell price ever recorded for `good`,
    /// across every waypoint.
    pub fn best_sell_observation(&self, good: &TradeGoodSymbol) -> Option<&GoodObservation> {
        self.goods_observations
            .values()
            .flatten()
            .filter(|o| &o.good == good)
            .max_by(|a, b| a.sell_price.total_cmp(&b.sell_price))
    }

    /// The observation with the lowest purchase price ever recorded for
    /// `good`, across every waypoint.
    pub fn best_purchase_observation(&self, good: &TradeGoodSymbol) -> Option<&GoodObservation> {
        self.goods_observations
            .values()
            .flatten()
            .filter(|o| &o.good == good)
            .min_by(|a, b| a.buy_price.total_cmp(&b.buy_price))
    }

    /// Deletes rows older than `retention_days`, but at most once per hour
    /// - every write calls this, but it's a no-op unless the interval has
    /// elapsed.
    async fn maybe_prune(&mut self) -> Result<()> {
        let now = Utc::now();
        if let Some(last) = self.last_pruned_at {
            if now - last < PRUNE_INTERVAL {
                return Ok(());
            }
        }

        let cutoff = (now - Duration::days(self.retention_days)).to_rfc3339();
        db::delete_rows_older_than(self.mm.pool(), &cutoff).await?;
        self.last_pruned_at = Some(now);
        Ok(())
    }

    pub fn latest_price(&self, waypoint_symbol: &WaypointSymbol, good: &st_domain::TradeGoodSymbol) -> Option<&GoodObservation> {
        self.goods_observations
            .get(waypoint_symbol)?
            .iter()
            .filter(|o| &o.good == good)
            .max_by_key(|o| o.ts)
    }

    /// Waypoints with a known, positive sell price for `good`, nearest
    /// candidates first is left to the caller since distance depends on
    /// the querying ship's current position.
    pub fn known_buyers_of(&self, good: &st_domain::TradeGoodSymbol) -> Vec<&WaypointSymbol> {
        self.goods_observations
            .iter()
            .filter(|(_, obs)| obs.iter().any(|o| &o.good == good && o.sell_price > 0.0))
            .map(|(wp, _)| wp)
            .collect()
    }

    pub fn waypoints_with_trait(&self, trait_symbol: st_domain::WaypointTraitSymbol) -> Vec<&Waypoint> {
        self.waypoints_by_symbol
            .values()
            .filter(|wp| wp.traits.iter().any(|t| t.symbol == trait_symbol))
            .collect()
    }

    pub fn ship_count(&self) -> usize {
        self.ships_by_symbol.len()
    }

    pub fn waypoint_count(&self) -> usize {
        self.waypoints_by_symbol.len()
    }
}

/// Appends one tab-separated line to `logs/trades.log`, creating the
/// directory and file on first use. Best-effort for the operator, not
/// part of the persisted record - failures here never abort a trade.
fn append_trade_log(transaction: &PersistedTransaction) -> Result<()> {
    std::fs::create_dir_all("logs")?;
    let mut file = OpenOptions::new().create(true).append(true).open("logs/trades.log")?;
    writeln!(
        file,
        "{}\t{}\t{}\t{}\t{}\t{}\t{}\t{}",
        transaction.ts.to_rfc3339(),
        transaction.action,
        transaction.ship_symbol,
        transaction.waypoint_symbol,
        transaction.good,
        transaction.units,
        transaction.unit_price,
        transaction.total_price
    )?;
    Ok(())
}

/// Appends one tab-separated line to `logs/credits.log` after every
/// transaction, giving the operator a running credits timeline without
/// needing to query the store.
fn append_credits_log(credits: i64) -> Result<()> {
    std::fs::create_dir_all("logs")?;
    let mut file = OpenOptions::new().create(true).append(true).open("logs/credits.log")?;
    writeln!(file, "{}\t{}", Utc::now().to_rfc3339(), credits)?;
    Ok(())
}

#[cfg(test)]
mod test {
    use super::*;
    use st_domain::{SystemSymbol, TradeGoodSymbol};
    use test_log::test;

    async fn test_warehouse() -> Warehouse {
        let pool = db::connect("sqlite::memory:").await.unwrap();
        Warehouse::new(Ctx::root(), DbModelManager::new(pool), 2)
    }

    fn observation(wp: &str, good: TradeGoodSymbol, sell_price: f64) -> GoodObservation {
        GoodObservation {
            ts: Utc::now(),
            system_symbol: SystemSymbol("X1-TEST".into()),
            waypoint_symbol: WaypointSymbol(wp.into()),
            good,
            buy_price: 1.0,
            sell_price,
            trade_volume: 10,
            supply: "MODERATE".into(),
            activity: None,
        }
    }

    #[test(tokio::test)]
    async fn tracks_known_buyers() {
        let mut w = test_warehouse().await;
        w.record_observation(observation("X1-TEST-A1", TradeGoodSymbol::IRON_ORE, 10.0)).await.unwrap();
        w.record_observation(observation("X1-TEST-B1", TradeGoodSymbol::IRON_ORE, 0.0)).await.unwrap();

        let buyers = w.known_buyers_of(&TradeGoodSymbol::IRON_ORE);
        assert_eq!(buyers, vec![&WaypointSymbol("X1-TEST-A1".into())]);
    }

    #[test(tokio::test)]
    async fn latest_price_picks_most_recent() {
        let mut w = test_warehouse().await;
        let first = observation("X1-TEST-A1", TradeGoodSymbol::IRON_ORE, 5.0);
        let mut second = observation("X1-TEST-A1", TradeGoodSymbol::IRON_ORE, 7.0);
        second.ts = first.ts + chrono::Duration::seconds(1);

        w.record_observation(first).await.unwrap();
        w.record_observation(second).await.unwrap();

        let latest = w.latest_price(&WaypointSymbol("X1-TEST-A1".into()), &TradeGoodSymbol::IRON_ORE).unwrap();
        assert_eq!(latest.sell_price, 7.0);
    }

    #[test(tokio::test)]
    async fn prune_is_skipped_within_the_hour() {
        let mut w = test_warehouse().await;
        w.record_observation(observation("X1-TEST-A1", TradeGoodSymbol::IRON_ORE, 10.0)).await.unwrap();
        let first_prune = w.last_pruned_at;
        w.record_observation(observation("X1-TEST-A1", TradeGoodSymbol::IRON_ORE, 11.0)).await.unwrap();
        assert_eq!(first_prune, w.last_pruned_at);
    }
}
