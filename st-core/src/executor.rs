use anyhow::Result;
use chrono::{Duration, Utc};
use st_domain::{
    FlightMode, MarketData, NavStatus, NavigationGoal, RuntimeContext, RuntimeState, ShipAction, ShipSymbol, TradeGoodSymbol, WaypointSymbol,
    ERROR_CODE_INSUFFICIENT_FUEL,
};
use std::collections::HashSet;
use std::sync::Arc;

use crate::dispatcher::Dispatcher;
use crate::st_client::StClientTrait;
use crate::warehouse::Warehouse;

/// The one seam where a caller needs to branch on *kind* of failure rather
/// than just propagate it: a navigate attempt either succeeds, fails for a
/// reason the caller can recover from in-tick (insufficient fuel → try a
/// slower flight mode), or fails for a reason that should just surface.
#[derive(Debug)]
enum ExecutorOutcome {
    Ok,
    InsufficientFuel,
    Fatal(anyhow::Error),
}

fn classify_navigate_error(err: anyhow::Error) -> ExecutorOutcome {
    if err.to_string().contains(&ERROR_CODE_INSUFFICIENT_FUEL.to_string()) {
        ExecutorOutcome::InsufficientFuel
    } else {
        ExecutorOutcome::Fatal(err)
    }
}

/// Side-effecting counterpart to `Dispatcher`: turns one `ShipAction` into
/// the API calls that carry it out, then updates the runtime entry so the
/// next dispatch sees the resulting state.
pub struct Executor {
    client: Arc<dyn StClientTrait>,
}

impl Executor {
    pub fn new(client: Arc<dyn StClientTrait>) -> Self {
        Executor { client }
    }

    pub async fn execute(&self, warehouse: &mut Warehouse, ship_symbol: &ShipSymbol, action: &ShipAction) -> Result<()> {
        match action {
            ShipAction::Noop => Ok(()),
            ShipAction::Refuel => self.refuel(warehouse, ship_symbol).await,
            ShipAction::NavigateToMine => self.navigate_to_mine(warehouse, ship_symbol).await,
            ShipAction::ExtractMinerals => self.extract_minerals(warehouse, ship_symbol).await,
            ShipAction::ProbeVisitMarket(target) => self.probe_visit_market(warehouse, ship_symbol, target).await,
        }
    }

    /// Re-fetches a ship from the API and overwrites the cached copy. Used
    /// by the scheduler to confirm arrival once a navigating ship's cached
    /// ETA has passed, since nothing else ever refreshes `nav` mid-flight.
    pub async fn refresh_ship(&self, warehouse: &mut Warehouse, ship_symbol: &ShipSymbol) -> Result<()> {
        let response = self.client.get_ship(ship_symbol).await?;
        warehouse.upsert_ship(response.data);
        Ok(())
    }

    /// Ensures the ship is docked, then refuels, persisting the resulting
    /// BUY transaction (file log + store) and updating cached credits.
    async fn refuel(&self, warehouse: &mut Warehouse, ship_symbol: &ShipSymbol) -> Result<()> {
        if warehouse.ships_by_symbol.get(ship_symbol).map(|s| !s.is_docked()).unwrap_or(false) {
            let response = self.client.dock_ship(ship_symbol).await?;
            if let Some(ship) = warehouse.ships_by_symbol.get_mut(ship_symbol) {
                ship.nav = response.data.nav;
            }
        }

        let response = self.client.refuel(ship_symbol, 0, false).await?;
        let body = response.data;

        warehouse
            .record_transaction(st_store::PersistedTransaction {
                ts: body.transaction.timestamp,
                ship_symbol: ship_symbol.clone(),
                waypoint_symbol: body.transaction.waypoint_symbol.clone(),
                action: st_store::PersistedTransactionAction::Buy,
                good: body.transaction.trade_symbol.clone(),
                units: body.transaction.units as i64,
                unit_price: body.transaction.price_per_unit as f64,
                total_price: body.transaction.total_price as f64,
                credits_after: body.agent.credits,
            })
            .await?;

        if let Some(ship) = warehouse.ships_by_symbol.get_mut(ship_symbol) {
            ship.fuel = body.fuel;
        }
        warehouse.upsert_agent(body.agent);

        if let Some(rt) = warehouse.runtime_for_mut(ship_symbol) {
            rt.state = RuntimeState::Idle;
            rt.context = RuntimeContext::Idle;
        }
        Ok(())
    }

    /// Implements the dock-and-sell-all-cargo action: docks if necessary,
    /// then sells every inventory item the market will actually buy
    /// (sellPrice > 0). Items the market has no price for at all are left
    /// in cargo untouched - this never jettisons anything.
    async fn dock_and_sell_all_cargo(&self, warehouse: &mut Warehouse, ship_symbol: &ShipSymbol, market: &MarketData) -> Result<()> {
        if warehouse.ships_by_symbol.get(ship_symbol).map(|s| !s.is_docked()).unwrap_or(false) {
            let response = self.client.dock_ship(ship_symbol).await?;
            if let Some(ship) = warehouse.ships_by_symbol.get_mut(ship_symbol) {
                ship.nav = response.data.nav;
            }
        }

        let sellable: HashSet<&TradeGoodSymbol> = market
            .trade_goods
            .as_ref()
            .map(|goods| goods.iter().filter(|g| g.sell_price > 0).map(|g| &g.symbol).collect())
            .unwrap_or_default();

        let inventory = warehouse
            .ships_by_symbol
            .get(ship_symbol)
            .map(|s| s.cargo.inventory.clone())
            .unwrap_or_default();

        for item in inventory {
            if !sellable.contains(&item.symbol) {
                continue;
            }

            let response = self.client.sell_trade_good(ship_symbol, item.units, item.symbol.clone()).await?;
            let transaction = &response.data.transaction;
            warehouse
                .record_transaction(st_store::PersistedTransaction {
                    ts: transaction.timestamp,
                    ship_symbol: ship_symbol.clone(),
                    waypoint_symbol: transaction.waypoint_symbol.clone(),
                    action: st_store::PersistedTransactionAction::Sell,
                    good: transaction.trade_symbol.clone(),
                    units: transaction.units as i64,
                    unit_price: transaction.price_per_unit as f64,
                    total_price: transaction.total_price as f64,
                    credits_after: response.data.agent.credits,
                })
                .await?;
            if let Some(ship) = warehouse.ships_by_symbol.get_mut(ship_symbol) {
                ship.cargo = response.data.cargo;
            }
            warehouse.upsert_agent(response.data.agent);
        }

        let fuel_sold_here = market
            .trade_goods
            .as_ref()
            .map(|goods| goods.iter().any(|g| g.symbol == TradeGoodSymbol::FUEL && g.purchase_price > 0))
            .unwrap_or(false);
        let fuel_not_full = warehouse
            .ships_by_symbol
            .get(ship_symbol)
            .map(|s| s.fuel.current < s.fuel.capacity)
            .unwrap_or(false);
        if fuel_sold_here && fuel_not_full {
            let _ = self.refuel(warehouse, ship_symbol).await;
        }

        if let Ok(response) = self.client.orbit_ship(ship_symbol).await {
            if let Some(ship) = warehouse.ships_by_symbol.get_mut(ship_symbol) {
                ship.nav = response.data.nav;
            }
        }

        Ok(())
    }

    /// Jettisons cargo with no known buyer anywhere, or whose best known
    /// sell price doesn't clear `MIN_SELL_PRICE`, so a miner doesn't keep
    /// hauling dead weight back to the mine.
    async fn jettison_unworthy_cargo(&self, warehouse: &mut Warehouse, ship_symbol: &ShipSymbol) -> Result<()> {
        let Some(ship) = warehouse.ships_by_symbol.get(ship_symbol).cloned() else {
            return Ok(());
        };

        for item in ship.cargo.inventory {
            let worthy = warehouse
                .best_sell_observation(&item.symbol)
                .map(|o| o.sell_price > crate::dispatcher::MIN_SELL_PRICE)
                .unwrap_or(false);

            if !worthy {
                self.client.jettison(ship_symbol, item.symbol.clone(), item.units).await?;
                if let Some(ship) = warehouse.ships_by_symbol.get_mut(ship_symbol) {
                    let _ = ship.try_remove_cargo(item.units, &item.symbol);
                }
            }
        }

        Ok(())
    }

    async fn navigate_to_mine(&self, warehouse: &mut Warehouse, ship_symbol: &ShipSymbol) -> Result<()> {
        self.jettison_unworthy_cargo(warehouse, ship_symbol).await?;

        let Some(ship) = warehouse.ships_by_symbol.get(ship_symbol).cloned() else {
            return Ok(());
        };
        let candidates = Dispatcher::mineable_waypoints_by_distance(warehouse, &ship);

        for target in candidates.into_iter().take(5) {
            if self.attempt_navigate(warehouse, ship_symbol, &target, NavigationGoal::MineTarget).await? {
                return Ok(());
            }
        }

        self.backoff(warehouse, ship_symbol, Duration::seconds(30));
        Ok(())
    }

    /// Attempts to reach `target`, trying CRUISE first and falling back to
    /// DRIFT on an insufficient-fuel response. Records NAVIGATING state and
    /// the navigation goal on success.
    async fn attempt_navigate(&self, warehouse: &mut Warehouse, ship_symbol: &ShipSymbol, target: &WaypointSymbol, goal: NavigationGoal) -> Result<bool> {
        if warehouse
            .ships_by_symbol
            .get(ship_symbol)
            .map(|s| s.is_docked())
            .unwrap_or(false)
        {
            let orbit = self.client.orbit_ship(ship_symbol).await?;
            if let Some(ship) = warehouse.ships_by_symbol.get_mut(ship_symbol) {
                ship.nav = orbit.data.nav;
            }
        }

        for mode in [FlightMode::Cruise, FlightMode::Drift] {
            let _ = self.client.set_flight_mode(ship_symbol, &mode).await;

            let outcome = match self.client.navigate(ship_symbol, target).await {
                Ok(response) => {
                    if let Some(ship) = warehouse.ships_by_symbol.get_mut(ship_symbol) {
                        ship.nav = response.data.nav;
                        ship.fuel = response.data.fuel;
                    }
                    if let Some(rt) = warehouse.runtime_for_mut(ship_symbol) {
                        rt.state = RuntimeState::Navigating;
                        rt.context = RuntimeContext::NavigatingTo { goal, target: target.clone() };
                        rt.next_wakeup_ts = None;
                    }
                    ExecutorOutcome::Ok
                }
                Err(e) => classify_navigate_error(e),
            };

            match outcome {
                ExecutorOutcome::Ok => return Ok(true),
                ExecutorOutcome::InsufficientFuel => continue,
                ExecutorOutcome::Fatal(e) => return Err(e),
            }
        }

        Ok(false)
    }

    async fn extract_minerals(&self, warehouse: &mut Warehouse, ship_symbol: &ShipSymbol) -> Result<()> {
        let response = self.client.extract(ship_symbol).await?;
        let body = response.data;

        if let Some(ship) = warehouse.ships_by_symbol.get_mut(ship_symbol) {
            ship.cargo = body.cargo;
            ship.cooldown = body.cooldown.clone();
        }

        let wakeup = body
            .cooldown
            .expiration
            .unwrap_or_else(|| Utc::now() + Duration::seconds(body.cooldown.remaining_seconds.max(1) as i64));

        if let Some(wp) = warehouse.ships_by_symbol.get(ship_symbol).map(|s| s.nav.waypoint_symbol.clone()) {
            if let Some(rt) = warehouse.runtime_for_mut(ship_symbol) {
                rt.state = RuntimeState::Mining;
                rt.context = RuntimeContext::Mining { mine_target: wp };
                rt.next_wakeup_ts = Some(wakeup);
            }
        }

        Ok(())
    }

    /// Visits a dispatcher-resolved market waypoint: navigates there if not
    /// yet arrived, otherwise records fresh prices and, for an excavator
    /// mid-sell, sells what it can and either continues selling the
    /// remainder at the next best buyer or jettisons what nobody wants.
    async fn probe_visit_market(&self, warehouse: &mut Warehouse, ship_symbol: &ShipSymbol, target: &WaypointSymbol) -> Result<()> {
        let Some(ship) = warehouse.ships_by_symbol.get(ship_symbol).cloned() else {
            return Ok(());
        };

        if ship.nav.status != NavStatus::InTransit && ship.nav.waypoint_symbol == *target {
            let market = self.client.get_marketplace(target).await?;
            let system_symbol = ship.nav.system_symbol.clone();
            warehouse.upsert_market_snapshot(system_symbol.clone(), &market.data);

            if let Some(trade_goods) = &market.data.trade_goods {
                let now = Utc::now();
                for good in trade_goods {
                    warehouse
                        .record_observation(st_store::GoodObservation {
                            ts: now,
                            system_symbol: system_symbol.clone(),
                            waypoint_symbol: target.clone(),
                            good: good.symbol.clone(),
                            buy_price: good.purchase_price as f64,
                            sell_price: good.sell_price as f64,
                            trade_volume: good.trade_volume as i64,
                            supply: good.supply.to_string(),
                            activity: good.activity.as_ref().map(|a| a.to_string()),
                        })
                        .await?;
                }
            }

            let is_selling_excavator = matches!(ship.registration.role, st_domain::ShipRegistrationRole::Excavator)
                && warehouse.runtime_for(ship_symbol).map(|rt| rt.context.is_selling()).unwrap_or(false);

            if is_selling_excavator && ship.cargo.units > 0 {
                self.dock_and_sell_all_cargo(warehouse, ship_symbol, &market.data).await?;
                self.continue_or_end_selling(warehouse, ship_symbol).await?;
            } else if let Some(rt) = warehouse.runtime_for_mut(ship_symbol) {
                rt.state = RuntimeState::Idle;
                rt.context = RuntimeContext::Idle;
            }
            return Ok(());
        }

        self.attempt_navigate(warehouse, ship_symbol, target, NavigationGoal::Market).await?;
        Ok(())
    }

    /// After a sell round, either hands the ship off to the next known
    /// buyer for whatever is still in cargo, or jettisons the leftovers and
    /// drops out of selling mode.
    async fn continue_or_end_selling(&self, warehouse: &mut Warehouse, ship_symbol: &ShipSymbol) -> Result<()> {
        let Some(ship) = warehouse.ships_by_symbol.get(ship_symbol).cloned() else {
            return Ok(());
        };

        if ship.cargo.units == 0 {
            if let Some(rt) = warehouse.runtime_for_mut(ship_symbol) {
                rt.state = RuntimeState::Idle;
                rt.context = RuntimeContext::Idle;
            }
            return Ok(());
        }

        match Dispatcher::best_known_buyer(warehouse, &ship) {
            Some(next_target) => {
                let remaining = ship.cargo.inventory.iter().map(|inv| inv.symbol.clone()).collect();
                if let Some(rt) = warehouse.runtime_for_mut(ship_symbol) {
                    rt.state = RuntimeState::Idle;
                    rt.context = RuntimeContext::Selling {
                        target_market: next_target,
                        remaining_cargo_symbols: remaining,
                    };
                }
            }
            None => {
                for item in ship.cargo.inventory.clone() {
                    self.client.jettison(ship_symbol, item.symbol.clone(), item.units).await?;
                    if let Some(ship) = warehouse.ships_by_symbol.get_mut(ship_symbol) {
                        let _ = ship.try_remove_cargo(item.units, &item.symbol);
                    }
                }
                if let Some(rt) = warehouse.runtime_for_mut(ship_symbol) {
                    rt.state = RuntimeState::Idle;
                    rt.context = RuntimeContext::Idle;
                }
            }
        }

        Ok(())
    }

    fn backoff(&self, warehouse: &mut Warehouse, ship_symbol: &ShipSymbol, by: Duration) {
        if let Some(rt) = warehouse.runtime_for_mut(ship_symbol) {
            rt.next_wakeup_ts = Some(Utc::now() + by);
        }
    }
}

#[cfg(test)]
mod test {
    use super::*;

    #[test]
    fn classifies_insufficient_fuel_error_body() {
        let err = anyhow::anyhow!(
            "API request failed. Status: 400 Bad Request, Body: {{\"error\":{{\"code\":{},\"message\":\"not enough fuel\"}}}}",
            ERROR_CODE_INSUFFICIENT_FUEL
        );
        assert!(matches!(classify_navigate_error(err), ExecutorOutcome::InsufficientFuel));
    }

    #[test]
    fn classifies_unrelated_error_as_fatal() {
        let err = anyhow::anyhow!("connection reset by peer");
        assert!(matches!(classify_navigate_error(err), ExecutorOutcome::Fatal(_)));
    }
}
