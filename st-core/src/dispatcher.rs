use chrono::{DateTime, Utc};
use itertools::Itertools;
use st_domain::{
    distance_to, LabelledCoordinate, NavStatus, NavigationGoal, RuntimeContext, RuntimeState, ShipAction, ShipRegistrationRole, ShipSymbol, TradeGoodSymbol,
    WaypointSymbol, WaypointTraitSymbol, MINEABLE_TRAITS,
};

use crate::warehouse::Warehouse;

/// Minimum per-unit sell price a good must fetch before a miner will bother
/// hauling it to a market; anything cheaper is left for jettisoning instead.
pub const MIN_SELL_PRICE: f64 = 10.0;

/// Pure decision function: given the current warehouse state, say what a
/// single ship should do next. Never calls the network and never mutates
/// anything beyond the runtime entry it is handed to record an in-flight
/// decision (e.g. which market a probe is now targeting).
pub struct Dispatcher;

impl Dispatcher {
    /// The instant at which `ship_symbol` should next be reconsidered.
    /// Prefers the runtime's own planned wakeup; falls back to the ship's
    /// nav arrival or cooldown expiration, and finally to "now".
    pub fn ship_readiness(warehouse: &Warehouse, ship_symbol: &ShipSymbol) -> DateTime<Utc> {
        let now = Utc::now();

        if let Some(rt) = warehouse.runtime_for(ship_symbol) {
            if let Some(wakeup) = rt.next_wakeup_ts {
                return wakeup.max(now);
            }
        }

        let Some(ship) = warehouse.ships_by_symbol.get(ship_symbol) else {
            return now;
        };

        let arrival = ship.nav.route.arrival;
        let cooldown = ship.cooldown.expiration.unwrap_or(now);
        arrival.max(cooldown).max(now)
    }

    /// May write a fresh `target_market`/`selling` decision into the ship's
    /// runtime context to hand off to the executor; never calls the network.
    pub fn decide_next_action(warehouse: &mut Warehouse, ship_symbol: &ShipSymbol) -> ShipAction {
        let Some(ship) = warehouse.ships_by_symbol.get(ship_symbol).cloned() else {
            return ShipAction::Noop;
        };
        let Some((state, context)) = warehouse.runtime_for(ship_symbol).map(|rt| (rt.state, rt.context.clone())) else {
            return ShipAction::Noop;
        };

        match state {
            RuntimeState::Idle => Self::decide_idle(warehouse, ship_symbol, &ship, &context),
            RuntimeState::Navigating => match &context {
                RuntimeContext::NavigatingTo {
                    goal: NavigationGoal::MineTarget,
                    ..
                } if ship.nav.status != NavStatus::InTransit => ShipAction::ExtractMinerals,
                _ => ShipAction::Noop,
            },
            RuntimeState::Mining => {
                if ship.cargo.units < ship.cargo.capacity {
                    ShipAction::ExtractMinerals
                } else {
                    ShipAction::Noop
                }
            }
        }
    }

    fn decide_idle(warehouse: &mut Warehouse, ship_symbol: &ShipSymbol, ship: &st_domain::Ship, context: &RuntimeContext) -> ShipAction {
        if ship.fuel.current < ship.fuel.capacity && Self::current_waypoint_sells_fuel(warehouse, ship) {
            return ShipAction::Refuel;
        }

        match ship.registration.role {
            ShipRegistrationRole::Satellite => Self::nearest_unvisited_marketplace(warehouse, ship)
                .map(ShipAction::ProbeVisitMarket)
                .unwrap_or(ShipAction::Noop),
            ShipRegistrationRole::Excavator => {
                if context.is_selling() && ship.cargo.units > 0 {
                    Self::best_known_buyer(warehouse, ship)
                        .map(ShipAction::ProbeVisitMarket)
                        .unwrap_or(ShipAction::NavigateToMine)
                } else if ship.cargo.units < ship.cargo.capacity {
                    ShipAction::NavigateToMine
                } else {
                    match Self::best_known_buyer(warehouse, ship) {
                        Some(target) => {
                            let remaining = ship.cargo.inventory.iter().map(|inv| inv.symbol.clone()).collect();
                            if let Some(rt) = warehouse.runtime_for_mut(ship_symbol) {
                                rt.context = RuntimeContext::Selling {
                                    target_market: target.clone(),
                                    remaining_cargo_symbols: remaining,
                                };
                            }
                            ShipAction::ProbeVisitMarket(target)
                        }
                        None => ShipAction::NavigateToMine,
                    }
                }
            }
            _ => ShipAction::Noop,
        }
    }

    fn current_waypoint_sells_fuel(warehouse: &Warehouse, ship: &st_domain::Ship) -> bool {
        warehouse
            .latest_price(&ship.nav.waypoint_symbol, &TradeGoodSymbol::FUEL)
            .map(|obs| obs.buy_price > 0.0)
            .unwrap_or(false)
    }

    /// Nearest cached marketplace that buys at least one of the ship's
    /// cargo symbols above `MIN_SELL_PRICE`, by straight-line distance from
    /// the ship's current position.
    pub(crate) fn best_known_buyer(warehouse: &Warehouse, ship: &st_domain::Ship) -> Option<WaypointSymbol> {
        let cargo_syms: Vec<&TradeGoodSymbol> = ship.cargo.inventory.iter().map(|inv| &inv.symbol).collect();
        if cargo_syms.is_empty() {
            return None;
        }
        let current = warehouse.waypoints_by_symbol.get(&ship.nav.waypoint_symbol)?;

        warehouse
            .waypoints_by_symbol
            .values()
            .filter(|wp| {
                cargo_syms
                    .iter()
                    .any(|good| warehouse.latest_price(&wp.symbol, good).map(|o| o.sell_price > MIN_SELL_PRICE).unwrap_or(false))
            })
            .min_by_key(|wp| distance_to(current.x(), current.y(), wp.x(), wp.y()))
            .map(|wp| wp.symbol.clone())
    }

    /// Nearest unvisited marketplace in the ship's current system, skipping
    /// markets already claimed by another ship's runtime as a `target_market`.
    /// Falls back to the marketplace with the oldest snapshot, then to plain
    /// nearest, when every candidate has already been visited.
    fn nearest_unvisited_marketplace(warehouse: &Warehouse, ship: &st_domain::Ship) -> Option<WaypointSymbol> {
        let claimed: std::collections::HashSet<&WaypointSymbol> = warehouse
            .runtime_by_ship
            .values()
            .filter_map(|rt| rt.context.target_market())
            .collect();

        let current = warehouse.waypoints_by_symbol.get(&ship.nav.waypoint_symbol)?;

        let candidates: Vec<&st_domain::Waypoint> = warehouse
            .waypoints_by_symbol
            .values()
            .filter(|wp| wp.system_symbol == ship.nav.system_symbol)
            .filter(|wp| wp.traits.iter().any(|t| t.symbol == WaypointTraitSymbol::MARKETPLACE))
            .filter(|wp| !claimed.contains(&wp.symbol))
            .collect();

        let unvisited = candidates
            .iter()
            .filter(|wp| !warehouse.has_market_snapshot(&wp.symbol))
            .min_by_key(|wp| distance_to(current.x(), current.y(), wp.x(), wp.y()));
        if let Some(wp) = unvisited {
            return Some(wp.symbol.clone());
        }

        candidates
            .iter()
            .min_by_key(|wp| warehouse.market_snapshot_age(&wp.symbol).unwrap_or(DateTime::<Utc>::MIN_UTC))
            .map(|wp| wp.symbol.clone())
    }

    /// Closest mineable waypoints to the ship's current position, nearest
    /// first, restricted to waypoints already discovered.
    pub fn mineable_waypoints_by_distance(warehouse: &Warehouse, ship: &st_domain::Ship) -> Vec<WaypointSymbol> {
        let Some(current) = warehouse.waypoints_by_symbol.get(&ship.nav.waypoint_symbol) else {
            return Vec::new();
        };

        warehouse
            .waypoints_by_symbol
            .values()
            .filter(|wp| wp.traits.iter().any(|t| MINEABLE_TRAITS.contains(&t.symbol)))
            .sorted_by_key(|wp| distance_to(current.x(), current.y(), wp.x(), wp.y()))
            .map(|wp| wp.symbol.clone())
            .collect()
    }
}

#[cfg(test)]
mod test {
    use super::*;

    #[test]
    fn min_sell_price_matches_pinned_constant() {
        assert_eq!(MIN_SELL_PRICE, 10.0);
    }
}
