use crate::st_model::{ShipSymbol, TradeGoodSymbol, WaypointSymbol};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::HashSet;

/// Coarse-grained state of a single ship's objective, mirrored 1:1 onto the
/// `RuntimeContext` it carries. The dispatcher reads both; only the executor
/// writes `state`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum RuntimeState {
    Idle,
    Navigating,
    Mining,
}

/// What a ship is navigating towards. Replaces a free-form string tag.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum NavigationGoal {
    MineTarget,
    Market,
    Refuel,
}

/// Replaces the source's untyped `context` dict with a closed set of cases.
/// Only `Selling` and the navigation variants carry data; everything else is
/// recomputed by the dispatcher each tick from the ship's observable state.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum RuntimeContext {
    Idle,
    NavigatingTo {
        goal: NavigationGoal,
        target: WaypointSymbol,
    },
    Mining {
        mine_target: WaypointSymbol,
    },
    Selling {
        target_market: WaypointSymbol,
        remaining_cargo_symbols: Vec<TradeGoodSymbol>,
    },
}

impl RuntimeContext {
    pub fn target_market(&self) -> Option<&WaypointSymbol> {
        match self {
            RuntimeContext::NavigatingTo {
                goal: NavigationGoal::Market,
                target,
            } => Some(target),
            RuntimeContext::Selling { target_market, .. } => Some(target_market),
            _ => None,
        }
    }

    pub fn is_selling(&self) -> bool {
        matches!(self, RuntimeContext::Selling { .. })
    }
}

/// Per-ship bookkeeping the API never returns. Owned exclusively by the
/// warehouse; the dispatcher reads it, the executor is the only writer.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ShipRuntime {
    pub ship_symbol: ShipSymbol,
    pub state: RuntimeState,
    pub context: RuntimeContext,
    /// Earliest instant, in UTC with millisecond resolution, at which this
    /// ship should be reconsidered. `None` means "ready now" - readiness then
    /// falls back to the ship's own nav/cooldown timers.
    pub next_wakeup_ts: Option<DateTime<Utc>>,
}

impl ShipRuntime {
    pub fn idle(ship_symbol: ShipSymbol) -> Self {
        ShipRuntime {
            ship_symbol,
            state: RuntimeState::Idle,
            context: RuntimeContext::Idle,
            next_wakeup_ts: None,
        }
    }
}

/// One concrete decision the dispatcher can hand to the executor.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum ShipAction {
    Noop,
    Refuel,
    NavigateToMine,
    ExtractMinerals,
    /// Carries the market waypoint the dispatcher already resolved, so the
    /// executor visits it directly instead of re-deriving a target itself.
    ProbeVisitMarket(WaypointSymbol),
}

/// Set of waypoints currently claimed as a `target_market` by some runtime,
/// used by the dispatcher to avoid sending two ships to the same market.
pub type ClaimedMarkets = HashSet<WaypointSymbol>;

pub const MINEABLE_TRAITS: &[crate::st_model::WaypointTraitSymbol] = &[
    crate::st_model::WaypointTraitSymbol::MINERAL_DEPOSITS,
    crate::st_model::WaypointTraitSymbol::COMMON_METAL_DEPOSITS,
    crate::st_model::WaypointTraitSymbol::PRECIOUS_METAL_DEPOSITS,
    crate::st_model::WaypointTraitSymbol::RARE_METAL_DEPOSITS,
    crate::st_model::WaypointTraitSymbol::METHANE_POOLS,
    crate::st_model::WaypointTraitSymbol::ICE_CRYSTALS,
    crate::st_model::WaypointTraitSymbol::EXPLOSIVE_GASES,
];
