use std::sync::Arc;

use anyhow::Result;
use tracing::info;

use crate::dispatcher::Dispatcher;
use crate::executor::Executor;
use crate::pagination::fetch_all_pages;
use crate::queue::EventQueue;
use crate::scheduler::Scheduler;
use crate::st_client::StClientTrait;
use crate::warehouse::Warehouse;
use st_domain::extract_system_symbol;
use st_store::{Ctx, DbModelManager};

/// Everything the running agent needs after startup: the warehouse, the
/// scheduler ready to drive it, and the event queue primed with every
/// known ship at its current readiness.
pub struct App {
    pub warehouse: Warehouse,
    pub queue: EventQueue,
    pub scheduler: Scheduler,
}

/// Brings up a fresh `App`: fetches the agent and fleet, hydrates market
/// history from the persistent store, fetches every waypoint in the
/// headquarters system, and seeds the event queue with one entry per ship.
pub async fn build_app(client: Arc<dyn StClientTrait>, ctx: Ctx, mm: DbModelManager, retention_days: i64) -> Result<App> {
    info!("systems initializing");

    let mut warehouse = Warehouse::new(ctx, mm, retention_days);

    let agent_response = client.get_agent().await?;
    let agent = agent_response.data;
    let hq_system = extract_system_symbol(&agent.headquarters);
    warehouse.upsert_agent(agent);

    warehouse.hydrate_market_knowledge().await?;
    info!(waypoints = warehouse.waypoint_count(), "loaded market knowledge from storage");

    let client_for_ships = client.clone();
    let ships = fetch_all_pages(move |pagination| {
        let client = client_for_ships.clone();
        async move { client.list_ships(pagination).await }
    })
    .await?;

    warehouse.upsert_fleet(ships);
    info!(ships = warehouse.ship_count(), "fleet loaded");

    let system_response = client.get_system(&hq_system).await?;
    warehouse.upsert_system(system_response.data);

    let client_for_waypoints = client.clone();
    let hq_system_for_waypoints = hq_system.clone();
    let waypoints = fetch_all_pages(move |pagination| {
        let client = client_for_waypoints.clone();
        let system = hq_system_for_waypoints.clone();
        async move { client.list_waypoints_of_system_page(&system, pagination).await }
    })
    .await?;

    for waypoint in waypoints {
        warehouse.upsert_waypoint(waypoint);
    }
    info!(waypoints = warehouse.waypoint_count(), system = %hq_system, "system waypoints loaded");

    let mut queue = EventQueue::new();
    for ship_symbol in warehouse.ships_by_symbol.keys().cloned().collect::<Vec<_>>() {
        let readiness = Dispatcher::ship_readiness(&warehouse, &ship_symbol);
        queue.push(ship_symbol, readiness);
    }
    info!(queued = queue.len(), "event queue primed");

    let executor = Executor::new(client);
    let scheduler = Scheduler::new(executor);

    info!("all systems operational");
    Ok(App { warehouse, queue, scheduler })
}
