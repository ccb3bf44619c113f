use std::sync::Arc;
use std::time::Duration as StdDuration;

use anyhow::Result;
use chrono::Utc;
use st_domain::{NavStatus, RuntimeState, ShipAction, ShipSymbol};
use tracing::{debug, info};

use crate::dispatcher::Dispatcher;
use crate::executor::Executor;
use crate::queue::EventQueue;
use crate::warehouse::Warehouse;

/// Single-threaded cooperative event loop: pop the soonest-ready ship,
/// sleep if it isn't ready yet, otherwise decide-then-execute and
/// re-queue it at its new readiness time. Ships never run concurrently
/// with each other - one decision, one executed action, at a time.
pub struct Scheduler {
    executor: Executor,
}

impl Scheduler {
    pub fn new(executor: Executor) -> Self {
        Scheduler { executor }
    }

    pub async fn run(&self, warehouse: &mut Warehouse, queue: &mut EventQueue) -> Result<()> {
        loop {
            let Some(next_priority) = queue.peek_next_priority() else {
                info!("event queue empty, scheduler stopping");
                break;
            };

            let now = Utc::now();
            let wait = next_priority - now;

            if wait.num_milliseconds() > 0 {
                let sleep_ms = wait.num_milliseconds().clamp(50, 500) as u64;
                debug!(wait_ms = wait.num_milliseconds(), sleep_ms, "scheduler sleeping");
                tokio::time::sleep(StdDuration::from_millis(sleep_ms)).await;
                continue;
            }

            let Some(ship_symbol) = queue.extract_min() else {
                info!("event queue empty, scheduler stopping");
                break;
            };

            self.tick(warehouse, queue, &ship_symbol).await?;
        }

        Ok(())
    }

    async fn tick(&self, warehouse: &mut Warehouse, queue: &mut EventQueue, ship_symbol: &ShipSymbol) -> Result<()> {
        if !warehouse.ships_by_symbol.contains_key(ship_symbol) {
            debug!(%ship_symbol, "ship no longer exists, dropping from queue");
            return Ok(());
        }

        // This ship was only re-queued because its cached ETA passed; the
        // local nav status is still whatever the last navigate call set, so
        // refresh it from the API before deciding anything off of it.
        let navigating_in_transit = warehouse
            .runtime_for(ship_symbol)
            .map(|rt| rt.state == RuntimeState::Navigating)
            .unwrap_or(false)
            && warehouse
                .ships_by_symbol
                .get(ship_symbol)
                .map(|s| s.nav.status == NavStatus::InTransit)
                .unwrap_or(false);

        if navigating_in_transit {
            self.executor.refresh_ship(warehouse, ship_symbol).await?;
        }

        let action = Dispatcher::decide_next_action(warehouse, ship_symbol);

        if action != ShipAction::Noop {
            if let Some(ship) = warehouse.ships_by_symbol.get(ship_symbol) {
                info!(
                    %ship_symbol,
                    fuel = format!("{}/{}", ship.fuel.current, ship.fuel.capacity),
                    cargo = format!("{}/{}", ship.cargo.units, ship.cargo.capacity),
                    ?action,
                    "ship action"
                );
            }
            self.executor.execute(warehouse, ship_symbol, &action).await?;
        } else {
            debug!(%ship_symbol, "ship idle, no action");
        }

        let readiness = Dispatcher::ship_readiness(warehouse, ship_symbol);
        queue.push(ship_symbol.clone(), readiness);
        Ok(())
    }

    pub fn executor(&self) -> &Executor {
        &self.executor
    }
}

#[cfg(test)]
mod test {
    use super::*;
    use crate::st_client::MockStClientTrait;
    use test_log::test;

    #[test(tokio::test)]
    async fn stops_when_queue_empty() {
        let executor = Executor::new(Arc::new(MockStClientTrait::new()));
        let scheduler = Scheduler::new(executor);
        let pool = st_store::db::connect("sqlite::memory:").await.unwrap();
        let mut warehouse = Warehouse::new(st_store::Ctx::root(), st_store::DbModelManager::new(pool), 2);
        let mut queue = EventQueue::new();

        scheduler.run(&mut warehouse, &mut queue).await.unwrap();
    }
}
