use anyhow::{Context, Result};
use sqlx::sqlite::{SqliteConnectOptions, SqlitePoolOptions};
use sqlx::SqlitePool;
use std::str::FromStr;
use tracing::{event, Level};

/// Opens (creating if necessary) the embedded SQLite store and brings its
/// schema up to date. A single pooled connection handles writes; SQLite's
/// WAL journal lets readers proceed without blocking on them.
pub async fn connect(database_url: &str) -> Result<SqlitePool> {
    let connect_options = SqliteConnectOptions::from_str(database_url)
        .with_context(|| format!("invalid DATABASE_URL: {database_url}"))?
        .create_if_missing(true)
        .journal_mode(sqlx::sqlite::SqliteJournalMode::Wal)
        .synchronous(sqlx::sqlite::SqliteSynchronous::Normal);

    let pool = SqlitePoolOptions::new()
        .max_connections(5)
        .connect_with(connect_options)
        .await
        .context("failed to open sqlite pool")?;

    event!(Level::INFO, "connected to embedded store at {}", database_url);

    prepare_schema(&pool).await?;

    Ok(pool)
}

async fn prepare_schema(pool: &SqlitePool) -> Result<()> {
    sqlx::query(
        r#"
CREATE TABLE IF NOT EXISTS market_observations (
    id INTEGER PRIMARY KEY AUTOINCREMENT,
    ts TEXT NOT NULL,
    system_symbol TEXT NOT NULL,
    waypoint_symbol TEXT NOT NULL,
    good TEXT NOT NULL,
    buy_price REAL NOT NULL,
    sell_price REAL NOT NULL,
    trade_volume INTEGER NOT NULL,
    supply TEXT NOT NULL,
    activity TEXT
)
"#,
    )
    .execute(pool)
    .await
    .context("failed to create market_observations")?;

    sqlx::query(r#"CREATE INDEX IF NOT EXISTS idx_market_observations_good_ts ON market_observations (good, ts DESC)"#)
        .execute(pool)
        .await?;
    sqlx::query(r#"CREATE INDEX IF NOT EXISTS idx_market_observations_waypoint_ts ON market_observations (waypoint_symbol, ts DESC)"#)
        .execute(pool)
        .await?;
    sqlx::query(r#"CREATE INDEX IF NOT EXISTS idx_market_observations_ts ON market_observations (ts)"#)
        .execute(pool)
        .await?;

    sqlx::query(
        r#"
CREATE TABLE IF NOT EXISTS transactions (
    id INTEGER PRIMARY KEY AUTOINCREMENT,
    ts TEXT NOT NULL,
    ship_symbol TEXT NOT NULL,
    waypoint_symbol TEXT NOT NULL,
    action TEXT NOT NULL,
    good TEXT NOT NULL,
    units INTEGER NOT NULL,
    unit_price REAL NOT NULL,
    total_price REAL NOT NULL,
    credits_after INTEGER NOT NULL
)
"#,
    )
    .execute(pool)
    .await
    .context("failed to create transactions")?;

    sqlx::query(r#"CREATE INDEX IF NOT EXISTS idx_transactions_ship_ts ON transactions (ship_symbol, ts DESC)"#)
        .execute(pool)
        .await?;
    sqlx::query(r#"CREATE INDEX IF NOT EXISTS idx_transactions_ts ON transactions (ts)"#)
        .execute(pool)
        .await?;

    event!(Level::INFO, "embedded store schema is up to date");

    Ok(())
}

/// Deletes rows older than `retention_days`. Callers are expected to rate
/// limit their own calls (the warehouse does so, at most once per hour) -
/// this function itself performs the delete unconditionally.
pub async fn delete_rows_older_than(pool: &SqlitePool, cutoff_ts: &str) -> Result<(u64, u64)> {
    let market_result = sqlx::query("DELETE FROM market_observations WHERE ts < ?1")
        .bind(cutoff_ts)
        .execute(pool)
        .await
        .context("failed to prune market_observations")?;

    let transaction_result = sqlx::query("DELETE FROM transactions WHERE ts < ?1")
        .bind(cutoff_ts)
        .execute(pool)
        .await
        .context("failed to prune transactions")?;

    Ok((market_result.rows_affected(), transaction_result.rows_affected()))
}

#[cfg(test)]
mod test {
    use super::*;

    #[tokio::test]
    async fn creates_schema_on_fresh_database() {
        let pool = connect("sqlite::memory:").await.unwrap();

        let tables: Vec<(String,)> = sqlx::query_as("SELECT name FROM sqlite_master WHERE type='table' ORDER BY name")
            .fetch_all(&pool)
            .await
            .unwrap();

        let names: Vec<String> = tables.into_iter().map(|(n,)| n).collect();
        assert!(names.contains(&"market_observations".to_string()));
        assert!(names.contains(&"transactions".to_string()));
    }
}
