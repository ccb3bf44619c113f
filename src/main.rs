use std::sync::Arc;

use anyhow::Result;
use clap::Parser;
use tracing::{error, info};
use tracing_subscriber::{fmt, prelude::*, EnvFilter};

use cli_args::Cli;
use st_core::bootstrap::build_app;
use st_core::reqwest_helpers::create_client;
use st_core::st_client::{StClient, StClientTrait};
use st_store::{db, Ctx, DbModelManager};

mod cli_args;

#[tokio::main]
async fn main() -> Result<()> {
    let _ = dotenv::dotenv();

    tracing_subscriber::registry()
        .with(fmt::layer())
        .with(EnvFilter::from_default_env())
        .init();

    let cli = Cli::parse();

    let Some(cfg) = cli.command.into_agent_configuration() else {
        error!("AGENT_TOKEN is not set; refusing to start");
        std::process::exit(1);
    };

    info!(base_url = %cfg.base_url, database_url = %cfg.database_url, "starting agent");

    let pool = db::connect(&cfg.database_url).await?;
    let ctx = Ctx::root();
    let mm = DbModelManager::new(pool);

    let reqwest_client = create_client(Some(cfg.agent_token.clone()));
    let st_client = StClient::try_with_base_url(reqwest_client, &cfg.base_url)?;
    let client: Arc<dyn StClientTrait> = Arc::new(st_client);

    let mut app = build_app(client, ctx, mm, cfg.retention_days).await?;

    app.scheduler.run(&mut app.warehouse, &mut app.queue).await?;

    info!("scheduler stopped, agent shutting down");
    Ok(())
}
