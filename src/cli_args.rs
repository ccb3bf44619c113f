use clap::{Parser, Subcommand};
use st_core::configuration::AgentConfiguration;

#[derive(Clone, Parser)]
#[command(version, about, long_about = None)]
pub struct Cli {
    #[command(subcommand)]
    pub command: Commands,
}

#[derive(Clone, Subcommand)]
pub enum Commands {
    /// Runs the agent: hydrates the warehouse, then drives the scheduler
    /// loop until the event queue runs dry.
    Run {
        /// Not marked required: a missing token is treated as a
        /// configuration error and logged before exiting 1, rather than
        /// clap's own exit-2 usage error.
        #[arg(long, env("AGENT_TOKEN"))]
        agent_token: Option<String>,

        #[arg(long, env("DATABASE_URL"), default_value_t = AgentConfiguration::default_database_url())]
        database_url: String,

        #[arg(long, env("SPACETRADERS_BASE_URL"), default_value_t = AgentConfiguration::default_base_url())]
        base_url: String,

        #[arg(long, env("SPACETRADERS_AGENT_FACTION"), default_value = "")]
        spacetraders_agent_faction: String,

        #[arg(long, env("SPACETRADERS_AGENT_SYMBOL"), default_value = "")]
        spacetraders_agent_symbol: String,

        #[arg(long, env("SPACETRADERS_REGISTRATION_EMAIL"), default_value = "")]
        spacetraders_registration_email: String,

        #[arg(long, env("RETENTION_DAYS"), default_value_t = AgentConfiguration::default_retention_days())]
        retention_days: i64,

        #[arg(long, env("MIN_SELL_PRICE"), default_value_t = AgentConfiguration::default_min_sell_price())]
        min_sell_price: f64,
    },
}

impl Commands {
    /// Builds the typed configuration from parsed flags. `None` is
    /// returned only when `agent_token` is absent, which the caller turns
    /// into a logged, exit-1 configuration error rather than clap's own
    /// exit-2 usage error - a missing token is an environment problem, not
    /// a malformed invocation.
    pub fn into_agent_configuration(self) -> Option<AgentConfiguration> {
        match self {
            Commands::Run {
                agent_token,
                database_url,
                base_url,
                spacetraders_agent_faction,
                spacetraders_agent_symbol,
                spacetraders_registration_email,
                retention_days,
                min_sell_price,
            } => Some(AgentConfiguration {
                database_url,
                base_url,
                agent_token: agent_token?,
                spacetraders_agent_faction,
                spacetraders_agent_symbol,
                spacetraders_registration_email,
                retention_days,
                min_sell_price,
            }),
        }
    }
}
