/// Runtime configuration for the agent process, populated from CLI flags
/// or the environment variables of the same name via clap's `env()`
/// attribute on the command struct that builds this.
#[derive(Clone, Debug)]
pub struct AgentConfiguration {
    pub database_url: String,
    pub base_url: String,
    pub agent_token: String,
    pub spacetraders_agent_faction: String,
    pub spacetraders_agent_symbol: String,
    pub spacetraders_registration_email: String,
    pub retention_days: i64,
    pub min_sell_price: f64,
}

impl AgentConfiguration {
    pub fn default_database_url() -> String {
        "sqlite://spacetraders.db".to_string()
    }

    pub fn default_base_url() -> String {
        "https://api.spacetraders.io/v2".to_string()
    }

    pub fn default_retention_days() -> i64 {
        2
    }

    pub fn default_min_sell_price() -> f64 {
        10.0
    }
}

#[cfg(test)]
mod test {
    use super::*;

    #[test]
    fn defaults_point_at_local_sqlite_and_live_api() {
        assert_eq!(AgentConfiguration::default_database_url(), "sqlite://spacetraders.db");
        assert_eq!(AgentConfiguration::default_base_url(), "https://api.spacetraders.io/v2");
    }

    #[test]
    fn defaults_match_pinned_retention_and_sell_price() {
        assert_eq!(AgentConfiguration::default_retention_days(), 2);
        assert_eq!(AgentConfiguration::default_min_sell_price(), 10.0);
    }
}
