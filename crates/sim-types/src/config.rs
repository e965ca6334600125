//! Process-wide configuration, loaded once at startup into an immutable
//! value handed by reference to every component constructor. No component
//! re-reads the environment after startup.

use serde::Deserialize;

use crate::errors::SimResult;

fn default_db_port() -> u16 {
    5432
}
fn default_sslmode() -> String {
    "disable".to_string()
}
fn default_server_port() -> u16 {
    8080
}
fn default_ai_model() -> String {
    "gpt-4o-mini".to_string()
}
fn default_automation_enabled() -> bool {
    true
}
fn default_strategy_gen_interval() -> u64 {
    60
}
fn default_performance_analysis_interval() -> u64 {
    15
}
fn default_strategies_per_interval() -> u32 {
    2
}
fn default_max_concurrent_simulations() -> usize {
    3
}

/// Environment-sourced configuration (see the external-interfaces
/// environment variable list). Field names are the snake_case of the
/// documented `SCREAMING_SNAKE_CASE` variables, matched by `envy`'s
/// case-insensitive prefix-free lookup.
#[derive(Debug, Clone, Deserialize)]
pub struct Config {
    pub db_host: String,
    #[serde(default = "default_db_port")]
    pub db_port: u16,
    pub db_user: String,
    pub db_pass: String,
    pub db_name: String,
    #[serde(default = "default_sslmode")]
    pub db_sslmode: String,

    pub websocket_url: String,

    #[serde(default = "default_server_port")]
    pub server_port: u16,

    pub ai_api_key: String,
    #[serde(default = "default_ai_model")]
    pub ai_model: String,
    pub ai_endpoint: String,

    #[serde(default = "default_automation_enabled")]
    pub automation_enabled: bool,
    #[serde(default = "default_strategy_gen_interval")]
    pub strategy_gen_interval: u64,
    #[serde(default = "default_performance_analysis_interval")]
    pub performance_analysis_interval: u64,
    #[serde(default = "default_strategies_per_interval")]
    pub strategies_per_interval: u32,
    #[serde(default = "default_max_concurrent_simulations")]
    pub max_concurrent_simulations: usize,
}

impl Config {
    /// Loads configuration from the process environment (optionally
    /// preceded by a `.env` file via `dotenvy`, a no-op if absent).
    pub fn from_env() -> SimResult<Self> {
        let _ = dotenvy::dotenv();
        Ok(envy::from_env::<Config>()?)
    }

    pub fn database_url(&self) -> String {
        format!(
            "postgres://{}:{}@{}:{}/{}?sslmode={}",
            self.db_user, self.db_pass, self.db_host, self.db_port, self.db_name, self.db_sslmode
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults_match_spec() {
        // envy populates required fields from a map; defaults apply to the rest.
        let map = [
            ("db_host", "localhost"),
            ("db_user", "postgres"),
            ("db_pass", "postgres"),
            ("db_name", "sim"),
            ("websocket_url", "wss://example.invalid/ws"),
            ("ai_api_key", "key"),
            ("ai_endpoint", "https://example.invalid/v1"),
        ];
        let cfg: Config = envy::from_iter(map.into_iter().map(|(k, v)| (k.to_string(), v.to_string())))
            .unwrap();
        assert_eq!(cfg.db_port, 5432);
        assert_eq!(cfg.server_port, 8080);
        assert_eq!(cfg.strategy_gen_interval, 60);
        assert_eq!(cfg.performance_analysis_interval, 15);
        assert_eq!(cfg.strategies_per_interval, 2);
        assert_eq!(cfg.max_concurrent_simulations, 3);
        assert!(cfg.automation_enabled);
    }
}
