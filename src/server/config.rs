use serde::Deserialize;

fn default_tick_period() -> u64 {
    1000
}

fn default_webhook_num_of_retries() -> u32 {
    3
}

fn default_webhook_timeout() -> u64 {
    5000
}

fn default_webhook_pause_between_retries() -> u64 {
    100
}

#[derive(Debug, Clone, Deserialize)]
pub struct Config {
    pub environment: String,
    pub application: String,
    pub log_level: String,
    pub async_database_url: String,
    pub database_url: String,
    #[serde(default = "default_tick_period")]
    pub tick_period: u64,
    #[serde(default = "default_webhook_num_of_retries")]
    pub webhook_num_of_retries: u32,
    #[serde(default = "default_webhook_timeout")]
    pub webhook_timeout: u64,
    #[serde(default = "default_webhook_pause_between_retries")]
    pub webhook_pause_between_retries: u64,
    pub orch_url: String,
}

pub fn get_config() -> Option<Config> {
    match envy::from_env::<Config>() {
        Ok(config) => Some(config),
        Err(error) => {
            tracing::error!(%error, "Invalid env config");
            None
        }
    }
}
