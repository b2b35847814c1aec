use core::fmt::{Debug, Display};

use figment::providers::{Env, Format, Serialized, Toml};
use figment::Figment;
use hostel_allocation_core::seeder::SeedPlan;
use hostel_allocation_optimizer::AllocationPolicy;
use serde::{Deserialize, Serialize};

pub const CONFIG_FILE: &str = "hostel.toml";
pub const ENV_PREFIX: &str = "HOSTEL_";

#[derive(Serialize, Deserialize, Clone, Debug, Default, PartialEq, Eq)]
#[serde(default)]
pub struct AllocationConfig {
    pub policy: AllocationPolicy,
}

#[derive(Serialize, Deserialize, Clone, PartialEq, Eq)]
pub struct Config {
    pub listen_address: String,
    pub database_url: String,
    /// Bearer token that identifies the warden.
    pub warden_token: String,
    pub seed: SeedPlan,
    pub allocation: AllocationConfig,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            listen_address: "0.0.0.0:3000".to_owned(),
            database_url: String::new(),
            warden_token: String::new(),
            seed: SeedPlan::default(),
            allocation: AllocationConfig::default(),
        }
    }
}

// keep secrets out of logs
impl Debug for Config {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Config")
            .field("listen_address", &self.listen_address)
            .field("seed", &self.seed)
            .field("allocation", &self.allocation)
            .finish_non_exhaustive()
    }
}

#[derive(thiserror::Error)]
pub enum ConfigError {
    #[error("config error: {0}")]
    Figment(#[from] figment::Error),
}

impl Debug for ConfigError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        Display::fmt(self, f)
    }
}

#[must_use]
pub fn figment() -> Figment {
    Figment::from(Serialized::defaults(Config::default()))
        .merge(Toml::file(CONFIG_FILE))
        .merge(Env::prefixed(ENV_PREFIX).split("__"))
}

pub fn get_config() -> Result<Config, ConfigError> {
    Ok(figment().extract()?)
}
