use crate::btc::config::BtcConfig;
use crate::eth::config::EthConfig;
use crate::store::sqlite::config::DatabaseConfig;
use crate::worker::SyncConfig;
use envconfig::Envconfig;
use tracing::level_filters::LevelFilter;

#[derive(Debug, Clone, Envconfig)]
pub struct Config {
    #[envconfig(nested)]
    pub db: DatabaseConfig,
    #[envconfig(nested)]
    pub eth: EthConfig,
    #[envconfig(nested)]
    pub btc: BtcConfig,
    #[envconfig(nested)]
    pub sync: SyncConfig,
    #[envconfig(from = "LOG_LEVEL", default = "info")]
    pub log_level: LevelFilter,
}
