use envconfig::Envconfig;
use url::Url;

#[derive(Debug, Clone, Envconfig)]
pub struct BtcConfig {
    /// The bitcoin worker is disabled when no url is configured.
    #[envconfig(from = "BTC_RPC_URL")]
    pub rpc_url: Option<Url>,
    #[envconfig(from = "BTC_RPC_USER")]
    pub rpc_user: Option<String>,
    #[envconfig(from = "BTC_RPC_PASS")]
    pub rpc_pass: Option<String>,
    #[envconfig(from = "BTC_RPC_TIMEOUT_MS", default = "30000")]
    pub rpc_timeout_ms: u64,
    /// Upper bound of concurrent previous-transaction lookups while resolving input addresses.
    #[envconfig(from = "BTC_INPUT_LOOKUP_CONCURRENCY", default = "4")]
    pub input_lookup_concurrency: usize,
    #[envconfig(from = "BTC_START_HEIGHT", default = "0")]
    pub start_height: i64,
    #[envconfig(from = "BTC_SYNC_INTERVAL_MS", default = "2000")]
    pub sync_interval_ms: u64,
}
