use envconfig::Envconfig;
use std::str::FromStr;
use url::Url;

#[derive(Debug, Clone, Envconfig)]
pub struct EthConfig {
    /// The ethereum worker is disabled when no urls are configured.
    #[envconfig(from = "ETH_RPC_URLS")]
    pub rpc_urls: Option<RpcUrls>,
    #[envconfig(from = "ETH_RPC_RETRY_MAX", default = "10")]
    pub rpc_retry_max: u32,
    #[envconfig(from = "ETH_RPC_RETRY_INIT_BACKOFF_MS", default = "1000")]
    pub rpc_retry_init_backoff_ms: u64,
    #[envconfig(from = "ETH_RPC_RETRY_CUPS", default = "100")]
    pub rpc_retry_cups: u64,
    #[envconfig(from = "ETH_START_HEIGHT", default = "0")]
    pub start_height: i64,
    #[envconfig(from = "ETH_SYNC_INTERVAL_MS", default = "2000")]
    pub sync_interval_ms: u64,
}

#[derive(Debug, Clone)]
pub struct RpcUrls(pub Vec<Url>);

impl FromStr for RpcUrls {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        s.split(',')
            .map(|url| url.trim().parse::<Url>())
            .collect::<Result<Vec<_>, _>>()
            .map(RpcUrls)
            .map_err(|e| format!("Invalid url: {}", e))
    }
}
