use crate::btc::config::BtcConfig;
use bitcoin::Amount;
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::Duration;
use url::Url;

#[derive(Debug, thiserror::Error)]
pub enum BtcRpcError {
    #[error("transport error: {0}")]
    Transport(#[from] reqwest::Error),
    #[error("rpc returned status {status}: {body}")]
    HttpStatus {
        status: reqwest::StatusCode,
        body: String,
    },
    #[error("rpc error {code}: {message}")]
    Rpc { code: i64, message: String },
    #[error("failed to decode rpc response: {0}")]
    Decode(#[from] serde_json::Error),
    #[error("rpc response to {0} carried no result")]
    MissingResult(String),
}

/// Block as returned by `getblock <hash> 2`.
#[derive(Debug, Clone, Deserialize)]
pub struct RpcBlock {
    pub hash: String,
    pub height: u64,
    pub time: u64,
    /// Absent for the genesis block.
    #[serde(rename = "previousblockhash", default)]
    pub previous_block_hash: Option<String>,
    #[serde(default)]
    pub tx: Vec<RpcTransaction>,
}

/// Transaction as embedded in a verbose block or returned by `getrawtransaction <txid> true`.
#[derive(Debug, Clone, Deserialize)]
pub struct RpcTransaction {
    pub txid: String,
    #[serde(default)]
    pub vin: Vec<RpcInput>,
    #[serde(default)]
    pub vout: Vec<RpcOutput>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct RpcInput {
    /// Only set on the coinbase input.
    #[serde(default)]
    pub coinbase: Option<String>,
    #[serde(default)]
    pub txid: Option<String>,
    #[serde(default)]
    pub vout: Option<u32>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct RpcOutput {
    #[serde(with = "bitcoin::amount::serde::as_btc")]
    pub value: Amount,
    #[serde(rename = "scriptPubKey", default)]
    pub script_pub_key: RpcScriptPubKey,
}

#[derive(Debug, Clone, Default, Deserialize)]
pub struct RpcScriptPubKey {
    #[serde(default)]
    pub address: Option<String>,
    /// Pre-22.0 nodes report a list instead of a single address.
    #[serde(default)]
    pub addresses: Vec<String>,
}

impl RpcScriptPubKey {
    pub fn addresses(&self) -> Vec<String> {
        match self.address.as_deref() {
            Some(address) if !address.is_empty() => vec![address.to_string()],
            _ => self
                .addresses
                .iter()
                .filter(|a| !a.is_empty())
                .cloned()
                .collect(),
        }
    }
}

/// The subset of the bitcoind JSON-RPC api the adapter relies on.
#[async_trait::async_trait]
pub trait BtcRpc: Send + Sync {
    async fn get_block_count(&self) -> Result<u64, BtcRpcError>;
    async fn get_block_hash(&self, height: u64) -> Result<String, BtcRpcError>;
    async fn get_block(&self, hash: &str) -> Result<RpcBlock, BtcRpcError>;
    async fn get_raw_transaction(&self, txid: &str) -> Result<RpcTransaction, BtcRpcError>;
}

#[derive(Serialize)]
struct RpcRequest<'a> {
    jsonrpc: &'static str,
    id: u64,
    method: &'a str,
    params: &'a [serde_json::Value],
}

#[derive(Deserialize)]
struct RpcResponse<T> {
    result: Option<T>,
    error: Option<RpcErrorObject>,
}

#[derive(Deserialize)]
struct RpcErrorObject {
    code: i64,
    message: String,
}

/// JSON-RPC 1.0 over HTTP POST with optional basic auth.
pub struct JsonRpcClient {
    client: reqwest::Client,
    url: Url,
    auth: Option<(String, Option<String>)>,
    next_id: AtomicU64,
}

impl JsonRpcClient {
    pub fn new(url: Url, cfg: &BtcConfig) -> eyre::Result<Self> {
        let client = reqwest::Client::builder()
            .timeout(Duration::from_millis(cfg.rpc_timeout_ms))
            .build()?;

        let auth = match (&cfg.rpc_user, &cfg.rpc_pass) {
            (None, None) => None,
            (user, pass) => Some((user.clone().unwrap_or_default(), pass.clone())),
        };

        Ok(Self {
            client,
            url,
            auth,
            next_id: AtomicU64::new(1),
        })
    }

    async fn call<T: DeserializeOwned>(
        &self,
        method: &str,
        params: &[serde_json::Value],
    ) -> Result<T, BtcRpcError> {
        let request = RpcRequest {
            jsonrpc: "1.0",
            id: self.next_id.fetch_add(1, Ordering::Relaxed),
            method,
            params,
        };

        let mut builder = self.client.post(self.url.clone()).json(&request);
        if let Some((user, pass)) = &self.auth {
            builder = builder.basic_auth(user, pass.as_ref());
        }

        let response = builder.send().await?;
        let status = response.status();
        let body = response.text().await?;

        // bitcoind reports rpc errors with a 500 status and a regular json body
        let parsed: RpcResponse<T> = match serde_json::from_str(&body) {
            Ok(parsed) => parsed,
            Err(e) if status.is_success() => return Err(e.into()),
            Err(_) => return Err(BtcRpcError::HttpStatus { status, body }),
        };

        if let Some(error) = parsed.error {
            return Err(BtcRpcError::Rpc {
                code: error.code,
                message: error.message,
            });
        }

        parsed
            .result
            .ok_or_else(|| BtcRpcError::MissingResult(method.to_string()))
    }
}

#[async_trait::async_trait]
impl BtcRpc for JsonRpcClient {
    async fn get_block_count(&self) -> Result<u64, BtcRpcError> {
        self.call("getblockcount", &[]).await
    }

    async fn get_block_hash(&self, height: u64) -> Result<String, BtcRpcError> {
        self.call("getblockhash", &[height.into()]).await
    }

    async fn get_block(&self, hash: &str) -> Result<RpcBlock, BtcRpcError> {
        self.call("getblock", &[hash.into(), 2.into()]).await
    }

    async fn get_raw_transaction(&self, txid: &str) -> Result<RpcTransaction, BtcRpcError> {
        self.call("getrawtransaction", &[txid.into(), true.into()])
            .await
    }
}
