use crate::adapter::ChainAdapter;
use crate::domain::{Block, BlockHeight, BlockTimestamp, Chain, ChainBlock, Transaction, TxStatus};
use crate::eth::config::EthConfig;
use alloy::consensus::transaction::SignerRecoverable;
use alloy::consensus::{Transaction as _, TxEnvelope};
use alloy::eips::BlockNumberOrTag;
use alloy::network::Ethereum;
use alloy::primitives::Address;
use alloy::providers::{Provider, ProviderBuilder};
use alloy::rpc::client::RpcClient;
use alloy::rpc::types::Block as AlloyBlock;
use alloy::transports::http::Http;
use alloy::transports::layers::{FallbackLayer, RetryBackoffLayer};
use eyre::{WrapErr, eyre};
use itertools::Itertools;
use reqwest::Client;
use std::num::NonZeroUsize;
use tower::ServiceBuilder;

pub struct AlloyProviderBuilder;
impl AlloyProviderBuilder {
    /// Creates an HTTP provider with retry/backoff over all configured urls.
    pub fn new_http(cfg: EthConfig) -> eyre::Result<impl Provider<Ethereum>> {
        let urls = cfg.rpc_urls.ok_or_else(|| eyre!("No ETH_RPC_URLS configured"))?;
        let transports: Vec<Http<Client>> = urls.0.into_iter().map(Http::new).collect_vec();

        let retry_layer = RetryBackoffLayer::new(
            cfg.rpc_retry_max,
            cfg.rpc_retry_init_backoff_ms,
            cfg.rpc_retry_cups,
        );

        let fallback_layer = FallbackLayer::default().with_active_transport_count(
            NonZeroUsize::new(transports.len()).ok_or_else(|| eyre!("No transports provided"))?,
        );

        let transport = ServiceBuilder::new()
            .layer(retry_layer)
            .layer(fallback_layer)
            .service(transports);

        let client = RpcClient::builder().transport(transport, false);
        Ok(ProviderBuilder::new().connect_client(client))
    }
}

/// Account-model adapter: one `eth_getBlockByNumber` round trip per block, senders recovered from
/// the transaction signatures.
pub struct EthAdapter<P> {
    provider: P,
    chain_id: u64,
}

impl<P> EthAdapter<P>
where
    P: Provider + Send + Sync,
{
    /// Queries the chain id once, it is needed for signer recovery of every transaction.
    pub async fn connect(provider: P) -> eyre::Result<Self> {
        let chain_id = provider
            .get_chain_id()
            .await
            .wrap_err("eth_chainId failed")?;

        tracing::info!("[{}] Connected to chain id {}", Chain::Ethereum, chain_id);

        Ok(Self { provider, chain_id })
    }

    pub fn chain_id(&self) -> u64 {
        self.chain_id
    }
}

#[async_trait::async_trait]
impl<P> ChainAdapter for EthAdapter<P>
where
    P: Provider + Send + Sync,
{
    fn chain(&self) -> Chain {
        Chain::Ethereum
    }

    async fn get_tip(&self) -> eyre::Result<BlockHeight> {
        let number = self
            .provider
            .get_block_number()
            .await
            .wrap_err("eth_blockNumber failed")?;
        Ok(BlockHeight(number))
    }

    async fn fetch_block(&self, height: BlockHeight) -> eyre::Result<ChainBlock> {
        let block = self
            .provider
            .get_block_by_number(BlockNumberOrTag::Number(height.0))
            .full()
            .await
            .wrap_err_with(|| format!("eth_getBlockByNumber {} failed", height))?
            .ok_or_else(|| eyre!("Block {} not found", height))?;

        normalize_block(&block, self.chain_id)
    }
}

fn normalize_block(block: &AlloyBlock, chain_id: u64) -> eyre::Result<ChainBlock> {
    let header = &block.header;
    let normalized = Block {
        chain: Chain::Ethereum,
        height: BlockHeight(header.number),
        hash: format!("{:#x}", header.hash),
        parent_hash: format!("{:#x}", header.parent_hash),
        timestamp: BlockTimestamp(header.timestamp),
        tx_count: u32::try_from(block.transactions.len())?,
    };

    let transactions = block
        .transactions
        .txns()
        .map(|tx| to_transaction(tx.inner.inner(), chain_id, &normalized))
        .collect();

    Ok(ChainBlock {
        block: normalized,
        transactions,
    })
}

fn to_transaction(tx: &TxEnvelope, chain_id: u64, block: &Block) -> Transaction {
    Transaction {
        chain: Chain::Ethereum,
        hash: format!("{:#x}", tx.tx_hash()),
        block_hash: block.hash.clone(),
        height: block.height,
        sender: recover_sender(tx, chain_id)
            .map(|a| a.to_checksum(None))
            .unwrap_or_default(),
        // empty for contract creation
        recipient: tx.to().map(|a| a.to_checksum(None)).unwrap_or_default(),
        value: tx.value().to_string(),
        status: TxStatus::Success,
        timestamp: block.timestamp,
    }
}

/// Signer of `tx`, provided it was signed for `chain_id` (pre-EIP-155 transactions carry no
/// chain id and are accepted).
fn recover_sender(tx: &TxEnvelope, chain_id: u64) -> Option<Address> {
    if tx.chain_id().is_some_and(|id| id != chain_id) {
        return None;
    }
    tx.recover_signer().ok()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::eth::config::RpcUrls;
    use alloy::consensus::{SignableTransaction, TxEip1559, TxLegacy};
    use alloy::network::TxSignerSync;
    use alloy::primitives::{TxKind, U256, address};
    use alloy::signers::local::PrivateKeySigner;
    use testcontainers::runners::AsyncRunner;
    use testcontainers_modules::anvil::AnvilNode;

    // first well-known anvil dev account
    const DEV_KEY: &str = "ac0974bec39a17e36ba4a6b4d238ff944bacb478cbed5efcae784d7bf4f2ff80";

    fn containing_block() -> Block {
        Block {
            chain: Chain::Ethereum,
            height: BlockHeight(21_500_213),
            hash: "0x09afa661a1c383fe926015a8df4e38d43035e3b33c24167454b9e4ad772312db".into(),
            parent_hash: "0xac5e1f4e9db5a1ab1b8456862d54f9ed74c5fd6a04a5c61b6805af13b322895d"
                .into(),
            timestamp: BlockTimestamp(1_734_892_491),
            tx_count: 1,
        }
    }

    fn signed_eip1559(chain_id: u64, to: TxKind) -> eyre::Result<(TxEnvelope, Address)> {
        let signer: PrivateKeySigner = DEV_KEY.parse()?;
        let mut tx = TxEip1559 {
            chain_id,
            nonce: 7,
            gas_limit: 21_000,
            max_fee_per_gas: 30_000_000_000,
            max_priority_fee_per_gas: 1_000_000_000,
            to,
            value: U256::from(1_500_000_000_000_000_000u128),
            ..Default::default()
        };
        let signature = signer.sign_transaction_sync(&mut tx)?;
        Ok((TxEnvelope::from(tx.into_signed(signature)), signer.address()))
    }

    #[test]
    fn test_transfer_is_normalized() -> eyre::Result<()> {
        let recipient = address!("0x2b6ec277bec8b7b1b19efca00c1969cac63c9f0f");
        let (envelope, signer) = signed_eip1559(1, TxKind::Call(recipient))?;
        let block = containing_block();

        let tx = to_transaction(&envelope, 1, &block);

        assert_eq!(tx.sender, signer.to_checksum(None));
        assert_eq!(tx.recipient, recipient.to_checksum(None));
        assert_eq!(tx.value, "1500000000000000000");
        assert_eq!(tx.hash, format!("{:#x}", envelope.tx_hash()));
        assert_eq!(tx.block_hash, block.hash);
        assert_eq!(tx.height, block.height);
        assert_eq!(tx.timestamp, block.timestamp);
        assert_eq!(tx.status, TxStatus::Success);

        Ok(())
    }

    #[test]
    fn test_contract_creation_has_no_recipient() -> eyre::Result<()> {
        let (envelope, signer) = signed_eip1559(1, TxKind::Create)?;

        let tx = to_transaction(&envelope, 1, &containing_block());

        assert_eq!(tx.recipient, "");
        assert_eq!(tx.sender, signer.to_checksum(None));

        Ok(())
    }

    #[test]
    fn test_foreign_chain_id_leaves_sender_empty() -> eyre::Result<()> {
        let recipient = address!("0x2b6ec277bec8b7b1b19efca00c1969cac63c9f0f");
        let (envelope, _) = signed_eip1559(5, TxKind::Call(recipient))?;

        let tx = to_transaction(&envelope, 1, &containing_block());

        assert_eq!(tx.sender, "");
        assert_eq!(tx.recipient, recipient.to_checksum(None));

        Ok(())
    }

    #[test]
    fn test_legacy_transaction_without_chain_id() -> eyre::Result<()> {
        let signer: PrivateKeySigner = DEV_KEY.parse()?;
        let mut legacy = TxLegacy {
            chain_id: None,
            nonce: 0,
            gas_price: 20_000_000_000,
            gas_limit: 21_000,
            to: TxKind::Call(address!("0x68614481aef06e53d23bbe0772343fb555ac40c8")),
            value: U256::from(42),
            ..Default::default()
        };
        let signature = signer.sign_transaction_sync(&mut legacy)?;
        let envelope = TxEnvelope::from(legacy.into_signed(signature));

        assert_eq!(recover_sender(&envelope, 1), Some(signer.address()));
        assert_eq!(to_transaction(&envelope, 1, &containing_block()).value, "42");

        Ok(())
    }

    #[tokio::test]
    #[ignore = "requires a docker daemon"]
    async fn test_adapter_against_anvil() -> eyre::Result<()> {
        let node = AnvilNode::default().start().await?;
        let port = node.get_host_port_ipv4(8545).await?;

        let config = EthConfig {
            rpc_urls: Some(RpcUrls(vec![format!("http://localhost:{}", port).parse()?])),
            rpc_retry_max: 2,
            rpc_retry_init_backoff_ms: 10,
            rpc_retry_cups: 100,
            start_height: 0,
            sync_interval_ms: 100,
        };

        let adapter = EthAdapter::connect(AlloyProviderBuilder::new_http(config)?).await?;
        assert_eq!(adapter.chain_id(), 31337);

        let tip = adapter.get_tip().await?;
        let genesis = adapter.fetch_block(BlockHeight(0)).await?;

        assert_eq!(tip, BlockHeight(0));
        assert_eq!(genesis.block.height, BlockHeight(0));
        assert_eq!(genesis.block.tx_count, 0);
        assert!(genesis.transactions.is_empty());
        assert!(genesis.block.hash.starts_with("0x"));

        Ok(())
    }
}
