use crate::domain::{BlockHeight, Chain, ChainBlock};

/// Translates "get tip" / "get block N" into chain-specific RPC calls.
///
/// There are exactly two implementations, one per [`Chain`] variant: `eth::adapter::EthAdapter`
/// and `btc::adapter::BtcAdapter`. Adapters are stateless apart from their RPC connection, which
/// they own exclusively.
#[async_trait::async_trait]
pub trait ChainAdapter: Send + Sync {
    fn chain(&self) -> Chain;

    /// Highest block height currently known to the node.
    async fn get_tip(&self) -> eyre::Result<BlockHeight>;

    /// Fetches and normalizes the block at `height` together with all of its transactions.
    async fn fetch_block(&self, height: BlockHeight) -> eyre::Result<ChainBlock>;
}
