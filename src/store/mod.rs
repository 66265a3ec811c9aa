use crate::domain::{Block, BlockHeight, Chain, IndexerState, Transaction};

pub mod sqlite;

/// Persistence contract of the sync engine plus the read side consumed by the query layer.
///
/// Every write is scoped to a single chain.
#[async_trait::async_trait]
pub trait Store: Send + Sync {
    /// Atomically upserts the block, replaces its transactions and advances the chain cursor to
    /// the block height. The cursor never moves backward through this call.
    async fn save_block_with_transactions(
        &self,
        block: &Block,
        transactions: &[Transaction],
    ) -> eyre::Result<()>;

    async fn get_state(&self, chain: Chain) -> eyre::Result<Option<IndexerState>>;

    /// Overwrites the cursor, creating the row if needed. Used by the reset path only.
    async fn put_state(&self, chain: Chain, height: BlockHeight) -> eyre::Result<()>;

    /// Moves the cursor forward to `height`; a lower height leaves it untouched.
    async fn advance_state(&self, chain: Chain, height: BlockHeight) -> eyre::Result<()>;

    /// Deletes every block and transaction at or above `height` and sets the cursor to
    /// `height - 1` (or 0) in one transaction.
    async fn rollback_to(&self, chain: Chain, height: BlockHeight) -> eyre::Result<()>;

    async fn latest_blocks(&self, chain: Chain, limit: u32, offset: u32)
    -> eyre::Result<Vec<Block>>;

    async fn latest_transactions(
        &self,
        chain: Chain,
        limit: u32,
        offset: u32,
    ) -> eyre::Result<Vec<Transaction>>;

    async fn block_by_height(&self, chain: Chain, height: BlockHeight)
    -> eyre::Result<Option<Block>>;

    async fn block_by_hash(&self, chain: Chain, hash: &str) -> eyre::Result<Option<Block>>;

    async fn transactions_by_block(
        &self,
        chain: Chain,
        height: BlockHeight,
    ) -> eyre::Result<Vec<Transaction>>;

    async fn transaction_by_hash(&self, chain: Chain, hash: &str)
    -> eyre::Result<Option<Transaction>>;

    async fn count_blocks(&self, chain: Chain) -> eyre::Result<u64>;

    async fn count_transactions(&self, chain: Chain) -> eyre::Result<u64>;

    /// Highest stored block height, 0 for an empty chain.
    async fn max_block_height(&self, chain: Chain) -> eyre::Result<BlockHeight>;
}
