pub mod config;
mod query;

use crate::domain::{Block, BlockHeight, Chain, IndexerState, Transaction};
use crate::store::Store;
use crate::store::sqlite::config::DatabaseConfig;
use sqlx::Pool;
use sqlx::sqlite::{SqliteConnectOptions, SqlitePoolOptions};
use std::str::FromStr;

pub struct SqliteStore {
    pool: Pool<sqlx::Sqlite>,
}

impl SqliteStore {
    pub async fn init(config: DatabaseConfig) -> eyre::Result<Self> {
        let options =
            SqliteConnectOptions::from_str(config.database_url.as_ref())?.create_if_missing(true);

        // an in-memory database lives as long as its connection, keep it around
        let pool = SqlitePoolOptions::new()
            .max_connections(config.max_connections.max(1))
            .idle_timeout(None)
            .max_lifetime(None)
            .connect_with(options)
            .await?;

        sqlx::migrate!().run(&pool).await?;

        Ok(Self { pool })
    }
}

#[async_trait::async_trait]
impl Store for SqliteStore {
    async fn save_block_with_transactions(
        &self,
        block: &Block,
        transactions: &[Transaction],
    ) -> eyre::Result<()> {
        let mut tx = self.pool.begin().await?;

        query::save_block(&mut *tx, block).await?;
        let stale =
            query::drop_stale_transactions(&mut *tx, block.chain, block.height, &block.hash)
                .await?;
        // todo combine the per-row upserts into a single multi-row insert
        for transaction in transactions {
            query::save_transaction(&mut *tx, transaction).await?;
        }
        query::advance_state(&mut *tx, block.chain, block.height).await?;

        tx.commit().await?;

        if stale > 0 {
            tracing::info!(
                "[{}] Replaced {} stale transactions at height {}",
                block.chain,
                stale,
                block.height
            );
        }

        Ok(())
    }

    async fn get_state(&self, chain: Chain) -> eyre::Result<Option<IndexerState>> {
        query::get_state(&self.pool, chain).await
    }

    async fn put_state(&self, chain: Chain, height: BlockHeight) -> eyre::Result<()> {
        query::put_state(&self.pool, chain, height).await
    }

    async fn advance_state(&self, chain: Chain, height: BlockHeight) -> eyre::Result<()> {
        query::advance_state(&self.pool, chain, height).await
    }

    async fn rollback_to(&self, chain: Chain, height: BlockHeight) -> eyre::Result<()> {
        let mut tx = self.pool.begin().await?;

        let txs = query::drop_transactions_from(&mut *tx, chain, height).await?;
        let blocks = query::drop_blocks_from(&mut *tx, chain, height).await?;
        query::put_state(&mut *tx, chain, height.saturating_sub(1)).await?;

        tx.commit().await?;

        tracing::info!(
            "[{}] Rolled back to height {}, dropped {} blocks and {} transactions",
            chain,
            height,
            blocks,
            txs
        );

        Ok(())
    }

    async fn latest_blocks(
        &self,
        chain: Chain,
        limit: u32,
        offset: u32,
    ) -> eyre::Result<Vec<Block>> {
        query::list_blocks(&self.pool, chain, limit, offset).await
    }

    async fn latest_transactions(
        &self,
        chain: Chain,
        limit: u32,
        offset: u32,
    ) -> eyre::Result<Vec<Transaction>> {
        query::list_transactions(&self.pool, chain, limit, offset).await
    }

    async fn block_by_height(
        &self,
        chain: Chain,
        height: BlockHeight,
    ) -> eyre::Result<Option<Block>> {
        query::get_block_by_height(&self.pool, chain, height).await
    }

    async fn block_by_hash(&self, chain: Chain, hash: &str) -> eyre::Result<Option<Block>> {
        query::get_block_by_hash(&self.pool, chain, hash).await
    }

    async fn transactions_by_block(
        &self,
        chain: Chain,
        height: BlockHeight,
    ) -> eyre::Result<Vec<Transaction>> {
        query::list_transactions_by_block(&self.pool, chain, height).await
    }

    async fn transaction_by_hash(
        &self,
        chain: Chain,
        hash: &str,
    ) -> eyre::Result<Option<Transaction>> {
        query::get_transaction_by_hash(&self.pool, chain, hash).await
    }

    async fn count_blocks(&self, chain: Chain) -> eyre::Result<u64> {
        query::count_blocks(&self.pool, chain).await
    }

    async fn count_transactions(&self, chain: Chain) -> eyre::Result<u64> {
        query::count_transactions(&self.pool, chain).await
    }

    async fn max_block_height(&self, chain: Chain) -> eyre::Result<BlockHeight> {
        query::max_block_height(&self.pool, chain).await
    }
}
