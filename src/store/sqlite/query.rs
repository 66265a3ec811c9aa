use crate::domain::{Block, BlockHeight, Chain, IndexerState, Transaction};
use sqlx::{Executor, Sqlite};

const BLOCK_COLUMNS: &str = "chain, height, hash, parent_hash, timestamp, tx_count";
const TX_COLUMNS: &str =
    "chain, hash, block_hash, height, sender, recipient, value, status, timestamp";

pub async fn save_block<'c, E>(executor: E, block: &Block) -> eyre::Result<()>
where
    E: Executor<'c, Database = Sqlite>,
{
    sqlx::query(
        "INSERT INTO blocks (
            chain, height, hash, parent_hash, timestamp, tx_count
        ) VALUES (?, ?, ?, ?, ?, ?)
        ON CONFLICT (chain, height) DO UPDATE SET
            hash = excluded.hash,
            parent_hash = excluded.parent_hash,
            timestamp = excluded.timestamp,
            tx_count = excluded.tx_count",
    )
    .bind(block.chain)
    .bind(block.height)
    .bind(&block.hash)
    .bind(&block.parent_hash)
    .bind(block.timestamp)
    .bind(block.tx_count)
    .execute(executor)
    .await
    .map(|_| ())
    .map_err(Into::into)
}

pub async fn save_transaction<'c, E>(executor: E, tx: &Transaction) -> eyre::Result<()>
where
    E: Executor<'c, Database = Sqlite>,
{
    sqlx::query(
        "INSERT INTO transactions (
            chain, hash, block_hash, height, sender, recipient, value, status, timestamp
        ) VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?)
        ON CONFLICT (chain, hash) DO UPDATE SET
            block_hash = excluded.block_hash,
            height = excluded.height,
            sender = excluded.sender,
            recipient = excluded.recipient,
            value = excluded.value,
            status = excluded.status,
            timestamp = excluded.timestamp",
    )
    .bind(tx.chain)
    .bind(&tx.hash)
    .bind(&tx.block_hash)
    .bind(tx.height)
    .bind(&tx.sender)
    .bind(&tx.recipient)
    .bind(&tx.value)
    .bind(tx.status)
    .bind(tx.timestamp)
    .execute(executor)
    .await
    .map(|_| ())
    .map_err(Into::into)
}

/// Removes transactions left at `height` by a block that has since been replaced.
pub async fn drop_stale_transactions<'c, E>(
    executor: E,
    chain: Chain,
    height: BlockHeight,
    block_hash: &str,
) -> eyre::Result<u64>
where
    E: Executor<'c, Database = Sqlite>,
{
    let rows = sqlx::query(
        "DELETE FROM transactions WHERE chain = ? AND height = ? AND block_hash <> ?",
    )
    .bind(chain)
    .bind(height)
    .bind(block_hash)
    .execute(executor)
    .await?
    .rows_affected();

    Ok(rows)
}

pub async fn drop_blocks_from<'c, E>(
    executor: E,
    chain: Chain,
    height: BlockHeight,
) -> eyre::Result<u64>
where
    E: Executor<'c, Database = Sqlite>,
{
    let rows = sqlx::query("DELETE FROM blocks WHERE chain = ? AND height >= ?")
        .bind(chain)
        .bind(height)
        .execute(executor)
        .await?
        .rows_affected();

    Ok(rows)
}

pub async fn drop_transactions_from<'c, E>(
    executor: E,
    chain: Chain,
    height: BlockHeight,
) -> eyre::Result<u64>
where
    E: Executor<'c, Database = Sqlite>,
{
    let rows = sqlx::query("DELETE FROM transactions WHERE chain = ? AND height >= ?")
        .bind(chain)
        .bind(height)
        .execute(executor)
        .await?
        .rows_affected();

    Ok(rows)
}

pub async fn get_state<'c, E>(executor: E, chain: Chain) -> eyre::Result<Option<IndexerState>>
where
    E: Executor<'c, Database = Sqlite>,
{
    let row = sqlx::query_as::<_, IndexerState>(
        "SELECT chain, last_indexed_height, updated_at FROM indexer_state WHERE chain = ?",
    )
    .bind(chain)
    .fetch_optional(executor)
    .await?;

    Ok(row)
}

pub async fn put_state<'c, E>(executor: E, chain: Chain, height: BlockHeight) -> eyre::Result<()>
where
    E: Executor<'c, Database = Sqlite>,
{
    sqlx::query(
        "INSERT INTO indexer_state (chain, last_indexed_height, updated_at)
        VALUES (?, ?, unixepoch())
        ON CONFLICT (chain) DO UPDATE SET
            last_indexed_height = excluded.last_indexed_height,
            updated_at = excluded.updated_at",
    )
    .bind(chain)
    .bind(height)
    .execute(executor)
    .await
    .map(|_| ())
    .map_err(Into::into)
}

pub async fn advance_state<'c, E>(
    executor: E,
    chain: Chain,
    height: BlockHeight,
) -> eyre::Result<()>
where
    E: Executor<'c, Database = Sqlite>,
{
    sqlx::query(
        "INSERT INTO indexer_state (chain, last_indexed_height, updated_at)
        VALUES (?, ?, unixepoch())
        ON CONFLICT (chain) DO UPDATE SET
            last_indexed_height = MAX(indexer_state.last_indexed_height, excluded.last_indexed_height),
            updated_at = excluded.updated_at",
    )
    .bind(chain)
    .bind(height)
    .execute(executor)
    .await
    .map(|_| ())
    .map_err(Into::into)
}

pub async fn list_blocks<'c, E>(
    executor: E,
    chain: Chain,
    limit: u32,
    offset: u32,
) -> eyre::Result<Vec<Block>>
where
    E: Executor<'c, Database = Sqlite>,
{
    let sql = format!(
        "SELECT {BLOCK_COLUMNS} FROM blocks WHERE chain = ? ORDER BY height DESC LIMIT ? OFFSET ?"
    );
    let rows = sqlx::query_as::<_, Block>(&sql)
        .bind(chain)
        .bind(limit)
        .bind(offset)
        .fetch_all(executor)
        .await?;

    Ok(rows)
}

pub async fn list_transactions<'c, E>(
    executor: E,
    chain: Chain,
    limit: u32,
    offset: u32,
) -> eyre::Result<Vec<Transaction>>
where
    E: Executor<'c, Database = Sqlite>,
{
    let sql = format!(
        "SELECT {TX_COLUMNS} FROM transactions WHERE chain = ?
        ORDER BY height DESC, rowid ASC LIMIT ? OFFSET ?"
    );
    let rows = sqlx::query_as::<_, Transaction>(&sql)
        .bind(chain)
        .bind(limit)
        .bind(offset)
        .fetch_all(executor)
        .await?;

    Ok(rows)
}

pub async fn get_block_by_height<'c, E>(
    executor: E,
    chain: Chain,
    height: BlockHeight,
) -> eyre::Result<Option<Block>>
where
    E: Executor<'c, Database = Sqlite>,
{
    let sql = format!("SELECT {BLOCK_COLUMNS} FROM blocks WHERE chain = ? AND height = ?");
    let row = sqlx::query_as::<_, Block>(&sql)
        .bind(chain)
        .bind(height)
        .fetch_optional(executor)
        .await?;

    Ok(row)
}

pub async fn get_block_by_hash<'c, E>(
    executor: E,
    chain: Chain,
    hash: &str,
) -> eyre::Result<Option<Block>>
where
    E: Executor<'c, Database = Sqlite>,
{
    let sql = format!("SELECT {BLOCK_COLUMNS} FROM blocks WHERE chain = ? AND hash = ?");
    let row = sqlx::query_as::<_, Block>(&sql)
        .bind(chain)
        .bind(hash)
        .fetch_optional(executor)
        .await?;

    Ok(row)
}

pub async fn list_transactions_by_block<'c, E>(
    executor: E,
    chain: Chain,
    height: BlockHeight,
) -> eyre::Result<Vec<Transaction>>
where
    E: Executor<'c, Database = Sqlite>,
{
    let sql = format!(
        "SELECT {TX_COLUMNS} FROM transactions WHERE chain = ? AND height = ? ORDER BY rowid"
    );
    let rows = sqlx::query_as::<_, Transaction>(&sql)
        .bind(chain)
        .bind(height)
        .fetch_all(executor)
        .await?;

    Ok(rows)
}

pub async fn get_transaction_by_hash<'c, E>(
    executor: E,
    chain: Chain,
    hash: &str,
) -> eyre::Result<Option<Transaction>>
where
    E: Executor<'c, Database = Sqlite>,
{
    let sql = format!("SELECT {TX_COLUMNS} FROM transactions WHERE chain = ? AND hash = ?");
    let row = sqlx::query_as::<_, Transaction>(&sql)
        .bind(chain)
        .bind(hash)
        .fetch_optional(executor)
        .await?;

    Ok(row)
}

pub async fn count_blocks<'c, E>(executor: E, chain: Chain) -> eyre::Result<u64>
where
    E: Executor<'c, Database = Sqlite>,
{
    let count: i64 = sqlx::query_scalar("SELECT COUNT(*) FROM blocks WHERE chain = ?")
        .bind(chain)
        .fetch_one(executor)
        .await?;

    Ok(u64::try_from(count)?)
}

pub async fn count_transactions<'c, E>(executor: E, chain: Chain) -> eyre::Result<u64>
where
    E: Executor<'c, Database = Sqlite>,
{
    let count: i64 = sqlx::query_scalar("SELECT COUNT(*) FROM transactions WHERE chain = ?")
        .bind(chain)
        .fetch_one(executor)
        .await?;

    Ok(u64::try_from(count)?)
}

pub async fn max_block_height<'c, E>(executor: E, chain: Chain) -> eyre::Result<BlockHeight>
where
    E: Executor<'c, Database = Sqlite>,
{
    let height: BlockHeight =
        sqlx::query_scalar("SELECT COALESCE(MAX(height), 0) FROM blocks WHERE chain = ?")
            .bind(chain)
            .fetch_one(executor)
            .await?;

    Ok(height)
}
