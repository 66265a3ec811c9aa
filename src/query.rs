use crate::domain::{Block, BlockHeight, Chain, Transaction};
use crate::store::Store;

/// How far the cursor may trail the highest stored block and still count as synced.
const SYNC_TOLERANCE: u64 = 2;

#[derive(Debug, Clone, Eq, PartialEq)]
pub struct ChainStats {
    pub chain: Chain,
    pub last_indexed_height: BlockHeight,
    pub total_blocks: u64,
    pub total_transactions: u64,
    pub synced: bool,
}

#[derive(Debug, Clone, Eq, PartialEq)]
pub enum SearchHit {
    Block(Block),
    Transaction(Transaction),
}

impl SearchHit {
    pub fn chain(&self) -> Chain {
        match self {
            SearchHit::Block(b) => b.chain,
            SearchHit::Transaction(tx) => tx.chain,
        }
    }
}

pub async fn chain_stats(store: &dyn Store, chain: Chain) -> eyre::Result<ChainStats> {
    let last_indexed_height = store
        .get_state(chain)
        .await?
        .map(|s| s.last_indexed_height)
        .unwrap_or_default();
    let max_stored = store.max_block_height(chain).await?;

    Ok(ChainStats {
        chain,
        last_indexed_height,
        total_blocks: store.count_blocks(chain).await?,
        total_transactions: store.count_transactions(chain).await?,
        synced: is_synced(last_indexed_height, max_stored),
    })
}

fn is_synced(last_indexed: BlockHeight, max_stored: BlockHeight) -> bool {
    max_stored.0 > 0 && last_indexed >= max_stored.saturating_sub(SYNC_TOLERANCE)
}

/// Resolves a free-form query: a decimal number is a block height, a hex-looking string a
/// transaction or block hash. Bitcoin is searched before Ethereum, the first hit wins.
pub async fn search(store: &dyn Store, q: &str) -> eyre::Result<Option<SearchHit>> {
    let q = q.trim();
    if q.is_empty() {
        return Ok(None);
    }

    if let Ok(height) = q.parse::<u64>() {
        for chain in Chain::ALL {
            if let Some(block) = store.block_by_height(chain, BlockHeight(height)).await? {
                return Ok(Some(SearchHit::Block(block)));
            }
        }
    }

    if q.starts_with("0x") || q.len() >= 32 {
        for chain in Chain::ALL {
            if let Some(tx) = store.transaction_by_hash(chain, q).await? {
                return Ok(Some(SearchHit::Transaction(tx)));
            }
        }
        for chain in Chain::ALL {
            if let Some(block) = store.block_by_hash(chain, q).await? {
                return Ok(Some(SearchHit::Block(block)));
            }
        }
    }

    Ok(None)
}
