use crate::domain::{BlockHeight, Chain};
use crate::store::Store;
use std::sync::Arc;

/// How far below the tip a fresh or reset cursor lands, enough to re-absorb shallow reorgs
/// without a full rescan.
pub const SAFETY_MARGIN: u64 = 10;

/// Outcome of reconciling a persisted cursor against the current chain tip.
#[derive(Debug, Copy, Clone, Eq, PartialEq)]
pub enum StartHeight {
    /// Existing cursor is consistent with the tip.
    Existing(BlockHeight),
    /// Existing cursor was ahead of the tip and has to be pulled back.
    Reset {
        from: BlockHeight,
        to: BlockHeight,
    },
    /// No cursor yet.
    Created(BlockHeight),
}

impl StartHeight {
    pub fn height(&self) -> BlockHeight {
        match self {
            StartHeight::Existing(h) | StartHeight::Created(h) => *h,
            StartHeight::Reset { to, .. } => *to,
        }
    }
}

fn below_tip(tip: BlockHeight) -> BlockHeight {
    tip.saturating_sub(SAFETY_MARGIN)
}

/// Start/reset policy: a non-positive configured start means "just below the tip", and a start or
/// an existing cursor beyond the tip is clamped to just below the tip.
pub fn resolve_start_height(
    existing: Option<BlockHeight>,
    tip: BlockHeight,
    configured_start: i64,
) -> StartHeight {
    match existing {
        Some(current) if current > tip => StartHeight::Reset {
            from: current,
            to: below_tip(tip),
        },
        Some(current) => StartHeight::Existing(current),
        None => {
            let start = match u64::try_from(configured_start) {
                Ok(start) if start > 0 => BlockHeight(start),
                _ => below_tip(tip),
            };
            if start > tip {
                StartHeight::Created(below_tip(tip))
            } else {
                StartHeight::Created(start)
            }
        }
    }
}

/// Per-chain cursor bookkeeping on top of the store.
#[derive(Clone)]
pub struct StateTracker {
    store: Arc<dyn Store>,
}

impl StateTracker {
    pub fn new(store: Arc<dyn Store>) -> Self {
        Self { store }
    }

    pub fn store(&self) -> &Arc<dyn Store> {
        &self.store
    }

    /// Returns the height the chain is indexed through, creating or repairing the cursor first.
    pub async fn get_or_create_state(
        &self,
        chain: Chain,
        tip: BlockHeight,
        configured_start: i64,
    ) -> eyre::Result<BlockHeight> {
        let existing = self
            .store
            .get_state(chain)
            .await?
            .map(|s| s.last_indexed_height);

        let resolved = resolve_start_height(existing, tip, configured_start);
        match resolved {
            StartHeight::Existing(_) => {}
            StartHeight::Reset { from, to } => {
                self.store.put_state(chain, to).await?;
                tracing::warn!(
                    "[{}] Reset state from {} to {} because last indexed height was greater than tip {}",
                    chain,
                    from,
                    to,
                    tip
                );
            }
            StartHeight::Created(start) => {
                self.store.put_state(chain, start).await?;
                tracing::info!(
                    "[{}] Created initial indexer state starting at block {}",
                    chain,
                    start
                );
            }
        }

        Ok(resolved.height())
    }

    pub async fn last_indexed(&self, chain: Chain) -> eyre::Result<Option<BlockHeight>> {
        Ok(self
            .store
            .get_state(chain)
            .await?
            .map(|s| s.last_indexed_height))
    }

    /// Moves the cursor forward. Heights below the current cursor are ignored.
    pub async fn advance(&self, chain: Chain, height: BlockHeight) -> eyre::Result<()> {
        self.store.advance_state(chain, height).await
    }

    /// Drops everything stored at or above `height` and moves the cursor just below it.
    pub async fn rollback_to(&self, chain: Chain, height: BlockHeight) -> eyre::Result<()> {
        self.store.rollback_to(chain, height).await
    }
}
