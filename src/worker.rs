use crate::adapter::ChainAdapter;
use crate::domain::{Block, BlockHeight, Chain};
use crate::state::StateTracker;
use envconfig::Envconfig;
use eyre::{WrapErr, ensure};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::{Mutex, watch};
use tokio::time::Instant;

/// Tuning shared by both chain workers.
#[derive(Debug, Clone, Envconfig)]
pub struct SyncConfig {
    #[envconfig(from = "TIP_CACHE_TTL_MS", default = "5000")]
    pub tip_cache_ttl_ms: u64,
    #[envconfig(from = "SYNC_MAX_BACKOFF_MS", default = "60000")]
    pub max_backoff_ms: u64,
}

impl SyncConfig {
    pub fn worker_config(&self, start_height: i64, sync_interval_ms: u64) -> WorkerConfig {
        WorkerConfig {
            start_height,
            sync_interval: Duration::from_millis(sync_interval_ms),
            tip_ttl: Duration::from_millis(self.tip_cache_ttl_ms),
            max_backoff: Duration::from_millis(self.max_backoff_ms),
        }
    }
}

#[derive(Debug, Clone)]
pub struct WorkerConfig {
    /// `<= 0` starts just below the tip.
    pub start_height: i64,
    pub sync_interval: Duration,
    pub tip_ttl: Duration,
    /// Zero disables the failure backoff.
    pub max_backoff: Duration,
}

#[derive(Debug, Copy, Clone, Eq, PartialEq)]
pub enum WorkerPhase {
    Idle,
    CheckTip,
    CaughtUp,
    Fetching,
    Persisting,
    Stopped,
}

#[derive(Debug, Copy, Clone, Eq, PartialEq)]
pub enum TickOutcome {
    Indexed(BlockHeight),
    CaughtUp { next: BlockHeight, tip: BlockHeight },
    /// A previous cycle was still in flight, the tick was dropped.
    Busy,
    /// Still inside the backoff window of a previous failure.
    BackingOff,
    /// The stored block at this height did not match the parent of the fetched block and was
    /// removed together with everything above it.
    RolledBack(BlockHeight),
}

#[derive(Debug, Copy, Clone)]
struct CachedTip {
    tip: BlockHeight,
    fetched_at: Instant,
}

#[derive(Debug, Default)]
struct Backoff {
    failures: u32,
    until: Option<Instant>,
}

impl Backoff {
    fn is_active(&self, now: Instant) -> bool {
        self.until.is_some_and(|until| now < until)
    }

    fn record_failure(&mut self, interval: Duration, max: Duration) -> Duration {
        self.failures = self.failures.saturating_add(1);
        let delay = backoff_delay(self.failures, interval, max);
        self.until = (!delay.is_zero()).then(|| Instant::now() + delay);
        delay
    }

    fn reset(&mut self) {
        *self = Backoff::default();
    }
}

/// `interval * 2^(failures - 1)` capped at `max`, zero when `max` is zero.
fn backoff_delay(failures: u32, interval: Duration, max: Duration) -> Duration {
    if max.is_zero() || failures == 0 {
        return Duration::ZERO;
    }
    let factor = 2u32.saturating_pow(failures - 1);
    interval.saturating_mul(factor).min(max)
}

/// Everything mutated by a fetch-persist cycle. Guarded by a single lock so that at most one
/// cycle per chain is in flight.
#[derive(Debug, Default)]
struct Cycle {
    tip: Option<CachedTip>,
    backoff: Backoff,
}

/// Drives one chain: refresh tip, fetch the next block, persist it, advance the cursor.
pub struct SyncWorker {
    chain: Chain,
    adapter: Arc<dyn ChainAdapter>,
    tracker: StateTracker,
    cfg: WorkerConfig,
    cycle: Mutex<Cycle>,
    phase: watch::Sender<WorkerPhase>,
}

impl SyncWorker {
    /// Validates the node is reachable and establishes (or repairs) the chain cursor. A chain
    /// failing here should not be scheduled at all.
    pub async fn start(
        adapter: Arc<dyn ChainAdapter>,
        tracker: StateTracker,
        cfg: WorkerConfig,
    ) -> eyre::Result<Self> {
        let chain = adapter.chain();

        ensure!(
            !cfg.sync_interval.is_zero(),
            "[{}] Sync interval must be greater than zero",
            chain
        );

        let tip = adapter
            .get_tip()
            .await
            .wrap_err_with(|| format!("{} node is unreachable", chain))?;

        let height = tracker
            .get_or_create_state(chain, tip, cfg.start_height)
            .await?;

        tracing::info!(
            "[{}] Worker ready, indexed through {}, tip {}",
            chain,
            height,
            tip
        );

        let cycle = Cycle {
            tip: Some(CachedTip {
                tip,
                fetched_at: Instant::now(),
            }),
            backoff: Backoff::default(),
        };

        Ok(Self {
            chain,
            adapter,
            tracker,
            cfg,
            cycle: Mutex::new(cycle),
            phase: watch::Sender::new(WorkerPhase::Idle),
        })
    }

    pub fn chain(&self) -> Chain {
        self.chain
    }

    pub fn sync_interval(&self) -> Duration {
        self.cfg.sync_interval
    }

    pub fn phase(&self) -> WorkerPhase {
        *self.phase.borrow()
    }

    pub fn subscribe(&self) -> watch::Receiver<WorkerPhase> {
        self.phase.subscribe()
    }

    pub fn stop(&self) {
        self.set_phase(WorkerPhase::Stopped);
    }

    /// Runs at most one fetch-persist cycle. A tick arriving while another is in flight is
    /// dropped, never queued. On error nothing was advanced and the same height is retried by a
    /// later tick.
    pub async fn tick(&self) -> eyre::Result<TickOutcome> {
        let Ok(mut cycle) = self.cycle.try_lock() else {
            tracing::debug!("[{}] Previous cycle still in flight, dropping tick", self.chain);
            return Ok(TickOutcome::Busy);
        };

        if cycle.backoff.is_active(Instant::now()) {
            tracing::debug!(
                "[{}] Backing off after {} consecutive failures",
                self.chain,
                cycle.backoff.failures
            );
            return Ok(TickOutcome::BackingOff);
        }

        let result = self.run_cycle(&mut cycle).await;
        match &result {
            Ok(_) => cycle.backoff.reset(),
            Err(_) => {
                // the tip may be what went wrong, do not trust the cached one
                cycle.tip = None;
                let delay = cycle
                    .backoff
                    .record_failure(self.cfg.sync_interval, self.cfg.max_backoff);
                if !delay.is_zero() {
                    tracing::warn!(
                        "[{}] {} consecutive failed ticks, pausing for {:?}",
                        self.chain,
                        cycle.backoff.failures,
                        delay
                    );
                }
            }
        }

        self.set_phase(WorkerPhase::Idle);
        result
    }

    async fn run_cycle(&self, cycle: &mut Cycle) -> eyre::Result<TickOutcome> {
        self.set_phase(WorkerPhase::CheckTip);
        let tip = self.current_tip(&mut cycle.tip).await?;

        let last_indexed = self
            .tracker
            .get_or_create_state(self.chain, tip, self.cfg.start_height)
            .await?;

        let next = last_indexed.next();
        if next > tip {
            self.set_phase(WorkerPhase::CaughtUp);
            tracing::debug!("[{}] Caught up, next {} is above tip {}", self.chain, next, tip);
            return Ok(TickOutcome::CaughtUp { next, tip });
        }

        self.set_phase(WorkerPhase::Fetching);
        let fetched = self
            .adapter
            .fetch_block(next)
            .await
            .wrap_err_with(|| format!("[{}] Failed to fetch block {}", self.chain, next))?;

        ensure!(
            fetched.block.height == next,
            "[{}] Requested block {} but got {}",
            self.chain,
            next,
            fetched.block.height
        );

        if let Some(fork_height) = self.find_fork(&fetched.block).await? {
            self.tracker.rollback_to(self.chain, fork_height).await?;
            cycle.tip = None;
            tracing::warn!(
                "[{}] Reorg detected, parent of block {} does not match the stored block, rolled back to {}",
                self.chain,
                next,
                fork_height.saturating_sub(1)
            );
            return Ok(TickOutcome::RolledBack(fork_height));
        }

        self.set_phase(WorkerPhase::Persisting);
        self.tracker
            .store()
            .save_block_with_transactions(&fetched.block, &fetched.transactions)
            .await
            .wrap_err_with(|| format!("[{}] Failed to persist block {}", self.chain, next))?;

        tracing::info!(
            "[{}] Indexed block {} ({} transactions, tip {})",
            self.chain,
            next,
            fetched.transactions.len(),
            tip
        );

        Ok(TickOutcome::Indexed(next))
    }

    async fn current_tip(&self, cached: &mut Option<CachedTip>) -> eyre::Result<BlockHeight> {
        if let Some(hit) = cached
            .as_ref()
            .filter(|c| c.fetched_at.elapsed() < self.cfg.tip_ttl)
        {
            return Ok(hit.tip);
        }

        let tip = self
            .adapter
            .get_tip()
            .await
            .wrap_err_with(|| format!("[{}] Failed to refresh tip", self.chain))?;

        *cached = Some(CachedTip {
            tip,
            fetched_at: Instant::now(),
        });
        Ok(tip)
    }

    /// Height of the stored predecessor of `block` if it disagrees with the block's parent hash.
    async fn find_fork(&self, block: &Block) -> eyre::Result<Option<BlockHeight>> {
        if block.height.0 == 0 {
            return Ok(None);
        }
        let parent_height = block.height.saturating_sub(1);

        let stored = self
            .tracker
            .store()
            .block_by_height(self.chain, parent_height)
            .await?;

        Ok(stored
            .filter(|parent| parent.hash != block.parent_hash)
            .map(|_| parent_height))
    }

    fn set_phase(&self, phase: WorkerPhase) {
        self.phase.send_replace(phase);
    }
}
