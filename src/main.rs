use dual_chain_indexer::adapter::ChainAdapter;
use dual_chain_indexer::btc::adapter::BtcAdapter;
use dual_chain_indexer::btc::rpc::JsonRpcClient;
use dual_chain_indexer::config::Config;
use dual_chain_indexer::domain::Chain;
use dual_chain_indexer::eth::adapter::{AlloyProviderBuilder, EthAdapter};
use dual_chain_indexer::query;
use dual_chain_indexer::scheduler::Scheduler;
use dual_chain_indexer::state::StateTracker;
use dual_chain_indexer::store::Store;
use dual_chain_indexer::store::sqlite::SqliteStore;
use dual_chain_indexer::worker::SyncWorker;
use envconfig::Envconfig;
use itertools::Itertools;
use std::sync::Arc;
use tokio_util::sync::CancellationToken;

#[tokio::main]
async fn main() -> eyre::Result<()> {
    // a missing .env file is fine, the environment may be set already
    dotenvy::dotenv().ok();

    let config = Config::init_from_env()?;

    tracing_subscriber::fmt()
        .with_max_level(config.log_level)
        .init();

    let store: Arc<dyn Store> = Arc::new(SqliteStore::init(config.db.clone()).await?);
    let tracker = StateTracker::new(store.clone());

    let mut workers = vec![];
    for chain in Chain::ALL {
        match start_worker(chain, &config, tracker.clone()).await {
            Ok(Some(worker)) => workers.push(Arc::new(worker)),
            Ok(None) => tracing::info!("[{}] No rpc endpoint configured, chain disabled", chain),
            Err(e) => tracing::error!(
                "[{}] Worker failed to start, continuing without it: {:?}",
                chain,
                e
            ),
        }
    }

    if workers.is_empty() {
        tracing::warn!("No chain worker is running");
    }

    let cancel = CancellationToken::new();
    let handles = workers
        .into_iter()
        .map(|worker| {
            let scheduler = Scheduler::new(worker);
            let token = cancel.child_token();
            tokio::spawn(async move { scheduler.schedule(token).await })
        })
        .collect_vec();

    tokio::signal::ctrl_c().await?;
    tracing::info!("Shutdown requested, waiting for in-flight cycles");
    cancel.cancel();

    for handle in handles {
        if let Err(e) = handle.await {
            tracing::error!("Scheduler task failed: {:?}", e);
        }
    }

    for chain in Chain::ALL {
        let stats = query::chain_stats(store.as_ref(), chain).await?;
        tracing::info!(
            "[{}] Indexed through {}, {} blocks, {} transactions, synced: {}",
            chain,
            stats.last_indexed_height,
            stats.total_blocks,
            stats.total_transactions,
            stats.synced
        );
    }

    Ok(())
}

/// Connects the chain adapter and starts its worker. `None` when the chain has no endpoint.
async fn start_worker(
    chain: Chain,
    config: &Config,
    tracker: StateTracker,
) -> eyre::Result<Option<SyncWorker>> {
    let (adapter, worker_cfg) = match chain {
        Chain::Ethereum => {
            if config.eth.rpc_urls.is_none() {
                return Ok(None);
            }
            let provider = AlloyProviderBuilder::new_http(config.eth.clone())?;
            let adapter: Arc<dyn ChainAdapter> = Arc::new(EthAdapter::connect(provider).await?);
            let worker_cfg = config
                .sync
                .worker_config(config.eth.start_height, config.eth.sync_interval_ms);
            (adapter, worker_cfg)
        }
        Chain::Bitcoin => {
            let Some(url) = config.btc.rpc_url.clone() else {
                return Ok(None);
            };
            let rpc = JsonRpcClient::new(url, &config.btc)?;
            let adapter: Arc<dyn ChainAdapter> =
                Arc::new(BtcAdapter::new(rpc, config.btc.input_lookup_concurrency));
            let worker_cfg = config
                .sync
                .worker_config(config.btc.start_height, config.btc.sync_interval_ms);
            (adapter, worker_cfg)
        }
    };

    SyncWorker::start(adapter, tracker, worker_cfg)
        .await
        .map(Some)
}
