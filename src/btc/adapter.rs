use crate::adapter::ChainAdapter;
use crate::btc::rpc::{BtcRpc, RpcTransaction};
use crate::domain::{Block, BlockHeight, BlockTimestamp, Chain, ChainBlock, Transaction, TxStatus};
use bitcoin::Amount;
use eyre::WrapErr;
use futures::StreamExt;
use std::collections::{BTreeMap, BTreeSet};

/// Sender of a block reward transaction.
pub const COINBASE: &str = "coinbase";
/// No address could be resolved.
pub const UNKNOWN: &str = "unknown";
/// Outputs exist but none of them pays to an address.
pub const NON_STANDARD: &str = "non-standard";

const SATS_PER_BTC: u64 = 100_000_000;

/// UTXO-chain adapter. Inputs only reference previous outputs, so every sender address costs one
/// `getrawtransaction` lookup (the node needs `txindex=1` for those to succeed).
pub struct BtcAdapter<R> {
    rpc: R,
    lookup_concurrency: usize,
}

impl<R: BtcRpc> BtcAdapter<R> {
    pub fn new(rpc: R, lookup_concurrency: usize) -> Self {
        Self {
            rpc,
            lookup_concurrency: lookup_concurrency.max(1),
        }
    }

    /// Collects the addresses of every output spent by `tx`. Failed lookups contribute nothing.
    async fn resolve_input_addresses(&self, tx: &RpcTransaction) -> BTreeSet<String> {
        let mut spent: BTreeMap<String, Vec<usize>> = BTreeMap::new();
        for input in &tx.vin {
            if let (Some(txid), Some(vout)) = (input.txid.as_ref(), input.vout) {
                spent.entry(txid.clone()).or_default().push(vout as usize);
            }
        }

        let lookups: Vec<_> = futures::stream::iter(spent)
            .map(|(txid, outputs)| async move {
                let prev = self.rpc.get_raw_transaction(&txid).await;
                (txid, outputs, prev)
            })
            .buffer_unordered(self.lookup_concurrency)
            .collect()
            .await;

        let mut addresses = BTreeSet::new();
        for (txid, outputs, prev) in lookups {
            match prev {
                Ok(prev) => {
                    for index in outputs {
                        if let Some(output) = prev.vout.get(index) {
                            addresses.extend(output.script_pub_key.addresses());
                        }
                    }
                }
                Err(e) => {
                    tracing::debug!(
                        "[{}] Lookup of previous transaction {} failed: {}",
                        Chain::Bitcoin,
                        txid,
                        e
                    );
                }
            }
        }
        addresses
    }

    async fn normalize_transaction(
        &self,
        tx: &RpcTransaction,
        block: &Block,
    ) -> eyre::Result<Transaction> {
        let is_coinbase = tx
            .vin
            .first()
            .is_some_and(|input| input.coinbase.is_some() || input.txid.is_none());

        let sender = if is_coinbase {
            COINBASE.to_string()
        } else {
            summarize(&self.resolve_input_addresses(tx).await).unwrap_or_else(|| UNKNOWN.into())
        };

        let receivers: BTreeSet<String> = tx
            .vout
            .iter()
            .flat_map(|output| output.script_pub_key.addresses())
            .collect();
        let recipient = match summarize(&receivers) {
            Some(recipient) => recipient,
            None if tx.vout.is_empty() => UNKNOWN.to_string(),
            None => NON_STANDARD.to_string(),
        };

        let value = tx
            .vout
            .iter()
            .try_fold(Amount::ZERO, |total, output| total.checked_add(output.value))
            .ok_or_else(|| eyre::eyre!("Output value overflow in transaction {}", tx.txid))?;

        Ok(Transaction {
            chain: Chain::Bitcoin,
            hash: tx.txid.clone(),
            block_hash: block.hash.clone(),
            height: block.height,
            sender,
            recipient,
            value: format_btc(value),
            status: TxStatus::Success,
            timestamp: block.timestamp,
        })
    }
}

#[async_trait::async_trait]
impl<R: BtcRpc> ChainAdapter for BtcAdapter<R> {
    fn chain(&self) -> Chain {
        Chain::Bitcoin
    }

    async fn get_tip(&self) -> eyre::Result<BlockHeight> {
        let count = self
            .rpc
            .get_block_count()
            .await
            .wrap_err("getblockcount failed")?;
        Ok(BlockHeight(count))
    }

    async fn fetch_block(&self, height: BlockHeight) -> eyre::Result<ChainBlock> {
        let hash = self
            .rpc
            .get_block_hash(height.0)
            .await
            .wrap_err_with(|| format!("getblockhash {} failed", height))?;
        let raw = self
            .rpc
            .get_block(&hash)
            .await
            .wrap_err_with(|| format!("getblock {} failed", hash))?;

        eyre::ensure!(
            raw.height == height.0,
            "Node returned block {} for height {}",
            raw.height,
            height
        );

        let block = Block {
            chain: Chain::Bitcoin,
            height,
            hash: raw.hash.clone(),
            parent_hash: raw.previous_block_hash.clone().unwrap_or_default(),
            timestamp: BlockTimestamp(raw.time),
            tx_count: u32::try_from(raw.tx.len())?,
        };

        let mut transactions = Vec::with_capacity(raw.tx.len());
        for tx in &raw.tx {
            transactions.push(self.normalize_transaction(tx, &block).await?);
        }

        let unresolved = transactions.iter().filter(|t| t.sender == UNKNOWN).count();
        if unresolved > 0 {
            tracing::warn!(
                "[{}] Block {}: sender of {} transactions could not be resolved, is txindex enabled?",
                Chain::Bitcoin,
                height,
                unresolved
            );
        }

        Ok(ChainBlock {
            block,
            transactions,
        })
    }
}

/// Renders the smallest address followed by a count of the remaining ones.
fn summarize(addresses: &BTreeSet<String>) -> Option<String> {
    let first = addresses.first()?;
    match addresses.len() - 1 {
        0 => Some(first.clone()),
        others => Some(format!("{},+{} others", first, others)),
    }
}

/// Fixed 8-decimal rendering, computed in satoshis so no float rounding is involved.
pub fn format_btc(amount: Amount) -> String {
    let sats = amount.to_sat();
    format!("{}.{:08}", sats / SATS_PER_BTC, sats % SATS_PER_BTC)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::btc::rpc::{BtcRpcError, RpcBlock};
    use serde_json::{Value, json};
    use std::collections::HashMap;
    use std::sync::Mutex;

    #[test]
    fn test_format_btc() {
        assert_eq!(format_btc(Amount::from_sat(150_000_000)), "1.50000000");
        assert_eq!(format_btc(Amount::ZERO), "0.00000000");
        assert_eq!(format_btc(Amount::from_sat(1)), "0.00000001");
        assert_eq!(format_btc(Amount::from_sat(2_100_000_000_000_000)), "21000000.00000000");
    }

    #[test]
    fn test_summarize() {
        let empty = BTreeSet::new();
        assert_eq!(summarize(&empty), None);

        let one = BTreeSet::from(["A".to_string()]);
        assert_eq!(summarize(&one).as_deref(), Some("A"));

        let three = BTreeSet::from(["C".to_string(), "A".to_string(), "B".to_string()]);
        assert_eq!(summarize(&three).as_deref(), Some("A,+2 others"));
    }

    #[tokio::test]
    async fn test_coinbase_needs_no_lookups() -> eyre::Result<()> {
        let rpc = MockBtcRpc::new(vec![block_json(
            840_000,
            vec![json!({
                "txid": "cb",
                "vin": [{ "coinbase": "03405a0d", "sequence": 4294967295u64 }],
                "vout": [
                    { "value": 3.125, "scriptPubKey": { "address": "bc1qminer" } },
                    { "value": 0.0, "scriptPubKey": { "type": "nulldata" } }
                ]
            })],
        )]);
        let adapter = BtcAdapter::new(rpc, 4);

        let fetched = adapter.fetch_block(BlockHeight(840_000)).await?;

        assert_eq!(fetched.block.height, BlockHeight(840_000));
        assert_eq!(fetched.block.hash, "hash-840000");
        assert_eq!(fetched.block.parent_hash, "hash-839999");
        assert_eq!(fetched.block.tx_count, 1);

        let coinbase = &fetched.transactions[0];
        assert_eq!(coinbase.sender, COINBASE);
        assert_eq!(coinbase.recipient, "bc1qminer");
        assert_eq!(coinbase.value, "3.12500000");
        assert_eq!(coinbase.block_hash, "hash-840000");
        assert_eq!(coinbase.height, BlockHeight(840_000));
        assert!(adapter.rpc.lookups().is_empty());

        Ok(())
    }

    #[tokio::test]
    async fn test_unresolvable_input_is_unknown() -> eyre::Result<()> {
        let rpc = MockBtcRpc::new(vec![block_json(
            100,
            vec![
                coinbase_json(),
                json!({
                    "txid": "spend",
                    "vin": [{ "txid": "prev", "vout": 0 }],
                    "vout": [{ "value": 1.5, "scriptPubKey": { "address": "A" } }]
                }),
            ],
        )])
        .with_prev_tx(json!({
            "txid": "prev",
            "vout": [{ "value": 2.0, "scriptPubKey": { "type": "nonstandard" } }]
        }));
        let adapter = BtcAdapter::new(rpc, 4);

        let fetched = adapter.fetch_block(BlockHeight(100)).await?;
        let spend = &fetched.transactions[1];

        assert_eq!(spend.sender, UNKNOWN);
        assert_eq!(spend.recipient, "A");
        assert_eq!(spend.value, "1.50000000");

        Ok(())
    }

    #[tokio::test]
    async fn test_recipient_summary_and_value() -> eyre::Result<()> {
        let rpc = MockBtcRpc::new(vec![block_json(
            101,
            vec![
                coinbase_json(),
                json!({
                    "txid": "pay",
                    "vin": [{ "txid": "prev", "vout": 1 }],
                    "vout": [
                        { "value": 1.0, "scriptPubKey": { "address": "A" } },
                        { "value": 0.5, "scriptPubKey": { "address": "B" } }
                    ]
                }),
            ],
        )])
        .with_prev_tx(json!({
            "txid": "prev",
            "vout": [
                { "value": 0.1, "scriptPubKey": { "address": "ignored" } },
                { "value": 1.6, "scriptPubKey": { "address": "S" } }
            ]
        }));
        let adapter = BtcAdapter::new(rpc, 4);

        let fetched = adapter.fetch_block(BlockHeight(101)).await?;
        let pay = &fetched.transactions[1];

        assert_eq!(pay.sender, "S");
        assert_eq!(pay.recipient, "A,+1 others");
        assert_eq!(pay.value, "1.50000000");

        Ok(())
    }

    #[tokio::test]
    async fn test_failed_lookups_are_tolerated() -> eyre::Result<()> {
        let rpc = MockBtcRpc::new(vec![block_json(
            102,
            vec![
                coinbase_json(),
                json!({
                    "txid": "consolidate",
                    "vin": [
                        { "txid": "prev-y", "vout": 0 },
                        { "txid": "pruned", "vout": 3 },
                        { "txid": "prev-x", "vout": 0 },
                        { "txid": "prev-x", "vout": 1 }
                    ],
                    "vout": [{ "value": 0.3, "scriptPubKey": { "address": "Z" } }]
                }),
            ],
        )])
        .with_prev_tx(json!({
            "txid": "prev-x",
            "vout": [
                { "value": 0.1, "scriptPubKey": { "address": "X" } },
                { "value": 0.1, "scriptPubKey": { "address": "X" } }
            ]
        }))
        .with_prev_tx(json!({
            "txid": "prev-y",
            "vout": [{ "value": 0.1, "scriptPubKey": { "addresses": ["Y"] } }]
        }));
        let adapter = BtcAdapter::new(rpc, 2);

        let fetched = adapter.fetch_block(BlockHeight(102)).await?;

        assert_eq!(fetched.transactions[1].sender, "X,+1 others");

        // every distinct previous transaction is looked up exactly once
        let mut lookups = adapter.rpc.lookups();
        lookups.sort();
        assert_eq!(lookups, vec!["prev-x", "prev-y", "pruned"]);

        Ok(())
    }

    #[tokio::test]
    async fn test_outputs_without_addresses() -> eyre::Result<()> {
        let rpc = MockBtcRpc::new(vec![block_json(
            103,
            vec![
                coinbase_json(),
                json!({
                    "txid": "opreturn",
                    "vin": [{ "txid": "missing", "vout": 0 }],
                    "vout": [{ "value": 0.0, "scriptPubKey": { "type": "nulldata" } }]
                }),
                json!({ "txid": "empty", "vin": [{ "txid": "missing", "vout": 1 }], "vout": [] }),
            ],
        )]);
        let adapter = BtcAdapter::new(rpc, 1);

        let fetched = adapter.fetch_block(BlockHeight(103)).await?;

        assert_eq!(fetched.transactions[1].recipient, NON_STANDARD);
        assert_eq!(fetched.transactions[1].value, "0.00000000");
        assert_eq!(fetched.transactions[2].recipient, UNKNOWN);
        assert_eq!(fetched.transactions[2].sender, UNKNOWN);

        Ok(())
    }

    #[tokio::test]
    async fn test_tip_and_missing_block() -> eyre::Result<()> {
        let adapter = BtcAdapter::new(MockBtcRpc::new(vec![]), 1);

        assert_eq!(adapter.get_tip().await?, BlockHeight(0));
        assert!(adapter.fetch_block(BlockHeight(5)).await.is_err());

        Ok(())
    }

    #[tokio::test]
    async fn test_coinbase_with_null_prevout_txid() -> eyre::Result<()> {
        let rpc = MockBtcRpc::new(vec![block_json(
            103,
            vec![json!({
                "txid": "cb",
                "vin": [{
                    "coinbase": "03675a0d",
                    "txid": "0000000000000000000000000000000000000000000000000000000000000000",
                    "vout": 4294967295u32
                }],
                "vout": [{ "value": 3.125, "scriptPubKey": { "address": "bc1qminer" } }]
            })],
        )]);
        let adapter = BtcAdapter::new(rpc, 4);

        let fetched = adapter.fetch_block(BlockHeight(103)).await?;

        assert_eq!(fetched.transactions[0].sender, COINBASE);
        assert!(adapter.rpc.lookups().is_empty());

        Ok(())
    }

    #[tokio::test]
    async fn test_fetch_block_on_spawned_task() -> eyre::Result<()> {
        let rpc = MockBtcRpc::new(vec![block_json(
            104,
            vec![
                coinbase_json(),
                json!({
                    "txid": "spend",
                    "vin": [{ "txid": "prev-x", "vout": 0 }, { "txid": "prev-x", "vout": 0 }],
                    "vout": [{ "value": 0.05, "scriptPubKey": { "address": "W" } }]
                }),
            ],
        )])
        .with_prev_tx(json!({
            "txid": "prev-x",
            "vout": [{ "value": 0.1, "scriptPubKey": { "address": "X" } }]
        }));
        let adapter: std::sync::Arc<dyn ChainAdapter> =
            std::sync::Arc::new(BtcAdapter::new(rpc, 4));

        let fetched =
            tokio::spawn(async move { adapter.fetch_block(BlockHeight(104)).await }).await??;

        assert_eq!(fetched.transactions.len(), 2);
        assert_eq!(fetched.transactions[1].sender, "X");
        assert_eq!(fetched.transactions[1].value, "0.05000000");

        Ok(())
    }

    fn coinbase_json() -> Value {
        json!({
            "txid": "coinbase",
            "vin": [{ "coinbase": "00", "sequence": 0 }],
            "vout": [{ "value": 6.25, "scriptPubKey": { "address": "miner" } }]
        })
    }

    fn block_json(height: u64, txs: Vec<Value>) -> Value {
        json!({
            "hash": format!("hash-{height}"),
            "height": height,
            "time": 1_700_000_000u64 + height,
            "previousblockhash": format!("hash-{}", height - 1),
            "tx": txs,
        })
    }

    pub struct MockBtcRpc {
        blocks: HashMap<u64, RpcBlock>,
        prev_txs: HashMap<String, RpcTransaction>,
        lookups: Mutex<Vec<String>>,
    }

    impl MockBtcRpc {
        pub fn new(blocks: Vec<Value>) -> Self {
            let blocks = blocks
                .into_iter()
                .map(|b| serde_json::from_value::<RpcBlock>(b).unwrap())
                .map(|b| (b.height, b))
                .collect();
            Self {
                blocks,
                prev_txs: HashMap::new(),
                lookups: Mutex::new(vec![]),
            }
        }

        pub fn with_prev_tx(mut self, tx: Value) -> Self {
            let tx: RpcTransaction = serde_json::from_value(tx).unwrap();
            self.prev_txs.insert(tx.txid.clone(), tx);
            self
        }

        pub fn lookups(&self) -> Vec<String> {
            self.lookups.lock().unwrap().clone()
        }

        fn not_found() -> BtcRpcError {
            BtcRpcError::Rpc {
                code: -5,
                message: "No such mempool or blockchain transaction".to_string(),
            }
        }
    }

    #[async_trait::async_trait]
    impl BtcRpc for MockBtcRpc {
        async fn get_block_count(&self) -> Result<u64, BtcRpcError> {
            Ok(self.blocks.keys().copied().max().unwrap_or_default())
        }

        async fn get_block_hash(&self, height: u64) -> Result<String, BtcRpcError> {
            self.blocks
                .get(&height)
                .map(|b| b.hash.clone())
                .ok_or_else(|| BtcRpcError::Rpc {
                    code: -8,
                    message: "Block height out of range".to_string(),
                })
        }

        async fn get_block(&self, hash: &str) -> Result<RpcBlock, BtcRpcError> {
            self.blocks
                .values()
                .find(|b| b.hash == hash)
                .cloned()
                .ok_or_else(Self::not_found)
        }

        async fn get_raw_transaction(&self, txid: &str) -> Result<RpcTransaction, BtcRpcError> {
            self.lookups.lock().unwrap().push(txid.to_string());
            self.prev_txs.get(txid).cloned().ok_or_else(Self::not_found)
        }
    }
}
