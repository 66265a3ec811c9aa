use sqlx::encode::IsNull;
use sqlx::error::BoxDynError;
use sqlx::sqlite::{SqliteArgumentValue, SqliteTypeInfo, SqliteValueRef};
use sqlx::{Decode, Encode, Sqlite, Type};
use std::borrow::Cow;
use std::fmt;
use std::ops::Add;
use std::str::FromStr;

/// Domain (model) objects shared by the adapters, the workers and the store.

/// The two indexed networks. Closed on purpose: every adapter and every store row is tagged with
/// exactly one of them.
#[derive(Debug, Copy, Clone, Hash, Ord, PartialOrd, Eq, PartialEq)]
pub enum Chain {
    Bitcoin,
    Ethereum,
}

impl Chain {
    /// Lookup order used by cross-chain search.
    pub const ALL: [Chain; 2] = [Chain::Bitcoin, Chain::Ethereum];

    pub fn as_str(&self) -> &'static str {
        match self {
            Chain::Bitcoin => "bitcoin",
            Chain::Ethereum => "ethereum",
        }
    }
}

impl fmt::Display for Chain {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for Chain {
    type Err = eyre::Error;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_lowercase().as_str() {
            "bitcoin" | "btc" => Ok(Chain::Bitcoin),
            "ethereum" | "eth" => Ok(Chain::Ethereum),
            _ => Err(eyre::eyre!("Invalid chain value: {}", s)),
        }
    }
}

/// Chain-relative block sequence number.
#[derive(Debug, Copy, Clone, Hash, Ord, PartialOrd, Eq, PartialEq, Default)]
pub struct BlockHeight(pub u64);

/// Unix timestamp in seconds.
#[derive(Debug, Copy, Clone, Ord, PartialOrd, Eq, PartialEq, Default)]
pub struct BlockTimestamp(pub u64);

#[derive(Debug, Copy, Clone, Eq, PartialEq)]
pub enum TxStatus {
    /// Blocks are only indexed once mined, and receipts are not fetched.
    Success,
}

impl TxStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            TxStatus::Success => "success",
        }
    }
}

impl FromStr for TxStatus {
    type Err = eyre::Error;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "success" => Ok(TxStatus::Success),
            _ => Err(eyre::eyre!("Invalid transaction status: {}", s)),
        }
    }
}

#[derive(Debug, Clone, sqlx::FromRow, Eq, PartialEq)]
pub struct Block {
    pub chain: Chain,
    pub height: BlockHeight,
    pub hash: String,
    /// Empty for a genesis block.
    pub parent_hash: String,
    pub timestamp: BlockTimestamp,
    pub tx_count: u32,
}

#[derive(Debug, Clone, sqlx::FromRow, Eq, PartialEq)]
pub struct Transaction {
    pub chain: Chain,
    pub hash: String,
    pub block_hash: String,
    /// Denormalized from the containing block for range queries.
    pub height: BlockHeight,
    pub sender: String,
    pub recipient: String,
    /// Smallest-unit precision rendered losslessly as text.
    pub value: String,
    pub status: TxStatus,
    pub timestamp: BlockTimestamp,
}

#[derive(Debug, Clone, sqlx::FromRow, Eq, PartialEq)]
pub struct IndexerState {
    pub chain: Chain,
    pub last_indexed_height: BlockHeight,
    pub updated_at: BlockTimestamp,
}

/// A normalized block together with its transactions, as produced by a chain adapter.
#[derive(Debug, Clone, Eq, PartialEq)]
pub struct ChainBlock {
    pub block: Block,
    pub transactions: Vec<Transaction>,
}

impl BlockHeight {
    pub fn saturating_sub(self, rhs: u64) -> BlockHeight {
        BlockHeight(self.0.saturating_sub(rhs))
    }

    pub fn next(self) -> BlockHeight {
        self + 1
    }
}

impl Add<u64> for BlockHeight {
    type Output = BlockHeight;

    fn add(self, rhs: u64) -> Self::Output {
        BlockHeight(self.0 + rhs)
    }
}

impl fmt::Display for BlockHeight {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

// NOTE: sqlite has no unsigned 64-bit integer, heights and timestamps are stored as i64. Real
// values never come close to i64::MAX.
impl Type<Sqlite> for Chain {
    fn type_info() -> SqliteTypeInfo {
        <str as Type<Sqlite>>::type_info()
    }
}
impl Type<Sqlite> for TxStatus {
    fn type_info() -> SqliteTypeInfo {
        <str as Type<Sqlite>>::type_info()
    }
}
impl Type<Sqlite> for BlockHeight {
    fn type_info() -> SqliteTypeInfo {
        <i64 as Type<Sqlite>>::type_info()
    }
}
impl Type<Sqlite> for BlockTimestamp {
    fn type_info() -> SqliteTypeInfo {
        <i64 as Type<Sqlite>>::type_info()
    }
}

impl<'r> Decode<'r, Sqlite> for Chain {
    fn decode(v: SqliteValueRef<'r>) -> Result<Self, BoxDynError> {
        let s: &str = <&str as Decode<Sqlite>>::decode(v)?;
        Chain::from_str(s).map_err(|e| e.to_string().into())
    }
}
impl<'r> Decode<'r, Sqlite> for TxStatus {
    fn decode(v: SqliteValueRef<'r>) -> Result<Self, BoxDynError> {
        let s: &str = <&str as Decode<Sqlite>>::decode(v)?;
        TxStatus::from_str(s).map_err(|e| e.to_string().into())
    }
}
impl<'r> Decode<'r, Sqlite> for BlockHeight {
    fn decode(v: SqliteValueRef<'r>) -> Result<Self, BoxDynError> {
        let i: i64 = <i64 as Decode<Sqlite>>::decode(v)?;
        if i < 0 {
            return Err("height must be >= 0".into());
        }
        Ok(BlockHeight(i as u64))
    }
}
impl<'r> Decode<'r, Sqlite> for BlockTimestamp {
    fn decode(v: SqliteValueRef<'r>) -> Result<Self, BoxDynError> {
        let i: i64 = <i64 as Decode<Sqlite>>::decode(v)?;
        if i < 0 {
            return Err("timestamp must be >= 0".into());
        }
        Ok(BlockTimestamp(i as u64))
    }
}

// TEXT encodings
impl<'q> Encode<'q, Sqlite> for Chain {
    fn encode_by_ref(
        &self,
        args: &mut Vec<SqliteArgumentValue<'q>>,
    ) -> Result<IsNull, BoxDynError> {
        args.push(SqliteArgumentValue::Text(Cow::Borrowed(self.as_str())));
        Ok(IsNull::No)
    }
}

impl<'q> Encode<'q, Sqlite> for TxStatus {
    fn encode_by_ref(
        &self,
        args: &mut Vec<SqliteArgumentValue<'q>>,
    ) -> Result<IsNull, BoxDynError> {
        args.push(SqliteArgumentValue::Text(Cow::Borrowed(self.as_str())));
        Ok(IsNull::No)
    }
}

// INTEGER encodings
impl<'q> Encode<'q, Sqlite> for BlockHeight {
    fn encode_by_ref(
        &self,
        args: &mut Vec<SqliteArgumentValue<'q>>,
    ) -> Result<IsNull, BoxDynError> {
        let v = i64::try_from(self.0)?;
        args.push(SqliteArgumentValue::Int64(v));
        Ok(IsNull::No)
    }
}

impl<'q> Encode<'q, Sqlite> for BlockTimestamp {
    fn encode_by_ref(
        &self,
        args: &mut Vec<SqliteArgumentValue<'q>>,
    ) -> Result<IsNull, BoxDynError> {
        let v = i64::try_from(self.0)?;
        args.push(SqliteArgumentValue::Int64(v));
        Ok(IsNull::No)
    }
}
