use std::fmt;
use std::str::FromStr;

use ethers_core::types::U256;
use serde::{Deserialize, Serialize, Serializer};

use crate::numeric;

/// Static identity of a supported network.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct NetworkIdentity {
    #[serde(serialize_with = "int_as_string")]
    pub id: u64,
    pub display_name: &'static str,
    pub native_currency_symbol: &'static str,
    pub decimals: u8,
    pub is_testnet: bool,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum RecordKind {
    Transaction,
    Block,
}

impl RecordKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Transaction => "transaction",
            Self::Block => "block",
        }
    }
}

impl fmt::Display for RecordKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Block selector accepted by the data access layer.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BlockTag {
    Number(u64),
    Latest,
}

impl FromStr for BlockTag {
    type Err = String;

    fn from_str(raw: &str) -> Result<Self, Self::Err> {
        let trimmed = raw.trim();
        if trimmed.eq_ignore_ascii_case("latest") {
            return Ok(Self::Latest);
        }
        trimmed
            .parse::<u64>()
            .map(Self::Number)
            .map_err(|_| format!("invalid block identifier {:?}", raw))
    }
}

impl fmt::Display for BlockTag {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Number(n) => write!(f, "{}", n),
            Self::Latest => f.write_str("latest"),
        }
    }
}

/// Inbound analysis request.
#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct AnalysisRequest {
    pub kind: RecordKind,
    pub identifier: String,
    pub network_id: u64,
}

impl AnalysisRequest {
    pub fn cache_key(&self) -> String {
        format!(
            "{}_{}_{}",
            self.kind,
            self.network_id,
            self.identifier.trim().to_lowercase()
        )
    }
}

/// A fetched record of either kind.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(tag = "kind", rename_all = "lowercase")]
pub enum Record {
    Transaction(TransactionRecord),
    Block(BlockRecord),
}

impl Record {
    pub fn kind(&self) -> RecordKind {
        match self {
            Self::Transaction(_) => RecordKind::Transaction,
            Self::Block(_) => RecordKind::Block,
        }
    }

    /// Chain timestamp of the record, used to judge how settled it is.
    pub fn timestamp(&self) -> i64 {
        match self {
            Self::Transaction(tx) => tx.block_timestamp,
            Self::Block(block) => block.timestamp,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct TransactionRecord {
    pub hash: String,
    #[serde(serialize_with = "int_as_string")]
    pub block_number: i64,
    #[serde(serialize_with = "int_as_string")]
    pub block_timestamp: i64,
    #[serde(serialize_with = "int_as_string")]
    pub index: i64,
    pub from: String,
    pub to: Option<String>,
    pub value: String,
    pub gas_limit: String,
    pub gas_price: String,
    pub gas_used: String,
    pub effective_gas_price: String,
    pub status: Option<i64>,
    pub input_data: String,
    #[serde(serialize_with = "int_as_string")]
    pub nonce: i64,
    #[serde(rename = "type")]
    pub tx_type: i64,
    pub metrics: TransactionMetrics,
    pub context: TransactionContext,
}

impl TransactionRecord {
    pub fn value_wei(&self) -> U256 {
        numeric::parse_u256_or_zero(&self.value)
    }

    pub fn gas_used_u256(&self) -> U256 {
        numeric::parse_u256_or_zero(&self.gas_used)
    }

    pub fn gas_limit_u256(&self) -> U256 {
        numeric::parse_u256_or_zero(&self.gas_limit)
    }

    /// Effective gas price, falling back to the legacy gas price when the
    /// receipt carried none.
    pub fn price_wei(&self) -> U256 {
        numeric::parse_u256(&self.effective_gas_price)
            .filter(|p| !p.is_zero())
            .unwrap_or_else(|| numeric::parse_u256_or_zero(&self.gas_price))
    }

    /// First four bytes of calldata as a lowercase `0x`-prefixed selector.
    pub fn selector(&self) -> Option<String> {
        let data = self.input_data.strip_prefix("0x").unwrap_or(&self.input_data);
        if data.len() < 8 {
            return None;
        }
        let selector = data.get(..8)?;
        if !selector.chars().all(|c| c.is_ascii_hexdigit()) {
            return None;
        }
        Some(format!("0x{}", selector.to_lowercase()))
    }

    pub fn has_input(&self) -> bool {
        let data = self.input_data.strip_prefix("0x").unwrap_or(&self.input_data);
        !data.is_empty()
    }

    pub fn succeeded(&self) -> bool {
        self.status != Some(0)
    }
}

/// Metrics derived while normalizing a transaction row.
#[derive(Debug, Clone, Default, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct TransactionMetrics {
    pub gas_efficiency_pct: f64,
    pub total_cost_wei: String,
    pub is_contract_interaction: bool,
    pub block_utilization_pct: Option<f64>,
}

/// Best-effort context gathered around a transaction. Every field may be
/// empty when the corresponding secondary fetch failed.
#[derive(Debug, Clone, Default, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct TransactionContext {
    pub block: Option<BlockSummary>,
    pub token_transfers: Vec<TokenTransfer>,
    pub logs: Vec<EventLog>,
    pub contract: Option<ContractInfo>,
    pub siblings: Vec<SiblingTx>,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct BlockSummary {
    #[serde(serialize_with = "int_as_string")]
    pub number: i64,
    #[serde(serialize_with = "int_as_string")]
    pub timestamp: i64,
    pub gas_used: String,
    pub gas_limit: String,
    pub base_fee_per_gas: Option<String>,
    #[serde(serialize_with = "int_as_string")]
    pub transaction_count: i64,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct TokenTransfer {
    #[serde(serialize_with = "int_as_string")]
    pub log_index: i64,
    pub token_address: String,
    pub token_symbol: Option<String>,
    pub from: String,
    pub to: String,
    pub value: String,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct EventLog {
    #[serde(serialize_with = "int_as_string")]
    pub log_index: i64,
    pub address: String,
    pub event_name: Option<String>,
    pub topic0: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ContractInfo {
    pub address: String,
    pub name: Option<String>,
    pub verified: bool,
}

/// Neighbouring transaction in the same block, used for ordering heuristics.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct SiblingTx {
    pub hash: String,
    #[serde(serialize_with = "int_as_string")]
    pub index: i64,
    pub from: String,
    pub to: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct BlockRecord {
    #[serde(serialize_with = "int_as_string")]
    pub number: i64,
    pub hash: String,
    pub parent_hash: String,
    #[serde(serialize_with = "int_as_string")]
    pub timestamp: i64,
    pub gas_used: String,
    pub gas_limit: String,
    pub base_fee_per_gas: Option<String>,
    pub miner: String,
    #[serde(serialize_with = "int_as_string")]
    pub size: i64,
    #[serde(serialize_with = "int_as_string")]
    pub transaction_count: i64,
    pub sample_transactions: Vec<TransactionRecord>,
    pub metrics: BlockMetrics,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct BlockMetrics {
    pub utilization_pct: f64,
    pub parent_timestamp: Option<i64>,
}

fn int_as_string<T, S>(value: &T, serializer: S) -> Result<S::Ok, S::Error>
where
    T: fmt::Display,
    S: Serializer,
{
    serializer.collect_str(value)
}
