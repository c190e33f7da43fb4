use sqlx::FromRow;

/// Raw `transactions` row. Big numbers stay as the TEXT the store holds.
#[derive(Debug, Clone, FromRow)]
pub struct TxRow {
    pub hash: String,
    pub block_number: i64,
    pub block_timestamp: i64,
    pub tx_index: i64,
    pub from_addr: String,
    pub to_addr: Option<String>,
    pub value: String,
    pub gas_limit: String,
    pub gas_price: String,
    pub gas_used: String,
    pub effective_gas_price: String,
    pub status: Option<i64>,
    pub input_data: String,
    pub nonce: i64,
    pub tx_type: i64,
}

#[derive(Debug, Clone, FromRow)]
pub struct BlockRow {
    pub number: i64,
    pub hash: String,
    pub parent_hash: String,
    pub timestamp: i64,
    pub gas_used: String,
    pub gas_limit: String,
    pub base_fee_per_gas: Option<String>,
    pub miner: String,
    pub size: i64,
    pub transaction_count: i64,
}
