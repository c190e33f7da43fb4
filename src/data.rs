//! Data access layer: bounded queries that turn store rows into typed records.
//!
//! The primary fetch of a request is mandatory and surfaces its errors.
//! Everything fetched around it is best-effort: a failed or slow secondary
//! query is logged and the record is returned with that context left empty.

use std::future::Future;
use std::time::Duration;

use ethers_core::types::U256;
use futures_util::future::join5;
use tracing::{debug, warn};

use crate::classifier::is_valid_hash;
use crate::error::{PipelineError, PipelineResult};
use crate::models::{
    BlockMetrics, BlockRecord, BlockSummary, BlockTag, TransactionContext, TransactionMetrics,
    TransactionRecord,
};
use crate::numeric::{self, parse_u256_or_zero};
use crate::registry::ConnectionHandle;
use crate::storage::{self, BlockRow, TxRow};

pub const BLOCK_SAMPLE_SIZE: i64 = 25;
pub const SIBLING_RADIUS: i64 = 3;

#[derive(Debug, Clone, Copy)]
pub struct QueryTimeouts {
    pub primary: Duration,
    pub context: Duration,
}

impl Default for QueryTimeouts {
    fn default() -> Self {
        Self {
            primary: Duration::from_millis(3000),
            context: Duration::from_millis(2000),
        }
    }
}

pub struct DataAccess<'a> {
    handle: &'a ConnectionHandle,
    timeouts: QueryTimeouts,
}

impl<'a> DataAccess<'a> {
    pub fn new(handle: &'a ConnectionHandle, timeouts: QueryTimeouts) -> Self {
        Self { handle, timeouts }
    }

    pub async fn get_transaction(&self, hash: &str) -> PipelineResult<Option<TransactionRecord>> {
        if !is_valid_hash(hash) {
            return Err(PipelineError::InvalidHash(hash.to_string()));
        }

        // Stored hashes are lowercase; matching exactly keeps the lookup on the key.
        let hash = hash.to_lowercase();
        let pool = &self.handle.query;
        let Some(row) = self
            .primary("transaction query", storage::fetch_transaction(pool, &hash))
            .await?
        else {
            return Ok(None);
        };

        let context = self.transaction_context(&row).await;
        Ok(Some(build_transaction(row, context)))
    }

    pub async fn get_block(&self, tag: BlockTag) -> PipelineResult<Option<BlockRecord>> {
        let pool = &self.handle.query;
        let number = match tag {
            BlockTag::Number(n) => i64::try_from(n)
                .map_err(|_| PipelineError::InvalidIdentifier(format!("block {} out of range", n)))?,
            BlockTag::Latest => {
                match self
                    .primary("latest block query", storage::fetch_latest_block_number(pool))
                    .await?
                {
                    Some(n) => n,
                    None => return Ok(None),
                }
            }
        };

        let Some(row) = self
            .primary("block query", storage::fetch_block(pool, number))
            .await?
        else {
            return Ok(None);
        };

        let samples = self
            .secondary(
                "block sample query",
                storage::fetch_block_transactions(pool, number, BLOCK_SAMPLE_SIZE),
            )
            .await
            .unwrap_or_default();
        let parent_timestamp = if number > 0 {
            self.secondary("parent block query", storage::fetch_block(pool, number - 1))
                .await
                .flatten()
                .map(|parent| parent.timestamp)
        } else {
            None
        };

        Ok(Some(build_block(row, samples, parent_timestamp)))
    }

    /// Chain head reported by the network's data client, if one is configured
    /// and answers in time.
    pub async fn chain_head(&self) -> Option<u64> {
        let data = self.handle.data.as_ref()?;
        match tokio::time::timeout(self.timeouts.context, data.chain_head()).await {
            Ok(Ok(head)) => Some(head),
            Ok(Err(err)) => {
                warn!(network = self.handle.network.id, error = %err, "chain head lookup failed");
                None
            }
            Err(_) => {
                warn!(network = self.handle.network.id, "chain head lookup timed out");
                None
            }
        }
    }

    async fn transaction_context(&self, row: &TxRow) -> TransactionContext {
        let pool = &self.handle.query;
        let contract = async {
            match row.to_addr.as_deref() {
                Some(to) => self
                    .secondary("contract query", storage::fetch_contract(pool, to))
                    .await
                    .flatten(),
                None => None,
            }
        };

        let (block, transfers, logs, contract, siblings) = join5(
            self.secondary("origin block query", storage::fetch_block(pool, row.block_number)),
            self.secondary(
                "token transfer query",
                storage::fetch_token_transfers(pool, &row.hash),
            ),
            self.secondary("event log query", storage::fetch_event_logs(pool, &row.hash)),
            contract,
            self.secondary(
                "sibling query",
                storage::fetch_siblings(pool, row.block_number, row.tx_index, SIBLING_RADIUS),
            ),
        )
        .await;

        TransactionContext {
            block: block.flatten().map(|b| block_summary(&b)),
            token_transfers: transfers.unwrap_or_default(),
            logs: logs.unwrap_or_default(),
            contract,
            siblings: siblings.unwrap_or_default(),
        }
    }

    async fn primary<T, F>(&self, operation: &'static str, fut: F) -> PipelineResult<T>
    where
        F: Future<Output = sqlx::Result<T>>,
    {
        match tokio::time::timeout(self.timeouts.primary, fut).await {
            Ok(result) => result.map_err(PipelineError::from),
            Err(_) => Err(PipelineError::Timeout {
                operation,
                ms: self.timeouts.primary.as_millis() as u64,
            }),
        }
    }

    async fn secondary<T, F>(&self, operation: &'static str, fut: F) -> Option<T>
    where
        F: Future<Output = sqlx::Result<T>>,
    {
        match tokio::time::timeout(self.timeouts.context, fut).await {
            Ok(Ok(value)) => Some(value),
            Ok(Err(err)) => {
                warn!(operation, error = %err, "secondary fetch failed; continuing without it");
                None
            }
            Err(_) => {
                warn!(operation, "secondary fetch timed out; continuing without it");
                None
            }
        }
    }
}

pub fn block_summary(row: &BlockRow) -> BlockSummary {
    BlockSummary {
        number: row.number,
        timestamp: row.timestamp,
        gas_used: row.gas_used.clone(),
        gas_limit: row.gas_limit.clone(),
        base_fee_per_gas: row.base_fee_per_gas.clone(),
        transaction_count: row.transaction_count,
    }
}

pub fn build_transaction(row: TxRow, context: TransactionContext) -> TransactionRecord {
    let gas_used = parse_u256_or_zero(&row.gas_used);
    let gas_limit = parse_u256_or_zero(&row.gas_limit);
    let price = numeric::parse_u256(&row.effective_gas_price)
        .filter(|p| !p.is_zero())
        .unwrap_or_else(|| parse_u256_or_zero(&row.gas_price));
    let has_input = {
        let data = row.input_data.strip_prefix("0x").unwrap_or(&row.input_data);
        !data.is_empty()
    };

    let metrics = TransactionMetrics {
        gas_efficiency_pct: numeric::ratio_pct(gas_used, gas_limit),
        total_cost_wei: gas_used.saturating_mul(price).to_string(),
        is_contract_interaction: has_input || context.contract.is_some(),
        block_utilization_pct: context.block.as_ref().map(|b| {
            numeric::ratio_pct(parse_u256_or_zero(&b.gas_used), parse_u256_or_zero(&b.gas_limit))
        }),
    };

    TransactionRecord {
        hash: row.hash,
        block_number: row.block_number,
        block_timestamp: row.block_timestamp,
        index: row.tx_index,
        from: row.from_addr.to_lowercase(),
        to: row.to_addr.map(|a| a.to_lowercase()),
        value: row.value,
        gas_limit: row.gas_limit,
        gas_price: row.gas_price,
        gas_used: row.gas_used,
        effective_gas_price: row.effective_gas_price,
        status: row.status,
        input_data: row.input_data,
        nonce: row.nonce,
        tx_type: row.tx_type,
        metrics,
        context,
    }
}

pub fn build_block(row: BlockRow, samples: Vec<TxRow>, parent_timestamp: Option<i64>) -> BlockRecord {
    let summary = block_summary(&row);
    let utilization_pct = numeric::ratio_pct(
        parse_u256_or_zero(&row.gas_used),
        parse_u256_or_zero(&row.gas_limit),
    );
    debug!(block = row.number, sampled = samples.len(), "normalizing block");

    let sample_transactions = samples
        .into_iter()
        .map(|tx| {
            build_transaction(
                tx,
                TransactionContext {
                    block: Some(summary.clone()),
                    ..Default::default()
                },
            )
        })
        .collect();

    BlockRecord {
        number: row.number,
        hash: row.hash,
        parent_hash: row.parent_hash,
        timestamp: row.timestamp,
        gas_used: row.gas_used,
        gas_limit: row.gas_limit,
        base_fee_per_gas: row.base_fee_per_gas,
        miner: row.miner.to_lowercase(),
        size: row.size,
        transaction_count: row.transaction_count,
        sample_transactions,
        metrics: BlockMetrics {
            utilization_pct,
            parent_timestamp,
        },
    }
}

/// Total fee paid in base units, recomputed from a record.
pub fn total_cost(record: &TransactionRecord) -> U256 {
    record.gas_used_u256().saturating_mul(record.price_wei())
}

#[cfg(test)]
mod tests {
    use super::*;

    fn tx_row() -> TxRow {
        TxRow {
            hash: "0xAB".to_string(),
            block_number: 10,
            block_timestamp: 1_700_000_000,
            tx_index: 2,
            from_addr: "0xAAA".to_string(),
            to_addr: Some("0xBBB".to_string()),
            value: "1000000000000000000".to_string(),
            gas_limit: "42000".to_string(),
            gas_price: "30000000000".to_string(),
            gas_used: "21000".to_string(),
            effective_gas_price: "".to_string(),
            status: Some(1),
            input_data: "0x".to_string(),
            nonce: 3,
            tx_type: 2,
        }
    }

    #[test]
    fn build_transaction_derives_metrics() {
        let record = build_transaction(tx_row(), TransactionContext::default());
        assert_eq!(record.metrics.gas_efficiency_pct, 50.0);
        assert_eq!(record.metrics.total_cost_wei, "630000000000000");
        assert!(!record.metrics.is_contract_interaction);
        assert_eq!(record.metrics.block_utilization_pct, None);
        assert_eq!(record.from, "0xaaa");
        assert_eq!(record.to.as_deref(), Some("0xbbb"));
        assert_eq!(total_cost(&record).to_string(), "630000000000000");
    }

    #[test]
    fn calldata_marks_contract_interaction() {
        let mut row = tx_row();
        row.input_data = "0xa9059cbb0000".to_string();
        let record = build_transaction(row, TransactionContext::default());
        assert!(record.metrics.is_contract_interaction);
        assert_eq!(record.selector().as_deref(), Some("0xa9059cbb"));
    }

    #[test]
    fn values_beyond_u64_survive_normalization() {
        let mut row = tx_row();
        row.value = "123456789012345678901234567890".to_string();
        let record = build_transaction(row, TransactionContext::default());
        assert_eq!(record.value, "123456789012345678901234567890");
        assert_eq!(record.value_wei().to_string(), "123456789012345678901234567890");
    }

    #[test]
    fn build_block_computes_utilization() {
        let row = BlockRow {
            number: 10,
            hash: "0xb".to_string(),
            parent_hash: "0xa".to_string(),
            timestamp: 1_700_000_012,
            gas_used: "15000000".to_string(),
            gas_limit: "30000000".to_string(),
            base_fee_per_gas: Some("20000000000".to_string()),
            miner: "0xMINER".to_string(),
            size: 50_000,
            transaction_count: 1,
        };
        let block = build_block(row, vec![tx_row()], Some(1_700_000_000));
        assert_eq!(block.metrics.utilization_pct, 50.0);
        assert_eq!(block.sample_transactions.len(), 1);
        assert_eq!(
            block.sample_transactions[0].metrics.block_utilization_pct,
            Some(50.0)
        );
        assert_eq!(block.miner, "0xminer");
    }
}
