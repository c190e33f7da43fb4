//! Heuristic analysis of transactions and blocks.
//!
//! Every sub-algorithm here is threshold based. Each one either cannot fail or
//! reports a [`HeuristicError`], in which case the engine substitutes that
//! heuristic's neutral default and carries on with the rest.

use std::collections::BTreeMap;

use ethers_core::types::U256;
use serde::Serialize;
use tracing::warn;

use crate::models::{BlockRecord, NetworkIdentity, Record, TransactionRecord};
use crate::numeric;

pub mod classify;
pub mod clustering;
pub mod mev;
pub mod network;
pub mod risk;
pub mod scoring;
pub mod timeline;
pub mod trading;

pub use classify::Classification;
pub use clustering::ClusterAssignment;
pub use mev::{MevIndicator, Severity};
pub use network::{BlockActivity, NetworkHealth};
pub use risk::{ComplexityAssessment, RiskAssessment};
pub use scoring::{ComplexityLevel, RiskLevel, ScoringTable, SCORING_V1};
pub use trading::{LiquidityMetrics, TradingPatterns};

#[derive(Debug, thiserror::Error)]
pub enum HeuristicError {
    #[error("field {field} is not a decimal number: {value:?}")]
    Unparseable { field: &'static str, value: String },
}

/// Strict decimal parse used by heuristics. Blank means absent and reads as
/// zero; anything else that is not a decimal integer is an error.
pub(crate) fn decimal(field: &'static str, raw: &str) -> Result<U256, HeuristicError> {
    if raw.trim().is_empty() {
        return Ok(U256::zero());
    }
    numeric::parse_u256(raw).ok_or_else(|| HeuristicError::Unparseable {
        field,
        value: raw.to_string(),
    })
}

/// Network-level facts the heuristics may consult besides the record itself.
#[derive(Debug, Clone, Copy)]
pub struct AnalysisContext {
    pub network: NetworkIdentity,
    /// Wall-clock unix seconds the analysis is performed at.
    pub now: i64,
    /// Head block reported by the network's data client, if known.
    pub chain_head: Option<u64>,
}

impl AnalysisContext {
    pub fn decimals(&self) -> u32 {
        u32::from(self.network.decimals)
    }

    pub fn age_secs(&self, timestamp: i64) -> Option<i64> {
        (timestamp > 0).then(|| (self.now - timestamp).max(0))
    }
}

#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(tag = "kind", rename_all = "lowercase")]
pub enum AnalysisResult {
    Transaction(TransactionAnalysis),
    Block(BlockAnalysis),
}

#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct TransactionOverview {
    pub hash: String,
    pub network: String,
    pub block_number: String,
    pub from: String,
    pub to: Option<String>,
    pub value_native: String,
    pub currency: String,
    pub status: String,
    pub gas_used: String,
    pub gas_limit: String,
    pub gas_efficiency_pct: f64,
    pub gas_price_gwei: String,
    pub fee_native: String,
    pub age_secs: Option<String>,
    pub contract_name: Option<String>,
    pub contract_verified: Option<bool>,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct TransactionAnalysis {
    pub overview: TransactionOverview,
    pub classification: Classification,
    pub risk: RiskAssessment,
    pub complexity: ComplexityAssessment,
    pub clustering: ClusterAssignment,
    pub mev_indicators: Vec<MevIndicator>,
    pub trading_patterns: TradingPatterns,
    pub liquidity_metrics: LiquidityMetrics,
    pub scoring_version: String,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct BlockOverview {
    pub number: String,
    pub hash: String,
    pub network: String,
    pub miner: String,
    pub timestamp: String,
    pub age_secs: Option<String>,
    pub transaction_count: String,
    pub gas_used: String,
    pub gas_limit: String,
    pub size_bytes: String,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct BlockAnalysis {
    pub overview: BlockOverview,
    pub network_health: NetworkHealth,
    pub activity: BlockActivity,
    pub classification_breakdown: BTreeMap<String, usize>,
    pub cluster_breakdown: BTreeMap<String, usize>,
    pub mev_indicators: Vec<MevIndicator>,
    pub risk: RiskAssessment,
    pub scoring_version: String,
}

#[derive(Debug, Clone, Copy)]
pub struct AnalysisEngine {
    scoring: &'static ScoringTable,
}

impl Default for AnalysisEngine {
    fn default() -> Self {
        Self::new(&SCORING_V1)
    }
}

impl AnalysisEngine {
    pub fn new(scoring: &'static ScoringTable) -> Self {
        Self { scoring }
    }

    pub fn analyze(&self, record: &Record, ctx: &AnalysisContext) -> AnalysisResult {
        match record {
            Record::Transaction(tx) => AnalysisResult::Transaction(self.analyze_transaction(tx, ctx)),
            Record::Block(block) => AnalysisResult::Block(self.analyze_block(block, ctx)),
        }
    }

    pub fn analyze_transaction(
        &self,
        tx: &TransactionRecord,
        ctx: &AnalysisContext,
    ) -> TransactionAnalysis {
        let classification = degrade(
            "classification",
            &tx.hash,
            classify::classify(tx),
            Classification::neutral,
        );
        let mev_indicators = mev::detect(tx, ctx);
        let risk = degrade(
            "risk",
            &tx.hash,
            risk::assess(tx, &classification, &mev_indicators, ctx, self.scoring),
            RiskAssessment::neutral,
        );
        let complexity = risk::complexity(&classification, tx, self.scoring);
        let clustering = degrade(
            "clustering",
            &tx.hash,
            clustering::ClusterFeatures::from_record(tx, &classification, ctx)
                .map(|features| clustering::assign(&features)),
            ClusterAssignment::neutral,
        );
        let trading_patterns = trading::infer(tx, &classification, &mev_indicators, &complexity);
        let liquidity_metrics = degrade(
            "liquidity",
            &tx.hash,
            trading::liquidity(tx, ctx),
            LiquidityMetrics::neutral,
        );

        TransactionAnalysis {
            overview: transaction_overview(tx, ctx),
            classification,
            risk,
            complexity,
            clustering,
            mev_indicators,
            trading_patterns,
            liquidity_metrics,
            scoring_version: self.scoring.version.to_string(),
        }
    }

    pub fn analyze_block(&self, block: &BlockRecord, ctx: &AnalysisContext) -> BlockAnalysis {
        let network_health = network::health(block, ctx);
        let samples: Vec<TransactionAnalysis> = block
            .sample_transactions
            .iter()
            .map(|tx| self.analyze_transaction(tx, ctx))
            .collect();

        let mut classification_breakdown = BTreeMap::new();
        let mut cluster_breakdown = BTreeMap::new();
        let mut mev_indicators = Vec::new();
        for (tx, analysis) in block.sample_transactions.iter().zip(&samples) {
            *classification_breakdown
                .entry(analysis.classification.primary_type.clone())
                .or_insert(0) += 1;
            *cluster_breakdown
                .entry(analysis.clustering.label.clone())
                .or_insert(0) += 1;
            mev_indicators.extend(analysis.mev_indicators.iter().cloned().map(|mut indicator| {
                indicator.tx_hash = Some(tx.hash.clone());
                indicator
            }));
        }
        mev_indicators.extend(mev::repeated_senders(&block.sample_transactions));

        let activity = network::activity(block, ctx);
        let risk = risk::assess_block(
            &samples,
            &network_health,
            mev_indicators.len(),
            self.scoring,
        );

        BlockAnalysis {
            overview: block_overview(block, ctx),
            network_health,
            activity,
            classification_breakdown,
            cluster_breakdown,
            mev_indicators,
            risk,
            scoring_version: self.scoring.version.to_string(),
        }
    }
}

fn degrade<T>(
    heuristic: &'static str,
    subject: &str,
    result: Result<T, HeuristicError>,
    neutral: impl FnOnce() -> T,
) -> T {
    result.unwrap_or_else(|err| {
        warn!(heuristic, subject, error = %err, "heuristic failed; using neutral default");
        neutral()
    })
}

fn transaction_overview(tx: &TransactionRecord, ctx: &AnalysisContext) -> TransactionOverview {
    let decimals = ctx.decimals();
    let status = match tx.status {
        Some(0) => "Failed",
        Some(_) => "Success",
        None => "Unknown",
    };
    TransactionOverview {
        hash: tx.hash.clone(),
        network: ctx.network.display_name.to_string(),
        block_number: tx.block_number.to_string(),
        from: tx.from.clone(),
        to: tx.to.clone(),
        value_native: numeric::format_units(tx.value_wei(), decimals),
        currency: ctx.network.native_currency_symbol.to_string(),
        status: status.to_string(),
        gas_used: tx.gas_used_u256().to_string(),
        gas_limit: tx.gas_limit_u256().to_string(),
        gas_efficiency_pct: tx.metrics.gas_efficiency_pct,
        gas_price_gwei: numeric::format_gwei(tx.price_wei()),
        fee_native: numeric::format_units(crate::data::total_cost(tx), decimals),
        age_secs: ctx.age_secs(tx.block_timestamp).map(|a| a.to_string()),
        contract_name: tx.context.contract.as_ref().and_then(|c| c.name.clone()),
        contract_verified: tx.context.contract.as_ref().map(|c| c.verified),
    }
}

fn block_overview(block: &BlockRecord, ctx: &AnalysisContext) -> BlockOverview {
    BlockOverview {
        number: block.number.to_string(),
        hash: block.hash.clone(),
        network: ctx.network.display_name.to_string(),
        miner: block.miner.clone(),
        timestamp: block.timestamp.to_string(),
        age_secs: ctx.age_secs(block.timestamp).map(|a| a.to_string()),
        transaction_count: block.transaction_count.to_string(),
        gas_used: numeric::parse_u256_or_zero(&block.gas_used).to_string(),
        gas_limit: numeric::parse_u256_or_zero(&block.gas_limit).to_string(),
        size_bytes: block.size.to_string(),
    }
}

#[cfg(test)]
pub(crate) mod fixtures {
    use crate::models::{
        BlockMetrics, BlockRecord, TokenTransfer, TransactionContext,
        TransactionMetrics, TransactionRecord,
    };

    use super::AnalysisContext;

    pub const NOW: i64 = 1_700_000_000;

    pub fn ctx() -> AnalysisContext {
        AnalysisContext {
            network: crate::registry::NETWORKS[0],
            now: NOW,
            chain_head: None,
        }
    }

    pub fn ether(units: u64) -> String {
        format!("{}000000000000000000", units)
    }

    pub fn plain_tx() -> TransactionRecord {
        TransactionRecord {
            hash: format!("0x{}", "11".repeat(32)),
            block_number: 100,
            block_timestamp: NOW - 3_600,
            index: 5,
            from: "0xsender".to_string(),
            to: Some("0xreceiver".to_string()),
            value: "0".to_string(),
            gas_limit: "21000".to_string(),
            gas_price: "20000000000".to_string(),
            gas_used: "21000".to_string(),
            effective_gas_price: "20000000000".to_string(),
            status: Some(1),
            input_data: "0x".to_string(),
            nonce: 42,
            tx_type: 2,
            metrics: TransactionMetrics {
                gas_efficiency_pct: 100.0,
                total_cost_wei: "420000000000000".to_string(),
                is_contract_interaction: false,
                block_utilization_pct: None,
            },
            context: TransactionContext::default(),
        }
    }

    pub fn contract_call(selector: &str) -> TransactionRecord {
        let mut tx = plain_tx();
        tx.to = Some("0xrouter".to_string());
        tx.input_data = format!("{}{}", selector, "00".repeat(64));
        tx.gas_limit = "300000".to_string();
        tx.gas_used = "150000".to_string();
        tx.metrics.is_contract_interaction = true;
        tx
    }

    pub fn transfer(log_index: i64, token: &str, from: &str, to: &str) -> TokenTransfer {
        TokenTransfer {
            log_index,
            token_address: token.to_string(),
            token_symbol: None,
            from: from.to_string(),
            to: to.to_string(),
            value: "1000000".to_string(),
        }
    }

    /// Swap through a router: sender pays token A, pool forwards, sender
    /// receives token B.
    pub fn swap_tx() -> TransactionRecord {
        let mut tx = contract_call("0x38ed1739");
        tx.context.token_transfers = vec![
            transfer(0, "0xtokena", "0xsender", "0xpool"),
            transfer(1, "0xtokenb", "0xpool", "0xrouter"),
            transfer(2, "0xtokenb", "0xrouter", "0xsender"),
        ];
        tx
    }

    pub fn block(samples: Vec<TransactionRecord>) -> BlockRecord {
        BlockRecord {
            number: 100,
            hash: "0xblock".to_string(),
            parent_hash: "0xparent".to_string(),
            timestamp: NOW - 60,
            gas_used: "15000000".to_string(),
            gas_limit: "30000000".to_string(),
            base_fee_per_gas: Some("20000000000".to_string()),
            miner: "0xminer".to_string(),
            size: 80_000,
            transaction_count: samples.len() as i64,
            sample_transactions: samples,
            metrics: BlockMetrics {
                utilization_pct: 50.0,
                parent_timestamp: Some(NOW - 72),
            },
        }
    }
}

#[cfg(test)]
mod tests {
    use super::fixtures::*;
    use super::*;

    #[test]
    fn simple_transfer_with_zero_value_is_low_risk() {
        let analysis = AnalysisEngine::default().analyze_transaction(&plain_tx(), &ctx());
        assert_eq!(analysis.classification.primary_type, "Simple Transfer");
        assert_eq!(analysis.risk.level, RiskLevel::Low);
        assert_eq!(analysis.clustering.label, "Simple User");
        assert!(analysis.mev_indicators.is_empty());
        assert_eq!(analysis.scoring_version, "scoring-v1");
    }

    #[test]
    fn analysis_is_deterministic() {
        let engine = AnalysisEngine::default();
        let tx = swap_tx();
        assert_eq!(
            engine.analyze_transaction(&tx, &ctx()),
            engine.analyze_transaction(&tx, &ctx())
        );
        let block = block(vec![plain_tx(), swap_tx()]);
        assert_eq!(engine.analyze_block(&block, &ctx()), engine.analyze_block(&block, &ctx()));
    }

    #[test]
    fn swap_with_multi_token_transfers_is_at_least_defi_power_user() {
        let analysis = AnalysisEngine::default().analyze_transaction(&swap_tx(), &ctx());
        assert_eq!(analysis.classification.primary_type, "Token Swap");
        assert!(
            ["MEV/Arbitrage", "DeFi Power User"].contains(&analysis.clustering.label.as_str()),
            "got {}",
            analysis.clustering.label
        );
    }

    #[test]
    fn broken_value_field_degrades_instead_of_failing() {
        let mut tx = plain_tx();
        tx.value = "not-a-number".to_string();
        let analysis = AnalysisEngine::default().analyze_transaction(&tx, &ctx());
        assert_eq!(analysis.classification, Classification::neutral());
        assert_eq!(analysis.risk, RiskAssessment::neutral());
        assert_eq!(analysis.liquidity_metrics, LiquidityMetrics::neutral());
        assert_eq!(analysis.overview.value_native, "0");
    }

    #[test]
    fn block_analysis_aggregates_samples() {
        let block = block(vec![plain_tx(), swap_tx(), plain_tx()]);
        let analysis = AnalysisEngine::default().analyze_block(&block, &ctx());
        assert_eq!(analysis.classification_breakdown["Simple Transfer"], 2);
        assert_eq!(analysis.classification_breakdown["Token Swap"], 1);
        assert_eq!(analysis.cluster_breakdown.values().sum::<usize>(), 3);
        assert_eq!(analysis.overview.transaction_count, "3");
        assert!(analysis
            .mev_indicators
            .iter()
            .all(|m| m.tx_hash.is_some() || m.indicator_type == "Repeated Sender"));
    }

    #[test]
    fn analyze_dispatches_on_record_kind() {
        let engine = AnalysisEngine::default();
        let result = engine.analyze(&Record::Transaction(plain_tx()), &ctx());
        assert!(matches!(result, AnalysisResult::Transaction(_)));
        let result = engine.analyze(&Record::Block(block(vec![])), &ctx());
        assert!(matches!(result, AnalysisResult::Block(_)));
    }
}
