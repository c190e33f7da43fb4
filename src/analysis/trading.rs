use std::collections::{BTreeMap, BTreeSet};

use ethers_core::types::U256;
use serde::Serialize;

use super::classify::{Classification, SelectorCategory};
use super::mev::MevIndicator;
use super::risk::ComplexityAssessment;
use super::scoring::ComplexityLevel;
use super::{decimal, AnalysisContext, HeuristicError};
use crate::models::TransactionRecord;
use crate::numeric;

/// Strategies in the order they win when several are detected.
pub const STRATEGY_PRIORITY: &[&str] = &[
    "Arbitrage",
    "Flash Loan",
    "Liquidity Management",
    "Token Swap",
    "Token Transfer",
    "Native Transfer",
];

#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct TradingPatterns {
    pub automation_level: String,
    pub sophistication: String,
    pub primary_strategy: String,
    pub detected_strategies: Vec<String>,
}

pub fn infer(
    tx: &TransactionRecord,
    classification: &Classification,
    mev: &[MevIndicator],
    complexity: &ComplexityAssessment,
) -> TradingPatterns {
    let has_indicator = |name: &str| mev.iter().any(|m| m.indicator_type == name);
    let category = classification.category();

    let mut detected = BTreeSet::new();
    if has_indicator("Circular Arbitrage") {
        detected.insert("Arbitrage");
    }
    if has_indicator("Flash Loan") {
        detected.insert("Flash Loan");
    }
    if matches!(
        category,
        Some(SelectorCategory::LiquidityProvision | SelectorCategory::LiquidityRemoval)
    ) {
        detected.insert("Liquidity Management");
    }
    if category == Some(SelectorCategory::TokenSwap) || classification.token_count >= 2 {
        detected.insert("Token Swap");
    }
    if category == Some(SelectorCategory::TokenTransfer) || !tx.context.token_transfers.is_empty() {
        detected.insert("Token Transfer");
    }
    if !tx.has_input() && !tx.value_wei().is_zero() {
        detected.insert("Native Transfer");
    }

    let detected_strategies: Vec<String> = STRATEGY_PRIORITY
        .iter()
        .filter(|s| detected.contains(*s))
        .map(|s| s.to_string())
        .collect();
    let primary_strategy = detected_strategies
        .first()
        .cloned()
        .unwrap_or_else(|| "None".to_string());

    let automation_level = if has_indicator("Bot Activity") || tx.nonce >= 10_000 {
        "High"
    } else if tx.nonce >= 1_000 {
        "Medium"
    } else {
        "Low"
    };
    let sophistication = match complexity.level {
        ComplexityLevel::Simple => "Basic",
        ComplexityLevel::Moderate => "Intermediate",
        ComplexityLevel::Complex => "Advanced",
        ComplexityLevel::HighlyComplex => "Expert",
    };

    TradingPatterns {
        automation_level: automation_level.to_string(),
        sophistication: sophistication.to_string(),
        primary_strategy,
        detected_strategies,
    }
}

#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct TokenFlow {
    pub token: String,
    pub symbol: Option<String>,
    pub sent_by_sender: String,
    pub received_by_sender: String,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct LiquidityMetrics {
    pub native_value: String,
    pub token_transfer_count: usize,
    pub distinct_tokens: usize,
    pub unique_counterparties: usize,
    pub net_flow: String,
    pub token_flows: Vec<TokenFlow>,
}

impl LiquidityMetrics {
    /// Used when transfer values could not be read.
    pub fn neutral() -> Self {
        Self {
            native_value: "0".to_string(),
            token_transfer_count: 0,
            distinct_tokens: 0,
            unique_counterparties: 0,
            net_flow: "Unknown".to_string(),
            token_flows: Vec::new(),
        }
    }
}

pub fn liquidity(
    tx: &TransactionRecord,
    ctx: &AnalysisContext,
) -> Result<LiquidityMetrics, HeuristicError> {
    let value = decimal("value", &tx.value)?;
    let sender = tx.from.to_lowercase();

    let mut flows: BTreeMap<String, (Option<String>, U256, U256)> = BTreeMap::new();
    let mut counterparties = BTreeSet::new();
    if let Some(to) = &tx.to {
        counterparties.insert(to.to_lowercase());
    }

    for t in &tx.context.token_transfers {
        let amount = decimal("transfer.value", &t.value)?;
        let from = t.from.to_lowercase();
        let to = t.to.to_lowercase();
        let entry = flows
            .entry(t.token_address.to_lowercase())
            .or_insert_with(|| (t.token_symbol.clone(), U256::zero(), U256::zero()));
        if from == sender {
            entry.1 = entry.1.saturating_add(amount);
        }
        if to == sender {
            entry.2 = entry.2.saturating_add(amount);
        }
        counterparties.insert(from);
        counterparties.insert(to);
    }
    counterparties.remove(&sender);

    let outflow = !value.is_zero() || flows.values().any(|(_, sent, received)| sent > received);
    let inflow = flows.values().any(|(_, sent, received)| received > sent);
    let net_flow = match (inflow, outflow) {
        (true, true) => "Exchange",
        (true, false) => "Inflow",
        (false, true) => "Outflow",
        (false, false) => "Neutral",
    };

    Ok(LiquidityMetrics {
        native_value: numeric::format_units(value, ctx.decimals()),
        token_transfer_count: tx.context.token_transfers.len(),
        distinct_tokens: flows.len(),
        unique_counterparties: counterparties.len(),
        net_flow: net_flow.to_string(),
        token_flows: flows
            .into_iter()
            .map(|(token, (symbol, sent, received))| TokenFlow {
                token,
                symbol,
                sent_by_sender: sent.to_string(),
                received_by_sender: received.to_string(),
            })
            .collect(),
    })
}
