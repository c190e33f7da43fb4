//! MEV pattern checks. Each check runs independently and may contribute one
//! indicator; a check that cannot evaluate its inputs contributes nothing.

use std::collections::BTreeMap;

use ethers_core::types::U256;
use serde::Serialize;
use tracing::debug;

use super::classify::{lookup_selector, SelectorCategory};
use super::{decimal, AnalysisContext, HeuristicError};
use crate::models::TransactionRecord;
use crate::numeric::{self, gwei};

const ELEVATED_GAS_GWEI: u64 = 100;
const EXTREME_GAS_GWEI: u64 = 500;
const BASE_FEE_MULTIPLE: u64 = 3;
const BOT_MIN_NONCE: i64 = 1_000;
const TIME_SENSITIVE_MAX_AGE_SECS: i64 = 300;
const TIME_SENSITIVE_MIN_GWEI: u64 = 50;
const REPEATED_SENDER_MIN_TXS: usize = 3;

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Serialize)]
pub enum Severity {
    Low,
    Medium,
    High,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct MevIndicator {
    #[serde(rename = "type")]
    pub indicator_type: String,
    pub severity: Severity,
    pub description: String,
    pub confidence: f64,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub tx_hash: Option<String>,
}

impl MevIndicator {
    fn new(indicator_type: &str, severity: Severity, description: String, confidence: f64) -> Self {
        Self {
            indicator_type: indicator_type.to_string(),
            severity,
            description,
            confidence,
            tx_hash: None,
        }
    }
}

type Check = fn(&TransactionRecord, &AnalysisContext) -> Result<Option<MevIndicator>, HeuristicError>;

const CHECKS: &[(&str, Check)] = &[
    ("gas-price-anomaly", gas_price_anomaly),
    ("circular-arbitrage", circular_arbitrage),
    ("flash-loan", flash_loan),
    ("bot-pattern", bot_pattern),
    ("time-sensitive", time_sensitive),
    ("sandwich", sandwich),
];

pub fn detect(tx: &TransactionRecord, ctx: &AnalysisContext) -> Vec<MevIndicator> {
    CHECKS
        .iter()
        .filter_map(|(name, check)| match check(tx, ctx) {
            Ok(indicator) => indicator,
            Err(err) => {
                debug!(check = name, tx = %tx.hash, error = %err, "mev check skipped");
                None
            }
        })
        .collect()
}

fn price(tx: &TransactionRecord) -> Result<U256, HeuristicError> {
    let effective = decimal("effectiveGasPrice", &tx.effective_gas_price)?;
    if !effective.is_zero() {
        return Ok(effective);
    }
    decimal("gasPrice", &tx.gas_price)
}

fn gas_price_anomaly(
    tx: &TransactionRecord,
    ctx: &AnalysisContext,
) -> Result<Option<MevIndicator>, HeuristicError> {
    let value = decimal("value", &tx.value)?;
    let price = price(tx)?;
    let low_value = value < numeric::pow10(ctx.decimals()) / U256::from(10u64);
    if !low_value {
        return Ok(None);
    }

    let price_gwei = numeric::format_gwei(price);
    if price >= gwei(EXTREME_GAS_GWEI) {
        return Ok(Some(MevIndicator::new(
            "Gas Price Anomaly",
            Severity::High,
            format!("Paid {} gwei per gas while moving almost no value", price_gwei),
            0.75,
        )));
    }
    if price >= gwei(ELEVATED_GAS_GWEI) {
        return Ok(Some(MevIndicator::new(
            "Gas Price Anomaly",
            Severity::Medium,
            format!("Elevated gas price of {} gwei on a low-value transaction", price_gwei),
            0.6,
        )));
    }

    let base_fee = tx
        .context
        .block
        .as_ref()
        .and_then(|b| b.base_fee_per_gas.as_deref())
        .map(|raw| decimal("baseFeePerGas", raw))
        .transpose()?
        .filter(|b| !b.is_zero());
    if let Some(base_fee) = base_fee {
        if price >= base_fee.saturating_mul(U256::from(BASE_FEE_MULTIPLE)) {
            return Ok(Some(MevIndicator::new(
                "Gas Price Anomaly",
                Severity::Low,
                format!(
                    "Gas price of {} gwei is at least {}x the block base fee",
                    price_gwei, BASE_FEE_MULTIPLE
                ),
                0.45,
            )));
        }
    }
    Ok(None)
}

/// A transfer path that starts and ends with the same token at the same
/// holder after passing through another token.
fn circular_arbitrage(
    tx: &TransactionRecord,
    _ctx: &AnalysisContext,
) -> Result<Option<MevIndicator>, HeuristicError> {
    let transfers = &tx.context.token_transfers;
    if transfers.len() < 3 {
        return Ok(None);
    }
    let (Some(first), Some(last)) = (transfers.first(), transfers.last()) else {
        return Ok(None);
    };
    let same_token = first.token_address.eq_ignore_ascii_case(&last.token_address);
    let closes_at_origin = first.from.eq_ignore_ascii_case(&last.to);
    let passes_other_token = transfers
        .iter()
        .any(|t| !t.token_address.eq_ignore_ascii_case(&first.token_address));
    if !(same_token && closes_at_origin && passes_other_token) {
        return Ok(None);
    }

    let sent = decimal("transfer.value", &first.value)?;
    let received = decimal("transfer.value", &last.value)?;
    let description = if received > sent {
        format!(
            "Circular path over {} transfers returned more of the starting token than it spent",
            transfers.len()
        )
    } else {
        format!("Circular token path over {} transfers", transfers.len())
    };
    Ok(Some(MevIndicator::new(
        "Circular Arbitrage",
        Severity::High,
        description,
        if received > sent { 0.85 } else { 0.7 },
    )))
}

fn flash_loan(
    tx: &TransactionRecord,
    _ctx: &AnalysisContext,
) -> Result<Option<MevIndicator>, HeuristicError> {
    let by_selector = tx
        .selector()
        .as_deref()
        .and_then(lookup_selector)
        .is_some_and(|k| k.category == SelectorCategory::FlashLoan);
    let by_event = tx.context.logs.iter().any(|log| {
        log.event_name
            .as_deref()
            .is_some_and(|name| name.to_lowercase().contains("flash"))
    });
    if !(by_selector || by_event) {
        return Ok(None);
    }
    let source = if by_event { "emitted a flash-loan event" } else { "called a flash-loan entry point" };
    Ok(Some(MevIndicator::new(
        "Flash Loan",
        Severity::High,
        format!("Transaction {}", source),
        0.9,
    )))
}

fn bot_pattern(
    tx: &TransactionRecord,
    _ctx: &AnalysisContext,
) -> Result<Option<MevIndicator>, HeuristicError> {
    if tx.nonce < BOT_MIN_NONCE {
        return Ok(None);
    }
    let price = price(tx)?;
    let round = !price.is_zero() && (price % gwei(1)).is_zero();
    if !round {
        return Ok(None);
    }
    Ok(Some(MevIndicator::new(
        "Bot Activity",
        Severity::Medium,
        format!(
            "Sender nonce {} with a round {} gwei gas price suggests automation",
            tx.nonce,
            numeric::format_gwei(price)
        ),
        0.55,
    )))
}

fn time_sensitive(
    tx: &TransactionRecord,
    ctx: &AnalysisContext,
) -> Result<Option<MevIndicator>, HeuristicError> {
    let Some(age) = ctx.age_secs(tx.block_timestamp) else {
        return Ok(None);
    };
    if age > TIME_SENSITIVE_MAX_AGE_SECS || price(tx)? < gwei(TIME_SENSITIVE_MIN_GWEI) {
        return Ok(None);
    }
    Ok(Some(MevIndicator::new(
        "Time-Sensitive Execution",
        Severity::Low,
        format!("Included {}s ago with a premium gas price", age),
        0.4,
    )))
}

/// Same third party transacting with the same target right before and right
/// after this transaction.
fn sandwich(
    tx: &TransactionRecord,
    _ctx: &AnalysisContext,
) -> Result<Option<MevIndicator>, HeuristicError> {
    let Some(target) = tx.to.as_deref() else {
        return Ok(None);
    };
    let same_target = |s: &&crate::models::SiblingTx| {
        s.to.as_deref().is_some_and(|to| to.eq_ignore_ascii_case(target))
            && !s.from.eq_ignore_ascii_case(&tx.from)
    };
    let before: Vec<_> = tx
        .context
        .siblings
        .iter()
        .filter(|s| s.index < tx.index)
        .filter(same_target)
        .collect();
    let wrapped_by = tx
        .context
        .siblings
        .iter()
        .filter(|s| s.index > tx.index)
        .filter(same_target)
        .find_map(|after| {
            before
                .iter()
                .find(|b| b.from.eq_ignore_ascii_case(&after.from))
                .map(|_| after.from.clone())
        });

    Ok(wrapped_by.map(|attacker| {
        MevIndicator::new(
            "Sandwich Pattern",
            Severity::High,
            format!("{} traded the same target immediately before and after", attacker),
            0.7,
        )
    }))
}

/// Senders appearing repeatedly among a block's sampled transactions.
pub fn repeated_senders(samples: &[TransactionRecord]) -> Vec<MevIndicator> {
    let mut counts: BTreeMap<&str, usize> = BTreeMap::new();
    for tx in samples {
        *counts.entry(tx.from.as_str()).or_insert(0) += 1;
    }
    counts
        .into_iter()
        .filter(|(_, count)| *count >= REPEATED_SENDER_MIN_TXS)
        .map(|(sender, count)| {
            MevIndicator::new(
                "Repeated Sender",
                Severity::Medium,
                format!("{} sent {} of the sampled transactions", sender, count),
                0.5,
            )
        })
        .collect()
}

#[cfg(test)]
mod tests {
    use super::super::fixtures::*;
    use super::*;
    use crate::models::{BlockSummary, EventLog, SiblingTx};

    fn types(indicators: &[MevIndicator]) -> Vec<&str> {
        indicators.iter().map(|i| i.indicator_type.as_str()).collect()
    }

    #[test]
    fn ordinary_transfer_has_no_indicators() {
        assert!(detect(&plain_tx(), &ctx()).is_empty());
    }

    #[test]
    fn high_gas_on_low_value_is_flagged() {
        let mut tx = plain_tx();
        tx.effective_gas_price = gwei(600).to_string();
        let found = detect(&tx, &ctx());
        let anomaly = found.iter().find(|i| i.indicator_type == "Gas Price Anomaly").unwrap();
        assert_eq!(anomaly.severity, Severity::High);

        tx.effective_gas_price = gwei(150).to_string();
        let found = detect(&tx, &ctx());
        assert_eq!(found[0].severity, Severity::Medium);

        tx.value = ether(5);
        assert!(!types(&detect(&tx, &ctx())).contains(&"Gas Price Anomaly"));
    }

    #[test]
    fn base_fee_multiple_is_a_low_signal() {
        let mut tx = plain_tx();
        tx.effective_gas_price = gwei(70).to_string();
        tx.context.block = Some(BlockSummary {
            number: 100,
            timestamp: NOW - 3_600,
            gas_used: "1".to_string(),
            gas_limit: "2".to_string(),
            base_fee_per_gas: Some(gwei(20).to_string()),
            transaction_count: 1,
        });
        let found = detect(&tx, &ctx());
        assert_eq!(found.len(), 1);
        assert_eq!(found[0].severity, Severity::Low);
    }

    #[test]
    fn closed_token_cycle_is_arbitrage() {
        let mut tx = contract_call("0xdeadbeef");
        let mut back = transfer(2, "0xweth", "0xpoolb", "0xbot");
        back.value = "1100000".to_string();
        tx.context.token_transfers = vec![
            transfer(0, "0xweth", "0xbot", "0xpoola"),
            transfer(1, "0xusdc", "0xpoola", "0xpoolb"),
            back,
        ];
        let found = detect(&tx, &ctx());
        let arb = found.iter().find(|i| i.indicator_type == "Circular Arbitrage").unwrap();
        assert_eq!(arb.confidence, 0.85);
    }

    #[test]
    fn plain_swap_is_not_arbitrage() {
        assert!(!types(&detect(&swap_tx(), &ctx())).contains(&"Circular Arbitrage"));
    }

    #[test]
    fn flash_loan_by_event_or_selector() {
        let mut tx = contract_call("0xdeadbeef");
        tx.context.logs = vec![EventLog {
            log_index: 0,
            address: "0xpool".to_string(),
            event_name: Some("FlashLoan".to_string()),
            topic0: None,
        }];
        assert!(types(&detect(&tx, &ctx())).contains(&"Flash Loan"));
        let tx = contract_call("0x5cffe9de");
        assert!(types(&detect(&tx, &ctx())).contains(&"Flash Loan"));
    }

    #[test]
    fn high_nonce_with_round_price_is_bot_like() {
        let mut tx = plain_tx();
        tx.nonce = 25_000;
        assert!(types(&detect(&tx, &ctx())).contains(&"Bot Activity"));
        tx.effective_gas_price = "20000000001".to_string();
        assert!(!types(&detect(&tx, &ctx())).contains(&"Bot Activity"));
    }

    #[test]
    fn recent_premium_gas_is_time_sensitive() {
        let mut tx = plain_tx();
        tx.block_timestamp = NOW - 30;
        tx.effective_gas_price = gwei(60).to_string();
        assert!(types(&detect(&tx, &ctx())).contains(&"Time-Sensitive Execution"));
        tx.block_timestamp = NOW - 3_000;
        assert!(!types(&detect(&tx, &ctx())).contains(&"Time-Sensitive Execution"));
    }

    #[test]
    fn surrounding_trades_by_same_sender_are_a_sandwich() {
        let mut tx = swap_tx();
        let sibling = |index: i64, from: &str| SiblingTx {
            hash: format!("0x{:02}", index),
            index,
            from: from.to_string(),
            to: Some("0xrouter".to_string()),
        };
        tx.context.siblings = vec![sibling(4, "0xattacker"), sibling(6, "0xattacker")];
        assert!(types(&detect(&tx, &ctx())).contains(&"Sandwich Pattern"));

        tx.context.siblings = vec![sibling(4, "0xattacker"), sibling(6, "0xsomeoneelse")];
        assert!(!types(&detect(&tx, &ctx())).contains(&"Sandwich Pattern"));
    }

    #[test]
    fn unparseable_price_skips_only_price_checks() {
        let mut tx = contract_call("0x5cffe9de");
        tx.effective_gas_price = "garbage".to_string();
        tx.nonce = 5_000;
        assert_eq!(types(&detect(&tx, &ctx())), vec!["Flash Loan"]);
    }

    #[test]
    fn repeated_senders_need_three_transactions() {
        let samples = vec![plain_tx(), plain_tx(), plain_tx()];
        assert_eq!(repeated_senders(&samples).len(), 1);
        assert!(repeated_senders(&samples[..2]).is_empty());
    }
}
