use serde::Serialize;

use super::classify::{Classification, SelectorCategory};
use super::mev::{MevIndicator, Severity};
use super::network::{Congestion, NetworkHealth};
use super::scoring::{ComplexityLevel, RiskLevel, ScoringTable};
use super::{decimal, AnalysisContext, HeuristicError, TransactionAnalysis};
use crate::models::TransactionRecord;
use crate::numeric::{u256_to_u64_saturating, whole_units};

#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct RiskAssessment {
    pub score: u8,
    pub level: RiskLevel,
    pub factors: Vec<String>,
}

impl RiskAssessment {
    /// Used when risk cannot be scored.
    pub fn neutral() -> Self {
        Self {
            score: 0,
            level: RiskLevel::Low,
            factors: vec!["Risk could not be assessed from the available data".to_string()],
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ComplexityAssessment {
    pub score: u8,
    pub level: ComplexityLevel,
}

/// Adds up points per matched factor, clamps to 0..=100 and bands the total.
struct Tally {
    points: u32,
    factors: Vec<String>,
}

impl Tally {
    fn new() -> Self {
        Self {
            points: 0,
            factors: Vec::new(),
        }
    }

    fn add(&mut self, points: u32, factor: impl Into<String>) {
        self.points = self.points.saturating_add(points);
        self.factors.push(factor.into());
    }

    fn score(&self) -> u8 {
        ScoringTable::clamp(self.points)
    }
}

pub fn assess(
    tx: &TransactionRecord,
    classification: &Classification,
    mev: &[MevIndicator],
    ctx: &AnalysisContext,
    table: &ScoringTable,
) -> Result<RiskAssessment, HeuristicError> {
    let value = decimal("value", &tx.value)?;
    let value_native = u256_to_u64_saturating(whole_units(value, ctx.decimals()));
    let mut tally = Tally::new();

    if classification.is_contract_interaction {
        tally.add(table.contract_interaction_points, "Interacts with a smart contract");
    }
    if let Some(tier) = table.value_tiers.iter().find(|t| value_native > t.above_native) {
        tally.add(
            tier.points,
            format!(
                "Moves more than {} {}",
                tier.above_native, ctx.network.native_currency_symbol
            ),
        );
    }
    if tx.nonce < table.low_activity_max_nonce {
        tally.add(table.low_activity_points, "Sender has very little prior activity");
    }
    if classification.is_contract_interaction
        && tx.context.contract.as_ref().is_some_and(|c| !c.verified)
    {
        tally.add(table.unverified_contract_points, "Target contract is not verified");
    }
    if !tx.succeeded() {
        tally.add(table.failed_execution_points, "Execution reverted");
    }
    if mev.iter().any(|m| m.severity == Severity::High) {
        tally.add(table.high_severity_mev_points, "High-severity MEV pattern detected");
    }

    let score = tally.score();
    Ok(RiskAssessment {
        score,
        level: table.risk_level(score),
        factors: tally.factors,
    })
}

pub fn complexity(
    classification: &Classification,
    tx: &TransactionRecord,
    table: &ScoringTable,
) -> ComplexityAssessment {
    let mut tally = Tally::new();

    if classification.is_contract_interaction {
        tally.add(table.complexity_contract_points, "contract");
    }
    let transfers = tx.context.token_transfers.len() as u32;
    if transfers > 0 {
        tally.add(
            (transfers.saturating_mul(table.complexity_points_per_transfer))
                .min(table.complexity_transfer_cap),
            "transfers",
        );
    }
    if classification.token_count >= 2 {
        tally.add(table.complexity_multi_token_points, "multi-token");
    }
    if classification.log_count > table.complexity_many_logs_threshold {
        tally.add(table.complexity_many_logs_points, "logs");
    }
    let gas_used = u256_to_u64_saturating(tx.gas_used_u256());
    if let Some(tier) = table
        .complexity_gas_tiers
        .iter()
        .find(|t| gas_used > t.above_gas)
    {
        tally.add(tier.points, "gas");
    }
    if classification.category() == Some(SelectorCategory::Multicall) {
        tally.add(table.complexity_multicall_points, "multicall");
    }

    let score = tally.score();
    ComplexityAssessment {
        score,
        level: table.complexity_level(score),
    }
}

/// Block risk: mean sampled transaction risk plus congestion and MEV points.
pub fn assess_block(
    samples: &[TransactionAnalysis],
    health: &NetworkHealth,
    mev_indicator_count: usize,
    table: &ScoringTable,
) -> RiskAssessment {
    let mut tally = Tally::new();

    if !samples.is_empty() {
        let total: u32 = samples.iter().map(|s| u32::from(s.risk.score)).sum();
        let mean = total / samples.len() as u32;
        tally.add(mean, format!("Mean sampled transaction risk is {}", mean));
        let elevated = samples
            .iter()
            .filter(|s| s.risk.level >= RiskLevel::High)
            .count();
        if elevated > 0 {
            tally.factors.push(format!(
                "{} of {} sampled transactions are high risk or worse",
                elevated,
                samples.len()
            ));
        }
    }
    match health.congestion {
        Congestion::Congested => tally.add(table.block_congested_points, "Block is congested"),
        Congestion::Busy => tally.add(table.block_busy_points, "Block is busy"),
        Congestion::Normal | Congestion::Light => {}
    }
    if mev_indicator_count > 0 {
        tally.add(
            (mev_indicator_count as u32).saturating_mul(table.block_points_per_mev_indicator),
            format!("{} MEV indicators across sampled transactions", mev_indicator_count),
        );
    }

    let score = tally.score();
    RiskAssessment {
        score,
        level: table.risk_level(score),
        factors: tally.factors,
    }
}

#[cfg(test)]
mod tests {
    use super::super::classify::classify;
    use super::super::fixtures::*;
    use super::super::scoring::SCORING_V1;
    use super::*;
    use crate::models::ContractInfo;

    fn risk_of(tx: &TransactionRecord) -> RiskAssessment {
        let c = classify(tx).unwrap();
        assess(tx, &c, &[], &ctx(), &SCORING_V1).unwrap()
    }

    #[test]
    fn large_value_contract_call_is_at_least_medium() {
        let mut tx = contract_call("0xa9059cbb");
        tx.value = ether(100_001);
        let risk = risk_of(&tx);
        assert!(risk.score >= 50, "score {}", risk.score);
        assert!(risk.level >= RiskLevel::Medium);
    }

    #[test]
    fn zero_value_plain_transfer_is_low() {
        let mut tx = plain_tx();
        tx.nonce = 0;
        let risk = risk_of(&tx);
        assert_eq!(risk.level, RiskLevel::Low);
        assert_eq!(risk.score, 10);
    }

    #[test]
    fn value_tiers_apply_highest_first() {
        let mut tx = plain_tx();
        tx.value = ether(10_001);
        assert_eq!(risk_of(&tx).score, 15);
        tx.value = ether(1_001);
        assert_eq!(risk_of(&tx).score, 5);
        tx.value = ether(1_000);
        assert_eq!(risk_of(&tx).score, 0);
    }

    #[test]
    fn unverified_contract_adds_points_and_score_clamps() {
        let mut tx = contract_call("0xdeadbeef");
        tx.value = ether(500_000);
        tx.nonce = 1;
        tx.status = Some(0);
        tx.context.contract = Some(ContractInfo {
            address: "0xrouter".to_string(),
            name: None,
            verified: false,
        });
        let c = classify(&tx).unwrap();
        let mev = vec![MevIndicator {
            indicator_type: "Flash Loan".to_string(),
            severity: Severity::High,
            description: String::new(),
            confidence: 0.9,
            tx_hash: None,
        }];
        let risk = assess(&tx, &c, &mev, &ctx(), &SCORING_V1).unwrap();
        assert_eq!(risk.score, 100);
        assert_eq!(risk.level, RiskLevel::Critical);
        assert_eq!(risk.factors.len(), 6);
    }

    #[test]
    fn complexity_grows_with_structure() {
        let simple = plain_tx();
        let c = classify(&simple).unwrap();
        assert_eq!(complexity(&c, &simple, &SCORING_V1).level, ComplexityLevel::Simple);

        let mut swap = swap_tx();
        swap.gas_used = "350000".to_string();
        let c = classify(&swap).unwrap();
        let assessed = complexity(&c, &swap, &SCORING_V1);
        // contract 20 + transfers 15 + multi-token 15 + gas 20
        assert_eq!(assessed.score, 70);
        assert_eq!(assessed.level, ComplexityLevel::Complex);
    }
}
