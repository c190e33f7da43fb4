//! Single-label behavioural clustering.
//!
//! [`RULES`] is evaluated top to bottom and the first matching rule decides the
//! label. The order is part of the semantics: a record that satisfies several
//! predicates takes the earliest label.

use ethers_core::types::U256;
use serde::Serialize;

use super::classify::Classification;
use super::{decimal, AnalysisContext, HeuristicError};
use crate::models::TransactionRecord;
use crate::numeric::{u256_to_u64_saturating, whole_units};

#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ClusterAssignment {
    pub label: String,
    pub confidence: f64,
}

impl ClusterAssignment {
    /// Used when the features could not be extracted.
    pub fn neutral() -> Self {
        Self {
            label: "Unclassified".to_string(),
            confidence: 0.0,
        }
    }
}

#[derive(Debug, Clone, Default, PartialEq)]
pub struct ClusterFeatures {
    pub transfer_count: usize,
    pub token_count: usize,
    pub interaction_count: usize,
    pub gas_used: u64,
    pub value_native: u64,
    pub value_is_zero: bool,
    pub nonce: i64,
}

impl ClusterFeatures {
    pub fn from_record(
        tx: &TransactionRecord,
        classification: &Classification,
        ctx: &AnalysisContext,
    ) -> Result<Self, HeuristicError> {
        let value: U256 = decimal("value", &tx.value)?;
        let gas_used = decimal("gasUsed", &tx.gas_used)?;
        Ok(Self {
            transfer_count: classification.transfer_count,
            token_count: classification.token_count,
            interaction_count: classification.interaction_count,
            gas_used: u256_to_u64_saturating(gas_used),
            value_native: u256_to_u64_saturating(whole_units(value, ctx.decimals())),
            value_is_zero: value.is_zero(),
            nonce: tx.nonce,
        })
    }
}

pub struct ClusterRule {
    pub label: &'static str,
    pub confidence: f64,
    predicate: fn(&ClusterFeatures) -> bool,
}

impl ClusterRule {
    pub fn matches(&self, features: &ClusterFeatures) -> bool {
        (self.predicate)(features)
    }
}

pub const RULES: &[ClusterRule] = &[
    ClusterRule {
        label: "MEV/Arbitrage",
        confidence: 0.85,
        predicate: |f| f.transfer_count >= 4 && f.token_count >= 2 && f.gas_used >= 250_000,
    },
    ClusterRule {
        label: "DeFi Power User",
        confidence: 0.75,
        predicate: |f| f.transfer_count >= 3 && f.interaction_count >= 2,
    },
    ClusterRule {
        label: "Whale",
        confidence: 0.8,
        predicate: |f| f.value_native >= 1_000,
    },
    ClusterRule {
        label: "Automated System",
        confidence: 0.7,
        predicate: |f| f.nonce >= 10_000 || (f.gas_used >= 1_000_000 && f.value_is_zero),
    },
    ClusterRule {
        label: "Active Trader",
        confidence: 0.6,
        predicate: |f| f.interaction_count >= 1 && f.transfer_count >= 1,
    },
    ClusterRule {
        label: "Simple User",
        confidence: 0.5,
        predicate: |_| true,
    },
];

pub fn assign(features: &ClusterFeatures) -> ClusterAssignment {
    RULES
        .iter()
        .find(|rule| rule.matches(features))
        .map(|rule| ClusterAssignment {
            label: rule.label.to_string(),
            confidence: rule.confidence,
        })
        .unwrap_or_else(ClusterAssignment::neutral)
}
