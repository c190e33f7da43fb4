//! Point values and band cutoffs for the additive scores.
//!
//! The numbers are hand-tuned. Any change to them ships as a new table with a
//! new version string so cached and persisted analyses stay attributable.

use serde::Serialize;

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Serialize)]
pub enum RiskLevel {
    Low,
    Medium,
    High,
    Critical,
}

impl RiskLevel {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Low => "Low",
            Self::Medium => "Medium",
            Self::High => "High",
            Self::Critical => "Critical",
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Serialize)]
pub enum ComplexityLevel {
    Simple,
    Moderate,
    Complex,
    #[serde(rename = "Highly Complex")]
    HighlyComplex,
}

impl ComplexityLevel {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Simple => "Simple",
            Self::Moderate => "Moderate",
            Self::Complex => "Complex",
            Self::HighlyComplex => "Highly Complex",
        }
    }
}

#[derive(Debug, Clone, Copy)]
pub struct ValueTier {
    /// Strictly-greater-than threshold in whole native units.
    pub above_native: u64,
    pub points: u32,
}

#[derive(Debug, Clone, Copy)]
pub struct GasTier {
    pub above_gas: u64,
    pub points: u32,
}

#[derive(Debug)]
pub struct ScoringTable {
    pub version: &'static str,

    pub contract_interaction_points: u32,
    /// Ordered from highest threshold down; the first tier exceeded applies.
    pub value_tiers: [ValueTier; 3],
    pub low_activity_max_nonce: i64,
    pub low_activity_points: u32,
    pub unverified_contract_points: u32,
    pub failed_execution_points: u32,
    pub high_severity_mev_points: u32,
    /// Medium, High and Critical start at these scores.
    pub band_cutoffs: [u32; 3],

    pub complexity_contract_points: u32,
    pub complexity_points_per_transfer: u32,
    pub complexity_transfer_cap: u32,
    pub complexity_multi_token_points: u32,
    pub complexity_many_logs_threshold: usize,
    pub complexity_many_logs_points: u32,
    /// Ordered from highest threshold down; the first tier exceeded applies.
    pub complexity_gas_tiers: [GasTier; 2],
    pub complexity_multicall_points: u32,

    pub block_congested_points: u32,
    pub block_busy_points: u32,
    pub block_points_per_mev_indicator: u32,
}

pub const SCORING_V1: ScoringTable = ScoringTable {
    version: "scoring-v1",

    contract_interaction_points: 20,
    value_tiers: [
        ValueTier { above_native: 100_000, points: 30 },
        ValueTier { above_native: 10_000, points: 15 },
        ValueTier { above_native: 1_000, points: 5 },
    ],
    low_activity_max_nonce: 5,
    low_activity_points: 10,
    unverified_contract_points: 25,
    failed_execution_points: 10,
    high_severity_mev_points: 15,
    band_cutoffs: [25, 50, 75],

    complexity_contract_points: 20,
    complexity_points_per_transfer: 5,
    complexity_transfer_cap: 25,
    complexity_multi_token_points: 15,
    complexity_many_logs_threshold: 5,
    complexity_many_logs_points: 10,
    complexity_gas_tiers: [
        GasTier { above_gas: 500_000, points: 30 },
        GasTier { above_gas: 200_000, points: 20 },
    ],
    complexity_multicall_points: 10,

    block_congested_points: 15,
    block_busy_points: 5,
    block_points_per_mev_indicator: 5,
};

impl ScoringTable {
    pub fn clamp(points: u32) -> u8 {
        points.min(100) as u8
    }

    pub fn risk_level(&self, score: u8) -> RiskLevel {
        match self.band(score) {
            0 => RiskLevel::Low,
            1 => RiskLevel::Medium,
            2 => RiskLevel::High,
            _ => RiskLevel::Critical,
        }
    }

    pub fn complexity_level(&self, score: u8) -> ComplexityLevel {
        match self.band(score) {
            0 => ComplexityLevel::Simple,
            1 => ComplexityLevel::Moderate,
            2 => ComplexityLevel::Complex,
            _ => ComplexityLevel::HighlyComplex,
        }
    }

    fn band(&self, score: u8) -> usize {
        self.band_cutoffs
            .iter()
            .take_while(|cutoff| u32::from(score) >= **cutoff)
            .count()
    }
}
