use ethers_core::types::U256;
use serde::Serialize;

use super::AnalysisContext;
use crate::models::BlockRecord;
use crate::numeric::{self, gwei, parse_u256};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub enum Congestion {
    Light,
    Normal,
    Busy,
    Congested,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub enum FeePressure {
    Low,
    Moderate,
    High,
    Extreme,
    Unknown,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub enum HealthStatus {
    Healthy,
    Degraded,
    Stressed,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct NetworkHealth {
    pub utilization_pct: f64,
    pub congestion: Congestion,
    pub base_fee_gwei: Option<String>,
    pub fee_pressure: FeePressure,
    pub block_interval_secs: Option<String>,
    pub indexing_lag_blocks: Option<String>,
    pub status: HealthStatus,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct BlockActivity {
    pub transaction_count: String,
    pub sampled: usize,
    pub contract_interaction_ratio_pct: f64,
    pub failed_in_sample: usize,
    pub sample_value_native: String,
    pub avg_gas_price_gwei: Option<String>,
}

const INDEXING_LAG_WARN_BLOCKS: u64 = 50;
const SLOW_BLOCK_INTERVAL_SECS: i64 = 60;

pub fn congestion(utilization_pct: f64) -> Congestion {
    if utilization_pct >= 95.0 {
        Congestion::Congested
    } else if utilization_pct >= 75.0 {
        Congestion::Busy
    } else if utilization_pct >= 25.0 {
        Congestion::Normal
    } else {
        Congestion::Light
    }
}

pub fn fee_pressure(base_fee: Option<U256>) -> FeePressure {
    match base_fee {
        None => FeePressure::Unknown,
        Some(fee) if fee >= gwei(100) => FeePressure::Extreme,
        Some(fee) if fee >= gwei(30) => FeePressure::High,
        Some(fee) if fee >= gwei(10) => FeePressure::Moderate,
        Some(_) => FeePressure::Low,
    }
}

pub fn health(block: &BlockRecord, ctx: &AnalysisContext) -> NetworkHealth {
    let utilization_pct = block.metrics.utilization_pct;
    let congestion = congestion(utilization_pct);
    let base_fee = block.base_fee_per_gas.as_deref().and_then(parse_u256);
    let fee_pressure = fee_pressure(base_fee);
    let block_interval = block
        .metrics
        .parent_timestamp
        .map(|parent| (block.timestamp - parent).max(0));
    let indexing_lag = ctx
        .chain_head
        .map(|head| head.saturating_sub(u64::try_from(block.number).unwrap_or(0)));

    let mut strain = 0;
    if congestion == Congestion::Congested {
        strain += 2;
    } else if congestion == Congestion::Busy {
        strain += 1;
    }
    match fee_pressure {
        FeePressure::Extreme => strain += 2,
        FeePressure::High => strain += 1,
        _ => {}
    }
    if block_interval.is_some_and(|secs| secs > SLOW_BLOCK_INTERVAL_SECS) {
        strain += 1;
    }
    let status = match strain {
        0 => HealthStatus::Healthy,
        1 | 2 => HealthStatus::Degraded,
        _ => HealthStatus::Stressed,
    };

    NetworkHealth {
        utilization_pct,
        congestion,
        base_fee_gwei: base_fee.map(numeric::format_gwei),
        fee_pressure,
        block_interval_secs: block_interval.map(|s| s.to_string()),
        indexing_lag_blocks: indexing_lag.map(|lag| {
            if lag > INDEXING_LAG_WARN_BLOCKS {
                tracing::warn!(block = block.number, lag, "indexed data lags the chain head");
            }
            lag.to_string()
        }),
        status,
    }
}

pub fn activity(block: &BlockRecord, ctx: &AnalysisContext) -> BlockActivity {
    let samples = &block.sample_transactions;
    let sampled = samples.len();
    let interactions = samples
        .iter()
        .filter(|tx| tx.metrics.is_contract_interaction)
        .count();
    let failed = samples.iter().filter(|tx| !tx.succeeded()).count();
    let total_value = samples
        .iter()
        .fold(U256::zero(), |acc, tx| acc.saturating_add(tx.value_wei()));
    let avg_price = (sampled > 0).then(|| {
        let total = samples
            .iter()
            .fold(U256::zero(), |acc, tx| acc.saturating_add(tx.price_wei()));
        numeric::format_gwei(total / U256::from(sampled))
    });

    BlockActivity {
        transaction_count: block.transaction_count.to_string(),
        sampled,
        contract_interaction_ratio_pct: numeric::ratio_pct(
            U256::from(interactions),
            U256::from(sampled),
        ),
        failed_in_sample: failed,
        sample_value_native: numeric::format_units(total_value, ctx.decimals()),
        avg_gas_price_gwei: avg_price,
    }
}

#[cfg(test)]
mod tests {
    use super::super::fixtures::*;
    use super::*;

    #[test]
    fn congestion_bands() {
        assert_eq!(congestion(10.0), Congestion::Light);
        assert_eq!(congestion(50.0), Congestion::Normal);
        assert_eq!(congestion(80.0), Congestion::Busy);
        assert_eq!(congestion(99.9), Congestion::Congested);
    }

    #[test]
    fn fee_pressure_bands() {
        assert_eq!(fee_pressure(None), FeePressure::Unknown);
        assert_eq!(fee_pressure(Some(gwei(5))), FeePressure::Low);
        assert_eq!(fee_pressure(Some(gwei(20))), FeePressure::Moderate);
        assert_eq!(fee_pressure(Some(gwei(40))), FeePressure::High);
        assert_eq!(fee_pressure(Some(gwei(150))), FeePressure::Extreme);
    }

    #[test]
    fn half_full_block_is_healthy() {
        let health = health(&block(vec![]), &ctx());
        assert_eq!(health.congestion, Congestion::Normal);
        assert_eq!(health.fee_pressure, FeePressure::Moderate);
        assert_eq!(health.block_interval_secs.as_deref(), Some("12"));
        assert_eq!(health.status, HealthStatus::Healthy);
        assert_eq!(health.indexing_lag_blocks, None);
    }

    #[test]
    fn full_expensive_block_is_stressed_and_lag_is_reported() {
        let mut b = block(vec![]);
        b.metrics.utilization_pct = 99.0;
        b.base_fee_per_gas = Some(gwei(120).to_string());
        let mut c = ctx();
        c.chain_head = Some(160);
        let health = health(&b, &c);
        assert_eq!(health.status, HealthStatus::Stressed);
        assert_eq!(health.indexing_lag_blocks.as_deref(), Some("60"));
    }

    #[test]
    fn activity_summarizes_samples() {
        let mut paid = plain_tx();
        paid.value = ether(3);
        let b = block(vec![paid, swap_tx()]);
        let a = activity(&b, &ctx());
        assert_eq!(a.sampled, 2);
        assert_eq!(a.contract_interaction_ratio_pct, 50.0);
        assert_eq!(a.sample_value_native, "3");
        assert_eq!(a.avg_gas_price_gwei.as_deref(), Some("20"));
    }
}
