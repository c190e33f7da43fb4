use ethers_core::types::U256;

const GWEI_DECIMALS: u32 = 9;

/// Parses a decimal string into a `U256`. Blank strings and `None`-like values
/// yield `None` so callers pick their own neutral default.
pub fn parse_u256(raw: &str) -> Option<U256> {
    let trimmed = raw.trim();
    if trimmed.is_empty() {
        return None;
    }
    U256::from_dec_str(trimmed).ok()
}

pub fn parse_u256_or_zero(raw: &str) -> U256 {
    parse_u256(raw).unwrap_or_else(U256::zero)
}

pub fn u256_to_u64_saturating(value: U256) -> u64 {
    let as_u128: u128 = value.try_into().unwrap_or(u128::MAX);
    u64::try_from(as_u128).unwrap_or(u64::MAX)
}

pub fn pow10(decimals: u32) -> U256 {
    U256::exp10(decimals as usize)
}

/// Whole units of a base-unit amount (truncating).
pub fn whole_units(value: U256, decimals: u32) -> U256 {
    value / pow10(decimals)
}

/// Renders a base-unit amount with `decimals` fractional digits, trimming
/// trailing zeros. `1500000000000000000` with 18 decimals renders as `1.5`.
pub fn format_units(value: U256, decimals: u32) -> String {
    if decimals == 0 {
        return value.to_string();
    }
    let divisor = pow10(decimals);
    let whole = value / divisor;
    let frac = value % divisor;
    if frac.is_zero() {
        return whole.to_string();
    }
    let frac_str = format!("{:0>width$}", frac.to_string(), width = decimals as usize);
    let frac_str = frac_str.trim_end_matches('0');
    format!("{}.{}", whole, frac_str)
}

pub fn format_gwei(wei: U256) -> String {
    format_units(wei, GWEI_DECIMALS)
}

pub fn gwei(amount: u64) -> U256 {
    U256::from(amount) * pow10(GWEI_DECIMALS)
}

/// `numerator / denominator` as a percentage with two decimals of precision,
/// computed in basis points on `U256`. Zero denominators yield `0.0`.
pub fn ratio_pct(numerator: U256, denominator: U256) -> f64 {
    if denominator.is_zero() {
        return 0.0;
    }
    let bps = numerator.saturating_mul(U256::from(10_000u64)) / denominator;
    u256_to_u64_saturating(bps) as f64 / 100.0
}
