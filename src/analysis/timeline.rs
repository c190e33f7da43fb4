//! Synthetic address activity.
//!
//! Nothing here reads the store. Events are drawn from an RNG seeded by the
//! address, so the same address yields the same timeline, and every result is
//! flagged `simulated`. Callers must not feed it into analysis or the cache.

use rand::rngs::StdRng;
use rand::seq::SliceRandom;
use rand::{Rng, SeedableRng};
use serde::Serialize;
use sha2::{Digest, Sha256};

use crate::models::NetworkIdentity;

pub const DISCLAIMER: &str =
    "Simulated data for interface previews. These events were not read from the chain.";
pub const DEFAULT_EVENTS: usize = 10;
pub const MAX_EVENTS: usize = 100;

const EVENT_TYPES: &[&str] = &[
    "Native Transfer",
    "Token Transfer",
    "Token Swap",
    "Token Approval",
    "Liquidity Provision",
    "NFT Transfer",
];
const MAX_GAP_SECS: i64 = 86_400;

#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct TimelineEvent {
    pub timestamp: String,
    pub event_type: String,
    pub counterparty: String,
    pub value_native: String,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct SimulatedTimeline {
    pub address: String,
    pub network: String,
    pub simulated: bool,
    pub disclaimer: &'static str,
    pub events: Vec<TimelineEvent>,
}

fn seed(address: &str) -> u64 {
    let digest = Sha256::digest(address.to_lowercase().as_bytes());
    let mut bytes = [0u8; 8];
    bytes.copy_from_slice(&digest[..8]);
    u64::from_be_bytes(bytes)
}

/// Builds `count` events (capped at [`MAX_EVENTS`]) ending at or before `now`,
/// newest first.
pub fn simulate(
    address: &str,
    network: &NetworkIdentity,
    now: i64,
    count: usize,
) -> SimulatedTimeline {
    let mut rng = StdRng::seed_from_u64(seed(address));
    let mut cursor = now;
    let events = (0..count.min(MAX_EVENTS))
        .map(|_| {
            cursor -= rng.gen_range(60..MAX_GAP_SECS);
            let event_type = EVENT_TYPES.choose(&mut rng).copied().unwrap_or("Native Transfer");
            let counterparty_bytes: [u8; 20] = rng.gen();
            let milli = rng.gen_range(0u64..50_000);
            TimelineEvent {
                timestamp: cursor.to_string(),
                event_type: event_type.to_string(),
                counterparty: format!("0x{}", hex::encode(counterparty_bytes)),
                value_native: format!("{}.{:03}", milli / 1_000, milli % 1_000),
            }
        })
        .collect();

    SimulatedTimeline {
        address: address.to_lowercase(),
        network: network.display_name.to_string(),
        simulated: true,
        disclaimer: DISCLAIMER,
        events,
    }
}
