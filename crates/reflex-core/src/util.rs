use std::time::{SystemTime, UNIX_EPOCH};

use rand::Rng;

pub fn timestamp_ms() -> u64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|d| d.as_millis() as u64)
        .unwrap_or(0)
}

/// Left-biased draw over `[0, range)`: small values are far more likely than
/// large ones, so attribution usually looks back a few seconds but can reach
/// the full window.
pub fn skewed_random(rng: &mut impl Rng, range: u64) -> u64 {
    if range == 0 {
        return 0;
    }
    let u = rng.gen_range(0.0..range as f64);
    ((u * u) / range as f64) as u64
}
