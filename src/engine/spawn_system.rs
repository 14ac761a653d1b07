use crate::constants::{EARLY_PHASE_DROPS, EARLY_SPAWN_THRESHOLDS, STEADY_SPAWN_THRESHOLDS};
use crate::rng::RandomSource;
use crate::types::Tier;

/// Picks the tier of the next dropped ball from one uniform draw.
///
/// The first few drops favour the smallest tiers; afterwards the
/// distribution widens up to tier 4. The chosen tier is the first
/// interval whose cumulative upper bound exceeds the draw.
pub fn next_spawn_tier(drops_so_far: u32, source: &mut impl RandomSource) -> Tier {
    let draw = source.next_unit();
    let thresholds: &[f64] = if drops_so_far < EARLY_PHASE_DROPS {
        &EARLY_SPAWN_THRESHOLDS
    } else {
        &STEADY_SPAWN_THRESHOLDS
    };
    let index = thresholds
        .iter()
        .position(|bound| draw < *bound)
        .unwrap_or(thresholds.len());
    Tier::saturating(index as u8)
}
