use crate::constants::{physical_radius, DROP_CLEARANCE};
use crate::types::{Tier, Vec2};

pub(super) fn preview_margin(tier: Tier) -> f32 {
    (physical_radius(tier) + 4.0).max(10.0)
}

/// Keeps the aim inside the well for a ball of `tier`.
pub(super) fn clamp_preview_x(x: f32, width: f32, tier: Tier) -> f32 {
    let margin = preview_margin(tier);
    let max = (width - margin).max(margin);
    if !x.is_finite() {
        return width / 2.0;
    }
    x.clamp(margin, max)
}

pub(super) fn drop_origin(x: f32, game_over_y: f32, tier: Tier) -> Vec2 {
    Vec2::new(x, game_over_y + physical_radius(tier) + DROP_CLEARANCE)
}
