use crate::types::Tier;

pub const MAX_TIER: u8 = 10;

/// Logical radius per tier. Physics bodies use [`physical_radius`].
pub const RADII: [f32; MAX_TIER as usize + 1] =
    [9.0, 15.0, 18.0, 22.5, 30.0, 35.0, 37.0, 40.0, 45.0, 55.0, 74.0];

pub const SPRITE_DISPLAY_MULT: f32 = 2.0;

pub const WELL_WIDTH: f32 = 420.0;
pub const WELL_HEIGHT: f32 = 720.0;
pub const MIN_WELL_SIDE: f32 = 100.0;

pub const GAME_OVER_Y: f32 = 120.0;
pub const DANGER_HEIGHT: f32 = 20.0;
pub const DANGER_TOUCH_MS: u64 = 3_000;
pub const SPAWN_GRACE_MS: u64 = 900;
pub const SETTLING_SPEED: f32 = 0.15;

pub const MERGE_SCORE: u64 = 100;
pub const MERGE_COOLDOWN_MS: u64 = 90;
pub const MERGE_LIFT: f32 = 1.0;

pub const DROP_COOLDOWN_MS: u64 = 180;
pub const DROP_CLEARANCE: f32 = 10.0;

pub const EARLY_PHASE_DROPS: u32 = 4;
pub const EARLY_SPAWN_THRESHOLDS: [f64; 2] = [0.65, 0.95];
pub const STEADY_SPAWN_THRESHOLDS: [f64; 4] = [0.30, 0.60, 0.80, 0.95];

pub const LEADERBOARD_SIZE: usize = 3;
pub const MAX_NAME_CHARS: usize = 24;

pub fn radius_of(tier: Tier) -> f32 {
    RADII[tier.index()]
}

pub fn physical_radius(tier: Tier) -> f32 {
    radius_of(tier) * SPRITE_DISPLAY_MULT
}

/// Tuning knobs for a session. Defaults mirror the constants above.
#[derive(Clone, Debug)]
pub struct GameRules {
    pub well_width: f32,
    pub well_height: f32,
    pub game_over_y: f32,
    pub danger_height: f32,
    pub danger_touch_ms: u64,
    pub spawn_grace_ms: u64,
    pub settling_speed: f32,
    pub merge_score: u64,
    pub merge_cooldown_ms: u64,
    pub drop_cooldown_ms: u64,
}

impl Default for GameRules {
    fn default() -> Self {
        Self {
            well_width: WELL_WIDTH,
            well_height: WELL_HEIGHT,
            game_over_y: GAME_OVER_Y,
            danger_height: DANGER_HEIGHT,
            danger_touch_ms: DANGER_TOUCH_MS,
            spawn_grace_ms: SPAWN_GRACE_MS,
            settling_speed: SETTLING_SPEED,
            merge_score: MERGE_SCORE,
            merge_cooldown_ms: MERGE_COOLDOWN_MS,
            drop_cooldown_ms: DROP_COOLDOWN_MS,
        }
    }
}
