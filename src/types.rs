use std::collections::BTreeMap;
use std::fmt;

use serde::{Deserialize, Serialize};

use crate::constants::MAX_TIER;

/// Best score per player name.
pub type RankMap = BTreeMap<String, u64>;

#[derive(Clone, Copy, Debug, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct Tier(u8);

impl Tier {
    pub const MIN: Tier = Tier(0);
    pub const MAX: Tier = Tier(MAX_TIER);

    pub fn new(value: u8) -> Option<Self> {
        (value <= MAX_TIER).then_some(Self(value))
    }

    pub fn saturating(value: u8) -> Self {
        Self(value.min(MAX_TIER))
    }

    pub fn value(self) -> u8 {
        self.0
    }

    pub fn index(self) -> usize {
        self.0 as usize
    }

    pub fn can_merge(self) -> bool {
        self.0 < MAX_TIER
    }

    pub fn successor(self) -> Option<Self> {
        if self.can_merge() {
            Some(Self(self.0 + 1))
        } else {
            None
        }
    }
}

/// Identity of a body owned by the physics collaborator.
#[derive(Clone, Copy, Debug, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct BodyId(pub u64);

#[derive(Clone, Copy, Debug, Default, PartialEq, Serialize, Deserialize)]
pub struct Vec2 {
    pub x: f32,
    pub y: f32,
}

impl Vec2 {
    pub const ZERO: Vec2 = Vec2 { x: 0.0, y: 0.0 };

    pub fn new(x: f32, y: f32) -> Self {
        Self { x, y }
    }

    pub fn length(self) -> f32 {
        (self.x * self.x + self.y * self.y).sqrt()
    }

    pub fn midpoint(self, other: Vec2) -> Vec2 {
        Vec2::new((self.x + other.x) / 2.0, (self.y + other.y) / 2.0)
    }
}

/// Game annotation attached to a physics body.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct Ball {
    pub id: BodyId,
    pub tier: Tier,
    pub spawned_at_ms: u64,
}

impl Ball {
    pub fn is_fresh(&self, now_ms: u64, grace_ms: u64) -> bool {
        now_ms.saturating_sub(self.spawned_at_ms) < grace_ms
    }
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct CollisionEvent {
    pub body_a: BodyId,
    pub body_b: BodyId,
}

#[derive(Clone, Copy, Debug, PartialEq)]
pub struct BodySnapshot {
    pub id: BodyId,
    pub position: Vec2,
    pub speed: f32,
}

#[derive(Clone, Debug, PartialEq)]
pub struct StepSnapshot {
    pub now_ms: u64,
    pub bodies: Vec<BodySnapshot>,
}

/// Everything one physics tick reports: contacts first, then positions.
#[derive(Clone, Debug, PartialEq)]
pub struct PhysicsFrame {
    pub collisions: Vec<CollisionEvent>,
    pub snapshot: StepSnapshot,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum GameOverReason {
    CriticalLine,
    DangerDwell,
}

impl GameOverReason {
    pub fn key(self) -> &'static str {
        match self {
            GameOverReason::CriticalLine => "critical_line",
            GameOverReason::DangerDwell => "danger_dwell",
        }
    }
}

#[derive(Clone, Debug, PartialEq, Serialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum RuntimeEvent {
    BallDropped {
        #[serde(rename = "bodyId")]
        body_id: BodyId,
        tier: Tier,
        x: f32,
    },
    BallsMerged {
        #[serde(rename = "bodyId")]
        body_id: BodyId,
        tier: Tier,
        score: u64,
    },
    DangerStarted {
        #[serde(rename = "atMs")]
        at_ms: u64,
    },
    DangerCleared {
        #[serde(rename = "atMs")]
        at_ms: u64,
    },
    GameOver {
        reason: GameOverReason,
        score: u64,
    },
}

#[derive(Clone, Debug, PartialEq, Serialize)]
pub struct SessionView {
    #[serde(rename = "playerName")]
    pub player_name: String,
    pub score: u64,
    #[serde(rename = "dropsCount")]
    pub drops_count: u32,
    #[serde(rename = "nextTier")]
    pub next_tier: Tier,
    #[serde(rename = "isOver")]
    pub is_over: bool,
    #[serde(rename = "ballCount")]
    pub ball_count: usize,
}

#[derive(Clone, Debug, PartialEq, Serialize)]
pub struct GameSummary {
    #[serde(rename = "playerName")]
    pub player_name: String,
    pub score: u64,
    pub drops: u32,
    pub reason: GameOverReason,
    #[serde(rename = "highestTier")]
    pub highest_tier: Tier,
    #[serde(rename = "durationMs")]
    pub duration_ms: u64,
}

#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct RankEntry {
    pub name: String,
    pub score: u64,
}

/// One leaderboard row; `entry` is `None` for an unfilled slot.
#[derive(Clone, Debug, PartialEq, Eq, Serialize)]
pub struct RankSlot {
    pub rank: usize,
    pub entry: Option<RankEntry>,
}

impl RankSlot {
    pub fn placeholder(rank: usize) -> Self {
        Self { rank, entry: None }
    }

    pub fn is_placeholder(&self) -> bool {
        self.entry.is_none()
    }
}

impl fmt::Display for RankSlot {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match &self.entry {
            Some(entry) => write!(f, "{}. {} {}", self.rank, entry.name, entry.score),
            None => write!(f, "{}. - -", self.rank),
        }
    }
}
