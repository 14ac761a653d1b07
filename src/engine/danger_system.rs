use std::collections::HashMap;

use crate::constants::{physical_radius, GameRules};
use crate::types::{Ball, BodyId, GameOverReason, StepSnapshot};

/// Watches settled balls against the critical line and the danger band.
#[derive(Clone, Debug, Default)]
pub struct GameOverDetector {
    danger_started_at_ms: Option<u64>,
}

impl GameOverDetector {
    pub fn danger_started_at_ms(&self) -> Option<u64> {
        self.danger_started_at_ms
    }

    pub fn reset(&mut self) {
        self.danger_started_at_ms = None;
    }

    pub fn evaluate(
        &mut self,
        snapshot: &StepSnapshot,
        balls: &HashMap<BodyId, Ball>,
        rules: &GameRules,
    ) -> Option<GameOverReason> {
        let now_ms = snapshot.now_ms;
        let band_bottom = rules.game_over_y + rules.danger_height;
        let mut touching = 0usize;

        for body in &snapshot.bodies {
            let Some(ball) = balls.get(&body.id) else {
                continue;
            };
            if ball.is_fresh(now_ms, rules.spawn_grace_ms) {
                continue;
            }
            if body.speed >= rules.settling_speed {
                continue;
            }
            let top_y = body.position.y - physical_radius(ball.tier);
            if top_y < rules.game_over_y {
                return Some(GameOverReason::CriticalLine);
            }
            if top_y < band_bottom {
                touching += 1;
            }
        }

        if touching == 0 {
            self.danger_started_at_ms = None;
            return None;
        }
        match self.danger_started_at_ms {
            None => {
                self.danger_started_at_ms = Some(now_ms);
                None
            }
            Some(started) if now_ms.saturating_sub(started) >= rules.danger_touch_ms => {
                Some(GameOverReason::DangerDwell)
            }
            Some(_) => None,
        }
    }
}
