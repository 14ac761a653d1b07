use std::sync::Arc;

use serde::Serialize;
use tracing::{debug, info};

use crate::constants::LEADERBOARD_SIZE;
use crate::engine::GameEngine;
use crate::kv_store::KeyValueStore;
use crate::rank_remote::RemoteRanking;
use crate::ranking_store::{RankingStore, UpsertOutcome};
use crate::types::{BodyId, GameSummary, PhysicsFrame, RankSlot};
use crate::world::PhysicsWorld;

#[derive(Clone, Debug, PartialEq, Serialize)]
pub struct GameOverReport {
    pub summary: GameSummary,
    #[serde(skip)]
    pub submitted: UpsertOutcome,
    pub leaderboard: Vec<RankSlot>,
}

/// Drives one player's sessions and reports the final score exactly once per session.
pub struct SessionController<W: PhysicsWorld, R, S> {
    engine: GameEngine<W>,
    ranking: Arc<RankingStore<R, S>>,
    leaderboard: Vec<RankSlot>,
}

impl<W, R, S> SessionController<W, R, S>
where
    W: PhysicsWorld,
    R: RemoteRanking,
    S: KeyValueStore,
{
    pub async fn start(engine: GameEngine<W>, ranking: Arc<RankingStore<R, S>>) -> Self {
        let mut controller = Self {
            engine,
            ranking,
            leaderboard: Vec::new(),
        };
        controller.refresh_leaderboard().await;
        controller
    }

    pub fn engine(&self) -> &GameEngine<W> {
        &self.engine
    }

    pub fn engine_mut(&mut self) -> &mut GameEngine<W> {
        &mut self.engine
    }

    pub fn ranking(&self) -> &RankingStore<R, S> {
        &self.ranking
    }

    pub fn leaderboard(&self) -> &[RankSlot] {
        &self.leaderboard
    }

    pub fn move_preview(&mut self, x: f32) {
        self.engine.move_preview(x);
    }

    pub fn drop_next(&mut self, now_ms: u64) -> Option<BodyId> {
        self.engine.drop_next(now_ms)
    }

    /// Pumps one physics frame. Returns the report on the frame that ended the session.
    pub async fn advance(&mut self, frame: &PhysicsFrame) -> Option<GameOverReport> {
        self.engine.advance(frame);
        let summary = self.engine.take_summary()?;

        let submitted = self
            .ranking
            .upsert_best(&summary.player_name, summary.score)
            .await;
        debug!(?submitted, "[session] final score submitted");
        self.refresh_leaderboard().await;
        info!(
            player = %summary.player_name,
            score = summary.score,
            reason = summary.reason.key(),
            "[session] game over reported"
        );
        Some(GameOverReport {
            summary,
            submitted,
            leaderboard: self.leaderboard.clone(),
        })
    }

    pub async fn refresh_leaderboard(&mut self) -> &[RankSlot] {
        self.leaderboard = self.ranking.top_n(LEADERBOARD_SIZE).await;
        &self.leaderboard
    }

    pub fn restart(&mut self, now_ms: u64) {
        self.engine.restart(now_ms);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::constants::WELL_HEIGHT;
    use crate::engine::GameEngineOptions;
    use crate::kv_store::MemoryStore;
    use crate::rank_remote::NoRemote;
    use crate::types::{GameOverReason, RuntimeEvent, Vec2};
    use crate::world::SandboxWorld;

    type Controller = SessionController<SandboxWorld, NoRemote, MemoryStore>;

    fn ranking() -> Arc<RankingStore<NoRemote, MemoryStore>> {
        Arc::new(RankingStore::new(NoRemote, MemoryStore::new(), "local"))
    }

    fn engine(name: &str) -> GameEngine<SandboxWorld> {
        let options = GameEngineOptions::default();
        let world = SandboxWorld::new(options.rules.well_width, options.rules.well_height);
        GameEngine::new(name, world, 0, options)
    }

    /// Parks a dropped ball above the critical line and pumps until the session ends.
    async fn force_critical_end(controller: &mut Controller) -> GameOverReport {
        let now = controller.engine().world().now_ms();
        let id = controller.drop_next(now).expect("drop accepted");
        let mut report = None;
        for _ in 0..200 {
            let world = controller.engine_mut().world_mut();
            world.teleport(id, Vec2::new(210.0, 20.0));
            world.set_velocity(id, Vec2::ZERO);
            let Some(mut frame) = world.step() else {
                break;
            };
            for body in &mut frame.snapshot.bodies {
                if body.id == id {
                    body.position = Vec2::new(210.0, 20.0);
                    body.speed = 0.0;
                }
            }
            if let Some(found) = controller.advance(&frame).await {
                report = Some(found);
                break;
            }
        }
        report.expect("session should end")
    }

    #[tokio::test]
    async fn start_loads_placeholder_leaderboard() {
        let controller = Controller::start(engine("Ana"), ranking()).await;
        assert_eq!(controller.leaderboard().len(), LEADERBOARD_SIZE);
        assert!(controller.leaderboard().iter().all(RankSlot::is_placeholder));
    }

    #[tokio::test]
    async fn game_over_submits_once_and_refreshes_top_three() {
        let ranking = ranking();
        ranking.upsert_best("Bo", 700).await;
        let mut controller = Controller::start(engine("Ana"), ranking.clone()).await;
        assert_eq!(controller.leaderboard()[0].entry.as_ref().map(|e| e.score), Some(700));

        let report = force_critical_end(&mut controller).await;
        assert_eq!(report.summary.reason, GameOverReason::CriticalLine);
        assert_eq!(report.summary.player_name, "Ana");
        assert_eq!(report.submitted, UpsertOutcome::Local { updated: true });
        let names: Vec<_> = report
            .leaderboard
            .iter()
            .filter_map(|slot| slot.entry.as_ref().map(|entry| entry.name.clone()))
            .collect();
        assert_eq!(names, vec!["Bo".to_string(), "Ana".to_string()]);
        assert!(report.leaderboard[2].is_placeholder());

        let events = controller.engine_mut().drain_events();
        let game_overs = events
            .iter()
            .filter(|event| matches!(event, RuntimeEvent::GameOver { .. }))
            .count();
        assert_eq!(game_overs, 1);

        // The world is halted; no further frames and no second report.
        assert!(controller.engine_mut().world_mut().step().is_none());
        let empty = PhysicsFrame {
            collisions: Vec::new(),
            snapshot: crate::types::StepSnapshot {
                now_ms: 999_999,
                bodies: Vec::new(),
            },
        };
        assert!(controller.advance(&empty).await.is_none());
    }

    #[tokio::test]
    async fn restart_allows_a_second_report() {
        let mut controller = Controller::start(engine("Ana"), ranking()).await;
        force_critical_end(&mut controller).await;
        assert!(controller.drop_next(u64::MAX / 2).is_none());

        let now = controller.engine().world().now_ms();
        controller.restart(now);
        assert!(!controller.engine().is_over());
        assert_eq!(controller.engine().score(), 0);
        assert_eq!(controller.engine().player_name(), "Ana");

        let report = force_critical_end(&mut controller).await;
        assert_eq!(report.summary.score, 0);
    }

    #[tokio::test]
    async fn anonymous_sessions_are_ranked_under_default_name() {
        let mut controller = Controller::start(engine("   "), ranking()).await;
        let report = force_critical_end(&mut controller).await;
        assert_eq!(report.summary.player_name, "Anonymous");
        assert_eq!(
            report.leaderboard[0].entry.as_ref().map(|e| e.name.as_str()),
            Some("Anonymous")
        );
    }

    #[tokio::test]
    async fn well_height_default_is_applied_to_sandbox() {
        let controller = Controller::start(engine("Ana"), ranking()).await;
        assert_eq!(controller.engine().world().bounds().1, WELL_HEIGHT);
    }
}
