use std::collections::HashMap;

use tracing::info;

use crate::constants::{physical_radius, GameRules, MERGE_LIFT, MIN_WELL_SIDE};
use crate::rng::Rng;
use crate::server_utils::sanitize_player_name;
use crate::types::{
    Ball, BodyId, CollisionEvent, GameOverReason, GameSummary, PhysicsFrame, RuntimeEvent,
    SessionView, StepSnapshot, Tier, Vec2,
};
use crate::world::PhysicsWorld;

mod danger_system;
mod merge_system;
mod spawn_system;
mod utils;

pub use self::danger_system::GameOverDetector;
pub use self::merge_system::MergeLock;
pub use self::spawn_system::next_spawn_tier;

use self::merge_system::PendingMerge;
use self::utils::{clamp_preview_x, drop_origin};

#[derive(Clone, Debug)]
pub struct GameEngineOptions {
    pub rules: GameRules,
    pub seed: u32,
}

impl Default for GameEngineOptions {
    fn default() -> Self {
        Self {
            rules: GameRules::default(),
            seed: 1,
        }
    }
}

#[derive(Clone, Debug)]
struct Session {
    player_name: String,
    score: u64,
    drops_count: u32,
    next_tier: Tier,
    is_over: bool,
}

/// Game semantics on top of a physics collaborator: drops, merges,
/// scoring and the one-shot game-over transition.
pub struct GameEngine<W: PhysicsWorld> {
    pub rules: GameRules,

    world: W,
    rng: Rng,
    session: Session,
    balls: HashMap<BodyId, Ball>,
    merge_lock: MergeLock,
    pending_merges: Vec<PendingMerge>,
    detector: GameOverDetector,
    events: Vec<RuntimeEvent>,

    width: f32,
    height: f32,
    preview_x: f32,
    drop_ready_at_ms: u64,
    started_at_ms: u64,
    clock_ms: u64,
    highest_tier: Tier,
    end_reason: Option<GameOverReason>,
    summary: Option<GameSummary>,
}

impl<W: PhysicsWorld> GameEngine<W> {
    pub fn new(player_name: &str, world: W, started_at_ms: u64, options: GameEngineOptions) -> Self {
        let GameEngineOptions { rules, seed } = options;
        let mut rng = Rng::new(seed);
        let next_tier = next_spawn_tier(0, &mut rng);
        let width = rules.well_width.max(MIN_WELL_SIDE);
        let height = rules.well_height.max(MIN_WELL_SIDE);

        let mut engine = Self {
            rules,
            world,
            rng,
            session: Session {
                player_name: sanitize_player_name(player_name),
                score: 0,
                drops_count: 0,
                next_tier,
                is_over: false,
            },
            balls: HashMap::new(),
            merge_lock: MergeLock::default(),
            pending_merges: Vec::new(),
            detector: GameOverDetector::default(),
            events: Vec::new(),
            width,
            height,
            preview_x: width / 2.0,
            drop_ready_at_ms: started_at_ms,
            started_at_ms,
            clock_ms: started_at_ms,
            highest_tier: Tier::MIN,
            end_reason: None,
            summary: None,
        };
        engine.world.rebuild_bounds(width, height);
        engine
    }

    pub fn is_over(&self) -> bool {
        self.session.is_over
    }

    pub fn score(&self) -> u64 {
        self.session.score
    }

    pub fn player_name(&self) -> &str {
        &self.session.player_name
    }

    pub fn next_tier(&self) -> Tier {
        self.session.next_tier
    }

    pub fn end_reason(&self) -> Option<GameOverReason> {
        self.end_reason
    }

    pub fn preview_x(&self) -> f32 {
        self.preview_x
    }

    pub fn bounds(&self) -> (f32, f32) {
        (self.width, self.height)
    }

    pub fn ball(&self, id: BodyId) -> Option<&Ball> {
        self.balls.get(&id)
    }

    pub fn ball_count(&self) -> usize {
        self.balls.len()
    }

    pub fn merge_lock(&self) -> &MergeLock {
        &self.merge_lock
    }

    pub fn danger_started_at_ms(&self) -> Option<u64> {
        self.detector.danger_started_at_ms()
    }

    pub fn world(&self) -> &W {
        &self.world
    }

    pub fn world_mut(&mut self) -> &mut W {
        &mut self.world
    }

    pub fn view(&self) -> SessionView {
        SessionView {
            player_name: self.session.player_name.clone(),
            score: self.session.score,
            drops_count: self.session.drops_count,
            next_tier: self.session.next_tier,
            is_over: self.session.is_over,
            ball_count: self.balls.len(),
        }
    }

    pub fn drain_events(&mut self) -> Vec<RuntimeEvent> {
        std::mem::take(&mut self.events)
    }

    /// Final summary, handed out once after the session ends.
    pub fn take_summary(&mut self) -> Option<GameSummary> {
        self.summary.take()
    }

    pub fn move_preview(&mut self, x: f32) {
        if self.session.is_over {
            return;
        }
        self.preview_x = clamp_preview_x(x, self.width, self.session.next_tier);
    }

    pub fn can_drop(&self, now_ms: u64) -> bool {
        !self.session.is_over && now_ms >= self.drop_ready_at_ms
    }

    pub fn drop_next(&mut self, now_ms: u64) -> Option<BodyId> {
        if !self.can_drop(now_ms) {
            return None;
        }
        self.observe_clock(now_ms);

        let tier = self.session.next_tier;
        let x = clamp_preview_x(self.preview_x, self.width, tier);
        let id = self.spawn_ball(drop_origin(x, self.rules.game_over_y, tier), tier, now_ms);
        self.session.drops_count += 1;
        self.session.next_tier = next_spawn_tier(self.session.drops_count, &mut self.rng);
        self.drop_ready_at_ms = now_ms + self.rules.drop_cooldown_ms;
        self.events.push(RuntimeEvent::BallDropped {
            body_id: id,
            tier,
            x,
        });
        Some(id)
    }

    pub fn resize(&mut self, width: f32, height: f32) {
        self.width = width.max(MIN_WELL_SIDE);
        self.height = height.max(MIN_WELL_SIDE);
        self.preview_x = clamp_preview_x(self.preview_x, self.width, self.session.next_tier);
        self.world.rebuild_bounds(self.width, self.height);
    }

    /// Contact batch of one physics step. Merges are only queued here.
    pub fn handle_collisions(&mut self, events: &[CollisionEvent], now_ms: u64) -> usize {
        self.observe_clock(now_ms);
        if self.session.is_over {
            return 0;
        }
        self.merge_lock.release_expired(now_ms);
        events
            .iter()
            .filter(|event| self.resolve_collision(**event, now_ms))
            .count()
    }

    /// Post-step positions. Returns the reason if this step ended the session.
    pub fn handle_step(&mut self, snapshot: &StepSnapshot) -> Option<GameOverReason> {
        self.observe_clock(snapshot.now_ms);
        if self.session.is_over {
            return None;
        }
        let was_in_danger = self.detector.danger_started_at_ms().is_some();
        let verdict = self.detector.evaluate(snapshot, &self.balls, &self.rules);
        match (was_in_danger, self.detector.danger_started_at_ms()) {
            (false, Some(at_ms)) => self.events.push(RuntimeEvent::DangerStarted { at_ms }),
            (true, None) => self.events.push(RuntimeEvent::DangerCleared {
                at_ms: snapshot.now_ms,
            }),
            _ => {}
        }
        if let Some(reason) = verdict {
            self.end_game(reason, snapshot.now_ms);
        }
        verdict
    }

    /// Feeds one full tick: contacts, positions, then the deferred merges.
    pub fn advance(&mut self, frame: &PhysicsFrame) -> Option<GameOverReason> {
        let now_ms = frame.snapshot.now_ms;
        self.handle_collisions(&frame.collisions, now_ms);
        let ended = self.handle_step(&frame.snapshot);
        self.run_deferred(now_ms);
        ended
    }

    pub fn restart(&mut self, now_ms: u64) {
        for id in self.balls.keys() {
            self.world.remove_body(*id);
        }
        self.balls.clear();
        self.merge_lock.clear();
        self.pending_merges.clear();
        self.detector.reset();
        self.events.clear();

        self.session.score = 0;
        self.session.drops_count = 0;
        self.session.next_tier = next_spawn_tier(0, &mut self.rng);
        self.session.is_over = false;

        self.preview_x = self.width / 2.0;
        self.drop_ready_at_ms = now_ms;
        self.started_at_ms = now_ms;
        self.clock_ms = now_ms;
        self.highest_tier = Tier::MIN;
        self.end_reason = None;
        self.summary = None;
        self.world.rebuild_bounds(self.width, self.height);
        self.world.resume();
    }

    fn spawn_ball(&mut self, position: Vec2, tier: Tier, now_ms: u64) -> BodyId {
        let id = self.world.add_ball(position, physical_radius(tier));
        self.balls.insert(
            id,
            Ball {
                id,
                tier,
                spawned_at_ms: now_ms,
            },
        );
        self.highest_tier = self.highest_tier.max(tier);
        id
    }

    fn end_game(&mut self, reason: GameOverReason, now_ms: u64) {
        if self.session.is_over {
            return;
        }
        self.session.is_over = true;
        self.end_reason = Some(reason);
        self.pending_merges.clear();
        self.world.halt();

        self.events.push(RuntimeEvent::GameOver {
            reason,
            score: self.session.score,
        });
        self.summary = Some(GameSummary {
            player_name: self.session.player_name.clone(),
            score: self.session.score,
            drops: self.session.drops_count,
            reason,
            highest_tier: self.highest_tier,
            duration_ms: now_ms.saturating_sub(self.started_at_ms),
        });
        info!(
            player = %self.session.player_name,
            score = self.session.score,
            reason = reason.key(),
            "session ended"
        );
    }

    fn observe_clock(&mut self, now_ms: u64) {
        self.clock_ms = self.clock_ms.max(now_ms);
    }

    pub fn clock_ms(&self) -> u64 {
        self.clock_ms
    }

    #[cfg(test)]
    fn place_ball(&mut self, tier: Tier, position: Vec2, now_ms: u64) -> BodyId {
        self.spawn_ball(position, tier, now_ms)
    }
}

#[cfg(test)]
mod tests {
    use crate::constants::{physical_radius, GameRules, DROP_COOLDOWN_MS, MERGE_COOLDOWN_MS};
    use crate::engine::{GameEngine, GameEngineOptions};
    use crate::types::{
        BodyId, BodySnapshot, CollisionEvent, GameOverReason, PhysicsFrame, RuntimeEvent,
        StepSnapshot, Tier, Vec2,
    };
    use crate::world::{PhysicsWorld, SandboxWorld};

    fn make_engine() -> GameEngine<SandboxWorld> {
        GameEngine::new(
            "Ana",
            SandboxWorld::new(420.0, 720.0),
            0,
            GameEngineOptions {
                rules: GameRules::default(),
                seed: 4_242,
            },
        )
    }

    fn tier(value: u8) -> Tier {
        Tier::new(value).expect("tier in range")
    }

    fn contact(a: BodyId, b: BodyId) -> CollisionEvent {
        CollisionEvent { body_a: a, body_b: b }
    }

    fn settled(id: BodyId, y: f32) -> BodySnapshot {
        BodySnapshot {
            id,
            position: Vec2::new(200.0, y),
            speed: 0.0,
        }
    }

    fn step(engine: &mut GameEngine<SandboxWorld>, now_ms: u64, bodies: Vec<BodySnapshot>) {
        engine.handle_step(&StepSnapshot { now_ms, bodies });
    }

    fn tiers_on_board(engine: &GameEngine<SandboxWorld>) -> Vec<u8> {
        let mut tiers: Vec<u8> = engine.balls.values().map(|b| b.tier.value()).collect();
        tiers.sort_unstable();
        tiers
    }

    #[test]
    fn same_tier_pair_merges_into_one_successor() {
        for value in 0..Tier::MAX.value() {
            let mut engine = make_engine();
            let a = engine.place_ball(tier(value), Vec2::new(100.0, 600.0), 0);
            let b = engine.place_ball(tier(value), Vec2::new(140.0, 600.0), 0);

            assert_eq!(engine.handle_collisions(&[contact(a, b)], 16), 1);
            assert_eq!(engine.ball_count(), 2, "merge must wait for the drain");
            engine.run_deferred(16);

            assert_eq!(tiers_on_board(&engine), vec![value + 1]);
            assert!(!engine.world().contains(a));
            assert!(!engine.world().contains(b));
            assert_eq!(engine.score(), 100);
        }
    }

    #[test]
    fn successor_spawns_at_lifted_midpoint_with_zero_velocity() {
        let mut engine = make_engine();
        let a = engine.place_ball(tier(2), Vec2::new(100.0, 600.0), 0);
        let b = engine.place_ball(tier(2), Vec2::new(160.0, 620.0), 0);
        engine.world_mut().set_velocity(a, Vec2::new(3.0, 3.0));

        engine.handle_collisions(&[contact(a, b)], 50);
        engine.run_deferred(50);

        let events = engine.drain_events();
        let Some(RuntimeEvent::BallsMerged { body_id, tier: merged, score }) = events.last() else {
            panic!("expected merge event, got {events:?}");
        };
        assert_eq!(*merged, tier(3));
        assert_eq!(*score, 100);
        assert_eq!(engine.world().position(*body_id), Some(Vec2::new(130.0, 609.0)));
        assert_eq!(engine.world().speed(*body_id), Some(0.0));
        assert_eq!(engine.ball(*body_id).map(|b| b.spawned_at_ms), Some(50));
    }

    #[test]
    fn max_tier_pair_never_merges() {
        let mut engine = make_engine();
        let a = engine.place_ball(Tier::MAX, Vec2::new(100.0, 500.0), 0);
        let b = engine.place_ball(Tier::MAX, Vec2::new(250.0, 500.0), 0);

        assert_eq!(engine.handle_collisions(&[contact(a, b)], 16), 0);
        engine.run_deferred(16);

        assert_eq!(engine.ball_count(), 2);
        assert_eq!(engine.score(), 0);
        assert!(engine.merge_lock().is_empty());
    }

    #[test]
    fn different_tiers_and_walls_are_ignored() {
        let mut engine = make_engine();
        let a = engine.place_ball(tier(1), Vec2::new(100.0, 600.0), 0);
        let b = engine.place_ball(tier(2), Vec2::new(150.0, 600.0), 0);
        let wall = BodyId(9_999);

        let accepted = engine.handle_collisions(&[contact(a, b), contact(a, wall)], 16);
        engine.run_deferred(16);

        assert_eq!(accepted, 0);
        assert_eq!(tiers_on_board(&engine), vec![1, 2]);
        assert_eq!(engine.score(), 0);
    }

    #[test]
    fn duplicate_contact_before_cooldown_merges_once() {
        let mut engine = make_engine();
        let a = engine.place_ball(tier(0), Vec2::new(100.0, 600.0), 0);
        let b = engine.place_ball(tier(0), Vec2::new(130.0, 600.0), 0);

        assert_eq!(engine.handle_collisions(&[contact(a, b), contact(b, a)], 16), 1);
        engine.run_deferred(16);
        assert_eq!(engine.handle_collisions(&[contact(a, b)], 32), 0);
        engine.run_deferred(32);

        assert_eq!(tiers_on_board(&engine), vec![1]);
        assert_eq!(engine.score(), 100);
    }

    #[test]
    fn stale_contact_after_cooldown_is_a_no_op() {
        let mut engine = make_engine();
        let a = engine.place_ball(tier(0), Vec2::new(100.0, 600.0), 0);
        let b = engine.place_ball(tier(0), Vec2::new(130.0, 600.0), 0);
        engine.handle_collisions(&[contact(a, b)], 16);
        engine.run_deferred(16);

        let later = 16 + MERGE_COOLDOWN_MS;
        assert_eq!(engine.handle_collisions(&[contact(a, b)], later), 0);
        engine.run_deferred(later);

        assert!(engine.merge_lock().is_empty());
        assert_eq!(engine.ball_count(), 1);
        assert_eq!(engine.score(), 100);
    }

    #[test]
    fn chain_of_three_same_tier_merges_only_one_pair() {
        let mut engine = make_engine();
        let a = engine.place_ball(tier(1), Vec2::new(100.0, 600.0), 0);
        let b = engine.place_ball(tier(1), Vec2::new(130.0, 600.0), 0);
        let c = engine.place_ball(tier(1), Vec2::new(115.0, 575.0), 0);

        let accepted =
            engine.handle_collisions(&[contact(a, b), contact(b, c), contact(a, c)], 16);
        engine.run_deferred(16);

        assert_eq!(accepted, 1);
        assert_eq!(tiers_on_board(&engine), vec![1, 2]);
        assert!(engine.world().contains(c));
        assert_eq!(engine.score(), 100);
    }

    #[test]
    fn merge_aborts_when_body_vanished_before_drain() {
        let mut engine = make_engine();
        let a = engine.place_ball(tier(0), Vec2::new(100.0, 600.0), 0);
        let b = engine.place_ball(tier(0), Vec2::new(130.0, 600.0), 0);

        engine.handle_collisions(&[contact(a, b)], 16);
        engine.world_mut().remove_body(b);
        engine.run_deferred(16);

        assert_eq!(engine.score(), 0);
        assert!(engine.world().contains(a));
        assert!(engine.merge_lock().is_locked(a));
        assert!(engine.merge_lock().is_locked(b));

        engine.handle_collisions(&[], 16 + MERGE_COOLDOWN_MS);
        assert!(engine.merge_lock().is_empty());
    }

    #[test]
    fn critical_line_ends_session_for_settled_ball_only() {
        let mut engine = make_engine();
        let id = engine.place_ball(tier(0), Vec2::new(200.0, 130.0), 0);
        let top_above_line = 120.0 + physical_radius(tier(0)) - 1.0;

        step(&mut engine, 899, vec![settled(id, top_above_line)]);
        assert!(!engine.is_over(), "fresh ball must be exempt");

        step(
            &mut engine,
            1_000,
            vec![BodySnapshot {
                speed: 4.0,
                ..settled(id, top_above_line)
            }],
        );
        assert!(!engine.is_over(), "bouncing ball must be exempt");

        step(&mut engine, 1_016, vec![settled(id, top_above_line)]);
        assert!(engine.is_over());
        assert_eq!(engine.end_reason(), Some(GameOverReason::CriticalLine));
        assert!(!engine.world().is_running());
    }

    #[test]
    fn danger_dwell_ends_session_after_three_seconds() {
        let mut engine = make_engine();
        let id = engine.place_ball(tier(0), Vec2::new(200.0, 150.0), 0);
        let in_band = 150.0;

        step(&mut engine, 1_000, vec![settled(id, in_band)]);
        assert_eq!(engine.danger_started_at_ms(), Some(1_000));
        step(&mut engine, 3_999, vec![settled(id, in_band)]);
        assert!(!engine.is_over());
        step(&mut engine, 4_000, vec![settled(id, in_band)]);

        assert!(engine.is_over());
        assert_eq!(engine.end_reason(), Some(GameOverReason::DangerDwell));
    }

    #[test]
    fn danger_clock_restarts_after_band_empties() {
        let mut engine = make_engine();
        let id = engine.place_ball(tier(0), Vec2::new(200.0, 150.0), 0);
        let in_band = 150.0;
        let below_band = 400.0;

        step(&mut engine, 1_000, vec![settled(id, in_band)]);
        step(&mut engine, 3_999, vec![settled(id, below_band)]);
        assert_eq!(engine.danger_started_at_ms(), None);

        step(&mut engine, 4_100, vec![settled(id, in_band)]);
        assert_eq!(engine.danger_started_at_ms(), Some(4_100));
        step(&mut engine, 7_099, vec![settled(id, in_band)]);
        assert!(!engine.is_over());
        step(&mut engine, 7_100, vec![settled(id, in_band)]);
        assert!(engine.is_over());

        let kinds: Vec<&'static str> = engine
            .drain_events()
            .iter()
            .map(|event| match event {
                RuntimeEvent::DangerStarted { .. } => "start",
                RuntimeEvent::DangerCleared { .. } => "clear",
                RuntimeEvent::GameOver { .. } => "over",
                _ => "other",
            })
            .collect();
        assert_eq!(kinds, vec!["start", "clear", "start", "over"]);
    }

    #[test]
    fn game_over_is_terminal_and_summarised_once() {
        let mut engine = make_engine();
        let a = engine.place_ball(tier(0), Vec2::new(200.0, 110.0), 0);
        let b = engine.place_ball(tier(0), Vec2::new(240.0, 600.0), 0);

        engine.handle_collisions(&[contact(a, b)], 1_000);
        step(&mut engine, 1_000, vec![settled(a, 110.0)]);
        engine.run_deferred(1_000);

        assert!(engine.is_over());
        assert_eq!(engine.score(), 0, "queued merge dropped at game over");
        let summary = engine.take_summary().expect("summary after game over");
        assert_eq!(summary.player_name, "Ana");
        assert_eq!(summary.reason, GameOverReason::CriticalLine);
        assert_eq!(summary.duration_ms, 1_000);
        assert!(engine.take_summary().is_none());

        step(&mut engine, 9_000, vec![settled(a, 110.0)]);
        assert_eq!(engine.handle_collisions(&[contact(a, b)], 9_000), 0);
        assert_eq!(engine.drop_next(9_000), None);
        let game_overs = engine
            .drain_events()
            .into_iter()
            .filter(|event| matches!(event, RuntimeEvent::GameOver { .. }))
            .count();
        assert_eq!(game_overs, 1);
    }

    #[test]
    fn drop_respects_cooldown_and_advances_spawn_state() {
        let mut engine = make_engine();
        let first_tier = engine.next_tier();
        engine.move_preview(5.0);

        let id = engine.drop_next(0).expect("first drop accepted");
        let ball = *engine.ball(id).expect("dropped ball tracked");
        assert_eq!(ball.tier, first_tier);
        assert_eq!(ball.spawned_at_ms, 0);
        let margin = physical_radius(first_tier) + 4.0;
        let position = engine.world().position(id).expect("body exists");
        assert_eq!(position.x, margin);
        assert_eq!(position.y, 120.0 + physical_radius(first_tier) + 10.0);

        assert_eq!(engine.drop_next(DROP_COOLDOWN_MS - 1), None);
        assert!(engine.drop_next(DROP_COOLDOWN_MS).is_some());
        assert_eq!(engine.view().drops_count, 2);
        assert!(engine.next_tier().value() <= 2);
    }

    #[test]
    fn spawn_tiers_stay_in_early_range_for_first_four_drops() {
        let mut engine = make_engine();
        for drop in 0..4u64 {
            assert!(engine.next_tier().value() <= 2);
            engine
                .drop_next(drop * DROP_COOLDOWN_MS)
                .expect("drop accepted");
        }
        assert!(engine.next_tier().value() <= 4);
    }

    #[test]
    fn restart_clears_board_and_resumes_world() {
        let mut engine = make_engine();
        let a = engine.place_ball(tier(0), Vec2::new(200.0, 110.0), 0);
        step(&mut engine, 1_000, vec![settled(a, 110.0)]);
        assert!(engine.is_over());

        engine.restart(2_000);

        assert!(!engine.is_over());
        assert_eq!(engine.ball_count(), 0);
        assert_eq!(engine.world().body_count(), 0);
        assert!(engine.world().is_running());
        assert_eq!(engine.view().player_name, "Ana");
        assert_eq!(engine.score(), 0);
        assert!(engine.drop_next(2_000).is_some());
    }

    #[test]
    fn resize_clamps_dimensions_and_rebuilds_bounds() {
        let mut engine = make_engine();
        engine.resize(40.0, 300.0);
        assert_eq!(engine.bounds(), (100.0, 300.0));
        assert_eq!(engine.world().bounds(), (100.0, 300.0));
    }

    #[test]
    fn advance_runs_merges_after_the_step_snapshot() {
        let mut engine = make_engine();
        let a = engine.place_ball(tier(0), Vec2::new(100.0, 600.0), 0);
        let b = engine.place_ball(tier(0), Vec2::new(130.0, 600.0), 0);
        let frame = PhysicsFrame {
            collisions: vec![contact(a, b)],
            snapshot: StepSnapshot {
                now_ms: 2_000,
                bodies: vec![settled(a, 600.0), settled(b, 600.0)],
            },
        };

        assert_eq!(engine.advance(&frame), None);
        assert_eq!(tiers_on_board(&engine), vec![1]);
        assert_eq!(engine.clock_ms(), 2_000);
    }
}
