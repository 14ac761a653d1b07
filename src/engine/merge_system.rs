use std::collections::HashSet;

use tracing::debug;

use super::*;

/// Body identities committed to an in-progress merge.
#[derive(Clone, Debug, Default)]
pub struct MergeLock {
    held: HashSet<BodyId>,
    releases: Vec<(u64, [BodyId; 2])>,
}

impl MergeLock {
    pub fn is_locked(&self, id: BodyId) -> bool {
        self.held.contains(&id)
    }

    pub fn len(&self) -> usize {
        self.held.len()
    }

    pub fn is_empty(&self) -> bool {
        self.held.is_empty()
    }

    /// Locks both bodies, or neither if one is already held.
    pub fn acquire(&mut self, a: BodyId, b: BodyId) -> bool {
        if a == b || self.is_locked(a) || self.is_locked(b) {
            return false;
        }
        self.held.insert(a);
        self.held.insert(b);
        true
    }

    pub fn schedule_release(&mut self, a: BodyId, b: BodyId, at_ms: u64) {
        self.releases.push((at_ms, [a, b]));
    }

    pub fn release_expired(&mut self, now_ms: u64) {
        let held = &mut self.held;
        self.releases.retain(|(at_ms, ids)| {
            if *at_ms > now_ms {
                return true;
            }
            for id in ids {
                held.remove(id);
            }
            false
        });
    }

    pub fn clear(&mut self) {
        self.held.clear();
        self.releases.clear();
    }
}

#[derive(Clone, Copy, Debug)]
pub(super) struct PendingMerge {
    a: BodyId,
    b: BodyId,
    tier: Tier,
    point: Vec2,
}

impl<W: PhysicsWorld> GameEngine<W> {
    /// Validates a contact and queues the merge. Never mutates the world.
    pub(super) fn resolve_collision(&mut self, event: CollisionEvent, now_ms: u64) -> bool {
        let (Some(a), Some(b)) = (
            self.balls.get(&event.body_a).copied(),
            self.balls.get(&event.body_b).copied(),
        ) else {
            return false;
        };
        if a.tier != b.tier || !a.tier.can_merge() {
            return false;
        }
        if !self.merge_lock.acquire(a.id, b.id) {
            return false;
        }

        let (Some(pa), Some(pb)) = (self.world.position(a.id), self.world.position(b.id)) else {
            self.merge_lock
                .schedule_release(a.id, b.id, now_ms + self.rules.merge_cooldown_ms);
            return false;
        };
        let mut point = pa.midpoint(pb);
        point.y -= MERGE_LIFT;

        self.pending_merges.push(PendingMerge {
            a: a.id,
            b: b.id,
            tier: a.tier,
            point,
        });
        true
    }

    /// Applies queued merges once the contact batch is over.
    pub fn run_deferred(&mut self, now_ms: u64) {
        self.observe_clock(now_ms);
        if self.session.is_over {
            self.pending_merges.clear();
            return;
        }
        let cooldown = self.rules.merge_cooldown_ms;
        for merge in std::mem::take(&mut self.pending_merges) {
            self.merge_lock
                .schedule_release(merge.a, merge.b, now_ms + cooldown);

            let alive = [merge.a, merge.b]
                .iter()
                .all(|id| self.world.contains(*id) && self.balls.contains_key(id));
            if !alive {
                debug!(a = merge.a.0, b = merge.b.0, "merge aborted: body already consumed");
                for id in [merge.a, merge.b] {
                    if !self.world.contains(id) {
                        self.balls.remove(&id);
                    }
                }
                continue;
            }
            let Some(tier) = merge.tier.successor() else {
                continue;
            };

            self.world.remove_body(merge.a);
            self.world.remove_body(merge.b);
            self.balls.remove(&merge.a);
            self.balls.remove(&merge.b);

            let id = self.spawn_ball(merge.point, tier, now_ms);
            self.world.set_velocity(id, Vec2::ZERO);

            self.session.score += self.rules.merge_score;
            self.highest_tier = self.highest_tier.max(tier);
            self.events.push(RuntimeEvent::BallsMerged {
                body_id: id,
                tier,
                score: self.session.score,
            });
        }
    }
}
