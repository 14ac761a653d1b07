use std::collections::{BTreeMap, HashSet};

use crate::types::{BodyId, BodySnapshot, CollisionEvent, PhysicsFrame, StepSnapshot, Vec2};

/// Commands the game core issues to the physics collaborator.
pub trait PhysicsWorld {
    fn add_ball(&mut self, position: Vec2, radius: f32) -> BodyId;
    fn remove_body(&mut self, id: BodyId) -> bool;
    fn set_velocity(&mut self, id: BodyId, velocity: Vec2);
    fn contains(&self, id: BodyId) -> bool;
    fn position(&self, id: BodyId) -> Option<Vec2>;
    fn rebuild_bounds(&mut self, width: f32, height: f32);
    fn halt(&mut self);
    fn resume(&mut self);
}

pub const SANDBOX_STEP_MS: u64 = 16;

const GRAVITY: f32 = 0.28;
const AIR_FRICTION: f32 = 0.002;
const FLOOR_FRICTION: f32 = 0.82;
const SOLVER_ITERATIONS: usize = 6;
const CONTACT_SLOP: f32 = 0.5;
const SLEEP_SPEED: f32 = 0.05;

#[derive(Clone, Debug)]
struct SandboxBody {
    position: Vec2,
    velocity: Vec2,
    radius: f32,
}

/// Small deterministic circle world: gravity, a floor, two walls and
/// overlap push-out. Good enough to drive sessions headlessly.
#[derive(Clone, Debug)]
pub struct SandboxWorld {
    bodies: BTreeMap<BodyId, SandboxBody>,
    contacts: HashSet<(BodyId, BodyId)>,
    next_id: u64,
    width: f32,
    height: f32,
    now_ms: u64,
    running: bool,
}

impl SandboxWorld {
    pub fn new(width: f32, height: f32) -> Self {
        Self {
            bodies: BTreeMap::new(),
            contacts: HashSet::new(),
            next_id: 1,
            width,
            height,
            now_ms: 0,
            running: true,
        }
    }

    pub fn now_ms(&self) -> u64 {
        self.now_ms
    }

    pub fn is_running(&self) -> bool {
        self.running
    }

    pub fn body_count(&self) -> usize {
        self.bodies.len()
    }

    pub fn bounds(&self) -> (f32, f32) {
        (self.width, self.height)
    }

    pub fn speed(&self, id: BodyId) -> Option<f32> {
        self.bodies.get(&id).map(|body| body.velocity.length())
    }

    /// Places a body directly, bypassing integration. Used to stage scenes.
    pub fn teleport(&mut self, id: BodyId, position: Vec2) -> bool {
        let Some(body) = self.bodies.get_mut(&id) else {
            return false;
        };
        body.position = position;
        true
    }

    /// Advances one fixed step. Returns `None` while halted.
    pub fn step(&mut self) -> Option<PhysicsFrame> {
        if !self.running {
            return None;
        }
        self.now_ms += SANDBOX_STEP_MS;

        for body in self.bodies.values_mut() {
            body.velocity.y += GRAVITY;
            body.velocity.x *= 1.0 - AIR_FRICTION;
            body.velocity.y *= 1.0 - AIR_FRICTION;
            body.position.x += body.velocity.x;
            body.position.y += body.velocity.y;
        }

        let ids: Vec<BodyId> = self.bodies.keys().copied().collect();
        for _ in 0..SOLVER_ITERATIONS {
            for (i, &a) in ids.iter().enumerate() {
                for &b in &ids[i + 1..] {
                    self.separate(a, b);
                }
            }
            for id in &ids {
                self.clamp_to_bounds(*id);
            }
        }

        for body in self.bodies.values_mut() {
            if body.velocity.length() < SLEEP_SPEED {
                body.velocity = Vec2::ZERO;
            }
        }

        let collisions = self.detect_new_contacts(&ids);
        let bodies = self
            .bodies
            .iter()
            .map(|(id, body)| BodySnapshot {
                id: *id,
                position: body.position,
                speed: body.velocity.length(),
            })
            .collect();

        Some(PhysicsFrame {
            collisions,
            snapshot: StepSnapshot {
                now_ms: self.now_ms,
                bodies,
            },
        })
    }

    fn separate(&mut self, a: BodyId, b: BodyId) {
        let (Some(body_a), Some(body_b)) = (self.bodies.get(&a), self.bodies.get(&b)) else {
            return;
        };
        let dx = body_b.position.x - body_a.position.x;
        let dy = body_b.position.y - body_a.position.y;
        let dist = (dx * dx + dy * dy).sqrt();
        let overlap = body_a.radius + body_b.radius - dist;
        if overlap <= 0.0 {
            return;
        }
        let normal = if dist > 1e-4 {
            Vec2::new(dx / dist, dy / dist)
        } else {
            Vec2::new(1.0, 0.0)
        };
        let relative = Vec2::new(
            body_b.velocity.x - body_a.velocity.x,
            body_b.velocity.y - body_a.velocity.y,
        );
        let approach = relative.x * normal.x + relative.y * normal.y;
        let push = overlap / 2.0;
        let impulse = if approach < 0.0 { -approach / 2.0 } else { 0.0 };

        if let Some(body) = self.bodies.get_mut(&a) {
            body.position.x -= normal.x * push;
            body.position.y -= normal.y * push;
            body.velocity.x -= normal.x * impulse;
            body.velocity.y -= normal.y * impulse;
        }
        if let Some(body) = self.bodies.get_mut(&b) {
            body.position.x += normal.x * push;
            body.position.y += normal.y * push;
            body.velocity.x += normal.x * impulse;
            body.velocity.y += normal.y * impulse;
        }
    }

    fn clamp_to_bounds(&mut self, id: BodyId) {
        let (width, height) = (self.width, self.height);
        let Some(body) = self.bodies.get_mut(&id) else {
            return;
        };
        if body.position.y + body.radius > height {
            body.position.y = height - body.radius;
            body.velocity.y = body.velocity.y.min(0.0);
            body.velocity.x *= FLOOR_FRICTION;
        }
        if body.position.x - body.radius < 0.0 {
            body.position.x = body.radius;
            body.velocity.x = body.velocity.x.max(0.0);
        }
        if body.position.x + body.radius > width {
            body.position.x = width - body.radius;
            body.velocity.x = body.velocity.x.min(0.0);
        }
    }

    fn detect_new_contacts(&mut self, ids: &[BodyId]) -> Vec<CollisionEvent> {
        let mut touching = HashSet::new();
        let mut started = Vec::new();
        for (i, &a) in ids.iter().enumerate() {
            for &b in &ids[i + 1..] {
                let (Some(body_a), Some(body_b)) = (self.bodies.get(&a), self.bodies.get(&b))
                else {
                    continue;
                };
                let dx = body_b.position.x - body_a.position.x;
                let dy = body_b.position.y - body_a.position.y;
                let reach = body_a.radius + body_b.radius + CONTACT_SLOP;
                if dx * dx + dy * dy > reach * reach {
                    continue;
                }
                touching.insert((a, b));
                if !self.contacts.contains(&(a, b)) {
                    started.push(CollisionEvent {
                        body_a: a,
                        body_b: b,
                    });
                }
            }
        }
        self.contacts = touching;
        started
    }
}

impl PhysicsWorld for SandboxWorld {
    fn add_ball(&mut self, position: Vec2, radius: f32) -> BodyId {
        let id = BodyId(self.next_id);
        self.next_id += 1;
        self.bodies.insert(
            id,
            SandboxBody {
                position,
                velocity: Vec2::ZERO,
                radius,
            },
        );
        id
    }

    fn remove_body(&mut self, id: BodyId) -> bool {
        self.contacts.retain(|(a, b)| *a != id && *b != id);
        self.bodies.remove(&id).is_some()
    }

    fn set_velocity(&mut self, id: BodyId, velocity: Vec2) {
        if let Some(body) = self.bodies.get_mut(&id) {
            body.velocity = velocity;
        }
    }

    fn contains(&self, id: BodyId) -> bool {
        self.bodies.contains_key(&id)
    }

    fn position(&self, id: BodyId) -> Option<Vec2> {
        self.bodies.get(&id).map(|body| body.position)
    }

    fn rebuild_bounds(&mut self, width: f32, height: f32) {
        self.width = width;
        self.height = height;
    }

    fn halt(&mut self) {
        self.running = false;
    }

    fn resume(&mut self) {
        self.running = true;
    }
}
