use glam::Vec2;

use crate::config::PackingConfig;
use crate::geometry::Polygon;
use crate::packing::Bubble;

const SOFTENING: f32 = 25.0;
/// Pairs further apart than this many combined radii do not interact.
const INTERACTION_RANGE: f32 = 4.0;
const BACKOFF_STEPS: [f32; 5] = [1.0, 0.5, 0.25, 0.125, 0.0];
const PROJECTION_STEPS: usize = 24;
const DRAG_SWEEP_STEPS: usize = 16;
const REST_SPEED: f32 = 0.01;

fn repulsion_between(point_a: Vec2, point_b: Vec2, strength: f32) -> Vec2 {
    let delta = point_a - point_b;
    let distance_sq = delta.length_squared();
    let distance = distance_sq.sqrt();
    let direction = if distance > 0.0001 {
        delta / distance
    } else {
        Vec2::X
    };
    direction * (strength / (distance_sq + SOFTENING))
}

/// Declutter solver for one bubble group.
///
/// `step` runs one tick: pairwise repulsion, a weak pull toward the polygon
/// centroid, damping and a speed clamp. Moves are applied one bubble at a time
/// and each is backed off until the disk stays inside the polygon and clear of
/// every other disk by `gap`, so the group is valid after every tick.
#[derive(Debug, Clone)]
pub struct Relaxation {
    polygon: Polygon,
    centroid: Vec2,
    bubbles: Vec<Bubble>,
    velocities: Vec<Vec2>,
    remaining: usize,
    dragging: Option<usize>,
    params: PackingConfig,
}

impl Relaxation {
    pub fn new(polygon: Polygon, bubbles: Vec<Bubble>, params: &PackingConfig) -> Self {
        let centroid = polygon.centroid();
        let velocities = vec![Vec2::ZERO; bubbles.len()];
        Self {
            polygon,
            centroid,
            bubbles,
            velocities,
            remaining: params.relax_ticks,
            dragging: None,
            params: params.clone(),
        }
    }

    pub fn bubbles(&self) -> &[Bubble] {
        &self.bubbles
    }

    pub fn polygon(&self) -> &Polygon {
        &self.polygon
    }

    pub fn remaining_ticks(&self) -> usize {
        self.remaining
    }

    pub fn is_settled(&self) -> bool {
        self.remaining == 0 && self.dragging.is_none()
    }

    pub fn dragging(&self) -> Option<usize> {
        self.dragging
    }

    /// Halt the simulation where it stands.
    pub fn stop(&mut self) {
        self.remaining = 0;
        self.velocities.fill(Vec2::ZERO);
    }

    /// Run one tick. Returns false when there was nothing left to do.
    pub fn step(&mut self) -> bool {
        if self.remaining == 0 {
            return false;
        }
        self.remaining -= 1;

        let forces = self.forces();
        let mut fastest = 0.0f32;
        for index in 0..self.bubbles.len() {
            if Some(index) == self.dragging {
                continue;
            }
            let mut velocity = (self.velocities[index] + forces[index]) * self.params.damping;
            let speed = velocity.length();
            if speed > self.params.max_speed {
                velocity = velocity / speed * self.params.max_speed;
            }

            let current = self.bubbles[index].center;
            let radius = self.bubbles[index].radius;
            let target = self.project_inside(current + velocity, radius, current);

            let mut moved = Vec2::ZERO;
            for t in BACKOFF_STEPS {
                let candidate = current.lerp(target, t);
                if t == 0.0 || self.is_clear(index, candidate) {
                    moved = candidate - current;
                    self.bubbles[index].center = candidate;
                    break;
                }
            }
            self.velocities[index] = moved;
            fastest = fastest.max(moved.length());
        }

        if fastest < REST_SPEED && self.dragging.is_none() {
            self.remaining = 0;
        }
        true
    }

    /// Tick until settled, at most `remaining_ticks` times.
    pub fn run(&mut self) {
        while self.step() {}
    }

    fn forces(&self) -> Vec<Vec2> {
        let strength = self.params.repulsion;
        self.bubbles
            .iter()
            .enumerate()
            .map(|(i, bubble)| {
                let mut force = (self.centroid - bubble.center) * self.params.centroid_pull;
                for (j, other) in self.bubbles.iter().enumerate() {
                    if i == j {
                        continue;
                    }
                    let reach = (bubble.radius + other.radius) * INTERACTION_RANGE + self.params.gap;
                    if bubble.center.distance_squared(other.center) > reach * reach {
                        continue;
                    }
                    force += repulsion_between(
                        bubble.center,
                        other.center,
                        strength * (bubble.radius + other.radius),
                    );
                }
                force
            })
            .collect()
    }

    /// Disk at `center` stays inside and keeps `gap` to every other bubble.
    fn is_clear(&self, index: usize, center: Vec2) -> bool {
        let radius = self.bubbles[index].radius;
        self.polygon.contains_disk(center, radius)
            && self.bubbles.iter().enumerate().all(|(j, other)| {
                j == index || other.center.distance(center) >= other.radius + radius + self.params.gap
            })
    }

    /// Pull `candidate` back toward the centroid (or toward `anchor` when the
    /// disk does not fit at the centroid) until the disk is contained.
    fn project_inside(&self, candidate: Vec2, radius: f32, anchor: Vec2) -> Vec2 {
        if candidate.is_finite() && self.polygon.contains_disk(candidate, radius) {
            return candidate;
        }
        let home = if self.polygon.contains_disk(self.centroid, radius) {
            self.centroid
        } else {
            anchor
        };
        if !candidate.is_finite() {
            return home;
        }
        let (mut outside, mut inside) = (0.0f32, 1.0f32);
        for _ in 0..PROJECTION_STEPS {
            let mid = 0.5 * (outside + inside);
            if self.polygon.contains_disk(candidate.lerp(home, mid), radius) {
                inside = mid;
            } else {
                outside = mid;
            }
        }
        candidate.lerp(home, inside)
    }

    /// Topmost bubble under `point`.
    pub fn bubble_at(&self, point: Vec2) -> Option<usize> {
        self.bubbles.iter().rposition(|bubble| bubble.contains(point))
    }

    pub fn start_drag(&mut self, index: usize) -> bool {
        if index >= self.bubbles.len() {
            return false;
        }
        self.dragging = Some(index);
        self.velocities[index] = Vec2::ZERO;
        true
    }

    /// Move the dragged bubble toward `target`. The bubble stops at the last
    /// contained, non-overlapping position along the way. Returns its center.
    pub fn drag_to(&mut self, target: Vec2) -> Option<Vec2> {
        let index = self.dragging?;
        let current = self.bubbles[index].center;
        let radius = self.bubbles[index].radius;
        let goal = self.project_inside(target, radius, current);

        let mut reached = current;
        for step in 1..=DRAG_SWEEP_STEPS {
            let candidate = current.lerp(goal, step as f32 / DRAG_SWEEP_STEPS as f32);
            if !self.is_clear(index, candidate) {
                break;
            }
            reached = candidate;
        }
        self.bubbles[index].center = reached;
        Some(reached)
    }

    /// Release the dragged bubble and re-arm the relaxation for the group.
    pub fn end_drag(&mut self) {
        if self.dragging.take().is_some() {
            self.velocities.fill(Vec2::ZERO);
            self.remaining = self.params.relax_ticks;
        }
    }
}
