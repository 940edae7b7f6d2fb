//! Scroll offset bookkeeping with ballistic acceleration. Sustained motion in
//! one direction accelerates; a pause lets the accumulator decay, and a
//! reversal starts from the opposite accumulator's own history rather than
//! the one just left.

use std::time::Instant;

/// Accumulator decay per elapsed millisecond.
pub const DECAY_PER_MS: f64 = 0.1;
/// Damper applied to the accelerated delta before it reaches the offset.
pub const ACCEL_DAMPER: f64 = 0.5;

const POS_X: usize = 0;
const NEG_X: usize = 1;
const POS_Y: usize = 2;
const NEG_Y: usize = 3;

#[derive(Debug, Clone, Copy)]
struct Accumulator {
    value: f64,
    updated_at: Instant,
}

impl Accumulator {
    fn advance(&mut self, distance: f64, now: Instant) -> f64 {
        let elapsed_ms = now.saturating_duration_since(self.updated_at).as_secs_f64() * 1000.0;
        let decayed = (self.value - elapsed_ms * DECAY_PER_MS).max(0.0);
        self.value = decayed + distance;
        self.updated_at = now;
        self.value
    }
}

#[derive(Debug)]
pub struct ViewportTracker {
    offset_x: f64,
    offset_y: f64,
    content_width: f64,
    content_height: f64,
    visible_width: f64,
    visible_height: f64,
    accumulators: [Accumulator; 4],
}

impl ViewportTracker {
    pub fn new() -> Self {
        Self::with_epoch(Instant::now())
    }

    pub fn with_epoch(epoch: Instant) -> Self {
        Self {
            offset_x: 0.0,
            offset_y: 0.0,
            content_width: 0.0,
            content_height: 0.0,
            visible_width: 0.0,
            visible_height: 0.0,
            accumulators: [Accumulator {
                value: 0.0,
                updated_at: epoch,
            }; 4],
        }
    }

    /// Content (host screen) and visible (client window) extents in pixels.
    /// Re-clamps the offset so a shrinking content never strands it.
    pub fn set_bounds(
        &mut self,
        content_width: f64,
        content_height: f64,
        visible_width: f64,
        visible_height: f64,
    ) {
        self.content_width = content_width;
        self.content_height = content_height;
        self.visible_width = visible_width;
        self.visible_height = visible_height;
        self.clamp();
    }

    pub fn apply_gesture_delta(&mut self, dx: f64, dy: f64) {
        self.apply_gesture_delta_at(dx, dy, Instant::now());
    }

    pub fn apply_gesture_delta_at(&mut self, dx: f64, dy: f64, now: Instant) {
        self.offset_x += self.accelerate(dx, POS_X, NEG_X, now);
        self.offset_y += self.accelerate(dy, POS_Y, NEG_Y, now);
        self.clamp();
    }

    fn accelerate(&mut self, delta: f64, pos: usize, neg: usize, now: Instant) -> f64 {
        if delta == 0.0 {
            return 0.0;
        }
        let (sign, index) = if delta > 0.0 { (1.0, pos) } else { (-1.0, neg) };
        let distance = delta.abs();
        let accel = self.accumulators[index].advance(distance, now);
        sign * (distance + accel) * ACCEL_DAMPER
    }

    pub fn offset(&self) -> (f64, f64) {
        (self.offset_x, self.offset_y)
    }

    fn clamp(&mut self) {
        let floor_x = -((self.content_width - self.visible_width).max(0.0));
        let floor_y = -((self.content_height - self.visible_height).max(0.0));
        self.offset_x = self.offset_x.clamp(floor_x, 0.0);
        self.offset_y = self.offset_y.clamp(floor_y, 0.0);
    }
}

impl Default for ViewportTracker {
    fn default() -> Self {
        Self::new()
    }
}
