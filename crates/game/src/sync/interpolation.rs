use std::time::{Duration, Instant};

use glam::Vec2;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Easing {
    Linear,
    EaseOutCubic,
}

impl Easing {
    pub fn apply(self, t: f32) -> f32 {
        match self {
            Easing::Linear => t,
            Easing::EaseOutCubic => ease_out_cubic(t),
        }
    }
}

pub fn ease_out_cubic(t: f32) -> f32 {
    1.0 - (1.0 - t).powi(3)
}

/// A fixed-duration move from `start` to `target`, sampled against wall time.
#[derive(Debug, Clone, PartialEq)]
pub struct Interpolation {
    pub start: Vec2,
    pub target: Vec2,
    pub start_time: Instant,
    pub duration: Duration,
    pub easing: Easing,
}

impl Interpolation {
    pub fn new(start: Vec2, target: Vec2, start_time: Instant, duration: Duration, easing: Easing) -> Self {
        Self {
            start,
            target,
            start_time,
            duration,
            easing,
        }
    }

    pub fn progress(&self, now: Instant) -> f32 {
        if self.duration.is_zero() {
            return 1.0;
        }
        let elapsed = now.saturating_duration_since(self.start_time);
        (elapsed.as_secs_f32() / self.duration.as_secs_f32()).min(1.0)
    }

    /// Exactly `target` once progress reaches 1.
    pub fn sample(&self, now: Instant) -> Vec2 {
        let t = self.progress(now);
        if t >= 1.0 {
            return self.target;
        }
        self.start.lerp(self.target, self.easing.apply(t))
    }

    pub fn is_complete(&self, now: Instant) -> bool {
        self.progress(now) >= 1.0
    }
}
