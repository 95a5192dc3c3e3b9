//! Two-slot delay lines for orientation and action.
//!
//! Slot 0 always holds what slot 1 held one tick earlier. Both histories store
//! training-frame values only; the typed `push` methods make the caller convert
//! before the value lands here.

use bevy::math::{Quat, Vec3};

use crate::frame::{TrainingQuat, TrainingVec3};
use crate::quat;

/// A true delay line of length two: `[previous, current]`.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct DelayLine<T: Copy> {
    slots: [T; 2],
}

impl<T: Copy> DelayLine<T> {
    /// Both slots start at `initial`.
    pub fn new(initial: T) -> Self {
        Self {
            slots: [initial, initial],
        }
    }

    /// Shift slot 1 into slot 0, then write `value` into slot 1.
    pub fn push(&mut self, value: T) {
        self.slots[0] = self.slots[1];
        self.slots[1] = value;
    }

    pub fn reset(&mut self, initial: T) {
        self.slots = [initial, initial];
    }

    pub fn previous(&self) -> T {
        self.slots[0]
    }

    pub fn current(&self) -> T {
        self.slots[1]
    }

    pub fn slots(&self) -> [T; 2] {
        self.slots
    }
}

/// Canonical training-frame orientations from the last two ticks.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct OrientationHistory {
    line: DelayLine<Quat>,
}

impl OrientationHistory {
    pub fn new(initial: TrainingQuat) -> Self {
        Self {
            line: DelayLine::new(quat::sanitize(initial.value())),
        }
    }

    pub fn push(&mut self, orientation: TrainingQuat) {
        self.line.push(quat::sanitize(orientation.value()));
    }

    pub fn reset(&mut self, initial: TrainingQuat) {
        self.line.reset(quat::sanitize(initial.value()));
    }

    /// Slot 0.
    pub fn previous(&self) -> TrainingQuat {
        TrainingQuat::new(self.line.previous())
    }

    /// Slot 1.
    pub fn current(&self) -> TrainingQuat {
        TrainingQuat::new(self.line.current())
    }

    /// Finite-difference proxy for angular velocity.
    ///
    /// Per-component delta of the vector parts of the two most recent
    /// orientations, clamped to [-1, 1]. Not a physical angular velocity; it
    /// reproduces the feature the policy was trained on.
    pub fn angular_velocity_estimate(&self) -> TrainingVec3 {
        let delta = self.line.current().xyz() - self.line.previous().xyz();
        TrainingVec3::new(delta.clamp(Vec3::splat(-1.0), Vec3::splat(1.0)))
    }
}

impl Default for OrientationHistory {
    fn default() -> Self {
        Self::new(TrainingQuat::new(Quat::IDENTITY))
    }
}

/// Training-frame policy actions from the last two `set_action` calls.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct ActionHistory {
    line: DelayLine<Vec3>,
}

impl ActionHistory {
    pub fn new() -> Self {
        Self {
            line: DelayLine::new(Vec3::ZERO),
        }
    }

    pub fn push(&mut self, action: TrainingVec3) {
        self.line.push(action.value());
    }

    /// Back to two zero actions.
    pub fn reset(&mut self) {
        self.line.reset(Vec3::ZERO);
    }

    pub fn previous(&self) -> TrainingVec3 {
        TrainingVec3::new(self.line.previous())
    }

    pub fn current(&self) -> TrainingVec3 {
        TrainingVec3::new(self.line.current())
    }
}

impl Default for ActionHistory {
    fn default() -> Self {
        Self::new()
    }
}
