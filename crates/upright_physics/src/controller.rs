//! Ramped torque actuator and random disturbance kicks.
//!
//! The controller models actuator lag: the applied torque chases the target
//! through an exponential filter every sub-step, then each axis is clamped to
//! `max_torque`. Torques here are body-local, runtime frame; the world rotates
//! them through the current orientation before applying.

use bevy::math::Vec3;
use rand::Rng;
use upright_core::{ActionHistory, DisturbanceConfig, RuntimeVec3, TorqueConfig, TrainingVec3};

#[derive(Debug, Clone)]
pub struct TorqueController {
    config: TorqueConfig,
    target: Vec3,
    applied: Vec3,
    actions: ActionHistory,
}

impl TorqueController {
    pub fn new(config: TorqueConfig) -> Self {
        Self {
            config,
            target: Vec3::ZERO,
            applied: Vec3::ZERO,
            actions: ActionHistory::new(),
        }
    }

    /// Take a policy action.
    ///
    /// The training-frame action is recorded in the action history as is.
    /// The new target is the action converted to the runtime frame exactly
    /// once, then multiplied by `action_scale` (policy units to N*m). A
    /// training `(1, 0, 0)` becomes a runtime target of
    /// `(action_scale, 0, 0)`.
    pub fn set_action(&mut self, action: TrainingVec3) {
        self.actions.push(action);
        let runtime = action.to_runtime();
        self.set_target(RuntimeVec3::new(runtime.value() * self.config.action_scale));
    }

    /// Set the target torque directly, bypassing the action history.
    pub fn set_target(&mut self, target: RuntimeVec3) {
        self.target = target.value();
    }

    /// Zero target. The applied torque decays toward it over the next sub-steps.
    pub fn clear_target(&mut self) {
        self.target = Vec3::ZERO;
    }

    /// Advance one sub-step and return the torque to apply.
    pub fn tick(&mut self) -> RuntimeVec3 {
        let k = self.config.ramp_rate;
        let max = Vec3::splat(self.config.max_torque);
        let next = self.applied * (1.0 - k) + self.target * k;
        // A non-finite target must not poison the filter state.
        self.applied = if next.is_finite() {
            next.clamp(-max, max)
        } else {
            Vec3::ZERO
        };
        RuntimeVec3::new(self.applied)
    }

    pub fn target(&self) -> RuntimeVec3 {
        RuntimeVec3::new(self.target)
    }

    pub fn applied(&self) -> RuntimeVec3 {
        RuntimeVec3::new(self.applied)
    }

    pub fn actions(&self) -> &ActionHistory {
        &self.actions
    }

    pub fn config(&self) -> &TorqueConfig {
        &self.config
    }

    /// Zero target, applied torque and action history.
    pub fn reset(&mut self) {
        self.target = Vec3::ZERO;
        self.applied = Vec3::ZERO;
        self.actions.reset();
    }
}

/// Occasional random torque kicks, sampled in the body frame.
#[derive(Debug, Clone)]
pub struct Disturbance {
    probability: f64,
    magnitude: f32,
}

impl Disturbance {
    pub fn new(config: &DisturbanceConfig) -> Self {
        Self {
            probability: config.probability,
            magnitude: config.magnitude,
        }
    }

    /// Roll for a kick this sub-step. Returns a body-local torque when one fires.
    pub fn sample<R: Rng>(&self, rng: &mut R) -> Option<Vec3> {
        if self.probability <= 0.0 || self.magnitude <= 0.0 {
            return None;
        }
        if !rng.gen_bool(self.probability) {
            return None;
        }
        let m = self.magnitude;
        Some(Vec3::new(
            rng.gen_range(-m..=m),
            rng.gen_range(-m..=m),
            rng.gen_range(-m..=m),
        ))
    }
}
