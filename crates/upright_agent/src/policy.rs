//! Hand-tuned stand-in for the exported policy network.
//!
//! A PD law on the observation: push the body z-axis toward training up and
//! damp with the observation's angular-velocity proxy. Output is a body-local
//! torque command in policy units, like the network's.

use bevy::math::Vec3;

use upright_core::Observation;

use crate::inference::{InferenceResult, Policy};

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct UprightPolicy {
    pub gain: f32,
    pub damping: f32,
}

impl Default for UprightPolicy {
    fn default() -> Self {
        Self {
            gain: 1.0,
            damping: 0.5,
        }
    }
}

impl UprightPolicy {
    /// Action in [-1, 1] per axis.
    pub fn act(&self, observation: &Observation) -> [f32; 3] {
        let orientation = observation.quaternion();
        let z = observation.z_axis().value();
        let spin = observation.angular_velocity().value();

        let correction = z.cross(Vec3::Z) * self.gain - spin * self.damping;
        let local = orientation.inverse() * correction;
        local.clamp(Vec3::splat(-1.0), Vec3::splat(1.0)).to_array()
    }
}

impl Policy for UprightPolicy {
    fn predict_action(&mut self, observation: &Observation) -> InferenceResult<[f32; 3]> {
        Ok(self.act(observation))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use bevy::math::Quat;
    use upright_core::{ActionHistory, OrientationHistory, TrainingQuat};

    fn observe(q: Quat) -> Observation {
        let history = OrientationHistory::new(TrainingQuat::new(q));
        Observation::build(&history, &ActionHistory::new())
    }

    #[test]
    fn test_upright_needs_no_torque() {
        let action = UprightPolicy::default().act(&observe(Quat::IDENTITY));
        assert_eq!(action, [0.0; 3]);
    }

    #[test]
    fn test_tilt_is_pushed_back() {
        let action = UprightPolicy::default().act(&observe(Quat::from_rotation_x(0.3)));
        assert!(action[0] < -0.1, "expected negative x torque, got {:?}", action);
        assert!(action[1].abs() < 1e-5 && action[2].abs() < 1e-5);

        let action = UprightPolicy::default().act(&observe(Quat::from_rotation_y(-0.3)));
        assert!(action[1] > 0.1, "expected positive y torque, got {:?}", action);
    }

    #[test]
    fn test_output_is_bounded() {
        let policy = UprightPolicy {
            gain: 100.0,
            damping: 0.0,
        };
        let action = policy.act(&observe(Quat::from_rotation_x(1.2)));
        assert!(action.iter().all(|a| a.abs() <= 1.0));
    }
}
