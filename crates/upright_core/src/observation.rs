//! Fixed-layout feature vector consumed by the control policy.
//!
//! Layout (training frame, 23 floats):
//!
//! | range    | feature                                         |
//! |----------|-------------------------------------------------|
//! | 0..4     | current orientation (history slot 1), x y z w    |
//! | 4..7     | z-axis of the current orientation                |
//! | 7..10    | z-axis again, filling the "noisy z-axis" slot    |
//! | 10..14   | previous orientation (history slot 0)            |
//! | 14..17   | angular-velocity estimate                        |
//! | 17..20   | action history slot 0                            |
//! | 20..23   | action history slot 1                            |
//!
//! The order and length are a contract with the exported policy. Changing
//! either requires re-exporting the policy with the same layout.

use bevy::math::{Quat, Vec3};
use std::ops::Range;

use crate::frame::TrainingVec3;
use crate::history::{ActionHistory, OrientationHistory};
use crate::quat;

pub const OBSERVATION_LEN: usize = 23;

pub const QUATERNION: Range<usize> = 0..4;
pub const Z_AXIS: Range<usize> = 4..7;
pub const NOISY_Z_AXIS: Range<usize> = 7..10;
pub const PREVIOUS_QUATERNION: Range<usize> = 10..14;
pub const ANGULAR_VELOCITY: Range<usize> = 14..17;
pub const PREVIOUS_ACTION: Range<usize> = 17..20;
pub const CURRENT_ACTION: Range<usize> = 20..23;

/// A complete training-frame observation.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Observation([f32; OBSERVATION_LEN]);

impl Observation {
    /// Assemble the feature vector from the two histories.
    pub fn build(orientation: &OrientationHistory, actions: &ActionHistory) -> Self {
        let current = orientation.current().value();
        let previous = orientation.previous().value();
        let z = quat::z_axis(current);

        let mut features = [0.0; OBSERVATION_LEN];
        features[QUATERNION].copy_from_slice(&current.to_array());
        features[Z_AXIS].copy_from_slice(&z.to_array());
        features[NOISY_Z_AXIS].copy_from_slice(&z.to_array());
        features[PREVIOUS_QUATERNION].copy_from_slice(&previous.to_array());
        features[ANGULAR_VELOCITY]
            .copy_from_slice(&orientation.angular_velocity_estimate().value().to_array());
        features[PREVIOUS_ACTION].copy_from_slice(&actions.previous().value().to_array());
        features[CURRENT_ACTION].copy_from_slice(&actions.current().value().to_array());

        Self(features)
    }

    pub fn as_slice(&self) -> &[f32] {
        &self.0
    }

    pub fn to_array(&self) -> [f32; OBSERVATION_LEN] {
        self.0
    }

    pub fn len(&self) -> usize {
        self.0.len()
    }

    pub fn is_empty(&self) -> bool {
        false
    }

    pub fn quaternion(&self) -> Quat {
        Quat::from_slice(&self.0[QUATERNION])
    }

    pub fn z_axis(&self) -> TrainingVec3 {
        TrainingVec3::new(Vec3::from_slice(&self.0[Z_AXIS]))
    }

    pub fn angular_velocity(&self) -> TrainingVec3 {
        TrainingVec3::new(Vec3::from_slice(&self.0[ANGULAR_VELOCITY]))
    }
}

impl From<[f32; OBSERVATION_LEN]> for Observation {
    fn from(features: [f32; OBSERVATION_LEN]) -> Self {
        Self(features)
    }
}

/// Coarse facing of a training-frame z-axis.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum OrientationClass {
    Up,
    Down,
    Left,
    Right,
    Forward,
    Back,
    /// No axis component exceeds the threshold.
    Tilted,
}

impl OrientationClass {
    /// Component magnitude needed to claim a facing.
    pub const THRESHOLD: f32 = 0.7;

    /// Classify, checking z first, then x, then y.
    pub fn from_z_axis(z_axis: TrainingVec3) -> Self {
        let z = z_axis.value();
        let t = Self::THRESHOLD;
        if z.z > t {
            Self::Up
        } else if z.z < -t {
            Self::Down
        } else if z.x > t {
            Self::Right
        } else if z.x < -t {
            Self::Left
        } else if z.y > t {
            Self::Forward
        } else if z.y < -t {
            Self::Back
        } else {
            Self::Tilted
        }
    }

    /// Six-way one-hot in the order up, down, left, right, forward, back.
    /// All zeros for [`OrientationClass::Tilted`].
    pub fn one_hot(self) -> [f32; 6] {
        let mut out = [0.0; 6];
        let slot = match self {
            Self::Up => 0,
            Self::Down => 1,
            Self::Left => 2,
            Self::Right => 3,
            Self::Forward => 4,
            Self::Back => 5,
            Self::Tilted => return out,
        };
        out[slot] = 1.0;
        out
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::frame::{RuntimeQuat, TrainingQuat};

    #[test]
    fn test_length_is_fixed() {
        let obs = Observation::build(&OrientationHistory::default(), &ActionHistory::new());
        assert_eq!(obs.len(), OBSERVATION_LEN);
        assert_eq!(obs.as_slice().len(), 23);
    }

    #[test]
    fn test_identity_observation() {
        let obs = Observation::build(&OrientationHistory::default(), &ActionHistory::new());
        let expected: [f32; 23] = [
            0.0, 0.0, 0.0, 1.0, // quaternion
            0.0, 0.0, 1.0, // z-axis
            0.0, 0.0, 1.0, // z-axis copy
            0.0, 0.0, 0.0, 1.0, // previous quaternion
            0.0, 0.0, 0.0, // angular velocity
            0.0, 0.0, 0.0, // action slot 0
            0.0, 0.0, 0.0, // action slot 1
        ];
        assert_eq!(obs.to_array(), expected);
    }

    #[test]
    fn test_layout_follows_histories() {
        let runtime = RuntimeQuat::new(quat::sanitize(Quat::from_xyzw(0.3, 0.4, -0.2, 0.8)));
        let mut orientation = OrientationHistory::default();
        orientation.push(runtime.to_training());

        let mut actions = ActionHistory::new();
        actions.push(TrainingVec3::new(Vec3::new(0.1, 0.2, 0.3)));
        actions.push(TrainingVec3::new(Vec3::new(-0.4, -0.5, -0.6)));

        let obs = Observation::build(&orientation, &actions);
        let current = orientation.current().value();

        assert_eq!(obs.quaternion(), current, "first four must be slot 1");
        assert_ne!(
            obs.quaternion(),
            runtime.value(),
            "observation must not carry the runtime-frame orientation"
        );
        assert_eq!(&obs.as_slice()[Z_AXIS], &obs.as_slice()[NOISY_Z_AXIS]);
        assert_eq!(
            &obs.as_slice()[PREVIOUS_QUATERNION],
            &Quat::IDENTITY.to_array()[..]
        );
        assert_eq!(&obs.as_slice()[PREVIOUS_ACTION], &[0.1, 0.2, 0.3]);
        assert_eq!(&obs.as_slice()[CURRENT_ACTION], &[-0.4, -0.5, -0.6]);
    }

    #[test]
    fn test_orientation_class_thresholds() {
        let up = TrainingQuat::new(Quat::IDENTITY);
        let z = TrainingVec3::new(quat::z_axis(up.value()));
        assert_eq!(OrientationClass::from_z_axis(z), OrientationClass::Up);
        assert_eq!(
            OrientationClass::from_z_axis(TrainingVec3::new(Vec3::new(-0.8, 0.1, 0.1))),
            OrientationClass::Left
        );
        assert_eq!(
            OrientationClass::from_z_axis(TrainingVec3::new(Vec3::new(0.0, -0.9, 0.0))),
            OrientationClass::Back
        );
        let tilted = OrientationClass::from_z_axis(TrainingVec3::new(Vec3::new(0.5, 0.5, 0.5)));
        assert_eq!(tilted, OrientationClass::Tilted);
        assert_eq!(tilted.one_hot(), [0.0; 6]);
        assert_eq!(OrientationClass::Right.one_hot(), [0.0, 0.0, 0.0, 1.0, 0.0, 0.0]);
    }
}
