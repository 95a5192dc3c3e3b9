//! Axis-convention conversion between the live simulation and the policy.
//!
//! The physics world integrates in the **runtime** frame (Y up). The external
//! policy was trained in the **training** frame (Z up). One swap-and-negate
//! transform relates the two:
//!
//! ```text
//! runtime  -> training : (a, b, c) -> (a,  c, -b)
//! training -> runtime  : (a, b, c) -> (a, -c,  b)
//! ```
//!
//! Both are pure permutations with a sign flip, so a round trip is exact.
//! Quaternions map their vector part the same way; `w` is frame invariant.
//!
//! Values that cross the boundary carry their frame in the type
//! ([`Framed<T, F>`]). Conversion consumes the value, so a vector can be
//! converted exactly once and a training-frame torque cannot be handed to a
//! runtime-frame consumer by accident.

use bevy::math::{Quat, Vec3};
use std::fmt;
use std::marker::PhantomData;

/// Axis convention a value is expressed in.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Frame {
    /// Convention of the rigid-body integrator.
    Runtime,
    /// Convention the control policy was trained under.
    Training,
}

impl fmt::Display for Frame {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Frame::Runtime => write!(f, "runtime"),
            Frame::Training => write!(f, "training"),
        }
    }
}

/// Type-level frame marker.
pub trait FrameTag: Copy + fmt::Debug + PartialEq + Send + Sync + 'static {
    const FRAME: Frame;
}

/// Marker for [`Frame::Runtime`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Runtime;

/// Marker for [`Frame::Training`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Training;

impl FrameTag for Runtime {
    const FRAME: Frame = Frame::Runtime;
}

impl FrameTag for Training {
    const FRAME: Frame = Frame::Training;
}

/// Runtime -> training for a bare vector.
#[inline]
pub fn runtime_to_training(v: Vec3) -> Vec3 {
    Vec3::new(v.x, v.z, -v.y)
}

/// Training -> runtime for a bare vector.
#[inline]
pub fn training_to_runtime(v: Vec3) -> Vec3 {
    Vec3::new(v.x, -v.z, v.y)
}

/// Geometric values that can be re-expressed in the other axis convention.
pub trait Reframe: Copy {
    fn runtime_to_training(self) -> Self;
    fn training_to_runtime(self) -> Self;
}

impl Reframe for Vec3 {
    fn runtime_to_training(self) -> Self {
        runtime_to_training(self)
    }

    fn training_to_runtime(self) -> Self {
        training_to_runtime(self)
    }
}

impl Reframe for Quat {
    fn runtime_to_training(self) -> Self {
        let v = runtime_to_training(self.xyz());
        Quat::from_xyzw(v.x, v.y, v.z, self.w)
    }

    fn training_to_runtime(self) -> Self {
        let v = training_to_runtime(self.xyz());
        Quat::from_xyzw(v.x, v.y, v.z, self.w)
    }
}

/// A value tagged with the frame it is expressed in.
#[derive(Clone, Copy, PartialEq)]
pub struct Framed<T, F: FrameTag> {
    value: T,
    _frame: PhantomData<F>,
}

impl<T, F: FrameTag> Framed<T, F> {
    /// Declare `value` as expressed in frame `F`.
    pub fn new(value: T) -> Self {
        Self {
            value,
            _frame: PhantomData,
        }
    }

    pub fn frame(&self) -> Frame {
        F::FRAME
    }

    pub fn into_inner(self) -> T {
        self.value
    }
}

impl<T: Copy, F: FrameTag> Framed<T, F> {
    pub fn value(&self) -> T {
        self.value
    }
}

impl<T: fmt::Debug, F: FrameTag> fmt::Debug for Framed<T, F> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{:?}@{}", self.value, F::FRAME)
    }
}

impl<T: Reframe> Framed<T, Runtime> {
    pub fn to_training(self) -> Framed<T, Training> {
        Framed::new(self.value.runtime_to_training())
    }
}

impl<T: Reframe> Framed<T, Training> {
    pub fn to_runtime(self) -> Framed<T, Runtime> {
        Framed::new(self.value.training_to_runtime())
    }
}

impl<F: FrameTag> Framed<Quat, F> {
    /// Unit-norm, sign-canonical copy in the same frame.
    pub fn sanitized(self) -> Self {
        Self::new(crate::quat::sanitize(self.value))
    }
}

pub type RuntimeVec3 = Framed<Vec3, Runtime>;
pub type TrainingVec3 = Framed<Vec3, Training>;
pub type RuntimeQuat = Framed<Quat, Runtime>;
pub type TrainingQuat = Framed<Quat, Training>;

#[cfg(test)]
mod tests {
    use super::*;
    use crate::quat::{sanitize, z_axis};

    fn vectors() -> Vec<Vec3> {
        vec![
            Vec3::ZERO,
            Vec3::X,
            Vec3::Y,
            Vec3::Z,
            Vec3::new(0.1, -2.5, 3.75),
            Vec3::new(-1e-7, 1e7, -0.333_333_34),
            Vec3::new(f32::MIN_POSITIVE, -0.0, 123.456),
        ]
    }

    #[test]
    fn test_vector_roundtrip_is_exact() {
        for v in vectors() {
            assert_eq!(training_to_runtime(runtime_to_training(v)), v);
            assert_eq!(runtime_to_training(training_to_runtime(v)), v);
        }
    }

    #[test]
    fn test_documented_mapping() {
        let v = Vec3::new(1.0, 2.0, 3.0);
        assert_eq!(runtime_to_training(v), Vec3::new(1.0, 3.0, -2.0));
        assert_eq!(training_to_runtime(v), Vec3::new(1.0, -3.0, 2.0));
    }

    #[test]
    fn test_x_axis_is_frame_invariant() {
        let action = TrainingVec3::new(Vec3::new(1.0, 0.0, 0.0));
        assert_eq!(action.to_runtime().value(), Vec3::new(1.0, 0.0, 0.0));
    }

    #[test]
    fn test_quaternion_keeps_scalar_part() {
        let q = RuntimeQuat::new(sanitize(Quat::from_xyzw(0.1, 0.2, 0.3, 0.9)));
        let t = q.to_training();
        assert_eq!(t.value().w, q.value().w);
        assert_eq!(t.to_runtime().value(), q.value());
    }

    #[test]
    fn test_quaternion_conversion_preserves_canonical_sign() {
        let q = sanitize(Quat::from_xyzw(0.6, -0.8, 0.0, 0.0));
        let t = RuntimeQuat::new(q).to_training().value();
        assert_eq!(sanitize(t), t);
    }

    #[test]
    fn test_converted_rotation_acts_on_converted_vectors() {
        // Conjugating by the frame change must commute with rotating vectors.
        let q = sanitize(Quat::from_xyzw(0.3, -0.2, 0.5, 0.8));
        let v = Vec3::new(0.4, 1.0, -0.7);
        let lhs = q.runtime_to_training() * runtime_to_training(v);
        let rhs = runtime_to_training(q * v);
        assert!((lhs - rhs).length() < 1e-5, "{:?} vs {:?}", lhs, rhs);
    }

    #[test]
    fn test_identity_is_upright_in_training() {
        let t = RuntimeQuat::new(Quat::IDENTITY).to_training();
        assert_eq!(z_axis(t.value()), Vec3::Z);
    }

    #[test]
    fn test_frame_tag_reported() {
        assert_eq!(RuntimeVec3::new(Vec3::ZERO).frame(), Frame::Runtime);
        assert_eq!(TrainingVec3::new(Vec3::ZERO).frame(), Frame::Training);
    }
}
