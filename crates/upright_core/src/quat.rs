//! Quaternion helpers shared by every layer above the physics world.
//!
//! All quaternions are `bevy::math::Quat` in (x, y, z, w) order. Two rules hold
//! at every boundary crossing (reading from the world, reading an external
//! prediction):
//!
//! 1. **Unit norm** - renormalize whenever the norm drifts, snap to identity
//!    when the norm is effectively zero.
//! 2. **Canonical sign** - `w >= 0`, and when `w == 0`, `x >= 0`. `q` and `-q`
//!    describe the same rotation; picking one keeps history deltas and
//!    distance comparisons meaningful.

use bevy::math::{Quat, Vec3, Vec4};

/// Norm below which a quaternion is treated as degenerate.
pub const DEGENERATE_NORM: f32 = 1e-8;

/// Allowed drift from unit norm before a quaternion is renormalized.
pub const NORM_TOLERANCE: f32 = 1e-6;

/// Return `q` scaled to unit length.
///
/// Degenerate (near-zero or non-finite) input maps to the identity rotation
/// instead of dividing by a near-zero norm.
pub fn normalize(q: Quat) -> Quat {
    let norm = q.length();
    if !norm.is_finite() || norm < DEGENERATE_NORM {
        return Quat::IDENTITY;
    }
    if (norm - 1.0).abs() <= NORM_TOLERANCE {
        return q;
    }
    q / norm
}

/// Apply the sign convention: `w >= 0`, ties on `w == 0` broken by `x >= 0`.
///
/// Idempotent: `canonicalize(canonicalize(q)) == canonicalize(q)`.
pub fn canonicalize(q: Quat) -> Quat {
    if q.w < 0.0 || (q.w == 0.0 && q.x < 0.0) {
        -q
    } else {
        q
    }
}

/// Normalize then canonicalize. The form every stored quaternion takes.
pub fn sanitize(q: Quat) -> Quat {
    canonicalize(normalize(q))
}

/// Build a sanitized quaternion from raw `[x, y, z, w]` scalars, as returned
/// by an external predictor (not guaranteed unit or canonical).
pub fn from_raw(raw: [f32; 4]) -> Quat {
    sanitize(Quat::from_array(raw))
}

/// Body-local +Z expressed in world coordinates.
///
/// Third column of the rotation matrix, closed form.
pub fn z_axis(q: Quat) -> Vec3 {
    let (x, y, z, w) = (q.x, q.y, q.z, q.w);
    Vec3::new(
        2.0 * (x * z + w * y),
        2.0 * (y * z - w * x),
        1.0 - 2.0 * (x * x + y * y),
    )
}

/// Roll/pitch/yaw in degrees (rotations about X, Y, Z).
///
/// The pitch `asin` argument is clamped to [-1, 1] so gimbal-lock inputs
/// with slight numeric overshoot still return +/-90 instead of NaN.
pub fn to_euler_degrees(q: Quat) -> Vec3 {
    let (x, y, z, w) = (q.x, q.y, q.z, q.w);

    let roll = (2.0 * (w * x + y * z)).atan2(1.0 - 2.0 * (x * x + y * y));
    let pitch = (2.0 * (w * y - z * x)).clamp(-1.0, 1.0).asin();
    let yaw = (2.0 * (w * z + x * y)).atan2(1.0 - 2.0 * (y * y + z * z));

    Vec3::new(roll.to_degrees(), pitch.to_degrees(), yaw.to_degrees())
}

/// Quaternion built from roll/pitch/yaw in radians (X, then Y, then Z).
///
/// Inverse of [`to_euler_degrees`] up to units.
pub fn from_euler_radians(roll: f32, pitch: f32, yaw: f32) -> Quat {
    let (sr, cr) = (roll * 0.5).sin_cos();
    let (sp, cp) = (pitch * 0.5).sin_cos();
    let (sy, cy) = (yaw * 0.5).sin_cos();

    sanitize(Quat::from_xyzw(
        sr * cp * cy - cr * sp * sy,
        cr * sp * cy + sr * cp * sy,
        cr * cp * sy - sr * sp * cy,
        cr * cp * cy + sr * sp * sy,
    ))
}

/// Discrepancy between a predicted and an actual orientation.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct PoseError {
    /// L2 distance between the two canonical quaternions.
    pub l2: f32,
    /// Angle of the relative rotation `actual * predicted^-1`, in degrees.
    pub angle_deg: f32,
}

/// Compare a predicted orientation against ground truth.
pub fn pose_error(predicted: Quat, actual: Quat) -> PoseError {
    let predicted = sanitize(predicted);
    let actual = sanitize(actual);

    let relative = sanitize(actual * predicted.inverse());
    let angle = 2.0 * relative.w.clamp(-1.0, 1.0).acos();

    PoseError {
        l2: (Vec4::from(predicted) - Vec4::from(actual)).length(),
        angle_deg: angle.to_degrees(),
    }
}
