//! Mouse-style drag of the tracked body.
//!
//! A kinematic marker body follows the pointer and a spherical joint ties it
//! to the pick point on the tracked body. At most one joint exists; the
//! marker is created on the first grab and reused afterwards.

use bevy::log::debug;
use bevy::math::Vec3;
use rapier3d::prelude as rapier;
use rapier::nalgebra::Point3;

use upright_core::RuntimeVec3;

use crate::state::{to_na_point, to_na_vec};
use crate::world::{SimWorld, WorldError, WorldResult};

#[derive(Debug, Default)]
pub(crate) struct DragState {
    marker: Option<rapier::RigidBodyHandle>,
    pub(crate) grab: Option<Grab>,
}

#[derive(Debug, Clone, Copy)]
pub(crate) struct Grab {
    joint: rapier::ImpulseJointHandle,
    body: rapier::RigidBodyHandle,
    linear_damping: f32,
    angular_damping: f32,
    target: Vec3,
}

impl SimWorld {
    /// Attach the tracked body to a world point (runtime frame).
    ///
    /// An existing grab is released first, so there is never more than one
    /// constraint.
    pub fn grab(&mut self, point: RuntimeVec3) -> WorldResult<()> {
        self.ensure_ready()?;
        let body_handle = self.tracked.ok_or(WorldError::NoTrackedBody)?;
        self.release();

        let point = point.value();
        let marker = self.drag_marker(point);
        let held = self.config().drag.clone();

        let (local_anchor, linear_damping, angular_damping) = {
            let body = self
                .physics
                .rigid_body_set
                .get_mut(body_handle)
                .ok_or(WorldError::NoTrackedBody)?;
            let local = body.position().inverse_transform_point(&to_na_point(point));
            let saved = (body.linear_damping(), body.angular_damping());
            body.set_linear_damping(held.linear_damping);
            body.set_angular_damping(held.angular_damping);
            body.wake_up(true);
            (local, saved.0, saved.1)
        };

        let joint = rapier::SphericalJointBuilder::new()
            .local_anchor1(Point3::origin())
            .local_anchor2(local_anchor)
            .build();
        let joint = self
            .physics
            .impulse_joint_set
            .insert(marker, body_handle, joint, true);

        self.drag.grab = Some(Grab {
            joint,
            body: body_handle,
            linear_damping,
            angular_damping,
            target: point,
        });
        debug!("Grabbed tracked body at {:?}", point);
        Ok(())
    }

    /// Move the drag target. Returns false when nothing is held.
    pub fn move_grabbed(&mut self, point: RuntimeVec3) -> bool {
        let Some(grab) = self.drag.grab.as_mut() else {
            return false;
        };
        let point = point.value();
        grab.target = point;
        let body = grab.body;

        if let Some(marker) = self
            .drag
            .marker
            .and_then(|h| self.physics.rigid_body_set.get_mut(h))
        {
            marker.set_next_kinematic_translation(to_na_vec(point));
        }
        if let Some(body) = self.physics.rigid_body_set.get_mut(body) {
            body.wake_up(true);
        }
        true
    }

    /// Drop the constraint and restore the body's damping.
    /// Returns false when nothing was held.
    pub fn release(&mut self) -> bool {
        let Some(grab) = self.drag.grab.take() else {
            return false;
        };
        self.physics.impulse_joint_set.remove(grab.joint, true);
        if let Some(body) = self.physics.rigid_body_set.get_mut(grab.body) {
            body.set_linear_damping(grab.linear_damping);
            body.set_angular_damping(grab.angular_damping);
        }
        debug!("Released tracked body");
        true
    }

    pub fn is_grabbing(&self) -> bool {
        self.drag.grab.is_some()
    }

    /// Current drag target, runtime frame.
    pub fn drag_target(&self) -> Option<RuntimeVec3> {
        self.drag.grab.map(|g| RuntimeVec3::new(g.target))
    }

    /// Place the marker at `point`, creating it on first use.
    fn drag_marker(&mut self, point: Vec3) -> rapier::RigidBodyHandle {
        if let Some(marker) = self
            .drag
            .marker
            .and_then(|h| self.physics.rigid_body_set.get_mut(h))
        {
            marker.set_translation(to_na_vec(point), true);
            marker.set_next_kinematic_translation(to_na_vec(point));
        }
        if let Some(handle) = self.drag.marker {
            if self.physics.rigid_body_set.contains(handle) {
                return handle;
            }
        }

        let marker = rapier::RigidBodyBuilder::kinematic_position_based()
            .translation(to_na_vec(point))
            .build();
        let handle = self.physics.insert_body(marker, None);
        self.drag.marker = Some(handle);
        handle
    }
}

#[cfg(test)]
mod tests {
    use upright_core::{InitialOrientation, OrientationSource, SimConfig};

    use super::*;
    use crate::world::Lifecycle;

    fn started() -> SimWorld {
        let mut config = SimConfig {
            seed: Some(3),
            ..Default::default()
        };
        config.body.initial_orientation = InitialOrientation::Identity;
        config.disturbance.probability = 0.0;
        config.inference.orientation_source = OrientationSource::GroundTruth;
        let mut world = SimWorld::new(config).unwrap();
        world.start().unwrap();
        world
    }

    fn damping(world: &SimWorld) -> (f32, f32) {
        let body = world.tracked_body().unwrap();
        (body.linear_damping(), body.angular_damping())
    }

    #[test]
    fn test_no_constraint_before_first_grab() {
        let world = started();
        assert_eq!(world.constraint_count(), 0);
        assert!(!world.is_grabbing());
        assert!(world.drag_target().is_none());
    }

    #[test]
    fn test_grab_move_release() {
        let mut world = started();
        let pick = RuntimeVec3::new(Vec3::new(0.05, 0.3, 0.0));
        world.grab(pick).unwrap();
        assert_eq!(world.constraint_count(), 1);

        for i in 0..30 {
            let y = 0.3 + 0.01 * i as f32;
            assert!(world.move_grabbed(RuntimeVec3::new(Vec3::new(0.05, y, 0.0))));
            world.tick().unwrap();
            assert_eq!(world.constraint_count(), 1);
        }
        assert!((world.drag_target().unwrap().value().y - 0.59).abs() < 1e-5);
        assert!(world.body_position().unwrap().y > 0.3, "body should follow the pointer up");

        assert!(world.release());
        assert_eq!(world.constraint_count(), 0);
        assert!(!world.release());
        assert!(!world.move_grabbed(pick));
    }

    #[test]
    fn test_regrab_keeps_one_constraint() {
        let mut world = started();
        world.grab(RuntimeVec3::new(Vec3::new(0.0, 0.3, 0.0))).unwrap();
        let bodies = world.body_count();
        world.grab(RuntimeVec3::new(Vec3::new(0.05, 0.35, 0.0))).unwrap();
        assert_eq!(world.constraint_count(), 1);
        assert_eq!(world.body_count(), bodies, "marker body is reused");
    }

    #[test]
    fn test_damping_raised_then_restored() {
        let mut world = started();
        let original = damping(&world);
        world.grab(RuntimeVec3::new(Vec3::new(0.0, 0.3, 0.0))).unwrap();
        let held = damping(&world);
        assert_eq!(held, (4.0, 4.0));
        world.release();
        assert_eq!(damping(&world), original);
    }

    #[test]
    fn test_reset_while_grabbing_drops_constraint() {
        let mut world = started();
        world.grab(RuntimeVec3::new(Vec3::new(0.0, 0.3, 0.0))).unwrap();
        world.reset().unwrap();
        assert_eq!(world.constraint_count(), 0);
        assert!(!world.is_grabbing());
        assert!(!world.release());

        world.grab(RuntimeVec3::new(Vec3::new(0.0, 0.3, 0.0))).unwrap();
        assert_eq!(world.constraint_count(), 1);
    }

    #[test]
    fn test_grab_requires_started_world() {
        let mut world = SimWorld::new(SimConfig::default()).unwrap();
        assert_eq!(world.lifecycle(), Lifecycle::Uninitialized);
        assert!(matches!(
            world.grab(RuntimeVec3::new(Vec3::ZERO)),
            Err(WorldError::NotStarted)
        ));
    }
}
