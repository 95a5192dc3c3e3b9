//! Rapier pipeline and body sets, plus glam <-> nalgebra conversion.

use bevy::math::{Quat, Vec3};
use rapier3d::prelude as rapier;
use rapier::nalgebra::{Point3, Quaternion, UnitQuaternion, Vector3};

/// Fixed integration slice: 240 Hz, the training simulator's rate.
pub const SUBSTEP_DT: f32 = 1.0 / 240.0;

/// Everything Rapier needs to advance one slice.
pub struct PhysicsState {
    pub gravity: Vector3<f32>,
    pub integration_parameters: rapier::IntegrationParameters,
    pub physics_pipeline: rapier::PhysicsPipeline,
    pub island_manager: rapier::IslandManager,
    pub broad_phase: rapier::DefaultBroadPhase,
    pub narrow_phase: rapier::NarrowPhase,
    pub rigid_body_set: rapier::RigidBodySet,
    pub collider_set: rapier::ColliderSet,
    pub impulse_joint_set: rapier::ImpulseJointSet,
    pub multibody_joint_set: rapier::MultibodyJointSet,
    pub ccd_solver: rapier::CCDSolver,
}

impl PhysicsState {
    pub fn new(gravity: Vec3) -> Self {
        let mut integration_parameters = rapier::IntegrationParameters::default();
        integration_parameters.dt = SUBSTEP_DT;

        Self {
            gravity: to_na_vec(gravity),
            integration_parameters,
            physics_pipeline: rapier::PhysicsPipeline::new(),
            island_manager: rapier::IslandManager::new(),
            broad_phase: rapier::DefaultBroadPhase::new(),
            narrow_phase: rapier::NarrowPhase::new(),
            rigid_body_set: rapier::RigidBodySet::new(),
            collider_set: rapier::ColliderSet::new(),
            impulse_joint_set: rapier::ImpulseJointSet::new(),
            multibody_joint_set: rapier::MultibodyJointSet::new(),
            ccd_solver: rapier::CCDSolver::new(),
        }
    }

    /// Integrate one fixed slice.
    pub fn step(&mut self) {
        self.physics_pipeline.step(
            &self.gravity,
            &self.integration_parameters,
            &mut self.island_manager,
            &mut self.broad_phase,
            &mut self.narrow_phase,
            &mut self.rigid_body_set,
            &mut self.collider_set,
            &mut self.impulse_joint_set,
            &mut self.multibody_joint_set,
            &mut self.ccd_solver,
            None,
            &(),
            &(),
        );
    }

    /// Insert a body and, optionally, one collider attached to it.
    pub fn insert_body(
        &mut self,
        body: rapier::RigidBody,
        collider: Option<rapier::Collider>,
    ) -> rapier::RigidBodyHandle {
        let handle = self.rigid_body_set.insert(body);
        if let Some(collider) = collider {
            self.collider_set
                .insert_with_parent(collider, handle, &mut self.rigid_body_set);
        }
        handle
    }

    /// Remove a body with its colliders and any joints attached to it.
    pub fn remove_body(&mut self, handle: rapier::RigidBodyHandle) -> bool {
        self.rigid_body_set
            .remove(
                handle,
                &mut self.island_manager,
                &mut self.collider_set,
                &mut self.impulse_joint_set,
                &mut self.multibody_joint_set,
                true,
            )
            .is_some()
    }
}

#[inline]
pub fn to_na_vec(v: Vec3) -> Vector3<f32> {
    Vector3::new(v.x, v.y, v.z)
}

#[inline]
pub fn to_na_point(v: Vec3) -> Point3<f32> {
    Point3::new(v.x, v.y, v.z)
}

#[inline]
pub fn to_na_quat(q: Quat) -> UnitQuaternion<f32> {
    UnitQuaternion::new_normalize(Quaternion::new(q.w, q.x, q.y, q.z))
}

#[inline]
pub fn from_na_vec(v: &Vector3<f32>) -> Vec3 {
    Vec3::new(v.x, v.y, v.z)
}

#[inline]
pub fn from_na_quat(r: &UnitQuaternion<f32>) -> Quat {
    Quat::from_xyzw(r.i, r.j, r.k, r.w)
}
