//! The simulated arena: ground, four walls and one tracked rigid body.
//!
//! `SimWorld` owns every piece of mutable simulation state. The host loop
//! holds it (as a bevy resource or a plain value) and passes `&mut` into
//! each tick; nothing here is global.
//!
//! ## Lifecycle
//!
//! ```text
//! Uninitialized --start()--> Ready --step()/reset()--> Ready
//!                                 \--shutdown()--> ShutDown
//! ```
//!
//! ## One tick
//!
//! `step(n)` runs `n` fixed 1/240 s sub-steps. Each sub-step:
//! 1. maybe add a random body-local disturbance torque (rotated to world),
//! 2. advance the torque controller and add its output (rotated to world),
//! 3. integrate one slice,
//! 4. clear the accumulated torque.
//!
//! After the sub-steps the step counter advances and the observed orientation
//! (last prediction or ground truth) is pushed into the orientation history.
//!
//! ## Usage
//!
//! ```ignore
//! let mut world = SimWorld::new(SimConfig::default())?;
//! world.start()?;
//! loop {
//!     world.set_action(policy(world.observation()));
//!     world.tick()?;
//!     if world.is_terminated() {
//!         world.reset()?;
//!     }
//! }
//! ```

use bevy::log::{debug, info};
use bevy::math::{Quat, Vec3};
use bevy::prelude::Resource;
use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};
use rapier3d::prelude as rapier;
use rapier::nalgebra::{Isometry3, Point3, Translation3, Vector3};
use std::f32::consts::PI;

use upright_core::{
    quat, validate_arena_size, ActionHistory, BodyConfig, ConfigError, InitialOrientation,
    Observation, OrientationHistory, OrientationSource, RuntimeQuat, ShapeConfig,
    SimConfig, TrainingQuat, TrainingVec3,
};

use crate::controller::{Disturbance, TorqueController};
use crate::drag::DragState;
use crate::state::{from_na_quat, from_na_vec, to_na_quat, to_na_vec, PhysicsState};

/// Wall thickness (half-extent) in meters.
const WALL_HALF_THICKNESS: f32 = 0.05;
/// Wall height (half-extent) in meters.
const WALL_HALF_HEIGHT: f32 = 0.5;
/// Below this height the reward takes a fall penalty.
const REWARD_HEIGHT_FLOOR: f32 = 0.1;

/// Errors from world operations.
#[derive(Debug)]
pub enum WorldError {
    /// `start()` has not been called yet
    NotStarted,
    /// The world was shut down
    ShutDown,
    /// The operation needs a tracked body and there is none
    NoTrackedBody,
    /// Rejected configuration
    Config(ConfigError),
}

impl std::fmt::Display for WorldError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            WorldError::NotStarted => write!(f, "World not started"),
            WorldError::ShutDown => write!(f, "World has been shut down"),
            WorldError::NoTrackedBody => write!(f, "No tracked body in the world"),
            WorldError::Config(e) => write!(f, "Config error: {}", e),
        }
    }
}

impl std::error::Error for WorldError {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        match self {
            WorldError::Config(e) => Some(e),
            _ => None,
        }
    }
}

impl From<ConfigError> for WorldError {
    fn from(e: ConfigError) -> Self {
        WorldError::Config(e)
    }
}

pub type WorldResult<T> = Result<T, WorldError>;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Lifecycle {
    Uninitialized,
    Ready,
    ShutDown,
}

/// Read-only view of the tracked body for rendering.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct BodySnapshot {
    pub position: Vec3,
    /// Canonical orientation, runtime frame.
    pub orientation: RuntimeQuat,
    pub angular_velocity: Vec3,
    pub step_count: u32,
    pub terminated: bool,
}

#[derive(Resource)]
pub struct SimWorld {
    config: SimConfig,
    lifecycle: Lifecycle,
    pub(crate) physics: PhysicsState,
    ground: Option<rapier::RigidBodyHandle>,
    walls: Vec<rapier::RigidBodyHandle>,
    pub(crate) tracked: Option<rapier::RigidBodyHandle>,
    pub(crate) drag: DragState,
    controller: TorqueController,
    disturbance: Disturbance,
    orientation_history: OrientationHistory,
    predicted: Option<RuntimeQuat>,
    step_count: u32,
    episode_reward: f32,
    rng: StdRng,
}

impl SimWorld {
    /// Validate `config` and build an empty, not yet started world.
    pub fn new(config: SimConfig) -> WorldResult<Self> {
        config.validate()?;

        let rng = match config.seed {
            Some(seed) => StdRng::seed_from_u64(seed),
            None => StdRng::from_entropy(),
        };

        Ok(Self {
            physics: PhysicsState::new(Vec3::from_array(config.gravity)),
            controller: TorqueController::new(config.torque.clone()),
            disturbance: Disturbance::new(&config.disturbance),
            lifecycle: Lifecycle::Uninitialized,
            ground: None,
            walls: Vec::new(),
            tracked: None,
            drag: DragState::default(),
            orientation_history: OrientationHistory::default(),
            predicted: None,
            step_count: 0,
            episode_reward: 0.0,
            rng,
            config,
        })
    }

    /// Build the static scene and spawn the tracked body.
    ///
    /// Calling `start` on a running world is a no-op.
    pub fn start(&mut self) -> WorldResult<()> {
        match self.lifecycle {
            Lifecycle::Ready => return Ok(()),
            Lifecycle::ShutDown => return Err(WorldError::ShutDown),
            Lifecycle::Uninitialized => {}
        }

        let ground = rapier::RigidBodyBuilder::fixed().build();
        let ground_collider = rapier::ColliderBuilder::halfspace(Vector3::y_axis())
            .friction(self.config.body.friction)
            .build();
        self.ground = Some(self.physics.insert_body(ground, Some(ground_collider)));
        self.build_walls();

        self.lifecycle = Lifecycle::Ready;
        self.reset()?;

        info!(
            "Simulation world started (arena {} m, {} sub-steps per tick)",
            self.config.arena_size, self.config.substeps_per_tick
        );
        Ok(())
    }

    /// Stop the world for good. Later calls return [`WorldError::ShutDown`].
    pub fn shutdown(&mut self) {
        if self.lifecycle == Lifecycle::ShutDown {
            return;
        }
        self.release();
        if let Some(handle) = self.tracked.take() {
            self.physics.remove_body(handle);
        }
        self.lifecycle = Lifecycle::ShutDown;
        info!("Simulation world shut down after {} steps", self.step_count);
    }

    pub fn lifecycle(&self) -> Lifecycle {
        self.lifecycle
    }

    pub fn config(&self) -> &SimConfig {
        &self.config
    }

    pub(crate) fn ensure_ready(&self) -> WorldResult<()> {
        match self.lifecycle {
            Lifecycle::Ready => Ok(()),
            Lifecycle::Uninitialized => Err(WorldError::NotStarted),
            Lifecycle::ShutDown => Err(WorldError::ShutDown),
        }
    }

    // =========================================================================
    // Stepping
    // =========================================================================

    /// One host tick with the configured number of sub-steps.
    pub fn tick(&mut self) -> WorldResult<()> {
        self.step(self.config.substeps_per_tick)
    }

    /// Run exactly `substeps` fixed slices, then update the orientation history.
    pub fn step(&mut self, substeps: u32) -> WorldResult<()> {
        self.ensure_ready()?;

        if self.tracked.is_none() {
            self.controller.clear_target();
        }

        for _ in 0..substeps {
            self.apply_substep_torques();
            self.physics.step();
            if let Some(body) = self
                .tracked
                .and_then(|h| self.physics.rigid_body_set.get_mut(h))
            {
                body.reset_torques(false);
            }
        }

        self.step_count += 1;
        let observed = self.observed_orientation();
        self.orientation_history.push(observed.to_training());
        self.episode_reward += self.reward();
        Ok(())
    }

    fn apply_substep_torques(&mut self) {
        let Some(handle) = self.tracked else {
            return;
        };
        let kick = self.disturbance.sample(&mut self.rng);
        let local = self.controller.tick().value();

        let Some(body) = self.physics.rigid_body_set.get_mut(handle) else {
            return;
        };
        let rotation = *body.rotation();
        if let Some(kick) = kick {
            debug!("Disturbance kick {:?}", kick);
            body.add_torque(rotation * to_na_vec(kick), true);
        }
        body.add_torque(rotation * to_na_vec(local), true);
    }

    // =========================================================================
    // Episode control
    // =========================================================================

    /// Recreate the tracked body using the configured initial orientation.
    pub fn reset(&mut self) -> WorldResult<()> {
        let orientation = match self.config.body.initial_orientation {
            InitialOrientation::Identity => TrainingQuat::new(Quat::IDENTITY),
            InitialOrientation::Random => {
                let roll = self.rng.gen_range(-PI..PI);
                let pitch = self.rng.gen_range(-PI..PI);
                let yaw = self.rng.gen_range(-PI..PI);
                TrainingQuat::new(quat::from_euler_radians(roll, pitch, yaw))
            }
        };
        self.reset_to(orientation)
    }

    /// Recreate the tracked body with a given training-frame orientation.
    ///
    /// Clears the step counter, torque state, both histories and any
    /// pending prediction.
    pub fn reset_to(&mut self, orientation: TrainingQuat) -> WorldResult<()> {
        self.ensure_ready()?;
        let orientation = orientation.sanitized();

        // Removing the body also removes any drag joint attached to it.
        self.drag.grab = None;
        if let Some(handle) = self.tracked.take() {
            self.physics.remove_body(handle);
        }

        let position = Vec3::new(0.0, self.config.body.spawn_height, 0.0);
        let (body, collider) =
            build_tracked_body(&self.config.body, position, orientation.to_runtime())?;
        self.tracked = Some(self.physics.insert_body(body, Some(collider)));

        self.controller.reset();
        self.orientation_history.reset(orientation);
        self.predicted = None;
        self.step_count = 0;
        self.episode_reward = 0.0;

        debug!("World reset, orientation {:?}", orientation);
        Ok(())
    }

    /// Step-count or height termination. Not enforced; the host decides.
    pub fn is_terminated(&self) -> bool {
        if self.step_count >= self.config.max_episode_steps {
            return true;
        }
        self.body_position()
            .is_some_and(|p| p.y < self.config.min_height)
    }

    pub fn step_count(&self) -> u32 {
        self.step_count
    }

    /// Uprightness reward for the current state.
    ///
    /// Training z-axis alignment with up, minus 0.1 x spin rate, minus 1 when
    /// the body is close to the floor.
    pub fn reward(&self) -> f32 {
        let (Some(orientation), Some(position), Some(angvel)) = (
            self.body_orientation(),
            self.body_position(),
            self.body_angular_velocity(),
        ) else {
            return 0.0;
        };
        let alignment = quat::z_axis(orientation.to_training().value()).z;
        let spin_penalty = -0.1 * angvel.length();
        let height_penalty = if position.y < REWARD_HEIGHT_FLOOR {
            -1.0
        } else {
            0.0
        };
        alignment + spin_penalty + height_penalty
    }

    /// Reward summed over the ticks of the current episode.
    pub fn episode_reward(&self) -> f32 {
        self.episode_reward
    }

    // =========================================================================
    // Arena and shape
    // =========================================================================

    /// Rebuild the walls for a new arena side length.
    pub fn set_arena_size(&mut self, size: f32) -> WorldResult<()> {
        validate_arena_size(size)?;
        self.config.arena_size = size;
        if self.lifecycle == Lifecycle::Ready {
            for handle in std::mem::take(&mut self.walls) {
                self.physics.remove_body(handle);
            }
            self.build_walls();
            info!("Arena rebuilt at {} m", size);
        }
        Ok(())
    }

    pub fn arena_size(&self) -> f32 {
        self.config.arena_size
    }

    pub fn wall_count(&self) -> usize {
        self.walls.len()
    }

    fn build_walls(&mut self) {
        let half = self.config.arena_size * 0.5;
        let t = WALL_HALF_THICKNESS;
        let h = WALL_HALF_HEIGHT;
        let span = half + 2.0 * t;

        let walls = [
            (Vec3::new(half + t, h, 0.0), Vec3::new(t, h, span)),
            (Vec3::new(-half - t, h, 0.0), Vec3::new(t, h, span)),
            (Vec3::new(0.0, h, half + t), Vec3::new(span, h, t)),
            (Vec3::new(0.0, h, -half - t), Vec3::new(span, h, t)),
        ];

        for (center, extents) in walls {
            let body = rapier::RigidBodyBuilder::fixed()
                .translation(to_na_vec(center))
                .build();
            let collider = rapier::ColliderBuilder::cuboid(extents.x, extents.y, extents.z)
                .friction(self.config.body.friction)
                .build();
            self.walls.push(self.physics.insert_body(body, Some(collider)));
        }
    }

    /// Swap the tracked body's shape. Recreates the body when running.
    pub fn set_shape(&mut self, shape: ShapeConfig) -> WorldResult<()> {
        shape.validate()?;
        let mut body = self.config.body.clone();
        body.shape = shape;
        // Build once up front so a degenerate hull is rejected before any state changes.
        build_tracked_body(&body, Vec3::ZERO, RuntimeQuat::new(Quat::IDENTITY))?;

        self.config.body = body;
        if self.lifecycle == Lifecycle::Ready {
            self.reset()?;
        }
        info!("Tracked body shape changed");
        Ok(())
    }

    // =========================================================================
    // Inputs
    // =========================================================================

    /// Hand a training-frame policy action to the torque controller.
    pub fn set_action(&mut self, action: TrainingVec3) {
        self.controller.set_action(action);
    }

    /// Drop the torque target to zero.
    pub fn clear_action(&mut self) {
        self.controller.clear_target();
    }

    /// Store the latest pose prediction (runtime frame). It is reused every
    /// tick until replaced or cleared.
    pub fn set_predicted_orientation(&mut self, orientation: RuntimeQuat) {
        self.predicted = Some(orientation.sanitized());
    }

    pub fn clear_predicted_orientation(&mut self) {
        self.predicted = None;
    }

    pub fn predicted_orientation(&self) -> Option<RuntimeQuat> {
        self.predicted
    }

    /// The orientation the next history update will record.
    ///
    /// With `OrientationSource::Predicted`, the last prediction when one is
    /// held; otherwise ground truth; identity when there is no body.
    pub fn observed_orientation(&self) -> RuntimeQuat {
        if self.config.inference.orientation_source == OrientationSource::Predicted {
            if let Some(predicted) = self.predicted {
                return predicted;
            }
        }
        self.body_orientation()
            .unwrap_or_else(|| RuntimeQuat::new(Quat::IDENTITY))
    }

    // =========================================================================
    // Outputs
    // =========================================================================

    pub fn observation(&self) -> Observation {
        Observation::build(&self.orientation_history, self.controller.actions())
    }

    pub fn orientation_history(&self) -> &OrientationHistory {
        &self.orientation_history
    }

    pub fn action_history(&self) -> &ActionHistory {
        self.controller.actions()
    }

    pub fn controller(&self) -> &TorqueController {
        &self.controller
    }

    /// Canonical ground-truth orientation of the tracked body.
    pub fn body_orientation(&self) -> Option<RuntimeQuat> {
        let body = self.tracked_body()?;
        Some(RuntimeQuat::new(quat::sanitize(from_na_quat(body.rotation()))))
    }

    pub fn body_position(&self) -> Option<Vec3> {
        self.tracked_body().map(|b| from_na_vec(b.translation()))
    }

    /// World-frame angular velocity of the tracked body.
    pub fn body_angular_velocity(&self) -> Option<Vec3> {
        self.tracked_body().map(|b| from_na_vec(b.angvel()))
    }

    pub fn has_tracked_body(&self) -> bool {
        self.tracked_body().is_some()
    }

    pub fn snapshot(&self) -> Option<BodySnapshot> {
        Some(BodySnapshot {
            position: self.body_position()?,
            orientation: self.body_orientation()?,
            angular_velocity: self.body_angular_velocity()?,
            step_count: self.step_count,
            terminated: self.is_terminated(),
        })
    }

    pub(crate) fn tracked_body(&self) -> Option<&rapier::RigidBody> {
        self.tracked.and_then(|h| self.physics.rigid_body_set.get(h))
    }

    /// Number of joints in the world. At most one (the drag constraint).
    pub fn constraint_count(&self) -> usize {
        self.physics.impulse_joint_set.len()
    }

    pub fn body_count(&self) -> usize {
        self.physics.rigid_body_set.len()
    }
}

/// Build the tracked body and its collider.
///
/// Mass and inertia come from the config, not the collider (density 0).
fn build_tracked_body(
    config: &BodyConfig,
    position: Vec3,
    orientation: RuntimeQuat,
) -> WorldResult<(rapier::RigidBody, rapier::Collider)> {
    let [ix, iy, iz] = config.principal_inertia;
    let mass_properties =
        rapier::MassProperties::new(Point3::origin(), config.mass, Vector3::new(ix, iy, iz));

    let body = rapier::RigidBodyBuilder::dynamic()
        .position(Isometry3::from_parts(
            Translation3::new(position.x, position.y, position.z),
            to_na_quat(orientation.value()),
        ))
        .linear_damping(config.linear_damping)
        .angular_damping(config.angular_damping)
        .additional_mass_properties(mass_properties)
        .ccd_enabled(true)
        .build();

    let builder = match &config.shape {
        ShapeConfig::Box { half_extents } => {
            let [hx, hy, hz] = *half_extents;
            rapier::ColliderBuilder::cuboid(hx, hy, hz)
        }
        ShapeConfig::Mesh(mesh) => {
            let points: Vec<Point3<f32>> = mesh
                .vertices
                .iter()
                .map(|&[x, y, z]| Point3::new(x, y, z))
                .collect();
            rapier::ColliderBuilder::convex_hull(&points).ok_or_else(|| {
                ConfigError::MalformedMesh("vertices do not span a volume".into())
            })?
        }
    };

    let collider = builder
        .density(0.0)
        .friction(config.friction)
        .restitution(config.restitution)
        .build();

    Ok((body, collider))
}
