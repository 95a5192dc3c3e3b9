//! Rigid-body world and torque actuation for the upright-box controller.
//!
//! [`SimWorld`] is usable on its own; [`PhysicsPlugin`] wraps it as a bevy
//! resource and drives it once per frame.

use bevy::prelude::*;

pub mod controller;
mod drag;
pub mod state;
pub mod world;

pub use controller::{Disturbance, TorqueController};
pub use state::{PhysicsState, SUBSTEP_DT};
pub use world::{BodySnapshot, Lifecycle, SimWorld, WorldError, WorldResult};

use upright_core::SimConfig;

/// Frame ordering for everything that touches the world.
///
/// `Inputs` (actions, predictions, drag) runs before `Step`, and `Outputs`
/// (episode bookkeeping, transform sync) after it.
#[derive(SystemSet, Debug, Clone, PartialEq, Eq, Hash)]
pub enum SimulationSet {
    Inputs,
    Step,
    Outputs,
}

/// Owns a validated [`SimConfig`]; build it with [`PhysicsPlugin::new`].
pub struct PhysicsPlugin {
    config: SimConfig,
}

impl PhysicsPlugin {
    pub fn new(config: SimConfig) -> WorldResult<Self> {
        config.validate()?;
        Ok(Self { config })
    }

    pub fn config(&self) -> &SimConfig {
        &self.config
    }
}

impl Plugin for PhysicsPlugin {
    fn build(&self, app: &mut App) {
        let world = match SimWorld::new(self.config.clone()) {
            Ok(world) => world,
            Err(e) => panic!("Invalid simulation config: {}", e),
        };

        app.insert_resource(world)
            .init_resource::<EpisodeStats>()
            .configure_sets(
                Update,
                (
                    SimulationSet::Inputs,
                    SimulationSet::Step,
                    SimulationSet::Outputs,
                )
                    .chain(),
            )
            .add_systems(Startup, start_world)
            .add_systems(Update, step_world.in_set(SimulationSet::Step))
            .add_systems(
                Update,
                (finish_episode, sync_tracked_transform)
                    .chain()
                    .in_set(SimulationSet::Outputs),
            );
    }
}

/// Completed-episode bookkeeping.
#[derive(Resource, Debug, Default, Clone)]
pub struct EpisodeStats {
    pub episodes: u32,
    pub last_length: u32,
    pub last_reward: f32,
    pub best_reward: Option<f32>,
}

/// Marks the entity whose transform mirrors the tracked body.
#[derive(Component)]
pub struct TrackedBodyLink;

fn start_world(mut world: ResMut<SimWorld>) {
    if let Err(e) = world.start() {
        error!("Failed to start simulation world: {}", e);
    }
}

fn step_world(mut world: ResMut<SimWorld>) {
    if world.lifecycle() != Lifecycle::Ready {
        return;
    }
    if let Err(e) = world.tick() {
        warn!("Simulation step failed: {}", e);
    }
}

fn finish_episode(mut world: ResMut<SimWorld>, mut stats: ResMut<EpisodeStats>) {
    if world.lifecycle() != Lifecycle::Ready || !world.is_terminated() {
        return;
    }

    let length = world.step_count();
    let reward = world.episode_reward();
    stats.episodes += 1;
    stats.last_length = length;
    stats.last_reward = reward;
    stats.best_reward = Some(stats.best_reward.map_or(reward, |best| best.max(reward)));
    let height = world.body_position().map_or(f32::NAN, |p| p.y);
    info!(
        "Episode {} finished after {} steps, height {:.3}, reward {:.3}",
        stats.episodes, length, height, reward
    );

    if world.config().auto_reset {
        if let Err(e) = world.reset() {
            error!("Failed to reset world: {}", e);
        }
    }
}

fn sync_tracked_transform(
    world: Res<SimWorld>,
    mut query: Query<&mut Transform, With<TrackedBodyLink>>,
) {
    let Some(snapshot) = world.snapshot() else {
        return;
    };
    for mut transform in query.iter_mut() {
        transform.translation = snapshot.position;
        transform.rotation = snapshot.orientation.value();
    }
}
