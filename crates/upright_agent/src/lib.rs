//! Inference boundary and the per-frame agent.
//!
//! The networks themselves live outside this crate; anything implementing
//! [`PoseEstimator`] or [`Policy`] can be plugged in. [`AgentPlugin`] drives
//! an [`Agent`] resource before the physics step each frame.

use bevy::prelude::*;

pub mod agent;
pub mod inference;
pub mod policy;
pub mod worker;

pub use agent::Agent;
pub use inference::{
    InferenceError, InferenceResult, Policy, PoseEstimator, PoseImage, POSE_IMAGE_SIZE,
};
pub use policy::UprightPolicy;
pub use worker::{InferenceJob, InferenceOutcome, InferenceWorker};

use upright_physics::{SimWorld, SimulationSet};

/// Latest camera frame, consumed by the next agent tick.
#[derive(Resource, Default)]
pub struct ImageFeed {
    pub latest: Option<PoseImage>,
}

/// Runs the [`Agent`] resource in [`SimulationSet::Inputs`].
///
/// Insert the `Agent` yourself; frames without one (or without a world) are
/// skipped.
pub struct AgentPlugin;

impl Plugin for AgentPlugin {
    fn build(&self, app: &mut App) {
        app.init_resource::<ImageFeed>()
            .add_systems(Update, drive_agent.in_set(SimulationSet::Inputs));
    }
}

fn drive_agent(
    agent: Option<ResMut<Agent>>,
    world: Option<ResMut<SimWorld>>,
    mut feed: ResMut<ImageFeed>,
) {
    let (Some(mut agent), Some(mut world)) = (agent, world) else {
        return;
    };
    if world.lifecycle() != upright_physics::Lifecycle::Ready {
        return;
    }
    let image = feed.latest.take();
    agent.tick(&mut world, image);
}
