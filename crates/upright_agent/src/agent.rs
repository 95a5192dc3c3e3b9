//! Per-frame wiring between the world and the inference worker.
//!
//! Each frame the agent first applies whatever the worker finished since the
//! last frame, then decides whether to submit new work:
//!
//! - every `pose_interval_frames`, a camera frame for the pose estimator
//!   (only when the world observes predictions and an estimator exists),
//! - every `policy_interval_frames`, the current observation for the policy.
//!
//! Between results the world keeps stepping on the last prediction and the
//! last action. Failures are logged and treated as missing results.

use bevy::log::{debug, warn};
use bevy::prelude::Resource;

use upright_core::{pose_error, InferenceConfig, OrientationSource};
use upright_physics::SimWorld;

use crate::inference::{Policy, PoseEstimator, PoseImage};
use crate::worker::{InferenceJob, InferenceOutcome, InferenceWorker};

#[derive(Resource)]
pub struct Agent {
    worker: InferenceWorker,
    config: InferenceConfig,
    frame: u64,
    failures: u64,
}

impl Agent {
    pub fn new(worker: InferenceWorker, config: InferenceConfig) -> Self {
        Self {
            worker,
            config,
            frame: 0,
            failures: 0,
        }
    }

    /// Spawn a worker for the given networks.
    pub fn spawn(
        estimator: Option<Box<dyn PoseEstimator>>,
        policy: Box<dyn Policy>,
        config: InferenceConfig,
    ) -> Self {
        Self::new(InferenceWorker::spawn(estimator, policy), config)
    }

    /// Apply finished results, then submit this frame's work.
    pub fn tick(&mut self, world: &mut SimWorld, image: Option<PoseImage>) {
        if let Some(outcome) = self.worker.poll() {
            self.apply(world, outcome);
        }

        let frame = self.frame;
        self.frame += 1;

        if !world.has_tracked_body() {
            world.clear_action();
            return;
        }

        let wants_pose = self.config.orientation_source == OrientationSource::Predicted
            && self.worker.has_estimator()
            && frame % u64::from(self.config.pose_interval_frames.max(1)) == 0;
        let wants_action = frame % u64::from(self.config.policy_interval_frames.max(1)) == 0;

        let job = InferenceJob {
            image: if wants_pose { image } else { None },
            observation: wants_action.then(|| world.observation()),
        };
        if !job.is_empty() {
            self.worker.submit(job);
        }
    }

    /// Block for the in-flight job and apply it. Used where frame pacing
    /// does not matter, such as tests and batch runs.
    pub fn flush(&mut self, world: &mut SimWorld) {
        if let Some(outcome) = self.worker.wait() {
            self.apply(world, outcome);
        }
    }

    fn apply(&mut self, world: &mut SimWorld, outcome: InferenceOutcome) {
        match outcome.pose {
            Some(Ok(orientation)) => {
                if let Some(truth) = world.body_orientation() {
                    let error = pose_error(orientation.value(), truth.value());
                    debug!(
                        "Pose prediction applied (L2 {:.4}, {:.2} deg off)",
                        error.l2, error.angle_deg
                    );
                }
                world.set_predicted_orientation(orientation);
            }
            Some(Err(e)) => {
                self.failures += 1;
                warn!("Pose inference failed: {}", e);
                world.clear_predicted_orientation();
            }
            None => {}
        }

        match outcome.action {
            Some(Ok(action)) => world.set_action(action),
            Some(Err(e)) => {
                self.failures += 1;
                warn!("Policy inference failed: {}", e);
                world.clear_action();
            }
            None => {}
        }
    }

    pub fn frame(&self) -> u64 {
        self.frame
    }

    pub fn failures(&self) -> u64 {
        self.failures
    }

    pub fn worker(&self) -> &InferenceWorker {
        &self.worker
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::inference::{InferenceError, InferenceResult};
    use crate::policy::UprightPolicy;
    use bevy::math::{Quat, Vec3};
    use image::{Rgb, RgbImage};
    use upright_core::{InitialOrientation, Observation, RuntimeQuat, SimConfig};

    fn world(source: OrientationSource) -> SimWorld {
        let mut config = SimConfig {
            seed: Some(11),
            ..Default::default()
        };
        config.body.initial_orientation = InitialOrientation::Identity;
        config.disturbance.probability = 0.0;
        config.inference.orientation_source = source;
        let mut world = SimWorld::new(config).unwrap();
        world.start().unwrap();
        world
    }

    fn frame() -> PoseImage {
        PoseImage::from_rgb(&RgbImage::from_pixel(224, 224, Rgb([90, 90, 90]))).unwrap()
    }

    fn config(pose_interval_frames: u32) -> InferenceConfig {
        InferenceConfig {
            orientation_source: OrientationSource::Predicted,
            pose_interval_frames,
            policy_interval_frames: 1,
        }
    }

    #[test]
    fn test_action_reaches_controller_in_runtime_frame() {
        let mut world = world(OrientationSource::GroundTruth);
        let policy = |_: &Observation| -> InferenceResult<[f32; 3]> { Ok([0.0, 0.0, 1.0]) };
        let mut agent = Agent::spawn(None, Box::new(policy), config(1));

        agent.tick(&mut world, None);
        agent.flush(&mut world);

        let current = world.action_history().current().value();
        assert_eq!(current, Vec3::new(0.0, 0.0, 1.0), "history keeps the training frame");
        let target = world.controller().target().value();
        assert!((target - Vec3::new(0.0, -0.1, 0.0)).length() < 1e-6);
    }

    #[test]
    fn test_prediction_is_applied_and_reused() {
        let mut world = world(OrientationSource::Predicted);
        let tilt = Quat::from_rotation_z(0.4);
        let estimator = move |_: &PoseImage| -> InferenceResult<[f32; 4]> { Ok(tilt.to_array()) };
        let mut agent = Agent::spawn(
            Some(Box::new(estimator)),
            Box::new(UprightPolicy::default()),
            config(6),
        );

        agent.tick(&mut world, Some(frame()));
        agent.flush(&mut world);
        let held = world.predicted_orientation().unwrap();
        assert!((held.value().xyz() - tilt.xyz()).length() < 1e-6);

        // Frames 1..5 carry no pose request; the prediction stays.
        for _ in 0..5 {
            world.tick().unwrap();
            agent.tick(&mut world, Some(frame()));
            agent.flush(&mut world);
            assert_eq!(world.predicted_orientation(), Some(held));
        }
        assert_eq!(world.observed_orientation(), held);
    }

    #[test]
    fn test_pose_failure_falls_back_to_ground_truth() {
        let mut world = world(OrientationSource::Predicted);
        world.set_predicted_orientation(RuntimeQuat::new(Quat::from_rotation_x(1.0)));
        let estimator = |_: &PoseImage| -> InferenceResult<[f32; 4]> {
            Err(InferenceError::Engine("session lost".into()))
        };
        let mut agent = Agent::spawn(
            Some(Box::new(estimator)),
            Box::new(UprightPolicy::default()),
            config(1),
        );

        agent.tick(&mut world, Some(frame()));
        agent.flush(&mut world);
        assert_eq!(agent.failures(), 1);
        assert!(world.predicted_orientation().is_none());
        assert_eq!(world.observed_orientation(), world.body_orientation().unwrap());

        world.tick().unwrap();
        assert_eq!(world.lifecycle(), upright_physics::Lifecycle::Ready);
    }

    #[test]
    fn test_policy_failure_zeroes_target() {
        let mut world = world(OrientationSource::GroundTruth);
        world.set_action(upright_core::TrainingVec3::new(Vec3::ONE));
        let policy = |_: &Observation| -> InferenceResult<[f32; 3]> { panic!("bad tensor") };
        let mut agent = Agent::spawn(None, Box::new(policy), config(1));

        agent.tick(&mut world, None);
        agent.flush(&mut world);
        assert_eq!(agent.failures(), 1);
        assert_eq!(world.controller().target().value(), Vec3::ZERO);
    }

    #[test]
    fn test_ground_truth_source_skips_pose_requests() {
        let mut world = world(OrientationSource::GroundTruth);
        let estimator = |_: &PoseImage| -> InferenceResult<[f32; 4]> { Ok([0.0, 0.0, 0.0, 1.0]) };
        let mut agent = Agent::new(
            InferenceWorker::spawn(Some(Box::new(estimator)), Box::new(UprightPolicy::default())),
            InferenceConfig {
                orientation_source: OrientationSource::GroundTruth,
                ..config(1)
            },
        );
        agent.tick(&mut world, Some(frame()));
        agent.flush(&mut world);
        assert!(world.predicted_orientation().is_none());
    }
}
