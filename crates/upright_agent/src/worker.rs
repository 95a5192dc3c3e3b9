//! Background inference thread.
//!
//! One thread owns both networks, so calls are strictly serialized. The
//! frame loop submits a job and keeps stepping; a job submitted while another
//! is in flight is dropped, never queued behind it. An in-flight job always
//! runs to completion and its outcome is delivered.

use std::panic::{self, AssertUnwindSafe};
use std::thread::{self, JoinHandle};

use async_channel::{Receiver, Sender, TryRecvError};
use bevy::log::{debug, warn};

use upright_core::{Observation, RuntimeQuat, TrainingVec3};

use crate::inference::{
    action_from_output, pose_from_output, InferenceError, InferenceResult, Policy, PoseEstimator,
    PoseImage,
};

/// Work for one round trip. Pose runs before policy when both are present.
#[derive(Debug, Clone, Default)]
pub struct InferenceJob {
    pub image: Option<PoseImage>,
    pub observation: Option<Observation>,
}

impl InferenceJob {
    pub fn is_empty(&self) -> bool {
        self.image.is_none() && self.observation.is_none()
    }
}

/// Result of one job. A field is `None` when the job did not ask for it.
#[derive(Debug, Clone, Default)]
pub struct InferenceOutcome {
    pub pose: Option<InferenceResult<RuntimeQuat>>,
    pub action: Option<InferenceResult<TrainingVec3>>,
}

pub struct InferenceWorker {
    jobs: Sender<InferenceJob>,
    outcomes: Receiver<InferenceOutcome>,
    handle: Option<JoinHandle<()>>,
    in_flight: bool,
    has_estimator: bool,
    dropped: u64,
}

impl InferenceWorker {
    /// Start the worker thread. Without an estimator, pose requests fail with
    /// [`InferenceError::Engine`].
    pub fn spawn(estimator: Option<Box<dyn PoseEstimator>>, policy: Box<dyn Policy>) -> Self {
        let (jobs_tx, jobs_rx) = async_channel::bounded::<InferenceJob>(1);
        let (outcomes_tx, outcomes_rx) = async_channel::bounded::<InferenceOutcome>(1);
        let has_estimator = estimator.is_some();

        let handle = thread::spawn(move || {
            run_worker(estimator, policy, jobs_rx, outcomes_tx);
        });

        Self {
            jobs: jobs_tx,
            outcomes: outcomes_rx,
            handle: Some(handle),
            in_flight: false,
            has_estimator,
            dropped: 0,
        }
    }

    /// Hand a job to the worker. Returns false (and drops the job) when one
    /// is already in flight or the worker is gone.
    pub fn submit(&mut self, job: InferenceJob) -> bool {
        if job.is_empty() {
            return false;
        }
        if self.in_flight {
            self.dropped += 1;
            debug!("Inference busy, dropping request ({} dropped)", self.dropped);
            return false;
        }
        match self.jobs.try_send(job) {
            Ok(()) => {
                self.in_flight = true;
                true
            }
            Err(e) => {
                warn!("Inference worker unavailable: {}", e);
                false
            }
        }
    }

    /// Collect the finished outcome, if any. Never blocks.
    pub fn poll(&mut self) -> Option<InferenceOutcome> {
        match self.outcomes.try_recv() {
            Ok(outcome) => {
                self.in_flight = false;
                Some(outcome)
            }
            Err(TryRecvError::Empty) => None,
            Err(TryRecvError::Closed) => {
                self.in_flight = false;
                None
            }
        }
    }

    /// Block until the in-flight job finishes.
    pub fn wait(&mut self) -> Option<InferenceOutcome> {
        if !self.in_flight {
            return None;
        }
        self.in_flight = false;
        self.outcomes.recv_blocking().ok()
    }

    pub fn is_busy(&self) -> bool {
        self.in_flight
    }

    pub fn has_estimator(&self) -> bool {
        self.has_estimator
    }

    /// Jobs rejected because another was in flight.
    pub fn dropped(&self) -> u64 {
        self.dropped
    }
}

impl Drop for InferenceWorker {
    fn drop(&mut self) {
        self.jobs.close();
        self.outcomes.close();
        if let Some(handle) = self.handle.take() {
            if handle.join().is_err() {
                warn!("Inference worker thread exited abnormally");
            }
        }
    }
}

fn run_worker(
    mut estimator: Option<Box<dyn PoseEstimator>>,
    mut policy: Box<dyn Policy>,
    jobs: Receiver<InferenceJob>,
    outcomes: Sender<InferenceOutcome>,
) {
    while let Ok(job) = jobs.recv_blocking() {
        let pose = job.image.map(|image| match estimator.as_mut() {
            Some(estimator) => guarded(|| estimator.predict_pose(&image)).and_then(pose_from_output),
            None => Err(InferenceError::Engine("no pose estimator configured".into())),
        });
        let action = job
            .observation
            .map(|obs| guarded(|| policy.predict_action(&obs)).and_then(action_from_output));

        if outcomes.send_blocking(InferenceOutcome { pose, action }).is_err() {
            break;
        }
    }
}

/// Run a collaborator call, converting a panic into an error.
fn guarded<T>(call: impl FnOnce() -> InferenceResult<T>) -> InferenceResult<T> {
    panic::catch_unwind(AssertUnwindSafe(call)).unwrap_or_else(|payload| {
        let message = payload
            .downcast_ref::<&str>()
            .map(|s| s.to_string())
            .or_else(|| payload.downcast_ref::<String>().cloned())
            .unwrap_or_else(|| "unknown panic".to_string());
        Err(InferenceError::Panicked(message))
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use image::{Rgb, RgbImage};
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::sync::{Arc, Mutex};

    fn frame() -> PoseImage {
        PoseImage::from_rgb(&RgbImage::from_pixel(224, 224, Rgb([40, 80, 120]))).unwrap()
    }

    fn zero_policy() -> Box<dyn Policy> {
        Box::new(|_: &Observation| -> InferenceResult<[f32; 3]> { Ok([0.0; 3]) })
    }

    #[test]
    fn test_pose_and_action_round_trip() {
        let estimator = |_: &PoseImage| -> InferenceResult<[f32; 4]> { Ok([0.0, 0.0, 0.0, -3.0]) };
        let policy = |_: &Observation| -> InferenceResult<[f32; 3]> { Ok([0.1, -0.2, 0.3]) };
        let mut worker = InferenceWorker::spawn(Some(Box::new(estimator)), Box::new(policy));

        assert!(worker.submit(InferenceJob {
            image: Some(frame()),
            observation: Some(Observation::from([0.0; 23])),
        }));
        let outcome = worker.wait().unwrap();
        let pose = outcome.pose.unwrap().unwrap();
        assert_eq!(pose.value(), bevy::math::Quat::IDENTITY, "pose must be canonical");
        let action = outcome.action.unwrap().unwrap();
        assert_eq!(action.value().to_array(), [0.1, -0.2, 0.3]);
        assert!(!worker.is_busy());
    }

    #[test]
    fn test_busy_worker_drops_requests() {
        let gate = Arc::new(Mutex::new(()));
        let calls = Arc::new(AtomicUsize::new(0));
        let held = gate.lock().unwrap();

        let policy = {
            let gate = gate.clone();
            let calls = calls.clone();
            move |_: &Observation| -> InferenceResult<[f32; 3]> {
                let _wait = gate.lock().map_err(|e| InferenceError::Engine(e.to_string()))?;
                calls.fetch_add(1, Ordering::SeqCst);
                Ok([0.0; 3])
            }
        };
        let mut worker = InferenceWorker::spawn(None, Box::new(policy));
        let job = || InferenceJob {
            image: None,
            observation: Some(Observation::from([0.0; 23])),
        };

        assert!(worker.submit(job()));
        assert!(worker.poll().is_none(), "gate holds the first call");
        assert!(!worker.submit(job()));
        assert!(!worker.submit(job()));
        assert_eq!(worker.dropped(), 2);

        drop(held);
        assert!(worker.wait().is_some());
        assert_eq!(calls.load(Ordering::SeqCst), 1, "dropped jobs never run");

        assert!(worker.submit(job()));
        assert!(worker.wait().is_some());
        assert_eq!(calls.load(Ordering::SeqCst), 2);
    }

    #[test]
    fn test_panic_is_contained() {
        let estimator = |_: &PoseImage| -> InferenceResult<[f32; 4]> { panic!("tensor mismatch") };
        let mut worker = InferenceWorker::spawn(Some(Box::new(estimator)), zero_policy());

        worker.submit(InferenceJob {
            image: Some(frame()),
            observation: Some(Observation::from([0.0; 23])),
        });
        let outcome = worker.wait().unwrap();
        assert_eq!(
            outcome.pose.unwrap().unwrap_err(),
            InferenceError::Panicked("tensor mismatch".into())
        );
        assert!(outcome.action.unwrap().is_ok(), "policy still runs after a pose panic");

        // The thread survives for the next job.
        worker.submit(InferenceJob {
            image: None,
            observation: Some(Observation::from([0.0; 23])),
        });
        assert!(worker.wait().unwrap().action.unwrap().is_ok());
    }

    #[test]
    fn test_missing_estimator_reports_engine_error() {
        let mut worker = InferenceWorker::spawn(None, zero_policy());
        assert!(!worker.has_estimator());
        worker.submit(InferenceJob {
            image: Some(frame()),
            observation: None,
        });
        let outcome = worker.wait().unwrap();
        assert!(matches!(outcome.pose, Some(Err(InferenceError::Engine(_)))));
        assert!(outcome.action.is_none());
    }

    #[test]
    fn test_empty_job_not_submitted() {
        let mut worker = InferenceWorker::spawn(None, zero_policy());
        assert!(!worker.submit(InferenceJob::default()));
        assert!(!worker.is_busy());
        assert!(worker.wait().is_none());
    }

    #[test]
    fn test_bad_output_rejected() {
        let policy = |_: &Observation| -> InferenceResult<[f32; 3]> { Ok([f32::NAN, 0.0, 0.0]) };
        let mut worker = InferenceWorker::spawn(None, Box::new(policy));
        worker.submit(InferenceJob {
            image: None,
            observation: Some(Observation::from([0.0; 23])),
        });
        let outcome = worker.wait().unwrap();
        assert!(matches!(outcome.action, Some(Err(InferenceError::BadOutput(_)))));
    }
}
