//! Core math and data contracts for the upright-box controller.
//!
//! This crate provides:
//! - Quaternion utilities (normalization, sign canonicalization, z-axis, Euler)
//! - Runtime/training frame conversion with frame-tagged values
//! - Two-slot orientation and action histories
//! - The 23-feature observation consumed by the control policy
//! - Simulation configuration and its validation

pub mod config;
pub mod frame;
pub mod history;
pub mod observation;
pub mod quat;

pub use config::{
    load_config, save_config, validate_arena_size, BodyConfig, ConfigError, ConfigResult,
    DisturbanceConfig, DragConfig, InferenceConfig, InitialOrientation, OrientationSource,
    ShapeConfig, SimConfig, TorqueConfig, TriangleMesh,
};
pub use frame::{
    runtime_to_training, training_to_runtime, Frame, FrameTag, Framed, Reframe, Runtime,
    RuntimeQuat, RuntimeVec3, Training, TrainingQuat, TrainingVec3,
};
pub use history::{ActionHistory, DelayLine, OrientationHistory};
pub use observation::{Observation, OrientationClass, OBSERVATION_LEN};
pub use quat::{pose_error, PoseError};
