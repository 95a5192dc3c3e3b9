//! Boundary to the pose and policy networks.
//!
//! Both networks are treated as pure functions. The pose estimator takes a
//! 224x224 channel-first RGB tensor normalized with the ImageNet statistics
//! and returns four raw scalars (x, y, z, w) that are neither unit nor sign
//! canonical. The policy takes the 23-feature training-frame observation and
//! returns a training-frame torque command.

use bevy::math::Vec3;
use image::imageops::{self, FilterType};
use image::{DynamicImage, RgbImage, RgbaImage};

use upright_core::{quat, Observation, RuntimeQuat, TrainingVec3};

/// Side length of the pose network input.
pub const POSE_IMAGE_SIZE: u32 = 224;
pub const IMAGENET_MEAN: [f32; 3] = [0.485, 0.456, 0.406];
pub const IMAGENET_STD: [f32; 3] = [0.229, 0.224, 0.225];

/// Errors surfaced by the inference boundary.
#[derive(Debug, Clone, PartialEq)]
pub enum InferenceError {
    /// The engine rejected the call
    Engine(String),
    /// The engine returned something unusable (non-finite values)
    BadOutput(String),
    /// The engine panicked; the worker survived
    Panicked(String),
    /// The input frame could not be turned into a tensor
    Image(String),
}

impl std::fmt::Display for InferenceError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            InferenceError::Engine(e) => write!(f, "Inference engine error: {}", e),
            InferenceError::BadOutput(e) => write!(f, "Bad inference output: {}", e),
            InferenceError::Panicked(e) => write!(f, "Inference engine panicked: {}", e),
            InferenceError::Image(e) => write!(f, "Image error: {}", e),
        }
    }
}

impl std::error::Error for InferenceError {}

impl From<image::ImageError> for InferenceError {
    fn from(e: image::ImageError) -> Self {
        InferenceError::Image(e.to_string())
    }
}

pub type InferenceResult<T> = Result<T, InferenceError>;

/// Normalized channel-first RGB tensor, `[3, 224, 224]`.
#[derive(Debug, Clone, PartialEq)]
pub struct PoseImage {
    data: Vec<f32>,
}

impl PoseImage {
    /// Resize (if needed) and normalize an RGB frame.
    pub fn from_rgb(image: &RgbImage) -> InferenceResult<Self> {
        if image.width() == 0 || image.height() == 0 {
            return Err(InferenceError::Image("empty frame".into()));
        }

        let size = POSE_IMAGE_SIZE;
        let resized;
        let source = if image.dimensions() == (size, size) {
            image
        } else {
            resized = imageops::resize(image, size, size, FilterType::Triangle);
            &resized
        };

        let plane = (size * size) as usize;
        let mut data = vec![0.0; 3 * plane];
        for (x, y, pixel) in source.enumerate_pixels() {
            let offset = (y * size + x) as usize;
            for c in 0..3 {
                let value = pixel[c] as f32 / 255.0;
                data[c * plane + offset] = (value - IMAGENET_MEAN[c]) / IMAGENET_STD[c];
            }
        }
        Ok(Self { data })
    }

    /// Build from a raw RGBA8 buffer, the layout renderers read back.
    pub fn from_rgba8(width: u32, height: u32, bytes: Vec<u8>) -> InferenceResult<Self> {
        let rgba = RgbaImage::from_raw(width, height, bytes).ok_or_else(|| {
            InferenceError::Image(format!("buffer does not match {}x{} RGBA", width, height))
        })?;
        Self::from_rgb(&DynamicImage::ImageRgba8(rgba).to_rgb8())
    }

    pub fn shape(&self) -> [usize; 3] {
        let side = POSE_IMAGE_SIZE as usize;
        [3, side, side]
    }

    pub fn as_slice(&self) -> &[f32] {
        &self.data
    }

    /// Value at channel `c`, row `y`, column `x`.
    pub fn get(&self, c: usize, y: usize, x: usize) -> Option<f32> {
        let side = POSE_IMAGE_SIZE as usize;
        if c >= 3 || y >= side || x >= side {
            return None;
        }
        self.data.get(c * side * side + y * side + x).copied()
    }
}

/// Predicts the body orientation from a camera frame.
pub trait PoseEstimator: Send + 'static {
    /// Raw `[x, y, z, w]` in the runtime frame.
    fn predict_pose(&mut self, image: &PoseImage) -> InferenceResult<[f32; 4]>;
}

impl<F> PoseEstimator for F
where
    F: FnMut(&PoseImage) -> InferenceResult<[f32; 4]> + Send + 'static,
{
    fn predict_pose(&mut self, image: &PoseImage) -> InferenceResult<[f32; 4]> {
        self(image)
    }
}

/// Maps an observation to a training-frame torque command.
pub trait Policy: Send + 'static {
    fn predict_action(&mut self, observation: &Observation) -> InferenceResult<[f32; 3]>;
}

impl<F> Policy for F
where
    F: FnMut(&Observation) -> InferenceResult<[f32; 3]> + Send + 'static,
{
    fn predict_action(&mut self, observation: &Observation) -> InferenceResult<[f32; 3]> {
        self(observation)
    }
}

/// Validate raw pose output and bring it to unit, canonical form.
pub fn pose_from_output(raw: [f32; 4]) -> InferenceResult<RuntimeQuat> {
    if !raw.iter().all(|v| v.is_finite()) {
        return Err(InferenceError::BadOutput(format!(
            "non-finite quaternion {:?}",
            raw
        )));
    }
    Ok(RuntimeQuat::new(quat::from_raw(raw)))
}

/// Validate raw policy output.
pub fn action_from_output(raw: [f32; 3]) -> InferenceResult<TrainingVec3> {
    let action = Vec3::from_array(raw);
    if !action.is_finite() {
        return Err(InferenceError::BadOutput(format!(
            "non-finite action {:?}",
            raw
        )));
    }
    Ok(TrainingVec3::new(action))
}
