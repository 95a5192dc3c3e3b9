//! Simulation configuration.
//!
//! Every section has defaults so a partial JSON file only needs the fields it
//! changes. Invalid values are rejected by [`SimConfig::validate`]; the world
//! refuses to build from a config that fails validation.
//!
//! ```ignore
//! let config = upright_core::load_config("configs/heavy_box.json")?;
//! let world = SimWorld::new(config)?;
//! ```

use bevy::math::Vec3;
use serde::{Deserialize, Serialize};
use std::fs::File;
use std::io::{BufReader, BufWriter};
use std::path::Path;

/// Errors raised while loading or validating configuration.
#[derive(Debug)]
pub enum ConfigError {
    /// File system error
    Io(std::io::Error),
    /// JSON (de)serialization error
    Json(String),
    /// A value outside its allowed range
    Invalid { field: &'static str, reason: String },
    /// Mesh data that cannot form a collision shape
    MalformedMesh(String),
}

impl std::fmt::Display for ConfigError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            ConfigError::Io(e) => write!(f, "IO error: {}", e),
            ConfigError::Json(e) => write!(f, "JSON error: {}", e),
            ConfigError::Invalid { field, reason } => {
                write!(f, "Invalid config value '{}': {}", field, reason)
            }
            ConfigError::MalformedMesh(msg) => write!(f, "Malformed mesh: {}", msg),
        }
    }
}

impl std::error::Error for ConfigError {}

impl From<std::io::Error> for ConfigError {
    fn from(e: std::io::Error) -> Self {
        ConfigError::Io(e)
    }
}

impl From<serde_json::Error> for ConfigError {
    fn from(e: serde_json::Error) -> Self {
        ConfigError::Json(e.to_string())
    }
}

pub type ConfigResult<T> = Result<T, ConfigError>;

fn invalid(field: &'static str, reason: impl Into<String>) -> ConfigError {
    ConfigError::Invalid {
        field,
        reason: reason.into(),
    }
}

/// Top-level simulation configuration.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct SimConfig {
    /// Side length of the square walled arena, in meters.
    pub arena_size: f32,
    /// Gravity in the runtime frame.
    pub gravity: [f32; 3],
    /// Fixed sub-steps integrated per `step` call from the host loop.
    pub substeps_per_tick: u32,
    /// Episode length in ticks.
    pub max_episode_steps: u32,
    /// Tracked body height (runtime Y) below which the episode terminates.
    pub min_height: f32,
    /// Seed for the disturbance/reset RNG. Entropy-seeded when `None`.
    pub seed: Option<u64>,
    /// Host loop resets the world as soon as an episode terminates.
    pub auto_reset: bool,
    pub body: BodyConfig,
    pub torque: TorqueConfig,
    pub disturbance: DisturbanceConfig,
    pub drag: DragConfig,
    pub inference: InferenceConfig,
}

impl Default for SimConfig {
    fn default() -> Self {
        Self {
            arena_size: 2.0,
            gravity: [0.0, -9.81, 0.0],
            substeps_per_tick: 4,
            max_episode_steps: 500,
            min_height: 0.05,
            seed: None,
            auto_reset: true,
            body: BodyConfig::default(),
            torque: TorqueConfig::default(),
            disturbance: DisturbanceConfig::default(),
            drag: DragConfig::default(),
            inference: InferenceConfig::default(),
        }
    }
}

impl SimConfig {
    /// Check every range constraint. The first violation wins.
    pub fn validate(&self) -> ConfigResult<()> {
        validate_arena_size(self.arena_size)?;
        if !self.gravity.iter().all(|g| g.is_finite()) {
            return Err(invalid("gravity", "must be finite"));
        }
        if self.substeps_per_tick == 0 {
            return Err(invalid("substeps_per_tick", "must be at least 1"));
        }
        if self.max_episode_steps == 0 {
            return Err(invalid("max_episode_steps", "must be at least 1"));
        }
        if !self.min_height.is_finite() {
            return Err(invalid("min_height", "must be finite"));
        }
        self.body.validate()?;
        self.torque.validate()?;
        self.disturbance.validate()?;
        self.drag.validate()?;
        self.inference.validate()
    }
}

/// Arena side length must be a positive finite number.
pub fn validate_arena_size(size: f32) -> ConfigResult<()> {
    if !size.is_finite() || size <= 0.0 {
        return Err(invalid(
            "arena_size",
            format!("must be positive and finite, got {}", size),
        ));
    }
    Ok(())
}

/// Collision shape of the tracked body.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum ShapeConfig {
    Box { half_extents: [f32; 3] },
    Mesh(TriangleMesh),
}

impl Default for ShapeConfig {
    fn default() -> Self {
        ShapeConfig::Box {
            half_extents: [0.1, 0.1, 0.1],
        }
    }
}

impl ShapeConfig {
    pub fn validate(&self) -> ConfigResult<()> {
        match self {
            ShapeConfig::Box { half_extents } => {
                if half_extents.iter().all(|h| h.is_finite() && *h > 0.0) {
                    Ok(())
                } else {
                    Err(invalid(
                        "body.shape.half_extents",
                        format!("must be positive, got {:?}", half_extents),
                    ))
                }
            }
            ShapeConfig::Mesh(mesh) => mesh.validate(),
        }
    }
}

/// Fixed triangle mesh in body-local coordinates.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TriangleMesh {
    pub vertices: Vec<[f32; 3]>,
    pub indices: Vec<[u32; 3]>,
}

impl TriangleMesh {
    /// Structural checks: enough vertices, finite coordinates, in-range
    /// indices, and a hull with volume.
    pub fn validate(&self) -> ConfigResult<()> {
        if self.vertices.len() < 4 {
            return Err(ConfigError::MalformedMesh(format!(
                "need at least 4 vertices, got {}",
                self.vertices.len()
            )));
        }
        if self.indices.is_empty() {
            return Err(ConfigError::MalformedMesh("no triangles".into()));
        }
        if let Some(v) = self
            .vertices
            .iter()
            .position(|v| !v.iter().all(|c| c.is_finite()))
        {
            return Err(ConfigError::MalformedMesh(format!(
                "vertex {} is not finite",
                v
            )));
        }
        let count = self.vertices.len() as u32;
        for (t, tri) in self.indices.iter().enumerate() {
            if let Some(i) = tri.iter().find(|&&i| i >= count) {
                return Err(ConfigError::MalformedMesh(format!(
                    "triangle {} references vertex {} of {}",
                    t, i, count
                )));
            }
        }
        if !spans_volume(&self.vertices) {
            return Err(ConfigError::MalformedMesh(
                "vertices do not span a volume".into(),
            ));
        }
        Ok(())
    }
}

/// True when the points are not all coplanar (within a relative epsilon).
fn spans_volume(vertices: &[[f32; 3]]) -> bool {
    let points: Vec<Vec3> = vertices.iter().map(|v| Vec3::from_array(*v)).collect();
    let scale = points
        .iter()
        .map(|p| p.abs().max_element())
        .fold(0.0f32, f32::max);
    if points.is_empty() || scale <= 0.0 {
        return false;
    }
    let eps = 1e-6 * scale;

    let p0 = points[0];
    let Some(p1) = points.iter().copied().find(|p| (*p - p0).length() > eps) else {
        return false;
    };
    let edge = p1 - p0;
    let Some(normal) = points
        .iter()
        .map(|p| edge.cross(*p - p0))
        .find(|n| n.length() > eps * scale)
    else {
        return false;
    };
    let normal = normal.normalize();
    points.iter().any(|p| normal.dot(*p - p0).abs() > eps)
}

/// How the tracked body is oriented after a reset.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum InitialOrientation {
    Identity,
    /// Roll, pitch and yaw uniform in [-pi, pi], sampled in the training frame.
    Random,
}

/// Tracked body parameters.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct BodyConfig {
    pub shape: ShapeConfig,
    pub mass: f32,
    /// Principal moments of inertia, set explicitly rather than derived from
    /// the shape (thin mesh hulls produce degenerate tensors).
    pub principal_inertia: [f32; 3],
    /// Spawn height of the body center (runtime Y).
    pub spawn_height: f32,
    pub initial_orientation: InitialOrientation,
    pub linear_damping: f32,
    pub angular_damping: f32,
    pub friction: f32,
    pub restitution: f32,
}

impl Default for BodyConfig {
    fn default() -> Self {
        Self {
            shape: ShapeConfig::default(),
            mass: 0.5,
            // Solid 0.2 m cube of 0.5 kg: m * (2h)^2 / 6
            principal_inertia: [0.0033, 0.0033, 0.0033],
            spawn_height: 0.3,
            initial_orientation: InitialOrientation::Random,
            linear_damping: 0.05,
            angular_damping: 0.05,
            friction: 0.6,
            restitution: 0.1,
        }
    }
}

impl BodyConfig {
    pub fn validate(&self) -> ConfigResult<()> {
        self.shape.validate()?;
        if !self.mass.is_finite() || self.mass <= 0.0 {
            return Err(invalid("body.mass", "must be positive"));
        }
        if !self
            .principal_inertia
            .iter()
            .all(|i| i.is_finite() && *i > 0.0)
        {
            return Err(invalid("body.principal_inertia", "must be positive"));
        }
        if !self.spawn_height.is_finite() {
            return Err(invalid("body.spawn_height", "must be finite"));
        }
        for (field, value) in [
            ("body.linear_damping", self.linear_damping),
            ("body.angular_damping", self.angular_damping),
            ("body.friction", self.friction),
            ("body.restitution", self.restitution),
        ] {
            if !value.is_finite() || value < 0.0 {
                return Err(invalid(field, "must be non-negative"));
            }
        }
        Ok(())
    }
}

/// Torque controller parameters.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct TorqueConfig {
    /// Smoothing factor k in `applied = applied * (1 - k) + target * k`.
    pub ramp_rate: f32,
    /// Per-axis bound on the applied torque (N*m).
    pub max_torque: f32,
    /// Policy action units to N*m.
    pub action_scale: f32,
}

impl Default for TorqueConfig {
    fn default() -> Self {
        Self {
            ramp_rate: 0.2,
            max_torque: 0.1,
            action_scale: 0.1,
        }
    }
}

impl TorqueConfig {
    pub fn validate(&self) -> ConfigResult<()> {
        if !(self.ramp_rate > 0.0 && self.ramp_rate <= 1.0) {
            return Err(invalid("torque.ramp_rate", "must be in (0, 1]"));
        }
        if !self.max_torque.is_finite() || self.max_torque <= 0.0 {
            return Err(invalid("torque.max_torque", "must be positive"));
        }
        if !self.action_scale.is_finite() {
            return Err(invalid("torque.action_scale", "must be finite"));
        }
        Ok(())
    }
}

/// Random torque kicks applied to the tracked body.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct DisturbanceConfig {
    /// Chance per sub-step of a kick.
    pub probability: f64,
    /// Per-axis bound of the body-local kick torque (N*m).
    pub magnitude: f32,
}

impl Default for DisturbanceConfig {
    fn default() -> Self {
        Self {
            probability: 0.002,
            magnitude: 0.05,
        }
    }
}

impl DisturbanceConfig {
    pub fn validate(&self) -> ConfigResult<()> {
        if !(0.0..=1.0).contains(&self.probability) {
            return Err(invalid("disturbance.probability", "must be in [0, 1]"));
        }
        if !self.magnitude.is_finite() || self.magnitude < 0.0 {
            return Err(invalid("disturbance.magnitude", "must be non-negative"));
        }
        Ok(())
    }
}

/// Damping applied to the tracked body while it is held.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct DragConfig {
    pub linear_damping: f32,
    pub angular_damping: f32,
}

impl Default for DragConfig {
    fn default() -> Self {
        Self {
            linear_damping: 4.0,
            angular_damping: 4.0,
        }
    }
}

impl DragConfig {
    pub fn validate(&self) -> ConfigResult<()> {
        if !self.linear_damping.is_finite() || self.linear_damping < 0.0 {
            return Err(invalid("drag.linear_damping", "must be non-negative"));
        }
        if !self.angular_damping.is_finite() || self.angular_damping < 0.0 {
            return Err(invalid("drag.angular_damping", "must be non-negative"));
        }
        Ok(())
    }
}

/// Which orientation feeds the observation history.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum OrientationSource {
    /// The simulated body's own orientation.
    GroundTruth,
    /// The last pose-estimator prediction, ground truth until one arrives.
    Predicted,
}

/// Cadence of the external inference calls.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct InferenceConfig {
    pub orientation_source: OrientationSource,
    /// Submit a pose request every N frames.
    pub pose_interval_frames: u32,
    /// Submit a policy request every N frames.
    pub policy_interval_frames: u32,
}

impl Default for InferenceConfig {
    fn default() -> Self {
        Self {
            orientation_source: OrientationSource::Predicted,
            pose_interval_frames: 6,
            policy_interval_frames: 1,
        }
    }
}

impl InferenceConfig {
    pub fn validate(&self) -> ConfigResult<()> {
        if self.pose_interval_frames == 0 {
            return Err(invalid("inference.pose_interval_frames", "must be at least 1"));
        }
        if self.policy_interval_frames == 0 {
            return Err(invalid(
                "inference.policy_interval_frames",
                "must be at least 1",
            ));
        }
        Ok(())
    }
}

/// Load and validate a JSON config file.
pub fn load_config<P: AsRef<Path>>(path: P) -> ConfigResult<SimConfig> {
    let file = File::open(path.as_ref())?;
    let config: SimConfig = serde_json::from_reader(BufReader::new(file))?;
    config.validate()?;
    Ok(config)
}

/// Write a config as pretty JSON.
pub fn save_config<P: AsRef<Path>>(config: &SimConfig, path: P) -> ConfigResult<()> {
    let file = File::create(path.as_ref())?;
    serde_json::to_writer_pretty(BufWriter::new(file), config)?;
    Ok(())
}
