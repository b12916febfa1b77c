//! Plain configuration structs.
//!
//! Every config is freely mutable and carries no derived state. Validation
//! happens in an explicit step: [`IndexingConfig::validate`],
//! [`HistoryConfig::validate`], or [`SchemaConfig::finalize`](crate::schema)
//! which produces an immutable [`Schema`](crate::Schema).

use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};

use crate::error::PoseSearchError;
use crate::math::MirrorAxis;
use crate::Result;

/// Upper bound on the schema sample rate, in samples per second.
pub const MAX_SAMPLE_RATE: u32 = 60;

fn from_json<T: DeserializeOwned>(json: &str) -> Result<T> {
    serde_json::from_str(json).map_err(|e| PoseSearchError::InvalidConfig {
        reason: e.to_string(),
    })
}

fn invalid(reason: impl Into<String>) -> PoseSearchError {
    PoseSearchError::InvalidConfig {
        reason: reason.into(),
    }
}

/// Statistical transform applied to the assembled pose table.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub enum PreprocessPolicy {
    None,
    #[default]
    Normalize,
    Sphere,
}

/// Which feature categories the generated layout includes.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default, rename_all = "camelCase")]
pub struct FeatureToggles {
    pub trajectory_positions: bool,
    pub trajectory_velocities: bool,
    pub bone_positions: bool,
    pub bone_rotations: bool,
    pub bone_velocities: bool,
    pub bone_angular_velocities: bool,
}

impl Default for FeatureToggles {
    fn default() -> Self {
        Self {
            trajectory_positions: true,
            trajectory_velocities: true,
            bone_positions: true,
            bone_rotations: false,
            bone_velocities: true,
            bone_angular_velocities: false,
        }
    }
}

/// One scalar per semantic feature category, spread over every subsample of it.
#[derive(Clone, Copy, Debug, PartialEq, Serialize, Deserialize)]
#[serde(default, rename_all = "camelCase")]
pub struct CategoryWeights {
    pub trajectory_position: f32,
    pub trajectory_velocity: f32,
    pub bone_position: f32,
    pub bone_rotation: f32,
    pub bone_velocity: f32,
    pub bone_angular_velocity: f32,
}

impl Default for CategoryWeights {
    fn default() -> Self {
        Self {
            trajectory_position: 1.0,
            trajectory_velocity: 1.0,
            bone_position: 1.0,
            bone_rotation: 1.0,
            bone_velocity: 1.0,
            bone_angular_velocity: 1.0,
        }
    }
}

/// Editable schema description; see [`SchemaConfig::finalize`](crate::schema).
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(default, rename_all = "camelCase")]
pub struct SchemaConfig {
    /// Poses indexed per second of clip time. Clamped to `1..=60` on finalize.
    pub sample_rate: u32,
    /// Skeleton bone names whose features enter the pose vector.
    pub bones: Vec<String>,
    /// Seconds relative to the sample for bone features (negative is past).
    pub pose_sample_times: Vec<f32>,
    /// Seconds relative to the sample for time-domain trajectory features.
    pub trajectory_sample_times: Vec<f32>,
    /// Root travel relative to the sample for distance-domain trajectory features.
    pub trajectory_sample_distances: Vec<f32>,
    pub features: FeatureToggles,
    pub preprocessor: PreprocessPolicy,
    pub mirror_axis: Option<MirrorAxis>,
    pub weights: CategoryWeights,
}

impl Default for SchemaConfig {
    fn default() -> Self {
        Self {
            sample_rate: 30,
            bones: Vec::new(),
            pose_sample_times: vec![0.0],
            trajectory_sample_times: Vec::new(),
            trajectory_sample_distances: Vec::new(),
            features: FeatureToggles::default(),
            preprocessor: PreprocessPolicy::default(),
            mirror_axis: None,
            weights: CategoryWeights::default(),
        }
    }
}

impl SchemaConfig {
    pub fn from_json_str(json: &str) -> Result<Self> {
        from_json(json)
    }
}

/// Offline indexing parameters.
#[derive(Clone, Copy, Debug, PartialEq, Serialize, Deserialize)]
#[serde(default, rename_all = "camelCase")]
pub struct IndexingConfig {
    /// Finite-difference step `h` for velocity features, in seconds.
    pub finite_delta: f32,
    /// Rate of the per-clip root distance table, in samples per second.
    pub root_distance_sample_rate: u32,
    /// Sample and index clips on the rayon pool.
    pub parallel: bool,
}

impl Default for IndexingConfig {
    fn default() -> Self {
        Self {
            finite_delta: 1.0 / 60.0,
            root_distance_sample_rate: 60,
            parallel: true,
        }
    }
}

impl IndexingConfig {
    pub fn from_json_str(json: &str) -> Result<Self> {
        from_json(json)
    }

    pub fn validate(&self) -> Result<()> {
        if !(self.finite_delta.is_finite() && self.finite_delta > 0.0) {
            return Err(invalid(format!(
                "finite delta must be positive, got {}",
                self.finite_delta
            )));
        }
        if self.root_distance_sample_rate == 0 {
            return Err(invalid("root distance sample rate must be non-zero"));
        }
        Ok(())
    }
}

/// Capacity and time horizon of a [`PoseHistory`](crate::PoseHistory).
#[derive(Clone, Copy, Debug, PartialEq, Serialize, Deserialize)]
#[serde(default, rename_all = "camelCase")]
pub struct HistoryConfig {
    /// Number of buffered poses.
    pub capacity: usize,
    /// Seconds of history that must stay sampleable.
    pub time_horizon: f32,
}

impl Default for HistoryConfig {
    fn default() -> Self {
        Self {
            capacity: 64,
            time_horizon: 1.0,
        }
    }
}

impl HistoryConfig {
    pub fn from_json_str(json: &str) -> Result<Self> {
        from_json(json)
    }

    pub fn validate(&self) -> Result<()> {
        if self.capacity < 2 {
            return Err(invalid(format!(
                "history capacity must be at least 2, got {}",
                self.capacity
            )));
        }
        if !(self.time_horizon.is_finite() && self.time_horizon > 0.0) {
            return Err(invalid(format!(
                "history time horizon must be positive, got {}",
                self.time_horizon
            )));
        }
        Ok(())
    }

    /// Spacing the retention policy aims for between buffered poses.
    #[inline]
    pub fn sample_interval(&self) -> f32 {
        self.time_horizon / (self.capacity.max(2) - 1) as f32
    }
}
