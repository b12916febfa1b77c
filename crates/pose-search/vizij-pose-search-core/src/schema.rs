//! Finalized schema: resolved bones, sorted sample offsets and the generated layout.

use std::fmt;
use std::sync::Arc;

use crate::clip::Skeleton;
use crate::config::{
    CategoryWeights, FeatureToggles, PreprocessPolicy, SchemaConfig, MAX_SAMPLE_RATE,
};
use crate::error::PoseSearchError;
use crate::layout::{FeatureDesc, FeatureDomain, FeatureType, Layout};
use crate::math::MirrorAxis;
use crate::Result;

/// Immutable product of [`SchemaConfig::finalize`].
///
/// Bone features refer to positions in [`Schema::bone_indices`], not to raw
/// skeleton indices.
#[derive(Clone)]
pub struct Schema {
    skeleton: Arc<dyn Skeleton>,
    sample_rate: u32,
    bone_indices: Vec<usize>,
    bone_indices_with_parents: Vec<usize>,
    pose_sample_times: Vec<f32>,
    trajectory_sample_times: Vec<f32>,
    trajectory_sample_distances: Vec<f32>,
    features: FeatureToggles,
    preprocessor: PreprocessPolicy,
    mirror_axis: Option<MirrorAxis>,
    weights: CategoryWeights,
    layout: Layout,
}

impl fmt::Debug for Schema {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Schema")
            .field("sample_rate", &self.sample_rate)
            .field("bone_indices", &self.bone_indices)
            .field("pose_sample_times", &self.pose_sample_times)
            .field("trajectory_sample_times", &self.trajectory_sample_times)
            .field("trajectory_sample_distances", &self.trajectory_sample_distances)
            .field("preprocessor", &self.preprocessor)
            .field("num_floats", &self.layout.num_floats)
            .finish()
    }
}

fn sorted_offsets(values: &[f32], what: &str) -> Result<Vec<f32>> {
    if let Some(bad) = values.iter().find(|v| !v.is_finite()) {
        return Err(PoseSearchError::schema(format!("{what} contains {bad}")));
    }
    let mut sorted = values.to_vec();
    sorted.sort_by(f32::total_cmp);
    sorted.dedup();
    Ok(sorted)
}

impl SchemaConfig {
    /// Validate, resolve bones against `skeleton` and generate the layout.
    pub fn finalize(&self, skeleton: Option<Arc<dyn Skeleton>>) -> Result<Schema> {
        let skeleton = skeleton.ok_or(PoseSearchError::MissingSkeleton)?;

        let mut bone_indices = Vec::with_capacity(self.bones.len());
        for name in &self.bones {
            let idx = skeleton
                .find_bone(name)
                .ok_or_else(|| PoseSearchError::UnresolvedBone { name: name.clone() })?;
            bone_indices.push(idx);
        }
        bone_indices.sort_unstable();
        bone_indices.dedup();

        let mut bone_indices_with_parents = bone_indices.clone();
        skeleton.ensure_parents_present(&mut bone_indices_with_parents);

        let mut schema = Schema {
            skeleton,
            sample_rate: self.sample_rate.clamp(1, MAX_SAMPLE_RATE),
            bone_indices,
            bone_indices_with_parents,
            pose_sample_times: sorted_offsets(&self.pose_sample_times, "pose sample times")?,
            trajectory_sample_times: sorted_offsets(
                &self.trajectory_sample_times,
                "trajectory sample times",
            )?,
            trajectory_sample_distances: sorted_offsets(
                &self.trajectory_sample_distances,
                "trajectory sample distances",
            )?,
            features: self.features,
            preprocessor: self.preprocessor,
            mirror_axis: self.mirror_axis,
            weights: self.weights,
            layout: Layout::default(),
        };
        schema.generate_layout();

        if schema.layout.num_floats == 0 {
            log::warn!("schema produced an empty layout");
            return Err(PoseSearchError::EmptyLayout);
        }
        if !schema.is_valid() {
            return Err(PoseSearchError::schema("layout references bones outside the schema"));
        }
        log::debug!(
            "schema finalized: {} features, {} floats, {} bones at {} Hz",
            schema.layout.features.len(),
            schema.layout.num_floats,
            schema.bone_indices.len(),
            schema.sample_rate
        );
        Ok(schema)
    }
}

impl Schema {
    fn generate_layout(&mut self) {
        let toggles = self.features;
        let mut features = Vec::new();

        let trajectory = [
            (FeatureDomain::Time, self.trajectory_sample_times.len()),
            (FeatureDomain::Distance, self.trajectory_sample_distances.len()),
        ];
        for (domain, count) in trajectory {
            for subsample in 0..count {
                if toggles.trajectory_positions {
                    features.push(FeatureDesc::trajectory(
                        subsample,
                        FeatureType::Position,
                        domain,
                    ));
                }
                if toggles.trajectory_velocities {
                    features.push(FeatureDesc::trajectory(
                        subsample,
                        FeatureType::LinearVelocity,
                        domain,
                    ));
                }
            }
        }

        let bone_types = [
            (toggles.bone_positions, FeatureType::Position),
            (toggles.bone_rotations, FeatureType::Rotation),
            (toggles.bone_velocities, FeatureType::LinearVelocity),
            (toggles.bone_angular_velocities, FeatureType::AngularVelocity),
        ];
        for subsample in 0..self.pose_sample_times.len() {
            for bone in 0..self.bone_indices.len() {
                for (enabled, feature_type) in bone_types {
                    if enabled {
                        features.push(FeatureDesc::bone(bone, subsample, feature_type));
                    }
                }
            }
        }

        self.layout = Layout::new(features);
    }

    pub fn is_valid(&self) -> bool {
        self.layout.is_valid(self.bone_indices.len())
    }

    pub fn skeleton(&self) -> &dyn Skeleton {
        self.skeleton.as_ref()
    }

    pub fn skeleton_arc(&self) -> &Arc<dyn Skeleton> {
        &self.skeleton
    }

    #[inline]
    pub fn sample_rate(&self) -> u32 {
        self.sample_rate
    }

    #[inline]
    pub fn sampling_interval(&self) -> f32 {
        1.0 / self.sample_rate as f32
    }

    #[inline]
    pub fn layout(&self) -> &Layout {
        &self.layout
    }

    #[inline]
    pub fn num_floats(&self) -> usize {
        self.layout.num_floats
    }

    /// Skeleton indices of the schema bones, sorted.
    pub fn bone_indices(&self) -> &[usize] {
        &self.bone_indices
    }

    pub fn bone_indices_with_parents(&self) -> &[usize] {
        &self.bone_indices_with_parents
    }

    pub fn pose_sample_times(&self) -> &[f32] {
        &self.pose_sample_times
    }

    pub fn trajectory_sample_times(&self) -> &[f32] {
        &self.trajectory_sample_times
    }

    pub fn trajectory_sample_distances(&self) -> &[f32] {
        &self.trajectory_sample_distances
    }

    pub fn preprocessor(&self) -> PreprocessPolicy {
        self.preprocessor
    }

    pub fn mirror_axis(&self) -> Option<MirrorAxis> {
        self.mirror_axis
    }

    pub fn category_weights(&self) -> &CategoryWeights {
        &self.weights
    }

    /// Per-float search weights built from the category weights.
    pub fn feature_weights(&self) -> Vec<f32> {
        let mut weights = vec![1.0; self.layout.num_floats];
        let w = &self.weights;
        let categories = [
            (FeatureType::Position, true, w.trajectory_position),
            (FeatureType::LinearVelocity, true, w.trajectory_velocity),
            (FeatureType::Position, false, w.bone_position),
            (FeatureType::Rotation, false, w.bone_rotation),
            (FeatureType::LinearVelocity, false, w.bone_velocity),
            (FeatureType::AngularVelocity, false, w.bone_angular_velocity),
        ];
        for (feature_type, is_trajectory, weight) in categories {
            for idx in self.layout.enumerate_features(feature_type, is_trajectory) {
                let range = self.layout.features[idx].value_range();
                weights[range].fill(weight);
            }
        }
        weights
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::clip::SkeletonDef;
    use crate::layout::FeatureSource;

    fn skeleton() -> Arc<dyn Skeleton> {
        Arc::new(SkeletonDef::chain(&["root", "pelvis", "foot_l", "foot_r"]))
    }

    fn config() -> SchemaConfig {
        SchemaConfig {
            bones: vec!["foot_r".into(), "foot_l".into()],
            pose_sample_times: vec![0.0, -0.1],
            trajectory_sample_times: vec![0.5, -0.3, 0.0],
            trajectory_sample_distances: vec![50.0],
            ..SchemaConfig::default()
        }
    }

    #[test]
    fn finalize_sorts_bones_and_offsets() {
        let schema = config().finalize(Some(skeleton())).unwrap();
        assert_eq!(schema.bone_indices(), &[2, 3]);
        assert_eq!(schema.bone_indices_with_parents(), &[0, 1, 2, 3]);
        assert_eq!(schema.pose_sample_times(), &[-0.1, 0.0]);
        assert_eq!(schema.trajectory_sample_times(), &[-0.3, 0.0, 0.5]);
    }

    #[test]
    fn layout_follows_category_order() {
        let schema = config().finalize(Some(skeleton())).unwrap();
        let features = &schema.layout().features;
        // 3 time + 1 distance trajectory subsamples, position + velocity each
        assert!(features[..8].iter().all(|f| f.is_trajectory()));
        assert_eq!(features[6].domain, FeatureDomain::Distance);
        // then subsample-outer, bone-inner
        assert_eq!(features[8].source, FeatureSource::Bone(0));
        assert_eq!(features[8].subsample_idx, 0);
        assert_eq!(features[10].source, FeatureSource::Bone(1));
        assert_eq!(features[12].subsample_idx, 1);
        assert_eq!(schema.num_floats(), 16 * 3);
    }

    #[test]
    fn sample_rate_is_clamped() {
        let cfg = SchemaConfig {
            sample_rate: 240,
            ..config()
        };
        assert_eq!(cfg.finalize(Some(skeleton())).unwrap().sample_rate(), 60);
        let cfg = SchemaConfig {
            sample_rate: 0,
            ..config()
        };
        assert_eq!(cfg.finalize(Some(skeleton())).unwrap().sample_rate(), 1);
    }

    #[test]
    fn configuration_errors() {
        assert_eq!(
            config().finalize(None).unwrap_err(),
            PoseSearchError::MissingSkeleton
        );
        let cfg = SchemaConfig {
            bones: vec!["tail".into()],
            ..config()
        };
        assert!(matches!(
            cfg.finalize(Some(skeleton())),
            Err(PoseSearchError::UnresolvedBone { .. })
        ));
        let cfg = SchemaConfig {
            trajectory_sample_times: Vec::new(),
            trajectory_sample_distances: Vec::new(),
            bones: Vec::new(),
            ..config()
        };
        assert_eq!(
            cfg.finalize(Some(skeleton())).unwrap_err(),
            PoseSearchError::EmptyLayout
        );
    }

    #[test]
    fn feature_weights_follow_categories() {
        let mut cfg = config();
        cfg.weights.trajectory_velocity = 0.0;
        cfg.weights.bone_position = 2.0;
        let schema = cfg.finalize(Some(skeleton())).unwrap();
        let weights = schema.feature_weights();
        assert_eq!(weights.len(), schema.num_floats());
        assert_eq!(&weights[0..3], &[1.0; 3]);
        assert_eq!(&weights[3..6], &[0.0; 3]);
        assert_eq!(&weights[24..27], &[2.0; 3]);
    }
}
