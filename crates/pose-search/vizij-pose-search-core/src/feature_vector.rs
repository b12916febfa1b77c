//! Typed writes and reads over a flat pose vector.
//!
//! Setters look features up by structural equality and silently skip any
//! feature the layout doesn't declare. The builder tracks which features have
//! been written so incomplete vectors can be refused.

use nalgebra::{UnitQuaternion, Vector3};

use crate::error::PoseSearchError;
use crate::layout::{FeatureDesc, FeatureType, Layout};
use crate::math::{angular_velocity, linear_velocity, rotation_axes, rotation_from_axes, Transform};
use crate::schema::Schema;
use crate::Result;

#[derive(Clone, Debug)]
pub struct FeatureVectorBuilder<'s> {
    schema: &'s Schema,
    values: Vec<f32>,
    features_added: Vec<bool>,
    num_features_added: usize,
}

impl<'s> FeatureVectorBuilder<'s> {
    pub fn new(schema: &'s Schema) -> Self {
        let layout = schema.layout();
        Self {
            schema,
            values: vec![0.0; layout.num_floats],
            features_added: vec![false; layout.features.len()],
            num_features_added: 0,
        }
    }

    /// Zero every value and forget which features were written.
    pub fn reset(&mut self) {
        self.values.fill(0.0);
        self.features_added.fill(false);
        self.num_features_added = 0;
    }

    #[inline]
    pub fn schema(&self) -> &'s Schema {
        self.schema
    }

    #[inline]
    pub fn values(&self) -> &[f32] {
        &self.values
    }

    pub fn values_mut(&mut self) -> &mut [f32] {
        &mut self.values
    }

    pub fn into_values(self) -> Vec<f32> {
        self.values
    }

    pub fn reader(&self) -> FeatureVectorReader<'_> {
        FeatureVectorReader {
            layout: self.schema.layout(),
            values: &self.values,
        }
    }

    #[inline]
    pub fn is_complete(&self) -> bool {
        self.num_features_added == self.features_added.len()
    }

    #[inline]
    pub fn num_missing(&self) -> usize {
        self.features_added.len() - self.num_features_added
    }

    /// `Ok` only when every declared feature was written.
    pub fn ensure_complete(&self) -> Result<()> {
        if self.is_complete() {
            Ok(())
        } else {
            Err(PoseSearchError::IncompleteFeatureVector {
                missing: self.num_missing(),
            })
        }
    }

    pub fn is_feature_added(&self, desc: &FeatureDesc) -> bool {
        self.schema
            .layout()
            .find(desc)
            .is_some_and(|idx| self.features_added[idx])
    }

    fn mark_added(&mut self, feature_idx: usize) {
        if !self.features_added[feature_idx] {
            self.features_added[feature_idx] = true;
            self.num_features_added += 1;
        }
    }

    fn write(&mut self, desc: &FeatureDesc, floats: &[f32]) -> bool {
        let layout = self.schema.layout();
        let Some(idx) = layout.find(desc) else {
            return false;
        };
        let offset = layout.features[idx].value_offset;
        self.values[offset..offset + floats.len()].copy_from_slice(floats);
        self.mark_added(idx);
        true
    }

    fn set_vector(&mut self, desc: &FeatureDesc, feature_type: FeatureType, v: &Vector3<f32>) {
        self.write(&desc.with_type(feature_type), &[v.x, v.y, v.z]);
    }

    pub fn set_position(&mut self, desc: &FeatureDesc, position: &Vector3<f32>) {
        self.set_vector(desc, FeatureType::Position, position);
    }

    /// Writes the rotation's body X and Y axes.
    pub fn set_rotation(&mut self, desc: &FeatureDesc, rotation: &UnitQuaternion<f32>) {
        let (x, y) = rotation_axes(rotation);
        self.write(
            &desc.with_type(FeatureType::Rotation),
            &[x.x, x.y, x.z, y.x, y.y, y.z],
        );
    }

    pub fn set_linear_velocity(&mut self, desc: &FeatureDesc, velocity: &Vector3<f32>) {
        self.set_vector(desc, FeatureType::LinearVelocity, velocity);
    }

    pub fn set_angular_velocity(&mut self, desc: &FeatureDesc, velocity: &Vector3<f32>) {
        self.set_vector(desc, FeatureType::AngularVelocity, velocity);
    }

    /// Position and rotation of `transform`.
    pub fn set_transform(&mut self, desc: &FeatureDesc, transform: &Transform) {
        self.set_position(desc, &transform.translation.vector);
        self.set_rotation(desc, &transform.rotation);
    }

    /// Two-tap linear and angular velocity from `prev` to `next`.
    pub fn set_transform_velocity(
        &mut self,
        desc: &FeatureDesc,
        prev: &Transform,
        next: &Transform,
        delta_time: f32,
    ) {
        self.set_linear_velocity(desc, &linear_velocity(prev, next, delta_time));
        self.set_angular_velocity(
            desc,
            &angular_velocity(&prev.rotation, &next.rotation, delta_time),
        );
    }

    /// Three-tap velocity: the mean of the backward and forward differences
    /// around `current`, each spanning `delta_time`.
    pub fn set_transform_velocity_central(
        &mut self,
        desc: &FeatureDesc,
        prev: &Transform,
        current: &Transform,
        next: &Transform,
        delta_time: f32,
    ) {
        let linear = (linear_velocity(prev, current, delta_time)
            + linear_velocity(current, next, delta_time))
            * 0.5;
        let angular = (angular_velocity(&prev.rotation, &current.rotation, delta_time)
            + angular_velocity(&current.rotation, &next.rotation, delta_time))
            * 0.5;
        self.set_linear_velocity(desc, &linear);
        self.set_angular_velocity(desc, &angular);
    }

    /// Both builders were made from layouts with identical features.
    pub fn is_compatible(&self, other: &FeatureVectorBuilder<'_>) -> bool {
        std::ptr::eq(self.schema, other.schema) || self.schema.layout() == other.schema.layout()
    }

    pub fn copy_from(&mut self, other: &FeatureVectorBuilder<'_>) -> Result<()> {
        if !self.is_compatible(other) {
            return Err(PoseSearchError::DimensionMismatch {
                expected: self.values.len(),
                actual: other.values.len(),
            });
        }
        self.values.copy_from_slice(&other.values);
        self.features_added.copy_from_slice(&other.features_added);
        self.num_features_added = other.num_features_added;
        Ok(())
    }

    /// Copy one feature from a builder with a possibly different layout.
    ///
    /// Returns `false` if either side lacks the feature or it wasn't written.
    pub fn copy_feature(&mut self, other: &FeatureVectorBuilder<'_>, desc: &FeatureDesc) -> bool {
        let other_layout = other.schema.layout();
        let Some(other_idx) = other_layout.find(desc) else {
            return false;
        };
        if !other.features_added[other_idx] {
            return false;
        }
        let range = other_layout.features[other_idx].value_range();
        let floats = &other.values[range];
        let layout = self.schema.layout();
        let Some(idx) = layout.find(desc) else {
            return false;
        };
        let offset = layout.features[idx].value_offset;
        self.values[offset..offset + floats.len()].copy_from_slice(floats);
        self.mark_added(idx);
        true
    }

    /// Overwrite every feature `other` has written, keeping the rest.
    pub fn merge_replace(&mut self, other: &FeatureVectorBuilder<'_>) {
        for (idx, desc) in other.schema.layout().features.iter().enumerate() {
            if other.features_added[idx] {
                self.copy_feature(other, desc);
            }
        }
    }
}

/// Read-only typed view over a pose vector.
#[derive(Clone, Copy, Debug)]
pub struct FeatureVectorReader<'a> {
    layout: &'a Layout,
    values: &'a [f32],
}

impl<'a> FeatureVectorReader<'a> {
    pub fn new(layout: &'a Layout, values: &'a [f32]) -> Result<Self> {
        if values.len() != layout.num_floats {
            return Err(PoseSearchError::DimensionMismatch {
                expected: layout.num_floats,
                actual: values.len(),
            });
        }
        Ok(Self { layout, values })
    }

    pub fn values(&self) -> &'a [f32] {
        self.values
    }

    fn floats(&self, desc: &FeatureDesc, feature_type: FeatureType) -> Option<&'a [f32]> {
        let feature = self.layout.get(&desc.with_type(feature_type))?;
        self.values.get(feature.value_range())
    }

    fn vector(&self, desc: &FeatureDesc, feature_type: FeatureType) -> Option<Vector3<f32>> {
        self.floats(desc, feature_type)
            .map(|f| Vector3::new(f[0], f[1], f[2]))
    }

    pub fn get_position(&self, desc: &FeatureDesc) -> Option<Vector3<f32>> {
        self.vector(desc, FeatureType::Position)
    }

    /// Rebuilds the rotation from the stored axes; the third is their cross product.
    pub fn get_rotation(&self, desc: &FeatureDesc) -> Option<UnitQuaternion<f32>> {
        let f = self.floats(desc, FeatureType::Rotation)?;
        let x = Vector3::new(f[0], f[1], f[2]);
        let y = Vector3::new(f[3], f[4], f[5]);
        Some(rotation_from_axes(&x, &y))
    }

    pub fn get_transform(&self, desc: &FeatureDesc) -> Option<Transform> {
        let position = self.get_position(desc)?;
        let rotation = self.get_rotation(desc)?;
        Some(Transform::from_parts(position.into(), rotation))
    }

    pub fn get_linear_velocity(&self, desc: &FeatureDesc) -> Option<Vector3<f32>> {
        self.vector(desc, FeatureType::LinearVelocity)
    }

    pub fn get_angular_velocity(&self, desc: &FeatureDesc) -> Option<Vector3<f32>> {
        self.vector(desc, FeatureType::AngularVelocity)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::clip::{Skeleton, SkeletonDef};
    use crate::config::SchemaConfig;
    use crate::layout::FeatureDomain;
    use approx::assert_relative_eq;
    use nalgebra::Translation3;
    use std::sync::Arc;

    fn schema(rotations: bool) -> Schema {
        let skeleton: Arc<dyn Skeleton> = Arc::new(SkeletonDef::chain(&["root", "hand"]));
        let mut cfg = SchemaConfig {
            bones: vec!["hand".into()],
            trajectory_sample_times: vec![0.0],
            ..SchemaConfig::default()
        };
        cfg.features.bone_rotations = rotations;
        cfg.finalize(Some(skeleton)).unwrap()
    }

    #[test]
    fn completeness_tracks_every_feature() {
        let schema = schema(false);
        let mut builder = FeatureVectorBuilder::new(&schema);
        let traj = FeatureDesc::trajectory(0, FeatureType::Position, FeatureDomain::Time);
        let hand = FeatureDesc::bone(0, 0, FeatureType::Position);
        assert_eq!(builder.num_missing(), 4);

        builder.set_position(&traj, &Vector3::new(1.0, 2.0, 3.0));
        builder.set_position(&traj, &Vector3::new(1.0, 2.0, 3.0));
        assert_eq!(builder.num_missing(), 3);

        builder.set_linear_velocity(&traj, &Vector3::zeros());
        builder.set_transform(&hand, &Transform::identity());
        assert!(!builder.is_complete());
        assert!(matches!(
            builder.ensure_complete(),
            Err(PoseSearchError::IncompleteFeatureVector { missing: 1 })
        ));
        builder.set_linear_velocity(&hand, &Vector3::zeros());
        assert!(builder.is_complete());

        builder.reset();
        assert_eq!(builder.num_missing(), 4);
    }

    #[test]
    fn setters_skip_undeclared_features() {
        let schema = schema(false);
        let mut builder = FeatureVectorBuilder::new(&schema);
        let hand = FeatureDesc::bone(0, 0, FeatureType::Rotation);
        builder.set_rotation(&hand, &UnitQuaternion::identity());
        assert_eq!(builder.num_missing(), 4);
        assert!(builder.values().iter().all(|v| *v == 0.0));
    }

    #[test]
    fn reader_round_trips_transform() {
        let schema = schema(true);
        let mut builder = FeatureVectorBuilder::new(&schema);
        let hand = FeatureDesc::bone(0, 0, FeatureType::Position);
        let t = Transform::from_parts(
            Translation3::new(0.5, -1.0, 2.0),
            UnitQuaternion::from_euler_angles(0.2, 0.4, -1.3),
        );
        builder.set_transform(&hand, &t);
        let back = builder.reader().get_transform(&hand).unwrap();
        assert_relative_eq!(back.translation.vector, t.translation.vector);
        assert_relative_eq!(back.rotation.angle_to(&t.rotation), 0.0, epsilon = 1e-4);
    }

    #[test]
    fn central_velocity_averages_taps() {
        let schema = schema(false);
        let mut builder = FeatureVectorBuilder::new(&schema);
        let traj = FeatureDesc::trajectory(0, FeatureType::LinearVelocity, FeatureDomain::Time);
        let at = |x: f32| {
            Transform::from_parts(Translation3::new(x, 0.0, 0.0), UnitQuaternion::identity())
        };
        builder.set_transform_velocity_central(&traj, &at(0.0), &at(1.0), &at(3.0), 0.5);
        let v = builder.reader().get_linear_velocity(&traj).unwrap();
        assert_relative_eq!(v.x, 3.0);
    }

    #[test]
    fn merge_replace_copies_written_features_only() {
        let schema = schema(false);
        let traj = FeatureDesc::trajectory(0, FeatureType::Position, FeatureDomain::Time);
        let hand = FeatureDesc::bone(0, 0, FeatureType::Position);

        let mut base = FeatureVectorBuilder::new(&schema);
        base.set_position(&traj, &Vector3::new(1.0, 1.0, 1.0));
        base.set_position(&hand, &Vector3::new(2.0, 2.0, 2.0));

        let mut overlay = FeatureVectorBuilder::new(&schema);
        overlay.set_position(&hand, &Vector3::new(9.0, 9.0, 9.0));

        assert!(base.is_compatible(&overlay));
        base.merge_replace(&overlay);
        let reader = base.reader();
        assert_relative_eq!(reader.get_position(&traj).unwrap().x, 1.0);
        assert_relative_eq!(reader.get_position(&hand).unwrap().x, 9.0);

        let mut copy = FeatureVectorBuilder::new(&schema);
        copy.copy_from(&base).unwrap();
        assert_eq!(copy.values(), base.values());
        assert_eq!(copy.num_missing(), base.num_missing());
    }

    #[test]
    fn reader_rejects_wrong_length() {
        let schema = schema(false);
        let err = FeatureVectorReader::new(schema.layout(), &[0.0; 2]).unwrap_err();
        assert_eq!(
            err,
            PoseSearchError::DimensionMismatch {
                expected: schema.num_floats(),
                actual: 2
            }
        );
    }
}
