//! Fills the raw pose table of one clip chain.
//!
//! Each row is built around an origin sample: trajectory and bone features are
//! expressed relative to the root at the row's own sample time.

use hashbrown::HashMap;
use serde::{Deserialize, Serialize};

use crate::config::IndexingConfig;
use crate::error::PoseSearchError;
use crate::feature_vector::FeatureVectorBuilder;
use crate::layout::{FeatureDesc, FeatureDomain, FeatureType};
use crate::math::{compose, mirror_transform, MirrorAxis, Transform};
use crate::sample_info::{ClipChain, SampleInfo};
use crate::schema::Schema;
use crate::Result;

/// Portion of a clip to index, in seconds. `(0, 0)` means the whole clip.
#[derive(Clone, Copy, Debug, Default, PartialEq, Serialize, Deserialize)]
pub struct SamplingRange {
    pub min: f32,
    pub max: f32,
}

impl SamplingRange {
    pub const WHOLE_CLIP: SamplingRange = SamplingRange { min: 0.0, max: 0.0 };

    pub fn new(min: f32, max: f32) -> Self {
        Self { min, max }
    }

    pub fn is_whole_clip(&self) -> bool {
        self.min == 0.0 && self.max == 0.0
    }

    pub fn is_valid(&self) -> bool {
        self.min.is_finite() && self.max.is_finite() && self.min >= 0.0 && self.min <= self.max
    }

    /// Concrete range for a clip of `play_length`, with `max` clamped to it.
    pub fn effective(&self, play_length: f32) -> Result<SamplingRange> {
        if !self.is_valid() {
            return Err(PoseSearchError::InvalidSamplingRange {
                min: self.min,
                max: self.max,
            });
        }
        if self.is_whole_clip() {
            return Ok(SamplingRange::new(0.0, play_length));
        }
        let max = self.max.min(play_length);
        Ok(SamplingRange::new(self.min.min(max), max))
    }
}

/// Raw, unpreprocessed pose rows for one clip chain.
#[derive(Clone, Debug, Default, PartialEq)]
pub struct IndexerOutput {
    pub first_indexed_sample: usize,
    pub last_indexed_sample: usize,
    pub num_indexed_poses: usize,
    pub values: Vec<f32>,
}

/// One clip chain to index, with everything borrowed from the caller.
#[derive(Clone, Copy, Debug)]
pub struct IndexingContext<'a> {
    pub schema: &'a Schema,
    pub config: &'a IndexingConfig,
    pub chain: ClipChain<'a>,
    /// Already resolved against the main clip, see [`SamplingRange::effective`].
    pub sampling_range: SamplingRange,
    pub mirrored: bool,
}

struct CachedPose {
    component: Vec<Transform>,
    root: Transform,
    clamped: bool,
}

pub struct SequenceIndexer<'a> {
    ctx: IndexingContext<'a>,
    mirror_axis: Option<MirrorAxis>,
    cache: HashMap<(u32, u32), CachedPose>,
    local: Vec<Transform>,
}

/// Three taps around a sample, as (past, present, future) with clamp flags.
type Taps = [(Transform, bool); 3];

impl<'a> SequenceIndexer<'a> {
    pub fn new(ctx: IndexingContext<'a>) -> Self {
        let mirror_axis = if ctx.mirrored {
            ctx.schema.mirror_axis()
        } else {
            None
        };
        Self {
            ctx,
            mirror_axis,
            cache: HashMap::new(),
            local: Vec::new(),
        }
    }

    fn mirror(&self, t: &Transform) -> Transform {
        match self.mirror_axis {
            Some(axis) => mirror_transform(t, axis),
            None => *t,
        }
    }

    /// Index every sample of the range; fails if any row comes out incomplete.
    pub fn process(&mut self) -> Result<IndexerOutput> {
        let schema = self.ctx.schema;
        if !schema.is_valid() {
            return Err(PoseSearchError::schema("cannot index with an invalid schema"));
        }
        if self.ctx.mirrored && self.mirror_axis.is_none() {
            return Err(PoseSearchError::schema("mirrored indexing needs a mirror axis"));
        }

        let rate = schema.sample_rate() as f32;
        let range = self.ctx.sampling_range;
        let first = (range.min * rate).floor().max(0.0) as usize;
        let last = ((range.max * rate).ceil().max(0.0) as usize).max(first);
        let num_poses = last - first + 1;
        let num_floats = schema.num_floats();

        let mut values = Vec::with_capacity(num_poses * num_floats);
        let mut builder = FeatureVectorBuilder::new(schema);
        let interval = schema.sampling_interval();
        let play_length = self.ctx.chain.main.play_length();

        for sample_idx in first..=last {
            let origin_time = (sample_idx as f32 * interval).min(play_length);
            builder.reset();
            self.cache.clear();

            let origin = self.ctx.chain.get_sample_info(origin_time);
            self.add_trajectory_time_features(&mut builder, &origin, origin_time);
            self.add_trajectory_distance_features(&mut builder, &origin);
            self.add_pose_features(&mut builder, origin_time)?;

            builder.ensure_complete()?;
            values.extend_from_slice(builder.values());
        }

        log::debug!(
            "indexed '{}'{}: {} poses x {} floats",
            self.ctx.chain.main.clip().name(),
            if self.ctx.mirrored { " (mirrored)" } else { "" },
            num_poses,
            num_floats
        );

        Ok(IndexerOutput {
            first_indexed_sample: first,
            last_indexed_sample: last,
            num_indexed_poses: num_poses,
            values,
        })
    }

    fn root_taps(&self, sample_time: f32, origin: &SampleInfo<'_>) -> Taps {
        let h = self.ctx.config.finite_delta;
        [-h, 0.0, h].map(|offset| {
            let s = self
                .ctx
                .chain
                .get_sample_info_relative(sample_time + offset, origin);
            (self.mirror(&s.root_transform), s.clamped)
        })
    }

    fn write_taps(&self, builder: &mut FeatureVectorBuilder<'_>, desc: &FeatureDesc, taps: &Taps) {
        let h = self.ctx.config.finite_delta;
        let [(past, past_clamped), (present, present_clamped), (future, future_clamped)] = taps;
        builder.set_transform(desc, present);
        if *past_clamped && !*present_clamped && !*future_clamped {
            builder.set_transform_velocity(desc, present, future, h);
        } else if *future_clamped && !*present_clamped && !*past_clamped {
            builder.set_transform_velocity(desc, past, present, h);
        } else {
            builder.set_transform_velocity_central(desc, past, present, future, h);
        }
    }

    fn add_trajectory_time_features(
        &self,
        builder: &mut FeatureVectorBuilder<'_>,
        origin: &SampleInfo<'_>,
        origin_time: f32,
    ) {
        let times = self.ctx.schema.trajectory_sample_times();
        for (subsample, &offset) in times.iter().enumerate() {
            let desc =
                FeatureDesc::trajectory(subsample, FeatureType::Position, FeatureDomain::Time);
            let taps = self.root_taps(origin_time + offset, origin);
            self.write_taps(builder, &desc, &taps);
        }
    }

    fn add_trajectory_distance_features(
        &self,
        builder: &mut FeatureVectorBuilder<'_>,
        origin: &SampleInfo<'_>,
    ) {
        let chain = &self.ctx.chain;
        for (subsample, &offset) in self
            .ctx
            .schema
            .trajectory_sample_distances()
            .iter()
            .enumerate()
        {
            let desc =
                FeatureDesc::trajectory(subsample, FeatureType::Position, FeatureDomain::Distance);
            let sample_time = chain.get_sample_time_from_distance(origin.root_distance + offset);
            let taps = self.root_taps(sample_time, origin);
            self.write_taps(builder, &desc, &taps);
        }
    }

    fn add_pose_features(
        &mut self,
        builder: &mut FeatureVectorBuilder<'_>,
        origin_time: f32,
    ) -> Result<()> {
        let schema = self.ctx.schema;
        let h = self.ctx.config.finite_delta;
        for (subsample, &offset) in schema.pose_sample_times().iter().enumerate() {
            let sample_time = origin_time + offset;
            for (schema_bone, &bone) in schema.bone_indices().iter().enumerate() {
                let mut taps = [(Transform::identity(), false); 3];
                for (tap, dt) in taps.iter_mut().zip([-h, 0.0, h]) {
                    *tap = self.bone_transform(sample_time + dt, origin_time, bone)?;
                }
                let desc = FeatureDesc::bone(schema_bone, subsample, FeatureType::Position);
                self.write_taps(builder, &desc, &taps);
            }
        }
        Ok(())
    }

    /// Bone transform at `sample_time` in the root frame at `origin_time`.
    fn bone_transform(
        &mut self,
        sample_time: f32,
        origin_time: f32,
        bone: usize,
    ) -> Result<(Transform, bool)> {
        let key = (sample_time.to_bits(), origin_time.to_bits());
        if !self.cache.contains_key(&key) {
            let entry = self.sample_pose(sample_time, origin_time)?;
            self.cache.insert(key, entry);
        }
        let entry = &self.cache[&key];

        let skeleton = self.ctx.schema.skeleton();
        let source_bone = if self.mirror_axis.is_some() {
            skeleton.mirror_bone(bone)
        } else {
            bone
        };
        let component = entry
            .component
            .get(source_bone)
            .copied()
            .ok_or_else(|| PoseSearchError::IncompatibleSkeleton {
                clip: self.ctx.chain.main.clip().name().to_string(),
                expected: skeleton.num_bones(),
                actual: entry.component.len(),
            })?;
        let component = self.mirror(&component);
        Ok((compose(&component, &entry.root), entry.clamped))
    }

    fn sample_pose(&mut self, sample_time: f32, origin_time: f32) -> Result<CachedPose> {
        let chain = self.ctx.chain;
        let origin = chain.get_sample_info(origin_time);
        let sample = chain.get_sample_info_relative(sample_time, &origin);

        let clip = sample.clip.clip();
        clip.extract_pose(sample.clip_time, &mut self.local);
        let skeleton = self.ctx.schema.skeleton();
        if self.local.len() != skeleton.num_bones() {
            return Err(PoseSearchError::IncompatibleSkeleton {
                clip: clip.name().to_string(),
                expected: skeleton.num_bones(),
                actual: self.local.len(),
            });
        }
        let mut component = Vec::with_capacity(self.local.len());
        skeleton.fill_component_space(&self.local, &mut component);
        Ok(CachedPose {
            component,
            root: self.mirror(&sample.root_transform),
            clamped: sample.clamped,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::clip::{KeyframedClip, Skeleton, SkeletonDef, TransformKey};
    use crate::config::SchemaConfig;
    use crate::feature_vector::FeatureVectorReader;
    use crate::sampler::SequenceSampler;
    use approx::assert_relative_eq;
    use std::sync::Arc;

    fn skeleton() -> Arc<dyn Skeleton> {
        Arc::new(SkeletonDef::chain(&["root", "hand"]))
    }

    fn sampler(clip: KeyframedClip) -> SequenceSampler {
        let mut s = SequenceSampler::new(Arc::new(clip), 60);
        s.process();
        s
    }

    #[test]
    fn effective_range() {
        assert_eq!(
            SamplingRange::WHOLE_CLIP.effective(2.0).unwrap(),
            SamplingRange::new(0.0, 2.0)
        );
        assert_eq!(
            SamplingRange::new(0.5, 9.0).effective(2.0).unwrap(),
            SamplingRange::new(0.5, 2.0)
        );
        assert!(SamplingRange::new(-1.0, 1.0).effective(2.0).is_err());
        assert!(SamplingRange::new(1.5, 1.0).effective(2.0).is_err());
    }

    #[test]
    fn future_trajectory_follows_root_motion() {
        let schema = SchemaConfig {
            trajectory_sample_times: vec![0.0, 0.5],
            ..SchemaConfig::default()
        }
        .finalize(Some(skeleton()))
        .unwrap();
        let config = IndexingConfig::default();
        let main = sampler(KeyframedClip::linear_root_motion("walk", 2.0, 2, [100.0, 0.0, 0.0]));
        let range = SamplingRange::WHOLE_CLIP.effective(2.0).unwrap();
        let mut indexer = SequenceIndexer::new(IndexingContext {
            schema: &schema,
            config: &config,
            chain: ClipChain::new(&main),
            sampling_range: range,
            mirrored: false,
        });
        let out = indexer.process().unwrap();
        assert_eq!(out.num_indexed_poses, 61);
        assert_eq!(out.values.len(), 61 * schema.num_floats());

        let future = FeatureDesc::trajectory(1, FeatureType::Position, FeatureDomain::Time);
        let row = &out.values[10 * schema.num_floats()..11 * schema.num_floats()];
        let reader = FeatureVectorReader::new(schema.layout(), row).unwrap();
        assert_relative_eq!(reader.get_position(&future).unwrap().x, 50.0, epsilon = 1e-2);
        assert_relative_eq!(reader.get_linear_velocity(&future).unwrap().x, 100.0, epsilon = 0.5);
    }

    #[test]
    fn bone_velocity_goes_one_sided_at_clamped_end() {
        let schema = SchemaConfig {
            bones: vec!["hand".into()],
            ..SchemaConfig::default()
        }
        .finalize(Some(skeleton()))
        .unwrap();
        let config = IndexingConfig::default();
        // hand moves up at 10 u/s for the first second, then holds
        let clip = KeyframedClip::new("reach", 1.0, 2)
            .with_bone_key(1, TransformKey::at(0.0, [0.0, 0.0, 0.0]))
            .with_bone_key(1, TransformKey::at(1.0, [0.0, 0.0, 10.0]));
        let main = sampler(clip);
        let mut indexer = SequenceIndexer::new(IndexingContext {
            schema: &schema,
            config: &config,
            chain: ClipChain::new(&main),
            sampling_range: SamplingRange::WHOLE_CLIP.effective(1.0).unwrap(),
            mirrored: false,
        });
        let out = indexer.process().unwrap();
        let n = schema.num_floats();
        let hand = FeatureDesc::bone(0, 0, FeatureType::Position);

        let first = FeatureVectorReader::new(schema.layout(), &out.values[..n]).unwrap();
        assert_relative_eq!(first.get_linear_velocity(&hand).unwrap().z, 10.0, epsilon = 1e-2);

        let last_row = &out.values[(out.num_indexed_poses - 1) * n..];
        let last = FeatureVectorReader::new(schema.layout(), last_row).unwrap();
        assert_relative_eq!(last.get_position(&hand).unwrap().z, 10.0, epsilon = 1e-3);
        assert_relative_eq!(last.get_linear_velocity(&hand).unwrap().z, 10.0, epsilon = 1e-2);
    }

    #[test]
    fn rejects_clip_with_wrong_bone_count() {
        let schema = SchemaConfig {
            bones: vec!["hand".into()],
            ..SchemaConfig::default()
        }
        .finalize(Some(skeleton()))
        .unwrap();
        let config = IndexingConfig::default();
        let main = sampler(KeyframedClip::new("bad", 1.0, 1));
        let mut indexer = SequenceIndexer::new(IndexingContext {
            schema: &schema,
            config: &config,
            chain: ClipChain::new(&main),
            sampling_range: SamplingRange::WHOLE_CLIP.effective(1.0).unwrap(),
            mirrored: false,
        });
        assert!(matches!(
            indexer.process(),
            Err(PoseSearchError::IncompatibleSkeleton { .. })
        ));
    }
}
