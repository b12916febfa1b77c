//! Live query construction from a [`PoseHistory`] and a predicted [`Trajectory`].
//!
//! Offsets at or before now come from history; offsets after now come from
//! the trajectory. Every feature must be written before the query is finished.

use crate::config::IndexingConfig;
use crate::error::PoseSearchError;
use crate::feature_vector::FeatureVectorBuilder;
use crate::history::PoseHistory;
use crate::index::SearchIndex;
use crate::layout::{FeatureDesc, FeatureDomain, FeatureType};
use crate::math::{compose, Transform};
use crate::schema::Schema;
use crate::trajectory::Trajectory;
use crate::Result;

pub struct QueryBuilder<'s> {
    builder: FeatureVectorBuilder<'s>,
    finite_delta: f32,
}

impl<'s> QueryBuilder<'s> {
    pub fn new(schema: &'s Schema) -> Self {
        Self {
            builder: FeatureVectorBuilder::new(schema),
            finite_delta: IndexingConfig::default().finite_delta,
        }
    }

    /// Step used when differentiating the predicted trajectory.
    pub fn with_finite_delta(mut self, finite_delta: f32) -> Self {
        self.finite_delta = finite_delta;
        self
    }

    pub fn builder(&self) -> &FeatureVectorBuilder<'s> {
        &self.builder
    }

    pub fn builder_mut(&mut self) -> &mut FeatureVectorBuilder<'s> {
        &mut self.builder
    }

    pub fn reset(&mut self) {
        self.builder.reset();
    }

    /// Bone features from history. Pose offsets after now can't be served.
    pub fn set_pose_features(&mut self, history: &PoseHistory) -> Result<()> {
        let schema = self.builder.schema();
        for (subsample, &offset) in schema.pose_sample_times().iter().enumerate() {
            if offset > 0.0 {
                return Err(PoseSearchError::HistoryCoverage { seconds_ago: -offset });
            }
            let sampled =
                history.try_sample_pose(-offset, schema.skeleton(), schema.bone_indices())?;
            for (schema_bone, &bone) in schema.bone_indices().iter().enumerate() {
                let desc = FeatureDesc::bone(schema_bone, subsample, FeatureType::Position);
                let present = compose(&sampled.component[bone], &sampled.root);
                let prev = compose(&sampled.prev_component[bone], &sampled.prev_root);
                self.builder.set_transform(&desc, &present);
                self.builder
                    .set_transform_velocity(&desc, &prev, &present, sampled.delta_time);
            }
        }
        Ok(())
    }

    /// Trajectory features at or before now, from the history's root motion.
    pub fn set_past_trajectory_features(&mut self, history: &PoseHistory) -> Result<()> {
        let schema = self.builder.schema();
        let interval = history.sample_interval();
        let mut write = |desc: FeatureDesc, seconds_ago: f32| -> Result<()> {
            let present = history.try_sample_root_time_based(seconds_ago)?;
            let prev = history.try_sample_root_time_based(seconds_ago + interval)?;
            self.builder.set_transform(&desc, &present);
            self.builder
                .set_transform_velocity(&desc, &prev, &present, interval);
            Ok(())
        };

        for (subsample, &offset) in schema.trajectory_sample_times().iter().enumerate() {
            if offset <= 0.0 {
                let desc =
                    FeatureDesc::trajectory(subsample, FeatureType::Position, FeatureDomain::Time);
                write(desc, -offset)?;
            }
        }
        for (subsample, &offset) in schema.trajectory_sample_distances().iter().enumerate() {
            if offset <= 0.0 {
                let desc = FeatureDesc::trajectory(
                    subsample,
                    FeatureType::Position,
                    FeatureDomain::Distance,
                );
                write(desc, history.seconds_ago_for_distance(-offset)?)?;
            }
        }
        Ok(())
    }

    /// Trajectory features after now, from a prediction relative to the current root.
    pub fn set_future_trajectory_features(&mut self, trajectory: &Trajectory) -> Result<()> {
        let schema = self.builder.schema();
        for (subsample, &offset) in schema.trajectory_sample_times().iter().enumerate() {
            if offset > 0.0 {
                let desc =
                    FeatureDesc::trajectory(subsample, FeatureType::Position, FeatureDomain::Time);
                self.write_trajectory_taps(&desc, trajectory, offset)?;
            }
        }
        for (subsample, &offset) in schema.trajectory_sample_distances().iter().enumerate() {
            if offset > 0.0 {
                let desc = FeatureDesc::trajectory(
                    subsample,
                    FeatureType::Position,
                    FeatureDomain::Distance,
                );
                let seconds = trajectory.sample_by_distance(offset)?.accumulated_seconds;
                self.write_trajectory_taps(&desc, trajectory, seconds)?;
            }
        }
        Ok(())
    }

    fn write_trajectory_taps(
        &mut self,
        desc: &FeatureDesc,
        trajectory: &Trajectory,
        seconds: f32,
    ) -> Result<()> {
        let h = self.finite_delta;
        let present = trajectory.sample_by_time(seconds)?.transform;
        let tap = |t: f32| -> Option<Transform> {
            trajectory.sample_by_time(t).ok().map(|s| s.transform)
        };
        self.builder.set_transform(desc, &present);
        match (tap(seconds - h), tap(seconds + h)) {
            (Some(past), Some(future)) => self
                .builder
                .set_transform_velocity_central(desc, &past, &present, &future, h),
            (Some(past), None) => self.builder.set_transform_velocity(desc, &past, &present, h),
            (None, Some(future)) => self.builder.set_transform_velocity(desc, &present, &future, h),
            (None, None) => {
                return Err(PoseSearchError::TrajectoryCoverage { offset: seconds });
            }
        }
        Ok(())
    }

    /// Raw query values; fails if any feature is still missing.
    pub fn finish_raw(self) -> Result<Vec<f32>> {
        self.builder.ensure_complete()?;
        Ok(self.builder.into_values())
    }

    /// Complete query in the normalized space of `index`.
    pub fn finish(self, index: &SearchIndex) -> Result<Vec<f32>> {
        let mut values = self.finish_raw()?;
        index.normalize(&mut values)?;
        Ok(values)
    }
}

/// Build a normalized query from history plus an optional predicted trajectory.
pub fn build_query(
    index: &SearchIndex,
    history: &PoseHistory,
    trajectory: Option<&Trajectory>,
) -> Result<Vec<f32>> {
    let mut query = QueryBuilder::new(index.schema());
    query.set_pose_features(history)?;
    query.set_past_trajectory_features(history)?;
    if let Some(trajectory) = trajectory {
        query.set_future_trajectory_features(trajectory)?;
    }
    query.finish(index)
}
