//! Rolling buffer of recently played poses for building live queries.

use std::collections::VecDeque;

use crate::clip::Skeleton;
use crate::config::HistoryConfig;
use crate::error::PoseSearchError;
use crate::math::{blend, relative_to, Transform};
use crate::Result;

#[derive(Clone, Debug)]
struct HistoryEntry {
    local: Vec<Transform>,
    root: Transform,
}

/// Component-space pose at some age, plus the pose one sample interval older.
#[derive(Clone, Debug)]
pub struct SampledPose {
    pub component: Vec<Transform>,
    pub prev_component: Vec<Transform>,
    /// Root relative to the newest root.
    pub root: Transform,
    pub prev_root: Transform,
    /// Seconds between `prev_component` and `component`.
    pub delta_time: f32,
}

/// Knots hold the age in seconds of each buffered pose, oldest first, so ages
/// strictly decrease toward the newest entry (which is always age 0).
#[derive(Clone, Debug)]
pub struct PoseHistory {
    config: HistoryConfig,
    sample_interval: f32,
    entries: VecDeque<HistoryEntry>,
    knots: VecDeque<f32>,
}

impl PoseHistory {
    pub fn new(config: HistoryConfig) -> Result<Self> {
        config.validate()?;
        Ok(Self {
            sample_interval: config.sample_interval(),
            entries: VecDeque::with_capacity(config.capacity),
            knots: VecDeque::with_capacity(config.capacity),
            config,
        })
    }

    pub fn config(&self) -> &HistoryConfig {
        &self.config
    }

    #[inline]
    pub fn sample_interval(&self) -> f32 {
        self.sample_interval
    }

    #[inline]
    pub fn len(&self) -> usize {
        self.knots.len()
    }

    #[inline]
    pub fn is_empty(&self) -> bool {
        self.knots.is_empty()
    }

    /// Ages of buffered poses, oldest first.
    pub fn knots(&self) -> impl Iterator<Item = f32> + '_ {
        self.knots.iter().copied()
    }

    pub fn reset(&mut self) {
        self.entries.clear();
        self.knots.clear();
    }

    /// Age the buffer by `delta_seconds` and record the current pose.
    pub fn update(&mut self, delta_seconds: f32, local_pose: &[Transform], root: &Transform) {
        let delta_seconds = delta_seconds.max(0.0);
        for knot in self.knots.iter_mut() {
            *knot += delta_seconds;
        }

        let len = self.knots.len();
        if len == 0 || (len < self.config.capacity && delta_seconds > 0.0) {
            self.knots.push_back(0.0);
            self.entries.push_back(HistoryEntry {
                local: Vec::with_capacity(local_pose.len()),
                root: *root,
            });
        } else if len >= 2 && len >= self.config.capacity && delta_seconds > 0.0 {
            let can_evict = self.knots[1] >= self.config.time_horizon + self.sample_interval;
            let should_push = self.knots[len - 2] >= self.sample_interval;
            if can_evict && should_push {
                self.knots.pop_front();
                if let Some(mut recycled) = self.entries.pop_front() {
                    recycled.local.clear();
                    self.entries.push_back(recycled);
                }
                self.knots.push_back(0.0);
                log::trace!("pose history evicted oldest knot");
            }
        }

        if let Some(newest) = self.knots.back_mut() {
            *newest = 0.0;
        }
        if let Some(entry) = self.entries.back_mut() {
            entry.local.clear();
            entry.local.extend_from_slice(local_pose);
            entry.root = *root;
        }
    }

    /// Bracketing entries and blend weight for `seconds_ago`.
    fn bracket(&self, seconds_ago: f32) -> Result<(usize, usize, f32)> {
        let next = self.knots.partition_point(|&k| k > seconds_ago);
        if next == 0 || next >= self.knots.len() {
            return Err(PoseSearchError::HistoryCoverage { seconds_ago });
        }
        let prev = next - 1;
        let (k_prev, k_next) = (self.knots[prev], self.knots[next]);
        let span = k_next - k_prev;
        let alpha = if span.abs() > f32::EPSILON {
            ((seconds_ago - k_prev) / span).clamp(0.0, 1.0)
        } else {
            1.0
        };
        Ok((prev, next, alpha))
    }

    fn blended_root(&self, seconds_ago: f32) -> Result<Transform> {
        let (prev, next, alpha) = self.bracket(seconds_ago)?;
        Ok(blend(&self.entries[prev].root, &self.entries[next].root, alpha))
    }

    fn newest_root(&self) -> Transform {
        self.entries
            .back()
            .map_or_else(Transform::identity, |e| e.root)
    }

    /// Root transform `seconds_ago`, relative to the newest root.
    pub fn try_sample_root_time_based(&self, seconds_ago: f32) -> Result<Transform> {
        let root = self.blended_root(seconds_ago)?;
        Ok(relative_to(&root, &self.newest_root()))
    }

    /// Seconds ago at which the root had travelled `distance_ago` units back
    /// from the newest root.
    pub fn seconds_ago_for_distance(&self, distance_ago: f32) -> Result<f32> {
        let mut accumulated = 0.0;
        for i in (1..self.entries.len()).rev() {
            let step = (self.entries[i].root.translation.vector
                - self.entries[i - 1].root.translation.vector)
                .norm();
            if accumulated + step >= distance_ago {
                let frac = if step > f32::EPSILON {
                    (distance_ago - accumulated) / step
                } else {
                    0.0
                };
                return Ok(self.knots[i] + frac * (self.knots[i - 1] - self.knots[i]));
            }
            accumulated += step;
        }
        Err(PoseSearchError::HistoryDistanceCoverage {
            distance: distance_ago,
        })
    }

    /// Root transform `distance_ago` units of travel back, relative to the newest root.
    pub fn try_sample_root_distance_based(&self, distance_ago: f32) -> Result<Transform> {
        let seconds_ago = self.seconds_ago_for_distance(distance_ago)?;
        self.try_sample_root_time_based(seconds_ago)
    }

    fn blend_local(&self, seconds_ago: f32, out: &mut Vec<Transform>) -> Result<Transform> {
        let (prev, next, alpha) = self.bracket(seconds_ago)?;
        let (a, b) = (&self.entries[prev], &self.entries[next]);
        if a.local.len() != b.local.len() {
            return Err(PoseSearchError::MismatchedBoneCount {
                prev: a.local.len(),
                next: b.local.len(),
            });
        }
        out.clear();
        out.extend(
            a.local
                .iter()
                .zip(&b.local)
                .map(|(pa, pb)| blend(pa, pb, alpha)),
        );
        Ok(blend(&a.root, &b.root, alpha))
    }

    /// Interpolated component-space pose `seconds_ago`, and the pose one
    /// sample interval older for velocities.
    ///
    /// Fails when either age isn't buffered, when bracketing poses disagree on
    /// bone count, or when a `required_bones` entry is outside the pose.
    pub fn try_sample_pose(
        &self,
        seconds_ago: f32,
        skeleton: &dyn Skeleton,
        required_bones: &[usize],
    ) -> Result<SampledPose> {
        let newest = self.newest_root();
        let mut local = Vec::new();
        let mut sampled = SampledPose {
            component: Vec::new(),
            prev_component: Vec::new(),
            root: Transform::identity(),
            prev_root: Transform::identity(),
            delta_time: self.sample_interval,
        };

        let root = self.blend_local(seconds_ago, &mut local)?;
        skeleton.fill_component_space(&local, &mut sampled.component);
        sampled.root = relative_to(&root, &newest);

        let prev_root = self.blend_local(seconds_ago + self.sample_interval, &mut local)?;
        skeleton.fill_component_space(&local, &mut sampled.prev_component);
        sampled.prev_root = relative_to(&prev_root, &newest);

        let num_bones = sampled.component.len().min(sampled.prev_component.len());
        if let Some(&bad) = required_bones.iter().find(|&&b| b >= num_bones) {
            return Err(PoseSearchError::DimensionMismatch {
                expected: bad + 1,
                actual: num_bones,
            });
        }
        Ok(sampled)
    }
}
