//! Per-clip root motion and distance tables.

use std::sync::Arc;

use crate::clip::AnimationClip;
use crate::math::{compose, scale_motion, Transform};

/// Time span used to estimate root velocity at the clip ends when a sample
/// falls outside the clip.
const EXTRAPOLATION_SAMPLE_TIME: f32 = 1.0 / 30.0;
const SMALL_NUMBER: f32 = 1e-8;
/// A trailing step shorter than this fraction of the sampling interval is
/// folded into the one before it.
const MIN_LAST_STEP: f32 = 0.1;

/// Root motion summary of one clip, built once by [`SequenceSampler::process`].
#[derive(Clone)]
pub struct SequenceSampler {
    clip: Arc<dyn AnimationClip>,
    sample_rate: u32,
    /// Clip time of each distance entry; the last step may be shorter than
    /// one sampling interval.
    time_table: Vec<f32>,
    distance_table: Vec<f32>,
    total_root_transform: Transform,
    total_root_distance: f32,
}

impl std::fmt::Debug for SequenceSampler {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SequenceSampler")
            .field("clip", &self.clip.name())
            .field("sample_rate", &self.sample_rate)
            .field("distance_samples", &self.distance_table.len())
            .field("total_root_distance", &self.total_root_distance)
            .finish()
    }
}

impl SequenceSampler {
    pub fn new(clip: Arc<dyn AnimationClip>, sample_rate: u32) -> Self {
        Self {
            clip,
            sample_rate: sample_rate.max(1),
            time_table: Vec::new(),
            distance_table: Vec::new(),
            total_root_transform: Transform::identity(),
            total_root_distance: 0.0,
        }
    }

    /// Walk the clip at the sampler rate, accumulating unsigned root travel.
    pub fn process(&mut self) {
        let play_length = self.play_length();
        let rate = self.sample_rate as f32;
        let num_samples = (play_length * rate).ceil().max(0.0) as usize + 1;

        self.time_table.clear();
        self.time_table.extend((0..num_samples).map(|i| (i as f32 / rate).min(play_length)));
        let n = self.time_table.len();
        if n > 2 && self.time_table[n - 1] - self.time_table[n - 2] < MIN_LAST_STEP / rate {
            self.time_table.remove(n - 2);
        }

        self.distance_table.clear();
        self.distance_table.reserve(self.time_table.len());
        let mut accumulated = 0.0;
        let mut prev_time = 0.0;
        for &time in &self.time_table {
            let step = self.clip.extract_root_motion(prev_time, time - prev_time);
            accumulated += step.translation.vector.norm();
            self.distance_table.push(accumulated);
            prev_time = time;
        }

        self.total_root_transform = self.clip.extract_root_motion(0.0, play_length);
        self.total_root_distance = accumulated;
    }

    pub fn clip(&self) -> &Arc<dyn AnimationClip> {
        &self.clip
    }

    #[inline]
    pub fn play_length(&self) -> f32 {
        self.clip.play_length().max(0.0)
    }

    #[inline]
    pub fn is_loopable(&self) -> bool {
        self.clip.is_loopable()
    }

    pub fn total_root_transform(&self) -> &Transform {
        &self.total_root_transform
    }

    pub fn total_root_distance(&self) -> f32 {
        self.total_root_distance
    }

    pub fn distance_table(&self) -> &[f32] {
        &self.distance_table
    }

    pub fn time_table(&self) -> &[f32] {
        &self.time_table
    }

    fn extrapolation_window(&self) -> f32 {
        EXTRAPOLATION_SAMPLE_TIME.min(self.play_length())
    }

    /// Root transform at `time` relative to the clip start.
    ///
    /// Times outside the clip continue the motion measured over a short window
    /// at the nearest end.
    pub fn extract_root_transform(&self, time: f32) -> Transform {
        let play_length = self.play_length();
        let clamped = time.clamp(0.0, play_length);
        let extrapolation = time - clamped;
        let root = self.clip.extract_root_motion(0.0, clamped);

        let window = self.extrapolation_window();
        if window <= SMALL_NUMBER || extrapolation.abs() <= SMALL_NUMBER {
            return root;
        }
        let edge_motion = if extrapolation > 0.0 {
            self.clip.extract_root_motion(play_length - window, window)
        } else {
            self.clip.extract_root_motion(0.0, window)
        };
        let extra = scale_motion(&edge_motion, extrapolation / window);
        compose(&extra, &root)
    }

    fn edge_speed(&self, at_end: bool) -> f32 {
        let (times, table) = (&self.time_table, &self.distance_table);
        let n = table.len();
        if n < 2 {
            return 0.0;
        }
        let (a, b) = if at_end { (n - 2, n - 1) } else { (0, 1) };
        let dt = times[b] - times[a];
        if dt > SMALL_NUMBER {
            (table[b] - table[a]) / dt
        } else {
            0.0
        }
    }

    /// Fraction of the way from entry `idx` to entry `next` at `time`.
    fn step_alpha(&self, idx: usize, next: usize, time: f32) -> f32 {
        let span = self.time_table[next] - self.time_table[idx];
        if span > SMALL_NUMBER {
            ((time - self.time_table[idx]) / span).clamp(0.0, 1.0)
        } else {
            0.0
        }
    }

    /// Accumulated root travel at `time`, negative before the clip start.
    pub fn extract_root_distance(&self, time: f32) -> f32 {
        let table = &self.distance_table;
        let Some(&last) = table.last() else {
            return 0.0;
        };
        let play_length = self.play_length();
        if time < 0.0 {
            return time * self.edge_speed(false);
        }
        if time > play_length {
            return last + (time - play_length) * self.edge_speed(true);
        }
        let idx = self
            .time_table
            .partition_point(|&t| t <= time)
            .saturating_sub(1)
            .min(table.len() - 1);
        let next = (idx + 1).min(table.len() - 1);
        let alpha = self.step_alpha(idx, next, time);
        table[idx] + (table[next] - table[idx]) * alpha
    }

    /// Inverse of [`Self::extract_root_distance`] over the distance table.
    pub fn get_time_from_root_distance(&self, distance: f32) -> f32 {
        let table = &self.distance_table;
        let Some(&last) = table.last() else {
            return 0.0;
        };
        let play_length = self.play_length();
        if distance <= 0.0 {
            let speed = self.edge_speed(false);
            return if speed > SMALL_NUMBER { distance / speed } else { 0.0 };
        }
        if distance >= last {
            let speed = self.edge_speed(true);
            let extra = if speed > SMALL_NUMBER {
                (distance - last) / speed
            } else {
                0.0
            };
            return play_length + extra;
        }
        let next = table.partition_point(|&d| d < distance).max(1);
        let prev = next - 1;
        let span = table[next] - table[prev];
        let alpha = if span > SMALL_NUMBER {
            (distance - table[prev]) / span
        } else {
            0.0
        };
        let (t0, t1) = (self.time_table[prev], self.time_table[next]);
        (t0 + (t1 - t0) * alpha).min(play_length)
    }
}
