//! The finished, preprocessed pose table.

use std::sync::Arc;

use crate::error::PoseSearchError;
use crate::indexer::SamplingRange;
use crate::preprocess::PreprocessInfo;
use crate::schema::Schema;
use crate::Result;

/// Where one indexed sequence's poses live in the table.
#[derive(Clone, Debug, PartialEq)]
pub struct IndexedSequence {
    /// Position of the source sequence in its database (0 for single-clip indices).
    pub sequence_idx: usize,
    pub mirrored: bool,
    pub first_pose_idx: usize,
    pub num_poses: usize,
    /// Effective range, already clamped to the clip.
    pub sampling_range: SamplingRange,
    pub first_indexed_sample: usize,
    pub play_length: f32,
    pub looping: bool,
}

impl IndexedSequence {
    #[inline]
    pub fn contains(&self, pose_idx: usize) -> bool {
        pose_idx >= self.first_pose_idx && pose_idx < self.first_pose_idx + self.num_poses
    }
}

/// Row-major (pose-major) table of normalized pose vectors.
///
/// Read-only once built; many searches may share it.
#[derive(Clone, Debug)]
pub struct SearchIndex {
    schema: Arc<Schema>,
    num_poses: usize,
    values: Vec<f32>,
    preprocess_info: PreprocessInfo,
    sequences: Vec<IndexedSequence>,
}

impl SearchIndex {
    pub fn new(
        schema: Arc<Schema>,
        values: Vec<f32>,
        preprocess_info: PreprocessInfo,
        sequences: Vec<IndexedSequence>,
    ) -> Result<Self> {
        let num_floats = schema.num_floats();
        if num_floats == 0 {
            return Err(PoseSearchError::EmptyLayout);
        }
        let num_poses = values.len() / num_floats;
        if num_poses * num_floats != values.len() {
            return Err(PoseSearchError::PoseCountMismatch {
                num_poses,
                num_floats,
                num_values: values.len(),
            });
        }
        if preprocess_info.num_floats() != num_floats {
            return Err(PoseSearchError::DimensionMismatch {
                expected: num_floats,
                actual: preprocess_info.num_floats(),
            });
        }
        let covered: usize = sequences.iter().map(|s| s.num_poses).sum();
        if covered != num_poses {
            return Err(PoseSearchError::PoseCountMismatch {
                num_poses: covered,
                num_floats,
                num_values: values.len(),
            });
        }
        Ok(Self {
            schema,
            num_poses,
            values,
            preprocess_info,
            sequences,
        })
    }

    pub fn is_valid(&self) -> bool {
        self.schema.is_valid() && self.num_poses * self.schema.num_floats() == self.values.len()
    }

    pub fn is_empty(&self) -> bool {
        self.num_poses == 0
    }

    pub fn schema(&self) -> &Arc<Schema> {
        &self.schema
    }

    #[inline]
    pub fn num_poses(&self) -> usize {
        self.num_poses
    }

    #[inline]
    pub fn num_floats(&self) -> usize {
        self.schema.num_floats()
    }

    pub fn values(&self) -> &[f32] {
        &self.values
    }

    pub fn preprocess_info(&self) -> &PreprocessInfo {
        &self.preprocess_info
    }

    pub fn sequences(&self) -> &[IndexedSequence] {
        &self.sequences
    }

    /// Normalized vector of one pose.
    pub fn get_pose_values(&self, pose_idx: usize) -> Result<&[f32]> {
        if pose_idx >= self.num_poses {
            return Err(PoseSearchError::PoseOutOfRange {
                pose_idx,
                num_poses: self.num_poses,
            });
        }
        let n = self.num_floats();
        Ok(&self.values[pose_idx * n..(pose_idx + 1) * n])
    }

    /// Raw vector of one pose, with preprocessing undone.
    pub fn get_pose_values_raw(&self, pose_idx: usize) -> Result<Vec<f32>> {
        let mut raw = self.get_pose_values(pose_idx)?.to_vec();
        self.preprocess_info.denormalize(&mut raw)?;
        Ok(raw)
    }

    /// Position of the sequence owning `pose_idx` in [`Self::sequences`].
    pub fn find_sequence_for_pose(&self, pose_idx: usize) -> Option<usize> {
        let idx = self
            .sequences
            .partition_point(|s| s.first_pose_idx + s.num_poses <= pose_idx);
        self.sequences
            .get(idx)
            .filter(|s| s.contains(pose_idx))
            .map(|_| idx)
    }

    /// Clip time of `pose_idx` within its sequence.
    pub fn pose_time(&self, pose_idx: usize) -> Option<f32> {
        let seq = &self.sequences[self.find_sequence_for_pose(pose_idx)?];
        let sample = seq.first_indexed_sample + (pose_idx - seq.first_pose_idx);
        Some((sample as f32 * self.schema.sampling_interval()).min(seq.play_length))
    }

    /// Pose of indexed sequence `indexed_idx` nearest to `time`, or `None`
    /// when `time` lies outside the sequence's sampling range. A rounded
    /// offset past the last pose wraps once for looping clips and clamps
    /// otherwise.
    pub fn get_pose_index_from_time(&self, indexed_idx: usize, time: f32) -> Option<usize> {
        let seq = self.sequences.get(indexed_idx)?;
        let range = seq.sampling_range;
        if seq.num_poses == 0 || !(range.min..=range.max).contains(&time) {
            return None;
        }
        let rate = self.schema.sample_rate() as f32;
        let first_time = seq.first_indexed_sample as f32 / rate;
        let offset = ((time - first_time) * rate).round().max(0.0) as usize;
        let offset = if offset < seq.num_poses {
            offset
        } else if seq.looping {
            (offset - seq.num_poses).min(seq.num_poses - 1)
        } else {
            seq.num_poses - 1
        };
        Some(seq.first_pose_idx + offset)
    }

    /// Raw query to the normalized space of this index.
    pub fn normalize(&self, values: &mut [f32]) -> Result<()> {
        self.preprocess_info.normalize(values)
    }

    pub fn denormalize(&self, values: &mut [f32]) -> Result<()> {
        self.preprocess_info.denormalize(values)
    }
}
