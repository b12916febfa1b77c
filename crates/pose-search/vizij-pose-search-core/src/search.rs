//! Weighted nearest-neighbour scan over a [`SearchIndex`].

use hashbrown::HashMap;

use crate::error::PoseSearchError;
use crate::index::SearchIndex;
use crate::Result;

/// Best match of one search.
#[derive(Clone, Copy, Debug, PartialEq)]
pub struct SearchResult {
    pub pose_idx: usize,
    /// Weighted squared distance; lower is more similar.
    pub dissimilarity: f32,
    /// Clip time of the matched pose.
    pub time_offset_seconds: f32,
    /// Position of the matched pose's sequence in [`SearchIndex::sequences`].
    pub indexed_sequence: Option<usize>,
}

/// Per-sequence multiplicative overrides of the search weights, keyed by
/// database sequence index.
#[derive(Clone, Debug, Default)]
pub struct BiasWeightsContext {
    weights: HashMap<usize, Vec<f32>>,
}

impl BiasWeightsContext {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_sequence_weights(mut self, sequence_idx: usize, weights: Vec<f32>) -> Self {
        self.weights.insert(sequence_idx, weights);
        self
    }

    pub fn insert(&mut self, sequence_idx: usize, weights: Vec<f32>) {
        self.weights.insert(sequence_idx, weights);
    }

    pub fn get(&self, sequence_idx: usize) -> Option<&[f32]> {
        self.weights.get(&sequence_idx).map(Vec::as_slice)
    }

    pub fn is_empty(&self) -> bool {
        self.weights.is_empty()
    }
}

#[inline]
fn dissimilarity(query: &[f32], pose: &[f32], weights: &[f32]) -> f32 {
    query
        .iter()
        .zip(pose)
        .zip(weights)
        .map(|((q, p), w)| {
            let d = w * (q - p);
            d * d
        })
        .sum()
}

fn check_len(expected: usize, actual: usize) -> Result<()> {
    if expected != actual {
        return Err(PoseSearchError::DimensionMismatch { expected, actual });
    }
    Ok(())
}

fn check_index(index: &SearchIndex, query: &[f32], weights: Option<&[f32]>) -> Result<()> {
    if !index.is_valid() {
        log::warn!("search refused: index is not valid");
        return Err(PoseSearchError::InvalidIndex);
    }
    check_len(index.num_floats(), query.len())?;
    if let Some(weights) = weights {
        check_len(index.num_floats(), weights.len())?;
    }
    Ok(())
}

/// Dissimilarity of one indexed pose against a normalized query.
pub fn compare_poses(
    index: &SearchIndex,
    pose_idx: usize,
    query: &[f32],
    weights: Option<&[f32]>,
) -> Result<f32> {
    check_index(index, query, weights)?;
    let pose = index.get_pose_values(pose_idx)?;
    Ok(match weights {
        Some(weights) => dissimilarity(query, pose, weights),
        None => query
            .iter()
            .zip(pose)
            .map(|(q, p)| (q - p) * (q - p))
            .sum(),
    })
}

/// Scan every pose for the one closest to `query` (already normalized).
///
/// `base_weights` defaults to all ones. With `bias`, poses of a sequence that
/// has bias weights use `base * bias` element-wise. Ties keep the lowest pose
/// index. Returns `Ok(None)` for an empty index.
pub fn search(
    index: &SearchIndex,
    query: &[f32],
    base_weights: Option<&[f32]>,
    bias: Option<&BiasWeightsContext>,
) -> Result<Option<SearchResult>> {
    check_index(index, query, base_weights)?;
    let num_floats = index.num_floats();
    let base: Vec<f32> = match base_weights {
        Some(w) => w.to_vec(),
        None => vec![1.0; num_floats],
    };
    let sequences = index.sequences();
    let mut weights = base.clone();
    let mut seq_cursor = 0usize;
    let mut seq_end = 0usize;

    let mut best: Option<(usize, f32)> = None;
    for (pose_idx, pose) in index.values().chunks_exact(num_floats).enumerate() {
        if let Some(bias) = bias {
            if pose_idx >= seq_end {
                while seq_cursor < sequences.len()
                    && sequences[seq_cursor].first_pose_idx + sequences[seq_cursor].num_poses
                        <= pose_idx
                {
                    seq_cursor += 1;
                }
                weights.copy_from_slice(&base);
                if let Some(seq) = sequences.get(seq_cursor) {
                    seq_end = seq.first_pose_idx + seq.num_poses;
                    if let Some(seq_bias) = bias.get(seq.sequence_idx) {
                        check_len(num_floats, seq_bias.len())?;
                        for (w, b) in weights.iter_mut().zip(seq_bias) {
                            *w *= b;
                        }
                    }
                } else {
                    seq_end = usize::MAX;
                }
            }
        }

        let d = dissimilarity(query, pose, &weights);
        if best.map_or(true, |(_, best_d)| d < best_d) {
            best = Some((pose_idx, d));
        }
    }

    Ok(best.map(|(pose_idx, dissimilarity)| SearchResult {
        pose_idx,
        dissimilarity,
        time_offset_seconds: index.pose_time(pose_idx).unwrap_or(0.0),
        indexed_sequence: index.find_sequence_for_pose(pose_idx),
    }))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::clip::{Skeleton, SkeletonDef};
    use crate::config::SchemaConfig;
    use crate::index::IndexedSequence;
    use crate::indexer::SamplingRange;
    use crate::preprocess::PreprocessInfo;
    use crate::schema::Schema;
    use std::sync::Arc;

    fn schema() -> Arc<Schema> {
        let skeleton: Arc<dyn Skeleton> = Arc::new(SkeletonDef::chain(&["root"]));
        let mut cfg = SchemaConfig {
            trajectory_sample_times: vec![0.0],
            ..SchemaConfig::default()
        };
        cfg.features.trajectory_velocities = false;
        Arc::new(cfg.finalize(Some(skeleton)).unwrap())
    }

    fn seq(sequence_idx: usize, first_pose_idx: usize, num_poses: usize) -> IndexedSequence {
        IndexedSequence {
            sequence_idx,
            mirrored: false,
            first_pose_idx,
            num_poses,
            sampling_range: SamplingRange::new(0.0, 1.0),
            first_indexed_sample: 0,
            play_length: 1.0,
            looping: false,
        }
    }

    fn index(rows: &[[f32; 3]], sequences: Vec<IndexedSequence>) -> SearchIndex {
        let values = rows.iter().flatten().copied().collect();
        SearchIndex::new(schema(), values, PreprocessInfo::identity(3), sequences).unwrap()
    }

    #[test]
    fn exact_match_wins() {
        let index = index(
            &[[0.0, 0.0, 0.0], [1.0, 2.0, 3.0], [5.0, 5.0, 5.0]],
            vec![seq(0, 0, 3)],
        );
        let result = search(&index, &[1.0, 2.0, 3.0], None, None).unwrap().unwrap();
        assert_eq!(result.pose_idx, 1);
        assert_eq!(result.dissimilarity, 0.0);
        assert_eq!(result.indexed_sequence, Some(0));
    }

    #[test]
    fn ties_resolve_to_lowest_index() {
        let index = index(
            &[[1.0, 0.0, 0.0], [-1.0, 0.0, 0.0], [1.0, 0.0, 0.0]],
            vec![seq(0, 0, 3)],
        );
        for _ in 0..3 {
            let result = search(&index, &[0.0; 3], None, None).unwrap().unwrap();
            assert_eq!(result.pose_idx, 0);
            assert_eq!(result.dissimilarity, 1.0);
        }
    }

    #[test]
    fn base_weights_scale_before_squaring() {
        let index = index(&[[0.0, 0.0, 0.0], [3.0, 0.0, 0.0]], vec![seq(0, 0, 2)]);
        let d = compare_poses(&index, 1, &[0.0; 3], Some(&[2.0, 1.0, 1.0])).unwrap();
        assert_eq!(d, 36.0);
        assert_eq!(compare_poses(&index, 1, &[0.0; 3], None).unwrap(), 9.0);
    }

    #[test]
    fn bias_weights_apply_per_sequence() {
        // sequence 0 holds the closer pose, but its bias weights inflate the cost
        let index = index(
            &[[1.0, 0.0, 0.0], [0.0, 2.0, 0.0]],
            vec![seq(0, 0, 1), seq(1, 1, 1)],
        );
        let query = [0.0; 3];
        let plain = search(&index, &query, None, None).unwrap().unwrap();
        assert_eq!(plain.pose_idx, 0);

        let bias = BiasWeightsContext::new().with_sequence_weights(0, vec![10.0, 1.0, 1.0]);
        let biased = search(&index, &query, None, Some(&bias)).unwrap().unwrap();
        assert_eq!(biased.pose_idx, 1);
        assert_eq!(biased.dissimilarity, 4.0);
    }

    #[test]
    fn mismatched_query_fails_fast() {
        let index = index(&[[0.0; 3]], vec![seq(0, 0, 1)]);
        assert_eq!(
            search(&index, &[0.0; 2], None, None).unwrap_err(),
            PoseSearchError::DimensionMismatch {
                expected: 3,
                actual: 2
            }
        );
        let bias = BiasWeightsContext::new().with_sequence_weights(0, vec![1.0]);
        assert!(search(&index, &[0.0; 3], None, Some(&bias)).is_err());
    }
}
