//! Multi-sequence databases and index construction.
//!
//! Building runs in three phases: every unique clip gets its root-distance
//! table sampled, every (sequence, mirror) pair is indexed independently, and
//! the rows are concatenated and preprocessed on the calling thread.

use std::sync::Arc;

use hashbrown::HashMap;
use rayon::prelude::*;
use serde::{Deserialize, Serialize};

use crate::clip::AnimationClip;
use crate::config::IndexingConfig;
use crate::error::PoseSearchError;
use crate::index::{IndexedSequence, SearchIndex};
use crate::indexer::{IndexerOutput, IndexingContext, SamplingRange, SequenceIndexer};
use crate::preprocess::preprocess;
use crate::sample_info::ClipChain;
use crate::sampler::SequenceSampler;
use crate::schema::Schema;
use crate::search::BiasWeightsContext;
use crate::Result;

/// Which variants of a sequence get indexed.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub enum MirrorOption {
    #[default]
    Original,
    Mirrored,
    Both,
}

impl MirrorOption {
    fn variants(self) -> &'static [bool] {
        match self {
            MirrorOption::Original => &[false],
            MirrorOption::Mirrored => &[true],
            MirrorOption::Both => &[false, true],
        }
    }

    pub fn needs_mirror_axis(self) -> bool {
        !matches!(self, MirrorOption::Original)
    }
}

/// One entry of a [`Database`].
#[derive(Clone)]
pub struct DatabaseSequence {
    pub main: Arc<dyn AnimationClip>,
    /// Played before `main`; only consulted when `main` doesn't loop.
    pub lead_in: Option<Arc<dyn AnimationClip>>,
    /// Played after `main`; only consulted when `main` doesn't loop.
    pub follow_up: Option<Arc<dyn AnimationClip>>,
    pub sampling_range: SamplingRange,
    pub mirror: MirrorOption,
    /// Multiplied into the search weights for this sequence's poses.
    pub bias_weights: Option<Vec<f32>>,
}

impl std::fmt::Debug for DatabaseSequence {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("DatabaseSequence")
            .field("main", &self.main.name())
            .field("lead_in", &self.lead_in.as_ref().map(|c| c.name().to_owned()))
            .field("follow_up", &self.follow_up.as_ref().map(|c| c.name().to_owned()))
            .field("sampling_range", &self.sampling_range)
            .field("mirror", &self.mirror)
            .field("bias_weights", &self.bias_weights)
            .finish()
    }
}

impl DatabaseSequence {
    pub fn new(main: Arc<dyn AnimationClip>) -> Self {
        Self {
            main,
            lead_in: None,
            follow_up: None,
            sampling_range: SamplingRange::WHOLE_CLIP,
            mirror: MirrorOption::Original,
            bias_weights: None,
        }
    }

    pub fn with_lead_in(mut self, clip: Arc<dyn AnimationClip>) -> Self {
        self.lead_in = Some(clip);
        self
    }

    pub fn with_follow_up(mut self, clip: Arc<dyn AnimationClip>) -> Self {
        self.follow_up = Some(clip);
        self
    }

    pub fn with_sampling_range(mut self, range: SamplingRange) -> Self {
        self.sampling_range = range;
        self
    }

    pub fn with_mirror(mut self, mirror: MirrorOption) -> Self {
        self.mirror = mirror;
        self
    }

    pub fn with_bias_weights(mut self, weights: Vec<f32>) -> Self {
        self.bias_weights = Some(weights);
        self
    }

    fn clips(&self) -> impl Iterator<Item = &Arc<dyn AnimationClip>> {
        std::iter::once(&self.main)
            .chain(self.lead_in.as_ref())
            .chain(self.follow_up.as_ref())
    }
}

/// Where a matched pose can be played from.
#[derive(Clone, Debug)]
pub struct PlayablePose<'a> {
    pub sequence_idx: usize,
    pub sequence: &'a DatabaseSequence,
    pub time: f32,
    pub mirrored: bool,
}

/// Ordered list of sequences sharing one schema.
#[derive(Clone, Debug)]
pub struct Database {
    schema: Arc<Schema>,
    sequences: Vec<DatabaseSequence>,
}

/// Clips are shared by identity; the vtable half of the fat pointer is ignored.
fn clip_key(clip: &Arc<dyn AnimationClip>) -> usize {
    Arc::as_ptr(clip) as *const () as usize
}

#[derive(Default)]
struct SampledClips {
    slots: HashMap<usize, usize>,
    samplers: Vec<SequenceSampler>,
}

impl SampledClips {
    fn get(&self, clip: &Arc<dyn AnimationClip>) -> Option<&SequenceSampler> {
        self.slots
            .get(&clip_key(clip))
            .and_then(|&slot| self.samplers.get(slot))
    }
}

struct IndexTask {
    sequence_idx: usize,
    mirrored: bool,
    range: SamplingRange,
}

impl Database {
    pub fn new(schema: Arc<Schema>) -> Self {
        Self {
            schema,
            sequences: Vec::new(),
        }
    }

    pub fn with_sequence(mut self, sequence: DatabaseSequence) -> Self {
        self.sequences.push(sequence);
        self
    }

    /// Append a sequence, returning its index.
    pub fn add_sequence(&mut self, sequence: DatabaseSequence) -> usize {
        self.sequences.push(sequence);
        self.sequences.len() - 1
    }

    pub fn schema(&self) -> &Arc<Schema> {
        &self.schema
    }

    pub fn sequences(&self) -> &[DatabaseSequence] {
        &self.sequences
    }

    pub fn sequence(&self, sequence_idx: usize) -> Option<&DatabaseSequence> {
        self.sequences.get(sequence_idx)
    }

    /// Check everything [`Self::build_index`] needs before any sampling.
    pub fn validate_for_indexing(&self) -> Result<()> {
        if !self.schema.is_valid() {
            return Err(PoseSearchError::schema("database schema is not valid"));
        }
        if self.sequences.is_empty() {
            return Err(PoseSearchError::EmptyDatabase);
        }
        let num_floats = self.schema.num_floats();
        for seq in &self.sequences {
            seq.sampling_range.effective(seq.main.play_length())?;
            if seq.mirror.needs_mirror_axis() && self.schema.mirror_axis().is_none() {
                return Err(PoseSearchError::schema(format!(
                    "sequence '{}' is mirrored but the schema has no mirror axis",
                    seq.main.name()
                )));
            }
            if let Some(bias) = &seq.bias_weights {
                if bias.len() != num_floats {
                    return Err(PoseSearchError::DimensionMismatch {
                        expected: num_floats,
                        actual: bias.len(),
                    });
                }
            }
        }
        Ok(())
    }

    pub fn is_valid_for_indexing(&self) -> bool {
        self.validate_for_indexing().is_ok()
    }

    /// Whether `index` was built from this database's schema and can be searched.
    pub fn is_valid_for_search(&self, index: &SearchIndex) -> bool {
        Arc::ptr_eq(&self.schema, index.schema())
            && index.is_valid()
            && index
                .sequences()
                .iter()
                .all(|s| s.sequence_idx < self.sequences.len())
    }

    /// Bias weights of every sequence that declares some.
    pub fn bias_weights_context(&self) -> BiasWeightsContext {
        let mut ctx = BiasWeightsContext::new();
        for (idx, seq) in self.sequences.iter().enumerate() {
            if let Some(weights) = &seq.bias_weights {
                ctx.insert(idx, weights.clone());
            }
        }
        ctx
    }

    /// Map a pose of `index` back to its sequence and clip time.
    pub fn find_sequence_for_pose<'a>(
        &'a self,
        index: &SearchIndex,
        pose_idx: usize,
    ) -> Option<PlayablePose<'a>> {
        let indexed = &index.sequences()[index.find_sequence_for_pose(pose_idx)?];
        Some(PlayablePose {
            sequence_idx: indexed.sequence_idx,
            sequence: self.sequences.get(indexed.sequence_idx)?,
            time: index.pose_time(pose_idx)?,
            mirrored: indexed.mirrored,
        })
    }

    /// Pose of the indexed sequence nearest to `time`; see
    /// [`SearchIndex::get_pose_index_from_time`].
    pub fn get_pose_index_from_asset_time(
        &self,
        index: &SearchIndex,
        indexed_idx: usize,
        time: f32,
    ) -> Option<usize> {
        index.get_pose_index_from_time(indexed_idx, time)
    }

    /// Sample, index and preprocess every sequence.
    pub fn build_index(&self, config: &IndexingConfig) -> Result<SearchIndex> {
        config.validate()?;
        if let Err(err) = self.validate_for_indexing() {
            log::warn!("refusing to build pose search index: {err}");
            return Err(err);
        }

        let samplers = self.sample_clips(config);
        let tasks = self.index_tasks()?;

        let run = |task: &IndexTask| self.index_task(task, config, &samplers);
        let outputs: Vec<IndexerOutput> = if config.parallel {
            tasks.par_iter().map(run).collect::<Result<_>>()?
        } else {
            tasks.iter().map(run).collect::<Result<_>>()?
        };

        let num_floats = self.schema.num_floats();
        let total: usize = outputs.iter().map(|o| o.num_indexed_poses).sum();
        let mut values = Vec::with_capacity(total * num_floats);
        let mut indexed = Vec::with_capacity(outputs.len());
        for (task, output) in tasks.iter().zip(outputs) {
            let seq = &self.sequences[task.sequence_idx];
            indexed.push(IndexedSequence {
                sequence_idx: task.sequence_idx,
                mirrored: task.mirrored,
                first_pose_idx: values.len() / num_floats,
                num_poses: output.num_indexed_poses,
                sampling_range: task.range,
                first_indexed_sample: output.first_indexed_sample,
                play_length: seq.main.play_length(),
                looping: seq.main.is_loopable(),
            });
            values.extend_from_slice(&output.values);
        }

        let info = preprocess(&mut values, self.schema.layout(), self.schema.preprocessor())?;
        log::debug!(
            "built pose search index: {} poses x {} floats from {} indexed sequences ({:?})",
            total,
            num_floats,
            indexed.len(),
            self.schema.preprocessor()
        );
        SearchIndex::new(Arc::clone(&self.schema), values, info, indexed)
    }

    fn sample_clips(&self, config: &IndexingConfig) -> SampledClips {
        let mut clips = SampledClips::default();
        for clip in self.sequences.iter().flat_map(DatabaseSequence::clips) {
            let next = clips.samplers.len();
            clips.slots.entry(clip_key(clip)).or_insert_with(|| {
                clips.samplers.push(SequenceSampler::new(
                    Arc::clone(clip),
                    config.root_distance_sample_rate,
                ));
                next
            });
        }
        if config.parallel {
            clips.samplers.par_iter_mut().for_each(SequenceSampler::process);
        } else {
            clips.samplers.iter_mut().for_each(SequenceSampler::process);
        }
        log::debug!("sampled {} unique clips", clips.samplers.len());
        clips
    }

    fn index_tasks(&self) -> Result<Vec<IndexTask>> {
        let mut tasks = Vec::new();
        for (sequence_idx, seq) in self.sequences.iter().enumerate() {
            let range = seq.sampling_range.effective(seq.main.play_length())?;
            for &mirrored in seq.mirror.variants() {
                tasks.push(IndexTask {
                    sequence_idx,
                    mirrored,
                    range,
                });
            }
        }
        Ok(tasks)
    }

    fn index_task(
        &self,
        task: &IndexTask,
        config: &IndexingConfig,
        samplers: &SampledClips,
    ) -> Result<IndexerOutput> {
        let seq = &self.sequences[task.sequence_idx];
        let lookup = |clip: &Arc<dyn AnimationClip>| {
            samplers.get(clip).ok_or_else(|| {
                PoseSearchError::schema(format!("clip '{}' was not sampled", clip.name()))
            })
        };
        let main = lookup(&seq.main)?;
        let lead_in = seq.lead_in.as_ref().map(lookup).transpose()?;
        let follow_up = seq.follow_up.as_ref().map(lookup).transpose()?;

        let mut indexer = SequenceIndexer::new(IndexingContext {
            schema: &self.schema,
            config,
            chain: ClipChain::new(main)
                .with_lead_in(lead_in)
                .with_follow_up(follow_up),
            sampling_range: task.range,
            mirrored: task.mirrored,
        });
        indexer.process()
    }
}

/// Index a single clip on its own.
pub fn build_sequence_index(
    clip: Arc<dyn AnimationClip>,
    schema: Arc<Schema>,
    sampling_range: SamplingRange,
    config: &IndexingConfig,
) -> Result<SearchIndex> {
    Database::new(schema)
        .with_sequence(DatabaseSequence::new(clip).with_sampling_range(sampling_range))
        .build_index(config)
}
