//! Vizij Pose Search Core (engine-agnostic)
//!
//! Motion-matching pose search: a [`Schema`] describes which trajectory and
//! bone features make up a pose vector, a [`Database`] of clips is sampled and
//! indexed into a preprocessed [`SearchIndex`], and live queries built from a
//! [`PoseHistory`] plus a predicted [`Trajectory`] are matched against it with
//! a weighted linear [`search`].

pub mod clip;
pub mod config;
pub mod database;
pub mod error;
pub mod feature_vector;
pub mod history;
pub mod index;
pub mod indexer;
pub mod layout;
pub mod math;
pub mod preprocess;
pub mod query;
pub mod sample_info;
pub mod sampler;
pub mod schema;
pub mod search;
pub mod trajectory;

// Re-exports for consumers (adapters)
pub use clip::{
    AnimationClip, BoneDef, BoneTrack, KeyframedClip, Skeleton, SkeletonDef, TransformKey,
};
pub use config::{
    CategoryWeights, FeatureToggles, HistoryConfig, IndexingConfig, PreprocessPolicy, SchemaConfig,
};
pub use database::{build_sequence_index, Database, DatabaseSequence, MirrorOption, PlayablePose};
pub use error::{ErrorCategory, PoseSearchError};
pub use feature_vector::{FeatureVectorBuilder, FeatureVectorReader};
pub use history::{PoseHistory, SampledPose};
pub use index::{IndexedSequence, SearchIndex};
pub use indexer::SamplingRange;
pub use layout::{FeatureDesc, FeatureDomain, FeatureSource, FeatureType, Layout};
pub use math::{MirrorAxis, Transform};
pub use preprocess::PreprocessInfo;
pub use query::{build_query, QueryBuilder};
pub use sample_info::{ClipChain, SampleInfo};
pub use sampler::SequenceSampler;
pub use schema::Schema;
pub use search::{compare_poses, search, BiasWeightsContext, SearchResult};
pub use trajectory::{Trajectory, TrajectorySample};

/// Result type for pose search operations
pub type Result<T> = core::result::Result<T, PoseSearchError>;
