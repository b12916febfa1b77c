//! Feature descriptors and the flat float layout they map onto.
//!
//! A pose vector is the concatenation of every declared feature's floats.
//! Features are found by structural equality (bone, subsample, type, domain),
//! never by position, so the declaration order only matters for locality.

use serde::{Deserialize, Serialize};

#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub enum FeatureType {
    Position,
    Rotation,
    LinearVelocity,
    AngularVelocity,
}

impl FeatureType {
    /// Floats occupied by one feature of this type.
    ///
    /// Rotation stores two body axes instead of a quaternion.
    #[inline]
    pub const fn num_floats(self) -> usize {
        match self {
            FeatureType::Position => 3,
            FeatureType::Rotation => 6,
            FeatureType::LinearVelocity => 3,
            FeatureType::AngularVelocity => 3,
        }
    }
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub enum FeatureDomain {
    Time,
    Distance,
}

/// What a feature is attached to: a schema bone or the root trajectory.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub enum FeatureSource {
    Bone(usize),
    Trajectory,
}

#[derive(Clone, Copy, Debug, Serialize, Deserialize)]
pub struct FeatureDesc {
    pub source: FeatureSource,
    pub subsample_idx: usize,
    pub feature_type: FeatureType,
    pub domain: FeatureDomain,
    /// Offset of the first float; assigned by [`Layout::init`].
    #[serde(default)]
    pub value_offset: usize,
}

impl FeatureDesc {
    pub fn new(
        source: FeatureSource,
        subsample_idx: usize,
        feature_type: FeatureType,
        domain: FeatureDomain,
    ) -> Self {
        Self {
            source,
            subsample_idx,
            feature_type,
            domain,
            value_offset: 0,
        }
    }

    pub fn bone(bone_idx: usize, subsample_idx: usize, feature_type: FeatureType) -> Self {
        Self::new(
            FeatureSource::Bone(bone_idx),
            subsample_idx,
            feature_type,
            FeatureDomain::Time,
        )
    }

    pub fn trajectory(
        subsample_idx: usize,
        feature_type: FeatureType,
        domain: FeatureDomain,
    ) -> Self {
        Self::new(FeatureSource::Trajectory, subsample_idx, feature_type, domain)
    }

    #[inline]
    pub fn with_type(mut self, feature_type: FeatureType) -> Self {
        self.feature_type = feature_type;
        self
    }

    #[inline]
    pub fn is_trajectory(&self) -> bool {
        matches!(self.source, FeatureSource::Trajectory)
    }

    #[inline]
    pub fn num_floats(&self) -> usize {
        self.feature_type.num_floats()
    }

    /// Float range of this feature inside a pose vector.
    #[inline]
    pub fn value_range(&self) -> std::ops::Range<usize> {
        self.value_offset..self.value_offset + self.num_floats()
    }
}

impl PartialEq for FeatureDesc {
    fn eq(&self, other: &Self) -> bool {
        self.source == other.source
            && self.subsample_idx == other.subsample_idx
            && self.feature_type == other.feature_type
            && self.domain == other.domain
    }
}

impl Eq for FeatureDesc {}

#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize)]
pub struct Layout {
    pub features: Vec<FeatureDesc>,
    pub num_floats: usize,
}

impl Layout {
    pub fn new(features: Vec<FeatureDesc>) -> Self {
        let mut layout = Self {
            features,
            num_floats: 0,
        };
        layout.init();
        layout
    }

    /// Assign offsets as a running sum of feature arities.
    pub fn init(&mut self) {
        let mut float_count = 0;
        for feature in &mut self.features {
            feature.value_offset = float_count;
            float_count += feature.num_floats();
        }
        self.num_floats = float_count;
    }

    pub fn reset(&mut self) {
        self.features.clear();
        self.num_floats = 0;
    }

    /// Non-empty, and every bone feature refers to one of `max_num_bones` bones.
    pub fn is_valid(&self, max_num_bones: usize) -> bool {
        if self.num_floats == 0 {
            return false;
        }
        self.features.iter().all(|f| match f.source {
            FeatureSource::Bone(idx) => idx < max_num_bones,
            FeatureSource::Trajectory => true,
        })
    }

    /// Index of the feature structurally equal to `desc`.
    #[inline]
    pub fn find(&self, desc: &FeatureDesc) -> Option<usize> {
        self.features.iter().position(|f| f == desc)
    }

    #[inline]
    pub fn get(&self, desc: &FeatureDesc) -> Option<&FeatureDesc> {
        self.features.iter().find(|f| *f == desc)
    }

    /// Every feature of `feature_type` on the trajectory (or on bones), across all subsamples.
    pub fn enumerate_features(
        &self,
        feature_type: FeatureType,
        is_trajectory: bool,
    ) -> impl Iterator<Item = usize> + '_ {
        self.features
            .iter()
            .enumerate()
            .filter(move |(_, f)| {
                f.feature_type == feature_type && f.is_trajectory() == is_trajectory
            })
            .map(|(idx, _)| idx)
    }
}
