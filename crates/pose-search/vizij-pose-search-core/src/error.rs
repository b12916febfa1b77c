//! Error types for pose search

use serde::{Deserialize, Serialize};

/// Broad grouping of [`PoseSearchError`] used by callers deciding on a fallback.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum ErrorCategory {
    /// Invalid schema/database setup; blocks indexing and search entirely.
    Configuration,
    /// History or trajectory doesn't cover a requested offset yet.
    Coverage,
    /// A build-time defect such as a dimensionality mismatch.
    Structural,
    /// Numeric degeneracy that regularization couldn't absorb.
    Numeric,
}

/// Comprehensive error type for pose search operations
#[derive(thiserror::Error, Debug, Clone, PartialEq, Serialize, Deserialize)]
#[non_exhaustive]
pub enum PoseSearchError {
    /// Schema has no skeleton to resolve bones against
    #[error("Schema has no skeleton")]
    MissingSkeleton,

    /// Bone name not present in the skeleton
    #[error("Bone not found in skeleton: {name}")]
    UnresolvedBone { name: String },

    /// Schema produced no features
    #[error("Schema layout is empty")]
    EmptyLayout,

    /// Generic schema validation failure
    #[error("Invalid schema: {reason}")]
    InvalidSchema { reason: String },

    /// Configuration value rejected during validation
    #[error("Invalid configuration: {reason}")]
    InvalidConfig { reason: String },

    /// Sampling range is negative or inverted
    #[error("Invalid sampling range [{min}, {max}]")]
    InvalidSamplingRange { min: f32, max: f32 },

    /// Database has no sequences to index
    #[error("Database has no sequences")]
    EmptyDatabase,

    /// Clip pose doesn't match the schema skeleton
    #[error("Clip '{clip}' produced {actual} bones, skeleton has {expected}")]
    IncompatibleSkeleton {
        clip: String,
        expected: usize,
        actual: usize,
    },

    /// History doesn't span the requested time
    #[error("Pose history does not cover {seconds_ago}s ago")]
    HistoryCoverage { seconds_ago: f32 },

    /// History doesn't hold enough root travel
    #[error("Pose history does not cover {distance} units of root travel")]
    HistoryDistanceCoverage { distance: f32 },

    /// Trajectory doesn't span the requested offset
    #[error("Trajectory does not cover offset {offset}")]
    TrajectoryCoverage { offset: f32 },

    /// Bracketing history poses disagree on bone count (mid-transition)
    #[error("History poses have mismatched bone counts: {prev} vs {next}")]
    MismatchedBoneCount { prev: usize, next: usize },

    /// Vector length doesn't match the layout
    #[error("Dimension mismatch: expected {expected}, got {actual}")]
    DimensionMismatch { expected: usize, actual: usize },

    /// Index value count isn't pose count times float count
    #[error("Pose count mismatch: {num_poses} poses x {num_floats} floats != {num_values} values")]
    PoseCountMismatch {
        num_poses: usize,
        num_floats: usize,
        num_values: usize,
    },

    /// Pose index outside of the index
    #[error("Pose {pose_idx} out of range (index has {num_poses} poses)")]
    PoseOutOfRange { pose_idx: usize, num_poses: usize },

    /// Builder is missing features
    #[error("Feature vector incomplete: {missing} features not written")]
    IncompleteFeatureVector { missing: usize },

    /// Index not built or invalid for search
    #[error("Search index is not valid for search")]
    InvalidIndex,

    /// Numeric failure not absorbed by regularization
    #[error("Numeric error: {reason}")]
    Numeric { reason: String },
}

impl PoseSearchError {
    /// Create a new schema error
    pub fn schema(reason: impl Into<String>) -> Self {
        Self::InvalidSchema {
            reason: reason.into(),
        }
    }

    /// Check if this is a recoverable error
    #[inline]
    pub fn is_recoverable(&self) -> bool {
        matches!(self.category(), ErrorCategory::Coverage)
    }

    /// Get error category for logging and fallback decisions
    pub fn category(&self) -> ErrorCategory {
        match self {
            Self::MissingSkeleton
            | Self::UnresolvedBone { .. }
            | Self::EmptyLayout
            | Self::InvalidSchema { .. }
            | Self::InvalidConfig { .. }
            | Self::InvalidSamplingRange { .. }
            | Self::EmptyDatabase
            | Self::IncompatibleSkeleton { .. } => ErrorCategory::Configuration,
            Self::HistoryCoverage { .. }
            | Self::HistoryDistanceCoverage { .. }
            | Self::TrajectoryCoverage { .. }
            | Self::MismatchedBoneCount { .. } => ErrorCategory::Coverage,
            Self::DimensionMismatch { .. }
            | Self::PoseCountMismatch { .. }
            | Self::PoseOutOfRange { .. }
            | Self::IncompleteFeatureVector { .. }
            | Self::InvalidIndex => ErrorCategory::Structural,
            Self::Numeric { .. } => ErrorCategory::Numeric,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn coverage_errors_are_recoverable() {
        assert!(PoseSearchError::HistoryCoverage { seconds_ago: 2.0 }.is_recoverable());
        assert!(PoseSearchError::MismatchedBoneCount { prev: 3, next: 4 }.is_recoverable());
        assert!(!PoseSearchError::EmptyLayout.is_recoverable());
        assert!(!PoseSearchError::DimensionMismatch {
            expected: 3,
            actual: 6
        }
        .is_recoverable());
    }

    #[test]
    fn categories() {
        assert_eq!(
            PoseSearchError::UnresolvedBone {
                name: "foot_l".into()
            }
            .category(),
            ErrorCategory::Configuration
        );
        assert_eq!(
            PoseSearchError::PoseOutOfRange {
                pose_idx: 9,
                num_poses: 3
            }
            .category(),
            ErrorCategory::Structural
        );
    }

    #[test]
    fn display_includes_context() {
        let err = PoseSearchError::DimensionMismatch {
            expected: 12,
            actual: 9,
        };
        assert_eq!(err.to_string(), "Dimension mismatch: expected 12, got 9");
    }
}
