//! Predicted root trajectory used for the future half of a query.

use nalgebra::Vector3;

use crate::error::PoseSearchError;
use crate::math::{blend, Transform};
use crate::Result;

#[derive(Clone, Copy, Debug, PartialEq)]
pub struct TrajectorySample {
    /// Seconds from now; negative samples lie in the past.
    pub accumulated_seconds: f32,
    /// Root travel from now; negative samples lie in the past.
    pub accumulated_distance: f32,
    /// Root transform relative to the current root.
    pub transform: Transform,
}

impl TrajectorySample {
    fn lerp(&self, other: &TrajectorySample, alpha: f32) -> TrajectorySample {
        TrajectorySample {
            accumulated_seconds: self.accumulated_seconds
                + (other.accumulated_seconds - self.accumulated_seconds) * alpha,
            accumulated_distance: self.accumulated_distance
                + (other.accumulated_distance - self.accumulated_distance) * alpha,
            transform: blend(&self.transform, &other.transform, alpha),
        }
    }
}

/// Samples ordered by time, with non-decreasing accumulated distance.
#[derive(Clone, Debug, Default, PartialEq)]
pub struct Trajectory {
    samples: Vec<TrajectorySample>,
}

impl Trajectory {
    pub fn new(samples: Vec<TrajectorySample>) -> Result<Self> {
        let ordered = samples.windows(2).all(|w| {
            w[0].accumulated_seconds < w[1].accumulated_seconds
                && w[0].accumulated_distance <= w[1].accumulated_distance
        });
        if !ordered {
            return Err(PoseSearchError::InvalidConfig {
                reason: "trajectory samples must be ordered by time and distance".into(),
            });
        }
        Ok(Self { samples })
    }

    /// Straight-line prediction at constant `velocity` from `-past` to `+future` seconds.
    pub fn constant_velocity(velocity: Vector3<f32>, past: f32, future: f32, step: f32) -> Self {
        let speed = velocity.norm();
        let step = step.max(f32::EPSILON);
        let first = -(past / step).ceil() as i32;
        let last = (future / step).ceil() as i32;
        let samples = (first..=last)
            .map(|i| {
                let t = (i as f32 * step).clamp(-past, future);
                TrajectorySample {
                    accumulated_seconds: t,
                    accumulated_distance: speed * t,
                    transform: Transform::translation(
                        velocity.x * t,
                        velocity.y * t,
                        velocity.z * t,
                    ),
                }
            })
            .collect::<Vec<_>>();
        let mut deduped: Vec<TrajectorySample> = Vec::with_capacity(samples.len());
        for sample in samples {
            if deduped
                .last()
                .map_or(true, |last| last.accumulated_seconds < sample.accumulated_seconds)
            {
                deduped.push(sample);
            }
        }
        Self { samples: deduped }
    }

    pub fn samples(&self) -> &[TrajectorySample] {
        &self.samples
    }

    fn sample_by(
        &self,
        key: f32,
        get: impl Fn(&TrajectorySample) -> f32,
    ) -> Option<TrajectorySample> {
        let first = self.samples.first()?;
        let last = self.samples.last()?;
        if key < get(first) || key > get(last) {
            return None;
        }
        let next = self.samples.partition_point(|s| get(s) < key);
        if next == 0 {
            return Some(*first);
        }
        let (a, b) = (&self.samples[next - 1], &self.samples[next]);
        let span = get(b) - get(a);
        let alpha = if span > f32::EPSILON {
            (key - get(a)) / span
        } else {
            1.0
        };
        Some(a.lerp(b, alpha))
    }

    pub fn sample_by_time(&self, seconds: f32) -> Result<TrajectorySample> {
        self.sample_by(seconds, |s| s.accumulated_seconds)
            .ok_or(PoseSearchError::TrajectoryCoverage { offset: seconds })
    }

    pub fn sample_by_distance(&self, distance: f32) -> Result<TrajectorySample> {
        self.sample_by(distance, |s| s.accumulated_distance)
            .ok_or(PoseSearchError::TrajectoryCoverage { offset: distance })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use approx::assert_relative_eq;

    #[test]
    fn constant_velocity_interpolates() {
        let traj = Trajectory::constant_velocity(Vector3::new(100.0, 0.0, 0.0), 0.5, 1.0, 0.1);
        let s = traj.sample_by_time(0.55).unwrap();
        assert_relative_eq!(s.transform.translation.x, 55.0, epsilon = 1e-3);
        let d = traj.sample_by_distance(-25.0).unwrap();
        assert_relative_eq!(d.accumulated_seconds, -0.25, epsilon = 1e-4);
    }

    #[test]
    fn outside_range_is_coverage_error() {
        let traj = Trajectory::constant_velocity(Vector3::new(1.0, 0.0, 0.0), 0.0, 1.0, 0.25);
        let err = traj.sample_by_time(1.5).unwrap_err();
        assert!(err.is_recoverable());
        assert!(Trajectory::default().sample_by_time(0.0).is_err());
    }

    #[test]
    fn rejects_unordered_samples() {
        let s = |t: f32| TrajectorySample {
            accumulated_seconds: t,
            accumulated_distance: t,
            transform: Transform::identity(),
        };
        assert!(Trajectory::new(vec![s(0.5), s(0.0)]).is_err());
        assert!(Trajectory::new(vec![s(0.0), s(0.5)]).is_ok());
    }
}
