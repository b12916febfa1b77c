//! Resolving arbitrary time or distance offsets across a lead-in, main and
//! follow-up clip chain.
//!
//! Wrapping wins over clamping: a clip only clamps when it can't loop and no
//! neighbouring clip absorbs the overflow. Clamped samples carry their
//! overflow as extrapolation so root motion keeps moving past the clip end.

use crate::math::{compose, relative_to, Transform};
use crate::sampler::SequenceSampler;

const SMALL_NUMBER: f32 = 1e-8;
const KINDA_SMALL_NUMBER: f32 = 1e-4;
/// Clips travelling less than this per cycle never wrap in the distance domain.
const SMALL_ROOT_DISTANCE: f32 = 1.0;

/// A sampling parameter folded into `[0, extent]`.
#[derive(Clone, Copy, Debug, Default, PartialEq)]
pub struct SamplingParam {
    /// Folded value; in `[0, extent)` when wrapped, `[0, extent]` when clamped.
    pub wrapped: f32,
    /// Whole cycles removed while wrapping.
    pub num_cycles: u32,
    /// What clamping cut off (`value - clamped value`), zero when wrapping.
    pub extrapolation: f32,
    pub clamped: bool,
}

/// Fold `value` onto one cycle of `extent`, wrapping when allowed and
/// clamping otherwise.
pub fn wrap_or_clamp_sampling_param(can_wrap: bool, extent: f32, value: f32) -> SamplingParam {
    let mut result = SamplingParam {
        wrapped: value,
        ..SamplingParam::default()
    };

    let extent_is_small = extent <= KINDA_SMALL_NUMBER;
    if !extent_is_small && can_wrap {
        if value < 0.0 {
            let cycles = (-value / extent).ceil();
            result.wrapped = value + cycles * extent;
            result.num_cycles = cycles as u32;
        } else {
            let cycles = (value / extent).floor();
            result.wrapped = value - cycles * extent;
            result.num_cycles = cycles as u32;
        }
        // absorb float error at the cycle boundaries
        if result.wrapped >= extent {
            result.wrapped -= extent;
            result.num_cycles += 1;
        }
        if result.wrapped < 0.0 {
            result.wrapped = 0.0;
        }
    }

    let clamped = result.wrapped.clamp(0.0, extent.max(0.0));
    if clamped != result.wrapped {
        result.extrapolation = result.wrapped - clamped;
        result.wrapped = clamped;
        result.clamped = true;
    }
    result
}

/// Clip, clip-local time and accumulated motion for one resolved offset.
#[derive(Clone, Copy, Debug)]
pub struct SampleInfo<'a> {
    pub clip: &'a SequenceSampler,
    /// Clip-local time; outside `[0, play_length]` only when clamped.
    pub clip_time: f32,
    /// Root motion accumulated since the chain origin.
    pub root_transform: Transform,
    pub root_distance: f32,
    pub clamped: bool,
}

/// A main clip with optional neighbours that absorb out-of-range offsets.
#[derive(Clone, Copy, Debug)]
pub struct ClipChain<'a> {
    pub main: &'a SequenceSampler,
    pub lead_in: Option<&'a SequenceSampler>,
    pub follow_up: Option<&'a SequenceSampler>,
}

fn can_wrap_distance(sampler: &SequenceSampler) -> bool {
    sampler.is_loopable() && sampler.total_root_distance() > SMALL_ROOT_DISTANCE
}

impl<'a> ClipChain<'a> {
    pub fn new(main: &'a SequenceSampler) -> Self {
        Self {
            main,
            lead_in: None,
            follow_up: None,
        }
    }

    pub fn with_lead_in(mut self, lead_in: Option<&'a SequenceSampler>) -> Self {
        self.lead_in = lead_in;
        self
    }

    pub fn with_follow_up(mut self, follow_up: Option<&'a SequenceSampler>) -> Self {
        self.follow_up = follow_up;
        self
    }

    /// Resolve `sample_time`, measured on the main clip's timeline.
    pub fn get_sample_info(&self, sample_time: f32) -> SampleInfo<'a> {
        let main = self.main;
        let main_length = main.play_length();
        let main_can_wrap = main.is_loopable();

        // (clip, param, initial motion, initial distance, per-cycle motion, per-cycle distance)
        let mut resolved = None;
        if !main_can_wrap {
            if let (Some(lead), true) = (self.lead_in, sample_time < 0.0) {
                let param = wrap_or_clamp_sampling_param(
                    lead.is_loopable(),
                    lead.play_length(),
                    sample_time + lead.play_length(),
                );
                let (initial, initial_distance) = if param.extrapolation < 0.0 {
                    (lead.total_root_transform().inverse(), -lead.total_root_distance())
                } else {
                    (Transform::identity(), 0.0)
                };
                resolved = Some((
                    lead,
                    param,
                    initial,
                    initial_distance,
                    *lead.total_root_transform(),
                    lead.total_root_distance(),
                ));
            } else if let (Some(follow), true) = (self.follow_up, sample_time > main_length) {
                let param = wrap_or_clamp_sampling_param(
                    follow.is_loopable(),
                    follow.play_length(),
                    sample_time - main_length,
                );
                resolved = Some((
                    follow,
                    param,
                    *main.total_root_transform(),
                    main.total_root_distance(),
                    *follow.total_root_transform(),
                    follow.total_root_distance(),
                ));
            }
        }

        let (clip, param, initial, initial_distance, last, last_distance) =
            resolved.unwrap_or_else(|| {
                let relative_time = if sample_time < 0.0 && main_can_wrap {
                    sample_time + main_length
                } else {
                    sample_time
                };
                (
                    main,
                    wrap_or_clamp_sampling_param(main_can_wrap, main_length, relative_time),
                    Transform::identity(),
                    0.0,
                    *main.total_root_transform(),
                    main.total_root_distance(),
                )
            });

        if param.extrapolation.abs() > SMALL_NUMBER {
            let clip_time = param.wrapped + param.extrapolation;
            let clip_root = clip.extract_root_transform(clip_time);
            let clip_distance = clip.extract_root_distance(clip_time);
            return SampleInfo {
                clip,
                clip_time,
                root_transform: compose(&clip_root, &initial),
                root_distance: initial_distance + clip_distance,
                clamped: true,
            };
        }

        let clip_time = param.wrapped;
        let backwards = sample_time < 0.0;

        let (per_cycle, per_cycle_distance) = if backwards {
            (last.inverse(), -last_distance)
        } else {
            (last, last_distance)
        };

        let mut remainder = clip.extract_root_transform(clip_time);
        let mut remainder_distance = clip.extract_root_distance(clip_time);
        if backwards {
            remainder = relative_to(&remainder, &last);
            remainder_distance = -(last_distance - remainder_distance);
        }

        let mut root_transform = initial;
        let mut root_distance = initial_distance;
        for _ in 0..param.num_cycles {
            root_transform = compose(&per_cycle, &root_transform);
            root_distance += per_cycle_distance;
        }
        root_transform = compose(&remainder, &root_transform);
        root_distance += remainder_distance;

        SampleInfo {
            clip,
            clip_time,
            root_transform,
            root_distance,
            clamped: false,
        }
    }

    /// [`Self::get_sample_info`] re-expressed relative to `origin`.
    pub fn get_sample_info_relative(
        &self,
        sample_time: f32,
        origin: &SampleInfo<'_>,
    ) -> SampleInfo<'a> {
        let mut sample = self.get_sample_info(sample_time);
        sample.root_transform = relative_to(&sample.root_transform, &origin.root_transform);
        sample.root_distance -= origin.root_distance;
        sample
    }

    /// Main-timeline time at which the root has travelled `sample_distance`
    /// from the main clip start.
    pub fn get_sample_time_from_distance(&self, sample_distance: f32) -> f32 {
        let main = self.main;
        let main_total = main.total_root_distance();
        let main_can_wrap = can_wrap_distance(main);

        if !main_can_wrap {
            if let (Some(lead), true) = (self.lead_in, sample_distance < 0.0) {
                let param = wrap_or_clamp_sampling_param(
                    can_wrap_distance(lead),
                    lead.total_root_distance(),
                    sample_distance + lead.total_root_distance(),
                );
                let clip_time =
                    lead.get_time_from_root_distance(param.wrapped + param.extrapolation);
                let length = lead.play_length();
                return -(param.num_cycles as f32 * length + (length - clip_time));
            }
            if let (Some(follow), true) = (self.follow_up, sample_distance > main_total) {
                let param = wrap_or_clamp_sampling_param(
                    can_wrap_distance(follow),
                    follow.total_root_distance(),
                    sample_distance - main_total,
                );
                let clip_time =
                    follow.get_time_from_root_distance(param.wrapped + param.extrapolation);
                return main.play_length()
                    + param.num_cycles as f32 * follow.play_length()
                    + clip_time;
            }
        }

        let relative_distance = if sample_distance < 0.0 && main_can_wrap {
            sample_distance + main_total
        } else {
            sample_distance
        };
        let param = wrap_or_clamp_sampling_param(main_can_wrap, main_total, relative_distance);
        let clip_time = main.get_time_from_root_distance(param.wrapped + param.extrapolation);
        let length = main.play_length();
        if !main_can_wrap {
            clip_time
        } else if sample_distance < 0.0 {
            -(param.num_cycles as f32 * length + (length - clip_time))
        } else {
            param.num_cycles as f32 * length + clip_time
        }
    }
}
