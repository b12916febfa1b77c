//! Skeleton and clip collaborators, plus serde-backed reference implementations.
//!
//! The engine never plays animation itself. It asks an [`AnimationClip`] for
//! root motion and local poses, and a [`Skeleton`] for bone names and the
//! local to component-space conversion.

use serde::{Deserialize, Serialize};

use crate::error::PoseSearchError;
use crate::math::{blend, compose, relative_to, transform_from_parts, Transform};
use crate::Result;

pub trait Skeleton: Send + Sync {
    fn num_bones(&self) -> usize;

    fn bone_name(&self, bone: usize) -> Option<&str>;

    /// Parent bone; always an index lower than `bone`.
    fn parent(&self, bone: usize) -> Option<usize>;

    /// Local reference pose, one transform per bone.
    fn ref_pose(&self) -> &[Transform];

    fn find_bone(&self, name: &str) -> Option<usize> {
        (0..self.num_bones()).find(|&i| self.bone_name(i) == Some(name))
    }

    /// Bone whose pose is reflected onto `bone` when mirroring.
    fn mirror_bone(&self, bone: usize) -> usize {
        bone
    }

    /// Accumulate local transforms down the hierarchy into component space.
    fn fill_component_space(&self, local: &[Transform], out: &mut Vec<Transform>) {
        out.clear();
        out.reserve(local.len());
        for (bone, transform) in local.iter().enumerate() {
            let component = match self.parent(bone) {
                Some(parent) if parent < bone => compose(transform, &out[parent]),
                _ => *transform,
            };
            out.push(component);
        }
    }

    /// Add every ancestor of `bones`, leaving the list sorted and unique.
    fn ensure_parents_present(&self, bones: &mut Vec<usize>) {
        let mut i = 0;
        while i < bones.len() {
            if let Some(parent) = self.parent(bones[i]) {
                if !bones.contains(&parent) {
                    bones.push(parent);
                }
            }
            i += 1;
        }
        bones.sort_unstable();
        bones.dedup();
    }
}

pub trait AnimationClip: Send + Sync {
    fn name(&self) -> &str;

    fn play_length(&self) -> f32;

    fn is_loopable(&self) -> bool;

    /// Root motion accumulated from `start` to `start + delta`, expressed in the
    /// root frame at `start`. Never wraps; both ends clamp to the clip.
    fn extract_root_motion(&self, start: f32, delta: f32) -> Transform;

    /// Local bone transforms at `time`, one per skeleton bone.
    fn extract_pose(&self, time: f32, out: &mut Vec<Transform>);
}

fn identity_rotation() -> [f32; 4] {
    [0.0, 0.0, 0.0, 1.0]
}

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct BoneDef {
    pub name: String,
    #[serde(default)]
    pub parent: Option<usize>,
    #[serde(default)]
    pub translation: [f32; 3],
    #[serde(default = "identity_rotation")]
    pub rotation: [f32; 4],
    #[serde(default)]
    pub mirror: Option<usize>,
}

#[derive(Clone, Debug, Deserialize)]
struct SkeletonDesc {
    bones: Vec<BoneDef>,
}

/// Skeleton described by bone names, parents and a reference pose.
#[derive(Clone, Debug, Deserialize)]
#[serde(try_from = "SkeletonDesc")]
pub struct SkeletonDef {
    bones: Vec<BoneDef>,
    ref_pose: Vec<Transform>,
}

impl TryFrom<SkeletonDesc> for SkeletonDef {
    type Error = PoseSearchError;

    fn try_from(desc: SkeletonDesc) -> Result<Self> {
        SkeletonDef::new(desc.bones)
    }
}

impl SkeletonDef {
    pub fn new(bones: Vec<BoneDef>) -> Result<Self> {
        for (idx, bone) in bones.iter().enumerate() {
            if let Some(parent) = bone.parent {
                if parent >= idx {
                    return Err(PoseSearchError::InvalidConfig {
                        reason: format!(
                            "bone '{}' must come after its parent {parent}",
                            bone.name
                        ),
                    });
                }
            }
            if let Some(mirror) = bone.mirror {
                if mirror >= bones.len() {
                    return Err(PoseSearchError::InvalidConfig {
                        reason: format!("bone '{}' mirrors unknown bone {mirror}", bone.name),
                    });
                }
            }
        }
        let ref_pose = bones
            .iter()
            .map(|b| transform_from_parts(b.translation, b.rotation))
            .collect();
        Ok(Self { bones, ref_pose })
    }

    /// Chain of `names`, each parented to the previous one, all at identity.
    pub fn chain(names: &[&str]) -> Self {
        let bones: Vec<BoneDef> = names
            .iter()
            .enumerate()
            .map(|(i, name)| BoneDef {
                name: (*name).to_string(),
                parent: i.checked_sub(1),
                translation: [0.0; 3],
                rotation: identity_rotation(),
                mirror: None,
            })
            .collect();
        let ref_pose = vec![Transform::identity(); bones.len()];
        Self { bones, ref_pose }
    }

    pub fn from_json_str(json: &str) -> Result<Self> {
        serde_json::from_str(json).map_err(|e| PoseSearchError::InvalidConfig {
            reason: e.to_string(),
        })
    }

    pub fn bones(&self) -> &[BoneDef] {
        &self.bones
    }
}

impl Skeleton for SkeletonDef {
    fn num_bones(&self) -> usize {
        self.bones.len()
    }

    fn bone_name(&self, bone: usize) -> Option<&str> {
        self.bones.get(bone).map(|b| b.name.as_str())
    }

    fn parent(&self, bone: usize) -> Option<usize> {
        self.bones.get(bone).and_then(|b| b.parent)
    }

    fn ref_pose(&self) -> &[Transform] {
        &self.ref_pose
    }

    fn mirror_bone(&self, bone: usize) -> usize {
        self.bones.get(bone).and_then(|b| b.mirror).unwrap_or(bone)
    }
}

/// One key of a transform track.
#[derive(Clone, Copy, Debug, PartialEq, Serialize, Deserialize)]
pub struct TransformKey {
    pub time: f32,
    #[serde(default)]
    pub translation: [f32; 3],
    #[serde(default = "identity_rotation")]
    pub rotation: [f32; 4],
}

impl TransformKey {
    pub fn new(time: f32, translation: [f32; 3], rotation: [f32; 4]) -> Self {
        Self {
            time,
            translation,
            rotation,
        }
    }

    pub fn at(time: f32, translation: [f32; 3]) -> Self {
        Self::new(time, translation, identity_rotation())
    }
}

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct BoneTrack {
    pub bone: usize,
    pub keys: Vec<TransformKey>,
}

/// Sample a key track, clamping outside its key range.
fn sample_keys(keys: &[TransformKey], time: f32) -> Transform {
    let Some(first) = keys.first() else {
        return Transform::identity();
    };
    let next = keys.partition_point(|k| k.time <= time);
    if next == 0 {
        return transform_from_parts(first.translation, first.rotation);
    }
    let prev = &keys[next - 1];
    let Some(next) = keys.get(next) else {
        return transform_from_parts(prev.translation, prev.rotation);
    };
    let span = next.time - prev.time;
    let alpha = if span > f32::EPSILON {
        (time - prev.time) / span
    } else {
        0.0
    };
    blend(
        &transform_from_parts(prev.translation, prev.rotation),
        &transform_from_parts(next.translation, next.rotation),
        alpha,
    )
}

/// Clip made of keyed root and bone transforms, linearly interpolated.
///
/// Bones without a track hold the identity; the root track is sampled in clip
/// space and root motion is the delta between two samples of it.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct KeyframedClip {
    pub name: String,
    pub play_length: f32,
    #[serde(default)]
    pub looping: bool,
    pub num_bones: usize,
    #[serde(default)]
    pub root: Vec<TransformKey>,
    #[serde(default)]
    pub tracks: Vec<BoneTrack>,
}

impl KeyframedClip {
    pub fn new(name: impl Into<String>, play_length: f32, num_bones: usize) -> Self {
        Self {
            name: name.into(),
            play_length,
            looping: false,
            num_bones,
            root: Vec::new(),
            tracks: Vec::new(),
        }
    }

    pub fn looping(mut self, looping: bool) -> Self {
        self.looping = looping;
        self
    }

    pub fn with_root_key(mut self, key: TransformKey) -> Self {
        let at = self.root.partition_point(|k| k.time <= key.time);
        self.root.insert(at, key);
        self
    }

    pub fn with_bone_key(mut self, bone: usize, key: TransformKey) -> Self {
        match self.tracks.iter_mut().find(|t| t.bone == bone) {
            Some(track) => {
                let at = track.keys.partition_point(|k| k.time <= key.time);
                track.keys.insert(at, key);
            }
            None => self.tracks.push(BoneTrack {
                bone,
                keys: vec![key],
            }),
        }
        self
    }

    /// Root moving at constant `velocity` units per second over `play_length`.
    pub fn linear_root_motion(
        name: impl Into<String>,
        play_length: f32,
        num_bones: usize,
        velocity: [f32; 3],
    ) -> Self {
        let end = velocity.map(|v| v * play_length);
        Self::new(name, play_length, num_bones)
            .with_root_key(TransformKey::at(0.0, [0.0; 3]))
            .with_root_key(TransformKey::at(play_length, end))
    }

    pub fn from_json_str(json: &str) -> Result<Self> {
        serde_json::from_str(json).map_err(|e| PoseSearchError::InvalidConfig {
            reason: e.to_string(),
        })
    }

    fn root_at(&self, time: f32) -> Transform {
        sample_keys(&self.root, time.clamp(0.0, self.play_length))
    }
}

impl AnimationClip for KeyframedClip {
    fn name(&self) -> &str {
        &self.name
    }

    fn play_length(&self) -> f32 {
        self.play_length
    }

    fn is_loopable(&self) -> bool {
        self.looping
    }

    fn extract_root_motion(&self, start: f32, delta: f32) -> Transform {
        relative_to(&self.root_at(start + delta), &self.root_at(start))
    }

    fn extract_pose(&self, time: f32, out: &mut Vec<Transform>) {
        let time = time.clamp(0.0, self.play_length);
        out.clear();
        out.resize(self.num_bones, Transform::identity());
        for track in &self.tracks {
            if let Some(slot) = out.get_mut(track.bone) {
                *slot = sample_keys(&track.keys, time);
            }
        }
    }
}
