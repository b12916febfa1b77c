//! Rigid transform helpers shared by history, sampling and indexing.
//!
//! Conventions:
//! - `Transform` is a rigid isometry (no scale).
//! - `compose(child, parent)` applies `child` first, then `parent`.
//! - `relative_to(t, origin)` re-expresses `t` in `origin`'s frame so that
//!   `compose(relative_to(t, o), o) == t`.
//! - Quaternion arrays are `[x, y, z, w]`.

use nalgebra::{Isometry3, Matrix3, Quaternion, Rotation3, Translation3, UnitQuaternion, Vector3};
use serde::{Deserialize, Serialize};

pub type Transform = Isometry3<f32>;

/// Axis a mirrored pose is reflected across (the axis whose sign flips).
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum MirrorAxis {
    X,
    Y,
    Z,
}

#[inline]
pub fn transform_from_parts(translation: [f32; 3], rotation: [f32; 4]) -> Transform {
    let q = Quaternion::new(rotation[3], rotation[0], rotation[1], rotation[2]);
    let rotation = if q.norm_squared() <= f32::EPSILON {
        UnitQuaternion::identity()
    } else {
        UnitQuaternion::from_quaternion(q)
    };
    Isometry3::from_parts(
        Translation3::new(translation[0], translation[1], translation[2]),
        rotation,
    )
}

#[inline]
pub fn compose(child: &Transform, parent: &Transform) -> Transform {
    parent * child
}

#[inline]
pub fn relative_to(t: &Transform, origin: &Transform) -> Transform {
    origin.inverse() * t
}

#[inline]
fn dot4(a: &Quaternion<f32>, b: &Quaternion<f32>) -> f32 {
    a.coords.dot(&b.coords)
}

/// Quaternion NLERP with shortest-arc correction.
pub fn nlerp(a: &UnitQuaternion<f32>, b: &UnitQuaternion<f32>, t: f32) -> UnitQuaternion<f32> {
    let qa = a.quaternion();
    let mut qb = *b.quaternion();
    if dot4(qa, &qb) < 0.0 {
        qb = -qb;
    }
    let coords = qa.coords + (qb.coords - qa.coords) * t;
    let q = Quaternion::from(coords);
    if q.norm_squared() <= f32::EPSILON {
        *a
    } else {
        UnitQuaternion::from_quaternion(q)
    }
}

/// Blend two transforms: translation lerp, rotation shortest-arc NLERP.
pub fn blend(a: &Transform, b: &Transform, alpha: f32) -> Transform {
    let translation = a.translation.vector.lerp(&b.translation.vector, alpha);
    Isometry3::from_parts(
        Translation3::from(translation),
        nlerp(&a.rotation, &b.rotation, alpha),
    )
}

/// Scale a motion delta by `factor` (negative factors run it backwards).
pub fn scale_motion(delta: &Transform, factor: f32) -> Transform {
    if factor < 0.0 {
        return scale_motion(&delta.inverse(), -factor);
    }
    let rotation = delta.rotation.powf(factor);
    Isometry3::from_parts(Translation3::from(delta.translation.vector * factor), rotation)
}

pub fn mirror_transform(t: &Transform, axis: MirrorAxis) -> Transform {
    let mut translation = t.translation.vector;
    let q = t.rotation.quaternion();
    let (mut i, mut j, mut k) = (q.i, q.j, q.k);
    match axis {
        MirrorAxis::X => {
            translation.x = -translation.x;
            j = -j;
            k = -k;
        }
        MirrorAxis::Y => {
            translation.y = -translation.y;
            i = -i;
            k = -k;
        }
        MirrorAxis::Z => {
            translation.z = -translation.z;
            i = -i;
            j = -j;
        }
    }
    Isometry3::from_parts(
        Translation3::from(translation),
        UnitQuaternion::from_quaternion(Quaternion::new(q.w, i, j, k)),
    )
}

/// Body X and Y axes of a rotation; together they encode it without sign ambiguity.
#[inline]
pub fn rotation_axes(rotation: &UnitQuaternion<f32>) -> (Vector3<f32>, Vector3<f32>) {
    (
        rotation * Vector3::x_axis().into_inner(),
        rotation * Vector3::y_axis().into_inner(),
    )
}

/// Rebuild a rotation from its body X and Y axes, re-orthonormalizing first.
pub fn rotation_from_axes(x: &Vector3<f32>, y: &Vector3<f32>) -> UnitQuaternion<f32> {
    let Some(x) = x.try_normalize(f32::EPSILON) else {
        return UnitQuaternion::identity();
    };
    let y = y - x * x.dot(y);
    let Some(y) = y.try_normalize(f32::EPSILON) else {
        return UnitQuaternion::identity();
    };
    let z = x.cross(&y);
    let m = Matrix3::from_columns(&[x, y, z]);
    UnitQuaternion::from_rotation_matrix(&Rotation3::from_matrix_unchecked(m))
}

/// Angular velocity from two orientations one `dt` apart.
///
/// Uses `w = 2 * dq/dt * q0^-1` with `q1` flipped onto `q0`'s hemisphere.
pub fn angular_velocity(
    prev: &UnitQuaternion<f32>,
    next: &UnitQuaternion<f32>,
    dt: f32,
) -> Vector3<f32> {
    if dt <= 0.0 {
        return Vector3::zeros();
    }
    let q0 = *prev.quaternion();
    let mut q1 = *next.quaternion();
    if dot4(&q0, &q1) < 0.0 {
        q1 = -q1;
    }
    let dq_dt = Quaternion::from((q1.coords - q0.coords) / dt);
    let w = dq_dt * prev.inverse().into_inner() * 2.0;
    Vector3::new(w.i, w.j, w.k)
}

pub fn linear_velocity(prev: &Transform, next: &Transform, dt: f32) -> Vector3<f32> {
    if dt <= 0.0 {
        return Vector3::zeros();
    }
    (next.translation.vector - prev.translation.vector) / dt
}
