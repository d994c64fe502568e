//! Twist decomposition
//!
//! Splits a local rotation into its component around a chosen axis (twist)
//! and the remainder (swing). Preferred over Euler extraction for all
//! rotational joints: it stays numerically stable under noisy tracking
//! input and degenerates gracefully to zero for pure-swing rotations.

use glam::{Quat, Vec3};

/// Wrap an angle to [-pi, pi].
pub fn wrap_angle(mut angle: f32) -> f32 {
    use std::f32::consts::PI;
    while angle > PI {
        angle -= 2.0 * PI;
    }
    while angle < -PI {
        angle += 2.0 * PI;
    }
    angle
}

/// Signed twist angle of `q` around `axis`, in [-pi, pi].
///
/// The twist quaternion is `normalize(axis * (q.xyz . axis), q.w)`; its
/// angle is `2 * atan2(|xyz|, w)`, sign-corrected by the projection onto
/// the axis.
pub fn twist_angle(q: Quat, axis: Vec3) -> f32 {
    let len_sq = axis.length_squared();
    if len_sq < 1e-10 {
        return 0.0;
    }
    let axis = axis / len_sq.sqrt();

    let v = Vec3::new(q.x, q.y, q.z);
    let proj = axis * v.dot(axis);

    let norm = (proj.length_squared() + q.w * q.w).sqrt();
    if norm < 1e-10 {
        // w = 0 and no component around the axis: pure 180-degree swing
        return 0.0;
    }
    let twist_v = proj / norm;
    let twist_w = q.w / norm;

    let mut angle = 2.0 * twist_v.length().atan2(twist_w);
    if twist_v.dot(axis) < 0.0 {
        angle = -angle;
    }
    wrap_angle(angle)
}

/// The rotation carrying just the twist of `q` around `axis`.
pub fn twist_rotation(q: Quat, axis: Vec3) -> Quat {
    Quat::from_axis_angle(axis.normalize_or_zero(), twist_angle(q, axis))
}

/// Remove a known twist rotation from `q`, leaving the remainder used for
/// second-stage extraction on coupled joints.
pub fn remove_rotation(q: Quat, removed: Quat) -> Quat {
    (removed.conjugate() * q).normalize()
}
