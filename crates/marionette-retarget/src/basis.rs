//! Coordinate basis conversion between tracking space and robot space
//!
//! A 3x3 basis matrix `B` maps tracking-space directions into the robot's
//! base frame. Rotations convert by conjugation `B * R * B^-1`; on
//! quaternion components that is `(det(B) * B * q.xyz, q.w)`, which stays
//! valid for axis permutations with reflection (det = -1), the case needed
//! to fix left/right mirroring between ecosystems.

use glam::{Mat3, Quat, Vec3};

#[derive(Debug, Clone, Copy)]
pub struct BasisTransform {
    matrix: Mat3,
    inverse: Mat3,
    det_sign: f32,
    pub position_scale: f32,
}

impl Default for BasisTransform {
    fn default() -> Self {
        Self::new(Mat3::IDENTITY, 1.0)
    }
}

impl BasisTransform {
    pub fn new(matrix: Mat3, position_scale: f32) -> Self {
        let det = matrix.determinant();
        Self {
            matrix,
            inverse: matrix.inverse(),
            det_sign: if det < 0.0 { -1.0 } else { 1.0 },
            position_scale,
        }
    }

    /// Unity-style tracking frame (X right, Y up, Z forward, left-handed)
    /// into ROS-style robot frame (X forward, Y left, Z up, right-handed).
    pub fn unity_to_ros() -> Self {
        // robot_x = tracking_z, robot_y = -tracking_x, robot_z = tracking_y
        Self::new(
            Mat3::from_cols(
                Vec3::new(0.0, -1.0, 0.0),
                Vec3::new(0.0, 0.0, 1.0),
                Vec3::new(1.0, 0.0, 0.0),
            ),
            1.0,
        )
    }

    /// Resolve a named preset from configuration.
    pub fn from_preset(name: &str) -> Option<Self> {
        match name {
            "identity" => Some(Self::default()),
            "unity_to_ros" => Some(Self::unity_to_ros()),
            _ => None,
        }
    }

    pub fn matrix(&self) -> Mat3 {
        self.matrix
    }

    pub fn rotation_to_robot(&self, q: Quat) -> Quat {
        self.map_rotation(q, self.matrix)
    }

    pub fn rotation_to_tracking(&self, q: Quat) -> Quat {
        self.map_rotation(q, self.inverse)
    }

    pub fn position_to_robot(&self, p: Vec3) -> Vec3 {
        self.matrix * p * self.position_scale
    }

    fn map_rotation(&self, q: Quat, m: Mat3) -> Quat {
        let v = m * Vec3::new(q.x, q.y, q.z) * self.det_sign;
        Quat::from_xyzw(v.x, v.y, v.z, q.w).normalize()
    }
}
