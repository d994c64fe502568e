//! Forward kinematics
//!
//! Walks the joint tree from the root link and produces per-link world
//! transforms from the current joint positions. Children are visited in
//! parse order, so repeated evaluation of the same state is bit-stable.

use glam::{EulerRot, Mat3, Mat4, Quat, Vec3};
use std::collections::HashMap;
use tracing::warn;

use crate::robot::{JointKind, RobotModel};
use crate::urdf::UrdfError;

/// Global pose applied at the kinematic root only: uniform scale plus the
/// upright rotation aligning the model's native convention with the
/// consumer's. Never re-applied at inner nodes.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct RootFrame {
    pub scale: f32,
    pub upright: Quat,
}

impl Default for RootFrame {
    fn default() -> Self {
        Self { scale: 1.0, upright: Quat::IDENTITY }
    }
}

/// Evaluate world transforms for every link reachable from the root.
pub fn evaluate(model: &RobotModel, root: &RootFrame) -> Result<HashMap<String, Mat4>, UrdfError> {
    let root_link = model.require_root()?;
    let mut out = HashMap::with_capacity(model.links().len());
    let base = Mat4::from_quat(root.upright) * Mat4::from_scale(Vec3::splat(root.scale));
    out.insert(root_link.to_string(), base);
    walk(model, root_link, base, &mut out);
    Ok(out)
}

fn walk(model: &RobotModel, link: &str, parent: Mat4, out: &mut HashMap<String, Mat4>) {
    for joint in model.child_joints(link) {
        let mut transform = parent * Mat4::from_translation(joint.origin_xyz);

        let rpy = joint.origin_rpy;
        if rpy.length_squared() > 0.0 {
            let origin_rot = Quat::from_euler(EulerRot::ZYX, rpy.z, rpy.y, rpy.x);
            transform *= Mat4::from_quat(origin_rot);
        }

        if joint.is_movable() {
            match joint.kind {
                JointKind::Revolute | JointKind::Continuous => {
                    transform *= Mat4::from_axis_angle(joint.axis, joint.position);
                }
                JointKind::Prismatic => {
                    transform *= Mat4::from_translation(joint.axis * joint.position);
                }
                JointKind::Fixed => {}
            }
        }

        out.insert(joint.child_link.clone(), transform);
        walk(model, &joint.child_link, transform, out);
    }
}

/// Rotation aligning one (up, forward) convention with another.
///
/// Both pairs are orthonormalized (forward kept, up projected). Degenerate
/// input (zero or parallel vectors) yields identity with a diagnostic. The
/// result belongs at the kinematic root and nowhere else.
pub fn upright_rotation(src_up: Vec3, src_fwd: Vec3, dst_up: Vec3, dst_fwd: Vec3) -> Quat {
    let (Some(src), Some(dst)) = (frame_of(src_up, src_fwd), frame_of(dst_up, dst_fwd)) else {
        warn!("Degenerate up/forward pair, upright rotation is identity");
        return Quat::IDENTITY;
    };
    Quat::from_mat3(&(dst * src.transpose())).normalize()
}

fn frame_of(up: Vec3, fwd: Vec3) -> Option<Mat3> {
    if fwd.length_squared() < 1e-8 || up.length_squared() < 1e-8 {
        return None;
    }
    let fwd = fwd.normalize();
    let up = up - fwd * up.dot(fwd);
    if up.length_squared() < 1e-8 {
        return None;
    }
    let up = up.normalize();
    let side = up.cross(fwd);
    Some(Mat3::from_cols(side, up, fwd))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::robot::RobotModel;
    use std::f32::consts::FRAC_PI_2;
    use std::path::Path;

    fn chain_xml() -> &'static str {
        r#"<robot name="chain">
    <link name="base"/>
    <link name="mid"/>
    <link name="tip"/>
    <joint name="swivel" type="revolute">
        <parent link="base"/>
        <child link="mid"/>
        <origin xyz="0 0 1"/>
        <axis xyz="0 0 1"/>
        <limit lower="-3.14" upper="3.14"/>
    </joint>
    <joint name="slide" type="prismatic">
        <parent link="mid"/>
        <child link="tip"/>
        <axis xyz="1 0 0"/>
        <limit lower="0" upper="1"/>
    </joint>
</robot>"#
    }

    fn assert_vec3_close(a: Vec3, b: Vec3) {
        assert!((a - b).length() < 1e-5, "{a:?} != {b:?}");
    }

    #[test]
    fn test_evaluation_is_bit_stable() {
        let mut model = RobotModel::parse_str(chain_xml(), Path::new(".")).unwrap();
        model.set_joint_position("swivel", 0.7).unwrap();
        model.set_joint_position("slide", 0.3).unwrap();

        let a = evaluate(&model, &RootFrame::default()).unwrap();
        let b = evaluate(&model, &RootFrame::default()).unwrap();
        assert_eq!(a.len(), b.len());
        for (name, ta) in &a {
            let tb = &b[name];
            let bits_a: Vec<u32> = ta.to_cols_array().iter().map(|f| f.to_bits()).collect();
            let bits_b: Vec<u32> = tb.to_cols_array().iter().map(|f| f.to_bits()).collect();
            assert_eq!(bits_a, bits_b, "link {name} not bit-stable");
        }
    }

    #[test]
    fn test_revolute_and_prismatic_motion() {
        let mut model = RobotModel::parse_str(chain_xml(), Path::new(".")).unwrap();
        model.set_joint_position("swivel", FRAC_PI_2).unwrap();
        model.set_joint_position("slide", 0.5).unwrap();

        let transforms = evaluate(&model, &RootFrame::default()).unwrap();

        // mid: translated to z=1 then rotated 90 deg around Z
        let mid = transforms["mid"];
        assert_vec3_close(mid.transform_point3(Vec3::X), Vec3::new(0.0, 1.0, 1.0));

        // tip: slides 0.5 along the rotated local X, i.e. world +Y
        let tip = transforms["tip"];
        assert_vec3_close(tip.transform_point3(Vec3::ZERO), Vec3::new(0.0, 0.5, 1.0));
    }

    #[test]
    fn test_fixed_joint_contributes_origin_only() {
        let xml = r#"<robot name="r">
    <link name="a"/>
    <link name="b"/>
    <joint name="j" type="fixed">
        <parent link="a"/>
        <child link="b"/>
        <origin xyz="0 2 0"/>
    </joint>
</robot>"#;
        let model = RobotModel::parse_str(xml, Path::new(".")).unwrap();
        let transforms = evaluate(&model, &RootFrame::default()).unwrap();
        assert_vec3_close(
            transforms["b"].transform_point3(Vec3::ZERO),
            Vec3::new(0.0, 2.0, 0.0),
        );
    }

    #[test]
    fn test_upright_applied_once_at_root() {
        let mut model = RobotModel::parse_str(chain_xml(), Path::new(".")).unwrap();
        model.set_joint_position("swivel", 0.4).unwrap();

        let upright = Quat::from_rotation_x(FRAC_PI_2);
        let plain = evaluate(&model, &RootFrame::default()).unwrap();
        let rotated = evaluate(&model, &RootFrame { scale: 1.0, upright }).unwrap();

        // Rotating the root must premultiply every link by the same
        // rotation exactly once.
        let u = Mat4::from_quat(upright);
        for (name, t) in &plain {
            let expected = u * *t;
            let got = rotated[name];
            for (a, b) in expected.to_cols_array().iter().zip(got.to_cols_array().iter()) {
                assert!((a - b).abs() < 1e-5, "link {name} mismatch");
            }
        }
    }

    #[test]
    fn test_missing_root_is_error() {
        let xml = r#"<robot name="loop">
    <link name="a"/>
    <link name="b"/>
    <joint name="ab" type="fixed"><parent link="a"/><child link="b"/></joint>
    <joint name="ba" type="fixed"><parent link="b"/><child link="a"/></joint>
</robot>"#;
        let model = RobotModel::parse_str(xml, Path::new(".")).unwrap();
        assert!(evaluate(&model, &RootFrame::default()).is_err());
    }

    #[test]
    fn test_upright_rotation_maps_conventions() {
        // Y-up Z-forward (tracking style) to Z-up X-forward (robot style)
        let r = upright_rotation(Vec3::Y, Vec3::Z, Vec3::Z, Vec3::X);
        assert_vec3_close(r * Vec3::Y, Vec3::Z);
        assert_vec3_close(r * Vec3::Z, Vec3::X);

        // Degenerate input collapses to identity
        assert_eq!(upright_rotation(Vec3::Z, Vec3::Z, Vec3::Z, Vec3::X), Quat::IDENTITY);
    }
}
