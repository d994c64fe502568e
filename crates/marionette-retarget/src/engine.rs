//! Retargeting engine
//!
//! Converts tracked bone orientations into per-joint angles: basis
//! conversion into the robot frame, chain-relative local rotations,
//! twist extraction around each joint's configured axis, calibration
//! offsets and hard limit clamps. Output goes both into the robot model's
//! joint state (for visualization) and into a joint command frame (for the
//! control link); both carry the same clamped values.

use glam::{Quat, Vec3};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use tracing::trace;

use marionette_core::robot::RobotModel;
use marionette_core::tracking::TrackingSnapshot;

use crate::basis::BasisTransform;
use crate::twist::{remove_rotation, twist_angle};

/// Joint name -> target angle, produced fresh each control tick.
pub type JointFrame = HashMap<String, f32>;

/// Torso bones tried in order as the chain parent.
const CHEST_FALLBACK: [&str; 3] = ["Chest", "Spine", "Hips"];

/// Per-side arm conventions. The axis and sign choices were tuned
/// empirically in earlier revisions of this pipeline; treat them as
/// calibration, not physical truth.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ArmConventions {
    pub upper_bone: String,
    pub lower_bone: String,
    pub pitch_joint: String,
    pub roll_joint: String,
    pub elbow_joint: String,
    pub pitch_axis: Vec3,
    pub roll_axis: Vec3,
    pub elbow_axis: Vec3,
    /// Sign applied to the folded |elbow angle| (-1.0 folds left arms)
    pub elbow_fold_sign: f32,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct HeadConventions {
    pub pan_joint: String,
    pub tilt_joint: String,
    pub pan_axis: Vec3,
    pub tilt_axis: Vec3,
}

/// All per-limb axis/joint-name conventions, overridable from
/// configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LimbConventions {
    pub head: HeadConventions,
    pub arms: Vec<ArmConventions>,
}

impl Default for LimbConventions {
    fn default() -> Self {
        Self {
            head: HeadConventions {
                pan_joint: "head_pan".to_string(),
                tilt_joint: "head_tilt".to_string(),
                pan_axis: Vec3::Y,
                tilt_axis: Vec3::X,
            },
            arms: vec![
                ArmConventions {
                    upper_bone: "LeftUpperArm".to_string(),
                    lower_bone: "LeftLowerArm".to_string(),
                    pitch_joint: "l_sho_pitch".to_string(),
                    roll_joint: "l_sho_roll".to_string(),
                    elbow_joint: "l_el".to_string(),
                    pitch_axis: Vec3::X,
                    roll_axis: Vec3::Z,
                    elbow_axis: Vec3::Z,
                    elbow_fold_sign: -1.0,
                },
                ArmConventions {
                    upper_bone: "RightUpperArm".to_string(),
                    lower_bone: "RightLowerArm".to_string(),
                    pitch_joint: "r_sho_pitch".to_string(),
                    roll_joint: "r_sho_roll".to_string(),
                    elbow_joint: "r_el".to_string(),
                    pitch_axis: Vec3::X,
                    roll_axis: Vec3::Z,
                    elbow_axis: Vec3::Z,
                    elbow_fold_sign: 1.0,
                },
            ],
        }
    }
}

/// Tracking-to-robot retargeting.
#[derive(Debug, Clone)]
pub struct RetargetEngine {
    basis: BasisTransform,
    conventions: LimbConventions,
    /// Per-bone rest-pose correction applied to the chain-relative local
    /// rotation: local' = calibration^-1 * local
    calibration: HashMap<String, Quat>,
}

impl RetargetEngine {
    pub fn new(basis: BasisTransform, conventions: LimbConventions) -> Self {
        Self {
            basis,
            conventions,
            calibration: HashMap::new(),
        }
    }

    pub fn basis(&self) -> &BasisTransform {
        &self.basis
    }

    pub fn set_calibration(&mut self, bone: &str, rest_local: Quat) {
        self.calibration.insert(bone.to_string(), rest_local.normalize());
    }

    pub fn clear_calibration(&mut self) {
        self.calibration.clear();
    }

    /// Capture the current chain-relative locals as the rest pose, so the
    /// operator's current stance maps to zero joint angles.
    pub fn calibrate_from(&mut self, snapshot: &TrackingSnapshot) {
        let Some(chest) = self.chest_rotation(snapshot) else {
            return;
        };

        if let Some(head) = snapshot.bone("Head") {
            let parent = snapshot
                .bone("Neck")
                .map(|n| self.basis.rotation_to_robot(n.rotation))
                .unwrap_or(chest);
            let head = self.basis.rotation_to_robot(head.rotation);
            self.set_calibration("Head", parent.conjugate() * head);
        }

        let arms = self.conventions.arms.clone();
        for arm in &arms {
            if let Some(upper) = snapshot.bone(&arm.upper_bone) {
                let upper_q = self.basis.rotation_to_robot(upper.rotation);
                self.set_calibration(&arm.upper_bone, chest.conjugate() * upper_q);

                if let Some(lower) = snapshot.bone(&arm.lower_bone) {
                    let lower_q = self.basis.rotation_to_robot(lower.rotation);
                    self.set_calibration(&arm.lower_bone, upper_q.conjugate() * lower_q);
                }
            }
        }
    }

    /// One retargeting pass: read the snapshot, write clamped joint
    /// positions into the model and return them as a command frame.
    pub fn tick(&self, model: &mut RobotModel, snapshot: &TrackingSnapshot) -> JointFrame {
        let mut frame = JointFrame::new();
        if snapshot.is_empty() {
            return frame;
        }
        let Some(chest) = self.chest_rotation(snapshot) else {
            return frame;
        };

        self.process_head(model, snapshot, chest, &mut frame);
        for arm in &self.conventions.arms {
            self.process_arm(model, snapshot, chest, arm, &mut frame);
        }
        frame
    }

    fn chest_rotation(&self, snapshot: &TrackingSnapshot) -> Option<Quat> {
        snapshot
            .first_of(&CHEST_FALLBACK)
            .map(|t| self.basis.rotation_to_robot(t.rotation))
    }

    fn process_head(
        &self,
        model: &mut RobotModel,
        snapshot: &TrackingSnapshot,
        chest: Quat,
        frame: &mut JointFrame,
    ) {
        let head = &self.conventions.head;
        // A joint without tracked source data this tick is skipped; its
        // last commanded value persists.
        let Some(head_src) = snapshot.bone("Head") else {
            return;
        };
        let head_q = self.basis.rotation_to_robot(head_src.rotation);
        let parent = snapshot
            .bone("Neck")
            .map(|n| self.basis.rotation_to_robot(n.rotation))
            .unwrap_or(chest);

        let local = self.local_rotation("Head", parent, head_q);

        // Pan and tilt are mechanically coupled: the tilt axis rotates
        // with pan, so the clamped pan must be removed before extracting
        // tilt.
        let pan = self.clamp_to(model, &head.pan_joint, twist_angle(local, head.pan_axis));
        let residual = remove_rotation(local, Quat::from_axis_angle(head.pan_axis, pan));
        let tilt = self.clamp_to(model, &head.tilt_joint, twist_angle(residual, head.tilt_axis));

        self.write(model, frame, &head.pan_joint, pan);
        self.write(model, frame, &head.tilt_joint, tilt);
    }

    fn process_arm(
        &self,
        model: &mut RobotModel,
        snapshot: &TrackingSnapshot,
        chest: Quat,
        arm: &ArmConventions,
        frame: &mut JointFrame,
    ) {
        let Some(upper_src) = snapshot.bone(&arm.upper_bone) else {
            return;
        };
        let upper_q = self.basis.rotation_to_robot(upper_src.rotation);
        let local_shoulder = self.local_rotation(&arm.upper_bone, chest, upper_q);

        // Shoulder roll rides on the pitched axis: extract and clamp pitch
        // first, remove it, then extract roll from the remainder.
        let pitch = self.clamp_to(
            model,
            &arm.pitch_joint,
            twist_angle(local_shoulder, arm.pitch_axis),
        );
        let residual = remove_rotation(local_shoulder, Quat::from_axis_angle(arm.pitch_axis, pitch));
        let roll = self.clamp_to(model, &arm.roll_joint, twist_angle(residual, arm.roll_axis));

        self.write(model, frame, &arm.pitch_joint, pitch);
        self.write(model, frame, &arm.roll_joint, roll);

        if let Some(lower_src) = snapshot.bone(&arm.lower_bone) {
            let lower_q = self.basis.rotation_to_robot(lower_src.rotation);
            let local_elbow = self.local_rotation(&arm.lower_bone, upper_q, lower_q);

            let raw = twist_angle(local_elbow, arm.elbow_axis);
            // The elbow only folds one way; the tracked sign is noise.
            let folded = arm.elbow_fold_sign * raw.abs();
            let elbow = self.clamp_to(model, &arm.elbow_joint, folded);
            self.write(model, frame, &arm.elbow_joint, elbow);
        }
    }

    fn local_rotation(&self, bone: &str, parent: Quat, child: Quat) -> Quat {
        let local = (parent.conjugate() * child).normalize();
        match self.calibration.get(bone) {
            Some(cal) => (cal.conjugate() * local).normalize(),
            None => local,
        }
    }

    fn clamp_to(&self, model: &RobotModel, joint: &str, value: f32) -> f32 {
        match model.joint(joint) {
            Some(j) => j.clamp(value),
            None => value,
        }
    }

    fn write(&self, model: &mut RobotModel, frame: &mut JointFrame, joint: &str, value: f32) {
        if model.set_joint_position(joint, value).is_err() {
            trace!(joint = joint, "Joint not present in model, frame-only output");
        }
        frame.insert(joint.to_string(), value);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use marionette_core::tracking::BoneTransform;
    use std::f32::consts::PI;
    use std::path::Path;

    fn humanoid_model() -> RobotModel {
        let xml = r#"<robot name="op2">
    <link name="body"/>
    <link name="head1"/>
    <link name="head2"/>
    <link name="l_upper"/>
    <link name="r_upper"/>
    <link name="l_fore"/>
    <link name="r_fore"/>
    <joint name="head_pan" type="revolute">
        <parent link="body"/><child link="head1"/>
        <axis xyz="0 1 0"/>
        <limit lower="-1.57" upper="1.57"/>
    </joint>
    <joint name="head_tilt" type="revolute">
        <parent link="head1"/><child link="head2"/>
        <axis xyz="1 0 0"/>
        <limit lower="-0.52" upper="0.52"/>
    </joint>
    <joint name="l_sho_pitch" type="revolute">
        <parent link="body"/><child link="l_upper"/>
        <axis xyz="1 0 0"/>
        <limit lower="-1.57" upper="0.52"/>
    </joint>
    <joint name="r_sho_pitch" type="revolute">
        <parent link="body"/><child link="r_upper"/>
        <axis xyz="1 0 0"/>
        <limit lower="-1.57" upper="0.52"/>
    </joint>
    <joint name="l_sho_roll" type="revolute">
        <parent link="l_upper"/><child link="l_fore"/>
        <axis xyz="0 0 1"/>
        <limit lower="-2.25" upper="0.15"/>
    </joint>
    <joint name="r_sho_roll" type="revolute">
        <parent link="r_upper"/><child link="r_fore"/>
        <axis xyz="0 0 1"/>
        <limit lower="-0.15" upper="2.30"/>
    </joint>
</robot>"#;
        RobotModel::parse_str(xml, Path::new(".")).unwrap()
    }

    fn snapshot(entries: &[(&str, Quat)]) -> TrackingSnapshot {
        let bones = entries
            .iter()
            .map(|(name, q)| {
                (
                    name.to_string(),
                    BoneTransform { position: Vec3::ZERO, rotation: *q },
                )
            })
            .collect();
        TrackingSnapshot::new(bones)
    }

    fn engine() -> RetargetEngine {
        RetargetEngine::new(BasisTransform::default(), LimbConventions::default())
    }

    #[test]
    fn test_head_pan_extracted_and_written() {
        let mut model = humanoid_model();
        let snap = snapshot(&[
            ("Chest", Quat::IDENTITY),
            ("Head", Quat::from_rotation_y(0.4)),
        ]);

        let frame = engine().tick(&mut model, &snap);
        assert!((frame["head_pan"] - 0.4).abs() < 1e-4);
        assert!(frame["head_tilt"].abs() < 1e-4);
        assert!((model.joint("head_pan").unwrap().position - 0.4).abs() < 1e-4);
    }

    #[test]
    fn test_shoulder_limit_clamps_raw_twist() {
        // Raw shoulder twist of 1.2 rad against a [-1.57, 0.52] limit must
        // reach the frame as 0.52.
        let mut model = humanoid_model();
        let snap = snapshot(&[
            ("Chest", Quat::IDENTITY),
            ("RightUpperArm", Quat::from_rotation_x(1.2)),
        ]);

        let frame = engine().tick(&mut model, &snap);
        assert_eq!(frame["r_sho_pitch"], 0.52);
        assert_eq!(model.joint("r_sho_pitch").unwrap().position, 0.52);
    }

    #[test]
    fn test_coupled_extraction_uses_clamped_pitch() {
        // Shoulder pitched beyond its limit and rolled: the roll must be
        // extracted from the residual after removing the *clamped* pitch,
        // and every output stays inside its limits.
        let mut model = humanoid_model();
        let rot = Quat::from_rotation_x(1.2) * Quat::from_rotation_z(-0.8);
        let snap = snapshot(&[("Chest", Quat::IDENTITY), ("RightUpperArm", rot)]);

        let frame = engine().tick(&mut model, &snap);
        let pitch = frame["r_sho_pitch"];
        let roll = frame["r_sho_roll"];
        assert_eq!(pitch, 0.52);
        assert!((-0.15..=2.30).contains(&roll));
    }

    #[test]
    fn test_limit_invariant_on_degenerate_rotations() {
        let mut model = humanoid_model();
        for q in [
            Quat::IDENTITY,
            Quat::from_rotation_y(PI),
            Quat::from_rotation_x(PI),
            Quat::from_rotation_y(-PI),
        ] {
            let snap = snapshot(&[("Chest", Quat::IDENTITY), ("Head", q)]);
            let frame = engine().tick(&mut model, &snap);
            assert!((-1.57..=1.57).contains(&frame["head_pan"]));
            assert!((-0.52..=0.52).contains(&frame["head_tilt"]));
        }
    }

    #[test]
    fn test_missing_bones_are_skipped() {
        let mut model = humanoid_model();
        model.set_joint_position("l_sho_pitch", 0.3).unwrap();

        // Chest present but no arm bones: arm joints untouched
        let snap = snapshot(&[("Chest", Quat::IDENTITY), ("Head", Quat::IDENTITY)]);
        let frame = engine().tick(&mut model, &snap);
        assert!(!frame.contains_key("l_sho_pitch"));
        assert_eq!(model.joint("l_sho_pitch").unwrap().position, 0.3);

        // No torso bone at all: nothing is produced
        let snap = snapshot(&[("Head", Quat::IDENTITY)]);
        assert!(engine().tick(&mut model, &snap).is_empty());
    }

    #[test]
    fn test_chest_fallback_to_hips() {
        let mut model = humanoid_model();
        let snap = snapshot(&[
            ("Hips", Quat::IDENTITY),
            ("Head", Quat::from_rotation_y(0.2)),
        ]);
        let frame = engine().tick(&mut model, &snap);
        assert!((frame["head_pan"] - 0.2).abs() < 1e-4);
    }

    #[test]
    fn test_neck_preferred_over_chest_as_head_parent() {
        let mut model = humanoid_model();
        let neck = Quat::from_rotation_y(0.3);
        let snap = snapshot(&[
            ("Chest", Quat::IDENTITY),
            ("Neck", neck),
            ("Head", neck * Quat::from_rotation_y(0.1)),
        ]);
        let frame = engine().tick(&mut model, &snap);
        // Head local to the neck, not the chest
        assert!((frame["head_pan"] - 0.1).abs() < 1e-4);
    }

    #[test]
    fn test_calibration_zeroes_rest_pose() {
        let mut model = humanoid_model();
        let rest = snapshot(&[
            ("Chest", Quat::IDENTITY),
            ("Head", Quat::from_rotation_y(0.7)),
        ]);

        let mut eng = engine();
        eng.calibrate_from(&rest);

        let frame = eng.tick(&mut model, &rest);
        assert!(frame["head_pan"].abs() < 1e-4);

        // Motion relative to the calibrated rest pose comes through
        let moved = snapshot(&[
            ("Chest", Quat::IDENTITY),
            ("Head", Quat::from_rotation_y(0.9)),
        ]);
        let frame = eng.tick(&mut model, &moved);
        assert!((frame["head_pan"] - 0.2).abs() < 1e-3);
    }

    #[test]
    fn test_elbow_fold_signs() {
        let mut model = humanoid_model();
        // Elbow twist of +0.9 about Z on both sides
        let upper = Quat::IDENTITY;
        let lower = Quat::from_rotation_z(0.9);
        let snap = snapshot(&[
            ("Chest", Quat::IDENTITY),
            ("LeftUpperArm", upper),
            ("LeftLowerArm", lower),
            ("RightUpperArm", upper),
            ("RightLowerArm", lower),
        ]);

        let frame = engine().tick(&mut model, &snap);
        assert!((frame["l_el"] + 0.9).abs() < 1e-4, "left folds negative");
        assert!((frame["r_el"] - 0.9).abs() < 1e-4, "right folds positive");
    }

    #[test]
    fn test_model_and_frame_agree() {
        let mut model = humanoid_model();
        let snap = snapshot(&[
            ("Chest", Quat::from_rotation_y(0.1)),
            ("Head", Quat::from_rotation_y(0.5)),
            ("RightUpperArm", Quat::from_rotation_x(0.9)),
        ]);

        let frame = engine().tick(&mut model, &snap);
        for (joint, value) in &frame {
            if let Some(j) = model.joint(joint) {
                assert_eq!(j.position, *value, "joint {joint} diverged from frame");
            }
        }
    }
}
