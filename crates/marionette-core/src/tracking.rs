//! Shared tracking types: bone vocabulary, snapshots and the source trait
//!
//! The ingestion layer publishes immutable [`TrackingSnapshot`] values; the
//! retargeting engine reads them through the [`TrackingSource`] capability
//! without a compile-time dependency on any particular receiver.

use glam::{Quat, Vec3};
use std::collections::HashMap;
use std::sync::Arc;

/// Canonical humanoid bone vocabulary accepted from the wire.
pub const STANDARD_BONES: &[&str] = &[
    "Hips",
    "Spine",
    "Chest",
    "UpperChest",
    "Neck",
    "Head",
    "LeftShoulder",
    "LeftUpperArm",
    "LeftLowerArm",
    "LeftHand",
    "RightShoulder",
    "RightUpperArm",
    "RightLowerArm",
    "RightHand",
    "LeftUpperLeg",
    "LeftLowerLeg",
    "LeftFoot",
    "RightUpperLeg",
    "RightLowerLeg",
    "RightFoot",
];

pub fn is_standard_bone(name: &str) -> bool {
    STANDARD_BONES.contains(&name)
}

/// Tracked pose of a single bone
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct BoneTransform {
    pub position: Vec3,
    /// Unit quaternion; normalized on receipt
    pub rotation: Quat,
}

impl Default for BoneTransform {
    fn default() -> Self {
        Self { position: Vec3::ZERO, rotation: Quat::IDENTITY }
    }
}

/// An immutable, atomically published frame of tracked bones.
#[derive(Debug, Clone, Default)]
pub struct TrackingSnapshot {
    bones: HashMap<String, BoneTransform>,
}

impl TrackingSnapshot {
    pub fn new(bones: HashMap<String, BoneTransform>) -> Self {
        Self { bones }
    }

    pub fn bone(&self, name: &str) -> Option<&BoneTransform> {
        self.bones.get(name)
    }

    /// First present bone out of a preference-ordered list.
    pub fn first_of(&self, names: &[&str]) -> Option<&BoneTransform> {
        names.iter().find_map(|n| self.bones.get(*n))
    }

    pub fn len(&self) -> usize {
        self.bones.len()
    }

    pub fn is_empty(&self) -> bool {
        self.bones.is_empty()
    }

    pub fn bones(&self) -> impl Iterator<Item = (&String, &BoneTransform)> {
        self.bones.iter()
    }
}

/// Read access to the latest complete tracking snapshot.
///
/// Implementations must never block the publisher and must hand out either
/// the previous complete snapshot or the next complete one, never a mix.
pub trait TrackingSource: Send + Sync {
    fn latest(&self) -> Arc<TrackingSnapshot>;
}

/// Maps wire bone names onto the canonical vocabulary.
///
/// Lookup is case-insensitive over an alias table; names with no alias pass
/// through unchanged and are then checked against the vocabulary. `None`
/// means the name is dropped.
#[derive(Debug, Clone)]
pub struct BoneAliases {
    table: HashMap<String, &'static str>,
}

impl Default for BoneAliases {
    fn default() -> Self {
        let mut table = HashMap::new();
        let mut add = |aliases: &[&str], canonical: &'static str| {
            for a in aliases {
                table.insert((*a).to_string(), canonical);
            }
        };

        add(
            &["leftupperarm", "leftarm", "left_arm", "upperarm_left", "arm.l", "leftshoulder", "larm"],
            "LeftUpperArm",
        );
        add(
            &["leftlowerarm", "leftforearm", "lowerarm_left", "forearm.l", "leftelbow"],
            "LeftLowerArm",
        );
        add(&["lefthand", "hand.l", "hand_left", "left_wrist", "left_hand"], "LeftHand");

        add(
            &["rightupperarm", "rightarm", "right_arm", "upperarm_right", "arm.r", "rightshoulder", "rarm"],
            "RightUpperArm",
        );
        add(
            &["rightlowerarm", "rightforearm", "lowerarm_right", "forearm.r", "rightelbow"],
            "RightLowerArm",
        );
        add(&["righthand", "hand.r", "hand_right", "right_wrist", "right_hand"], "RightHand");

        add(
            &["chest", "upperchest", "spine", "spine1", "spine2", "spine3", "torso", "upper_chest", "chest2"],
            "Chest",
        );

        add(&["neck", "neck1", "neck2"], "Neck");
        add(&["head"], "Head");

        Self { table }
    }
}

impl BoneAliases {
    /// Extend the default table with configured aliases (alias -> canonical
    /// bone). Entries mapping onto unknown bones are ignored.
    pub fn with_extra<'a, I>(mut self, extra: I) -> Self
    where
        I: IntoIterator<Item = (&'a str, &'a str)>,
    {
        for (alias, canonical) in extra {
            if let Some(&bone) = STANDARD_BONES.iter().find(|b| **b == canonical) {
                self.table.insert(alias.trim().to_lowercase(), bone);
            }
        }
        self
    }

    /// Normalize a wire name into the canonical vocabulary.
    pub fn normalize(&self, raw: &str) -> Option<&'static str> {
        let trimmed = raw.trim();
        if trimmed.is_empty() {
            return None;
        }
        let lower = trimmed.to_lowercase();
        if let Some(&canonical) = self.table.get(&lower) {
            return Some(canonical);
        }
        STANDARD_BONES.iter().find(|b| **b == trimmed).copied()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_alias_normalization() {
        let aliases = BoneAliases::default();
        assert_eq!(aliases.normalize("LeftArm"), Some("LeftUpperArm"));
        assert_eq!(aliases.normalize("forearm.R"), Some("RightLowerArm"));
        assert_eq!(aliases.normalize("spine2"), Some("Chest"));
        assert_eq!(aliases.normalize("Hips"), Some("Hips"));
        assert_eq!(aliases.normalize("tail"), None);
        assert_eq!(aliases.normalize("  "), None);
    }

    #[test]
    fn test_extra_aliases() {
        let aliases = BoneAliases::default().with_extra([("kopf", "Head"), ("bogus", "NotABone")]);
        assert_eq!(aliases.normalize("Kopf"), Some("Head"));
        assert_eq!(aliases.normalize("bogus"), None);
    }

    #[test]
    fn test_snapshot_first_of() {
        let mut bones = HashMap::new();
        bones.insert("Spine".to_string(), BoneTransform::default());
        let snapshot = TrackingSnapshot::new(bones);

        assert!(snapshot.first_of(&["Chest", "Spine", "Hips"]).is_some());
        assert!(snapshot.first_of(&["Chest", "Hips"]).is_none());
    }
}
