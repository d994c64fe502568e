//! Engine-joint to motor-index mapping and unit conversion
//!
//! The actuation endpoint addresses a fixed space of 20 motor indices. This
//! module translates engine joint names (and their known aliases) into that
//! space, converts engine angles into endpoint units and applies the
//! per-index delta thresholds used to suppress insignificant updates.

use std::collections::HashMap;

use marionette_retarget::JointFrame;

/// Size of the endpoint's motor index space.
pub const NUM_MOTORS: usize = 20;

/// Default delta threshold for indices outside the known groups.
const DEFAULT_DELTA_THRESHOLD: f32 = 0.0040;

/// How an engine value converts into endpoint units.
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum ValueMap {
    /// Pass through (clamped to the motor range).
    Direct,
    /// Sign flip; used where the endpoint's direction convention is
    /// reversed over a symmetric range.
    Negate,
    /// Direction flip that keeps zero anchored: [0, max] maps onto
    /// [0, min] and [min, 0] onto [max, 0]. Falls back to a plain range
    /// mirror when zero is outside the range.
    MirrorKeepZero,
    /// Linear remap between differing ranges.
    Linear { from: (f32, f32), to: (f32, f32) },
    /// Absolute-value fold then linear remap; used for joints that bend
    /// one way regardless of the tracked sign.
    FoldAbs { from: (f32, f32), to: (f32, f32) },
}

/// One motor: endpoint name, index and range plus its conversion.
#[derive(Debug, Clone, Copy)]
pub struct JointMapping {
    pub endpoint_name: &'static str,
    pub index: usize,
    pub min: f32,
    pub max: f32,
    pub map: ValueMap,
}

/// The full name -> motor translation table.
#[derive(Debug, Clone)]
pub struct JointTable {
    entries: HashMap<&'static str, JointMapping>,
}

impl Default for JointTable {
    fn default() -> Self {
        let mut entries = HashMap::new();
        let mut add = |name: &'static str, endpoint_name: &'static str, index: usize, min: f32, max: f32, map: ValueMap| {
            entries.insert(name, JointMapping { endpoint_name, index, min, max, map });
        };

        // Head
        add("head_pan", "Neck", 18, -1.57, 1.57, ValueMap::Negate);
        add("head_tilt", "Head", 19, -0.52, 0.52, ValueMap::Direct);

        // Arms
        add("r_sho_pitch", "ShoulderR", 0, -1.57, 0.52, ValueMap::MirrorKeepZero);
        add("l_sho_pitch", "ShoulderL", 1, -1.57, 0.52, ValueMap::MirrorKeepZero);
        add("r_sho_roll", "ArmUpperR", 2, -0.15, 2.30, ValueMap::Direct);
        add("l_sho_roll", "ArmUpperL", 3, -2.25, 0.15, ValueMap::Direct);
        let elbow = ValueMap::FoldAbs { from: (0.0, 2.7925), to: (-0.10, -1.57) };
        add("r_el", "ArmLowerR", 4, -1.57, -0.10, elbow);
        add("l_el", "ArmLowerL", 5, -1.57, -0.10, elbow);

        // Hips
        add("r_hip_yaw", "PelvYR", 6, -1.047, 1.047, ValueMap::Direct);
        add("l_hip_yaw", "PelvYL", 7, -0.69, 2.50, ValueMap::Direct);
        add("r_hip_roll", "PelvR", 8, -1.01, 1.01, ValueMap::Direct);
        add("l_hip_roll", "PelvL", 9, -0.35, 0.35, ValueMap::Direct);
        add("r_hip_pitch", "LegUpperR", 10, -2.50, 0.87, ValueMap::Direct);
        add("l_hip_pitch", "LegUpperL", 11, -2.50, 0.87, ValueMap::Direct);

        // Knees
        let knee = ValueMap::Linear { from: (-2.27, 0.0), to: (2.09, -0.10) };
        add("r_knee", "LegLowerR", 12, -0.10, 2.09, knee);
        add("l_knee", "LegLowerL", 13, -0.10, 2.09, knee);

        // Ankles
        add("r_ank_pitch", "AnkleR", 14, -0.87, 0.87, ValueMap::Direct);
        add("l_ank_pitch", "AnkleL", 15, -1.39, 1.22, ValueMap::Direct);
        add("r_ank_roll", "FootR", 16, -0.87, 0.87, ValueMap::Direct);
        add("l_ank_roll", "FootL", 17, -0.87, 0.87, ValueMap::Direct);

        Self { entries }
    }
}

impl JointTable {
    /// Canonicalize an engine or endpoint joint name.
    pub fn normalize_name(name: &str) -> &str {
        match name.trim() {
            // Elbows
            "ArmLowerR" => "r_el",
            "ArmLowerL" => "l_el",
            // Shoulders
            "ShoulderR" => "r_sho_pitch",
            "ShoulderL" => "l_sho_pitch",
            "ArmUpperR" => "r_sho_roll",
            "ArmUpperL" => "l_sho_roll",
            // Head
            "Neck" => "head_pan",
            "Head" => "head_tilt",
            // Lower body
            "PelvYR" => "r_hip_yaw",
            "PelvYL" => "l_hip_yaw",
            "PelvR" => "r_hip_roll",
            "PelvL" => "l_hip_roll",
            "LegUpperR" => "r_hip_pitch",
            "LegUpperL" => "l_hip_pitch",
            "LegLowerR" => "r_knee",
            "LegLowerL" => "l_knee",
            "AnkleR" => "r_ank_pitch",
            "AnkleL" => "l_ank_pitch",
            "FootR" => "r_ank_roll",
            "FootL" => "l_ank_roll",
            other => other,
        }
    }

    /// Look up a joint by raw name. `None` for names outside the motor
    /// space.
    pub fn lookup(&self, raw: &str) -> Option<(&'static str, &JointMapping)> {
        let canonical = Self::normalize_name(raw);
        self.entries
            .get_key_value(canonical)
            .map(|(k, v)| (*k, v))
    }

    /// Convert an engine value into endpoint units, clamped to the motor
    /// range.
    pub fn convert(mapping: &JointMapping, value: f32) -> f32 {
        let v = match mapping.map {
            ValueMap::Direct => value,
            ValueMap::Negate => -value,
            ValueMap::MirrorKeepZero => mirror_keep_zero(value, mapping.min, mapping.max),
            ValueMap::Linear { from, to } => map_range(value, from.0, from.1, to.0, to.1),
            ValueMap::FoldAbs { from, to } => map_range(value.abs(), from.0, from.1, to.0, to.1),
        };
        v.clamp(mapping.min, mapping.max)
    }

    /// Minimum movement required before an index is retransmitted.
    /// Precision joints get tight thresholds, coarse ones looser.
    pub fn delta_threshold(index: usize) -> f32 {
        match index {
            18 | 19 => 0.0025,
            4 | 5 => 0.0030,
            0..=3 => 0.0035,
            6..=17 => 0.0050,
            _ => DEFAULT_DELTA_THRESHOLD,
        }
    }
}

/// Flip direction inside [min, max] while keeping zero fixed. Requires
/// min < 0 < max for the zero anchor to be meaningful; otherwise falls back
/// to mirroring across the range.
fn mirror_keep_zero(v: f32, min: f32, max: f32) -> f32 {
    if !(min < 0.0 && max > 0.0) {
        return (min + max) - v;
    }
    if v >= 0.0 {
        map_range(v, 0.0, max, 0.0, min)
    } else {
        map_range(v, min, 0.0, max, 0.0)
    }
}

/// Linear remap with saturation at both ends.
fn map_range(v: f32, from_lo: f32, from_hi: f32, to_lo: f32, to_hi: f32) -> f32 {
    if v <= from_lo {
        return to_lo;
    }
    if v >= from_hi {
        return to_hi;
    }
    to_lo + (v - from_lo) * (to_hi - to_lo) / (from_hi - from_lo)
}

/// Map a whole command frame into per-index endpoint values, suppressing
/// entries that have not moved by at least their delta threshold since the
/// last transmitted frame. Unknown names and NaNs are dropped.
pub fn plan_frame(
    table: &JointTable,
    frame: &JointFrame,
    last_sent: &[Option<f32>; NUM_MOTORS],
) -> [Option<f32>; NUM_MOTORS] {
    let mut planned = [None; NUM_MOTORS];
    for (name, &value) in frame {
        if value.is_nan() {
            continue;
        }
        let Some((_, mapping)) = table.lookup(name) else {
            continue;
        };
        let v = JointTable::convert(mapping, value);
        if let Some(prev) = last_sent[mapping.index] {
            if (v - prev).abs() < JointTable::delta_threshold(mapping.index) {
                continue;
            }
        }
        planned[mapping.index] = Some(v);
    }
    planned
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_alias_normalization() {
        assert_eq!(JointTable::normalize_name("ArmLowerR"), "r_el");
        assert_eq!(JointTable::normalize_name(" Neck "), "head_pan");
        assert_eq!(JointTable::normalize_name("r_knee"), "r_knee");
        assert_eq!(JointTable::normalize_name("mystery"), "mystery");
    }

    #[test]
    fn test_lookup_covers_all_twenty_indices() {
        let table = JointTable::default();
        let mut seen = [false; NUM_MOTORS];
        for name in [
            "head_pan", "head_tilt", "r_sho_pitch", "l_sho_pitch", "r_sho_roll", "l_sho_roll",
            "r_el", "l_el", "r_hip_yaw", "l_hip_yaw", "r_hip_roll", "l_hip_roll", "r_hip_pitch",
            "l_hip_pitch", "r_knee", "l_knee", "r_ank_pitch", "l_ank_pitch", "r_ank_roll",
            "l_ank_roll",
        ] {
            let (_, m) = table.lookup(name).unwrap();
            assert!(!seen[m.index], "duplicate index {}", m.index);
            seen[m.index] = true;
        }
        assert!(seen.iter().all(|&s| s));
        assert!(table.lookup("not_a_joint").is_none());
    }

    #[test]
    fn test_elbow_fold_conversion() {
        let table = JointTable::default();
        let (_, m) = table.lookup("r_el").unwrap();
        // Straight arm maps to the endpoint's extended stop
        assert!((JointTable::convert(m, 0.0) + 0.10).abs() < 1e-5);
        // Either tracked sign folds the same way
        let bent_pos = JointTable::convert(m, 1.5);
        let bent_neg = JointTable::convert(m, -1.5);
        assert!((bent_pos - bent_neg).abs() < 1e-6);
        assert!(bent_pos < -0.10);
        // Full fold saturates at the flexed stop
        assert!((JointTable::convert(m, 3.5) + 1.57).abs() < 1e-5);
    }

    #[test]
    fn test_knee_linear_conversion() {
        let table = JointTable::default();
        let (_, m) = table.lookup("r_knee").unwrap();
        assert!((JointTable::convert(m, -2.27) - 2.09).abs() < 1e-5);
        assert!((JointTable::convert(m, 0.0) + 0.10).abs() < 1e-5);
        // Midpoint lands mid-range
        let mid = JointTable::convert(m, -1.135);
        assert!((mid - 0.995).abs() < 1e-3);
    }

    #[test]
    fn test_head_pan_negated() {
        let table = JointTable::default();
        let (_, m) = table.lookup("head_pan").unwrap();
        assert!((JointTable::convert(m, 0.5) + 0.5).abs() < 1e-6);
        assert!((JointTable::convert(m, -2.0) - 1.57).abs() < 1e-5);
    }

    #[test]
    fn test_shoulder_mirror_keeps_zero() {
        let table = JointTable::default();
        let (_, m) = table.lookup("r_sho_pitch").unwrap();
        assert_eq!(JointTable::convert(m, 0.0), 0.0);
        // Positive input runs toward min, negative toward max
        assert!((JointTable::convert(m, 0.52) + 1.57).abs() < 1e-5);
        assert!((JointTable::convert(m, -1.57) - 0.52).abs() < 1e-5);
        assert!((JointTable::convert(m, 0.26) + 0.785).abs() < 1e-3);
    }

    #[test]
    fn test_mirror_fallback_without_zero_in_range() {
        assert!((mirror_keep_zero(-0.5, -1.57, -0.10) - (-1.17)).abs() < 1e-5);
    }

    #[test]
    fn test_delta_thresholds_by_group() {
        assert_eq!(JointTable::delta_threshold(18), 0.0025);
        assert_eq!(JointTable::delta_threshold(4), 0.0030);
        assert_eq!(JointTable::delta_threshold(2), 0.0035);
        assert_eq!(JointTable::delta_threshold(12), 0.0050);
        assert_eq!(JointTable::delta_threshold(25), DEFAULT_DELTA_THRESHOLD);
    }

    #[test]
    fn test_plan_frame_delta_filtering() {
        let table = JointTable::default();
        let mut last = [None; NUM_MOTORS];

        let mut frame = JointFrame::new();
        frame.insert("head_tilt".to_string(), 0.10);
        let planned = plan_frame(&table, &frame, &last);
        assert_eq!(planned[19], Some(0.10));

        // Record the transmission, then move by less than the threshold:
        // no index may be planned again.
        last[19] = Some(0.10);
        frame.insert("head_tilt".to_string(), 0.101);
        let planned = plan_frame(&table, &frame, &last);
        assert!(planned.iter().all(|v| v.is_none()));

        // A move past the threshold goes through
        frame.insert("head_tilt".to_string(), 0.15);
        let planned = plan_frame(&table, &frame, &last);
        assert_eq!(planned[19], Some(0.15));
    }

    #[test]
    fn test_plan_frame_drops_unknown_and_nan() {
        let table = JointTable::default();
        let last = [None; NUM_MOTORS];
        let mut frame = JointFrame::new();
        frame.insert("waist_twist".to_string(), 0.4);
        frame.insert("head_pan".to_string(), f32::NAN);
        assert!(plan_frame(&table, &frame, &last).iter().all(|v| v.is_none()));
    }

    #[test]
    fn test_plan_frame_accepts_engine_aliases() {
        let table = JointTable::default();
        let last = [None; NUM_MOTORS];
        let mut frame = JointFrame::new();
        frame.insert("ShoulderR".to_string(), 0.0);
        let planned = plan_frame(&table, &frame, &last);
        assert_eq!(planned[0], Some(0.0));
    }
}
