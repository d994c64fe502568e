//! URDF document parsing
//!
//! Raw serde mirror of the URDF XML subset consumed by Marionette:
//! link/joint elements with origin, axis, limit, dynamics, geometry and
//! material attributes. Conversion into the runtime [`RobotModel`] lives in
//! [`crate::robot`].
//!
//! [`RobotModel`]: crate::robot::RobotModel

use glam::Vec3;
use quick_xml::de::from_str;
use serde::Deserialize;
use std::path::Path;
use thiserror::Error;

#[derive(Error, Debug)]
pub enum UrdfError {
    #[error("Failed to parse URDF: {0}")]
    ParseError(String),
    #[error("IO error: {0}")]
    IoError(#[from] std::io::Error),
    #[error("No root link: every link is referenced as a joint child")]
    NoRootLink,
    #[error("Unknown joint: {0}")]
    UnknownJoint(String),
}

/// Root `<robot>` document
#[derive(Debug, Clone, Deserialize)]
#[serde(rename = "robot")]
pub struct RobotDoc {
    #[serde(rename = "@name", default)]
    pub name: String,

    #[serde(default, rename = "link")]
    pub links: Vec<LinkEl>,

    #[serde(default, rename = "joint")]
    pub joints: Vec<JointEl>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct LinkEl {
    #[serde(rename = "@name")]
    pub name: String,
    #[serde(default)]
    pub visual: Option<VisualEl>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct VisualEl {
    #[serde(default)]
    pub origin: Option<OriginEl>,
    #[serde(default)]
    pub geometry: Option<GeometryEl>,
    #[serde(default)]
    pub material: Option<MaterialEl>,
}

/// Origin offset: `xyz` translation plus `rpy` fixed rotation, both
/// whitespace-separated float triples.
#[derive(Debug, Clone, Default, Deserialize)]
pub struct OriginEl {
    #[serde(rename = "@xyz", default)]
    pub xyz: Option<String>,
    #[serde(rename = "@rpy", default)]
    pub rpy: Option<String>,
}

#[derive(Debug, Clone, Default, Deserialize)]
pub struct GeometryEl {
    #[serde(default)]
    pub mesh: Option<MeshEl>,
    #[serde(default, rename = "box")]
    pub box_el: Option<BoxEl>,
    #[serde(default)]
    pub cylinder: Option<CylinderEl>,
    #[serde(default)]
    pub sphere: Option<SphereEl>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct MeshEl {
    #[serde(rename = "@filename")]
    pub filename: String,
    #[serde(rename = "@scale", default)]
    pub scale: Option<String>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct BoxEl {
    #[serde(rename = "@size")]
    pub size: String,
}

#[derive(Debug, Clone, Deserialize)]
pub struct CylinderEl {
    #[serde(rename = "@radius")]
    pub radius: f32,
    #[serde(rename = "@length")]
    pub length: f32,
}

#[derive(Debug, Clone, Deserialize)]
pub struct SphereEl {
    #[serde(rename = "@radius")]
    pub radius: f32,
}

#[derive(Debug, Clone, Deserialize)]
pub struct MaterialEl {
    #[serde(rename = "@name", default)]
    pub name: String,
    #[serde(default)]
    pub color: Option<ColorEl>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct ColorEl {
    #[serde(rename = "@rgba")]
    pub rgba: String,
}

#[derive(Debug, Clone, Deserialize)]
pub struct JointEl {
    #[serde(rename = "@name")]
    pub name: String,
    #[serde(rename = "@type", default)]
    pub joint_type: String,
    #[serde(default)]
    pub parent: Option<LinkRefEl>,
    #[serde(default)]
    pub child: Option<LinkRefEl>,
    #[serde(default)]
    pub origin: Option<OriginEl>,
    #[serde(default)]
    pub axis: Option<AxisEl>,
    #[serde(default)]
    pub limit: Option<LimitEl>,
    #[serde(default)]
    pub dynamics: Option<DynamicsEl>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct LinkRefEl {
    #[serde(rename = "@link")]
    pub link: String,
}

#[derive(Debug, Clone, Deserialize)]
pub struct AxisEl {
    #[serde(rename = "@xyz")]
    pub xyz: String,
}

#[derive(Debug, Clone, Default, Deserialize)]
pub struct LimitEl {
    #[serde(rename = "@lower", default)]
    pub lower: Option<f32>,
    #[serde(rename = "@upper", default)]
    pub upper: Option<f32>,
    #[serde(rename = "@effort", default)]
    pub effort: Option<f32>,
    #[serde(rename = "@velocity", default)]
    pub velocity: Option<f32>,
}

#[derive(Debug, Clone, Default, Deserialize)]
pub struct DynamicsEl {
    #[serde(rename = "@damping", default)]
    pub damping: Option<f32>,
    #[serde(rename = "@friction", default)]
    pub friction: Option<f32>,
}

impl RobotDoc {
    /// Parse a URDF document from an XML string
    pub fn from_xml(xml: &str) -> Result<Self, UrdfError> {
        from_str(xml).map_err(|e| UrdfError::ParseError(e.to_string()))
    }

    /// Parse a URDF document from a file
    pub fn from_file(path: &Path) -> Result<Self, UrdfError> {
        let content = std::fs::read_to_string(path)?;
        Self::from_xml(&content)
    }
}

/// Parse a whitespace-separated "x y z" attribute into a vector.
///
/// Anything that is not exactly three floats yields the fallback value.
pub fn parse_vec3(s: &str, fallback: Vec3) -> Vec3 {
    let parts: Vec<f32> = s
        .split_whitespace()
        .filter_map(|p| p.parse().ok())
        .collect();
    if parts.len() == 3 {
        Vec3::new(parts[0], parts[1], parts[2])
    } else {
        fallback
    }
}

/// Parse a whitespace-separated "r g b a" attribute into four floats.
pub fn parse_rgba(s: &str) -> Option<[f32; 4]> {
    let parts: Vec<f32> = s
        .split_whitespace()
        .filter_map(|p| p.parse().ok())
        .collect();
    if parts.len() == 4 {
        Some([parts[0], parts[1], parts[2], parts[3]])
    } else {
        None
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_simple_robot() {
        let xml = r#"<?xml version="1.0"?>
<robot name="op2">
    <link name="base_link"/>
    <link name="head_link">
        <visual>
            <origin xyz="0 0 0.05" rpy="0 0 0"/>
            <geometry>
                <box size="0.04 0.04 0.04"/>
            </geometry>
            <material name="grey">
                <color rgba="0.7 0.7 0.7 1.0"/>
            </material>
        </visual>
    </link>
    <joint name="head_pan" type="revolute">
        <parent link="base_link"/>
        <child link="head_link"/>
        <origin xyz="0 0 0.1"/>
        <axis xyz="0 0 1"/>
        <limit lower="-1.57" upper="1.57" effort="2.5" velocity="5.0"/>
        <dynamics damping="0.1"/>
    </joint>
</robot>"#;

        let doc = RobotDoc::from_xml(xml).unwrap();
        assert_eq!(doc.name, "op2");
        assert_eq!(doc.links.len(), 2);
        assert_eq!(doc.joints.len(), 1);

        let joint = &doc.joints[0];
        assert_eq!(joint.name, "head_pan");
        assert_eq!(joint.joint_type, "revolute");
        assert_eq!(joint.parent.as_ref().unwrap().link, "base_link");
        assert_eq!(joint.child.as_ref().unwrap().link, "head_link");
        assert_eq!(joint.limit.as_ref().unwrap().lower, Some(-1.57));
        assert_eq!(joint.dynamics.as_ref().unwrap().damping, Some(0.1));

        let visual = doc.links[1].visual.as_ref().unwrap();
        assert!(visual.geometry.as_ref().unwrap().box_el.is_some());
        let rgba = parse_rgba(&visual.material.as_ref().unwrap().color.as_ref().unwrap().rgba);
        assert_eq!(rgba, Some([0.7, 0.7, 0.7, 1.0]));
    }

    #[test]
    fn test_parse_vec3_fallback() {
        assert_eq!(parse_vec3("1 2 3", Vec3::ZERO), Vec3::new(1.0, 2.0, 3.0));
        assert_eq!(parse_vec3("  0.5   -1.0 2.5 ", Vec3::ZERO), Vec3::new(0.5, -1.0, 2.5));
        assert_eq!(parse_vec3("1 2", Vec3::X), Vec3::X);
        assert_eq!(parse_vec3("not numbers", Vec3::Z), Vec3::Z);
    }

    #[test]
    fn test_malformed_xml_is_error() {
        let err = RobotDoc::from_xml("<robot name=\"broken\"").unwrap_err();
        assert!(matches!(err, UrdfError::ParseError(_)));
    }
}
