//! Runtime robot model: links, joints and the kinematic hierarchy
//!
//! Built once from a [`RobotDoc`] at load time. After that the only mutable
//! state is each joint's current position/velocity; everything else is
//! read-only during simulation.

use glam::Vec3;
use std::collections::HashMap;
use std::path::Path;
use tracing::{info, warn};

use crate::mesh::resolve_mesh;
use crate::urdf::{parse_rgba, parse_vec3, JointEl, LinkEl, RobotDoc, UrdfError};

/// Joint motion type
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum JointKind {
    Fixed,
    Revolute,
    Continuous,
    Prismatic,
}

impl JointKind {
    /// Parse a URDF joint type string. Unknown strings default to `Fixed`
    /// with a diagnostic.
    pub fn parse(s: &str, joint_name: &str) -> Self {
        match s {
            "fixed" | "" => Self::Fixed,
            "revolute" => Self::Revolute,
            "continuous" => Self::Continuous,
            "prismatic" => Self::Prismatic,
            other => {
                warn!(joint = joint_name, kind = other, "Unknown joint type, defaulting to fixed");
                Self::Fixed
            }
        }
    }

    pub fn is_movable(self) -> bool {
        !matches!(self, Self::Fixed)
    }
}

/// Position limit for a movable joint (radians or meters)
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct JointLimit {
    pub lower: f32,
    pub upper: f32,
    pub effort: f32,
    pub velocity: f32,
}

/// Visual geometry attached to a link
#[derive(Debug, Clone, PartialEq)]
pub enum Geometry {
    Mesh {
        filename: String,
        /// Resolved on-disk path; `None` when resolution failed and the
        /// consumer should fall back to a primitive.
        resolved: Option<std::path::PathBuf>,
        scale: Vec3,
    },
    Box {
        size: Vec3,
    },
    Cylinder {
        radius: f32,
        length: f32,
    },
    Sphere {
        radius: f32,
    },
}

#[derive(Debug, Clone)]
pub struct Visual {
    pub origin_xyz: Vec3,
    pub origin_rpy: Vec3,
    pub geometry: Option<Geometry>,
    pub color: Option<[f32; 4]>,
}

/// A rigid body segment of the robot
#[derive(Debug, Clone)]
pub struct Link {
    pub name: String,
    pub visual: Option<Visual>,
}

/// A named connector between a parent link and a child link
#[derive(Debug, Clone)]
pub struct Joint {
    pub name: String,
    pub kind: JointKind,
    pub parent_link: String,
    pub child_link: String,
    pub origin_xyz: Vec3,
    pub origin_rpy: Vec3,
    /// Motion axis, always unit length
    pub axis: Vec3,
    pub limit: Option<JointLimit>,
    pub damping: f32,
    pub friction: f32,
    /// Current position (radians for revolute/continuous, meters for
    /// prismatic)
    pub position: f32,
    /// Tracked but currently unused by the control path
    pub velocity: f32,
}

impl Joint {
    pub fn is_movable(&self) -> bool {
        self.kind.is_movable()
    }

    /// Clamp a candidate position against this joint's limit, if any.
    pub fn clamp(&self, value: f32) -> f32 {
        match self.limit {
            Some(l) if l.upper > l.lower => value.clamp(l.lower, l.upper),
            _ => value,
        }
    }
}

/// The parsed robot: links, joints and lookup indexes
#[derive(Debug, Clone)]
pub struct RobotModel {
    pub name: String,
    links: Vec<Link>,
    joints: Vec<Joint>,
    link_index: HashMap<String, usize>,
    joint_index: HashMap<String, usize>,
    /// Parent link name -> joint indices, in parse order. Traversal order
    /// must be stable so repeated kinematics evaluation is deterministic.
    children: HashMap<String, Vec<usize>>,
    root_link: Option<String>,
}

impl RobotModel {
    /// Parse a robot from a URDF string. `base_dir` anchors mesh
    /// resolution.
    pub fn parse_str(xml: &str, base_dir: &Path) -> Result<Self, UrdfError> {
        let doc = RobotDoc::from_xml(xml)?;
        Ok(Self::from_doc(doc, base_dir))
    }

    /// Parse a robot from a URDF file; the file's directory anchors mesh
    /// resolution.
    pub fn parse_file(path: &Path) -> Result<Self, UrdfError> {
        let doc = RobotDoc::from_file(path)?;
        let base_dir = path.parent().unwrap_or(Path::new("."));
        Ok(Self::from_doc(doc, base_dir))
    }

    /// Build the runtime model from a raw document.
    pub fn from_doc(doc: RobotDoc, base_dir: &Path) -> Self {
        let links: Vec<Link> = doc.links.iter().map(|l| build_link(l, base_dir)).collect();
        let joints: Vec<Joint> = doc.joints.iter().map(build_joint).collect();

        let link_index = links
            .iter()
            .enumerate()
            .map(|(i, l)| (l.name.clone(), i))
            .collect();
        let joint_index = joints
            .iter()
            .enumerate()
            .map(|(i, j)| (j.name.clone(), i))
            .collect();

        let mut children: HashMap<String, Vec<usize>> = HashMap::new();
        for (i, joint) in joints.iter().enumerate() {
            children.entry(joint.parent_link.clone()).or_default().push(i);
        }

        let mut model = Self {
            name: doc.name,
            links,
            joints,
            link_index,
            joint_index,
            children,
            root_link: None,
        };
        model.build_hierarchy();

        info!(
            robot = %model.name,
            links = model.links.len(),
            joints = model.joints.len(),
            movable = model.movable_joint_count(),
            root = model.root_link.as_deref().unwrap_or("(none)"),
            "Robot model built"
        );
        model
    }

    /// Resolve the root link: the first parsed link that never appears as
    /// a joint's child. `None` when every link is referenced as a child;
    /// such a model must be rejected before kinematics.
    pub fn build_hierarchy(&mut self) {
        let child_names: std::collections::HashSet<&str> =
            self.joints.iter().map(|j| j.child_link.as_str()).collect();
        self.root_link = self
            .links
            .iter()
            .find(|l| !child_names.contains(l.name.as_str()))
            .map(|l| l.name.clone());
    }

    /// Root link name, or `UrdfError::NoRootLink` if hierarchy resolution
    /// failed.
    pub fn require_root(&self) -> Result<&str, UrdfError> {
        self.root_link.as_deref().ok_or(UrdfError::NoRootLink)
    }

    pub fn root_link(&self) -> Option<&str> {
        self.root_link.as_deref()
    }

    pub fn links(&self) -> &[Link] {
        &self.links
    }

    pub fn joints(&self) -> &[Joint] {
        &self.joints
    }

    pub fn link(&self, name: &str) -> Option<&Link> {
        self.link_index.get(name).map(|&i| &self.links[i])
    }

    pub fn joint(&self, name: &str) -> Option<&Joint> {
        self.joint_index.get(name).map(|&i| &self.joints[i])
    }

    /// Child joints of a link, in parse order.
    pub fn child_joints<'a>(&'a self, parent_link: &str) -> impl Iterator<Item = &'a Joint> + 'a {
        self.children
            .get(parent_link)
            .map(|v| v.as_slice())
            .unwrap_or(&[])
            .iter()
            .map(|&i| &self.joints[i])
    }

    pub fn movable_joint_count(&self) -> usize {
        self.joints.iter().filter(|j| j.is_movable()).count()
    }

    /// Write a joint position, clamped to the joint's limit. Returns the
    /// stored value, or an error for unknown joints.
    pub fn set_joint_position(&mut self, name: &str, value: f32) -> Result<f32, UrdfError> {
        let &idx = self
            .joint_index
            .get(name)
            .ok_or_else(|| UrdfError::UnknownJoint(name.to_string()))?;
        let joint = &mut self.joints[idx];
        let clamped = joint.clamp(value);
        joint.position = clamped;
        Ok(clamped)
    }

    /// Immediate visual override for manual/test use; bypasses
    /// retargeting but keeps the static limit clamp.
    pub fn set_joint_preview(&mut self, name: &str, value: f32) -> Result<f32, UrdfError> {
        self.set_joint_position(name, value)
    }

    /// Snapshot of revolute/continuous joint angles in radians, for
    /// external consumers such as motion recording.
    pub fn joint_positions_rad(&self) -> HashMap<String, f32> {
        self.joints
            .iter()
            .filter(|j| matches!(j.kind, JointKind::Revolute | JointKind::Continuous))
            .map(|j| (j.name.clone(), j.position))
            .collect()
    }

    /// Zero all joint positions and velocities.
    pub fn reset_physics(&mut self) {
        for joint in &mut self.joints {
            joint.position = 0.0;
            joint.velocity = 0.0;
        }
    }
}

fn build_link(el: &LinkEl, base_dir: &Path) -> Link {
    let visual = el.visual.as_ref().map(|v| {
        let (origin_xyz, origin_rpy) = match &v.origin {
            Some(o) => (
                o.xyz.as_deref().map_or(Vec3::ZERO, |s| parse_vec3(s, Vec3::ZERO)),
                o.rpy.as_deref().map_or(Vec3::ZERO, |s| parse_vec3(s, Vec3::ZERO)),
            ),
            None => (Vec3::ZERO, Vec3::ZERO),
        };
        let geometry = v.geometry.as_ref().and_then(|g| {
            if let Some(mesh) = &g.mesh {
                let resolved = resolve_mesh(&mesh.filename, base_dir);
                if resolved.is_none() {
                    warn!(
                        link = %el.name,
                        mesh = %mesh.filename,
                        "Mesh not resolved, link will render as a fallback primitive"
                    );
                }
                Some(Geometry::Mesh {
                    filename: mesh.filename.clone(),
                    resolved,
                    scale: mesh
                        .scale
                        .as_deref()
                        .map_or(Vec3::ONE, |s| parse_vec3(s, Vec3::ONE)),
                })
            } else if let Some(b) = &g.box_el {
                Some(Geometry::Box { size: parse_vec3(&b.size, Vec3::ZERO) })
            } else if let Some(c) = &g.cylinder {
                Some(Geometry::Cylinder { radius: c.radius, length: c.length })
            } else if let Some(s) = &g.sphere {
                Some(Geometry::Sphere { radius: s.radius })
            } else {
                None
            }
        });
        let color = v
            .material
            .as_ref()
            .and_then(|m| m.color.as_ref())
            .and_then(|c| parse_rgba(&c.rgba));
        Visual { origin_xyz, origin_rpy, geometry, color }
    });
    Link { name: el.name.clone(), visual }
}

fn build_joint(el: &JointEl) -> Joint {
    let (origin_xyz, origin_rpy) = match &el.origin {
        Some(o) => (
            o.xyz.as_deref().map_or(Vec3::ZERO, |s| parse_vec3(s, Vec3::ZERO)),
            o.rpy.as_deref().map_or(Vec3::ZERO, |s| parse_vec3(s, Vec3::ZERO)),
        ),
        None => (Vec3::ZERO, Vec3::ZERO),
    };

    let raw_axis = el
        .axis
        .as_ref()
        .map_or(Vec3::X, |a| parse_vec3(&a.xyz, Vec3::X));
    let axis = if raw_axis.length_squared() > 1e-8 {
        raw_axis.normalize()
    } else {
        warn!(joint = %el.name, "Degenerate joint axis, using +X");
        Vec3::X
    };

    let limit = el.limit.as_ref().map(|l| JointLimit {
        lower: l.lower.unwrap_or(0.0),
        upper: l.upper.unwrap_or(0.0),
        effort: l.effort.unwrap_or(0.0),
        velocity: l.velocity.unwrap_or(0.0),
    });

    Joint {
        name: el.name.clone(),
        kind: JointKind::parse(&el.joint_type, &el.name),
        parent_link: el.parent.as_ref().map(|p| p.link.clone()).unwrap_or_default(),
        child_link: el.child.as_ref().map(|c| c.link.clone()).unwrap_or_default(),
        origin_xyz,
        origin_rpy,
        axis,
        limit,
        damping: el.dynamics.as_ref().and_then(|d| d.damping).unwrap_or(0.0),
        friction: el.dynamics.as_ref().and_then(|d| d.friction).unwrap_or(0.0),
        position: 0.0,
        velocity: 0.0,
    }
}
