//! Marionette Core - Robot model, URDF parsing and forward kinematics
//!
//! This crate provides the foundational types for the Marionette system:
//! - URDF parsing into a kinematic robot model with mesh resolution
//! - Forward kinematics producing per-link world transforms
//! - Tracking snapshot types shared between the pose receiver and the
//!   retargeting engine

pub mod kinematics;
pub mod mesh;
pub mod model;
pub mod robot;
pub mod tracking;
pub mod urdf;

pub use kinematics::{evaluate, upright_rotation, RootFrame};
pub use model::{AnimatedModel, Model, ModelError};
pub use robot::{Geometry, Joint, JointKind, JointLimit, Link, RobotModel, Visual};
pub use tracking::{BoneAliases, BoneTransform, TrackingSnapshot, TrackingSource, STANDARD_BONES};
pub use urdf::{RobotDoc, UrdfError};
