//! Marionette Retarget - Tracking-to-joint retargeting
//!
//! Converts tracked humanoid bone orientations into robot joint angles:
//! configurable basis transform, chain-relative locals, twist decomposition
//! around each joint's axis, calibration offsets and limit clamping.

pub mod basis;
pub mod engine;
pub mod twist;

pub use basis::BasisTransform;
pub use engine::{ArmConventions, HeadConventions, JointFrame, LimbConventions, RetargetEngine};
pub use twist::{remove_rotation, twist_angle, twist_rotation, wrap_angle};
