//! Marionette VMC - Pose tracking receiver
//!
//! Receives VMC-protocol (OSC over UDP) bone pose updates and publishes
//! them as atomic tracking snapshots readable from any thread.

pub mod listener;
pub mod osc;

pub use listener::{ListenerDiagnostics, ListenerError, ListenerState, VmcListener};
pub use osc::{decode_packet, parse_bone_pose, BonePose, OscArg, OscMessage};
