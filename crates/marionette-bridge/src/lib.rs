//! Marionette Bridge - Outbound control link
//!
//! Delivers joint command frames to a remote actuation endpoint over its
//! text query protocol, with batching, delta filtering, rate limiting and
//! automatic reconnect handling.

pub mod link;
pub mod mapping;

pub use link::{BridgeConfig, BridgeStats, BridgeStatus, ControlLink};
pub use mapping::{plan_frame, JointMapping, JointTable, ValueMap, NUM_MOTORS};
