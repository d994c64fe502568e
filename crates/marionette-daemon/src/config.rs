//! Configuration loading and validation

use anyhow::{bail, Result};
use glam::{Quat, Vec3};
use marionette_bridge::BridgeConfig;
use marionette_core::kinematics::{upright_rotation, RootFrame};
use marionette_core::tracking::BoneAliases;
use marionette_retarget::{BasisTransform, LimbConventions};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::path::Path;
use std::time::Duration;
use tracing::info;

/// Main configuration structure
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct Config {
    #[serde(default)]
    pub tracking: TrackingConfig,
    #[serde(default)]
    pub bridge: BridgeSection,
    #[serde(default)]
    pub model: ModelConfig,
    #[serde(default)]
    pub retarget: RetargetSection,
    #[serde(default)]
    pub control: ControlConfig,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TrackingConfig {
    /// Start the VMC listener at boot
    #[serde(default = "default_true")]
    pub enabled: bool,
    /// Bind address for the UDP socket
    #[serde(default = "default_tracking_bind")]
    pub bind: String,
    /// VMC protocol port
    #[serde(default = "default_tracking_port")]
    pub port: u16,
}

impl Default for TrackingConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            bind: default_tracking_bind(),
            port: default_tracking_port(),
        }
    }
}

fn default_tracking_bind() -> String {
    "0.0.0.0".to_string()
}

fn default_tracking_port() -> u16 {
    39539
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct BridgeSection {
    /// Send command frames to the actuation endpoint
    #[serde(default = "default_true")]
    pub enabled: bool,
    #[serde(default = "default_bridge_host")]
    pub host: String,
    #[serde(default = "default_bridge_port")]
    pub port: u16,
    /// Flush loop rate in Hz
    #[serde(default = "default_flush_hz")]
    pub flush_hz: u64,
    /// Consecutive failures before the link reports disconnected
    #[serde(default = "default_max_failures")]
    pub max_failures: u32,
}

impl Default for BridgeSection {
    fn default() -> Self {
        Self {
            enabled: true,
            host: default_bridge_host(),
            port: default_bridge_port(),
            flush_hz: default_flush_hz(),
            max_failures: default_max_failures(),
        }
    }
}

fn default_bridge_host() -> String {
    "localhost".to_string()
}

fn default_bridge_port() -> u16 {
    8080
}

fn default_flush_hz() -> u64 {
    50
}

fn default_max_failures() -> u32 {
    10
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ModelConfig {
    /// Model directory (robot.urdf or model.pmx/model.pmd inside)
    #[serde(default = "default_model_path")]
    pub path: String,
    /// Uniform scale applied at the kinematic root
    #[serde(default = "default_scale")]
    pub scale: f32,
    /// Optional convention alignment applied once at the root
    #[serde(default)]
    pub upright: Option<UprightConfig>,
}

impl Default for ModelConfig {
    fn default() -> Self {
        Self {
            path: default_model_path(),
            scale: default_scale(),
            upright: None,
        }
    }
}

fn default_model_path() -> String {
    "./models/robot".to_string()
}

fn default_scale() -> f32 {
    1.0
}

/// Source and destination (up, forward) pairs for the root alignment
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct UprightConfig {
    pub src_up: [f32; 3],
    pub src_forward: [f32; 3],
    pub dst_up: [f32; 3],
    pub dst_forward: [f32; 3],
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RetargetSection {
    /// Basis preset: "identity" or "unity_to_ros"
    #[serde(default = "default_basis_preset")]
    pub basis_preset: String,
    #[serde(default = "default_scale")]
    pub position_scale: f32,
    /// Extra wire-name aliases (alias -> canonical bone)
    #[serde(default)]
    pub aliases: HashMap<String, String>,
    /// Per-bone rest-pose calibration quaternions as [x, y, z, w]
    #[serde(default)]
    pub calibration: HashMap<String, [f32; 4]>,
    /// Full override of the per-limb axis/sign conventions
    #[serde(default)]
    pub conventions: Option<LimbConventions>,
}

impl Default for RetargetSection {
    fn default() -> Self {
        Self {
            basis_preset: default_basis_preset(),
            position_scale: default_scale(),
            aliases: HashMap::new(),
            calibration: HashMap::new(),
            conventions: None,
        }
    }
}

fn default_basis_preset() -> String {
    "unity_to_ros".to_string()
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ControlConfig {
    /// Retargeting tick rate in Hz
    #[serde(default = "default_tick_hz")]
    pub tick_hz: u64,
    /// Seconds between periodic status log lines (0 disables)
    #[serde(default = "default_stats_interval")]
    pub stats_interval_secs: u64,
}

impl Default for ControlConfig {
    fn default() -> Self {
        Self {
            tick_hz: default_tick_hz(),
            stats_interval_secs: default_stats_interval(),
        }
    }
}

fn default_tick_hz() -> u64 {
    50
}

fn default_stats_interval() -> u64 {
    5
}

fn default_true() -> bool {
    true
}

impl Config {
    /// Resolve the configured basis preset. Unknown names are a
    /// configuration error, not a silent fallback.
    pub fn basis(&self) -> Result<BasisTransform> {
        let Some(basis) = BasisTransform::from_preset(&self.retarget.basis_preset) else {
            bail!("Unknown basis preset '{}'", self.retarget.basis_preset);
        };
        Ok(BasisTransform::new(basis.matrix(), self.retarget.position_scale))
    }

    /// Alias normalizer extended with configured entries.
    pub fn bone_aliases(&self) -> BoneAliases {
        BoneAliases::default().with_extra(
            self.retarget
                .aliases
                .iter()
                .map(|(a, c)| (a.as_str(), c.as_str())),
        )
    }

    /// Per-bone calibration rotations (normalized).
    pub fn calibration(&self) -> Vec<(String, Quat)> {
        self.retarget
            .calibration
            .iter()
            .map(|(bone, q)| {
                (
                    bone.clone(),
                    Quat::from_xyzw(q[0], q[1], q[2], q[3]).normalize(),
                )
            })
            .collect()
    }

    /// Limb conventions: the configured override, or the defaults.
    pub fn conventions(&self) -> LimbConventions {
        self.retarget.conventions.clone().unwrap_or_default()
    }

    pub fn bridge_config(&self) -> BridgeConfig {
        BridgeConfig {
            host: self.bridge.host.clone(),
            port: self.bridge.port,
            flush_hz: self.bridge.flush_hz,
            max_failures: self.bridge.max_failures,
            ..Default::default()
        }
    }

    /// Root pose composed from scale and the optional upright alignment.
    pub fn root_frame(&self) -> RootFrame {
        let upright = match &self.model.upright {
            Some(u) => upright_rotation(
                Vec3::from_array(u.src_up),
                Vec3::from_array(u.src_forward),
                Vec3::from_array(u.dst_up),
                Vec3::from_array(u.dst_forward),
            ),
            None => Quat::IDENTITY,
        };
        RootFrame { scale: self.model.scale, upright }
    }

    pub fn tick_period(&self) -> Duration {
        Duration::from_millis(1000 / self.control.tick_hz.max(1))
    }
}

/// Load configuration from file
pub fn load_config(path: &Path) -> Result<Config> {
    if path.exists() {
        let content = std::fs::read_to_string(path)?;
        let config: Config = toml::from_str(&content)?;
        info!(path = %path.display(), "Loaded configuration");
        Ok(config)
    } else {
        info!(
            path = %path.display(),
            "Configuration file not found, using defaults"
        );
        Ok(Config::default())
    }
}

/// Save default configuration to file
pub fn save_default_config(path: &Path) -> Result<()> {
    let config = Config::default();
    let content = toml::to_string_pretty(&config)?;
    std::fs::write(path, content)?;
    Ok(())
}
