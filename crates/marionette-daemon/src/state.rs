//! Application state and the fixed-rate control loop
//!
//! All components are explicitly constructed and owned here; lifecycle is
//! start/stop on the state object, not lazily initialized globals.

use anyhow::{Context, Result};
use glam::Mat4;
use std::collections::HashMap;
use std::path::Path;
use std::sync::Arc;
use tokio::sync::RwLock;
use tracing::{info, warn};

use marionette_bridge::ControlLink;
use marionette_core::kinematics::{evaluate, RootFrame};
use marionette_core::model::Model;
use marionette_core::tracking::TrackingSource;
use marionette_retarget::RetargetEngine;
use marionette_vmc::VmcListener;

use crate::config::Config;

/// Outcome of one control tick, for logging and dry runs
#[derive(Debug, Clone, Copy, Default)]
pub struct TickReport {
    pub tracked_bones: usize,
    pub commanded_joints: usize,
    pub evaluated_links: usize,
}

/// Shared application state
pub struct AppState {
    /// Loaded model (kinematic or animated)
    pub model: Arc<RwLock<Model>>,
    /// VMC tracking receiver
    pub listener: Arc<VmcListener>,
    /// Retargeting engine
    pub engine: Arc<std::sync::RwLock<RetargetEngine>>,
    /// Outbound control link
    pub bridge: Arc<ControlLink>,
    /// Latest per-link world transforms, refreshed each tick for
    /// visualization consumers
    pub transforms: Arc<RwLock<HashMap<String, Mat4>>>,
    root_frame: RootFrame,
    pub config: Config,
}

impl AppState {
    /// Build all components from configuration. The model must load and
    /// the basis preset must resolve; everything else degrades at runtime.
    pub fn new(config: Config) -> Result<Arc<Self>> {
        let model = Model::load_from_dir(Path::new(&config.model.path))
            .with_context(|| format!("Loading model from {}", config.model.path))?;

        let listener = Arc::new(VmcListener::new(config.bone_aliases()));

        let mut engine = RetargetEngine::new(config.basis()?, config.conventions());
        for (bone, rotation) in config.calibration() {
            engine.set_calibration(&bone, rotation);
        }

        let bridge = Arc::new(ControlLink::new(config.bridge_config()));
        let root_frame = config.root_frame();

        Ok(Arc::new(Self {
            model: Arc::new(RwLock::new(model)),
            listener,
            engine: Arc::new(std::sync::RwLock::new(engine)),
            bridge,
            transforms: Arc::new(RwLock::new(HashMap::new())),
            root_frame,
            config,
        }))
    }

    /// Start the listener and the control link per configuration.
    pub async fn start(&self) -> Result<()> {
        if self.config.tracking.enabled {
            self.listener
                .start(&self.config.tracking.bind, self.config.tracking.port)
                .await?;
        }
        if self.config.bridge.enabled {
            self.bridge.start();
        }
        Ok(())
    }

    pub fn shutdown(&self) {
        self.listener.stop();
        self.bridge.shutdown();
        info!("Marionette shut down");
    }

    /// One control tick: retarget the latest snapshot into the model,
    /// hand the command frame to the bridge and refresh link transforms.
    pub async fn tick_once(&self) -> Result<TickReport> {
        let snapshot = self.listener.latest();
        let mut report = TickReport { tracked_bones: snapshot.len(), ..Default::default() };

        let mut model = self.model.write().await;
        let Some(robot) = model.as_kinematic_mut() else {
            // Animated models are rendered elsewhere; nothing to retarget
            return Ok(report);
        };

        let frame = self.engine.read().unwrap().tick(robot, &snapshot);
        report.commanded_joints = frame.len();

        let transforms = evaluate(robot, &self.root_frame)?;
        report.evaluated_links = transforms.len();
        drop(model);

        *self.transforms.write().await = transforms;

        if self.config.bridge.enabled && !frame.is_empty() {
            self.bridge.send_frame(&frame);
        }
        Ok(report)
    }

    /// Fixed-rate control loop with periodic status logging.
    pub async fn run_control_loop(&self) -> Result<()> {
        let mut ticker = tokio::time::interval(self.config.tick_period());
        let stats_every = self
            .config
            .control
            .stats_interval_secs
            .saturating_mul(self.config.control.tick_hz.max(1));
        let mut ticks: u64 = 0;

        info!(hz = self.config.control.tick_hz, "Control loop running");
        loop {
            ticker.tick().await;
            if let Err(e) = self.tick_once().await {
                warn!(error = %e, "Control tick failed");
            }

            ticks += 1;
            if stats_every > 0 && ticks % stats_every == 0 {
                self.log_status();
            }
        }
    }

    fn log_status(&self) {
        let diag = self.listener.diagnostics();
        let status = self.bridge.status();
        info!(
            tracking = ?diag.state,
            bones = diag.active_bones,
            packets = diag.total_packets,
            endpoint = %status.address,
            connected = status.connected,
            sent = status.stats.sent,
            failed = status.stats.failed,
            skipped = status.stats.delta_skipped,
            "Status"
        );
    }

    /// Immediate visual override for one joint, bypassing retargeting.
    pub async fn set_joint_preview(&self, name: &str, value: f32) -> Result<f32> {
        let mut model = self.model.write().await;
        let robot = model
            .as_kinematic_mut()
            .context("Preview requires a kinematic model")?;
        let stored = robot.set_joint_position(name, value)?;
        if self.config.bridge.enabled {
            self.bridge.set_joint(name, stored);
        }
        Ok(stored)
    }

    /// Snapshot of revolute/continuous joint angles in radians.
    pub async fn joint_positions_rad(&self) -> HashMap<String, f32> {
        let model = self.model.read().await;
        model
            .as_kinematic()
            .map(|robot| robot.joint_positions_rad())
            .unwrap_or_default()
    }

    /// Zero all joint positions and velocities.
    pub async fn reset_physics(&self) {
        let mut model = self.model.write().await;
        if let Some(robot) = model.as_kinematic_mut() {
            robot.reset_physics();
        }
    }
}
