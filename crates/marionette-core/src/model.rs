//! Loaded model variants
//!
//! A model directory holds either a kinematic robot description
//! (`robot.urdf`) or an animated character (`model.pmx` / `model.pmd`).
//! The two share almost no behavior, so they are a tagged union dispatched
//! by matching rather than a class hierarchy.

use std::path::{Path, PathBuf};
use thiserror::Error;
use tracing::info;

use crate::robot::RobotModel;
use crate::urdf::UrdfError;

#[derive(Error, Debug)]
pub enum ModelError {
    #[error("No model found in {0} (looked for robot.urdf, model.pmx, model.pmd)")]
    NotFound(PathBuf),
    #[error(transparent)]
    Urdf(#[from] UrdfError),
}

/// Animated character formats carried for completeness; playback is an
/// external concern.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AnimatedFormat {
    Pmx,
    Pmd,
}

/// An animated (non-kinematic) model reference.
#[derive(Debug, Clone)]
pub struct AnimatedModel {
    pub name: String,
    pub dir: PathBuf,
    pub file: PathBuf,
    pub format: AnimatedFormat,
}

/// A loaded model.
#[derive(Debug, Clone)]
pub enum Model {
    Kinematic(RobotModel),
    Animated(AnimatedModel),
}

impl Model {
    /// Probe a model directory: `robot.urdf` first, then `model.pmx`,
    /// then `model.pmd`.
    pub fn load_from_dir(dir: &Path) -> Result<Self, ModelError> {
        let urdf = dir.join("robot.urdf");
        if urdf.is_file() {
            let robot = RobotModel::parse_file(&urdf)?;
            // A kinematic model without a root cannot be animated or
            // controlled; reject it at load time.
            robot.require_root()?;
            info!(path = %urdf.display(), robot = %robot.name, "Loaded kinematic model");
            return Ok(Self::Kinematic(robot));
        }

        for (file_name, format) in [("model.pmx", AnimatedFormat::Pmx), ("model.pmd", AnimatedFormat::Pmd)] {
            let file = dir.join(file_name);
            if file.is_file() {
                let name = dir
                    .file_name()
                    .map(|n| n.to_string_lossy().into_owned())
                    .unwrap_or_else(|| "model".to_string());
                info!(path = %file.display(), "Loaded animated model");
                return Ok(Self::Animated(AnimatedModel {
                    name,
                    dir: dir.to_path_buf(),
                    file,
                    format,
                }));
            }
        }

        Err(ModelError::NotFound(dir.to_path_buf()))
    }

    pub fn name(&self) -> &str {
        match self {
            Self::Kinematic(robot) => &robot.name,
            Self::Animated(animated) => &animated.name,
        }
    }

    pub fn as_kinematic(&self) -> Option<&RobotModel> {
        match self {
            Self::Kinematic(robot) => Some(robot),
            Self::Animated(_) => None,
        }
    }

    pub fn as_kinematic_mut(&mut self) -> Option<&mut RobotModel> {
        match self {
            Self::Kinematic(robot) => Some(robot),
            Self::Animated(_) => None,
        }
    }
}
