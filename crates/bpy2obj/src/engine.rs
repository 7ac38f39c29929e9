//! Engine contract: the four operations the converter relies on
//!
//! Any 3D engine that can reset its scene, run script text, list scene
//! objects and write the scene as an OBJ file can sit behind this trait.

use serde::{Deserialize, Serialize};
use std::path::Path;
use std::time::Duration;
use thiserror::Error;

/// OBJ export switches passed through to the engine
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct ExportOptions {
    /// Write material references (and a sidecar .mtl when the engine supports it)
    pub include_materials: bool,
    /// Write vertex normals
    pub include_normals: bool,
    /// Split polygons into triangles
    pub triangulate: bool,
}

impl Default for ExportOptions {
    fn default() -> Self {
        Self {
            include_materials: true,
            include_normals: true,
            triangulate: false,
        }
    }
}

#[derive(Debug, Error)]
pub enum EngineError {
    #[error("failed to reset engine: {0}")]
    Reset(String),
    #[error("{0}")]
    Script(String),
    #[error("script execution timed out after {}s", .0.as_secs())]
    Timeout(Duration),
    #[error("{0}")]
    Export(String),
    #[error(transparent)]
    Io(#[from] std::io::Error),
}

/// A stateful 3D engine holding exactly one scene.
///
/// Implementations are not expected to be shareable; callers serialize
/// access (one reset/run/export cycle at a time).
pub trait SceneEngine {
    /// Return to an empty scene: no objects, meshes, materials or images.
    fn reset(&mut self) -> Result<(), EngineError>;

    /// Run caller script text against the current scene.
    fn run_script(&mut self, script: &str) -> Result<(), EngineError>;

    /// Names of the objects in the scene, in scene order.
    fn object_names(&self) -> Vec<String>;

    /// Write the whole scene to `path` as OBJ.
    fn export_obj(&mut self, path: &Path, options: &ExportOptions) -> Result<(), EngineError>;
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_export_options() {
        let options = ExportOptions::default();
        assert!(options.include_materials);
        assert!(options.include_normals);
        assert!(!options.triangulate);
    }

    #[test]
    fn test_timeout_message() {
        let err = EngineError::Timeout(Duration::from_secs(30));
        assert_eq!(err.to_string(), "script execution timed out after 30s");
    }
}
