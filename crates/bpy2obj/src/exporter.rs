//! OBJ export through a scoped temporary directory
//!
//! Engines export by writing files, so every export gets its own temporary
//! directory. The directory (and any sidecar files such as `.mtl`) is
//! removed when it goes out of scope, whatever the outcome.

use crate::engine::{ExportOptions, SceneEngine};
use crate::executor::{execute, ExecutionResult};
use std::path::Path;
use thiserror::Error;
use tracing::debug;

pub const OUTPUT_FILE: &str = "model.obj";

#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum ConvertError {
    /// Script fault, message passed through verbatim
    #[error("{0}")]
    Script(String),
    #[error("No objects created by the script")]
    NoObjects,
    #[error("Error exporting to OBJ: {0}")]
    Export(String),
    #[error("Blender error: {0}")]
    Launch(String),
    #[error("No output file was generated")]
    NoOutput,
    #[error("Script execution timed out after {0}s")]
    Timeout(u64),
    #[error("Engine unavailable: {0}")]
    Unavailable(String),
}

impl ConvertError {
    /// Faults caused by the request itself rather than the service
    pub fn is_client_error(&self) -> bool {
        !matches!(self, ConvertError::Unavailable(_))
    }
}

/// Export the scene described by a successful `result`
pub fn export_scene<E: SceneEngine + ?Sized>(
    engine: &mut E,
    result: &ExecutionResult,
    options: &ExportOptions,
) -> Result<Vec<u8>, ConvertError> {
    export_scene_in(engine, result, options, &std::env::temp_dir())
}

/// Same as [`export_scene`], with temporary files created under `parent`
pub fn export_scene_in<E: SceneEngine + ?Sized>(
    engine: &mut E,
    result: &ExecutionResult,
    options: &ExportOptions,
    parent: &Path,
) -> Result<Vec<u8>, ConvertError> {
    if !result.success {
        return Err(ConvertError::Script(
            result.error.clone().unwrap_or_default(),
        ));
    }
    if result.object_count == 0 {
        return Err(ConvertError::NoObjects);
    }

    let workdir = tempfile::Builder::new()
        .prefix("bpy2obj-")
        .tempdir_in(parent)
        .map_err(|e| ConvertError::Export(e.to_string()))?;
    let path = workdir.path().join(OUTPUT_FILE);

    engine
        .export_obj(&path, options)
        .map_err(|e| ConvertError::Export(e.to_string()))?;

    if !path.is_file() {
        return Err(ConvertError::Export(
            "engine did not write the output file".to_string(),
        ));
    }

    let bytes = std::fs::read(&path).map_err(|e| ConvertError::Export(e.to_string()))?;
    debug!("Read {} bytes of OBJ from {:?}", bytes.len(), path);
    Ok(bytes)
}

/// Execute `script` and export the resulting scene
pub fn convert<E: SceneEngine + ?Sized>(
    engine: &mut E,
    script: &str,
    options: &ExportOptions,
) -> Result<Vec<u8>, ConvertError> {
    convert_in(engine, script, options, &std::env::temp_dir())
}

pub fn convert_in<E: SceneEngine + ?Sized>(
    engine: &mut E,
    script: &str,
    options: &ExportOptions,
    parent: &Path,
) -> Result<Vec<u8>, ConvertError> {
    let result = execute(engine, script);
    export_scene_in(engine, &result, options, parent)
}
