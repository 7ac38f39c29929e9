//! bpy2obj: run scene scripts against a 3D engine and export OBJ meshes
//!
//! This crate provides:
//! - The engine contract (reset, run script, list objects, export OBJ)
//! - An embedded Lua engine with a small modelling API
//! - The execute → export lifecycle with scoped temporary files
//! - A headless Blender launcher driven by a generated wrapper script
//!
//! Every script runs against a freshly reset scene. Scripts are trusted
//! code with the engine's full scripting privileges; nothing here
//! sandboxes them beyond the process boundary.

pub mod engine;
pub mod scene;
pub mod lua;
pub mod executor;
pub mod exporter;
pub mod normalize;
pub mod wrapper;
pub mod launcher;

pub use engine::{EngineError, ExportOptions, SceneEngine};
pub use lua::{EngineConfig, LuaEngine};
pub use executor::{execute, ExecutionResult};
pub use exporter::{convert, convert_in, export_scene, export_scene_in, ConvertError};
pub use normalize::normalize_script;
pub use wrapper::{render_wrapper, WrapperRequest};
pub use launcher::{BlenderLauncher, LaunchError, LauncherConfig};

/// Interchange format name reported to clients
pub const FORMAT: &str = "obj";

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_convert_through_public_api() {
        let mut engine = LuaEngine::new(EngineConfig::default()).unwrap();
        let bytes = convert(&mut engine, "scene.cube()", &ExportOptions::default()).unwrap();
        assert!(String::from_utf8(bytes).unwrap().contains("o Cube"));
    }
}
