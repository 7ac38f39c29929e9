//! Script execution: reset, run, summarize

use crate::engine::SceneEngine;
use serde::{Deserialize, Serialize};
use tracing::{debug, warn};

/// Outcome of one script run. `error` is only set when `success` is false.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ExecutionResult {
    pub success: bool,
    pub error: Option<String>,
    pub object_count: usize,
    pub object_names: Vec<String>,
}

impl ExecutionResult {
    pub fn succeeded(object_names: Vec<String>) -> Self {
        Self {
            success: true,
            error: None,
            object_count: object_names.len(),
            object_names,
        }
    }

    pub fn failed(error: impl Into<String>) -> Self {
        let mut error = error.into();
        if error.trim().is_empty() {
            error = "Script execution failed".to_string();
        }
        Self {
            success: false,
            error: Some(error),
            object_count: 0,
            object_names: Vec::new(),
        }
    }
}

/// Reset the engine, run `script`, and report what the scene holds.
///
/// Never fails: reset and script faults both land in `error`.
pub fn execute<E: SceneEngine + ?Sized>(engine: &mut E, script: &str) -> ExecutionResult {
    if let Err(e) = engine.reset() {
        warn!("Engine reset failed: {}", e);
        return ExecutionResult::failed(e.to_string());
    }

    match engine.run_script(script) {
        Ok(()) => {
            let names = engine.object_names();
            debug!("Script produced {} objects", names.len());
            ExecutionResult::succeeded(names)
        }
        Err(e) => {
            debug!("Script failed: {}", e);
            ExecutionResult::failed(e.to_string())
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::lua::{EngineConfig, LuaEngine};

    const CUBE: &str = "scene.cube{ size = 2, location = {0, 0, 0} }";

    fn engine() -> LuaEngine {
        LuaEngine::new(EngineConfig::default()).unwrap()
    }

    #[test]
    fn test_single_cube() {
        let result = execute(&mut engine(), CUBE);
        assert!(result.success);
        assert_eq!(result.error, None);
        assert_eq!(result.object_count, 1);
        assert_eq!(result.object_names.iter().filter(|n| *n == "Cube").count(), 1);
    }

    #[test]
    fn test_syntax_error() {
        let result = execute(&mut engine(), "scene.cube{ size = ");
        assert!(!result.success);
        assert!(result.error.as_deref().is_some_and(|e| !e.is_empty()));
        assert_eq!(result.object_count, 0);
    }

    #[test]
    fn test_runtime_error_discards_objects() {
        let result = execute(&mut engine(), "scene.cube()\nerror('boom')");
        assert!(!result.success);
        assert!(result.error.unwrap().contains("boom"));
        assert_eq!(result.object_count, 0);
        assert!(result.object_names.is_empty());
    }

    #[test]
    fn test_repeated_runs_are_identical() {
        let mut engine = engine();
        let script = "scene.cube()\nscene.plane{ location = {0, 0, 3} }";
        let first = execute(&mut engine, script);
        let second = execute(&mut engine, script);
        assert_eq!(first, second);
        assert_eq!(second.object_names, vec!["Cube", "Plane"]);
    }

    #[test]
    fn test_empty_script_succeeds_with_no_objects() {
        let result = execute(&mut engine(), "");
        assert!(result.success);
        assert_eq!(result.object_count, 0);
    }

    #[test]
    fn test_blank_error_gets_default_message() {
        let result = ExecutionResult::failed("  ");
        assert_eq!(result.error.as_deref(), Some("Script execution failed"));
    }
}
