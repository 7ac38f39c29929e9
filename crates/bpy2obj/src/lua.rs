//! Embedded engine: Lua 5.4 with a `scene` modelling API
//!
//! Scripts build the scene through the `scene` global:
//!
//! ```lua
//! local red = scene.material{ name = "Red", color = {0.8, 0.2, 0.2, 1} }
//! scene.cube{ size = 2, location = {0, 0, 0}, material = red }
//! scene.mesh{ name = "Tri", vertices = {{0,0,0}, {1,0,0}, {0,1,0}}, faces = {{1,2,3}} }
//! ```
//!
//! Scripts run with the full Lua standard library; there is no sandbox.

use crate::engine::{EngineError, ExportOptions, SceneEngine};
use crate::scene::{Mesh, Scene};
use mlua::{HookTriggers, Lua, LuaSerdeExt, Table, Value};
use std::cell::{Cell, RefCell};
use std::fs::File;
use std::io::{BufWriter, Write};
use std::path::Path;
use std::rc::Rc;
use std::time::{Duration, Instant};
use tracing::{debug, info};

const TIMEOUT_MESSAGE: &str = "script execution timed out";

/// Embedded engine limits
#[derive(Debug, Clone)]
pub struct EngineConfig {
    /// Wall-clock limit for one script run
    pub timeout: Duration,
    /// VM instructions between deadline checks
    pub hook_interval: u32,
    /// Interpreter heap limit in bytes
    pub memory_limit: Option<usize>,
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            timeout: Duration::from_secs(60),
            hook_interval: 10_000,
            memory_limit: Some(512 * 1024 * 1024),
        }
    }
}

pub struct LuaEngine {
    lua: Lua,
    scene: Rc<RefCell<Scene>>,
    deadline: Rc<Cell<Option<Instant>>>,
    config: EngineConfig,
}

impl LuaEngine {
    pub fn new(config: EngineConfig) -> Result<Self, EngineError> {
        let scene = Rc::new(RefCell::new(Scene::new()));
        let deadline = Rc::new(Cell::new(None));
        let lua = build_runtime(&scene, &deadline, &config)
            .map_err(|e| EngineError::Reset(e.to_string()))?;

        Ok(Self {
            lua,
            scene,
            deadline,
            config,
        })
    }

    /// Borrow the current scene
    pub fn scene(&self) -> std::cell::Ref<'_, Scene> {
        self.scene.borrow()
    }
}

impl SceneEngine for LuaEngine {
    fn reset(&mut self) -> Result<(), EngineError> {
        // A fresh interpreter drops every global the previous script left behind
        self.scene.borrow_mut().clear();
        self.deadline.set(None);
        self.lua = build_runtime(&self.scene, &self.deadline, &self.config)
            .map_err(|e| EngineError::Reset(e.to_string()))?;
        Ok(())
    }

    fn run_script(&mut self, script: &str) -> Result<(), EngineError> {
        let limit = Instant::now() + self.config.timeout;
        self.deadline.set(Some(limit));
        let outcome = self.lua.load(script).set_name("script").exec();
        self.deadline.set(None);

        match outcome {
            Ok(()) => Ok(()),
            Err(_) if Instant::now() >= limit => Err(EngineError::Timeout(self.config.timeout)),
            Err(e) => Err(EngineError::Script(e.to_string())),
        }
    }

    fn object_names(&self) -> Vec<String> {
        self.scene.borrow().object_names()
    }

    fn export_obj(&mut self, path: &Path, options: &ExportOptions) -> Result<(), EngineError> {
        let scene = self.scene.borrow();

        let mtl_path = (options.include_materials && scene.uses_materials())
            .then(|| path.with_extension("mtl"));
        let mtl_name = mtl_path
            .as_deref()
            .and_then(|p| p.file_name())
            .and_then(|n| n.to_str());

        let mut writer = BufWriter::new(File::create(path)?);
        scene.write_obj(&mut writer, options, mtl_name)?;
        writer.flush()?;

        if let Some(mtl_path) = &mtl_path {
            let mut writer = BufWriter::new(File::create(mtl_path)?);
            scene.write_mtl(&mut writer)?;
            writer.flush()?;
        }

        info!(
            "Exported OBJ: {} objects to {:?}",
            scene.object_names().len(),
            path
        );
        Ok(())
    }
}

fn build_runtime(
    scene: &Rc<RefCell<Scene>>,
    deadline: &Rc<Cell<Option<Instant>>>,
    config: &EngineConfig,
) -> mlua::Result<Lua> {
    let lua = Lua::new();

    if let Some(limit) = config.memory_limit {
        lua.set_memory_limit(limit)?;
    }

    let d = deadline.clone();
    lua.set_hook(
        HookTriggers::new().every_nth_instruction(config.hook_interval),
        move |_, _| {
            if past_deadline(&d) {
                Err(mlua::Error::RuntimeError(TIMEOUT_MESSAGE.into()))
            } else {
                Ok(())
            }
        },
    );

    install_deadline_guard(&lua, deadline)?;
    install_scene_api(&lua, scene)?;
    debug!("Lua runtime ready");
    Ok(lua)
}

fn past_deadline(deadline: &Cell<Option<Instant>>) -> bool {
    deadline.get().is_some_and(|limit| Instant::now() >= limit)
}

/// Protected calls re-raise once the deadline has passed, so a script cannot
/// swallow the timeout and keep looping.
const DEADLINE_GUARD: &str = r#"
local timed_out, message = ...
local raw_pcall, raw_xpcall, raw_resume, error = pcall, xpcall, coroutine.resume, error

local function guard(...)
    if timed_out() then
        error(message, 0)
    end
    return ...
end

pcall = function(...) return guard(raw_pcall(...)) end
xpcall = function(...) return guard(raw_xpcall(...)) end
coroutine.resume = function(...) return guard(raw_resume(...)) end
"#;

fn install_deadline_guard(lua: &Lua, deadline: &Rc<Cell<Option<Instant>>>) -> mlua::Result<()> {
    let d = deadline.clone();
    let timed_out = lua.create_function(move |_, ()| Ok(past_deadline(&d)))?;
    lua.load(DEADLINE_GUARD)
        .set_name("deadline_guard")
        .call::<_, ()>((timed_out, TIMEOUT_MESSAGE))
}

struct ObjectArgs {
    name: String,
    size: f64,
    location: [f64; 3],
    material: Option<String>,
}

fn object_args(args: Option<&Table>, default_name: &str) -> mlua::Result<ObjectArgs> {
    let mut parsed = ObjectArgs {
        name: default_name.to_string(),
        size: 2.0,
        location: [0.0; 3],
        material: None,
    };

    if let Some(t) = args {
        if let Some(name) = t.get::<_, Option<String>>("name")? {
            parsed.name = name;
        }
        if let Some(size) = t.get::<_, Option<f64>>("size")? {
            parsed.size = size;
        }
        if let Some(location) = t.get::<_, Option<[f64; 3]>>("location")? {
            parsed.location = location;
        }
        parsed.material = t.get("material")?;
    }

    if !(parsed.size.is_finite() && parsed.size > 0.0) {
        return Err(mlua::Error::RuntimeError(format!(
            "size must be a positive number, got {}",
            parsed.size
        )));
    }
    Ok(parsed)
}

fn add_object(
    scene: &Rc<RefCell<Scene>>,
    args: ObjectArgs,
    mesh: Mesh,
) -> mlua::Result<String> {
    scene
        .borrow_mut()
        .add_object(&args.name, mesh, args.location, args.material)
        .map_err(mlua::Error::RuntimeError)
}

fn install_scene_api(lua: &Lua, scene: &Rc<RefCell<Scene>>) -> mlua::Result<()> {
    let api = lua.create_table()?;

    let s = scene.clone();
    api.set(
        "cube",
        lua.create_function(move |_, args: Option<Table>| {
            let args = object_args(args.as_ref(), "Cube")?;
            let mesh = Mesh::cube(args.size);
            add_object(&s, args, mesh)
        })?,
    )?;

    let s = scene.clone();
    api.set(
        "plane",
        lua.create_function(move |_, args: Option<Table>| {
            let args = object_args(args.as_ref(), "Plane")?;
            let mesh = Mesh::plane(args.size);
            add_object(&s, args, mesh)
        })?,
    )?;

    let s = scene.clone();
    api.set(
        "mesh",
        lua.create_function(move |_, args: Table| {
            let vertices: Vec<[f64; 3]> = args.get("vertices")?;
            let faces: Vec<Vec<usize>> = args.get("faces")?;
            // Lua indices are 1-based
            let faces = faces
                .into_iter()
                .map(|face| {
                    face.into_iter()
                        .map(|i| {
                            i.checked_sub(1).ok_or_else(|| {
                                mlua::Error::RuntimeError("face indices start at 1".into())
                            })
                        })
                        .collect::<mlua::Result<Vec<usize>>>()
                })
                .collect::<mlua::Result<Vec<_>>>()?;

            let object = object_args(Some(&args), "Mesh")?;
            add_object(&s, object, Mesh { vertices, faces })
        })?,
    )?;

    let s = scene.clone();
    api.set(
        "material",
        lua.create_function(move |_, args: Option<Table>| {
            let (name, color) = match args {
                Some(t) => (
                    t.get::<_, Option<String>>("name")?
                        .unwrap_or_else(|| "Material".to_string()),
                    t.get::<_, Option<Vec<f64>>>("color")?,
                ),
                None => ("Material".to_string(), None),
            };
            let color = match color.as_deref() {
                None => [0.8, 0.8, 0.8, 1.0],
                Some([r, g, b]) => [*r, *g, *b, 1.0],
                Some([r, g, b, a]) => [*r, *g, *b, *a],
                Some(other) => {
                    return Err(mlua::Error::RuntimeError(format!(
                        "color needs 3 or 4 components, got {}",
                        other.len()
                    )))
                }
            };
            s.borrow_mut()
                .add_material(&name, color)
                .map_err(mlua::Error::RuntimeError)
        })?,
    )?;

    let s = scene.clone();
    api.set(
        "objects",
        lua.create_function(move |_, ()| Ok(s.borrow().object_names()))?,
    )?;

    let s = scene.clone();
    api.set(
        "describe",
        lua.create_function(move |lua, name: String| match s.borrow().describe(&name) {
            Some(info) => lua.to_value(&info),
            None => Ok(Value::Nil),
        })?,
    )?;

    let s = scene.clone();
    api.set(
        "remove",
        lua.create_function(move |_, name: String| Ok(s.borrow_mut().remove_object(&name)))?,
    )?;

    let s = scene.clone();
    api.set(
        "clear",
        lua.create_function(move |_, ()| {
            s.borrow_mut().clear();
            Ok(())
        })?,
    )?;

    lua.globals().set("scene", api)?;
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    fn engine() -> LuaEngine {
        LuaEngine::new(EngineConfig::default()).unwrap()
    }

    #[test]
    fn test_cube_script() {
        let mut engine = engine();
        engine
            .run_script("scene.cube{ size = 2, location = {0, 0, 0} }")
            .unwrap();
        assert_eq!(engine.object_names(), vec!["Cube"]);
    }

    #[test]
    fn test_reset_clears_scene_and_globals() {
        let mut engine = engine();
        engine.run_script("counter = 41; scene.cube()").unwrap();
        engine.reset().unwrap();
        assert!(engine.object_names().is_empty());

        // The old global is gone after a reset
        let err = engine.run_script("counter = counter + 1").unwrap_err();
        assert!(matches!(err, EngineError::Script(_)));
    }

    #[test]
    fn test_syntax_error_is_reported() {
        let mut engine = engine();
        let err = engine.run_script("if true then scene.cube(").unwrap_err();
        match err {
            EngineError::Script(msg) => assert!(!msg.is_empty()),
            other => panic!("Expected script error, got {:?}", other),
        }
    }

    #[test]
    fn test_custom_mesh_and_material() {
        let mut engine = engine();
        engine
            .run_script(
                r#"
                local red = scene.material{ name = "Red", color = {1, 0, 0} }
                scene.mesh{
                    name = "Tri",
                    vertices = {{0, 0, 0}, {1, 0, 0}, {0, 1, 0}},
                    faces = {{1, 2, 3}},
                    material = red,
                }
                local info = scene.describe("Tri")
                assert(info.vertex_count == 3)
                assert(info.material == "Red")
                "#,
            )
            .unwrap();
        assert_eq!(engine.object_names(), vec!["Tri"]);
    }

    #[test]
    fn test_bad_face_index() {
        let mut engine = engine();
        let err = engine
            .run_script("scene.mesh{ vertices = {{0,0,0},{1,0,0},{0,1,0}}, faces = {{0, 1, 2}} }")
            .unwrap_err();
        assert!(err.to_string().contains("face indices start at 1"));
    }

    #[test]
    fn test_negative_size_rejected() {
        let mut engine = engine();
        let err = engine.run_script("scene.cube{ size = -1 }").unwrap_err();
        assert!(err.to_string().contains("size must be a positive number"));
    }

    #[test]
    fn test_timeout_aborts_script() {
        let mut engine = LuaEngine::new(EngineConfig {
            timeout: Duration::from_millis(100),
            hook_interval: 1_000,
            memory_limit: None,
        })
        .unwrap();
        let err = engine.run_script("while true do end").unwrap_err();
        assert!(matches!(err, EngineError::Timeout(_)));

        // The engine stays usable afterwards
        engine.reset().unwrap();
        engine.run_script("scene.plane()").unwrap();
        assert_eq!(engine.object_names(), vec!["Plane"]);
    }

    fn quick_timeout_engine() -> LuaEngine {
        LuaEngine::new(EngineConfig {
            timeout: Duration::from_millis(100),
            hook_interval: 1_000,
            memory_limit: None,
        })
        .unwrap()
    }

    #[test]
    fn test_pcall_cannot_swallow_timeout() {
        let mut engine = quick_timeout_engine();
        let err = engine
            .run_script("while true do pcall(function() while true do end end) end")
            .unwrap_err();
        assert!(matches!(err, EngineError::Timeout(_)));
    }

    #[test]
    fn test_xpcall_cannot_swallow_timeout() {
        let mut engine = quick_timeout_engine();
        let err = engine
            .run_script(
                "while true do xpcall(function() while true do end end, function(e) return e end) end",
            )
            .unwrap_err();
        assert!(matches!(err, EngineError::Timeout(_)));
    }

    #[test]
    fn test_pcall_still_catches_script_errors() {
        let mut engine = engine();
        engine
            .run_script(
                r#"
                local ok, err = pcall(error, "boom")
                assert(not ok and err:find("boom"))
                local ok2, value = xpcall(function() return 7 end, print)
                assert(ok2 and value == 7)
                local co = coroutine.create(function(a) return a + 1 end)
                local ok3, n = coroutine.resume(co, 1)
                assert(ok3 and n == 2)
                scene.cube()
                "#,
            )
            .unwrap();
        assert_eq!(engine.object_names(), vec!["Cube"]);
    }

    #[test]
    fn test_export_writes_sidecar_mtl() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("model.obj");

        let mut engine = engine();
        engine
            .run_script(r#"scene.cube{ material = scene.material{ name = "Red" } }"#)
            .unwrap();
        engine.export_obj(&path, &ExportOptions::default()).unwrap();

        let obj = std::fs::read_to_string(&path).unwrap();
        assert!(obj.contains("mtllib model.mtl"));
        assert!(dir.path().join("model.mtl").is_file());
    }
}
