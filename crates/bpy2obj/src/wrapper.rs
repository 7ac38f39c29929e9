//! Blender wrapper script generation
//!
//! The wrapper resets Blender to an empty scene, runs the caller's script,
//! prints one result line and optionally exports the scene to OBJ. The
//! caller's script and the output path are embedded as string literals and
//! run through `exec(compile(...))`, so script text cannot change the
//! wrapper's own structure or where the export goes.

use crate::engine::ExportOptions;
use anyhow::{Context, Result};
use minijinja::{context, Environment};
use serde::{Deserialize, Serialize};
use std::path::Path;

/// Prefix of the single result line the wrapper prints on stdout
pub const RESULT_MARKER: &str = "BPY2OBJ_RESULT ";

const WRAPPER_TEMPLATE: &str = r##"# Generated by bpy2obj at {{ timestamp }}
# Runs one caller script against an empty scene{% if export %} and exports it to OBJ{% endif %}.

import json
import sys

import bpy

SCRIPT = {{ script }}
OUTPUT_PATH = {{ output_path }}
RESULT_MARKER = {{ marker }}


def reset_scene():
    bpy.ops.wm.read_factory_settings(use_empty=True)
    for obj in list(bpy.data.objects):
        bpy.data.objects.remove(obj, do_unlink=True)
    for blocks in (bpy.data.meshes, bpy.data.materials, bpy.data.textures, bpy.data.images):
        for block in list(blocks):
            blocks.remove(block)


def export_obj(path):
    if hasattr(bpy.ops.wm, "obj_export"):
        bpy.ops.wm.obj_export(
            filepath=path,
            export_selected_objects=False,
            export_materials={{ include_materials }},
            export_normals={{ include_normals }},
            export_triangulated_mesh={{ triangulate }},
        )
    else:
        bpy.ops.export_scene.obj(
            filepath=path,
            use_selection=False,
            use_materials={{ include_materials }},
            use_normals={{ include_normals }},
            use_triangles={{ triangulate }},
        )


def report(**fields):
    sys.stdout.write(RESULT_MARKER + json.dumps(fields) + "\n")
    sys.stdout.flush()


reset_scene()

try:
    exec(compile(SCRIPT, "<script>", "exec"), {"__name__": "__main__"})
except BaseException as exc:
    report(success=False, error=str(exc) or type(exc).__name__, objects=[], export_error=None)
    sys.exit(1)

objects = [obj.name for obj in bpy.context.scene.objects]
export_error = None
{% if export %}

if objects:
    try:
        export_obj(OUTPUT_PATH)
    except Exception as exc:
        export_error = str(exc) or type(exc).__name__
{% endif %}

report(success=True, error=None, objects=objects, export_error=export_error)
"##;

/// Inputs for one wrapper script
#[derive(Debug, Clone)]
pub struct WrapperRequest<'a> {
    pub script: &'a str,
    /// Where to export; `None` renders a validate-only wrapper
    pub output_path: Option<&'a Path>,
    pub options: ExportOptions,
}

/// The JSON payload of the wrapper's result line
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct WrapperReport {
    pub success: bool,
    pub error: Option<String>,
    #[serde(default)]
    pub objects: Vec<String>,
    pub export_error: Option<String>,
}

/// Render the Python wrapper for Blender
pub fn render_wrapper(request: &WrapperRequest<'_>) -> Result<String> {
    let mut env = Environment::new();
    env.set_trim_blocks(true);
    env.add_template("wrapper.py", WRAPPER_TEMPLATE)?;
    let template = env.get_template("wrapper.py")?;

    let output_path = match request.output_path {
        Some(path) => {
            let path = path
                .to_str()
                .with_context(|| format!("Output path is not valid UTF-8: {:?}", path))?;
            python_literal(path)?
        }
        None => "None".to_string(),
    };

    let output = template.render(context! {
        timestamp => chrono::Utc::now().to_rfc3339(),
        export => request.output_path.is_some(),
        script => python_literal(request.script)?,
        output_path => output_path,
        marker => python_literal(RESULT_MARKER)?,
        include_materials => python_bool(request.options.include_materials),
        include_normals => python_bool(request.options.include_normals),
        triangulate => python_bool(request.options.triangulate),
    })?;

    Ok(output)
}

/// Find the last result line in the wrapper's stdout
pub fn parse_report(stdout: &str) -> Option<WrapperReport> {
    stdout
        .lines()
        .rev()
        .filter_map(|line| line.strip_prefix(RESULT_MARKER))
        .find_map(|json| serde_json::from_str(json.trim()).ok())
}

/// JSON string literals are valid Python string literals
fn python_literal(text: &str) -> Result<String> {
    Ok(serde_json::to_string(text)?)
}

fn python_bool(value: bool) -> &'static str {
    if value {
        "True"
    } else {
        "False"
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;

    #[test]
    fn test_export_wrapper_renders() {
        let path = Path::new("/tmp/job/model.obj");
        let wrapper = render_wrapper(&WrapperRequest {
            script: "import bpy\nbpy.ops.mesh.primitive_cube_add(size=2)",
            output_path: Some(path),
            options: ExportOptions::default(),
        })
        .unwrap();

        assert!(wrapper.contains(r#"OUTPUT_PATH = "/tmp/job/model.obj""#));
        assert!(wrapper.contains(
            r#"SCRIPT = "import bpy\nbpy.ops.mesh.primitive_cube_add(size=2)""#
        ));
        assert!(wrapper.contains("export_materials=True"));
        assert!(wrapper.contains("export_triangulated_mesh=False"));
        assert!(wrapper.contains("export_obj(OUTPUT_PATH)"));
        assert!(wrapper.contains("bpy.data.meshes, bpy.data.materials, bpy.data.textures, bpy.data.images"));
    }

    #[test]
    fn test_validate_wrapper_skips_export_call() {
        let wrapper = render_wrapper(&WrapperRequest {
            script: "pass",
            output_path: None,
            options: ExportOptions::default(),
        })
        .unwrap();

        assert!(wrapper.contains("OUTPUT_PATH = None"));
        assert!(!wrapper.contains("export_obj(OUTPUT_PATH)"));
    }

    #[test]
    fn test_script_cannot_break_out_of_literal() {
        let hostile = "x = 1\"\"\"\nOUTPUT_PATH = '/etc/passwd'\n\\";
        let wrapper = render_wrapper(&WrapperRequest {
            script: hostile,
            output_path: Some(Path::new("/tmp/out.obj")),
            options: ExportOptions::default(),
        })
        .unwrap();

        // The whole script sits on the SCRIPT line; no line of it leaks out
        let script_lines: Vec<&str> = wrapper.lines().filter(|l| l.starts_with("SCRIPT = ")).collect();
        assert_eq!(script_lines.len(), 1);
        assert!(!wrapper.lines().any(|l| l.starts_with("OUTPUT_PATH = '")));
        assert!(wrapper.contains(r#"OUTPUT_PATH = "/tmp/out.obj""#));
    }

    #[test]
    fn test_parse_report_takes_last_marker() {
        let stdout = "Blender 4.1\nBPY2OBJ_RESULT {\"success\": false, \"error\": \"fake\", \"objects\": [], \"export_error\": null}\nsome log\nBPY2OBJ_RESULT {\"success\": true, \"error\": null, \"objects\": [\"Cube\"], \"export_error\": null}\n";
        let report = parse_report(stdout).unwrap();
        assert_eq!(
            report,
            WrapperReport {
                success: true,
                error: None,
                objects: vec!["Cube".to_string()],
                export_error: None,
            }
        );
    }

    #[test]
    fn test_parse_report_missing() {
        assert_eq!(parse_report("Blender quit\n"), None);
    }
}
