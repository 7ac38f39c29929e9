//! In-memory scene graph for the embedded engine, plus OBJ/MTL writers
//! Units: scene units, Z up

use crate::engine::ExportOptions;
use serde::Serialize;
use std::io::{self, Write};

/// Polygon mesh with 0-based face indices
#[derive(Debug, Clone, Default)]
pub struct Mesh {
    pub vertices: Vec<[f64; 3]>,
    pub faces: Vec<Vec<usize>>,
}

impl Mesh {
    /// Axis-aligned cube centred on the origin
    pub fn cube(size: f64) -> Self {
        let h = size / 2.0;
        let vertices = vec![
            [-h, -h, -h],
            [h, -h, -h],
            [h, h, -h],
            [-h, h, -h],
            [-h, -h, h],
            [h, -h, h],
            [h, h, h],
            [-h, h, h],
        ];
        // Counter-clockwise seen from outside
        let faces = vec![
            vec![0, 3, 2, 1],
            vec![4, 5, 6, 7],
            vec![0, 1, 5, 4],
            vec![2, 3, 7, 6],
            vec![0, 4, 7, 3],
            vec![1, 2, 6, 5],
        ];
        Self { vertices, faces }
    }

    /// Square in the XY plane, facing +Z
    pub fn plane(size: f64) -> Self {
        let h = size / 2.0;
        Self {
            vertices: vec![[-h, -h, 0.0], [h, -h, 0.0], [h, h, 0.0], [-h, h, 0.0]],
            faces: vec![vec![0, 1, 2, 3]],
        }
    }

    pub fn validate(&self) -> Result<(), String> {
        for (i, face) in self.faces.iter().enumerate() {
            if face.len() < 3 {
                return Err(format!("face {} has {} vertices, need at least 3", i + 1, face.len()));
            }
            if let Some(&bad) = face.iter().find(|&&v| v >= self.vertices.len()) {
                return Err(format!(
                    "face {} references vertex {} but the mesh has {} vertices",
                    i + 1,
                    bad + 1,
                    self.vertices.len()
                ));
            }
        }
        Ok(())
    }
}

#[derive(Debug, Clone)]
pub struct SceneObject {
    pub name: String,
    pub mesh: Mesh,
    pub location: [f64; 3],
    pub material: Option<String>,
}

#[derive(Debug, Clone)]
pub struct Material {
    pub name: String,
    /// RGBA, 0..1
    pub color: [f64; 4],
}

/// Read-only summary handed back to scripts
#[derive(Debug, Clone, Serialize)]
pub struct ObjectInfo {
    pub name: String,
    pub location: [f64; 3],
    pub vertex_count: usize,
    pub face_count: usize,
    pub material: Option<String>,
}

#[derive(Debug, Default)]
pub struct Scene {
    objects: Vec<SceneObject>,
    materials: Vec<Material>,
}

impl Scene {
    pub fn new() -> Self {
        Self::default()
    }

    /// Drop every object and material
    pub fn clear(&mut self) {
        self.objects.clear();
        self.materials.clear();
    }

    pub fn is_empty(&self) -> bool {
        self.objects.is_empty() && self.materials.is_empty()
    }

    pub fn object_names(&self) -> Vec<String> {
        self.objects.iter().map(|o| o.name.clone()).collect()
    }

    pub fn add_object(
        &mut self,
        base_name: &str,
        mesh: Mesh,
        location: [f64; 3],
        material: Option<String>,
    ) -> Result<String, String> {
        mesh.validate()?;
        let base_name = record_name(base_name)?;
        let material = material.as_deref().map(record_name).transpose()?;
        if let Some(mat) = &material {
            if !self.materials.iter().any(|m| &m.name == mat) {
                return Err(format!("unknown material '{}'", mat));
            }
        }

        let name = unique_name(&base_name, |n| self.objects.iter().any(|o| o.name == n));
        self.objects.push(SceneObject {
            name: name.clone(),
            mesh,
            location,
            material,
        });
        Ok(name)
    }

    pub fn add_material(&mut self, base_name: &str, color: [f64; 4]) -> Result<String, String> {
        let base_name = record_name(base_name)?;
        let name = unique_name(&base_name, |n| self.materials.iter().any(|m| m.name == n));
        self.materials.push(Material {
            name: name.clone(),
            color,
        });
        Ok(name)
    }

    pub fn remove_object(&mut self, name: &str) -> bool {
        let before = self.objects.len();
        self.objects.retain(|o| o.name != name);
        self.objects.len() != before
    }

    pub fn describe(&self, name: &str) -> Option<ObjectInfo> {
        self.objects.iter().find(|o| o.name == name).map(|o| ObjectInfo {
            name: o.name.clone(),
            location: o.location,
            vertex_count: o.mesh.vertices.len(),
            face_count: o.mesh.faces.len(),
            material: o.material.clone(),
        })
    }

    /// True when at least one object references a material
    pub fn uses_materials(&self) -> bool {
        self.objects.iter().any(|o| o.material.is_some())
    }

    /// Write the scene as Wavefront OBJ.
    ///
    /// `mtl_file` is emitted as `mtllib` when materials are included.
    /// Vertex indices are global and 1-based, as OBJ requires.
    pub fn write_obj<W: Write>(
        &self,
        out: &mut W,
        options: &ExportOptions,
        mtl_file: Option<&str>,
    ) -> io::Result<()> {
        writeln!(out, "# bpy2obj embedded engine")?;
        if options.include_materials {
            if let Some(mtl) = mtl_file {
                writeln!(out, "mtllib {}", mtl)?;
            }
        }

        let mut vertex_offset = 1;
        let mut normal_offset = 1;

        for obj in &self.objects {
            writeln!(out, "o {}", obj.name)?;

            for v in &obj.mesh.vertices {
                writeln!(
                    out,
                    "v {:.6} {:.6} {:.6}",
                    v[0] + obj.location[0],
                    v[1] + obj.location[1],
                    v[2] + obj.location[2]
                )?;
            }

            let faces: Vec<Vec<usize>> = if options.triangulate {
                obj.mesh.faces.iter().flat_map(|f| fan_triangulate(f)).collect()
            } else {
                obj.mesh.faces.clone()
            };

            if options.include_normals {
                for face in &faces {
                    let n = face_normal(&obj.mesh.vertices, face);
                    writeln!(out, "vn {:.4} {:.4} {:.4}", n[0], n[1], n[2])?;
                }
            }

            if options.include_materials {
                if let Some(mat) = &obj.material {
                    writeln!(out, "usemtl {}", mat)?;
                }
            }

            for (i, face) in faces.iter().enumerate() {
                write!(out, "f")?;
                for &v in face {
                    if options.include_normals {
                        write!(out, " {}//{}", v + vertex_offset, i + normal_offset)?;
                    } else {
                        write!(out, " {}", v + vertex_offset)?;
                    }
                }
                writeln!(out)?;
            }

            vertex_offset += obj.mesh.vertices.len();
            if options.include_normals {
                normal_offset += faces.len();
            }
        }

        Ok(())
    }

    /// Write every material as an MTL library
    pub fn write_mtl<W: Write>(&self, out: &mut W) -> io::Result<()> {
        writeln!(out, "# bpy2obj embedded engine")?;
        for mat in &self.materials {
            writeln!(out)?;
            writeln!(out, "newmtl {}", mat.name)?;
            writeln!(
                out,
                "Kd {:.6} {:.6} {:.6}",
                mat.color[0], mat.color[1], mat.color[2]
            )?;
            writeln!(out, "d {:.6}", mat.color[3])?;
        }
        Ok(())
    }
}

/// Names end up as single OBJ/MTL tokens: no control characters, and
/// whitespace becomes `_` the way Blender's exporter writes it.
fn record_name(name: &str) -> Result<String, String> {
    let name = name.trim();
    if name.is_empty() {
        return Err("name must not be empty".to_string());
    }
    if name.chars().any(char::is_control) {
        return Err(format!("name {:?} contains control characters", name));
    }
    Ok(name
        .chars()
        .map(|c| if c.is_whitespace() { '_' } else { c })
        .collect())
}

/// Blender-style naming: "Cube", then "Cube.001", "Cube.002", ...
fn unique_name(base: &str, taken: impl Fn(&str) -> bool) -> String {
    if !taken(base) {
        return base.to_string();
    }
    (1..)
        .map(|n| format!("{}.{:03}", base, n))
        .find(|candidate| !taken(candidate))
        .unwrap_or_else(|| base.to_string())
}

fn fan_triangulate(face: &[usize]) -> Vec<Vec<usize>> {
    (1..face.len() - 1)
        .map(|i| vec![face[0], face[i], face[i + 1]])
        .collect()
}

/// Newell's method, robust for non-planar polygons
fn face_normal(vertices: &[[f64; 3]], face: &[usize]) -> [f64; 3] {
    let mut n = [0.0; 3];
    for (i, &a) in face.iter().enumerate() {
        let p = vertices[a];
        let q = vertices[face[(i + 1) % face.len()]];
        n[0] += (p[1] - q[1]) * (p[2] + q[2]);
        n[1] += (p[2] - q[2]) * (p[0] + q[0]);
        n[2] += (p[0] - q[0]) * (p[1] + q[1]);
    }
    normalize(n)
}

fn normalize(v: [f64; 3]) -> [f64; 3] {
    let len = (v[0] * v[0] + v[1] * v[1] + v[2] * v[2]).sqrt();
    if len > 1e-12 {
        [v[0] / len, v[1] / len, v[2] / len]
    } else {
        [0.0, 0.0, 1.0]
    }
}
