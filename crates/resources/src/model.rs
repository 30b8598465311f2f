//! Wavefront OBJ loading.
//!
//! All shapes in the file are merged into one indexed triangle list.
//! Identical vertices are shared, texture V is flipped to Vulkan's
//! top-left origin and missing normals or texture coordinates become zero.

use std::collections::HashMap;
use std::fs::File;
use std::io::{BufRead, BufReader};
use std::path::Path;

use glam::{Vec2, Vec3};
use tracing::{debug, info};
use vp_rhi::vertex::ModelVertex;

use crate::error::{ResourceError, ResourceResult};

/// Decoded mesh ready for upload.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct MeshData {
    pub vertices: Vec<ModelVertex>,
    pub indices: Vec<u32>,
}

impl MeshData {
    pub fn triangle_count(&self) -> usize {
        self.indices.len() / 3
    }

    /// Vertex data as raw bytes.
    pub fn vertex_bytes(&self) -> &[u8] {
        bytemuck::cast_slice(&self.vertices)
    }

    /// Index data as raw bytes.
    pub fn index_bytes(&self) -> &[u8] {
        bytemuck::cast_slice(&self.indices)
    }
}

/// Loads and triangulates the OBJ file at `path`. Materials are ignored.
pub fn load_obj(path: &Path) -> ResourceResult<MeshData> {
    if !path.exists() {
        return Err(ResourceError::FileNotFound(path.to_path_buf()));
    }

    let mut reader = BufReader::new(File::open(path)?);
    let mesh = parse_obj(&mut reader).map_err(|e| match e {
        ResourceError::InvalidData { reason, .. } => ResourceError::InvalidData {
            path: path.to_path_buf(),
            reason,
        },
        other => other,
    })?;

    info!(
        "Loaded model {:?}: {} vertices, {} triangles",
        path,
        mesh.vertices.len(),
        mesh.triangle_count()
    );
    Ok(mesh)
}

/// Parses OBJ text from `reader`.
pub fn parse_obj<R: BufRead>(reader: &mut R) -> ResourceResult<MeshData> {
    let (models, _materials) = tobj::load_obj_buf(
        reader,
        &tobj::LoadOptions {
            triangulate: true,
            single_index: true,
            ..Default::default()
        },
        |_| Ok((Vec::new(), Default::default())),
    )?;

    let mut mesh = MeshData::default();
    let mut unique: HashMap<[u32; 8], u32> = HashMap::new();

    for model in &models {
        let source = &model.mesh;
        for &index in &source.indices {
            let vertex = read_vertex(source, index as usize)?;
            let next = mesh.vertices.len() as u32;
            let slot = *unique.entry(vertex.bit_key()).or_insert_with(|| {
                mesh.vertices.push(vertex);
                next
            });
            mesh.indices.push(slot);
        }
    }

    if mesh.indices.is_empty() {
        return Err(ResourceError::InvalidData {
            path: Default::default(),
            reason: "no faces".to_string(),
        });
    }

    debug!(
        "Parsed {} shape(s) into {} unique vertices",
        models.len(),
        mesh.vertices.len()
    );
    Ok(mesh)
}

fn read_vertex(mesh: &tobj::Mesh, index: usize) -> ResourceResult<ModelVertex> {
    let vec3 = |data: &[f32]| -> Option<Vec3> {
        let start = 3 * index;
        data.get(start..start + 3).map(Vec3::from_slice)
    };

    let position = vec3(&mesh.positions).ok_or_else(|| ResourceError::InvalidData {
        path: Default::default(),
        reason: format!("vertex index {} has no position", index),
    })?;
    let normal = vec3(&mesh.normals).unwrap_or(Vec3::ZERO);
    let tex_coord = mesh
        .texcoords
        .get(2 * index..2 * index + 2)
        .map(|uv| Vec2::new(uv[0], 1.0 - uv[1]))
        .unwrap_or(Vec2::ZERO);

    Ok(ModelVertex::new(position, normal, tex_coord))
}

#[cfg(test)]
mod tests {
    use std::io::Cursor;

    use super::*;

    const QUAD: &str = "\
v 0 0 0
v 1 0 0
v 1 1 0
v 0 1 0
vt 0 0
vt 1 0
vt 1 1
vt 0 1
vn 0 0 1
f 1/1/1 2/2/1 3/3/1
f 1/1/1 3/3/1 4/4/1
";

    #[test]
    fn test_quad_shares_vertices() {
        let mesh = parse_obj(&mut Cursor::new(QUAD)).unwrap();
        assert_eq!(mesh.indices.len(), 6);
        assert_eq!(mesh.vertices.len(), 4);
        assert_eq!(mesh.triangle_count(), 2);
        assert_eq!(mesh.indices[0], mesh.indices[3]);
    }

    #[test]
    fn test_texture_v_is_flipped() {
        let mesh = parse_obj(&mut Cursor::new(QUAD)).unwrap();
        let origin = mesh
            .vertices
            .iter()
            .find(|v| v.position == Vec3::ZERO)
            .unwrap();
        assert_eq!(origin.tex_coord, Vec2::new(0.0, 1.0));
        assert_eq!(origin.normal, Vec3::Z);
    }

    #[test]
    fn test_polygons_are_triangulated() {
        let pentagon = "v 0 0 0\nv 1 0 0\nv 1 1 0\nv 0.5 2 0\nv 0 1 0\nf 1 2 3 4 5\n";
        let mesh = parse_obj(&mut Cursor::new(pentagon)).unwrap();
        assert_eq!(mesh.triangle_count(), 3);
        assert_eq!(mesh.vertices.len(), 5);
    }

    #[test]
    fn test_missing_normals_and_uvs_are_zero() {
        let tri = "v 0 0 0\nv 1 0 0\nv 0 1 0\nf 1 2 3\n";
        let mesh = parse_obj(&mut Cursor::new(tri)).unwrap();
        assert!(mesh.vertices.iter().all(|v| v.normal == Vec3::ZERO));
        assert!(mesh.vertices.iter().all(|v| v.tex_coord == Vec2::ZERO));
    }

    #[test]
    fn test_shapes_are_merged() {
        let two = "o a\nv 0 0 0\nv 1 0 0\nv 0 1 0\nf 1 2 3\no b\nv 0 0 1\nf 1 2 4\n";
        let mesh = parse_obj(&mut Cursor::new(two)).unwrap();
        assert_eq!(mesh.triangle_count(), 2);
        assert_eq!(mesh.vertices.len(), 4);
    }

    #[test]
    fn test_empty_file_is_invalid() {
        let err = parse_obj(&mut Cursor::new("# nothing\n")).unwrap_err();
        assert!(matches!(err, ResourceError::InvalidData { .. }));
    }

    #[test]
    fn test_byte_views() {
        let mesh = parse_obj(&mut Cursor::new(QUAD)).unwrap();
        assert_eq!(mesh.vertex_bytes().len(), mesh.vertices.len() * 32);
        assert_eq!(mesh.index_bytes().len(), mesh.indices.len() * 4);
    }

    #[test]
    fn test_missing_file() {
        let path = std::env::temp_dir().join("vp_resources_missing.obj");
        assert!(matches!(
            load_obj(&path),
            Err(ResourceError::FileNotFound(_))
        ));
    }
}
