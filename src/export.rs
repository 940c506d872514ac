use std::collections::HashMap;
use std::fs;
use std::path::{Path, PathBuf};

use serde_json::json;

use crate::config::PipelineConfig;
use crate::errors::{PipelineError, Result};
use crate::mesh::{Mesh, VoxelAttrs};

const GLB_MAGIC: u32 = 0x4654_6C67; // "glTF"
const GLB_VERSION: u32 = 2;
const CHUNK_JSON: u32 = 0x4E4F_534A;
const CHUNK_BIN: u32 = 0x004E_4942;

const COMPONENT_F32: u32 = 5126;
const COMPONENT_U32: u32 = 5125;
const TARGET_ARRAY_BUFFER: u32 = 34962;
const TARGET_ELEMENT_ARRAY_BUFFER: u32 = 34963;

/// Parameters of the mesh export step, fixed by the driver.
#[derive(Debug, Clone)]
pub struct ExportParams {
    /// Target bounding volume the mesh is fitted into.
    pub aabb: [[f32; 3]; 2],
    /// Face budget applied before writing.
    pub decimation_target: usize,
    /// Baked texture resolution; must be a power of two.
    pub texture_size: u32,
    /// Regenerate topology by welding on the voxel grid before decimation.
    pub remesh: bool,
    /// Weld cell size in voxel units.
    pub remesh_band: f32,
    /// 0 keeps cluster centroids, 1 snaps onto the grid.
    pub remesh_project: f32,
}

impl ExportParams {
    pub fn from_config(config: &PipelineConfig) -> Self {
        Self {
            decimation_target: config.decimation_target,
            texture_size: config.texture_size,
            ..Self::default()
        }
    }
}

impl Default for ExportParams {
    fn default() -> Self {
        Self {
            aabb: [[-0.5, -0.5, -0.5], [0.5, 0.5, 0.5]],
            decimation_target: 1_000_000,
            texture_size: 2048,
            remesh: true,
            remesh_band: 1.0,
            remesh_project: 0.0,
        }
    }
}

/// Write a mesh as a binary glTF scene file and return the bytes written.
///
/// Surface appearance is resolved from the voxel attribute volume into
/// per-vertex colors. An empty result file is treated as an export failure
/// rather than trusted.
pub fn export_glb(mesh: &Mesh, params: &ExportParams, path: &Path) -> Result<u64> {
    if mesh.is_empty() {
        return Err(PipelineError::Export {
            path: path.to_path_buf(),
            reason: "refusing to export an empty mesh".to_string(),
        });
    }
    if !params.texture_size.is_power_of_two() {
        return Err(PipelineError::Export {
            path: path.to_path_buf(),
            reason: format!(
                "texture size {} is not a power of two",
                params.texture_size
            ),
        });
    }

    let mut mesh = mesh.clone();
    if params.remesh {
        mesh.weld(
            mesh.voxel_size * params.remesh_band,
            params.remesh_project,
        );
    }
    mesh.simplify(params.decimation_target);
    if mesh.is_empty() {
        return Err(PipelineError::Export {
            path: path.to_path_buf(),
            reason: "mesh collapsed to nothing during decimation".to_string(),
        });
    }

    // Colors are sampled in the mesh's own coordinates, before fitting.
    let colors = mesh.attrs.as_ref().map(|attrs| {
        let index = color_index(attrs);
        mesh.vertices
            .iter()
            .map(|&v| sample_voxel_color(attrs, &index, v, mesh.voxel_size))
            .collect::<Vec<[f32; 3]>>()
    });
    fit_to_aabb(&mut mesh.vertices, params.aabb);

    let glb = encode_glb(&mesh, colors.as_deref())?;
    fs::write(path, &glb).map_err(|e| PipelineError::FileSystem {
        path: path.to_path_buf(),
        operation: "scene file write".to_string(),
        source: e,
    })?;

    let written = glb.len() as u64;
    if written == 0 {
        return Err(PipelineError::Export {
            path: path.to_path_buf(),
            reason: "exported scene file is empty".to_string(),
        });
    }
    Ok(written)
}

/// Nearest-voxel color lookup; voxels index cells of the unit cube. The
/// `index` map is built once per export via `color_index`.
fn sample_voxel_color(
    attrs: &VoxelAttrs,
    index: &HashMap<[i32; 3], usize>,
    vertex: [f32; 3],
    voxel_size: f32,
) -> [f32; 3] {
    let key = [
        ((vertex[0] + 0.5) / voxel_size).floor() as i32,
        ((vertex[1] + 0.5) / voxel_size).floor() as i32,
        ((vertex[2] + 0.5) / voxel_size).floor() as i32,
    ];
    index
        .get(&key)
        .map(|&row| {
            let values = attrs.values.row(row);
            [
                values[0].clamp(0.0, 1.0),
                values[1].clamp(0.0, 1.0),
                values[2].clamp(0.0, 1.0),
            ]
        })
        .unwrap_or([1.0, 1.0, 1.0])
}

fn color_index(attrs: &VoxelAttrs) -> HashMap<[i32; 3], usize> {
    attrs
        .coords
        .iter()
        .enumerate()
        .map(|(row, &coord)| (coord, row))
        .collect()
}

/// Uniformly scale and translate vertices so the mesh bounds fit the target
/// volume, centered.
fn fit_to_aabb(vertices: &mut [[f32; 3]], aabb: [[f32; 3]; 2]) {
    let Some(first) = vertices.first().copied() else {
        return;
    };
    let mut min = first;
    let mut max = first;
    for v in vertices.iter() {
        for axis in 0..3 {
            min[axis] = min[axis].min(v[axis]);
            max[axis] = max[axis].max(v[axis]);
        }
    }

    let mut scale = f32::INFINITY;
    for axis in 0..3 {
        let extent = max[axis] - min[axis];
        let target = aabb[1][axis] - aabb[0][axis];
        if extent > f32::EPSILON {
            scale = scale.min(target / extent);
        }
    }
    if !scale.is_finite() {
        scale = 1.0;
    }

    for v in vertices.iter_mut() {
        for axis in 0..3 {
            let center = (min[axis] + max[axis]) * 0.5;
            let target_center = (aabb[0][axis] + aabb[1][axis]) * 0.5;
            v[axis] = (v[axis] - center) * scale + target_center;
        }
    }
}

fn encode_glb(mesh: &Mesh, colors: Option<&[[f32; 3]]>) -> Result<Vec<u8>> {
    let mut bin = Vec::new();
    let mut views = Vec::new();
    let mut accessors = Vec::new();

    // POSITION
    let position_offset = bin.len();
    for v in &mesh.vertices {
        for value in v {
            bin.extend_from_slice(&value.to_le_bytes());
        }
    }
    let (min, max) = mesh
        .bounds()
        .expect("caller rejects empty meshes before encoding");
    views.push(json!({
        "buffer": 0,
        "byteOffset": position_offset,
        "byteLength": bin.len() - position_offset,
        "target": TARGET_ARRAY_BUFFER,
    }));
    accessors.push(json!({
        "bufferView": views.len() - 1,
        "componentType": COMPONENT_F32,
        "count": mesh.vertices.len(),
        "type": "VEC3",
        "min": min,
        "max": max,
    }));
    let position_accessor = accessors.len() - 1;

    // COLOR_0
    let color_accessor = colors.map(|colors| {
        let offset = bin.len();
        for color in colors {
            for value in color {
                bin.extend_from_slice(&value.to_le_bytes());
            }
        }
        views.push(json!({
            "buffer": 0,
            "byteOffset": offset,
            "byteLength": bin.len() - offset,
            "target": TARGET_ARRAY_BUFFER,
        }));
        accessors.push(json!({
            "bufferView": views.len() - 1,
            "componentType": COMPONENT_F32,
            "count": colors.len(),
            "type": "VEC3",
        }));
        accessors.len() - 1
    });

    // indices
    let index_offset = bin.len();
    for face in &mesh.faces {
        for index in face {
            bin.extend_from_slice(&index.to_le_bytes());
        }
    }
    views.push(json!({
        "buffer": 0,
        "byteOffset": index_offset,
        "byteLength": bin.len() - index_offset,
        "target": TARGET_ELEMENT_ARRAY_BUFFER,
    }));
    accessors.push(json!({
        "bufferView": views.len() - 1,
        "componentType": COMPONENT_U32,
        "count": mesh.faces.len() * 3,
        "type": "SCALAR",
    }));
    let index_accessor = accessors.len() - 1;

    pad_to_four(&mut bin, 0);

    let mut attributes = serde_json::Map::new();
    attributes.insert("POSITION".to_string(), json!(position_accessor));
    if let Some(accessor) = color_accessor {
        attributes.insert("COLOR_0".to_string(), json!(accessor));
    }

    let document = json!({
        "asset": {"version": "2.0", "generator": "img2mesh-rs"},
        "scene": 0,
        "scenes": [{"nodes": [0]}],
        "nodes": [{"mesh": 0}],
        "meshes": [{"primitives": [{
            "attributes": attributes,
            "indices": index_accessor,
            "mode": 4,
        }]}],
        "buffers": [{"byteLength": bin.len()}],
        "bufferViews": views,
        "accessors": accessors,
    });
    let mut json_chunk = serde_json::to_vec(&document)?;
    pad_to_four(&mut json_chunk, b' ');

    let total = 12 + 8 + json_chunk.len() + 8 + bin.len();
    let mut glb = Vec::with_capacity(total);
    glb.extend_from_slice(&GLB_MAGIC.to_le_bytes());
    glb.extend_from_slice(&GLB_VERSION.to_le_bytes());
    glb.extend_from_slice(&(total as u32).to_le_bytes());
    glb.extend_from_slice(&(json_chunk.len() as u32).to_le_bytes());
    glb.extend_from_slice(&CHUNK_JSON.to_le_bytes());
    glb.extend_from_slice(&json_chunk);
    glb.extend_from_slice(&(bin.len() as u32).to_le_bytes());
    glb.extend_from_slice(&CHUNK_BIN.to_le_bytes());
    glb.extend_from_slice(&bin);
    Ok(glb)
}

fn pad_to_four(buffer: &mut Vec<u8>, byte: u8) {
    while buffer.len() % 4 != 0 {
        buffer.push(byte);
    }
}

/// Temp-file name used by the stage drivers for atomic output writes.
pub fn partial_path(path: &Path) -> PathBuf {
    let mut name = path.as_os_str().to_os_string();
    name.push(".part");
    PathBuf::from(name)
}
