use std::collections::HashMap;

use ndarray::Array2;

/// Channel layout of the per-voxel attribute volume.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AttrLayout {
    Rgb,
    Rgba,
}

impl AttrLayout {
    pub const fn channels(self) -> usize {
        match self {
            Self::Rgb => 3,
            Self::Rgba => 4,
        }
    }
}

/// Surface appearance sampled on the sparse voxel grid.
///
/// `coords[i]` is the voxel cell of `values.row(i)`. A vertex at position
/// `p` falls into cell `floor((p + 0.5) / voxel_size)`, matching the
/// pipeline's unit bounding cube.
#[derive(Debug, Clone)]
pub struct VoxelAttrs {
    pub coords: Vec<[i32; 3]>,
    pub values: Array2<f32>,
    pub layout: AttrLayout,
}

/// Mesh produced by the generation pipeline, consumed once by the exporter.
#[derive(Debug, Clone)]
pub struct Mesh {
    pub vertices: Vec<[f32; 3]>,
    pub faces: Vec<[u32; 3]>,
    pub attrs: Option<VoxelAttrs>,
    pub voxel_size: f32,
}

/// Face budget of the downstream rasterizer; meshes above it cannot be
/// textured.
pub const RASTERIZER_FACE_LIMIT: usize = 16_777_216;

impl Mesh {
    pub fn is_empty(&self) -> bool {
        self.vertices.is_empty() || self.faces.is_empty()
    }

    /// Axis-aligned bounds, `None` for an empty mesh.
    pub fn bounds(&self) -> Option<([f32; 3], [f32; 3])> {
        let first = *self.vertices.first()?;
        let mut min = first;
        let mut max = first;
        for v in &self.vertices {
            for axis in 0..3 {
                min[axis] = min[axis].min(v[axis]);
                max[axis] = max[axis].max(v[axis]);
            }
        }
        Some((min, max))
    }

    /// Reduce the face count under `max_faces` by vertex clustering,
    /// doubling the cell size until the budget is met. A no-op for meshes
    /// already within budget.
    pub fn simplify(&mut self, max_faces: usize) {
        if self.faces.len() <= max_faces {
            return;
        }
        let Some((min, max)) = self.bounds() else {
            return;
        };
        let diagonal = distance(min, max).max(f32::EPSILON);

        let mut cell = diagonal / 1024.0;
        for _ in 0..32 {
            let (vertices, faces) = cluster(&self.vertices, &self.faces, min, cell, 0.0);
            if faces.len() <= max_faces {
                self.vertices = vertices;
                self.faces = faces;
                return;
            }
            cell *= 2.0;
        }

        // Coarsest pass wins even if the budget was unreachable.
        let (vertices, faces) = cluster(&self.vertices, &self.faces, min, cell, 0.0);
        self.vertices = vertices;
        self.faces = faces;
    }

    /// Weld vertices on a uniform grid of the given cell size. `project`
    /// moves each representative from the cluster centroid toward the cell
    /// center (0 keeps centroids, 1 snaps to centers).
    pub fn weld(&mut self, cell: f32, project: f32) {
        if self.is_empty() || cell <= 0.0 {
            return;
        }
        let Some((min, _)) = self.bounds() else {
            return;
        };
        let (vertices, faces) = cluster(&self.vertices, &self.faces, min, cell, project);
        self.vertices = vertices;
        self.faces = faces;
    }
}

fn distance(a: [f32; 3], b: [f32; 3]) -> f32 {
    let dx = b[0] - a[0];
    let dy = b[1] - a[1];
    let dz = b[2] - a[2];
    (dx * dx + dy * dy + dz * dz).sqrt()
}

/// Grid clustering shared by decimation and welding: merge all vertices in a
/// cell into one representative, remap faces, and drop the ones that
/// degenerate.
fn cluster(
    vertices: &[[f32; 3]],
    faces: &[[u32; 3]],
    origin: [f32; 3],
    cell: f32,
    project: f32,
) -> (Vec<[f32; 3]>, Vec<[u32; 3]>) {
    let project = project.clamp(0.0, 1.0);
    let mut cells: HashMap<[i64; 3], u32> = HashMap::new();
    let mut sums: Vec<([f64; 3], u64, [i64; 3])> = Vec::new();
    let mut remap = Vec::with_capacity(vertices.len());

    for v in vertices {
        let key = [
            ((v[0] - origin[0]) / cell).floor() as i64,
            ((v[1] - origin[1]) / cell).floor() as i64,
            ((v[2] - origin[2]) / cell).floor() as i64,
        ];
        let index = *cells.entry(key).or_insert_with(|| {
            sums.push(([0.0; 3], 0, key));
            (sums.len() - 1) as u32
        });
        let (sum, count, _) = &mut sums[index as usize];
        for axis in 0..3 {
            sum[axis] += f64::from(v[axis]);
        }
        *count += 1;
        remap.push(index);
    }

    let new_vertices = sums
        .iter()
        .map(|(sum, count, key)| {
            let mut out = [0.0f32; 3];
            for axis in 0..3 {
                let centroid = (sum[axis] / *count as f64) as f32;
                let center = origin[axis] + (key[axis] as f32 + 0.5) * cell;
                out[axis] = centroid + (center - centroid) * project;
            }
            out
        })
        .collect();

    let new_faces = faces
        .iter()
        .map(|&[a, b, c]| [remap[a as usize], remap[b as usize], remap[c as usize]])
        .filter(|&[a, b, c]| a != b && b != c && a != c)
        .collect();

    (new_vertices, new_faces)
}

#[cfg(test)]
mod tests {
    use super::*;

    /// Unit cube centered on the origin, 8 vertices and 12 faces.
    fn cube() -> Mesh {
        let vertices = vec![
            [-0.5, -0.5, -0.5],
            [0.5, -0.5, -0.5],
            [0.5, 0.5, -0.5],
            [-0.5, 0.5, -0.5],
            [-0.5, -0.5, 0.5],
            [0.5, -0.5, 0.5],
            [0.5, 0.5, 0.5],
            [-0.5, 0.5, 0.5],
        ];
        let faces = vec![
            [0, 1, 2],
            [0, 2, 3],
            [4, 6, 5],
            [4, 7, 6],
            [0, 4, 5],
            [0, 5, 1],
            [3, 2, 6],
            [3, 6, 7],
            [0, 3, 7],
            [0, 7, 4],
            [1, 5, 6],
            [1, 6, 2],
        ];
        Mesh {
            vertices,
            faces,
            attrs: None,
            voxel_size: 0.25,
        }
    }

    /// Dense triangulated plane with `n * n * 2` faces.
    fn plane(n: usize) -> Mesh {
        let mut vertices = Vec::new();
        for y in 0..=n {
            for x in 0..=n {
                vertices.push([x as f32 / n as f32, y as f32 / n as f32, 0.0]);
            }
        }
        let stride = (n + 1) as u32;
        let mut faces = Vec::new();
        for y in 0..n as u32 {
            for x in 0..n as u32 {
                let a = y * stride + x;
                faces.push([a, a + 1, a + stride]);
                faces.push([a + 1, a + stride + 1, a + stride]);
            }
        }
        Mesh {
            vertices,
            faces,
            attrs: None,
            voxel_size: 0.1,
        }
    }

    #[test]
    fn bounds_cover_all_vertices() {
        let (min, max) = cube().bounds().unwrap();
        assert_eq!(min, [-0.5, -0.5, -0.5]);
        assert_eq!(max, [0.5, 0.5, 0.5]);
    }

    #[test]
    fn simplify_within_budget_is_a_noop() {
        let mut mesh = cube();
        mesh.simplify(100);
        assert_eq!(mesh.faces.len(), 12);
        assert_eq!(mesh.vertices.len(), 8);
    }

    #[test]
    fn simplify_reduces_to_budget() {
        let mut mesh = plane(32);
        assert_eq!(mesh.faces.len(), 2048);
        mesh.simplify(500);
        assert!(mesh.faces.len() <= 500);
    }

    #[test]
    fn simplify_drops_degenerate_faces() {
        let mut mesh = plane(8);
        // A cell the size of the whole plane collapses everything.
        mesh.weld(10.0, 0.0);
        assert!(mesh.faces.is_empty());
    }

    #[test]
    fn weld_merges_coincident_vertices() {
        let mut mesh = cube();
        // Duplicate every vertex, offset by less than the weld cell.
        let offset: Vec<[f32; 3]> = mesh
            .vertices
            .iter()
            .map(|v| [v[0] + 1e-4, v[1], v[2]])
            .collect();
        let base = mesh.vertices.len() as u32;
        mesh.vertices.extend(offset);
        let extra: Vec<[u32; 3]> = mesh
            .faces
            .iter()
            .map(|&[a, b, c]| [a + base, b + base, c + base])
            .collect();
        mesh.faces.extend(extra);

        mesh.weld(0.01, 0.0);
        assert_eq!(mesh.vertices.len(), 8);
    }

    #[test]
    fn empty_mesh_reports_empty() {
        let mesh = Mesh {
            vertices: Vec::new(),
            faces: Vec::new(),
            attrs: None,
            voxel_size: 0.1,
        };
        assert!(mesh.is_empty());
        assert!(mesh.bounds().is_none());
    }
}
