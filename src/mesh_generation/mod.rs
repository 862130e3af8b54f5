//! Structured source meshes with wall and periodic markers.
//!
//! Points and elements are numbered lexicographically with `x` fastest. A
//! degree-`p` grid places `p + 1` equidistant nodes per cell edge, so the
//! element node lists are lattice ordered. Every face without a neighbor
//! lands in the [`WALL_TAG`] marker; periodic directions add a marker pair
//! per axis whose transforms map the donor side onto the local side.

use crate::algs::distribute::{InMemorySourceMesh, SourceElement};
use crate::config::PeriodicMarkerConfig;
use crate::mesh_error::DgMeshError;
use crate::topology::cell_type::CellType;

/// Marker holding every non-periodic boundary face.
pub const WALL_TAG: u16 = 0;

/// Marker tags of the minimum and maximum side of periodic axis `axis`.
pub const fn periodic_tags(axis: usize) -> (u16, u16) {
    (1 + 2 * axis as u16, 2 + 2 * axis as u16)
}

/// Optional periodic identification for structured meshes.
#[derive(Clone, Copy, Debug, Default)]
pub struct Periodicity {
    pub x: bool,
    pub y: bool,
    pub z: bool,
}

impl Periodicity {
    /// No periodic directions.
    pub fn none() -> Self {
        Self::default()
    }

    fn axis(&self, d: usize) -> bool {
        [self.x, self.y, self.z][d]
    }
}

#[derive(Clone, Copy, Debug)]
pub struct MeshGenerationOptions {
    pub periodic: Periodicity,
    pub p_grid: usize,
    pub p_sol: usize,
}

impl Default for MeshGenerationOptions {
    fn default() -> Self {
        Self {
            periodic: Periodicity::none(),
            p_grid: 1,
            p_sol: 1,
        }
    }
}

/// Output from a mesh generator: the serial source mesh and the transforms
/// of its periodic markers.
#[derive(Debug)]
pub struct GeneratedMesh {
    pub mesh: InMemorySourceMesh,
    pub periodic: Vec<PeriodicMarkerConfig>,
}

fn invalid_geometry(message: impl Into<String>) -> DgMeshError {
    DgMeshError::InvalidConfig(message.into())
}

/// Faces on the minimum and maximum side of each axis.
fn axis_faces(cell: CellType, axis: usize) -> (usize, usize) {
    match (cell, axis) {
        (CellType::Quadrilateral, 0) => (3, 1),
        (CellType::Quadrilateral, _) => (0, 2),
        (_, 0) => (4, 5),
        (_, 1) => (2, 3),
        _ => (0, 1),
    }
}

fn structured(
    dim: usize,
    n: [usize; 3],
    min: [f64; 3],
    max: [f64; 3],
    options: MeshGenerationOptions,
) -> Result<GeneratedMesh, DgMeshError> {
    let p = options.p_grid;
    if p == 0 {
        return Err(invalid_geometry("grid degree must be positive"));
    }
    let cell = if dim == 2 {
        CellType::Quadrilateral
    } else {
        CellType::Hexahedron
    };
    let n_pts = [n[0] * p + 1, n[1] * p + 1, if dim == 2 { 1 } else { n[2] * p + 1 }];
    let point_id = |i: usize, j: usize, k: usize| (i + n_pts[0] * (j + n_pts[1] * k)) as u64;

    let mut coords = Vec::with_capacity(n_pts.iter().product());
    for k in 0..n_pts[2] {
        for j in 0..n_pts[1] {
            for i in 0..n_pts[0] {
                let mut x = [0.0; 3];
                for (d, idx) in [i, j, k].into_iter().enumerate().take(dim) {
                    x[d] = min[d] + (max[d] - min[d]) * idx as f64 / (n[d] * p) as f64;
                }
                coords.push((point_id(i, j, k), x));
            }
        }
    }

    let layers = if dim == 2 { 0 } else { p };
    let cell_id = |c: [usize; 3]| (c[0] + n[0] * (c[1] + n[1] * c[2])) as u64;
    let mut cells = Vec::new();
    let mut elements = Vec::new();
    for ck in 0..n[2] {
        for cj in 0..n[1] {
            for ci in 0..n[0] {
                let mut nodes = Vec::with_capacity(cell.n_dofs(p));
                for c in 0..=layers {
                    for b in 0..=p {
                        for a in 0..=p {
                            nodes.push(point_id(ci * p + a, cj * p + b, ck * layers + c));
                        }
                    }
                }
                let c = [ci, cj, ck];
                elements.push(SourceElement::new(cell_id(c), cell, p, options.p_sol, nodes));
                cells.push(c);
            }
        }
    }

    let mut mesh = InMemorySourceMesh::serial(dim, elements, coords, Vec::new())?;
    let mut periodic = Vec::new();
    let mut periodic_faces = Vec::new();
    for axis in (0..dim).filter(|&d| options.periodic.axis(d)) {
        let (lo_tag, hi_tag) = periodic_tags(axis);
        let (lo_face, hi_face) = axis_faces(cell, axis);
        let mut lo = Vec::new();
        let mut hi = Vec::new();
        for &c in &cells {
            let mut donor = c;
            if c[axis] == 0 {
                donor[axis] = n[axis] - 1;
                mesh.connect_periodic(cell_id(c), lo_face, cell_id(donor), lo_tag)?;
                lo.push((cell_id(c), lo_face));
            }
            if c[axis] == n[axis] - 1 {
                donor[axis] = 0;
                mesh.connect_periodic(cell_id(c), hi_face, cell_id(donor), hi_tag)?;
                hi.push((cell_id(c), hi_face));
            }
        }
        let mut shift = [0.0; 3];
        shift[axis] = max[axis] - min[axis];
        periodic.push(PeriodicMarkerConfig::translation_only(lo_tag, shift));
        shift[axis] = -shift[axis];
        periodic.push(PeriodicMarkerConfig::translation_only(hi_tag, shift));
        periodic_faces.push((lo_tag, lo));
        periodic_faces.push((hi_tag, hi));
    }
    mesh.close_boundary(WALL_TAG)?;
    for (tag, faces) in periodic_faces {
        mesh.add_marker(tag, true, faces)?;
    }
    Ok(GeneratedMesh { mesh, periodic })
}

/// Generate a structured quadrilateral mesh over `[min, max]` with `nx`×`ny` cells.
pub fn quad_mesh(
    nx: usize,
    ny: usize,
    min: [f64; 2],
    max: [f64; 2],
    options: MeshGenerationOptions,
) -> Result<GeneratedMesh, DgMeshError> {
    if nx == 0 || ny == 0 {
        return Err(invalid_geometry("nx and ny must be positive"));
    }
    structured(
        2,
        [nx, ny, 1],
        [min[0], min[1], 0.0],
        [max[0], max[1], 0.0],
        options,
    )
}

/// Generate a structured hexahedral mesh over `[min, max]` with `nx`×`ny`×`nz` cells.
pub fn hex_mesh(
    nx: usize,
    ny: usize,
    nz: usize,
    min: [f64; 3],
    max: [f64; 3],
    options: MeshGenerationOptions,
) -> Result<GeneratedMesh, DgMeshError> {
    if nx == 0 || ny == 0 || nz == 0 {
        return Err(invalid_geometry("nx, ny, and nz must be positive"));
    }
    structured(3, [nx, ny, nz], min, max, options)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::algs::distribute::SourceMesh;

    #[test]
    fn quad_mesh_counts() {
        let g = quad_mesh(3, 2, [0.0, 0.0], [3.0, 2.0], MeshGenerationOptions::default()).unwrap();
        let m = &g.mesh;
        assert_eq!(m.elements().len(), 6);
        assert_eq!(m.markers().len(), 1);
        assert_eq!(m.markers()[0].elements.len(), 10);
        assert!(g.periodic.is_empty());
        assert_eq!(m.point_coord(11), Some([3.0, 2.0, 0.0]));
        assert_eq!(m.elements()[4].nodes, vec![5, 6, 9, 10]);
    }

    #[test]
    fn quadratic_hex_nodes_are_lattice_ordered() {
        let opts = MeshGenerationOptions {
            p_grid: 2,
            ..Default::default()
        };
        let g = hex_mesh(1, 1, 1, [0.0; 3], [1.0; 3], opts).unwrap();
        let e = &g.mesh.elements()[0];
        assert_eq!(e.nodes.len(), 27);
        assert_eq!(e.nodes[..3], [0, 1, 2]);
        assert_eq!(g.mesh.point_coord(e.nodes[13]), Some([0.5, 0.5, 0.5]));
        assert_eq!(g.mesh.markers()[0].elements.len(), 6);
        assert_eq!(g.mesh.markers()[0].elements[0].nodes.len(), 9);
    }

    #[test]
    fn periodic_axis_adds_marker_pair() {
        let opts = MeshGenerationOptions {
            periodic: Periodicity {
                x: true,
                ..Periodicity::none()
            },
            ..Default::default()
        };
        let g = quad_mesh(2, 1, [0.0, 0.0], [2.0, 1.0], opts).unwrap();
        let tags: Vec<u16> = g.mesh.markers().iter().map(|m| m.tag).collect();
        assert_eq!(tags, vec![WALL_TAG, 1, 2]);
        assert_eq!(g.mesh.markers()[0].elements.len(), 4);
        assert_eq!(g.mesh.elements()[0].neighbors[3], Some(1));
        assert_eq!(g.mesh.elements()[0].periodic[3], Some(1));
        assert_eq!(g.periodic[0].translation, [2.0, 0.0, 0.0]);
        assert_eq!(g.periodic[1].translation, [-2.0, 0.0, 0.0]);
    }

    #[test]
    fn empty_direction_is_rejected() {
        let res = quad_mesh(0, 1, [0.0, 0.0], [1.0, 1.0], MeshGenerationOptions::default());
        assert!(matches!(res, Err(DgMeshError::InvalidConfig(_))));
    }
}
