//! Metric terms of owned elements, matching faces and boundary faces.
//!
//! Coordinate gradients come from one matrix product per element or face
//! side: the stacked reference derivatives of the grid basis, `[dir][point]
//! [dof]`, times the node coordinates, `[dof][coord]`. The result is laid out
//! as `((dir * n_int + point) * n_dim + coord)`.
//!
//! Per owned element:
//! - `volume`: `J` followed by `J * dr_d/dx_c` (row-major in `(d, c)`) per
//!   integration point, 5 values in 2D and 10 in 3D;
//! - `coord_derivatives`: `dr_d/dx_c` per integration point;
//! - the mass matrix variants of the time marching mode.
//!
//! Per face: unit normal and area element per integration point, pointing
//! out of the side-0 element, then per side the coordinate derivatives and
//! the SIP terms `len * (grad(phi) . n)` for every solution DOF.

use crate::algs::distribute::DistributedMesh;
use crate::algs::linalg::LinearAlgebra;
use crate::config::DgMeshConfig;
use crate::discretization::basis::BasisTabulation;
use crate::discretization::cache::StandardElementCache;
use crate::geometry::arena::MetricArena;
use crate::geometry::mass::{MassMatrices, mass_matrices};
use crate::mesh_error::DgMeshError;
use crate::topology::element::{
    ElementMetrics, FaceMetrics, FaceSideDofs, MatchingFace, VolumeElement,
};
use crate::topology::point::PointRegistry;

/// Normal lengths below this are treated as degenerate.
const MIN_LENGTH: f64 = 1e-50;

/// Row-major `n_nodes × dim` coordinates of `nodes`.
pub fn gather_coords(points: &PointRegistry, nodes: &[usize], dim: usize) -> Vec<f64> {
    let mut out = Vec::with_capacity(nodes.len() * dim);
    for &n in nodes {
        out.extend_from_slice(&points.coord(n)[..dim]);
    }
    out
}

/// `dx_c/dr_d` at every tabulated point, laid out `((d * n_int + pt) * dim + c)`.
pub fn coordinate_gradients(
    la: &dyn LinearAlgebra,
    basis: &BasisTabulation,
    coords: &[f64],
    dim: usize,
) -> Vec<f64> {
    let n_dir = basis.derivatives.len();
    let rows = n_dir * basis.n_points;
    let mut out = vec![0.0; rows * dim];
    la.matmul(rows, basis.n_dofs, dim, &basis.stacked_derivatives(), coords, &mut out);
    out
}

/// `a[c][d] = dx_c/dr_d` at integration point `pt`.
fn jacobian_at(dxdr: &[f64], pt: usize, n_int: usize, dim: usize, n_dir: usize) -> [[f64; 3]; 3] {
    let mut a = [[0.0; 3]; 3];
    for d in 0..n_dir {
        for c in 0..dim {
            a[c][d] = dxdr[(d * n_int + pt) * dim + c];
        }
    }
    a
}

/// Adjugate and determinant; `adj[d][c] = J * dr_d/dx_c`.
pub fn adjugate(a: &[[f64; 3]; 3], dim: usize) -> ([[f64; 3]; 3], f64) {
    let mut adj = [[0.0; 3]; 3];
    if dim == 2 {
        adj[0][0] = a[1][1];
        adj[0][1] = -a[0][1];
        adj[1][0] = -a[1][0];
        adj[1][1] = a[0][0];
        return (adj, a[0][0] * a[1][1] - a[0][1] * a[1][0]);
    }
    adj[0][0] = a[1][1] * a[2][2] - a[1][2] * a[2][1];
    adj[0][1] = a[0][2] * a[2][1] - a[0][1] * a[2][2];
    adj[0][2] = a[0][1] * a[1][2] - a[0][2] * a[1][1];
    adj[1][0] = a[1][2] * a[2][0] - a[1][0] * a[2][2];
    adj[1][1] = a[0][0] * a[2][2] - a[0][2] * a[2][0];
    adj[1][2] = a[0][2] * a[1][0] - a[0][0] * a[1][2];
    adj[2][0] = a[1][0] * a[2][1] - a[1][1] * a[2][0];
    adj[2][1] = a[0][1] * a[2][0] - a[0][0] * a[2][1];
    adj[2][2] = a[0][0] * a[1][1] - a[0][1] * a[1][0];
    let det = a[0][0] * adj[0][0] + a[0][1] * adj[1][0] + a[0][2] * adj[2][0];
    (adj, det)
}

/// Unit normal and length from the face tangents at one point. 2D faces
/// are traversed counter-clockwise around side 0; 3D face tangents satisfy
/// `t_r x t_s` pointing into side 0.
pub fn face_normal(t: &[[f64; 3]; 3], dim: usize) -> ([f64; 3], f64) {
    // t[c][d]: component c of tangent d
    let raw = if dim == 2 {
        [t[1][0], -t[0][0], 0.0]
    } else {
        let (r, s) = ([t[0][0], t[1][0], t[2][0]], [t[0][1], t[1][1], t[2][1]]);
        [
            -(r[1] * s[2] - r[2] * s[1]),
            -(r[2] * s[0] - r[0] * s[2]),
            -(r[0] * s[1] - r[1] * s[0]),
        ]
    };
    let len = raw.iter().map(|x| x * x).sum::<f64>().sqrt();
    let inv = if len < MIN_LENGTH { 1.0 / MIN_LENGTH } else { 1.0 / len };
    (raw.map(|x| x * inv), len)
}

struct VolumeBuffers {
    volume: Vec<f64>,
    coord_derivatives: Vec<f64>,
    mass: MassMatrices,
}

#[derive(Default)]
struct FaceBuffers {
    normals: Vec<f64>,
    coord_derivatives: [Vec<f64>; 2],
    sip: [Vec<f64>; 2],
}

impl FaceBuffers {
    fn len(&self) -> usize {
        self.normals.len()
            + self.coord_derivatives.iter().map(Vec::len).sum::<usize>()
            + self.sip.iter().map(Vec::len).sum::<usize>()
    }

    fn store(self, arena: &mut MetricArena) -> FaceMetrics {
        FaceMetrics {
            normals: arena.push(&self.normals),
            coord_derivatives: self.coord_derivatives.map(|b| arena.push(&b)),
            sip: self.sip.map(|b| arena.push(&b)),
        }
    }
}

#[cfg(feature = "rayon")]
fn map_indexed<T, F>(n: usize, f: F) -> Result<Vec<T>, DgMeshError>
where
    T: Send,
    F: Fn(usize) -> Result<T, DgMeshError> + Sync + Send,
{
    use rayon::prelude::*;
    (0..n).into_par_iter().map(f).collect()
}

#[cfg(not(feature = "rayon"))]
fn map_indexed<T, F>(n: usize, f: F) -> Result<Vec<T>, DgMeshError>
where
    F: Fn(usize) -> Result<T, DgMeshError>,
{
    (0..n).map(f).collect()
}

fn missing_standard(what: &str) -> DgMeshError {
    DgMeshError::MeshInconsistency(format!("{what} has no standard element"))
}

/// Computes all metric buffers of a mesh after face construction.
pub struct MetricEngine<'a> {
    config: &'a DgMeshConfig,
    la: &'a dyn LinearAlgebra,
}

impl<'a> MetricEngine<'a> {
    pub fn new(config: &'a DgMeshConfig, la: &'a dyn LinearAlgebra) -> Self {
        Self { config, la }
    }

    /// Fill the metric spans of the owned elements, of `faces` and of the
    /// boundary faces of the non-periodic markers. All buffers share the
    /// returned arena, allocated once at its final size.
    pub fn compute(
        &self,
        mesh: &mut DistributedMesh,
        faces: &mut [MatchingFace],
        cache: &StandardElementCache,
    ) -> Result<MetricArena, DgMeshError> {
        let dim = mesh.dim;
        let volumes = {
            let (elements, points) = (&mesh.elements, &mesh.points);
            map_indexed(mesh.n_owned, |i| {
                self.volume_buffers(&elements[i], points, dim, cache)
            })?
        };
        let matching = {
            let faces_ref: &[MatchingFace] = faces;
            let points = &mesh.points;
            map_indexed(faces_ref.len(), |i| {
                let f = &faces_ref[i];
                self.face_buffers(
                    points,
                    dim,
                    cache,
                    f.std_sol,
                    f.std_grid,
                    &[&f.sides[0], &f.sides[1]],
                )
            })?
        };
        let mut boundary = Vec::new();
        for (m, marker) in mesh.markers.iter().enumerate().filter(|(_, m)| !m.periodic) {
            for (k, s) in marker.surface.iter().enumerate() {
                let (Some(dofs), Some(ss), Some(sg)) = (&s.dofs, s.std_sol, s.std_grid) else {
                    return Err(missing_standard(&format!("boundary element {}", s.global_id)));
                };
                let buffers = self.face_buffers(&mesh.points, dim, cache, ss, sg, &[dofs])?;
                boundary.push((m, k, buffers));
            }
        }

        let total = volumes
            .iter()
            .map(|v| v.volume.len() + v.coord_derivatives.len() + v.mass.len())
            .sum::<usize>()
            + matching.iter().map(FaceBuffers::len).sum::<usize>()
            + boundary.iter().map(|(_, _, b)| b.len()).sum::<usize>();
        let mut arena = MetricArena::with_capacity(total);

        for (e, v) in mesh.elements.iter_mut().zip(volumes) {
            let push = |arena: &mut MetricArena, m: Option<Vec<f64>>| {
                m.map(|b| arena.push(&b)).unwrap_or_default()
            };
            e.metrics = ElementMetrics {
                volume: arena.push(&v.volume),
                coord_derivatives: arena.push(&v.coord_derivatives),
                mass_full: push(&mut arena, v.mass.full),
                mass_full_inverse: push(&mut arena, v.mass.full_inverse),
                mass_lumped: push(&mut arena, v.mass.lumped),
            };
        }
        for (f, b) in faces.iter_mut().zip(matching) {
            f.metrics = b.store(&mut arena);
        }
        let n_boundary = boundary.len();
        for (m, k, b) in boundary {
            mesh.markers[m].surface[k].metrics = b.store(&mut arena);
        }
        log::info!(
            "metrics of {} elements, {} matching and {} boundary faces: {} values",
            mesh.n_owned,
            faces.len(),
            n_boundary,
            arena.len()
        );
        Ok(arena)
    }

    fn volume_buffers(
        &self,
        e: &VolumeElement,
        points: &PointRegistry,
        dim: usize,
        cache: &StandardElementCache,
    ) -> Result<VolumeBuffers, DgMeshError> {
        let (Some(is), Some(ig)) = (e.std_sol, e.std_grid) else {
            return Err(missing_standard(&format!("element {}", e.global_id)));
        };
        let (sol, grid) = (cache.volume(is), cache.volume(ig));
        let n_int = grid.n_integration();
        let coords = gather_coords(points, &e.nodes, dim);
        let dxdr = coordinate_gradients(self.la, &grid.basis, &coords, dim);

        let mut volume = Vec::with_capacity(n_int * (1 + dim * dim));
        let mut coord_derivatives = Vec::with_capacity(n_int * dim * dim);
        let mut jac = Vec::with_capacity(n_int);
        for pt in 0..n_int {
            let (adj, det) = adjugate(&jacobian_at(&dxdr, pt, n_int, dim, dim), dim);
            if !(det > 0.0) {
                return Err(DgMeshError::GeometryDegeneracy(format!(
                    "element {} has Jacobian {det:e} at integration point {pt}",
                    e.global_id
                )));
            }
            jac.push(det);
            volume.push(det);
            for row in &adj[..dim] {
                for &v in &row[..dim] {
                    volume.push(v);
                    coord_derivatives.push(v / det);
                }
            }
        }
        let kinds = self.config.time_marching.mass_matrix_kinds();
        let mass = mass_matrices(kinds, sol, &jac, self.la).map_err(|err| match err {
            DgMeshError::GeometryDegeneracy(msg) => {
                DgMeshError::GeometryDegeneracy(format!("element {}: {msg}", e.global_id))
            }
            other => other,
        })?;
        Ok(VolumeBuffers {
            volume,
            coord_derivatives,
            mass,
        })
    }

    fn face_buffers(
        &self,
        points: &PointRegistry,
        dim: usize,
        cache: &StandardElementCache,
        std_sol: usize,
        std_grid: usize,
        sides: &[&FaceSideDofs],
    ) -> Result<FaceBuffers, DgMeshError> {
        let (sol, grid) = (cache.face(std_sol), cache.face(std_grid));
        let n_int = grid.n_integration();
        let mut out = FaceBuffers::default();

        let face_coords = gather_coords(points, &sides[0].grid_face, dim);
        let tangents = coordinate_gradients(self.la, &grid.face_basis, &face_coords, dim);
        let n_dir = grid.face_basis.derivatives.len();
        let mut normals = Vec::with_capacity(n_int);
        out.normals.reserve(n_int * (dim + 1));
        for pt in 0..n_int {
            let (n, len) = face_normal(&jacobian_at(&tangents, pt, n_int, dim, n_dir), dim);
            out.normals.extend_from_slice(&n[..dim]);
            out.normals.push(len);
            normals.push((n, len));
        }

        for (k, side) in sides.iter().enumerate() {
            let (Some(gs), Some(ss)) = (grid.sides.get(k), sol.sides.get(k)) else {
                return Err(missing_standard("face side"));
            };
            let coords = gather_coords(points, &side.grid_elem, dim);
            let dxdr = coordinate_gradients(self.la, &gs.elem_basis, &coords, dim);
            let dphi = &ss.elem_basis;
            let n_dofs = dphi.n_dofs;
            let mut derivs = Vec::with_capacity(n_int * dim * dim);
            let mut sip = Vec::with_capacity(n_int * n_dofs);
            for (pt, &(n, len)) in normals.iter().enumerate() {
                let (adj, det) = adjugate(&jacobian_at(&dxdr, pt, n_int, dim, dim), dim);
                if det.abs() < f64::MIN_POSITIVE {
                    return Err(DgMeshError::GeometryDegeneracy(format!(
                        "singular element Jacobian at face integration point {pt}"
                    )));
                }
                let mut drdx = [[0.0; 3]; 3];
                for d in 0..dim {
                    for c in 0..dim {
                        drdx[d][c] = adj[d][c] / det;
                        derivs.push(drdx[d][c]);
                    }
                }
                // dr_d/dn, so that grad(phi) . n = sum_d dphi/dr_d * dr_d/dn
                let mut drdn = [0.0; 3];
                for d in 0..dim {
                    drdn[d] = (0..dim).map(|c| drdx[d][c] * n[c]).sum();
                }
                for dof in 0..n_dofs {
                    let g: f64 = (0..dim)
                        .map(|d| dphi.derivatives[d][pt * n_dofs + dof] * drdn[d])
                        .sum();
                    sip.push(len * g);
                }
            }
            out.coord_derivatives[k] = derivs;
            out.sip[k] = sip;
        }
        Ok(out)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn adjugate_inverts() {
        let a = [[2.0, 1.0, 0.0], [0.0, 3.0, 1.0], [1.0, 0.0, 1.0]];
        let (adj, det) = adjugate(&a, 3);
        assert!((det - 7.0).abs() < 1e-14);
        for i in 0..3 {
            for j in 0..3 {
                let p: f64 = (0..3).map(|k| a[i][k] * adj[k][j]).sum();
                let e = if i == j { det } else { 0.0 };
                assert!((p - e).abs() < 1e-12);
            }
        }
        let (adj2, det2) = adjugate(&[[2.0, 0.5, 0.0], [0.0, 4.0, 0.0], [0.0; 3]], 2);
        assert!((det2 - 8.0).abs() < 1e-14);
        assert_eq!(adj2[0][1], -0.5);
    }

    #[test]
    fn normal_2d_points_right_of_tangent() {
        // tangent along +x: counter-clockwise bottom edge, outward is -y
        let mut t = [[0.0; 3]; 3];
        t[0][0] = 2.0;
        let (n, len) = face_normal(&t, 2);
        assert_eq!(len, 2.0);
        assert!((n[1] + 1.0).abs() < 1e-15 && n[0].abs() < 1e-15);
    }

    #[test]
    fn normal_3d_opposes_inward_cross_product() {
        // t_r = x, t_s = y: t_r x t_s = +z points into side 0
        let mut t = [[0.0; 3]; 3];
        t[0][0] = 1.0;
        t[1][1] = 1.0;
        let (n, len) = face_normal(&t, 3);
        assert_eq!(len, 1.0);
        assert_eq!(n, [0.0, 0.0, -1.0]);
    }

    #[test]
    fn degenerate_normal_stays_finite() {
        let (n, len) = face_normal(&[[0.0; 3]; 3], 3);
        assert_eq!(len, 0.0);
        assert!(n.iter().all(|x| x.is_finite()));
    }
}
