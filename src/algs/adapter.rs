//! Face connectivity adapters.
//!
//! For a face given by its canonical corner points, an adjacent element is
//! renumbered so that this face becomes its face 0: face corner 0 at the
//! lattice origin, corner 1 along the `i` axis and the last corner (triangle)
//! or corner 3 (quadrilateral) along the `j` axis. The renumbering is an
//! affine map of the integer lattice coordinates, fixed entirely by where the
//! face corners sit among the element corners:
//! - simplices: a permutation of the barycentric lattice coordinates;
//! - quadrilaterals and hexahedra: a signed axis permutation of the cube;
//! - prisms: a permutation of the triangle coordinates, possibly `k -> p - k`;
//! - pyramids: a symmetry of the square on every level `k`.
//!
//! Prism quadrilateral faces and pyramid triangular faces report `swap` when
//! face corner 1 lies along the prism extrusion or at the pyramid apex; the
//! face lattice then runs along the element axes transposed.

use crate::discretization::lattice::{Lattice, lattice_index, lattice_points};
use crate::mesh_error::DgMeshError;
use crate::topology::cell_type::CellType;

/// Element DOFs renumbered for one face, plus the face DOFs.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct FaceConnectivity<T> {
    pub swap: bool,
    /// Element DOFs in the renumbered order.
    pub elem_dofs: Vec<T>,
    /// Face DOFs in face lattice order.
    pub face_dofs: Vec<T>,
}

/// Shape of a face from its number of corners.
pub fn face_shape_of(n_corners: usize) -> Result<CellType, DgMeshError> {
    match n_corners {
        2 => Ok(CellType::Line),
        3 => Ok(CellType::Triangle),
        4 => Ok(CellType::Quadrilateral),
        n => Err(DgMeshError::CorrespondenceFailure(format!(
            "a face with {n} corners"
        ))),
    }
}

/// Renumbered lattice → original lattice.
#[derive(Clone, Copy, Debug)]
enum LatticeMap {
    /// New vertex `n` is old vertex `perm[n]`.
    Simplex { perm: [usize; 4] },
    /// `old = origin * p + i' e_i + j' e_j + k' e_k`.
    Tensor { origin: [i64; 3], axes: [[i64; 3]; 3] },
    /// Triangle permutation plus optional reversal of `k`.
    Prism { perm: [usize; 3], flip_k: bool },
    /// Square symmetry applied on each level of size `p - k`.
    Pyramid { origin: [i64; 2], axes: [[i64; 2]; 2] },
}

impl LatticeMap {
    fn old_of(&self, p: usize, new: Lattice) -> Lattice {
        let [i, j, k] = new;
        match *self {
            LatticeMap::Simplex { perm } => {
                let bn = [p - i - j - k, i, j, k];
                let mut b = [0usize; 4];
                for n in 0..4 {
                    b[perm[n]] = bn[n];
                }
                [b[1], b[2], b[3]]
            }
            LatticeMap::Tensor { origin, axes } => {
                let pn = p as i64;
                let mut old = [0i64; 3];
                for d in 0..3 {
                    old[d] = origin[d] * pn
                        + i as i64 * axes[0][d]
                        + j as i64 * axes[1][d]
                        + k as i64 * axes[2][d];
                }
                old.map(|x| x as usize)
            }
            LatticeMap::Prism { perm, flip_k } => {
                let bn = [p - i - j, i, j];
                let mut b = [0usize; 3];
                for n in 0..3 {
                    b[perm[n]] = bn[n];
                }
                [b[1], b[2], if flip_k { p - k } else { k }]
            }
            LatticeMap::Pyramid { origin, axes } => {
                let m = (p - k) as i64;
                let mut old = [0i64; 2];
                for d in 0..2 {
                    old[d] = origin[d] * m + i as i64 * axes[0][d] + j as i64 * axes[1][d];
                }
                [old[0] as usize, old[1] as usize, k]
            }
        }
    }
}

/// Unit-square position of quadrilateral vertex `v` (also pyramid base and
/// hexahedron layers).
fn square_pos(v: usize) -> [i64; 2] {
    match v % 4 {
        0 => [0, 0],
        1 => [1, 0],
        2 => [1, 1],
        _ => [0, 1],
    }
}

fn cube_pos(v: usize) -> [i64; 3] {
    let [x, y] = square_pos(v);
    [x, y, (v / 4) as i64]
}

fn is_unit_axis<const N: usize>(e: &[i64; N]) -> bool {
    e.iter().map(|x| x.abs()).sum::<i64>() == 1
}

fn mismatch(elem: CellType, face: &[usize]) -> DgMeshError {
    DgMeshError::CorrespondenceFailure(format!(
        "face corners {face:?} do not map onto a face of the {elem:?}"
    ))
}

fn remaining(used: &[usize], n: usize) -> Option<usize> {
    (0..n).find(|v| !used.contains(v))
}

fn lattice_map(
    elem: CellType,
    verts: &[usize],
) -> Result<(LatticeMap, bool), DgMeshError> {
    let err = || mismatch(elem, verts);
    match (elem, verts.len()) {
        (CellType::Triangle, 2) => {
            let r = remaining(verts, 3).ok_or_else(err)?;
            Ok((LatticeMap::Simplex { perm: [verts[0], verts[1], r, 3] }, false))
        }
        (CellType::Tetrahedron, 3) => {
            let r = remaining(verts, 4).ok_or_else(err)?;
            Ok((LatticeMap::Simplex { perm: [verts[0], verts[1], verts[2], r] }, false))
        }
        (CellType::Quadrilateral, 2) => {
            let o = square_pos(verts[0]);
            let c1 = square_pos(verts[1]);
            let ei = [c1[0] - o[0], c1[1] - o[1]];
            if !is_unit_axis(&ei) {
                return Err(err());
            }
            let a = if ei[0] == 0 { 0 } else { 1 };
            let mut ej = [0i64; 2];
            ej[a] = if o[a] == 0 { 1 } else { -1 };
            Ok((
                LatticeMap::Tensor {
                    origin: [o[0], o[1], 0],
                    axes: [[ei[0], ei[1], 0], [ej[0], ej[1], 0], [0, 0, 0]],
                },
                false,
            ))
        }
        (CellType::Hexahedron, 4) => {
            let o = cube_pos(verts[0]);
            let c1 = cube_pos(verts[1]);
            let c3 = cube_pos(verts[3]);
            let ei = [c1[0] - o[0], c1[1] - o[1], c1[2] - o[2]];
            let ej = [c3[0] - o[0], c3[1] - o[1], c3[2] - o[2]];
            if !is_unit_axis(&ei) || !is_unit_axis(&ej) {
                return Err(err());
            }
            let a = (0..3).find(|&d| ei[d] == 0 && ej[d] == 0).ok_or_else(err)?;
            let mut ek = [0i64; 3];
            ek[a] = if o[a] == 0 { 1 } else { -1 };
            // the opposite corner must close the face
            let c2 = cube_pos(verts[2]);
            if (0..3).any(|d| c2[d] != o[d] + ei[d] + ej[d]) {
                return Err(err());
            }
            Ok((LatticeMap::Tensor { origin: o, axes: [ei, ej, ek] }, false))
        }
        (CellType::Prism, 3) => {
            let layer = verts[0] / 3;
            if verts.iter().any(|&v| v / 3 != layer) {
                return Err(err());
            }
            let t = [verts[0] % 3, verts[1] % 3, verts[2] % 3];
            Ok((LatticeMap::Prism { perm: t, flip_k: layer == 1 }, false))
        }
        (CellType::Prism, 4) => {
            let (v0, v1, v3) = (verts[0], verts[1], verts[3]);
            // the triangle edge partner of corner 0 is corner 1 or corner 3
            let swap = v1 % 3 == v0 % 3;
            let partner = if swap { v3 } else { v1 };
            let along_k = if swap { v1 } else { v3 };
            if partner / 3 != v0 / 3 || along_k % 3 != v0 % 3 || along_k == v0 {
                return Err(err());
            }
            let t0 = v0 % 3;
            let t1 = partner % 3;
            let t2 = remaining(&[t0, t1], 3).ok_or_else(err)?;
            Ok((
                LatticeMap::Prism {
                    perm: [t0, t1, t2],
                    flip_k: v0 / 3 == 1,
                },
                swap,
            ))
        }
        (CellType::Pyramid, 4) => {
            if verts.contains(&CellType::PYRAMID_APEX) {
                return Err(err());
            }
            square_map(verts[0], verts[1], verts[3]).map(|m| (m, false)).ok_or_else(err)
        }
        (CellType::Pyramid, 3) => {
            let apex = CellType::PYRAMID_APEX;
            let swap = match (verts[1] == apex, verts[2] == apex) {
                (true, false) => true,
                (false, true) => false,
                _ => return Err(err()),
            };
            let b0 = verts[0];
            let b1 = if swap { verts[2] } else { verts[1] };
            // the other base neighbor of b0
            let other = [(b0 + 1) % 4, (b0 + 3) % 4]
                .into_iter()
                .find(|&v| v != b1)
                .ok_or_else(err)?;
            square_map(b0, b1, other).map(|m| (m, swap)).ok_or_else(err)
        }
        _ => Err(err()),
    }
}

fn square_map(v0: usize, v1: usize, v3: usize) -> Option<LatticeMap> {
    let o = square_pos(v0);
    let a = square_pos(v1);
    let b = square_pos(v3);
    let ei = [a[0] - o[0], a[1] - o[1]];
    let ej = [b[0] - o[0], b[1] - o[1]];
    if v0 > 3 || v1 > 3 || v3 > 3 || !is_unit_axis(&ei) || !is_unit_axis(&ej) || ei == ej {
        return None;
    }
    Some(LatticeMap::Pyramid { origin: o, axes: [ei, ej] })
}

/// Element lattice point of face lattice point `(a, b)` on face 0 of the
/// renumbered element.
pub fn face_lattice_in_element(elem: CellType, face: CellType, swap: bool, l: Lattice) -> Lattice {
    let [a, b, _] = l;
    match (elem, face) {
        (CellType::Prism, CellType::Quadrilateral) | (CellType::Pyramid, CellType::Triangle) => {
            if swap {
                [b, 0, a]
            } else {
                [a, 0, b]
            }
        }
        _ => [a, b, 0],
    }
}

/// Renumber the DOFs `conn` (degree `p_conn`) of an element so that the face
/// with corner points `face_corners` becomes face 0.
///
/// `grid_nodes` are the element's grid node IDs (degree `p_grid`), used only
/// to locate the face corners among the element corners.
pub fn renumber_for_face<T: Copy>(
    elem: CellType,
    p_grid: usize,
    grid_nodes: &[usize],
    face_corners: &[usize],
    p_conn: usize,
    conn: &[T],
) -> Result<FaceConnectivity<T>, DgMeshError> {
    let corner_ids: Vec<usize> = elem
        .corner_dofs(p_grid)
        .into_iter()
        .map(|d| grid_nodes.get(d).copied())
        .collect::<Option<_>>()
        .ok_or_else(|| {
            DgMeshError::MeshInconsistency(format!(
                "{elem:?} of degree {p_grid} has only {} grid nodes",
                grid_nodes.len()
            ))
        })?;
    let verts: Vec<usize> = face_corners
        .iter()
        .map(|c| corner_ids.iter().position(|id| id == c))
        .collect::<Option<_>>()
        .ok_or_else(|| mismatch(elem, face_corners))?;

    let face = face_shape_of(face_corners.len())?;
    let (map, swap) = lattice_map(elem, &verts)?;

    if conn.len() != elem.n_dofs(p_conn) {
        return Err(DgMeshError::MeshInconsistency(format!(
            "{elem:?} of degree {p_conn} expects {} DOFs, got {}",
            elem.n_dofs(p_conn),
            conn.len()
        )));
    }
    let elem_dofs: Vec<T> = lattice_points(elem, p_conn)
        .into_iter()
        .map(|l| conn[lattice_index(elem, p_conn, map.old_of(p_conn, l))])
        .collect();
    let face_dofs: Vec<T> = lattice_points(face, p_conn)
        .into_iter()
        .map(|l| {
            let lat = face_lattice_in_element(elem, face, swap, l);
            elem_dofs[lattice_index(elem, p_conn, lat)]
        })
        .collect();

    Ok(FaceConnectivity {
        swap,
        elem_dofs,
        face_dofs,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::discretization::lattice::tri_index;
    use proptest::prelude::*;

    /// Face corner point IDs of face `f` of an element whose grid nodes are 0..n.
    fn corners_of(elem: CellType, p: usize, f: usize) -> Vec<usize> {
        let c = elem.corner_dofs(p);
        elem.face_vertices(f).iter().map(|&v| c[v]).collect()
    }

    fn rotations(c: &[usize]) -> Vec<Vec<usize>> {
        let n = c.len();
        let mut out = Vec::new();
        for s in 0..n {
            let fwd: Vec<usize> = (0..n).map(|t| c[(s + t) % n]).collect();
            let mut bwd = fwd.clone();
            bwd[1..].reverse();
            out.push(fwd);
            out.push(bwd);
        }
        out
    }

    const ALL_2D_3D: [CellType; 6] = [
        CellType::Triangle,
        CellType::Quadrilateral,
        CellType::Tetrahedron,
        CellType::Hexahedron,
        CellType::Prism,
        CellType::Pyramid,
    ];

    #[test]
    fn identity_for_face_zero() {
        for elem in ALL_2D_3D {
            let p = 2;
            let nodes: Vec<usize> = (0..elem.n_dofs(p)).collect();
            let fc = corners_of(elem, p, 0);
            let r = renumber_for_face(elem, p, &nodes, &fc, p, &nodes).unwrap();
            assert_eq!(r.elem_dofs, nodes, "{elem:?}");
            assert!(!r.swap);
        }
    }

    #[test]
    fn face_corners_become_face_dof_corners() {
        for elem in ALL_2D_3D {
            for p in 1..=3 {
                let nodes: Vec<usize> = (0..elem.n_dofs(p)).collect();
                for f in 0..elem.n_faces() {
                    for fc in rotations(&corners_of(elem, p, f)) {
                        if elem == CellType::Pyramid
                            && fc.len() == 3
                            && fc[0] == nodes[elem.n_dofs(p) - 1]
                        {
                            continue;
                        }
                        let r = renumber_for_face(elem, p, &nodes, &fc, p, &nodes).unwrap();
                        let face = face_shape_of(fc.len()).unwrap();
                        let fcd = face.corner_dofs(p);
                        let got: Vec<usize> = fcd.iter().map(|&d| r.face_dofs[d]).collect();
                        assert_eq!(got, fc, "{elem:?} p={p} face {f}");
                        // renumbering is a permutation
                        let mut sorted = r.elem_dofs.clone();
                        sorted.sort_unstable();
                        assert_eq!(sorted, nodes);
                    }
                }
            }
        }
    }

    #[test]
    fn swap_flags() {
        let p = 1;
        let prism: Vec<usize> = (0..6).collect();
        // corner 1 along the extrusion
        let r = renumber_for_face(CellType::Prism, p, &prism, &[0, 3, 4, 1], p, &prism).unwrap();
        assert!(r.swap);
        let r = renumber_for_face(CellType::Prism, p, &prism, &[0, 1, 4, 3], p, &prism).unwrap();
        assert!(!r.swap);
        let pyr: Vec<usize> = (0..5).collect();
        let r = renumber_for_face(CellType::Pyramid, p, &pyr, &[0, 4, 1], p, &pyr).unwrap();
        assert!(r.swap);
        let r = renumber_for_face(CellType::Pyramid, p, &pyr, &[1, 0, 4], p, &pyr).unwrap();
        assert!(!r.swap);
        let err = renumber_for_face(CellType::Pyramid, p, &pyr, &[4, 0, 1], p, &pyr);
        assert!(matches!(err, Err(DgMeshError::CorrespondenceFailure(_))));
    }

    #[test]
    fn unknown_corner_is_a_correspondence_failure() {
        let hex: Vec<usize> = (0..8).collect();
        let res = renumber_for_face(CellType::Hexahedron, 1, &hex, &[0, 1, 2, 99], 1, &hex);
        assert!(matches!(res, Err(DgMeshError::CorrespondenceFailure(_))));
        // diagonal "face"
        let res = renumber_for_face(CellType::Hexahedron, 1, &hex, &[0, 2, 6, 4], 1, &hex);
        assert!(matches!(res, Err(DgMeshError::CorrespondenceFailure(_))));
    }

    /// Affine case table for a line on a triangle: `(vert0, vert1) -> (a,b,c,d,e,f)`
    /// with `ii = a + b i + c j`, `jj = d + e i + f j`.
    fn line_in_triangle_table(p: i64) -> Vec<((usize, usize), [i64; 6])> {
        vec![
            ((0, 1), [0, 1, 0, 0, 0, 1]),
            ((0, 2), [0, 0, 1, 0, 1, 0]),
            ((1, 2), [0, 0, 1, p, -1, -1]),
            ((1, 0), [p, -1, -1, 0, 0, 1]),
            ((2, 0), [p, -1, -1, 0, 1, 0]),
            ((2, 1), [0, 1, 0, p, -1, -1]),
        ]
    }

    #[test]
    fn line_in_triangle_matches_case_table() {
        for p in 1..=4usize {
            let nodes: Vec<usize> = (0..CellType::Triangle.n_dofs(p)).collect();
            let corners = CellType::Triangle.corner_dofs(p);
            for ((v0, v1), [a, b, c, d, e, f]) in line_in_triangle_table(p as i64) {
                let fc = [corners[v0], corners[v1]];
                let r = renumber_for_face(CellType::Triangle, p, &nodes, &fc, p, &nodes).unwrap();
                let mut want = vec![usize::MAX; nodes.len()];
                let mut ind = 0;
                for j in 0..=p {
                    for i in 0..=p - j {
                        let (ii, jj) = (i as i64, j as i64);
                        let ni = (a + b * ii + c * jj) as usize;
                        let nj = (d + e * ii + f * jj) as usize;
                        want[tri_index(p, ni, nj)] = nodes[ind];
                        ind += 1;
                    }
                }
                assert_eq!(r.elem_dofs, want, "p={p} corners ({v0},{v1})");
            }
        }
    }

    #[test]
    fn triangle_in_prism_matches_case_table() {
        // (corner vertices) -> (a,b,c,d,e,f,g,h), kk = g + h k
        let p = 2usize;
        let pn = p as i64;
        let table: Vec<([usize; 3], [i64; 8])> = vec![
            ([0, 1, 2], [0, 1, 0, 0, 0, 1, 0, 1]),
            ([0, 2, 1], [0, 0, 1, 0, 1, 0, 0, 1]),
            ([1, 0, 2], [pn, -1, -1, 0, 0, 1, 0, 1]),
            ([1, 2, 0], [0, 0, 1, pn, -1, -1, 0, 1]),
            ([2, 0, 1], [pn, -1, -1, 0, 1, 0, 0, 1]),
            ([2, 1, 0], [0, 1, 0, pn, -1, -1, 0, 1]),
            ([3, 4, 5], [0, 1, 0, 0, 0, 1, pn, -1]),
            ([3, 5, 4], [0, 0, 1, 0, 1, 0, pn, -1]),
            ([4, 3, 5], [pn, -1, -1, 0, 0, 1, pn, -1]),
            ([4, 5, 3], [0, 0, 1, pn, -1, -1, pn, -1]),
            ([5, 3, 4], [pn, -1, -1, 0, 1, 0, pn, -1]),
            ([5, 4, 3], [0, 1, 0, pn, -1, -1, pn, -1]),
        ];
        let nodes: Vec<usize> = (0..CellType::Prism.n_dofs(p)).collect();
        let corners = CellType::Prism.corner_dofs(p);
        let k_off = (p + 1) * (p + 2) / 2;
        for (vs, [a, b, c, d, e, f, g, h]) in table {
            let fc: Vec<usize> = vs.iter().map(|&v| corners[v]).collect();
            let r = renumber_for_face(CellType::Prism, p, &nodes, &fc, p, &nodes).unwrap();
            let mut want = vec![usize::MAX; nodes.len()];
            let mut ind = 0;
            for k in 0..=p {
                for j in 0..=p {
                    for i in 0..=p - j {
                        let (ii, jj, kk) = (i as i64, j as i64, k as i64);
                        let ni = (a + b * ii + c * jj) as usize;
                        let nj = (d + e * ii + f * jj) as usize;
                        let nk = (g + h * kk) as usize;
                        want[nk * k_off + tri_index(p, ni, nj)] = nodes[ind];
                        ind += 1;
                    }
                }
            }
            assert_eq!(r.elem_dofs, want, "corners {vs:?}");
            assert_eq!(r.face_dofs, want[..k_off].to_vec());
        }
    }

    proptest! {
        /// Renumbering for a face and then for face 0 of the result is the identity
        /// on the second step, for any relabelled hexahedron.
        #[test]
        fn hex_renumbering_is_stable(f in 0usize..6, rot in 0usize..8, p in 1usize..4) {
            let elem = CellType::Hexahedron;
            let nodes: Vec<usize> = (0..elem.n_dofs(p)).map(|n| 1000 + n).collect();
            let grid: Vec<usize> = nodes.clone();
            let fc: Vec<usize> = {
                let c = elem.corner_dofs(p);
                let base: Vec<usize> = elem.face_vertices(f).iter().map(|&v| grid[c[v]]).collect();
                rotations(&base)[rot].clone()
            };
            let r = renumber_for_face(elem, p, &grid, &fc, p, &nodes).unwrap();
            let again = renumber_for_face(elem, p, &r.elem_dofs, &fc, p, &r.elem_dofs).unwrap();
            prop_assert_eq!(&again.elem_dofs, &r.elem_dofs);
            prop_assert_eq!(again.face_dofs, r.face_dofs);
        }
    }
}
