//! Cell type metadata for high-order elements.
//!
//! Reference domains (all coordinates in `[-1, 1]`):
//! - Line: `r in [-1, 1]`.
//! - Triangle: vertices `(-1,-1)`, `(1,-1)`, `(-1,1)`.
//! - Quadrilateral: `[-1, 1]^2`, vertices counter-clockwise from `(-1,-1)`.
//! - Tetrahedron: triangle vertices at `t = -1` plus `(-1,-1,1)`.
//! - Pyramid: quadrilateral base at `t = -1`, apex `(0, 0, 1)`.
//! - Prism: triangle at `t = -1` (vertices 0..3) and at `t = 1` (3..6).
//! - Hexahedron: quadrilateral at `t = -1` (0..4) and at `t = 1` (4..8).
//!
//! Face corner lists are oriented so that `(c1 - c0) x (c_last - c0)` points
//! *into* the element in 3D, and edges run counter-clockwise in 2D.

use serde::{Deserialize, Serialize};

/// Element shapes. The declaration order is the VTK numbering order, which is
/// the fixed total order used to pick side 0 of a matching face.
#[derive(
    Clone, Copy, Debug, Eq, Hash, PartialEq, PartialOrd, Ord, Serialize, Deserialize,
)]
pub enum CellType {
    /// 1D segment (VTK 3).
    Line,
    /// 2D simplex (VTK 5).
    Triangle,
    /// 2D tensor-product cell (VTK 9).
    Quadrilateral,
    /// 3D simplex (VTK 10).
    Tetrahedron,
    /// 3D tensor-product cell (VTK 12).
    Hexahedron,
    /// 3D wedge (VTK 13).
    Prism,
    /// 3D pyramid (VTK 14).
    Pyramid,
}

const HEX_FACES: [&[usize]; 6] = [
    &[0, 1, 2, 3],
    &[4, 7, 6, 5],
    &[0, 4, 5, 1],
    &[3, 2, 6, 7],
    &[0, 3, 7, 4],
    &[1, 5, 6, 2],
];
const TET_FACES: [&[usize]; 4] = [&[0, 1, 2], &[0, 3, 1], &[0, 2, 3], &[1, 3, 2]];
const PYRA_FACES: [&[usize]; 5] = [&[0, 1, 2, 3], &[0, 4, 1], &[1, 4, 2], &[2, 4, 3], &[3, 4, 0]];
const PRISM_FACES: [&[usize]; 5] = [
    &[0, 1, 2],
    &[3, 5, 4],
    &[0, 3, 4, 1],
    &[0, 2, 5, 3],
    &[1, 4, 5, 2],
];
const TRI_FACES: [&[usize]; 3] = [&[0, 1], &[1, 2], &[2, 0]];
const QUAD_FACES: [&[usize]; 4] = [&[0, 1], &[1, 2], &[2, 3], &[3, 0]];
const LINE_FACES: [&[usize]; 2] = [&[0], &[1]];

impl CellType {
    pub const ALL: [CellType; 7] = [
        CellType::Line,
        CellType::Triangle,
        CellType::Quadrilateral,
        CellType::Tetrahedron,
        CellType::Hexahedron,
        CellType::Prism,
        CellType::Pyramid,
    ];

    pub fn vtk_id(self) -> u16 {
        match self {
            CellType::Line => 3,
            CellType::Triangle => 5,
            CellType::Quadrilateral => 9,
            CellType::Tetrahedron => 10,
            CellType::Hexahedron => 12,
            CellType::Prism => 13,
            CellType::Pyramid => 14,
        }
    }

    pub fn from_vtk(id: u16) -> Option<Self> {
        Self::ALL.into_iter().find(|t| t.vtk_id() == id)
    }

    /// Topological dimension.
    pub fn dimension(self) -> usize {
        match self {
            CellType::Line => 1,
            CellType::Triangle | CellType::Quadrilateral => 2,
            _ => 3,
        }
    }

    pub fn n_corners(self) -> usize {
        match self {
            CellType::Line => 2,
            CellType::Triangle => 3,
            CellType::Quadrilateral | CellType::Tetrahedron => 4,
            CellType::Pyramid => 5,
            CellType::Prism => 6,
            CellType::Hexahedron => 8,
        }
    }

    pub fn n_faces(self) -> usize {
        self.face_table().len()
    }

    /// Number of nodal DOFs of a degree-`p` Lagrange element.
    pub fn n_dofs(self, p: usize) -> usize {
        let q = p + 1;
        match self {
            CellType::Line => q,
            CellType::Triangle => q * (q + 1) / 2,
            CellType::Quadrilateral => q * q,
            CellType::Tetrahedron => q * (q + 1) * (q + 2) / 6,
            CellType::Pyramid => q * (q + 1) * (2 * q + 1) / 6,
            CellType::Prism => q * q * (q + 1) / 2,
            CellType::Hexahedron => q * q * q,
        }
    }

    fn face_table(self) -> &'static [&'static [usize]] {
        match self {
            CellType::Line => &LINE_FACES,
            CellType::Triangle => &TRI_FACES,
            CellType::Quadrilateral => &QUAD_FACES,
            CellType::Tetrahedron => &TET_FACES,
            CellType::Pyramid => &PYRA_FACES,
            CellType::Prism => &PRISM_FACES,
            CellType::Hexahedron => &HEX_FACES,
        }
    }

    /// Corner (vertex) numbers of face `f`, oriented inward.
    pub fn face_vertices(self, f: usize) -> &'static [usize] {
        self.face_table()[f]
    }

    /// Shape of face `f`; `None` for the end points of a line.
    pub fn face_type(self, f: usize) -> Option<CellType> {
        match self.face_vertices(f).len() {
            2 => Some(CellType::Line),
            3 => Some(CellType::Triangle),
            4 => Some(CellType::Quadrilateral),
            _ => None,
        }
    }

    /// Local DOF index of every corner of a degree-`p` element, in vertex order.
    /// For `p == 0` all corners collapse onto the single DOF.
    pub fn corner_dofs(self, p: usize) -> Vec<usize> {
        if p == 0 {
            return vec![0; self.n_corners()];
        }
        let q = p + 1;
        let tri = [0, p, q * (q + 1) / 2 - 1];
        let quad = [0, p, q * q - 1, q * q - q];
        match self {
            CellType::Line => vec![0, p],
            CellType::Triangle => tri.to_vec(),
            CellType::Quadrilateral => quad.to_vec(),
            CellType::Tetrahedron => {
                let mut v = tri.to_vec();
                v.push(self.n_dofs(p) - 1);
                v
            }
            CellType::Pyramid => {
                let mut v = quad.to_vec();
                v.push(self.n_dofs(p) - 1);
                v
            }
            CellType::Prism => {
                let off = q * (q + 1) / 2 * p;
                tri.iter()
                    .chain(tri.iter())
                    .enumerate()
                    .map(|(i, &d)| if i < 3 { d } else { d + off })
                    .collect()
            }
            CellType::Hexahedron => {
                let off = q * q * p;
                quad.iter()
                    .chain(quad.iter())
                    .enumerate()
                    .map(|(i, &d)| if i < 4 { d } else { d + off })
                    .collect()
            }
        }
    }

    /// Index of the pyramid apex among the vertices.
    pub const PYRAMID_APEX: usize = 4;
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn vtk_order_is_type_order() {
        let mut ids: Vec<u16> = CellType::ALL.iter().map(|t| t.vtk_id()).collect();
        let sorted = ids.clone();
        ids.sort();
        assert_eq!(ids, sorted);
        assert!(CellType::Triangle < CellType::Hexahedron);
        assert!(CellType::Prism < CellType::Pyramid);
        assert_eq!(CellType::from_vtk(13), Some(CellType::Prism));
        assert_eq!(CellType::from_vtk(4), None);
    }

    #[test]
    fn dof_counts() {
        assert_eq!(CellType::Triangle.n_dofs(2), 6);
        assert_eq!(CellType::Tetrahedron.n_dofs(2), 10);
        assert_eq!(CellType::Pyramid.n_dofs(1), 5);
        assert_eq!(CellType::Pyramid.n_dofs(2), 14);
        assert_eq!(CellType::Prism.n_dofs(1), 6);
        assert_eq!(CellType::Hexahedron.n_dofs(3), 64);
        for t in CellType::ALL {
            assert_eq!(t.n_dofs(0), 1);
            assert_eq!(t.n_dofs(1), t.n_corners());
        }
    }

    #[test]
    fn corner_dofs_linear_are_identity() {
        for t in CellType::ALL {
            let c = t.corner_dofs(1);
            assert_eq!(c, (0..t.n_corners()).collect::<Vec<_>>(), "{t:?}");
        }
    }

    #[test]
    fn corner_dofs_quadratic() {
        assert_eq!(CellType::Hexahedron.corner_dofs(2), vec![0, 2, 8, 6, 18, 20, 26, 24]);
        assert_eq!(CellType::Prism.corner_dofs(2), vec![0, 2, 5, 12, 14, 17]);
        assert_eq!(CellType::Pyramid.corner_dofs(2), vec![0, 2, 8, 6, 13]);
        assert_eq!(CellType::Tetrahedron.corner_dofs(2), vec![0, 2, 5, 9]);
    }

    #[test]
    fn every_vertex_lies_on_faces() {
        for t in CellType::ALL.into_iter().filter(|t| t.dimension() > 1) {
            let mut seen = vec![0; t.n_corners()];
            for f in 0..t.n_faces() {
                for &v in t.face_vertices(f) {
                    seen[v] += 1;
                }
            }
            assert!(seen.iter().all(|&c| c >= t.dimension()), "{t:?}: {seen:?}");
        }
    }
}
