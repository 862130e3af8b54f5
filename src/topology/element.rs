//! Rank-local mesh entities after distribution.
//!
//! Owned volume elements come first (`[0, n_owned)`), halos after. Node lists
//! hold local point indices into the rank's
//! [`PointRegistry`](crate::topology::point::PointRegistry). Solution DOFs of
//! element `e` are the contiguous range `sol_offset_local..sol_offset_local +
//! n_dofs_sol()`.

use crate::geometry::arena::MetricSpan;
use crate::mesh_error::DgMeshError;
use crate::topology::cell_type::CellType;
use crate::topology::point::PointRegistry;

/// Metric and mass buffers of one owned volume element.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct ElementMetrics {
    /// `J` followed by the `J`-scaled inverse metric terms, per integration point.
    pub volume: MetricSpan,
    /// `d(r,s,t)/d(x,y,z)`, `nDim^2` values per integration point.
    pub coord_derivatives: MetricSpan,
    pub mass_full: MetricSpan,
    pub mass_full_inverse: MetricSpan,
    pub mass_lumped: MetricSpan,
}

#[derive(Clone, Debug, PartialEq)]
pub struct VolumeElement {
    pub cell: CellType,
    pub p_grid: usize,
    pub p_sol: usize,
    pub nodes: Vec<usize>,
    pub owned: bool,
    /// Rank owning the element after distribution.
    pub rank_original: usize,
    /// Marker through which a periodic halo was imported.
    pub periodic: Option<u16>,
    pub global_id: u64,
    /// `None` for halos.
    pub sol_offset_global: Option<u64>,
    pub sol_offset_local: usize,
    pub jac_const: bool,
    pub face_jac_const: Vec<bool>,
    /// Standard element of the solution (`p_sol`); owned elements only.
    pub std_sol: Option<usize>,
    /// Standard element of the grid (`p_grid`, solution integration rule).
    pub std_grid: Option<usize>,
    pub metrics: ElementMetrics,
}

impl VolumeElement {
    pub fn n_dofs_sol(&self) -> usize {
        self.cell.n_dofs(self.p_sol)
    }

    pub fn n_dofs_grid(&self) -> usize {
        self.cell.n_dofs(self.p_grid)
    }

    /// Local solution DOFs of this element.
    pub fn sol_dofs(&self) -> std::ops::Range<usize> {
        self.sol_offset_local..self.sol_offset_local + self.n_dofs_sol()
    }

    /// Local point indices of the corners.
    pub fn corner_nodes(&self) -> Vec<usize> {
        self.cell
            .corner_dofs(self.p_grid)
            .into_iter()
            .map(|d| self.nodes[d])
            .collect()
    }
}

/// DOF lists of one element seen from a face, after face renumbering.
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct FaceSideDofs {
    /// Local volume element index.
    pub elem: usize,
    /// Grid nodes (local point indices) on the face.
    pub grid_face: Vec<usize>,
    /// All grid nodes of the element, face-renumbered.
    pub grid_elem: Vec<usize>,
    /// Solution DOFs on the face.
    pub sol_face: Vec<usize>,
    /// All solution DOFs of the element, face-renumbered.
    pub sol_elem: Vec<usize>,
}

/// Metric buffers of a matching or boundary face.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct FaceMetrics {
    /// Unit normal and length per integration point, `nDim + 1` values each.
    pub normals: MetricSpan,
    pub coord_derivatives: [MetricSpan; 2],
    /// `len * (grad(phi) . n)`, `[point][dof]`.
    pub sip: [MetricSpan; 2],
}

/// Interior face shared by two volume elements.
#[derive(Clone, Debug, PartialEq)]
pub struct MatchingFace {
    pub face_shape: CellType,
    /// Corner points in side-0 orientation.
    pub corners: Vec<usize>,
    pub jac_const: bool,
    pub sides: [FaceSideDofs; 2],
    pub std_sol: usize,
    pub std_grid: usize,
    pub metrics: FaceMetrics,
}

/// Boundary face of one marker.
#[derive(Clone, Debug, PartialEq)]
pub struct SurfaceElement {
    pub cell: CellType,
    pub p_grid: usize,
    pub global_id: u64,
    /// Local index of the adjacent volume element.
    pub volume_elem: usize,
    /// Face of `volume_elem` coinciding with this element, once matched.
    pub face_of_elem: Option<usize>,
    pub nodes: Vec<usize>,
    pub dofs: Option<FaceSideDofs>,
    pub std_sol: Option<usize>,
    pub std_grid: Option<usize>,
    pub metrics: FaceMetrics,
}

impl SurfaceElement {
    pub fn new(
        cell: CellType,
        p_grid: usize,
        global_id: u64,
        volume_elem: usize,
        nodes: Vec<usize>,
    ) -> Self {
        Self {
            cell,
            p_grid,
            global_id,
            volume_elem,
            face_of_elem: None,
            nodes,
            dofs: None,
            std_sol: None,
            std_grid: None,
            metrics: FaceMetrics::default(),
        }
    }

    /// Shortest corner-to-corner edge, used to scale point matching tolerances.
    pub fn length_scale(&self, points: &PointRegistry) -> Result<f64, DgMeshError> {
        let corners = self.cell.corner_dofs(self.p_grid);
        let nodes: Vec<[f64; 3]> = corners
            .iter()
            .map(|&d| {
                self.nodes.get(d).map(|&n| points.coord(n)).ok_or_else(|| {
                    DgMeshError::MeshInconsistency(format!(
                        "surface element {} has {} nodes, corner DOF {d} expected",
                        self.global_id,
                        self.nodes.len()
                    ))
                })
            })
            .collect::<Result<_, _>>()?;
        let dist = |a: [f64; 3], b: [f64; 3]| {
            ((a[0] - b[0]).powi(2) + (a[1] - b[1]).powi(2) + (a[2] - b[2]).powi(2)).sqrt()
        };
        let len = match self.cell {
            CellType::Line => dist(nodes[0], nodes[1]),
            _ => (0..nodes.len())
                .map(|i| dist(nodes[i], nodes[(i + 1) % nodes.len()]))
                .fold(f64::INFINITY, f64::min),
        };
        Ok(len)
    }
}

/// Boundary condition group. Periodic markers receive no boundary faces of
/// their own; their faces become matching faces with periodic halos.
#[derive(Clone, Debug, PartialEq)]
pub struct BoundaryMarker {
    pub tag: u16,
    pub periodic: bool,
    pub surface: Vec<SurfaceElement>,
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::topology::point::{PointFem, PointKey};

    fn registry() -> PointRegistry {
        PointRegistry::from_points(
            [
                [0.0, 0.0, 0.0],
                [2.0, 0.0, 0.0],
                [2.0, 1.0, 0.0],
                [0.0, 1.0, 0.0],
                [1.0, 0.0, 0.0],
            ]
            .into_iter()
            .enumerate()
            .map(|(i, c)| PointFem::new(PointKey::plain(i as u64), c))
            .collect(),
        )
    }

    #[test]
    fn quad_length_scale_is_shortest_edge() {
        let s = SurfaceElement::new(CellType::Quadrilateral, 1, 0, 0, vec![0, 1, 3, 2]);
        // lattice order: corners are nodes[0], nodes[1], nodes[3], nodes[2]
        assert!((s.length_scale(&registry()).unwrap() - 1.0).abs() < 1e-14);
    }

    #[test]
    fn line_length_scale_uses_end_points() {
        let s = SurfaceElement::new(CellType::Line, 2, 0, 0, vec![0, 4, 1]);
        assert!((s.length_scale(&registry()).unwrap() - 2.0).abs() < 1e-14);
    }

    #[test]
    fn short_node_list_is_inconsistent() {
        let s = SurfaceElement::new(CellType::Triangle, 2, 3, 0, vec![0, 1]);
        assert!(matches!(
            s.length_scale(&registry()),
            Err(DgMeshError::MeshInconsistency(_))
        ));
    }
}
