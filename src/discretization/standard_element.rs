//! Standard elements: quadrature plus basis tables shared by all physical
//! elements and faces of the same shape, degree and Jacobian constancy.
//!
//! A standard face is always seen from a *renumbered* adjacent element whose
//! face 0 is the face in question (see [`crate::algs::adapter`]). Face
//! integration points given in face reference coordinates are mapped onto
//! that face of the reference element by [`face_point_in_element`].

use crate::algs::linalg::LinearAlgebra;
use crate::discretization::basis::{BasisTabulation, shared_basis};
use crate::discretization::quadrature::QuadratureRule;
use crate::mesh_error::DgMeshError;
use crate::topology::cell_type::CellType;

/// Key of a volume standard element.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub struct VolumeKey {
    pub shape: CellType,
    pub degree: usize,
    pub jac_const: bool,
    pub order_exact: usize,
}

/// One adjacent element of a standard face.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub struct SideKey {
    pub shape: CellType,
    pub degree: usize,
    pub swap: bool,
}

/// Key of a standard face; `side1` is `None` for boundary faces.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub struct FaceKey {
    pub face_shape: CellType,
    pub jac_const: bool,
    pub order_exact: usize,
    pub side0: SideKey,
    pub side1: Option<SideKey>,
}

/// Volume standard element.
#[derive(Clone, Debug)]
pub struct StandardElement {
    pub key: VolumeKey,
    pub rule: QuadratureRule,
    /// Nodal basis at the integration points.
    pub basis: BasisTabulation,
}

impl StandardElement {
    pub fn new(key: VolumeKey, la: &dyn LinearAlgebra) -> Result<Self, DgMeshError> {
        let rule = QuadratureRule::for_shape(key.shape, key.order_exact);
        let basis = shared_basis(key.shape, key.degree, la)?.tabulate(&rule.points);
        Ok(Self { key, rule, basis })
    }

    pub fn n_integration(&self) -> usize {
        self.rule.len()
    }

    pub fn n_dofs(&self) -> usize {
        self.basis.n_dofs
    }
}

/// Element-side data of a standard face.
#[derive(Clone, Debug)]
pub struct FaceSide {
    pub key: SideKey,
    /// Basis of the renumbered element at the face integration points;
    /// derivative blocks `[dir][point][dof]` feed the face metric terms.
    pub elem_basis: BasisTabulation,
}

/// Matching or boundary standard face.
#[derive(Clone, Debug)]
pub struct StandardFace {
    pub key: FaceKey,
    pub rule: QuadratureRule,
    /// Face basis of side 0's degree, used for tangent vectors and normals.
    pub face_basis: BasisTabulation,
    pub sides: Vec<FaceSide>,
}

impl StandardFace {
    pub fn new(key: FaceKey, la: &dyn LinearAlgebra) -> Result<Self, DgMeshError> {
        let rule = QuadratureRule::for_shape(key.face_shape, key.order_exact);
        let face_basis =
            shared_basis(key.face_shape, key.side0.degree, la)?.tabulate(&rule.points);
        let mut sides = Vec::with_capacity(2);
        for side in std::iter::once(key.side0).chain(key.side1) {
            let mapped: Vec<[f64; 3]> = rule
                .points
                .iter()
                .map(|&x| face_point_in_element(side.shape, key.face_shape, side.swap, x))
                .collect::<Result<_, _>>()?;
            let elem_basis = shared_basis(side.shape, side.degree, la)?.tabulate(&mapped);
            sides.push(FaceSide {
                key: side,
                elem_basis,
            });
        }
        Ok(Self {
            key,
            rule,
            face_basis,
            sides,
        })
    }

    pub fn n_integration(&self) -> usize {
        self.rule.len()
    }

    pub fn is_matching(&self) -> bool {
        self.sides.len() == 2
    }
}

/// Map a face reference point onto face 0 of the renumbered reference element.
pub fn face_point_in_element(
    elem: CellType,
    face: CellType,
    swap: bool,
    x: [f64; 3],
) -> Result<[f64; 3], DgMeshError> {
    let [r, s, _] = x;
    let mapped = match (elem, face) {
        (CellType::Triangle | CellType::Quadrilateral, CellType::Line) => [r, -1.0, 0.0],
        (CellType::Tetrahedron, CellType::Triangle)
        | (CellType::Prism, CellType::Triangle)
        | (CellType::Hexahedron, CellType::Quadrilateral)
        | (CellType::Pyramid, CellType::Quadrilateral) => [r, s, -1.0],
        (CellType::Prism, CellType::Quadrilateral) => {
            if swap {
                [s, -1.0, r]
            } else {
                [r, -1.0, s]
            }
        }
        (CellType::Pyramid, CellType::Triangle) => {
            // barycentric weights towards base vertex 1 and the apex
            let (mut to_base, mut to_apex) = (0.5 * (1.0 + r), 0.5 * (1.0 + s));
            if swap {
                std::mem::swap(&mut to_base, &mut to_apex);
            }
            [
                -1.0 + 2.0 * to_base + to_apex,
                -1.0 + to_apex,
                -1.0 + 2.0 * to_apex,
            ]
        }
        _ => {
            return Err(DgMeshError::CorrespondenceFailure(format!(
                "{face:?} is not a face of {elem:?}"
            )));
        }
    };
    Ok(mapped)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::algs::linalg::ReferenceLinearAlgebra;

    #[test]
    fn face_points_land_on_face_zero() {
        let rule = QuadratureRule::for_shape(CellType::Triangle, 4);
        for &x in &rule.points {
            for swap in [false, true] {
                let p = face_point_in_element(CellType::Pyramid, CellType::Triangle, swap, x)
                    .unwrap();
                // face 0 of a renumbered pyramid with a triangle is the plane
                // through (-1,-1,-1), (1,-1,-1), (0,0,1): 2s - t + 1 = 0
                assert!((2.0 * p[1] - p[2] + 1.0).abs() < 1e-12);
                assert!(p[1] >= -1.0 - 1e-12 && p[2] <= 1.0 + 1e-12);
            }
        }
    }

    #[test]
    fn wrong_face_shape_is_rejected() {
        let res = face_point_in_element(CellType::Hexahedron, CellType::Triangle, false, [0.0; 3]);
        assert!(matches!(res, Err(DgMeshError::CorrespondenceFailure(_))));
    }

    #[test]
    fn matching_face_has_two_sides() {
        let side = SideKey {
            shape: CellType::Hexahedron,
            degree: 2,
            swap: false,
        };
        let key = FaceKey {
            face_shape: CellType::Quadrilateral,
            jac_const: true,
            order_exact: 4,
            side0: side,
            side1: Some(SideKey {
                shape: CellType::Prism,
                degree: 1,
                swap: true,
            }),
        };
        let face = StandardFace::new(key, &ReferenceLinearAlgebra).unwrap();
        assert!(face.is_matching());
        assert_eq!(face.face_basis.n_dofs, 9);
        assert_eq!(face.sides[0].elem_basis.n_dofs, 27);
        assert_eq!(face.sides[1].elem_basis.n_dofs, 6);
        assert_eq!(face.sides[1].elem_basis.n_points, face.n_integration());
    }
}
