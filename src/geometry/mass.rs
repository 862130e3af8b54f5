//! Element mass matrices.
//!
//! `M_jk = sum_q w_q J_q phi_j(x_q) phi_k(x_q)` over the integration points
//! of the solution standard element. The lumped variant keeps the diagonal,
//! rescaled so that its trace equals the element volume.

use crate::algs::linalg::LinearAlgebra;
use crate::config::MassMatrixKinds;
use crate::discretization::standard_element::StandardElement;
use crate::mesh_error::DgMeshError;

/// Mass matrix variants of one element; absent variants are `None`.
#[derive(Clone, Debug, Default, PartialEq)]
pub struct MassMatrices {
    /// Row-major `n × n`.
    pub full: Option<Vec<f64>>,
    pub full_inverse: Option<Vec<f64>>,
    pub lumped: Option<Vec<f64>>,
}

impl MassMatrices {
    pub fn len(&self) -> usize {
        [&self.full, &self.full_inverse, &self.lumped]
            .iter()
            .map(|m| m.as_ref().map_or(0, Vec::len))
            .sum()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

/// `sum_q w_q J_q`.
pub fn element_volume(sol: &StandardElement, jac: &[f64]) -> f64 {
    sol.rule.weights.iter().zip(jac).map(|(w, j)| w * j).sum()
}

pub fn full_mass_matrix(sol: &StandardElement, jac: &[f64]) -> Vec<f64> {
    let n = sol.n_dofs();
    let phi = &sol.basis.values;
    let mut m = vec![0.0; n * n];
    for (q, (w, j)) in sol.rule.weights.iter().zip(jac).enumerate() {
        let wj = w * j;
        let row = &phi[q * n..(q + 1) * n];
        for a in 0..n {
            let fa = wj * row[a];
            for b in a..n {
                m[a * n + b] += fa * row[b];
            }
        }
    }
    for a in 0..n {
        for b in 0..a {
            m[a * n + b] = m[b * n + a];
        }
    }
    m
}

pub fn lumped_mass_matrix(sol: &StandardElement, jac: &[f64]) -> Vec<f64> {
    let n = sol.n_dofs();
    let phi = &sol.basis.values;
    let mut diag = vec![0.0; n];
    for (q, (w, j)) in sol.rule.weights.iter().zip(jac).enumerate() {
        for (d, v) in diag.iter_mut().zip(&phi[q * n..(q + 1) * n]) {
            *d += w * j * v * v;
        }
    }
    let trace: f64 = diag.iter().sum();
    let scale = element_volume(sol, jac) / trace;
    diag.iter_mut().for_each(|d| *d *= scale);
    diag
}

/// The variants selected by `kinds` for an element with Jacobians `jac` at
/// the integration points of `sol`.
pub fn mass_matrices(
    kinds: MassMatrixKinds,
    sol: &StandardElement,
    jac: &[f64],
    la: &dyn LinearAlgebra,
) -> Result<MassMatrices, DgMeshError> {
    let mut out = MassMatrices::default();
    if kinds.full || kinds.full_inverse {
        let mut m = full_mass_matrix(sol, jac);
        if kinds.full_inverse {
            la.spd_inverse(sol.n_dofs(), &mut m).map_err(|e| {
                DgMeshError::GeometryDegeneracy(format!(
                    "mass matrix not positive definite ({e}); \
                     increase the accuracy of the quadrature rule"
                ))
            })?;
            out.full_inverse = Some(m);
        } else {
            out.full = Some(m);
        }
    }
    if kinds.lumped {
        out.lumped = Some(lumped_mass_matrix(sol, jac));
    }
    Ok(out)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::algs::linalg::ReferenceLinearAlgebra;
    use crate::discretization::standard_element::VolumeKey;
    use crate::topology::cell_type::CellType;

    fn element(shape: CellType, degree: usize) -> StandardElement {
        let key = VolumeKey {
            shape,
            degree,
            jac_const: true,
            order_exact: 2 * degree.max(1),
        };
        StandardElement::new(key, &ReferenceLinearAlgebra).unwrap()
    }

    #[test]
    fn constant_basis_mass_is_volume() {
        let sol = element(CellType::Quadrilateral, 0);
        let jac = vec![0.25; sol.n_integration()];
        let m = full_mass_matrix(&sol, &jac);
        assert_eq!(m.len(), 1);
        assert!((m[0] - 1.0).abs() < 1e-12);
    }

    #[test]
    fn full_matrix_is_symmetric_and_sums_to_volume() {
        let sol = element(CellType::Triangle, 2);
        let jac = vec![0.5; sol.n_integration()];
        let m = full_mass_matrix(&sol, &jac);
        let n = sol.n_dofs();
        for a in 0..n {
            for b in 0..n {
                assert!((m[a * n + b] - m[b * n + a]).abs() < 1e-14);
            }
        }
        // partition of unity: all entries sum to the volume
        let total: f64 = m.iter().sum();
        assert!((total - element_volume(&sol, &jac)).abs() < 1e-12);
        assert!((total - 1.0).abs() < 1e-12);
    }

    #[test]
    fn lumped_trace_is_volume() {
        for shape in [CellType::Quadrilateral, CellType::Tetrahedron, CellType::Prism] {
            let sol = element(shape, 2);
            let jac = vec![1.5; sol.n_integration()];
            let d = lumped_mass_matrix(&sol, &jac);
            let vol = element_volume(&sol, &jac);
            assert!((d.iter().sum::<f64>() - vol).abs() < 1e-10 * vol);
            assert!(d.iter().all(|&x| x > 0.0));
        }
    }

    #[test]
    fn kinds_select_variants() {
        let sol = element(CellType::Quadrilateral, 1);
        let jac = vec![1.0; sol.n_integration()];
        let la = ReferenceLinearAlgebra;
        let explicit = MassMatrixKinds {
            full: false,
            full_inverse: true,
            lumped: false,
        };
        let m = mass_matrices(explicit, &sol, &jac, &la).unwrap();
        assert!(m.full.is_none() && m.lumped.is_none());
        let inv = m.full_inverse.unwrap();
        let full = full_mass_matrix(&sol, &jac);
        let mut prod = vec![0.0; 16];
        la.matmul(4, 4, 4, &full, &inv, &mut prod);
        for i in 0..4 {
            for j in 0..4 {
                let e = if i == j { 1.0 } else { 0.0 };
                assert!((prod[i * 4 + j] - e).abs() < 1e-10);
            }
        }
    }

    #[test]
    fn singular_mass_suggests_more_quadrature() {
        let sol = element(CellType::Quadrilateral, 1);
        let jac = vec![0.0; sol.n_integration()];
        let kinds = MassMatrixKinds {
            full: false,
            full_inverse: true,
            lumped: false,
        };
        match mass_matrices(kinds, &sol, &jac, &ReferenceLinearAlgebra) {
            Err(DgMeshError::GeometryDegeneracy(msg)) => assert!(msg.contains("quadrature")),
            other => panic!("unexpected {other:?}"),
        }
    }
}
