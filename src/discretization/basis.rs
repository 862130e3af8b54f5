//! Nodal Lagrange bases on equidistant lattices.
//!
//! The nodal functions are obtained from a modal basis through the inverse
//! Vandermonde matrix: with `V[n][q] = psi_q(x_n)`, the nodal function of node
//! `n` is `phi_n = sum_q psi_q (V^{-1})[q][n]`. Modal functions are Legendre
//! products; the pyramid uses the rational space
//! `P_i(r/w) P_j(s/w) w^max(i,j) P_k(t)`, `w = (1 - t) / 2`,
//! `0 <= k <= p - max(i,j)`, which contains the complete polynomials of
//! degree `p` and reduces to the quadrilateral space on the base.

use crate::algs::linalg::LinearAlgebra;
use crate::discretization::lattice::{lattice_coordinates, lattice_points};
use crate::discretization::legendre::legendre_and_derivative;
use crate::mesh_error::DgMeshError;
use crate::topology::cell_type::CellType;
use dashmap::DashMap;
use once_cell::sync::Lazy;
use std::sync::Arc;

static BASES: Lazy<DashMap<(CellType, usize), Arc<NodalBasis>>> = Lazy::new(DashMap::new);

/// Process-wide memo of nodal bases; the Vandermonde inverse of a given
/// shape and degree is computed once.
pub fn shared_basis(
    shape: CellType,
    p: usize,
    la: &dyn LinearAlgebra,
) -> Result<Arc<NodalBasis>, DgMeshError> {
    if let Some(b) = BASES.get(&(shape, p)) {
        return Ok(Arc::clone(&b));
    }
    let basis = Arc::new(NodalBasis::new(shape, p, la)?);
    BASES.insert((shape, p), Arc::clone(&basis));
    Ok(basis)
}

/// Basis function tabulation on the reference element.
#[derive(Clone, Debug, PartialEq)]
pub struct BasisTabulation {
    pub n_points: usize,
    pub n_dofs: usize,
    /// Values, row-major `[point][dof]`.
    pub values: Vec<f64>,
    /// Reference derivatives, one row-major `[point][dof]` block per
    /// reference direction `r, s[, t]`.
    pub derivatives: Vec<Vec<f64>>,
}

impl BasisTabulation {
    /// Derivative blocks stacked as `[dir][point][dof]`, the layout of the
    /// coordinate-gradient matrix product.
    pub fn stacked_derivatives(&self) -> Vec<f64> {
        self.derivatives.concat()
    }
}

/// Degree-`p` nodal basis of one shape.
#[derive(Clone, Debug)]
pub struct NodalBasis {
    shape: CellType,
    p: usize,
    modes: Vec<[usize; 3]>,
    /// `V^{-1}`, row-major `[mode][dof]`.
    inv_vandermonde: Vec<f64>,
}

fn modal_indices(shape: CellType, p: usize) -> Vec<[usize; 3]> {
    let mut modes = Vec::with_capacity(shape.n_dofs(p));
    match shape {
        CellType::Line => modes.extend((0..=p).map(|a| [a, 0, 0])),
        CellType::Quadrilateral => {
            for b in 0..=p {
                modes.extend((0..=p).map(|a| [a, b, 0]));
            }
        }
        CellType::Hexahedron => {
            for c in 0..=p {
                for b in 0..=p {
                    modes.extend((0..=p).map(|a| [a, b, c]));
                }
            }
        }
        CellType::Triangle => {
            for b in 0..=p {
                modes.extend((0..=p - b).map(|a| [a, b, 0]));
            }
        }
        CellType::Tetrahedron => {
            for c in 0..=p {
                for b in 0..=p - c {
                    modes.extend((0..=p - c - b).map(|a| [a, b, c]));
                }
            }
        }
        CellType::Prism => {
            for c in 0..=p {
                for b in 0..=p {
                    modes.extend((0..=p - b).map(|a| [a, b, c]));
                }
            }
        }
        CellType::Pyramid => {
            for b in 0..=p {
                for a in 0..=p {
                    let m = a.max(b);
                    modes.extend((0..=p - m).map(|c| [a, b, c]));
                }
            }
        }
    }
    modes
}

/// Value and reference gradient of one modal function at `x`.
fn modal(shape: CellType, mode: [usize; 3], x: [f64; 3]) -> (f64, [f64; 3]) {
    let [a, b, c] = mode;
    match shape {
        CellType::Line => {
            let (pa, da) = legendre_and_derivative(a, x[0]);
            (pa, [da, 0.0, 0.0])
        }
        CellType::Triangle | CellType::Quadrilateral => {
            let (pa, da) = legendre_and_derivative(a, x[0]);
            let (pb, db) = legendre_and_derivative(b, x[1]);
            (pa * pb, [da * pb, pa * db, 0.0])
        }
        CellType::Tetrahedron | CellType::Prism | CellType::Hexahedron => {
            let (pa, da) = legendre_and_derivative(a, x[0]);
            let (pb, db) = legendre_and_derivative(b, x[1]);
            let (pc, dc) = legendre_and_derivative(c, x[2]);
            (pa * pb * pc, [da * pb * pc, pa * db * pc, pa * pb * dc])
        }
        CellType::Pyramid => {
            let w = 0.5 * (1.0 - x[2]);
            let m = a.max(b);
            let (ra, sb) = if w > 1e-14 { (x[0] / w, x[1] / w) } else { (0.0, 0.0) };
            let (pa, da) = legendre_and_derivative(a, ra);
            let (pb, db) = legendre_and_derivative(b, sb);
            let (pc, dc) = legendre_and_derivative(c, x[2]);
            let wm = w.powi(m as i32);
            let value = pa * pb * wm * pc;
            if m == 0 {
                return (value, [0.0, 0.0, pa * pb * dc]);
            }
            let wm1 = w.powi(m as i32 - 1);
            let dr = da * pb * wm1 * pc;
            let ds = pa * db * wm1 * pc;
            let dt = 0.5 * wm1 * (ra * da * pb + sb * pa * db - m as f64 * pa * pb) * pc
                + pa * pb * wm * dc;
            (value, [dr, ds, dt])
        }
    }
}

impl NodalBasis {
    /// Build the basis by inverting the Vandermonde matrix on the lattice nodes.
    pub fn new(shape: CellType, p: usize, la: &dyn LinearAlgebra) -> Result<Self, DgMeshError> {
        let modes = modal_indices(shape, p);
        let n = modes.len();
        let nodes: Vec<[f64; 3]> = lattice_points(shape, p)
            .into_iter()
            .map(|l| lattice_coordinates(shape, p, l))
            .collect();
        let mut v = vec![0.0; n * n];
        for (row, x) in nodes.iter().enumerate() {
            for (q, &mode) in modes.iter().enumerate() {
                v[row * n + q] = modal(shape, mode, *x).0;
            }
        }
        la.inverse(n, &mut v).map_err(|e| {
            DgMeshError::GeometryDegeneracy(format!(
                "Vandermonde matrix of {shape:?} degree {p} is singular: {e}"
            ))
        })?;
        Ok(Self {
            shape,
            p,
            modes,
            inv_vandermonde: v,
        })
    }

    pub fn shape(&self) -> CellType {
        self.shape
    }

    pub fn degree(&self) -> usize {
        self.p
    }

    pub fn n_dofs(&self) -> usize {
        self.modes.len()
    }

    /// Values and reference derivatives of all nodal functions at `points`.
    pub fn tabulate(&self, points: &[[f64; 3]]) -> BasisTabulation {
        let n = self.n_dofs();
        let dim = self.shape.dimension();
        let mut values = vec![0.0; points.len() * n];
        let mut derivatives = vec![vec![0.0; points.len() * n]; dim];
        let mut psi = vec![0.0; n];
        let mut dpsi = vec![[0.0; 3]; n];
        for (ip, x) in points.iter().enumerate() {
            for (q, &mode) in self.modes.iter().enumerate() {
                let (val, grad) = modal(self.shape, mode, *x);
                psi[q] = val;
                dpsi[q] = grad;
            }
            for dof in 0..n {
                let mut v = 0.0;
                let mut d = [0.0; 3];
                for q in 0..n {
                    let c = self.inv_vandermonde[q * n + dof];
                    v += psi[q] * c;
                    for (dd, g) in d.iter_mut().zip(dpsi[q]) {
                        *dd += g * c;
                    }
                }
                values[ip * n + dof] = v;
                for (dir, block) in derivatives.iter_mut().enumerate() {
                    block[ip * n + dof] = d[dir];
                }
            }
        }
        BasisTabulation {
            n_points: points.len(),
            n_dofs: n,
            values,
            derivatives,
        }
    }
}
