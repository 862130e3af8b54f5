//! Pluggable dense linear algebra.
//!
//! The mesh pipeline needs three dense kernels: a matrix product (coordinate
//! gradients), a symmetric positive definite inverse (mass matrices) and a
//! general inverse (Vandermonde matrices of the nodal bases). All matrices are
//! row-major. [`ReferenceLinearAlgebra`] is portable; the `nalgebra-backend`
//! feature adds [`NalgebraLinearAlgebra`]. The backend is chosen once, through
//! [`default_backend`] or explicitly by the caller.

use crate::mesh_error::DgMeshError;

pub trait LinearAlgebra: Send + Sync {
    /// `c (m×n) = a (m×k) · b (k×n)`.
    fn matmul(&self, m: usize, k: usize, n: usize, a: &[f64], b: &[f64], c: &mut [f64]);

    /// In-place inverse of a symmetric positive definite `n×n` matrix.
    fn spd_inverse(&self, n: usize, a: &mut [f64]) -> Result<(), DgMeshError>;

    /// In-place inverse of a general nonsingular `n×n` matrix.
    fn inverse(&self, n: usize, a: &mut [f64]) -> Result<(), DgMeshError>;
}

/// Portable implementation: Cholesky for SPD matrices, Gauss-Jordan with
/// partial pivoting otherwise.
#[derive(Clone, Copy, Debug, Default)]
pub struct ReferenceLinearAlgebra;

impl LinearAlgebra for ReferenceLinearAlgebra {
    fn matmul(&self, m: usize, k: usize, n: usize, a: &[f64], b: &[f64], c: &mut [f64]) {
        c[..m * n].fill(0.0);
        for i in 0..m {
            for l in 0..k {
                let ail = a[i * k + l];
                if ail == 0.0 {
                    continue;
                }
                let row = &b[l * n..(l + 1) * n];
                for (cij, blj) in c[i * n..(i + 1) * n].iter_mut().zip(row) {
                    *cij += ail * blj;
                }
            }
        }
    }

    fn spd_inverse(&self, n: usize, a: &mut [f64]) -> Result<(), DgMeshError> {
        // lower factor L with A = L L^T
        let mut l = vec![0.0; n * n];
        for j in 0..n {
            let mut d = a[j * n + j];
            for k in 0..j {
                d -= l[j * n + k] * l[j * n + k];
            }
            if d <= 0.0 || !d.is_finite() {
                return Err(DgMeshError::LinearAlgebra(format!(
                    "matrix is not positive definite (pivot {j} = {d:e})"
                )));
            }
            let djj = d.sqrt();
            l[j * n + j] = djj;
            for i in j + 1..n {
                let mut s = a[i * n + j];
                for k in 0..j {
                    s -= l[i * n + k] * l[j * n + k];
                }
                l[i * n + j] = s / djj;
            }
        }
        // L^{-1} by forward substitution
        let mut linv = vec![0.0; n * n];
        for j in 0..n {
            linv[j * n + j] = 1.0 / l[j * n + j];
            for i in j + 1..n {
                let mut s = 0.0;
                for k in j..i {
                    s -= l[i * n + k] * linv[k * n + j];
                }
                linv[i * n + j] = s / l[i * n + i];
            }
        }
        // A^{-1} = L^{-T} L^{-1}
        for i in 0..n {
            for j in 0..=i {
                let s: f64 = (i..n).map(|k| linv[k * n + i] * linv[k * n + j]).sum();
                a[i * n + j] = s;
                a[j * n + i] = s;
            }
        }
        Ok(())
    }

    fn inverse(&self, n: usize, a: &mut [f64]) -> Result<(), DgMeshError> {
        let mut inv = vec![0.0; n * n];
        for i in 0..n {
            inv[i * n + i] = 1.0;
        }
        for col in 0..n {
            let pivot = (col..n)
                .max_by(|&x, &y| a[x * n + col].abs().total_cmp(&a[y * n + col].abs()))
                .unwrap_or(col);
            let pv = a[pivot * n + col];
            if pv.abs() < 1e-300 {
                return Err(DgMeshError::LinearAlgebra(format!(
                    "singular matrix (column {col})"
                )));
            }
            if pivot != col {
                for k in 0..n {
                    a.swap(pivot * n + k, col * n + k);
                    inv.swap(pivot * n + k, col * n + k);
                }
            }
            let scale = 1.0 / pv;
            for k in 0..n {
                a[col * n + k] *= scale;
                inv[col * n + k] *= scale;
            }
            for row in 0..n {
                if row == col {
                    continue;
                }
                let f = a[row * n + col];
                if f == 0.0 {
                    continue;
                }
                for k in 0..n {
                    a[row * n + k] -= f * a[col * n + k];
                    inv[row * n + k] -= f * inv[col * n + k];
                }
            }
        }
        a[..n * n].copy_from_slice(&inv);
        Ok(())
    }
}

#[cfg(feature = "nalgebra-backend")]
mod nalgebra_backend {
    use super::LinearAlgebra;
    use crate::mesh_error::DgMeshError;
    use nalgebra::DMatrix;

    /// Dense kernels delegated to `nalgebra`.
    #[derive(Clone, Copy, Debug, Default)]
    pub struct NalgebraLinearAlgebra;

    fn store(n: usize, m: &DMatrix<f64>, out: &mut [f64]) {
        for i in 0..n {
            for j in 0..n {
                out[i * n + j] = m[(i, j)];
            }
        }
    }

    impl LinearAlgebra for NalgebraLinearAlgebra {
        fn matmul(&self, m: usize, k: usize, n: usize, a: &[f64], b: &[f64], c: &mut [f64]) {
            let am = DMatrix::from_row_slice(m, k, &a[..m * k]);
            let bm = DMatrix::from_row_slice(k, n, &b[..k * n]);
            let cm = am * bm;
            for i in 0..m {
                for j in 0..n {
                    c[i * n + j] = cm[(i, j)];
                }
            }
        }

        fn spd_inverse(&self, n: usize, a: &mut [f64]) -> Result<(), DgMeshError> {
            let m = DMatrix::from_row_slice(n, n, &a[..n * n]);
            let chol = m.cholesky().ok_or_else(|| {
                DgMeshError::LinearAlgebra("matrix is not positive definite".into())
            })?;
            store(n, &chol.inverse(), a);
            Ok(())
        }

        fn inverse(&self, n: usize, a: &mut [f64]) -> Result<(), DgMeshError> {
            let m = DMatrix::from_row_slice(n, n, &a[..n * n]);
            let inv = m
                .try_inverse()
                .ok_or_else(|| DgMeshError::LinearAlgebra("singular matrix".into()))?;
            store(n, &inv, a);
            Ok(())
        }
    }
}

#[cfg(feature = "nalgebra-backend")]
pub use nalgebra_backend::NalgebraLinearAlgebra;

/// Backend selected at build time.
pub fn default_backend() -> &'static dyn LinearAlgebra {
    #[cfg(feature = "nalgebra-backend")]
    {
        &NalgebraLinearAlgebra
    }
    #[cfg(not(feature = "nalgebra-backend"))]
    {
        &ReferenceLinearAlgebra
    }
}
