//! Gauss-Legendre quadrature on the reference elements.
//!
//! One-dimensional rules are computed by Newton iteration on `P_n`. Simplex,
//! prism and pyramid rules use collapsed (Duffy) coordinates `(a, b, c)` in
//! `[-1, 1]^d`, with one extra point per collapsed direction to absorb the
//! Jacobian factor of the map.

use crate::discretization::legendre::legendre_and_derivative;
use crate::topology::cell_type::CellType;

/// Quadrature rule on the reference element.
#[derive(Clone, Debug, PartialEq)]
pub struct QuadratureRule {
    /// Quadrature points in reference coordinates (unused axes are zero).
    pub points: Vec<[f64; 3]>,
    /// Quadrature weights.
    pub weights: Vec<f64>,
}

/// Gauss-Legendre nodes and weights with `n` points, exact for degree `2n - 1`.
pub fn gauss_legendre(n: usize) -> (Vec<f64>, Vec<f64>) {
    let n = n.max(1);
    let mut nodes = vec![0.0; n];
    let mut weights = vec![0.0; n];
    for i in 0..n.div_ceil(2) {
        // Chebyshev initial guess, then Newton
        let mut x = -(std::f64::consts::PI * (i as f64 + 0.75) / (n as f64 + 0.5)).cos();
        for _ in 0..100 {
            let (p, dp) = legendre_and_derivative(n, x);
            let dx = p / dp;
            x -= dx;
            if dx.abs() < 1e-15 {
                break;
            }
        }
        let (_, dp) = legendre_and_derivative(n, x);
        let w = 2.0 / ((1.0 - x * x) * dp * dp);
        nodes[i] = x;
        nodes[n - 1 - i] = -x;
        weights[i] = w;
        weights[n - 1 - i] = w;
    }
    if n % 2 == 1 {
        nodes[n / 2] = 0.0;
    }
    (nodes, weights)
}

/// Points per direction so that polynomials of degree `order_exact` integrate exactly.
pub fn points_for_order(order_exact: usize) -> usize {
    order_exact / 2 + 1
}

impl QuadratureRule {
    /// Rule for `shape` integrating polynomials of degree `order_exact` exactly.
    pub fn for_shape(shape: CellType, order_exact: usize) -> Self {
        let n = points_for_order(order_exact);
        let (x, w) = gauss_legendre(n);
        let mut points = Vec::new();
        let mut weights = Vec::new();
        match shape {
            CellType::Line => {
                for (&xi, &wi) in x.iter().zip(&w) {
                    points.push([xi, 0.0, 0.0]);
                    weights.push(wi);
                }
            }
            CellType::Quadrilateral => {
                for (&y, &wy) in x.iter().zip(&w) {
                    for (&xi, &wx) in x.iter().zip(&w) {
                        points.push([xi, y, 0.0]);
                        weights.push(wx * wy);
                    }
                }
            }
            CellType::Hexahedron => {
                for (&z, &wz) in x.iter().zip(&w) {
                    for (&y, &wy) in x.iter().zip(&w) {
                        for (&xi, &wx) in x.iter().zip(&w) {
                            points.push([xi, y, z]);
                            weights.push(wx * wy * wz);
                        }
                    }
                }
            }
            CellType::Triangle => {
                let tri = triangle_rule(n);
                for (p, wt) in tri {
                    points.push([p[0], p[1], 0.0]);
                    weights.push(wt);
                }
            }
            CellType::Prism => {
                let tri = triangle_rule(n);
                for (&z, &wz) in x.iter().zip(&w) {
                    for &(p, wt) in &tri {
                        points.push([p[0], p[1], z]);
                        weights.push(wt * wz);
                    }
                }
            }
            CellType::Tetrahedron => {
                let (xb, wb) = gauss_legendre(n + 1);
                let (xc, wc) = gauss_legendre(n + 2);
                for (&c, &wcc) in xc.iter().zip(&wc) {
                    for (&b, &wbb) in xb.iter().zip(&wb) {
                        for (&a, &wa) in x.iter().zip(&w) {
                            let r = 0.25 * (1.0 + a) * (1.0 - b) * (1.0 - c) - 1.0;
                            let s = 0.5 * (1.0 + b) * (1.0 - c) - 1.0;
                            let jac = 0.5 * (1.0 - b) * 0.25 * (1.0 - c) * (1.0 - c);
                            points.push([r, s, c]);
                            weights.push(wa * wbb * wcc * jac);
                        }
                    }
                }
            }
            CellType::Pyramid => {
                let (xc, wc) = gauss_legendre(n + 2);
                for (&c, &wcc) in xc.iter().zip(&wc) {
                    let h = 0.5 * (1.0 - c);
                    for (&b, &wbb) in x.iter().zip(&w) {
                        for (&a, &wa) in x.iter().zip(&w) {
                            points.push([a * h, b * h, c]);
                            weights.push(wa * wbb * wcc * h * h);
                        }
                    }
                }
            }
        }
        QuadratureRule { points, weights }
    }

    pub fn len(&self) -> usize {
        self.weights.len()
    }

    pub fn is_empty(&self) -> bool {
        self.weights.is_empty()
    }
}

/// Collapsed rule on the reference triangle.
fn triangle_rule(n: usize) -> Vec<([f64; 2], f64)> {
    let (xa, wa) = gauss_legendre(n);
    let (xb, wb) = gauss_legendre(n + 1);
    let mut out = Vec::with_capacity(n * (n + 1));
    for (&b, &wbb) in xb.iter().zip(&wb) {
        for (&a, &waa) in xa.iter().zip(&wa) {
            let r = 0.5 * (1.0 + a) * (1.0 - b) - 1.0;
            out.push(([r, b], waa * wbb * 0.5 * (1.0 - b)));
        }
    }
    out
}

#[cfg(test)]
mod tests {
    use super::*;

    fn approx(a: f64, b: f64) -> bool {
        (a - b).abs() < 1e-10
    }

    #[test]
    fn gauss_legendre_known_nodes() {
        let (x, w) = gauss_legendre(2);
        let pt = 1.0 / 3.0_f64.sqrt();
        assert!(approx(x[0], -pt) && approx(x[1], pt));
        assert!(approx(w[0], 1.0) && approx(w[1], 1.0));
        let (x, w) = gauss_legendre(3);
        assert!(approx(x[1], 0.0));
        assert!(approx(w[1], 8.0 / 9.0));
    }

    #[test]
    fn weights_sum_to_reference_volume() {
        let volumes = [
            (CellType::Line, 2.0),
            (CellType::Triangle, 2.0),
            (CellType::Quadrilateral, 4.0),
            (CellType::Tetrahedron, 4.0 / 3.0),
            (CellType::Hexahedron, 8.0),
            (CellType::Prism, 4.0),
            (CellType::Pyramid, 8.0 / 3.0),
        ];
        for (shape, vol) in volumes {
            for order in 0..6 {
                let rule = QuadratureRule::for_shape(shape, order);
                let sum: f64 = rule.weights.iter().sum();
                assert!(approx(sum, vol), "{shape:?} order {order}: {sum}");
            }
        }
    }

    #[test]
    fn triangle_integrates_monomials_exactly() {
        // ∫_T (1+r)^a (1+s)^b = 2^{a+b+2} a! b! / (a+b+2)!
        let fact = |n: u32| (1..=n).map(f64::from).product::<f64>();
        let rule = QuadratureRule::for_shape(CellType::Triangle, 6);
        for a in 0..=3u32 {
            for b in 0..=(6 - a).min(3) {
                let got: f64 = rule
                    .points
                    .iter()
                    .zip(&rule.weights)
                    .map(|(p, w)| w * (1.0 + p[0]).powi(a as i32) * (1.0 + p[1]).powi(b as i32))
                    .sum();
                let want = 2f64.powi((a + b + 2) as i32) * fact(a) * fact(b) / fact(a + b + 2);
                assert!(approx(got, want), "a={a} b={b}: {got} vs {want}");
            }
        }
    }

    #[test]
    fn tetrahedron_second_moment() {
        // slices at u = 1 + t are right triangles of area (2-u)^2/2:
        // ∫_0^2 u^2 (2-u)^2 / 2 du = 8/15
        let rule = QuadratureRule::for_shape(CellType::Tetrahedron, 2);
        let got: f64 = rule
            .points
            .iter()
            .zip(&rule.weights)
            .map(|(p, w)| w * (1.0 + p[2]).powi(2))
            .sum();
        assert!(approx(got, 8.0 / 15.0), "{got}");
    }
}
