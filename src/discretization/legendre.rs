//! Legendre polynomials used as the modal basis of the nodal elements.
//!
//! Three-term recurrence:
//! P_0(x) = 1, P_1(x) = x,
//! (n+1) P_{n+1}(x) = (2n+1) x P_n(x) - n P_{n-1}(x)

/// Evaluate `P_n(x)` and `P'_n(x)` with one recurrence pass.
pub fn legendre_and_derivative(n: usize, x: f64) -> (f64, f64) {
    if n == 0 {
        return (1.0, 0.0);
    }
    let mut p_prev = 1.0;
    let mut p_curr = x;
    let mut d_prev = 0.0;
    let mut d_curr = 1.0;
    for k in 1..n {
        let kf = k as f64;
        let p_next = ((2.0 * kf + 1.0) * x * p_curr - kf * p_prev) / (kf + 1.0);
        // P'_{k+1} = P'_{k-1} + (2k+1) P_k, valid on the closed interval
        let d_next = d_prev + (2.0 * kf + 1.0) * p_curr;
        p_prev = p_curr;
        p_curr = p_next;
        d_prev = d_curr;
        d_curr = d_next;
    }
    (p_curr, d_curr)
}

/// `P_n(x)` only.
pub fn legendre(n: usize, x: f64) -> f64 {
    legendre_and_derivative(n, x).0
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn low_order_values() {
        let x = 0.5;
        assert!((legendre(2, x) - (3.0 * x * x - 1.0) / 2.0).abs() < 1e-14);
        assert!((legendre(3, x) - (5.0 * x * x * x - 3.0 * x) / 2.0).abs() < 1e-14);
        let (_, d3) = legendre_and_derivative(3, x);
        assert!((d3 - (15.0 * x * x - 3.0) / 2.0).abs() < 1e-14);
    }

    #[test]
    fn endpoint_derivatives() {
        for n in 0..=6usize {
            let (p, d) = legendre_and_derivative(n, 1.0);
            assert!((p - 1.0).abs() < 1e-14);
            assert!((d - (n * (n + 1)) as f64 / 2.0).abs() < 1e-12);
            let (_, dm) = legendre_and_derivative(n, -1.0);
            let sign = if n % 2 == 0 { -1.0 } else { 1.0 };
            assert!((dm - sign * (n * (n + 1)) as f64 / 2.0).abs() < 1e-12);
        }
    }
}
