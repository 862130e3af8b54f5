//! Equidistant DOF lattices of the nodal elements.
//!
//! Every nodal DOF of a degree-`p` element is identified by integer lattice
//! coordinates `(i, j, k)`; the DOF ordering runs `i` fastest:
//! - line: `i`;
//! - quadrilateral / hexahedron: `k`, `j`, `i` each in `0..=p`;
//! - triangle: `j` in `0..=p`, `i` in `0..=p-j`;
//! - tetrahedron: `k`, then the triangle of degree `p-k`;
//! - prism: `k` in `0..=p`, then the degree-`p` triangle;
//! - pyramid: `k` in `0..=p`, then the square `(i, j) in 0..=p-k`.

use crate::topology::cell_type::CellType;

pub type Lattice = [usize; 3];

fn tri_count(p: usize) -> usize {
    (p + 1) * (p + 2) / 2
}

/// Index of `(i, j)` in a degree-`p` triangle lattice.
pub fn tri_index(p: usize, i: usize, j: usize) -> usize {
    j * (p + 1) + i - j * j.saturating_sub(1) / 2
}

/// All lattice points of a degree-`p` element in DOF order.
pub fn lattice_points(ty: CellType, p: usize) -> Vec<Lattice> {
    let mut pts = Vec::with_capacity(ty.n_dofs(p));
    match ty {
        CellType::Line => pts.extend((0..=p).map(|i| [i, 0, 0])),
        CellType::Quadrilateral => {
            for j in 0..=p {
                pts.extend((0..=p).map(|i| [i, j, 0]));
            }
        }
        CellType::Hexahedron => {
            for k in 0..=p {
                for j in 0..=p {
                    pts.extend((0..=p).map(|i| [i, j, k]));
                }
            }
        }
        CellType::Triangle => {
            for j in 0..=p {
                pts.extend((0..=p - j).map(|i| [i, j, 0]));
            }
        }
        CellType::Tetrahedron => {
            for k in 0..=p {
                for j in 0..=p - k {
                    pts.extend((0..=p - k - j).map(|i| [i, j, k]));
                }
            }
        }
        CellType::Prism => {
            for k in 0..=p {
                for j in 0..=p {
                    pts.extend((0..=p - j).map(|i| [i, j, k]));
                }
            }
        }
        CellType::Pyramid => {
            for k in 0..=p {
                let m = p - k;
                for j in 0..=m {
                    pts.extend((0..=m).map(|i| [i, j, k]));
                }
            }
        }
    }
    pts
}

/// DOF index of lattice point `l` of a degree-`p` element.
pub fn lattice_index(ty: CellType, p: usize, l: Lattice) -> usize {
    let [i, j, k] = l;
    let q = p + 1;
    match ty {
        CellType::Line => i,
        CellType::Quadrilateral => j * q + i,
        CellType::Hexahedron => (k * q + j) * q + i,
        CellType::Triangle => tri_index(p, i, j),
        CellType::Tetrahedron => {
            let below: usize = (0..k).map(|l| tri_count(p - l)).sum();
            below + tri_index(p - k, i, j)
        }
        CellType::Prism => k * tri_count(p) + tri_index(p, i, j),
        CellType::Pyramid => {
            let below: usize = (0..k).map(|l| (p - l + 1) * (p - l + 1)).sum();
            let m = p - k;
            below + j * (m + 1) + i
        }
    }
}

/// Reference coordinates of lattice point `l`. For `p == 0` the single node
/// sits at the centroid.
pub fn lattice_coordinates(ty: CellType, p: usize, l: Lattice) -> [f64; 3] {
    if p == 0 {
        return match ty {
            CellType::Triangle => [-1.0 / 3.0, -1.0 / 3.0, 0.0],
            CellType::Tetrahedron => [-0.5, -0.5, -0.5],
            CellType::Prism => [-1.0 / 3.0, -1.0 / 3.0, 0.0],
            CellType::Pyramid => [0.0, 0.0, -0.5],
            _ => [0.0; 3],
        };
    }
    let pf = p as f64;
    let eq = |n: usize| -1.0 + 2.0 * n as f64 / pf;
    let [i, j, k] = l;
    match ty {
        CellType::Pyramid => {
            let m = (p - k) as f64;
            [
                (2.0 * i as f64 - m) / pf,
                (2.0 * j as f64 - m) / pf,
                eq(k),
            ]
        }
        CellType::Line => [eq(i), 0.0, 0.0],
        CellType::Triangle | CellType::Quadrilateral => [eq(i), eq(j), 0.0],
        _ => [eq(i), eq(j), eq(k)],
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn index_matches_enumeration_order() {
        for ty in CellType::ALL {
            for p in 0..=4 {
                let pts = lattice_points(ty, p);
                assert_eq!(pts.len(), ty.n_dofs(p), "{ty:?} p={p}");
                for (n, &l) in pts.iter().enumerate() {
                    assert_eq!(lattice_index(ty, p, l), n, "{ty:?} p={p} {l:?}");
                }
            }
        }
    }

    #[test]
    fn corners_sit_on_reference_vertices() {
        let p = 3;
        let hex = lattice_points(CellType::Hexahedron, p);
        let c = CellType::Hexahedron.corner_dofs(p);
        assert_eq!(lattice_coordinates(CellType::Hexahedron, p, hex[c[6]]), [1.0, 1.0, 1.0]);
        let pyr = lattice_points(CellType::Pyramid, p);
        let apex = CellType::Pyramid.corner_dofs(p)[4];
        assert_eq!(lattice_coordinates(CellType::Pyramid, p, pyr[apex]), [0.0, 0.0, 1.0]);
        let tet = lattice_points(CellType::Tetrahedron, p);
        let top = CellType::Tetrahedron.corner_dofs(p)[3];
        assert_eq!(lattice_coordinates(CellType::Tetrahedron, p, tet[top]), [-1.0, -1.0, 1.0]);
    }
}
