//! Periodic point identification.
//!
//! Halo elements imported through a periodic marker carry the coordinates of
//! their donor. [`PeriodicTransform`] maps them back onto the local side of
//! the marker, and [`reconcile_periodic_points`] identifies the transformed
//! points with points already on that surface: a match reuses the local
//! point, anything else becomes a new periodic image.

use crate::config::PeriodicMarkerConfig;
use crate::mesh_error::DgMeshError;
use crate::topology::point::{CoordinateIndex, PointCompare, PointFem, PointRegistry};

/// Tolerance of a query point; the stored point's tolerance always wins.
const QUERY_TOLERANCE: f64 = 1e10;

/// Rigid transform `x -> R (x - c) + (c - t)`.
#[derive(Clone, Copy, Debug, PartialEq)]
pub struct PeriodicTransform {
    pub rotation: [[f64; 3]; 3],
    pub center: [f64; 3],
    pub shift: [f64; 3],
    pub angles: [f64; 3],
}

impl PeriodicTransform {
    /// Transform from the donor side. Rotations about x, y, z in that order.
    pub fn from_config(cfg: &PeriodicMarkerConfig) -> Self {
        let [theta, phi, psi] = cfg.angles;
        let (st, ct) = theta.sin_cos();
        let (sp, cp) = phi.sin_cos();
        let (ss, cs) = psi.sin_cos();
        let rotation = [
            [cp * cs, cp * ss, -sp],
            [st * sp * cs - ct * ss, st * sp * ss + ct * cs, st * cp],
            [ct * sp * cs + st * ss, ct * sp * ss - st * cs, ct * cp],
        ];
        let c = cfg.center;
        let t = cfg.translation;
        Self {
            rotation,
            center: c,
            shift: [c[0] - t[0], c[1] - t[1], c[2] - t[2]],
            angles: cfg.angles,
        }
    }

    pub fn apply(&self, x: [f64; 3], dim: usize) -> [f64; 3] {
        let d = [
            x[0] - self.center[0],
            x[1] - self.center[1],
            if dim == 3 { x[2] - self.center[2] } else { 0.0 },
        ];
        let mut out = [0.0; 3];
        for (r, row) in self.rotation.iter().enumerate() {
            out[r] = row[0] * d[0] + row[1] * d[1] + row[2] * d[2] + self.shift[r];
        }
        if dim == 2 {
            out[2] = 0.0;
        }
        out
    }

    /// Whether any rotation angle exceeds `threshold` in magnitude.
    pub fn is_rotational(&self, threshold: f64) -> bool {
        self.angles.iter().any(|a| a.abs() > threshold)
    }
}

/// Points of one periodic marker's local surface with per-point tolerances.
pub fn surface_point_index<'a>(
    registry: &PointRegistry,
    dim: usize,
    surface: impl IntoIterator<Item = (&'a [usize], f64)>,
) -> CoordinateIndex {
    let mut slot: Vec<Option<usize>> = vec![None; registry.len()];
    let mut points: Vec<PointCompare> = Vec::new();
    for (nodes, tol) in surface {
        for &n in nodes {
            match slot[n] {
                Some(k) => points[k].tol = points[k].tol.min(tol),
                None => {
                    slot[n] = Some(points.len());
                    points.push(PointCompare {
                        dim,
                        node: n,
                        tol,
                        coord: registry.coord(n),
                    });
                }
            }
        }
    }
    CoordinateIndex::new(points)
}

#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct ReconcileStats {
    pub matched: usize,
    pub appended: usize,
    pub already_known: usize,
}

/// Register the periodic halo points of one marker.
///
/// Points whose key is already resolved are left alone, which makes a second
/// pass over the same points a no-op.
pub fn reconcile_periodic_points(
    registry: &mut PointRegistry,
    halo: &[PointFem],
    transform: &PeriodicTransform,
    surface: &CoordinateIndex,
    dim: usize,
) -> Result<ReconcileStats, DgMeshError> {
    let mut stats = ReconcileStats::default();
    for p in halo {
        if p.key.periodic.is_none() {
            return Err(DgMeshError::MeshInconsistency(format!(
                "point {} reached periodic reconciliation without a marker",
                p.key.global_id
            )));
        }
        if registry.contains(&p.key) {
            stats.already_known += 1;
            continue;
        }
        let coord = transform.apply(p.coord, dim);
        let query = PointCompare {
            dim,
            node: usize::MAX,
            tol: QUERY_TOLERANCE,
            coord,
        };
        match surface.find(&query) {
            Some(local) => {
                registry.alias(p.key, local);
                stats.matched += 1;
            }
            None => {
                registry.insert(PointFem::new(p.key, coord));
                stats.appended += 1;
            }
        }
    }
    if stats.matched == 0 && stats.appended > 0 {
        log::warn!(
            "none of {} periodic halo points matched the local surface; check the periodic transform",
            stats.appended
        );
    }
    Ok(stats)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::topology::point::PointKey;

    fn approx3(a: [f64; 3], b: [f64; 3]) -> bool {
        a.iter().zip(b).all(|(x, y)| (x - y).abs() < 1e-12)
    }

    #[test]
    fn rotation_about_z() {
        let cfg = PeriodicMarkerConfig {
            tag: 0,
            center: [0.0; 3],
            angles: [0.0, 0.0, std::f64::consts::FRAC_PI_2],
            translation: [0.0; 3],
        };
        let t = PeriodicTransform::from_config(&cfg);
        assert!(approx3(t.apply([1.0, 0.0, 0.0], 3), [0.0, -1.0, 0.0]));
        assert!(t.is_rotational(1e-5));
    }

    #[test]
    fn translation_subtracts_offset() {
        let t = PeriodicTransform::from_config(&PeriodicMarkerConfig::translation_only(
            0,
            [2.0, 0.0, 0.0],
        ));
        assert!(approx3(t.apply([2.0, 1.0, 0.0], 2), [0.0, 1.0, 0.0]));
        assert!(!t.is_rotational(1e-5));
    }

    /// Unit square strip: local surface x = 0 holds points 0 (y=0) and 1 (y=1);
    /// the donor side x = 2 is imported through marker 0.
    fn setup() -> (PointRegistry, Vec<PointFem>, PeriodicTransform, CoordinateIndex) {
        let reg = PointRegistry::from_points(vec![
            PointFem::new(PointKey::plain(0), [0.0, 0.0, 0.0]),
            PointFem::new(PointKey::plain(1), [0.0, 1.0, 0.0]),
            PointFem::new(PointKey::plain(2), [1.0, 0.0, 0.0]),
            PointFem::new(PointKey::plain(3), [1.0, 1.0, 0.0]),
        ]);
        let halo = vec![
            PointFem::new(PointKey::new(4, Some(0)), [2.0, 0.0, 0.0]),
            PointFem::new(PointKey::new(5, Some(0)), [2.0, 1.0, 0.0]),
            PointFem::new(PointKey::new(6, Some(0)), [1.5, 0.0, 0.0]),
        ];
        let t = PeriodicTransform::from_config(&PeriodicMarkerConfig::translation_only(
            0,
            [2.0, 0.0, 0.0],
        ));
        let edge = [0usize, 1];
        let surface = surface_point_index(&reg, 2, [(&edge[..], 1e-4)]);
        (reg, halo, t, surface)
    }

    #[test]
    fn matched_points_reuse_local_index() {
        let (mut reg, halo, t, surface) = setup();
        let stats = reconcile_periodic_points(&mut reg, &halo, &t, &surface, 2).unwrap();
        assert_eq!(stats.matched, 2);
        assert_eq!(stats.appended, 1);
        assert_eq!(reg.get(&PointKey::new(4, Some(0))), Some(0));
        assert_eq!(reg.get(&PointKey::new(5, Some(0))), Some(1));
        let img = reg.require(&PointKey::new(6, Some(0))).unwrap();
        assert_eq!(img, 4);
        assert!(approx3(reg.coord(img), [-0.5, 0.0, 0.0]));
    }

    #[test]
    fn second_pass_is_a_fixed_point() {
        let (mut reg, halo, t, surface) = setup();
        reconcile_periodic_points(&mut reg, &halo, &t, &surface, 2).unwrap();
        let n = reg.len();
        let stats = reconcile_periodic_points(&mut reg, &halo, &t, &surface, 2).unwrap();
        assert_eq!(reg.len(), n);
        assert_eq!(stats.appended, 0);
        assert_eq!(stats.already_known, halo.len());
    }

    #[test]
    fn non_periodic_point_is_rejected() {
        let (mut reg, _, t, surface) = setup();
        let bad = [PointFem::new(PointKey::plain(9), [0.0; 3])];
        let res = reconcile_periodic_points(&mut reg, &bad, &t, &surface, 2);
        assert!(matches!(res, Err(DgMeshError::MeshInconsistency(_))));
    }
}
