//! Mesh points and the rank-local point table.
//!
//! A point is identified by its global ID together with the periodic marker
//! through which it was imported (`None` for ordinary points), so the same
//! source point may appear several times on a rank as distinct periodic
//! images. Geometric matching uses [`PointCompare`], a tolerance-aware view
//! of the coordinates.

use crate::mesh_error::DgMeshError;
use serde::{Deserialize, Serialize};
use std::cmp::Ordering;
use std::collections::BTreeMap;

/// Identity of a point on a rank.
///
/// Field order gives the derived ordering: non-periodic points first, then by
/// periodic marker, then by global ID.
#[derive(
    Copy, Clone, Debug, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize,
)]
pub struct PointKey {
    pub periodic: Option<u16>,
    pub global_id: u64,
}

impl PointKey {
    pub fn new(global_id: u64, periodic: Option<u16>) -> Self {
        Self {
            periodic,
            global_id,
        }
    }

    pub fn plain(global_id: u64) -> Self {
        Self::new(global_id, None)
    }
}

/// A point with its coordinates. Unused trailing coordinates are zero.
#[derive(Copy, Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct PointFem {
    pub key: PointKey,
    pub coord: [f64; 3],
}

impl PointFem {
    pub fn new(key: PointKey, coord: [f64; 3]) -> Self {
        Self { key, coord }
    }
}

/// Coordinates with a matching tolerance and the local index they stand for.
#[derive(Copy, Clone, Debug, PartialEq)]
pub struct PointCompare {
    pub dim: usize,
    pub node: usize,
    pub tol: f64,
    pub coord: [f64; 3],
}

impl PointCompare {
    /// Axis-by-axis comparison. The tolerance is the smaller of the two, and
    /// the first axis that differs by more than it decides.
    pub fn cmp_tol(&self, other: &Self) -> Ordering {
        let tol = self.tol.min(other.tol);
        for l in 0..self.dim.min(other.dim) {
            if (self.coord[l] - other.coord[l]).abs() > tol {
                return self.coord[l].total_cmp(&other.coord[l]);
            }
        }
        Ordering::Equal
    }

    pub fn matches(&self, other: &Self) -> bool {
        self.cmp_tol(other) == Ordering::Equal
    }
}

/// Points of one surface, searchable by coordinate.
///
/// Stored sorted on the first axis; a lookup scans the window of candidates
/// within the largest tolerance on that axis and applies [`PointCompare`]
/// equality to each.
#[derive(Clone, Debug, Default)]
pub struct CoordinateIndex {
    points: Vec<PointCompare>,
    max_tol: f64,
}

impl CoordinateIndex {
    pub fn new(mut points: Vec<PointCompare>) -> Self {
        points.sort_by(|a, b| {
            a.coord[0]
                .total_cmp(&b.coord[0])
                .then(a.coord[1].total_cmp(&b.coord[1]))
                .then(a.coord[2].total_cmp(&b.coord[2]))
        });
        let max_tol = points.iter().map(|p| p.tol).fold(0.0, f64::max);
        Self { points, max_tol }
    }

    pub fn len(&self) -> usize {
        self.points.len()
    }

    pub fn is_empty(&self) -> bool {
        self.points.is_empty()
    }

    /// Local index of the point matching `query`, if any.
    pub fn find(&self, query: &PointCompare) -> Option<usize> {
        let lo_x = query.coord[0] - self.max_tol;
        let start = self.points.partition_point(|p| p.coord[0] < lo_x);
        let hi_x = query.coord[0] + self.max_tol;
        self.points[start..]
            .iter()
            .take_while(|p| p.coord[0] <= hi_x)
            .find(|p| p.matches(query))
            .map(|p| p.node)
    }
}

/// Rank-local point table: local index → point, and key → local index.
///
/// Several keys may resolve to the same local index (a periodic image that
/// coincides with a point already present), but every stored point has a
/// distinct key.
#[derive(Clone, Debug, Default)]
pub struct PointRegistry {
    points: Vec<PointFem>,
    index: BTreeMap<PointKey, usize>,
}

impl PointRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Sort by key and drop duplicates; the local numbering is the sorted order.
    pub fn from_points(mut points: Vec<PointFem>) -> Self {
        points.sort_by(|a, b| a.key.cmp(&b.key));
        points.dedup_by(|a, b| a.key == b.key);
        let index = points.iter().enumerate().map(|(i, p)| (p.key, i)).collect();
        Self { points, index }
    }

    pub fn len(&self) -> usize {
        self.points.len()
    }

    pub fn is_empty(&self) -> bool {
        self.points.is_empty()
    }

    pub fn points(&self) -> &[PointFem] {
        &self.points
    }

    pub fn point(&self, local: usize) -> &PointFem {
        &self.points[local]
    }

    pub fn coord(&self, local: usize) -> [f64; 3] {
        self.points[local].coord
    }

    pub fn contains(&self, key: &PointKey) -> bool {
        self.index.contains_key(key)
    }

    pub fn get(&self, key: &PointKey) -> Option<usize> {
        self.index.get(key).copied()
    }

    /// Local index of `key`; a miss is an internal inconsistency.
    pub fn require(&self, key: &PointKey) -> Result<usize, DgMeshError> {
        self.get(key).ok_or_else(|| {
            DgMeshError::MeshInconsistency(format!(
                "point {} (periodic {:?}) is not stored on this rank",
                key.global_id, key.periodic
            ))
        })
    }

    /// Append `point` unless its key is known; returns its local index.
    pub fn insert(&mut self, point: PointFem) -> usize {
        if let Some(i) = self.get(&point.key) {
            return i;
        }
        let i = self.points.len();
        self.index.insert(point.key, i);
        self.points.push(point);
        i
    }

    /// Resolve `key` to an existing local point without storing a new one.
    pub fn alias(&mut self, key: PointKey, local: usize) {
        self.index.insert(key, local);
    }

    /// All keys with the local index they resolve to.
    pub fn keys(&self) -> impl Iterator<Item = (&PointKey, &usize)> + '_ {
        self.index.iter()
    }
}
