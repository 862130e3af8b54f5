//! Face construction on a distributed mesh.
//!
//! Every face of every local element is reduced to a canonical corner
//! sequence: rotated so the smallest point index leads and, for polygons,
//! turned so that the second corner is smaller than the last. Elements whose
//! own (inward) orientation needed the turn go on side 1 of the face, the
//! others on side 0, so the two elements of an interior face land on
//! opposite sides. Faces without an owned element are discarded.
//!
//! The surviving faces are ordered boundary first (by marker, then by
//! boundary element), then matching faces by their element pair. Side 0 of
//! a matching face is the element of the lower shape, or the lower local
//! index for equal shapes.

use crate::algs::adapter::{face_shape_of, renumber_for_face};
use crate::algs::linalg::LinearAlgebra;
use crate::algs::distribute::DistributedMesh;
use crate::config::DgMeshConfig;
use crate::discretization::cache::StandardElementCache;
use crate::discretization::standard_element::{FaceKey, SideKey, VolumeKey};
use crate::mesh_error::DgMeshError;
use crate::topology::cell_type::CellType;
use crate::topology::element::{FaceMetrics, FaceSideDofs, MatchingFace, VolumeElement};
use std::collections::BTreeMap;

/// `(local element, face of the element)`.
type FaceSlot = (usize, usize);

#[derive(Clone, Debug)]
struct FaceRecord {
    corners: Vec<usize>,
    sides: [Option<FaceSlot>; 2],
    owned: bool,
    jac_const: bool,
    /// `(marker position, boundary element)` once matched to a boundary element.
    boundary: Option<(usize, usize)>,
}

impl FaceRecord {
    fn sort_key(&self) -> (u8, usize, usize) {
        if let Some((m, k)) = self.boundary {
            return (0, m, k);
        }
        match self.sides {
            [Some((a, _)), Some((b, _))] => (1, a.min(b), a.max(b)),
            [Some((a, _)), None] | [None, Some((a, _))] => (2, a, a),
            [None, None] => (3, 0, 0),
        }
    }

    fn is_interior(&self) -> bool {
        self.sides.iter().all(Option::is_some)
    }
}

/// Canonical form of a face corner list and the side its element takes.
pub fn canonical_corners(corners: &[usize]) -> (Vec<usize>, usize) {
    let n = corners.len();
    let lead = corners
        .iter()
        .enumerate()
        .min_by_key(|&(_, c)| *c)
        .map_or(0, |(i, _)| i);
    let mut out: Vec<usize> = (0..n).map(|t| corners[(lead + t) % n]).collect();
    if n == 2 {
        return (out, usize::from(lead == 1));
    }
    if n > 2 && out[1] > out[n - 1] {
        out[1..].reverse();
        return (out, 1);
    }
    (out, 0)
}

/// Reverse the orientation of a face, keeping the first corner of a line's
/// partner at the front.
fn flip_orientation(corners: &mut [usize]) {
    match corners.len() {
        2 => corners.swap(0, 1),
        n if n > 2 => corners.swap(0, 2),
        _ => {}
    }
}

/// Rotate a triangular face so a pyramid apex is never corner 0 or corner 1
/// when avoidable.
fn move_apex_last(corners: &mut Vec<usize>, apexes: &[usize]) {
    if corners.len() != 3 || apexes.is_empty() {
        return;
    }
    let top = |n: usize| apexes.contains(&n);
    let c = [corners[0], corners[1], corners[2]];
    if top(c[0]) {
        *corners = if !top(c[1]) {
            vec![c[1], c[2], c[0]]
        } else {
            vec![c[2], c[0], c[1]]
        };
    } else if top(c[1]) && !top(c[2]) {
        *corners = vec![c[2], c[0], c[1]];
    }
}

fn element_face_corners(e: &VolumeElement, f: usize) -> Vec<usize> {
    let corners = e.corner_nodes();
    e.cell.face_vertices(f).iter().map(|&v| corners[v]).collect()
}

/// Face-renumbered DOFs of one side, plus whether the face runs transposed.
fn side_dofs(
    elements: &[VolumeElement],
    elem: usize,
    corners: &[usize],
) -> Result<(FaceSideDofs, bool), DgMeshError> {
    let e = &elements[elem];
    let sol: Vec<usize> = e.sol_dofs().collect();
    let s = renumber_for_face(e.cell, e.p_grid, &e.nodes, corners, e.p_sol, &sol)?;
    let g = renumber_for_face(e.cell, e.p_grid, &e.nodes, corners, e.p_grid, &e.nodes)?;
    Ok((
        FaceSideDofs {
            elem,
            grid_face: g.face_dofs,
            grid_elem: g.elem_dofs,
            sol_face: s.face_dofs,
            sol_elem: s.elem_dofs,
        },
        s.swap,
    ))
}

/// Builds matching faces, boundary face data and standard elements.
pub struct FaceBuilder<'a> {
    config: &'a DgMeshConfig,
    la: &'a dyn LinearAlgebra,
}

impl<'a> FaceBuilder<'a> {
    pub fn new(config: &'a DgMeshConfig, la: &'a dyn LinearAlgebra) -> Self {
        Self { config, la }
    }

    /// Build the faces of `mesh`. Returns the matching faces; boundary faces
    /// are stored on the surface elements of the non-periodic markers.
    pub fn build(
        &self,
        mesh: &mut DistributedMesh,
        cache: &mut StandardElementCache,
    ) -> Result<Vec<MatchingFace>, DgMeshError> {
        let mut faces = collect_faces(&mesh.elements)?;
        match_boundaries(mesh, &mut faces)?;

        let mut list: Vec<FaceRecord> = faces.into_values().filter(|f| f.owned).collect();
        let n_non_matching = list
            .iter()
            .filter(|f| f.boundary.is_none() && !f.is_interior())
            .count();
        if n_non_matching > 0 {
            return Err(DgMeshError::UnsupportedTopology(format!(
                "{n_non_matching} faces have neither a neighbor nor a boundary element; \
                 non-matching faces are not supported"
            )));
        }
        list.sort_by_key(FaceRecord::sort_key);

        let mut matching = Vec::with_capacity(list.len());
        let mut n_boundary = 0;
        for mut f in list {
            orient(&mut f, &mesh.elements);
            match f.boundary {
                Some((m, k)) => {
                    self.boundary_face(mesh, cache, &f, m, k)?;
                    n_boundary += 1;
                }
                None => matching.push(self.matching_face(&mesh.elements, cache, f)?),
            }
        }
        log::info!(
            "{} matching faces, {} boundary faces, {} standard faces",
            matching.len(),
            n_boundary,
            cache.faces().len()
        );
        Ok(matching)
    }

    /// Attach the solution and grid standard elements to every owned element.
    pub fn standard_volume_elements(
        &self,
        mesh: &mut DistributedMesh,
        cache: &mut StandardElementCache,
    ) -> Result<(), DgMeshError> {
        for e in mesh.elements.iter_mut().take(mesh.n_owned) {
            let order_exact = self.config.order_exact(e.p_sol, e.jac_const);
            let sol = VolumeKey {
                shape: e.cell,
                degree: e.p_sol,
                jac_const: e.jac_const,
                order_exact,
            };
            e.std_sol = Some(cache.volume_index(sol, self.la)?);
            e.std_grid = Some(cache.volume_index(
                VolumeKey {
                    degree: e.p_grid,
                    ..sol
                },
                self.la,
            )?);
        }
        log::debug!("{} standard volume elements", cache.volumes().len());
        Ok(())
    }

    /// Solution and grid keys of a face whose sides are `sides`.
    fn face_keys(
        &self,
        face_shape: CellType,
        jac_const: bool,
        sides: &[(&VolumeElement, bool)],
    ) -> (FaceKey, FaceKey) {
        let p_max = sides.iter().map(|(e, _)| e.p_sol).max().unwrap_or(0);
        let order_exact = self.config.order_exact(p_max, jac_const);
        let side = |i: usize, grid: bool| {
            sides.get(i).map(|&(e, swap)| SideKey {
                shape: e.cell,
                degree: if grid { e.p_grid } else { e.p_sol },
                swap,
            })
        };
        let key = |grid: bool| FaceKey {
            face_shape,
            jac_const,
            order_exact,
            side0: side(0, grid).unwrap_or(SideKey {
                shape: face_shape,
                degree: 0,
                swap: false,
            }),
            side1: side(1, grid),
        };
        (key(false), key(true))
    }

    fn matching_face(
        &self,
        elements: &[VolumeElement],
        cache: &mut StandardElementCache,
        f: FaceRecord,
    ) -> Result<MatchingFace, DgMeshError> {
        let (Some((e0, _)), Some((e1, _))) = (f.sides[0], f.sides[1]) else {
            return Err(DgMeshError::MeshInconsistency(
                "matching face without two elements".into(),
            ));
        };
        let face_shape = face_shape_of(f.corners.len())?;
        let (d0, s0) = side_dofs(elements, e0, &f.corners)?;
        let (d1, s1) = side_dofs(elements, e1, &f.corners)?;
        let (sol, grid) = self.face_keys(
            face_shape,
            f.jac_const,
            &[(&elements[e0], s0), (&elements[e1], s1)],
        );
        Ok(MatchingFace {
            face_shape,
            corners: f.corners,
            jac_const: f.jac_const,
            sides: [d0, d1],
            std_sol: cache.face_index(sol, self.la)?,
            std_grid: cache.face_index(grid, self.la)?,
            metrics: FaceMetrics::default(),
        })
    }

    fn boundary_face(
        &self,
        mesh: &mut DistributedMesh,
        cache: &mut StandardElementCache,
        f: &FaceRecord,
        marker: usize,
        k: usize,
    ) -> Result<(), DgMeshError> {
        let Some((e0, _)) = f.sides[0] else {
            return Err(DgMeshError::MeshInconsistency(
                "boundary face without a domain element".into(),
            ));
        };
        let face_shape = face_shape_of(f.corners.len())?;
        let (d0, s0) = side_dofs(&mesh.elements, e0, &f.corners)?;
        let (sol, grid) = self.face_keys(face_shape, f.jac_const, &[(&mesh.elements[e0], s0)]);
        let std_sol = cache.face_index(sol, self.la)?;
        let std_grid = cache.face_index(grid, self.la)?;
        let surf = &mut mesh.markers[marker].surface[k];
        surf.dofs = Some(d0);
        surf.std_sol = Some(std_sol);
        surf.std_grid = Some(std_grid);
        Ok(())
    }
}

/// All element faces keyed by their canonical corners, merged pairwise.
fn collect_faces(
    elements: &[VolumeElement],
) -> Result<BTreeMap<Vec<usize>, FaceRecord>, DgMeshError> {
    let mut faces: BTreeMap<Vec<usize>, FaceRecord> = BTreeMap::new();
    for (i, e) in elements.iter().enumerate() {
        for f in 0..e.cell.n_faces() {
            let (corners, side) = canonical_corners(&element_face_corners(e, f));
            let jac_const = e.face_jac_const.get(f).copied().unwrap_or(false);
            match faces.get_mut(&corners) {
                None => {
                    let mut sides = [None, None];
                    sides[side] = Some((i, f));
                    faces.insert(
                        corners.clone(),
                        FaceRecord {
                            corners,
                            sides,
                            owned: e.owned,
                            jac_const,
                            boundary: None,
                        },
                    );
                }
                Some(rec) => {
                    if !(rec.owned || e.owned) {
                        continue;
                    }
                    if rec.sides[side].is_some() {
                        return Err(DgMeshError::MeshInconsistency(format!(
                            "face {:?} appears twice on the same side (elements {} and {})",
                            rec.corners,
                            rec.sides[side].map_or(0, |(o, _)| elements[o].global_id),
                            e.global_id
                        )));
                    }
                    rec.sides[side] = Some((i, f));
                    rec.owned = true;
                    rec.jac_const &= jac_const;
                }
            }
        }
    }
    Ok(faces)
}

/// Attach the boundary elements of non-periodic markers to their faces.
fn match_boundaries(
    mesh: &mut DistributedMesh,
    faces: &mut BTreeMap<Vec<usize>, FaceRecord>,
) -> Result<(), DgMeshError> {
    let elements = &mesh.elements;
    for (m, marker) in mesh.markers.iter_mut().enumerate() {
        if marker.periodic {
            continue;
        }
        for (k, s) in marker.surface.iter_mut().enumerate() {
            let corners: Vec<usize> = s
                .cell
                .corner_dofs(s.p_grid)
                .into_iter()
                .map(|d| s.nodes.get(d).copied())
                .collect::<Option<_>>()
                .ok_or_else(|| {
                    DgMeshError::MeshInconsistency(format!(
                        "boundary element {} has too few nodes",
                        s.global_id
                    ))
                })?;
            let (key, _) = canonical_corners(&corners);
            let rec = faces.get_mut(&key).ok_or_else(|| {
                DgMeshError::MeshInconsistency(format!(
                    "boundary element {} of marker {} matches no element face",
                    s.global_id, marker.tag
                ))
            })?;
            let slot = match rec.sides {
                [Some(slot), None] | [None, Some(slot)] => slot,
                _ => {
                    return Err(DgMeshError::MeshInconsistency(format!(
                        "boundary element {} of marker {} lies on an interior face",
                        s.global_id, marker.tag
                    )));
                }
            };
            let (elem, face) = slot;
            if elem != s.volume_elem || elements[elem].p_grid != s.p_grid {
                return Err(DgMeshError::MeshInconsistency(format!(
                    "boundary element {} of marker {} does not fit its domain element",
                    s.global_id, marker.tag
                )));
            }
            rec.boundary = Some((m, k));
            s.face_of_elem = Some(face);
        }
    }
    Ok(())
}

/// Put the faces' sides in their final order and fix the corner sequence.
fn orient(f: &mut FaceRecord, elements: &[VolumeElement]) {
    let swap = match f.sides {
        [Some((a, _)), Some((b, _))] => {
            let (ta, tb) = (elements[a].cell, elements[b].cell);
            if ta == tb { a > b } else { ta > tb }
        }
        [None, Some(_)] => true,
        _ => false,
    };
    if swap {
        f.sides.swap(0, 1);
        flip_orientation(&mut f.corners);
    }
    let apexes: Vec<usize> = f
        .sides
        .iter()
        .flatten()
        .map(|&(e, _)| &elements[e])
        .filter(|e| e.cell == CellType::Pyramid)
        .map(|e| e.corner_nodes()[CellType::PYRAMID_APEX])
        .collect();
    move_apex_last(&mut f.corners, &apexes);
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::algs::communicator::NoComm;
    use crate::algs::distribute::{
        InMemorySourceMesh, MeshDistributor, SourceBoundaryElement, SourceElement, SourceMarker,
    };
    use crate::algs::linalg::ReferenceLinearAlgebra;

    fn distribute(src: &InMemorySourceMesh) -> DistributedMesh {
        MeshDistributor::new(&NoComm, &DgMeshConfig::default())
            .distribute(src)
            .unwrap()
    }

    fn build(mesh: &mut DistributedMesh) -> Result<Vec<MatchingFace>, DgMeshError> {
        let cfg = DgMeshConfig::default();
        let mut cache = StandardElementCache::new();
        FaceBuilder::new(&cfg, &ReferenceLinearAlgebra).build(mesh, &mut cache)
    }

    fn two_quads(close: bool) -> InMemorySourceMesh {
        let coords = (0..6u64).map(|i| (i, [(i % 3) as f64, (i / 3) as f64, 0.0]));
        let elements = vec![
            SourceElement::new(0, CellType::Quadrilateral, 1, 1, vec![0, 1, 3, 4]),
            SourceElement::new(1, CellType::Quadrilateral, 1, 2, vec![1, 2, 4, 5]),
        ];
        let mut m = InMemorySourceMesh::serial(2, elements, coords, Vec::new()).unwrap();
        if close {
            m.close_boundary(0).unwrap();
        }
        m
    }

    #[test]
    fn canonical_form_is_orientation_aware() {
        assert_eq!(canonical_corners(&[4, 1]), (vec![1, 4], 1));
        assert_eq!(canonical_corners(&[1, 4]), (vec![1, 4], 0));
        assert_eq!(canonical_corners(&[5, 2, 7]), (vec![2, 7, 5], 0));
        assert_eq!(canonical_corners(&[5, 7, 2]), (vec![2, 7, 5], 1));
        assert_eq!(canonical_corners(&[3, 9, 1, 6]), (vec![1, 6, 3, 9], 0));
        assert_eq!(canonical_corners(&[3, 6, 1, 9]), (vec![1, 6, 3, 9], 1));
    }

    #[test]
    fn apex_moves_to_the_back() {
        let mut c = vec![4, 1, 2];
        move_apex_last(&mut c, &[4]);
        assert_eq!(c, vec![1, 2, 4]);
        let mut c = vec![1, 4, 2];
        move_apex_last(&mut c, &[4]);
        assert_eq!(c, vec![2, 1, 4]);
        let mut c = vec![4, 5, 2];
        move_apex_last(&mut c, &[4, 5]);
        assert_eq!(c, vec![2, 4, 5]);
    }

    #[test]
    fn two_quads_share_one_face() {
        let mut mesh = distribute(&two_quads(true));
        let faces = build(&mut mesh).unwrap();
        assert_eq!(faces.len(), 1);
        let f = &faces[0];
        assert_eq!(f.corners, vec![1, 4]);
        assert_eq!(f.sides[0].elem, 0);
        assert_eq!(f.sides[1].elem, 1);
        // side 1 has p_sol = 2: three face DOFs starting at its offset
        assert_eq!(f.sides[1].sol_face.len(), 3);
        assert!(f.sides[1].sol_face.iter().all(|&d| d >= 4));
        assert_eq!(f.sides[0].grid_face, vec![1, 4]);

        let n_boundary: usize = mesh.markers.iter().map(|m| m.surface.len()).sum();
        let n_faces: usize = mesh.elements.iter().map(|e| e.cell.n_faces()).sum();
        assert_eq!(n_boundary + 2 * faces.len(), n_faces);
        for s in &mesh.markers[0].surface {
            assert!(s.dofs.is_some());
            assert!(s.std_sol.is_some() && s.face_of_elem.is_some());
        }
    }

    #[test]
    fn open_boundary_is_unsupported() {
        let mut mesh = distribute(&two_quads(false));
        assert!(matches!(
            build(&mut mesh),
            Err(DgMeshError::UnsupportedTopology(_))
        ));
    }

    #[test]
    fn boundary_element_of_the_wrong_element_is_rejected() {
        let coords = (0..6u64).map(|i| (i, [(i % 3) as f64, (i / 3) as f64, 0.0]));
        let elements = vec![
            SourceElement::new(0, CellType::Quadrilateral, 1, 1, vec![0, 1, 3, 4]),
            SourceElement::new(1, CellType::Quadrilateral, 1, 1, vec![1, 2, 4, 5]),
        ];
        let marker = SourceMarker {
            tag: 0,
            periodic: false,
            elements: vec![SourceBoundaryElement {
                global_id: 0,
                cell: CellType::Line,
                p_grid: 1,
                nodes: vec![0, 1],
                domain_element: 1,
            }],
        };
        let src = InMemorySourceMesh::serial(2, elements, coords, vec![marker]).unwrap();
        let mut mesh = distribute(&src);
        assert!(matches!(
            build(&mut mesh),
            Err(DgMeshError::MeshInconsistency(_))
        ));
    }

    #[test]
    fn pyramid_apex_is_not_leading() {
        let coords = vec![
            (0, [0.0, 0.0, 0.0]),
            (1, [1.0, 0.0, 0.0]),
            (2, [1.0, 1.0, 0.0]),
            (3, [0.0, 1.0, 0.0]),
            (4, [0.5, 0.5, 1.0]),
            (5, [2.0, 0.5, 0.5]),
        ];
        let elements = vec![
            SourceElement::new(0, CellType::Pyramid, 1, 1, vec![0, 1, 3, 2, 4]),
            SourceElement::new(1, CellType::Tetrahedron, 1, 1, vec![1, 2, 4, 5]),
        ];
        let mut src = InMemorySourceMesh::serial(3, elements, coords, Vec::new()).unwrap();
        src.close_boundary(0).unwrap();
        let mut mesh = distribute(&src);
        let faces = build(&mut mesh).unwrap();
        assert_eq!(faces.len(), 1);
        let f = &faces[0];
        // tetrahedron precedes pyramid in the shape order
        assert_eq!(mesh.elements[f.sides[0].elem].cell, CellType::Tetrahedron);
        assert_eq!(f.corners.len(), 3);
        assert_eq!(*f.corners.last().unwrap(), 4);
    }
}
