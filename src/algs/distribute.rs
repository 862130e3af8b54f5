//! Redistribution of a linearly partitioned source mesh by element color.
//!
//! The source mesh is spread over the ranks in contiguous blocks of global
//! element IDs, and every element carries the rank ("color") it must end up
//! on. [`MeshDistributor::distribute`] moves the elements and their boundary
//! elements to their color, requests the halo elements from the ranks that
//! hold them in the source distribution, and builds the local point table,
//! identifying periodic images with points already on the rank.

use crate::algs::adapter::{face_shape_of, renumber_for_face};
use crate::algs::communicator::{CommTag, Communicator};
use crate::algs::exchange::{exchange_payloads, sparse_exchange};
use crate::algs::wire::{
    WireBoundaryHdr, WireCount, WireElementHdr, WireHaloRequest, WirePoint, WireReader,
    WireWriter, kind,
};
use crate::config::DgMeshConfig;
use crate::mesh_error::DgMeshError;
use crate::topology::cell_type::CellType;
use crate::topology::element::{BoundaryMarker, ElementMetrics, SurfaceElement, VolumeElement};
use crate::topology::periodic::{PeriodicTransform, reconcile_periodic_points, surface_point_index};
use crate::topology::point::{PointFem, PointKey, PointRegistry};
use hashbrown::HashMap;
use std::collections::{BTreeMap, BTreeSet};

const ELEMENT_TAG: CommTag = CommTag::new(0x4400);
const BOUNDARY_TAG: CommTag = CommTag::new(0x4402);
const HALO_REQUEST_TAG: CommTag = CommTag::new(0x4404);
const HALO_REPLY_TAG: CommTag = CommTag::new(0x4406);

/// Volume element of the source mesh.
#[derive(Clone, Debug, PartialEq)]
pub struct SourceElement {
    pub global_id: u64,
    pub cell: CellType,
    pub p_grid: usize,
    pub p_sol: usize,
    /// Global point IDs of the grid DOFs.
    pub nodes: Vec<u64>,
    /// Neighbor across each face.
    pub neighbors: Vec<Option<u64>>,
    /// Periodic marker crossed by each face.
    pub periodic: Vec<Option<u16>>,
    pub jac_const: bool,
    pub face_jac_const: Vec<bool>,
    /// Destination rank.
    pub color: usize,
    pub sol_offset: u64,
}

impl SourceElement {
    /// Element without neighbors, straight-sided, colored for rank 0.
    pub fn new(
        global_id: u64,
        cell: CellType,
        p_grid: usize,
        p_sol: usize,
        nodes: Vec<u64>,
    ) -> Self {
        let n_faces = cell.n_faces();
        Self {
            global_id,
            cell,
            p_grid,
            p_sol,
            nodes,
            neighbors: vec![None; n_faces],
            periodic: vec![None; n_faces],
            jac_const: true,
            face_jac_const: vec![true; n_faces],
            color: 0,
            sol_offset: 0,
        }
    }

    fn check(&self) -> Result<(), DgMeshError> {
        let n_faces = self.cell.n_faces();
        if self.nodes.len() != self.cell.n_dofs(self.p_grid)
            || self.neighbors.len() != n_faces
            || self.periodic.len() != n_faces
            || self.face_jac_const.len() != n_faces
        {
            return Err(DgMeshError::MeshInconsistency(format!(
                "source element {} ({:?}, p_grid {}) has inconsistent list lengths",
                self.global_id, self.cell, self.p_grid
            )));
        }
        Ok(())
    }

    /// Global IDs of the corners of face `f`.
    fn face_corners(&self, f: usize) -> Vec<u64> {
        let corners = self.cell.corner_dofs(self.p_grid);
        self.cell
            .face_vertices(f)
            .iter()
            .map(|&v| self.nodes[corners[v]])
            .collect()
    }
}

/// Boundary element of a marker in the source mesh.
#[derive(Clone, Debug, PartialEq)]
pub struct SourceBoundaryElement {
    pub global_id: u64,
    pub cell: CellType,
    pub p_grid: usize,
    pub nodes: Vec<u64>,
    /// Global ID of the adjacent volume element.
    pub domain_element: u64,
}

/// Boundary marker with the boundary elements of the rank's local elements.
#[derive(Clone, Debug, PartialEq)]
pub struct SourceMarker {
    pub tag: u16,
    pub periodic: bool,
    pub elements: Vec<SourceBoundaryElement>,
}

/// Rank-local slice of a linearly distributed source mesh.
pub trait SourceMesh {
    fn dimension(&self) -> usize;

    /// Cumulative element counts, `size + 1` entries: rank `r` stores the
    /// global elements `ranges[r]..ranges[r + 1]`.
    fn element_ranges(&self) -> &[u64];

    /// Local elements in global ID order.
    fn elements(&self) -> &[SourceElement];

    /// Coordinates of a point referenced by a local element.
    fn point_coord(&self, id: u64) -> Option<[f64; 3]>;

    /// Every marker of the mesh, identical in order and tags on all ranks.
    fn markers(&self) -> &[SourceMarker];
}

/// [`SourceMesh`] held in memory, either whole or as one slice of [`split`].
///
/// [`split`]: InMemorySourceMesh::split
#[derive(Clone, Debug, Default)]
pub struct InMemorySourceMesh {
    dim: usize,
    ranges: Vec<u64>,
    elements: Vec<SourceElement>,
    coords: HashMap<u64, [f64; 3]>,
    markers: Vec<SourceMarker>,
}

impl InMemorySourceMesh {
    /// Whole mesh on one rank. Elements must carry the global IDs `0..n` in
    /// order. Face neighbors are found from shared corners and solution DOFs
    /// are numbered in element order.
    pub fn serial(
        dim: usize,
        elements: Vec<SourceElement>,
        coords: impl IntoIterator<Item = (u64, [f64; 3])>,
        markers: Vec<SourceMarker>,
    ) -> Result<Self, DgMeshError> {
        if !(dim == 2 || dim == 3) {
            return Err(DgMeshError::InvalidConfig(format!(
                "mesh dimension {dim} is not supported"
            )));
        }
        for (i, e) in elements.iter().enumerate() {
            if e.global_id != i as u64 {
                return Err(DgMeshError::MeshInconsistency(format!(
                    "element at position {i} has global ID {}",
                    e.global_id
                )));
            }
            e.check()?;
        }
        let mut mesh = Self {
            dim,
            ranges: vec![0, elements.len() as u64],
            elements,
            coords: coords.into_iter().collect(),
            markers,
        };
        mesh.connect_faces();
        mesh.number_sol_dofs();
        Ok(mesh)
    }

    /// Link elements sharing a face. Faces already linked are kept.
    fn connect_faces(&mut self) {
        let mut by_face: BTreeMap<Vec<u64>, Vec<(usize, usize)>> = BTreeMap::new();
        for (i, e) in self.elements.iter().enumerate() {
            for f in 0..e.cell.n_faces() {
                let mut sig = e.face_corners(f);
                sig.sort_unstable();
                by_face.entry(sig).or_default().push((i, f));
            }
        }
        for pair in by_face.values().filter(|v| v.len() == 2) {
            let (a, fa) = pair[0];
            let (b, fb) = pair[1];
            let (ga, gb) = (self.elements[a].global_id, self.elements[b].global_id);
            if self.elements[a].neighbors[fa].is_none() {
                self.elements[a].neighbors[fa] = Some(gb);
            }
            if self.elements[b].neighbors[fb].is_none() {
                self.elements[b].neighbors[fb] = Some(ga);
            }
        }
    }

    fn number_sol_dofs(&mut self) {
        let mut offset = 0u64;
        for e in &mut self.elements {
            e.sol_offset = offset;
            offset += e.cell.n_dofs(e.p_sol) as u64;
        }
    }

    /// Declare face `face` of `elem` periodic through `marker`, with `neighbor`
    /// as the donor element across it.
    pub fn connect_periodic(
        &mut self,
        elem: u64,
        face: usize,
        neighbor: u64,
        marker: u16,
    ) -> Result<(), DgMeshError> {
        let e = self
            .elements
            .iter_mut()
            .find(|e| e.global_id == elem)
            .ok_or_else(|| DgMeshError::MeshInconsistency(format!("no element {elem}")))?;
        if face >= e.cell.n_faces() {
            return Err(DgMeshError::MeshInconsistency(format!(
                "element {elem} has no face {face}"
            )));
        }
        e.neighbors[face] = Some(neighbor);
        e.periodic[face] = Some(marker);
        Ok(())
    }

    /// Destination rank of every element, in global ID order.
    pub fn set_colors(&mut self, colors: &[usize]) -> Result<(), DgMeshError> {
        if colors.len() != self.elements.len() {
            return Err(DgMeshError::InvalidConfig(format!(
                "{} colors for {} elements",
                colors.len(),
                self.elements.len()
            )));
        }
        for (e, &c) in self.elements.iter_mut().zip(colors) {
            e.color = c;
        }
        Ok(())
    }

    /// Add a marker whose boundary elements are the element faces `faces`,
    /// given as `(element global ID, face)`. Boundary elements get the grid
    /// degree of their domain element and continue the global numbering of
    /// the markers already present.
    pub fn add_marker(
        &mut self,
        tag: u16,
        periodic: bool,
        faces: impl IntoIterator<Item = (u64, usize)>,
    ) -> Result<(), DgMeshError> {
        let mut next_id: u64 = self.markers.iter().map(|m| m.elements.len() as u64).sum();
        let mut elements = Vec::new();
        for (id, f) in faces {
            let e = self
                .elements
                .binary_search_by_key(&id, |e| e.global_id)
                .map(|i| &self.elements[i])
                .map_err(|_| DgMeshError::MeshInconsistency(format!("no element {id}")))?;
            if f >= e.cell.n_faces() {
                return Err(DgMeshError::MeshInconsistency(format!(
                    "element {id} has no face {f}"
                )));
            }
            let local: Vec<usize> = (0..e.nodes.len()).collect();
            let corners = e.cell.corner_dofs(e.p_grid);
            let face: Vec<usize> = e.cell.face_vertices(f).iter().map(|&v| corners[v]).collect();
            let conn = renumber_for_face(e.cell, e.p_grid, &local, &face, e.p_grid, &e.nodes)?;
            elements.push(SourceBoundaryElement {
                global_id: next_id,
                cell: face_shape_of(face.len())?,
                p_grid: e.p_grid,
                nodes: conn.face_dofs,
                domain_element: id,
            });
            next_id += 1;
        }
        log::debug!("marker {tag}: {} boundary elements", elements.len());
        self.markers.push(SourceMarker {
            tag,
            periodic,
            elements,
        });
        Ok(())
    }

    /// Collect every face without a neighbor into a new non-periodic marker.
    pub fn close_boundary(&mut self, tag: u16) -> Result<(), DgMeshError> {
        let open: Vec<(u64, usize)> = self
            .elements
            .iter()
            .flat_map(|e| {
                e.neighbors
                    .iter()
                    .enumerate()
                    .filter(|(_, n)| n.is_none())
                    .map(move |(f, _)| (e.global_id, f))
            })
            .collect();
        self.add_marker(tag, false, open)
    }

    /// Linear partition into `n_ranks` contiguous blocks. Each block keeps the
    /// coordinates its elements reference and the boundary elements whose
    /// domain element it stores.
    pub fn split(&self, n_ranks: usize) -> Vec<InMemorySourceMesh> {
        let n = self.elements.len();
        let n_ranks = n_ranks.max(1);
        let mut ranges = Vec::with_capacity(n_ranks + 1);
        ranges.push(0u64);
        for r in 0..n_ranks {
            let len = n / n_ranks + usize::from(r < n % n_ranks);
            ranges.push(ranges[r] + len as u64);
        }
        (0..n_ranks)
            .map(|r| {
                let (lo, hi) = (ranges[r], ranges[r + 1]);
                let elements: Vec<SourceElement> = self.elements[lo as usize..hi as usize].to_vec();
                let coords = elements
                    .iter()
                    .flat_map(|e| e.nodes.iter())
                    .filter_map(|&id| self.coords.get(&id).map(|&c| (id, c)))
                    .collect();
                let markers = self
                    .markers
                    .iter()
                    .map(|m| SourceMarker {
                        tag: m.tag,
                        periodic: m.periodic,
                        elements: m
                            .elements
                            .iter()
                            .filter(|b| (lo..hi).contains(&b.domain_element))
                            .cloned()
                            .collect(),
                    })
                    .collect();
                InMemorySourceMesh {
                    dim: self.dim,
                    ranges: ranges.clone(),
                    elements,
                    coords,
                    markers,
                }
            })
            .collect()
    }
}

impl SourceMesh for InMemorySourceMesh {
    fn dimension(&self) -> usize {
        self.dim
    }

    fn element_ranges(&self) -> &[u64] {
        &self.ranges
    }

    fn elements(&self) -> &[SourceElement] {
        &self.elements
    }

    fn point_coord(&self, id: u64) -> Option<[f64; 3]> {
        self.coords.get(&id).copied()
    }

    fn markers(&self) -> &[SourceMarker] {
        &self.markers
    }
}

/// Owned and halo elements, points and markers of one rank.
#[derive(Clone, Debug, Default)]
pub struct DistributedMesh {
    pub dim: usize,
    pub n_owned: usize,
    /// Owned elements in global ID order, then halos ordered by
    /// `(global ID, periodic marker)`.
    pub elements: Vec<VolumeElement>,
    pub points: PointRegistry,
    pub markers: Vec<BoundaryMarker>,
    pub owned_map: BTreeMap<u64, usize>,
    pub halo_map: BTreeMap<(u64, Option<u16>), usize>,
}

impl DistributedMesh {
    pub fn n_halo(&self) -> usize {
        self.elements.len() - self.n_owned
    }

    /// Total number of local solution DOFs, owned and halo.
    pub fn n_sol_dofs(&self) -> usize {
        self.elements.last().map_or(0, |e| e.sol_offset_local + e.n_dofs_sol())
    }
}

/// Element record as it travels between ranks.
#[derive(Clone, Debug)]
struct ElementRecord {
    global_id: u64,
    sol_offset: u64,
    color: usize,
    cell: CellType,
    p_grid: usize,
    p_sol: usize,
    periodic: Option<u16>,
    jac_const: bool,
    nodes: Vec<u64>,
    neighbors: Vec<Option<u64>>,
    face_periodic: Vec<Option<u16>>,
    face_jac_const: Vec<bool>,
}

#[derive(Clone, Debug)]
struct BoundaryRecord {
    global_id: u64,
    domain_element: u64,
    marker: u16,
    cell: CellType,
    p_grid: usize,
    nodes: Vec<u64>,
}

fn narrow<T: TryFrom<usize>>(v: usize, what: &str) -> Result<T, DgMeshError> {
    T::try_from(v).map_err(|_| DgMeshError::WireFormat(format!("{what} {v} does not fit the wire")))
}

fn cell_of(vtk: u16) -> Result<CellType, DgMeshError> {
    CellType::from_vtk(vtk)
        .ok_or_else(|| DgMeshError::WireFormat(format!("unknown VTK type {vtk}")))
}

fn put_element(
    w: &mut WireWriter,
    e: &SourceElement,
    periodic: Option<u16>,
) -> Result<(), DgMeshError> {
    let hdr = WireElementHdr {
        global_id_le: e.global_id.to_le(),
        sol_offset_le: e.sol_offset.to_le(),
        rank_le: narrow::<u32>(e.color, "color")?.to_le(),
        vtk_le: e.cell.vtk_id().to_le(),
        p_grid_le: narrow::<u16>(e.p_grid, "grid degree")?.to_le(),
        p_sol_le: narrow::<u16>(e.p_sol, "solution degree")?.to_le(),
        n_nodes_le: narrow::<u16>(e.nodes.len(), "node count")?.to_le(),
        n_faces_le: narrow::<u16>(e.neighbors.len(), "face count")?.to_le(),
        periodic_le: periodic.map_or(-1, |p| p as i16).to_le(),
        jac_const: u8::from(e.jac_const),
        _pad: [0; 7],
    };
    w.put(&hdr);
    w.put_u64s(e.nodes.iter().copied());
    w.put_i64s(e.neighbors.iter().map(|n| n.map_or(-1, |id| id as i64)));
    w.put_i32s(e.periodic.iter().map(|p| p.map_or(-1, i32::from)));
    let flags: Vec<u8> = e.face_jac_const.iter().map(|&b| u8::from(b)).collect();
    w.put_bytes(&flags);
    w.end_record();
    Ok(())
}

fn get_element(r: &mut WireReader<'_>) -> Result<ElementRecord, DgMeshError> {
    let hdr: WireElementHdr = r.get()?;
    let n_nodes = u16::from_le(hdr.n_nodes_le) as usize;
    let n_faces = u16::from_le(hdr.n_faces_le) as usize;
    let nodes = r.get_u64s(n_nodes)?;
    let neighbors = r
        .get_i64s(n_faces)?
        .into_iter()
        .map(|n| u64::try_from(n).ok())
        .collect();
    let face_periodic = r
        .get_i32s(n_faces)?
        .into_iter()
        .map(|p| u16::try_from(p).ok())
        .collect();
    let face_jac_const = r.get_bytes(n_faces)?.iter().map(|&b| b != 0).collect();
    Ok(ElementRecord {
        global_id: u64::from_le(hdr.global_id_le),
        sol_offset: u64::from_le(hdr.sol_offset_le),
        color: u32::from_le(hdr.rank_le) as usize,
        cell: cell_of(u16::from_le(hdr.vtk_le))?,
        p_grid: u16::from_le(hdr.p_grid_le) as usize,
        p_sol: u16::from_le(hdr.p_sol_le) as usize,
        periodic: u16::try_from(i16::from_le(hdr.periodic_le)).ok(),
        jac_const: hdr.jac_const != 0,
        nodes,
        neighbors,
        face_periodic,
        face_jac_const,
    })
}

/// Trailing point section of ELEMENTS and HALO_REPLY messages.
fn put_points(w: &mut WireWriter, points: &BTreeMap<u64, [f64; 3]>) {
    w.put(&WireCount::new(points.len()));
    for (&id, &c) in points {
        w.put(&WirePoint::new(id, c));
    }
}

fn get_points(r: &mut WireReader<'_>) -> Result<Vec<(u64, [f64; 3])>, DgMeshError> {
    let n: WireCount = r.get()?;
    (0..n.get())
        .map(|_| r.get::<WirePoint>().map(|p| (p.id(), p.coord())))
        .collect()
}

fn put_boundary(
    w: &mut WireWriter,
    b: &SourceBoundaryElement,
    marker: u16,
) -> Result<(), DgMeshError> {
    let hdr = WireBoundaryHdr {
        global_id_le: b.global_id.to_le(),
        domain_elem_le: b.domain_element.to_le(),
        marker_le: u32::from(marker).to_le(),
        vtk_le: b.cell.vtk_id().to_le(),
        p_grid_le: narrow::<u16>(b.p_grid, "grid degree")?.to_le(),
        n_nodes_le: narrow::<u16>(b.nodes.len(), "node count")?.to_le(),
        _pad: [0; 6],
    };
    w.put(&hdr);
    w.put_u64s(b.nodes.iter().copied());
    w.end_record();
    Ok(())
}

fn get_boundary(r: &mut WireReader<'_>) -> Result<BoundaryRecord, DgMeshError> {
    let hdr: WireBoundaryHdr = r.get()?;
    let nodes = r.get_u64s(u16::from_le(hdr.n_nodes_le) as usize)?;
    Ok(BoundaryRecord {
        global_id: u64::from_le(hdr.global_id_le),
        domain_element: u64::from_le(hdr.domain_elem_le),
        marker: narrow(u32::from_le(hdr.marker_le) as usize, "marker")?,
        cell: cell_of(u16::from_le(hdr.vtk_le))?,
        p_grid: u16::from_le(hdr.p_grid_le) as usize,
        nodes,
    })
}

/// Source rank storing global element `id`.
fn source_owner(ranges: &[u64], id: u64) -> Result<usize, DgMeshError> {
    let r = ranges.partition_point(|&start| start <= id);
    if r == 0 || r >= ranges.len() {
        return Err(DgMeshError::MeshInconsistency(format!(
            "element {id} lies outside the source element ranges"
        )));
    }
    Ok(r - 1)
}

fn coord_of<M: SourceMesh>(src: &M, id: u64) -> Result<[f64; 3], DgMeshError> {
    src.point_coord(id).ok_or_else(|| {
        DgMeshError::MeshInconsistency(format!("no coordinates for point {id} on its source rank"))
    })
}

/// Moves a colored source mesh to its destination ranks.
pub struct MeshDistributor<'a, C: Communicator> {
    comm: &'a C,
    config: &'a DgMeshConfig,
}

impl<'a, C: Communicator> MeshDistributor<'a, C> {
    pub fn new(comm: &'a C, config: &'a DgMeshConfig) -> Self {
        Self { comm, config }
    }

    pub fn distribute<M: SourceMesh>(&self, src: &M) -> Result<DistributedMesh, DgMeshError> {
        let dim = src.dimension();
        if src.element_ranges().len() != self.comm.size() + 1 {
            return Err(DgMeshError::InvalidConfig(format!(
                "source mesh has {} element ranges for {} ranks",
                src.element_ranges().len().saturating_sub(1),
                self.comm.size()
            )));
        }
        for e in src.elements() {
            e.check()?;
        }

        let (owned, owned_points) = self.exchange_elements(src)?;
        let boundary = self.exchange_boundary(src)?;

        let owned_map: BTreeMap<u64, usize> = owned
            .iter()
            .enumerate()
            .map(|(i, e)| (e.global_id, i))
            .collect();
        if owned_map.len() != owned.len() {
            return Err(DgMeshError::MeshInconsistency(
                "an element was received twice".into(),
            ));
        }

        let halo_keys = Self::halo_keys(&owned, &owned_map);
        let (halos, halo_points) = self.exchange_halos(src, &halo_keys)?;

        let mut points = PointRegistry::from_points(
            owned_points
                .iter()
                .map(|(&id, &c)| PointFem::new(PointKey::plain(id), c))
                .collect(),
        );
        for (key, &c) in halo_points.iter().filter(|(k, _)| k.periodic.is_none()) {
            points.insert(PointFem::new(*key, c));
        }

        let mut markers = self.build_markers(src, boundary, &owned_map, &points)?;
        self.reconcile(dim, &mut points, &halo_points, &markers)?;

        let mut elements = Vec::with_capacity(owned.len() + halos.len());
        let mut sol_offset_local = 0;
        let mut halo_map = BTreeMap::new();
        for (rec, owned_flag) in owned
            .iter()
            .map(|r| (r, true))
            .chain(halos.iter().map(|r| (r, false)))
        {
            let nodes = rec
                .nodes
                .iter()
                .map(|&id| points.require(&PointKey::new(id, rec.periodic)))
                .collect::<Result<Vec<_>, _>>()?;
            if !owned_flag {
                halo_map.insert((rec.global_id, rec.periodic), elements.len());
            }
            let elem = VolumeElement {
                cell: rec.cell,
                p_grid: rec.p_grid,
                p_sol: rec.p_sol,
                nodes,
                owned: owned_flag,
                rank_original: if owned_flag { self.comm.rank() } else { rec.color },
                periodic: rec.periodic,
                global_id: rec.global_id,
                sol_offset_global: owned_flag.then_some(rec.sol_offset),
                sol_offset_local,
                jac_const: owned_flag && rec.jac_const,
                face_jac_const: rec.face_jac_const.clone(),
                std_sol: None,
                std_grid: None,
                metrics: ElementMetrics::default(),
            };
            sol_offset_local += elem.n_dofs_sol();
            elements.push(elem);
        }
        for m in &mut markers {
            m.surface.sort_by_key(|s| s.global_id);
        }

        log::info!(
            "rank {}: {} owned and {} halo elements, {} points, {} boundary elements",
            self.comm.rank(),
            owned.len(),
            halos.len(),
            points.len(),
            markers.iter().map(|m| m.surface.len()).sum::<usize>()
        );
        Ok(DistributedMesh {
            dim,
            n_owned: owned.len(),
            elements,
            points,
            markers,
            owned_map,
            halo_map,
        })
    }

    /// Stage 1: every element and the coordinates of its nodes go to its color.
    fn exchange_elements<M: SourceMesh>(
        &self,
        src: &M,
    ) -> Result<(Vec<ElementRecord>, BTreeMap<u64, [f64; 3]>), DgMeshError> {
        let size = self.comm.size();
        let mut by_color: BTreeMap<usize, (WireWriter, BTreeMap<u64, [f64; 3]>)> = BTreeMap::new();
        for e in src.elements() {
            if e.color >= size {
                return Err(DgMeshError::InvalidConfig(format!(
                    "element {} colored for rank {} of {size}",
                    e.global_id, e.color
                )));
            }
            let (w, pts) = by_color
                .entry(e.color)
                .or_insert_with(|| (WireWriter::new(kind::ELEMENTS), BTreeMap::new()));
            put_element(w, e, None)?;
            for &n in &e.nodes {
                if !pts.contains_key(&n) {
                    pts.insert(n, coord_of(src, n)?);
                }
            }
        }
        let outgoing: BTreeMap<usize, Vec<u8>> = by_color
            .into_iter()
            .map(|(c, (mut w, pts))| {
                put_points(&mut w, &pts);
                (c, w.finish())
            })
            .collect();

        let received = sparse_exchange(self.comm, ELEMENT_TAG, &outgoing)?;
        let mut records = Vec::new();
        let mut points = BTreeMap::new();
        for (peer, buf) in &received {
            let mut r = WireReader::new(buf, kind::ELEMENTS)?;
            for _ in 0..r.count() {
                records.push(get_element(&mut r)?);
            }
            points.extend(get_points(&mut r)?);
            r.finish()?;
            log::debug!("rank {}: elements from rank {peer}", self.comm.rank());
        }
        records.sort_by_key(|e| e.global_id);
        Ok((records, points))
    }

    /// Boundary elements follow their domain element.
    fn exchange_boundary<M: SourceMesh>(
        &self,
        src: &M,
    ) -> Result<Vec<BoundaryRecord>, DgMeshError> {
        let ranges = src.element_ranges();
        let first = ranges[self.comm.rank()];
        let mut by_color: BTreeMap<usize, WireWriter> = BTreeMap::new();
        for m in src.markers() {
            for b in &m.elements {
                let local = b
                    .domain_element
                    .checked_sub(first)
                    .map(|i| i as usize)
                    .filter(|&i| i < src.elements().len())
                    .ok_or_else(|| {
                        DgMeshError::MeshInconsistency(format!(
                            "boundary element {} refers to element {} stored elsewhere",
                            b.global_id, b.domain_element
                        ))
                    })?;
                let color = src.elements()[local].color;
                let w = by_color
                    .entry(color)
                    .or_insert_with(|| WireWriter::new(kind::BOUNDARY));
                put_boundary(w, b, m.tag)?;
            }
        }
        let outgoing: BTreeMap<usize, Vec<u8>> =
            by_color.into_iter().map(|(c, w)| (c, w.finish())).collect();
        let received = sparse_exchange(self.comm, BOUNDARY_TAG, &outgoing)?;
        let mut records = Vec::new();
        for buf in received.values() {
            let mut r = WireReader::new(buf, kind::BOUNDARY)?;
            for _ in 0..r.count() {
                records.push(get_boundary(&mut r)?);
            }
            r.finish()?;
        }
        Ok(records)
    }

    /// Neighbors that are not owned, plus every periodic neighbor.
    fn halo_keys(
        owned: &[ElementRecord],
        owned_map: &BTreeMap<u64, usize>,
    ) -> BTreeSet<(u64, Option<u16>)> {
        let mut keys = BTreeSet::new();
        for e in owned {
            for (nb, per) in e.neighbors.iter().zip(&e.face_periodic) {
                let Some(nb) = *nb else { continue };
                if per.is_none() && owned_map.contains_key(&nb) {
                    continue;
                }
                keys.insert((nb, *per));
            }
        }
        keys
    }

    /// Stage 3: request halo records from the ranks storing them in the source.
    #[allow(clippy::type_complexity)]
    fn exchange_halos<M: SourceMesh>(
        &self,
        src: &M,
        keys: &BTreeSet<(u64, Option<u16>)>,
    ) -> Result<(Vec<ElementRecord>, BTreeMap<PointKey, [f64; 3]>), DgMeshError> {
        let ranges = src.element_ranges();
        let mut requests: BTreeMap<usize, WireWriter> = BTreeMap::new();
        for &(id, per) in keys {
            let owner = source_owner(ranges, id)?;
            let w = requests
                .entry(owner)
                .or_insert_with(|| WireWriter::new(kind::HALO_REQUEST));
            w.put(&WireHaloRequest::new(id, per));
            w.end_record();
        }
        let asked: BTreeSet<usize> = requests.keys().copied().collect();
        let outgoing: BTreeMap<usize, Vec<u8>> =
            requests.into_iter().map(|(r, w)| (r, w.finish())).collect();
        let incoming = sparse_exchange(self.comm, HALO_REQUEST_TAG, &outgoing)?;

        let first = ranges[self.comm.rank()];
        let mut replies = BTreeMap::new();
        for (&peer, buf) in &incoming {
            let mut r = WireReader::new(buf, kind::HALO_REQUEST)?;
            let mut w = WireWriter::new(kind::HALO_REPLY);
            let mut pts = BTreeMap::new();
            for _ in 0..r.count() {
                let req: WireHaloRequest = r.get()?;
                let id = req.global_id();
                let e = id
                    .checked_sub(first)
                    .and_then(|i| src.elements().get(i as usize))
                    .filter(|e| e.global_id == id)
                    .ok_or_else(|| {
                        DgMeshError::MeshInconsistency(format!(
                            "rank {peer} requested element {id}, which is not stored here"
                        ))
                    })?;
                put_element(&mut w, e, req.periodic())?;
                for &n in &e.nodes {
                    if !pts.contains_key(&n) {
                        pts.insert(n, coord_of(src, n)?);
                    }
                }
            }
            r.finish()?;
            put_points(&mut w, &pts);
            replies.insert(peer, w.finish());
        }
        let answers = exchange_payloads(self.comm, HALO_REPLY_TAG, &replies, &asked)?;

        let mut by_key = BTreeMap::new();
        let mut points = BTreeMap::new();
        for buf in answers.values() {
            let mut r = WireReader::new(buf, kind::HALO_REPLY)?;
            let mut recs = Vec::with_capacity(r.count());
            for _ in 0..r.count() {
                recs.push(get_element(&mut r)?);
            }
            let pts = get_points(&mut r)?;
            r.finish()?;
            let coords: BTreeMap<u64, [f64; 3]> = pts.into_iter().collect();
            for rec in recs {
                for &n in &rec.nodes {
                    let c = coords.get(&n).ok_or_else(|| {
                        DgMeshError::WireFormat(format!("halo reply lacks point {n}"))
                    })?;
                    points.insert(PointKey::new(n, rec.periodic), *c);
                }
                by_key.insert((rec.global_id, rec.periodic), rec);
            }
        }
        let halos = keys
            .iter()
            .map(|k| {
                by_key.remove(k).ok_or_else(|| {
                    DgMeshError::MeshInconsistency(format!(
                        "no record received for halo element {} (periodic {:?})",
                        k.0, k.1
                    ))
                })
            })
            .collect::<Result<Vec<_>, _>>()?;
        Ok((halos, points))
    }

    fn build_markers<M: SourceMesh>(
        &self,
        src: &M,
        boundary: Vec<BoundaryRecord>,
        owned_map: &BTreeMap<u64, usize>,
        points: &PointRegistry,
    ) -> Result<Vec<BoundaryMarker>, DgMeshError> {
        let mut markers: Vec<BoundaryMarker> = src
            .markers()
            .iter()
            .map(|m| BoundaryMarker {
                tag: m.tag,
                periodic: m.periodic,
                surface: Vec::new(),
            })
            .collect();
        for b in boundary {
            let m = markers
                .iter_mut()
                .find(|m| m.tag == b.marker)
                .ok_or_else(|| {
                    DgMeshError::MeshInconsistency(format!("unknown marker {}", b.marker))
                })?;
            let volume_elem = *owned_map.get(&b.domain_element).ok_or_else(|| {
                DgMeshError::MeshInconsistency(format!(
                    "domain element {} of boundary element {} is not owned here",
                    b.domain_element, b.global_id
                ))
            })?;
            let nodes = b
                .nodes
                .iter()
                .map(|&id| points.require(&PointKey::plain(id)))
                .collect::<Result<Vec<_>, _>>()?;
            m.surface
                .push(SurfaceElement::new(b.cell, b.p_grid, b.global_id, volume_elem, nodes));
        }
        Ok(markers)
    }

    /// Stage 4: identify periodic halo points with local points of the marker.
    fn reconcile(
        &self,
        dim: usize,
        points: &mut PointRegistry,
        halo_points: &BTreeMap<PointKey, [f64; 3]>,
        markers: &[BoundaryMarker],
    ) -> Result<(), DgMeshError> {
        let mut by_marker: BTreeMap<u16, Vec<PointFem>> = BTreeMap::new();
        for (key, &c) in halo_points {
            if let Some(per) = key.periodic {
                by_marker.entry(per).or_default().push(PointFem::new(*key, c));
            }
        }
        for (per, halo) in by_marker {
            let marker = markers.iter().find(|m| m.tag == per).ok_or_else(|| {
                DgMeshError::MeshInconsistency(format!("periodic marker {per} does not exist"))
            })?;
            let cfg = self.config.periodic_marker(per).ok_or_else(|| {
                DgMeshError::InvalidConfig(format!("periodic marker {per} has no transform"))
            })?;
            let transform = PeriodicTransform::from_config(cfg);
            let surface = {
                let local: &PointRegistry = points;
                let tolerances = marker
                    .surface
                    .iter()
                    .map(|s| Ok(self.config.point_tolerance_factor * s.length_scale(local)?))
                    .collect::<Result<Vec<f64>, DgMeshError>>()?;
                surface_point_index(
                    local,
                    dim,
                    marker
                        .surface
                        .iter()
                        .zip(&tolerances)
                        .map(|(s, &t)| (s.nodes.as_slice(), t)),
                )
            };
            let stats = reconcile_periodic_points(points, &halo, &transform, &surface, dim)?;
            log::debug!(
                "rank {}: periodic marker {per}: {} matched, {} new points",
                self.comm.rank(),
                stats.matched,
                stats.appended
            );
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::algs::communicator::NoComm;

    /// Two unit quads side by side: points 0..6, row-major 3 x 2.
    fn two_quads() -> InMemorySourceMesh {
        let coords = (0..6u64).map(|i| (i, [(i % 3) as f64, (i / 3) as f64, 0.0]));
        let elements = vec![
            SourceElement::new(0, CellType::Quadrilateral, 1, 1, vec![0, 1, 3, 4]),
            SourceElement::new(1, CellType::Quadrilateral, 1, 2, vec![1, 2, 4, 5]),
        ];
        InMemorySourceMesh::serial(2, elements, coords, Vec::new()).unwrap()
    }

    #[test]
    fn serial_mesh_links_shared_face() {
        let m = two_quads();
        // face 1 of element 0 is [1, 4]; face 3 of element 1 is [4, 1]
        assert_eq!(m.elements()[0].neighbors[1], Some(1));
        assert_eq!(m.elements()[1].neighbors[3], Some(0));
        assert_eq!(m.elements()[1].sol_offset, 4);
    }

    #[test]
    fn split_keeps_referenced_points() {
        let parts = two_quads().split(2);
        assert_eq!(parts[0].element_ranges(), &[0, 1, 2]);
        assert_eq!(parts[1].elements()[0].global_id, 1);
        assert!(parts[1].point_coord(2).is_some());
        assert!(parts[1].point_coord(0).is_none());
    }

    #[test]
    fn serial_distribution_owns_everything() {
        let src = two_quads();
        let cfg = DgMeshConfig::default();
        let mesh = MeshDistributor::new(&NoComm, &cfg).distribute(&src).unwrap();
        assert_eq!(mesh.n_owned, 2);
        assert_eq!(mesh.n_halo(), 0);
        assert_eq!(mesh.points.len(), 6);
        assert_eq!(mesh.elements[1].sol_offset_local, 4);
        assert_eq!(mesh.n_sol_dofs(), 13);
        assert_eq!(mesh.elements[1].nodes, vec![1, 2, 4, 5]);
    }

    #[test]
    fn source_owner_by_range() {
        let ranges = [0, 3, 3, 7];
        assert_eq!(source_owner(&ranges, 0).unwrap(), 0);
        assert_eq!(source_owner(&ranges, 3).unwrap(), 2);
        assert_eq!(source_owner(&ranges, 6).unwrap(), 2);
        assert!(matches!(
            source_owner(&ranges, 7),
            Err(DgMeshError::MeshInconsistency(_))
        ));
    }

    #[test]
    fn bad_color_is_rejected() {
        let mut src = two_quads();
        src.set_colors(&[0, 3]).unwrap();
        let cfg = DgMeshConfig::default();
        let res = MeshDistributor::new(&NoComm, &cfg).distribute(&src);
        assert!(matches!(res, Err(DgMeshError::InvalidConfig(_))));
    }
}
