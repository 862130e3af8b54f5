//! Fixed, versioned, little-endian wire types for the distribution protocol.
//!
//! Messages start with a [`WireHdr`] followed by a [`WireCount`] and that many
//! variable-length records. Fixed parts of records are `bytemuck::Pod`
//! structs; variable parts are runs of little-endian scalars appended by
//! [`WireWriter`] and read back by [`WireReader`].

use crate::mesh_error::DgMeshError;
use bytemuck::{Pod, Zeroable};
use static_assertions::const_assert_eq;
use std::mem::size_of;

pub fn cast_slice<T: Pod>(v: &[T]) -> &[u8] {
    bytemuck::cast_slice(v)
}

pub fn cast_slice_mut<T: Pod>(v: &mut [T]) -> &mut [u8] {
    bytemuck::cast_slice_mut(v)
}

/// Bump when the layout or semantics change in incompatible ways.
pub const WIRE_VERSION: u16 = 1;

/// Message kinds carried in [`WireHdr::kind`].
pub mod kind {
    pub const ELEMENTS: u16 = 1;
    pub const BOUNDARY: u16 = 2;
    pub const HALO_REQUEST: u16 = 3;
    pub const HALO_REPLY: u16 = 4;
    pub const DOF_REQUEST: u16 = 5;
}

/// All multi-byte integers in these structs are **little-endian** on the wire.
/// We store them pre-LE with `.to_le()` and decode with `.from_le()`.

#[repr(C)]
#[derive(Copy, Clone, Pod, Zeroable)]
pub struct WireHdr {
    pub version_le: u16,
    pub kind_le: u16,
    pub reserved_le: u32,
}

impl WireHdr {
    pub fn new(kind: u16) -> Self {
        Self {
            version_le: WIRE_VERSION.to_le(),
            kind_le: kind.to_le(),
            reserved_le: 0,
        }
    }
    pub fn kind(&self) -> u16 {
        u16::from_le(self.kind_le)
    }
    pub fn version(&self) -> u16 {
        u16::from_le(self.version_le)
    }
}

#[repr(C)]
#[derive(Copy, Clone, Pod, Zeroable)]
pub struct WireCount {
    pub n_le: u32,
}

impl WireCount {
    pub fn new(n: usize) -> Self {
        Self {
            n_le: (n as u32).to_le(),
        }
    }
    pub fn get(&self) -> usize {
        u32::from_le(self.n_le) as usize
    }
}

/// Byte length announcement of the payload phase.
#[repr(C)]
#[derive(Copy, Clone, Pod, Zeroable)]
pub struct WireLen {
    pub n_le: u64,
}

impl WireLen {
    pub fn new(n: usize) -> Self {
        Self {
            n_le: (n as u64).to_le(),
        }
    }
    pub fn get(&self) -> usize {
        u64::from_le(self.n_le) as usize
    }
}

/// Fixed part of a volume element record. Followed by `n_nodes` node IDs
/// (u64), `n_faces` neighbor IDs (i64, -1 = none), `n_faces` periodic marker
/// indices (i32, -1 = none) and `n_faces` constant-Jacobian flags (u8).
#[repr(C)]
#[derive(Copy, Clone, Pod, Zeroable)]
pub struct WireElementHdr {
    pub global_id_le: u64,
    pub sol_offset_le: u64,
    pub rank_le: u32,
    pub vtk_le: u16,
    pub p_grid_le: u16,
    pub p_sol_le: u16,
    pub n_nodes_le: u16,
    pub n_faces_le: u16,
    pub periodic_le: i16,
    pub jac_const: u8,
    pub _pad: [u8; 7],
}

/// Fixed part of a boundary element record, followed by `n_nodes` node IDs.
#[repr(C)]
#[derive(Copy, Clone, Pod, Zeroable)]
pub struct WireBoundaryHdr {
    pub global_id_le: u64,
    pub domain_elem_le: u64,
    pub marker_le: u32,
    pub vtk_le: u16,
    pub p_grid_le: u16,
    pub n_nodes_le: u16,
    pub _pad: [u8; 6],
}

/// A point with its coordinates (f64 bit patterns).
#[repr(C)]
#[derive(Copy, Clone, Pod, Zeroable)]
pub struct WirePoint {
    pub id_le: u64,
    pub coord_le: [u64; 3],
}

impl WirePoint {
    pub fn new(id: u64, coord: [f64; 3]) -> Self {
        Self {
            id_le: id.to_le(),
            coord_le: coord.map(|c| c.to_bits().to_le()),
        }
    }
    pub fn id(&self) -> u64 {
        u64::from_le(self.id_le)
    }
    pub fn coord(&self) -> [f64; 3] {
        self.coord_le.map(|c| f64::from_bits(u64::from_le(c)))
    }
}

/// Halo request: element global ID and periodic marker index (-1 = none).
#[repr(C)]
#[derive(Copy, Clone, Pod, Zeroable)]
pub struct WireHaloRequest {
    pub global_id_le: u64,
    pub periodic_le: i32,
    pub _pad: u32,
}

impl WireHaloRequest {
    pub fn new(global_id: u64, periodic: Option<u16>) -> Self {
        Self {
            global_id_le: global_id.to_le(),
            periodic_le: periodic.map_or(-1, i32::from).to_le(),
            _pad: 0,
        }
    }
    pub fn global_id(&self) -> u64 {
        u64::from_le(self.global_id_le)
    }
    pub fn periodic(&self) -> Option<u16> {
        let p = i32::from_le(self.periodic_le);
        u16::try_from(p).ok()
    }
}

// ===== Compile-time sanity checks =========================================

const_assert_eq!(size_of::<WireHdr>(), 8);
const_assert_eq!(size_of::<WireCount>(), 4);
const_assert_eq!(size_of::<WireLen>(), 8);
const_assert_eq!(size_of::<WireElementHdr>(), 40);
const_assert_eq!(size_of::<WireBoundaryHdr>(), 32);
const_assert_eq!(size_of::<WirePoint>(), 32);
const_assert_eq!(size_of::<WireHaloRequest>(), 16);

/// Append-only message builder.
#[derive(Debug, Default, Clone)]
pub struct WireWriter {
    buf: Vec<u8>,
    count_at: usize,
    count: usize,
}

impl WireWriter {
    /// Start a message of the given kind; the record count is patched by `finish`.
    pub fn new(kind: u16) -> Self {
        let mut w = Self::default();
        w.put(&WireHdr::new(kind));
        w.count_at = w.buf.len();
        w.put(&WireCount::new(0));
        w
    }

    pub fn put<T: Pod>(&mut self, v: &T) {
        self.buf.extend_from_slice(bytemuck::bytes_of(v));
    }

    pub fn put_u64s(&mut self, vals: impl IntoIterator<Item = u64>) {
        for v in vals {
            self.buf.extend_from_slice(&v.to_le_bytes());
        }
    }

    pub fn put_i64s(&mut self, vals: impl IntoIterator<Item = i64>) {
        for v in vals {
            self.buf.extend_from_slice(&v.to_le_bytes());
        }
    }

    pub fn put_i32s(&mut self, vals: impl IntoIterator<Item = i32>) {
        for v in vals {
            self.buf.extend_from_slice(&v.to_le_bytes());
        }
    }

    pub fn put_bytes(&mut self, vals: &[u8]) {
        self.buf.extend_from_slice(vals);
    }

    /// Mark the end of one record.
    pub fn end_record(&mut self) {
        self.count += 1;
    }

    pub fn record_count(&self) -> usize {
        self.count
    }

    pub fn finish(mut self) -> Vec<u8> {
        let cnt = WireCount::new(self.count);
        let at = self.count_at;
        self.buf[at..at + size_of::<WireCount>()].copy_from_slice(bytemuck::bytes_of(&cnt));
        self.buf
    }
}

/// Cursor over a received message.
#[derive(Debug)]
pub struct WireReader<'a> {
    buf: &'a [u8],
    pos: usize,
    count: usize,
}

impl<'a> WireReader<'a> {
    /// Validate the header (version and kind) and read the record count.
    pub fn new(buf: &'a [u8], expected_kind: u16) -> Result<Self, DgMeshError> {
        let mut r = Self {
            buf,
            pos: 0,
            count: 0,
        };
        let hdr: WireHdr = r.get()?;
        if hdr.version() != WIRE_VERSION {
            return Err(DgMeshError::WireFormat(format!(
                "wire version {} (expected {WIRE_VERSION})",
                hdr.version()
            )));
        }
        if hdr.kind() != expected_kind {
            return Err(DgMeshError::WireFormat(format!(
                "message kind {} (expected {expected_kind})",
                hdr.kind()
            )));
        }
        let cnt: WireCount = r.get()?;
        r.count = cnt.get();
        Ok(r)
    }

    /// Number of records announced by the sender.
    pub fn count(&self) -> usize {
        self.count
    }

    fn take(&mut self, n: usize) -> Result<&'a [u8], DgMeshError> {
        let end = self.pos + n;
        if end > self.buf.len() {
            return Err(DgMeshError::WireFormat(format!(
                "truncated message: need {end} bytes, have {}",
                self.buf.len()
            )));
        }
        let s = &self.buf[self.pos..end];
        self.pos = end;
        Ok(s)
    }

    pub fn get<T: Pod>(&mut self) -> Result<T, DgMeshError> {
        let bytes = self.take(size_of::<T>())?;
        Ok(bytemuck::pod_read_unaligned(bytes))
    }

    pub fn get_u64s(&mut self, n: usize) -> Result<Vec<u64>, DgMeshError> {
        let bytes = self.take(n * 8)?;
        Ok(bytes
            .chunks_exact(8)
            .map(|c| u64::from_le_bytes(c.try_into().unwrap_or([0; 8])))
            .collect())
    }

    pub fn get_i64s(&mut self, n: usize) -> Result<Vec<i64>, DgMeshError> {
        let bytes = self.take(n * 8)?;
        Ok(bytes
            .chunks_exact(8)
            .map(|c| i64::from_le_bytes(c.try_into().unwrap_or([0; 8])))
            .collect())
    }

    pub fn get_i32s(&mut self, n: usize) -> Result<Vec<i32>, DgMeshError> {
        let bytes = self.take(n * 4)?;
        Ok(bytes
            .chunks_exact(4)
            .map(|c| i32::from_le_bytes(c.try_into().unwrap_or([0; 4])))
            .collect())
    }

    pub fn get_bytes(&mut self, n: usize) -> Result<&'a [u8], DgMeshError> {
        self.take(n)
    }

    /// Error unless every byte was consumed.
    pub fn finish(self) -> Result<(), DgMeshError> {
        if self.pos == self.buf.len() {
            Ok(())
        } else {
            Err(DgMeshError::WireFormat(format!(
                "{} trailing bytes",
                self.buf.len() - self.pos
            )))
        }
    }
}
