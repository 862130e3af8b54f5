//! Element shapes, rank-local points and elements, and periodic transforms.

pub mod cell_type;
pub mod element;
pub mod periodic;
pub mod point;

pub use cell_type::CellType;
pub use element::{BoundaryMarker, FaceSideDofs, MatchingFace, SurfaceElement, VolumeElement};
pub use point::{PointFem, PointKey, PointRegistry};
