//! Reference-element discretization: DOF lattices, quadrature, nodal bases and
//! the standard element cache.

pub mod basis;
pub mod cache;
pub mod lattice;
pub mod legendre;
pub mod quadrature;
pub mod standard_element;

pub use basis::{BasisTabulation, NodalBasis};
pub use cache::StandardElementCache;
pub use quadrature::QuadratureRule;
pub use standard_element::{FaceKey, SideKey, StandardElement, StandardFace, VolumeKey};
