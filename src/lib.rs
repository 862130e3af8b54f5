#![cfg_attr(docsrs, feature(doc_cfg))]
//! # dg-fem-mesh
//!
//! Distributed mesh preprocessing for high-order discontinuous Galerkin
//! solvers. Starting from a linearly partitioned source mesh whose elements
//! carry a destination rank, the crate
//!
//! - redistributes elements, boundary elements and points, importing halo
//!   elements (including periodic images) from their owners;
//! - builds interior matching faces and boundary faces with a deterministic
//!   side-0 convention and face-renumbered DOF lists;
//! - shares quadrature rules and basis tables through a standard element cache;
//! - evaluates Jacobians, inverse metric terms, face normals, SIP terms and
//!   mass matrices into one flat [`MetricArena`](geometry::MetricArena);
//! - derives the halo DOF exchange pattern of the solver.
//!
//! ## Features
//! - `rayon`: evaluate element and face metrics in parallel within a rank
//! - `mpi-support`: MPI communicator backend
//! - `nalgebra-backend`: dense kernels through `nalgebra`
//!
//! ## Usage
//!
//! ```no_run
//! use dg_fem_mesh::prelude::*;
//!
//! let generated = quad_mesh(4, 4, [0.0, 0.0], [1.0, 1.0], Default::default())?;
//! let config = DgMeshConfig {
//!     periodic: generated.periodic.clone(),
//!     ..Default::default()
//! };
//! let mesh = DgMesh::build(&NoComm, &generated.mesh, &config)?;
//! assert_eq!(mesh.mesh.n_owned, 16);
//! # Ok::<(), DgMeshError>(())
//! ```
//!
//! Logging goes through the `log` facade; install any logger to see the
//! per-stage summaries.

pub mod algs;
pub mod config;
pub mod discretization;
pub mod geometry;
pub mod mesh;
pub mod mesh_error;
pub mod mesh_generation;
pub mod topology;

/// A convenient prelude to import the most-used traits & types:
pub mod prelude {
    pub use crate::algs::communicator::{Communicator, LocalComm, NoComm};
    #[cfg(feature = "mpi-support")]
    pub use crate::algs::communicator::MpiComm;
    pub use crate::algs::distribute::{
        DistributedMesh, InMemorySourceMesh, MeshDistributor, SourceElement, SourceMesh,
    };
    pub use crate::algs::faces::FaceBuilder;
    pub use crate::algs::linalg::{LinearAlgebra, ReferenceLinearAlgebra, default_backend};
    pub use crate::algs::send_receive::HaloExchangePattern;
    pub use crate::config::{DgMeshConfig, PeriodicMarkerConfig, TimeMarching};
    pub use crate::discretization::cache::StandardElementCache;
    pub use crate::geometry::arena::{MetricArena, MetricSpan};
    pub use crate::geometry::metrics::MetricEngine;
    pub use crate::mesh::{DgMesh, build_or_abort};
    pub use crate::mesh_error::DgMeshError;
    pub use crate::mesh_generation::{MeshGenerationOptions, Periodicity, hex_mesh, quad_mesh};
    pub use crate::topology::cell_type::CellType;
    pub use crate::topology::element::{MatchingFace, SurfaceElement, VolumeElement};
}
