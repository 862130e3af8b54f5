//! The rank-local DG mesh and the construction pipeline.
//!
//! [`DgMesh::build`] runs distribution, standard volume elements, face
//! construction, the halo exchange pattern and the metric terms in that
//! order. Every stage is collective: all ranks must call it, and a failure on
//! one rank leaves the others blocked in the next exchange. Drivers that
//! cannot recover should use [`build_or_abort`].

use crate::algs::communicator::Communicator;
use crate::algs::distribute::{DistributedMesh, MeshDistributor, SourceMesh};
use crate::algs::faces::FaceBuilder;
use crate::algs::linalg::{LinearAlgebra, default_backend};
use crate::algs::send_receive::HaloExchangePattern;
use crate::config::DgMeshConfig;
use crate::discretization::cache::StandardElementCache;
use crate::geometry::arena::MetricArena;
use crate::geometry::metrics::MetricEngine;
use crate::mesh_error::DgMeshError;
use crate::topology::element::{MatchingFace, VolumeElement};

#[derive(Debug)]
pub struct DgMesh {
    pub mesh: DistributedMesh,
    pub faces: Vec<MatchingFace>,
    pub standard: StandardElementCache,
    pub metrics: MetricArena,
    pub exchange: HaloExchangePattern,
}

impl DgMesh {
    /// Build with the default linear algebra backend.
    pub fn build<C, M>(comm: &C, src: &M, config: &DgMeshConfig) -> Result<Self, DgMeshError>
    where
        C: Communicator,
        M: SourceMesh,
    {
        Self::build_with(comm, src, config, default_backend())
    }

    pub fn build_with<C, M>(
        comm: &C,
        src: &M,
        config: &DgMeshConfig,
        la: &dyn LinearAlgebra,
    ) -> Result<Self, DgMeshError>
    where
        C: Communicator,
        M: SourceMesh,
    {
        config.validate()?;
        let mut mesh = MeshDistributor::new(comm, config).distribute(src)?;
        let mut standard = StandardElementCache::new();
        let builder = FaceBuilder::new(config, la);
        builder.standard_volume_elements(&mut mesh, &mut standard)?;
        let mut faces = builder.build(&mut mesh, &mut standard)?;
        let exchange = HaloExchangePattern::build(comm, &mesh, config)?;
        let metrics = MetricEngine::new(config, la).compute(&mut mesh, &mut faces, &standard)?;
        log::info!(
            "rank {}: DG mesh ready, {} owned and {} halo elements, {} solution DOFs",
            comm.rank(),
            mesh.n_owned,
            mesh.n_halo(),
            mesh.n_sol_dofs()
        );
        Ok(Self {
            mesh,
            faces,
            standard,
            metrics,
            exchange,
        })
    }

    pub fn owned_elements(&self) -> &[VolumeElement] {
        &self.mesh.elements[..self.mesh.n_owned]
    }

    /// `J` and the scaled inverse metric terms of owned element `e`.
    pub fn volume_metrics(&self, e: usize) -> &[f64] {
        self.metrics.get(self.mesh.elements[e].metrics.volume)
    }

    /// Lumped mass of owned element `e`; empty unless the time marching mode
    /// stores it.
    pub fn lumped_mass(&self, e: usize) -> &[f64] {
        self.metrics.get(self.mesh.elements[e].metrics.mass_lumped)
    }

    /// Unit normals and area elements of matching face `f`.
    pub fn face_normals(&self, f: usize) -> &[f64] {
        self.metrics.get(self.faces[f].metrics.normals)
    }
}

/// [`DgMesh::build`], terminating every rank on failure.
pub fn build_or_abort<C, M>(comm: &C, src: &M, config: &DgMeshConfig) -> DgMesh
where
    C: Communicator,
    M: SourceMesh,
{
    match DgMesh::build(comm, src, config) {
        Ok(mesh) => mesh,
        Err(e) => {
            log::error!("rank {}: {}: {e}", comm.rank(), e.class());
            comm.abort(1)
        }
    }
}
